pub mod db;
pub mod migrations;
pub mod models;

pub use db::{Database, DATA_DIR_ENV};
pub use models::{keys, AppId, AppIdError, PendingBlockSignal, RestrictionPolicy};
