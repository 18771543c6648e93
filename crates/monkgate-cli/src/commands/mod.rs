pub mod daemon;
pub mod helpers;
pub mod init;
pub mod policy;
pub mod watch;
