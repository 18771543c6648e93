use anyhow::Result;
use monkgate_storage::AppId;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::watch,
};

use crate::{daemon::MonitorStatus, detector::ForegroundDetector};

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcRequest {
    Status,
    Foreground,
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcResponse {
    Status(MonitorStatus),
    Foreground(Option<AppId>),
    Shutdown,
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or replies with garbage
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

pub struct DaemonIpcHandler {
    status: Mutex<watch::Receiver<MonitorStatus>>,
    detector: Arc<ForegroundDetector>,
    shutdown: watch::Sender<bool>,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(
        status: watch::Receiver<MonitorStatus>,
        detector: Arc<ForegroundDetector>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            status: Mutex::new(status),
            detector,
            shutdown,
        }
    }

    /// Point status queries at a restarted monitor
    pub fn replace_status(&self, status: watch::Receiver<MonitorStatus>) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    pub(crate) fn current_status(&self) -> MonitorStatus {
        self.status
            .lock()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default()
    }

    async fn respond(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => IpcResponse::Status(self.current_status()),
            IpcRequest::Foreground => {
                let app = match self.detector.detect().await {
                    Ok(sample) => sample.map(|s| s.app_id),
                    Err(e) => {
                        log::warn!("{e}");
                        None
                    }
                };
                IpcResponse::Foreground(app)
            }
            IpcRequest::Shutdown => {
                log::info!("Shutdown requested over IPC");
                self.shutdown.send_replace(true);
                IpcResponse::Shutdown
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the response cannot be written back
    pub async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        let response = self.respond(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

/// Serve IPC requests on `sock_path` until the task is dropped
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    match stream.read_to_end(&mut buf).await {
                        Ok(0) => {} // Connection closed
                        Ok(_) => match bincode::deserialize::<IpcRequest>(&buf) {
                            Ok(request) => {
                                if let Err(e) = handler.handle(&mut stream, request).await {
                                    log::error!("IPC handle error: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("IPC deserialize error: {e}");
                            }
                        },
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
