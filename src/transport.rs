//! Newline-delimited JSON over a unix socket. The socket path names the
//! feed; every subscriber sees every payload in publish order.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Split};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};

use crate::logging;
use crate::shutdown::ShutdownSignal;

/// Ordered stream of opaque payloads. `Ok(None)` means the feed ended.
#[async_trait]
pub trait TickSource: Send {
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
impl TickSource for mpsc::Receiver<Vec<u8>> {
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.recv().await)
    }
}

/// Reads newline-terminated frames as raw bytes. Frames are not decoded
/// here, so a line that is not UTF-8 reaches the parser like any other.
pub struct SocketFeed {
    path: PathBuf,
    frames: Split<BufReader<UnixStream>>,
}

impl SocketFeed {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("failed to connect to feed socket {:?}", path))?;
        Ok(Self {
            path,
            frames: BufReader::new(stream).split(b'\n'),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TickSource for SocketFeed {
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let frame = self
                .frames
                .next_segment()
                .await
                .with_context(|| format!("failed to read from feed {:?}", self.path))?;
            match frame {
                Some(frame) if frame.iter().all(u8::is_ascii_whitespace) => continue,
                Some(frame) => return Ok(Some(frame)),
                None => return Ok(None),
            }
        }
    }
}

/// Accepts subscribers on `path` and copies every payload from `sender` to
/// each of them until shutdown. The socket file is removed on exit.
pub async fn serve_feed(
    path: &Path,
    sender: broadcast::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<ShutdownSignal>,
) -> Result<()> {
    cleanup_socket_path(path)?;
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind unix socket at {:?}", path))?;
    logging::info(
        "feed.bind",
        "Listening for feed subscribers",
        json!({ "path": path.display().to_string() }),
    );

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, _) = accept_result?;
                let receiver = sender.subscribe();
                tokio::spawn(async move {
                    if let Err(err) = forward_payloads(stream, receiver).await {
                        logging::warn(
                            "feed.stream_error",
                            "Feed subscriber task ended with error",
                            json!({ "error": format!("{err:?}") })
                        );
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                match *shutdown.borrow() {
                    ShutdownSignal::None => continue,
                    ShutdownSignal::Graceful => {
                        logging::info_simple("feed.shutdown", "Feed publisher shutting down gracefully");
                        break;
                    }
                    ShutdownSignal::Immediate => {
                        logging::warn(
                            "feed.shutdown",
                            "Feed publisher stopping immediately",
                            json!({ "subscribers": sender.receiver_count() }),
                        );
                        break;
                    }
                }
            }
        }
    }

    drop(sender);
    cleanup_socket_path(path)?;
    Ok(())
}

async fn forward_payloads(
    mut stream: UnixStream,
    mut receiver: broadcast::Receiver<Vec<u8>>,
) -> Result<()> {
    loop {
        match receiver.recv().await {
            Ok(mut payload) => {
                payload.push(b'\n');
                if let Err(err) = stream.write_all(&payload).await {
                    if is_disconnect(&err) {
                        logging::info(
                            "feed.client_disconnect",
                            "Feed subscriber disconnected",
                            json!({ "reason": err.kind().to_string() }),
                        );
                        break;
                    }
                    return Err(err.into());
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                logging::warn(
                    "feed.lagged",
                    "Feed subscriber lagged payloads",
                    json!({ "skipped": skipped }),
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

fn cleanup_socket_path(socket_path: &Path) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("failed to remove old socket at {:?}", socket_path))?;
    }
    Ok(())
}
