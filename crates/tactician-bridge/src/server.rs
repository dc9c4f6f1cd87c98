//! Newline-delimited JSON server for the host connection.
//!
//! Connections are served one at a time and frames one at a time: each
//! inbound line is fully processed and answered before the next is read,
//! so responses come back in submission order.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::Duration;

use tactician_core::{ProcessError, TickProcessor};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::BridgeError;

/// Read size used while skipping the tail of an oversized frame.
const DISCARD_CHUNK: u64 = 8 * 1024;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener ready to serve.
#[derive(Debug)]
pub struct BridgeServer {
    listener: TcpListener,
    max_frame_bytes: usize,
}

impl BridgeServer {
    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bind`] if the address is invalid or taken.
    pub async fn bind(addr: &str, max_frame_bytes: usize) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BridgeError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        Ok(Self {
            listener,
            max_frame_bytes: max_frame_bytes.max(1),
        })
    }

    /// The address actually bound.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until `shutdown` resolves.
    ///
    /// A failing connection is logged and dropped, and so is a failed
    /// `accept`; the listener keeps accepting.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the listener has no local address.
    pub async fn run<F>(
        self,
        processor: &mut TickProcessor,
        shutdown: F,
    ) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, "bridge listening");

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    if pause_after_accept_error(&e, shutdown.as_mut()).await.is_break() {
                        break;
                    }
                    continue;
                }
            };
            info!(%peer, "host connected");

            let (reader, writer) = stream.into_split();
            let served = tokio::select! {
                () = &mut shutdown => break,
                served = serve_connection(reader, writer, processor, self.max_frame_bytes) => served,
            };
            match served {
                Ok(frames) => info!(%peer, frames, "host disconnected"),
                Err(e) => warn!(%peer, error = %e, "connection closed with error"),
            }
        }

        info!("bridge stopped");
        Ok(())
    }
}

/// Log a failed `accept` and wait [`ACCEPT_BACKOFF`] before the next one.
/// Breaks if `shutdown` resolves during the wait.
async fn pause_after_accept_error<F>(error: &io::Error, shutdown: Pin<&mut F>) -> ControlFlow<()>
where
    F: Future<Output = ()>,
{
    warn!(
        error = %error,
        backoff = ?ACCEPT_BACKOFF,
        "accept failed, retrying"
    );
    tokio::select! {
        () = shutdown => ControlFlow::Break(()),
        () = tokio::time::sleep(ACCEPT_BACKOFF) => ControlFlow::Continue(()),
    }
}

/// Serve one connection until EOF. Returns the number of frames answered.
///
/// # Errors
///
/// Returns [`BridgeError`] on socket failure or if a response cannot be
/// encoded.
pub async fn serve_connection<R, W>(
    reader: R,
    mut writer: W,
    processor: &mut TickProcessor,
    max_frame_bytes: usize,
) -> Result<u64, BridgeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut frames: u64 = 0;
    let limit = u64::try_from(max_frame_bytes).unwrap_or(u64::MAX).saturating_add(1);

    loop {
        buf.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            break;
        }

        let (line, terminated) = match buf.strip_suffix(b"\n") {
            Some(line) => (line, true),
            None => (buf.as_slice(), false),
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let response = if line.len() > max_frame_bytes {
            if !terminated {
                discard_line(&mut reader).await?;
            }
            warn!(limit = max_frame_bytes, "frame too large");
            processor.reject(&ProcessError::FrameTooLarge {
                size: line.len(),
                limit: max_frame_bytes,
            })
        } else if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        } else {
            let raw = String::from_utf8_lossy(line);
            processor.process_message(&raw).await
        };

        let mut encoded = response.to_json()?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
        frames = frames.saturating_add(1);
        debug!(frames, response = response.message_type(), "frame answered");
    }

    Ok(frames)
}

/// Skip to just past the next newline (or EOF).
async fn discard_line<R>(reader: &mut BufReader<R>) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let read = (&mut *reader)
            .take(DISCARD_CHUNK)
            .read_until(b'\n', &mut scratch)
            .await?;
        if read == 0 || scratch.ends_with(b"\n") {
            return Ok(());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use serde_json::{Value, json};
    use tactician_core::{AgentConfig, CoordinatorCatalog};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    use super::*;

    fn processor() -> TickProcessor {
        TickProcessor::from_config(&AgentConfig::default(), CoordinatorCatalog::new())
    }

    fn state_update(tick: u64) -> String {
        json!({
            "type": "state_update",
            "tick": tick,
            "payload": {"character": {"name": "Priest"}, "map": {"name": "pay_dun00"}}
        })
        .to_string()
    }

    async fn run_frames(input: String, max_frame_bytes: usize) -> Vec<Value> {
        let mut processor = processor();
        let mut output = Vec::new();
        serve_connection(input.as_bytes(), &mut output, &mut processor, max_frame_bytes)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn answers_each_frame_in_order() {
        let input = format!(
            "{}\n{}\n\n{}\n",
            state_update(1),
            r#"{"type":"heartbeat","tick":1}"#,
            state_update(2)
        );
        let out = run_frames(input, 1024).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["type"], "decision");
        assert_eq!(out[0]["tick"], 1);
        assert_eq!(out[1]["type"], "heartbeat_ack");
        assert_eq!(out[1]["ticks_processed"], 1);
        assert_eq!(out[2]["tick"], 2);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_and_skipped() {
        let big = format!(r#"{{"type":"heartbeat","pad":"{}"}}"#, "x".repeat(200));
        let input = format!("{big}\r\n{}\n", r#"{"type":"heartbeat","tick":7}"#);
        let out = run_frames(input, 64).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["type"], "error");
        assert_eq!(out[0]["error"]["type"], "frame_too_large");
        assert_eq!(out[1]["client_tick"], 7);
    }

    #[tokio::test]
    async fn garbage_is_invalid_message() {
        let out = run_frames("hello\n[1]\n".to_owned(), 1024).await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o["error"]["type"] == "invalid_message"));
    }

    #[tokio::test]
    async fn final_frame_without_newline_is_answered() {
        let out = run_frames(r#"{"type":"heartbeat"}"#.to_owned(), 1024).await;
        assert_eq!(out.len(), 1);
        assert!(out[0]["client_tick"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn accept_error_backs_off_and_continues() {
        let shutdown = std::future::pending::<()>();
        tokio::pin!(shutdown);
        let started = Instant::now();
        let error = io::Error::from(io::ErrorKind::ConnectionAborted);

        let flow = pause_after_accept_error(&error, shutdown.as_mut()).await;
        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(started.elapsed() >= ACCEPT_BACKOFF);

        // A second failure in a row is handled the same way.
        let error = io::Error::other("too many open files");
        let flow = pause_after_accept_error(&error, shutdown.as_mut()).await;
        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(started.elapsed() >= ACCEPT_BACKOFF.saturating_mul(2));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_accept_backoff_short() {
        let shutdown = std::future::ready(());
        tokio::pin!(shutdown);
        let started = Instant::now();
        let error = io::Error::from(io::ErrorKind::ConnectionAborted);

        let flow = pause_after_accept_error(&error, shutdown.as_mut()).await;
        assert_eq!(flow, ControlFlow::Break(()));
        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn serves_tcp_until_shutdown() {
        let server = BridgeServer::bind("127.0.0.1:0", 4096).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut processor = processor();
            let shutdown = async {
                let _ = stopped.await;
            };
            server.run(&mut processor, shutdown).await.unwrap();
            processor.ticks_processed()
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(format!("{}\n", state_update(5)).as_bytes())
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["type"], "decision");
        assert_eq!(reply["tick"], 5);

        write_half.write_all(b"{\"type\":\"bogus\"}\n").await.unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["error"]["type"], "unknown_message_type");

        drop(write_half);
        assert!(lines.next_line().await.unwrap().is_none());

        stop.send(()).unwrap();
        assert_eq!(task.await.unwrap(), 1);
    }
}
