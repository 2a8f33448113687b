use async_trait::async_trait;
use clamav_client::clean;
use clamav_client::tokio::Tcp;
use futures::StreamExt;
use slidepipe_storage::ByteStream;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::str;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::scanner::{MalwareScanner, ScanFailure, ScanOutcome};

const INSTREAM_CHUNK_SIZE: usize = 64 * 1024;

/// clamd client over TCP.
///
/// The async `clamav-client` API yields `!Send` futures, so each exchange is
/// driven on the blocking pool through the runtime handle. The timeout wraps
/// the exchange itself: when it fires the socket and the object stream are
/// dropped and the blocking thread returns.
#[derive(Clone)]
pub struct ClamAVScanner {
    host: String,
    port: u16,
    /// Timeout in seconds for each scan operation. Multi-GB slides need a generous value.
    timeout_secs: u64,
}

impl ClamAVScanner {
    pub fn new(host: String, port: u16, timeout_secs: u64) -> Self {
        Self {
            host,
            port,
            timeout_secs,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn io_failure(address: &str, error: io::Error) -> ScanFailure {
        match error.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::AddrNotAvailable
            | ErrorKind::NotFound
            | ErrorKind::TimedOut => ScanFailure::Unreachable {
                address: address.to_string(),
                message: error.to_string(),
            },
            _ => ScanFailure::Protocol(error.to_string()),
        }
    }

    /// Run one clamd exchange under the scan timeout.
    async fn exchange<F, Fut>(&self, make: F) -> Result<io::Result<Vec<u8>>, ScanFailure>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<Vec<u8>>>,
    {
        let timeout_secs = self.timeout_secs;
        let timeout = Duration::from_secs(timeout_secs);
        let handle = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || {
            handle.block_on(async move { tokio::time::timeout(timeout, make()).await })
        })
        .await
        .map_err(|e| ScanFailure::Task(e.to_string()))?
        .map_err(|_| ScanFailure::Timeout(timeout_secs))
    }
}

/// Interpret a clamd `INSTREAM` reply.
pub(crate) fn parse_response(response: &[u8]) -> Result<ScanOutcome, ScanFailure> {
    let text = str::from_utf8(response)
        .map_err(|e| ScanFailure::Protocol(format!("Response is not UTF-8: {}", e)))?
        .trim_matches(|c: char| c == '\0' || c.is_whitespace());

    if text.is_empty() {
        return Err(ScanFailure::Protocol("Empty response".to_string()));
    }

    if text.contains("FOUND") {
        let signatures: Vec<String> = text
            .split(['\0', '\n'])
            .filter_map(|line| {
                let line = line.trim();
                let line = line.strip_suffix("FOUND")?.trim_end();
                let name = line.split_once(':').map_or(line, |(_, name)| name).trim();
                (!name.is_empty()).then(|| name.to_string())
            })
            .collect();
        let signatures = if signatures.is_empty() {
            vec!["unknown".to_string()]
        } else {
            signatures
        };
        return Ok(ScanOutcome::Infected(signatures));
    }

    if text.ends_with("ERROR") {
        return Err(ScanFailure::Protocol(text.to_string()));
    }

    match clean(response) {
        Ok(true) => Ok(ScanOutcome::Clean),
        Ok(false) => Err(ScanFailure::Protocol(format!(
            "Unexpected response: {}",
            text
        ))),
        Err(e) => Err(ScanFailure::Protocol(format!(
            "Failed to parse ClamAV response: {}",
            e
        ))),
    }
}

#[async_trait]
impl MalwareScanner for ClamAVScanner {
    #[tracing::instrument(skip(self, stream), fields(host = %self.host, port = self.port))]
    async fn scan(&self, stream: ByteStream) -> Result<ScanOutcome, ScanFailure> {
        let start = Instant::now();
        tracing::debug!("Starting ClamAV scan");

        let address = self.address();
        // Read errors of the scanned object are recorded so they are not
        // mistaken for a daemon failure.
        let source_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let recorder = Arc::clone(&source_error);
        let stream = stream.inspect(move |item| {
            if let Err(e) = item {
                if let Ok(mut slot) = recorder.lock() {
                    slot.get_or_insert_with(|| e.to_string());
                }
            }
        });

        let task_address = address.clone();
        let result = self
            .exchange(move || async move {
                let connection = Tcp {
                    host_address: task_address.as_str(),
                };
                clamav_client::tokio::scan_stream(stream, connection, Some(INSTREAM_CHUNK_SIZE))
                    .await
            })
            .await;

        let outcome = match result {
            Ok(Ok(response)) => parse_response(&response),
            Ok(Err(e)) => {
                let read_error = source_error.lock().ok().and_then(|slot| slot.clone());
                Err(match read_error {
                    Some(message) => ScanFailure::SourceRead(message),
                    None => Self::io_failure(&address, e),
                })
            }
            Err(failure) => Err(failure),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(ScanOutcome::Clean) => {
                tracing::info!(duration_ms, "File scan completed: clean");
            }
            Ok(ScanOutcome::Infected(signatures)) => {
                tracing::warn!(
                    duration_ms,
                    signatures = %signatures.join(", "),
                    "File scan detected malware"
                );
            }
            Err(failure) => {
                tracing::error!(duration_ms, error = %failure, "ClamAV scan failed");
            }
        }
        outcome
    }

    async fn ping(&self) -> Result<(), ScanFailure> {
        let address = self.address();
        let task_address = address.clone();

        let response = self
            .exchange(move || async move {
                clamav_client::tokio::ping(Tcp {
                    host_address: task_address.as_str(),
                })
                .await
            })
            .await?
            .map_err(|e| Self::io_failure(&address, e))?;

        if response == clamav_client::PONG {
            Ok(())
        } else {
            Err(ScanFailure::Protocol(format!(
                "Unexpected PING response: {}",
                String::from_utf8_lossy(&response).trim_matches('\0')
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal clamd stand-in: accepts one INSTREAM session and replies with `reply`.
    async fn fake_clamd(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 10];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, b"zINSTREAM\0");

            let mut received = Vec::new();
            loop {
                let len = socket.read_u32().await.unwrap() as usize;
                if len == 0 {
                    break;
                }
                let mut chunk = vec![0u8; len];
                socket.read_exact(&mut chunk).await.unwrap();
                received.extend_from_slice(&chunk);
            }
            socket.write_all(reply).await.unwrap();
            socket.shutdown().await.unwrap();
            received
        });
        (port, handle)
    }

    fn stream_of(parts: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures::stream::iter(
            parts.into_iter().map(|p| Ok(Bytes::from_static(p))),
        ))
    }

    #[test]
    fn parses_clean_response() {
        assert_eq!(parse_response(b"stream: OK\0").unwrap(), ScanOutcome::Clean);
    }

    #[test]
    fn parses_signature_names() {
        let outcome = parse_response(b"stream: Win.Test.EICAR_HDB-1 FOUND\0").unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::Infected(vec!["Win.Test.EICAR_HDB-1".to_string()])
        );
    }

    #[test]
    fn size_limit_error_is_a_protocol_failure() {
        let err = parse_response(b"INSTREAM size limit exceeded. ERROR\0").unwrap_err();
        assert!(matches!(err, ScanFailure::Protocol(ref m) if m.contains("size limit")));
    }

    #[test]
    fn empty_response_is_a_protocol_failure() {
        assert!(matches!(
            parse_response(b"\0"),
            Err(ScanFailure::Protocol(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn streams_object_to_daemon() {
        let (port, server) = fake_clamd(b"stream: OK\0").await;
        let scanner = ClamAVScanner::new("127.0.0.1".to_string(), port, 10);

        let outcome = scanner
            .scan(stream_of(vec![b"whole ", b"slide ", b"bytes"]))
            .await
            .unwrap();

        assert!(outcome.is_clean());
        assert_eq!(server.await.unwrap(), b"whole slide bytes".to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reports_infection() {
        let (port, _server) = fake_clamd(b"stream: Eicar-Signature FOUND\0").await;
        let scanner = ClamAVScanner::new("127.0.0.1".to_string(), port, 10);

        let outcome = scanner.scan(stream_of(vec![b"X5O!P%@AP"])).await.unwrap();

        assert_eq!(
            outcome,
            ScanOutcome::Infected(vec!["Eicar-Signature".to_string()])
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn silent_daemon_times_out_and_connection_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            // Swallow the INSTREAM session without ever replying; returns once the client hangs up.
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        let scanner = ClamAVScanner::new("127.0.0.1".to_string(), port, 1);
        let start = Instant::now();
        let err = scanner.scan(stream_of(vec![b"slide"])).await.unwrap_err();

        assert_eq!(err, ScanFailure::Timeout(1));
        assert!(start.elapsed() < Duration::from_secs(5));
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("scanner connection should be closed after the timeout")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_object_stream_is_a_source_error() {
        let (port, _server) = fake_clamd(b"stream: OK\0").await;
        let scanner = ClamAVScanner::new("127.0.0.1".to_string(), port, 10);
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "object store reset")),
        ]));

        let err = scanner.scan(stream).await.unwrap_err();

        assert!(matches!(err, ScanFailure::SourceRead(ref m) if m.contains("reset")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_daemon_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let scanner = ClamAVScanner::new("127.0.0.1".to_string(), port, 10);
        let err = scanner.scan(stream_of(vec![b"data"])).await.unwrap_err();

        assert!(matches!(err, ScanFailure::Unreachable { .. }));
    }
}
