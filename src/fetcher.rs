//! Archive retrieval with bounded retries and progress tracking.
//!
//! Downloads stream into a caller-supplied staging file, never into a final
//! target path. Only transient failures (connection errors, timeouts,
//! 5xx responses) are retried; a 4xx response fails immediately as
//! `SourceUnavailable`. `file://` URLs are served from the local filesystem,
//! which keeps catalogs of mirrored archives and the test suite off the
//! network.

use crate::error::{Result, TarponError};
use anyhow::{Context, anyhow};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Outcome of a single attempt: fatal errors surface as-is, transient ones
/// are eligible for retry.
enum AttemptError {
    Fatal(TarponError),
    Transient(anyhow::Error),
}

pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("tarpon/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TarponError::Other(e.into()))?;
        Ok(Self { client })
    }

    /// Retrieve `url` into `dest`, retrying transient failures with
    /// exponential backoff.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        progress: Option<&MultiProgress>,
    ) -> Result<()> {
        let parsed = reqwest::Url::parse(url)
            .with_context(|| format!("unparseable source URL: {url}"))?;

        if parsed.scheme() == "file" {
            return self.fetch_local(&parsed, dest, cancel).await;
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut last_cause = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(TarponError::Cancelled);
            }

            match self.attempt(url, dest, cancel, progress).await {
                Ok(()) => {
                    debug!(url, attempt, "fetch complete");
                    return Ok(());
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(e)) => {
                    warn!(url, attempt, error = %e, "transient fetch failure");
                    last_cause = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(TarponError::Cancelled),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff *= 2;
                    }
                }
            }
        }

        Err(TarponError::FetchFailed {
            url: url.to_string(),
            attempts: MAX_ATTEMPTS,
            cause: last_cause.unwrap_or_else(|| anyhow!("retry budget exhausted")),
        })
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        progress: Option<&MultiProgress>,
    ) -> std::result::Result<(), AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.into()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AttemptError::Fatal(TarponError::SourceUnavailable {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(AttemptError::Transient(anyhow!(
                "server returned {status}"
            )));
        }

        let pb = progress.map(|mp| {
            let pb = mp.add(ProgressBar::new(response.content_length().unwrap_or(0)));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(url.rsplit('/').next().unwrap_or(url).to_string());
            pb
        });

        // Truncate on every attempt so a retried download never appends to a
        // partial body.
        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        let mut response = response;
        let mut downloaded: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AttemptError::Fatal(TarponError::Cancelled));
                }
                chunk = response.chunk() => {
                    chunk.map_err(|e| AttemptError::Transient(e.into()))?
                }
            };

            let Some(chunk) = chunk else { break };
            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptError::Fatal(e.into()))?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
        }

        file.flush()
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        Ok(())
    }

    /// `file://` sources are copied directly; the retry policy only applies
    /// to network transports.
    async fn fetch_local(
        &self,
        url: &reqwest::Url,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TarponError::Cancelled);
        }
        let source = url
            .to_file_path()
            .map_err(|_| anyhow!("invalid file URL: {url}"))?;
        if !source.exists() {
            return Err(TarponError::SourceUnavailable {
                url: url.to_string(),
                status: 404,
            });
        }
        fs::copy(&source, dest)
            .await
            .with_context(|| format!("failed to copy {}", source.display()))?;
        debug!(source = %source.display(), "copied local archive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const SERVER_ERROR: &str =
        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const OK: &str = "HTTP/1.1 200 OK\r\ncontent-length: 13\r\nconnection: close\r\n\r\narchive bytes";

    /// One canned response per connection, counting requests served.
    async fn stub_server(replies: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for reply in replies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/release.tgz"), hits)
    }

    #[tokio::test]
    async fn test_not_found_fails_immediately_without_retry() {
        let (url, hits) = stub_server(vec![NOT_FOUND, NOT_FOUND]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged.tgz");

        let fetcher = Fetcher::new().unwrap();
        let err = fetcher
            .fetch(&url, &dest, &CancellationToken::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, TarponError::SourceUnavailable { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "4xx must not be retried");
    }

    #[tokio::test]
    async fn test_persistent_server_errors_exhaust_retry_budget() {
        let (url, hits) = stub_server(vec![SERVER_ERROR, SERVER_ERROR, SERVER_ERROR]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged.tgz");

        let fetcher = Fetcher::new().unwrap();
        let err = fetcher
            .fetch(&url, &dest, &CancellationToken::new(), None)
            .await
            .unwrap_err();

        match err {
            TarponError::FetchFailed { attempts, cause, .. } => {
                assert_eq!(attempts, 3);
                assert!(cause.to_string().contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_server_error_then_success_recovers() {
        let (url, hits) = stub_server(vec![SERVER_ERROR, OK]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged.tgz");

        let fetcher = Fetcher::new().unwrap();
        fetcher
            .fetch(&url, &dest, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_local_fetch_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("release.tgz");
        std::fs::write(&source, b"archive bytes").unwrap();
        let dest = dir.path().join("staged.tgz");

        let fetcher = Fetcher::new().unwrap();
        let url = format!("file://{}", source.display());
        fetcher
            .fetch(&url, &dest, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"archive bytes");
    }

    #[tokio::test]
    async fn test_missing_local_source_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("staged.tgz");

        let fetcher = Fetcher::new().unwrap();
        let url = format!("file://{}/no-such-release.tgz", dir.path().display());
        let err = fetcher
            .fetch(&url, &dest, &CancellationToken::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, TarponError::SourceUnavailable { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("release.tgz");
        std::fs::write(&source, b"bytes").unwrap();
        let dest = dir.path().join("staged.tgz");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let fetcher = Fetcher::new().unwrap();
        let url = format!("file://{}", source.display());
        let err = fetcher.fetch(&url, &dest, &cancel, None).await.unwrap_err();
        assert!(matches!(err, TarponError::Cancelled));
    }
}
