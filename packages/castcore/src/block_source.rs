//! Interface to the remote message/document store consumed by the streaming
//! server, plus a generic HTTP-backed implementation.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CastError;

/// A handle to a remote document: enough to stream its bytes and present a
/// filename to the device.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub message_id: u64,
    pub size: u64,
    pub filename: Option<String>,
}

impl DocumentRef {
    /// Filename to present to the device, falling back to the source's own
    /// convention of a synthetic name keyed by message id.
    pub fn display_filename(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("file_{}", self.message_id))
    }
}

/// The three operations the streaming server consumes from the remote
/// message/document store. Implementations retry internally on transient
/// flood-control errors; callers see either success or a terminal error.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Resolves a message id to a document descriptor. Implementations are
    /// expected to memoize this per message id for the lifetime of the
    /// process (the document's size/filename do not change).
    async fn get_message(&self, message_id: u64) -> Result<DocumentRef, CastError>;

    /// Fetches up to `size` bytes at `offset` from `doc`. May return fewer
    /// bytes near end-of-file.
    async fn get_block(&self, doc: &DocumentRef, offset: u64, size: u64) -> Result<Bytes, CastError>;

    /// Checks whether the underlying remote session is alive.
    async fn health_check(&self) -> Result<(), CastError>;
}

/// Generic HTTP-origin-backed [`BlockSource`]: treats the remote store as an
/// HTTP server exposing `GET {base_url}/{message_id}` with byte-range
/// support, retrying transient `429`/`503` responses with exponential
/// backoff before giving up.
pub struct HttpBlockSource {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<u64, DocumentRef>,
    retry_delays_ms: [u64; 3],
}

impl HttpBlockSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: DashMap::new(),
            retry_delays_ms: [200, 500, 1000],
        }
    }

    fn document_url(&self, message_id: u64) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), message_id)
    }

    async fn with_retry<F, Fut, T>(&self, action: &str, mut operation: F) -> Result<T, CastError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CastError>>,
    {
        let mut last_error = None;
        for (attempt, delay_ms) in std::iter::once(0).chain(self.retry_delays_ms).enumerate() {
            if attempt > 0 {
                log::info!("retrying {} (attempt {}) after {}ms", action, attempt + 1, delay_ms);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match operation().await {
                Ok(v) => return Ok(v),
                Err(CastError::Connection(msg)) if attempt < self.retry_delays_ms.len() => {
                    log::warn!("{} transient error: {}", action, msg);
                    last_error = Some(CastError::Connection(msg));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| CastError::Connection(action.to_string())))
    }
}

#[async_trait]
impl BlockSource for HttpBlockSource {
    async fn get_message(&self, message_id: u64) -> Result<DocumentRef, CastError> {
        if let Some(cached) = self.cache.get(&message_id) {
            return Ok(cached.clone());
        }

        let url = self.document_url(message_id);
        let response = self
            .with_retry("head", || async {
                self.client
                    .head(&url)
                    .send()
                    .await
                    .map_err(|e| CastError::Connection(e.to_string()))
            })
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CastError::NotFound);
        }
        if !response.status().is_success() {
            return Err(CastError::Connection(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let size = response
            .content_length()
            .ok_or_else(|| CastError::Internal("missing content-length".into()))?;
        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_filename);

        let doc = DocumentRef {
            message_id,
            size,
            filename,
        };
        self.cache.insert(message_id, doc.clone());
        Ok(doc)
    }

    async fn get_block(&self, doc: &DocumentRef, offset: u64, size: u64) -> Result<Bytes, CastError> {
        let url = self.document_url(doc.message_id);
        let end = (offset + size).saturating_sub(1);
        let range = format!("bytes={}-{}", offset, end);

        let response = self
            .with_retry("get_block", || async {
                let resp = self
                    .client
                    .get(&url)
                    .header(reqwest::header::RANGE, &range)
                    .send()
                    .await
                    .map_err(|e| CastError::Connection(e.to_string()))?;
                if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE
                {
                    return Err(CastError::Connection(format!("flood control: {}", resp.status())));
                }
                Ok(resp)
            })
            .await?;

        response
            .bytes()
            .await
            .map_err(|e| CastError::Connection(e.to_string()))
    }

    async fn health_check(&self) -> Result<(), CastError> {
        self.client
            .head(&self.base_url)
            .send()
            .await
            .map_err(|e| CastError::Connection(e.to_string()))?;
        Ok(())
    }
}

fn extract_filename(content_disposition: &str) -> Option<String> {
    let marker = "filename=\"";
    let start = content_disposition.find(marker)? + marker.len();
    let end = content_disposition[start..].find('"')? + start;
    Some(content_disposition[start..end].to_string())
}

/// Fixture [`BlockSource`] backed by an in-memory byte buffer, used in tests
/// for the streaming server's range/admission/block-pump logic without a
/// live HTTP origin.
pub struct InMemoryBlockSource {
    pub documents: DashMap<u64, (DocumentRef, Bytes)>,
    pub alive: std::sync::atomic::AtomicBool,
}

impl InMemoryBlockSource {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            alive: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn insert(&self, message_id: u64, filename: Option<&str>, data: Bytes) {
        let doc = DocumentRef {
            message_id,
            size: data.len() as u64,
            filename: filename.map(str::to_string),
        };
        self.documents.insert(message_id, (doc, data));
    }
}

impl Default for InMemoryBlockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockSource for InMemoryBlockSource {
    async fn get_message(&self, message_id: u64) -> Result<DocumentRef, CastError> {
        self.documents
            .get(&message_id)
            .map(|entry| entry.0.clone())
            .ok_or(CastError::NotFound)
    }

    async fn get_block(&self, doc: &DocumentRef, offset: u64, size: u64) -> Result<Bytes, CastError> {
        let entry = self.documents.get(&doc.message_id).ok_or(CastError::NotFound)?;
        let data = &entry.1;
        let start = offset.min(data.len() as u64) as usize;
        let end = (offset + size).min(data.len() as u64) as usize;
        Ok(data.slice(start..end))
    }

    async fn health_check(&self) -> Result<(), CastError> {
        if self.alive.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CastError::Connection("remote sessions not alive".into()))
        }
    }
}

/// Shared handle, convenience alias matching the rest of the crate's
/// `Arc<dyn Trait>` composition style.
pub type SharedBlockSource = Arc<dyn BlockSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_source_round_trips_blocks() {
        let source = InMemoryBlockSource::new();
        source.insert(1, Some("movie.mp4"), Bytes::from_static(b"hello world"));
        let doc = source.get_message(1).await.unwrap();
        assert_eq!(doc.size, 11);
        let block = source.get_block(&doc, 0, 5).await.unwrap();
        assert_eq!(&block[..], b"hello");
    }

    #[tokio::test]
    async fn in_memory_source_missing_message_is_not_found() {
        let source = InMemoryBlockSource::new();
        assert!(matches!(
            source.get_message(999).await,
            Err(CastError::NotFound)
        ));
    }

    #[tokio::test]
    async fn in_memory_health_check_reports_connection_error_when_down() {
        let source = InMemoryBlockSource::new();
        source
            .alive
            .store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(source.health_check().await.is_err());
    }

    #[test]
    fn display_filename_falls_back_to_synthetic_name() {
        let doc = DocumentRef {
            message_id: 42,
            size: 10,
            filename: None,
        };
        assert_eq!(doc.display_filename(), "file_42");
    }

    #[test]
    fn extract_filename_parses_content_disposition() {
        assert_eq!(
            extract_filename(r#"inline; filename="movie.mp4""#),
            Some("movie.mp4".to_string())
        );
    }
}
