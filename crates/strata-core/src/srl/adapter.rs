//! # Resource Adapters
//!
//! One adapter per SRL kind. Adapters are the only place in the core that
//! performs external I/O, and they only run inside an explicit `fetch`
//! call: no background I/O, no prefetching.
//!
//! Built-ins cover File (filesystem), Http (reqwest, rustls), and Socket
//! (TCP). Database and Custom kinds are registered by the embedder.
//! Adapters poll the cancellation token at I/O boundaries.

use crate::primitives::MAX_ERROR_MESSAGE_LENGTH;
use crate::types::{CancelToken, CoreError, SrlKind};
use std::collections::BTreeMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The resource coordinates an adapter fetches from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// SRL kind, used for adapter selection.
    pub kind: SrlKind,
    /// Host, container, or mount namespace.
    pub namespace: String,
    /// Path within the namespace, or a numeric port for sockets.
    pub path: String,
}

/// A synchronous, cancellable resource fetcher.
///
/// `credentials`, when present, is the decrypted secret; it lives only for
/// the duration of the call and must never be embedded in errors or logs.
pub trait ResourceAdapter: Send + Sync {
    /// The SRL kind this adapter serves.
    fn kind(&self) -> SrlKind;

    /// Materialize the resource as raw bytes.
    fn fetch(
        &self,
        target: &FetchTarget,
        credentials: Option<&str>,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, CoreError>;
}

/// Truncate an adapter error to an actor-safe message.
///
/// Adapter errors never interpolate credentials; this additionally strips
/// control characters and bounds the length.
#[must_use]
pub fn sanitize_error(message: &str) -> String {
    message
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_ERROR_MESSAGE_LENGTH)
        .collect()
}

fn check_cancel(cancel: &CancelToken) -> Result<(), CoreError> {
    if cancel.is_cancelled() {
        return Err(CoreError::FetchCancelled);
    }
    Ok(())
}

// =============================================================================
// FILE ADAPTER
// =============================================================================

/// Reads local files. An optional root confines all reads to one
/// directory subtree.
#[derive(Debug, Clone, Default)]
pub struct FileAdapter {
    root: Option<PathBuf>,
}

impl FileAdapter {
    /// Adapter with unrestricted paths.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter confined to a root directory.
    #[must_use]
    pub fn jailed(root: PathBuf) -> Self {
        Self { root: Some(root) }
    }
}

impl ResourceAdapter for FileAdapter {
    fn kind(&self) -> SrlKind {
        SrlKind::File
    }

    fn fetch(
        &self,
        target: &FetchTarget,
        _credentials: Option<&str>,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, CoreError> {
        check_cancel(cancel)?;
        let mut path = PathBuf::from(&target.path);
        if !query.is_empty() {
            path.push(query);
        }
        if let Some(root) = &self.root {
            let resolved = root.join(&path);
            let canonical = resolved
                .canonicalize()
                .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
            if !canonical.starts_with(root) {
                return Err(CoreError::FetchFailed("path escapes adapter root".to_string()));
            }
            path = canonical;
        }
        let bytes =
            std::fs::read(&path).map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
        check_cancel(cancel)?;
        Ok(bytes)
    }
}

// =============================================================================
// HTTP ADAPTER
// =============================================================================

/// Fetches over HTTPS with a blocking reqwest client (rustls).
///
/// Credentials, when present, are sent as a bearer token.
#[derive(Debug, Clone)]
pub struct HttpAdapter {
    client: reqwest::blocking::Client,
}

impl HttpAdapter {
    /// Build an adapter with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, CoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Io(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ResourceAdapter for HttpAdapter {
    fn kind(&self) -> SrlKind {
        SrlKind::Http
    }

    fn fetch(
        &self,
        target: &FetchTarget,
        credentials: Option<&str>,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, CoreError> {
        check_cancel(cancel)?;
        let base = if target.namespace.starts_with("http://")
            || target.namespace.starts_with("https://")
        {
            format!("{}{}", target.namespace, target.path)
        } else {
            format!("https://{}{}", target.namespace, target.path)
        };
        let url = if query.is_empty() {
            base
        } else {
            format!("{base}?{query}")
        };

        let mut request = self.client.get(&url);
        if let Some(token) = credentials {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::FetchFailed(format!(
                "http status {}",
                status.as_u16()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
        check_cancel(cancel)?;
        Ok(bytes.to_vec())
    }
}

// =============================================================================
// SOCKET ADAPTER
// =============================================================================

/// Connects to `namespace:port`, writes the query line, and reads the
/// reply to EOF.
#[derive(Debug, Clone)]
pub struct SocketAdapter {
    timeout: Duration,
}

impl SocketAdapter {
    /// Build an adapter with the given connect/read timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ResourceAdapter for SocketAdapter {
    fn kind(&self) -> SrlKind {
        SrlKind::Socket
    }

    fn fetch(
        &self,
        target: &FetchTarget,
        _credentials: Option<&str>,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, CoreError> {
        check_cancel(cancel)?;
        let port: u16 = target
            .path
            .parse()
            .map_err(|_| CoreError::FetchFailed("socket path must be a port".to_string()))?;
        let address = (target.namespace.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?
            .next()
            .ok_or_else(|| CoreError::FetchFailed("address did not resolve".to_string()))?;

        let mut stream = TcpStream::connect_timeout(&address, self.timeout)
            .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;

        if !query.is_empty() {
            use std::io::Write;
            stream
                .write_all(query.as_bytes())
                .and_then(|()| stream.write_all(b"\n"))
                .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
            stream
                .shutdown(std::net::Shutdown::Write)
                .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
        }

        check_cancel(cancel)?;
        let mut bytes = Vec::new();
        stream
            .read_to_end(&mut bytes)
            .map_err(|e| CoreError::FetchFailed(sanitize_error(&e.to_string())))?;
        Ok(bytes)
    }
}

// =============================================================================
// ADAPTER REGISTRY
// =============================================================================

/// Adapter selection by SRL kind.
///
/// Fetching a kind with no registered adapter fails with
/// `AdapterUnavailable`; the Database kind ships unregistered and is
/// supplied by the embedder.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<u16, Arc<dyn ResourceAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<u16> = self.adapters.keys().copied().collect();
        f.debug_struct("AdapterRegistry").field("kinds", &kinds).finish()
    }
}

impl AdapterRegistry {
    /// Registry with the built-in File, Http, and Socket adapters.
    pub fn with_defaults(
        timeout: Duration,
        file_root: Option<PathBuf>,
    ) -> Result<Self, CoreError> {
        let mut registry = Self::default();
        let file = match file_root {
            Some(root) => FileAdapter::jailed(root),
            None => FileAdapter::new(),
        };
        registry.register(Arc::new(file));
        registry.register(Arc::new(HttpAdapter::new(timeout)?));
        registry.register(Arc::new(SocketAdapter::new(timeout)));
        Ok(registry)
    }

    /// Register (or replace) the adapter for its kind.
    pub fn register(&mut self, adapter: Arc<dyn ResourceAdapter>) {
        self.adapters.insert(adapter.kind().code(), adapter);
    }

    /// Select the adapter for a kind.
    pub fn get(&self, kind: SrlKind) -> Result<Arc<dyn ResourceAdapter>, CoreError> {
        self.adapters
            .get(&kind.code())
            .cloned()
            .ok_or(CoreError::AdapterUnavailable(kind))
    }
}

// =============================================================================
// TESTS
// =============================================================================
