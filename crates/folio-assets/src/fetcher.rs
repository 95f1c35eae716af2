//! Where asset bytes come from.
//!
//! Fetchers run on the asset library's worker thread, so they are `Send +
//! Sync` and shared behind an `Arc`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use folio_types::NetworkError;
use parking_lot::Mutex;
use tracing::debug;

/// One successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub data: Bytes,
    pub content_type: String,
    /// Version advertised by the origin, if any. The asset never moves
    /// backwards: it takes `max(current + 1, mtime)`.
    pub mtime: Option<u64>,
}

impl FetchedContent {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
            mtime: None,
        }
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = Some(mtime);
        self
    }
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedContent, NetworkError>;
}

/// In-memory responses keyed by URL. Unknown URLs are `NotFound`.
#[derive(Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, Result<FetchedContent, NetworkError>>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, content: FetchedContent) {
        self.responses.lock().insert(url.into(), Ok(content));
    }

    pub fn fail(&self, url: impl Into<String>, err: NetworkError) {
        self.responses.lock().insert(url.into(), Err(err));
    }

    /// URLs fetched so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedContent, NetworkError> {
        self.requests.lock().push(url.to_string());
        match self.responses.lock().get(url) {
            Some(response) => response.clone(),
            None => Err(NetworkError::NotFound(url.to_string())),
        }
    }
}

/// Serves `file://` URLs and bare paths from the local filesystem.
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    /// Relative paths resolve against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, NetworkError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(NetworkError::Unsupported(url.to_string()));
        }
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        Ok(if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) })
    }
}

impl Fetcher for FsFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedContent, NetworkError> {
        let path = self.resolve(url)?;
        debug!(url, path = %path.display(), "reading local asset");
        match std::fs::read(&path) {
            Ok(data) => Ok(FetchedContent::new(data, guess_content_type(&path))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(NetworkError::NotFound(url.to_string())),
            Err(e) => Err(NetworkError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Content type from a file extension; empty when unknown.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm" | "xhtml") => "text/html",
        Some("md" | "markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("css") => "text/css",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_fetcher_records_requests() {
        let fetcher = StaticFetcher::new();
        fetcher.insert("https://a/doc.html", FetchedContent::new("<p>hi</p>", "text/html"));
        fetcher.fail(
            "https://a/broken",
            NetworkError::Transport { url: "https://a/broken".into(), reason: "reset".into() },
        );

        assert!(fetcher.fetch("https://a/doc.html").is_ok());
        assert!(matches!(fetcher.fetch("https://a/broken"), Err(NetworkError::Transport { .. })));
        assert!(matches!(fetcher.fetch("https://a/missing"), Err(NetworkError::NotFound(_))));
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[test]
    fn fs_fetcher_reads_relative_and_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "<p>x</p>").unwrap();
        let fetcher = FsFetcher::new(dir.path());

        let content = fetcher.fetch("page.html").unwrap();
        assert_eq!(content.content_type, "text/html");
        assert_eq!(&content.data[..], b"<p>x</p>");

        let url = format!("file://{}", dir.path().join("page.html").display());
        assert!(fetcher.fetch(&url).is_ok());
        assert!(matches!(fetcher.fetch("nope.css"), Err(NetworkError::NotFound(_))));
        assert!(matches!(fetcher.fetch("https://x/y"), Err(NetworkError::Unsupported(_))));
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(guess_content_type(Path::new("a/B.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("style.css")), "text/css");
        assert_eq!(guess_content_type(Path::new("blob")), "");
    }
}
