//! Resolving font locators to bytes.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::trace;

/// Locator prefix for fonts found in the configured search directories.
pub const LOCAL_SCHEME: &str = "local://";
/// Locator prefix for fonts embedded in a document.
pub const DOCUMENT_SCHEME: &str = "document://";

/// Fetches font bytes by locator. Called from worker threads.
pub trait FontLoader: Send + Sync {
    fn load(&self, source: &str) -> Option<Bytes>;
}

/// `local://name` from search directories, anything else as a file path.
#[derive(Debug, Clone, Default)]
pub struct FsFontLoader {
    search_dirs: Vec<PathBuf>,
}

impl FsFontLoader {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }
}

impl FontLoader for FsFontLoader {
    fn load(&self, source: &str) -> Option<Bytes> {
        if source.starts_with(DOCUMENT_SCHEME) {
            return None;
        }
        if let Some(name) = source.strip_prefix(LOCAL_SCHEME) {
            return self.search_dirs.iter().find_map(|dir| {
                let path = dir.join(name);
                trace!(path = %path.display(), "probing font");
                std::fs::read(path).ok().map(Bytes::from)
            });
        }
        std::fs::read(source).ok().map(Bytes::from)
    }
}

/// Fonts held in memory, keyed by exact locator.
#[derive(Debug, Clone, Default)]
pub struct MemoryFontLoader {
    fonts: HashMap<String, Bytes>,
}

impl MemoryFontLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.fonts.insert(source.into(), data.into());
        self
    }
}

impl FontLoader for MemoryFontLoader {
    fn load(&self, source: &str) -> Option<Bytes> {
        self.fonts.get(source).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_scheme_searches_dirs_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("x.ttf"), b"second").unwrap();

        let loader = FsFontLoader::new(vec![first.path().into(), second.path().into()]);
        assert_eq!(loader.load("local://x.ttf").as_deref(), Some(&b"second"[..]));
        std::fs::write(first.path().join("x.ttf"), b"first").unwrap();
        assert_eq!(loader.load("local://x.ttf").as_deref(), Some(&b"first"[..]));
        assert!(loader.load("local://missing.ttf").is_none());
        assert!(loader.load("document://x.ttf").is_none());
    }

    #[test]
    fn memory_loader_exact_match() {
        let loader = MemoryFontLoader::new().with("mem://a", "abc");
        assert!(loader.load("mem://a").is_some());
        assert!(loader.load("mem://b").is_none());
    }
}
