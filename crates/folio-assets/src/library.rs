//! Asset library: one shared [`DocumentAsset`] per URL.
//!
//! The library keeps only weak references. An asset lives as long as some
//! controller holds it; asking for the same URL while it is alive returns
//! the same asset, so every reader shares one lock and one download.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use folio_tasks::TaskQueue;
use tracing::{debug, trace};

use crate::asset::{AssetInner, DocumentAsset};
use crate::fetcher::{Fetcher, guess_content_type};

/// One day, as in most HTTP caches.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// Queue and fetcher shared by every asset of one library.
pub(crate) struct DownloadSource {
    queue: TaskQueue,
    fetcher: Arc<dyn Fetcher>,
}

impl DownloadSource {
    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    pub cache_dir: PathBuf,
    pub ttl: Duration,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            ttl: DEFAULT_TTL,
        }
    }
}

/// `$XDG_CACHE_HOME/folio` or the platform equivalent.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("folio")
}

/// Hands out assets for URLs, possibly later (a provider may resolve on a
/// network round trip). `done` receives `None` when the URL is not an asset
/// this provider serves.
pub trait AssetProvider {
    fn acquire(&self, url: &str, done: Box<dyn FnOnce(Option<DocumentAsset>)>);
}

#[derive(Clone)]
pub struct AssetLibrary {
    inner: Rc<LibraryInner>,
}

struct LibraryInner {
    config: LibraryConfig,
    downloads: Rc<DownloadSource>,
    assets: RefCell<HashMap<String, Weak<AssetInner>>>,
}

impl AssetLibrary {
    /// Downloads run on `queue` through `fetcher`.
    pub fn new(config: LibraryConfig, fetcher: Arc<dyn Fetcher>, queue: TaskQueue) -> Self {
        Self {
            inner: Rc::new(LibraryInner {
                config,
                downloads: Rc::new(DownloadSource { queue, fetcher }),
                assets: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.inner.config
    }

    /// Cache file for `url`: the hex blake3 of the URL under the cache dir.
    pub fn path_for_url(&self, url: &str) -> PathBuf {
        let hash = blake3::hash(url.as_bytes());
        let mut name = hex::encode(&hash.as_bytes()[..16]);
        if let Some(ext) = url_extension(url) {
            name.push('.');
            name.push_str(ext);
        }
        self.inner.config.cache_dir.join("documents").join(name)
    }

    /// The live asset for `url`, if any controller still holds it.
    pub fn cached(&self, url: &str) -> Option<DocumentAsset> {
        self.inner
            .assets
            .borrow()
            .get(url)
            .and_then(Weak::upgrade)
            .map(DocumentAsset::from_inner)
    }

    /// The asset for `url` with the default cache path and ttl.
    pub fn asset(&self, url: &str) -> DocumentAsset {
        self.get_asset(url, Some(self.path_for_url(url)), self.inner.config.ttl)
    }

    /// The asset for `url`, created on first use. A cache file at
    /// `local_path` seeds the content at version 1.
    pub fn get_asset(&self, url: &str, local_path: Option<PathBuf>, ttl: Duration) -> DocumentAsset {
        if let Some(asset) = self.cached(url) {
            trace!(url, "asset cache hit");
            return asset;
        }

        let cached = local_path.as_deref().and_then(|path| {
            let data = std::fs::read(path).ok()?;
            let fetched_at = std::fs::metadata(path).and_then(|m| m.modified()).ok();
            debug!(url, path = %path.display(), bytes = data.len(), "asset loaded from cache");
            Some((Bytes::from(data), guess_content_type(path).to_string(), fetched_at))
        });

        let asset = DocumentAsset::build(
            url.to_string(),
            local_path,
            Some(self.inner.downloads.clone()),
            ttl,
            cached,
        );
        let mut assets = self.inner.assets.borrow_mut();
        assets.retain(|_, weak| weak.strong_count() > 0);
        assets.insert(url.to_string(), asset.downgrade());
        asset
    }

    /// Assets still referenced somewhere.
    pub fn live_assets(&self) -> usize {
        self.inner
            .assets
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl AssetProvider for AssetLibrary {
    fn acquire(&self, url: &str, done: Box<dyn FnOnce(Option<DocumentAsset>)>) {
        done(Some(self.asset(url)));
    }
}

fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())).then_some(ext)
}
