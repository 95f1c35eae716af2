//! Network-backed document assets.
//!
//! A [`DocumentAsset`] is shared by every controller that references its URL.
//! Content only changes inside a commit, which runs under the asset's write
//! lock; readers hold a read lock for as long as they look at the bytes.
//!
//! ```text
//!  Idle ──download()──▶ InProgress ──fetch ok, same bytes──▶ Succeeded   (DOWNLOAD_SUCCESSFUL)
//!                          │         ──fetch ok, new bytes──▶ [wait write lock] ─commit─▶ Succeeded
//!                          │                                  (FILE_UPDATED | DOWNLOAD_SUCCESSFUL)
//!                          └──────── fetch failed ─────────▶ Failed      (DOWNLOAD_FAILED)
//! ```

use std::cell::RefCell;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use folio_tasks::TaskOutcome;
use folio_types::{AssetId, DownloadState, HolderId, NetworkError, SubscriptionId, UpdateFlags};
use tracing::{debug, trace, warn};

use crate::error::{AssetError, Result};
use crate::fetcher::FetchedContent;
use crate::library::DownloadSource;
use crate::lock::AssetLock;

type Subscriber = Rc<dyn Fn(UpdateFlags)>;

struct AssetState {
    mtime: u64,
    download_state: DownloadState,
    content: Option<Bytes>,
    content_type: String,
    /// A fetched payload is waiting for the write lock.
    pending_commit: bool,
    fetched_at: Option<SystemTime>,
    ttl: Duration,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

pub(crate) struct AssetInner {
    id: AssetId,
    url: String,
    local_path: Option<PathBuf>,
    lock: AssetLock,
    downloads: Option<Rc<DownloadSource>>,
    state: RefCell<AssetState>,
}

/// Shared handle to one asset. Clones refer to the same asset.
#[derive(Clone)]
pub struct DocumentAsset {
    inner: Rc<AssetInner>,
}

impl DocumentAsset {
    /// An asset with no content and no way to download it.
    pub fn new(url: impl Into<String>) -> Self {
        Self::build(url.into(), None, None, Duration::ZERO, None)
    }

    /// An asset that already holds `data` at version 1.
    pub fn with_content(url: impl Into<String>, data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        let asset = Self::new(url);
        {
            let mut state = asset.inner.state.borrow_mut();
            state.content = Some(data.into());
            state.content_type = content_type.into();
            state.mtime = 1;
        }
        asset
    }

    pub(crate) fn build(
        url: String,
        local_path: Option<PathBuf>,
        downloads: Option<Rc<DownloadSource>>,
        ttl: Duration,
        cached: Option<(Bytes, String, Option<SystemTime>)>,
    ) -> Self {
        let id = AssetId::next();
        let (content, content_type, fetched_at, mtime) = match cached {
            Some((data, content_type, fetched_at)) => (Some(data), content_type, fetched_at, 1),
            None => (None, String::new(), None, 0),
        };
        Self {
            inner: Rc::new(AssetInner {
                id,
                url,
                local_path,
                lock: AssetLock::with_id(id),
                downloads,
                state: RefCell::new(AssetState {
                    mtime,
                    download_state: DownloadState::Idle,
                    content,
                    content_type,
                    pending_commit: false,
                    fetched_at,
                    ttl,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<AssetInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<AssetInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> AssetId {
        self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.inner.local_path.as_deref()
    }

    pub fn lock(&self) -> &AssetLock {
        &self.inner.lock
    }

    /// Monotonic version; bumped by every content commit.
    pub fn mtime(&self) -> u64 {
        self.inner.state.borrow().mtime
    }

    pub fn download_state(&self) -> DownloadState {
        self.inner.state.borrow().download_state
    }

    pub fn content_type(&self) -> String {
        self.inner.state.borrow().content_type.clone()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.state.borrow().ttl
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.inner.state.borrow_mut().ttl = ttl;
        self.notify(UpdateFlags::CACHE_DATA_UPDATED);
    }

    pub fn has_content(&self) -> bool {
        self.inner.state.borrow().content.is_some()
    }

    /// Content exists and a reader would be admitted now.
    pub fn is_read_available(&self) -> bool {
        self.has_content() && self.inner.lock.is_read_available()
    }

    pub fn is_download_in_progress(&self) -> bool {
        self.download_state() == DownloadState::InProgress
    }

    /// A download may be started: there is a source, none is running, and
    /// the content is missing, failed last time, or older than the ttl.
    pub fn is_download_available(&self) -> bool {
        if self.inner.downloads.is_none() {
            return false;
        }
        let state = self.inner.state.borrow();
        match state.download_state {
            DownloadState::InProgress => false,
            DownloadState::Failed => true,
            DownloadState::Idle | DownloadState::Succeeded => {
                state.content.is_none()
                    || state
                        .fetched_at
                        .and_then(|t| t.elapsed().ok())
                        .is_none_or(|age| age >= state.ttl)
            }
        }
    }

    /// Newer content is on its way: a download runs or a commit waits.
    pub fn is_update_available(&self) -> bool {
        let state = self.inner.state.borrow();
        state.download_state == DownloadState::InProgress || state.pending_commit
    }

    /// Raw content. `holder` must hold a read lock.
    pub fn data(&self, holder: HolderId) -> Result<Bytes> {
        if self.inner.lock.read_count(holder) == 0 {
            return Err(AssetError::NotLocked { url: self.inner.url.clone() });
        }
        self.inner
            .state
            .borrow()
            .content
            .clone()
            .ok_or_else(|| AssetError::NoContent { url: self.inner.url.clone() })
    }

    /// Pixel dimensions decoded from the image header, if the content is an
    /// image and a read lock is available right now.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        let holder = HolderId::new();
        if !self.inner.lock.try_read(holder) {
            return None;
        }
        let data = self.data(holder).ok();
        self.inner.lock.release_read(holder);
        image_dimensions(&data?)
    }

    // ── Document lock ───────────────────────────────────────────────────

    /// Read-lock the content for parsing if there is something newer than
    /// `loaded_mtime` (or nothing was loaded yet) and no download is running.
    pub fn try_lock_document(&self, holder: HolderId, loaded_mtime: u64) -> bool {
        if !self.is_read_available() {
            return false;
        }
        let fresher = self.mtime() > loaded_mtime && !self.is_download_in_progress();
        if !(fresher || loaded_mtime == 0) {
            return false;
        }
        self.inner.lock.try_read(holder)
    }

    pub fn release_document(&self, holder: HolderId) {
        self.inner.lock.release_read(holder);
    }

    // ── Subscribers ─────────────────────────────────────────────────────

    pub fn subscribe(&self, callback: impl Fn(UpdateFlags) + 'static) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner.state.borrow_mut().subscribers.push((id, Rc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub, _)| *sub != id);
        state.subscribers.len() != before
    }

    pub fn subscribers(&self) -> usize {
        self.inner.state.borrow().subscribers.len()
    }

    /// Deliver `flags` to every subscriber.
    pub fn notify(&self, flags: UpdateFlags) {
        let subscribers: Vec<Subscriber> = self
            .inner
            .state
            .borrow()
            .subscribers
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        trace!(url = %self.inner.url, ?flags, subscribers = subscribers.len(), "asset notify");
        for subscriber in subscribers {
            subscriber(flags);
        }
    }

    // ── Download / commit ───────────────────────────────────────────────

    /// Start a download. Returns false when there is no source or one is
    /// already running. The outcome arrives as a notification.
    pub fn download(&self) -> bool {
        let Some(source) = self.inner.downloads.clone() else {
            return false;
        };
        {
            let mut state = self.inner.state.borrow_mut();
            if state.download_state == DownloadState::InProgress {
                return false;
            }
            state.download_state = DownloadState::InProgress;
        }
        debug!(url = %self.inner.url, "download started");

        let url = self.inner.url.clone();
        let cache_path = self.inner.local_path.clone();
        let fetcher = source.fetcher();
        let weak = self.downgrade();
        let completion_url = url.clone();

        source.queue().submit(
            move |_ctx| {
                let fetched = fetcher.fetch(&url);
                if let (Ok(content), Some(path)) = (&fetched, &cache_path) {
                    write_cache(path, &content.data);
                }
                fetched
            },
            move |outcome| {
                let Some(inner) = weak.upgrade() else {
                    trace!(url = %completion_url, "asset dropped before download finished");
                    return;
                };
                let result = match outcome {
                    TaskOutcome::Done(result) => result,
                    TaskOutcome::Failed(err) => Err(NetworkError::Transport {
                        url: completion_url,
                        reason: err.to_string(),
                    }),
                };
                DocumentAsset::from_inner(inner).finish_download(result);
            },
        );
        true
    }

    fn finish_download(&self, result: std::result::Result<FetchedContent, NetworkError>) {
        match result {
            Err(err) => {
                warn!(url = %self.inner.url, error = %err, "download failed");
                self.inner.state.borrow_mut().download_state = DownloadState::Failed;
                self.notify(UpdateFlags::DOWNLOAD_FAILED);
            }
            Ok(fetched) => {
                let unchanged = {
                    let state = self.inner.state.borrow();
                    state.content.as_ref() == Some(&fetched.data) && state.content_type == fetched.content_type
                };
                if unchanged {
                    debug!(url = %self.inner.url, "download finished, content unchanged");
                    {
                        let mut state = self.inner.state.borrow_mut();
                        state.download_state = DownloadState::Succeeded;
                        state.fetched_at = Some(SystemTime::now());
                    }
                    self.notify(UpdateFlags::DOWNLOAD_SUCCESSFUL);
                } else {
                    self.commit_with(fetched, UpdateFlags::FILE_UPDATED | UpdateFlags::DOWNLOAD_SUCCESSFUL);
                }
            }
        }
    }

    /// Replace the content once the write lock is granted, then notify
    /// subscribers with `FILE_UPDATED`.
    pub fn commit(&self, fetched: FetchedContent) {
        self.commit_with(fetched, UpdateFlags::FILE_UPDATED);
    }

    fn commit_with(&self, fetched: FetchedContent, flags: UpdateFlags) {
        self.inner.state.borrow_mut().pending_commit = true;
        let asset = self.clone();
        self.inner.lock.write(move || {
            let mtime = {
                let mut state = asset.inner.state.borrow_mut();
                state.mtime = (state.mtime + 1).max(fetched.mtime.unwrap_or(0));
                state.content = Some(fetched.data);
                state.content_type = fetched.content_type;
                state.pending_commit = false;
                state.fetched_at = Some(SystemTime::now());
                if state.download_state == DownloadState::InProgress {
                    state.download_state = DownloadState::Succeeded;
                }
                state.mtime
            };
            debug!(url = %asset.inner.url, mtime, "asset content committed");
            asset.inner.lock.release_write();
            asset.notify(flags);
        });
    }
}

impl PartialEq for DocumentAsset {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DocumentAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("DocumentAsset")
            .field("url", &self.inner.url)
            .field("mtime", &state.mtime)
            .field("download_state", &state.download_state)
            .field("content_type", &state.content_type)
            .finish()
    }
}

pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn write_cache(path: &Path, data: &[u8]) {
    let result = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| std::fs::write(path, data));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to write asset cache");
    }
}
