//! Document source controller.
//!
//! Owns one document asset, keeps a parsed [`Document`] of its latest
//! content, and resolves the external assets that document references.
//!
//! ```text
//!            asset notification (mtime advanced / first / FILE_UPDATED)
//!   Empty ─────────────────────────────────────────────────────┐
//!     ▲                                                        ▼
//!     │ parse failed        try_lock_document ──▶ parse on worker ──▶ Loading
//!     └───────────────────────────────────────────────────────────┤
//!                                                                 │ externals discovered,
//!                                                                 │ outstanding += n
//!                                                                 ▼
//!   Ready ◀── outstanding == 0: release document lock, SourceEvent::Document
//!     │
//!     └── asset mtime advances ──▶ Loading again
//! ```
//!
//! The document asset stays read-locked from the start of a load until every
//! external asset discovered by it has resolved, so a download cannot swap
//! the content under a half-finished load.
//!
//! All methods run on the owner context. Worker results come back through
//! task completions; nothing here is touched from a worker.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use folio_assets::{AssetLock, AssetProvider, DocumentAsset, ReadLockTable, image_dimensions};
use folio_glyphs::{CharGroups, FontFaceMap, FontSource, FsFontLoader};
use folio_tasks::{TaskOutcome, TaskQueue};
use folio_types::{HolderId, SubscriptionId, UpdateFlags};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::{FolioConfig, RetryPolicy};
use crate::document::{Document, DocumentFontLoader, DocumentParser};
use crate::error::{ParseError, SourceError};
use crate::markup::CSS_CONTENT_TYPE;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Error(SourceError),
    /// A document is loaded and all of its external assets resolved.
    Document,
    /// Loading state changed: a load or download started or finished.
    Update,
    /// The document asset or an external asset reported a content event.
    Asset { url: String, flags: UpdateFlags },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SourceState {
    Empty,
    Loading,
    Ready,
}

/// What the controller knows about one external asset.
#[derive(Clone, Default)]
pub struct ExternalAssetMeta {
    pub content_type: String,
    pub image_size: Option<(u32, u32)>,
    /// Stylesheets are parsed into a document of their own.
    pub sub_document: Option<Arc<dyn Document>>,
}

impl ExternalAssetMeta {
    /// Declared as an image, or its header decoded as one.
    pub fn is_image(&self) -> bool {
        self.content_type.trim_start().to_ascii_lowercase().starts_with("image/")
            || self.image_size.is_some_and(|(w, h)| w > 0 && h > 0)
    }
}

impl std::fmt::Debug for ExternalAssetMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAssetMeta")
            .field("content_type", &self.content_type)
            .field("image_size", &self.image_size)
            .field("sub_document", &self.sub_document.is_some())
            .finish()
    }
}

#[derive(Default)]
struct ExternalAsset {
    asset: Option<DocumentAsset>,
    meta: ExternalAssetMeta,
    subscription: Option<SubscriptionId>,
    resolved: bool,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub retry: RetryPolicy,
    /// Faces available besides the ones documents declare.
    pub faces: FontFaceMap,
    pub font_dirs: Vec<PathBuf>,
    pub font_scale: f32,
    pub char_groups: CharGroups,
    pub enabled: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            faces: FontFaceMap::new(),
            font_dirs: Vec::new(),
            font_scale: 1.0,
            char_groups: CharGroups::empty(),
            enabled: true,
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &FolioConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            faces: config.fonts.face_map(),
            font_dirs: config.fonts.search_dirs.clone(),
            font_scale: config.fonts.scale,
            char_groups: config.fonts.char_groups,
            enabled: true,
        }
    }
}

struct ControllerState {
    enabled: bool,
    /// Asset version of the current document; 0 when nothing is loaded.
    loaded_mtime: u64,
    /// A load holds the document lock and waits on parse or externals.
    loading: bool,
    document: Option<Arc<dyn Document>>,
    externals: BTreeMap<String, ExternalAsset>,
    outstanding: usize,
    ready_callbacks: Vec<Box<dyn FnOnce()>>,
    retry_in: Option<Duration>,
    fonts: Option<Arc<FontSource>>,
    subscription: Option<SubscriptionId>,
    parses: u64,
}

struct ControllerInner {
    holder: HolderId,
    asset: Option<DocumentAsset>,
    queue: TaskQueue,
    parser: Arc<dyn DocumentParser>,
    provider: Option<Rc<dyn AssetProvider>>,
    options: ControllerOptions,
    locks: ReadLockTable,
    events: broadcast::Sender<SourceEvent>,
    state: RefCell<ControllerState>,
}

/// Handle to a controller. Clones share it.
#[derive(Clone)]
pub struct SourceController {
    inner: Rc<ControllerInner>,
}

impl SourceController {
    /// Watch `asset`, parsing on `queue` with `parser`. External assets are
    /// requested from `provider`; without one they resolve as unavailable.
    ///
    /// The first load starts right away if the asset has content.
    pub fn new(
        asset: Option<DocumentAsset>,
        queue: TaskQueue,
        parser: Arc<dyn DocumentParser>,
        provider: Option<Rc<dyn AssetProvider>>,
        options: ControllerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let controller = Self {
            inner: Rc::new(ControllerInner {
                holder: HolderId::new(),
                asset,
                queue,
                parser,
                provider,
                locks: ReadLockTable::new(),
                events,
                state: RefCell::new(ControllerState {
                    enabled: options.enabled,
                    loaded_mtime: 0,
                    loading: false,
                    document: None,
                    externals: BTreeMap::new(),
                    outstanding: 0,
                    ready_callbacks: Vec::new(),
                    retry_in: None,
                    fonts: None,
                    subscription: None,
                    parses: 0,
                }),
                options,
            }),
        };

        if let Some(asset) = &controller.inner.asset {
            let weak = Rc::downgrade(&controller.inner);
            let subscription = asset.subscribe(move |flags| {
                if let Some(controller) = upgrade(&weak) {
                    controller.on_asset_update(flags);
                }
            });
            controller.inner.state.borrow_mut().subscription = Some(subscription);
            controller.on_asset_update(UpdateFlags::INITIAL);
        }
        controller
    }

    pub fn holder(&self) -> HolderId {
        self.inner.holder
    }

    pub fn asset(&self) -> Option<&DocumentAsset> {
        self.inner.asset.as_ref()
    }

    pub fn events(&self) -> broadcast::Receiver<SourceEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SourceEvent) {
        trace!(?event, "source event");
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    // ── State ───────────────────────────────────────────────────────────

    pub fn state(&self) -> SourceState {
        let st = self.inner.state.borrow();
        if st.loading {
            SourceState::Loading
        } else if st.document.is_some() {
            SourceState::Ready
        } else {
            SourceState::Empty
        }
    }

    pub fn document(&self) -> Option<Arc<dyn Document>> {
        self.inner.state.borrow().document.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.borrow().enabled
    }

    pub fn is_document_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    /// A document is loaded and nothing it references is still resolving.
    pub fn is_ready(&self) -> bool {
        let st = self.inner.state.borrow();
        st.document.is_some() && !st.loading && st.outstanding == 0
    }

    /// Whether the loaded document reflects the asset, counting a download
    /// or commit already under way as up to date.
    pub fn is_actual(&self) -> bool {
        let st = self.inner.state.borrow();
        if st.document.is_none() || st.loading {
            return false;
        }
        match &self.inner.asset {
            None => true,
            Some(asset) => st.loaded_mtime >= asset.mtime() || asset.is_update_available(),
        }
    }

    pub fn loaded_mtime(&self) -> u64 {
        self.inner.state.borrow().loaded_mtime
    }

    /// External asset resolutions not yet completed.
    pub fn outstanding(&self) -> usize {
        self.inner.state.borrow().outstanding
    }

    /// Parses submitted over the controller's lifetime.
    pub fn parse_count(&self) -> u64 {
        self.inner.state.borrow().parses
    }

    /// Time left before a failed download is retried.
    pub fn retry_remaining(&self) -> Option<Duration> {
        self.inner.state.borrow().retry_in
    }

    /// Run `callback` once the controller is ready: now if it already is.
    pub fn when_ready(&self, callback: impl FnOnce() + 'static) {
        if self.is_ready() {
            callback();
        } else {
            self.inner.state.borrow_mut().ready_callbacks.push(Box::new(callback));
        }
    }

    // ── Control ─────────────────────────────────────────────────────────

    /// Disabled controllers neither download nor load. Enabling again
    /// re-evaluates the asset as if it had just reported new cache data.
    pub fn set_enabled(&self, enabled: bool) {
        let changed = {
            let mut st = self.inner.state.borrow_mut();
            std::mem::replace(&mut st.enabled, enabled) != enabled
        };
        if changed {
            debug!(enabled, "source controller toggled");
            if enabled {
                self.on_asset_update(UpdateFlags::CACHE_DATA_UPDATED);
            }
        }
    }

    /// Download again (if possible) and reload the document.
    pub fn refresh(&self) {
        let Some(asset) = self.inner.asset.clone() else {
            return;
        };
        self.inner.state.borrow_mut().loaded_mtime = 0;
        if self.is_enabled() && asset.download() {
            self.emit(SourceEvent::Update);
        }
        self.try_load();
    }

    /// Install an already parsed document. Only for controllers without a
    /// backing asset; returns `false` otherwise.
    pub fn set_document(&self, document: Arc<dyn Document>) -> bool {
        if self.inner.asset.is_some() {
            warn!("set_document on an asset-backed controller ignored");
            return false;
        }
        self.inner.state.borrow_mut().loading = true;
        self.on_document(document, 0);
        true
    }

    /// Advance the retry countdown by `elapsed`; the retry fires when it
    /// runs out.
    pub fn tick(&self, elapsed: Duration) {
        let fire = {
            let mut st = self.inner.state.borrow_mut();
            match st.retry_in {
                Some(left) if left > elapsed => {
                    st.retry_in = Some(left - elapsed);
                    false
                }
                Some(_) => {
                    st.retry_in = None;
                    true
                }
                None => false,
            }
        };
        if !fire {
            return;
        }
        let Some(asset) = self.inner.asset.clone() else {
            return;
        };
        if self.is_enabled() && asset.is_download_available() && asset.download() {
            warn!(url = %asset.url(), "retrying failed download");
            self.emit(SourceEvent::Update);
        }
    }

    // ── Document asset ──────────────────────────────────────────────────

    fn on_asset_update(&self, flags: UpdateFlags) {
        let Some(asset) = self.inner.asset.clone() else {
            return;
        };
        let url = asset.url().to_string();
        trace!(url = %url, ?flags, "document asset update");

        if flags.contains(UpdateFlags::DOWNLOAD_FAILED) {
            self.emit(SourceEvent::Error(SourceError::Download { url: url.clone() }));
        }
        if flags.intersects(UpdateFlags::DOWNLOAD_SUCCESSFUL | UpdateFlags::FILE_UPDATED)
            && self.inner.state.borrow_mut().retry_in.take().is_some()
        {
            debug!(url = %url, "pending retry cancelled");
        }

        if asset.is_download_available() && !asset.is_download_in_progress() {
            if flags.contains(UpdateFlags::DOWNLOAD_FAILED) {
                let backoff = self.inner.options.retry.backoff();
                let mut st = self.inner.state.borrow_mut();
                if st.retry_in.is_none() {
                    st.retry_in = Some(backoff);
                    warn!(url = %url, backoff_secs = backoff.as_secs_f64(), "download failed, retry scheduled");
                }
            } else if self.is_enabled() && asset.download() {
                self.emit(SourceEvent::Update);
            }
        }

        let loaded = self.loaded_mtime();
        if loaded < asset.mtime() {
            self.try_load();
        } else if (flags.contains(UpdateFlags::INITIAL) && loaded == 0) || flags.contains(UpdateFlags::FILE_UPDATED) {
            self.inner.state.borrow_mut().loaded_mtime = 0;
            self.try_load();
        }

        if flags.is_content_event() {
            self.emit(SourceEvent::Asset { url, flags });
        }
    }

    fn try_load(&self) {
        let Some(asset) = self.inner.asset.clone() else {
            return;
        };
        let holder = self.inner.holder;
        let loaded = {
            let st = self.inner.state.borrow();
            if !st.enabled || st.loading {
                return;
            }
            st.loaded_mtime
        };
        if !asset.try_lock_document(holder, loaded) {
            trace!(url = %asset.url(), loaded, "document not lockable yet");
            return;
        }
        let data = match asset.data(holder) {
            Ok(data) => data,
            Err(e) => {
                asset.release_document(holder);
                self.emit(SourceEvent::Error(SourceError::Content(e.to_string())));
                return;
            }
        };
        let mtime = asset.mtime();
        let content_type = asset.content_type();
        {
            let mut st = self.inner.state.borrow_mut();
            st.loading = true;
            st.parses += 1;
        }
        info!(url = %asset.url(), mtime, bytes = data.len(), "document load started");
        self.emit(SourceEvent::Update);

        let parser = self.inner.parser.clone();
        let weak = Rc::downgrade(&self.inner);
        self.inner.queue.submit(
            move |_ctx| parser.parse(data, &content_type),
            move |outcome| {
                if let Some(controller) = upgrade(&weak) {
                    controller.on_parsed(mtime, outcome);
                }
            },
        );
    }

    fn on_parsed(&self, mtime: u64, outcome: TaskOutcome<Result<Arc<dyn Document>, ParseError>>) {
        let url = self.inner.asset.as_ref().map(|a| a.url().to_string()).unwrap_or_default();
        let error = match outcome {
            TaskOutcome::Done(Ok(document)) => {
                self.on_document(document, mtime);
                return;
            }
            TaskOutcome::Done(Err(e)) => SourceError::Parse { url, reason: e.to_string() },
            TaskOutcome::Failed(e) => SourceError::Task(e.to_string()),
        };

        warn!(error = %error, mtime, "document load failed");
        {
            let mut st = self.inner.state.borrow_mut();
            st.loading = false;
            // Same content would fail again; wait for a newer version.
            st.loaded_mtime = mtime;
        }
        if let Some(asset) = &self.inner.asset {
            asset.release_document(self.inner.holder);
        }
        self.emit(SourceEvent::Error(error));
        self.emit(SourceEvent::Update);
    }

    fn on_document(&self, document: Arc<dyn Document>, mtime: u64) {
        let mut fresh = Vec::new();
        let outstanding = {
            let mut st = self.inner.state.borrow_mut();
            for url in document.all_assets() {
                if !is_external(&url, document.as_ref()) || st.externals.contains_key(&url) {
                    continue;
                }
                st.externals.insert(url.clone(), ExternalAsset::default());
                fresh.push(url);
            }
            st.outstanding += fresh.len();
            st.document = Some(document);
            st.loaded_mtime = mtime;
            st.fonts = None;
            st.outstanding
        };
        info!(mtime, externals = fresh.len(), outstanding, "document parsed");

        if fresh.is_empty() {
            if outstanding == 0 {
                self.finish_resolution();
            }
            return;
        }
        for url in fresh {
            self.acquire_external(url);
        }
    }

    fn finish_resolution(&self) {
        let (callbacks, was_loading) = {
            let mut st = self.inner.state.borrow_mut();
            if st.outstanding > 0 || st.document.is_none() {
                return;
            }
            (std::mem::take(&mut st.ready_callbacks), std::mem::replace(&mut st.loading, false))
        };
        if was_loading && let Some(asset) = &self.inner.asset {
            asset.release_document(self.inner.holder);
        }
        info!(mtime = self.loaded_mtime(), "document ready");
        self.emit(SourceEvent::Document);
        for callback in callbacks {
            callback();
        }
        self.emit(SourceEvent::Update);

        // A commit queued behind the document lock may have landed.
        if let Some(asset) = &self.inner.asset
            && self.loaded_mtime() < asset.mtime()
        {
            self.try_load();
        }
    }

    // ── External assets ─────────────────────────────────────────────────

    fn acquire_external(&self, url: String) {
        let Some(provider) = self.inner.provider.clone() else {
            self.on_external_acquired(url, None);
            return;
        };
        trace!(url = %url, "acquiring external asset");
        let weak = Rc::downgrade(&self.inner);
        let key = url.clone();
        provider.acquire(
            &url,
            Box::new(move |asset| {
                if let Some(controller) = upgrade(&weak) {
                    controller.on_external_acquired(key, asset);
                }
            }),
        );
    }

    fn on_external_acquired(&self, url: String, asset: Option<DocumentAsset>) {
        let Some(asset) = asset else {
            warn!(url = %url, "external asset unavailable");
            self.on_external_resolved(&url);
            return;
        };

        let weak = Rc::downgrade(&self.inner);
        let sub_url = url.clone();
        let subscription = asset.subscribe(move |flags| {
            if let Some(controller) = upgrade(&weak) {
                controller.on_external_update(&sub_url, flags);
            }
        });
        {
            let mut st = self.inner.state.borrow_mut();
            if let Some(record) = st.externals.get_mut(&url) {
                record.asset = Some(asset.clone());
                record.subscription = Some(subscription);
            }
        }
        if self.is_enabled() && asset.is_download_available() && asset.download() {
            debug!(url = %url, "external asset download started");
        }
        self.refresh_meta(&url, true);
    }

    fn on_external_update(&self, url: &str, flags: UpdateFlags) {
        if flags.contains(UpdateFlags::DOWNLOAD_FAILED) {
            self.emit(SourceEvent::Error(SourceError::Download { url: url.to_string() }));
        }
        if flags.intersects(UpdateFlags::FILE_UPDATED | UpdateFlags::DOWNLOAD_SUCCESSFUL) {
            self.refresh_meta(url, false);
        }
        if flags.is_content_event() {
            self.emit(SourceEvent::Asset { url: url.to_string(), flags });
        }
    }

    /// Re-read an external asset's metadata. With `resolving`, the asset's
    /// resolution completes once the metadata is in.
    fn refresh_meta(&self, url: &str, resolving: bool) {
        let asset = self.inner.state.borrow().externals.get(url).and_then(|r| r.asset.clone());
        let Some(asset) = asset else {
            if resolving {
                self.on_external_resolved(url);
            }
            return;
        };
        let content_type = asset.content_type();
        let image_size = asset.image_size();
        {
            let mut st = self.inner.state.borrow_mut();
            if let Some(record) = st.externals.get_mut(url) {
                record.meta.content_type = content_type.clone();
                record.meta.image_size = image_size;
            }
        }

        let stylesheet = content_type.split(';').next().is_some_and(|t| t.trim() == CSS_CONTENT_TYPE);
        let data = if stylesheet { self.read_external(&asset) } else { None };
        let Some(data) = data else {
            if resolving {
                self.on_external_resolved(url);
            }
            return;
        };

        debug!(url = %url, bytes = data.len(), "parsing stylesheet");
        let parser = self.inner.parser.clone();
        let weak = Rc::downgrade(&self.inner);
        let key = url.to_string();
        self.inner.queue.submit(
            move |_ctx| parser.parse(data, CSS_CONTENT_TYPE),
            move |outcome| {
                let Some(controller) = upgrade(&weak) else {
                    return;
                };
                match outcome {
                    TaskOutcome::Done(Ok(document)) => {
                        let mut st = controller.inner.state.borrow_mut();
                        if let Some(record) = st.externals.get_mut(&key) {
                            record.meta.sub_document = Some(document);
                        }
                        st.fonts = None;
                    }
                    TaskOutcome::Done(Err(e)) => {
                        controller.emit(SourceEvent::Error(SourceError::Parse { url: key.clone(), reason: e.to_string() }));
                    }
                    TaskOutcome::Failed(e) => {
                        controller.emit(SourceEvent::Error(SourceError::Task(e.to_string())));
                    }
                }
                if resolving {
                    controller.on_external_resolved(&key);
                }
            },
        );
    }

    /// Content of an external asset under a short read lock; `None` while
    /// a commit holds the asset.
    fn read_external(&self, asset: &DocumentAsset) -> Option<Bytes> {
        let holder = self.inner.holder;
        if !asset.lock().try_read(holder) {
            return None;
        }
        let data = asset.data(holder).ok();
        asset.lock().release_read(holder);
        data
    }

    fn on_external_resolved(&self, url: &str) {
        let remaining = {
            let mut st = self.inner.state.borrow_mut();
            match st.externals.get_mut(url) {
                Some(record) if record.resolved => return,
                Some(record) => record.resolved = true,
                None => return,
            }
            st.outstanding = st.outstanding.saturating_sub(1);
            st.outstanding
        };
        debug!(url = %url, remaining, "external asset resolved");
        if remaining == 0 {
            self.finish_resolution();
        }
    }

    /// URLs of every external asset discovered so far.
    pub fn external_assets(&self) -> Vec<String> {
        self.inner.state.borrow().externals.keys().cloned().collect()
    }

    pub fn external_asset(&self, url: &str) -> Option<DocumentAsset> {
        self.inner.state.borrow().externals.get(url).and_then(|r| r.asset.clone())
    }

    pub fn external_asset_meta(&self, url: &str) -> Option<ExternalAssetMeta> {
        self.inner.state.borrow().externals.get(url).map(|r| r.meta.clone())
    }

    /// Locks of every external asset with a backing asset.
    pub fn external_locks(&self) -> Vec<AssetLock> {
        self.inner
            .state
            .borrow()
            .externals
            .values()
            .filter_map(|r| r.asset.as_ref().map(|a| a.lock().clone()))
            .collect()
    }

    /// The document asset's lock first, then every external asset's.
    pub fn asset_locks(&self) -> Vec<AssetLock> {
        let mut locks: Vec<AssetLock> = self.inner.asset.iter().map(|a| a.lock().clone()).collect();
        locks.extend(self.external_locks());
        locks
    }

    // ── Readers ─────────────────────────────────────────────────────────

    /// Read-lock the document and every external asset for `holder` if
    /// possible right now.
    pub fn try_read_lock(&self, holder: HolderId) -> bool {
        self.inner.locks.try_read_lock(holder, &self.asset_locks())
    }

    /// Read-lock the document and every external asset for `holder`,
    /// running `on_acquired` once all are held.
    pub fn retain_read_lock(&self, holder: HolderId, on_acquired: impl FnOnce() + 'static) {
        let locks = self.asset_locks();
        self.inner.locks.retain_read_lock(holder, &locks, on_acquired);
    }

    pub fn release_read_lock(&self, holder: HolderId) {
        self.inner.locks.release_read_lock(holder);
    }

    /// The external asset can be read right now, or the document embeds
    /// the file.
    pub fn is_file_exists(&self, url: &str) -> bool {
        if self.external_asset(url).is_some_and(|a| a.is_read_available()) {
            return true;
        }
        self.document().is_some_and(|d| d.is_file_exists(url))
    }

    pub fn image_size(&self, url: &str) -> Option<(u32, u32)> {
        if let Some(size) = self.external_asset_meta(url).and_then(|m| m.image_size) {
            return Some(size);
        }
        let data = self.document()?.file_data(url)?;
        image_dimensions(&data)
    }

    /// Image bytes for `url`. External assets that are not images (such as
    /// stylesheets) yield nothing.
    pub fn image_data(&self, url: &str) -> Option<Bytes> {
        if let Some(asset) = self.external_asset(url) {
            if !self.external_asset_meta(url).is_some_and(|m| m.is_image()) {
                trace!(url = %url, "external asset is not an image");
                return None;
            }
            return self.read_external(&asset);
        }
        self.document()?.file_data(url)
    }

    // ── Fonts ───────────────────────────────────────────────────────────

    /// Configured faces, then faces declared by the document and by its
    /// stylesheets.
    pub fn font_faces(&self) -> FontFaceMap {
        let st = self.inner.state.borrow();
        let mut faces = self.inner.options.faces.clone();
        if let Some(document) = &st.document {
            faces.merge(&document.font_faces());
        }
        for record in st.externals.values() {
            if let Some(sheet) = &record.meta.sub_document {
                faces.merge(&sheet.font_faces());
            }
        }
        faces
    }

    /// Font source for the current document, rebuilt after each load.
    pub fn font_source(&self) -> Option<Arc<FontSource>> {
        if let Some(fonts) = self.inner.state.borrow().fonts.clone() {
            return Some(fonts);
        }
        let document = self.document()?;
        let options = &self.inner.options;
        let loader = DocumentFontLoader::new(document, FsFontLoader::new(options.font_dirs.clone()));
        let source = Arc::new(
            FontSource::new(self.font_faces(), Arc::new(loader))
                .with_scale(options.font_scale)
                .with_char_groups(options.char_groups),
        );
        debug!(faces = source.faces().len(), "font source built");
        self.inner.state.borrow_mut().fonts = Some(source.clone());
        Some(source)
    }
}

impl std::fmt::Debug for SourceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.borrow();
        f.debug_struct("SourceController")
            .field("holder", &self.inner.holder)
            .field("url", &self.inner.asset.as_ref().map(|a| a.url().to_string()))
            .field("loaded_mtime", &st.loaded_mtime)
            .field("loading", &st.loading)
            .field("outstanding", &st.outstanding)
            .finish()
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(asset) = &self.asset {
            if let Some(subscription) = st.subscription.take() {
                asset.unsubscribe(subscription);
            }
            if st.loading {
                asset.release_document(self.holder);
            }
        }
        for record in st.externals.values_mut() {
            if let (Some(asset), Some(subscription)) = (&record.asset, record.subscription.take()) {
                asset.unsubscribe(subscription);
            }
        }
    }
}

fn upgrade(weak: &Weak<ControllerInner>) -> Option<SourceController> {
    weak.upgrade().map(|inner| SourceController { inner })
}

/// Network resources not embedded in the document.
fn is_external(url: &str, document: &dyn Document) -> bool {
    match url.split_once("://") {
        Some(("document", _)) => false,
        Some((scheme, _)) => !scheme.is_empty() && !document.is_file_exists(url),
        None => false,
    }
}
