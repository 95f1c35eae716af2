//! Render coordination.
//!
//! A [`RenderCoordinator`] turns "something changed" into at most one build
//! in flight per surface. Requests that arrive during a build only mark the
//! coordinator dirty; when the build lands, a dirty coordinator throws the
//! result away and builds again from fresh state.
//!
//! ```text
//!   request_render ──▶ in progress? ──yes──▶ dirty = true
//!                          │ no
//!                          ▼
//!          retain external read locks ──▶ snapshot ──▶ builder on worker
//!                                                           │
//!          release locks ◀──────────────────────────────────┘
//!                │
//!          dirty? ──yes──▶ build again (result discarded)
//!                │ no
//!                ▼
//!          publish latest, RenderEvent::Published
//! ```
//!
//! The snapshot is taken when the build starts, after the read locks are
//! held, so a build never sees assets change under it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use bitflags::bitflags;
use folio_glyphs::{
    AtlasConfig, AtlasPage, CharTexture, FontParameters, FontSource, FontdueRasterizer, FsFontLoader, GlyphAtlas,
    GlyphCache,
};
use folio_tasks::{TaskOutcome, TaskQueue, WorkerContext};
use folio_types::HolderId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::config::{FolioConfig, RenderConfig};
use crate::controller::SourceController;
use crate::document::Document;
use crate::error::RenderError;

const EVENT_CAPACITY: usize = 16;
/// Stale builds retried in a row before the failure is published.
const MAX_STALE_RERUNS: u32 = 3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MediaFlags: u8 {
        /// Lines run past the right margin instead of wrapping.
        const NO_WRAP = 1 << 0;
        const DARK_THEME = 1 << 1;
        const UNDERLINE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Margins {
    pub fn uniform(value: f32) -> Self {
        Self { left: value, top: value, right: value, bottom: value }
    }
}

/// Presentation settings that change the output but not the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaParameters {
    pub font_scale: f32,
    pub margins: Margins,
    pub flags: MediaFlags,
}

impl Default for MediaParameters {
    fn default() -> Self {
        Self { font_scale: 1.0, margins: Margins::default(), flags: MediaFlags::empty() }
    }
}

/// Everything a build reads, captured on the owner context.
#[derive(Clone)]
pub struct RenderSnapshot {
    /// Number of render requests accepted when the build started.
    pub generation: u64,
    pub document: Option<Arc<dyn Document>>,
    pub fonts: Option<Arc<FontSource>>,
    pub media: MediaParameters,
    pub surface: (u32, u32),
}

impl std::fmt::Debug for RenderSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSnapshot")
            .field("generation", &self.generation)
            .field("document", &self.document.is_some())
            .field("fonts", &self.fonts.as_ref().map(|s| s.id()))
            .field("media", &self.media)
            .field("surface", &self.surface)
            .finish()
    }
}

/// One textured rectangle. Decorations such as underlines carry no
/// code point and sample the atlas page's solid texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    pub codepoint: Option<char>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub tex_x: u16,
    pub tex_y: u16,
    pub tex_width: u16,
    pub tex_height: u16,
}

/// Consecutive quads sampling the same atlas page.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawBatch {
    pub page: u16,
    pub quads: Vec<GlyphQuad>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderResult {
    pub generation: u64,
    pub batches: Vec<DrawBatch>,
    pub pages: Vec<AtlasPage>,
    pub atlas_version: u32,
    pub lines: usize,
    /// Width and height of the laid out text, margins included.
    pub extent: (f32, f32),
}

impl RenderResult {
    pub fn empty(generation: u64) -> Self {
        Self { generation, ..Default::default() }
    }

    pub fn quads(&self) -> impl Iterator<Item = &GlyphQuad> {
        self.batches.iter().flat_map(|b| b.quads.iter())
    }
}

/// Produces output from a snapshot. Runs on a worker thread.
pub trait RenderBuilder: Send + Sync {
    fn build(&self, ctx: &mut WorkerContext, snapshot: &RenderSnapshot) -> Result<RenderResult, RenderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Published { generation: u64 },
    Failed(RenderError),
}

// ── Glyph runs ──────────────────────────────────────────────────────────

type CacheFactory = Arc<dyn Fn() -> GlyphCache + Send + Sync>;

/// Lays the document text out as glyph quads over a fresh glyph atlas.
///
/// Each worker keeps its own [`GlyphCache`] in its context; the factory
/// creates it the first time a build lands on that worker.
pub struct GlyphRunBuilder {
    family: String,
    size: u16,
    atlas: AtlasConfig,
    make_cache: CacheFactory,
}

impl GlyphRunBuilder {
    /// Rasterize with fontdue, falling back to the configured fallback font.
    pub fn new(config: &FolioConfig) -> Self {
        let fallback = config.atlas.fallback_font.clone();
        let dirs = config.fonts.search_dirs.clone();
        Self::with_cache(&config.render, config.atlas.clone(), move || {
            let cache = GlyphCache::new(FontdueRasterizer);
            match &fallback {
                Some(path) => cache.with_fallback(
                    path.to_string_lossy().into_owned(),
                    Arc::new(FsFontLoader::new(dirs.clone())),
                ),
                None => cache,
            }
        })
    }

    pub fn with_cache(
        render: &RenderConfig,
        atlas: AtlasConfig,
        make_cache: impl Fn() -> GlyphCache + Send + Sync + 'static,
    ) -> Self {
        Self {
            family: render.family.clone(),
            size: render.size,
            atlas,
            make_cache: Arc::new(make_cache),
        }
    }
}

impl RenderBuilder for GlyphRunBuilder {
    fn build(&self, ctx: &mut WorkerContext, snapshot: &RenderSnapshot) -> Result<RenderResult, RenderError> {
        let (Some(document), Some(fonts)) = (&snapshot.document, &snapshot.fonts) else {
            return Ok(RenderResult::empty(snapshot.generation));
        };

        let size = (f32::from(self.size) * snapshot.media.font_scale).round().clamp(1.0, f32::from(u16::MAX)) as u16;
        let layout = fonts
            .layout(&FontParameters::new(self.family.clone(), size))
            .ok_or_else(|| RenderError::NoFont(self.family.clone()))?;

        let text = document.text();
        let mut chars: Vec<char> = text.chars().filter(|c| !c.is_control()).collect();
        chars.sort_unstable();
        chars.dedup();

        let make_cache = self.make_cache.clone();
        let cache = GlyphCache::of(ctx, move || make_cache());
        let data = layout.add_chars(&chars, cache);
        fonts.add_texture_chars(layout.name(), chars.iter().copied());

        let version = fonts.version();
        let atlas = GlyphAtlas::new(self.atlas.clone())
            .update(cache, fonts, version, &fonts.texture_requests())
            .ok_or_else(|| {
                if fonts.is_request_valid(version) {
                    RenderError::AtlasFull
                } else {
                    RenderError::Stale
                }
            })?;
        let textures: HashMap<char, CharTexture> = atlas
            .textures
            .get(layout.name())
            .map(|list| list.iter().map(|t| (t.codepoint, *t)).collect())
            .unwrap_or_default();

        let metrics = data.metrics;
        let line_height = f32::from(if metrics.height > 0 { metrics.height } else { size });
        let ascender = if metrics.ascender > 0 { f32::from(metrics.ascender) } else { f32::from(size) };
        let margins = snapshot.media.margins;
        let right = (snapshot.surface.0 as f32 - margins.right).max(margins.left);
        let wrap = !snapshot.media.flags.contains(MediaFlags::NO_WRAP);

        let mut run = Run::new(margins.left, margins.top + ascender, line_height);
        for c in text.chars() {
            if c == '\n' {
                run.break_line();
                continue;
            }
            let Some(record) = data.get(c) else {
                continue;
            };
            let mut kern = run.prev.map_or(0.0, |p| f32::from(data.kerning(p, c)));
            let advance = f32::from(record.advance);
            if wrap && run.pen_x > margins.left && run.pen_x + kern + advance > right {
                run.break_line();
                kern = 0.0;
            }
            run.pen_x += kern;
            if let Some(tex) = textures.get(&c)
                && let Some(page) = tex.page
            {
                run.push(
                    page,
                    GlyphQuad {
                        codepoint: Some(c),
                        x: run.pen_x + f32::from(record.bearing_x),
                        y: run.baseline - f32::from(record.bearing_y),
                        width: f32::from(record.width),
                        height: f32::from(record.height),
                        tex_x: tex.x,
                        tex_y: tex.y,
                        tex_width: tex.width,
                        tex_height: tex.height,
                    },
                );
            }
            run.pen_x += advance;
            run.prev = Some(c);
        }
        run.finish_line();

        if snapshot.media.flags.contains(MediaFlags::UNDERLINE)
            && let Some(page) = atlas.pages.first()
        {
            let solid_x = u16::try_from(page.width.saturating_sub(1)).unwrap_or(u16::MAX);
            let solid_y = u16::try_from(page.height.saturating_sub(1)).unwrap_or(u16::MAX);
            let thickness = f32::from(metrics.underline_thickness.max(1));
            let spans = run.spans.clone();
            for (start, end, baseline) in spans {
                if end <= start {
                    continue;
                }
                run.push(
                    0,
                    GlyphQuad {
                        codepoint: None,
                        x: start,
                        y: baseline - f32::from(metrics.underline_position),
                        width: end - start,
                        height: thickness,
                        tex_x: solid_x,
                        tex_y: solid_y,
                        tex_width: 1,
                        tex_height: 1,
                    },
                );
            }
        }

        let lines = run.spans.len();
        let extent = (
            run.widest + margins.right,
            margins.top + line_height * lines as f32 + margins.bottom,
        );
        trace!(
            generation = snapshot.generation,
            layout = layout.name(),
            lines,
            batches = run.batches.len(),
            "glyph runs built"
        );
        Ok(RenderResult {
            generation: snapshot.generation,
            batches: run.batches,
            pages: atlas.pages,
            atlas_version: atlas.version,
            lines,
            extent,
        })
    }
}

/// Pen state while laying out text.
struct Run {
    left: f32,
    line_height: f32,
    pen_x: f32,
    baseline: f32,
    prev: Option<char>,
    widest: f32,
    /// (start x, end x, baseline) of each finished line.
    spans: Vec<(f32, f32, f32)>,
    batches: Vec<DrawBatch>,
}

impl Run {
    fn new(left: f32, baseline: f32, line_height: f32) -> Self {
        Self {
            left,
            line_height,
            pen_x: left,
            baseline,
            prev: None,
            widest: left,
            spans: Vec::new(),
            batches: Vec::new(),
        }
    }

    fn push(&mut self, page: u16, quad: GlyphQuad) {
        match self.batches.last_mut() {
            Some(batch) if batch.page == page => batch.quads.push(quad),
            _ => self.batches.push(DrawBatch { page, quads: vec![quad] }),
        }
    }

    fn finish_line(&mut self) {
        self.widest = self.widest.max(self.pen_x);
        self.spans.push((self.left, self.pen_x, self.baseline));
    }

    fn break_line(&mut self) {
        self.finish_line();
        self.pen_x = self.left;
        self.baseline += self.line_height;
        self.prev = None;
    }
}

// ── Coordinator ─────────────────────────────────────────────────────────

struct CoordinatorState {
    enabled: bool,
    dirty: bool,
    in_progress: bool,
    surface: (u32, u32),
    media: MediaParameters,
    /// Accepted render requests; stamps each snapshot.
    requests: u64,
    /// Consecutive builds discarded as stale.
    stale_runs: u32,
    builds: u64,
    latest: Option<Arc<RenderResult>>,
}

struct CoordinatorInner {
    holder: HolderId,
    source: SourceController,
    queue: TaskQueue,
    builder: Arc<dyn RenderBuilder>,
    min_surface: u32,
    events: broadcast::Sender<RenderEvent>,
    state: RefCell<CoordinatorState>,
}

/// Coalesces render requests for one surface. Clones share it.
#[derive(Clone)]
pub struct RenderCoordinator {
    inner: Rc<CoordinatorInner>,
}

impl RenderCoordinator {
    pub fn new(
        source: SourceController,
        queue: TaskQueue,
        builder: Arc<dyn RenderBuilder>,
        config: &RenderConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Rc::new(CoordinatorInner {
                holder: HolderId::new(),
                source,
                queue,
                builder,
                min_surface: config.min_surface,
                events,
                state: RefCell::new(CoordinatorState {
                    enabled: true,
                    dirty: false,
                    in_progress: false,
                    surface: (0, 0),
                    media: MediaParameters::default(),
                    requests: 0,
                    stale_runs: 0,
                    builds: 0,
                    latest: None,
                }),
            }),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<RenderEvent> {
        self.inner.events.subscribe()
    }

    pub fn source(&self) -> &SourceController {
        &self.inner.source
    }

    /// Most recently published result.
    pub fn latest(&self) -> Option<Arc<RenderResult>> {
        self.inner.state.borrow().latest.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.borrow().dirty
    }

    pub fn is_in_progress(&self) -> bool {
        self.inner.state.borrow().in_progress
    }

    /// Builds started, discarded ones included.
    pub fn build_count(&self) -> u64 {
        self.inner.state.borrow().builds
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut st = self.inner.state.borrow_mut();
        if st.enabled != enabled {
            st.enabled = enabled;
            st.dirty = true;
        }
    }

    pub fn set_surface_size(&self, width: u32, height: u32) {
        let mut st = self.inner.state.borrow_mut();
        if st.surface != (width, height) {
            st.surface = (width, height);
            st.dirty = true;
        }
    }

    pub fn set_media(&self, media: MediaParameters) {
        let mut st = self.inner.state.borrow_mut();
        if st.media != media {
            st.media = media;
            st.dirty = true;
        }
    }

    /// Ask for a render. Returns `true` when a build started now.
    ///
    /// Does nothing while disabled or while the surface is below the
    /// minimum size. During a build the request is folded into one rerun.
    pub fn request_render(&self) -> bool {
        {
            let mut st = self.inner.state.borrow_mut();
            if !self.can_render(&st) {
                return false;
            }
            st.requests += 1;
            if st.in_progress {
                st.dirty = true;
                trace!(requests = st.requests, "render in progress, request coalesced");
                return false;
            }
            st.dirty = false;
            st.in_progress = true;
        }
        self.start_build();
        true
    }

    /// Request a render only when something changed since the last one.
    pub fn render_if_dirty(&self) -> bool {
        let dirty = {
            let st = self.inner.state.borrow();
            st.dirty && !st.in_progress
        };
        dirty && self.request_render()
    }

    fn can_render(&self, st: &CoordinatorState) -> bool {
        if !st.enabled {
            trace!("render request ignored, coordinator disabled");
            return false;
        }
        let (width, height) = st.surface;
        if width < self.inner.min_surface || height < self.inner.min_surface {
            trace!(width, height, "render request ignored, surface too small");
            return false;
        }
        true
    }

    fn start_build(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.source.retain_read_lock(self.inner.holder, move || {
            if let Some(coordinator) = upgrade(&weak) {
                coordinator.submit_build();
            }
        });
    }

    fn submit_build(&self) {
        let document = self.inner.source.document();
        let fonts = self.inner.source.font_source();
        let snapshot = {
            let mut st = self.inner.state.borrow_mut();
            st.builds += 1;
            RenderSnapshot {
                generation: st.requests,
                document,
                fonts,
                media: st.media.clone(),
                surface: st.surface,
            }
        };
        debug!(generation = snapshot.generation, surface = ?snapshot.surface, "render build submitted");

        let builder = self.inner.builder.clone();
        let weak = Rc::downgrade(&self.inner);
        self.inner.queue.submit(
            move |ctx| builder.build(ctx, &snapshot),
            move |outcome| {
                if let Some(coordinator) = upgrade(&weak) {
                    coordinator.on_built(outcome);
                }
            },
        );
    }

    fn on_built(&self, outcome: TaskOutcome<Result<RenderResult, RenderError>>) {
        self.inner.source.release_read_lock(self.inner.holder);
        let stale = matches!(outcome, TaskOutcome::Done(Err(RenderError::Stale)));
        let rerun = {
            let mut st = self.inner.state.borrow_mut();
            st.in_progress = false;
            st.stale_runs = if stale { st.stale_runs + 1 } else { 0 };
            let retry_stale = stale && st.stale_runs <= MAX_STALE_RERUNS;
            if (st.dirty || retry_stale) && self.can_render(&st) {
                st.dirty = false;
                st.in_progress = true;
                true
            } else {
                false
            }
        };
        if rerun {
            if stale {
                debug!("font data changed during build, rebuilding");
            } else {
                debug!("state changed during build, result discarded");
            }
            self.start_build();
            return;
        }
        self.inner.state.borrow_mut().stale_runs = 0;

        let event = match outcome {
            TaskOutcome::Done(Ok(result)) => {
                let generation = result.generation;
                info!(generation, lines = result.lines, pages = result.pages.len(), "render published");
                self.inner.state.borrow_mut().latest = Some(Arc::new(result));
                RenderEvent::Published { generation }
            }
            TaskOutcome::Done(Err(e)) => {
                warn!(error = %e, "render build failed");
                RenderEvent::Failed(e)
            }
            TaskOutcome::Failed(e) => {
                error!(error = %e, "render task failed");
                RenderEvent::Failed(RenderError::Task(e.to_string()))
            }
        };
        let _ = self.inner.events.send(event);
    }
}

impl std::fmt::Debug for RenderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.borrow();
        f.debug_struct("RenderCoordinator")
            .field("holder", &self.inner.holder)
            .field("enabled", &st.enabled)
            .field("dirty", &st.dirty)
            .field("in_progress", &st.in_progress)
            .field("surface", &st.surface)
            .finish()
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if self.state.get_mut().in_progress {
            self.source.release_read_lock(self.holder);
        }
    }
}

fn upgrade(weak: &Weak<CoordinatorInner>) -> Option<RenderCoordinator> {
    weak.upgrade().map(|inner| RenderCoordinator { inner })
}
