//! The document
//!
//! Central hub of the core: it owns the page vector, multiplexes pixmap
//! requests from observers onto the single-flight generator, accounts every
//! cached pixmap against the memory governor, drives searches as posted
//! continuations, and persists per-document metadata.
//!
//! One host thread owns all state here. The only lock is the request
//! pipeline mutex guarding the queue and the in-flight slot, because a
//! threaded generator completes requests from its render thread. The lock
//! is never held across a call into the generator or an observer
//! notification.
//!
//! The core owns no event loop. Work that must interleave with the host
//! (search continuations, dispatch retries, rotation completions, font
//! reading) is queued as tasks; the host calls [`Document::process_pending`]
//! whenever the document reports pending work, and again after ~30 ms when a
//! dispatch found the generator busy.

use crate::archive::{self, ArchiveData};
use crate::error::{DocumentError, DocumentResult};
use crate::generator::{FontInfo, Generator, GeneratorFeature, GeneratorRegistry, GeneratorReply};
use crate::history::ViewportHistory;
use crate::metadata::{self, LoadedInfo, PageItems};
use crate::observer::{ChangeFlags, DocumentObserver, ObserverId, SetupFlags};
use crate::page::{Annotation, Page, Pixmap};
use crate::search::{
    word_color, RunningSearch, SearchId, SearchStatus, SearchStep, SearchType,
};
use crate::settings::{CoreSettings, MetaDataValue};
use crate::textpage::SearchDirection;
use crate::view::View;
use crate::viewport::DocumentViewport;
use log::{debug, warn};
use quire_cache::{bytes_to_free, max_text_pages, AllocatedPixmap, AllocationFifo};
use quire_cache::{MemoryProbe, MemoryProfile, SystemMemory};
use quire_doc_model::{Color, NormalizedRect, PageSize, RegularArea, Rotation};
use quire_scheduler::{
    Disposition, PixmapRequest, PixmapRequestFlags, RequestQueue, MAX_REQUEST_PIXELS,
};
use quire_storage::Storage;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Host-facing document signals.
///
/// All callbacks fire synchronously on the host thread. The defaults make
/// every signal optional and auto-confirm questions, which is also the
/// non-interactive behavior under `no_dialogs`.
pub trait DocumentSignals {
    /// An open-path failure the user should see.
    fn error(&self, _message: &str, _duration_ms: u64) {}

    /// A non-fatal condition worth surfacing once.
    fn warning(&self, _message: &str) {}

    fn search_finished(&self, _id: SearchId, _status: SearchStatus) {}

    /// A page finished re-rendering after a rotation change.
    fn rotation_finished(&self, _page: usize) {}

    fn font_reading_progress(&self, _pages_done: usize) {}

    fn font_reading_ended(&self) {}

    fn got_font(&self, _font: FontInfo) {}

    /// Ask whether a single-match search may wrap around the document.
    /// `forward` tells which end was reached.
    fn confirm_search_wrap(&self, _forward: bool) -> bool {
        true
    }

    /// Pick among several generators claiming the MIME type.
    fn choose_generator(&self, _candidates: &[String]) -> usize {
        0
    }
}

struct NoopSignals;

impl DocumentSignals for NoopSignals {}

/// Work queued for the next `process_pending` pass.
enum CoreTask {
    Dispatch,
    Search(SearchStep),
    RotationFinished(usize),
    FontStep,
}

struct RequestPipeline {
    queue: RequestQueue,
    in_flight: Option<PixmapRequest>,
}

/// The document core.
pub struct Document {
    settings: CoreSettings,
    probe: Box<dyn MemoryProbe>,
    signals: Box<dyn DocumentSignals>,
    storage: Storage,

    generator: Option<Box<dyn Generator>>,
    pages: Vec<Page>,
    observers: BTreeMap<ObserverId, Arc<dyn DocumentObserver>>,
    views: Vec<View>,
    visible_rects: Vec<(usize, NormalizedRect)>,

    pipeline: Mutex<RequestPipeline>,
    allocations: AllocationFifo,
    text_page_fifo: VecDeque<usize>,
    max_text_pages: usize,

    history: ViewportHistory,
    rotation: Rotation,

    searches: BTreeMap<SearchId, RunningSearch>,
    last_search_id: Option<SearchId>,
    search_cancelled: bool,

    tasks: VecDeque<CoreTask>,

    url: Option<PathBuf>,
    doc_file_name: Option<PathBuf>,
    doc_size: u64,
    sidecar_path: Option<PathBuf>,
    archive: Option<ArchiveData>,
    archived_file_name: Option<String>,
    archive_metadata_url: Option<String>,

    annotations_need_save_as: bool,
    warned_out_of_memory: bool,
    warned_annotations_save_as: bool,
    closing: bool,

    fonts_cached: bool,
    fonts_cache: Vec<FontInfo>,
    font_reading_page: Option<usize>,
}

impl Document {
    pub fn new(settings: CoreSettings, storage: Storage) -> Self {
        Self {
            settings,
            probe: Box::new(SystemMemory::new()),
            signals: Box::new(NoopSignals),
            storage,
            generator: None,
            pages: Vec::new(),
            observers: BTreeMap::new(),
            views: Vec::new(),
            visible_rects: Vec::new(),
            pipeline: Mutex::new(RequestPipeline {
                queue: RequestQueue::new(),
                in_flight: None,
            }),
            allocations: AllocationFifo::new(),
            text_page_fifo: VecDeque::new(),
            max_text_pages: 1,
            history: ViewportHistory::new(),
            rotation: Rotation::D0,
            searches: BTreeMap::new(),
            last_search_id: None,
            search_cancelled: false,
            tasks: VecDeque::new(),
            url: None,
            doc_file_name: None,
            doc_size: 0,
            sidecar_path: None,
            archive: None,
            archived_file_name: None,
            archive_metadata_url: None,
            annotations_need_save_as: false,
            warned_out_of_memory: false,
            warned_annotations_save_as: false,
            closing: false,
            fonts_cached: false,
            fonts_cache: Vec::new(),
            font_reading_page: None,
        }
    }

    /// Replace the host-memory probe. Intended for tests and headless runs.
    pub fn with_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_signals(mut self, signals: Box<dyn DocumentSignals>) -> Self {
        self.signals = signals;
        self
    }

    fn pipeline(&self) -> MutexGuard<'_, RequestPipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Accessors

    pub fn is_opened(&self) -> bool {
        self.generator.is_some()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn current_viewport(&self) -> &DocumentViewport {
        self.history.current()
    }

    pub fn history(&self) -> &ViewportHistory {
        &self.history
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn url(&self) -> Option<&Path> {
        self.url.as_deref()
    }

    /// Sum of all cached pixmap bytes, as accounted by the allocation FIFO.
    pub fn total_allocated_bytes(&self) -> u64 {
        self.allocations.total_bytes()
    }

    pub fn allocated_pixmap_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn pending_request_count(&self) -> usize {
        self.pipeline().queue.len()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn running_search(&self, id: SearchId) -> Option<&RunningSearch> {
        self.searches.get(&id)
    }

    pub fn fonts(&self) -> &[FontInfo] {
        &self.fonts_cache
    }

    /// Answer a host metadata key (`"PaperColor"`, `"ZoomFactor"`, ...).
    pub fn document_meta_data(&self, key: &str, option: bool) -> Option<MetaDataValue> {
        self.settings.meta_data(key, option)
    }

    // ------------------------------------------------------------------
    // Observers and views

    pub fn add_observer(&mut self, observer: Arc<dyn DocumentObserver>) {
        let id = observer.observer_id();
        self.observers.insert(id, observer.clone());
        if self.is_opened() {
            observer.notify_setup(&self.pages, SetupFlags::DOCUMENT_CHANGED);
        }
    }

    /// Unregister an observer and atomically relinquish all its pixmaps.
    pub fn remove_observer(&mut self, id: ObserverId) {
        self.observers.remove(&id);
        self.pipeline().queue.remove_for_observer(id, None);
        let pages = self.allocations.remove_observer(id);
        for page_index in pages {
            if let Some(page) = self.pages.get_mut(page_index) {
                page.delete_pixmap(id);
            }
        }
    }

    pub fn register_view(&mut self, view: View) {
        self.views.push(view);
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    fn observer_list(&self) -> Vec<Arc<dyn DocumentObserver>> {
        self.observers.values().cloned().collect()
    }

    fn notify_setup_all(&self, flags: SetupFlags) {
        for observer in self.observer_list() {
            observer.notify_setup(&self.pages, flags);
        }
    }

    fn notify_all_page(&self, page: usize, flags: ChangeFlags) {
        for observer in self.observer_list() {
            observer.notify_page_changed(page, flags);
        }
    }

    fn notify_contents_cleared_all(&self, flags: ChangeFlags) {
        for observer in self.observer_list() {
            observer.notify_contents_cleared(flags);
        }
    }

    // ------------------------------------------------------------------
    // Open / close

    /// Open `path` with the best generator the registry offers for `mime`.
    ///
    /// On failure the document reverts to a clean empty state and the error
    /// is also emitted through the `error` signal.
    pub fn open_document(
        &mut self,
        path: &Path,
        mime: &str,
        registry: &mut dyn GeneratorRegistry,
    ) -> DocumentResult<()> {
        let outcome = self.open_inner(path, mime, registry, None, None);
        if let Err(err) = &outcome {
            self.signals.error(&err.to_string(), 0);
            self.reset_state();
        }
        outcome
    }

    /// Open a document archive: extract its parts and open the embedded
    /// document through the normal path, with metadata loaded from the
    /// archive's sidecar.
    pub fn open_document_archive(
        &mut self,
        path: &Path,
        registry: &mut dyn GeneratorRegistry,
    ) -> DocumentResult<()> {
        let outcome = self.open_archive_inner(path, registry);
        if let Err(err) = &outcome {
            self.signals.error(&err.to_string(), 0);
            self.reset_state();
        }
        outcome
    }

    fn open_archive_inner(
        &mut self,
        path: &Path,
        registry: &mut dyn GeneratorRegistry,
    ) -> DocumentResult<()> {
        let data = archive::open_archive(path)?;
        let mime = archive::mime_for_document(&data.document_file_name);
        let document_path = data.document.path().to_path_buf();
        let metadata_path = data.metadata.as_ref().map(|m| m.path().to_path_buf());

        self.open_inner(&document_path, &mime, registry, metadata_path.as_deref(), Some(path))?;

        self.archived_file_name = Some(data.document_file_name.clone());
        self.archive = Some(data);
        Ok(())
    }

    fn open_inner(
        &mut self,
        path: &Path,
        mime: &str,
        registry: &mut dyn GeneratorRegistry,
        metadata_override: Option<&Path>,
        display_url: Option<&Path>,
    ) -> DocumentResult<()> {
        if self.is_opened() {
            self.close_document();
        }

        let file_info = std::fs::metadata(path)
            .map_err(|_| DocumentError::FileUnreadable(path.to_path_buf()))?;
        if !file_info.is_file() {
            return Err(DocumentError::FileUnreadable(path.to_path_buf()));
        }
        self.doc_size = file_info.len();

        let candidates = registry.candidates(mime);
        if candidates.is_empty() {
            return Err(DocumentError::NoGeneratorForMime(mime.to_string()));
        }
        let choice = if self.settings.choose_generators && candidates.len() > 1 {
            self.signals.choose_generator(&candidates).min(candidates.len() - 1)
        } else {
            0
        };
        let name = &candidates[choice];
        let mut generator = registry
            .create(name)
            .ok_or_else(|| DocumentError::GeneratorLoadFailed(name.clone()))?;

        let pages = generator.load_document(path)?;
        if pages.is_empty() {
            generator.close_document();
            return Err(DocumentError::DocumentOpenFailed(
                "the document contains no pages".into(),
            ));
        }

        debug!("opened {} with generator {name}: {} pages", path.display(), pages.len());

        self.generator = Some(generator);
        self.pages = pages;
        self.url = Some(display_url.unwrap_or(path).to_path_buf());
        self.doc_file_name = Some(path.to_path_buf());
        self.sidecar_path = Some(self.storage.sidecar_path(path, self.doc_size));
        self.max_text_pages =
            max_text_pages(self.settings.memory_level, self.probe.total_ram());

        match metadata_override {
            Some(override_path) => self.load_document_info_from(override_path),
            None => {
                if let Some(sidecar) = self.sidecar_path.clone() {
                    self.load_document_info_from(&sidecar);
                }
            }
        }

        self.notify_setup_all(SetupFlags::DOCUMENT_CHANGED);
        if self.history.current().is_valid() {
            for observer in self.observer_list() {
                observer.notify_viewport_changed(false);
            }
        }
        Ok(())
    }

    /// Close the document: drain the in-flight render, persist metadata,
    /// release the generator, and clear every cache and queue.
    pub fn close_document(&mut self) {
        if self.generator.is_none() {
            return;
        }

        self.pipeline().queue.clear();

        // Wait out the render the generator still owns. requestDone may
        // fire for it; with `closing` set it only clears the slot.
        self.closing = true;
        loop {
            if self.pipeline().in_flight.is_none() {
                break;
            }
            let completed = self.generator.as_mut().and_then(|g| g.wait_completed());
            match completed {
                Some((request, pixmap)) => self.request_done(request, pixmap),
                None => self.pipeline().in_flight = None,
            }
        }
        self.closing = false;

        self.font_reading_page = None;

        if !self.pages.is_empty() {
            if let Err(err) = self.save_document_info() {
                warn!("could not save document metadata: {err}");
            }
        }

        if let Some(mut generator) = self.generator.take() {
            generator.close_document();
        }

        self.reset_state();
        self.notify_setup_all(SetupFlags::DOCUMENT_CHANGED);
    }

    /// Drop all per-document state; observers and views stay registered.
    fn reset_state(&mut self) {
        self.generator = None;
        self.pages.clear();
        {
            let mut pipeline = self.pipeline();
            pipeline.queue.clear();
            pipeline.in_flight = None;
        }
        self.allocations.clear();
        self.text_page_fifo.clear();
        self.history = ViewportHistory::new();
        self.rotation = Rotation::D0;
        self.searches.clear();
        self.last_search_id = None;
        self.search_cancelled = false;
        self.tasks.clear();
        self.url = None;
        self.doc_file_name = None;
        self.doc_size = 0;
        self.sidecar_path = None;
        self.archive = None;
        self.archived_file_name = None;
        self.archive_metadata_url = None;
        self.annotations_need_save_as = false;
        self.warned_annotations_save_as = false;
        self.visible_rects.clear();
        self.fonts_cached = false;
        self.fonts_cache.clear();
        self.font_reading_page = None;
    }

    // ------------------------------------------------------------------
    // Pixmap requests and dispatch

    /// Submit a batch of pixmap requests from one observer.
    pub fn request_pixmaps(&mut self, requests: Vec<PixmapRequest>, flags: PixmapRequestFlags) {
        if requests.is_empty() || self.generator.is_none() || self.closing {
            return;
        }

        let requester = requests[0].observer_id;
        let requested_pages: Vec<usize> = requests.iter().map(|r| r.page_index).collect();
        let threading_disabled = !self.settings.enable_threading;

        {
            let mut pipeline = self.pipeline();
            match flags {
                PixmapRequestFlags::RemoveAllPrevious => {
                    pipeline.queue.remove_for_observer(requester, None);
                }
                PixmapRequestFlags::NoOption => {
                    pipeline.queue.remove_for_observer(requester, Some(&requested_pages));
                }
            }

            for mut request in requests {
                if self.pages.get(request.page_index).is_none() {
                    debug!("dropping request for invalid page {}", request.page_index);
                    continue;
                }
                if !request.asynchronous {
                    request.priority = 0;
                }
                if threading_disabled {
                    request.asynchronous = false;
                }
                pipeline.queue.insert(request);
            }
        }

        self.send_generator_request();
    }

    /// Pick the next viable request and hand it to the generator.
    ///
    /// Completion chains the next dispatch; a busy generator re-posts the
    /// dispatch as a task for the host to pump shortly (~30 ms).
    fn send_generator_request(&mut self) {
        if self.generator.is_none() || self.closing {
            return;
        }

        let request = {
            // Lock the field directly: the scan below needs the page vector
            // and the warn-once flag alongside the guard.
            let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
            if pipeline.in_flight.is_some() {
                return;
            }
            if !self.generator.as_ref().map(|g| g.can_generate_pixmap()).unwrap_or(false) {
                if !pipeline.queue.is_empty() {
                    drop(pipeline);
                    self.tasks.push_back(CoreTask::Dispatch);
                }
                return;
            }

            let pages = &self.pages;
            let warned = &mut self.warned_out_of_memory;
            let signals = &self.signals;
            let selected = pipeline.queue.pop_next_with(|candidate| {
                let Some(page) = pages.get(candidate.page_index) else {
                    return Disposition::Discard;
                };
                if !candidate.force
                    && page.has_pixmap(candidate.observer_id, candidate.width, candidate.height)
                {
                    return Disposition::Discard;
                }
                if !candidate.has_valid_id() {
                    return Disposition::Discard;
                }
                if candidate.pixel_count() > MAX_REQUEST_PIXELS {
                    if !*warned {
                        let message = format!(
                            "request of {}x{} px on page {} exceeds the pixel budget; \
                             reported only once",
                            candidate.width, candidate.height, candidate.page_index
                        );
                        warn!("{message}");
                        signals.warning(&message);
                        *warned = true;
                    }
                    return Disposition::Discard;
                }
                Disposition::Dispatch
            });

            let Some(mut request) = selected else { return };
            if self.rotation.swaps_axes() {
                request.swap_dimensions();
            }
            pipeline.in_flight = Some(request.clone());
            request
        };

        // Free memory ahead of a large allocation, outside the lock.
        if request.byte_size() > 1024 * 1024 {
            self.cleanup();
        }

        debug!(
            "sending request id={} {}x{}@{} async={}",
            request.observer_id, request.width, request.height, request.page_index,
            request.asynchronous
        );

        // The lock is released: a synchronous generator re-enters
        // request_done on this same call stack.
        let reply = match self.generator.as_mut() {
            Some(generator) => generator.generate_pixmap(request.clone()),
            None => return,
        };
        match reply {
            GeneratorReply::Ready(pixmap) => self.request_done(request, pixmap),
            GeneratorReply::Deferred => {}
        }
    }

    /// Completion of one render: account it, publish it, chain the next.
    fn request_done(&mut self, request: PixmapRequest, pixmap: Pixmap) {
        if self.generator.is_none() || self.closing {
            self.pipeline().in_flight = None;
            return;
        }

        self.allocations.remove_entry(request.observer_id, request.page_index);

        match self.observers.get(&request.observer_id).cloned() {
            Some(observer) => {
                let rotation = self
                    .pages
                    .get(request.page_index)
                    .map(|p| p.rotation())
                    .unwrap_or_default();
                if let Some(page) = self.pages.get_mut(request.page_index) {
                    page.set_pixmap(request.observer_id, pixmap, rotation);
                }
                self.allocations.push(AllocatedPixmap::new(
                    request.observer_id,
                    request.page_index,
                    pixmap.byte_size(),
                ));
                observer.notify_page_changed(request.page_index, ChangeFlags::PIXMAP);
            }
            None => warn!(
                "request completed for unregistered observer {}",
                request.observer_id
            ),
        }

        let has_more = {
            let mut pipeline = self.pipeline();
            pipeline.in_flight = None;
            !pipeline.queue.is_empty()
        };
        if has_more {
            self.send_generator_request();
        }
    }

    // ------------------------------------------------------------------
    // Memory governor

    /// Evict cached pixmaps according to the active memory profile.
    pub fn cleanup(&mut self) {
        let target = bytes_to_free(
            self.settings.memory_level,
            self.allocations.total_bytes(),
            self.probe.total_ram(),
            self.probe.free_ram(),
        );
        if target == 0 {
            return;
        }

        let observers = &self.observers;
        let evicted = self.allocations.evict(target, |descriptor| {
            observers
                .get(&descriptor.observer_id)
                .map(|observer| observer.can_unload_pixmap(descriptor.page_index))
                .unwrap_or(true)
        });

        for descriptor in evicted {
            if let Some(page) = self.pages.get_mut(descriptor.page_index) {
                page.delete_pixmap(descriptor.observer_id);
            }
            if let Some(observer) = self.observers.get(&descriptor.observer_id) {
                observer.notify_page_changed(descriptor.page_index, ChangeFlags::PIXMAP);
            }
        }
    }

    /// Periodic hook the host calls every 2 seconds.
    pub fn timed_memory_check(&mut self) {
        if self.settings.memory_level != MemoryProfile::Low
            && self.allocations.total_bytes() > 1024 * 1024
        {
            self.cleanup();
        }
    }

    /// The active generator's configuration changed; invalidate pixmaps if
    /// the generator says rendering output changed.
    pub fn generator_config_changed(&mut self) {
        let Some(generator) = self.generator.as_mut() else { return };
        let changed =
            generator.config_interface().map(|config| config.reparse_config()).unwrap_or(false);

        if changed {
            for page in &mut self.pages {
                page.delete_pixmaps();
            }
            self.allocations.clear();
            self.notify_contents_cleared_all(ChangeFlags::PIXMAP);
        }

        if self.settings.memory_level == MemoryProfile::Low
            && !self.allocations.is_empty()
            && !self.pages.is_empty()
        {
            self.cleanup();
        }
    }

    /// Adopt a new settings record pushed by the host.
    pub fn settings_changed(&mut self, settings: CoreSettings) {
        let profile_changed = settings.memory_level != self.settings.memory_level;
        self.settings = settings;
        self.update_text_page_budget();
        if profile_changed {
            self.cleanup();
        }
    }

    fn update_text_page_budget(&mut self) {
        self.max_text_pages =
            max_text_pages(self.settings.memory_level, self.probe.total_ram());
        while self.text_page_fifo.len() > self.max_text_pages {
            if let Some(kicked) = self.text_page_fifo.pop_front() {
                if let Some(page) = self.pages.get_mut(kicked) {
                    page.set_text_page(None);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Text pages

    /// Ensure `page_index` has a text page, asking the generator
    /// synchronously if needed.
    pub fn request_text_page(&mut self, page_index: usize) {
        if self.pages.get(page_index).map(|p| p.has_text_page()).unwrap_or(true) {
            return;
        }
        let Some(generator) = self.generator.as_mut() else { return };
        let Some(page) = self.pages.get(page_index) else { return };
        if let Some(text_page) = generator.generate_text_page(page) {
            self.pages[page_index].set_text_page(Some(text_page));
            self.text_generation_done(page_index);
        }
    }

    fn text_generation_done(&mut self, page_index: usize) {
        if self.text_page_fifo.len() >= self.max_text_pages.max(1) {
            if let Some(kicked) = self.text_page_fifo.pop_front() {
                if kicked != page_index {
                    if let Some(page) = self.pages.get_mut(kicked) {
                        page.set_text_page(None);
                    }
                }
            }
        }
        self.text_page_fifo.push_back(page_index);
    }

    // ------------------------------------------------------------------
    // Viewport, history, zoom

    /// Make `viewport` current, record it in history, and notify every
    /// observer except `exclude`.
    pub fn set_viewport(
        &mut self,
        viewport: DocumentViewport,
        exclude: Option<ObserverId>,
        smooth_move: bool,
    ) {
        if !viewport.is_valid() {
            debug!("invalid viewport: {viewport}");
            return;
        }
        if viewport.page() >= self.pages.len() {
            debug!("viewport out of document: {viewport}");
            return;
        }

        self.history.push(viewport);

        for observer in self.observer_list() {
            if Some(observer.observer_id()) != exclude {
                observer.notify_viewport_changed(smooth_move);
            }
        }

        // The viewed page becomes the most recently used allocation.
        self.allocations.promote_page(viewport.page());
    }

    /// Move the viewport to a bare page index, clamped into the document.
    pub fn set_viewport_page(
        &mut self,
        page: usize,
        exclude: Option<ObserverId>,
        smooth_move: bool,
    ) {
        if self.pages.is_empty() {
            return;
        }
        let page = page.min(self.pages.len() - 1);
        self.set_viewport(DocumentViewport::new(page), exclude, smooth_move);
    }

    /// Step back in the viewport history.
    pub fn set_prev_viewport(&mut self) {
        if self.history.back() {
            for observer in self.observer_list() {
                observer.notify_viewport_changed(true);
            }
        }
    }

    /// Step forward in the viewport history.
    pub fn set_next_viewport(&mut self) {
        if self.history.forward() {
            for observer in self.observer_list() {
                observer.notify_viewport_changed(true);
            }
        }
    }

    pub fn set_zoom(&mut self, factor: f64, exclude: Option<ObserverId>) {
        for observer in self.observer_list() {
            if Some(observer.observer_id()) != exclude {
                observer.notify_zoom(factor);
            }
        }
    }

    pub fn set_visible_page_rects(
        &mut self,
        rects: Vec<(usize, NormalizedRect)>,
        exclude: Option<ObserverId>,
    ) {
        self.visible_rects = rects;
        for observer in self.observer_list() {
            if Some(observer.observer_id()) != exclude {
                observer.notify_visible_rects_changed();
            }
        }
    }

    pub fn visible_page_rects(&self) -> &[(usize, NormalizedRect)] {
        &self.visible_rects
    }

    // ------------------------------------------------------------------
    // Search

    /// Start (or restart) the search registered under `id`.
    #[allow(clippy::too_many_arguments)]
    pub fn search_text(
        &mut self,
        id: SearchId,
        text: &str,
        from_start: bool,
        case_sensitive: bool,
        search_type: SearchType,
        move_viewport: bool,
        color: Color,
        no_dialogs: bool,
    ) {
        self.search_cancelled = false;

        let searchable = self
            .generator
            .as_ref()
            .map(|g| g.has_feature(GeneratorFeature::TextExtraction))
            .unwrap_or(false);
        if !searchable || self.pages.is_empty() {
            self.signals.search_finished(id, SearchStatus::NoMatchFound);
            return;
        }

        if self.last_search_id != Some(id) {
            if let Some(previous) = self.last_search_id {
                self.reset_search(previous);
            }
        }
        self.last_search_id = Some(id);

        let search = self.searches.entry(id).or_insert_with(RunningSearch::new);
        let new_text = text != search.cached_query;
        search.cached_query = text.to_string();
        search.cached_type = search_type;
        search.cached_case_sensitive = case_sensitive;
        search.cached_move_viewport = move_viewport;
        search.cached_no_dialogs = no_dialogs;
        search.cached_color = color;
        search.is_currently_searching = true;
        let continue_on_page = search.continue_on_page;
        let continue_on_match = search.continue_on_match.clone();
        let highlighted: Vec<usize> =
            std::mem::take(&mut search.highlighted_pages).into_iter().collect();

        // Old highlights of this search go away now; the affected pages are
        // notified together with the new results.
        let pages_to_notify: BTreeSet<usize> = highlighted.iter().copied().collect();
        for &page_index in &highlighted {
            if let Some(page) = self.pages.get_mut(page_index) {
                page.delete_highlights(id);
            }
        }

        match search_type {
            SearchType::AllDocument => {
                self.tasks.push_back(CoreTask::Search(SearchStep::All {
                    id,
                    current_page: 0,
                    matches: BTreeMap::new(),
                    pages_to_notify,
                }));
            }
            SearchType::NextMatch | SearchType::PreviousMatch => {
                let forward = search_type == SearchType::NextMatch;
                let count = self.pages.len() as i64;
                let viewport_page = if self.history.current().is_valid() {
                    self.history.current().page() as i64
                } else {
                    0
                };
                let mut current: i64 = if from_start {
                    if forward {
                        0
                    } else {
                        count - 1
                    }
                } else {
                    continue_on_page.map(|p| p as i64).unwrap_or(viewport_page)
                };
                let mut done_pages = 0usize;
                let mut found = None;

                // Resume on the page of the previous hit before walking.
                if !from_start && continue_on_page.map(|p| p as i64) == Some(current) {
                    let page_index = current as usize;
                    self.request_text_page(page_index);
                    found = self.pages.get(page_index).and_then(|page| {
                        if new_text {
                            let direction = if forward {
                                SearchDirection::FromTop
                            } else {
                                SearchDirection::FromBottom
                            };
                            page.find_text(text, direction, case_sensitive, None)
                        } else {
                            let direction = if forward {
                                SearchDirection::NextResult
                            } else {
                                SearchDirection::PreviousResult
                            };
                            page.find_text(
                                text,
                                direction,
                                case_sensitive,
                                continue_on_match.as_ref(),
                            )
                        }
                    });
                    if found.is_none() {
                        current += if forward { 1 } else { -1 };
                        done_pages += 1;
                    }
                }

                self.tasks.push_back(CoreTask::Search(SearchStep::Single {
                    id,
                    forward,
                    current_page: current,
                    done_pages,
                    found,
                    pages_to_notify,
                }));
            }
            SearchType::GoogleAll | SearchType::GoogleAny => {
                self.tasks.push_back(CoreTask::Search(SearchStep::Google {
                    id,
                    current_page: 0,
                    match_all: search_type == SearchType::GoogleAll,
                    matches: BTreeMap::new(),
                    pages_to_notify,
                }));
            }
        }
    }

    /// Re-run the cached parameters of search `id`.
    pub fn continue_search(&mut self, id: SearchId) {
        let Some(search) = self.searches.get(&id) else {
            self.signals.search_finished(id, SearchStatus::NoMatchFound);
            return;
        };
        if search.is_currently_searching {
            return;
        }
        let (query, case_sensitive, search_type, move_viewport, color, no_dialogs) = (
            search.cached_query.clone(),
            search.cached_case_sensitive,
            search.cached_type,
            search.cached_move_viewport,
            search.cached_color,
            search.cached_no_dialogs,
        );
        self.search_text(
            id,
            &query,
            false,
            case_sensitive,
            search_type,
            move_viewport,
            color,
            no_dialogs,
        );
    }

    /// Re-run search `id` with a different mode (typically flipping between
    /// next and previous match).
    pub fn continue_search_with_type(&mut self, id: SearchId, search_type: SearchType) {
        let Some(search) = self.searches.get(&id) else {
            self.signals.search_finished(id, SearchStatus::NoMatchFound);
            return;
        };
        if search.is_currently_searching {
            return;
        }
        let (query, case_sensitive, move_viewport, color, no_dialogs) = (
            search.cached_query.clone(),
            search.cached_case_sensitive,
            search.cached_move_viewport,
            search.cached_color,
            search.cached_no_dialogs,
        );
        self.search_text(
            id,
            &query,
            false,
            case_sensitive,
            search_type,
            move_viewport,
            color,
            no_dialogs,
        );
    }

    /// Clear every highlight of `id` and forget the search.
    pub fn reset_search(&mut self, id: SearchId) {
        let Some(search) = self.searches.remove(&id) else { return };
        for &page_index in &search.highlighted_pages {
            if let Some(page) = self.pages.get_mut(page_index) {
                page.delete_highlights(id);
            }
        }
        for &page_index in &search.highlighted_pages {
            self.notify_all_page(page_index, ChangeFlags::HIGHLIGHTS);
        }
        self.notify_setup_all(SetupFlags::NONE);
    }

    /// Request cancellation; the flag is observed between pages.
    pub fn cancel_search(&mut self) {
        self.search_cancelled = true;
    }

    fn run_search_step(&mut self, step: SearchStep) {
        match step {
            SearchStep::All { id, current_page, matches, pages_to_notify } => {
                self.step_all(id, current_page, matches, pages_to_notify)
            }
            SearchStep::Single { id, forward, current_page, done_pages, found, pages_to_notify } => {
                self.step_single(id, forward, current_page, done_pages, found, pages_to_notify)
            }
            SearchStep::Google { id, current_page, match_all, matches, pages_to_notify } => {
                self.step_google(id, current_page, match_all, matches, pages_to_notify)
            }
        }
    }

    fn finish_search_cancelled(&mut self, id: SearchId) {
        if let Some(search) = self.searches.get_mut(&id) {
            search.is_currently_searching = false;
        }
        self.signals.search_finished(id, SearchStatus::SearchCancelled);
    }

    fn step_all(
        &mut self,
        id: SearchId,
        current_page: usize,
        mut matches: BTreeMap<usize, Vec<RegularArea>>,
        mut pages_to_notify: BTreeSet<usize>,
    ) {
        if self.search_cancelled || !self.searches.contains_key(&id) {
            self.finish_search_cancelled(id);
            return;
        }
        let Some(search) = self.searches.get(&id) else { return };
        let query = search.cached_query.clone();
        let case_sensitive = search.cached_case_sensitive;
        let color = search.cached_color;

        if current_page < self.pages.len() {
            self.request_text_page(current_page);
            if let Some(page) = self.pages.get(current_page) {
                let mut last: Option<RegularArea> = None;
                loop {
                    last = match &last {
                        None => page.find_text(
                            &query,
                            SearchDirection::FromTop,
                            case_sensitive,
                            None,
                        ),
                        Some(previous) => page.find_text(
                            &query,
                            SearchDirection::NextResult,
                            case_sensitive,
                            Some(previous),
                        ),
                    };
                    match &last {
                        Some(area) => {
                            matches.entry(current_page).or_default().push(area.clone())
                        }
                        None => break,
                    }
                }
            }
            self.tasks.push_back(CoreTask::Search(SearchStep::All {
                id,
                current_page: current_page + 1,
                matches,
                pages_to_notify,
            }));
            return;
        }

        let found = !matches.is_empty();
        for (page_index, areas) in matches {
            if let Some(page) = self.pages.get_mut(page_index) {
                for area in areas {
                    page.set_highlight(id, area, color);
                }
            }
            if let Some(search) = self.searches.get_mut(&id) {
                search.highlighted_pages.insert(page_index);
            }
            pages_to_notify.insert(page_index);
        }
        if let Some(search) = self.searches.get_mut(&id) {
            search.is_currently_searching = false;
        }

        self.notify_setup_all(SetupFlags::NONE);
        for &page_index in &pages_to_notify {
            self.notify_all_page(page_index, ChangeFlags::HIGHLIGHTS);
        }
        self.signals.search_finished(
            id,
            if found { SearchStatus::MatchFound } else { SearchStatus::NoMatchFound },
        );
    }

    fn step_single(
        &mut self,
        id: SearchId,
        forward: bool,
        mut current_page: i64,
        mut done_pages: usize,
        mut found: Option<RegularArea>,
        pages_to_notify: BTreeSet<usize>,
    ) {
        // A cancellation that raced a fresh match still delivers the match.
        if (self.search_cancelled && found.is_none()) || !self.searches.contains_key(&id) {
            self.finish_search_cancelled(id);
            return;
        }
        let Some(search) = self.searches.get(&id) else { return };
        let query = search.cached_query.clone();
        let case_sensitive = search.cached_case_sensitive;
        let move_viewport = search.cached_move_viewport;
        let color = search.cached_color;
        let no_dialogs = search.cached_no_dialogs;

        if found.is_none() {
            let count = self.pages.len() as i64;
            if (done_pages as i64) < count {
                let mut do_continue = true;
                if forward && current_page >= count {
                    if no_dialogs || self.signals.confirm_search_wrap(true) {
                        current_page = 0;
                    } else {
                        do_continue = false;
                    }
                } else if !forward && current_page < 0 {
                    if no_dialogs || self.signals.confirm_search_wrap(false) {
                        current_page = count - 1;
                    } else {
                        do_continue = false;
                    }
                }

                if do_continue {
                    let page_index = current_page as usize;
                    self.request_text_page(page_index);
                    let direction = if forward {
                        SearchDirection::FromTop
                    } else {
                        SearchDirection::FromBottom
                    };
                    found = self
                        .pages
                        .get(page_index)
                        .and_then(|page| page.find_text(&query, direction, case_sensitive, None));
                    if found.is_none() {
                        current_page += if forward { 1 } else { -1 };
                        done_pages += 1;
                    } else {
                        done_pages = 1;
                    }
                    self.tasks.push_back(CoreTask::Search(SearchStep::Single {
                        id,
                        forward,
                        current_page,
                        done_pages,
                        found,
                        pages_to_notify,
                    }));
                    return;
                }
            }
        }

        self.process_search_match(id, found, current_page, pages_to_notify, move_viewport, color);
    }

    fn process_search_match(
        &mut self,
        id: SearchId,
        found: Option<RegularArea>,
        current_page: i64,
        mut pages_to_notify: BTreeSet<usize>,
        move_viewport: bool,
        color: Color,
    ) {
        if let Some(search) = self.searches.get_mut(&id) {
            search.is_currently_searching = false;
        }

        let mut found_match = false;
        if let Some(area) = found {
            found_match = true;
            let page_index = current_page.max(0) as usize;
            if let Some(search) = self.searches.get_mut(&id) {
                search.continue_on_page = Some(page_index);
                search.continue_on_match = Some(area.clone());
                search.highlighted_pages.insert(page_index);
            }
            if let Some(page) = self.pages.get_mut(page_index) {
                page.set_highlight(id, area.clone(), color);
            }
            pages_to_notify.insert(page_index);

            if move_viewport {
                if let Some(first) = area.first() {
                    let (x, y) = first.center();
                    self.set_viewport(DocumentViewport::centered(page_index, x, y), None, true);
                }
            }
        }

        for &page_index in &pages_to_notify {
            self.notify_all_page(page_index, ChangeFlags::HIGHLIGHTS);
        }
        self.signals.search_finished(
            id,
            if found_match { SearchStatus::MatchFound } else { SearchStatus::NoMatchFound },
        );
    }

    fn step_google(
        &mut self,
        id: SearchId,
        current_page: usize,
        match_all: bool,
        mut matches: BTreeMap<usize, Vec<(RegularArea, Color)>>,
        mut pages_to_notify: BTreeSet<usize>,
    ) {
        if self.search_cancelled || !self.searches.contains_key(&id) {
            self.finish_search_cancelled(id);
            return;
        }
        let Some(search) = self.searches.get(&id) else { return };
        let query = search.cached_query.clone();
        let case_sensitive = search.cached_case_sensitive;
        let color = search.cached_color;
        let words: Vec<String> = query.split_whitespace().map(str::to_string).collect();

        if current_page < self.pages.len() {
            self.request_text_page(current_page);
            if let Some(page) = self.pages.get(current_page) {
                let word_count = words.len();
                let mut all_matched = word_count > 0;
                let mut any_matched = false;
                let mut page_hits: Vec<(RegularArea, Color)> = Vec::new();

                for (index, word) in words.iter().enumerate() {
                    let highlight_color = word_color(color, index, word_count);
                    let hits = page
                        .text_page()
                        .map(|text| text.all_matches(word, case_sensitive))
                        .unwrap_or_default();
                    let word_matched = !hits.is_empty();
                    for hit in hits {
                        page_hits.push((hit, highlight_color));
                    }
                    all_matched = all_matched && word_matched;
                    any_matched = any_matched || word_matched;
                }

                let qualifies = if match_all { all_matched } else { any_matched };
                if qualifies && !page_hits.is_empty() {
                    matches.insert(current_page, page_hits);
                }
            }
            self.tasks.push_back(CoreTask::Search(SearchStep::Google {
                id,
                current_page: current_page + 1,
                match_all,
                matches,
                pages_to_notify,
            }));
            return;
        }

        let found = !matches.is_empty();
        for (page_index, hits) in matches {
            if let Some(page) = self.pages.get_mut(page_index) {
                for (area, highlight_color) in hits {
                    page.set_highlight(id, area, highlight_color);
                }
            }
            if let Some(search) = self.searches.get_mut(&id) {
                search.highlighted_pages.insert(page_index);
            }
            pages_to_notify.insert(page_index);
        }
        if let Some(search) = self.searches.get_mut(&id) {
            search.is_currently_searching = false;
        }

        self.notify_setup_all(SetupFlags::NONE);
        for &page_index in &pages_to_notify {
            self.notify_all_page(page_index, ChangeFlags::HIGHLIGHTS);
        }
        self.signals.search_finished(
            id,
            if found { SearchStatus::MatchFound } else { SearchStatus::NoMatchFound },
        );
    }

    // ------------------------------------------------------------------
    // Annotations, selections, bounding boxes

    fn can_add_annotations_natively(&mut self) -> bool {
        self.generator
            .as_mut()
            .and_then(|g| g.save_interface())
            .map(|save| save.supports_native_annotations())
            .unwrap_or(false)
    }

    pub fn add_page_annotation(&mut self, page_index: usize, annotation: Annotation) {
        if self.generator.is_none() || self.pages.get(page_index).is_none() {
            return;
        }
        self.note_annotation_edit();
        if let Some(page) = self.pages.get_mut(page_index) {
            page.add_annotation(annotation);
        }
        self.notify_annotation_changes(page_index);
    }

    pub fn remove_page_annotation(&mut self, page_index: usize, annotation: &Annotation) -> bool {
        if self.generator.is_none() {
            return false;
        }
        let removed = self
            .pages
            .get_mut(page_index)
            .map(|page| page.remove_annotation(annotation))
            .unwrap_or(false);
        if removed {
            self.note_annotation_edit();
            self.notify_annotation_changes(page_index);
        }
        removed
    }

    /// Annotation edits on an archive-backed document without native save
    /// support only survive a Save As; warn about that once.
    fn note_annotation_edit(&mut self) {
        if self.archive.is_some() && !self.can_add_annotations_natively() {
            self.annotations_need_save_as = true;
            if !self.warned_annotations_save_as {
                self.signals.warning(
                    "annotations on this document can only be kept by saving a new archive",
                );
                self.warned_annotations_save_as = true;
            }
        }
    }

    fn notify_annotation_changes(&self, page_index: usize) {
        let mut flags = ChangeFlags::ANNOTATIONS;
        if self.annotations_need_save_as {
            flags = flags | ChangeFlags::NEED_SAVE_AS;
        }
        self.notify_all_page(page_index, flags);
    }

    pub fn set_page_text_selection(
        &mut self,
        page_index: usize,
        selection: Option<(RegularArea, Color)>,
    ) {
        let Some(page) = self.pages.get_mut(page_index) else { return };
        match selection {
            Some((area, color)) => page.set_text_selection(area, color),
            None => page.delete_text_selections(),
        }
        self.notify_all_page(page_index, ChangeFlags::TEXT_SELECTION);
    }

    pub fn set_page_bounding_box(&mut self, page_index: usize, bounding_box: NormalizedRect) {
        let Some(page) = self.pages.get_mut(page_index) else { return };
        if page.bounding_box() == Some(bounding_box) {
            return;
        }
        page.set_bounding_box(Some(bounding_box));
        self.notify_all_page(page_index, ChangeFlags::BOUNDING_BOX);
    }

    pub fn set_page_bookmarked(&mut self, page_index: usize, bookmarked: bool) {
        if let Some(page) = self.pages.get_mut(page_index) {
            page.set_bookmarked(bookmarked);
        }
    }

    // ------------------------------------------------------------------
    // Rotation and page sizes

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.set_rotation_internal(rotation, true);
    }

    fn set_rotation_internal(&mut self, rotation: Rotation, notify: bool) {
        if rotation == self.rotation || self.generator.is_none() {
            return;
        }
        let old = self.rotation;
        self.rotation = rotation;

        if let Some(generator) = self.generator.as_mut() {
            generator.rotation_changed(rotation, old);
        }
        for page in &mut self.pages {
            page.rotate_at(rotation);
        }
        debug!("rotation changed to {rotation:?}");

        if notify {
            self.notify_setup_all(SetupFlags::NEW_LAYOUT_FOR_PAGES);
            self.notify_contents_cleared_all(ChangeFlags::PIXMAP | ChangeFlags::HIGHLIGHTS);
            // Pixmap re-rendering completes page by page.
            for page_index in 0..self.pages.len() {
                self.tasks.push_back(CoreTask::RotationFinished(page_index));
            }
        }
    }

    pub fn set_page_size(&mut self, page_index: usize, size: PageSize) {
        let supported = self
            .generator
            .as_ref()
            .map(|g| g.has_feature(GeneratorFeature::PageSizes))
            .unwrap_or(false);
        if !supported {
            return;
        }
        let Some(page) = self.pages.get_mut(page_index) else { return };
        let old = page.size();
        if old == size {
            return;
        }
        page.change_size(size);

        if let Some(generator) = self.generator.as_mut() {
            generator.page_size_changed(size, old);
        }
        let observer_ids: Vec<ObserverId> = self.observers.keys().copied().collect();
        for observer_id in observer_ids {
            self.allocations.remove_entry(observer_id, page_index);
        }

        self.notify_setup_all(SetupFlags::NEW_LAYOUT_FOR_PAGES);
        self.notify_contents_cleared_all(ChangeFlags::PIXMAP | ChangeFlags::HIGHLIGHTS);
    }

    /// Re-request, forced, every pixmap a page currently holds. Used when
    /// rendered content changed under the cache.
    pub fn refresh_pixmaps(&mut self, page_index: usize) {
        let Some(page) = self.pages.get(page_index) else { return };
        let mut requests = Vec::new();
        for (observer_id, pixmap, rotation) in page.pixmap_observers() {
            let (mut width, mut height) = (pixmap.width, pixmap.height);
            if rotation.swaps_axes() {
                std::mem::swap(&mut width, &mut height);
            }
            requests.push(
                PixmapRequest::new(observer_id, page_index, width, height)
                    .with_priority(1)
                    .forced(),
            );
        }
        if !requests.is_empty() {
            self.request_pixmaps(requests, PixmapRequestFlags::NoOption);
        }
    }

    // ------------------------------------------------------------------
    // Export and print

    pub fn export_formats(&self) -> Vec<crate::generator::ExportFormat> {
        self.generator.as_ref().map(|g| g.export_formats()).unwrap_or_default()
    }

    pub fn export_to(
        &mut self,
        format: &crate::generator::ExportFormat,
        path: &Path,
    ) -> DocumentResult<()> {
        match self.generator.as_mut() {
            Some(generator) => generator.export_to(format, path),
            None => Err(DocumentError::ExportUnavailable),
        }
    }

    /// Relay a print request, mapping failures onto the fixed taxonomy.
    pub fn print(&mut self, pages: &[usize]) -> DocumentResult<()> {
        let Some(print) = self.generator.as_mut().and_then(|g| g.print_interface()) else {
            return Err(DocumentError::PrintFailed(crate::error::PrintError::InvalidState));
        };
        print.print(pages).map_err(DocumentError::PrintFailed)
    }

    // ------------------------------------------------------------------
    // Fonts

    /// Start collecting font information, one page per pump pass.
    pub fn read_fonts(&mut self) {
        if self.generator.is_none() {
            return;
        }
        if self.fonts_cached {
            for font in self.fonts_cache.clone() {
                self.signals.got_font(font);
            }
            self.signals.font_reading_ended();
            return;
        }
        let supported = self
            .generator
            .as_ref()
            .map(|g| g.has_feature(GeneratorFeature::FontInfo))
            .unwrap_or(false);
        if !supported {
            self.signals.font_reading_ended();
            return;
        }
        if self.font_reading_page.is_some() {
            return;
        }
        self.font_reading_page = Some(0);
        self.tasks.push_back(CoreTask::FontStep);
    }

    fn font_step(&mut self) {
        let Some(page_index) = self.font_reading_page else { return };
        if page_index >= self.pages.len() {
            self.fonts_cached = true;
            self.font_reading_page = None;
            self.signals.font_reading_ended();
            return;
        }
        let fonts =
            self.generator.as_mut().map(|g| g.font_info(page_index)).unwrap_or_default();
        for font in fonts {
            self.fonts_cache.push(font.clone());
            self.signals.got_font(font);
        }
        self.signals.font_reading_progress(page_index + 1);
        self.font_reading_page = Some(page_index + 1);
        self.tasks.push_back(CoreTask::FontStep);
    }

    // ------------------------------------------------------------------
    // Metadata persistence

    /// Write the sidecar. Called on close and by the host's save timer.
    pub fn save_document_info(&self) -> DocumentResult<()> {
        let Some(path) = &self.sidecar_path else { return Ok(()) };
        self.storage
            .ensure_layout()
            .map_err(|err| DocumentError::Io(std::io::Error::other(err.to_string())))?;
        let save_what = PageItems::ALL.with_original(self.annotations_need_save_as);
        let bytes = self.document_info_bytes(save_what)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn document_info_bytes(&self, save_what: PageItems) -> DocumentResult<Vec<u8>> {
        let url = match (&self.archive_metadata_url, &self.url) {
            // Keep the url the archive metadata carried, so an unedited
            // archive re-saves byte-identically.
            (Some(from_archive), _) if self.archive.is_some() => from_archive.clone(),
            (_, Some(url)) => url.to_string_lossy().into_owned(),
            _ => String::new(),
        };
        metadata::write_document_info(&metadata::DocumentInfoData {
            url: &url,
            pages: &self.pages,
            rotation: self.rotation,
            history: self.history.saved_window(),
            views: &self.views,
            save_what,
        })
    }

    fn load_document_info_from(&mut self, path: &Path) {
        let Ok(bytes) = std::fs::read(path) else { return };
        match metadata::parse_document_info(&bytes) {
            Ok(info) => self.apply_document_info(info),
            // Malformed metadata means no metadata.
            Err(err) => debug!("ignoring malformed metadata at {}: {err}", path.display()),
        }
    }

    fn apply_document_info(&mut self, info: LoadedInfo) {
        self.archive_metadata_url = info.url;
        if let Some(rotation) = info.rotation {
            self.set_rotation_internal(rotation, false);
        }
        if let Some(history) = info.history {
            self.history.restore(history);
        }
        for loaded in info.pages {
            if let Some(page) = self.pages.get_mut(loaded.number) {
                page.set_bookmarked(loaded.bookmarked);
                for annotation in loaded.annotations {
                    page.add_annotation(annotation);
                }
            }
        }
        for loaded in info.views {
            if let Some(view) = self.views.iter_mut().find(|v| v.name() == loaded.name) {
                if let Some((value, modality)) = loaded.zoom {
                    if let Some(zoom) = view.zoom.as_mut() {
                        if zoom.writable() {
                            zoom.value = value;
                        }
                    }
                    if let Some(zoom_modality) = view.zoom_modality.as_mut() {
                        if zoom_modality.writable() {
                            zoom_modality.value = modality;
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Archive save

    /// Bundle the document and its metadata into an archive at `path`.
    pub fn save_document_archive(&mut self, path: &Path) -> DocumentResult<()> {
        if self.generator.is_none() {
            return Err(DocumentError::SaveUnsupported);
        }

        let document_file_name = match (&self.archived_file_name, &self.url) {
            (Some(name), _) => name.clone(),
            (None, Some(url)) => url
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .ok_or(DocumentError::SaveUnsupported)?,
            (None, None) => return Err(DocumentError::SaveUnsupported),
        };
        if document_file_name == "-" {
            return Err(DocumentError::SaveUnsupported);
        }

        let mut source =
            self.doc_file_name.clone().ok_or(DocumentError::SaveUnsupported)?;

        // Prefer archiving a copy with changes applied natively; fall back
        // to the original file when the generator cannot save.
        let mut saved_natively = false;
        let mut saved_copy: Option<tempfile::NamedTempFile> = None;
        if let Some(save) = self.generator.as_mut().and_then(|g| g.save_interface()) {
            if save.can_save_changes() {
                let temp = tempfile::NamedTempFile::new()?;
                match save.save_changes(temp.path()) {
                    Ok(()) => {
                        source = temp.path().to_path_buf();
                        saved_copy = Some(temp);
                        saved_natively = true;
                    }
                    Err(err) => {
                        warn!("saving changes failed: {err}; archiving the original file");
                    }
                }
            }
        }

        let save_what = if saved_natively {
            PageItems::ANNOTATIONS
        } else {
            PageItems::ALL.with_original(self.annotations_need_save_as)
        };
        let metadata_bytes = self.document_info_bytes(save_what)?;

        archive::write_archive(path, &document_file_name, &source, &metadata_bytes)?;
        drop(saved_copy);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Task pump

    /// Run the tasks posted so far, delivering finished background renders
    /// first. Returns how many items were processed; tasks posted during
    /// the pass wait for the next call, so cancellation and host input can
    /// interleave.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;

        loop {
            let completed = self.generator.as_mut().and_then(|g| g.take_completed());
            match completed {
                Some((request, pixmap)) => {
                    self.request_done(request, pixmap);
                    processed += 1;
                }
                None => break,
            }
        }

        let pending = self.tasks.len();
        for _ in 0..pending {
            let Some(task) = self.tasks.pop_front() else { break };
            match task {
                CoreTask::Dispatch => self.send_generator_request(),
                CoreTask::Search(step) => self.run_search_step(step),
                CoreTask::RotationFinished(page_index) => {
                    self.signals.rotation_finished(page_index);
                    self.notify_all_page(
                        page_index,
                        ChangeFlags::PIXMAP | ChangeFlags::ANNOTATIONS,
                    );
                }
                CoreTask::FontStep => self.font_step(),
            }
            processed += 1;
        }
        processed
    }
}
