//! End-to-end tests of the document core against fake generators and
//! recording observers.

use quire_cache::FixedMemory;
use quire_core::{
    Annotation, AnnotationKind, ChangeFlags, CoreSettings, Document, DocumentObserver,
    DocumentSignals, FontInfo, Generator, GeneratorFeature, GeneratorRegistry, GeneratorReply,
    Page, Pixmap, SearchId, SearchStatus, SearchType, SetupFlags, TextEntity, TextPage,
};
use quire_core::{MetaDataValue, ViewportAnchor};
use quire_doc_model::{Color, NormalizedRect, PageSize, Rotation};
use quire_scheduler::{PixmapRequest, PixmapRequestFlags};
use quire_storage::Storage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const GB: u64 = 1024 * 1024 * 1024;

// ----------------------------------------------------------------------
// Test doubles

#[derive(Default, Clone)]
struct GeneratorLog {
    rendered: Arc<Mutex<Vec<PixmapRequest>>>,
    text_pages: Arc<Mutex<Vec<usize>>>,
    font_pages: Arc<Mutex<Vec<usize>>>,
    closed: Arc<AtomicBool>,
}

impl GeneratorLog {
    fn rendered(&self) -> Vec<PixmapRequest> {
        self.rendered.lock().unwrap().clone()
    }

    fn text_pages(&self) -> Vec<usize> {
        self.text_pages.lock().unwrap().clone()
    }
}

/// Synchronous generator: renders inline and answers `Ready`.
struct FakeGenerator {
    sizes: Vec<PageSize>,
    text: BTreeMap<usize, Vec<TextEntity>>,
    fonts: BTreeMap<usize, Vec<FontInfo>>,
    log: GeneratorLog,
}

impl FakeGenerator {
    fn new(sizes: Vec<PageSize>, log: GeneratorLog) -> Self {
        Self { sizes, text: BTreeMap::new(), fonts: BTreeMap::new(), log }
    }

    fn with_text(mut self, text: BTreeMap<usize, Vec<TextEntity>>) -> Self {
        self.text = text;
        self
    }

    fn with_fonts(mut self, fonts: BTreeMap<usize, Vec<FontInfo>>) -> Self {
        self.fonts = fonts;
        self
    }
}

impl Generator for FakeGenerator {
    fn load_document(&mut self, _path: &Path) -> quire_core::DocumentResult<Vec<Page>> {
        Ok(self.sizes.iter().enumerate().map(|(i, size)| Page::new(i, *size)).collect())
    }

    fn close_document(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }

    fn can_generate_pixmap(&self) -> bool {
        true
    }

    fn generate_pixmap(&mut self, request: PixmapRequest) -> GeneratorReply {
        self.log.rendered.lock().unwrap().push(request.clone());
        GeneratorReply::Ready(Pixmap::new(request.width, request.height))
    }

    fn generate_text_page(&mut self, page: &Page) -> Option<TextPage> {
        self.log.text_pages.lock().unwrap().push(page.index());
        Some(TextPage::new(self.text.get(&page.index()).cloned().unwrap_or_default()))
    }

    fn has_feature(&self, feature: GeneratorFeature) -> bool {
        match feature {
            GeneratorFeature::TextExtraction => true,
            GeneratorFeature::FontInfo => !self.fonts.is_empty(),
            _ => false,
        }
    }

    fn font_info(&mut self, page: usize) -> Vec<FontInfo> {
        self.log.font_pages.lock().unwrap().push(page);
        self.fonts.get(&page).cloned().unwrap_or_default()
    }
}

/// Threaded-style generator: accepts one request and completes it when
/// polled, like a render thread delivering through a channel.
struct DeferredGenerator {
    sizes: Vec<PageSize>,
    pending: Arc<Mutex<Option<PixmapRequest>>>,
    log: GeneratorLog,
}

impl DeferredGenerator {
    fn new(sizes: Vec<PageSize>, log: GeneratorLog) -> Self {
        Self { sizes, pending: Arc::new(Mutex::new(None)), log }
    }
}

impl Generator for DeferredGenerator {
    fn load_document(&mut self, _path: &Path) -> quire_core::DocumentResult<Vec<Page>> {
        Ok(self.sizes.iter().enumerate().map(|(i, size)| Page::new(i, *size)).collect())
    }

    fn close_document(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }

    fn can_generate_pixmap(&self) -> bool {
        self.pending.lock().unwrap().is_none()
    }

    fn generate_pixmap(&mut self, request: PixmapRequest) -> GeneratorReply {
        *self.pending.lock().unwrap() = Some(request);
        GeneratorReply::Deferred
    }

    fn take_completed(&mut self) -> Option<(PixmapRequest, Pixmap)> {
        let request = self.pending.lock().unwrap().take()?;
        self.log.rendered.lock().unwrap().push(request.clone());
        let pixmap = Pixmap::new(request.width, request.height);
        Some((request, pixmap))
    }

    fn wait_completed(&mut self) -> Option<(PixmapRequest, Pixmap)> {
        self.take_completed()
    }

    fn has_feature(&self, feature: GeneratorFeature) -> bool {
        matches!(feature, GeneratorFeature::Threaded)
    }
}

struct FakeRegistry {
    generator: Option<Box<dyn Generator>>,
}

impl FakeRegistry {
    fn new(generator: Box<dyn Generator>) -> Self {
        Self { generator: Some(generator) }
    }
}

impl GeneratorRegistry for FakeRegistry {
    fn candidates(&self, _mime: &str) -> Vec<String> {
        vec!["fake".to_string()]
    }

    fn create(&mut self, _name: &str) -> Option<Box<dyn Generator>> {
        self.generator.take()
    }
}

struct EmptyRegistry;

impl GeneratorRegistry for EmptyRegistry {
    fn candidates(&self, _mime: &str) -> Vec<String> {
        Vec::new()
    }

    fn create(&mut self, _name: &str) -> Option<Box<dyn Generator>> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Notification {
    Setup(usize, SetupFlags),
    Viewport(bool),
    PageChanged(usize, ChangeFlags),
    ContentsCleared(ChangeFlags),
    Zoom(f64),
}

struct RecordingObserver {
    id: u32,
    unloadable: AtomicBool,
    events: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    fn new(id: u32) -> Arc<Self> {
        Arc::new(Self { id, unloadable: AtomicBool::new(true), events: Mutex::new(Vec::new()) })
    }

    fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn pixmap_pages(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Notification::PageChanged(page, flags)
                    if flags.contains(ChangeFlags::PIXMAP) =>
                {
                    Some(page)
                }
                _ => None,
            })
            .collect()
    }
}

impl DocumentObserver for RecordingObserver {
    fn observer_id(&self) -> u32 {
        self.id
    }

    fn can_unload_pixmap(&self, _page: usize) -> bool {
        self.unloadable.load(Ordering::SeqCst)
    }

    fn notify_setup(&self, pages: &[Page], flags: SetupFlags) {
        self.events.lock().unwrap().push(Notification::Setup(pages.len(), flags));
    }

    fn notify_viewport_changed(&self, smooth_move: bool) {
        self.events.lock().unwrap().push(Notification::Viewport(smooth_move));
    }

    fn notify_page_changed(&self, page: usize, flags: ChangeFlags) {
        self.events.lock().unwrap().push(Notification::PageChanged(page, flags));
    }

    fn notify_contents_cleared(&self, flags: ChangeFlags) {
        self.events.lock().unwrap().push(Notification::ContentsCleared(flags));
    }

    fn notify_zoom(&self, factor: f64) {
        self.events.lock().unwrap().push(Notification::Zoom(factor));
    }
}

#[derive(Default)]
struct RecordingSignals {
    finished: Mutex<Vec<(SearchId, SearchStatus)>>,
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    font_progress: Mutex<Vec<usize>>,
    font_ended: AtomicBool,
}

struct SharedSignals(Arc<RecordingSignals>);

impl DocumentSignals for SharedSignals {
    fn error(&self, message: &str, _duration_ms: u64) {
        self.0.errors.lock().unwrap().push(message.to_string());
    }

    fn warning(&self, message: &str) {
        self.0.warnings.lock().unwrap().push(message.to_string());
    }

    fn search_finished(&self, id: SearchId, status: SearchStatus) {
        self.0.finished.lock().unwrap().push((id, status));
    }

    fn font_reading_progress(&self, pages_done: usize) {
        self.0.font_progress.lock().unwrap().push(pages_done);
    }

    fn font_reading_ended(&self) {
        self.0.font_ended.store(true, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------
// Fixture

struct Fixture {
    document: Document,
    signals: Arc<RecordingSignals>,
    log: GeneratorLog,
    doc_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn a4() -> PageSize {
    PageSize::new(595.0, 842.0)
}

fn line(text: &str, top: f64) -> TextEntity {
    TextEntity::new(text, NormalizedRect::new(0.1, top, 0.9, top + 0.05))
}

fn fixture_with(
    settings: CoreSettings,
    build: impl FnOnce(GeneratorLog) -> Box<dyn Generator>,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let doc_path = dir.path().join("doc.pdf");
    std::fs::write(&doc_path, b"%PDF-1.4 test body").unwrap();

    let signals = Arc::new(RecordingSignals::default());
    let log = GeneratorLog::default();
    let storage = Storage::with_root(dir.path().join("data"));
    let mut document = Document::new(settings, storage)
        .with_probe(Box::new(FixedMemory::new(4 * GB, 4 * GB)))
        .with_signals(Box::new(SharedSignals(signals.clone())));

    let mut registry = FakeRegistry::new(build(log.clone()));
    document.open_document(&doc_path, "application/pdf", &mut registry).unwrap();

    Fixture { document, signals, log, doc_path, _dir: dir }
}

fn simple_fixture(page_count: usize) -> Fixture {
    fixture_with(CoreSettings::default(), move |log| {
        Box::new(FakeGenerator::new(vec![a4(); page_count], log))
    })
}

fn pump_until_idle(document: &mut Document) -> usize {
    let mut passes = 0;
    while document.process_pending() > 0 {
        passes += 1;
        assert!(passes < 1000, "document never went idle");
    }
    passes
}

fn megapixmap_request(observer: u32, page: usize) -> PixmapRequest {
    // 1000x1000 at 4 bytes per pixel: 4 MB.
    PixmapRequest::new(observer, page, 1000, 1000).with_priority(1)
}

// ----------------------------------------------------------------------
// Open / close

#[test]
fn open_failures_revert_to_empty_state() {
    let dir = tempfile::tempdir().unwrap();
    let signals = Arc::new(RecordingSignals::default());
    let mut document =
        Document::new(CoreSettings::default(), Storage::with_root(dir.path().join("data")))
            .with_signals(Box::new(SharedSignals(signals.clone())));

    // Unreadable file.
    let missing = dir.path().join("missing.pdf");
    let err = document.open_document(&missing, "application/pdf", &mut EmptyRegistry);
    assert!(err.is_err());
    assert!(!document.is_opened());

    // No generator for the MIME type.
    let real = dir.path().join("real.pdf");
    std::fs::write(&real, b"x").unwrap();
    let err = document.open_document(&real, "application/pdf", &mut EmptyRegistry);
    assert!(err.is_err());
    assert!(!document.is_opened());
    assert_eq!(signals.errors.lock().unwrap().len(), 2);
}

#[test]
fn close_leaves_no_state_behind() {
    let mut fixture = simple_fixture(3);
    let observer = RecordingObserver::new(1);
    fixture.document.add_observer(observer.clone());

    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture.document.search_text(
        1,
        "anything",
        true,
        false,
        SearchType::AllDocument,
        false,
        Color::YELLOW,
        true,
    );

    assert!(fixture.document.total_allocated_bytes() > 0);
    observer.clear();

    fixture.document.close_document();

    assert!(!fixture.document.is_opened());
    assert_eq!(fixture.document.page_count(), 0);
    assert_eq!(fixture.document.total_allocated_bytes(), 0);
    assert_eq!(fixture.document.pending_request_count(), 0);
    assert!(!fixture.document.has_pending_tasks());
    assert!(fixture.log.closed.load(Ordering::SeqCst));

    // Observers got the empty page list.
    assert!(observer
        .events()
        .contains(&Notification::Setup(0, SetupFlags::DOCUMENT_CHANGED)));
}

#[test]
fn close_drains_in_flight_deferred_render() {
    let mut fixture = fixture_with(CoreSettings::default(), |log| {
        Box::new(DeferredGenerator::new(vec![a4(); 2], log))
    });
    let observer = RecordingObserver::new(1);
    fixture.document.add_observer(observer);

    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    // The request is now in flight inside the "render thread".
    assert_eq!(fixture.document.total_allocated_bytes(), 0);

    fixture.document.close_document();

    assert!(!fixture.document.is_opened());
    assert_eq!(fixture.document.total_allocated_bytes(), 0);
    assert!(fixture.log.closed.load(Ordering::SeqCst));
}

// ----------------------------------------------------------------------
// Dispatch, accounting, eviction

#[test]
fn pixmap_accounting_matches_descriptor_sum() {
    let mut fixture = simple_fixture(3);
    let first = RecordingObserver::new(1);
    let second = RecordingObserver::new(2);
    fixture.document.add_observer(first.clone());
    fixture.document.add_observer(second.clone());

    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(2, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 1)], PixmapRequestFlags::RemoveAllPrevious);

    assert_eq!(fixture.document.allocated_pixmap_count(), 3);
    assert_eq!(fixture.document.total_allocated_bytes(), 3 * 4_000_000);

    // Re-rendering the same (observer, page) replaces its descriptor.
    fixture.document.request_pixmaps(
        vec![PixmapRequest::new(1, 0, 500, 500).with_priority(1).forced()],
        PixmapRequestFlags::NoOption,
    );
    assert_eq!(fixture.document.allocated_pixmap_count(), 3);
    assert_eq!(fixture.document.total_allocated_bytes(), 2 * 4_000_000 + 1_000_000);
}

#[test]
fn queued_duplicates_are_coalesced() {
    let mut fixture = fixture_with(CoreSettings::default(), |log| {
        Box::new(DeferredGenerator::new(vec![a4(); 4], log))
    });
    fixture.document.add_observer(RecordingObserver::new(1));

    // First request goes in flight; the two follow-ups for the same page
    // collapse into one queue entry.
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture.document.request_pixmaps(
        vec![
            PixmapRequest::new(1, 1, 150, 150).with_priority(1),
            PixmapRequest::new(1, 1, 160, 160).with_priority(1),
        ],
        PixmapRequestFlags::NoOption,
    );

    assert_eq!(fixture.document.pending_request_count(), 1);
}

#[test]
fn dispatch_order_follows_priorities() {
    let mut fixture = fixture_with(CoreSettings::default(), |log| {
        Box::new(DeferredGenerator::new(vec![a4(); 4], log))
    });
    let observer = RecordingObserver::new(1);
    fixture.document.add_observer(observer.clone());

    // One batch, one page per priority so nothing coalesces.
    fixture.document.request_pixmaps(
        vec![
            PixmapRequest::new(1, 0, 100, 100).with_priority(3),
            PixmapRequest::new(1, 1, 100, 100).with_priority(0),
            PixmapRequest::new(1, 2, 100, 100).with_priority(5),
            PixmapRequest::new(1, 3, 100, 100).with_priority(1),
        ],
        PixmapRequestFlags::RemoveAllPrevious,
    );

    pump_until_idle(&mut fixture.document);

    let priorities: Vec<i32> =
        fixture.log.rendered().into_iter().map(|request| request.priority).collect();
    assert_eq!(priorities, vec![5, 3, 1, 0]);
    assert_eq!(observer.pixmap_pages(), vec![2, 0, 3, 1]);
}

#[test]
fn oversize_requests_are_dropped_with_one_warning() {
    let mut fixture = simple_fixture(1);
    fixture.document.add_observer(RecordingObserver::new(1));

    // 25M pixels exceeds the budget.
    fixture.document.request_pixmaps(
        vec![PixmapRequest::new(1, 0, 5000, 5000).with_priority(1)],
        PixmapRequestFlags::RemoveAllPrevious,
    );

    assert!(fixture.log.rendered().is_empty());
    assert_eq!(fixture.document.pending_request_count(), 0);
    assert_eq!(fixture.signals.warnings.lock().unwrap().len(), 1);

    // The warning is per session, not per request.
    fixture.document.request_pixmaps(
        vec![PixmapRequest::new(1, 0, 6000, 6000).with_priority(1)],
        PixmapRequestFlags::RemoveAllPrevious,
    );
    assert_eq!(fixture.signals.warnings.lock().unwrap().len(), 1);
}

#[test]
fn low_profile_cleanup_empties_the_cache() {
    let mut fixture = simple_fixture(2);
    let first = RecordingObserver::new(1);
    let second = RecordingObserver::new(2);
    fixture.document.add_observer(first.clone());
    fixture.document.add_observer(second.clone());

    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(2, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 1)], PixmapRequestFlags::RemoveAllPrevious);
    assert_eq!(fixture.document.allocated_pixmap_count(), 3);

    first.clear();
    second.clear();

    let mut settings = CoreSettings::default();
    settings.memory_level = quire_cache::MemoryProfile::Low;
    fixture.document.settings_changed(settings);

    assert_eq!(fixture.document.allocated_pixmap_count(), 0);
    assert_eq!(fixture.document.total_allocated_bytes(), 0);
    assert!(fixture.document.page(0).map(|p| !p.has_pixmap(1, 1000, 1000)).unwrap_or(false));

    let eviction_notices =
        first.pixmap_pages().len() + second.pixmap_pages().len();
    assert_eq!(eviction_notices, 3);
}

#[test]
fn eviction_respects_can_unload() {
    let mut fixture = simple_fixture(2);
    let pinned = RecordingObserver::new(1);
    pinned.unloadable.store(false, Ordering::SeqCst);
    let loose = RecordingObserver::new(2);
    fixture.document.add_observer(pinned.clone());
    fixture.document.add_observer(loose.clone());

    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(2, 1)], PixmapRequestFlags::RemoveAllPrevious);

    let mut settings = CoreSettings::default();
    settings.memory_level = quire_cache::MemoryProfile::Low;
    fixture.document.settings_changed(settings);

    // Observer 1 refused to unload; its pixmap survives.
    assert_eq!(fixture.document.allocated_pixmap_count(), 1);
    assert!(fixture.document.page(0).unwrap().has_pixmap(1, 1000, 1000));
    assert!(!fixture.document.page(1).unwrap().has_pixmap(2, 1000, 1000));
}

#[test]
fn removing_an_observer_only_touches_its_pixmaps() {
    let mut fixture = simple_fixture(3);
    let first = RecordingObserver::new(1);
    let second = RecordingObserver::new(2);
    fixture.document.add_observer(first);
    fixture.document.add_observer(second);

    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 1)], PixmapRequestFlags::RemoveAllPrevious);
    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(2, 2)], PixmapRequestFlags::RemoveAllPrevious);

    fixture.document.remove_observer(1);

    assert_eq!(fixture.document.allocated_pixmap_count(), 1);
    assert_eq!(fixture.document.total_allocated_bytes(), 4_000_000);
    assert!(!fixture.document.page(0).unwrap().has_pixmap(1, 1000, 1000));
    assert!(!fixture.document.page(1).unwrap().has_pixmap(1, 1000, 1000));
    assert!(fixture.document.page(2).unwrap().has_pixmap(2, 1000, 1000));
}

#[test]
fn disabling_threading_coerces_requests_to_synchronous() {
    let mut settings = CoreSettings::default();
    settings.enable_threading = false;
    let mut fixture =
        fixture_with(settings, |log| Box::new(FakeGenerator::new(vec![a4()], log)));
    fixture.document.add_observer(RecordingObserver::new(1));

    fixture.document.request_pixmaps(
        vec![PixmapRequest::new(1, 0, 200, 300).with_priority(2)],
        PixmapRequestFlags::RemoveAllPrevious,
    );

    let rendered = fixture.log.rendered();
    assert_eq!(rendered.len(), 1);
    assert!(!rendered[0].asynchronous);
}

#[test]
fn refresh_pixmaps_rerenders_held_pixmaps() {
    let mut fixture = simple_fixture(1);
    fixture.document.add_observer(RecordingObserver::new(1));

    fixture
        .document
        .request_pixmaps(vec![megapixmap_request(1, 0)], PixmapRequestFlags::RemoveAllPrevious);
    assert_eq!(fixture.log.rendered().len(), 1);

    // The page already has a matching pixmap, so only a forced request can
    // re-render it.
    fixture.document.refresh_pixmaps(0);
    assert_eq!(fixture.log.rendered().len(), 2);
    assert!(fixture.log.rendered()[1].force);
}

#[test]
fn rotated_documents_swap_request_dimensions() {
    let mut fixture = simple_fixture(1);
    fixture.document.add_observer(RecordingObserver::new(1));

    fixture.document.set_rotation(Rotation::D90);
    pump_until_idle(&mut fixture.document);

    fixture.document.request_pixmaps(
        vec![PixmapRequest::new(1, 0, 100, 200).with_priority(1)],
        PixmapRequestFlags::RemoveAllPrevious,
    );

    let rendered = fixture.log.rendered();
    assert_eq!((rendered[0].width, rendered[0].height), (200, 100));
}

// ----------------------------------------------------------------------
// Viewport and history

#[test]
fn viewport_page_is_clamped_into_the_document() {
    let mut fixture = simple_fixture(3);
    fixture.document.set_viewport_page(99, None, false);
    assert_eq!(fixture.document.current_viewport().page(), 2);

    fixture.document.set_viewport_page(3, None, false);
    assert_eq!(fixture.document.current_viewport().page(), 2);
}

#[test]
fn viewport_changes_promote_cached_pages() {
    let mut fixture = simple_fixture(3);
    let observer = RecordingObserver::new(1);
    fixture.document.add_observer(observer.clone());

    for page in 0..3 {
        fixture.document.request_pixmaps(
            vec![megapixmap_request(1, page)],
            PixmapRequestFlags::NoOption,
        );
    }

    // Viewing page 0 makes it most recently used, so a Low cleanup that is
    // interrupted after two evictions would hit pages 1 and 2 first. Here we
    // simply verify the full eviction order through notifications.
    fixture.document.set_viewport_page(0, None, false);
    observer.clear();

    let mut settings = CoreSettings::default();
    settings.memory_level = quire_cache::MemoryProfile::Low;
    fixture.document.settings_changed(settings);

    assert_eq!(observer.pixmap_pages(), vec![1, 2, 0]);
}

#[test]
fn exclude_observer_is_skipped_on_viewport_and_zoom() {
    let mut fixture = simple_fixture(2);
    let source = RecordingObserver::new(1);
    let other = RecordingObserver::new(2);
    fixture.document.add_observer(source.clone());
    fixture.document.add_observer(other.clone());
    source.clear();
    other.clear();

    fixture.document.set_viewport_page(1, Some(1), true);
    fixture.document.set_zoom(1.5, Some(1));

    assert!(source.events().iter().all(|event| !matches!(
        event,
        Notification::Viewport(_) | Notification::Zoom(_)
    )));
    assert!(other.events().contains(&Notification::Viewport(true)));
    assert!(other.events().contains(&Notification::Zoom(1.5)));
}

#[test]
fn back_and_forward_navigation_notify_observers() {
    let mut fixture = simple_fixture(3);
    let observer = RecordingObserver::new(1);
    fixture.document.add_observer(observer.clone());

    fixture.document.set_viewport_page(0, None, false);
    fixture.document.set_viewport_page(1, None, false);
    fixture.document.set_viewport_page(2, None, false);

    fixture.document.set_prev_viewport();
    assert_eq!(fixture.document.current_viewport().page(), 1);
    fixture.document.set_next_viewport();
    assert_eq!(fixture.document.current_viewport().page(), 2);
}

// ----------------------------------------------------------------------
// Search

fn search_fixture() -> Fixture {
    fixture_with(CoreSettings::default(), |log| {
        let mut text = BTreeMap::new();
        text.insert(0, vec![line("foo fighters on stage", 0.1)]);
        text.insert(1, vec![line("nothing to see here", 0.1)]);
        text.insert(2, vec![line("still nothing", 0.1)]);
        Box::new(FakeGenerator::new(vec![a4(); 3], log).with_text(text))
    })
}

#[test]
fn next_match_wraps_to_find_the_only_occurrence() {
    let mut fixture = search_fixture();
    fixture.document.set_viewport_page(2, None, false);

    fixture.document.search_text(
        1,
        "foo",
        false,
        false,
        SearchType::NextMatch,
        true,
        Color::RED,
        true,
    );
    let passes = pump_until_idle(&mut fixture.document);

    // Page 2 first, then wrap to page 0: two text extractions, bounded
    // continuations.
    assert_eq!(fixture.log.text_pages(), vec![2, 0]);
    assert!(passes <= 2 * 3);

    assert_eq!(
        fixture.signals.finished.lock().unwrap().as_slice(),
        &[(1, SearchStatus::MatchFound)]
    );
    assert!(fixture.document.page(0).unwrap().has_highlights(1));

    let viewport = *fixture.document.current_viewport();
    assert_eq!(viewport.page(), 0);
    let re_pos = viewport.re_pos.expect("search moves the viewport to the match");
    assert_eq!(re_pos.anchor, ViewportAnchor::Center);

    let search = fixture.document.running_search(1).unwrap();
    assert!(!search.is_currently_searching());
    assert_eq!(search.highlighted_pages().iter().copied().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn next_match_without_matches_reports_no_match() {
    let mut fixture = search_fixture();
    fixture.document.search_text(
        7,
        "unicorn",
        true,
        false,
        SearchType::NextMatch,
        false,
        Color::RED,
        true,
    );
    let passes = pump_until_idle(&mut fixture.document);

    assert!(passes <= 2 * 3 + 1);
    assert_eq!(
        fixture.signals.finished.lock().unwrap().as_slice(),
        &[(7, SearchStatus::NoMatchFound)]
    );
}

#[test]
fn all_document_search_highlights_every_occurrence() {
    let mut fixture = fixture_with(CoreSettings::default(), |log| {
        let mut text = BTreeMap::new();
        text.insert(0, vec![line("the cat and the hat", 0.1)]);
        text.insert(1, vec![line("the end", 0.1)]);
        Box::new(FakeGenerator::new(vec![a4(); 2], log).with_text(text))
    });

    fixture.document.search_text(
        3,
        "the",
        true,
        false,
        SearchType::AllDocument,
        false,
        Color::YELLOW,
        true,
    );
    pump_until_idle(&mut fixture.document);

    assert_eq!(
        fixture.signals.finished.lock().unwrap().as_slice(),
        &[(3, SearchStatus::MatchFound)]
    );
    assert_eq!(fixture.document.page(0).unwrap().highlights(3).len(), 2);
    assert_eq!(fixture.document.page(1).unwrap().highlights(3).len(), 1);
}

#[test]
fn cancellation_interrupts_between_pages() {
    let mut fixture = search_fixture();
    fixture.document.search_text(
        2,
        "nothing",
        true,
        false,
        SearchType::AllDocument,
        false,
        Color::YELLOW,
        true,
    );

    // One continuation runs, then the cancel flag is observed.
    fixture.document.process_pending();
    fixture.document.cancel_search();
    pump_until_idle(&mut fixture.document);

    assert_eq!(
        fixture.signals.finished.lock().unwrap().as_slice(),
        &[(2, SearchStatus::SearchCancelled)]
    );
    assert!(!fixture.document.page(1).unwrap().has_highlights(2));
}

#[test]
fn google_all_requires_every_word_on_the_page() {
    let mut fixture = fixture_with(CoreSettings::default(), |log| {
        let mut text = BTreeMap::new();
        text.insert(0, vec![line("apple banana", 0.1)]);
        text.insert(1, vec![line("apple only", 0.1)]);
        Box::new(FakeGenerator::new(vec![a4(); 2], log).with_text(text))
    });

    fixture.document.search_text(
        4,
        "apple banana",
        true,
        false,
        SearchType::GoogleAll,
        false,
        Color::RED,
        true,
    );
    pump_until_idle(&mut fixture.document);

    assert!(fixture.document.page(0).unwrap().has_highlights(4));
    assert!(!fixture.document.page(1).unwrap().has_highlights(4));

    // Each word gets its own hue.
    let highlights = fixture.document.page(0).unwrap().highlights(4);
    assert_eq!(highlights.len(), 2);
    assert_ne!(highlights[0].1, highlights[1].1);

    // GoogleAny also accepts the partial page.
    fixture.document.search_text(
        4,
        "apple banana",
        true,
        false,
        SearchType::GoogleAny,
        false,
        Color::RED,
        true,
    );
    pump_until_idle(&mut fixture.document);
    assert!(fixture.document.page(0).unwrap().has_highlights(4));
    assert!(fixture.document.page(1).unwrap().has_highlights(4));
}

#[test]
fn reset_search_clears_highlights_everywhere() {
    let mut fixture = search_fixture();
    fixture.document.search_text(
        9,
        "nothing",
        true,
        false,
        SearchType::AllDocument,
        false,
        Color::YELLOW,
        true,
    );
    pump_until_idle(&mut fixture.document);
    assert!(fixture.document.page(1).unwrap().has_highlights(9));

    fixture.document.reset_search(9);
    assert!(!fixture.document.page(1).unwrap().has_highlights(9));
    assert!(!fixture.document.page(2).unwrap().has_highlights(9));
    assert!(fixture.document.running_search(9).is_none());
}

#[test]
fn continue_search_resumes_from_the_last_match() {
    let mut fixture = fixture_with(CoreSettings::default(), |log| {
        let mut text = BTreeMap::new();
        text.insert(0, vec![line("echo here and echo there", 0.1)]);
        Box::new(FakeGenerator::new(vec![a4()], log).with_text(text))
    });

    fixture.document.search_text(
        5,
        "echo",
        true,
        false,
        SearchType::NextMatch,
        false,
        Color::RED,
        true,
    );
    pump_until_idle(&mut fixture.document);
    let first = fixture.document.running_search(5).unwrap().query().to_string();
    assert_eq!(first, "echo");

    fixture.document.continue_search(5);
    pump_until_idle(&mut fixture.document);

    let statuses = fixture.signals.finished.lock().unwrap().clone();
    assert_eq!(
        statuses,
        vec![(5, SearchStatus::MatchFound), (5, SearchStatus::MatchFound)]
    );

    // An unknown id resolves as no match.
    fixture.document.continue_search(42);
    assert_eq!(
        fixture.signals.finished.lock().unwrap().last(),
        Some(&(42, SearchStatus::NoMatchFound))
    );
}

// ----------------------------------------------------------------------
// Text page budget

#[test]
fn text_pages_are_bounded_by_the_profile_budget() {
    let dir = tempfile::tempdir().unwrap();
    let doc_path = dir.path().join("doc.pdf");
    std::fs::write(&doc_path, b"x").unwrap();

    let mut settings = CoreSettings::default();
    settings.memory_level = quire_cache::MemoryProfile::Low;

    let log = GeneratorLog::default();
    let mut text = BTreeMap::new();
    for page in 0..3 {
        text.insert(page, vec![line("words", 0.1)]);
    }
    let mut registry = FakeRegistry::new(Box::new(
        FakeGenerator::new(vec![a4(); 3], log.clone()).with_text(text),
    ));

    // 512 MiB of RAM under the Low profile allows two text pages.
    let mut document = Document::new(settings, Storage::with_root(dir.path().join("data")))
        .with_probe(Box::new(FixedMemory::new(512 * 1024 * 1024, 0)));
    document.open_document(&doc_path, "application/pdf", &mut registry).unwrap();

    document.request_text_page(0);
    document.request_text_page(1);
    document.request_text_page(2);

    assert!(!document.page(0).unwrap().has_text_page());
    assert!(document.page(1).unwrap().has_text_page());
    assert!(document.page(2).unwrap().has_text_page());
}

// ----------------------------------------------------------------------
// Fonts

#[test]
fn font_reading_walks_pages_and_caches() {
    let mut fixture = fixture_with(CoreSettings::default(), |log| {
        let mut fonts = BTreeMap::new();
        fonts.insert(
            0,
            vec![FontInfo { name: "Inter".into(), font_type: "TrueType".into(), embedded: true }],
        );
        fonts.insert(
            1,
            vec![FontInfo { name: "Go Mono".into(), font_type: "TrueType".into(), embedded: false }],
        );
        Box::new(FakeGenerator::new(vec![a4(); 2], log).with_fonts(fonts))
    });

    fixture.document.read_fonts();
    pump_until_idle(&mut fixture.document);

    assert!(fixture.signals.font_ended.load(Ordering::SeqCst));
    assert_eq!(fixture.signals.font_progress.lock().unwrap().as_slice(), &[1, 2]);
    assert_eq!(fixture.document.fonts().len(), 2);

    // A second read is served from the cache without touching the generator.
    let calls_before = fixture.log.font_pages.lock().unwrap().len();
    fixture.document.read_fonts();
    pump_until_idle(&mut fixture.document);
    assert_eq!(fixture.log.font_pages.lock().unwrap().len(), calls_before);
}

// ----------------------------------------------------------------------
// Metadata persistence

#[test]
fn sidecar_round_trips_history_rotation_and_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let doc_path = dir.path().join("doc.pdf");
    std::fs::write(&doc_path, b"%PDF-1.4 body").unwrap();
    let storage_root = dir.path().join("data");

    {
        let mut registry =
            FakeRegistry::new(Box::new(FakeGenerator::new(vec![a4(); 3], GeneratorLog::default())));
        let mut document = Document::new(
            CoreSettings::default(),
            Storage::with_root(&storage_root),
        );
        document.open_document(&doc_path, "application/pdf", &mut registry).unwrap();

        document.set_viewport_page(1, None, false);
        document.set_viewport_page(2, None, false);
        document.set_rotation(Rotation::D180);
        document.set_page_bookmarked(0, true);
        document.add_page_annotation(
            1,
            Annotation {
                kind: AnnotationKind::Note,
                author: "ada".into(),
                contents: "look here".into(),
                boundary: NormalizedRect::new(0.1, 0.1, 0.3, 0.2),
                color: Color::YELLOW,
                external: false,
            },
        );
        document.close_document();
    }

    let mut registry =
        FakeRegistry::new(Box::new(FakeGenerator::new(vec![a4(); 3], GeneratorLog::default())));
    let mut document =
        Document::new(CoreSettings::default(), Storage::with_root(&storage_root));
    document.open_document(&doc_path, "application/pdf", &mut registry).unwrap();

    assert_eq!(document.rotation(), Rotation::D180);
    assert_eq!(document.current_viewport().page(), 2);
    assert!(document.page(0).unwrap().is_bookmarked());
    let annotations = document.page(1).unwrap().annotations().to_vec();
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].contents, "look here");

    document.set_prev_viewport();
    assert_eq!(document.current_viewport().page(), 1);
}

#[test]
fn malformed_sidecar_is_treated_as_no_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let doc_path = dir.path().join("doc.pdf");
    std::fs::write(&doc_path, b"body").unwrap();
    let storage_root = dir.path().join("data");

    // Plant broken metadata where the sidecar will be looked up.
    let storage = Storage::with_root(&storage_root);
    storage.ensure_layout().unwrap();
    let sidecar = storage.sidecar_path(&doc_path, 4);
    std::fs::write(&sidecar, b"<<<definitely not xml>>>").unwrap();

    let mut registry =
        FakeRegistry::new(Box::new(FakeGenerator::new(vec![a4()], GeneratorLog::default())));
    let mut document = Document::new(CoreSettings::default(), storage);
    document.open_document(&doc_path, "application/pdf", &mut registry).unwrap();

    assert!(document.is_opened());
    assert_eq!(document.rotation(), Rotation::D0);
}

// ----------------------------------------------------------------------
// Archives

fn zip_entries(path: &Path) -> BTreeMap<String, Vec<u8>> {
    use std::io::Read;
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).unwrap();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        entries.insert(entry.name().to_string(), bytes);
    }
    entries
}

#[test]
fn archive_save_and_reopen_round_trips_byte_identically() {
    let mut fixture = simple_fixture(3);
    fixture.document.set_viewport_page(1, None, false);
    fixture.document.set_rotation(Rotation::D90);
    pump_until_idle(&mut fixture.document);

    let first_archive = fixture.doc_path.parent().unwrap().join("bundle.quire");
    fixture.document.save_document_archive(&first_archive).unwrap();
    fixture.document.close_document();

    // Reopen the archive; history and rotation come from its metadata.
    let mut registry = FakeRegistry::new(Box::new(FakeGenerator::new(
        vec![a4(); 3],
        GeneratorLog::default(),
    )));
    fixture.document.open_document_archive(&first_archive, &mut registry).unwrap();
    assert_eq!(fixture.document.rotation(), Rotation::D90);
    assert_eq!(fixture.document.current_viewport().page(), 1);

    // Saving again without edits reproduces every entry byte for byte.
    let second_archive = fixture.doc_path.parent().unwrap().join("bundle2.quire");
    fixture.document.save_document_archive(&second_archive).unwrap();

    let first_entries = zip_entries(&first_archive);
    let second_entries = zip_entries(&second_archive);
    assert_eq!(first_entries.get("content.xml"), second_entries.get("content.xml"));
    assert_eq!(first_entries.get("metadata.xml"), second_entries.get("metadata.xml"));
    assert_eq!(first_entries.get("doc.pdf"), second_entries.get("doc.pdf"));
    assert_eq!(
        first_entries.get("doc.pdf").map(Vec::as_slice),
        Some(b"%PDF-1.4 test body".as_slice())
    );
}

#[test]
fn archive_annotations_warn_once_about_save_as() {
    let mut fixture = simple_fixture(2);
    let archive_path = fixture.doc_path.parent().unwrap().join("notes.quire");
    fixture.document.save_document_archive(&archive_path).unwrap();
    fixture.document.close_document();

    let mut registry = FakeRegistry::new(Box::new(FakeGenerator::new(
        vec![a4(); 2],
        GeneratorLog::default(),
    )));
    fixture.document.open_document_archive(&archive_path, &mut registry).unwrap();
    let observer = RecordingObserver::new(1);
    fixture.document.add_observer(observer.clone());
    observer.clear();

    let note = Annotation {
        kind: AnnotationKind::Highlight,
        author: String::new(),
        contents: String::new(),
        boundary: NormalizedRect::new(0.0, 0.0, 0.2, 0.1),
        color: Color::YELLOW,
        external: false,
    };
    fixture.document.add_page_annotation(0, note.clone());
    fixture.document.add_page_annotation(1, note);

    // One warning for the session, and page notifications carry the
    // save-as flag.
    assert_eq!(fixture.signals.warnings.lock().unwrap().len(), 1);
    let events = observer.events();
    assert!(events.iter().any(|event| matches!(
        event,
        Notification::PageChanged(0, flags)
            if flags.contains(ChangeFlags::ANNOTATIONS | ChangeFlags::NEED_SAVE_AS)
    )));
}

// ----------------------------------------------------------------------
// Settings surface

#[test]
fn document_meta_data_answers_host_keys() {
    let fixture = simple_fixture(1);
    assert_eq!(
        fixture.document.document_meta_data("PaperColor", true),
        Some(MetaDataValue::Color(Color::WHITE))
    );
    assert_eq!(
        fixture.document.document_meta_data("ZoomFactor", false),
        Some(MetaDataValue::Double(1.0))
    );
    assert_eq!(fixture.document.document_meta_data("Unknown", false), None);
}
