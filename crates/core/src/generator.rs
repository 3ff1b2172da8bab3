//! Generator interface
//!
//! A generator is a format plugin: it loads one document, renders pixmaps
//! one at a time, and extracts text. The core talks to it through this
//! trait plus a small set of optional capability interfaces, instead of a
//! deep inheritance tree; `has_feature` answers the cheap questions and the
//! `*_interface` accessors expose the optional ones.
//!
//! Rendering is single-flight: the core never submits a second request
//! before the previous one completed. A synchronous generator answers
//! `Ready` from `generate_pixmap`; a threaded one answers `Deferred` and
//! delivers the result through `take_completed` (polled from the pump) or
//! `wait_completed` (blocking, used to drain the in-flight render on close).

use crate::error::{DocumentError, DocumentResult, PrintError};
use crate::page::{Page, Pixmap};
use crate::textpage::TextPage;
use quire_doc_model::{PageSize, Rotation, SizeMetric};
use quire_scheduler::PixmapRequest;
use std::path::Path;

/// Optional abilities a generator can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorFeature {
    TextExtraction,
    FontInfo,
    PageSizes,
    PrintNative,
    PrintPostscript,
    PrintToFile,
    ReadRawData,
    Threaded,
}

/// A font used by the document, as reported by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontInfo {
    pub name: String,
    pub font_type: String,
    pub embedded: bool,
}

/// An export target the generator offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFormat {
    pub description: String,
    pub mime: String,
}

/// Outcome of submitting one pixmap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorReply {
    /// The pixmap was rendered synchronously.
    Ready(Pixmap),
    /// A threaded generator accepted the request and will complete it later.
    Deferred,
}

/// Optional configuration capability.
pub trait ConfigInterface {
    /// Re-read the generator's configuration. Returns true when something
    /// changed that invalidates rendered pixmaps.
    fn reparse_config(&mut self) -> bool;
}

/// Optional save capability.
pub trait SaveInterface {
    fn can_save_changes(&self) -> bool;

    /// Write the document, with all in-memory changes applied, to `path`.
    fn save_changes(&mut self, path: &Path) -> Result<(), String>;

    /// Whether annotations can be stored in the document file itself rather
    /// than in the sidecar.
    fn supports_native_annotations(&self) -> bool {
        false
    }
}

/// Optional print capability.
///
/// The core does not run print jobs itself; it only relays the request and
/// maps failures onto the fixed [`PrintError`] taxonomy for the host.
pub trait PrintInterface {
    /// Print the given pages, in order.
    fn print(&mut self, pages: &[usize]) -> Result<(), PrintError>;
}

/// The format plugin contract consumed by the document core.
pub trait Generator {
    /// Load `path` and build the page vector.
    fn load_document(&mut self, path: &Path) -> DocumentResult<Vec<Page>>;

    /// Load from an in-memory buffer; only generators with the
    /// `ReadRawData` feature need to implement this.
    fn load_document_from_data(&mut self, _data: &[u8]) -> DocumentResult<Vec<Page>> {
        Err(DocumentError::DocumentOpenFailed("loading from raw data is not supported".into()))
    }

    fn close_document(&mut self);

    /// Whether a new pixmap request may be submitted right now.
    fn can_generate_pixmap(&self) -> bool;

    /// Render one pixmap. Must eventually complete, either inline via
    /// `Ready` or through the completion queue.
    fn generate_pixmap(&mut self, request: PixmapRequest) -> GeneratorReply;

    /// Non-blocking poll for a finished deferred render.
    fn take_completed(&mut self) -> Option<(PixmapRequest, Pixmap)> {
        None
    }

    /// Block until the in-flight deferred render finishes. Only called
    /// while a request is outstanding, during document close.
    fn wait_completed(&mut self) -> Option<(PixmapRequest, Pixmap)> {
        None
    }

    /// Extract the text of `page`. Expected to complete before returning.
    fn generate_text_page(&mut self, page: &Page) -> Option<TextPage> {
        let _ = page;
        None
    }

    fn has_feature(&self, feature: GeneratorFeature) -> bool;

    fn pages_size_metric(&self) -> SizeMetric {
        SizeMetric::None
    }

    /// Free-form metadata channel between host and plugin.
    fn meta_data(&self, _key: &str, _option: &str) -> Option<String> {
        None
    }

    fn export_formats(&self) -> Vec<ExportFormat> {
        Vec::new()
    }

    fn export_to(&mut self, _format: &ExportFormat, _path: &Path) -> DocumentResult<()> {
        Err(DocumentError::ExportUnavailable)
    }

    /// The document-wide rotation changed.
    fn rotation_changed(&mut self, _new: Rotation, _old: Rotation) {}

    /// A page's size changed.
    fn page_size_changed(&mut self, _new: PageSize, _old: PageSize) {}

    /// Fonts used by one page; only meaningful with the `FontInfo` feature.
    fn font_info(&mut self, _page: usize) -> Vec<FontInfo> {
        Vec::new()
    }

    fn config_interface(&mut self) -> Option<&mut dyn ConfigInterface> {
        None
    }

    fn save_interface(&mut self) -> Option<&mut dyn SaveInterface> {
        None
    }

    fn print_interface(&mut self) -> Option<&mut dyn PrintInterface> {
        None
    }
}

/// Plugin discovery, provided by the host.
///
/// The registry answers an ordered list of generator names for a MIME type,
/// best match first; the core instantiates the first candidate unless the
/// host asked to choose interactively.
pub trait GeneratorRegistry {
    fn candidates(&self, mime: &str) -> Vec<String>;

    fn create(&mut self, name: &str) -> Option<Box<dyn Generator>>;
}
