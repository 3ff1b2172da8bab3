//! Quire document core
//!
//! Format-agnostic document model of the viewer: page state, pixmap cache
//! accounting, render request scheduling, text search, metadata persistence
//! and document archives. Rendering itself is delegated to format plugins
//! (generators); presentation is delegated to registered observers.

pub mod archive;
pub mod document;
pub mod error;
pub mod generator;
pub mod history;
pub mod metadata;
pub mod observer;
pub mod page;
pub mod search;
pub mod settings;
pub mod textpage;
pub mod view;
pub mod viewport;

pub use archive::{is_archive_path, ArchiveData, ARCHIVE_EXTENSION, ARCHIVE_MIME};
pub use document::{Document, DocumentSignals};
pub use error::{DocumentError, DocumentResult, PrintError};
pub use generator::{
    ConfigInterface, ExportFormat, FontInfo, Generator, GeneratorFeature, GeneratorRegistry,
    GeneratorReply, PrintInterface, SaveInterface,
};
pub use history::{ViewportHistory, HISTORY_MAX_STEPS, HISTORY_SAVED_STEPS};
pub use metadata::PageItems;
pub use observer::{ChangeFlags, DocumentObserver, ObserverId, SetupFlags};
pub use page::{Annotation, AnnotationKind, Page, Pixmap};
pub use search::{RunningSearch, SearchId, SearchStatus, SearchType};
pub use settings::{CoreSettings, MemoryProfile, MetaDataValue, RenderMode};
pub use textpage::{SearchDirection, TextEntity, TextPage};
pub use view::{Capability, CapabilityFlags, View, ZoomModality};
pub use viewport::{AutoFit, DocumentViewport, RePos, ViewportAnchor};
