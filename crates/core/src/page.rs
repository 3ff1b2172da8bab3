//! Per-page state
//!
//! A page owns everything the core tracks for one sheet of the document:
//! its natural size, current rotation, the pixmaps rendered for it (one per
//! observer), the lazily attached text page, search highlights, transient
//! text selections, annotations and the optional content bounding box.
//! Pages are created by the generator during document load and torn down on
//! close; all mutation in between goes through the document.

use crate::search::SearchId;
use crate::textpage::{SearchDirection, TextPage};
use quire_doc_model::{Color, NormalizedRect, PageSize, RegularArea, Rotation};
use std::collections::BTreeMap;

/// Descriptor of a rendered pixmap.
///
/// The core never touches pixel data; the actual bitmap stays with the
/// generator or the host's compositor. Width and height are enough for cache
/// accounting and for deciding whether a render request is already satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
}

impl Pixmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Memory footprint in bytes, 4 bytes per pixel.
    pub fn byte_size(&self) -> u64 {
        4 * self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PagePixmap {
    pixmap: Pixmap,
    /// Page rotation at the time the pixmap was rendered.
    rotation: Rotation,
}

/// Kinds of page annotations the core persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    Note,
    Highlight,
    Underline,
}

impl AnnotationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::Note => "note",
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Underline => "underline",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "note" => Some(AnnotationKind::Note),
            "highlight" => Some(AnnotationKind::Highlight),
            "underline" => Some(AnnotationKind::Underline),
            _ => None,
        }
    }
}

/// A user- or document-provided page annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub author: String,
    pub contents: String,
    pub boundary: NormalizedRect,
    pub color: Color,
    /// True when the annotation came from the document file itself rather
    /// than from a local edit. Externally-sourced annotations are re-emitted
    /// unchanged when an archive is re-saved without local changes.
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Highlight {
    search_id: SearchId,
    area: RegularArea,
    color: Color,
}

/// One page of the open document.
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,
    size: PageSize,
    rotation: Rotation,
    pixmaps: BTreeMap<u32, PagePixmap>,
    text_page: Option<TextPage>,
    highlights: Vec<Highlight>,
    text_selection: Option<(RegularArea, Color)>,
    annotations: Vec<Annotation>,
    bounding_box: Option<NormalizedRect>,
    bookmarked: bool,
}

impl Page {
    pub fn new(index: usize, size: PageSize) -> Self {
        Self {
            index,
            size,
            rotation: Rotation::D0,
            pixmaps: BTreeMap::new(),
            text_page: None,
            highlights: Vec::new(),
            text_selection: None,
            annotations: Vec::new(),
            bounding_box: None,
            bookmarked: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Natural width with the current rotation applied.
    pub fn width(&self) -> f64 {
        if self.rotation.swaps_axes() {
            self.size.height
        } else {
            self.size.width
        }
    }

    /// Natural height with the current rotation applied.
    pub fn height(&self) -> f64 {
        if self.rotation.swaps_axes() {
            self.size.width
        } else {
            self.size.height
        }
    }

    pub fn size(&self) -> PageSize {
        self.size
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Store `pixmap` for `observer_id`, replacing any previous one.
    pub fn set_pixmap(&mut self, observer_id: u32, pixmap: Pixmap, rotation: Rotation) {
        self.pixmaps.insert(observer_id, PagePixmap { pixmap, rotation });
    }

    pub fn delete_pixmap(&mut self, observer_id: u32) {
        self.pixmaps.remove(&observer_id);
    }

    pub fn delete_pixmaps(&mut self) {
        self.pixmaps.clear();
    }

    /// Whether `observer_id` holds a pixmap matching `width` x `height`.
    ///
    /// A pixmap rendered under a different rotation still matches when its
    /// transposed dimensions line up with the request.
    pub fn has_pixmap(&self, observer_id: u32, width: u32, height: u32) -> bool {
        match self.pixmaps.get(&observer_id) {
            None => false,
            Some(held) => {
                let swapped = held.rotation.swaps_axes() != self.rotation.swaps_axes();
                let (held_width, held_height) = if swapped {
                    (held.pixmap.height, held.pixmap.width)
                } else {
                    (held.pixmap.width, held.pixmap.height)
                };
                held_width == width && held_height == height
            }
        }
    }

    pub fn pixmap(&self, observer_id: u32) -> Option<Pixmap> {
        self.pixmaps.get(&observer_id).map(|held| held.pixmap)
    }

    /// Observers currently holding a pixmap of this page, with the rotation
    /// each pixmap was rendered under.
    pub fn pixmap_observers(&self) -> Vec<(u32, Pixmap, Rotation)> {
        self.pixmaps.iter().map(|(id, held)| (*id, held.pixmap, held.rotation)).collect()
    }

    pub fn has_text_page(&self) -> bool {
        self.text_page.is_some()
    }

    pub fn set_text_page(&mut self, text_page: Option<TextPage>) {
        self.text_page = text_page;
    }

    pub fn text_page(&self) -> Option<&TextPage> {
        self.text_page.as_ref()
    }

    /// Search this page's text.
    ///
    /// Returns `None` when no text page is attached; callers are expected to
    /// request one first.
    pub fn find_text(
        &self,
        query: &str,
        direction: SearchDirection,
        case_sensitive: bool,
        continue_from: Option<&RegularArea>,
    ) -> Option<RegularArea> {
        self.text_page.as_ref()?.find_text(query, direction, case_sensitive, continue_from)
    }

    pub fn set_highlight(&mut self, search_id: SearchId, area: RegularArea, color: Color) {
        self.highlights.push(Highlight { search_id, area, color });
    }

    pub fn delete_highlights(&mut self, search_id: SearchId) {
        self.highlights.retain(|h| h.search_id != search_id);
    }

    pub fn highlights(&self, search_id: SearchId) -> Vec<(&RegularArea, Color)> {
        self.highlights
            .iter()
            .filter(|h| h.search_id == search_id)
            .map(|h| (&h.area, h.color))
            .collect()
    }

    pub fn has_highlights(&self, search_id: SearchId) -> bool {
        self.highlights.iter().any(|h| h.search_id == search_id)
    }

    pub fn set_text_selection(&mut self, area: RegularArea, color: Color) {
        self.text_selection = Some((area, color));
    }

    pub fn delete_text_selections(&mut self) {
        self.text_selection = None;
    }

    pub fn text_selection(&self) -> Option<&(RegularArea, Color)> {
        self.text_selection.as_ref()
    }

    /// Apply a new rotation.
    ///
    /// Existing pixmaps keep the rotation tag they were rendered under, so
    /// `has_pixmap` stops matching them and observers re-request naturally.
    pub fn rotate_at(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    /// Replace the natural size. Every derived artifact is invalidated.
    pub fn change_size(&mut self, size: PageSize) {
        self.size = size;
        self.pixmaps.clear();
        self.text_page = None;
        self.bounding_box = None;
    }

    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Remove the first annotation equal to `annotation`.
    pub fn remove_annotation(&mut self, annotation: &Annotation) -> bool {
        match self.annotations.iter().position(|a| a == annotation) {
            Some(position) => {
                self.annotations.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn set_bounding_box(&mut self, bounding_box: Option<NormalizedRect>) {
        self.bounding_box = bounding_box;
    }

    pub fn bounding_box(&self) -> Option<NormalizedRect> {
        self.bounding_box
    }

    pub fn set_bookmarked(&mut self, bookmarked: bool) {
        self.bookmarked = bookmarked;
    }

    pub fn is_bookmarked(&self) -> bool {
        self.bookmarked
    }

    /// Whether the sidecar has anything to record for this page.
    pub fn has_local_contents(&self) -> bool {
        self.bookmarked || !self.annotations.is_empty()
    }
}
