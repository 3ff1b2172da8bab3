//! Search state
//!
//! Types describing a running search. The engine itself lives on the
//! document: each mode advances one page per posted task, so the host loop
//! stays responsive and cancellation takes effect between pages.

use quire_doc_model::{Color, RegularArea};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of one search owned by the host (e.g. the find bar).
pub type SearchId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// Every occurrence of the exact query on every page.
    AllDocument,
    /// The next occurrence after the last match, wrapping on confirmation.
    NextMatch,
    /// The previous occurrence before the last match, wrapping on confirmation.
    PreviousMatch,
    /// Per-word search; a page qualifies when all words match.
    GoogleAll,
    /// Per-word search; a page qualifies when any word matches.
    GoogleAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    MatchFound,
    NoMatchFound,
    SearchCancelled,
}

/// Bookkeeping for one search id.
#[derive(Debug, Clone)]
pub struct RunningSearch {
    pub(crate) cached_query: String,
    pub(crate) cached_type: SearchType,
    pub(crate) cached_case_sensitive: bool,
    pub(crate) cached_move_viewport: bool,
    pub(crate) cached_no_dialogs: bool,
    pub(crate) cached_color: Color,
    /// Page of the last single-match hit, where the next one resumes.
    pub(crate) continue_on_page: Option<usize>,
    /// Area of the last single-match hit.
    pub(crate) continue_on_match: Option<RegularArea>,
    /// Pages currently carrying this search's highlights.
    pub(crate) highlighted_pages: BTreeSet<usize>,
    pub(crate) is_currently_searching: bool,
}

impl RunningSearch {
    pub(crate) fn new() -> Self {
        Self {
            cached_query: String::new(),
            cached_type: SearchType::NextMatch,
            cached_case_sensitive: false,
            cached_move_viewport: false,
            cached_no_dialogs: false,
            cached_color: Color::YELLOW,
            continue_on_page: None,
            continue_on_match: None,
            highlighted_pages: BTreeSet::new(),
            is_currently_searching: false,
        }
    }

    pub fn is_currently_searching(&self) -> bool {
        self.is_currently_searching
    }

    pub fn highlighted_pages(&self) -> &BTreeSet<usize> {
        &self.highlighted_pages
    }

    pub fn query(&self) -> &str {
        &self.cached_query
    }
}

/// One posted continuation of a search in progress.
#[derive(Debug, Clone)]
pub(crate) enum SearchStep {
    All {
        id: SearchId,
        current_page: usize,
        matches: BTreeMap<usize, Vec<RegularArea>>,
        pages_to_notify: BTreeSet<usize>,
    },
    Single {
        id: SearchId,
        forward: bool,
        current_page: i64,
        done_pages: usize,
        found: Option<RegularArea>,
        pages_to_notify: BTreeSet<usize>,
    },
    Google {
        id: SearchId,
        current_page: usize,
        match_all: bool,
        matches: BTreeMap<usize, Vec<(RegularArea, Color)>>,
        pages_to_notify: BTreeSet<usize>,
    },
}

/// Color for the `word_index`-th word of a multi-word search.
///
/// Words get hues stepped away from the base color by `60 / (wordcount - 1)`
/// degrees, wrapping modulo 360, so each word highlights in a distinct but
/// related shade.
pub(crate) fn word_color(base: Color, word_index: usize, word_count: usize) -> Color {
    let hue_step = if word_count > 1 { 60 / (word_count as i64 - 1) } else { 60 };
    let (base_hue, saturation, value) = base.to_hsv();
    let mut hue = base_hue - (word_index as i64 * hue_step) as f64;
    if hue < 0.0 {
        hue += 360.0;
    }
    Color::from_hsv(hue, saturation, value)
}
