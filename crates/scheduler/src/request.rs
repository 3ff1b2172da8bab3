//! Pixmap request queue
//!
//! Orders render requests by urgency and keeps the queue free of duplicates
//! and stale work. The queue itself carries no lock: the document core owns
//! it together with the in-flight slot under a single mutex, so all methods
//! take `&mut self`.

use log::debug;

/// Upper bound (exclusive) for observer ids carried by requests.
///
/// Requests outside `1..MAX_OBSERVER_ID` are discarded at dispatch time.
pub const MAX_OBSERVER_ID: u32 = 100;

/// Requests above this pixel count are dropped instead of rendered.
///
/// A 20M-pixel pixmap costs ~80 MB; past that, a single request can starve
/// the rest of the cache. Heuristic, not a contract.
pub const MAX_REQUEST_PIXELS: u64 = 20_000_000;

/// A single pixmap render request from one observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixmapRequest {
    /// Requesting observer; also keys the resulting pixmap on the page.
    pub observer_id: u32,

    /// Zero-based page index.
    pub page_index: usize,

    /// Requested pixmap width in pixels.
    pub width: u32,

    /// Requested pixmap height in pixels.
    pub height: u32,

    /// Urgency; higher values dispatch earlier, zero dispatches last.
    pub priority: i32,

    /// Whether the generator may render this on its own thread.
    pub asynchronous: bool,

    /// Render even when the page already holds a matching pixmap.
    pub force: bool,
}

impl PixmapRequest {
    pub fn new(observer_id: u32, page_index: usize, width: u32, height: u32) -> Self {
        Self {
            observer_id,
            page_index,
            width,
            height,
            priority: 0,
            asynchronous: true,
            force: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn synchronous(mut self) -> Self {
        self.asynchronous = false;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Pixmap footprint in bytes once rendered (4 bytes per pixel).
    pub fn byte_size(&self) -> u64 {
        4 * self.width as u64 * self.height as u64
    }

    /// Pixel count, used against [`MAX_REQUEST_PIXELS`].
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the observer id is inside the accepted range.
    pub fn has_valid_id(&self) -> bool {
        self.observer_id >= 1 && self.observer_id < MAX_OBSERVER_ID
    }

    /// Exchange width and height, for documents rotated by a quarter turn.
    pub fn swap_dimensions(&mut self) {
        std::mem::swap(&mut self.width, &mut self.height);
    }
}

/// Options accepted by `Document::request_pixmaps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixmapRequestFlags {
    /// Only replace queued requests for the pages being re-requested.
    #[default]
    NoOption,
    /// Drop every queued request of the submitting observer first.
    RemoveAllPrevious,
}

/// Verdict of the dispatch scan for one queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the request to the generator.
    Dispatch,
    /// Remove the request without rendering it.
    Discard,
}

/// Urgency-ordered queue of pending pixmap requests.
///
/// Internally a vector sorted ascending by priority toward the dispatch end,
/// with ties broken so the newest request is met first. The dispatch scan
/// therefore sees requests in descending priority order and, within one
/// priority, newest first.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: Vec<PixmapRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request at its priority position.
    ///
    /// A queued non-forced request for the same `(observer, page)` is
    /// replaced rather than duplicated.
    pub fn insert(&mut self, request: PixmapRequest) {
        if !request.force {
            self.entries.retain(|queued| {
                queued.force
                    || queued.observer_id != request.observer_id
                    || queued.page_index != request.page_index
            });
        }

        debug!(
            "queueing request id={} {}x{}@{} priority={}",
            request.observer_id, request.width, request.height, request.page_index,
            request.priority
        );

        // Insert after the last entry of equal or lower priority, keeping the
        // vector ascending toward the dispatch end.
        let position = self
            .entries
            .iter()
            .rposition(|queued| queued.priority <= request.priority)
            .map(|index| index + 1)
            .unwrap_or(0);
        self.entries.insert(position, request);
    }

    /// Remove queued requests of `observer_id`, either all of them or only
    /// those whose page is in `pages`.
    pub fn remove_for_observer(&mut self, observer_id: u32, pages: Option<&[usize]>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|queued| {
            if queued.observer_id != observer_id {
                return true;
            }
            match pages {
                None => false,
                Some(pages) => !pages.contains(&queued.page_index),
            }
        });
        before - self.entries.len()
    }

    /// Scan from the dispatch end, discarding requests the classifier
    /// rejects, and remove and return the first request to dispatch.
    pub fn pop_next_with<F>(&mut self, mut classify: F) -> Option<PixmapRequest>
    where
        F: FnMut(&PixmapRequest) -> Disposition,
    {
        while let Some(index) = self.entries.len().checked_sub(1) {
            match classify(&self.entries[index]) {
                Disposition::Dispatch => return Some(self.entries.remove(index)),
                Disposition::Discard => {
                    self.entries.remove(index);
                }
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PixmapRequest> {
        self.entries.iter()
    }
}
