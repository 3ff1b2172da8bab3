//! Viewport descriptors
//!
//! A viewport describes the visible region on one page: the page index, an
//! optional re-centering position in normalized coordinates, and optional
//! auto-fit flags. The textual form `"P;C2:x:y:anchor;AF1:T|F:T|F"` is the
//! single interchange format; it is what gets persisted and logged, and it
//! round-trips exactly.

use std::fmt;

/// How the normalized position anchors the viewport on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewportAnchor {
    #[default]
    TopLeft,
    Center,
}

impl ViewportAnchor {
    fn to_index(self) -> u32 {
        match self {
            ViewportAnchor::TopLeft => 0,
            ViewportAnchor::Center => 1,
        }
    }

    fn from_index(index: i64) -> Self {
        if index == 1 {
            ViewportAnchor::Center
        } else {
            ViewportAnchor::TopLeft
        }
    }
}

/// Re-centering position within the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RePos {
    pub normalized_x: f64,
    pub normalized_y: f64,
    pub anchor: ViewportAnchor,
}

/// Auto-fit request for the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoFit {
    pub fit_width: bool,
    pub fit_height: bool,
}

/// The visible region on one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentViewport {
    /// Zero-based page index; negative means invalid.
    pub page_number: i64,
    pub re_pos: Option<RePos>,
    pub auto_fit: Option<AutoFit>,
}

impl Default for DocumentViewport {
    fn default() -> Self {
        Self { page_number: -1, re_pos: None, auto_fit: None }
    }
}

impl DocumentViewport {
    pub fn new(page: usize) -> Self {
        Self { page_number: page as i64, ..Self::default() }
    }

    /// Viewport centered on a normalized position of `page`.
    pub fn centered(page: usize, normalized_x: f64, normalized_y: f64) -> Self {
        Self {
            page_number: page as i64,
            re_pos: Some(RePos { normalized_x, normalized_y, anchor: ViewportAnchor::Center }),
            auto_fit: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.page_number >= 0
    }

    /// The page index; only meaningful on a valid viewport.
    pub fn page(&self) -> usize {
        self.page_number.max(0) as usize
    }

    /// Parse the textual form. Unknown tokens are skipped; a missing or
    /// malformed page number yields an invalid viewport.
    pub fn from_text(text: &str) -> Self {
        let mut viewport = Self::default();
        let mut fields = text.split(';');

        match fields.next().and_then(|f| f.trim().parse::<i64>().ok()) {
            Some(page) => viewport.page_number = page,
            None => return viewport,
        }

        for token in fields {
            if let Some(rest) = token.strip_prefix("C1:") {
                let mut parts = rest.split(':');
                viewport.re_pos = Some(RePos {
                    normalized_x: parse_f64(parts.next()),
                    normalized_y: parse_f64(parts.next()),
                    anchor: ViewportAnchor::Center,
                });
            } else if let Some(rest) = token.strip_prefix("C2:") {
                let mut parts = rest.split(':');
                let normalized_x = parse_f64(parts.next());
                let normalized_y = parse_f64(parts.next());
                let anchor = ViewportAnchor::from_index(parse_i64(parts.next()));
                viewport.re_pos = Some(RePos { normalized_x, normalized_y, anchor });
            } else if let Some(rest) = token.strip_prefix("AF1:") {
                let mut parts = rest.split(':');
                viewport.auto_fit = Some(AutoFit {
                    fit_width: parts.next() == Some("T"),
                    fit_height: parts.next() == Some("T"),
                });
            }
        }
        viewport
    }
}

impl fmt::Display for DocumentViewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.page_number)?;
        if let Some(re_pos) = &self.re_pos {
            write!(
                f,
                ";C2:{}:{}:{}",
                re_pos.normalized_x,
                re_pos.normalized_y,
                re_pos.anchor.to_index()
            )?;
        }
        if let Some(auto_fit) = &self.auto_fit {
            write!(
                f,
                ";AF1:{}:{}",
                if auto_fit.fit_width { "T" } else { "F" },
                if auto_fit.fit_height { "T" } else { "F" }
            )?;
        }
        Ok(())
    }
}

fn parse_f64(token: Option<&str>) -> f64 {
    token.and_then(|t| t.parse().ok()).unwrap_or(0.0)
}

fn parse_i64(token: Option<&str>) -> i64 {
    token.and_then(|t| t.parse().ok()).unwrap_or(0)
}
