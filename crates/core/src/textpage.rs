//! Extracted page text
//!
//! A text page is the finite sequence of positioned text runs a generator
//! extracts from one page. Search walks the runs as one flattened character
//! stream, so a query may span run boundaries; returned areas interpolate
//! horizontally inside a run to box only the matched characters.

use quire_doc_model::{NormalizedRect, RegularArea};

/// One positioned text run.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEntity {
    pub text: String,
    pub area: NormalizedRect,
}

impl TextEntity {
    pub fn new(text: impl Into<String>, area: NormalizedRect) -> Self {
        Self { text: text.into(), area }
    }
}

/// Where a page-level text search starts and which way it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    /// First occurrence on the page.
    FromTop,
    /// Last occurrence on the page.
    FromBottom,
    /// First occurrence after the continuation area.
    NextResult,
    /// Last occurrence before the continuation area.
    PreviousResult,
}

/// A page's extracted text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextPage {
    entities: Vec<TextEntity>,
}

impl TextPage {
    pub fn new(entities: Vec<TextEntity>) -> Self {
        Self { entities }
    }

    pub fn entities(&self) -> &[TextEntity] {
        &self.entities
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Find `query` as a substring of the flattened text stream.
    ///
    /// `continue_from` is only consulted for `NextResult`/`PreviousResult`;
    /// it should be an area previously returned by this method. Matches do
    /// not overlap: the scan resumes after the end of each hit.
    pub fn find_text(
        &self,
        query: &str,
        direction: SearchDirection,
        case_sensitive: bool,
        continue_from: Option<&RegularArea>,
    ) -> Option<RegularArea> {
        let matches = self.all_matches(query, case_sensitive);
        if matches.is_empty() {
            return None;
        }

        match direction {
            SearchDirection::FromTop => matches.first().cloned(),
            SearchDirection::FromBottom => matches.last().cloned(),
            SearchDirection::NextResult => {
                let anchor = continue_from?;
                match matches.iter().position(|m| m == anchor) {
                    Some(position) => matches.get(position + 1).cloned(),
                    // The anchor belongs to an older query; fall back to
                    // reading order.
                    None => matches.iter().find(|m| reading_key(m) > reading_key(anchor)).cloned(),
                }
            }
            SearchDirection::PreviousResult => {
                let anchor = continue_from?;
                match matches.iter().position(|m| m == anchor) {
                    Some(position) => position.checked_sub(1).map(|p| matches[p].clone()),
                    None => matches
                        .iter()
                        .rev()
                        .find(|m| reading_key(m) < reading_key(anchor))
                        .cloned(),
                }
            }
        }
    }

    /// All non-overlapping occurrences of `query`, in stream order.
    pub fn all_matches(&self, query: &str, case_sensitive: bool) -> Vec<RegularArea> {
        let needle: Vec<char> = fold_case(query, case_sensitive);
        if needle.is_empty() {
            return Vec::new();
        }

        // Flatten to (char, entity index, char index within entity).
        let mut stream: Vec<(char, usize, usize)> = Vec::new();
        for (entity_index, entity) in self.entities.iter().enumerate() {
            for (char_index, ch) in entity.text.chars().enumerate() {
                stream.push((ch, entity_index, char_index));
            }
        }

        let haystack: Vec<char> =
            fold_case(&stream.iter().map(|(c, _, _)| *c).collect::<String>(), case_sensitive);

        let mut matches = Vec::new();
        let mut position = 0;
        while position + needle.len() <= haystack.len() {
            if haystack[position..position + needle.len()] == needle[..] {
                matches.push(self.area_for_span(&stream, position, needle.len()));
                position += needle.len();
            } else {
                position += 1;
            }
        }
        matches
    }

    /// Box the characters `stream[start .. start + length]`, one rectangle
    /// per entity segment.
    fn area_for_span(
        &self,
        stream: &[(char, usize, usize)],
        start: usize,
        length: usize,
    ) -> RegularArea {
        let mut area = RegularArea::new();
        let mut segment: Option<(usize, usize, usize)> = None; // entity, first char, last char

        for &(_, entity_index, char_index) in &stream[start..start + length] {
            match segment {
                Some((entity, first, _)) if entity == entity_index => {
                    segment = Some((entity, first, char_index));
                }
                Some((entity, first, last)) => {
                    area.push(self.entity_slice(entity, first, last + 1));
                    segment = Some((entity_index, char_index, char_index));
                }
                None => segment = Some((entity_index, char_index, char_index)),
            }
        }
        if let Some((entity, first, last)) = segment {
            area.push(self.entity_slice(entity, first, last + 1));
        }
        area
    }

    /// Sub-rectangle of an entity covering chars `[first, end)`, assuming
    /// horizontally laid out text.
    fn entity_slice(&self, entity_index: usize, first: usize, end: usize) -> NormalizedRect {
        let entity = &self.entities[entity_index];
        let total = entity.text.chars().count().max(1) as f64;
        let width = entity.area.right - entity.area.left;
        NormalizedRect::new(
            entity.area.left + width * first as f64 / total,
            entity.area.top,
            entity.area.left + width * end as f64 / total,
            entity.area.bottom,
        )
    }
}

fn fold_case(text: &str, case_sensitive: bool) -> Vec<char> {
    if case_sensitive {
        text.chars().collect()
    } else {
        // One output char per input char keeps match offsets aligned with
        // the entity stream.
        text.chars().map(|c| c.to_lowercase().next().unwrap_or(c)).collect()
    }
}

fn reading_key(area: &RegularArea) -> (f64, f64) {
    area.first().map(|r| (r.top, r.left)).unwrap_or((f64::MAX, f64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, top: f64) -> TextEntity {
        TextEntity::new(text, NormalizedRect::new(0.1, top, 0.9, top + 0.05))
    }

    fn sample_page() -> TextPage {
        TextPage::new(vec![
            line("the quick brown fox", 0.1),
            line("jumps over the lazy dog", 0.2),
            line("the end", 0.3),
        ])
    }

    #[test]
    fn test_from_top_finds_first_occurrence() {
        let page = sample_page();
        let hit = page.find_text("the", SearchDirection::FromTop, true, None).unwrap();
        let rect = hit.first().unwrap();
        assert_eq!(rect.top, 0.1);
        assert_eq!(rect.left, 0.1);
    }

    #[test]
    fn test_from_bottom_finds_last_occurrence() {
        let page = sample_page();
        let hit = page.find_text("the", SearchDirection::FromBottom, true, None).unwrap();
        assert_eq!(hit.first().unwrap().top, 0.3);
    }

    #[test]
    fn test_next_result_walks_matches_in_order() {
        let page = sample_page();
        let first = page.find_text("the", SearchDirection::FromTop, true, None).unwrap();
        let second =
            page.find_text("the", SearchDirection::NextResult, true, Some(&first)).unwrap();
        let third =
            page.find_text("the", SearchDirection::NextResult, true, Some(&second)).unwrap();

        assert_eq!(second.first().unwrap().top, 0.2);
        assert_eq!(third.first().unwrap().top, 0.3);
        assert!(page.find_text("the", SearchDirection::NextResult, true, Some(&third)).is_none());
    }

    #[test]
    fn test_previous_result_walks_backwards() {
        let page = sample_page();
        let last = page.find_text("the", SearchDirection::FromBottom, true, None).unwrap();
        let previous =
            page.find_text("the", SearchDirection::PreviousResult, true, Some(&last)).unwrap();
        assert_eq!(previous.first().unwrap().top, 0.2);
    }

    #[test]
    fn test_case_folding() {
        let page = sample_page();
        assert!(page.find_text("QUICK", SearchDirection::FromTop, true, None).is_none());
        assert!(page.find_text("QUICK", SearchDirection::FromTop, false, None).is_some());
    }

    #[test]
    fn test_match_spanning_entities() {
        let page = sample_page();
        // "fox" ends entity 0 and "jumps" starts entity 1; the flattened
        // stream joins them directly.
        let hit = page.find_text("foxjumps", SearchDirection::FromTop, true, None).unwrap();
        assert_eq!(hit.len(), 2);
        assert_eq!(hit.rects()[0].top, 0.1);
        assert_eq!(hit.rects()[1].top, 0.2);
    }

    #[test]
    fn test_sub_entity_rect_is_interpolated() {
        let page = TextPage::new(vec![TextEntity::new(
            "abcd",
            NormalizedRect::new(0.0, 0.0, 1.0, 0.1),
        )]);
        let hit = page.find_text("cd", SearchDirection::FromTop, true, None).unwrap();
        let rect = hit.first().unwrap();
        assert!((rect.left - 0.5).abs() < 1e-9);
        assert!((rect.right - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let page = sample_page();
        assert!(page.find_text("", SearchDirection::FromTop, true, None).is_none());
        assert!(page.all_matches("", false).is_empty());
    }

    #[test]
    fn test_non_overlapping_matches() {
        let page = TextPage::new(vec![line("aaaa", 0.0)]);
        assert_eq!(page.all_matches("aa", true).len(), 2);
    }
}
