use serde::{Deserialize, Serialize};

/// Page rotation in quarter turns, counted clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    D0,
    D90,
    D180,
    D270,
}

impl Rotation {
    /// Build a rotation from a quarter-turn count (taken modulo 4).
    pub fn from_turns(turns: u32) -> Self {
        match turns % 4 {
            0 => Rotation::D0,
            1 => Rotation::D90,
            2 => Rotation::D180,
            _ => Rotation::D270,
        }
    }

    pub fn turns(self) -> u32 {
        match self {
            Rotation::D0 => 0,
            Rotation::D90 => 1,
            Rotation::D180 => 2,
            Rotation::D270 => 3,
        }
    }

    /// True when this rotation swaps a page's width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::D90 | Rotation::D270)
    }
}

/// RGBA color used for highlights, selections and annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color.
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Decompose into HSV, hue in degrees [0, 360), saturation and value in [0, 1].
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let r = self.r as f64 / 255.0;
        let g = self.g as f64 / 255.0;
        let b = self.b as f64 / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let hue = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * (((g - b) / delta).rem_euclid(6.0))
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let saturation = if max == 0.0 { 0.0 } else { delta / max };

        (hue, saturation, max)
    }

    /// Build an opaque color from HSV components as produced by [`Color::to_hsv`].
    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Self {
        let hue = hue.rem_euclid(360.0);
        let c = value * saturation;
        let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
        let m = value - c;

        let (r, g, b) = match hue as u32 / 60 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        Self::rgb(
            ((r + m) * 255.0).round() as u8,
            ((g + m) * 255.0).round() as u8,
            ((b + m) * 255.0).round() as u8,
        )
    }
}

impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const YELLOW: Color = Color { r: 255, g: 255, b: 0, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
}

/// Axis-aligned rectangle in normalized page coordinates.
///
/// All four fields live in [0, 1]; `left <= right` and `top <= bottom`,
/// with the origin at the page's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl NormalizedRect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    pub fn united(&self, other: &NormalizedRect) -> NormalizedRect {
        NormalizedRect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

/// A finite union of normalized rectangles.
///
/// Used for search highlights and text selections, where one logical match
/// can span several text runs and therefore several rectangles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegularArea {
    rects: Vec<NormalizedRect>,
}

impl RegularArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: NormalizedRect) -> Self {
        Self { rects: vec![rect] }
    }

    pub fn push(&mut self, rect: NormalizedRect) {
        self.rects.push(rect);
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    /// The first rectangle of the area, in reading order.
    pub fn first(&self) -> Option<&NormalizedRect> {
        self.rects.first()
    }

    pub fn rects(&self) -> &[NormalizedRect] {
        &self.rects
    }

    /// The smallest rectangle enclosing the whole area.
    pub fn bounding_rect(&self) -> Option<NormalizedRect> {
        let mut it = self.rects.iter();
        let first = *it.next()?;
        Some(it.fold(first, |acc, r| acc.united(r)))
    }
}

/// Natural page dimensions in document units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// What a generator's page dimensions are measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMetric {
    /// Typographic points, 1/72 inch.
    Points,
    /// Unit-less; sizes only make sense relative to each other.
    #[default]
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_from_turns_wraps() {
        assert_eq!(Rotation::from_turns(0), Rotation::D0);
        assert_eq!(Rotation::from_turns(3), Rotation::D270);
        assert_eq!(Rotation::from_turns(5), Rotation::D90);
        assert!(Rotation::D90.swaps_axes());
        assert!(Rotation::D270.swaps_axes());
        assert!(!Rotation::D180.swaps_axes());
    }

    #[test]
    fn hsv_round_trip_on_primaries() {
        for color in [Color::RED, Color::YELLOW, Color::rgb(0, 128, 255)] {
            let (h, s, v) = color.to_hsv();
            let back = Color::from_hsv(h, s, v);
            assert!((back.r as i32 - color.r as i32).abs() <= 1);
            assert!((back.g as i32 - color.g as i32).abs() <= 1);
            assert!((back.b as i32 - color.b as i32).abs() <= 1);
        }
    }

    #[test]
    fn hue_rotation_wraps_below_zero() {
        let shifted = Color::from_hsv(-60.0, 1.0, 1.0);
        assert_eq!(shifted, Color::from_hsv(300.0, 1.0, 1.0));
    }

    #[test]
    fn regular_area_bounding_rect_unites_rects() {
        let mut area = RegularArea::new();
        area.push(NormalizedRect::new(0.1, 0.1, 0.2, 0.2));
        area.push(NormalizedRect::new(0.5, 0.05, 0.9, 0.15));

        let bounds = area.bounding_rect().unwrap();
        assert_eq!(bounds, NormalizedRect::new(0.1, 0.05, 0.9, 0.2));
        assert_eq!(area.first(), Some(&NormalizedRect::new(0.1, 0.1, 0.2, 0.2)));
    }

    #[test]
    fn normalized_rect_contains_point() {
        let rect = NormalizedRect::new(0.25, 0.25, 0.75, 0.75);
        assert!(rect.contains(0.5, 0.5));
        assert!(!rect.contains(0.1, 0.5));
        assert_eq!(rect.center(), (0.5, 0.5));
    }

    #[test]
    fn shared_types_serialize() {
        let rect = NormalizedRect::new(0.0, 0.0, 1.0, 0.5);
        let json = serde_json::to_string(&rect).unwrap();
        let back: NormalizedRect = serde_json::from_str(&json).unwrap();
        assert_eq!(rect, back);
    }
}
