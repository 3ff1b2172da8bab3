//! Named view handles
//!
//! A view is a lightweight, named handle a host window registers with the
//! document. Views declare typed capabilities; only capabilities flagged
//! `SERIALIZABLE` are persisted into the sidecar's `<views>` section.

use std::ops::BitOr;

/// Access flags of one view capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    pub const NONE: CapabilityFlags = CapabilityFlags(0);
    pub const READ: CapabilityFlags = CapabilityFlags(1);
    pub const WRITE: CapabilityFlags = CapabilityFlags(1 << 1);
    pub const SERIALIZABLE: CapabilityFlags = CapabilityFlags(1 << 2);

    pub fn contains(self, other: CapabilityFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CapabilityFlags {
    type Output = CapabilityFlags;

    fn bitor(self, rhs: CapabilityFlags) -> CapabilityFlags {
        CapabilityFlags(self.0 | rhs.0)
    }
}

/// How a view interprets its zoom value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoomModality {
    #[default]
    FixedFactor,
    FitWidth,
    FitPage,
    AutoFit,
}

impl ZoomModality {
    pub fn to_index(self) -> u32 {
        match self {
            ZoomModality::FixedFactor => 0,
            ZoomModality::FitWidth => 1,
            ZoomModality::FitPage => 2,
            ZoomModality::AutoFit => 3,
        }
    }

    pub fn from_index(index: u32) -> Self {
        match index {
            1 => ZoomModality::FitWidth,
            2 => ZoomModality::FitPage,
            3 => ZoomModality::AutoFit,
            _ => ZoomModality::FixedFactor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capability<T> {
    pub flags: CapabilityFlags,
    pub value: T,
}

impl<T> Capability<T> {
    pub fn new(flags: CapabilityFlags, value: T) -> Self {
        Self { flags, value }
    }

    pub fn serializable(&self) -> bool {
        self.flags.contains(CapabilityFlags::SERIALIZABLE)
    }

    pub fn writable(&self) -> bool {
        self.flags.contains(CapabilityFlags::WRITE)
    }
}

/// A named view with its declared capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    name: String,
    pub zoom: Option<Capability<f64>>,
    pub zoom_modality: Option<Capability<ZoomModality>>,
}

impl View {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), zoom: None, zoom_modality: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this view's zoom state belongs in the sidecar.
    pub fn persists_zoom(&self) -> bool {
        matches!((&self.zoom, &self.zoom_modality), (Some(z), Some(m)) if z.serializable() && m.serializable())
    }
}
