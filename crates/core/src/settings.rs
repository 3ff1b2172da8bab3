//! Core configuration record
//!
//! The document core reads no global settings object; the host hands it an
//! explicit `CoreSettings` value at construction and pushes updates through
//! `Document::settings_changed`. Rendering hints in here are not interpreted
//! by the core itself, they are forwarded to generators through the document
//! metadata keys.

pub use quire_cache::MemoryProfile;
use quire_doc_model::Color;

/// Accessibility render modes forwarded to generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Normal,
    Inverted,
    Recolor,
    BlackWhite,
}

/// Host-provided configuration consumed by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreSettings {
    pub memory_level: MemoryProfile,
    pub enable_threading: bool,
    /// Ask the host to pick when several generators claim a MIME type.
    pub choose_generators: bool,
    pub render_mode: RenderMode,
    pub change_colors: bool,
    pub paper_color: Color,
    pub zoom_factor: f64,
    pub text_antialias: bool,
    pub graphics_antialias: bool,
    pub text_hinting: bool,
    pub obey_drm: bool,
    pub external_editor: bool,
    pub external_editor_command: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            memory_level: MemoryProfile::Normal,
            enable_threading: true,
            choose_generators: false,
            render_mode: RenderMode::Normal,
            change_colors: false,
            paper_color: Color::WHITE,
            zoom_factor: 1.0,
            text_antialias: true,
            graphics_antialias: true,
            text_hinting: true,
            obey_drm: true,
            external_editor: false,
            external_editor_command: String::new(),
        }
    }
}

/// Typed value answered for a host metadata key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetaDataValue {
    Color(Color),
    Double(f64),
    Bool(bool),
}

impl CoreSettings {
    /// Answer one of the host metadata keys.
    ///
    /// `option` only matters for `"PaperColor"`: when set, a white default is
    /// returned even if color changing is disabled.
    pub fn meta_data(&self, key: &str, option: bool) -> Option<MetaDataValue> {
        match key {
            "PaperColor" => {
                if self.change_colors && self.render_mode == RenderMode::Recolor {
                    Some(MetaDataValue::Color(self.paper_color))
                } else if option {
                    Some(MetaDataValue::Color(Color::WHITE))
                } else {
                    None
                }
            }
            "ZoomFactor" => Some(MetaDataValue::Double(self.zoom_factor)),
            "TextAntialias" => Some(MetaDataValue::Bool(self.text_antialias)),
            "GraphicsAntialias" => Some(MetaDataValue::Bool(self.graphics_antialias)),
            "TextHinting" => Some(MetaDataValue::Bool(self.text_hinting)),
            _ => None,
        }
    }
}
