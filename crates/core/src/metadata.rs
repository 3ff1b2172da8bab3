//! Sidecar metadata XML
//!
//! Serializes per-document state (page annotations and bookmarks, rotation,
//! viewport history, per-view zoom) into the `documentInfo` sidecar format
//! and parses it back. The byte layout is a stable on-disk contract:
//! serializing freshly parsed state must reproduce the input bytes so that
//! unedited archives round-trip unchanged.

use crate::error::{DocumentError, DocumentResult};
use crate::page::{Annotation, AnnotationKind, Page};
use crate::view::{View, ZoomModality};
use crate::viewport::DocumentViewport;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use quire_doc_model::{Color, NormalizedRect, Rotation};
use std::io::Cursor;

/// Which page-level items a serialization pass includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageItems {
    pub annotations: bool,
    pub bookmarks: bool,
    /// Also re-emit annotations that came from the document itself,
    /// unchanged, so an unedited archive keeps byte-equivalent metadata.
    pub original_annotations: bool,
}

impl PageItems {
    pub const NONE: PageItems =
        PageItems { annotations: false, bookmarks: false, original_annotations: false };

    pub const ANNOTATIONS: PageItems =
        PageItems { annotations: true, bookmarks: false, original_annotations: false };

    pub const ALL: PageItems =
        PageItems { annotations: true, bookmarks: true, original_annotations: false };

    pub fn with_original(mut self, original: bool) -> Self {
        self.original_annotations = original;
        self
    }

    fn includes(&self, annotation: &Annotation) -> bool {
        if annotation.external {
            self.original_annotations
        } else {
            self.annotations
        }
    }
}

/// Everything the writer needs, borrowed from the document.
pub(crate) struct DocumentInfoData<'a> {
    pub url: &'a str,
    pub pages: &'a [Page],
    pub rotation: Rotation,
    /// Persisted history window; the last entry is the current viewport.
    pub history: &'a [DocumentViewport],
    pub views: &'a [View],
    pub save_what: PageItems,
}

/// Parsed page entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadedPage {
    pub number: usize,
    pub bookmarked: bool,
    pub annotations: Vec<Annotation>,
}

/// Parsed view entry.
#[derive(Debug, Clone)]
pub(crate) struct LoadedView {
    pub name: String,
    pub zoom: Option<(f64, ZoomModality)>,
}

/// Parsed sidecar contents.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadedInfo {
    pub url: Option<String>,
    pub rotation: Option<Rotation>,
    pub history: Option<Vec<DocumentViewport>>,
    pub pages: Vec<LoadedPage>,
    pub views: Vec<LoadedView>,
}

pub(crate) fn write_document_info(data: &DocumentInfoData) -> DocumentResult<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("documentInfo");
    root.push_attribute(("url", data.url));
    writer.write_event(Event::Start(root))?;

    writer.write_event(Event::Start(BytesStart::new("pageList")))?;
    for page in data.pages {
        write_page(&mut writer, page, data.save_what)?;
    }
    writer.write_event(Event::End(BytesEnd::new("pageList")))?;

    writer.write_event(Event::Start(BytesStart::new("generalInfo")))?;

    if data.rotation != Rotation::D0 {
        writer.write_event(Event::Start(BytesStart::new("rotation")))?;
        writer.write_event(Event::Text(BytesText::new(&data.rotation.turns().to_string())))?;
        writer.write_event(Event::End(BytesEnd::new("rotation")))?;
    }

    if !data.history.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("history")))?;
        for (index, viewport) in data.history.iter().enumerate() {
            let name = if index + 1 == data.history.len() { "current" } else { "oldPage" };
            let mut entry = BytesStart::new(name);
            entry.push_attribute(("viewport", viewport.to_string().as_str()));
            writer.write_event(Event::Empty(entry))?;
        }
        writer.write_event(Event::End(BytesEnd::new("history")))?;
    }

    writer.write_event(Event::Start(BytesStart::new("views")))?;
    for view in data.views {
        if !view.persists_zoom() {
            continue;
        }
        let (Some(zoom), Some(modality)) = (&view.zoom, &view.zoom_modality) else { continue };
        let mut view_entry = BytesStart::new("view");
        view_entry.push_attribute(("name", view.name()));
        writer.write_event(Event::Start(view_entry))?;
        let mut zoom_entry = BytesStart::new("zoom");
        zoom_entry.push_attribute(("value", zoom.value.to_string().as_str()));
        zoom_entry.push_attribute(("mode", modality.value.to_index().to_string().as_str()));
        writer.write_event(Event::Empty(zoom_entry))?;
        writer.write_event(Event::End(BytesEnd::new("view")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("views")))?;

    writer.write_event(Event::End(BytesEnd::new("generalInfo")))?;
    writer.write_event(Event::End(BytesEnd::new("documentInfo")))?;

    Ok(writer.into_inner().into_inner())
}

fn write_page<W: std::io::Write>(
    writer: &mut Writer<W>,
    page: &Page,
    save_what: PageItems,
) -> DocumentResult<()> {
    let bookmarked = save_what.bookmarks && page.is_bookmarked();
    let annotations: Vec<&Annotation> =
        page.annotations().iter().filter(|a| save_what.includes(a)).collect();
    if !bookmarked && annotations.is_empty() {
        return Ok(());
    }

    let mut entry = BytesStart::new("page");
    entry.push_attribute(("number", page.index().to_string().as_str()));
    if bookmarked {
        entry.push_attribute(("bookmarked", "true"));
    }
    writer.write_event(Event::Start(entry))?;

    if !annotations.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("annotationList")))?;
        for annotation in annotations {
            let mut element = BytesStart::new("annotation");
            element.push_attribute(("type", annotation.kind.as_str()));
            element.push_attribute(("author", annotation.author.as_str()));
            element.push_attribute(("color", color_to_hex(annotation.color).as_str()));
            element.push_attribute(("l", annotation.boundary.left.to_string().as_str()));
            element.push_attribute(("t", annotation.boundary.top.to_string().as_str()));
            element.push_attribute(("r", annotation.boundary.right.to_string().as_str()));
            element.push_attribute(("b", annotation.boundary.bottom.to_string().as_str()));
            if annotation.external {
                element.push_attribute(("external", "true"));
            }
            if annotation.contents.is_empty() {
                writer.write_event(Event::Empty(element))?;
            } else {
                writer.write_event(Event::Start(element))?;
                writer.write_event(Event::Text(BytesText::new(&annotation.contents)))?;
                writer.write_event(Event::End(BytesEnd::new("annotation")))?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new("annotationList")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("page")))?;
    Ok(())
}

pub(crate) fn parse_document_info(bytes: &[u8]) -> DocumentResult<LoadedInfo> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut info = LoadedInfo::default();
    let mut saw_root = false;
    let mut path: Vec<String> = Vec::new();
    let mut current_page: Option<LoadedPage> = None;
    let mut current_annotation: Option<Annotation> = None;
    let mut current_view: Option<LoadedView> = None;
    let mut history: Vec<DocumentViewport> = Vec::new();
    let mut in_history = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| DocumentError::MetadataParseFailed(err.to_string()))?;
        match event {
            Event::Start(ref element) | Event::Empty(ref element) => {
                let empty = matches!(event, Event::Empty(_));
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();

                if path.is_empty() {
                    if name != "documentInfo" {
                        return Err(DocumentError::MetadataParseFailed(format!(
                            "unexpected root element {name}"
                        )));
                    }
                    saw_root = true;
                    info.url = attribute(element, "url");
                } else {
                    match name.as_str() {
                        "page" => {
                            let number = attribute(element, "number")
                                .and_then(|n| n.parse::<usize>().ok());
                            if let Some(number) = number {
                                current_page = Some(LoadedPage {
                                    number,
                                    bookmarked: attribute(element, "bookmarked").as_deref()
                                        == Some("true"),
                                    annotations: Vec::new(),
                                });
                            }
                        }
                        "annotation" if current_page.is_some() => {
                            let annotation = parse_annotation(element);
                            if empty {
                                if let (Some(page), Some(annotation)) =
                                    (current_page.as_mut(), annotation)
                                {
                                    page.annotations.push(annotation);
                                }
                            } else {
                                current_annotation = annotation;
                            }
                        }
                        "history" => in_history = true,
                        "oldPage" | "current" if in_history => {
                            if let Some(text) = attribute(element, "viewport") {
                                history.push(DocumentViewport::from_text(&text));
                            }
                        }
                        "view" => {
                            if let Some(view_name) = attribute(element, "name") {
                                current_view = Some(LoadedView { name: view_name, zoom: None });
                            }
                        }
                        "zoom" => {
                            if let Some(view) = current_view.as_mut() {
                                let value = attribute(element, "value")
                                    .and_then(|v| v.parse::<f64>().ok());
                                let mode = attribute(element, "mode")
                                    .and_then(|m| m.parse::<u32>().ok())
                                    .map(ZoomModality::from_index)
                                    .unwrap_or_default();
                                if let Some(value) = value {
                                    view.zoom = Some((value, mode));
                                }
                            }
                        }
                        _ => {}
                    }
                }

                if !empty {
                    path.push(name);
                } else if path.is_empty() {
                    break;
                }
            }
            Event::Text(text) => {
                let content = text
                    .unescape()
                    .map_err(|err| DocumentError::MetadataParseFailed(err.to_string()))?;
                match path.last().map(String::as_str) {
                    Some("rotation") => {
                        if let Ok(turns) = content.trim().parse::<u32>() {
                            let rotation = Rotation::from_turns(turns);
                            if rotation != Rotation::D0 {
                                info.rotation = Some(rotation);
                            }
                        }
                    }
                    Some("annotation") => {
                        if let Some(annotation) = current_annotation.as_mut() {
                            annotation.contents = content.into_owned();
                        }
                    }
                    _ => {}
                }
            }
            Event::End(element) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                path.pop();
                match name.as_str() {
                    "annotation" => {
                        if let (Some(page), Some(annotation)) =
                            (current_page.as_mut(), current_annotation.take())
                        {
                            page.annotations.push(annotation);
                        }
                    }
                    "page" => {
                        if let Some(page) = current_page.take() {
                            info.pages.push(page);
                        }
                    }
                    "history" => {
                        in_history = false;
                        info.history = Some(std::mem::take(&mut history));
                    }
                    "view" => {
                        if let Some(view) = current_view.take() {
                            info.views.push(view);
                        }
                    }
                    _ => {}
                }
                if path.is_empty() {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(DocumentError::MetadataParseFailed("missing documentInfo root".into()));
    }
    Ok(info)
}

fn parse_annotation(element: &BytesStart) -> Option<Annotation> {
    let kind = AnnotationKind::from_str(&attribute(element, "type")?)?;
    Some(Annotation {
        kind,
        author: attribute(element, "author").unwrap_or_default(),
        contents: String::new(),
        boundary: NormalizedRect::new(
            attribute(element, "l").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            attribute(element, "t").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            attribute(element, "r").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            attribute(element, "b").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        ),
        color: attribute(element, "color")
            .and_then(|hex| color_from_hex(&hex))
            .unwrap_or(Color::YELLOW),
        external: attribute(element, "external").as_deref() == Some("true"),
    })
}

fn attribute(element: &BytesStart, name: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

fn color_to_hex(color: Color) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
}

fn color_from_hex(hex: &str) -> Option<Color> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
    let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
    let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
    Some(Color::rgb(r, g, b))
}
