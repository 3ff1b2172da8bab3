//! Document archives
//!
//! An archive bundles the original document with its metadata sidecar in a
//! single ZIP container, described by a `content.xml` manifest. The manifest
//! layout is a stable wire format shared with the established archive
//! ecosystem, hence the legacy `OkularArchive` root element.

use crate::error::{DocumentError, DocumentResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// MIME type identifying document archives.
pub const ARCHIVE_MIME: &str = "application/vnd.quire-archive";

/// File extension of document archives.
pub const ARCHIVE_EXTENSION: &str = "quire";

const MANIFEST_NAME: &str = "content.xml";
const METADATA_NAME: &str = "metadata.xml";
const MANIFEST_ROOT: &str = "OkularArchive";

/// Extracted contents of an opened archive.
///
/// The temp files keep the extracted document and sidecar alive for the
/// lifetime of the open document.
#[derive(Debug)]
pub struct ArchiveData {
    pub document: NamedTempFile,
    pub metadata: Option<NamedTempFile>,
    pub document_file_name: String,
}

/// Whether `path` looks like a document archive (by extension, which is how
/// the MIME type is assigned for local files).
pub fn is_archive_path(path: &Path) -> bool {
    path.extension().map(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION)).unwrap_or(false)
}

/// Best-effort MIME for the document embedded in an archive.
pub fn mime_for_document(file_name: &str) -> String {
    let extension =
        Path::new(file_name).extension().map(|e| e.to_string_lossy().to_lowercase());
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("epub") => "application/epub+zip",
        Some("djvu") => "image/vnd.djvu",
        Some("xps") => "application/oxps",
        Some("cbz") => "application/vnd.comicbook+zip",
        Some("ps") => "application/postscript",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Open an archive and extract its parts to temp files.
pub(crate) fn open_archive(path: &Path) -> DocumentResult<ArchiveData> {
    if !is_archive_path(path) {
        return Err(DocumentError::ArchiveMalformed(format!(
            "{} does not carry the {ARCHIVE_MIME} type",
            path.display()
        )));
    }

    let file = File::open(path)?;
    let mut container = ZipArchive::new(file)?;

    let manifest = {
        let mut entry = container
            .by_name(MANIFEST_NAME)
            .map_err(|_| DocumentError::ArchiveMalformed("missing content.xml".into()))?;
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        parse_manifest(&bytes)?
    };

    let document = extract_entry(&mut container, &manifest.document_file_name)
        .ok_or_else(|| DocumentError::ArchiveMalformed("missing document entry".into()))?;

    let metadata = match &manifest.metadata_file_name {
        Some(name) => extract_entry(&mut container, name),
        None => None,
    };

    Ok(ArchiveData { document, metadata, document_file_name: manifest.document_file_name })
}

/// Write an archive containing the manifest, the document bytes and the
/// metadata sidecar.
pub(crate) fn write_archive(
    target: &Path,
    document_file_name: &str,
    document_source: &Path,
    metadata_xml: &[u8],
) -> DocumentResult<()> {
    let mut writer = ZipWriter::new(File::create(target)?);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer.start_file(MANIFEST_NAME, stored)?;
    writer.write_all(&write_manifest(document_file_name)?)?;

    writer.start_file(document_file_name, deflated)?;
    let mut document = File::open(document_source)?;
    std::io::copy(&mut document, &mut writer)?;

    writer.start_file(METADATA_NAME, deflated)?;
    writer.write_all(metadata_xml)?;

    writer.finish()?;
    Ok(())
}

struct Manifest {
    document_file_name: String,
    metadata_file_name: Option<String>,
}

fn write_manifest(document_file_name: &str) -> DocumentResult<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(MANIFEST_ROOT)))?;
    writer.write_event(Event::Start(BytesStart::new("Files")))?;

    writer.write_event(Event::Start(BytesStart::new("DocumentFileName")))?;
    writer.write_event(Event::Text(BytesText::new(document_file_name)))?;
    writer.write_event(Event::End(BytesEnd::new("DocumentFileName")))?;

    writer.write_event(Event::Start(BytesStart::new("MetadataFileName")))?;
    writer.write_event(Event::Text(BytesText::new(METADATA_NAME)))?;
    writer.write_event(Event::End(BytesEnd::new("MetadataFileName")))?;

    writer.write_event(Event::End(BytesEnd::new("Files")))?;
    writer.write_event(Event::End(BytesEnd::new(MANIFEST_ROOT)))?;
    Ok(writer.into_inner().into_inner())
}

fn parse_manifest(bytes: &[u8]) -> DocumentResult<Manifest> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut document_file_name = String::new();
    let mut metadata_file_name = None;
    let mut saw_root = false;
    let mut path: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| DocumentError::ArchiveMalformed(err.to_string()))?;
        match event {
            Event::Start(element) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                if path.is_empty() {
                    if name != MANIFEST_ROOT {
                        return Err(DocumentError::ArchiveMalformed(format!(
                            "unexpected manifest root {name}"
                        )));
                    }
                    saw_root = true;
                }
                path.push(name);
            }
            Event::Text(text) => {
                let content = text
                    .unescape()
                    .map_err(|err| DocumentError::ArchiveMalformed(err.to_string()))?;
                match path.last().map(String::as_str) {
                    Some("DocumentFileName") => document_file_name = content.into_owned(),
                    Some("MetadataFileName") => metadata_file_name = Some(content.into_owned()),
                    _ => {}
                }
            }
            Event::End(_) => {
                path.pop();
                if path.is_empty() {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(DocumentError::ArchiveMalformed("missing manifest root".into()));
    }
    if document_file_name.is_empty() {
        return Err(DocumentError::ArchiveMalformed("manifest names no document".into()));
    }
    // Sidecar names must stay inside the container.
    if document_file_name.contains('/') || document_file_name.contains('\\') {
        return Err(DocumentError::ArchiveMalformed("document entry escapes the archive".into()));
    }
    Ok(Manifest { document_file_name, metadata_file_name })
}

fn extract_entry(container: &mut ZipArchive<File>, name: &str) -> Option<NamedTempFile> {
    let mut entry = container.by_name(name).ok()?;
    let suffix = Path::new(name)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .and_then(|f| f.find('.').map(|dot| f[dot..].to_string()))
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new().suffix(&suffix).tempfile().ok()?;
    std::io::copy(&mut entry, temp.as_file_mut()).ok()?;
    temp.as_file_mut().flush().ok()?;
    Some(temp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_archive(dir: &Path, metadata: &[u8]) -> std::path::PathBuf {
        let source = dir.join("doc.pdf");
        std::fs::write(&source, b"%PDF-1.4 fake body").unwrap();
        let target = dir.join("bundle.quire");
        write_archive(&target, "doc.pdf", &source, metadata).unwrap();
        target
    }

    #[test]
    fn test_round_trip_preserves_entry_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = b"<?xml version=\"1.0\"?><documentInfo url=\"doc.pdf\"/>".to_vec();
        let target = build_archive(dir.path(), &metadata);

        let data = open_archive(&target).unwrap();
        assert_eq!(data.document_file_name, "doc.pdf");
        assert_eq!(std::fs::read(data.document.path()).unwrap(), b"%PDF-1.4 fake body");
        let extracted_metadata = data.metadata.expect("metadata entry present");
        assert_eq!(std::fs::read(extracted_metadata.path()).unwrap(), metadata);
    }

    #[test]
    fn test_extracted_document_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let target = build_archive(dir.path(), b"<documentInfo/>");
        let data = open_archive(&target).unwrap();
        assert!(data.document.path().to_string_lossy().ends_with(".pdf"));
    }

    #[test]
    fn test_manifest_round_trip() {
        let bytes = write_manifest("paper.epub").unwrap();
        let manifest = parse_manifest(&bytes).unwrap();
        assert_eq!(manifest.document_file_name, "paper.epub");
        assert_eq!(manifest.metadata_file_name.as_deref(), Some("metadata.xml"));
    }

    #[test]
    fn test_wrong_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.zip");
        std::fs::write(&path, b"PK").unwrap();
        assert!(matches!(open_archive(&path), Err(DocumentError::ArchiveMalformed(_))));
    }

    #[test]
    fn test_missing_manifest_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.quire");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("unrelated.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();

        assert!(matches!(open_archive(&path), Err(DocumentError::ArchiveMalformed(_))));
    }

    #[test]
    fn test_manifest_with_path_traversal_is_rejected() {
        assert!(parse_manifest(
            b"<OkularArchive><Files><DocumentFileName>../evil.pdf</DocumentFileName></Files></OkularArchive>"
        )
        .is_err());
    }

    #[test]
    fn test_mime_for_document() {
        assert_eq!(mime_for_document("a.pdf"), "application/pdf");
        assert_eq!(mime_for_document("b.EPUB"), "application/epub+zip");
        assert_eq!(mime_for_document("weird.bin"), "application/octet-stream");
    }

    #[test]
    fn test_is_archive_path() {
        assert!(is_archive_path(Path::new("/x/y.quire")));
        assert!(is_archive_path(Path::new("/x/y.QUIRE")));
        assert!(!is_archive_path(Path::new("/x/y.pdf")));
    }
}
