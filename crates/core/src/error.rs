//! Error taxonomy of the document core
//!
//! Open-path failures surface to the host as an `error` signal plus a clean
//! empty document; everything else is a typed `DocumentError` the caller can
//! match on. Print failures reported by generators are mapped onto a fixed
//! taxonomy so hosts can present stable, translatable messages.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no generator available for MIME type {0}")]
    NoGeneratorForMime(String),
    #[error("the generator failed to load: {0}")]
    GeneratorLoadFailed(String),
    #[error("could not open the document: {0}")]
    DocumentOpenFailed(String),
    #[error("the file {} is not readable", .0.display())]
    FileUnreadable(PathBuf),
    #[error("the archive is malformed: {0}")]
    ArchiveMalformed(String),
    #[error("the document metadata could not be parsed: {0}")]
    MetadataParseFailed(String),
    #[error("the render request exceeds the pixel budget")]
    RequestOversize,
    #[error("no match found")]
    NoMatchFound,
    #[error("the search was cancelled")]
    SearchCancelled,
    #[error("printing failed: {0}")]
    PrintFailed(PrintError),
    #[error("the requested export format is unavailable")]
    ExportUnavailable,
    #[error("the generator cannot save changes to this document")]
    SaveUnsupported,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("archive container error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Fixed taxonomy for generator-reported print failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PrintError {
    #[error("could not create a temporary print file")]
    TempFile,
    #[error("the document could not be converted for printing")]
    Conversion,
    #[error("the print process crashed")]
    Crash,
    #[error("the print process could not be started")]
    Start,
    #[error("printing to a file failed")]
    PrintToFile,
    #[error("the printer is in an invalid state")]
    InvalidState,
    #[error("the print program could not be found")]
    UnableToFind,
    #[error("there is no file to print")]
    NoFile,
    #[error("the print binary is missing")]
    NoBinary,
    #[error("printing failed for an unknown reason")]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_stable() {
        let err = DocumentError::NoGeneratorForMime("application/x-unknown".into());
        assert_eq!(
            err.to_string(),
            "no generator available for MIME type application/x-unknown"
        );

        let err = DocumentError::FileUnreadable(PathBuf::from("/tmp/gone.pdf"));
        assert_eq!(err.to_string(), "the file /tmp/gone.pdf is not readable");
    }

    #[test]
    fn test_print_error_taxonomy_is_exhaustive() {
        let all = [
            PrintError::TempFile,
            PrintError::Conversion,
            PrintError::Crash,
            PrintError::Start,
            PrintError::PrintToFile,
            PrintError::InvalidState,
            PrintError::UnableToFind,
            PrintError::NoFile,
            PrintError::NoBinary,
            PrintError::Unknown,
        ];
        for variant in all {
            assert!(!variant.to_string().is_empty());
        }
    }

    #[test]
    fn test_io_errors_convert() {
        fn fails() -> DocumentResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(DocumentError::Io(_))));
    }
}
