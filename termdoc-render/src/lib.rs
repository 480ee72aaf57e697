//! Document backends for the viewer: pdfium-backed paged raster documents
//! and epub-backed reflowable markup documents, behind one loader that
//! dispatches on the file extension.

use std::path::Path;

use async_trait::async_trait;
use termdoc_core::{Document, DocumentKind, DocumentProvider, ViewerError};

#[cfg(feature = "pdf")]
mod paged;
mod reflow;

/// Opens either supported document kind. PDF support is feature-gated;
/// without it a `.pdf` path is reported as an unsupported format.
pub struct DocumentLibrary {
    #[cfg(feature = "pdf")]
    pdfium: paged::PdfiumLoader,
}

impl DocumentLibrary {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            #[cfg(feature = "pdf")]
            pdfium: paged::PdfiumLoader::new()?,
        })
    }
}

#[async_trait]
impl DocumentProvider for DocumentLibrary {
    async fn open(&self, path: &Path) -> Result<Document, ViewerError> {
        match DocumentKind::from_path(path)? {
            DocumentKind::Paged => {
                #[cfg(feature = "pdf")]
                {
                    self.pdfium.open(path)
                }
                #[cfg(not(feature = "pdf"))]
                {
                    Err(ViewerError::UnsupportedFormat {
                        extension: "pdf".to_string(),
                    })
                }
            }
            DocumentKind::Reflowable => reflow::open_epub(path),
        }
    }
}
