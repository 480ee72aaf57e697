use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use termdoc_core::{
    document_id_for_path, Document, DocumentInfo, DocumentMetadata, NormalizedRect, PagedBackend,
    RenderImage, RenderRequest, ViewerError,
};
use tracing::{instrument, warn};

pub(crate) struct PdfiumLoader {
    pdfium: Arc<Pdfium>,
}

impl PdfiumLoader {
    pub(crate) fn new() -> Result<Self> {
        let pdfium = match bind_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }

    pub(crate) fn open(&self, path: &Path) -> Result<Document, ViewerError> {
        let absolute = path
            .canonicalize()
            .map_err(|err| ViewerError::CorruptOrUnreadable {
                message: format!("{}: {}", path.display(), err),
            })?;
        let info = build_document_info(&self.pdfium, &absolute).map_err(|err| {
            ViewerError::CorruptOrUnreadable {
                message: err.to_string(),
            }
        })?;
        Ok(Document::Paged(Arc::new(PdfiumPagedDocument::new(
            Arc::clone(&self.pdfium),
            absolute,
            info,
        ))))
    }
}

struct PdfiumPagedDocument {
    path: PathBuf,
    info: DocumentInfo,
    cache: Mutex<Option<RenderCacheEntry>>,
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    page_index: usize,
    scale: f32,
    image: RenderImage,
}

impl PdfiumPagedDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            path,
            info,
            cache: Mutex::new(None),
            document: Mutex::new(None),
            pdfium,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the PdfDocument borrows from the Pdfium bindings behind
        // self.pdfium. It is stored in self.document, which is declared
        // before self.pdfium and is therefore dropped first, so the borrow
        // never outlives the bindings it points into.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        let document = guard.as_ref().expect("document must be loaded");
        f(document)
    }

    fn render_internal(
        &self,
        document: &PdfDocument<'_>,
        request: &RenderRequest,
    ) -> Result<RenderImage> {
        let page_index: PdfPageIndex = request
            .page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", request.page_index))?;
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", request.page_index))?;

        // The viewer enforces its own zoom floor; this guard only protects
        // pdfium from a degenerate render matrix.
        let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let image = bitmap.as_image().to_rgba8();
        let pixels = image.into_raw();

        Ok(RenderImage {
            width: u32::try_from(bitmap.width()).unwrap_or_default(),
            height: u32::try_from(bitmap.height()).unwrap_or_default(),
            pixels,
        })
    }
}

impl PagedBackend for PdfiumPagedDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page_index == request.page_index
                    && (entry.scale - request.scale).abs() < f32::EPSILON
                {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.with_document(|document| self.render_internal(document, &request))?;

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            page_index: request.page_index,
            scale: request.scale,
            image: image.clone(),
        });

        Ok(image)
    }

    #[instrument(skip(self))]
    fn search_page(&self, page_index: usize, query: &str) -> Result<Vec<NormalizedRect>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        self.with_document(|document| {
            let page_index: PdfPageIndex = page_index
                .try_into()
                .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
            let page = document
                .pages()
                .get(page_index)
                .with_context(|| format!("page {} out of range", page_index))?;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;

            // Default options: case-insensitive, no whole-word constraint.
            let options = PdfSearchOptions::new();
            let search = text
                .search(query, &options)
                .with_context(|| format!("failed to search page {}", page_index))?;

            let page_width = page.width().value;
            let page_height = page.height().value;
            if page_width <= 0.0 || page_height <= 0.0 {
                return Ok(Vec::new());
            }

            let mut results = Vec::new();
            while let Some(segments) = search.find_next() {
                let mut bounds: Option<NormalizedRect> = None;
                for segment in segments.iter() {
                    let segment_bounds = segment.bounds();
                    let left = (segment_bounds.left().value / page_width).clamp(0.0, 1.0);
                    let right = (segment_bounds.right().value / page_width).clamp(0.0, 1.0);
                    // PDF page space grows upward; flip to the top-left
                    // origin the viewer uses.
                    let top = (1.0 - segment_bounds.top().value / page_height).clamp(0.0, 1.0);
                    let bottom =
                        (1.0 - segment_bounds.bottom().value / page_height).clamp(0.0, 1.0);
                    let rect = NormalizedRect {
                        left,
                        top,
                        right,
                        bottom,
                    }
                    .clamp();
                    if !rect.is_valid() {
                        continue;
                    }
                    bounds = Some(match bounds {
                        Some(existing) => existing.union(rect),
                        None => rect,
                    });
                }
                if let Some(rect) = bounds {
                    results.push(rect);
                }
            }

            Ok(results)
        })
    }
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|tag| tag.value().to_owned())
        .filter(|value| !value.is_empty());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|tag| tag.value().to_owned())
        .filter(|value| !value.is_empty());

    Ok(DocumentInfo {
        id: document_id_for_path(path),
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata { title, author },
    })
}

// Binding order: the library path baked in at build time, then a copy next
// to the working directory, then the system loader path.
fn bind_from_build_hint() -> Option<Pdfium> {
    let path = option_env!("TERMDOC_PDFIUM_LIBRARY_PATH").filter(|path| !path.is_empty())?;
    match Pdfium::bind_to_library(path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(path, %err, "build-provided pdfium library did not load");
            None
        }
    }
}

fn bind_default() -> Result<Pdfium> {
    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    let cwd_err = match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => err,
    };

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|sys_err| {
            anyhow!(
                "no usable pdfium library ({}: {cwd_err}, system: {sys_err})",
                cwd_path.display()
            )
        })
}
