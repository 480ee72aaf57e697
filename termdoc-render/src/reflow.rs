use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use epub::doc::EpubDoc;
use parking_lot::Mutex;
use termdoc_core::{
    document_id_for_path, Document, DocumentInfo, DocumentMetadata, MarkupFragment,
    ReflowableBackend, ViewerError,
};
use tracing::warn;

pub(crate) fn open_epub(path: &Path) -> Result<Document, ViewerError> {
    let doc = EpubDoc::new(path).map_err(|err| ViewerError::CorruptOrUnreadable {
        message: err.to_string(),
    })?;

    let spine_ids: Vec<String> = doc.spine.iter().map(|item| item.idref.clone()).collect();
    let metadata = DocumentMetadata {
        title: doc.mdata("title").map(|entry| entry.value.clone()),
        author: doc.mdata("creator").map(|entry| entry.value.clone()),
    };
    let info = DocumentInfo {
        id: document_id_for_path(path),
        path: path.to_path_buf(),
        page_count: spine_ids.len(),
        metadata,
    };

    Ok(Document::Reflowable(Arc::new(EpubReflowableDocument {
        info,
        spine_ids,
        doc: Mutex::new(doc),
    })))
}

/// One spine entry per viewer item; content is handed out as the raw XHTML
/// fragment stored in the archive.
struct EpubReflowableDocument {
    info: DocumentInfo,
    spine_ids: Vec<String>,
    doc: Mutex<EpubDoc<BufReader<File>>>,
}

impl ReflowableBackend for EpubReflowableDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn item_markup(&self, item_index: usize) -> Result<MarkupFragment> {
        let id = self
            .spine_ids
            .get(item_index)
            .ok_or_else(|| anyhow!("item {} out of range", item_index))?;
        let mut doc = self.doc.lock();
        let (html, _mime) = doc
            .get_resource_str(id)
            .ok_or_else(|| anyhow!("spine item {:?} has no readable content", id))?;
        Ok(MarkupFragment { html })
    }

    fn supports_text(&self) -> bool {
        true
    }

    fn item_text(&self, item_index: usize) -> Option<String> {
        let fragment = match self.item_markup(item_index) {
            Ok(fragment) => fragment,
            Err(err) => {
                warn!(item = item_index, %err, "skipping unreadable item during search");
                return None;
            }
        };
        Some(extract_text(&fragment.html))
    }
}

fn extract_text(xhtml: &str) -> String {
    match roxmltree::Document::parse(xhtml) {
        Ok(tree) => {
            let mut text = String::new();
            for node in tree.descendants() {
                if !node.is_text() {
                    continue;
                }
                if let Some(chunk) = node.text() {
                    text.push_str(chunk);
                    text.push(' ');
                }
            }
            text
        }
        // Entity-heavy XHTML the XML parser rejects still has to be
        // searchable; a coarse tag strip is enough for containment checks.
        Err(_) => strip_tags(xhtml),
    }
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if in_tag => {}
            _ => text.push(ch),
        }
    }
    text
}
