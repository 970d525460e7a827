//! Concatenation of the per-template pages into the assembly document.

use crate::compose::{DocumentBuilder, first_page_id, import_with_catalog, load_document, save_document};
use crate::error::{Board2PdfError, Result};
use crate::outline::{OutlinePart, chain_outlines, top_level_items};
use lopdf::{Document, Object, dictionary};
use std::path::{Path, PathBuf};

/// Document-level handler called by footprint popup annotations: shows the
/// menu, then jumps to `#<page>` entries or opens `http…` entries.
pub const POPUP_MENU_JS: &str = "function ShM(aEntries) { var aParams = []; for (var i in aEntries) { aParams.push({ cName: aEntries[i][0], cReturn: aEntries[i][1] }) } var cChoice = app.popUpMenuEx.apply(app, aParams); if (cChoice != null && cChoice.substring(0, 1) == '#') this.pageNum = parseInt(cChoice.slice(1)); else if (cChoice != null && cChoice.substring(0, 4) == 'http') app.launchURL(cChoice); }";

/// One page of the assembly: a merged template file and its title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyPage {
    pub path: PathBuf,
    pub title: String,
}

impl AssemblyPage {
    pub fn new(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
        }
    }
}

fn add_popup_javascript(doc: &mut Document, catalog: lopdf::ObjectId) -> lopdf::Result<()> {
    let action = doc.add_object(dictionary! {
        "S" => "JavaScript",
        "JS" => Object::string_literal(POPUP_MENU_JS),
    });
    let catalog = doc.get_object_mut(catalog).and_then(Object::as_dict_mut)?;
    catalog.set(
        "Names",
        dictionary! {
            "JavaScript" => dictionary! {
                "Names" => vec![Object::string_literal("ShM"), Object::Reference(action)],
            },
        },
    );
    Ok(())
}

/// Writes page 1 of every input, in order, into `output`. Source files are
/// only read; compression happens on the new document.
pub fn assemble(pages: &[AssemblyPage], output: &Path, inject_popup_js: bool) -> Result<()> {
    if pages.is_empty() {
        return Err(Board2PdfError::Config(
            "no template pages to assemble".to_string(),
        ));
    }
    log::info!(
        "assembling {} pages into {}",
        pages.len(),
        output.display()
    );
    let mut builder = DocumentBuilder::new();
    let mut parts = Vec::with_capacity(pages.len());
    for page in pages {
        let src = load_document("create_pdf_from_pages", &page.path)?;
        first_page_id(&src, &page.path)?;
        let (page_ids, catalog) = import_with_catalog(&mut builder.doc, src);
        let page_id = page_ids[0];
        if page_ids.len() > 1 {
            log::warn!(
                "{} has {} pages; only the first is assembled",
                page.path.display(),
                page_ids.len()
            );
        }
        builder
            .adopt_page(page_id)
            .map_err(|e| Board2PdfError::pdf("create_pdf_from_pages", &page.path, e))?;
        let items = catalog
            .map(|id| top_level_items(&builder.doc, id))
            .unwrap_or_default();
        parts.push(OutlinePart {
            items,
            title: page.title.clone(),
            page_id,
        });
    }

    let catalog = builder.finish();
    let doc = &mut builder.doc;
    chain_outlines(doc, &parts).map_err(|e| Board2PdfError::pdf("create_pdf_from_pages", output, e))?;
    if inject_popup_js {
        add_popup_javascript(doc, catalog)
            .map_err(|e| Board2PdfError::pdf("create_pdf_from_pages", output, e))?;
    }
    save_document(doc, "create_pdf_from_pages", output)
}
