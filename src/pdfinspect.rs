use crate::compose::{media_box, page_ids};
use crate::outline::outline_titles;
use crate::types::Size;
use lopdf::{Document as LoDocument, Object as LoObject};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a PDF cannot be read, or cannot stand in as a layer plot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PdfInspectError {
    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("not a readable PDF: {0}")]
    Parse(String),
    #[error("encrypted PDFs are not supported")]
    Encrypted,
    #[error("PDF has no pages")]
    NoPages,
}

/// Summary of a plotted, merged or assembled PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    pub sha256: String,
    pub first_page_size: Option<Size>,
    pub outline_titles: Vec<String>,
    /// Annotations across all pages (footprint popups end up here).
    pub annotation_count: usize,
    pub has_javascript: bool,
    /// 1-based numbers of pages without any content operations.
    pub empty_pages: Vec<usize>,
}

fn annotation_count(pdf: &LoDocument) -> usize {
    page_ids(pdf)
        .into_iter()
        .filter_map(|id| pdf.get_object(id).and_then(LoObject::as_dict).ok())
        .filter_map(|page| page.get(b"Annots").ok())
        .map(|annots| match annots {
            LoObject::Array(items) => items.len(),
            LoObject::Reference(id) => pdf
                .get_object(*id)
                .and_then(LoObject::as_array)
                .map(Vec::len)
                .unwrap_or(0),
            _ => 0,
        })
        .sum()
}

fn has_javascript(pdf: &LoDocument) -> bool {
    pdf.catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"Names").ok())
        .map(|names| crate::compose::resolve_dict(pdf, names))
        .is_some_and(|names| names.has(b"JavaScript"))
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport, PdfInspectError> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| PdfInspectError::Parse(err.to_string()))?;

    let pages = page_ids(&pdf);
    let first_page_size = pages.first().map(|id| media_box(&pdf, *id).size());
    let empty_pages = pages
        .iter()
        .enumerate()
        .filter(|(_, id)| pdf.get_page_content(**id).map_or(true, |c| c.is_empty()))
        .map(|(idx, _)| idx + 1)
        .collect();

    Ok(PdfInspectReport {
        pdf_version: pdf.version.clone(),
        page_count: pages.len(),
        encrypted: pdf.is_encrypted(),
        file_size_bytes: bytes.len(),
        sha256: format!("{:x}", Sha256::digest(bytes)),
        first_page_size,
        outline_titles: outline_titles(&pdf),
        annotation_count: annotation_count(&pdf),
        has_javascript: has_javascript(&pdf),
        empty_pages,
    })
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport, PdfInspectError> {
    let data = std::fs::read(path).map_err(|err| PdfInspectError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    inspect_pdf_bytes(&data)
}

/// Layer plots are merged page by page, so they must open without a
/// password and carry at least one page.
pub fn require_merge_input(report: &PdfInspectReport) -> Result<(), PdfInspectError> {
    if report.encrypted {
        return Err(PdfInspectError::Encrypted);
    }
    if report.page_count == 0 {
        return Err(PdfInspectError::NoPages);
    }
    Ok(())
}
