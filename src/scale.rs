//! Post-merge geometry: crop the page to its content, fit the content into
//! the frame page, or enlarge everything but the frame by a fixed factor.

use crate::compose::{
    DocumentBuilder, blank_document, first_page_id, import_with_catalog, load_document, media_box,
    page_as_form, place_form, rect_array, save_document, visible_box,
};
use crate::crop::CropTool;
use crate::error::{Board2PdfError, Result};
use crate::merge::{MergeEngine, MergeLayer, merge_layers};
use crate::outline::{adopt_outline, retitle_or_create};
use crate::template::ScaleOrCrop;
use crate::types::Rect;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::{Path, PathBuf};

/// Uniform scale and offset that fit `content` centred inside `target`.
pub fn fit_placement(content: Rect, target: Rect) -> (f32, f32, f32) {
    let (cx, cy) = (content.x.to_f32(), content.y.to_f32());
    let (cw, ch) = (content.width.to_f32(), content.height.to_f32());
    let (tx, ty) = (target.x.to_f32(), target.y.to_f32());
    let (tw, th) = (target.width.to_f32(), target.height.to_f32());
    if cw <= 0.0 || ch <= 0.0 {
        return (1.0, tx - cx, ty - cy);
    }
    let scale = (tw / cw).min(th / ch);
    let dx = tx + (tw - cw * scale) / 2.0 - cx * scale;
    let dy = ty + (th - ch * scale) / 2.0 - cy * scale;
    (scale, dx, dy)
}

fn sibling(work_dir: &Path, prefix: &str, output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template.pdf".to_string());
    work_dir.join(format!("{prefix}{name}"))
}

/// Merges `layers` (bottom-first) and applies `policy`, writing the template
/// page to `output`. Intermediate files go to `work_dir`.
pub fn merge_with_policy(
    engine: &dyn MergeEngine,
    crop: &CropTool,
    policy: ScaleOrCrop,
    layers: &[MergeLayer],
    work_dir: &Path,
    output: &Path,
    title: &str,
) -> Result<()> {
    match policy {
        ScaleOrCrop::None => merge_layers(engine, layers, output, title, None),
        ScaleOrCrop::ScaleBy { factor } => merge_layers(engine, layers, output, title, Some(factor)),
        ScaleOrCrop::Crop { whitespace } => {
            if layers.iter().any(|l| l.is_frame) {
                log::warn!(
                    "template {title} crops with a frame layer configured; the frame fills the page so nothing will be cropped"
                );
            }
            let merged = sibling(work_dir, "merged_", output);
            merge_layers(engine, layers, &merged, title, None)?;
            crop.crop(&merged, output, whitespace)
        }
        ScaleOrCrop::ScaleToFit { whitespace } => {
            let frame = layers.iter().find(|l| l.is_frame);
            let content: Vec<MergeLayer> = layers.iter().filter(|l| !l.is_frame).cloned().collect();
            if content.is_empty() {
                return Err(Board2PdfError::Config(format!(
                    "template {title} has only a frame layer, there is nothing to scale"
                )));
            }
            let merged = sibling(work_dir, "merged_", output);
            let cropped = sibling(work_dir, "cropped_", output);
            merge_layers(engine, &content, &merged, title, None)?;
            crop.crop(&merged, &cropped, whitespace)?;
            fit_into_frame(
                &cropped,
                frame.map(|f| f.path.as_path()),
                &content[0].path,
                output,
                title,
            )
        }
    }
}

/// Scales page 1 of `content` (its visible box) to fit centred inside the
/// frame page, with the frame painted 1:1 on top. Without a frame, a blank
/// page the size of `reference`'s page 1 stands in for it.
pub fn fit_into_frame(
    content: &Path,
    frame: Option<&Path>,
    reference: &Path,
    output: &Path,
    title: &str,
) -> Result<()> {
    let frame_doc = match frame {
        Some(path) => load_document("scale_to_fit", path)?,
        None => {
            let doc = load_document("scale_to_fit", reference)?;
            let page = first_page_id(&doc, reference)?;
            log::debug!("no frame layer for {title}; using a blank page as reference");
            blank_document(media_box(&doc, page).size())
        }
    };
    let frame_path = frame.unwrap_or(reference);

    let mut builder = DocumentBuilder::new();
    let content_doc = load_document("scale_to_fit", content)?;
    let content_layer = import_as_form(&mut builder.doc, content, content_doc)?;
    let frame_layer = import_as_form(&mut builder.doc, frame_path, frame_doc)?;
    let (content_box, frame_box) = (content_layer.bbox, frame_layer.bbox);

    let (scale, dx, dy) = fit_placement(content_box, frame_box);
    log::debug!("fitting {} into frame at scale {scale}", content.display());
    let mut body = place_form("B2PContent", scale, dx, dy);
    body.push_str(&place_form("B2PFrame", 1.0, 0.0, 0.0));

    let mut xobjects = Dictionary::new();
    xobjects.set("B2PContent", content_layer.form);
    xobjects.set("B2PFrame", frame_layer.form);
    let mut resources = Dictionary::new();
    resources.set("XObject", xobjects);
    let page_id = builder.add_page(frame_box, body.into_bytes(), resources);
    builder.finish();
    let pdf_err = |e| Board2PdfError::pdf("scale_to_fit", output, e);
    if let Some(catalog) = content_layer.catalog {
        adopt_outline(&mut builder.doc, catalog, content_layer.page, page_id).map_err(pdf_err)?;
    }
    retitle_or_create(&mut builder.doc, title, page_id).map_err(pdf_err)?;
    save_document(&mut builder.doc, "scale_to_fit", output)
}

struct ImportedForm {
    form: ObjectId,
    bbox: Rect,
    page: ObjectId,
    catalog: Option<ObjectId>,
}

/// Imports page 1 of `src` as a form clipped to its visible box.
fn import_as_form(dst: &mut Document, path: &Path, src: Document) -> Result<ImportedForm> {
    first_page_id(&src, path)?;
    let (pages, catalog) = import_with_catalog(dst, src);
    let page_id = pages[0];
    let bbox = visible_box(dst, page_id);
    let form = page_as_form(dst, page_id).map_err(|e| Board2PdfError::pdf("scale_to_fit", path, e))?;
    dst.get_object_mut(form)
        .and_then(Object::as_stream_mut)
        .map_err(|e| Board2PdfError::pdf("scale_to_fit", path, e))?
        .dict
        .set("BBox", rect_array(bbox));
    Ok(ImportedForm {
        form,
        bbox,
        page: page_id,
        catalog,
    })
}
