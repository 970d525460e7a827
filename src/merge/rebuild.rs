use super::{MergeEngine, MergeLayer, ScaledLayout, form_name};
use crate::compose::{
    DocumentBuilder, first_page_id, import_with_catalog, load_document, media_box, page_as_form,
    place_form, rect_array, resolve, save_document, visible_box,
};
use crate::error::{Board2PdfError, Result};
use crate::outline::{adopt_outline, retitle_or_create};
use crate::types::{Rect, Size};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::Path;

/// Builds a fresh single page document and paints every layer onto it as a
/// form. The topmost layer's outline is carried over; its annotations only
/// when the page keeps its size.
#[derive(Debug, Default, Clone, Copy)]
pub struct RebuildMerger;

struct Placed {
    form: ObjectId,
    bbox: Rect,
    is_frame: bool,
}

/// The topmost layer's page and catalog as imported.
struct TopLayer {
    page: ObjectId,
    catalog: Option<ObjectId>,
    annots: Option<Object>,
}

/// Imports page 1 of every layer as a form, measuring it with `page_box`.
fn import_layers(
    builder: &mut DocumentBuilder,
    layers: &[MergeLayer],
    page_box: fn(&Document, ObjectId) -> Rect,
) -> Result<(Vec<Placed>, Option<TopLayer>)> {
    let mut placed = Vec::with_capacity(layers.len());
    let mut top = None;
    for (idx, layer) in layers.iter().enumerate() {
        let src = load_document("merge_layers", &layer.path)?;
        first_page_id(&src, &layer.path)?;
        let (pages, catalog) = import_with_catalog(&mut builder.doc, src);
        let page = pages[0];
        if idx + 1 == layers.len() {
            let annots = builder
                .doc
                .get_object(page)
                .and_then(Object::as_dict)
                .and_then(|dict| dict.get(b"Annots"))
                .ok()
                .and_then(|annots| resolve(&builder.doc, annots).ok())
                .cloned();
            top = Some(TopLayer {
                page,
                catalog,
                annots,
            });
        }
        let bbox = page_box(&builder.doc, page);
        let form = page_as_form(&mut builder.doc, page)
            .map_err(|e| Board2PdfError::pdf("merge_layers", &layer.path, e))?;
        placed.push(Placed {
            form,
            bbox,
            is_frame: layer.is_frame,
        });
    }
    Ok((placed, top))
}

/// Writes the page tree, carries the top layer's outline onto `page_id`
/// under `title`, and saves.
fn finish(
    mut builder: DocumentBuilder,
    page_id: ObjectId,
    top: Option<TopLayer>,
    output: &Path,
    title: &str,
) -> Result<()> {
    builder.finish();
    let pdf_err = |e| Board2PdfError::pdf("merge_layers", output, e);
    if let Some(TopLayer {
        page,
        catalog: Some(catalog),
        ..
    }) = top
    {
        adopt_outline(&mut builder.doc, catalog, page, page_id).map_err(pdf_err)?;
    }
    retitle_or_create(&mut builder.doc, title, page_id).map_err(pdf_err)?;
    save_document(&mut builder.doc, "merge_layers", output)
}

fn page_dict<'a>(builder: &'a mut DocumentBuilder, page_id: ObjectId, output: &Path) -> Result<&'a mut Dictionary> {
    builder
        .doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| Board2PdfError::pdf("merge_layers", output, e))
}

impl MergeEngine for RebuildMerger {
    fn name(&self) -> &'static str {
        "rebuild"
    }

    fn merge_unscaled(&self, layers: &[MergeLayer], output: &Path, title: &str) -> Result<()> {
        let mut builder = DocumentBuilder::new();
        let (placed, mut top) = import_layers(&mut builder, layers, media_box)?;
        let Some(size) = placed
            .iter()
            .map(|p| p.bbox.size())
            .reduce(Size::union)
        else {
            return Err(Board2PdfError::Config(format!("template {title} has no layers")));
        };

        let mut content = String::new();
        let mut xobjects = Dictionary::new();
        for (idx, layer) in placed.iter().enumerate() {
            let name = form_name(idx);
            content.push_str(&place_form(
                &name,
                1.0,
                -layer.bbox.x.to_f32(),
                -layer.bbox.y.to_f32(),
            ));
            xobjects.set(name, layer.form);
        }
        let mut resources = Dictionary::new();
        resources.set("XObject", xobjects);
        let page_id = builder.add_page(Rect::from_size(size), content.into_bytes(), resources);
        if let Some(annots) = top.as_mut().and_then(|t| t.annots.take()) {
            page_dict(&mut builder, page_id, output)?.set("Annots", annots);
        }
        finish(builder, page_id, top, output, title)
    }

    fn merge_scaled(&self, layers: &[MergeLayer], output: &Path, title: &str, factor: f32) -> Result<()> {
        let mut builder = DocumentBuilder::new();
        let (placed, top) = import_layers(&mut builder, layers, visible_box)?;
        let boxes: Vec<(bool, Rect)> = placed.iter().map(|p| (p.is_frame, p.bbox)).collect();
        let layout = ScaledLayout::new(&boxes, factor);

        let mut content = String::new();
        let mut xobjects = Dictionary::new();
        for (idx, layer) in placed.iter().enumerate() {
            let name = form_name(idx);
            let (scale, dx, dy) = layout.placement(layer.is_frame, layer.bbox);
            content.push_str(&place_form(&name, scale, dx, dy));
            xobjects.set(name, layer.form);
        }
        let mut resources = Dictionary::new();
        resources.set("XObject", xobjects);
        let page_id = builder.add_page(layout.page, content.into_bytes(), resources);
        page_dict(&mut builder, page_id, output)?.set("CropBox", rect_array(layout.crop));
        finish(builder, page_id, top, output, title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::rect_page_pdf;
    use crate::drawing::extract_first_page;
    use crate::merge::tests::layer_files;
    use crate::pdfinspect::inspect_pdf_path;
    use crate::types::Rgb;

    #[test]
    fn page_matches_the_largest_input_and_keeps_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut layers = layer_files(dir.path(), Size::new(100.0, 100.0));
        let wide = dir.path().join("wide.pdf");
        rect_page_pdf(&wide, Size::new(180.0, 60.0), &[]);
        layers.insert(0, MergeLayer::new(&wide, false));
        let out = dir.path().join("merged.pdf");
        RebuildMerger
            .merge_unscaled(&layers, &out, "Top")
            .expect("merge");

        let report = inspect_pdf_path(&out).expect("inspect");
        assert_eq!(report.page_count, 1);
        assert_eq!(report.first_page_size, Some(Size::new(180.0, 100.0)));
        assert_eq!(report.outline_titles, vec!["Top".to_string()]);

        let page = extract_first_page(&out).expect("drawings");
        let fills: Vec<Option<Rgb>> = page.drawings.iter().map(|d| d.fill).collect();
        assert_eq!(
            fills,
            vec![
                Some(Rgb::BLACK),
                Some(Rgb::new(0.0, 0.0, 1.0)),
                Some(Rgb::new(1.0, 0.0, 0.0)),
            ]
        );
    }

    #[test]
    fn output_matches_overlay_geometry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layers = layer_files(dir.path(), Size::new(90.0, 90.0));
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        RebuildMerger.merge_unscaled(&layers, &a, "T").expect("rebuild");
        super::super::OverlayMerger
            .merge_unscaled(&layers, &b, "T")
            .expect("overlay");
        let left = extract_first_page(&a).expect("a");
        let right = extract_first_page(&b).expect("b");
        assert_eq!(left.media_box, right.media_box);
        let segs = |p: &crate::drawing::PageDrawings| {
            p.drawings.iter().map(|d| d.segments.clone()).collect::<Vec<_>>()
        };
        assert_eq!(segs(&left), segs(&right));
    }
}
