use super::{MergeEngine, MergeLayer, ScaledLayout, form_name};
use crate::compose::{
    first_page_id, import_document, load_document, media_box, page_as_form, page_resources,
    place_form, rect_array, resource_category, save_document, visible_box,
};
use crate::error::{Board2PdfError, Result};
use crate::outline::retitle_or_create;
use crate::types::{Rect, pdf_number};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use std::path::Path;

/// Keeps the topmost layer's page as the output page and paints every lower
/// layer underneath it. The top page dictionary survives apart from its
/// resources, content and boxes, so its outline is preserved, and so are its
/// annotations (footprint popups) as long as the page is not scaled.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlayMerger;

struct Base {
    doc: Document,
    page: ObjectId,
}

/// Opens the top layer as the base document.
fn open_base(top: &MergeLayer) -> Result<Base> {
    let doc = load_document("merge_layers", &top.path)?;
    let page = first_page_id(&doc, &top.path)?;
    Ok(Base { doc, page })
}

/// Imports page 1 of `layer` into the base as a form; returns it with the
/// box `page_box` measures.
fn import_lower(
    base: &mut Base,
    layer: &MergeLayer,
    page_box: fn(&Document, ObjectId) -> Rect,
) -> Result<(ObjectId, Rect)> {
    let src = load_document("merge_layers", &layer.path)?;
    first_page_id(&src, &layer.path)?;
    let page_id = import_document(&mut base.doc, src)[0];
    let bbox = page_box(&base.doc, page_id);
    let form = page_as_form(&mut base.doc, page_id)
        .map_err(|e| Board2PdfError::pdf("merge_layers", &layer.path, e))?;
    Ok((form, bbox))
}

impl Base {
    /// Puts `underlay` (painting `xobjects`) before the page's own content.
    /// With `transform`, the page's own content is drawn through that `cm`.
    fn stack(
        &mut self,
        underlay: &str,
        xobjects: Dictionary,
        transform: Option<(f32, f32, f32)>,
        path: &Path,
    ) -> Result<&mut Dictionary> {
        let mut resources = page_resources(&self.doc, self.page);
        let mut existing = resource_category(&self.doc, &resources, b"XObject");
        for (name, value) in xobjects.iter() {
            existing.set(name.clone(), value.clone());
        }
        resources.set("XObject", existing);

        let underlay_id = self.doc.add_object(Stream::new(
            dictionary! {},
            format!("q\n{underlay}Q\n").into_bytes(),
        ));
        let wrap = transform.map(|(scale, dx, dy)| {
            let open = format!(
                "q {} 0 0 {} {} {} cm\n",
                pdf_number(scale),
                pdf_number(scale),
                pdf_number(dx),
                pdf_number(dy)
            );
            (
                self.doc.add_object(Stream::new(dictionary! {}, open.into_bytes())),
                self.doc.add_object(Stream::new(dictionary! {}, b"Q\n".to_vec())),
            )
        });

        let page = self
            .doc
            .get_object_mut(self.page)
            .and_then(Object::as_dict_mut)
            .map_err(|e| Board2PdfError::pdf("merge_layers", path, e))?;
        let mut contents = vec![Object::Reference(underlay_id)];
        if let Some((open, _)) = wrap {
            contents.push(Object::Reference(open));
        }
        match page.get(b"Contents") {
            Ok(Object::Array(items)) => contents.extend(items.iter().cloned()),
            Ok(other) => contents.push(other.clone()),
            Err(_) => {}
        }
        if let Some((_, close)) = wrap {
            contents.push(Object::Reference(close));
        }
        page.set("Contents", contents);
        page.set("Resources", resources);
        Ok(page)
    }

    fn finish(mut self, top: &MergeLayer, output: &Path, title: &str) -> Result<()> {
        retitle_or_create(&mut self.doc, title, self.page)
            .map_err(|e| Board2PdfError::pdf("merge_layers", &top.path, e))?;
        save_document(&mut self.doc, "merge_layers", output)
    }
}

impl MergeEngine for OverlayMerger {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn merge_unscaled(&self, layers: &[MergeLayer], output: &Path, title: &str) -> Result<()> {
        let Some((top, lower)) = layers.split_last() else {
            return Err(Board2PdfError::Config(format!("template {title} has no layers")));
        };
        let mut base = open_base(top)?;
        let base_box = media_box(&base.doc, base.page);
        let mut size = base_box.size();
        let mut underlay = String::new();
        let mut xobjects = Dictionary::new();
        for (idx, layer) in lower.iter().enumerate() {
            let (form, layer_box) = import_lower(&mut base, layer, media_box)?;
            size = size.union(layer_box.size());
            let name = form_name(idx);
            underlay.push_str(&place_form(
                &name,
                1.0,
                (base_box.x - layer_box.x).to_f32(),
                (base_box.y - layer_box.y).to_f32(),
            ));
            xobjects.set(name, form);
        }

        let page = base.stack(&underlay, xobjects, None, &top.path)?;
        if size != base_box.size() {
            let grown = Rect {
                x: base_box.x,
                y: base_box.y,
                width: size.width,
                height: size.height,
            };
            page.set("MediaBox", rect_array(grown));
            page.remove(b"CropBox");
        }
        base.finish(top, output, title)
    }

    /// Enlarges the top layer's own page: its content is redrawn through a
    /// scaling `cm` and the lower layers are painted underneath.
    fn merge_scaled(&self, layers: &[MergeLayer], output: &Path, title: &str, factor: f32) -> Result<()> {
        let Some((top, lower)) = layers.split_last() else {
            return Err(Board2PdfError::Config(format!("template {title} has no layers")));
        };
        let mut base = open_base(top)?;
        let base_box = visible_box(&base.doc, base.page);
        let mut imported = Vec::with_capacity(lower.len());
        for layer in lower {
            let (form, bbox) = import_lower(&mut base, layer, visible_box)?;
            imported.push((layer.is_frame, bbox, form));
        }
        let mut boxes: Vec<(bool, Rect)> = imported.iter().map(|(f, b, _)| (*f, *b)).collect();
        boxes.push((top.is_frame, base_box));
        let layout = ScaledLayout::new(&boxes, factor);

        let mut underlay = String::new();
        let mut xobjects = Dictionary::new();
        for (idx, (is_frame, bbox, form)) in imported.iter().enumerate() {
            let name = form_name(idx);
            let (scale, dx, dy) = layout.placement(*is_frame, *bbox);
            underlay.push_str(&place_form(&name, scale, dx, dy));
            xobjects.set(name, *form);
        }

        let own = layout.placement(top.is_frame, base_box);
        let page = base.stack(&underlay, xobjects, Some(own), &top.path)?;
        page.set("MediaBox", rect_array(layout.page));
        page.set("CropBox", rect_array(layout.crop));
        // Annotation rectangles are in unscaled page space.
        page.remove(b"Annots");
        base.finish(top, output, title)
    }
}
