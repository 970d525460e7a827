//! Low-level page plumbing shared by the merge, scale and assembly stages.

use crate::error::{Board2PdfError, Result};
use crate::types::{Rect, Size, pdf_number};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use std::io::Write;
use std::path::Path;

pub fn load_document(function: &'static str, path: &Path) -> Result<Document> {
    let doc = Document::load(path).map_err(|e| Board2PdfError::pdf(function, path, e))?;
    if doc.is_encrypted() {
        return Err(Board2PdfError::content_stream(
            path,
            "encrypted documents cannot be recombined",
        ));
    }
    Ok(doc)
}

/// Id of page 1.
pub fn first_page_id(doc: &Document, path: &Path) -> Result<ObjectId> {
    doc.get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| Board2PdfError::content_stream(path, "document has no pages"))
}

pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().values().copied().collect()
}

pub fn obj_to_f32(obj: &Object) -> Option<f32> {
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}

pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> lopdf::Result<&'a Object> {
    loop {
        match obj {
            Object::Reference(id) => obj = doc.get_object(*id)?,
            _ => return Ok(obj),
        }
    }
}

/// Resolves `obj` to a dictionary, empty when it is anything else.
pub fn resolve_dict(doc: &Document, obj: &Object) -> Dictionary {
    match resolve(doc, obj) {
        Ok(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    }
}

/// Looks `key` up on the page and then on its ancestors.
pub fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut id = page_id;
    for _ in 0..64 {
        let dict = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        id = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

pub fn box_from_array(arr: &[Object]) -> Option<Rect> {
    if arr.len() < 4 {
        return None;
    }
    let x0 = obj_to_f32(&arr[0])?;
    let y0 = obj_to_f32(&arr[1])?;
    let x1 = obj_to_f32(&arr[2])?;
    let y1 = obj_to_f32(&arr[3])?;
    Some(Rect::from_corners(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)))
}

fn page_box_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Rect> {
    let obj = inherited_attribute(doc, page_id, key)?;
    let arr = resolve(doc, &obj).ok()?.as_array().ok()?;
    box_from_array(arr)
}

/// MediaBox, letter when the page has none.
pub fn media_box(doc: &Document, page_id: ObjectId) -> Rect {
    page_box_attribute(doc, page_id, b"MediaBox").unwrap_or_else(|| Rect::from_size(Size::letter()))
}

/// CropBox when set, otherwise the MediaBox.
pub fn visible_box(doc: &Document, page_id: ObjectId) -> Rect {
    page_box_attribute(doc, page_id, b"CropBox").unwrap_or_else(|| media_box(doc, page_id))
}

pub fn rect_array(rect: Rect) -> Vec<Object> {
    vec![
        rect.x.to_f32().into(),
        rect.y.to_f32().into(),
        rect.right().to_f32().into(),
        rect.top().to_f32().into(),
    ]
}

pub fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    match inherited_attribute(doc, page_id, b"Resources") {
        Some(obj) => resolve_dict(doc, &obj),
        None => Dictionary::new(),
    }
}

/// Resolved sub-dictionary of a resource dictionary (`XObject`, `ExtGState`).
pub fn resource_category(doc: &Document, resources: &Dictionary, key: &[u8]) -> Dictionary {
    match resources.get(key) {
        Ok(obj) => resolve_dict(doc, obj),
        Err(_) => Dictionary::new(),
    }
}

/// Wraps a page's content and resources in a Form XObject so it can be
/// painted onto another page with `Do`.
pub fn page_as_form(doc: &mut Document, page_id: ObjectId) -> lopdf::Result<ObjectId> {
    let content = doc.get_page_content(page_id)?;
    let bbox = media_box(doc, page_id);
    let resources = page_resources(doc, page_id);
    let form = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => rect_array(bbox),
            "Resources" => resources,
        },
        content,
    );
    Ok(doc.add_object(form))
}

/// Moves every object of `src` into `dst` and returns the imported page ids
/// in page order.
pub fn import_document(dst: &mut Document, src: Document) -> Vec<ObjectId> {
    import_with_catalog(dst, src).0
}

/// [`import_document`], also returning the id the source catalog got in `dst`.
pub fn import_with_catalog(dst: &mut Document, mut src: Document) -> (Vec<ObjectId>, Option<ObjectId>) {
    src.renumber_objects_with(dst.max_id + 1);
    let pages = page_ids(&src);
    let catalog = catalog_id(&src).ok();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    (pages, catalog)
}

/// `q a 0 0 d e f cm /name Do Q` for an axis-aligned placement.
pub fn place_form(name: &str, scale: f32, dx: f32, dy: f32) -> String {
    format!(
        "q {} 0 0 {} {} {} cm /{} Do Q\n",
        pdf_number(scale),
        pdf_number(scale),
        pdf_number(dx),
        pdf_number(dy),
        name
    )
}

const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// An empty document with a reserved page tree node.
pub struct DocumentBuilder {
    pub doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Adds a page whose content stream is `content`.
    pub fn add_page(&mut self, media_box: Rect, content: Vec<u8>, resources: Dictionary) -> ObjectId {
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => rect_array(media_box),
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.kids.push(Object::Reference(page_id));
        page_id
    }

    /// Re-parents an existing page dictionary under this tree. Attributes the
    /// page inherited from its old tree are copied onto the page first.
    pub fn adopt_page(&mut self, page_id: ObjectId) -> lopdf::Result<()> {
        let inherited: Vec<(&[u8], Object)> = INHERITABLE_PAGE_KEYS
            .iter()
            .filter_map(|key| Some((*key, inherited_attribute(&self.doc, page_id, key)?)))
            .collect();
        let page = self.doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
        for (key, value) in inherited {
            if !page.has(key) {
                page.set(key, value);
            }
        }
        page.set("Parent", self.pages_id);
        self.kids.push(Object::Reference(page_id));
        Ok(())
    }

    /// Writes the page tree and catalog; returns the catalog id.
    pub fn finish(&mut self) -> ObjectId {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => std::mem::take(&mut self.kids),
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        catalog_id
    }

    pub fn into_document(mut self) -> Document {
        self.finish();
        self.doc
    }
}

/// A one page document with no content.
pub fn blank_document(size: Size) -> Document {
    let mut builder = DocumentBuilder::new();
    builder.add_page(Rect::from_size(size), Vec::new(), Dictionary::new());
    builder.into_document()
}

pub fn catalog_id(doc: &Document) -> lopdf::Result<ObjectId> {
    doc.trailer.get(b"Root").and_then(Object::as_reference)
}

/// Drops unreachable objects, compresses streams and writes `doc` to `path`
/// through a sibling temporary file, so a failed write never leaves a
/// truncated PDF behind.
pub fn save_document(doc: &mut Document, function: &'static str, path: &Path) -> Result<()> {
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| Board2PdfError::io(function, path, e))?;
    doc.save_to(&mut staged)
        .map_err(|e| Board2PdfError::io(function, path, e))?;
    staged
        .flush()
        .map_err(|e| Board2PdfError::io(function, path, e))?;
    staged
        .persist(path)
        .map_err(|e| Board2PdfError::io(function, path, e.error))?;
    log::debug!("{function}: wrote {}", path.display());
    Ok(())
}

pub fn copy_file(function: &'static str, from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to).map_err(|e| Board2PdfError::io(function, from, e))?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;

    #[test]
    fn media_box_is_inherited_from_the_page_tree() {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 200.into(), 100.into()],
            }),
        );
        let rect = media_box(&doc, page_id);
        assert_eq!(rect.size(), Size::new(200.0, 100.0));
        assert_eq!(visible_box(&doc, page_id), rect);
    }

    #[test]
    fn saved_document_reloads_with_one_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("one.pdf");
        testing::rect_page_pdf(
            &path,
            Size::new(300.0, 200.0),
            &[(Rect::from_corners(10.0, 10.0, 50.0, 50.0), Rgb::new(1.0, 0.0, 0.0))],
        );
        let doc = load_document("test", &path).expect("load");
        assert_eq!(doc.get_pages().len(), 1);
        let page = first_page_id(&doc, &path).expect("page");
        assert_eq!(media_box(&doc, page).size(), Size::new(300.0, 200.0));
        let content = doc.get_page_content(page).expect("content");
        assert!(String::from_utf8_lossy(&content).contains("1 0 0 rg"));
    }

    #[test]
    fn page_can_be_wrapped_as_form() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("src.pdf");
        testing::raw_page_pdf(&path, Size::new(100.0, 100.0), b"0 0 10 10 re f");
        let mut doc = load_document("test", &path).expect("load");
        let page = first_page_id(&doc, &path).expect("page");
        let form = page_as_form(&mut doc, page).expect("form");
        let stream = doc.get_object(form).and_then(Object::as_stream).expect("stream");
        assert_eq!(
            stream.dict.get(b"Subtype").and_then(Object::as_name).expect("subtype"),
            b"Form"
        );
        assert_eq!(stream.content, b"0 0 10 10 re f".to_vec());
    }

    #[test]
    fn placement_is_formatted_without_trailing_zeros() {
        assert_eq!(place_form("L0", 1.0, 0.0, 12.5), "q 1 0 0 1 0 12.5 cm /L0 Do Q\n");
    }

    #[test]
    fn missing_input_reports_pdf_error_with_path() {
        let err = load_document("merge", Path::new("/nonexistent/x.pdf")).expect_err("missing");
        assert!(err.to_string().contains("x.pdf"));
    }
}
