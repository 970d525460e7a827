//! Vector drawing extraction from a page: paths with their paint state,
//! flattened into page space. Text and images are not drawings and are
//! skipped.

use crate::compose::{media_box, obj_to_f32, page_resources, resolve, resolve_dict, visible_box};
use crate::error::{Board2PdfError, Result};
use crate::types::{Rect, Rgb};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub fn identity() -> Self {
        Self::from_operands(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub fn from_operands(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn concat(self, rhs: Self) -> Self {
        Self {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    pub fn transform_point(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Linear scale of the matrix, used to carry line widths into page space.
    fn scale_factor(self) -> f32 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathSegment {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    CurveTo(f32, f32, f32, f32, f32, f32),
    Close,
}

/// One painted path in page space.
#[derive(Clone, Debug, PartialEq)]
pub struct Drawing {
    pub segments: Vec<PathSegment>,
    /// `None` when the path is not filled.
    pub fill: Option<Rgb>,
    /// `None` when the path is not stroked.
    pub stroke: Option<Rgb>,
    pub even_odd: bool,
    pub line_width: f32,
    pub line_cap: u8,
    pub line_join: u8,
    pub dash: Option<(Vec<f32>, f32)>,
    pub fill_opacity: f32,
    pub stroke_opacity: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PageDrawings {
    pub media_box: Rect,
    /// CropBox, or the MediaBox when the page has none.
    pub visible_box: Rect,
    pub drawings: Vec<Drawing>,
}

#[derive(Clone, Default)]
struct Resources {
    xobjects: HashMap<Vec<u8>, ObjectId>,
    extgstates: HashMap<Vec<u8>, (f32, f32)>,
}

impl Resources {
    fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let mut out = Resources::default();
        if let Ok(obj) = dict.get(b"XObject") {
            for (name, value) in resolve_dict(doc, obj).iter() {
                if let Ok(id) = value.as_reference() {
                    out.xobjects.insert(name.clone(), id);
                }
            }
        }
        if let Ok(obj) = dict.get(b"ExtGState") {
            for (name, value) in resolve_dict(doc, obj).iter() {
                let gs = resolve_dict(doc, value);
                let fill = gs.get(b"ca").ok().and_then(obj_to_f32).unwrap_or(1.0);
                let stroke = gs.get(b"CA").ok().and_then(obj_to_f32).unwrap_or(1.0);
                out.extgstates
                    .insert(name.clone(), (fill.clamp(0.0, 1.0), stroke.clamp(0.0, 1.0)));
            }
        }
        out
    }

    fn merged(&self, inner: &Resources) -> Resources {
        let mut out = self.clone();
        out.xobjects.extend(inner.xobjects.clone());
        out.extgstates.extend(inner.extgstates.clone());
        out
    }
}

#[derive(Clone)]
struct GraphicsState {
    ctm: Matrix,
    fill: Rgb,
    stroke: Rgb,
    line_width: f32,
    line_cap: u8,
    line_join: u8,
    dash: Option<(Vec<f32>, f32)>,
    fill_opacity: f32,
    stroke_opacity: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::identity(),
            fill: Rgb::BLACK,
            stroke: Rgb::BLACK,
            line_width: 1.0,
            line_cap: 0,
            line_join: 0,
            dash: None,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
        }
    }
}

struct Extractor<'a> {
    doc: &'a Document,
    file: &'a Path,
    path: Vec<PathSegment>,
    out: Vec<Drawing>,
    visited_forms: HashSet<ObjectId>,
}

impl Extractor<'_> {
    fn arity_error(&self, op: &Operation, expected: usize) -> Board2PdfError {
        Board2PdfError::content_stream(
            self.file,
            format!(
                "operator {} expects {expected} numeric operands, got {:?}",
                op.operator, op.operands
            ),
        )
    }

    fn numbers<const N: usize>(&self, op: &Operation) -> Result<[f32; N]> {
        let mut out = [0.0f32; N];
        if op.operands.len() < N {
            return Err(self.arity_error(op, N));
        }
        for (slot, obj) in out.iter_mut().zip(&op.operands) {
            *slot = obj_to_f32(obj).ok_or_else(|| self.arity_error(op, N))?;
        }
        Ok(out)
    }

    fn point(&self, state: &GraphicsState, x: f32, y: f32) -> (f32, f32) {
        state.ctm.transform_point(x, y)
    }

    fn paint(&mut self, state: &GraphicsState, fill: bool, stroke: bool, even_odd: bool) {
        let segments = std::mem::take(&mut self.path);
        if segments.is_empty() || (!fill && !stroke) {
            return;
        }
        self.out.push(Drawing {
            segments,
            fill: fill.then_some(state.fill),
            stroke: stroke.then_some(state.stroke),
            even_odd,
            line_width: state.line_width * state.ctm.scale_factor(),
            line_cap: state.line_cap,
            line_join: state.line_join,
            dash: state.dash.clone(),
            fill_opacity: state.fill_opacity,
            stroke_opacity: state.stroke_opacity,
        });
    }

    fn run(
        &mut self,
        operations: &[Operation],
        resources: &Resources,
        state: &mut GraphicsState,
    ) -> Result<()> {
        let mut stack: Vec<GraphicsState> = Vec::new();
        for op in operations {
            match op.operator.as_str() {
                "q" => stack.push(state.clone()),
                "Q" => {
                    if let Some(prev) = stack.pop() {
                        *state = prev;
                    }
                }
                "cm" => {
                    let [a, b, c, d, e, f] = self.numbers::<6>(op)?;
                    state.ctm = Matrix::from_operands(a, b, c, d, e, f).concat(state.ctm);
                }
                "w" => state.line_width = self.numbers::<1>(op)?[0].max(0.0),
                "J" => state.line_cap = self.numbers::<1>(op)?[0].clamp(0.0, 2.0) as u8,
                "j" => state.line_join = self.numbers::<1>(op)?[0].clamp(0.0, 2.0) as u8,
                "d" => {
                    let pattern: Vec<f32> = op
                        .operands
                        .first()
                        .and_then(|o| o.as_array().ok())
                        .map(|arr| arr.iter().filter_map(obj_to_f32).map(f32::abs).collect())
                        .unwrap_or_default();
                    let phase = op.operands.get(1).and_then(obj_to_f32).unwrap_or(0.0);
                    state.dash = (!pattern.is_empty()).then_some((pattern, phase));
                }
                "gs" => {
                    let name = op.operands.first().and_then(|o| o.as_name().ok());
                    if let Some((fill, stroke)) = name.and_then(|n| resources.extgstates.get(n)) {
                        state.fill_opacity = *fill;
                        state.stroke_opacity = *stroke;
                    }
                }
                "rg" => {
                    let [r, g, b] = self.numbers::<3>(op)?;
                    state.fill = Rgb::new(r, g, b);
                }
                "RG" => {
                    let [r, g, b] = self.numbers::<3>(op)?;
                    state.stroke = Rgb::new(r, g, b);
                }
                "g" => {
                    let [v] = self.numbers::<1>(op)?;
                    state.fill = Rgb::new(v, v, v);
                }
                "G" => {
                    let [v] = self.numbers::<1>(op)?;
                    state.stroke = Rgb::new(v, v, v);
                }
                "k" => {
                    let [c, m, y, k] = self.numbers::<4>(op)?;
                    state.fill = cmyk_to_rgb(c, m, y, k);
                }
                "K" => {
                    let [c, m, y, k] = self.numbers::<4>(op)?;
                    state.stroke = cmyk_to_rgb(c, m, y, k);
                }
                "sc" | "scn" => {
                    if let Some(color) = color_from_components(op) {
                        state.fill = color;
                    }
                }
                "SC" | "SCN" => {
                    if let Some(color) = color_from_components(op) {
                        state.stroke = color;
                    }
                }
                "m" => {
                    let [x, y] = self.numbers::<2>(op)?;
                    let (x, y) = self.point(state, x, y);
                    self.path.push(PathSegment::MoveTo(x, y));
                }
                "l" => {
                    let [x, y] = self.numbers::<2>(op)?;
                    let (x, y) = self.point(state, x, y);
                    self.path.push(PathSegment::LineTo(x, y));
                }
                "c" => {
                    let [x1, y1, x2, y2, x3, y3] = self.numbers::<6>(op)?;
                    let (x1, y1) = self.point(state, x1, y1);
                    let (x2, y2) = self.point(state, x2, y2);
                    let (x3, y3) = self.point(state, x3, y3);
                    self.path.push(PathSegment::CurveTo(x1, y1, x2, y2, x3, y3));
                }
                "v" | "y" => {
                    let [a, b, x3, y3] = self.numbers::<4>(op)?;
                    let current = self.current_point();
                    let (ax, ay) = self.point(state, a, b);
                    let (x3, y3) = self.point(state, x3, y3);
                    let segment = if op.operator == "v" {
                        PathSegment::CurveTo(current.0, current.1, ax, ay, x3, y3)
                    } else {
                        PathSegment::CurveTo(ax, ay, x3, y3, x3, y3)
                    };
                    self.path.push(segment);
                }
                "re" => {
                    let [x, y, w, h] = self.numbers::<4>(op)?;
                    let p0 = self.point(state, x, y);
                    let p1 = self.point(state, x + w, y);
                    let p2 = self.point(state, x + w, y + h);
                    let p3 = self.point(state, x, y + h);
                    self.path.extend([
                        PathSegment::MoveTo(p0.0, p0.1),
                        PathSegment::LineTo(p1.0, p1.1),
                        PathSegment::LineTo(p2.0, p2.1),
                        PathSegment::LineTo(p3.0, p3.1),
                        PathSegment::Close,
                    ]);
                }
                "h" => self.path.push(PathSegment::Close),
                "f" | "F" => self.paint(state, true, false, false),
                "f*" => self.paint(state, true, false, true),
                "S" => self.paint(state, false, true, false),
                "s" => {
                    self.path.push(PathSegment::Close);
                    self.paint(state, false, true, false);
                }
                "B" => self.paint(state, true, true, false),
                "B*" => self.paint(state, true, true, true),
                "b" => {
                    self.path.push(PathSegment::Close);
                    self.paint(state, true, true, false);
                }
                "b*" => {
                    self.path.push(PathSegment::Close);
                    self.paint(state, true, true, true);
                }
                "n" => self.path.clear(),
                "Do" => {
                    let name = op.operands.first().and_then(|o| o.as_name().ok());
                    if let Some(id) = name.and_then(|n| resources.xobjects.get(n)).copied() {
                        self.run_form(id, resources, state)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn current_point(&self) -> (f32, f32) {
        for segment in self.path.iter().rev() {
            match *segment {
                PathSegment::MoveTo(x, y) | PathSegment::LineTo(x, y) => return (x, y),
                PathSegment::CurveTo(_, _, _, _, x, y) => return (x, y),
                PathSegment::Close => {}
            }
        }
        (0.0, 0.0)
    }

    fn run_form(&mut self, id: ObjectId, parent: &Resources, state: &GraphicsState) -> Result<()> {
        let Ok(stream) = self.doc.get_object(id).and_then(Object::as_stream) else {
            return Ok(());
        };
        let is_form = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|n| n == b"Form")
            .unwrap_or(false);
        if !is_form || !self.visited_forms.insert(id) {
            return Ok(());
        }
        let bytes = stream
            .get_plain_content()
            .map_err(|e| Board2PdfError::pdf("extract_drawings", self.file, e))?;
        let content = Content::decode(&bytes).map_err(|e| {
            Board2PdfError::content_stream(self.file, format!("form xobject {id:?}: {e}"))
        })?;
        let inner = match stream.dict.get(b"Resources") {
            Ok(obj) => Resources::from_dict(self.doc, &resolve_dict(self.doc, obj)),
            Err(_) => Resources::default(),
        };
        let form_matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|obj| resolve(self.doc, obj).ok())
            .and_then(parse_matrix_object)
            .unwrap_or_else(Matrix::identity);

        let mut nested = state.clone();
        nested.ctm = form_matrix.concat(state.ctm);
        let saved_path = std::mem::take(&mut self.path);
        self.run(&content.operations, &parent.merged(&inner), &mut nested)?;
        self.path = saved_path;
        self.visited_forms.remove(&id);
        Ok(())
    }
}

fn parse_matrix_object(obj: &Object) -> Option<Matrix> {
    let arr = obj.as_array().ok()?;
    if arr.len() < 6 {
        return None;
    }
    Some(Matrix::from_operands(
        obj_to_f32(&arr[0])?,
        obj_to_f32(&arr[1])?,
        obj_to_f32(&arr[2])?,
        obj_to_f32(&arr[3])?,
        obj_to_f32(&arr[4])?,
        obj_to_f32(&arr[5])?,
    ))
}

fn color_from_components(op: &Operation) -> Option<Rgb> {
    let values: Vec<f32> = op.operands.iter().map_while(obj_to_f32).collect();
    match values.as_slice() {
        [v] => Some(Rgb::new(*v, *v, *v)),
        [r, g, b] => Some(Rgb::new(*r, *g, *b)),
        [c, m, y, k] => Some(cmyk_to_rgb(*c, *m, *y, *k)),
        _ => None,
    }
}

fn cmyk_to_rgb(c: f32, m: f32, y: f32, k: f32) -> Rgb {
    let c = c.clamp(0.0, 1.0);
    let m = m.clamp(0.0, 1.0);
    let y = y.clamp(0.0, 1.0);
    let k = k.clamp(0.0, 1.0);
    Rgb::new((1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k))
}

/// Every painted path on `page_id`, including those inside form XObjects.
pub fn extract_page_drawings(doc: &Document, page_id: ObjectId, file: &Path) -> Result<PageDrawings> {
    let bytes = doc
        .get_page_content(page_id)
        .map_err(|e| Board2PdfError::pdf("extract_drawings", file, e))?;
    let content = Content::decode(&bytes)
        .map_err(|e| Board2PdfError::content_stream(file, format!("page content: {e}")))?;
    let resources = Resources::from_dict(doc, &page_resources(doc, page_id));
    let mut extractor = Extractor {
        doc,
        file,
        path: Vec::new(),
        out: Vec::new(),
        visited_forms: HashSet::new(),
    };
    let mut state = GraphicsState::default();
    extractor.run(&content.operations, &resources, &mut state)?;
    log::debug!(
        "{}: extracted {} drawings",
        file.display(),
        extractor.out.len()
    );
    Ok(PageDrawings {
        media_box: media_box(doc, page_id),
        visible_box: visible_box(doc, page_id),
        drawings: extractor.out,
    })
}

/// Loads `file` and extracts the drawings of page 1.
pub fn extract_first_page(file: &Path) -> Result<PageDrawings> {
    let doc = crate::compose::load_document("extract_drawings", file)?;
    let page = crate::compose::first_page_id(&doc, file)?;
    extract_page_drawings(&doc, page, file)
}
