//! Stacking of single-layer pages into one template page.

mod overlay;
mod rebuild;

use crate::capabilities::EngineKind;
use crate::error::{Board2PdfError, Result};
use crate::types::{Rect, Size};
use std::path::{Path, PathBuf};

pub use overlay::OverlayMerger;
pub use rebuild::RebuildMerger;

/// One input page of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLayer {
    pub path: PathBuf,
    pub is_frame: bool,
}

impl MergeLayer {
    pub fn new(path: impl Into<PathBuf>, is_frame: bool) -> Self {
        Self {
            path: path.into(),
            is_frame,
        }
    }
}

pub trait MergeEngine {
    fn name(&self) -> &'static str;

    /// Paints `layers` (bottom-first) onto one page at their own size and
    /// writes it to `output`, with the first outline entry titled `title`.
    fn merge_unscaled(&self, layers: &[MergeLayer], output: &Path, title: &str) -> Result<()>;

    /// Like [`MergeEngine::merge_unscaled`], but the page is enlarged by
    /// `factor` following [`ScaledLayout`]. Annotations do not survive.
    fn merge_scaled(&self, layers: &[MergeLayer], output: &Path, title: &str, factor: f32)
    -> Result<()>;
}

pub fn engine_for(kind: EngineKind) -> Box<dyn MergeEngine> {
    match kind {
        EngineKind::Fast => Box::new(OverlayMerger),
        EngineKind::Portable => Box::new(RebuildMerger),
    }
}

/// Routes to the unscaled or scaled merge; a factor of 1.0 is unscaled.
pub fn merge_layers(
    engine: &dyn MergeEngine,
    layers: &[MergeLayer],
    output: &Path,
    title: &str,
    factor: Option<f32>,
) -> Result<()> {
    if layers.is_empty() {
        return Err(Board2PdfError::Config(format!(
            "template {title} has no layer files to merge"
        )));
    }
    match factor.filter(|f| *f != 1.0) {
        None => {
            log::info!(
                "merging {} layers for {title} with {}",
                layers.len(),
                engine.name()
            );
            engine.merge_unscaled(layers, output, title)
        }
        Some(factor) => {
            log::info!(
                "merging {} layers for {title} scaled by {factor}; annotations are dropped",
                layers.len()
            );
            engine.merge_scaled(layers, output, title, factor)
        }
    }
}

fn form_name(index: usize) -> String {
    format!("B2PLayer{index}")
}

/// Page box of the largest layer by area; ties keep the first.
fn largest(boxes: &[Rect]) -> Rect {
    boxes
        .iter()
        .copied()
        .fold(None::<Rect>, |best, candidate| match best {
            Some(b) if b.size().area() >= candidate.size().area() => Some(b),
            _ => Some(candidate),
        })
        .unwrap_or_else(|| Rect::from_size(Size::letter()))
}

/// Geometry of a scaled merge: a page of `largest × factor` with a centred
/// crop box at the frame's size. The frame is placed 1:1 in the crop box,
/// every other layer is scaled by the factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScaledLayout {
    pub page: Rect,
    pub crop: Rect,
    factor: f32,
}

impl ScaledLayout {
    /// `boxes` holds `(is_frame, visible box)` for every layer.
    pub fn new(boxes: &[(bool, Rect)], factor: f32) -> Self {
        let rects: Vec<Rect> = boxes.iter().map(|(_, b)| *b).collect();
        let base = largest(&rects);
        let page = Rect::from_size(base.size().scaled(factor));
        let frame_size = boxes
            .iter()
            .find(|(is_frame, _)| *is_frame)
            .map(|(_, b)| b.size())
            .unwrap_or_else(|| base.size());
        Self {
            page,
            crop: page.centered(frame_size),
            factor,
        }
    }

    /// `(scale, dx, dy)` that places a layer whose visible box is `bbox`.
    pub fn placement(&self, is_frame: bool, bbox: Rect) -> (f32, f32, f32) {
        if is_frame {
            (
                1.0,
                (self.crop.x - bbox.x).to_f32(),
                (self.crop.y - bbox.y).to_f32(),
            )
        } else {
            (
                self.factor,
                -bbox.x.to_f32() * self.factor,
                -bbox.y.to_f32() * self.factor,
            )
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compose::testing::rect_page_pdf;
    use crate::compose::{first_page_id, load_document, save_document, visible_box};
    use crate::drawing::extract_first_page;
    use crate::outline::{decode_text, encode_text, outline_titles};
    use crate::pdfinspect::inspect_pdf_path;
    use crate::types::Rgb;
    use lopdf::{Document, Object, dictionary};

    /// Three layer files, bottom-first: frame outline, silk, copper.
    pub(crate) fn layer_files(dir: &Path, size: Size) -> Vec<MergeLayer> {
        let frame = dir.join("frame.pdf");
        let silk = dir.join("silk.pdf");
        let copper = dir.join("copper.pdf");
        rect_page_pdf(&frame, size, &[(Rect::from_corners(0.0, 0.0, 5.0, 5.0), Rgb::BLACK)]);
        rect_page_pdf(
            &silk,
            size,
            &[(Rect::from_corners(20.0, 20.0, 60.0, 60.0), Rgb::new(0.0, 0.0, 1.0))],
        );
        rect_page_pdf(
            &copper,
            size,
            &[(Rect::from_corners(40.0, 40.0, 80.0, 80.0), Rgb::new(1.0, 0.0, 0.0))],
        );
        vec![
            MergeLayer::new(frame, true),
            MergeLayer::new(silk, false),
            MergeLayer::new(copper, false),
        ]
    }

    #[test]
    fn scaled_merge_enlarges_page_and_centres_crop_box() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layers = layer_files(dir.path(), Size::new(100.0, 50.0));
        let out = dir.path().join("scaled.pdf");
        for engine in [engine_for(EngineKind::Fast), engine_for(EngineKind::Portable)] {
            merge_layers(engine.as_ref(), &layers, &out, "Top", Some(3.0)).expect("merge");
            let doc = load_document("test", &out).expect("load");
            let page = first_page_id(&doc, &out).expect("page");
            assert_eq!(crate::compose::media_box(&doc, page).size(), Size::new(300.0, 150.0));
            let crop = visible_box(&doc, page);
            assert_eq!(crop, Rect::from_corners(100.0, 50.0, 200.0, 100.0));
            let report = inspect_pdf_path(&out).expect("inspect");
            assert_eq!(report.outline_titles, vec!["Top".to_string()]);
        }
    }

    /// Gives `path` the outline a plotter writes: one board entry with a
    /// child bookmark per footprint.
    pub(crate) fn add_footprint_outline(path: &Path, children: &[&str]) {
        let mut doc = Document::load(path).expect("load");
        let page = first_page_id(&doc, path).expect("page");
        let parent = doc.new_object_id();
        let ids: Vec<_> = children.iter().map(|_| doc.new_object_id()).collect();
        for (idx, (name, id)) in children.iter().zip(&ids).enumerate() {
            let mut item = dictionary! {
                "Title" => encode_text(name),
                "Parent" => parent,
                "Dest" => vec![Object::Reference(page), "XYZ".into(), 10.into(), 10.into(), Object::Null],
            };
            if idx > 0 {
                item.set("Prev", ids[idx - 1]);
            }
            if let Some(next) = ids.get(idx + 1) {
                item.set("Next", *next);
            }
            doc.objects.insert(*id, Object::Dictionary(item));
        }
        let root = doc.new_object_id();
        let mut board = dictionary! {
            "Title" => encode_text("demo"),
            "Parent" => root,
            "Dest" => vec![Object::Reference(page), "Fit".into()],
        };
        if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
            board.set("First", *first);
            board.set("Last", *last);
            board.set("Count", ids.len() as i64);
        }
        doc.objects.insert(parent, Object::Dictionary(board));
        doc.objects.insert(
            root,
            Object::Dictionary(dictionary! {
                "Type" => "Outlines",
                "First" => parent,
                "Last" => parent,
                "Count" => 1,
            }),
        );
        let catalog = crate::compose::catalog_id(&doc).expect("catalog");
        doc.get_object_mut(catalog)
            .and_then(Object::as_dict_mut)
            .expect("catalog dict")
            .set("Outlines", root);
        save_document(&mut doc, "test", path).expect("save");
    }

    /// Titles of the first entry's children, and whether each points at page 1.
    pub(crate) fn footprint_bookmarks(path: &Path) -> Vec<(String, bool)> {
        let doc = Document::load(path).expect("load");
        let page = first_page_id(&doc, path).expect("page");
        let catalog = crate::compose::catalog_id(&doc).expect("catalog");
        let Some(first) = crate::outline::top_level_items(&doc, catalog).first().copied() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut next = doc
            .get_object(first)
            .and_then(Object::as_dict)
            .and_then(|d| d.get(b"First"))
            .and_then(Object::as_reference)
            .ok();
        while let Some(id) = next {
            let item = doc.get_object(id).and_then(Object::as_dict).expect("item");
            let title = decode_text(item.get(b"Title").expect("title")).expect("text");
            let on_page = item
                .get(b"Dest")
                .and_then(Object::as_array)
                .map(|dest| matches!(dest[0], Object::Reference(target) if target == page))
                .unwrap_or(false);
            out.push((title, on_page));
            next = item.get(b"Next").and_then(Object::as_reference).ok();
        }
        out
    }

    #[test]
    fn footprint_bookmarks_survive_every_engine_and_scale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layers = layer_files(dir.path(), Size::new(100.0, 50.0));
        add_footprint_outline(&layers[2].path, &["R1", "C2"]);
        let expected = vec![("R1".to_string(), true), ("C2".to_string(), true)];
        for kind in [EngineKind::Fast, EngineKind::Portable] {
            for factor in [None, Some(2.0)] {
                let engine = engine_for(kind);
                let out = dir.path().join(format!("{kind:?}_{factor:?}.pdf"));
                merge_layers(engine.as_ref(), &layers, &out, "Top", factor).expect("merge");
                assert_eq!(outline_titles(&load_document("test", &out).expect("load")), vec!["Top"]);
                assert_eq!(footprint_bookmarks(&out), expected, "{kind:?} {factor:?}");
            }
        }
    }

    #[test]
    fn both_engines_scale_to_the_same_picture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layers = layer_files(dir.path(), Size::new(100.0, 50.0));
        let fast = dir.path().join("fast.pdf");
        let portable = dir.path().join("portable.pdf");
        merge_layers(engine_for(EngineKind::Fast).as_ref(), &layers, &fast, "T", Some(2.0))
            .expect("fast");
        merge_layers(engine_for(EngineKind::Portable).as_ref(), &layers, &portable, "T", Some(2.0))
            .expect("portable");
        let left = extract_first_page(&fast).expect("fast drawings");
        let right = extract_first_page(&portable).expect("portable drawings");
        assert_eq!(left.media_box, right.media_box);
        assert_eq!(left.visible_box, right.visible_box);
        let picture = |p: &crate::drawing::PageDrawings| {
            p.drawings
                .iter()
                .map(|d| (d.fill, d.segments.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(picture(&left), picture(&right));
        // silk 20..60 scaled by 2, the frame square 1:1 at the crop origin
        assert_eq!(
            right.drawings[1].segments[0],
            crate::drawing::PathSegment::MoveTo(40.0, 40.0)
        );
        assert_eq!(
            right.drawings[0].segments[0],
            crate::drawing::PathSegment::MoveTo(50.0, 25.0)
        );
    }

    #[test]
    fn frame_sits_unscaled_in_the_centred_crop_box() {
        let layout = ScaledLayout::new(
            &[
                (true, Rect::from_size(Size::new(100.0, 50.0))),
                (false, Rect::from_size(Size::new(120.0, 60.0))),
            ],
            2.0,
        );
        assert_eq!(layout.page, Rect::from_size(Size::new(240.0, 120.0)));
        assert_eq!(layout.crop, Rect::from_corners(70.0, 35.0, 170.0, 85.0));
        assert_eq!(
            layout.placement(true, Rect::from_size(Size::new(100.0, 50.0))),
            (1.0, 70.0, 35.0)
        );
        assert_eq!(
            layout.placement(false, Rect::from_corners(10.0, 0.0, 130.0, 60.0)),
            (2.0, -20.0, 0.0)
        );
    }

    #[test]
    fn empty_layer_list_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_for(EngineKind::Portable);
        let err = merge_layers(engine.as_ref(), &[], &dir.path().join("x.pdf"), "T", None)
            .expect_err("empty");
        assert!(matches!(err, Board2PdfError::Config(_)));
    }

    #[test]
    fn largest_box_wins_by_area() {
        let boxes = [
            Rect::from_size(Size::new(100.0, 100.0)),
            Rect::from_size(Size::new(300.0, 10.0)),
            Rect::from_size(Size::new(120.0, 90.0)),
        ];
        assert_eq!(largest(&boxes).size(), Size::new(120.0, 90.0));
    }
}
