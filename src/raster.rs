//! Rasterisation of page-1 vector drawings with tiny-skia. Used to check
//! the painted result of a merge (which layer ends up visible where).

use crate::drawing::{Drawing, PageDrawings, PathSegment, extract_first_page};
use crate::error::{Board2PdfError, Result};
use crate::types::Rgb;
use std::path::Path;
use tiny_skia::{FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, StrokeDash, Transform};

/// A rendered page plus the mapping from page points to pixels.
pub struct RasterPage {
    pub pixmap: Pixmap,
    scale: f32,
    origin_x: f32,
    top: f32,
}

impl RasterPage {
    /// Colour of the pixel covering page point `(x, y)`, alpha dropped.
    pub fn color_at(&self, x: f32, y: f32) -> Option<(u8, u8, u8)> {
        let px = ((x - self.origin_x) * self.scale).floor();
        let py = ((self.top - y) * self.scale).floor();
        if px < 0.0 || py < 0.0 {
            return None;
        }
        let (px, py) = (px as u32, py as u32);
        // `Pixmap::pixel` indexes `width * y + x` and would wrap rows.
        if px >= self.pixmap.width() || py >= self.pixmap.height() {
            return None;
        }
        let pixel = self.pixmap.pixel(px, py)?.demultiply();
        Some((pixel.red(), pixel.green(), pixel.blue()))
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        self.pixmap.encode_png().map_err(|e| {
            Board2PdfError::io(
                "encode_png",
                Path::new("<raster>"),
                std::io::Error::other(e.to_string()),
            )
        })
    }
}

fn build_path(segments: &[PathSegment]) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    for segment in segments {
        match *segment {
            PathSegment::MoveTo(x, y) => builder.move_to(x, y),
            PathSegment::LineTo(x, y) => builder.line_to(x, y),
            PathSegment::CurveTo(x1, y1, x2, y2, x, y) => builder.cubic_to(x1, y1, x2, y2, x, y),
            PathSegment::Close => builder.close(),
        }
    }
    builder.finish()
}

fn build_stroke(drawing: &Drawing, scale: f32) -> Stroke {
    let mut stroke = Stroke::default();
    // Zero width means the thinnest line the device can draw.
    stroke.width = if drawing.line_width > 0.0 {
        drawing.line_width
    } else {
        1.0 / scale
    };
    stroke.line_cap = match drawing.line_cap {
        1 => LineCap::Round,
        2 => LineCap::Square,
        _ => LineCap::Butt,
    };
    stroke.line_join = match drawing.line_join {
        1 => LineJoin::Round,
        2 => LineJoin::Bevel,
        _ => LineJoin::Miter,
    };
    if let Some((pattern, phase)) = &drawing.dash {
        let mut pattern: Vec<f32> = pattern.iter().map(|v| v.abs()).collect();
        if pattern.len() % 2 == 1 {
            pattern.extend(pattern.clone());
        }
        stroke.dash = StrokeDash::new(pattern, *phase);
    }
    stroke
}

fn paint(color: Rgb, opacity: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    let (r, g, b) = color.to_u8();
    paint.set_color_rgba8(r, g, b, (opacity.clamp(0.0, 1.0) * 255.0).round() as u8);
    paint.anti_alias = false;
    paint
}

/// Renders the visible area of `page` on white at `dpi`.
pub fn render_page(page: &PageDrawings, dpi: u32) -> Result<RasterPage> {
    let dpi = if dpi == 0 { 72 } else { dpi };
    let scale = dpi as f32 / 72.0;
    let area = page.visible_box;
    let size = area.size();
    let width = (size.width.to_f32() * scale).ceil().max(1.0) as u32;
    let height = (size.height.to_f32() * scale).ceil().max(1.0) as u32;
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
        Board2PdfError::Config(format!("invalid raster size {width}x{height} at {dpi} DPI"))
    })?;
    pixmap.fill(tiny_skia::Color::WHITE);

    let origin_x = area.x.to_f32();
    let top = area.top().to_f32();
    let transform = Transform::from_row(scale, 0.0, 0.0, -scale, -origin_x * scale, top * scale);
    for drawing in &page.drawings {
        let Some(path) = build_path(&drawing.segments) else {
            continue;
        };
        if let Some(fill) = drawing.fill {
            let rule = if drawing.even_odd {
                FillRule::EvenOdd
            } else {
                FillRule::Winding
            };
            pixmap.fill_path(&path, &paint(fill, drawing.fill_opacity), rule, transform, None);
        }
        if let Some(stroke) = drawing.stroke {
            pixmap.stroke_path(
                &path,
                &paint(stroke, drawing.stroke_opacity),
                &build_stroke(drawing, scale),
                transform,
                None,
            );
        }
    }
    log::debug!(
        "rendered {} drawings at {dpi} DPI ({width}x{height})",
        page.drawings.len()
    );
    Ok(RasterPage {
        pixmap,
        scale,
        origin_x,
        top,
    })
}

pub fn render_first_page(file: &Path, dpi: u32) -> Result<RasterPage> {
    render_page(&extract_first_page(file)?, dpi)
}
