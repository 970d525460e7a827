//! SVG export of a template page (page 1 only).

use crate::drawing::{Drawing, PageDrawings, PathSegment, extract_first_page};
use crate::error::{Board2PdfError, Result};
use crate::types::{Rgb, pdf_number};
use std::fmt::Write as _;
use std::path::Path;

fn path_data(segments: &[PathSegment]) -> String {
    let mut d = String::new();
    for segment in segments {
        if !d.is_empty() {
            d.push(' ');
        }
        let _ = match *segment {
            PathSegment::MoveTo(x, y) => write!(d, "M{} {}", pdf_number(x), pdf_number(y)),
            PathSegment::LineTo(x, y) => write!(d, "L{} {}", pdf_number(x), pdf_number(y)),
            PathSegment::CurveTo(x1, y1, x2, y2, x, y) => write!(
                d,
                "C{} {} {} {} {} {}",
                pdf_number(x1),
                pdf_number(y1),
                pdf_number(x2),
                pdf_number(y2),
                pdf_number(x),
                pdf_number(y)
            ),
            PathSegment::Close => write!(d, "Z"),
        };
    }
    d
}

fn paint_attr(out: &mut String, name: &str, color: Option<Rgb>, opacity: f32) {
    match color {
        Some(color) => {
            let _ = write!(out, " {name}=\"{}\"", color.to_hex());
            if opacity < 1.0 {
                let _ = write!(out, " {name}-opacity=\"{}\"", pdf_number(opacity));
            }
        }
        None => {
            let _ = write!(out, " {name}=\"none\"");
        }
    }
}

fn path_element(out: &mut String, drawing: &Drawing) {
    let _ = write!(out, "<path d=\"{}\"", path_data(&drawing.segments));
    paint_attr(out, "fill", drawing.fill, drawing.fill_opacity);
    if drawing.fill.is_some() && drawing.even_odd {
        out.push_str(" fill-rule=\"evenodd\"");
    }
    paint_attr(out, "stroke", drawing.stroke, drawing.stroke_opacity);
    if drawing.stroke.is_some() {
        let _ = write!(out, " stroke-width=\"{}\"", pdf_number(drawing.line_width));
        match drawing.line_cap {
            1 => out.push_str(" stroke-linecap=\"round\""),
            2 => out.push_str(" stroke-linecap=\"square\""),
            _ => {}
        }
        match drawing.line_join {
            1 => out.push_str(" stroke-linejoin=\"round\""),
            2 => out.push_str(" stroke-linejoin=\"bevel\""),
            _ => {}
        }
        if let Some((pattern, phase)) = &drawing.dash {
            if !pattern.is_empty() {
                let values: Vec<String> = pattern.iter().map(|v| pdf_number(*v)).collect();
                let _ = write!(out, " stroke-dasharray=\"{}\"", values.join(" "));
                if *phase != 0.0 {
                    let _ = write!(out, " stroke-dashoffset=\"{}\"", pdf_number(*phase));
                }
            }
        }
    }
    out.push_str("/>\n");
}

/// Standalone SVG of the visible area of `page`; one `<path>` per drawing
/// in paint order.
pub fn svg_document(page: &PageDrawings) -> String {
    let area = page.visible_box;
    let size = area.size();
    let width = pdf_number(size.width.to_f32());
    let height = pdf_number(size.height.to_f32());
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" version=\"1.1\" width=\"{width}pt\" height=\"{height}pt\" viewBox=\"0 0 {width} {height}\">"
    );
    let _ = writeln!(
        out,
        "<g transform=\"matrix(1 0 0 -1 {} {})\">",
        pdf_number(-area.x.to_f32()),
        area.top().pdf_number()
    );
    for drawing in &page.drawings {
        path_element(&mut out, drawing);
    }
    out.push_str("</g>\n</svg>\n");
    out
}

/// Writes page 1 of `pdf` as SVG to `output`.
pub fn export_svg(pdf: &Path, output: &Path) -> Result<()> {
    let page = extract_first_page(pdf)?;
    log::info!("exporting {} to {}", pdf.display(), output.display());
    std::fs::write(output, svg_document(&page)).map_err(|e| Board2PdfError::io("create_svg", output, e))
}
