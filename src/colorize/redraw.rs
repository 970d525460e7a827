use crate::compose::{DocumentBuilder, save_document};
use crate::drawing::{Drawing, PathSegment, extract_first_page};
use crate::error::Result;
use crate::types::{Rgb, pdf_number};
use lopdf::dictionary;
use std::fmt::Write as _;
use std::path::Path;

fn push_color(out: &mut String, color: Rgb, operator: &str) {
    let [r, g, b] = color.components();
    let _ = writeln!(
        out,
        "{} {} {} {operator}",
        pdf_number(r),
        pdf_number(g),
        pdf_number(b)
    );
}

fn push_path(out: &mut String, segments: &[PathSegment]) {
    for segment in segments {
        let _ = match *segment {
            PathSegment::MoveTo(x, y) => writeln!(out, "{} {} m", pdf_number(x), pdf_number(y)),
            PathSegment::LineTo(x, y) => writeln!(out, "{} {} l", pdf_number(x), pdf_number(y)),
            PathSegment::CurveTo(x1, y1, x2, y2, x, y) => writeln!(
                out,
                "{} {} {} {} {} {} c",
                pdf_number(x1),
                pdf_number(y1),
                pdf_number(x2),
                pdf_number(y2),
                pdf_number(x),
                pdf_number(y)
            ),
            PathSegment::Close => writeln!(out, "h"),
        };
    }
}

fn paint_operator(drawing: &Drawing) -> &'static str {
    match (drawing.fill.is_some(), drawing.stroke.is_some(), drawing.even_odd) {
        (true, true, false) => "B",
        (true, true, true) => "B*",
        (true, false, false) => "f",
        (true, false, true) => "f*",
        _ => "S",
    }
}

/// Content stream redrawing `drawings` in `color`. Paint presence is kept:
/// a path that was only stroked is still only stroked.
pub fn redraw_content(drawings: &[Drawing], color: Rgb) -> Vec<u8> {
    let mut out = String::from("q\n/GSa gs\n");
    for drawing in drawings {
        out.push_str("q\n");
        if drawing.fill.is_some() {
            push_color(&mut out, color, "rg");
        }
        if drawing.stroke.is_some() {
            push_color(&mut out, color, "RG");
            let _ = writeln!(
                out,
                "{} w {} J {} j",
                pdf_number(drawing.line_width),
                drawing.line_cap,
                drawing.line_join
            );
            if let Some((pattern, phase)) = &drawing.dash {
                let pattern: Vec<String> = pattern.iter().map(|v| pdf_number(*v)).collect();
                let _ = writeln!(out, "[{}] {} d", pattern.join(" "), pdf_number(*phase));
            }
        }
        push_path(&mut out, &drawing.segments);
        out.push_str(paint_operator(drawing));
        out.push_str("\nQ\n");
    }
    out.push_str("Q\n");
    out.into_bytes()
}

/// Rebuilds page 1 of `input` as plain vector drawings in `color` with the
/// given fill and stroke opacity. Annotations and text do not survive.
pub fn redraw_with_opacity(input: &Path, output: &Path, color: Rgb, opacity: f32) -> Result<()> {
    let page = extract_first_page(input)?;
    let opacity = opacity.clamp(0.0, 1.0);
    let content = redraw_content(&page.drawings, color);

    let mut builder = DocumentBuilder::new();
    let gs_id = builder.doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => opacity,
        "CA" => opacity,
    });
    builder.add_page(
        page.media_box,
        content,
        dictionary! {
            "ExtGState" => dictionary! { "GSa" => gs_id },
        },
    );
    let mut doc = builder.into_document();
    save_document(&mut doc, "colorize", output)?;
    log::debug!(
        "redrew {} drawings of {} at opacity {opacity}",
        page.drawings.len(),
        input.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::raw_page_pdf;
    use crate::types::Size;

    #[test]
    fn stroke_only_paths_stay_unfilled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        raw_page_pdf(
            &input,
            Size::new(120.0, 80.0),
            b"2 w [3 1] 0 d 0 0 m 10 10 l S 0 0 0 rg 5 5 10 10 re f 0.2 0.2 0.2 RG 1 0 0 rg 1 1 m 2 2 3 3 4 4 c h B*",
        );
        redraw_with_opacity(&input, &output, Rgb::new(0.0, 0.5, 1.0), 0.25).expect("redraw");

        let page = extract_first_page(&output).expect("drawings");
        assert_eq!(page.media_box.size(), Size::new(120.0, 80.0));
        assert_eq!(page.drawings.len(), 3);

        let line = &page.drawings[0];
        assert_eq!(line.fill, None);
        assert_eq!(line.stroke, Some(Rgb::new(0.0, 0.5, 1.0)));
        assert!((line.line_width - 2.0).abs() < 1e-5);
        assert_eq!(line.dash, Some((vec![3.0, 1.0], 0.0)));
        assert!((line.stroke_opacity - 0.25).abs() < 1e-6);

        let rect = &page.drawings[1];
        assert_eq!(rect.stroke, None);
        assert_eq!(rect.fill, Some(Rgb::new(0.0, 0.5, 1.0)));

        let curve = &page.drawings[2];
        assert!(curve.even_odd);
        assert!(curve.fill.is_some() && curve.stroke.is_some());
        assert!(matches!(curve.segments[1], PathSegment::CurveTo(..)));
    }

    #[test]
    fn empty_page_redraws_to_empty_page() {
        assert_eq!(redraw_content(&[], Rgb::BLACK), b"q\n/GSa gs\nQ\n".to_vec());
    }
}
