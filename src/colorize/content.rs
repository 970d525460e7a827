use super::ColorizeEngine;
use crate::compose::{first_page_id, load_document, obj_to_f32, save_document};
use crate::error::{Board2PdfError, Result};
use crate::types::Rgb;
use lopdf::content::{Content, Operation};
use lopdf::{Object, Stream, dictionary};
use std::path::Path;

/// Operator-level recolouring: decodes page 1 into operations and replaces
/// the operands of black `rg`/`RG`. Works everywhere lopdf does.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentColorizer;

fn is_black_operands(op: &Operation, file: &Path) -> Result<bool> {
    if op.operands.len() != 3 {
        return Err(Board2PdfError::content_stream(
            file,
            format!(
                "{} with {} operands, expected 3: {:?}",
                op.operator,
                op.operands.len(),
                op.operands
            ),
        ));
    }
    let mut black = true;
    for operand in &op.operands {
        let value = obj_to_f32(operand).ok_or_else(|| {
            Board2PdfError::content_stream(
                file,
                format!("{} has non-numeric operand {:?}", op.operator, operand),
            )
        })?;
        black &= value == 0.0;
    }
    Ok(black)
}

/// Rewrites `operations` in place; returns how many operators changed.
pub(crate) fn substitute_operations(
    operations: &mut [Operation],
    color: Rgb,
    file: &Path,
) -> Result<usize> {
    let mut changed = 0;
    for op in operations.iter_mut() {
        if op.operator != "rg" && op.operator != "RG" {
            continue;
        }
        if is_black_operands(op, file)? {
            op.operands = color.components().iter().map(|c| Object::Real(*c)).collect();
            changed += 1;
        }
    }
    Ok(changed)
}

impl ColorizeEngine for ContentColorizer {
    fn name(&self) -> &'static str {
        "content"
    }

    fn substitute_black(&self, input: &Path, output: &Path, color: Rgb) -> Result<usize> {
        let mut doc = load_document("colorize", input)?;
        let page_id = first_page_id(&doc, input)?;
        let bytes = doc
            .get_page_content(page_id)
            .map_err(|e| Board2PdfError::pdf("colorize", input, e))?;
        let mut content = Content::decode(&bytes)
            .map_err(|e| Board2PdfError::content_stream(input, format!("page content: {e}")))?;
        let changed = substitute_operations(&mut content.operations, color, input)?;
        let encoded = content
            .encode()
            .map_err(|e| Board2PdfError::pdf("colorize", input, e))?;

        let stream_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| Board2PdfError::pdf("colorize", input, e))?
            .set("Contents", stream_id);
        save_document(&mut doc, "colorize", output)?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::raw_page_pdf;
    use crate::drawing::extract_first_page;
    use crate::types::Size;

    #[test]
    fn only_black_operands_are_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        raw_page_pdf(
            &input,
            Size::letter(),
            b"0 0 0 rg 0 0 10 10 re f 0 0 1 rg 20 20 5 5 re f 0 0 0 RG 0 0 m 5 5 l S",
        );
        let changed = ContentColorizer
            .substitute_black(&input, &output, Rgb::new(1.0, 0.0, 0.0))
            .expect("colorize");
        assert_eq!(changed, 2);

        let page = extract_first_page(&output).expect("drawings");
        assert_eq!(page.drawings.len(), 3);
        assert_eq!(page.drawings[0].fill, Some(Rgb::new(1.0, 0.0, 0.0)));
        assert_eq!(page.drawings[1].fill, Some(Rgb::new(0.0, 0.0, 1.0)));
        assert_eq!(page.drawings[2].stroke, Some(Rgb::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn unexpected_arity_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("bad-layer.pdf");
        raw_page_pdf(&input, Size::letter(), b"0 0 rg 0 0 10 10 re f");
        let err = ContentColorizer
            .substitute_black(&input, &dir.path().join("out.pdf"), Rgb::new(1.0, 0.0, 0.0))
            .expect_err("arity");
        assert!(matches!(err, Board2PdfError::ContentStream { .. }));
        assert!(err.to_string().contains("bad-layer.pdf"));
        assert!(!dir.path().join("out.pdf").exists());
    }
}
