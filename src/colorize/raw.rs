//! Byte-level recolouring: the page's first content stream is inflated,
//! black set-colour operators are substituted with a regex, and the stream
//! is deflated again. Nothing else in the file is reparsed or rewritten.

#[cfg(feature = "fast")]
mod engine {
    use super::super::{ColorizeEngine, color_operands_3g};
    use crate::compose::{first_page_id, load_document, save_document};
    use crate::error::{Board2PdfError, Result};
    use crate::types::Rgb;
    use flate2::Compression;
    use flate2::read::ZlibDecoder;
    use flate2::write::ZlibEncoder;
    use lopdf::{Document, Object, ObjectId};
    use regex::bytes::Regex;
    use std::borrow::Cow;
    use std::io::{Read, Write};
    use std::path::Path;
    use std::sync::OnceLock;

    static BLACK_SET_COLOR: OnceLock<Option<Regex>> = OnceLock::new();

    fn black_set_color_regex() -> Option<&'static Regex> {
        BLACK_SET_COLOR
            .get_or_init(|| Regex::new(r"(?-u)(^|\s)0 0 0 (RG|rg)\b").ok())
            .as_ref()
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct RawStreamColorizer;

    pub fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()
    }

    /// Substitutes every black `rg`/`RG`; returns the new bytes and the count.
    pub fn recolor_bytes(data: &[u8], color: Rgb) -> (Vec<u8>, usize) {
        let Some(regex) = black_set_color_regex() else {
            return (data.to_vec(), 0);
        };
        let operands = color_operands_3g(color);
        let mut count = 0usize;
        let replaced = regex.replace_all(data, |caps: &regex::bytes::Captures<'_>| {
            count += 1;
            let mut out = caps[1].to_vec();
            out.extend_from_slice(operands.as_bytes());
            out.push(b' ');
            out.extend_from_slice(&caps[2]);
            out
        });
        match replaced {
            Cow::Borrowed(_) => (data.to_vec(), count),
            Cow::Owned(bytes) => (bytes, count),
        }
    }

    fn first_content_stream(doc: &Document, page_id: ObjectId, file: &Path) -> Result<ObjectId> {
        let page = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| Board2PdfError::pdf("colorize", file, e))?;
        let contents = page
            .get(b"Contents")
            .map_err(|e| Board2PdfError::pdf("colorize", file, e))?;
        let id = match contents {
            Object::Reference(id) => Some(*id),
            Object::Array(items) => items.first().and_then(|o| o.as_reference().ok()),
            _ => None,
        };
        id.ok_or_else(|| Board2PdfError::content_stream(file, "page has no content stream"))
    }

    fn filter_names(doc: &Document, stream: &lopdf::Stream) -> Vec<Vec<u8>> {
        match stream.dict.get(b"Filter") {
            Ok(Object::Name(name)) => vec![name.clone()],
            Ok(Object::Array(items)) => items
                .iter()
                .filter_map(|o| crate::compose::resolve(doc, o).ok())
                .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
                .collect(),
            _ => Vec::new(),
        }
    }

    impl ColorizeEngine for RawStreamColorizer {
        fn name(&self) -> &'static str {
            "raw-stream"
        }

        fn substitute_black(&self, input: &Path, output: &Path, color: Rgb) -> Result<usize> {
            let mut doc = load_document("colorize", input)?;
            let page_id = first_page_id(&doc, input)?;
            let stream_id = first_content_stream(&doc, page_id, input)?;
            let stream = doc
                .get_object(stream_id)
                .and_then(Object::as_stream)
                .map_err(|e| Board2PdfError::pdf("colorize", input, e))?;

            let filters = filter_names(&doc, stream);
            let compressed = match filters.as_slice() {
                [] => false,
                [single] if single.as_slice() == b"FlateDecode" => true,
                other => {
                    return Err(Board2PdfError::content_stream(
                        input,
                        format!(
                            "unsupported content stream filters {:?}",
                            other
                                .iter()
                                .map(|f| String::from_utf8_lossy(f).into_owned())
                                .collect::<Vec<_>>()
                        ),
                    ));
                }
            };
            let plain = if compressed {
                inflate(&stream.content).map_err(|e| Board2PdfError::io("colorize", input, e))?
            } else {
                stream.content.clone()
            };

            let (recolored, count) = recolor_bytes(&plain, color);
            let packed = deflate(&recolored).map_err(|e| Board2PdfError::io("colorize", input, e))?;

            let stream = doc
                .get_object_mut(stream_id)
                .and_then(Object::as_stream_mut)
                .map_err(|e| Board2PdfError::pdf("colorize", input, e))?;
            stream.dict.remove(b"DecodeParms");
            stream.dict.set("Filter", "FlateDecode");
            stream.set_content(packed);
            save_document(&mut doc, "colorize", output)?;
            Ok(count)
        }
    }

    /// Round-trips a tiny stream through the inflate, substitute and deflate
    /// path; used by capability detection.
    pub(crate) fn self_test() -> Result<()> {
        let sample = b"q 0 0 0 rg 0 0 0 RG 0 0 10 10 re B Q";
        let here = Path::new("<self-test>");
        let packed = deflate(sample).map_err(|e| Board2PdfError::io("self_test", here, e))?;
        let plain = inflate(&packed).map_err(|e| Board2PdfError::io("self_test", here, e))?;
        let (out, count) = recolor_bytes(&plain, Rgb::new(1.0, 0.0, 0.0));
        if count == 2 && out.as_slice() == b"q 1 0 0 rg 1 0 0 RG 0 0 10 10 re B Q" {
            Ok(())
        } else {
            Err(Board2PdfError::content_stream(
                here,
                "byte substitution produced unexpected output",
            ))
        }
    }

}

#[cfg(feature = "fast")]
pub use engine::{RawStreamColorizer, deflate, inflate, recolor_bytes};
#[cfg(feature = "fast")]
pub(crate) use engine::self_test;
