//! Recolouring of single-layer plots.
//!
//! The host plotter draws everything in black. A layer with a colour
//! override has its black `rg`/`RG` operators rewritten; a layer with
//! transparency is redrawn from its extracted drawings with an alpha graphics
//! state, which flattens the page and drops its annotations.

mod content;
pub mod raw;
pub mod redraw;

use crate::capabilities::EngineKind;
use crate::compose::copy_file;
use crate::error::Result;
use crate::template::LayerInfo;
use crate::types::Rgb;
use std::path::Path;

pub use content::ContentColorizer;
#[cfg(feature = "fast")]
pub use raw::RawStreamColorizer;

/// Rewrites black set-colour operators of page 1 to `color`.
pub trait ColorizeEngine {
    fn name(&self) -> &'static str;

    /// Returns the number of operators rewritten.
    fn substitute_black(&self, input: &Path, output: &Path, color: Rgb) -> Result<usize>;
}

/// The colouriser for `kind`. Falls back to the portable engine when the
/// crate was built without the fast one.
pub fn engine_for(kind: EngineKind) -> Box<dyn ColorizeEngine> {
    match kind {
        #[cfg(feature = "fast")]
        EngineKind::Fast => Box::new(RawStreamColorizer),
        #[cfg(not(feature = "fast"))]
        EngineKind::Fast => Box::new(ContentColorizer),
        EngineKind::Portable => Box::new(ContentColorizer),
    }
}

/// Writes the recoloured form of `input` to `output`.
///
/// Black at full opacity is a byte copy. Any transparency goes through the
/// drawing redraw regardless of `engine`.
pub fn colorize_layer(
    engine: &dyn ColorizeEngine,
    input: &Path,
    output: &Path,
    layer: &LayerInfo,
) -> Result<()> {
    if layer.has_transparency() {
        log::info!(
            "colorize {}: redrawing with {} and opacity {}",
            layer.name,
            layer.color.to_hex(),
            layer.opacity()
        );
        return redraw::redraw_with_opacity(input, output, layer.color, layer.opacity());
    }
    if !layer.has_color() {
        log::debug!("colorize {}: black without transparency, copying", layer.name);
        return copy_file("colorize", input, output);
    }
    let rewritten = engine.substitute_black(input, output, layer.color)?;
    log::info!(
        "colorize {}: {} rewrote {rewritten} operators to {}",
        layer.name,
        engine.name(),
        layer.color.to_hex()
    );
    Ok(())
}

/// `%.3g` rendering of a colour component, as in `0.949 0.878 0.659 rg`.
pub(crate) fn component_3g(value: f32) -> String {
    let value = value.clamp(0.0, 1.0);
    if value == 0.0 {
        return "0".to_string();
    }
    let exponent = value.log10().floor() as i32;
    let decimals = (2 - exponent).max(0) as usize;
    let mut out = format!("{:.*}", decimals, value);
    while out.contains('.') && (out.ends_with('0') || out.ends_with('.')) {
        out.pop();
    }
    out
}

pub(crate) fn color_operands_3g(color: Rgb) -> String {
    color
        .components()
        .iter()
        .map(|c| component_3g(*c))
        .collect::<Vec<_>>()
        .join(" ")
}
