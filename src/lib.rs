//! Template-driven multi-layer assembly PDF export for KiCad boards.
//!
//! Each enabled template plots its layers to single-page PDFs through a
//! [`PlotBackend`], recolours them, stacks them into one page and
//! optionally crops or scales it. The template pages are then concatenated
//! into the assembly document. [`Board2Pdf`] drives a whole run.

mod assemble;
mod capabilities;
pub mod colorize;
mod compose;
mod crop;
mod drawing;
mod error;
pub mod kicad;
pub mod merge;
mod outline;
mod pdfinspect;
mod perf;
mod pipeline;
mod plotter;
mod progress;
mod raster;
mod scale;
mod settings;
mod svg;
mod template;
mod types;

pub use assemble::{AssemblyPage, POPUP_MENU_JS, assemble};
pub use capabilities::{Capabilities, DEFAULT_CROP_TOOL, EngineKind, EnginePreference};
pub use colorize::{ColorizeEngine, colorize_layer};
pub use crop::CropTool;
pub use drawing::{Drawing, PageDrawings, PathSegment, extract_first_page};
pub use error::{Board2PdfError, Result};
pub use kicad::{DEFAULT_KICAD_CLI, KicadBoard, KicadCliPlotter};
pub use merge::{MergeEngine, MergeLayer, merge_layers};
pub use outline::outline_titles;
pub use pdfinspect::{
    PdfInspectError, PdfInspectReport, inspect_pdf_bytes, inspect_pdf_path, require_merge_input,
};
pub use perf::{StageTimer, StageTiming};
pub use pipeline::{Board2Pdf, Board2PdfBuilder, LOCK_FILE_NAME};
pub use plotter::{
    Board, DrillMarks, LayerCatalog, LayerEntry, PlotBackend, PlotOptions, colored_file_name,
    layer_file_name, plot_layer,
};
pub use progress::{LogProgress, PipelineResult, Progress, ProgressSink};
pub use raster::{RasterPage, render_first_page, render_page};
pub use scale::{fit_into_frame, fit_placement, merge_with_policy};
pub use settings::{
    BUILTIN_CONFIG, CONFIG_FILE_NAME, ConfigSource, DEFAULT_PAGE_INFO, ExportSettings,
    discover_config,
};
pub use svg::{export_svg, svg_document};
pub use template::{
    LayerInfo, PopupPolicy, RawSettings, ScaleOrCrop, Template, parse_layer, parse_template,
    sanitize_file_component,
};
pub use types::{Pt, Rect, Rgb, Size};
