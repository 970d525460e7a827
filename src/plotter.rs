use crate::error::{Board2PdfError, Result};
use crate::template::{LayerInfo, Template};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEntry {
    pub id: String,
    pub display_name: String,
    pub is_copper: bool,
}

impl LayerEntry {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, is_copper: bool) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_copper,
        }
    }
}

/// The board's layers in stack order, keyed by canonical layer id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerCatalog {
    entries: IndexMap<String, LayerEntry>,
}

impl LayerCatalog {
    pub fn new(entries: Vec<LayerEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Looks a layer up by canonical id or by its display name.
    pub fn get(&self, name: &str) -> Option<&LayerEntry> {
        self.entries
            .get(name)
            .or_else(|| self.entries.values().find(|e| e.display_name == name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_copper(&self, name: &str) -> bool {
        self.get(name).map(|e| e.is_copper).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The board as the pipeline sees it.
pub trait Board {
    /// Path of the board file; its stem is the base of every output name.
    fn file_path(&self) -> &Path;

    fn layer_catalog(&self) -> Result<LayerCatalog>;

    /// Title block comment `index` (1-based, 1..=9).
    fn title_comment(&self, index: u8) -> Option<String>;

    fn set_title_comment(&mut self, index: u8, text: &str) -> Result<()>;

    /// File the host plotter should read. Differs from [`Board::file_path`]
    /// while title block edits are pending.
    fn plot_source(&self) -> PathBuf {
        self.file_path().to_path_buf()
    }

    fn base_name(&self) -> String {
        self.file_path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "board".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrillMarks {
    None,
    Small,
    Full,
}

/// Everything the host plotter needs to render one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotOptions {
    pub layer: String,
    pub drill_marks: DrillMarks,
    pub mirror: bool,
    /// Vias are drawn on mask layers unless tented.
    pub plot_via_on_mask: bool,
    pub plot_frame_ref: bool,
    pub negative: bool,
    pub plot_value: bool,
    pub plot_reference: bool,
    pub front_property_popups: bool,
    pub back_property_popups: bool,
}

impl PlotOptions {
    pub fn for_layer(template: &Template, layer: &LayerInfo, catalog: &LayerCatalog) -> Self {
        let drill_marks = if catalog.is_copper(&layer.name) {
            DrillMarks::Full
        } else {
            DrillMarks::None
        };
        Self {
            layer: layer.name.clone(),
            drill_marks,
            mirror: template.mirrored,
            plot_via_on_mask: template.tented,
            plot_frame_ref: layer.with_frame,
            negative: layer.negative,
            plot_value: layer.plot_footprint_values,
            plot_reference: layer.plot_reference_designators,
            front_property_popups: layer.front_popups,
            back_property_popups: layer.back_popups,
        }
    }
}

/// The host's single-layer PDF plotter. Calls are synchronous and never
/// issued concurrently.
pub trait PlotBackend {
    fn name(&self) -> &str;

    /// Plots one layer of `board` to `output`, which must exist afterwards.
    fn plot(&mut self, board: &dyn Board, options: &PlotOptions, output: &Path)
    -> std::result::Result<(), String>;
}

/// `{base}-{layer}.pdf` with dots in the layer name replaced.
pub fn layer_file_name(base: &str, layer: &LayerInfo) -> String {
    format!("{}-{}.pdf", base, layer.file_token())
}

pub fn colored_file_name(base: &str, layer: &LayerInfo) -> String {
    format!("{}-{}-colored.pdf", base, layer.file_token())
}

pub fn plot_layer(
    backend: &mut dyn PlotBackend,
    board: &dyn Board,
    catalog: &LayerCatalog,
    template: &Template,
    layer: &LayerInfo,
    output_dir: &Path,
) -> Result<PathBuf> {
    let options = PlotOptions::for_layer(template, layer, catalog);
    let output = output_dir.join(layer_file_name(&board.base_name(), layer));
    log::info!(
        "plotting {} for template {} with {}",
        layer.name,
        template.name,
        backend.name()
    );
    log::debug!("plot options {:?} -> {}", options, output.display());

    backend
        .plot(board, &options, &output)
        .map_err(|message| Board2PdfError::HostPlot {
            layer: layer.name.clone(),
            message,
        })?;
    if !output.is_file() {
        return Err(Board2PdfError::HostPlot {
            layer: layer.name.clone(),
            message: format!("plotter reported success but {} was not written", output.display()),
        });
    }
    Ok(output)
}
