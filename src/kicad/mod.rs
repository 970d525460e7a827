//! Host adapter for KiCad: board files are read directly and layers are
//! plotted by running `kicad-cli`.

pub mod sexpr;

use crate::error::{Board2PdfError, Result};
use crate::plotter::{Board, DrillMarks, LayerCatalog, LayerEntry, PlotBackend, PlotOptions};
use sexpr::{SExpr, quote};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_KICAD_CLI: &str = "kicad-cli";

const COPPER_LAYER_TYPES: [&str; 4] = ["signal", "power", "mixed", "jumper"];

/// A `.kicad_pcb` file. Title block edits go to a shadow copy next to the
/// board; the user's file is never written.
#[derive(Debug)]
pub struct KicadBoard {
    path: PathBuf,
    original: String,
    text: String,
    catalog: LayerCatalog,
    comments: BTreeMap<u8, String>,
    shadow: Option<PathBuf>,
}

fn parse_board(path: &Path, text: &str) -> Result<SExpr> {
    let root = sexpr::parse(text)
        .map_err(|e| Board2PdfError::Config(format!("cannot read board {}: {e}", path.display())))?;
    if root.tag() != Some("kicad_pcb") {
        return Err(Board2PdfError::Config(format!(
            "{} is not a KiCad board file",
            path.display()
        )));
    }
    Ok(root)
}

fn layer_catalog(root: &SExpr) -> LayerCatalog {
    let mut entries = Vec::new();
    if let Some(layers) = root.child("layers") {
        for layer in layers.items().iter().skip(1) {
            let fields = layer.items();
            let (Some(id), Some(kind)) = (
                fields.get(1).and_then(SExpr::as_text),
                fields.get(2).and_then(SExpr::as_text),
            ) else {
                continue;
            };
            let display = fields.get(3).and_then(SExpr::as_text).unwrap_or(id);
            entries.push(LayerEntry::new(id, display, COPPER_LAYER_TYPES.contains(&kind)));
        }
    }
    LayerCatalog::new(entries)
}

fn title_comments(root: &SExpr) -> BTreeMap<u8, String> {
    let mut comments = BTreeMap::new();
    let Some(block) = root.child("title_block") else {
        return comments;
    };
    for comment in block.children("comment") {
        let items = comment.items();
        let index = items.get(1).and_then(SExpr::as_text).and_then(|t| t.parse::<u8>().ok());
        if let (Some(index), Some(text)) = (index, items.get(2).and_then(SExpr::as_text)) {
            comments.insert(index, text.to_string());
        }
    }
    comments
}

/// `text` with title block comment `index` set to `value`, formatting of
/// everything else untouched.
fn with_comment(root: &SExpr, text: &str, index: u8, value: &str) -> String {
    let quoted = quote(value);
    let (range, replacement) = match root.child("title_block") {
        Some(block) => {
            let existing = block.children("comment").find(|c| {
                c.items().get(1).and_then(SExpr::as_text) == Some(index.to_string().as_str())
            });
            match existing {
                Some(comment) => match comment.items().get(2) {
                    Some(old) => (old.span.clone(), quoted),
                    None => {
                        let at = comment.close_offset();
                        (at..at, format!(" {quoted}"))
                    }
                },
                None => {
                    let at = block.close_offset();
                    (at..at, format!(" (comment {index} {quoted})"))
                }
            }
        }
        None => {
            let at = root.close_offset();
            (at..at, format!("  (title_block (comment {index} {quoted}))\n"))
        }
    };
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..range.start]);
    out.push_str(&replacement);
    out.push_str(&text[range.end..]);
    out
}

impl KicadBoard {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| Board2PdfError::io("load_board", &path, e))?;
        let root = parse_board(&path, &text)?;
        let catalog = layer_catalog(&root);
        let comments = title_comments(&root);
        log::debug!(
            "loaded {} with {} layers and {} title block comments",
            path.display(),
            catalog.len(),
            comments.len()
        );
        Ok(Self {
            path,
            original: text.clone(),
            text,
            catalog,
            comments,
            shadow: None,
        })
    }

    fn shadow_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "board.kicad_pcb".to_string());
        self.path.with_file_name(format!(".board2pdf-{name}"))
    }

    fn remove_shadow(&mut self) {
        if let Some(shadow) = self.shadow.take() {
            if let Err(err) = std::fs::remove_file(&shadow) {
                log::warn!("could not remove {}: {err}", shadow.display());
            }
        }
    }
}

impl Board for KicadBoard {
    fn file_path(&self) -> &Path {
        &self.path
    }

    fn layer_catalog(&self) -> Result<LayerCatalog> {
        Ok(self.catalog.clone())
    }

    fn title_comment(&self, index: u8) -> Option<String> {
        self.comments.get(&index).cloned()
    }

    fn set_title_comment(&mut self, index: u8, text: &str) -> Result<()> {
        let root = parse_board(&self.path, &self.text)?;
        let edited = with_comment(&root, &self.text, index, text);
        self.comments = title_comments(&parse_board(&self.path, &edited)?);
        self.text = edited;
        if self.text == self.original {
            self.remove_shadow();
            return Ok(());
        }
        let shadow = self.shadow_path();
        std::fs::write(&shadow, &self.text).map_err(|e| Board2PdfError::io("set_title_comment", &shadow, e))?;
        self.shadow = Some(shadow);
        Ok(())
    }

    fn plot_source(&self) -> PathBuf {
        self.shadow.clone().unwrap_or_else(|| self.path.clone())
    }
}

impl Drop for KicadBoard {
    fn drop(&mut self) {
        self.remove_shadow();
    }
}

/// Plots layers with `kicad-cli pcb export pdf`.
#[derive(Debug, Clone)]
pub struct KicadCliPlotter {
    program: PathBuf,
}

impl Default for KicadCliPlotter {
    fn default() -> Self {
        Self::new(DEFAULT_KICAD_CLI)
    }
}

impl KicadCliPlotter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn arguments(board_file: &Path, options: &PlotOptions, output: &Path) -> Vec<String> {
        let mut args = vec![
            "pcb".to_string(),
            "export".to_string(),
            "pdf".to_string(),
            "--output".to_string(),
            output.to_string_lossy().into_owned(),
            "--layers".to_string(),
            options.layer.clone(),
        ];
        let flags = [
            (options.mirror, "--mirror"),
            (options.negative, "--negative"),
            (!options.plot_reference, "--exclude-refdes"),
            (!options.plot_value, "--exclude-value"),
            (options.plot_frame_ref, "--include-border-title"),
        ];
        args.extend(flags.iter().filter(|(on, _)| *on).map(|(_, flag)| flag.to_string()));
        let drill = match options.drill_marks {
            DrillMarks::None => "0",
            DrillMarks::Small => "1",
            DrillMarks::Full => "2",
        };
        args.push("--drill-shape-opt".to_string());
        args.push(drill.to_string());
        args.push(board_file.to_string_lossy().into_owned());
        args
    }
}

impl PlotBackend for KicadCliPlotter {
    fn name(&self) -> &str {
        "kicad-cli"
    }

    fn plot(&mut self, board: &dyn Board, options: &PlotOptions, output: &Path) -> std::result::Result<(), String> {
        if options.plot_via_on_mask || options.front_property_popups || options.back_property_popups {
            log::debug!(
                "kicad-cli cannot express via tenting or property popups; ignored for {}",
                options.layer
            );
        }
        let source = board.plot_source();
        let result = Command::new(&self.program)
            .args(Self::arguments(&source, options, output))
            .output()
            .map_err(|e| format!("could not run {}: {e}", self.program.display()))?;
        if result.status.success() {
            return Ok(());
        }
        Err(format!(
            "{} exited with {:?}: {}",
            self.program.display(),
            result.status.code(),
            String::from_utf8_lossy(&result.stderr).trim()
        ))
    }
}
