use crate::error::{Board2PdfError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const DEFAULT_CROP_TOOL: &str = "pdf-crop-margins";

const FAST_ENGINE_HINT: &str =
    "Reinstall board2pdf with the `fast` feature enabled (it is on by default), or select the portable engine.";
const CROP_UTILITY_HINT: &str = "Install pdfCropMargins (`pip install pdfCropMargins`) so that `pdf-crop-margins` is on PATH, or point --crop-tool at it.";

/// Caller preference for a stage that has two engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePreference {
    #[default]
    #[serde(alias = "")]
    Auto,
    #[serde(alias = "pymupdf", alias = "fitz")]
    Fast,
    #[serde(alias = "pypdf")]
    Portable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Fast,
    Portable,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Fast => "fast",
            EngineKind::Portable => "portable",
        }
    }
}

/// Optional engines found at startup. Immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub has_fast_pdf_engine: bool,
    pub has_crop_utility: bool,
    pub crop_tool: PathBuf,
}

impl Capabilities {
    /// Probes every optional engine. Never fails: a missing or broken engine
    /// is reported as unavailable.
    pub fn detect(crop_tool: impl Into<PathBuf>) -> Self {
        let crop_tool = crop_tool.into();
        let has_fast_pdf_engine = fast_engine_self_test();
        let has_crop_utility = crop_utility_runs(&crop_tool);
        log::info!(
            "capabilities: fast pdf engine {}, crop utility {} ({})",
            available(has_fast_pdf_engine),
            available(has_crop_utility),
            crop_tool.display()
        );
        Self {
            has_fast_pdf_engine,
            has_crop_utility,
            crop_tool,
        }
    }

    pub fn with_flags(has_fast_pdf_engine: bool, has_crop_utility: bool) -> Self {
        Self {
            has_fast_pdf_engine,
            has_crop_utility,
            crop_tool: PathBuf::from(DEFAULT_CROP_TOOL),
        }
    }

    /// Picks the engine for `stage`. `Auto` prefers the fast engine and
    /// silently falls back; an explicit `Fast` on a host without it fails.
    pub fn select(&self, stage: &str, preference: EnginePreference) -> Result<EngineKind> {
        let kind = match preference {
            EnginePreference::Portable => EngineKind::Portable,
            EnginePreference::Fast => {
                self.require_fast_engine()?;
                EngineKind::Fast
            }
            EnginePreference::Auto if self.has_fast_pdf_engine => EngineKind::Fast,
            EnginePreference::Auto => {
                log::info!("{stage}: fast pdf engine unavailable, using the portable engine");
                EngineKind::Portable
            }
        };
        log::info!("{stage}: using the {} engine", kind.as_str());
        Ok(kind)
    }

    pub fn require_fast_engine(&self) -> Result<()> {
        if self.has_fast_pdf_engine {
            return Ok(());
        }
        Err(Board2PdfError::EngineUnavailable {
            capability: "fast pdf engine",
            hint: FAST_ENGINE_HINT,
        })
    }

    pub fn require_crop_utility(&self) -> Result<()> {
        if self.has_crop_utility {
            return Ok(());
        }
        Err(Board2PdfError::EngineUnavailable {
            capability: "crop utility",
            hint: CROP_UTILITY_HINT,
        })
    }
}

fn available(flag: bool) -> &'static str {
    if flag { "available" } else { "unavailable" }
}

#[cfg(feature = "fast")]
fn fast_engine_self_test() -> bool {
    match crate::colorize::raw::self_test() {
        Ok(()) => true,
        Err(err) => {
            log::warn!("fast pdf engine failed its self test: {err}");
            false
        }
    }
}

#[cfg(not(feature = "fast"))]
fn fast_engine_self_test() -> bool {
    false
}

/// Runs `<tool> --help`; anything but a clean exit counts as unavailable.
fn crop_utility_runs(tool: &Path) -> bool {
    match Command::new(tool)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(err) => {
            log::debug!("crop utility {} not runnable: {err}", tool.display());
            false
        }
    }
}
