//! The export run: templates in, one assembly PDF out.
//!
//! A run validates everything it can before the first plot (template
//! settings, engine availability, output writability), then plots, colours
//! and merges template by template, assembles, and cleans up.

use crate::assemble::{AssemblyPage, assemble};
use crate::capabilities::{Capabilities, DEFAULT_CROP_TOOL, EngineKind, EnginePreference};
use crate::colorize::{self, colorize_layer};
use crate::crop::CropTool;
use crate::error::{Board2PdfError, Result};
use crate::merge::{self, MergeLayer};
use crate::pdfinspect::{inspect_pdf_path, require_merge_input};
use crate::perf::StageTimer;
use crate::plotter::{Board, LayerCatalog, PlotBackend, colored_file_name, plot_layer};
use crate::progress::{LogProgress, PipelineResult, Progress, ProgressSink};
use crate::scale::merge_with_policy;
use crate::settings::ExportSettings;
use crate::svg::export_svg;
use crate::template::{LayerInfo, Template, parse_template};
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Advisory lock file created in the output directory for the length of a run.
pub const LOCK_FILE_NAME: &str = ".board2pdf.lock";

/// Configured exporter. Holds no per-run state, so one value can run any
/// number of boards one after another.
pub struct Board2Pdf {
    settings: ExportSettings,
    capabilities: Capabilities,
    colorize_preference: EnginePreference,
    merge_preference: EnginePreference,
    perf_log: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Board2PdfBuilder {
    settings: ExportSettings,
    capabilities: Option<Capabilities>,
    crop_tool: PathBuf,
    colorize_preference: Option<EnginePreference>,
    merge_preference: Option<EnginePreference>,
    assembly_suffix: Option<String>,
    assembly_file: Option<PathBuf>,
    perf_log: Option<PathBuf>,
}

impl Board2PdfBuilder {
    pub fn new(settings: ExportSettings) -> Self {
        Self {
            settings,
            capabilities: None,
            crop_tool: PathBuf::from(DEFAULT_CROP_TOOL),
            colorize_preference: None,
            merge_preference: None,
            assembly_suffix: None,
            assembly_file: None,
            perf_log: None,
        }
    }

    /// Uses `capabilities` instead of probing the host at build time.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn crop_tool(mut self, program: impl Into<PathBuf>) -> Self {
        self.crop_tool = program.into();
        self
    }

    /// Overrides the settings' colorize engine preference.
    pub fn colorize_engine(mut self, preference: EnginePreference) -> Self {
        self.colorize_preference = Some(preference);
        self
    }

    /// Overrides the settings' merge engine preference.
    pub fn merge_engine(mut self, preference: EnginePreference) -> Self {
        self.merge_preference = Some(preference);
        self
    }

    pub fn assembly_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.assembly_suffix = Some(suffix.into());
        self
    }

    /// Full assembly file name; relative paths land in the output directory.
    pub fn assembly_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.assembly_file = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_log = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Board2Pdf> {
        let mut settings = self.settings;
        if let Some(suffix) = self.assembly_suffix {
            settings.output_basename_suffix = suffix;
        }
        if let Some(file) = self.assembly_file {
            settings.assembly_file_output = Some(file);
        }
        if settings.assembly_file_output.is_none() && settings.output_basename_suffix.is_empty() {
            return Err(Board2PdfError::Config(
                "the assembly suffix is empty, so the assembly would overwrite a template page"
                    .to_string(),
            ));
        }
        let capabilities = match self.capabilities {
            Some(capabilities) => capabilities,
            None => Capabilities::detect(self.crop_tool),
        };
        Ok(Board2Pdf {
            colorize_preference: self.colorize_preference.unwrap_or(settings.colorize_engine),
            merge_preference: self.merge_preference.unwrap_or(settings.merge_engine),
            settings,
            capabilities,
            perf_log: self.perf_log,
        })
    }
}

impl Board2Pdf {
    pub fn builder(settings: ExportSettings) -> Board2PdfBuilder {
        Board2PdfBuilder::new(settings)
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Runs the export, reporting progress to the log.
    pub fn run(&self, board: &mut dyn Board, backend: &mut dyn PlotBackend) -> PipelineResult {
        self.run_with_progress(board, backend, Box::new(LogProgress))
    }

    /// Runs the export. Never panics on a failed stage: the failure is
    /// returned in [`PipelineResult::error`].
    pub fn run_with_progress(
        &self,
        board: &mut dyn Board,
        backend: &mut dyn PlotBackend,
        sink: Box<dyn ProgressSink>,
    ) -> PipelineResult {
        let mut result = PipelineResult::default();
        let mut timer = self.timer();
        match self.export(board, backend, sink, &mut timer, &mut result) {
            Ok(()) => result.success = true,
            Err(err) => {
                let report = format!("{}: {}", err.kind(), error_chain(&err));
                log::error!("export of {} failed: {report}", board.file_path().display());
                result.messages.push(report.clone());
                result.error = Some(report);
            }
        }
        for (stage, ms) in timer.totals() {
            log::debug!("{stage} total: {ms:.3} ms");
        }
        result.timings = timer.into_timings();
        result
    }

    fn timer(&self) -> StageTimer {
        let Some(path) = self.perf_log.as_deref() else {
            return StageTimer::new();
        };
        StageTimer::with_log_file(path).unwrap_or_else(|err| {
            log::warn!("cannot write perf log {}: {err}", path.display());
            StageTimer::new()
        })
    }

    fn templates(&self, catalog: &LayerCatalog) -> Result<Vec<Template>> {
        if self.settings.enabled_template_names.is_empty() {
            return Err(Board2PdfError::Config("no templates are enabled".to_string()));
        }
        self.settings
            .enabled_template_names
            .iter()
            .map(|name| {
                let raw = self.settings.templates.get(name).ok_or_else(|| {
                    Board2PdfError::Config(format!("enabled template {name} has no settings"))
                })?;
                parse_template(name, raw, catalog)
            })
            .collect()
    }

    /// Engine and utility checks that must pass before anything is plotted.
    fn select_engines(&self, templates: &[Template]) -> Result<(EngineKind, EngineKind)> {
        let caps = &self.capabilities;
        let colorize = caps.select("colorize", self.colorize_preference)?;
        let merge = caps.select("merge", self.merge_preference)?;
        if self.settings.create_svg {
            caps.require_fast_engine()?;
        }
        if let Some(template) = templates
            .iter()
            .find(|t| t.scale_or_crop.needs_crop_utility())
        {
            log::info!("template {} needs the crop utility", template.name);
            caps.require_crop_utility()?;
        }
        Ok((colorize, merge))
    }

    fn assembly_path(&self, output_dir: &Path, base: &str) -> PathBuf {
        match &self.settings.assembly_file_output {
            Some(file) => output_dir.join(file),
            None => output_dir.join(format!("{base}{}.pdf", self.settings.output_basename_suffix)),
        }
    }

    fn export(
        &self,
        board: &mut dyn Board,
        backend: &mut dyn PlotBackend,
        sink: Box<dyn ProgressSink>,
        timer: &mut StageTimer,
        result: &mut PipelineResult,
    ) -> Result<()> {
        let settings = &self.settings;
        let base = board.base_name();
        let catalog = board.layer_catalog()?;
        let templates = self.templates(&catalog)?;
        let (colorize_kind, merge_kind) = self.select_engines(&templates)?;

        let steps: Vec<usize> = templates.iter().map(Template::steps).collect();
        let mut progress = Progress::new(sink, Progress::total_steps(&steps));
        progress.status("Preparing export");

        let output_dir = settings.resolved_output_dir(board.file_path());
        fs::create_dir_all(&output_dir)
            .map_err(|e| Board2PdfError::io("create_output_dir", &output_dir, e))?;
        let _lock = RunLock::acquire(&output_dir)?;
        let assembly = self.assembly_path(&output_dir, &base);
        check_writable(&assembly)?;
        let work_dir = WorkDir::create(&output_dir, settings.delete_temp_files)?;
        log::debug!("working directory {}", work_dir.path().display());

        let run = TemplateRun {
            base: &base,
            catalog: &catalog,
            colorizer: colorize::engine_for(colorize_kind),
            merger: merge::engine_for(merge_kind),
            crop: CropTool::new(&self.capabilities.crop_tool),
            work_dir: work_dir.path(),
            output_dir: &output_dir,
        };
        progress.advance("Plot setup done");

        let stamp = PageInfoStamp::new(&*board, settings.info_variable);
        let mut pages = Vec::with_capacity(templates.len());
        let mut exported = Ok(());
        for (index, template) in templates.iter().enumerate() {
            if let Some(stamp) = &stamp {
                let text = settings.page_info_for(&template.name, index + 1, templates.len());
                if let Err(err) = board.set_title_comment(stamp.index, &text) {
                    exported = Err(err);
                    break;
                }
            }
            match run.export_template(board, backend, template, timer, &mut progress) {
                Ok(page) => {
                    result.message(format!("Created {}", page.display()));
                    result.files.push(page.clone());
                    pages.push(AssemblyPage::new(page, template.name.clone()));
                }
                Err(err) => {
                    exported = Err(err);
                    break;
                }
            }
        }
        if let Some(stamp) = stamp {
            stamp.restore(board);
        }
        exported?;

        let inject_popup_js = templates.iter().any(Template::uses_popups);
        timer.time("assemble", &base, || assemble(&pages, &assembly, inject_popup_js))?;
        result.message(format!("Created {}", assembly.display()));
        result.files.push(assembly.clone());
        progress.advance("Assembly done");

        if settings.create_svg {
            for page in &pages {
                let svg = page.path.with_extension("svg");
                timer.time("svg", &page.title, || export_svg(&page.path, &svg))?;
                result.message(format!("Created {}", svg.display()));
                result.files.push(svg);
            }
        }

        timer.time("cleanup", &base, || {
            if settings.delete_single_page_files {
                for page in &pages {
                    match fs::remove_file(&page.path) {
                        Ok(()) => result.files.retain(|f| f != &page.path),
                        Err(err) => result.message(format!(
                            "Could not delete {}: {err}",
                            page.path.display()
                        )),
                    }
                }
            }
            for failure in work_dir.cleanup() {
                result.message(failure);
            }
        });

        progress.finish("All done!");
        result.message(format!("Assembly PDF written to {}", assembly.display()));
        Ok(())
    }
}

/// Everything one template's plot, colorize and merge stages share.
struct TemplateRun<'a> {
    base: &'a str,
    catalog: &'a LayerCatalog,
    colorizer: Box<dyn colorize::ColorizeEngine>,
    merger: Box<dyn merge::MergeEngine>,
    crop: CropTool,
    work_dir: &'a Path,
    output_dir: &'a Path,
}

impl TemplateRun<'_> {
    /// Produces `{base}_{template}.pdf` in the output directory and returns
    /// its path. The page is built in the working directory and only moved
    /// into place once complete.
    fn export_template(
        &self,
        board: &mut dyn Board,
        backend: &mut dyn PlotBackend,
        template: &Template,
        timer: &mut StageTimer,
        progress: &mut Progress,
    ) -> Result<PathBuf> {
        log::info!(
            "template {}: {} layers, {:?}",
            template.name,
            template.layers().len(),
            template.scale_or_crop
        );
        let board: &dyn Board = board;
        let mut layers = Vec::with_capacity(template.layers().len());
        for layer in template.layers() {
            let plotted = timer.time("plot", &layer.name, || {
                plot_layer(&mut *backend, board, self.catalog, template, layer, self.work_dir)
            })?;
            check_plot(layer, &plotted)?;
            progress.advance(&format!("Plotted {} for {}", layer.name, template.name));

            let path = if layer.needs_colorize() {
                let colored = self.work_dir.join(colored_file_name(self.base, layer));
                timer.time("colorize", &layer.name, || {
                    colorize_layer(self.colorizer.as_ref(), &plotted, &colored, layer)
                })?;
                progress.advance(&format!("Colorized {} for {}", layer.name, template.name));
                colored
            } else {
                plotted
            };
            layers.push(MergeLayer::new(path, layer.with_frame));
        }

        let file_name = format!("{}.pdf", template.output_stem(self.base));
        let staged = self.work_dir.join(format!("staged_{file_name}"));
        let stage = if template.scale_or_crop.needs_crop_utility() {
            "scale"
        } else {
            "merge"
        };
        timer.time(stage, &template.name, || {
            merge_with_policy(
                self.merger.as_ref(),
                &self.crop,
                template.scale_or_crop,
                &layers,
                self.work_dir,
                &staged,
                &template.name,
            )
        })?;
        let page = self.output_dir.join(file_name);
        promote(&staged, &page)?;
        progress.advance(&format!("Merged {}", template.name));
        Ok(page)
    }
}

/// Rejects plotter output that cannot be merged: unreadable, encrypted or
/// without pages. Only page 1 of a longer file is used.
fn check_plot(layer: &LayerInfo, path: &Path) -> Result<()> {
    let report = inspect_pdf_path(path)
        .and_then(|report| require_merge_input(&report).map(|()| report))
        .map_err(|err| Board2PdfError::HostPlot {
            layer: layer.name.clone(),
            message: format!("{} is not a usable layer plot: {err}", path.display()),
        })?;
    if report.empty_pages.first() == Some(&1) {
        log::info!("{} plotted blank", layer.name);
    }
    if report.page_count > 1 {
        log::warn!(
            "{} has {} pages; only the first is merged",
            path.display(),
            report.page_count
        );
    }
    log::debug!(
        "plotted {} (PDF {}, {} bytes, sha256 {})",
        path.display(),
        report.pdf_version,
        report.file_size_bytes,
        report.sha256
    );
    Ok(())
}

/// Moves a finished file into the output directory. The working directory
/// may live on another filesystem, so a failed rename falls back to a copy.
fn promote(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| Board2PdfError::io("promote_template", to, e))?;
    if let Err(err) = fs::remove_file(from) {
        log::warn!("could not remove staged file {}: {err}", from.display());
    }
    Ok(())
}

/// Fails early when the assembly file cannot be written, which usually means
/// it is open in a viewer that locks it.
fn check_writable(assembly: &Path) -> Result<()> {
    let dir = assembly
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let outcome = if assembly.exists() {
        OpenOptions::new().write(true).open(assembly).map(drop)
    } else {
        tempfile::NamedTempFile::new_in(dir).map(drop)
    };
    outcome.map_err(|e| {
        let source = io::Error::new(
            e.kind(),
            format!("{e}; perhaps the file is open in another application"),
        );
        Board2PdfError::io("check_output_writable", assembly, source)
    })
}

fn error_chain(err: &Board2PdfError) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

/// One run per output directory at a time.
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    fn acquire(output_dir: &Path) -> Result<Self> {
        let path = output_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                let source = if e.kind() == io::ErrorKind::AlreadyExists {
                    io::Error::new(
                        e.kind(),
                        "another export is running for this output directory",
                    )
                } else {
                    e
                };
                Board2PdfError::io("lock_output_dir", &path, source)
            })?;
        // From here on, dropping the lock removes the file again.
        let lock = Self { path };
        writeln!(file, "{}", std::process::id())
            .and_then(|()| file.flush())
            .map_err(|e| Board2PdfError::io("lock_output_dir", &lock.path, e))?;
        Ok(lock)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("could not remove lock file {}: {err}", self.path.display());
        }
    }
}

/// Where intermediate files go for one run.
enum WorkDir {
    /// Removed when the run ends.
    Scratch(TempDir),
    /// `<output_dir>/temp`, left in place for inspection.
    Kept(PathBuf),
}

impl WorkDir {
    fn create(output_dir: &Path, delete_temp_files: bool) -> Result<Self> {
        if delete_temp_files {
            return tempfile::Builder::new()
                .prefix("board2pdf-")
                .tempdir()
                .map(WorkDir::Scratch)
                .map_err(|e| Board2PdfError::io("create_temp_dir", &std::env::temp_dir(), e));
        }
        let dir = output_dir.join("temp");
        fs::create_dir_all(&dir).map_err(|e| Board2PdfError::io("create_temp_dir", &dir, e))?;
        Ok(WorkDir::Kept(dir))
    }

    fn path(&self) -> &Path {
        match self {
            WorkDir::Scratch(dir) => dir.path(),
            WorkDir::Kept(dir) => dir,
        }
    }

    /// Deletes the intermediates of a scratch directory; returns one message
    /// per file that could not be deleted.
    fn cleanup(&self) -> Vec<String> {
        match self {
            WorkDir::Scratch(dir) => delete_contents(dir.path()),
            WorkDir::Kept(dir) => {
                log::info!("keeping temporary files in {}", dir.display());
                Vec::new()
            }
        }
    }
}

fn delete_contents(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => return vec![format!("Could not delete temporary files in {}: {err}", dir.display())],
    };
    let mut failures = Vec::new();
    for entry in entries {
        let removed = entry.and_then(|entry| {
            let path = entry.path();
            let outcome = if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            outcome.map_err(|err| io::Error::new(err.kind(), format!("{}: {err}", path.display())))
        });
        if let Err(err) = removed {
            log::warn!("could not delete temporary file: {err}");
            failures.push(format!("Could not delete temporary file {err}"));
        }
    }
    failures
}

/// Original title block comment, put back when the run ends.
struct PageInfoStamp {
    index: u8,
    original: Option<String>,
}

impl PageInfoStamp {
    fn new(board: &dyn Board, info_variable: u8) -> Option<Self> {
        if !(1..=9).contains(&info_variable) {
            return None;
        }
        Some(Self {
            index: info_variable,
            original: board.title_comment(info_variable),
        })
    }

    fn restore(self, board: &mut dyn Board) {
        let text = self.original.unwrap_or_default();
        if let Err(err) = board.set_title_comment(self.index, &text) {
            log::warn!("could not restore title block comment {}: {err}", self.index);
        }
    }
}
