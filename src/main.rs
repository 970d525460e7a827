use anyhow::{Context, Result, bail};
use board2pdf::{
    Board2Pdf, ConfigSource, DEFAULT_CROP_TOOL, DEFAULT_KICAD_CLI, EnginePreference, KicadBoard,
    KicadCliPlotter, discover_config,
};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "board2pdf",
    about = "Export a KiCad board as a multi-layer assembly PDF",
    version
)]
struct Cli {
    /// The .kicad_pcb file to export.
    board: PathBuf,

    /// Settings file; defaults to board2pdf.config.toml next to the board,
    /// then next to this executable, then the built-in settings.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level; anything but `off` writes board2pdf.log next to the board.
    #[arg(long, value_enum, default_value = "off")]
    log: LogLevel,

    /// Engine used to stack the layers of a template.
    #[arg(long, value_enum)]
    merge: Option<EngineChoice>,

    /// Engine used to recolour layers.
    #[arg(long, value_enum)]
    colorize: Option<EngineChoice>,

    /// Suffix of the assembly file name (`{board}{ext}.pdf`).
    #[arg(long, value_name = "SUFFIX")]
    ext: Option<String>,

    /// Assembly file name, relative to the output directory.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    #[arg(long, value_name = "PROGRAM", default_value = DEFAULT_KICAD_CLI)]
    kicad_cli: PathBuf,

    #[arg(long, value_name = "PROGRAM", default_value = DEFAULT_CROP_TOOL)]
    crop_tool: PathBuf,

    /// Writes one JSON line per timed stage.
    #[arg(long, value_name = "PATH")]
    perf_log: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineChoice {
    #[value(alias = "pymupdf")]
    Fast,
    #[value(alias = "pypdf")]
    Portable,
}

impl From<EngineChoice> for EnginePreference {
    fn from(choice: EngineChoice) -> Self {
        match choice {
            EngineChoice::Fast => EnginePreference::Fast,
            EngineChoice::Portable => EnginePreference::Portable,
        }
    }
}

fn init_logging(level: LogLevel, board: &Path) -> Result<()> {
    if level == LogLevel::Off {
        env_logger::Builder::from_default_env().init();
        return Ok(());
    }
    let log_path = board
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("board2pdf.log");
    let file = File::create(&log_path)
        .with_context(|| format!("cannot create log file {}", log_path.display()))?;
    env_logger::Builder::new()
        .filter_level(level.into())
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn config_source(cli: &Cli) -> Result<ConfigSource> {
    if let Some(path) = &cli.config {
        if !path.is_file() {
            bail!("config file {} does not exist", path.display());
        }
        return Ok(ConfigSource::File(path.clone()));
    }
    let install_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    Ok(discover_config(&cli.board, install_dir.as_deref()))
}

fn run(cli: Cli) -> Result<bool> {
    init_logging(cli.log, &cli.board)?;
    let source = config_source(&cli)?;
    log::info!("using settings from {source:?}");
    let settings = source.load().context("cannot load settings")?;

    let mut builder = Board2Pdf::builder(settings).crop_tool(&cli.crop_tool);
    if let Some(choice) = cli.colorize {
        builder = builder.colorize_engine(choice.into());
    }
    if let Some(choice) = cli.merge {
        builder = builder.merge_engine(choice.into());
    }
    if let Some(ext) = cli.ext {
        builder = builder.assembly_suffix(ext);
    }
    if let Some(output) = cli.output {
        builder = builder.assembly_file(output);
    }
    if let Some(path) = cli.perf_log {
        builder = builder.perf_log(path);
    }
    let exporter = builder.build()?;

    let mut board = KicadBoard::load(&cli.board)
        .with_context(|| format!("cannot open board {}", cli.board.display()))?;
    let mut plotter = KicadCliPlotter::new(&cli.kicad_cli);
    let result = exporter.run(&mut board, &mut plotter);

    for message in &result.messages {
        println!("{message}");
    }
    if let Some(error) = &result.error {
        eprintln!("board2pdf: {error}");
    }
    Ok(result.success)
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("board2pdf: {err:#}");
            ExitCode::FAILURE
        }
    }
}
