use crate::perf::StageTiming;
use std::path::PathBuf;

/// Receives progress updates. Errors are logged and otherwise ignored; a
/// failing sink never stops a run.
pub trait ProgressSink {
    fn report(&mut self, percent: u8, status: &str) -> Result<(), String>;
}

impl<F> ProgressSink for F
where
    F: FnMut(u8, &str) -> Result<(), String>,
{
    fn report(&mut self, percent: u8, status: &str) -> Result<(), String> {
        self(percent, status)
    }
}

/// Sink that writes every update to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, percent: u8, status: &str) -> Result<(), String> {
        log::info!("[{percent:>3}%] {status}");
        Ok(())
    }
}

const START_PERCENT: f32 = 5.0;

/// Monotonic percentage over a known number of steps, starting at 5%.
pub struct Progress {
    sink: Box<dyn ProgressSink>,
    value: f32,
    step: f32,
    last_reported: u8,
}

impl Progress {
    pub fn new(sink: Box<dyn ProgressSink>, total_steps: usize) -> Self {
        let step = (100.0 - START_PERCENT) / total_steps.max(1) as f32;
        Self {
            sink,
            value: START_PERCENT,
            step,
            last_reported: 0,
        }
    }

    /// Every export run's step count: one for plot setup, one for assembly,
    /// and per template one for the merge plus its own layer steps.
    pub fn total_steps<'a>(template_steps: impl IntoIterator<Item = &'a usize>) -> usize {
        2 + template_steps.into_iter().map(|s| 1 + s).sum::<usize>()
    }

    pub fn percent(&self) -> u8 {
        self.value.clamp(0.0, 100.0).round() as u8
    }

    /// Reports `status` at the current percentage.
    pub fn status(&mut self, status: &str) {
        let percent = self.percent().max(self.last_reported);
        self.last_reported = percent;
        if let Err(err) = self.sink.report(percent, status) {
            log::warn!("progress sink failed: {err}");
        }
    }

    /// Moves one step forward and reports `status`.
    pub fn advance(&mut self, status: &str) {
        self.value = (self.value + self.step).min(100.0);
        self.status(status);
    }

    pub fn finish(&mut self, status: &str) {
        self.value = 100.0;
        self.status(status);
    }
}

/// Outcome of one export run, as reported to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineResult {
    pub success: bool,
    /// Files left in the output directory, in creation order.
    pub files: Vec<PathBuf>,
    /// Human-readable status lines, in order.
    pub messages: Vec<String>,
    /// Set when the run failed: `"{kind}: {message}"`.
    pub error: Option<String>,
    pub timings: Vec<StageTiming>,
}

impl PipelineResult {
    pub fn message(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::info!("{text}");
        self.messages.push(text);
    }
}
