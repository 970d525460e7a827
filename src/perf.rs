use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Wall time of one pipeline stage for one subject (template or file).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub subject: String,
    pub ms: f64,
}

/// Collects stage timings for a run. Each span is logged at debug level and,
/// when a perf log is attached, appended to it as one JSON line.
#[derive(Default)]
pub struct StageTimer {
    timings: Vec<StageTiming>,
    writer: Option<BufWriter<File>>,
}

impl StageTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            timings: Vec::new(),
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn time<T>(&mut self, stage: &'static str, subject: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(stage, subject, start.elapsed());
        out
    }

    pub fn record(&mut self, stage: &'static str, subject: &str, elapsed: Duration) {
        let timing = StageTiming {
            stage,
            subject: subject.to_string(),
            ms: elapsed.as_secs_f64() * 1000.0,
        };
        log::debug!("{stage} {subject}: {:.3} ms", timing.ms);
        if let Some(writer) = self.writer.as_mut() {
            if let Ok(line) = serde_json::to_string(&timing) {
                let _ = writeln!(writer, "{line}");
            }
        }
        self.timings.push(timing);
    }

    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    /// Total per stage, slowest first.
    pub fn totals(&self) -> Vec<(&'static str, f64)> {
        let mut totals: HashMap<&'static str, f64> = HashMap::new();
        for timing in &self.timings {
            *totals.entry(timing.stage).or_insert(0.0) += timing.ms;
        }
        let mut totals: Vec<_> = totals.into_iter().collect();
        totals.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(b.0))
        });
        totals
    }

    pub fn into_timings(mut self) -> Vec<StageTiming> {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
        std::mem::take(&mut self.timings)
    }
}
