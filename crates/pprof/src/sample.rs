use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// One recorded call stack.
///
/// pprof-rs aggregates identical stacks, so `count` is the number of times
/// this stack was sampled and `timestamp` is the first time it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSample {
    pub timestamp: SystemTime,
    /// Demangled function names, outermost frame first.
    pub stack: Vec<String>,
    pub count: isize,
    pub thread: String,
}

impl ExecutionSample {
    /// Collect the samples of `report` that fall inside `[started_at, ended_at]`,
    /// oldest first.
    pub(crate) fn from_report(report: &pprof::Report, started_at: SystemTime, ended_at: SystemTime) -> Vec<Self> {
        let mut samples: Vec<Self> = report
            .data
            .iter()
            .filter(|(frames, _)| frames.sample_timestamp >= started_at && frames.sample_timestamp <= ended_at)
            .map(|(frames, count)| Self {
                timestamp: frames.sample_timestamp,
                stack: frames
                    .frames
                    .iter()
                    .rev()
                    .flat_map(|inlined| inlined.iter().rev())
                    .map(|symbol| strip_hash(&symbol.name()).to_owned())
                    .collect(),
                count: *count,
                thread: frames.thread_name.clone(),
            })
            .collect();

        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.stack.cmp(&b.stack)));
        samples
    }

    /// The innermost frame of the stack.
    pub fn leaf(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Iterate over the last path segment of every frame, outermost first.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.stack.iter().map(|frame| function_name(frame))
    }
}

/// A profile that has been written to its sink.
#[derive(Debug, Clone)]
pub struct Recording {
    path: PathBuf,
    bytes_written: u64,
    started_at: SystemTime,
    ended_at: SystemTime,
    frequency: i32,
    samples: Vec<ExecutionSample>,
}

impl Recording {
    pub(crate) fn new(
        path: PathBuf,
        bytes_written: u64,
        started_at: SystemTime,
        ended_at: SystemTime,
        frequency: i32,
        samples: Vec<ExecutionSample>,
    ) -> Self {
        Self {
            path,
            bytes_written,
            started_at,
            ended_at,
            frequency,
            samples,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn ended_at(&self) -> SystemTime {
        self.ended_at
    }

    /// Wall clock time between the start and the end of the capture.
    pub fn duration(&self) -> Duration {
        self.ended_at.duration_since(self.started_at).unwrap_or_default()
    }

    pub fn frequency(&self) -> i32 {
        self.frequency
    }

    /// Distinct stacks, oldest first.
    pub fn samples(&self) -> &[ExecutionSample] {
        &self.samples
    }

    /// Total number of samples taken.
    pub fn sample_count(&self) -> isize {
        self.samples.iter().map(|sample| sample.count).sum()
    }

    /// Approximate on-cpu time, derived from the sample count and frequency.
    pub fn cpu_time(&self) -> Duration {
        if self.frequency <= 0 {
            return Duration::ZERO;
        }

        let samples = self.sample_count().max(0) as u64;
        Duration::from_nanos(samples.saturating_mul(1_000_000_000) / self.frequency as u64)
    }

    /// Sample counts per leaf function, hottest first.
    pub fn self_counts(&self) -> Vec<(String, isize)> {
        let mut counts: HashMap<&str, isize> = HashMap::new();
        for sample in &self.samples {
            if let Some(leaf) = sample.leaf() {
                *counts.entry(function_name(leaf)).or_default() += sample.count;
            }
        }

        let mut counts: Vec<_> = counts.into_iter().map(|(name, count)| (name.to_owned(), count)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }
}

/// Strip the `::h<16 hex digits>` suffix the legacy mangling scheme appends.
fn strip_hash(name: &str) -> &str {
    match name.rsplit_once("::") {
        Some((head, hash))
            if hash.len() == 17 && hash.starts_with('h') && hash[1..].chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            head
        }
        _ => name,
    }
}

fn function_name(frame: &str) -> &str {
    frame.rsplit("::").next().unwrap_or(frame)
}
