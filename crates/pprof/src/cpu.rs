use std::fs::File;
use std::io::Write;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::write::GzEncoder;
use flate2::Compression;
use pprof::protos::Message;

use crate::sample::{ExecutionSample, Recording};
use crate::PprofError;

/// Highest sampling frequency the sampling timer can represent.
///
/// The timer interval is computed in whole microseconds, so anything faster
/// rounds down to a zero interval and never fires.
pub const MAX_FREQUENCY: i32 = 1_000_000;

/// How the pprof protobuf is written to the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(rename_all = "lowercase"))]
pub enum Encoding {
    /// Gzip compressed protobuf, which is what `go tool pprof` writes.
    #[default]
    Gzip,
    /// Uncompressed protobuf.
    Raw,
}

/// A CPU profiler.
///
/// Call [`Cpu::begin_capture`] to start recording into a file, or
/// [`Cpu::record`] to record the execution of a closure.
#[derive(Clone)]
pub struct Cpu {
    builder: pprof::ProfilerGuardBuilder,
    frequency: i32,
    encoding: Encoding,
}

impl Cpu {
    /// Create a new CPU profiler.
    ///
    /// - `frequency` is the sampling frequency in Hz.
    /// - `blocklist` is a list of libraries to exclude from the profile.
    pub fn new<S: AsRef<str>>(frequency: i32, blocklist: &[S]) -> Self {
        Self {
            builder: pprof::ProfilerGuardBuilder::default()
                .frequency(frequency)
                .blocklist(blocklist),
            frequency,
            encoding: Encoding::default(),
        }
    }

    /// Set the encoding used when the profile is written.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// The sampling frequency in Hz.
    pub fn frequency(&self) -> i32 {
        self.frequency
    }

    /// Open `destination` for writing and start sampling.
    ///
    /// The file is created (or truncated) before the profiler starts. If the
    /// profiler cannot be started the file is removed again, so a failed call
    /// leaves nothing behind.
    ///
    /// A frequency outside `1..=MAX_FREQUENCY` is rejected before the file is
    /// touched.
    pub fn begin_capture(&self, destination: impl AsRef<Path>) -> Result<CaptureSession, PprofError> {
        if !(1..=MAX_FREQUENCY).contains(&self.frequency) {
            return Err(PprofError::InvalidFrequency(self.frequency));
        }

        let path = destination.as_ref().to_path_buf();
        let sink = File::create(&path)?;

        let started_at = SystemTime::now();
        let guard = match self.builder.clone().build() {
            Ok(guard) => guard,
            Err(err) => {
                drop(sink);
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), "failed to remove profile sink: {remove_err}");
                }

                return Err(PprofError::CaptureStart(err));
            }
        };

        tracing::debug!(path = %path.display(), frequency = self.frequency, "cpu capture started");

        Ok(CaptureSession {
            active: ManuallyDrop::new(ActiveCapture {
                guard,
                sink,
                path,
                started_at,
                frequency: self.frequency,
                encoding: self.encoding,
            }),
        })
    }

    /// Record a profile of `f` into `destination`.
    ///
    /// The profile is written even if `f` panics.
    pub fn record<T>(&self, destination: impl AsRef<Path>, f: impl FnOnce() -> T) -> Result<(T, Recording), PprofError> {
        let session = self.begin_capture(destination)?;
        let output = f();
        let recording = session.end_capture()?;
        Ok((output, recording))
    }
}

/// An in-progress capture.
///
/// Sampling stops when [`CaptureSession::end_capture`] is called. A session
/// that is dropped without being ended flushes its profile anyway.
#[must_use = "dropping a capture session ends the capture immediately"]
pub struct CaptureSession {
    active: ManuallyDrop<ActiveCapture>,
}

struct ActiveCapture {
    guard: pprof::ProfilerGuard<'static>,
    sink: File,
    path: PathBuf,
    started_at: SystemTime,
    frequency: i32,
    encoding: Encoding,
}

impl CaptureSession {
    /// The file the profile will be written to.
    pub fn path(&self) -> &Path {
        &self.active.path
    }

    /// When sampling started.
    pub fn started_at(&self) -> SystemTime {
        self.active.started_at
    }

    /// Stop sampling and write the profile to the sink.
    pub fn end_capture(self) -> Result<Recording, PprofError> {
        let mut session = ManuallyDrop::new(self);
        // Safety: `session` is never dropped, so `active` is taken exactly once.
        let active = unsafe { ManuallyDrop::take(&mut session.active) };
        active.flush()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // Safety: `end_capture` skips this destructor, so `active` has not
        // been taken yet and is not used after this point.
        let active = unsafe { ManuallyDrop::take(&mut self.active) };

        let path = active.path.clone();
        match active.flush() {
            Ok(recording) => {
                tracing::warn!(
                    path = %path.display(),
                    samples = recording.sample_count(),
                    "capture session dropped before it was ended, profile flushed"
                );
            }
            Err(err) => {
                tracing::error!(path = %path.display(), "failed to flush cpu profile: {err:#}");
            }
        }
    }
}

impl ActiveCapture {
    fn flush(self) -> Result<Recording, PprofError> {
        let Self {
            guard,
            mut sink,
            path,
            started_at,
            frequency,
            encoding,
        } = self;

        let report = guard.report().build().map_err(PprofError::Report)?;
        // Dropping the guard stops the sampling timer.
        drop(guard);
        let ended_at = SystemTime::now();

        let data = encode(&report, encoding)?;
        sink.write_all(&data)?;
        sink.flush()?;
        sink.sync_all()?;
        drop(sink);

        let samples = ExecutionSample::from_report(&report, started_at, ended_at);

        tracing::debug!(
            path = %path.display(),
            bytes = data.len(),
            stacks = samples.len(),
            "cpu capture flushed"
        );

        Ok(Recording::new(path, data.len() as u64, started_at, ended_at, frequency, samples))
    }
}

fn encode(report: &pprof::Report, encoding: Encoding) -> Result<Vec<u8>, PprofError> {
    let pprof = report.pprof().map_err(PprofError::Report)?;

    match encoding {
        Encoding::Raw => Ok(pprof.encode_to_vec()),
        Encoding::Gzip => {
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            gz.write_all(&pprof.encode_to_vec())?;
            Ok(gz.finish()?)
        }
    }
}
