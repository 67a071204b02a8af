#![doc = include_str!("../README.md")]
#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]

mod cpu;
mod sample;

#[derive(Debug, thiserror::Error)]
pub enum PprofError {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("failed to start cpu profiler: {0}")]
	CaptureStart(#[source] pprof::Error),
	#[error("failed to build cpu profile report: {0}")]
	Report(#[source] pprof::Error),
	#[error("sampling frequency must be between 1 and 1000000 Hz, got {0}")]
	InvalidFrequency(i32),
}

pub use cpu::{CaptureSession, Cpu, Encoding, MAX_FREQUENCY};
pub use sample::{ExecutionSample, Recording};
