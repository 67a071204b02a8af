#![doc = include_str!("../README.md")]
#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]

use anyhow::Context;
use flamechart_pprof::{Cpu, Recording};

pub mod config;
pub mod workload;

use config::Config;
use workload::Workload;

/// Run the workload under the cpu profiler and write the profile to
/// `config.output`.
///
/// Nothing runs if the output file cannot be created or the profiler cannot
/// be started.
pub fn run(config: &Config) -> anyhow::Result<Recording> {
    let output = &config.output;

    if config.create_dirs {
        if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("could not create {}", parent.display()))?;
        }
    }

    let cpu = Cpu::new(config.profiler.frequency, &config.profiler.blocklist).with_encoding(config.profiler.encoding);
    let workload = Workload::new(&config.workload);

    let session = cpu
        .begin_capture(output)
        .with_context(|| format!("could not start CPU profile at {}", output.display()))?;

    tracing::info!(frequency = cpu.frequency(), "starting the complex function");
    workload.run_outer();

    let recording = session
        .end_capture()
        .with_context(|| format!("could not write CPU profile to {}", output.display()))?;

    tracing::info!(
        samples = recording.sample_count(),
        cpu_time = ?recording.cpu_time(),
        wall_time = ?recording.duration(),
        bytes = recording.bytes_written(),
        "profile recorded"
    );

    for (function, count) in recording
        .self_counts()
        .into_iter()
        .filter(|(function, _)| workload::CALL_TREE.contains(function))
    {
        tracing::debug!(function = %function, count, "self samples");
    }

    Ok(recording)
}
