use std::path::PathBuf;
use std::time::Duration;

use flamechart_pprof::{Encoding, MAX_FREQUENCY};

/// Prefix for environment overrides, e.g. `TRACE_EXAMPLE_PROFILER__FREQUENCY=250`.
pub const ENV_PREFIX: &str = "TRACE_EXAMPLE";

/// Loaded when no `--config` file is given. Not required to exist.
pub const DEFAULT_CONFIG_FILE: &str = "trace-example";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Clap(#[from] clap::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, serde_derive::Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct Config {
    /// Default log directive, used when `RUST_LOG` is not set.
    #[default = "info"]
    pub level: String,
    /// Where the profile is written.
    #[default(PathBuf::from("trace-examples/rust/complex_rust_trace.pprof"))]
    pub output: PathBuf,
    /// Create missing parent directories of `output`.
    pub create_dirs: bool,
    pub profiler: ProfilerSettings,
    pub workload: WorkloadSettings,
}

#[derive(Debug, Clone, serde_derive::Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct ProfilerSettings {
    /// Sampling frequency in Hz.
    #[default = 100]
    pub frequency: i32,
    #[default(vec!["libc".into(), "libgcc".into(), "pthread".into(), "vdso".into()])]
    pub blocklist: Vec<String>,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, serde_derive::Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct WorkloadSettings {
    /// Loop iterations of the small leaf. Medium and large leaves run 5x and 10x as many.
    #[default = 10_000_000]
    pub small_iterations: u64,
    #[default(Duration::from_millis(50))]
    #[serde(with = "humantime_serde")]
    pub pause: Duration,
}

impl Config {
    /// Parse the configuration from the command line, config files and the
    /// environment, in increasing order of precedence for files and
    /// environment, with `--override` values applied last.
    pub fn load(argv: Vec<String>) -> Result<Self, ConfigError> {
        let command = clap::Command::new(env!("CARGO_PKG_NAME"))
            .version(env!("CARGO_PKG_VERSION"))
            .about(env!("CARGO_PKG_DESCRIPTION"))
            .author(env!("CARGO_PKG_AUTHORS"))
            .arg(
                clap::Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Path to configuration file(s)")
                    .action(clap::ArgAction::Append),
            )
            .arg(
                clap::Arg::new("overrides")
                    .long("override")
                    .short('o')
                    .alias("set")
                    .help("Provide an override for a configuration value, in the format KEY=VALUE")
                    .action(clap::ArgAction::Append),
            );

        let matches = command.try_get_matches_from(argv)?;

        let mut builder = config::Config::builder();

        match matches.get_many::<String>("config") {
            Some(files) => {
                for path in files {
                    builder = builder.add_source(config::File::with_name(path));
                }
            }
            None => {
                builder = builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("profiler.blocklist"),
        );

        if let Some(overrides) = matches.get_many::<String>("overrides") {
            for ov in overrides {
                let (key, value) = ov.split_once('=').ok_or_else(|| {
                    clap::Error::raw(
                        clap::error::ErrorKind::InvalidValue,
                        "Override must be in the format KEY=VALUE",
                    )
                })?;

                builder = builder.set_override(key, value)?;
            }
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output must not be empty"));
        }

        if !(1..=MAX_FREQUENCY).contains(&self.profiler.frequency) {
            return Err(ConfigError::Invalid("profiler.frequency must be between 1 and 1000000"));
        }

        if self.workload.small_iterations == 0 {
            return Err(ConfigError::Invalid("workload.small_iterations must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(all(coverage_nightly, test), coverage(off))]
mod tests {
    use std::io::Write;

    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("trace-example")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.level, "info");
        assert_eq!(config.output, PathBuf::from("trace-examples/rust/complex_rust_trace.pprof"));
        assert!(!config.create_dirs);
        assert_eq!(config.profiler.frequency, 100);
        assert_eq!(config.profiler.encoding, Encoding::Gzip);
        assert_eq!(config.workload.small_iterations, 10_000_000);
        assert_eq!(config.workload.pause, Duration::from_millis(50));
        config.validate().unwrap();
    }

    #[test]
    fn overrides() {
        let config = Config::load(argv(&[
            "--override",
            "output=out/profile.pb",
            "-o",
            "profiler.frequency=250",
            "--set",
            "profiler.encoding=raw",
            "-o",
            "workload.pause=5ms",
            "-o",
            "create_dirs=true",
        ]))
        .unwrap();

        assert_eq!(config.output, PathBuf::from("out/profile.pb"));
        assert_eq!(config.profiler.frequency, 250);
        assert_eq!(config.profiler.encoding, Encoding::Raw);
        assert_eq!(config.workload.pause, Duration::from_millis(5));
        assert!(config.create_dirs);
    }

    #[test]
    fn config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
level = "debug"

[workload]
small_iterations = 42
pause = "2ms"

[profiler]
blocklist = ["libc"]
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let config = Config::load(argv(&["--config", path, "-o", "workload.small_iterations=7"])).unwrap();

        assert_eq!(config.level, "debug");
        assert_eq!(config.workload.small_iterations, 7);
        assert_eq!(config.workload.pause, Duration::from_millis(2));
        assert_eq!(config.profiler.blocklist, ["libc"]);
        assert_eq!(config.profiler.frequency, 100);
    }

    #[test]
    fn malformed_override() {
        let err = Config::load(argv(&["-o", "profiler.frequency"])).unwrap_err();
        assert!(matches!(err, ConfigError::Clap(_)), "unexpected error: {err:?}");
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Config::load(argv(&["-o", "profiler.frequency=0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "unexpected error: {err:?}");

        let err = Config::load(argv(&["-o", "profiler.frequency=2000000"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "unexpected error: {err:?}");

        let config = Config::load(argv(&["-o", "profiler.frequency=1000000"])).unwrap();
        assert_eq!(config.profiler.frequency, MAX_FREQUENCY);

        let err = Config::load(argv(&["-o", "workload.small_iterations=0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "unexpected error: {err:?}");
    }
}
