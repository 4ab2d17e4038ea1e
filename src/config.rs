//! YAML configuration.
//!
//! ```yaml
//! kinds: [rc_write, rc_read]
//! run:
//!   max_iterations: 32
//!   max_retries: 1
//!   stepping: { mode: search, start: 1, min_width: 1 }
//!   destination:
//!     - stagnation: { steps: 2, threshold: 0.01 }
//!     - plateau: { window: 3, tolerance: 0.01 }
//! driver:
//!   program: ib_write_bw
//!   args: ["-q", "{load}", "--report_gbits"]
//!   output_dir: results
//!   timeout_ms: 60000
//! ```
//!
//! Each destination is a single-key map naming the condition (`- target: 90.5`).

use crate::analyzer::{PatternAnalyzer, PERFTEST_BW};
use crate::case::InstanceKind;
use crate::destination::{AnyOf, Destination, Iterations, Plateau, Stagnation, Target};
use crate::driver::CommandDriver;
use crate::error::{Error, Result};
use crate::step::{CaseStepper, SearchStepper, SweepStepper};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything needed to characterize a set of instance kinds.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Instance kinds to test, in order.
    pub kinds: Vec<InstanceKind>,
    /// How each run steps and when it stops.
    #[serde(default)]
    pub run: RunSettings,
    /// External benchmark program. Only needed when running through [`CommandDriver`].
    #[serde(default)]
    pub driver: Option<DriverSpec>,
    /// How to read throughput from result files. Defaults to perftest's bandwidth report.
    #[serde(default)]
    pub analyzer: Option<AnalyzerSpec>,
}

/// Per-run controller settings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    /// Hard cap on iterations per run, whatever the destination says.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// How many more times a case is tried after the driver fails on it.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Fraction by which throughput must beat the best earlier result to count as improved.
    #[serde(default)]
    pub improvement: f64,

    /// How the next load is chosen.
    #[serde(default)]
    pub stepping: Stepping,

    /// When to stop. Any one condition suffices. Running out of loads always stops a run.
    #[serde(
        default,
        deserialize_with = "serde_yaml::with::singleton_map_recursive::deserialize"
    )]
    pub destination: Vec<DestinationSpec>,
}

fn default_max_iterations() -> usize {
    64
}

fn default_max_retries() -> usize {
    1
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            improvement: 0.0,
            stepping: Stepping::default(),
            destination: Vec::new(),
        }
    }
}

/// Load stepping policy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Stepping {
    /// Double the load while throughput improves, then bisect. See [`SearchStepper`].
    Search {
        /// First load tried.
        start: usize,
        /// Stop once the peak is known to within this many load units. Defaults to `start / 2`.
        #[serde(default)]
        min_width: Option<usize>,
        /// Also sample loads just below the peak. See [`SearchStepper::fill_left`].
        #[serde(default)]
        fill_left: bool,
    },
    /// Walk an explicit list of loads. See [`SweepStepper`].
    Sweep {
        /// Loads in the order they are tried.
        loads: Vec<usize>,
    },
    /// Walk `start, start + step, ...` up to and including `end`.
    Range {
        /// First load.
        start: usize,
        /// Last load (inclusive).
        end: usize,
        /// Distance between loads.
        step: usize,
    },
}

impl Default for Stepping {
    fn default() -> Self {
        Stepping::Search {
            start: 1,
            min_width: None,
            fill_left: false,
        }
    }
}

impl Stepping {
    /// A fresh stepper for one run.
    pub fn build(&self) -> Box<dyn CaseStepper + Send> {
        match *self {
            Stepping::Search {
                start,
                min_width,
                fill_left,
            } => {
                let mut s = SearchStepper::until(start, min_width.unwrap_or(start / 2));
                if fill_left {
                    s.fill_left();
                }
                Box::new(s)
            }
            Stepping::Sweep { ref loads } => Box::new(SweepStepper::from(loads.clone())),
            Stepping::Range { start, end, step } => {
                Box::new(SweepStepper::from((start..=end).step_by(step.max(1))))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Stepping::Search { start, .. } => {
                ensure(start > 0, "run.stepping.start must be positive")
            }
            Stepping::Sweep { ref loads } => {
                ensure(!loads.is_empty(), "run.stepping.loads must not be empty")
            }
            Stepping::Range { start, end, step } => {
                ensure(step > 0, "run.stepping.step must be positive")?;
                ensure(
                    start <= end,
                    format!("run.stepping range is empty ({start} > {end})"),
                )
            }
        }
    }
}

/// One stopping condition.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationSpec {
    /// See [`Plateau`].
    Plateau {
        /// Number of trailing iterations considered.
        window: usize,
        /// Largest allowed relative spread.
        tolerance: f64,
    },
    /// See [`Stagnation`].
    Stagnation {
        /// Consecutive iterations without a gain.
        steps: usize,
        /// Fraction by which a result must beat the earlier best to count as a gain.
        #[serde(default)]
        threshold: f64,
    },
    /// See [`Iterations`].
    Iterations(usize),
    /// See [`Target`].
    Target(f64),
}

impl DestinationSpec {
    /// The predicate this describes.
    pub fn build(&self) -> Box<dyn Destination> {
        match *self {
            DestinationSpec::Plateau { window, tolerance } => {
                Box::new(Plateau { window, tolerance })
            }
            DestinationSpec::Stagnation { steps, threshold } => {
                Box::new(Stagnation { steps, threshold })
            }
            DestinationSpec::Iterations(n) => Box::new(Iterations(n)),
            DestinationSpec::Target(t) => Box::new(Target(t)),
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            DestinationSpec::Plateau { window, tolerance } => {
                ensure(window > 0, "plateau window must be positive")?;
                ensure(
                    tolerance.is_finite() && tolerance >= 0.0,
                    format!("plateau tolerance must be a non-negative number (got {tolerance})"),
                )
            }
            DestinationSpec::Stagnation { steps, threshold } => {
                ensure(steps > 0, "stagnation steps must be positive")?;
                ensure(
                    threshold.is_finite() && threshold >= 0.0,
                    format!("stagnation threshold must be a non-negative number (got {threshold})"),
                )
            }
            DestinationSpec::Iterations(n) => {
                ensure(n > 0, "destination iterations must be positive")
            }
            DestinationSpec::Target(t) => ensure(
                t.is_finite() && t > 0.0,
                format!("destination target must be positive (got {t})"),
            ),
        }
    }
}

impl RunSettings {
    /// All configured destinations, combined.
    pub fn destination(&self) -> AnyOf {
        AnyOf(self.destination.iter().map(DestinationSpec::build).collect())
    }

    /// Check the settings for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        ensure(
            self.max_iterations > 0,
            "run.max_iterations must be positive",
        )?;
        ensure(
            self.improvement.is_finite() && self.improvement >= 0.0,
            format!(
                "run.improvement must be a non-negative number (got {})",
                self.improvement
            ),
        )?;
        self.stepping.validate()?;
        for d in &self.destination {
            d.validate()?;
        }
        Ok(())
    }
}

/// The external benchmark program run for each case.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DriverSpec {
    /// Program to run.
    pub program: String,
    /// Arguments; `{kind}`, `{load}` and `{iteration}` are substituted.
    #[serde(default)]
    pub args: Vec<String>,
    /// Where result files go.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Kill the program after this many milliseconds. Unlimited if unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

impl DriverSpec {
    /// A driver running this program.
    pub fn build(&self) -> CommandDriver {
        let driver = CommandDriver::new(self.program.clone())
            .args(self.args.iter().cloned())
            .output_dir(self.output_dir.clone());
        match self.timeout_ms {
            Some(ms) => driver.timeout(Duration::from_millis(ms)),
            None => driver,
        }
    }
}

/// How throughput is read from result files.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerSpec {
    /// Regular expression with a `throughput` capture group. The last match wins.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Factor applied to every extracted value.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_pattern() -> String {
    PERFTEST_BW.to_string()
}

fn default_scale() -> f64 {
    1.0
}

impl AnalyzerSpec {
    /// An analyzer using this pattern.
    pub fn build(&self) -> Result<PatternAnalyzer> {
        Ok(PatternAnalyzer::new(&self.pattern)?.scale(self.scale))
    }
}

impl Config {
    /// Read and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&data).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{}: {msg}", path.display()))
            }
            e => e,
        })
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)
            .map_err(|e| Error::config(format!("failed to parse YAML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the whole configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        ensure(!self.kinds.is_empty(), "kinds must not be empty")?;
        let mut seen = HashSet::new();
        for kind in &self.kinds {
            ensure(
                !kind.as_str().is_empty(),
                "instance kind names must not be empty",
            )?;
            ensure(
                seen.insert(kind),
                format!("instance kind `{kind}` is listed twice"),
            )?;
        }

        self.run.validate()?;

        if let Some(ref driver) = self.driver {
            ensure(
                !driver.program.trim().is_empty(),
                "driver.program must not be empty",
            )?;
            ensure(
                driver.timeout_ms != Some(0),
                "driver.timeout_ms must be positive",
            )?;
        }
        if let Some(ref analyzer) = self.analyzer {
            ensure(
                analyzer.scale.is_finite() && analyzer.scale > 0.0,
                format!("analyzer.scale must be positive (got {})", analyzer.scale),
            )?;
            analyzer.build()?;
        }
        Ok(())
    }

    /// The configured analyzer, or a perftest bandwidth analyzer if none is configured.
    pub fn analyzer(&self) -> Result<PatternAnalyzer> {
        match self.analyzer {
            Some(ref spec) => spec.build(),
            None => Ok(PatternAnalyzer::perftest()),
        }
    }

    /// The configured driver.
    pub fn driver(&self) -> Result<CommandDriver> {
        self.driver
            .as_ref()
            .map(DriverSpec::build)
            .ok_or_else(|| Error::config("no driver section configured"))
    }
}

fn ensure(cond: bool, msg: impl Into<String>) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::config(msg))
    }
}

#[cfg(test)]
const FULL: &str = r#"
kinds: [rc_write, rc_read]
run:
  max_iterations: 16
  max_retries: 2
  improvement: 0.02
  stepping: { mode: search, start: 2, min_width: 1, fill_left: true }
  destination:
    - plateau: { window: 3, tolerance: 0.01 }
    - stagnation: { steps: 2, threshold: 0.01 }
    - iterations: 10
    - target: 90.5
driver:
  program: ib_write_bw
  args: ["-q", "{load}", "--report_gbits"]
  timeout_ms: 30000
analyzer:
  pattern: 'bw=(?P<throughput>\S+)'
  scale: 8.0
"#;

#[test]
fn full_config() {
    let cfg = Config::from_yaml_str(FULL).unwrap();
    assert_eq!(
        cfg.kinds,
        vec![InstanceKind::new("rc_write"), InstanceKind::new("rc_read")]
    );
    assert_eq!(cfg.run.max_iterations, 16);
    assert_eq!(cfg.run.max_retries, 2);
    assert_eq!(
        cfg.run.stepping,
        Stepping::Search {
            start: 2,
            min_width: Some(1),
            fill_left: true
        }
    );
    assert_eq!(
        cfg.run.destination,
        vec![
            DestinationSpec::Plateau {
                window: 3,
                tolerance: 0.01
            },
            DestinationSpec::Stagnation {
                steps: 2,
                threshold: 0.01
            },
            DestinationSpec::Iterations(10),
            DestinationSpec::Target(90.5),
        ]
    );
    let driver = cfg.driver.as_ref().unwrap();
    assert_eq!(driver.output_dir, PathBuf::from("results"));
    assert_eq!(driver.timeout_ms, Some(30000));
    assert_eq!(cfg.analyzer.as_ref().unwrap().scale, 8.0);
    assert!(cfg.analyzer().is_ok());
}

#[test]
fn defaults() {
    let cfg = Config::from_yaml_str("kinds: [ud_send]\n").unwrap();
    assert_eq!(cfg.run, RunSettings::default());
    assert!(cfg.driver.is_none());
    assert!(cfg.driver().is_err());
    assert!(cfg.analyzer().is_ok());

    let mut stepper = cfg.run.stepping.build();
    assert_eq!(stepper.next(), Some(1));
    assert_eq!(stepper.next(), Some(2));
}

#[test]
fn sweep_and_range_stepping() {
    let cfg = Config::from_yaml_str(
        "kinds: [a]\nrun:\n  stepping: { mode: range, start: 4, end: 12, step: 4 }\n",
    )
    .unwrap();
    let loads: Vec<_> = cfg.run.stepping.build().collect();
    assert_eq!(loads, vec![4, 8, 12]);

    let cfg =
        Config::from_yaml_str("kinds: [a]\nrun:\n  stepping: { mode: sweep, loads: [3, 1] }\n")
            .unwrap();
    let loads: Vec<_> = cfg.run.stepping.build().collect();
    assert_eq!(loads, vec![3, 1]);
}

#[test]
fn rejects_bad_configs() {
    let bad = [
        "kinds: []\n",
        "kinds: [a, a]\n",
        "kinds: [a]\nrun:\n  max_iterations: 0\n",
        "kinds: [a]\nrun:\n  improvement: -0.1\n",
        "kinds: [a]\nrun:\n  stepping: { mode: search, start: 0 }\n",
        "kinds: [a]\nrun:\n  stepping: { mode: sweep, loads: [] }\n",
        "kinds: [a]\nrun:\n  stepping: { mode: range, start: 8, end: 4, step: 1 }\n",
        "kinds: [a]\nrun:\n  stepping: { mode: range, start: 1, end: 4, step: 0 }\n",
        "kinds: [a]\nrun:\n  destination:\n    - plateau: { window: 0, tolerance: 0.1 }\n",
        "kinds: [a]\nrun:\n  destination:\n    - target: 0\n",
        "kinds: [a]\nrun:\n  destination:\n    - stagnation: { steps: 0 }\n",
        "kinds: [a]\nrun:\n  destination:\n    - sideways: 3\n",
        "kinds: [a]\ndriver:\n  program: sh\n  timeout_ms: 0\n",
        "kinds: [a]\ndriver:\n  program: ''\n",
        "kinds: [a]\nanalyzer:\n  pattern: 'no group'\n",
        "kinds: [a]\nunknown: 1\n",
        "kinds: a: b\n",
    ];
    for yaml in bad {
        match Config::from_yaml_str(yaml) {
            Err(Error::Configuration(_)) => {}
            other => panic!("{yaml:?} gave {other:?}"),
        }
    }
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summit.yml");
    fs::write(&path, FULL).unwrap();
    assert_eq!(Config::load(&path).unwrap().kinds.len(), 2);

    assert!(matches!(
        Config::load(dir.path().join("missing.yml")),
        Err(Error::Io { .. })
    ));
}

#[test]
fn bundled_sample_config() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("summit.yml");
    let cfg = Config::load(path).unwrap();
    assert_eq!(
        cfg.kinds,
        vec![InstanceKind::new("rc_write"), InstanceKind::new("rc_read")]
    );
    assert!(!cfg.run.destination.is_empty());
    assert!(cfg.driver().is_ok());
    assert!(cfg.analyzer().is_ok());
}
