//! Turning raw result artifacts into throughput numbers.

use crate::driver::Artifact;
use crate::error::{AnalysisError, Error};
use regex::Regex;
use std::fs;

/// Computes the throughput of the most recent run from its artifacts.
pub trait Analyzer {
    /// Extract a throughput from `artifact`.
    fn calculate_throughput(&mut self, artifact: &Artifact) -> Result<f64, AnalysisError>;
}

impl<F> Analyzer for F
where
    F: FnMut(&Artifact) -> Result<f64, AnalysisError>,
{
    fn calculate_throughput(&mut self, artifact: &Artifact) -> Result<f64, AnalysisError> {
        (self)(artifact)
    }
}

/// Matches the data row of perftest's bandwidth report and captures the "BW average" column:
///
/// ```text
///  #bytes     #iterations    BW peak[Gb/sec]    BW average[Gb/sec]   MsgRate[Mpps]
///  65536      5000             92.31              92.28                0.176011
/// ```
pub const PERFTEST_BW: &str =
    r"(?m)^\s*\d+\s+\d+\s+[0-9.]+\s+(?P<throughput>[0-9.]+)\s+[0-9.]+\s*$";

/// An [`Analyzer`] that reads the artifact file and takes the throughput from the last line that
/// matches a regular expression.
///
/// The expression must have a capture group named `throughput`. Its text is parsed as a
/// floating-point number and multiplied by the analyzer's scale factor.
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    pattern: Regex,
    scale: f64,
}

impl PatternAnalyzer {
    /// Use `pattern` to find throughput values.
    pub fn new(pattern: &str) -> Result<Self, Error> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::config(format!("analyzer pattern does not compile: {e}")))?;
        if !pattern.capture_names().any(|n| n == Some("throughput")) {
            return Err(Error::config(
                "analyzer pattern has no `throughput` capture group",
            ));
        }
        Ok(PatternAnalyzer { pattern, scale: 1.0 })
    }

    /// Read perftest bandwidth reports (see [`PERFTEST_BW`]).
    pub fn perftest() -> Self {
        Self::new(PERFTEST_BW).expect("PERFTEST_BW is a valid pattern")
    }

    /// Multiply every extracted value by `scale`, e.g. to convert units.
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// The text of the `throughput` group in the last match in `text`.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern
            .captures_iter(text)
            .filter_map(|c| c.name("throughput"))
            .last()
            .map(|m| m.as_str())
    }

    fn convert(&self, raw: &str) -> Result<f64, AnalysisError> {
        let value: f64 = raw.trim().parse().map_err(|source| AnalysisError::Parse {
            value: raw.to_string(),
            source,
        })?;
        let value = value * self.scale;
        if !value.is_finite() || value < 0.0 {
            return Err(AnalysisError::Invalid(value));
        }
        Ok(value)
    }
}

impl Analyzer for PatternAnalyzer {
    fn calculate_throughput(&mut self, artifact: &Artifact) -> Result<f64, AnalysisError> {
        let text = fs::read_to_string(&artifact.path).map_err(|source| AnalysisError::Read {
            path: artifact.path.clone(),
            source,
        })?;
        let raw = self.find(&text).ok_or_else(|| AnalysisError::NoMatch {
            path: artifact.path.clone(),
        })?;
        self.convert(raw)
    }
}

#[cfg(test)]
const WRITE_BW_REPORT: &str = "\
---------------------------------------------------------------------------------------
                    RDMA_Write BW Test
 Dual-port       : OFF          Device         : mlx5_0
 Number of qps   : 4            Transport type : IB
---------------------------------------------------------------------------------------
 #bytes     #iterations    BW peak[Gb/sec]    BW average[Gb/sec]   MsgRate[Mpps]
 65536      5000             92.31              92.28              0.176011
---------------------------------------------------------------------------------------
";

#[test]
fn perftest_average_column() {
    let a = PatternAnalyzer::perftest();
    assert_eq!(a.find(WRITE_BW_REPORT), Some("92.28"));
}

#[test]
fn last_match_wins() {
    let a = PatternAnalyzer::new(r"rate=(?P<throughput>\d+)").unwrap();
    assert_eq!(a.find("rate=1\nrate=2\nrate=3\n"), Some("3"));
    assert_eq!(a.find("nothing here"), None);
}

#[test]
fn pattern_needs_throughput_group() {
    assert!(matches!(
        PatternAnalyzer::new(r"rate=(\d+)"),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        PatternAnalyzer::new(r"rate=(?P<throughput>"),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn reads_and_scales_artifacts() {
    use crate::case::TestCase;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test_result_rc_write_1.txt");
    fs::write(&path, WRITE_BW_REPORT).unwrap();
    let artifact = Artifact::new(TestCase::new("rc_write".into(), 4, 1), &path);

    let mut a = PatternAnalyzer::perftest().scale(1000.0);
    let t = a.calculate_throughput(&artifact).unwrap();
    assert!((t - 92_280.0).abs() < 1e-6);
}

#[test]
fn analysis_failures() {
    use crate::case::TestCase;

    let dir = tempfile::tempdir().unwrap();
    let case = TestCase::new("rc_write".into(), 4, 1);
    let mut a = PatternAnalyzer::new(r"bw=(?P<throughput>\S+)").unwrap();

    let missing = Artifact::new(case.clone(), dir.path().join("missing.txt"));
    assert!(matches!(
        a.calculate_throughput(&missing),
        Err(AnalysisError::Read { .. })
    ));

    let empty = dir.path().join("empty.txt");
    fs::write(&empty, "connection reset\n").unwrap();
    assert!(matches!(
        a.calculate_throughput(&Artifact::new(case.clone(), &empty)),
        Err(AnalysisError::NoMatch { .. })
    ));

    let garbled = dir.path().join("garbled.txt");
    fs::write(&garbled, "bw=fast\n").unwrap();
    assert!(matches!(
        a.calculate_throughput(&Artifact::new(case.clone(), &garbled)),
        Err(AnalysisError::Parse { .. })
    ));

    let negative = dir.path().join("negative.txt");
    fs::write(&negative, "bw=-3\n").unwrap();
    assert!(matches!(
        a.calculate_throughput(&Artifact::new(case, &negative)),
        Err(AnalysisError::Invalid(_))
    ));
}
