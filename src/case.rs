//! The parameters of a single test iteration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A category of target configuration whose peak performance is characterized, such as an RDMA
/// queue-pair type paired with an operation (`rc_write`, `ud_send`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceKind(String);

impl InstanceKind {
    /// Name an instance kind.
    pub fn new(name: impl Into<String>) -> Self {
        InstanceKind(name.into())
    }

    /// The name of this kind.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceKind {
    fn from(name: &str) -> Self {
        InstanceKind::new(name)
    }
}

/// One set of parameters under which a single test iteration executes.
///
/// Cases are handed to a [`Driver`](crate::Driver) by shared reference and never change after
/// that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// The instance kind under test.
    pub kind: InstanceKind,
    /// The stepped load parameter, e.g. concurrency or queue-pair count.
    pub load: usize,
    /// 1-based position of this case in its run.
    pub iteration: usize,
}

impl TestCase {
    /// Describe the `iteration`th case of a run against `kind` at `load`.
    pub fn new(kind: InstanceKind, load: usize, iteration: usize) -> Self {
        TestCase {
            kind,
            load,
            iteration,
        }
    }

    /// Substitute `{kind}`, `{load}` and `{iteration}` in `template` with this case's values.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{kind}", self.kind.as_str())
            .replace("{load}", &self.load.to_string())
            .replace("{iteration}", &self.iteration.to_string())
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} @ {}", self.kind, self.iteration, self.load)
    }
}

#[test]
fn render_placeholders() {
    let case = TestCase::new("rc_write".into(), 16, 3);
    assert_eq!(
        case.render("-q {load} --out {kind}-{iteration}.log"),
        "-q 16 --out rc_write-3.log"
    );
    assert_eq!(case.render("--report_gbits"), "--report_gbits");
}

#[test]
fn display() {
    let case = TestCase::new(InstanceKind::new("ud_send"), 4, 1);
    assert_eq!(case.to_string(), "ud_send#1 @ 4");
}
