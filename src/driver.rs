//! Executing test cases.

use crate::case::TestCase;
use crate::error::DriverError;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The raw output of one executed test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// The case that produced this artifact.
    pub case: TestCase,
    /// Where the raw results were written.
    pub path: PathBuf,
}

impl Artifact {
    /// Describe the results of `case` stored at `path`.
    pub fn new(case: TestCase, path: impl Into<PathBuf>) -> Self {
        Artifact {
            case,
            path: path.into(),
        }
    }
}

/// Runs one test iteration against a target configuration.
pub trait Driver {
    /// Execute `case` to completion and say where its raw results are.
    fn start_test(&mut self, case: &TestCase) -> Result<Artifact, DriverError>;
}

impl<F> Driver for F
where
    F: FnMut(&TestCase) -> Result<Artifact, DriverError>,
{
    fn start_test(&mut self, case: &TestCase) -> Result<Artifact, DriverError> {
        (self)(case)
    }
}

/// A [`Driver`] that runs an external benchmark program once per case and saves its standard
/// output as the artifact.
///
/// Arguments may contain `{kind}`, `{load}` and `{iteration}`, which are replaced with the
/// case's values. The same values are exported as `SUMMIT_KIND`, `SUMMIT_LOAD` and
/// `SUMMIT_ITERATION`. Standard output goes to `<output_dir>/test_result_<kind>_<iteration>.txt`;
/// standard error is passed through.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
    timeout: Option<Duration>,
}

impl CommandDriver {
    /// Run `program` with no arguments, writing results to the current directory.
    pub fn new(program: impl Into<String>) -> Self {
        CommandDriver {
            program: program.into(),
            args: Vec::new(),
            output_dir: PathBuf::from("."),
            timeout: None,
        }
    }

    /// Pass these (templated) arguments to the program.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Write result files to `dir`, creating it if necessary.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Kill the program and fail the attempt if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where the artifact for `case` is written.
    pub fn result_path(&self, case: &TestCase) -> PathBuf {
        self.output_dir
            .join(format!("test_result_{}_{}.txt", case.kind, case.iteration))
    }
}

fn create_artifact(path: &Path) -> Result<File, DriverError> {
    let artifact_error = |source: io::Error| DriverError::Artifact {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(artifact_error)?;
    }
    File::create(path).map_err(artifact_error)
}

impl CommandDriver {
    fn wait(&self, child: &mut Child) -> Result<ExitStatus, DriverError> {
        let wait_error = |source: io::Error| DriverError::Wait {
            program: self.program.clone(),
            source,
        };
        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => return child.wait().map_err(wait_error),
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(wait_error)? {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(program = %self.program, ?timeout, "test program timed out, killing it");
                // it may have exited since the last poll
                let _ = child.kill();
                child.wait().map_err(wait_error)?;
                return Err(DriverError::Timeout {
                    program: self.program.clone(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Driver for CommandDriver {
    fn start_test(&mut self, case: &TestCase) -> Result<Artifact, DriverError> {
        let args: Vec<String> = self.args.iter().map(|a| case.render(a)).collect();
        let path = self.result_path(case);
        let stdout = create_artifact(&path)?;
        tracing::debug!(program = %self.program, ?args, %case, path = %path.display(), "spawning test");

        let mut child = Command::new(&self.program)
            .args(&args)
            .env("SUMMIT_KIND", case.kind.as_str())
            .env("SUMMIT_LOAD", case.load.to_string())
            .env("SUMMIT_ITERATION", case.iteration.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .spawn()
            .map_err(|source| DriverError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let status = self.wait(&mut child)?;
        if !status.success() {
            tracing::debug!(%status, %case, "test program failed");
            return Err(DriverError::Exit {
                program: self.program.clone(),
                status,
            });
        }
        Ok(Artifact::new(case.clone(), path))
    }
}

#[test]
fn result_paths_follow_the_case() {
    let driver = CommandDriver::new("ib_write_bw").output_dir("results");
    let case = TestCase::new("rc_write".into(), 8, 3);
    assert_eq!(
        driver.result_path(&case),
        Path::new("results").join("test_result_rc_write_3.txt")
    );
}

#[test]
fn closures_are_drivers() {
    let mut calls = 0;
    let mut driver = |case: &TestCase| -> Result<Artifact, DriverError> {
        calls += 1;
        Ok(Artifact::new(case.clone(), "mem"))
    };
    let case = TestCase::new("rc_write".into(), 1, 1);
    let artifact = driver.start_test(&case).unwrap();
    assert_eq!(artifact.case, case);
    drop(driver);
    assert_eq!(calls, 1);
}

#[test]
fn missing_program_is_a_spawn_error() {
    let mut driver = CommandDriver::new("/nonexistent/summit-test-program");
    let err = driver
        .start_test(&TestCase::new("rc_write".into(), 1, 1))
        .unwrap_err();
    assert!(matches!(err, DriverError::Spawn { .. }), "{err}");
}

#[cfg(unix)]
#[test]
fn hung_program_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = CommandDriver::new("sh")
        .args(["-c", "echo warming up; exec sleep 30"])
        .output_dir(dir.path())
        .timeout(Duration::from_millis(200));
    let case = TestCase::new("rc_write".into(), 4, 1);

    let started = Instant::now();
    let err = driver.start_test(&case).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    match err {
        DriverError::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_millis(200)),
        other => panic!("expected a timeout, got {other}"),
    }
}

#[cfg(unix)]
#[test]
fn output_lands_in_the_result_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = CommandDriver::new("sh")
        .args(["-c", "echo load={load} kind=$SUMMIT_KIND"])
        .output_dir(dir.path().join("nested"))
        .timeout(Duration::from_secs(30));
    let artifact = driver
        .start_test(&TestCase::new("rc_read".into(), 16, 2))
        .unwrap();
    assert_eq!(artifact.path, dir.path().join("nested/test_result_rc_read_2.txt"));
    let contents = fs::read_to_string(&artifact.path).unwrap();
    assert_eq!(contents.trim(), "load=16 kind=rc_read");
}
