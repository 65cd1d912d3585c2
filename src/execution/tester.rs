//! Candidate testing against a problem's verification context.
//!
//! [`PythonTester`] writes the candidate, the problem's `code_context`, and a
//! small driver program into a scratch directory, then runs the driver with
//! the configured interpreter. The driver calls the context's
//! `test_execution(solution)` (and `test_string(solution)` when defined).
//!
//! Once the harness returns, the driver prints a completion marker unique to
//! the scratch directory. Exit status mapping:
//! - `0` with the marker on stdout: [`TestReport::Passed`]
//! - `0` without the marker: the process ended before the harness finished
//!   (`os._exit`), reported as a traceback-shaped `SystemExit` transcript
//! - `3`: the harness's assertion failed; stderr carries an
//!   executed-vs-expected description
//! - `4`: the candidate raised `SystemExit`
//! - other non-zero: stderr carries the Python traceback
//! - no output at all: [`TestReport::Failed`]
//! - timeout: a traceback-shaped `TimeoutError` transcript

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::correction::feedback::TestReport;
use crate::dataset::Problem;
use crate::error::TesterError;
use crate::utils::truncate;

/// Default interpreter.
pub const DEFAULT_PYTHON: &str = "python3";

/// Default per-candidate timeout.
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 120;

/// Failure transcripts are cut to this many bytes.
const MAX_DETAIL_BYTES: usize = 4000;

/// Prefix of the completion marker printed by the driver.
const COMPLETION_MARKER: &str = "self-debug-complete";

const DRIVER: &str = r#"import sys

marker = sys.argv[3]
with open(sys.argv[1]) as f:
    solution = f.read()
with open(sys.argv[2]) as f:
    context = f.read()

namespace = {"__name__": "code_context"}
exec(compile(context, "code_context.py", "exec"), namespace)

try:
    namespace["test_execution"](solution)
    if "test_string" in namespace:
        namespace["test_string"](solution)
except AssertionError as e:
    message = str(e) or "the assertion comparing them failed"
    print("Executed result does not match the expected result: " + message, file=sys.stderr)
    sys.exit(3)
except SystemExit as e:
    print("Traceback (most recent call last):", file=sys.stderr)
    print("SystemExit: the solution exited the process with code %r before the test finished" % (e.code,), file=sys.stderr)
    sys.exit(4)

sys.stdout.flush()
print(marker, flush=True)
"#;

/// Runs candidates against a problem's test.
#[async_trait]
pub trait Tester: Send + Sync {
    /// Test one candidate. A failing candidate is `Ok`; `Err` means the test
    /// could not be run.
    async fn test(&self, problem: &Problem, candidate: &str) -> Result<TestReport, TesterError>;
}

/// Tester that runs the DS-1000 harness in a local Python interpreter.
#[derive(Debug, Clone)]
pub struct PythonTester {
    interpreter: String,
    timeout: Duration,
    scratch_root: Option<PathBuf>,
}

impl Default for PythonTester {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_PYTHON.to_string(),
            timeout: Duration::from_secs(DEFAULT_TEST_TIMEOUT_SECS),
            scratch_root: None,
        }
    }
}

impl PythonTester {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix("candidate-").tempdir_in(root)
            }
            None => tempfile::Builder::new().prefix("candidate-").tempdir(),
        }
    }
}

#[async_trait]
impl Tester for PythonTester {
    async fn test(&self, problem: &Problem, candidate: &str) -> Result<TestReport, TesterError> {
        let scratch = self.scratch_dir()?;
        let solution_path = scratch.path().join("solution.py");
        let context_path = scratch.path().join("code_context.py");
        let driver_path = scratch.path().join("driver.py");
        tokio::fs::write(&solution_path, candidate).await?;
        tokio::fs::write(&context_path, &problem.code_context).await?;
        tokio::fs::write(&driver_path, DRIVER).await?;
        let marker = completion_marker(scratch.path());

        let child = Command::new(&self.interpreter)
            .arg(&driver_path)
            .arg(&solution_path)
            .arg(&context_path)
            .arg(&marker)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TesterError::SpawnFailed {
                interpreter: self.interpreter.clone(),
                reason: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(
                    problem = %problem.id,
                    timeout_secs = self.timeout.as_secs(),
                    "Candidate timed out"
                );
                return Ok(TestReport::Detailed {
                    candidate: candidate.to_string(),
                    detail: format!(
                        "Traceback (most recent call last):\nTimeoutError: candidate did not finish within {}s",
                        self.timeout.as_secs()
                    ),
                });
            }
        };

        let report = interpret_output(
            candidate,
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            &marker,
        );
        tracing::debug!(problem = %problem.id, status = ?output.status.code(), "Candidate tested");
        Ok(report)
    }
}

/// Marker the driver prints once the harness has returned.
fn completion_marker(scratch: &Path) -> String {
    let nonce = scratch
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}:{}", COMPLETION_MARKER, nonce)
}

/// Map the driver's exit status and output to a report.
///
/// A clean exit only counts as a pass when `marker` appears on its own line
/// of stdout.
pub fn interpret_output(
    candidate: &str,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
    marker: &str,
) -> TestReport {
    if exit_code == Some(0) {
        if stdout.lines().any(|line| line.trim() == marker) {
            return TestReport::Passed;
        }
        return TestReport::Detailed {
            candidate: candidate.to_string(),
            detail: "Traceback (most recent call last):\nSystemExit: the process exited before the test finished".to_string(),
        };
    }

    let stderr = stderr.trim();
    let detail = if stderr.is_empty() { stdout.trim() } else { stderr };
    if detail.is_empty() {
        return TestReport::Failed;
    }

    TestReport::Detailed {
        candidate: candidate.to_string(),
        detail: tail(detail, MAX_DETAIL_BYTES),
    }
}

/// Keep the end of a transcript, where the exception line is.
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let head_budget = max / 4;
    let mut start = text.len() - (max - head_budget);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("{}\n...\n{}", truncate(text, head_budget), &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Library;

    const CONTEXT: &str = r#"
exec_context = r"""
a = 2
[insert]
"""

def test_execution(solution: str):
    code = exec_context.replace("[insert]", solution)
    env = {}
    exec(code, env)
    assert env["result"] == 4, f"executed {env['result']!r}, expected 4"
"#;

    fn python_available() -> bool {
        std::process::Command::new(DEFAULT_PYTHON)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn problem() -> Problem {
        Problem {
            id: "Numpy_000".to_string(),
            library: Library::Numpy,
            index: 0,
            prompt: "Square a.".to_string(),
            code_context: CONTEXT.to_string(),
            reference_code: Some("result = a * a".to_string()),
        }
    }

    const MARKER: &str = "self-debug-complete:candidate-abc";

    #[test]
    fn test_interpret_pass() {
        let stdout = format!("noise\n{}\n", MARKER);
        assert_eq!(
            interpret_output("x", Some(0), &stdout, "warning", MARKER),
            TestReport::Passed
        );
    }

    #[test]
    fn test_interpret_clean_exit_without_marker() {
        match interpret_output("x", Some(0), "noise", "", MARKER) {
            TestReport::Detailed { detail, .. } => {
                assert!(detail.starts_with("Traceback (most recent call last):"));
                assert!(detail.contains("SystemExit"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_interpret_silent_failure() {
        assert_eq!(interpret_output("x", Some(1), "", "  \n", MARKER), TestReport::Failed);
        assert_eq!(interpret_output("x", None, "", "", MARKER), TestReport::Failed);
    }

    #[test]
    fn test_completion_marker_is_per_directory() {
        let a = completion_marker(Path::new("/tmp/candidate-a1"));
        let b = completion_marker(Path::new("/tmp/candidate-b2"));
        assert_ne!(a, b);
        assert!(a.starts_with(COMPLETION_MARKER));
    }

    #[test]
    fn test_interpret_traceback() {
        let report = interpret_output(
            "x",
            Some(1),
            "",
            "Traceback (most recent call last):\nNameError: name 'b' is not defined\n",
            MARKER,
        );
        match report {
            TestReport::Detailed { candidate, detail } => {
                assert_eq!(candidate, "x");
                assert!(detail.ends_with("NameError: name 'b' is not defined"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_tail_keeps_exception_line() {
        let long = format!("Traceback\n{}\nValueError: boom", "frame\n".repeat(2000));
        let cut = tail(&long, 400);
        assert!(cut.len() < long.len());
        assert!(cut.starts_with("Traceback"));
        assert!(cut.ends_with("ValueError: boom"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_failure() {
        let tester = PythonTester::new("/nonexistent/python", Duration::from_secs(5));
        let result = tester.test(&problem(), "result = a * a").await;
        assert!(matches!(result, Err(TesterError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_python_pass_mismatch_and_error() {
        if !python_available() {
            return;
        }
        let tester = PythonTester::default();

        let passed = tester.test(&problem(), "result = a * a").await.unwrap();
        assert_eq!(passed, TestReport::Passed);

        match tester.test(&problem(), "result = a + 1").await.unwrap() {
            TestReport::Detailed { detail, .. } => {
                assert!(detail.starts_with("Executed result does not match the expected result"));
                assert!(detail.contains("executed 3, expected 4"));
            }
            other => panic!("unexpected report: {:?}", other),
        }

        match tester.test(&problem(), "result = b").await.unwrap() {
            TestReport::Detailed { detail, .. } => {
                assert!(detail.contains("Traceback"));
                assert!(detail.contains("NameError"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_python_early_exit_is_not_a_pass() {
        if !python_available() {
            return;
        }
        let tester = PythonTester::default();

        match tester.test(&problem(), "import sys\nsys.exit(0)").await.unwrap() {
            TestReport::Detailed { detail, .. } => {
                assert!(detail.contains("Traceback"));
                assert!(detail.contains("SystemExit"));
            }
            other => panic!("unexpected report: {:?}", other),
        }

        match tester.test(&problem(), "import os\nos._exit(0)").await.unwrap() {
            TestReport::Detailed { detail, .. } => assert!(detail.contains("SystemExit")),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_python_timeout() {
        if !python_available() {
            return;
        }
        let tester = PythonTester::new(DEFAULT_PYTHON, Duration::from_millis(500));
        let report = tester
            .test(&problem(), "import time\ntime.sleep(30)\nresult = 4")
            .await
            .unwrap();

        match report {
            TestReport::Detailed { detail, .. } => {
                assert!(detail.starts_with("Traceback (most recent call last):"));
                assert!(detail.contains("TimeoutError"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }
}
