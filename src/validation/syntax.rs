//! Syntax validation for generated Python candidates.
//!
//! A candidate is valid iff CPython's `compile()` accepts it. The check runs
//! the configured interpreter on a short script that compiles the source read
//! from stdin; the candidate itself is never executed. Compile-time errors
//! that a grammar alone does not catch (`return` outside a function, a
//! positional argument after a keyword argument, invalid `del` targets) are
//! rejected the same way the interpreter would reject them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ValidationError;
use crate::execution::DEFAULT_PYTHON;
use crate::utils::truncate;

/// Default limit for one syntax check.
pub const DEFAULT_SYNTAX_TIMEOUT_SECS: u64 = 30;

const COMPILE_CHECK: &str = r#"import sys
source = sys.stdin.buffer.read()
try:
    compile(source, "<candidate>", "exec", dont_inherit=True)
except SyntaxError as e:
    print("syntax-error", e.lineno or 0, sep="\t")
    print(e.msg)
    sys.exit(1)
except ValueError as e:
    print("syntax-error", 0, sep="\t")
    print(e)
    sys.exit(1)
print("ok")
"#;

/// Result of a syntax check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyntaxCheck {
    /// The source compiled.
    Success,
    /// The source failed to compile.
    Error {
        /// 1-based line of the syntax error, 0 when the interpreter gave none.
        line: usize,
        /// Interpreter's description of the error.
        message: String,
    },
}

impl SyntaxCheck {
    /// Returns true if the source compiled.
    pub fn is_success(&self) -> bool {
        matches!(self, SyntaxCheck::Success)
    }
}

/// Decides whether a candidate is syntactically valid Python.
#[async_trait]
pub trait SyntaxValidator: Send + Sync {
    /// Check `code` without executing it. A rejected candidate is `Ok`; `Err`
    /// means the check could not be completed.
    async fn validate(&self, code: &str) -> Result<SyntaxCheck, ValidationError>;
}

/// Validator backed by the interpreter's own compiler.
#[derive(Debug, Clone)]
pub struct PythonSyntaxValidator {
    interpreter: String,
    timeout: Duration,
}

impl Default for PythonSyntaxValidator {
    fn default() -> Self {
        Self::new(DEFAULT_PYTHON)
    }
}

impl PythonSyntaxValidator {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: Duration::from_secs(DEFAULT_SYNTAX_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

#[async_trait]
impl SyntaxValidator for PythonSyntaxValidator {
    async fn validate(&self, code: &str) -> Result<SyntaxCheck, ValidationError> {
        let mut child = Command::new(&self.interpreter)
            .arg("-I")
            .arg("-c")
            .arg(COMPILE_CHECK)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ValidationError::SpawnFailed {
                interpreter: self.interpreter.clone(),
                reason: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ValidationError::TimedOut(self.timeout.as_secs()))??;

        parse_check_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Map the compile script's stdout to a check result.
fn parse_check_output(stdout: &str, stderr: &str) -> Result<SyntaxCheck, ValidationError> {
    let mut lines = stdout.lines();
    match lines.next().map(str::trim) {
        Some("ok") => Ok(SyntaxCheck::Success),
        Some(first) if first.starts_with("syntax-error") => {
            let line = first
                .split('\t')
                .nth(1)
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(0);
            let message = lines.collect::<Vec<_>>().join("\n").trim().to_string();
            Ok(SyntaxCheck::Error {
                line,
                message: if message.is_empty() {
                    "invalid syntax".to_string()
                } else {
                    message
                },
            })
        }
        _ => Err(ValidationError::UnexpectedOutput(truncate(stderr.trim(), 500))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_available() -> bool {
        std::process::Command::new(DEFAULT_PYTHON)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn check(code: &str) -> SyntaxCheck {
        PythonSyntaxValidator::default()
            .validate(code)
            .await
            .expect("syntax check should run")
    }

    async fn error_line(code: &str) -> usize {
        match check(code).await {
            SyntaxCheck::Error { line, message } => {
                assert!(!message.is_empty());
                line
            }
            SyntaxCheck::Success => panic!("expected a syntax error for {:?}", code),
        }
    }

    #[test]
    fn test_parse_success_output() {
        assert_eq!(parse_check_output("ok\n", "").unwrap(), SyntaxCheck::Success);
    }

    #[test]
    fn test_parse_error_output() {
        let check = parse_check_output("syntax-error\t2\nunmatched ')'\n", "").unwrap();
        assert_eq!(
            check,
            SyntaxCheck::Error {
                line: 2,
                message: "unmatched ')'".to_string()
            }
        );
    }

    #[test]
    fn test_parse_crashed_output() {
        let result = parse_check_output("", "Traceback (most recent call last):\nMemoryError");
        assert!(matches!(result, Err(ValidationError::UnexpectedOutput(_))));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let validator = PythonSyntaxValidator::new("/nonexistent/python");
        let err = validator.validate("result = 1").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_valid_code() {
        if !python_available() {
            return;
        }
        assert!(check("import numpy as np\nresult = np.arange(10).reshape(2, 5)\n")
            .await
            .is_success());
        assert!(check("").await.is_success());

        let blocks = r#"
def f(df):
    for col in df.columns:
        if col.startswith("a"):
            df[col] = df[col] * 2
    return df

result = f(df)
"#;
        assert!(check(blocks).await.is_success());
    }

    #[tokio::test]
    async fn test_grammar_errors_report_line() {
        if !python_available() {
            return;
        }
        assert_eq!(error_line("a = 1\nb = 2)\nc = 3\n").await, 2);
        assert_eq!(error_line("a = 1\nb = 2\nc = (3 +").await, 3);
        assert_eq!(error_line("a + 1 = 2").await, 1);
    }

    #[tokio::test]
    async fn test_compile_time_errors_are_rejected() {
        if !python_available() {
            return;
        }
        assert_eq!(error_line("print \"hello\"").await, 1);
        assert_eq!(error_line("f(a=1, 2)").await, 1);
        assert_eq!(error_line("return 1").await, 1);
        assert_eq!(error_line("del f()").await, 1);
    }

    #[tokio::test]
    async fn test_does_not_execute() {
        if !python_available() {
            return;
        }
        assert!(check("raise RuntimeError('boom')\n").await.is_success());
        assert!(check("import sys\nsys.exit(3)\n").await.is_success());
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_string(&SyntaxCheck::Success).unwrap();
        assert_eq!(json, r#"{"status":"success"}"#);

        let err = SyntaxCheck::Error {
            line: 4,
            message: "invalid syntax".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains(r#""line":4"#));
    }
}
