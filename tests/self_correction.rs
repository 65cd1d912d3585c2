//! End-to-end scenarios for the self-correction loop with scripted
//! generation and test collaborators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use self_debug::correction::{
    AttemptResult, CodeGenerator, CorrectionReport, Feedback, GeneratorConfig, LoopConfig,
    Outcome, SelfCorrectionLoop, Strategy, TestReport, Termination, Verdict,
    PLACEHOLDER_CANDIDATE,
};
use self_debug::dataset::{Library, Problem};
use self_debug::execution::Tester;
use self_debug::llm::{
    Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};
use self_debug::prompts::{compose, RESULT_MISMATCH_MARKER, RUNTIME_FAILURE_MARKER};
use self_debug::validation::{SyntaxCheck, SyntaxValidator};
use self_debug::{LlmError, TesterError, ValidationError};

/// Replies with scripted completions and records every request.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn fenced(codes: &[&str]) -> Arc<Self> {
        Self::new(
            codes
                .iter()
                .map(|code| Ok(format!("Here you go:\n```python\n{}\n```", code)))
                .collect(),
        )
    }

    fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("```python\nresult = None\n```".to_string()))?;
        Ok(GenerationResponse {
            id: "scripted".to_string(),
            model: "scripted".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(reply),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

/// Returns scripted reports and records every tested candidate.
struct ScriptedTester {
    reports: Mutex<VecDeque<TestReport>>,
    tested: Mutex<Vec<String>>,
}

impl ScriptedTester {
    fn new(reports: Vec<TestReport>) -> Arc<Self> {
        Arc::new(Self {
            reports: Mutex::new(reports.into()),
            tested: Mutex::new(Vec::new()),
        })
    }

    fn tested(&self) -> Vec<String> {
        self.tested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tester for ScriptedTester {
    async fn test(&self, _problem: &Problem, candidate: &str) -> Result<TestReport, TesterError> {
        self.tested.lock().unwrap().push(candidate.to_string());
        Ok(self
            .reports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TestReport::Failed))
    }
}

/// Accepts every candidate, keeping these scenarios independent of a local
/// interpreter.
struct AcceptAll;

#[async_trait]
impl SyntaxValidator for AcceptAll {
    async fn validate(&self, _code: &str) -> Result<SyntaxCheck, ValidationError> {
        Ok(SyntaxCheck::Success)
    }
}

fn generator(llm: Arc<ScriptedLlm>) -> Arc<CodeGenerator> {
    Arc::new(CodeGenerator::new(llm, GeneratorConfig::default()).with_validator(Arc::new(AcceptAll)))
}

fn problem() -> Problem {
    Problem {
        id: "Pandas_003".to_string(),
        library: Library::Pandas,
        index: 3,
        prompt: "Sum the column `a` of df into result.".to_string(),
        code_context: "import pandas as pd\n[insert]\nprint(result)".to_string(),
        reference_code: None,
    }
}

fn mismatch() -> TestReport {
    TestReport::Detailed {
        candidate: String::new(),
        detail: "Executed result does not match the expected result: 3 != 6".to_string(),
    }
}

fn runtime_error() -> TestReport {
    TestReport::Detailed {
        candidate: String::new(),
        detail: "Traceback (most recent call last):\nKeyError: 'a'".to_string(),
    }
}

async fn run(llm: Arc<ScriptedLlm>, tester: Arc<ScriptedTester>, budget: u32) -> CorrectionReport {
    let correction = SelfCorrectionLoop::new(
        generator(llm),
        tester,
        LoopConfig {
            budget,
            initial_strategy: Strategy::ZeroShot,
            correction_strategy: Strategy::ZeroShot,
        },
    );
    correction.run(&problem()).await.expect("loop should finish")
}

#[tokio::test]
async fn test_first_attempt_passes() {
    let llm = ScriptedLlm::fenced(&["result = df['a'].sum()"]);
    let tester = ScriptedTester::new(vec![TestReport::Passed]);

    let report = run(llm.clone(), tester.clone(), 5).await;

    assert_eq!(report.termination, Termination::Passed);
    assert_eq!(report.verdict(), Verdict::Correct);
    assert_eq!(report.generations(), 1);
    assert_eq!(llm.prompts().len(), 1);
    assert_eq!(tester.tested(), vec!["result = df['a'].sum()".to_string()]);
}

#[tokio::test]
async fn test_budget_bounds_attempts() {
    let llm = ScriptedLlm::fenced(&[]);
    let tester = ScriptedTester::new(vec![mismatch(); 10]);

    let report = run(llm.clone(), tester.clone(), 3).await;

    assert_eq!(report.termination, Termination::Exhausted);
    assert_eq!(report.verdict(), Verdict::Incorrect);
    assert_eq!(report.generations(), 4);
    assert_eq!(llm.prompts().len(), 4);
    assert_eq!(tester.tested().len(), 4);
    let indices: Vec<u32> = report.attempts.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_runtime_then_mismatch_then_pass() {
    let llm = ScriptedLlm::fenced(&["result = df.a", "result = df['a']", "result = df['a'].sum()"]);
    let tester = ScriptedTester::new(vec![runtime_error(), mismatch(), TestReport::Passed]);

    let report = run(llm.clone(), tester, 2).await;

    assert_eq!(report.generations(), 3);
    assert_eq!(report.verdict(), Verdict::Correct);
    assert_eq!(report.final_candidate(), Some("result = df['a'].sum()"));
    assert_eq!(report.initial_candidate(), Some("result = df.a"));

    let prompts = llm.prompts();
    assert!(!prompts[0].contains(RUNTIME_FAILURE_MARKER));
    assert!(!prompts[0].contains(RESULT_MISMATCH_MARKER));

    assert!(prompts[1].contains(RUNTIME_FAILURE_MARKER));
    assert!(prompts[1].contains("KeyError: 'a'"));
    assert!(prompts[1].contains("result = df.a"));
    assert!(!prompts[1].contains(RESULT_MISMATCH_MARKER));

    assert!(prompts[2].contains(RESULT_MISMATCH_MARKER));
    assert!(prompts[2].contains("3 != 6"));
    assert!(!prompts[2].contains(RUNTIME_FAILURE_MARKER));
}

#[tokio::test]
async fn test_untyped_failure_is_mismatch_without_detail() {
    let llm = ScriptedLlm::fenced(&["result = 0", "result = 6"]);
    let tester = ScriptedTester::new(vec![TestReport::Failed, TestReport::Passed]);

    let report = run(llm.clone(), tester, 1).await;

    assert_eq!(
        report.attempts[0].result,
        AttemptResult::Tested {
            outcome: Outcome::ResultMismatch {
                detail: String::new()
            }
        }
    );
    assert!(llm.prompts()[1].contains(RESULT_MISMATCH_MARKER));
    assert_eq!(report.verdict(), Verdict::Correct);
}

#[tokio::test]
async fn test_response_without_code_block_is_recorded() {
    let llm = ScriptedLlm::new(vec![
        Ok("I think you should sum the column.".to_string()),
        Ok("```python\nresult = df['a'].sum()\n```".to_string()),
    ]);
    let tester = ScriptedTester::new(vec![TestReport::Passed]);

    let report = run(llm, tester.clone(), 2).await;

    assert!(matches!(
        report.attempts[0].result,
        AttemptResult::Unusable { .. }
    ));
    assert_eq!(report.attempts[0].candidate, None);
    assert_eq!(tester.tested().len(), 1);
    assert_eq!(report.verdict(), Verdict::Correct);
}

#[tokio::test]
async fn test_no_code_block_with_no_budget_is_unrecoverable() {
    let llm = ScriptedLlm::new(vec![Ok("no code here".to_string())]);
    let tester = ScriptedTester::new(vec![]);

    let report = run(llm, tester.clone(), 0).await;

    assert!(matches!(
        report.termination,
        Termination::Unrecoverable { .. }
    ));
    assert!(tester.tested().is_empty());
    assert_eq!(report.final_candidate(), None);
}

#[tokio::test]
async fn test_content_filter_tests_placeholder() {
    let llm = ScriptedLlm::new(vec![Err(LlmError::ContentFiltered(
        "content management policy".to_string(),
    ))]);
    let tester = ScriptedTester::new(vec![TestReport::Failed]);

    let report = run(llm, tester.clone(), 0).await;

    assert_eq!(tester.tested(), vec![PLACEHOLDER_CANDIDATE.to_string()]);
    assert!(report.attempts[0].placeholder);
    assert_eq!(report.termination, Termination::Exhausted);
}

#[tokio::test]
async fn test_context_length_rejection_tests_placeholder() {
    let llm = ScriptedLlm::new(vec![
        Err(LlmError::ApiError {
            code: 400,
            message: "This model's maximum context length is 4096 tokens.".to_string(),
        }),
        Ok("```python\nresult = df['a'].sum()\n```".to_string()),
    ]);
    let tester = ScriptedTester::new(vec![TestReport::Failed, TestReport::Passed]);

    let report = run(llm, tester.clone(), 1).await;

    assert!(report.attempts[0].placeholder);
    assert_eq!(report.attempts[0].candidate.as_deref(), Some(PLACEHOLDER_CANDIDATE));
    assert_eq!(
        tester.tested(),
        vec![
            PLACEHOLDER_CANDIDATE.to_string(),
            "result = df['a'].sum()".to_string()
        ]
    );
    assert_eq!(report.verdict(), Verdict::Correct);
}

#[tokio::test]
async fn test_indeterminate_report_stops_without_retry() {
    let llm = ScriptedLlm::fenced(&["result = 1"]);
    let tester = ScriptedTester::new(vec![TestReport::Detailed {
        candidate: String::new(),
        detail: "something odd happened".to_string(),
    }]);

    let report = run(llm.clone(), tester, 5).await;

    assert_eq!(report.generations(), 1);
    assert_eq!(llm.prompts().len(), 1);
    assert!(matches!(
        report.termination,
        Termination::Unrecoverable { .. }
    ));
}

#[tokio::test]
async fn test_non_transient_llm_error_aborts() {
    let llm = ScriptedLlm::new(vec![Err(LlmError::MissingApiKey)]);
    let tester = ScriptedTester::new(vec![]);
    let correction = SelfCorrectionLoop::new(generator(llm), tester, LoopConfig::default());

    assert!(correction.run(&problem()).await.is_err());
}

#[test]
fn test_composer_selects_runtime_block() {
    let feedback = Feedback::new(
        "result = df.a",
        Outcome::RuntimeFailure {
            detail: "Traceback (most recent call last):\nAttributeError".to_string(),
        },
    )
    .expect("runtime failure is retryable");
    let p = problem();

    let first = compose(&p.prompt, &p.code_context, Some(&feedback), None).unwrap();
    let second = compose(&p.prompt, &p.code_context, Some(&feedback), None).unwrap();

    assert_eq!(first.user, second.user);
    assert!(first.user.contains(RUNTIME_FAILURE_MARKER));
    assert!(!first.user.contains(RESULT_MISMATCH_MARKER));
    assert!(first.user.contains("[insert]"));
}
