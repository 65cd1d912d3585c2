//! Prompts for solving a problem and for correcting a failed candidate.
//!
//! The solve prompt always carries the problem text and the insertion
//! template. When feedback from a previous attempt is present, exactly one
//! elaboration block is appended:
//! - runtime failure: the previous code plus the error transcript
//! - result mismatch: the previous code plus the executed-vs-expected detail
//!
//! Rendering is deterministic; identical inputs produce identical text.

use serde::Serialize;
use tera::{Context, Tera};

use crate::correction::feedback::{Feedback, Outcome};
use crate::error::PromptError;
use crate::llm::Message;

/// System prompt for the solving and correcting calls.
pub const SOLVE_SYSTEM_PROMPT: &str = "You are a helpful Self-debugging assistant that can understand and solve programming problems. You have the ability to analyze and execute code, providing feedback and suggestions to help users debug and improve their code. By leveraging your knowledge and expertise, you can assist users in solving complex programming problems and guide them towards writing correct and efficient code. Your goal is to empower users to become better programmers by providing them with valuable insights and assistance throughout their coding journey.";

/// System prompt for the chain-of-thought suggestion call.
pub const SUGGESTION_SYSTEM_PROMPT: &str = "You are a helpful Chain-of-Thought generator that can understand the reasoning behind programming problems and provide step-by-step guidance to solve them.";

/// Opening sentence of the runtime failure block.
pub const RUNTIME_FAILURE_MARKER: &str = "However, the code has an error.";

/// Opening sentence of the result mismatch block.
pub const RESULT_MISMATCH_MARKER: &str =
    "The code executed successfully but failed the test case.";

const SOLVE_TEMPLATE: &str = r#"Given the problem description with the code, you need to fulfill the task by writing the code that solves the problem.

The problem is: {{ problem }}.

Your solution will be evaluated by replacing the code inside the block
```
# SOLUTION START
[insert]
# SOLUTION END
```
with your code as follows:
```python
{{ code_context }}
```
{% if suggestions %}
To support you in solving the problem, here are the suggestions from the Stack Overflow post comments:
{{ suggestions }}
{% endif %}
Make sure your code is correct and complete to solve the problem.
{% if feedback_kind == "runtime_failure" %}
In the previous attempt, you generated the following code inside the block # SOLUTION START and # SOLUTION END:
```
{{ previous_code }}
```
However, the code has an error. The error message is:
```
{{ feedback_detail }}
```
Please analyze the error message and fix the code accordingly.
{% elif feedback_kind == "result_mismatch" %}
In the previous attempt, you generated the following code inside the block # SOLUTION START and # SOLUTION END:
```
{{ previous_code }}
```
The code executed successfully but failed the test case. Please analyze the difference between the executed result and the expected result to fix the code accordingly. The deviation from the expected result is:
```
{{ feedback_detail }}
```
{% endif %}"#;

const SUGGESTION_TEMPLATE: &str = r#"Given the problem description with the code, and Stack Overflow posts, you need to learn from the comments to generate step-by-step suggestions that help another agent to solve the problem.

The given problem is: {{ problem }}.

The Stack Overflow posts with supportive comments are:
{% for post in posts %}
--- Post {{ loop.index }} ---
{{ post }}
{% endfor %}
Please generate a series of suggestions that help another agent to solve the problem step-by-step.
Here are some suggestions:
- Suggestion 1: [...]
- Suggestion 2: [...]
- Suggestion 3: [...]
- Final suggestion: [...]"#;

/// A rendered system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedPrompt {
    /// System prompt establishing the assistant's role.
    pub system: String,
    /// User prompt with the task.
    pub user: String,
}

impl ComposedPrompt {
    /// Convert into chat messages.
    pub fn into_messages(self) -> Vec<Message> {
        vec![Message::system(self.system), Message::user(self.user)]
    }
}

/// Compose the solve prompt for a problem.
///
/// `template` is the problem's insertion template. `suggestions` is the
/// output of the chain-of-thought call, if one was made.
///
/// # Example
///
/// ```
/// use self_debug::correction::feedback::{Feedback, Outcome};
/// use self_debug::prompts::compose;
///
/// let feedback = Feedback::new(
///     "result = df.sum(axis=2)",
///     Outcome::RuntimeFailure { detail: "Traceback ...\nValueError: No axis named 2".into() },
/// );
/// let prompt = compose("Sum each row.", "[insert]", feedback.as_ref(), None).unwrap();
/// assert!(prompt.user.contains("result = df.sum(axis=2)"));
/// assert!(prompt.user.contains("However, the code has an error."));
/// ```
pub fn compose(
    problem: &str,
    template: &str,
    feedback: Option<&Feedback>,
    suggestions: Option<&str>,
) -> Result<ComposedPrompt, PromptError> {
    let mut context = Context::new();
    context.insert("problem", problem);
    context.insert("code_context", template);
    context.insert("suggestions", suggestions.unwrap_or_default());

    let (kind, previous_code, detail) = match feedback.map(|f| (f.code(), f.outcome())) {
        Some((code, Outcome::RuntimeFailure { detail })) => {
            ("runtime_failure", code, detail.as_str())
        }
        Some((code, Outcome::ResultMismatch { detail })) => {
            ("result_mismatch", code, detail.as_str())
        }
        Some((_, Outcome::Pass | Outcome::Indeterminate { .. })) | None => ("", "", ""),
    };
    context.insert("feedback_kind", kind);
    context.insert("previous_code", previous_code);
    context.insert("feedback_detail", detail);

    let user = Tera::one_off(SOLVE_TEMPLATE, &context, false)?;

    Ok(ComposedPrompt {
        system: SOLVE_SYSTEM_PROMPT.to_string(),
        user,
    })
}

/// Compose the chain-of-thought suggestion prompt from retrieved posts.
pub fn compose_suggestions(
    problem: &str,
    posts: &[String],
) -> Result<ComposedPrompt, PromptError> {
    let mut context = Context::new();
    context.insert("problem", problem);
    context.insert("posts", posts);

    let user = Tera::one_off(SUGGESTION_TEMPLATE, &context, false)?;

    Ok(ComposedPrompt {
        system: SUGGESTION_SYSTEM_PROMPT.to_string(),
        user,
    })
}
