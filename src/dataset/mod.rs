//! DS-1000 benchmark problems.
//!
//! The dataset is a JSON-lines file with one problem per line:
//!
//! ```json
//! {"prompt": "...", "code_context": "...", "reference_code": "...",
//!  "metadata": {"library": "Pandas", "problem_id": 0}}
//! ```
//!
//! Problems are grouped by library in file order and identified as
//! `{Library}_{index:03}` (e.g. `Pandas_007`), where `index` is the position
//! of the problem within its library.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::DatasetError;

/// Library category of a DS-1000 problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Library {
    Pandas,
    Numpy,
    Tensorflow,
    Scipy,
    Sklearn,
    Pytorch,
    Matplotlib,
}

impl Library {
    /// All libraries in batch order.
    pub const ALL: [Library; 7] = [
        Library::Pandas,
        Library::Numpy,
        Library::Tensorflow,
        Library::Scipy,
        Library::Sklearn,
        Library::Pytorch,
        Library::Matplotlib,
    ];

    /// Display name, also used as the problem identifier prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Library::Pandas => "Pandas",
            Library::Numpy => "Numpy",
            Library::Tensorflow => "Tensorflow",
            Library::Scipy => "Scipy",
            Library::Sklearn => "Sklearn",
            Library::Pytorch => "Pytorch",
            Library::Matplotlib => "Matplotlib",
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Library {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Library::ALL
            .iter()
            .copied()
            .find(|lib| lib.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DatasetError::UnknownLibrary(s.to_string()))
    }
}

/// One benchmark problem. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Identifier of the form `{Library}_{index:03}`.
    pub id: String,
    /// Library category.
    pub library: Library,
    /// Position within the library.
    pub index: usize,
    /// Natural-language task description.
    pub prompt: String,
    /// Insertion template containing the `[insert]` marker and test harness.
    pub code_context: String,
    /// Reference solution, when the dataset ships one.
    pub reference_code: Option<String>,
}

impl Problem {
    /// Build the identifier for a problem.
    pub fn make_id(library: Library, index: usize) -> String {
        format!("{}_{:03}", library.as_str(), index)
    }
}

#[derive(Debug, Deserialize)]
struct RawProblem {
    prompt: String,
    code_context: String,
    #[serde(default)]
    reference_code: Option<String>,
    metadata: RawMetadata,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    library: String,
}

/// Problems grouped by library.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    problems: HashMap<Library, Vec<Problem>>,
}

impl Dataset {
    /// Load a dataset from a JSON-lines file.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        if !path.exists() {
            return Err(DatasetError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let dataset = Self::from_jsonl(&content)?;
        tracing::info!(
            path = %path.display(),
            problems = dataset.len(),
            "Loaded DS-1000 dataset"
        );
        Ok(dataset)
    }

    /// Parse a dataset from JSON-lines text. Blank lines are ignored.
    pub fn from_jsonl(content: &str) -> Result<Self, DatasetError> {
        let mut problems: HashMap<Library, Vec<Problem>> = HashMap::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let raw: RawProblem =
                serde_json::from_str(line).map_err(|e| DatasetError::Malformed {
                    line: line_no + 1,
                    message: e.to_string(),
                })?;
            let library: Library = raw.metadata.library.parse()?;

            let bucket = problems.entry(library).or_default();
            let index = bucket.len();
            bucket.push(Problem {
                id: Problem::make_id(library, index),
                library,
                index,
                prompt: raw.prompt,
                code_context: raw.code_context,
                reference_code: raw.reference_code,
            });
        }

        Ok(Self { problems })
    }

    /// Problems of one library, in file order.
    pub fn problems(&self, library: Library) -> &[Problem] {
        self.problems
            .get(&library)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Look up a problem by identifier.
    pub fn get(&self, id: &str) -> Option<&Problem> {
        let (library, index) = id.rsplit_once('_')?;
        let library: Library = library.parse().ok()?;
        let index: usize = index.parse().ok()?;
        self.problems(library).get(index)
    }

    /// Total number of problems.
    pub fn len(&self) -> usize {
        self.problems.values().map(Vec::len).sum()
    }

    /// Whether the dataset has no problems.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
