//! Per-library accuracy over recorded verdicts.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::correction::Verdict;
use crate::dataset::Library;

/// Accuracy for one library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LibraryAccuracy {
    pub library: String,
    pub correct: usize,
    pub total: usize,
}

impl LibraryAccuracy {
    /// Accuracy in percent; 0 when nothing was attempted.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 * 100.0 / self.total as f64
        }
    }
}

/// Serialized with the derived `accuracy` percentage alongside the counts.
impl Serialize for LibraryAccuracy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_struct("LibraryAccuracy", 4)?;
        row.serialize_field("library", &self.library)?;
        row.serialize_field("correct", &self.correct)?;
        row.serialize_field("total", &self.total)?;
        row.serialize_field("accuracy", &self.percent())?;
        row.end()
    }
}

impl fmt::Display for LibraryAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.2}%", self.library, self.percent())
    }
}

/// Aggregate verdicts by the library prefix of their problem identifier.
///
/// Known libraries come first in batch order; anything else follows
/// alphabetically.
pub fn accuracy_by_library(verdicts: &[(String, Verdict)]) -> Vec<LibraryAccuracy> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (id, verdict) in verdicts {
        let library = id.split('_').next().unwrap_or(id);
        let entry = counts.entry(library).or_default();
        entry.1 += 1;
        if *verdict == Verdict::Correct {
            entry.0 += 1;
        }
    }

    let mut names: Vec<&str> = counts.keys().copied().collect();
    names.sort_by_key(|name| {
        let rank = Library::ALL
            .iter()
            .position(|lib| lib.as_str() == *name)
            .unwrap_or(Library::ALL.len());
        (rank, name.to_string())
    });

    names
        .into_iter()
        .map(|name| {
            let (correct, total) = counts[name];
            LibraryAccuracy {
                library: name.to_string(),
                correct,
                total,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str, verdict: Verdict) -> (String, Verdict) {
        (id.to_string(), verdict)
    }

    #[test]
    fn test_accuracy_by_library() {
        let verdicts = vec![
            v("Numpy_000", Verdict::Correct),
            v("Pandas_000", Verdict::Correct),
            v("Pandas_001", Verdict::Incorrect),
            v("Pandas_002", Verdict::Incorrect),
            v("Custom_000", Verdict::Correct),
        ];

        let rows = accuracy_by_library(&verdicts);
        let lines: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            lines,
            vec!["Pandas: 33.33%", "Numpy: 100.00%", "Custom: 100.00%"]
        );
    }

    #[test]
    fn test_empty_total_is_zero_percent() {
        let row = LibraryAccuracy {
            library: "Scipy".to_string(),
            correct: 0,
            total: 0,
        };
        assert_eq!(row.to_string(), "Scipy: 0.00%");
    }

    #[test]
    fn test_serialized_row_carries_percentage() {
        let row = LibraryAccuracy {
            library: "Pandas".to_string(),
            correct: 1,
            total: 4,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "library": "Pandas",
                "correct": 1,
                "total": 4,
                "accuracy": 25.0
            })
        );
    }
}
