//! Rendering Stack Overflow threads into retrieval documents.
//!
//! A thread is a post body plus its comments. Long threads are split into
//! overlapping windows: a window starts at every `step`-th comment and packs
//! the following comments greedily while the post plus comments stays within
//! `max_tokens` (cl100k tokens). Threads with fewer than `min_comments`
//! comments, or whose post alone exceeds the token limit, are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tiktoken_rs::CoreBPE;

use crate::collectors::stack_overflow::{IndexEntry, StackOverflowPaths};
use crate::error::RetrievalError;
use crate::retrieval::store::PendingDocument;

/// Windowing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderConfig {
    /// Threads with fewer comments are skipped.
    pub min_comments: usize,
    /// Token ceiling for one rendered document.
    pub max_tokens: usize,
    /// Distance between window starts, in comments.
    pub step: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            min_comments: 10,
            max_tokens: 3000,
            step: 5,
        }
    }
}

/// cl100k token counter.
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    /// Load the cl100k_base tokenizer.
    pub fn new() -> Result<Self, RetrievalError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| RetrievalError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }

    /// Count tokens in the given text.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Render one thread into zero or more documents.
pub fn render_thread<F>(post: &str, comments: &[String], config: &RenderConfig, count: F) -> Vec<String>
where
    F: Fn(&str) -> usize,
{
    if comments.len() < config.min_comments {
        return Vec::new();
    }

    let post_tokens = count(post);
    if post_tokens > config.max_tokens {
        return Vec::new();
    }
    let comment_tokens: Vec<usize> = comments.iter().map(|c| count(c)).collect();

    (0..comments.len())
        .step_by(config.step.max(1))
        .map(|start| {
            let mut total = post_tokens;
            let mut lines = Vec::new();
            for (comment, tokens) in comments[start..].iter().zip(&comment_tokens[start..]) {
                if total + tokens > config.max_tokens {
                    break;
                }
                total += tokens;
                lines.push(format!("- comment: {}", comment));
            }
            format!("Post: {}\n\nComments:\n{}", post, lines.join("\n"))
        })
        .collect()
}

/// Counters reported by a rendering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub threads: usize,
    pub rendered_threads: usize,
    pub documents: usize,
}

/// Renders every indexed thread into `rendered_posts/`.
pub struct ThreadRenderer {
    paths: StackOverflowPaths,
    config: RenderConfig,
    counter: TokenCounter,
}

impl ThreadRenderer {
    pub fn new(paths: StackOverflowPaths, config: RenderConfig) -> Result<Self, RetrievalError> {
        Ok(Self {
            paths,
            config,
            counter: TokenCounter::new()?,
        })
    }

    /// Render all threads listed in `index`.
    pub fn render_all(&self, index: &[IndexEntry]) -> Result<RenderStats, RetrievalError> {
        let out_dir = self.paths.rendered_dir();
        fs::create_dir_all(&out_dir)?;

        let mut threads: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for entry in index {
            threads.entry(entry.post_id).or_default().push(entry.comment_id);
        }

        let mut stats = RenderStats {
            threads: threads.len(),
            ..Default::default()
        };

        for (post_id, comment_ids) in &threads {
            let post = read_field(&self.paths.post_file(*post_id), "Body")?;
            let comments = comment_ids
                .iter()
                .map(|comment_id| read_field(&self.paths.comment_file(*comment_id, *post_id), "Text"))
                .collect::<Result<Vec<_>, _>>()?;

            let documents = render_thread(&post, &comments, &self.config, |text| {
                self.counter.count(text)
            });
            if documents.is_empty() {
                continue;
            }

            stats.rendered_threads += 1;
            for (i, document) in documents.iter().enumerate() {
                fs::write(out_dir.join(format!("{}_{}.txt", post_id, i)), document)?;
            }
            stats.documents += documents.len();
        }

        tracing::info!(
            threads = stats.threads,
            rendered = stats.rendered_threads,
            documents = stats.documents,
            "Rendering completed"
        );
        Ok(stats)
    }
}

/// Load rendered `.txt` documents from `dir`, ordered by file name.
///
/// The file name is kept as the document source.
pub fn load_rendered(dir: &Path) -> Result<Vec<PendingDocument>, RetrievalError> {
    let mut documents = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt")
        {
            continue;
        }
        documents.push(PendingDocument {
            source: Some(entry.file_name().to_string_lossy().into_owned()),
            content: fs::read_to_string(path)?,
        });
    }
    Ok(documents)
}

/// Read one string attribute from an extracted row. Missing fields read as
/// empty.
fn read_field(path: &Path, field: &str) -> Result<String, RetrievalError> {
    let row: BTreeMap<String, String> = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(row.get(field).cloned().unwrap_or_default())
}
