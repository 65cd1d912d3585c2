//! Stack Overflow data dump extraction.
//!
//! Streams `Posts.xml` and `Comments.xml` from a Stack Exchange data dump and
//! keeps only the threads relevant to the benchmark libraries. Each kept row
//! is written as its own JSON file so later stages can load threads without
//! re-reading the multi-gigabyte dump.
//!
//! Layout under the data root:
//!
//! ```text
//! posts/{Id}.json
//! posts_metadata.jsonl
//! comments/{Id}_{PostId}.json
//! comments_metadata.jsonl
//! index.jsonl
//! rendered_posts/{PostId}_{i}.txt
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::CollectorError;

/// Tags whose posts are kept.
pub const DEFAULT_TAGS: [&str; 8] = [
    "matplotlib",
    "pandas",
    "numpy",
    "scipy",
    "seaborn",
    "sklearn",
    "tensorflow",
    "pytorch",
];

/// Progress is logged every this many kept posts.
const POSTS_LOG_INTERVAL: u64 = 1_000;

/// Progress is logged every this many kept comments.
const COMMENTS_LOG_INTERVAL: u64 = 10_000;

/// File locations of the extracted Stack Overflow data.
#[derive(Debug, Clone)]
pub struct StackOverflowPaths {
    root: PathBuf,
}

impl StackOverflowPaths {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn posts_dir(&self) -> PathBuf {
        self.root.join("posts")
    }

    pub fn comments_dir(&self) -> PathBuf {
        self.root.join("comments")
    }

    pub fn posts_metadata(&self) -> PathBuf {
        self.root.join("posts_metadata.jsonl")
    }

    pub fn comments_metadata(&self) -> PathBuf {
        self.root.join("comments_metadata.jsonl")
    }

    pub fn index(&self) -> PathBuf {
        self.root.join("index.jsonl")
    }

    pub fn rendered_dir(&self) -> PathBuf {
        self.root.join("rendered_posts")
    }

    pub fn post_file(&self, post_id: u64) -> PathBuf {
        self.posts_dir().join(format!("{}.json", post_id))
    }

    pub fn comment_file(&self, comment_id: u64, post_id: u64) -> PathBuf {
        self.comments_dir()
            .join(format!("{}_{}.json", comment_id, post_id))
    }
}

/// Metadata line for a kept post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    pub id: u64,
    pub tags: String,
    pub created_at: String,
}

/// Metadata line for a kept comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentMetadata {
    pub id: u64,
    pub post_id: u64,
    pub created_at: String,
}

/// One row of the post/comment join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub post_id: u64,
    pub tags: String,
    pub comment_id: u64,
    pub created_at: String,
}

/// Counters reported by an extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Rows kept.
    pub kept: u64,
    /// Kept rows whose JSON file was newly written.
    pub written: u64,
    /// Rows skipped because they were malformed.
    pub skipped: u64,
}

/// Streams a Stack Overflow dump into per-row JSON files.
pub struct StackOverflowExtractor {
    paths: StackOverflowPaths,
    tags: Vec<String>,
}

impl StackOverflowExtractor {
    /// Create an extractor writing under `paths` and keeping the default tags.
    pub fn new(paths: StackOverflowPaths) -> Self {
        Self {
            paths,
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Replace the kept tag list.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Extract posts, then the comments belonging to them.
    pub fn extract(
        &self,
        posts_xml: &Path,
        comments_xml: &Path,
    ) -> Result<(ExtractStats, ExtractStats), CollectorError> {
        let post_stats = self.extract_posts(posts_xml)?;
        let post_ids: HashSet<u64> = read_jsonl::<PostMetadata>(&self.paths.posts_metadata())?
            .into_iter()
            .map(|p| p.id)
            .collect();
        let comment_stats = self.extract_comments(comments_xml, &post_ids)?;
        Ok((post_stats, comment_stats))
    }

    /// Keep posts whose `Tags` mention any configured tag.
    pub fn extract_posts(&self, posts_xml: &Path) -> Result<ExtractStats, CollectorError> {
        fs::create_dir_all(self.paths.posts_dir())?;
        let mut metadata = BufWriter::new(File::create(self.paths.posts_metadata())?);
        let mut stats = ExtractStats::default();
        let mut malformed = 0;

        for_each_row(posts_xml, &mut malformed, |row| {
            let post_tags = row.get("Tags").map(String::as_str).unwrap_or_default();
            if !self.tags.iter().any(|tag| post_tags.contains(tag.as_str())) {
                return Ok(());
            }
            let Some(id) = parse_id(row, "Id") else {
                stats.skipped += 1;
                tracing::warn!("Skipping post row without a numeric Id");
                return Ok(());
            };

            stats.kept += 1;
            let entry = PostMetadata {
                id,
                tags: post_tags.to_string(),
                created_at: row.get("CreationDate").cloned().unwrap_or_default(),
            };
            serde_json::to_writer(&mut metadata, &entry)?;
            metadata.write_all(b"\n")?;

            if write_row_if_absent(&self.paths.post_file(id), row)? {
                stats.written += 1;
            }
            if stats.kept % POSTS_LOG_INTERVAL == 0 {
                tracing::info!(posts = stats.kept, "Extracting posts");
            }
            Ok(())
        })?;
        stats.skipped += malformed;

        metadata.flush()?;
        tracing::info!(
            kept = stats.kept,
            written = stats.written,
            skipped = stats.skipped,
            "Post extraction completed"
        );
        Ok(stats)
    }

    /// Keep comments whose `PostId` is one of `post_ids`.
    pub fn extract_comments(
        &self,
        comments_xml: &Path,
        post_ids: &HashSet<u64>,
    ) -> Result<ExtractStats, CollectorError> {
        fs::create_dir_all(self.paths.comments_dir())?;
        let mut metadata = BufWriter::new(File::create(self.paths.comments_metadata())?);
        let mut stats = ExtractStats::default();
        let mut malformed = 0;

        for_each_row(comments_xml, &mut malformed, |row| {
            let Some(post_id) = parse_id(row, "PostId") else {
                stats.skipped += 1;
                tracing::warn!("Skipping comment row without a numeric PostId");
                return Ok(());
            };
            if !post_ids.contains(&post_id) {
                return Ok(());
            }
            let Some(id) = parse_id(row, "Id") else {
                stats.skipped += 1;
                tracing::warn!(post_id, "Skipping comment row without a numeric Id");
                return Ok(());
            };

            stats.kept += 1;
            let entry = CommentMetadata {
                id,
                post_id,
                created_at: row.get("CreationDate").cloned().unwrap_or_default(),
            };
            serde_json::to_writer(&mut metadata, &entry)?;
            metadata.write_all(b"\n")?;

            if write_row_if_absent(&self.paths.comment_file(id, post_id), row)? {
                stats.written += 1;
            }
            if stats.kept % COMMENTS_LOG_INTERVAL == 0 {
                tracing::info!(comments = stats.kept, "Extracting comments");
            }
            Ok(())
        })?;
        stats.skipped += malformed;

        metadata.flush()?;
        tracing::info!(
            kept = stats.kept,
            written = stats.written,
            skipped = stats.skipped,
            "Comment extraction completed"
        );
        Ok(stats)
    }
}

/// Build the post/comment index, or load it if it was already built.
///
/// The index is the inner join of post and comment metadata on the post id,
/// sorted by post, comment, and creation time.
pub fn load_or_build_index(paths: &StackOverflowPaths) -> Result<Vec<IndexEntry>, CollectorError> {
    let index_path = paths.index();
    if index_path.exists() {
        return read_jsonl(&index_path);
    }

    let posts = read_jsonl::<PostMetadata>(&paths.posts_metadata())?;
    let comments = read_jsonl::<CommentMetadata>(&paths.comments_metadata())?;
    let index = build_index(&posts, &comments);

    let mut writer = BufWriter::new(File::create(&index_path)?);
    for entry in &index {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    tracing::info!(entries = index.len(), path = %index_path.display(), "Index built");
    Ok(index)
}

/// Join comments onto their posts.
pub fn build_index(posts: &[PostMetadata], comments: &[CommentMetadata]) -> Vec<IndexEntry> {
    let tags_by_post: HashMap<u64, &str> =
        posts.iter().map(|p| (p.id, p.tags.as_str())).collect();

    let mut index: Vec<IndexEntry> = comments
        .iter()
        .filter_map(|c| {
            tags_by_post.get(&c.post_id).map(|tags| IndexEntry {
                post_id: c.post_id,
                tags: tags.to_string(),
                comment_id: c.id,
                created_at: c.created_at.clone(),
            })
        })
        .collect();

    index.sort_by(|a, b| {
        (a.post_id, a.comment_id, &a.created_at).cmp(&(b.post_id, b.comment_id, &b.created_at))
    });
    index
}

/// Read a JSON-lines file. A missing file reads as empty.
pub fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, CollectorError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        items.push(serde_json::from_str(&line)?);
    }
    Ok(items)
}

/// Stream every `<row>` element of a dump file through `visit`.
///
/// Rows whose attributes cannot be decoded are counted in `skipped`.
fn for_each_row<F>(path: &Path, skipped: &mut u64, mut visit: F) -> Result<(), CollectorError>
where
    F: FnMut(&BTreeMap<String, String>) -> Result<(), CollectorError>,
{
    if !path.exists() {
        return Err(CollectorError::MissingDump(path.display().to_string()));
    }

    let mut reader = Reader::from_file(path)?;
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(element) | Event::Start(element) if element.name().as_ref() == b"row" => {
                match row_attributes(&element) {
                    Ok(row) => visit(&row)?,
                    Err(reason) => {
                        *skipped += 1;
                        tracing::warn!(
                            position = reader.buffer_position(),
                            reason = %reason,
                            "Skipping malformed row"
                        );
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn row_attributes(element: &BytesStart<'_>) -> Result<BTreeMap<String, String>, String> {
    let mut row = BTreeMap::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| e.to_string())?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|e| e.to_string())?
            .to_string();
        let value = attribute.unescape_value().map_err(|e| e.to_string())?;
        row.insert(key, value.into_owned());
    }
    Ok(row)
}

fn parse_id(row: &BTreeMap<String, String>, key: &str) -> Option<u64> {
    row.get(key).and_then(|v| v.trim().parse().ok())
}

fn write_row_if_absent(path: &Path, row: &BTreeMap<String, String>) -> Result<bool, CollectorError> {
    if path.exists() {
        return Ok(false);
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, row)?;
    Ok(true)
}
