//! Typed decoders for positional call results.
//!
//! Payloads are untyped nested arrays. Each decoder documents the positions
//! it reads and fails with a [`ShapeError`] naming the exact path when the
//! payload does not match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ShapeError;
use crate::shape::Cursor;

/// Title used when the server sends none.
pub const UNTITLED: &str = "Untitled";

const ROOT: &str = "result";

// ============================================================================
// Notebook List
// ============================================================================

/// Who owns a notebook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// Owned by the signed-in account.
    #[default]
    Mine,
    /// Shared with the signed-in account.
    SharedWithMe,
}

impl Ownership {
    fn from_code(cursor: &Cursor<'_>) -> Result<Self, ShapeError> {
        match cursor.i64()? {
            1 => Ok(Self::Mine),
            2 => Ok(Self::SharedWithMe),
            _ => Err(ShapeError::new(
                cursor.path(),
                "ownership 1 or 2",
                cursor.value(),
            )),
        }
    }
}

/// A source listed inside a notebook entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source id.
    pub id: String,
    /// Source title.
    pub title: String,
}

impl SourceRef {
    /// `[[source_id], title, ...]`
    fn decode(entry: &Cursor<'_>) -> Result<Self, ShapeError> {
        let id = entry.at(0)?.at(0)?.str()?.to_string();
        let title = match entry.get(1) {
            Some(title) => title.str()?.to_string(),
            None => UNTITLED.to_string(),
        };
        Ok(Self { id, title })
    }
}

/// One entry of `list_notebooks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookSummary {
    /// Notebook id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Emoji shown next to the title.
    pub emoji: Option<String>,
    /// Sources in the notebook.
    pub sources: Vec<SourceRef>,
    /// Who owns it.
    pub ownership: Ownership,
    /// Shared with others.
    pub is_shared: bool,
    /// Last modification time.
    pub modified_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl NotebookSummary {
    /// Decodes the `list_notebooks` result.
    ///
    /// `result[0][i]` is `[title, sources, id, emoji, null, metadata]` where
    /// `metadata[0]` is the ownership code, `metadata[1]` the shared flag and
    /// `metadata[5]`/`metadata[8]` are `[seconds, nanos]` for modified and
    /// created. Missing metadata means an owned, private notebook.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] for the first entry that does not match.
    pub fn decode_list(result: &Value) -> Result<Vec<Self>, ShapeError> {
        let root = Cursor::root(result, ROOT);
        let Some(list) = root.get(0) else {
            return Ok(Vec::new());
        };

        let notebooks = list
            .items()?
            .iter()
            .map(Self::decode_entry)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = notebooks.len(), "Decoded notebook list");
        Ok(notebooks)
    }

    fn decode_entry(entry: &Cursor<'_>) -> Result<Self, ShapeError> {
        let title = match entry.at(0)?.opt_str()? {
            Some(title) => title.to_string(),
            None => UNTITLED.to_string(),
        };
        let sources = entry
            .at(1)?
            .items_or_empty()?
            .iter()
            .map(SourceRef::decode)
            .collect::<Result<Vec<_>, _>>()?;
        let id = entry.at(2)?.str()?.to_string();
        let emoji = match entry.get(3) {
            Some(emoji) => Some(emoji.str()?.to_string()),
            None => None,
        };

        let mut summary = Self {
            id,
            title,
            emoji,
            sources,
            ownership: Ownership::Mine,
            is_shared: false,
            modified_at: None,
            created_at: None,
        };

        if let Some(metadata) = entry.get(5) {
            metadata.items()?;
            if let Some(code) = metadata.get(0) {
                summary.ownership = Ownership::from_code(&code)?;
            }
            summary.is_shared = metadata
                .get(1)
                .is_some_and(|flag| flag.value().as_bool().unwrap_or(false));
            summary.modified_at = metadata.get(5).map(|t| timestamp(&t)).transpose()?;
            summary.created_at = metadata.get(8).map(|t| timestamp(&t)).transpose()?;
        }

        Ok(summary)
    }

    /// Number of sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// `[seconds, nanos]`. Nanos may be absent.
fn timestamp(cursor: &Cursor<'_>) -> Result<DateTime<Utc>, ShapeError> {
    let seconds = cursor.at(0)?.i64()?;
    let nanos = match cursor.get(1) {
        Some(nanos) => u32::try_from(nanos.i64()?)
            .map_err(|_| ShapeError::new(nanos.path(), "nanoseconds", nanos.value()))?,
        None => 0,
    };
    DateTime::from_timestamp(seconds, nanos)
        .ok_or_else(|| ShapeError::new(cursor.path(), "timestamp in range", cursor.value()))
}

// ============================================================================
// Notebook Details
// ============================================================================

/// Source ids of a notebook from the `get_notebook` result.
///
/// Reads `result[0][1][i][0][0]`. A notebook without sources has `null` or an
/// empty list at `result[0][1]`.
///
/// # Errors
///
/// Returns a [`ShapeError`] if the notebook entry or a source id is malformed.
pub fn notebook_source_ids(result: &Value) -> Result<Vec<String>, ShapeError> {
    let root = Cursor::root(result, ROOT);
    let notebook = root.at(0)?;
    let Some(sources) = notebook.get(1) else {
        return Ok(Vec::new());
    };

    sources
        .items()?
        .iter()
        .map(|source| -> Result<String, ShapeError> {
            Ok(source.at(0)?.at(0)?.str()?.to_string())
        })
        .collect()
}

/// Id of a new notebook from the `create_notebook` result, at `result[2]`.
///
/// # Errors
///
/// Returns a [`ShapeError`] if `result[2]` is not a non-empty string.
pub fn created_notebook_id(result: &Value) -> Result<String, ShapeError> {
    let id = Cursor::root(result, ROOT).at(2)?;
    match id.str()? {
        "" => Err(ShapeError::new(id.path(), "non-empty id", id.value())),
        value => Ok(value.to_string()),
    }
}

// ============================================================================
// Notebook Description
// ============================================================================

/// A suggested question for a notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedTopic {
    /// Question shown to the user.
    pub question: String,
    /// Prompt sent when the question is picked.
    pub prompt: String,
}

/// Generated summary and suggested topics from `get_summary`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookDescription {
    /// Generated summary.
    pub summary: String,
    /// Suggested questions.
    pub suggested_topics: Vec<SuggestedTopic>,
}

impl NotebookDescription {
    /// Decodes the `get_summary` result.
    ///
    /// `result[0][0]` is the summary and `result[1][0][i]` is
    /// `[question, prompt]`. Topics are optional.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] if the summary or a topic is malformed.
    pub fn decode(result: &Value) -> Result<Self, ShapeError> {
        let root = Cursor::root(result, ROOT);
        let summary = root.at(0)?.at(0)?.str()?.to_string();

        let topics = match root.get(1).and_then(|t| t.get(0)) {
            Some(list) => list
                .items()?
                .iter()
                .map(|topic| -> Result<SuggestedTopic, ShapeError> {
                    Ok(SuggestedTopic {
                        question: topic.at(0)?.str()?.to_string(),
                        prompt: topic.at(1)?.str()?.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            summary,
            suggested_topics: topics,
        })
    }
}

// ============================================================================
// Source Guide
// ============================================================================

/// Generated summary and keywords from `get_source_guide`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGuide {
    /// Generated summary.
    pub summary: String,
    /// Keyword chips.
    pub keywords: Vec<String>,
}

impl SourceGuide {
    /// Decodes the `get_source_guide` result.
    ///
    /// The guide sits at `result[0][0]`: `[1][0]` is the summary and `[2][0]`
    /// the keyword list. Both are optional.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] if a present field has the wrong type.
    pub fn decode(result: &Value) -> Result<Self, ShapeError> {
        let guide = Cursor::root(result, ROOT).at(0)?.at(0)?;

        let summary = match guide.get(1).and_then(|s| s.get(0)) {
            Some(summary) => summary.str()?.to_string(),
            None => String::new(),
        };
        let keywords = match guide.get(2).and_then(|k| k.get(0)) {
            Some(list) => list
                .items()?
                .iter()
                .map(|k| k.str().map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self { summary, keywords })
    }
}

// ============================================================================
// Tests
// ============================================================================
