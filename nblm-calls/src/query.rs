//! Streamed notebook queries.
//!
//! A query goes to the streaming endpoint rather than batchexecute. The
//! server sends many frames per answer, each carrying the text so far and a
//! kind marker telling a final answer from an intermediate thinking step.

use futures::{Stream, StreamExt};
use nblm_core::RpcValue;
use nblm_fetch::{CallOptions, ResultItem, RpcClient, RpcError};
use nblm_store::ClientSettings;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::shape::ArgShape;

/// Name used in logs and errors for queries.
pub const QUERY_CALL_NAME: &str = "query";

/// Texts this short or shorter are status chatter, not answer content.
pub const MIN_ANSWER_CHARS: usize = 20;

/// History role of a user message.
const ROLE_USER: i32 = 1;
/// History role of a model answer.
const ROLE_MODEL: i32 = 2;

/// Kind marker of a final answer chunk.
const KIND_ANSWER: i64 = 1;

// ============================================================================
// Conversation
// ============================================================================

/// One completed question and answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// The question.
    pub query: String,
    /// The answer.
    pub answer: String,
}

/// A conversation with a notebook.
///
/// Follow-up queries resend the whole history, oldest turn first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id.
    pub id: String,
    /// Completed turns, oldest first.
    pub turns: Vec<ConversationTurn>,
}

impl Conversation {
    /// Starts a conversation with a random id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Resumes a conversation with a known id and no local history.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
        }
    }

    /// Records a completed turn. Empty answers are not recorded.
    pub fn record(&mut self, query: impl Into<String>, answer: impl Into<String>) {
        let answer = answer.into();
        if answer.is_empty() {
            return;
        }
        self.turns.push(ConversationTurn {
            query: query.into(),
            answer,
        });
    }

    /// Number of completed turns.
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Builds the next request in this conversation.
    pub fn request(
        &self,
        notebook_id: impl Into<String>,
        query: impl Into<String>,
        source_ids: Vec<String>,
    ) -> QueryRequest {
        QueryRequest {
            notebook_id: notebook_id.into(),
            query: query.into(),
            source_ids,
            conversation_id: self.id.clone(),
            history: self.turns.clone(),
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Query Request
// ============================================================================

/// Arguments of one streamed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Notebook being asked.
    pub notebook_id: String,
    /// Question text.
    pub query: String,
    /// Sources to ground the answer in.
    pub source_ids: Vec<String>,
    /// Conversation id.
    pub conversation_id: String,
    /// Earlier turns, oldest first. Empty for a new conversation.
    pub history: Vec<ConversationTurn>,
}

impl QueryRequest {
    /// A first question in a new conversation.
    pub fn new(
        notebook_id: impl Into<String>,
        query: impl Into<String>,
        source_ids: Vec<String>,
    ) -> Self {
        Conversation::new().request(notebook_id, query, source_ids)
    }

    /// Returns true if earlier turns are sent along.
    pub fn is_follow_up(&self) -> bool {
        !self.history.is_empty()
    }

    /// `[sources, query, history|null, [2, null, [1]], conversation_id]`
    ///
    /// Sources are `[[sid]]` each. History entries are `[answer, null, 2]`
    /// then `[query, null, 1]` per turn.
    pub fn args(&self) -> Vec<RpcValue> {
        let sources = RpcValue::seq(
            self.source_ids
                .iter()
                .map(|sid| RpcValue::seq([RpcValue::seq([sid.as_str()])])),
        );
        let history = if self.history.is_empty() {
            RpcValue::Null
        } else {
            RpcValue::seq(self.history.iter().flat_map(|turn| {
                [
                    RpcValue::seq([turn.answer.as_str().into(), RpcValue::Null, ROLE_MODEL.into()]),
                    RpcValue::seq([turn.query.as_str().into(), RpcValue::Null, ROLE_USER.into()]),
                ]
            }))
        };
        let mode = RpcValue::seq([2.into(), RpcValue::Null, RpcValue::seq([1])]);

        vec![
            sources,
            self.query.as_str().into(),
            history,
            mode,
            self.conversation_id.as_str().into(),
        ]
    }

    /// Declared layout of [`QueryRequest::args`].
    pub fn shape() -> ArgShape {
        let source = ArgShape::tuple([ArgShape::tuple([ArgShape::Str])]);
        let message = ArgShape::tuple([ArgShape::Str, ArgShape::Null, ArgShape::Int]);
        ArgShape::tuple([
            ArgShape::list_of(source),
            ArgShape::Str,
            ArgShape::nullable(ArgShape::list_of(message)),
            ArgShape::literal(json!([2, null, [1]])),
            ArgShape::Str,
        ])
    }

    /// Options for this query: the query timeout and the notebook's path.
    pub fn options(&self, settings: &ClientSettings) -> CallOptions {
        CallOptions::new()
            .named(QUERY_CALL_NAME)
            .with_timeout(settings.timeouts.query())
            .with_source_path(format!("/notebook/{}", self.notebook_id))
    }
}

// ============================================================================
// Query Answer
// ============================================================================

/// What kind of text an answer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// A final answer.
    Answer,
    /// Only thinking steps arrived.
    Thinking,
    /// Nothing usable arrived.
    Empty,
}

/// Answer merged from streamed frames.
///
/// The longest final answer wins. Without one, the longest thinking text is
/// used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryAnswer {
    answer: String,
    thinking: String,
}

impl QueryAnswer {
    /// Merges a complete list of frames.
    pub fn from_frames(frames: &[Value]) -> Self {
        let mut answer = Self::default();
        for frame in frames {
            answer.push_frame(frame);
        }
        answer
    }

    /// Merges one frame.
    pub fn push_frame(&mut self, frame: &Value) {
        for item in nblm_fetch::codec::result_items(std::slice::from_ref(frame)) {
            if let Some((text, kind)) = chunk_text(&item) {
                let slot = match kind {
                    AnswerKind::Answer => &mut self.answer,
                    _ => &mut self.thinking,
                };
                if text.chars().count() > slot.chars().count() {
                    *slot = text.to_string();
                }
            }
        }
    }

    /// The merged text.
    pub fn text(&self) -> &str {
        if self.answer.is_empty() {
            &self.thinking
        } else {
            &self.answer
        }
    }

    /// What [`QueryAnswer::text`] holds.
    pub fn kind(&self) -> AnswerKind {
        if !self.answer.is_empty() {
            AnswerKind::Answer
        } else if !self.thinking.is_empty() {
            AnswerKind::Thinking
        } else {
            AnswerKind::Empty
        }
    }

    /// Returns true if nothing usable arrived.
    pub fn is_empty(&self) -> bool {
        self.kind() == AnswerKind::Empty
    }

    /// Consumes the answer, returning the merged text.
    pub fn into_text(self) -> String {
        if self.answer.is_empty() {
            self.thinking
        } else {
            self.answer
        }
    }
}

/// Text and kind of one result item.
///
/// The payload is `[[text, null, [...], null, [..., kind]], ...]`. A bare
/// string at `payload[0]` counts as thinking.
fn chunk_text(item: &ResultItem) -> Option<(&str, AnswerKind)> {
    let first = item.payload.as_ref()?.as_array()?.first()?;

    let (text, kind) = match first {
        Value::String(text) => (text.as_str(), AnswerKind::Thinking),
        Value::Array(fields) => {
            let text = fields.first()?.as_str()?;
            let is_answer = fields
                .get(4)
                .and_then(Value::as_array)
                .and_then(|marker| marker.last())
                .and_then(Value::as_i64)
                == Some(KIND_ANSWER);
            let kind = if is_answer {
                AnswerKind::Answer
            } else {
                AnswerKind::Thinking
            };
            (text, kind)
        }
        _ => return None,
    };

    (text.chars().count() > MIN_ANSWER_CHARS).then_some((text, kind))
}

/// Drains a frame stream into an answer.
///
/// # Errors
///
/// Returns the first error the stream yields.
pub async fn collect_answer<S>(frames: S) -> Result<QueryAnswer, RpcError>
where
    S: Stream<Item = Result<Value, RpcError>>,
{
    let mut frames = std::pin::pin!(frames);
    let mut answer = QueryAnswer::default();
    while let Some(frame) = frames.next().await {
        answer.push_frame(&frame?);
    }
    Ok(answer)
}

/// Sends a query and waits for the merged answer.
///
/// # Errors
///
/// Returns an error if the request fails or the stream breaks.
#[instrument(skip(client, request), fields(notebook = %request.notebook_id, follow_up = request.is_follow_up()))]
pub async fn ask(client: &RpcClient, request: &QueryRequest) -> Result<QueryAnswer, RpcError> {
    let frames = client
        .stream_query(&request.args(), &request.options(client.settings()))
        .await?;
    let answer = collect_answer(frames).await?;
    debug!(kind = ?answer.kind(), chars = answer.text().len(), "Query answered");
    Ok(answer)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frame(text: &str, kind: i64) -> Value {
        let payload = json!([[text, null, [], null, [[], null, null, null, kind]]]).to_string();
        json!([["wrb.fr", null, payload]])
    }

    const LONG_ANSWER: &str = "Attention lets every token look at every other token.";
    const SHORT_ANSWER: &str = "Attention lets tokens look around.";
    const THINKING: &str = "Reading the sources about transformers...";

    #[test]
    fn test_new_request_args() {
        let request = QueryRequest::new("nb-1", "What is attention?", vec!["s1".into(), "s2".into()]);
        assert!(!request.is_follow_up());
        assert!(Uuid::parse_str(&request.conversation_id).is_ok());

        let wire = RpcValue::encode_args(&request.args()).unwrap();
        assert_eq!(
            wire,
            format!(
                r#"[[[["s1"]],[["s2"]]],"What is attention?",null,[2,null,[1]],"{}"]"#,
                request.conversation_id
            )
        );
        QueryRequest::shape().validate_args(&request.args()).unwrap();
    }

    #[test]
    fn test_follow_up_sends_history_oldest_first() {
        let mut conversation = Conversation::with_id("conv-1");
        conversation.record("q1", "a1");
        conversation.record("q2", "a2");
        conversation.record("q3", "");
        assert_eq!(conversation.turn_count(), 2);

        let request = conversation.request("nb-1", "q3", vec![]);
        assert!(request.is_follow_up());

        let wire = RpcValue::encode_args(&request.args()).unwrap();
        assert_eq!(
            wire,
            r#"[[],"q3",[["a1",null,2],["q1",null,1],["a2",null,2],["q2",null,1]],[2,null,[1]],"conv-1"]"#
        );
        QueryRequest::shape().validate_args(&request.args()).unwrap();
    }

    #[test]
    fn test_options_use_query_timeout() {
        let settings = ClientSettings::default();
        let options = QueryRequest::new("nb-1", "q", vec![]).options(&settings);
        assert_eq!(options.timeout, Some(settings.timeouts.query()));
        assert_eq!(options.source_path, "/notebook/nb-1");
        assert!(options.idempotent);
    }

    #[test]
    fn test_longest_answer_wins() {
        let frames = [
            frame(THINKING, 2),
            frame(SHORT_ANSWER, 1),
            frame(LONG_ANSWER, 1),
            frame(SHORT_ANSWER, 1),
        ];
        let answer = QueryAnswer::from_frames(&frames);
        assert_eq!(answer.kind(), AnswerKind::Answer);
        assert_eq!(answer.text(), LONG_ANSWER);
    }

    #[test]
    fn test_thinking_is_fallback() {
        let answer = QueryAnswer::from_frames(&[frame(THINKING, 2)]);
        assert_eq!(answer.kind(), AnswerKind::Thinking);
        assert_eq!(answer.into_text(), THINKING);
    }

    #[test]
    fn test_ignores_short_and_foreign_items() {
        let frames = [
            frame("ok", 1),
            json!([["di", 42], ["af.httprm", 41, "-1", 3]]),
            json!([["wrb.fr", null, "not json"]]),
        ];
        let answer = QueryAnswer::from_frames(&frames);
        assert!(answer.is_empty());
        assert_eq!(answer.text(), "");
    }

    #[test]
    fn test_bare_string_payload_counts_as_thinking() {
        let payload = json!([THINKING]).to_string();
        let answer = QueryAnswer::from_frames(&[json!([["wrb.fr", null, payload]])]);
        assert_eq!(answer.kind(), AnswerKind::Thinking);
    }

    #[tokio::test]
    async fn test_collect_answer_stops_at_error() {
        let frames = stream::iter(vec![
            Ok(frame(LONG_ANSWER, 1)),
            Err(RpcError::Framing("truncated".to_string())),
        ]);
        let err = collect_answer(frames).await.unwrap_err();
        assert!(matches!(err, RpcError::Framing(_)));

        let frames = stream::iter(vec![Ok(frame(THINKING, 2)), Ok(frame(LONG_ANSWER, 1))]);
        let answer = collect_answer(frames).await.unwrap();
        assert_eq!(answer.text(), LONG_ANSWER);
    }
}
