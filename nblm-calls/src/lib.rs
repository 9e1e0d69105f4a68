// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # nblm Calls
//!
//! What the client knows about individual NotebookLM calls.
//!
//! - [`registry`] - Every known call id with its name, class and timeout
//! - [`args`] - Argument builders for calls with a known layout
//! - [`shape`] - Argument shapes and a path-tracking payload cursor
//! - [`decode`] - Typed decoders for positional results
//! - [`query`] - Streamed query requests and answer merging
//! - [`notebooks`] - Typed notebook calls over an [`nblm_fetch::RpcClient`]
//!
//! ## Usage
//!
//! ```ignore
//! use nblm_calls::{Notebooks, QueryRequest};
//!
//! let notebooks = Notebooks::new(&client);
//! for notebook in notebooks.list().await? {
//!     println!("{} ({} sources)", notebook.title, notebook.source_count());
//! }
//!
//! let answer = notebooks
//!     .ask(QueryRequest::new("nb-1", "What is attention?", Vec::new()))
//!     .await?;
//! println!("{}", answer.text());
//! ```

pub mod args;
pub mod decode;
pub mod error;
pub mod notebooks;
pub mod query;
pub mod registry;
pub mod shape;

// Re-export key types at crate root
pub use decode::{
    NotebookDescription, NotebookSummary, Ownership, SourceGuide, SourceRef, SuggestedTopic,
    created_notebook_id, notebook_source_ids,
};
pub use error::ShapeError;
pub use notebooks::Notebooks;
pub use query::{AnswerKind, Conversation, ConversationTurn, QueryAnswer, QueryRequest};
pub use registry::{CallClass, CallDescriptor, CallRegistry, SourcePath, TimeoutClass};
pub use shape::{ArgShape, Cursor};
