//! Typed notebook calls over an [`RpcClient`].
//!
//! Each method looks up its descriptor, builds the arguments, sends the call
//! with the descriptor's options and decodes the payload.

use nblm_core::RpcValue;
use nblm_fetch::{RpcClient, RpcError};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::args;
use crate::decode::{
    NotebookDescription, NotebookSummary, SourceGuide, created_notebook_id, notebook_source_ids,
};
use crate::query::{self, QueryAnswer, QueryRequest};
use crate::registry::{CallRegistry, ids};

/// Notebook calls bound to a client.
#[derive(Clone, Copy)]
pub struct Notebooks<'a> {
    client: &'a RpcClient,
}

impl<'a> Notebooks<'a> {
    /// Binds to `client`.
    pub fn new(client: &'a RpcClient) -> Self {
        Self { client }
    }

    async fn invoke(
        &self,
        call_id: &str,
        call_args: &[RpcValue],
        notebook_id: Option<&str>,
        confirmed: bool,
    ) -> Result<Value, RpcError> {
        let descriptor = CallRegistry::get(call_id)
            .ok_or_else(|| RpcError::Encoding(format!("unknown call {call_id}")))?;
        let mut options = descriptor.options_for(self.client.settings(), notebook_id);
        if confirmed {
            options = options.confirmed();
        }

        debug!(call = descriptor.name, "Invoking");
        let response = self.client.call(call_id, call_args, &options).await?;
        Ok(response.into_payload())
    }

    /// Lists every notebook visible to the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the payload does not decode.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<NotebookSummary>, RpcError> {
        let payload = self
            .invoke(ids::LIST_NOTEBOOKS, &args::list_notebooks(), None, false)
            .await?;
        Ok(NotebookSummary::decode_list(&payload)?)
    }

    /// Source ids of a notebook.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the payload does not decode.
    #[instrument(skip(self))]
    pub async fn source_ids(&self, notebook_id: &str) -> Result<Vec<String>, RpcError> {
        let payload = self
            .invoke(
                ids::GET_NOTEBOOK,
                &args::get_notebook(notebook_id),
                Some(notebook_id),
                false,
            )
            .await?;
        Ok(notebook_source_ids(&payload)?)
    }

    /// Creates a notebook and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or no id comes back.
    #[instrument(skip(self))]
    pub async fn create(&self, title: &str) -> Result<String, RpcError> {
        let payload = self
            .invoke(ids::CREATE_NOTEBOOK, &args::create_notebook(title), None, false)
            .await?;
        Ok(created_notebook_id(&payload)?)
    }

    /// Renames a notebook.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    #[instrument(skip(self))]
    pub async fn rename(&self, notebook_id: &str, title: &str) -> Result<(), RpcError> {
        self.invoke(
            ids::RENAME_NOTEBOOK,
            &args::rename_notebook(notebook_id, title),
            Some(notebook_id),
            false,
        )
        .await
        .map(|_| ())
    }

    /// Deletes a notebook. Irreversible: without `confirmed` nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::IrreversibleActionNotConfirmed`] without
    /// confirmation, or an error if the call fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, notebook_id: &str, confirmed: bool) -> Result<(), RpcError> {
        self.invoke(
            ids::DELETE_NOTEBOOK,
            &args::delete_notebook(notebook_id),
            None,
            confirmed,
        )
        .await
        .map(|_| ())
    }

    /// Generated summary and suggested topics.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the payload does not decode.
    #[instrument(skip(self))]
    pub async fn describe(&self, notebook_id: &str) -> Result<NotebookDescription, RpcError> {
        let payload = self
            .invoke(
                ids::GET_SUMMARY,
                &args::get_summary(notebook_id),
                Some(notebook_id),
                false,
            )
            .await?;
        Ok(NotebookDescription::decode(&payload)?)
    }

    /// Generated guide for one source.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the payload does not decode.
    #[instrument(skip(self))]
    pub async fn source_guide(&self, source_id: &str) -> Result<SourceGuide, RpcError> {
        let payload = self
            .invoke(
                ids::GET_SOURCE_GUIDE,
                &args::get_source_guide(source_id),
                None,
                false,
            )
            .await?;
        Ok(SourceGuide::decode(&payload)?)
    }

    /// Asks a question. An empty source list grounds the answer in every
    /// source of the notebook.
    ///
    /// # Errors
    ///
    /// Returns an error if looking up sources or the query fails.
    pub async fn ask(&self, mut request: QueryRequest) -> Result<QueryAnswer, RpcError> {
        if request.source_ids.is_empty() {
            request.source_ids = self.source_ids(&request.notebook_id).await?;
        }
        query::ask(self.client, &request).await
    }
}
