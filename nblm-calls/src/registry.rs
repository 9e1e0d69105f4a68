//! Registry of known batchexecute calls.
//!
//! The registry provides static access to every call descriptor and is the
//! central point for turning a call id into [`CallOptions`].

use nblm_core::RpcValue;
use nblm_fetch::CallOptions;
use nblm_store::ClientSettings;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::args;
use crate::error::ShapeError;
use crate::shape::ArgShape;

/// Call ids.
pub mod ids {
    /// `list_notebooks`
    pub const LIST_NOTEBOOKS: &str = "wXbhsf";
    /// `get_notebook`
    pub const GET_NOTEBOOK: &str = "rLM1Ne";
    /// `create_notebook`
    pub const CREATE_NOTEBOOK: &str = "CCqFvf";
    /// `rename_notebook`
    pub const RENAME_NOTEBOOK: &str = "s0tc2d";
    /// `delete_notebook`
    pub const DELETE_NOTEBOOK: &str = "WWINqb";
    /// `add_source`
    pub const ADD_SOURCE: &str = "izAoDd";
    /// `get_source`
    pub const GET_SOURCE: &str = "hizoJc";
    /// `check_freshness`
    pub const CHECK_FRESHNESS: &str = "yR9Yof";
    /// `sync_drive`
    pub const SYNC_DRIVE: &str = "FLmJqe";
    /// `delete_source`
    pub const DELETE_SOURCE: &str = "tGMBJ";
    /// `get_conversations`
    pub const GET_CONVERSATIONS: &str = "hPTbtc";
    /// `preferences`
    pub const PREFERENCES: &str = "hT54vc";
    /// `subscription`
    pub const SUBSCRIPTION: &str = "ozz5Z";
    /// `settings`
    pub const SETTINGS: &str = "ZwVcOc";
    /// `get_summary`
    pub const GET_SUMMARY: &str = "VfAZjd";
    /// `get_source_guide`
    pub const GET_SOURCE_GUIDE: &str = "tr032e";
    /// `start_fast_research`
    pub const START_FAST_RESEARCH: &str = "Ljjv0c";
    /// `start_deep_research`
    pub const START_DEEP_RESEARCH: &str = "QA9ei";
    /// `poll_research`
    pub const POLL_RESEARCH: &str = "e3bVqc";
    /// `import_research`
    pub const IMPORT_RESEARCH: &str = "LBwxtb";
    /// `create_studio`
    pub const CREATE_STUDIO: &str = "R7cb6c";
    /// `poll_studio`
    pub const POLL_STUDIO: &str = "gArtLc";
    /// `delete_studio`
    pub const DELETE_STUDIO: &str = "V5N4be";
    /// `generate_mind_map`
    pub const GENERATE_MIND_MAP: &str = "yyryJe";
    /// `save_mind_map`
    pub const SAVE_MIND_MAP: &str = "CYK0Xb";
    /// `list_mind_maps`
    pub const LIST_MIND_MAPS: &str = "cFji9";
    /// `delete_mind_map`
    pub const DELETE_MIND_MAP: &str = "AH0mwd";
}

// ============================================================================
// Classes
// ============================================================================

/// What repeating a call would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    /// No side effects. Safe to repeat.
    Read,
    /// Changes existing state.
    Mutate,
    /// Creates something. Repeating may create a duplicate.
    Create,
    /// Cannot be undone. Needs explicit confirmation.
    Destructive,
}

impl CallClass {
    /// Returns true if the call may be repeated after an ambiguous failure.
    pub fn is_idempotent(self) -> bool {
        matches!(self, Self::Read)
    }

    /// Returns true if the caller must confirm the call.
    pub fn requires_confirmation(self) -> bool {
        matches!(self, Self::Destructive)
    }
}

/// Which configured timeout applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutClass {
    /// `timeouts.default`
    Default,
    /// `timeouts.long_running`
    LongRunning,
}

/// Default `source-path` of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourcePath {
    /// `/`
    Root,
    /// `/notebook/{id}`
    Notebook,
}

impl SourcePath {
    /// Renders the path. A notebook path without an id falls back to `/`.
    pub fn render(self, notebook_id: Option<&str>) -> String {
        match (self, notebook_id) {
            (Self::Notebook, Some(id)) if !id.is_empty() => format!("/notebook/{id}"),
            _ => "/".to_string(),
        }
    }
}

// ============================================================================
// Call Descriptor
// ============================================================================

/// Static description of one call.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Wire id.
    pub id: &'static str,
    /// Readable name.
    pub name: &'static str,
    /// Idempotency class.
    pub class: CallClass,
    /// Timeout class.
    pub timeout: TimeoutClass,
    /// Default `source-path` form.
    pub source_path: SourcePath,
    /// Argument layout, when known.
    pub shape: Option<ArgShape>,
}

impl CallDescriptor {
    fn new(
        id: &'static str,
        name: &'static str,
        class: CallClass,
        timeout: TimeoutClass,
        source_path: SourcePath,
    ) -> Self {
        Self {
            id,
            name,
            class,
            timeout,
            source_path,
            shape: None,
        }
    }

    fn with_shape(mut self, shape: ArgShape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Resolves the configured timeout for this call.
    pub fn timeout(&self, settings: &ClientSettings) -> Duration {
        match self.timeout {
            TimeoutClass::Default => settings.timeouts.default_timeout(),
            TimeoutClass::LongRunning => settings.timeouts.long_running(),
        }
    }

    /// Builds call options carrying this call's name, class and timeout.
    pub fn options(&self, settings: &ClientSettings) -> CallOptions {
        let mut options = CallOptions::new()
            .named(self.name)
            .with_timeout(self.timeout(settings));
        options = match self.class {
            CallClass::Read => options,
            CallClass::Mutate | CallClass::Create => options.non_idempotent(),
            CallClass::Destructive => options.destructive(),
        };
        options
    }

    /// Like [`CallDescriptor::options`], with the source path rendered for
    /// `notebook_id`.
    pub fn options_for(&self, settings: &ClientSettings, notebook_id: Option<&str>) -> CallOptions {
        self.options(settings)
            .with_source_path(self.source_path.render(notebook_id))
    }

    /// Checks arguments against the declared shape. Calls without a declared
    /// shape accept anything.
    ///
    /// # Errors
    ///
    /// Returns the first position that does not match.
    pub fn check_args(&self, args: &[RpcValue]) -> Result<(), ShapeError> {
        match &self.shape {
            Some(shape) => shape.validate_args(args),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Static Registry
// ============================================================================

/// Static storage for all call descriptors.
static DESCRIPTORS: OnceLock<Vec<CallDescriptor>> = OnceLock::new();

/// Static storage for the name to id mapping.
static NAME_MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();

/// Builds every call descriptor, grouped by what the calls act on.
fn init_descriptors() -> Vec<CallDescriptor> {
    use CallClass::{Create, Destructive, Mutate, Read};
    use SourcePath::{Notebook, Root};
    use TimeoutClass::{Default, LongRunning};

    vec![
        // Notebooks
        CallDescriptor::new(ids::LIST_NOTEBOOKS, "list_notebooks", Read, Default, Root)
            .with_shape(args::list_notebooks_shape()),
        CallDescriptor::new(ids::GET_NOTEBOOK, "get_notebook", Read, Default, Notebook)
            .with_shape(args::get_notebook_shape()),
        CallDescriptor::new(ids::CREATE_NOTEBOOK, "create_notebook", Create, Default, Root)
            .with_shape(args::create_notebook_shape()),
        CallDescriptor::new(ids::RENAME_NOTEBOOK, "rename_notebook", Mutate, Default, Notebook)
            .with_shape(args::rename_notebook_shape()),
        CallDescriptor::new(ids::DELETE_NOTEBOOK, "delete_notebook", Destructive, Default, Root)
            .with_shape(args::delete_notebook_shape()),
        // Sources
        CallDescriptor::new(ids::ADD_SOURCE, "add_source", Create, LongRunning, Notebook),
        CallDescriptor::new(ids::GET_SOURCE, "get_source", Read, Default, Root)
            .with_shape(args::get_source_shape()),
        CallDescriptor::new(ids::CHECK_FRESHNESS, "check_freshness", Read, Default, Root),
        CallDescriptor::new(ids::SYNC_DRIVE, "sync_drive", Mutate, LongRunning, Root),
        CallDescriptor::new(ids::DELETE_SOURCE, "delete_source", Destructive, Default, Root),
        // Account and conversation state
        CallDescriptor::new(ids::GET_CONVERSATIONS, "get_conversations", Read, Default, Notebook),
        CallDescriptor::new(ids::PREFERENCES, "preferences", Read, Default, Root),
        CallDescriptor::new(ids::SUBSCRIPTION, "subscription", Read, Default, Root),
        CallDescriptor::new(ids::SETTINGS, "settings", Read, Default, Root),
        // Generated guides
        CallDescriptor::new(ids::GET_SUMMARY, "get_summary", Read, Default, Notebook)
            .with_shape(args::get_summary_shape()),
        CallDescriptor::new(ids::GET_SOURCE_GUIDE, "get_source_guide", Read, Default, Root)
            .with_shape(args::get_source_guide_shape()),
        // Research
        CallDescriptor::new(ids::START_FAST_RESEARCH, "start_fast_research", Create, Default, Notebook),
        CallDescriptor::new(ids::START_DEEP_RESEARCH, "start_deep_research", Create, Default, Notebook),
        CallDescriptor::new(ids::POLL_RESEARCH, "poll_research", Read, Default, Notebook),
        CallDescriptor::new(ids::IMPORT_RESEARCH, "import_research", Create, LongRunning, Notebook),
        // Studio
        CallDescriptor::new(ids::CREATE_STUDIO, "create_studio", Create, LongRunning, Notebook),
        CallDescriptor::new(ids::POLL_STUDIO, "poll_studio", Read, Default, Notebook),
        CallDescriptor::new(ids::DELETE_STUDIO, "delete_studio", Destructive, Default, Root),
        // Mind maps
        CallDescriptor::new(ids::GENERATE_MIND_MAP, "generate_mind_map", Create, LongRunning, Root),
        CallDescriptor::new(ids::SAVE_MIND_MAP, "save_mind_map", Create, Default, Notebook),
        CallDescriptor::new(ids::LIST_MIND_MAPS, "list_mind_maps", Read, Default, Notebook),
        CallDescriptor::new(ids::DELETE_MIND_MAP, "delete_mind_map", Destructive, Default, Notebook),
    ]
}

fn build_name_map(descriptors: &'static [CallDescriptor]) -> HashMap<&'static str, &'static str> {
    descriptors.iter().map(|d| (d.name, d.id)).collect()
}

// ============================================================================
// Call Registry
// ============================================================================

/// Global registry of call descriptors.
///
/// Initialized lazily on first access.
pub struct CallRegistry;

impl CallRegistry {
    /// Returns all call descriptors.
    pub fn all() -> &'static [CallDescriptor] {
        DESCRIPTORS.get_or_init(init_descriptors)
    }

    /// Gets a descriptor by call id.
    pub fn get(id: &str) -> Option<&'static CallDescriptor> {
        Self::all().iter().find(|d| d.id == id)
    }

    /// Gets a descriptor by readable name.
    pub fn get_by_name(name: &str) -> Option<&'static CallDescriptor> {
        let id = NAME_MAP.get_or_init(|| build_name_map(Self::all())).get(name)?;
        Self::get(id)
    }

    /// Readable name for a call id, falling back to the id itself.
    pub fn name_for(id: &str) -> &str {
        Self::get(id).map_or(id, |d| d.name)
    }

    /// Returns all descriptors of a class.
    pub fn with_class(class: CallClass) -> Vec<&'static CallDescriptor> {
        Self::all().iter().filter(|d| d.class == class).collect()
    }

    /// Returns the number of registered calls.
    pub fn count() -> usize {
        Self::all().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
