//! The narrow interface a [`crate::value::Value`] or
//! [`crate::collection::IdCollection`] needs back from the tree that
//! owns it: the current load mode, cross-tree lookups for compute/
//! migrate/refer_to formulas, and the change log / error map / warning
//! dedup that live on [`crate::instance::Instance`].
//!
//! Declaring this as a trait (rather than a concrete `&Instance`
//! reference) keeps the ownership direction single: `Instance` owns
//! `Node`s which own `Value`s, and `Value` only ever gets a borrowed
//! `&dyn TreeContext` for the duration of one call. This is the weak
//! back-edge a leaf needs to reach the tree without ever holding a
//! strong reference to it.
use std::fmt;

use crate::error::ConfigError;
use crate::value::Scalar;

/// The four load modes an [`crate::instance::Instance`] can be in.
/// Every `store` and `notify_change` path branches on this, so
/// centralizing the check here is the single place that decision is
/// made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Normal,
    Preset,
    Layered,
    InitialLoad,
}

impl LoadMode {
    pub fn is_initial_load(self) -> bool {
        matches!(self, LoadMode::InitialLoad)
    }
}

/// One entry in the Instance's append-only change log.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNote {
    Update {
        old: Option<String>,
        new: Option<String>,
    },
    Note(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub path: String,
    pub note: ChangeNote,
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.note {
            ChangeNote::Update { old, new } => write!(
                f,
                "{}: {} -> {}",
                self.path,
                old.as_deref().unwrap_or("<undef>"),
                new.as_deref().unwrap_or("<undef>")
            ),
            ChangeNote::Note(note) => write!(f, "{}: {}", self.path, note),
        }
    }
}

pub trait TreeContext {
    /// The instance's current load mode.
    fn mode(&self) -> LoadMode;

    /// Resolves a dotted tree path to a leaf's value in `user` mode,
    /// for `compute`/`migrate_from`/`computed_refer_to` formula
    /// variables and `replace_follow` maps.
    fn resolve_scalar(&self, path: &str) -> Option<Scalar>;

    /// Resolves a dotted tree path to the live key set of the
    /// collection or map found there, for `refer_to`/`follow_keys_from`
    /// choice sets.
    fn resolve_keys(&self, path: &str) -> Option<Vec<String>>;

    /// Appends a change record unless `mode()` is `InitialLoad`, or the
    /// record is a forced model-driven transform during initial load.
    fn record_change(&self, path: &str, note: ChangeNote, force: bool);

    /// Records a soft error in the Instance's per-path error map
    /// (`check=skip/no`).
    fn record_error(&self, path: &str, error: ConfigError);

    /// Emits a warning, deduplicated by identical message per value:
    /// the first occurrence logs at `warn`, subsequent identical ones
    /// at `debug`.
    fn emit_warning(&self, path: &str, message: &str);
}
