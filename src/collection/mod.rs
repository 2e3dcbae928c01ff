//! Generic typed container: *Hash* (string-keyed) or *List*
//! (integer-indexed), each entry a leaf [`crate::value::Value`] or a
//! child [`crate::node::Node`] ("cargo").
mod check;

pub use check::{check_content_duplicates, check_idx, ContentReport};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use regex::Regex;

use crate::context::{ChangeNote, LoadMode, TreeContext};
use crate::error::{CheckPolicy, ConfigError, Result};
use crate::node::Node;
use crate::value::{Scalar, Value, ValueSpec, WarnMatchRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Hash,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    String,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    Allow,
    Forbid,
    Suppress,
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convert {
    Lowercase,
    Uppercase,
}

/// An index into an [`IdCollection`]: an integer position for a
/// *List*, a string key for a *Hash*.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Index {
    Int(i64),
    Str(String),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Int(i) => write!(f, "{i}"),
            Index::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The live content of one collection entry.
#[derive(Clone)]
pub enum Cargo {
    Leaf(Rc<Value>),
    Node(Rc<Node>),
}

impl Cargo {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Cargo::Leaf(_) => "leaf",
            Cargo::Node(_) => "node",
        }
    }

    pub fn as_leaf(&self) -> Option<&Rc<Value>> {
        match self {
            Cargo::Leaf(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Rc<Node>> {
        match self {
            Cargo::Node(n) => Some(n),
            _ => None,
        }
    }

    fn rendered(&self, ctx: &dyn TreeContext) -> Option<String> {
        match self {
            Cargo::Leaf(v) => v.fetch(ctx, crate::value::FetchMode::User, CheckPolicy::Skip, true)
                .ok()
                .flatten()
                .map(|s| s.as_str()),
            Cargo::Node(_) => None,
        }
    }
}

/// Which mode produced a collection entry, carried for change
/// notification the same way a `Value`'s slot is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Layered,
    Preset,
    Normal,
}

impl From<LoadMode> for DataMode {
    fn from(mode: LoadMode) -> Self {
        match mode {
            LoadMode::Preset => DataMode::Preset,
            LoadMode::Layered => DataMode::Layered,
            LoadMode::Normal | LoadMode::InitialLoad => DataMode::Normal,
        }
    }
}

/// Schema-level configuration for a Hash or List element.
#[derive(Default)]
pub struct CollectionSpec {
    pub kind: Option<CollectionKind>,
    pub index_type: Option<IndexType>,
    pub min_index: Option<i64>,
    pub max_index: Option<i64>,
    pub max_nb: Option<usize>,
    pub default_keys: Vec<String>,
    pub default_with_init: Vec<(String, String)>,
    pub follow_keys_from: Option<String>,
    pub allow_keys: Option<Vec<String>>,
    pub allow_keys_from: Option<String>,
    pub allow_keys_matching: Option<Regex>,
    pub auto_create: bool,
    pub warn_if_key_match: Vec<WarnMatchRule>,
    pub warn_unless_key_match: Vec<WarnMatchRule>,
    pub duplicates: DuplicatePolicy,
    pub migrate_keys_from: Option<String>,
    pub migrate_values_from: Option<String>,
    pub ordered: bool,
    pub convert: Option<Convert>,
    pub write_empty_value: bool,
    pub cargo_value_spec: Option<Arc<ValueSpec>>,
    pub cargo_class: Option<String>,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        DuplicatePolicy::Allow
    }
}

struct Slot {
    index: Index,
    cargo: Cargo,
    mode: DataMode,
}

/// A live Hash or List element.
pub struct IdCollection {
    name: String,
    path: String,
    spec: Arc<CollectionSpec>,
    build_cargo: Box<dyn Fn() -> Cargo>,
    entries: RefCell<Vec<Slot>>,
    default_keys_done: Cell<bool>,
    migrate_keys_done: Cell<bool>,
}

impl IdCollection {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        spec: Arc<CollectionSpec>,
        build_cargo: impl Fn() -> Cargo + 'static,
    ) -> Self {
        IdCollection {
            name: name.into(),
            path: path.into(),
            spec,
            build_cargo: Box::new(build_cargo),
            entries: RefCell::new(Vec::new()),
            default_keys_done: Cell::new(false),
            migrate_keys_done: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn spec(&self) -> Arc<CollectionSpec> {
        self.spec.clone()
    }

    pub fn key_for(&self, raw: &str) -> Index {
        match self.spec.index_type {
            Some(IndexType::Integer) => raw
                .parse::<i64>()
                .map(Index::Int)
                .unwrap_or_else(|_| Index::Str(raw.to_string())),
            _ => {
                let mut s = raw.to_string();
                match self.spec.convert {
                    Some(Convert::Lowercase) => s = s.to_lowercase(),
                    Some(Convert::Uppercase) => s = s.to_uppercase(),
                    None => {}
                }
                Index::Str(s)
            }
        }
    }

    fn entry_path(&self, index: &Index) -> String {
        format!("{}.{}", self.path, index)
    }

    pub fn keys(&self) -> Vec<Index> {
        self.entries.borrow().iter().map(|s| s.index.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn get(&self, key: &Index) -> Option<Cargo> {
        self.entries
            .borrow()
            .iter()
            .find(|s| &s.index == key)
            .map(|s| s.cargo.clone())
    }

    /// Returns the entry at `key`, creating it with `build_cargo` and
    /// running the index check if it doesn't exist yet.
    pub fn ensure_entry(&self, ctx: &dyn TreeContext, key: Index) -> Result<Cargo> {
        if let Some(cargo) = self.get(&key) {
            return Ok(cargo);
        }
        let existing = self.keys();
        let warnings = check_idx(&self.spec, &existing, &key, &self.path, ctx)?;
        let cargo = (self.build_cargo)();
        let mode = DataMode::from(ctx.mode());
        self.entries.borrow_mut().push(Slot {
            index: key.clone(),
            cargo: cargo.clone(),
            mode,
        });
        for w in warnings {
            ctx.emit_warning(&self.entry_path(&key), &w);
        }
        ctx.record_change(
            &self.entry_path(&key),
            ChangeNote::Note("created".to_string()),
            false,
        );
        Ok(cargo)
    }

    pub fn delete(&self, ctx: &dyn TreeContext, key: &Index) -> bool {
        let mut entries = self.entries.borrow_mut();
        let pos = match entries.iter().position(|s| &s.index == key) {
            Some(p) => p,
            None => return false,
        };
        entries.remove(pos);
        if matches!(self.spec.kind, Some(CollectionKind::List)) {
            Self::renumber(&mut entries);
        }
        drop(entries);
        ctx.record_change(
            &self.entry_path(key),
            ChangeNote::Update {
                old: Some(key.to_string()),
                new: None,
            },
            false,
        );
        true
    }

    pub fn clear(&self, ctx: &dyn TreeContext) {
        let had = !self.entries.borrow().is_empty();
        self.entries.borrow_mut().clear();
        if had {
            ctx.record_change(&self.path, ChangeNote::Note("cleared".to_string()), false);
        }
    }

    fn renumber(entries: &mut [Slot]) {
        for (i, slot) in entries.iter_mut().enumerate() {
            slot.index = Index::Int(i as i64);
        }
    }

    // ---- ordered operations (List, or ordered Hash) ----------------

    pub fn move_entry(&self, ctx: &dyn TreeContext, from: usize, to: usize) -> Result<()> {
        let mut entries = self.entries.borrow_mut();
        if from >= entries.len() || to >= entries.len() {
            return Err(ConfigError::Model {
                path: self.path.clone(),
                reason: format!("move index out of range: {from} -> {to}"),
            });
        }
        let slot = entries.remove(from);
        entries.insert(to, slot);
        if matches!(self.spec.kind, Some(CollectionKind::List)) {
            Self::renumber(&mut entries);
        }
        drop(entries);
        ctx.record_change(&self.path, ChangeNote::Note(format!("moved {from} to {to}")), false);
        Ok(())
    }

    pub fn move_up(&self, ctx: &dyn TreeContext, pos: usize) -> Result<()> {
        if pos == 0 {
            return Ok(());
        }
        self.move_entry(ctx, pos, pos - 1)
    }

    pub fn move_down(&self, ctx: &dyn TreeContext, pos: usize) -> Result<()> {
        let len = self.entries.borrow().len();
        if pos + 1 >= len {
            return Ok(());
        }
        self.move_entry(ctx, pos, pos + 1)
    }

    pub fn swap(&self, ctx: &dyn TreeContext, a: usize, b: usize) -> Result<()> {
        let mut entries = self.entries.borrow_mut();
        if a >= entries.len() || b >= entries.len() {
            return Err(ConfigError::Model {
                path: self.path.clone(),
                reason: format!("swap index out of range: {a}, {b}"),
            });
        }
        entries.swap(a, b);
        if matches!(self.spec.kind, Some(CollectionKind::List)) {
            Self::renumber(&mut entries);
        }
        drop(entries);
        ctx.record_change(&self.path, ChangeNote::Note(format!("swapped {a} and {b}")), false);
        Ok(())
    }

    pub fn sort(&self, ctx: &dyn TreeContext) {
        let mut entries = self.entries.borrow_mut();
        entries.sort_by(|a, b| a.index.to_string().cmp(&b.index.to_string()));
        if matches!(self.spec.kind, Some(CollectionKind::List)) {
            Self::renumber(&mut entries);
        }
        drop(entries);
        ctx.record_change(&self.path, ChangeNote::Note("sorted".to_string()), false);
    }

    // ---- list-shaped leaf operations --------------------------------

    fn push_cargo(&self, ctx: &dyn TreeContext, cargo: Cargo, at_end: bool) -> Result<Index> {
        let existing = self.keys();
        let next = Index::Int(existing.len() as i64);
        check_idx(&self.spec, &existing, &next, &self.path, ctx)?;
        let mode = DataMode::from(ctx.mode());
        let mut entries = self.entries.borrow_mut();
        if at_end {
            entries.push(Slot {
                index: next.clone(),
                cargo,
                mode,
            });
        } else {
            entries.insert(
                0,
                Slot {
                    index: next.clone(),
                    cargo,
                    mode,
                },
            );
            Self::renumber(&mut entries);
        }
        drop(entries);
        ctx.record_change(&self.entry_path(&next), ChangeNote::Note("pushed".to_string()), false);
        Ok(next)
    }

    pub fn push_value(&self, ctx: &dyn TreeContext, value: Scalar) -> Result<Index> {
        let cargo = (self.build_cargo)();
        if let Cargo::Leaf(leaf) = &cargo {
            leaf.store(ctx, value, CheckPolicy::Yes, true)?;
        }
        self.push_cargo(ctx, cargo, true)
    }

    pub fn unshift_value(&self, ctx: &dyn TreeContext, value: Scalar) -> Result<Index> {
        let cargo = (self.build_cargo)();
        if let Cargo::Leaf(leaf) = &cargo {
            leaf.store(ctx, value, CheckPolicy::Yes, true)?;
        }
        self.push_cargo(ctx, cargo, false)
    }

    pub fn insert_at(&self, ctx: &dyn TreeContext, pos: usize, value: Scalar) -> Result<()> {
        let cargo = (self.build_cargo)();
        if let Cargo::Leaf(leaf) = &cargo {
            leaf.store(ctx, value, CheckPolicy::Yes, true)?;
        }
        let mode = DataMode::from(ctx.mode());
        let mut entries = self.entries.borrow_mut();
        let pos = pos.min(entries.len());
        entries.insert(
            pos,
            Slot {
                index: Index::Int(pos as i64),
                cargo,
                mode,
            },
        );
        Self::renumber(&mut entries);
        Ok(())
    }

    pub fn insert_before(&self, ctx: &dyn TreeContext, key: &Index, value: Scalar) -> Result<()> {
        let pos = self
            .entries
            .borrow()
            .iter()
            .position(|s| &s.index == key)
            .unwrap_or(0);
        self.insert_at(ctx, pos, value)
    }

    /// Insertion-sort a new value keeping the list ordered by its
    /// string rendering.
    pub fn insort(&self, ctx: &dyn TreeContext, value: Scalar) -> Result<()> {
        let rendered = value.as_str();
        let pos = {
            let entries = self.entries.borrow();
            entries
                .iter()
                .position(|s| s.cargo.rendered(ctx).map(|r| r > rendered).unwrap_or(false))
                .unwrap_or(entries.len())
        };
        self.insert_at(ctx, pos, value)
    }

    /// Finds an entry whose rendered value equals `value`, else
    /// appends a new one. Returns the matched or created index.
    pub fn ensure(&self, ctx: &dyn TreeContext, value: Scalar) -> Result<Index> {
        let rendered = value.as_str();
        let found = self
            .entries
            .borrow()
            .iter()
            .find(|s| s.cargo.rendered(ctx).as_deref() == Some(rendered.as_str()))
            .map(|s| s.index.clone());
        if let Some(idx) = found {
            return Ok(idx);
        }
        self.push_value(ctx, value)
    }

    pub fn copy(&self, ctx: &dyn TreeContext, from: &Index, to: Index) -> Result<()> {
        let cargo = self
            .get(from)
            .ok_or_else(|| ConfigError::UnknownId(from.to_string(), self.path.clone()))?;
        let existing = self.keys();
        check_idx(&self.spec, &existing, &to, &self.path, ctx)?;
        let mode = DataMode::from(ctx.mode());
        self.entries.borrow_mut().push(Slot {
            index: to.clone(),
            cargo,
            mode,
        });
        ctx.record_change(&self.entry_path(&to), ChangeNote::Note(format!("copied from {from}")), false);
        Ok(())
    }

    // ---- content check (spec's built-in duplicate policy) ----------

    pub fn check_content(&self, ctx: &dyn TreeContext, apply_fix: bool) -> ContentReport {
        let mut pairs: Vec<(Index, Option<String>)> = self
            .entries
            .borrow()
            .iter()
            .map(|s| (s.index.clone(), s.cargo.rendered(ctx)))
            .collect();
        let report = check_content_duplicates(self.spec.duplicates, &mut pairs, apply_fix);
        if apply_fix {
            let surviving: std::collections::HashSet<Index> = pairs.into_iter().map(|(i, _)| i).collect();
            self.entries.borrow_mut().retain(|s| surviving.contains(&s.index));
            if matches!(self.spec.kind, Some(CollectionKind::List)) {
                Self::renumber(&mut self.entries.borrow_mut());
            }
        }
        report
    }

    // ---- lazy default keys / migration ------------------------------

    /// Populates `default_keys` / `default_with_init` the first time
    /// the collection's keys are enumerated while empty.
    pub fn ensure_default_keys(&self, ctx: &dyn TreeContext) -> Result<()> {
        if self.default_keys_done.get() || !self.is_empty() {
            return Ok(());
        }
        self.default_keys_done.set(true);
        for key in &self.spec.default_keys {
            self.ensure_entry(ctx, self.key_for(key))?;
        }
        for (key, program) in &self.spec.default_with_init {
            let cargo = self.ensure_entry(ctx, self.key_for(key))?;
            if let Cargo::Node(node) = &cargo {
                crate::loader::exec::run_against(node.clone(), program, ctx, CheckPolicy::Yes)?;
            }
        }
        Ok(())
    }

    pub fn has_data(&self, ctx: &dyn TreeContext) -> Result<bool> {
        self.ensure_default_keys(ctx)?;
        Ok(!self.is_empty())
    }

    /// One-shot key migration run after initial load, mirroring
    /// [`crate::value::Value`]'s `migrate_from`.
    pub fn migrate_keys_if_needed(&self, ctx: &dyn TreeContext) {
        if self.migrate_keys_done.get() || ctx.mode().is_initial_load() {
            return;
        }
        self.migrate_keys_done.set(true);
        let from = match &self.spec.migrate_keys_from {
            Some(p) => p,
            None => return,
        };
        if !self.is_empty() {
            return;
        }
        if let Some(keys) = ctx.resolve_keys(from) {
            for k in keys {
                let _ = self.ensure_entry(ctx, self.key_for(&k));
            }
            ctx.record_change(&self.path, ChangeNote::Note("migrated keys".to_string()), false);
        }
    }
}
