//! A minimal [`TreeContext`] for exercising a [`Value`]/[`IdCollection`]
//! in isolation, without building a full catalog and node tree.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use confmodel::context::{ChangeNote, ChangeRecord, LoadMode, TreeContext};
use confmodel::error::ConfigError;
use confmodel::value::Scalar;

pub struct RecordingContext {
    mode: Cell<LoadMode>,
    pub changes: RefCell<Vec<ChangeRecord>>,
    pub errors: RefCell<HashMap<String, ConfigError>>,
    pub warnings: RefCell<Vec<(String, String)>>,
    warned: RefCell<HashSet<(String, String)>>,
    scalars: RefCell<HashMap<String, Scalar>>,
    keys: RefCell<HashMap<String, Vec<String>>>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self {
            mode: Cell::new(LoadMode::Normal),
            changes: RefCell::new(Vec::new()),
            errors: RefCell::new(HashMap::new()),
            warnings: RefCell::new(Vec::new()),
            warned: RefCell::new(HashSet::new()),
            scalars: RefCell::new(HashMap::new()),
            keys: RefCell::new(HashMap::new()),
        }
    }

    pub fn set_mode(&self, mode: LoadMode) {
        self.mode.set(mode);
    }

    pub fn set_scalar(&self, path: &str, value: Scalar) {
        self.scalars.borrow_mut().insert(path.to_string(), value);
    }

    pub fn set_keys(&self, path: &str, keys: Vec<String>) {
        self.keys.borrow_mut().insert(path.to_string(), keys);
    }

    pub fn change_count(&self) -> usize {
        self.changes.borrow().len()
    }
}

impl TreeContext for RecordingContext {
    fn mode(&self) -> LoadMode {
        self.mode.get()
    }

    fn resolve_scalar(&self, path: &str) -> Option<Scalar> {
        self.scalars.borrow().get(path).cloned()
    }

    fn resolve_keys(&self, path: &str) -> Option<Vec<String>> {
        self.keys.borrow().get(path).cloned()
    }

    fn record_change(&self, path: &str, note: ChangeNote, force: bool) {
        if self.mode().is_initial_load() && !force {
            return;
        }
        self.changes.borrow_mut().push(ChangeRecord {
            path: path.to_string(),
            note,
        });
    }

    fn record_error(&self, path: &str, error: ConfigError) {
        self.errors.borrow_mut().insert(path.to_string(), error);
    }

    fn emit_warning(&self, path: &str, message: &str) {
        let key = (path.to_string(), message.to_string());
        if self.warned.borrow_mut().insert(key.clone()) {
            self.warnings.borrow_mut().push(key);
        }
    }
}
