//! Warper: re-evaluates a warped element's rule table against its
//! master leaves and resolves the class that should back it.
use std::cell::Cell;
use std::collections::BTreeMap;

use crate::catalog::WarpRuleDef;
use crate::context::TreeContext;
use crate::error::{ConfigError, Result};

/// Binds master paths to the symbolic variable used in a rule's `when`
/// formula (the path's final `.`-segment), evaluates rules in order
/// and returns the first match's target class.
///
/// Re-entry into [`Self::resolve_class`] while already evaluating (a
/// warp depending, directly or through a cascade, on itself) is raised
/// as a `ModelError` rather than looped forever.
pub struct Warper {
    path: String,
    masters: Vec<String>,
    rules: Vec<WarpRuleDef>,
    evaluating: Cell<bool>,
}

impl Warper {
    pub fn new(path: impl Into<String>, masters: Vec<String>, rules: Vec<WarpRuleDef>) -> Self {
        Warper {
            path: path.into(),
            masters,
            rules,
            evaluating: Cell::new(false),
        }
    }

    pub fn masters(&self) -> &[String] {
        &self.masters
    }

    pub fn resolve_class(&self, ctx: &dyn TreeContext) -> Result<Option<String>> {
        if self.evaluating.get() {
            return Err(ConfigError::Model {
                path: self.path.clone(),
                reason: "cyclic warp: re-entered evaluation of the same rule table".to_string(),
            });
        }
        self.evaluating.set(true);
        let result = self.resolve_inner(ctx);
        self.evaluating.set(false);
        result
    }

    fn resolve_inner(&self, ctx: &dyn TreeContext) -> Result<Option<String>> {
        let variables: BTreeMap<String, String> = self
            .masters
            .iter()
            .map(|path| {
                let var = path.rsplit('.').next().unwrap_or(path).to_string();
                (var, path.clone())
            })
            .collect();
        for rule in &self.rules {
            if crate::expr::evaluate_bool(&rule.when, &variables, ctx) {
                return Ok(Some(rule.class.clone()));
            }
        }
        Ok(None)
    }
}
