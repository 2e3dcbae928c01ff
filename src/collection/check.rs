//! Index and content checking rules shared by every [`super::IdCollection`]
//! operation that can introduce or rearrange entries.
use crate::error::{ConfigError, Result};
use crate::value::WarnMatchRule;

use super::{CollectionSpec, DuplicatePolicy, Index};

/// Runs the applicable subset of index checks for `key`, given the
/// collection's current key set. Returns accumulated warning messages
/// on success; a failing check returns `Err` immediately.
pub fn check_idx(
    spec: &CollectionSpec,
    existing: &[Index],
    key: &Index,
    path: &str,
    ctx: &dyn crate::context::TreeContext,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if let Index::Int(i) = key {
        if let Some(min) = spec.min_index {
            if *i < min {
                return Err(ConfigError::WrongValue {
                    path: path.to_string(),
                    reason: format!("index {i} is below minimum {min}"),
                });
            }
        }
        if let Some(max) = spec.max_index {
            if *i > max {
                return Err(ConfigError::WrongValue {
                    path: path.to_string(),
                    reason: format!("index {i} is above maximum {max}"),
                });
            }
        }
    }

    if let Index::Str(s) = key {
        if let Some(re) = &spec.allow_keys_matching {
            if !re.is_match(s) {
                return Err(ConfigError::UnknownId(s.clone(), path.to_string()));
            }
        }
        if let Some(allow) = &spec.allow_keys {
            if !allow.iter().any(|k| k == s) {
                return Err(ConfigError::UnknownId(s.clone(), path.to_string()));
            }
        }
        if let Some(from) = &spec.allow_keys_from {
            let legal = ctx.resolve_keys(from).unwrap_or_default();
            if !legal.iter().any(|k| k == s) {
                return Err(ConfigError::UnknownId(s.clone(), path.to_string()));
            }
        }
        if let Some(from) = &spec.follow_keys_from {
            let legal = ctx.resolve_keys(from).unwrap_or_default();
            if !legal.iter().any(|k| k == s) {
                return Err(ConfigError::UnknownId(s.clone(), path.to_string()));
            }
        }
    }

    let exists = existing.iter().any(|e| e == key);
    if let Some(max_nb) = spec.max_nb {
        let projected = existing.len() + if exists { 0 } else { 1 };
        if projected > max_nb {
            return Err(ConfigError::Model {
                path: path.to_string(),
                reason: format!("collection would exceed max_nb={max_nb}"),
            });
        }
    }

    let key_str = key.to_string();
    warnings.extend(matched_warnings(&spec.warn_if_key_match, &key_str, true));
    warnings.extend(matched_warnings(&spec.warn_unless_key_match, &key_str, false));

    Ok(warnings)
}

fn matched_warnings(rules: &[WarnMatchRule], key: &str, warn_on_match: bool) -> Vec<String> {
    rules
        .iter()
        .filter(|r| r.pattern.is_match(key) == warn_on_match)
        .map(|r| {
            r.msg.clone().unwrap_or_else(|| {
                if warn_on_match {
                    format!("key matches {}", r.pattern.as_str())
                } else {
                    format!("key does not match {}", r.pattern.as_str())
                }
            })
        })
        .collect()
}

/// Result of a bulk content check.
#[derive(Debug, Default)]
pub struct ContentReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// The built-in duplicate checker (spec's only named `check_content`
/// rule): walks `(index, rendered-value)` pairs in order and applies
/// `duplicates` policy to every occurrence after the first.
///
/// With `Warn` and `Suppress`, later duplicate positions are removed
/// from `entries` in place when `apply_fix` is true (or unconditionally
/// for `Suppress`, which never asks first).
pub fn check_content_duplicates(
    policy: DuplicatePolicy,
    entries: &mut Vec<(Index, Option<String>)>,
    apply_fix: bool,
) -> ContentReport {
    let mut seen = std::collections::HashSet::new();
    let mut dup_positions = Vec::new();
    for (i, (_, rendered)) in entries.iter().enumerate() {
        if let Some(s) = rendered {
            if !seen.insert(s.clone()) {
                dup_positions.push(i);
            }
        }
    }

    let mut report = ContentReport::default();
    match policy {
        DuplicatePolicy::Allow => {}
        DuplicatePolicy::Forbid => {
            for &i in &dup_positions {
                report.errors.push(format!("duplicate value at index {}", entries[i].0));
            }
        }
        DuplicatePolicy::Warn => {
            for &i in &dup_positions {
                report.warnings.push(format!("duplicate value at index {}", entries[i].0));
            }
            if apply_fix {
                for &i in dup_positions.iter().rev() {
                    entries.remove(i);
                }
            }
        }
        DuplicatePolicy::Suppress => {
            for &i in dup_positions.iter().rev() {
                entries.remove(i);
            }
        }
    }
    report
}
