//! Schema-level configuration for a [`super::Value`]: bounds, enum
//! choices, regexes, grammars, warn/assert rules, fixes, compute and
//! migration formulas.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{ConfigError, Result};

use super::sources::{Scalar, ValueType};

/// A closure repairing a value that violated a warn/assert rule.
/// Declarative fixes (`Lowercase`, `Uppercase`, `ReplaceWith`) cover
/// the common cases from a catalog; `Custom` lets code register an
/// arbitrary repair.
#[derive(Clone)]
pub enum Fix {
    Lowercase,
    Uppercase,
    Truncate(usize),
    ReplaceWith(String),
    Custom(Arc<dyn Fn(&Scalar) -> Scalar + Send + Sync>),
}

impl fmt::Debug for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fix::Lowercase => write!(f, "Fix::Lowercase"),
            Fix::Uppercase => write!(f, "Fix::Uppercase"),
            Fix::Truncate(n) => write!(f, "Fix::Truncate({n})"),
            Fix::ReplaceWith(s) => write!(f, "Fix::ReplaceWith({s:?})"),
            Fix::Custom(_) => write!(f, "Fix::Custom(..)"),
        }
    }
}

impl Fix {
    pub fn apply(&self, value: &Scalar) -> Scalar {
        match self {
            Fix::Lowercase => Scalar::Str(value.as_str().to_lowercase()),
            Fix::Uppercase => Scalar::Str(value.as_str().to_uppercase()),
            Fix::Truncate(n) => {
                let s = value.as_str();
                Scalar::Str(s.chars().take(*n).collect())
            }
            Fix::ReplaceWith(s) => Scalar::Str(s.clone()),
            Fix::Custom(f) => f(value),
        }
    }
}

/// A predicate used by `assert`/`warn_if`/`warn_unless`: a closure
/// over the pending value returning truthy/falsy.
pub type Predicate = Arc<dyn Fn(&Scalar) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct AssertRule {
    pub code: String,
    pub msg: Option<String>,
    pub predicate: Predicate,
    pub fix: Option<Fix>,
}

impl fmt::Debug for AssertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertRule")
            .field("code", &self.code)
            .field("msg", &self.msg)
            .field("fix", &self.fix)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WarnMatchRule {
    pub pattern: Regex,
    pub msg: Option<String>,
    pub fix: Option<Fix>,
}

/// Numeric bound, keeping the schema's declared numeric kind rather
/// than widening everything to `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Integer(i64),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convert {
    Lowercase,
    Uppercase,
}

#[derive(Debug, Clone)]
pub enum ReplaceKey {
    Literal(String),
    Pattern(Regex),
}

/// `compute` / `migrate_from` share a shape: a formula string
/// referencing named variables bound to other tree paths.
#[derive(Debug, Clone, Default)]
pub struct ComputeSpec {
    pub formula: String,
    pub variables: BTreeMap<String, String>,
    pub replace: Option<BTreeMap<String, String>>,
    pub use_eval: bool,
    pub allow_override: bool,
}

/// `refer_to` / `computed_refer_to`: a path, optionally templated by
/// the same variable mechanism as `compute`, whose resolved indices
/// form the leaf's choice set.
#[derive(Debug, Clone)]
pub enum ReferSpec {
    Static(String),
    Computed {
        formula: String,
        variables: BTreeMap<String, String>,
    },
}

/// A minimal PEG-like grammar for the `grammar` validation parameter:
/// literal/regex leaves composed with sequence, choice and repetition,
/// evaluated as a full-input match.
#[derive(Debug, Clone)]
pub enum GrammarRule {
    Literal(String),
    Regex(Regex),
    Sequence(Vec<GrammarRule>),
    Choice(Vec<GrammarRule>),
    Repeat(Box<GrammarRule>),
}

impl GrammarRule {
    /// Attempts to consume a prefix of `input`, returning what remains
    /// on success.
    fn consume<'a>(&self, input: &'a str) -> Option<&'a str> {
        match self {
            GrammarRule::Literal(lit) => input.strip_prefix(lit.as_str()),
            GrammarRule::Regex(re) => re
                .find(input)
                .filter(|m| m.start() == 0)
                .map(|m| &input[m.end()..]),
            GrammarRule::Sequence(rules) => {
                let mut rem = input;
                for rule in rules {
                    rem = rule.consume(rem)?;
                }
                Some(rem)
            }
            GrammarRule::Choice(rules) => rules.iter().find_map(|rule| rule.consume(input)),
            GrammarRule::Repeat(rule) => {
                let mut rem = input;
                while let Some(next) = rule.consume(rem) {
                    if next == rem {
                        break; // avoid infinite loop on a rule matching empty
                    }
                    rem = next;
                }
                Some(rem)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Grammar {
    pub root: GrammarRule,
}

impl Grammar {
    pub fn accepts(&self, input: &str) -> bool {
        matches!(self.root.consume(input), Some(rem) if rem.is_empty())
    }
}

/// The full set of schema-level parameters for a leaf.
#[derive(Debug, Clone, Default)]
pub struct ValueSpec {
    pub value_type: Option<ValueType>,
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    pub choice: Option<Vec<String>>,
    pub write_as: Option<(String, String)>,
    pub default: Option<Scalar>,
    pub upstream_default: Option<Scalar>,
    pub mandatory: bool,
    pub matches: Option<Regex>,
    pub grammar: Option<Grammar>,
    pub warn_if_match: Vec<WarnMatchRule>,
    pub warn_unless_match: Vec<WarnMatchRule>,
    pub assert: Vec<AssertRule>,
    pub warn_if: Vec<AssertRule>,
    pub warn_unless: Vec<AssertRule>,
    pub warn: Option<String>,
    pub convert: Option<Convert>,
    pub replace: Vec<(ReplaceKey, String)>,
    pub replace_follow: Option<String>,
    pub compute: Option<ComputeSpec>,
    pub migrate_from: Option<ComputeSpec>,
    pub help: BTreeMap<String, String>,
    pub refer_to: Option<ReferSpec>,
}

impl ValueSpec {
    /// Catches `ModelError`-class schema inconsistencies eagerly,
    /// rather than waiting for them to surface as a confusing failure
    /// on first store/fetch.
    pub fn check_model(&self, path: &str) -> Result<()> {
        if self.write_as.is_some() && self.value_type != Some(ValueType::Boolean) {
            return Err(ConfigError::Model {
                path: path.to_string(),
                reason: "write_as is only valid on a boolean value".to_string(),
            });
        }
        if self.default.is_some() && self.upstream_default.is_some() {
            return Err(ConfigError::Model {
                path: path.to_string(),
                reason: "default and upstream_default are mutually exclusive".to_string(),
            });
        }
        if self.value_type.is_none() && self.refer_to.is_none() {
            return Err(ConfigError::Model {
                path: path.to_string(),
                reason: "value_type is mandatory unless determined by warp".to_string(),
            });
        }
        if matches!(self.value_type, Some(ValueType::Integer | ValueType::Number)) {
            if let (Some(Bound::Integer(lo)), Some(Bound::Integer(hi))) = (&self.min, &self.max) {
                if lo > hi {
                    return Err(ConfigError::Model {
                        path: path.to_string(),
                        reason: format!("min ({lo}) is greater than max ({hi})"),
                    });
                }
            }
        }
        if matches!(self.value_type, Some(ValueType::Enum)) && self.choice.is_none() {
            return Err(ConfigError::Model {
                path: path.to_string(),
                reason: "enum value_type requires a choice list".to_string(),
            });
        }
        Ok(())
    }
}
