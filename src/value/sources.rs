//! Scalar representation and the precedence stack of sources a [`super::Value`]
//! may hold.
use std::fmt;

/// The type a leaf's schema declares it to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Boolean,
    Enum,
    Integer,
    Number,
    Uniline,
    String,
    Reference,
    File,
    Dir,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Enum => "enum",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Uniline => "uniline",
            ValueType::String => "string",
            ValueType::Reference => "reference",
            ValueType::File => "file",
            ValueType::Dir => "dir",
        }
    }
}

/// A concrete stored scalar. Booleans, integers and numbers get their
/// own variant so bounds/arithmetic checks don't need to re-parse
/// strings on every read; everything else (uniline/string/enum/
/// reference/file/dir) is text.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Str(String),
}

impl Scalar {
    pub fn as_str(&self) -> String {
        match self {
            Scalar::Boolean(b) => b.to_string(),
            Scalar::Integer(i) => i.to_string(),
            Scalar::Number(n) => n.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which slot a store landed in, chosen from the Instance's current
/// [`crate::instance::LoadMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSlot {
    User,
    Preset,
    Layered,
}

/// The four-to-six tier precedence stack for a leaf's content.
///
/// `computed` and `default`/`upstream_default` are not stored here:
/// `computed` is re-evaluated on every read, and defaults live on the
/// schema ([`super::ValueSpec`]), not the live value, since they never
/// change once the leaf exists.
#[derive(Debug, Clone, Default)]
pub struct ValueSlots {
    pub user: Option<Scalar>,
    pub preset: Option<Scalar>,
    pub layered: Option<Scalar>,
}

impl ValueSlots {
    pub fn slot_mut(&mut self, slot: SourceSlot) -> &mut Option<Scalar> {
        match slot {
            SourceSlot::User => &mut self.user,
            SourceSlot::Preset => &mut self.preset,
            SourceSlot::Layered => &mut self.layered,
        }
    }

    pub fn slot(&self, slot: SourceSlot) -> &Option<Scalar> {
        match slot {
            SourceSlot::User => &self.user,
            SourceSlot::Preset => &self.preset,
            SourceSlot::Layered => &self.layered,
        }
    }
}

/// The read mode passed to [`super::Value::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// user / preset / computed / default, in that order.
    Backend,
    /// user, falling back through layered and upstream_default.
    User,
    /// The user slot only if it differs from every lower source.
    Custom,
    /// The highest-precedence non-user value.
    Standard,
    Preset,
    Default,
    UpstreamDefault,
    Layered,
    NonUpstreamDefault,
    /// Like `User`, but returns `None` for empty-mandatory instead of
    /// raising `UserError`.
    AllowUndef,
}
