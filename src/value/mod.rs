//! The typed leaf of the tree: holds at most one scalar, enforces
//! type/bounds/match/grammar, runs warn/assert/fix hooks, and layers
//! user/preset/computed/layered/default/upstream_default sources.
mod sources;
mod validate;

pub use sources::{FetchMode, Scalar, SourceSlot, ValueSlots, ValueType};
pub use validate::{
    AssertRule, Bound, ComputeSpec, Convert, Fix, Grammar, GrammarRule, Predicate, ReferSpec,
    ReplaceKey, ValueSpec, WarnMatchRule,
};

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::context::{ChangeNote, LoadMode, TreeContext};
use crate::error::{CheckPolicy, ConfigError, Result};

#[derive(Debug, Clone)]
struct Violation {
    message: String,
    fix: Option<Fix>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidateMode {
    /// The first rule violated without a warn-only shape aborts
    /// validation with `WrongValue`.
    Strict,
    /// Every violation, including ones that would abort in `Strict`
    /// mode, is collected instead (used by `apply_fixes`, which needs
    /// to see fixable hard failures too).
    CollectAll,
}

/// A single typed configuration leaf.
pub struct Value {
    name: String,
    path: String,
    spec: RefCell<Arc<ValueSpec>>,
    slots: RefCell<ValueSlots>,
    migration_done: Cell<bool>,
}

impl Value {
    pub fn new(name: impl Into<String>, path: impl Into<String>, spec: Arc<ValueSpec>) -> Self {
        Value {
            name: name.into(),
            path: path.into(),
            spec: RefCell::new(spec),
            slots: RefCell::new(ValueSlots::default()),
            migration_done: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn spec(&self) -> Arc<ValueSpec> {
        self.spec.borrow().clone()
    }

    /// Invoked by a [`crate::node::Warper`] when the warp master
    /// selects a different concrete configuration for this element.
    pub fn set_spec(&self, spec: Arc<ValueSpec>) {
        *self.spec.borrow_mut() = spec;
    }

    // ---- store protocol ---------------------------------------

    pub fn store(
        &self,
        ctx: &dyn TreeContext,
        input: Scalar,
        check: CheckPolicy,
        silent: bool,
    ) -> Result<()> {
        let spec = self.spec.borrow().clone();

        if let Some(compute) = &spec.compute {
            if !compute.allow_override {
                return match check {
                    CheckPolicy::Yes => Err(ConfigError::Model {
                        path: self.path.clone(),
                        reason: "leaf is computed and does not allow store overrides".to_string(),
                    }),
                    _ => Ok(()),
                };
            }
        }

        let mut value = input;
        let mut transformed = false;
        if let Some(conv) = spec.convert {
            let converted = match conv {
                Convert::Lowercase => Scalar::Str(value.as_str().to_lowercase()),
                Convert::Uppercase => Scalar::Str(value.as_str().to_uppercase()),
            };
            transformed |= converted != value;
            value = converted;
        }
        if spec.value_type == Some(ValueType::Boolean) {
            value = self.normalize_boolean(&spec, &value)?;
        }
        let replaced = Self::apply_replace(&spec, value.clone());
        transformed |= replaced != value;
        value = replaced;

        if Self::is_empty(&value) && spec.mandatory {
            if let Some(fallback) = self.resolve_non_user(ctx, &spec) {
                value = fallback;
            }
        }

        match self.validate(ctx, &spec, &value, ValidateMode::Strict) {
            Ok(warnings) => {
                for w in warnings {
                    if !silent {
                        ctx.emit_warning(&self.path, &w.message);
                    }
                }
            }
            Err(e) => {
                return match check {
                    CheckPolicy::Yes => Err(e),
                    CheckPolicy::Skip => {
                        ctx.record_error(&self.path, e);
                        if !silent {
                            ctx.emit_warning(&self.path, "store rejected; prior value kept");
                        }
                        Ok(())
                    }
                    CheckPolicy::No => {
                        ctx.record_error(&self.path, e);
                        self.write_slot(ctx, Self::slot_for_mode(ctx.mode()), value, transformed);
                        Ok(())
                    }
                };
            }
        }

        self.write_slot(ctx, Self::slot_for_mode(ctx.mode()), value, transformed);
        Ok(())
    }

    fn slot_for_mode(mode: LoadMode) -> SourceSlot {
        match mode {
            LoadMode::Preset => SourceSlot::Preset,
            LoadMode::Layered => SourceSlot::Layered,
            LoadMode::Normal | LoadMode::InitialLoad => SourceSlot::User,
        }
    }

    fn write_slot(&self, ctx: &dyn TreeContext, slot: SourceSlot, value: Scalar, force: bool) {
        let mut slots = self.slots.borrow_mut();
        let prior = slots.slot(slot).clone();
        if prior.as_ref() == Some(&value) {
            return; // same value at the same source: no change event
        }
        *slots.slot_mut(slot) = Some(value.clone());
        drop(slots);
        ctx.record_change(
            &self.path,
            ChangeNote::Update {
                old: prior.map(|s| s.as_str()),
                new: Some(value.as_str()),
            },
            force,
        );
    }

    /// Removes the user slot, restoring precedence to the next source
    /// ("writing null to the user slot" restores precedence).
    pub fn clear(&self, ctx: &dyn TreeContext) {
        let mut slots = self.slots.borrow_mut();
        if slots.user.is_none() {
            return;
        }
        let old = slots.user.take();
        drop(slots);
        ctx.record_change(
            &self.path,
            ChangeNote::Update {
                old: old.map(|s| s.as_str()),
                new: None,
            },
            false,
        );
    }

    /// Drops the `layered` slot without a change event, used when an
    /// Instance leaves layered mode (`layered_clear`).
    pub fn clear_layered(&self) {
        self.slots.borrow_mut().layered = None;
    }

    // ---- read protocol -----------------------------------------

    pub fn fetch(
        &self,
        ctx: &dyn TreeContext,
        mode: FetchMode,
        check: CheckPolicy,
        silent: bool,
    ) -> Result<Option<Scalar>> {
        self.migrate_if_needed(ctx);

        let spec = self.spec.borrow().clone();
        let raw = self.fetch_raw(ctx, &spec, mode);
        let raw = raw.map(|v| self.resolve_replace_follow(ctx, &spec, v));

        let raw = match raw {
            Some(v) if Self::validates_on_fetch(mode) => match self.validate(ctx, &spec, &v, ValidateMode::Strict) {
                Ok(warnings) => {
                    for w in warnings {
                        if !silent {
                            ctx.emit_warning(&self.path, &w.message);
                        }
                    }
                    Some(v)
                }
                Err(e) => {
                    return match check {
                        CheckPolicy::Yes => Err(e),
                        _ => {
                            ctx.record_error(&self.path, e);
                            if !silent {
                                ctx.emit_warning(&self.path, "stored value no longer matches its schema");
                            }
                            Ok(None)
                        }
                    };
                }
            },
            other => other,
        };

        if raw.is_none()
            && spec.mandatory
            && matches!(
                mode,
                FetchMode::User | FetchMode::Backend | FetchMode::Standard
            )
        {
            let err = ConfigError::User {
                path: self.path.clone(),
                reason: "mandatory value is empty".to_string(),
            };
            return match check {
                CheckPolicy::Yes => Err(err),
                _ => {
                    ctx.record_error(&self.path, err);
                    if !silent {
                        ctx.emit_warning(&self.path, "mandatory value is empty");
                    }
                    Ok(None)
                }
            };
        }

        let out = match (&spec.write_as, &raw) {
            (Some((false_s, true_s)), Some(Scalar::Boolean(b))) => Some(Scalar::Str(if *b {
                true_s.clone()
            } else {
                false_s.clone()
            })),
            _ => raw,
        };
        Ok(out)
    }

    /// Raw slot accessors (`Preset`/`Default`/`UpstreamDefault`/`Layered`)
    /// introspect a single source as stored, unvalidated; every other
    /// mode resolves a value the caller will actually use, so a value
    /// a schema update has since invalidated must not surface there.
    fn validates_on_fetch(mode: FetchMode) -> bool {
        !matches!(
            mode,
            FetchMode::Preset | FetchMode::Default | FetchMode::UpstreamDefault | FetchMode::Layered
        )
    }

    pub fn has_data(&self, ctx: &dyn TreeContext) -> bool {
        let spec = self.spec.borrow().clone();
        self.fetch_raw(ctx, &spec, FetchMode::Custom).is_some()
    }

    fn fetch_raw(&self, ctx: &dyn TreeContext, spec: &ValueSpec, mode: FetchMode) -> Option<Scalar> {
        let slots = self.slots.borrow();
        let computed = self.compute_value(ctx, spec);
        match mode {
            FetchMode::Backend => slots
                .user
                .clone()
                .or_else(|| slots.preset.clone())
                .or_else(|| computed.clone())
                .or_else(|| spec.default.clone()),
            FetchMode::User | FetchMode::AllowUndef => slots
                .user
                .clone()
                .or_else(|| slots.preset.clone())
                .or_else(|| computed.clone())
                .or_else(|| slots.layered.clone())
                .or_else(|| spec.default.clone())
                .or_else(|| spec.upstream_default.clone()),
            FetchMode::Custom => {
                let standard = Self::standard_value(spec, &slots, computed.clone());
                match (&slots.user, &standard) {
                    (Some(u), Some(s)) if u == s => None,
                    (Some(u), _) => Some(u.clone()),
                    (None, _) => None,
                }
            }
            FetchMode::Standard => Self::standard_value(spec, &slots, computed),
            FetchMode::Preset => slots.preset.clone(),
            FetchMode::Default => spec.default.clone(),
            FetchMode::UpstreamDefault => spec.upstream_default.clone(),
            FetchMode::Layered => slots.layered.clone(),
            FetchMode::NonUpstreamDefault => slots
                .user
                .clone()
                .or_else(|| slots.preset.clone())
                .or_else(|| computed.clone())
                .or_else(|| slots.layered.clone())
                .or_else(|| spec.default.clone()),
        }
    }

    fn standard_value(spec: &ValueSpec, slots: &ValueSlots, computed: Option<Scalar>) -> Option<Scalar> {
        slots
            .preset
            .clone()
            .or(computed)
            .or_else(|| slots.layered.clone())
            .or_else(|| spec.default.clone())
            .or_else(|| spec.upstream_default.clone())
    }

    fn resolve_non_user(&self, ctx: &dyn TreeContext, spec: &ValueSpec) -> Option<Scalar> {
        let slots = self.slots.borrow();
        let computed = self.compute_value(ctx, spec);
        Self::standard_value(spec, &slots, computed)
    }

    fn compute_value(&self, ctx: &dyn TreeContext, spec: &ValueSpec) -> Option<Scalar> {
        let compute = spec.compute.as_ref()?;
        crate::expr::evaluate(&compute.formula, &compute.variables, compute.use_eval, ctx)
    }

    fn resolve_replace_follow(&self, ctx: &dyn TreeContext, spec: &ValueSpec, value: Scalar) -> Scalar {
        let path = match &spec.replace_follow {
            Some(p) => p,
            None => return value,
        };
        let lookup = format!("{path}.{}", value.as_str());
        match ctx.resolve_scalar(&lookup) {
            Some(replacement) if replacement != value => {
                ctx.record_change(
                    &self.path,
                    ChangeNote::Note(format!("replaced via {path}")),
                    false,
                );
                replacement
            }
            Some(replacement) => replacement,
            None => value,
        }
    }

    fn resolve_refer_choices(&self, ctx: &dyn TreeContext, spec_ref: &ReferSpec) -> Vec<String> {
        let path = match spec_ref {
            ReferSpec::Static(p) => p.clone(),
            ReferSpec::Computed { formula, variables } => {
                crate::expr::evaluate_text(formula, variables, ctx).unwrap_or_default()
            }
        };
        ctx.resolve_keys(&path).unwrap_or_default()
    }

    fn is_empty(v: &Scalar) -> bool {
        matches!(v, Scalar::Str(s) if s.is_empty())
    }

    fn normalize_boolean(&self, spec: &ValueSpec, v: &Scalar) -> Result<Scalar> {
        if let Scalar::Boolean(b) = v {
            return Ok(Scalar::Boolean(*b));
        }
        let (false_word, true_word) = spec
            .write_as
            .clone()
            .unwrap_or_else(|| ("false".to_string(), "true".to_string()));
        let s = v.as_str().to_lowercase();
        let truthy = ["y", "yes", "true", "on", "1", &true_word.to_lowercase()];
        let falsy = ["n", "no", "false", "off", "0", "", &false_word.to_lowercase()];
        if truthy.contains(&s.as_str()) {
            Ok(Scalar::Boolean(true))
        } else if falsy.contains(&s.as_str()) {
            Ok(Scalar::Boolean(false))
        } else {
            Err(ConfigError::WrongValue {
                path: self.path.clone(),
                reason: format!("'{}' is not a recognized boolean", v),
            })
        }
    }

    fn apply_replace(spec: &ValueSpec, v: Scalar) -> Scalar {
        let s = v.as_str();
        for (key, canonical) in &spec.replace {
            let matched = match key {
                ReplaceKey::Literal(lit) => lit == &s,
                ReplaceKey::Pattern(re) => re.is_match(&s),
            };
            if matched {
                return Scalar::Str(canonical.clone());
            }
        }
        v
    }

    // ---- validation --------------------------------------------

    fn validate(
        &self,
        ctx: &dyn TreeContext,
        spec: &ValueSpec,
        value: &Scalar,
        mode: ValidateMode,
    ) -> Result<Vec<Violation>> {
        let mut warnings = Vec::new();

        macro_rules! hard {
            ($reason:expr) => {{
                match mode {
                    ValidateMode::Strict => {
                        return Err(ConfigError::WrongValue {
                            path: self.path.clone(),
                            reason: $reason,
                        })
                    }
                    ValidateMode::CollectAll => warnings.push(Violation {
                        message: $reason,
                        fix: None,
                    }),
                }
            }};
        }

        // 1. Type check
        match spec.value_type {
            Some(ValueType::Integer) => {
                if value.as_i64().is_none() {
                    hard!(format!("'{}' is not an integer", value));
                }
            }
            Some(ValueType::Number) => {
                if value.as_f64().is_none() {
                    hard!(format!("'{}' is not a number", value));
                }
            }
            Some(ValueType::Enum) => {
                if let Some(choices) = &spec.choice {
                    if !choices.iter().any(|c| c == &value.as_str()) {
                        hard!(format!("'{}' is not one of {:?}", value, choices));
                    }
                }
            }
            Some(ValueType::Uniline) => {
                if value.as_str().contains('\n') {
                    hard!("uniline value must not contain a newline".to_string());
                }
            }
            Some(ValueType::Reference) => {
                if let Some(refer) = &spec.refer_to {
                    let choices = self.resolve_refer_choices(ctx, refer);
                    if !choices.iter().any(|c| c == &value.as_str()) {
                        hard!(format!("'{}' does not refer to a live entry", value));
                    }
                }
            }
            Some(ValueType::File) | Some(ValueType::Dir) => {
                let s = value.as_str();
                let p = std::path::Path::new(&s);
                if !p.exists() {
                    warnings.push(Violation {
                        message: format!("path '{}' does not exist", s),
                        fix: None,
                    });
                } else if spec.value_type == Some(ValueType::Dir) && !p.is_dir() {
                    warnings.push(Violation {
                        message: format!("'{}' is not a directory", s),
                        fix: None,
                    });
                } else if spec.value_type == Some(ValueType::File) && p.is_dir() {
                    warnings.push(Violation {
                        message: format!("'{}' is not a file", s),
                        fix: None,
                    });
                }
            }
            _ => {}
        }

        // 2. Bounds
        if let Some(i) = value.as_i64() {
            if let Some(Bound::Integer(lo)) = spec.min {
                if i < lo {
                    hard!(format!("{} is below minimum {}", i, lo));
                }
            }
            if let Some(Bound::Integer(hi)) = spec.max {
                if i > hi {
                    hard!(format!("{} is above maximum {}", i, hi));
                }
            }
        }
        if let Some(n) = value.as_f64() {
            if let Some(Bound::Number(lo)) = spec.min {
                if n < lo {
                    hard!(format!("{} is below minimum {}", n, lo));
                }
            }
            if let Some(Bound::Number(hi)) = spec.max {
                if n > hi {
                    hard!(format!("{} is above maximum {}", n, hi));
                }
            }
        }

        // 3. match
        if let Some(re) = &spec.matches {
            if !re.is_match(&value.as_str()) {
                hard!(format!("'{}' does not match {}", value, re.as_str()));
            }
        }

        // 4. grammar
        if let Some(g) = &spec.grammar {
            if !g.accepts(&value.as_str()) {
                hard!(format!("'{}' is not accepted by the grammar", value));
            }
        }

        // 5. warn regex sets
        for rule in &spec.warn_if_match {
            if rule.pattern.is_match(&value.as_str()) {
                warnings.push(Violation {
                    message: rule
                        .msg
                        .clone()
                        .unwrap_or_else(|| format!("matches {}", rule.pattern.as_str())),
                    fix: rule.fix.clone(),
                });
            }
        }
        for rule in &spec.warn_unless_match {
            if !rule.pattern.is_match(&value.as_str()) {
                warnings.push(Violation {
                    message: rule
                        .msg
                        .clone()
                        .unwrap_or_else(|| format!("does not match {}", rule.pattern.as_str())),
                    fix: rule.fix.clone(),
                });
            }
        }

        // 6. code assertions
        for rule in &spec.assert {
            if !(rule.predicate)(value) {
                let msg = rule
                    .msg
                    .clone()
                    .unwrap_or_else(|| format!("assert '{}' failed", rule.code));
                match mode {
                    ValidateMode::Strict => {
                        return Err(ConfigError::WrongValue {
                            path: self.path.clone(),
                            reason: msg,
                        })
                    }
                    ValidateMode::CollectAll => warnings.push(Violation {
                        message: msg,
                        fix: rule.fix.clone(),
                    }),
                }
            }
        }
        for rule in &spec.warn_if {
            if (rule.predicate)(value) {
                warnings.push(Violation {
                    message: rule.msg.clone().unwrap_or_else(|| rule.code.clone()),
                    fix: rule.fix.clone(),
                });
            }
        }
        for rule in &spec.warn_unless {
            if !(rule.predicate)(value) {
                warnings.push(Violation {
                    message: rule.msg.clone().unwrap_or_else(|| rule.code.clone()),
                    fix: rule.fix.clone(),
                });
            }
        }

        // 7. unconditional warn
        if let Some(w) = &spec.warn {
            warnings.push(Violation {
                message: w.clone(),
                fix: None,
            });
        }

        Ok(warnings)
    }

    // ---- fix protocol ------------------------------------------

    pub fn pending_fix_count(&self, ctx: &dyn TreeContext) -> usize {
        let spec = self.spec.borrow().clone();
        match self.slots.borrow().user.clone() {
            Some(v) => self
                .validate(ctx, &spec, &v, ValidateMode::CollectAll)
                .map(|vs| vs.iter().filter(|x| x.fix.is_some()).count())
                .unwrap_or(0),
            None => 0,
        }
    }

    pub fn apply_fixes(&self, ctx: &dyn TreeContext) -> Result<usize> {
        const LIMIT: usize = 20;
        let spec = self.spec.borrow().clone();
        let mut rounds = 0;
        loop {
            let current = match self.slots.borrow().user.clone() {
                Some(v) => v,
                None => return Ok(rounds),
            };
            let violations = self.validate(ctx, &spec, &current, ValidateMode::CollectAll)?;
            let fixable: Vec<&Violation> = violations.iter().filter(|v| v.fix.is_some()).collect();
            if fixable.is_empty() {
                return Ok(rounds);
            }
            if rounds >= LIMIT {
                return Err(ConfigError::Model {
                    path: self.path.clone(),
                    reason: "fix loop exceeded the 20 iteration limit".to_string(),
                });
            }
            let mut next = current.clone();
            let mut messages = Vec::new();
            for v in &fixable {
                next = v.fix.as_ref().unwrap().apply(&next);
                messages.push(v.message.clone());
            }
            rounds += 1;
            if next == current {
                // The fixes made no progress; stop rather than loop forever.
                return Ok(rounds);
            }
            {
                let mut slots = self.slots.borrow_mut();
                slots.user = Some(next);
            }
            for m in messages {
                ctx.record_change(&self.path, ChangeNote::Note(format!("applied fix: {m}")), true);
            }
        }
    }

    // ---- migration ---------------------------------------------

    fn migrate_if_needed(&self, ctx: &dyn TreeContext) {
        if self.migration_done.get() || ctx.mode().is_initial_load() {
            return;
        }
        self.migration_done.set(true);
        let spec = self.spec.borrow().clone();
        let migrate = match &spec.migrate_from {
            Some(m) => m,
            None => return,
        };
        if self.slots.borrow().user.is_some() {
            return;
        }
        let value = match crate::expr::evaluate(&migrate.formula, &migrate.variables, migrate.use_eval, ctx) {
            Some(v) => v,
            None => return,
        };
        if self.validate(ctx, &spec, &value, ValidateMode::Strict).is_err() {
            return;
        }
        {
            let mut slots = self.slots.borrow_mut();
            slots.user = Some(value);
        }
        ctx.record_change(&self.path, ChangeNote::Note("migrated value".to_string()), false);
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("slots", &self.slots.borrow())
            .finish()
    }
}
