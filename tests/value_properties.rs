mod common;

use std::sync::Arc;

use common::RecordingContext;
use confmodel::error::CheckPolicy;
use confmodel::value::{Fix, Scalar, Value, ValueSpec, ValueType, WarnMatchRule};

fn string_spec() -> Arc<ValueSpec> {
    Arc::new(ValueSpec {
        value_type: Some(ValueType::String),
        ..Default::default()
    })
}

#[test]
fn store_then_fetch_user_round_trips() {
    let ctx = RecordingContext::new();
    let v = Value::new("name", "name", string_spec());
    v.store(&ctx, Scalar::Str("hello".to_string()), CheckPolicy::Yes, true).unwrap();
    let fetched = v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap();
    assert_eq!(fetched, Some(Scalar::Str("hello".to_string())));
}

#[test]
fn clear_restores_standard_precedence() {
    let ctx = RecordingContext::new();
    let spec = Arc::new(ValueSpec {
        value_type: Some(ValueType::String),
        default: Some(Scalar::Str("fallback".to_string())),
        ..Default::default()
    });
    let v = Value::new("name", "name", spec);
    v.store(&ctx, Scalar::Str("hello".to_string()), CheckPolicy::Yes, true).unwrap();
    v.clear(&ctx);
    let user = v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap();
    let standard = v.fetch(&ctx, confmodel::value::FetchMode::Standard, CheckPolicy::Yes, true).unwrap();
    assert_eq!(user, standard);
    assert_eq!(user, Some(Scalar::Str("fallback".to_string())));
}

#[test]
fn unstored_default_has_no_data() {
    let ctx = RecordingContext::new();
    let spec = Arc::new(ValueSpec {
        value_type: Some(ValueType::String),
        default: Some(Scalar::Str("booya".to_string())),
        ..Default::default()
    });
    let v = Value::new("name", "name", spec);
    let fetched = v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap();
    assert_eq!(fetched, Some(Scalar::Str("booya".to_string())));
    assert!(!v.has_data(&ctx));
}

#[test]
fn unstored_upstream_default_is_absent_from_custom() {
    let ctx = RecordingContext::new();
    let spec = Arc::new(ValueSpec {
        value_type: Some(ValueType::String),
        upstream_default: Some(Scalar::Str("vendor".to_string())),
        ..Default::default()
    });
    let v = Value::new("name", "name", spec);
    let user = v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap();
    assert_eq!(user, Some(Scalar::Str("vendor".to_string())));
    let custom = v.fetch(&ctx, confmodel::value::FetchMode::Custom, CheckPolicy::Yes, true).unwrap();
    assert_eq!(custom, None);
}

// Scenario 1: mandatory-with-default
#[test]
fn mandatory_with_default_change_sequencing() {
    let ctx = RecordingContext::new();
    let spec = Arc::new(ValueSpec {
        value_type: Some(ValueType::String),
        mandatory: true,
        default: Some(Scalar::Str("booya".to_string())),
        ..Default::default()
    });
    let v = Value::new("mandatory_with_default_value", "mandatory_with_default_value", spec);

    ctx.set_mode(confmodel::context::LoadMode::InitialLoad);
    v.store(&ctx, Scalar::Str("booya".to_string()), CheckPolicy::Yes, true).unwrap();
    assert_eq!(ctx.change_count(), 0);
    assert!(!v.has_data(&ctx));

    ctx.set_mode(confmodel::context::LoadMode::Normal);
    v.store(&ctx, Scalar::Str("boo".to_string()), CheckPolicy::Yes, true).unwrap();
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("boo".to_string())));
    assert_eq!(ctx.change_count(), 1);

    // Storing empty on a mandatory value falls back to the standard value
    // (here the default) rather than leaving the leaf empty.
    v.store(&ctx, Scalar::Str(String::new()), CheckPolicy::Yes, true).unwrap();
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("booya".to_string())));
    assert_eq!(ctx.change_count(), 2);
}

// Scenario 2: enum re-choice
#[test]
fn enum_schema_update_invalidates_current_value() {
    let ctx = RecordingContext::new();
    let spec = Arc::new(ValueSpec {
        value_type: Some(ValueType::Enum),
        choice: Some(vec!["A".to_string(), "B".to_string(), "C".to_string()]),
        default: Some(Scalar::Str("A".to_string())),
        ..Default::default()
    });
    let v = Value::new("enum", "enum", spec);

    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("A".to_string())));

    v.store(&ctx, Scalar::Str("B".to_string()), CheckPolicy::Yes, true).unwrap();
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("B".to_string())));
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::Custom, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("B".to_string())));
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::Standard, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("A".to_string())));

    // A schema update (e.g. re-reading a newer catalog) can change the
    // choice set and default out from under a value already stored.
    let updated = Arc::new(ValueSpec {
        value_type: Some(ValueType::Enum),
        choice: Some(vec!["F".to_string(), "G".to_string(), "H".to_string()]),
        default: None,
        ..Default::default()
    });
    v.set_spec(updated);
    // `check=skip` so the now-invalid stored value is reported rather
    // than aborting the read outright.
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Skip, true).unwrap(), None);

    v.store(&ctx, Scalar::Str("H".to_string()), CheckPolicy::Yes, true).unwrap();
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("H".to_string())));
}

// Scenario 3: warn-if-match auto-fix
#[test]
fn warn_if_match_auto_fix_applies_on_request() {
    let ctx = RecordingContext::new();
    let spec = Arc::new(ValueSpec {
        value_type: Some(ValueType::String),
        warn_if_match: vec![WarnMatchRule {
            pattern: regex::Regex::new("foo").unwrap(),
            msg: None,
            fix: Some(Fix::Uppercase),
        }],
        ..Default::default()
    });
    let v = Value::new("warns", "warns", spec);

    v.store(&ctx, Scalar::Str("foobar".to_string()), CheckPolicy::Yes, false).unwrap();
    assert_eq!(ctx.warnings.borrow().len(), 1);
    assert_eq!(v.pending_fix_count(&ctx), 1);

    let rounds = v.apply_fixes(&ctx).unwrap();
    assert_eq!(rounds, 1);
    assert_eq!(v.fetch(&ctx, confmodel::value::FetchMode::User, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Str("FOOBAR".to_string())));
}

#[test]
fn wrong_type_is_rejected_under_check_yes() {
    let ctx = RecordingContext::new();
    let spec = Arc::new(ValueSpec {
        value_type: Some(ValueType::Integer),
        ..Default::default()
    });
    let v = Value::new("count", "count", spec);
    let err = v.store(&ctx, Scalar::Str("not a number".to_string()), CheckPolicy::Yes, true);
    assert!(err.is_err());
}
