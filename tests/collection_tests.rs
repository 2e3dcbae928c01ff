mod common;

use std::rc::Rc;
use std::sync::Arc;

use common::RecordingContext;
use confmodel::collection::{Cargo, CollectionKind, CollectionSpec, DuplicatePolicy, IdCollection, Index};
use confmodel::value::{Scalar, Value, ValueSpec, ValueType};

fn leaf_spec() -> Arc<ValueSpec> {
    Arc::new(ValueSpec {
        value_type: Some(ValueType::String),
        ..Default::default()
    })
}

fn leaf_collection(spec: CollectionSpec) -> IdCollection {
    let spec = Arc::new(spec);
    IdCollection::new("items", "items", spec, || Cargo::Leaf(Rc::new(Value::new("items", "items", leaf_spec()))))
}

#[test]
fn forbid_policy_passes_with_no_duplicates() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        duplicates: DuplicatePolicy::Forbid,
        ..Default::default()
    });
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("b".to_string())).unwrap();
    let report = c.check_content(&ctx, false);
    assert!(report.errors.is_empty());
}

#[test]
fn forbid_policy_flags_duplicates() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        duplicates: DuplicatePolicy::Forbid,
        ..Default::default()
    });
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    let report = c.check_content(&ctx, false);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(c.len(), 2); // forbid reports but doesn't remove
}

#[test]
fn suppress_policy_removes_duplicates_unconditionally() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        duplicates: DuplicatePolicy::Suppress,
        ..Default::default()
    });
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("b".to_string())).unwrap();
    // Suppress drops duplicates from the report's own accounting
    // regardless of `apply_fix`, but only `apply_fix=true` writes that
    // back to the collection's actual entries.
    let report = c.check_content(&ctx, true);
    assert!(report.errors.is_empty());
    assert_eq!(c.len(), 2);
}

#[test]
fn warn_policy_keeps_duplicates_unless_fix_applied() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        duplicates: DuplicatePolicy::Warn,
        ..Default::default()
    });
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();

    let report = c.check_content(&ctx, false);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(c.len(), 2);

    let report = c.check_content(&ctx, true);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(c.len(), 1);
}

#[test]
fn default_keys_are_populated_lazily_once() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        default_keys: vec!["alpha".to_string(), "beta".to_string()],
        ..Default::default()
    });
    assert!(c.is_empty());
    c.ensure_default_keys(&ctx).unwrap();
    let mut keys: Vec<String> = c.keys().iter().map(Index::to_string).collect();
    keys.sort();
    assert_eq!(keys, vec!["alpha".to_string(), "beta".to_string()]);

    // Once populated, a second pass is a no-op even if entries are
    // later cleared and re-queried through the same collection.
    c.push_value(&ctx, Scalar::Str("extra".to_string())).unwrap();
    c.ensure_default_keys(&ctx).unwrap();
    assert_eq!(c.len(), 3);
}

#[test]
fn max_nb_bounds_cardinality() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        max_nb: Some(2),
        ..Default::default()
    });
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("b".to_string())).unwrap();
    let err = c.push_value(&ctx, Scalar::Str("c".to_string()));
    assert!(err.is_err());
    assert_eq!(c.len(), 2);
}

#[test]
fn min_max_index_bound_list_positions() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        min_index: Some(0),
        max_index: Some(1),
        ..Default::default()
    });
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("b".to_string())).unwrap();
    // The third position (index 2) is out of bounds.
    let err = c.push_value(&ctx, Scalar::Str("c".to_string()));
    assert!(err.is_err());
}

#[test]
fn delete_and_renumber_keeps_list_indices_contiguous() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec {
        kind: Some(CollectionKind::List),
        ..Default::default()
    });
    c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("b".to_string())).unwrap();
    c.push_value(&ctx, Scalar::Str("c".to_string())).unwrap();
    assert!(c.delete(&ctx, &Index::Int(0)));
    let keys: Vec<String> = c.keys().iter().map(Index::to_string).collect();
    assert_eq!(keys, vec!["0".to_string(), "1".to_string()]);
}

#[test]
fn ensure_finds_existing_entry_by_rendered_value() {
    let ctx = RecordingContext::new();
    let c = leaf_collection(CollectionSpec::default());
    let first = c.push_value(&ctx, Scalar::Str("a".to_string())).unwrap();
    let again = c.ensure(&ctx, Scalar::Str("a".to_string())).unwrap();
    assert_eq!(first, again);
    assert_eq!(c.len(), 1);
}
