use std::rc::Rc;

use confmodel::catalog::Catalog;
use confmodel::error::CheckPolicy;
use confmodel::instance::{Instance, Resolved};
use confmodel::loader::run_against;
use confmodel::value::{FetchMode, Scalar};

fn catalog_toml() -> &'static str {
    r#"
        [[classes]]
        name = "hash_node"

        [[classes.elements]]
        name = "foo"
        type = "leaf"
        value_type = "string"

        [[classes.elements]]
        name = "bar"
        type = "leaf"
        value_type = "string"

        [[classes]]
        name = "std_entry"

        [[classes.elements]]
        name = "DX"
        type = "leaf"
        value_type = "string"

        [[classes.elements]]
        name = "int_v"
        type = "leaf"
        value_type = "integer"

        [[classes]]
        name = "root"

        [[classes.elements]]
        name = "plain_hash"
        type = "hash"

        [[classes.elements]]
        name = "bounded_list"
        type = "list"

        [[classes.elements]]
        name = "hash_of_nodes"
        type = "hash"
        cargo = "node"
        cargo_class = "hash_node"

        [[classes.elements]]
        name = "std_id"
        type = "hash"
        cargo = "node"
        cargo_class = "std_entry"

        [[classes.elements]]
        name = "boolean_with_write_as"
        type = "leaf"
        value_type = "boolean"
        write_as = ["false", "true"]
        default = "true"
    "#
}

fn build_instance() -> Instance {
    let catalog = Rc::new(Catalog::from_toml(catalog_toml()).unwrap());
    Instance::new(catalog, "root", "/tmp").unwrap()
}

fn leaf_str(instance: &Instance, path: &str) -> Option<String> {
    match instance.resolve(path)? {
        Resolved::Leaf(v) => v
            .fetch(instance, FetchMode::User, CheckPolicy::Yes, true)
            .unwrap()
            .map(|s| s.as_str()),
        _ => None,
    }
}

// Scenario 4: a hash of leaves, a bounded list and a hash of nodes, all
// populated by one program.
#[test]
fn loader_populates_hashes_list_and_nested_nodes() {
    let instance = build_instance();
    let root = instance.root();
    run_against(
        root.clone(),
        r#"plain_hash:foo=boo bounded_list=foo,bar,baz hash_of_nodes:"foo node" foo="in foo node" - hash_of_nodes:"bar node" bar="in bar node""#,
        &instance,
        CheckPolicy::Yes,
    )
    .unwrap();

    assert_eq!(leaf_str(&instance, "plain_hash.foo"), Some("boo".to_string()));

    match instance.resolve("bounded_list").unwrap() {
        Resolved::Collection(c) => {
            let values: Vec<String> = c
                .keys()
                .iter()
                .map(|k| {
                    c.get(k)
                        .and_then(|cargo| cargo.as_leaf().cloned())
                        .and_then(|v| v.fetch(&instance, FetchMode::User, CheckPolicy::Yes, true).ok().flatten())
                        .map(|s| s.as_str())
                        .unwrap()
                })
                .collect();
            assert_eq!(values, vec!["foo".to_string(), "bar".to_string(), "baz".to_string()]);
        }
        _ => panic!("expected a collection"),
    }

    assert_eq!(leaf_str(&instance, "hash_of_nodes.foo node.foo"), Some("in foo node".to_string()));
    assert_eq!(leaf_str(&instance, "hash_of_nodes.bar node.bar"), Some("in bar node".to_string()));
    // The "-" between the two hash_of_nodes entries only popped back to
    // the root, it never touched the other entry's fields.
    assert_eq!(leaf_str(&instance, "hash_of_nodes.foo node.bar"), None);
}

// Scenario 5: a regex loop over every entry key sets both fields...
#[test]
fn regex_loop_sets_every_matching_entry() {
    let instance = build_instance();
    let root = instance.root();
    run_against(root.clone(), "std_id:foo - std_id:bar", &instance, CheckPolicy::Yes).unwrap();

    run_against(root.clone(), r"std_id:~/^\w+$/ DX=Bv int_v=9", &instance, CheckPolicy::Yes).unwrap();

    for key in ["foo", "bar"] {
        assert_eq!(leaf_str(&instance, &format!("std_id.{key}.DX")), Some("Bv".to_string()));
        match instance.resolve(&format!("std_id.{key}.int_v")).unwrap() {
            Resolved::Leaf(v) => {
                assert_eq!(v.fetch(&instance, FetchMode::User, CheckPolicy::Yes, true).unwrap(), Some(Scalar::Integer(9)));
            }
            _ => panic!("expected a leaf"),
        }
    }
}

// ...but a bare `-` in the middle confines the loop's tail to whatever
// ran before it, since it pops back past the entry node the loop
// pinned and the rest of the tail is abandoned for that iteration.
#[test]
fn regex_loop_tail_stops_at_a_bare_dash() {
    let instance = build_instance();
    let root = instance.root();
    run_against(root.clone(), "std_id:foo - std_id:bar", &instance, CheckPolicy::Yes).unwrap();

    run_against(root.clone(), r"std_id:~/^\w+$/ DX=Bv - int_v=9", &instance, CheckPolicy::Yes).unwrap();

    for key in ["foo", "bar"] {
        assert_eq!(leaf_str(&instance, &format!("std_id.{key}.DX")), Some("Bv".to_string()));
        assert_eq!(leaf_str(&instance, &format!("std_id.{key}.int_v")), None);
    }
}

// Scenario 6: storing the value a write_as boolean already holds is a
// no-op, whether or not it happens during initial load.
#[test]
fn boolean_store_of_the_current_value_is_a_no_op() {
    let instance = build_instance();
    let root = instance.root();

    instance.initial_load_start();
    run_against(root.clone(), "boolean_with_write_as=true", &instance, CheckPolicy::Yes).unwrap();
    instance.initial_load_stop();
    // Initial load never logs changes regardless of whether the store
    // actually changed anything.
    assert!(instance.list_changes().is_empty());
    assert!(!instance.needs_save());

    run_against(root.clone(), "boolean_with_write_as=true", &instance, CheckPolicy::Yes).unwrap();
    // Same value as already held: no change event even outside initial load.
    assert!(instance.list_changes().is_empty());
    assert!(!instance.needs_save());

    run_against(root.clone(), "boolean_with_write_as=false", &instance, CheckPolicy::Yes).unwrap();
    assert_eq!(instance.list_changes().len(), 1);
    assert!(instance.needs_save());
}

// Universal invariant: running the same program twice in initial-load
// mode leaves the change log and needs_save untouched both times.
#[test]
fn initial_load_mode_is_idempotent_on_the_change_log() {
    let instance = build_instance();
    let root = instance.root();

    instance.initial_load_start();
    run_against(root.clone(), "plain_hash:foo=boo bounded_list=a,b,c", &instance, CheckPolicy::Yes).unwrap();
    assert!(instance.list_changes().is_empty());
    assert!(!instance.needs_save());

    run_against(root.clone(), "plain_hash:foo=boo bounded_list=a,b,c", &instance, CheckPolicy::Yes).unwrap();
    assert!(instance.list_changes().is_empty());
    assert!(!instance.needs_save());
    instance.initial_load_stop();

    assert_eq!(leaf_str(&instance, "plain_hash.foo"), Some("boo".to_string()));
}

// Universal invariant: dumping a materialized tree and running that
// dump as a program against a fresh instance of the same catalog
// reproduces the same content, up to element order.
#[test]
fn dump_then_load_round_trips_content() {
    let source = build_instance();
    let source_root = source.root();
    run_against(
        source_root.clone(),
        r#"plain_hash:foo=boo bounded_list=foo,bar,baz hash_of_nodes:"foo node" foo="in foo node" - hash_of_nodes:"bar node" bar="in bar node""#,
        &source,
        CheckPolicy::Yes,
    )
    .unwrap();

    let program = confmodel::dump::dump(&source_root, &source);

    let target = build_instance();
    let target_root = target.root();
    run_against(target_root.clone(), &program, &target, CheckPolicy::Yes).unwrap();

    assert_eq!(leaf_str(&target, "plain_hash.foo"), Some("boo".to_string()));
    assert_eq!(leaf_str(&target, "hash_of_nodes.foo node.foo"), Some("in foo node".to_string()));
    assert_eq!(leaf_str(&target, "hash_of_nodes.bar node.bar"), Some("in bar node".to_string()));
    match target.resolve("bounded_list").unwrap() {
        Resolved::Collection(c) => assert_eq!(c.len(), 3),
        _ => panic!("expected a collection"),
    }

    // Dumping the target now reproduces the same program byte for byte,
    // since both trees hold identical content and dump's iteration
    // order is sorted rather than insertion-dependent.
    assert_eq!(confmodel::dump::dump(&target_root, &target), program);
}
