use super::*;

#[test]
fn test_set_get() {
    let bb = Blackboard::new();
    bb.set("a", 42i32).unwrap();
    assert_eq!(bb.get::<i32>("a").unwrap(), 42);
    assert_eq!(bb.get::<i64>("a").unwrap(), 42);
    assert!(matches!(bb.get::<i32>("missing"), Err(Error::Runtime(_))));
}

#[test]
fn test_stamp_increments() {
    let bb = Blackboard::new();
    bb.set("a", 1u32).unwrap();
    let first = bb.get_stamped::<u32>("a").unwrap().stamp;
    bb.set("a", 2u32).unwrap();
    let second = bb.get_stamped::<u32>("a").unwrap();
    assert_eq!(second.value, 2);
    assert_eq!(second.stamp.seq, first.seq + 1);
    assert!(second.stamp.time >= first.time);
}

#[test]
fn test_uninitialized_entry() {
    let bb = Blackboard::new();
    bb.create_entry("declared", TypeInfo::of::<i32>()).unwrap();
    let err = bb.get::<i32>("declared").unwrap_err();
    assert!(matches!(err, Error::Runtime(msg) if msg.contains("initialized")));
}

#[test]
fn test_type_is_locked_after_first_write() {
    let bb = Blackboard::new();
    bb.set("n", 10i32).unwrap();

    // A string is parsed through the entry's converter
    bb.set("n", "15".to_string()).unwrap();
    assert_eq!(bb.get::<i32>("n").unwrap(), 15);

    // A number that fits is cast
    bb.set("n", 7u8).unwrap();
    assert!(bb.get_any("n").unwrap().is::<i32>());
    assert_eq!(bb.get::<i32>("n").unwrap(), 7);

    bb.set("small", 1u8).unwrap();
    assert!(matches!(bb.set("small", 300i32), Err(Error::Logic(_))));
    assert!(bb.set("small", 100i32).is_ok());

    #[derive(Clone)]
    struct Opaque;
    assert!(matches!(bb.set("n", Opaque), Err(Error::Logic(_))));
}

#[test]
fn test_weak_entry_accepts_anything() {
    let bb = Blackboard::new();
    bb.set("w", "hello".to_string()).unwrap();
    assert!(!bb.entry_info("w").unwrap().is_strongly_typed());
    bb.set("w", 3.5f64).unwrap();
    assert_eq!(bb.get::<f64>("w").unwrap(), 3.5);
}

#[test]
fn test_redeclare_strong_type_conflict() {
    let bb = Blackboard::new();
    bb.create_entry("x", TypeInfo::of::<i32>()).unwrap();
    assert!(bb.create_entry("x", TypeInfo::of::<i32>()).is_ok());
    assert!(bb.create_entry("x", TypeInfo::any()).is_ok());
    assert!(matches!(
        bb.create_entry("x", TypeInfo::of::<String>()),
        Err(Error::Logic(_))
    ));
}

#[test]
fn test_explicit_remapping() {
    let parent = Blackboard::new();
    let child = Blackboard::create(Some(&parent));
    child.add_subtree_remapping("goal", "target");

    child.set("goal", 3i32).unwrap();
    assert_eq!(parent.get::<i32>("target").unwrap(), 3);
    assert!(parent.get_entry("goal").is_none());

    parent.set("target", 9i32).unwrap();
    assert_eq!(child.get::<i32>("goal").unwrap(), 9);
}

#[test]
fn test_auto_remapping_skips_private_keys() {
    let parent = Blackboard::new();
    let child = Blackboard::create(Some(&parent));
    child.enable_auto_remapping(true);

    parent.set("shared", 1i32).unwrap();
    parent.set("_hidden", 2i32).unwrap();
    assert_eq!(child.get::<i32>("shared").unwrap(), 1);
    assert!(child.get_entry("_hidden").is_none());

    child.set("_mine", 5i32).unwrap();
    assert!(parent.get_entry("_mine").is_none());
    child.set("fresh", 6i32).unwrap();
    assert_eq!(parent.get::<i32>("fresh").unwrap(), 6);
}

#[test]
fn test_no_remapping_means_isolation() {
    let parent = Blackboard::new();
    let child = Blackboard::create(Some(&parent));
    parent.set("value", 1i32).unwrap();
    assert!(child.get_entry("value").is_none());
    child.set("value", 2i32).unwrap();
    assert_eq!(parent.get::<i32>("value").unwrap(), 1);
}

#[test]
fn test_root_addressing() {
    let root = Blackboard::new();
    let mid = Blackboard::create(Some(&root));
    let leaf = Blackboard::create(Some(&mid));

    leaf.set("@global", 11i32).unwrap();
    assert_eq!(root.get::<i32>("global").unwrap(), 11);
    assert_eq!(mid.get::<i32>("@global").unwrap(), 11);
    assert!(leaf.root().same_scope(&root));
    assert!(leaf.parent().unwrap().same_scope(&mid));
    assert!(root.parent().is_none());
}

#[test]
fn test_missing_parent_on_remapped_create() {
    let orphan = {
        let parent = Blackboard::new();
        let child = Blackboard::create(Some(&parent));
        child.add_subtree_remapping("k", "k");
        child
    };
    assert!(matches!(
        orphan.create_entry("k", TypeInfo::any()),
        Err(Error::Runtime(_))
    ));
}

#[test]
fn test_unset_keys_clear() {
    let bb = Blackboard::new();
    bb.set("a", 1i32).unwrap();
    bb.set("b", 2i32).unwrap();
    let mut keys = bb.keys();
    keys.sort();
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    bb.unset("a");
    bb.unset("not_there");
    assert_eq!(bb.keys(), vec!["b".to_string()]);
    bb.clear();
    assert!(bb.keys().is_empty());
}

#[test]
fn test_clone_into() {
    let src = Blackboard::new();
    let dst = Blackboard::new();
    src.set("a", 1i32).unwrap();
    src.set("b", "text".to_string()).unwrap();
    dst.set("a", 100i32).unwrap();
    dst.set("stale", true).unwrap();

    let dst_a = dst.get_entry("a").unwrap();
    src.clone_into(&dst);

    assert_eq!(dst.get::<i32>("a").unwrap(), 1);
    assert_eq!(dst.get::<String>("b").unwrap(), "text");
    assert!(dst.get_entry("stale").is_none());
    // Updated in place, not replaced
    assert!(Arc::ptr_eq(&dst_a, &dst.get_entry("a").unwrap()));

    src.clone_into(&src);
    assert_eq!(src.keys().len(), 2);
}

#[test]
fn test_debug_message() {
    let parent = Blackboard::new();
    let child = Blackboard::create(Some(&parent));
    child.add_subtree_remapping("in", "out");
    child.set("_local", 1i32).unwrap();
    let msg = child.debug_message();
    assert!(msg.contains("_local (i32)"));
    assert!(msg.contains("[in] remapped to port of parent tree [out]"));
}
