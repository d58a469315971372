//! Test that a removed object disappears from every index.

use crate::StoreError;
use crate::scenario_tests::helpers::{Item, handles_under, item_store};

#[test]
fn test_removed_object_not_found_anywhere() {
    let mut store = item_store();
    let keep = store.insert(Item::new(1, "a")).expect("insert");
    let gone = store.insert(Item::new(2, "a")).expect("insert");

    store.remove(gone).expect("remove");

    assert!(store.lookup("id", &2u32).expect("lookup").is_empty());
    assert_eq!(handles_under(&store, "category", "a").expect("lookup"), vec![keep]);
    assert!(store.iter().all(|(handle, _)| handle != gone));
    assert_eq!(store.remove(gone).unwrap_err(), StoreError::NotFound(gone));
}

#[test]
fn test_last_holder_removal_drops_bucket() {
    let mut store = item_store();
    let handle = store.insert(Item::new(1, "solo")).expect("insert");
    store.remove(handle).expect("remove");

    assert!(!store.contains_key("category", &"solo".to_string()).expect("contains"));
    assert!(store.keys::<String>("category").expect("keys").is_empty());
}

#[test]
fn test_remove_after_unindexed_mutation() {
    let mut store = item_store();
    let handle = store.insert(Item::new(1, "a")).expect("insert");
    if let Some(item) = store.get_mut(handle) {
        item.category = None;
        item.id = 99;
    }

    // Removal works from recorded keys even though the object no longer
    // yields a category at all.
    let removed = store.remove(handle).expect("remove");
    assert_eq!(removed.id, 99);
    assert!(store.keys::<u32>("id").expect("keys").is_empty());
    assert!(store.keys::<String>("category").expect("keys").is_empty());
}
