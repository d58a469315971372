//! Test plugging a caller-defined map into one index.

use crate::scenario_tests::helpers::{Item, handles_under};
use crate::testing::init_tracing;
use crate::{Bucket, IndexDefinition, IndexedStore, KeyMap, MapKind, StoreConfig};

/// Association list; linear, but keeps keys in first-insertion order.
struct AssocList<K, V> {
    entries: Vec<(K, V)>,
}

impl<K, V> Default for AssocList<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: PartialEq, V> KeyMap<K, V> for AssocList<K, V> {
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(position).1)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(self.entries.iter().map(|(k, v)| (k, v)))
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[test]
fn test_custom_map_backs_index() {
    init_tracing();
    let mut store = IndexedStore::builder()
        .config(StoreConfig::default().with_default_map(MapKind::BTree))
        .index(IndexDefinition::new("id", |item: &Item| item.id))
        .index(
            IndexDefinition::partial("category", |item: &Item| item.category.clone())
                .with_map::<AssocList<String, Bucket>>(),
        )
        .build()
        .expect("store");

    let z = store.insert(Item::new(1, "z")).expect("insert");
    store.insert(Item::new(2, "m")).expect("insert");
    store.insert(Item::new(3, "z")).expect("insert");

    let keys: Vec<&String> = store.keys("category").expect("keys");
    assert_eq!(keys, vec!["z", "m"]);

    store.modify(z, |item| item.category = Some("m".to_string())).expect("modify");
    assert_eq!(handles_under(&store, "category", "m").expect("lookup").len(), 2);
    assert_eq!(handles_under(&store, "category", "z").expect("lookup").len(), 1);
}
