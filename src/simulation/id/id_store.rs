use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::simulation::id::serializable_type::StableTypeId;
use crate::simulation::id::Id;

#[derive(Debug)]
pub struct UntypedId {
    pub(crate) internal: u64,
    pub(crate) external: String,
}

impl UntypedId {
    pub(crate) fn new(internal: u64, external: String) -> Self {
        Self { internal, external }
    }
}

/// All ids of one type. The vec is indexed by the internal id, the mapping resolves external ids.
#[derive(Debug, Default)]
struct TypedIds {
    ids: Vec<Arc<UntypedId>>,
    mapping: HashMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct IdStore {
    types: DashMap<u64, TypedIds>,
}

/// Cache for ids. All methods are public, so that they can be used from mod.rs. The module doesn't
/// export this module, so that everything is kept package private
impl IdStore {
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
        }
    }

    fn create_id_with_type_id(&self, id: &str, type_id: u64) -> Arc<UntypedId> {
        // The entry guard locks the shard of this type. Lookup and insert happen under the same
        // guard, so that two threads creating the same external id end up with the same internal id.
        let mut typed = self.types.entry(type_id).or_default();

        if let Some(internal) = typed.mapping.get(id) {
            return typed.ids[*internal as usize].clone();
        }

        let next_internal = typed.ids.len() as u64;
        let next_id = Arc::new(UntypedId::new(next_internal, String::from(id)));
        typed.ids.push(next_id.clone());
        typed.mapping.insert(String::from(id), next_internal);

        next_id
    }

    pub(crate) fn create_id<T: StableTypeId + 'static>(&self, id: &str) -> Id<T> {
        let type_id = T::stable_type_id();
        Id::new(self.create_id_with_type_id(id, type_id))
    }

    pub(crate) fn get<T: StableTypeId + 'static>(&self, internal: u64) -> Id<T> {
        let type_id = T::stable_type_id();
        let typed = self.types.get(&type_id).unwrap_or_else(|| {
            panic!("No ids for type {type_id:?}. Use Id::create::<T>(...) to create ids")
        });

        let untyped_id = typed
            .ids
            .get(internal as usize)
            .unwrap_or_else(|| panic!("No id found for internal {internal}"))
            .clone();
        Id::new(untyped_id)
    }

    pub(crate) fn try_get_from_ext<T: StableTypeId + 'static>(
        &self,
        external: &str,
    ) -> Option<Id<T>> {
        let type_id = T::stable_type_id();
        let typed = self.types.get(&type_id)?;
        let internal = typed.mapping.get(external)?;
        Some(Id::new(typed.ids[*internal as usize].clone()))
    }

    pub(crate) fn get_from_ext<T: StableTypeId + 'static>(&self, external: &str) -> Id<T> {
        self.try_get_from_ext(external).unwrap_or_else(|| {
            panic!(
                "Could not find id for external id: {external}. Use Id::create::<T>(...) to create ids."
            )
        })
    }

    #[cfg(test)]
    pub(crate) fn len<T: StableTypeId + 'static>(&self) -> usize {
        self.types
            .get(&T::stable_type_id())
            .map(|typed| typed.ids.len())
            .unwrap_or(0)
    }

    #[allow(dead_code)] // only used with test_utils
    pub(crate) fn reset(&self) {
        self.types.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::simulation::id::id_store::IdStore;
    use crate::simulation::id::Id;
    use crate::simulation::network::Link;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn create_and_resolve() {
        let store = IdStore::new();
        let id: Id<Link> = store.create_id("link-1");
        let other: Id<Link> = store.create_id("link-2");

        assert_eq!(0, id.internal());
        assert_eq!(1, other.internal());
        assert_eq!(id, store.get_from_ext("link-1"));
        assert_eq!(other, store.get(1));
        assert!(store.try_get_from_ext::<Link>("unknown").is_none());
        assert_eq!(2, store.len::<Link>());
    }

    #[test]
    fn concurrent_creation_yields_one_internal_id() {
        let store = Arc::new(IdStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|i| store.create_id::<Link>(&format!("link-{i}")).internal())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert_eq!(&results[0], r);
        }
        assert_eq!(100, store.len::<Link>());
    }

    #[test]
    fn reset() {
        let store = IdStore::new();
        let _: Id<Link> = store.create_id("link-1");
        store.reset();
        assert_eq!(0, store.len::<Link>());
    }
}
