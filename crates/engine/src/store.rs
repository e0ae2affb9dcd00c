use storefront_core::{Entity, EntityBody, ImageRef, LocalIdGenerator, PersistState, Record, RecordId};

use crate::config::MissingPolicy;
use crate::error::EngineError;

/// An entity taken out of the collection, with the position it held.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed<T> {
    pub position: usize,
    pub entity: Entity<T>,
}

/// Ordered in-memory collection of one entity type, newest first.
///
/// Ids are unique at all times. The store does no I/O; the sync controller
/// owns it and is its only writer.
pub struct EntityStore<T: EntityBody> {
    entities: Vec<Entity<T>>,
    ids: LocalIdGenerator,
    missing: MissingPolicy,
}

impl<T: EntityBody> EntityStore<T> {
    pub fn new(missing: MissingPolicy) -> Self {
        Self {
            entities: Vec::new(),
            ids: LocalIdGenerator::new(),
            missing,
        }
    }

    /// Prepend a record. Drafts get a fresh local id; persisted records keep
    /// theirs and replace any entity already holding it.
    pub fn insert(&mut self, record: Record<T>) -> Result<RecordId, EngineError> {
        match record {
            Record::Draft(body) => {
                let id = self.fresh_id()?;
                self.entities.insert(0, Entity::local(id, body));
                Ok(id)
            }
            Record::Persisted { id, body } => {
                self.entities.retain(|e| e.id != id);
                self.entities.insert(0, Entity::confirmed(id, body));
                Ok(id)
            }
        }
    }

    /// Replace the body of `id`, returning the previous one.
    ///
    /// A missing id is `NotFound` under `MissingPolicy::Error` and a silent
    /// `Ok(None)` under `MissingPolicy::Ignore`.
    pub fn update(&mut self, id: RecordId, body: T) -> Result<Option<T>, EngineError> {
        match self.entities.iter_mut().find(|e| e.id == id) {
            Some(entity) => Ok(Some(std::mem::replace(&mut entity.body, body))),
            None => match self.missing {
                MissingPolicy::Error => Err(EngineError::NotFound(id)),
                MissingPolicy::Ignore => Ok(None),
            },
        }
    }

    pub fn remove(&mut self, id: RecordId) -> Option<Removed<T>> {
        let position = self.position(id)?;
        let entity = self.entities.remove(position);
        Some(Removed { position, entity })
    }

    /// Put a removed entity back, as close to its old position as the
    /// collection now allows. Skipped if the id is present again.
    pub fn restore(&mut self, removed: Removed<T>) -> bool {
        if self.contains(removed.entity.id) {
            return false;
        }
        let position = removed.position.min(self.entities.len());
        self.entities.insert(position, removed.entity);
        true
    }

    pub fn replace_all(&mut self, entities: Vec<Entity<T>>) {
        let mut seen = std::collections::HashSet::with_capacity(entities.len());
        self.entities = entities.into_iter().filter(|e| seen.insert(e.id)).collect();
    }

    /// Re-key a local entity to the id the backend assigned. Any other entity
    /// already holding `server_id` is dropped first.
    pub fn confirm(&mut self, local_id: RecordId, server_id: RecordId) -> bool {
        if !self.contains(local_id) {
            return false;
        }
        if local_id != server_id {
            self.entities.retain(|e| e.id != server_id);
        }
        match self.entities.iter_mut().find(|e| e.id == local_id) {
            Some(entity) => {
                entity.id = server_id;
                entity.state = PersistState::Confirmed;
                true
            }
            None => false,
        }
    }

    /// Replace an entity's images, returning the previous list.
    pub fn set_images(&mut self, id: RecordId, images: Vec<ImageRef>) -> Option<Vec<ImageRef>> {
        let entity = self.entities.iter_mut().find(|e| e.id == id)?;
        let previous = entity.body.images();
        entity.body.set_images(images);
        Some(previous)
    }

    pub fn list(&self) -> &[Entity<T>] {
        &self.entities
    }

    pub fn get(&self, id: RecordId) -> Option<&Entity<T>> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.entities.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn position(&self, id: RecordId) -> Option<usize> {
        self.entities.iter().position(|e| e.id == id)
    }

    fn fresh_id(&mut self) -> Result<RecordId, EngineError> {
        loop {
            let id = self.ids.next_id()?;
            if !self.contains(id) {
                return Ok(id);
            }
        }
    }
}

impl<T: EntityBody> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new(MissingPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use storefront_core::Category;

    fn id(n: i64) -> RecordId {
        RecordId::new(n).unwrap()
    }

    fn persisted(n: i64, name: &str) -> Record<Category> {
        Record::Persisted {
            id: id(n),
            body: Category::new(name),
        }
    }

    #[test]
    fn drafts_get_distinct_local_ids() {
        let mut store = EntityStore::default();
        let ids: Vec<_> = (0..50)
            .map(|i| store.insert(Record::Draft(Category::new(format!("c{i}")))).unwrap())
            .collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 50);
        assert!(store.list().iter().all(|e| e.state == PersistState::Local));
        // newest first
        assert_eq!(store.list()[0].id, ids[49]);
    }

    #[test]
    fn persisted_insert_replaces_same_id() {
        let mut store = EntityStore::default();
        store.insert(persisted(3, "Kitchen")).unwrap();
        store.insert(persisted(4, "Garden")).unwrap();
        store.insert(persisted(3, "Kitchenware")).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.list()[0].body.name, "Kitchenware");
    }

    #[test]
    fn update_missing_follows_policy() {
        let mut strict = EntityStore::new(MissingPolicy::Error);
        strict.insert(persisted(1, "Kitchen")).unwrap();
        assert!(matches!(
            strict.update(id(2), Category::new("x")),
            Err(EngineError::NotFound(_))
        ));

        let mut lenient = EntityStore::new(MissingPolicy::Ignore);
        lenient.insert(persisted(1, "Kitchen")).unwrap();
        let before = lenient.list().to_vec();
        assert_eq!(lenient.update(id(2), Category::new("x")).unwrap(), None);
        assert_eq!(lenient.list(), before.as_slice());
    }

    #[test]
    fn update_returns_previous_body() {
        let mut store = EntityStore::default();
        store.insert(persisted(1, "Kitchen")).unwrap();
        let previous = store.update(id(1), Category::new("Dining")).unwrap();
        assert_eq!(previous.map(|c| c.name), Some("Kitchen".to_string()));
        assert_eq!(store.get(id(1)).unwrap().body.name, "Dining");
    }

    #[test]
    fn remove_and_restore_keep_position() {
        let mut store = EntityStore::default();
        for (n, name) in [(1, "a"), (2, "b"), (3, "c")] {
            store.insert(persisted(n, name)).unwrap();
        }
        let removed = store.remove(id(2)).unwrap();
        assert_eq!(removed.position, 1);
        assert!(store.remove(id(2)).is_none());
        assert!(store.restore(removed.clone()));
        let order: Vec<i64> = store.list().iter().map(|e| e.id.get()).collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert!(!store.restore(removed));
    }

    #[test]
    fn confirm_rekeys_without_duplicating() {
        let mut store = EntityStore::default();
        let local = store.insert(Record::Draft(Category::new("Toys"))).unwrap();
        store.insert(persisted(9, "stale")).unwrap();
        assert!(store.confirm(local, id(9)));
        assert_eq!(store.len(), 1);
        let entity = store.get(id(9)).unwrap();
        assert_eq!(entity.body.name, "Toys");
        assert!(entity.is_confirmed());
        assert!(!store.contains(local));
        assert!(!store.confirm(local, id(10)));
    }

    #[test]
    fn replace_all_drops_duplicate_ids() {
        let mut store = EntityStore::default();
        store.insert(Record::Draft(Category::new("old"))).unwrap();
        store.replace_all(vec![
            Entity::confirmed(id(1), Category::new("a")),
            Entity::confirmed(id(1), Category::new("b")),
            Entity::confirmed(id(2), Category::new("c")),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(id(1)).unwrap().body.name, "a");
    }
}
