//! Type-indexed in-memory entity repository.
//!
//! Every entity lives under a global integer identity. The key space is shared
//! by all types: storing a value under an identity that currently holds an
//! entity of another type replaces it.
//!
//! Lookups are typed. `has::<T>(id)` is true only when the entity at `id` is
//! exactly a `T` (no supertype matching), and `remove::<T>(id)` leaves the entry
//! alone when it holds something else.
//!
//! # Snapshots
//!
//! The backing map is an [`im::HashMap`], so [`EntityRepository::snapshot`] is an
//! O(1) structural-sharing clone. A snapshot never observes mutations made after
//! it was taken, and entities are held behind `Arc` so a reader can never see a
//! half-written entity.
//!
//! # Example
//!
//! ```
//! use txpipe_core::repository::EntityRepository;
//!
//! #[derive(Debug, PartialEq)]
//! struct Account { balance: i64 }
//!
//! let mut repository = EntityRepository::new();
//! repository.store(1, Account { balance: 100 });
//!
//! assert!(repository.has::<Account>(1));
//! assert!(!repository.has::<String>(1));
//!
//! let snapshot = repository.snapshot();
//! repository.remove::<Account>(1);
//!
//! assert!(!repository.has::<Account>(1));
//! assert_eq!(snapshot.get::<Account>(1).map(|a| a.balance), Some(100));
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Global identity of an entity.
pub type EntityId = i64;

#[derive(Clone)]
struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    entity: Arc<dyn Any + Send + Sync>,
}

impl Entry {
    fn new<T: Any + Send + Sync>(entity: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            entity,
        }
    }

    fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.entity).downcast::<T>().ok()
    }
}

/// Mutable entity store owned by the pipeline's execute stage.
///
/// Keeps a secondary `type -> ids` index so type-scoped enumeration costs
/// O(entities of that type) rather than a full scan.
#[derive(Clone, Default)]
pub struct EntityRepository {
    data: im::HashMap<EntityId, Entry>,
    by_type: HashMap<TypeId, HashSet<EntityId>>,
}

impl EntityRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entity` under `id`, replacing whatever entity (of any type) was there.
    pub fn store<T: Any + Send + Sync>(&mut self, id: EntityId, entity: T) {
        self.store_arc(id, Arc::new(entity));
    }

    /// Store an already shared entity under `id`.
    pub fn store_arc<T: Any + Send + Sync>(&mut self, id: EntityId, entity: Arc<T>) {
        let entry = Entry::new(entity);
        let type_id = entry.type_id;

        if let Some(previous) = self.data.insert(id, entry) {
            self.unindex(previous.type_id, id);
        }
        self.by_type.entry(type_id).or_default().insert(id);
    }

    /// Whether an entity of exactly type `T` is stored under `id`.
    #[must_use]
    pub fn has<T: Any>(&self, id: EntityId) -> bool {
        self.data.get(&id).is_some_and(Entry::is::<T>)
    }

    /// The entity stored under `id`, if it is a `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, id: EntityId) -> Option<Arc<T>> {
        self.data.get(&id).and_then(Entry::downcast::<T>)
    }

    /// Remove the entity under `id` if it is a `T`.
    ///
    /// Removing with a mismatched type is a no-op and returns `None`.
    pub fn remove<T: Any + Send + Sync>(&mut self, id: EntityId) -> Option<Arc<T>> {
        if !self.has::<T>(id) {
            return None;
        }
        let removed = self.data.remove(&id)?;
        self.unindex(removed.type_id, id);
        removed.downcast::<T>()
    }

    /// All entities whose type is exactly `T`, keyed by identity.
    #[must_use]
    pub fn entities<T: Any + Send + Sync>(&self) -> HashMap<EntityId, Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.get::<T>(*id).map(|entity| (*id, entity)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stored entities across all types
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the repository holds no entities
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Point-in-time view of the whole `identity -> entity` mapping.
    ///
    /// Used by checkpointing and replication. The view shares structure with the
    /// repository and is unaffected by later `store`/`remove` calls.
    #[must_use]
    pub fn snapshot(&self) -> RepositorySnapshot {
        RepositorySnapshot {
            data: self.data.clone(),
        }
    }

    fn unindex(&mut self, type_id: TypeId, id: EntityId) {
        if let Some(ids) = self.by_type.get_mut(&type_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_type.remove(&type_id);
            }
        }
    }
}

impl fmt::Debug for EntityRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRepository")
            .field("entities", &self.data.len())
            .field("types", &self.by_type.len())
            .finish()
    }
}

/// Immutable point-in-time view of an [`EntityRepository`].
#[derive(Clone)]
pub struct RepositorySnapshot {
    data: im::HashMap<EntityId, Entry>,
}

impl RepositorySnapshot {
    /// Number of entities captured
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the snapshot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether any entity was stored under `id`
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.data.contains_key(&id)
    }

    /// Type name of the entity under `id`
    #[must_use]
    pub fn type_name(&self, id: EntityId) -> Option<&'static str> {
        self.data.get(&id).map(|entry| entry.type_name)
    }

    /// The entity under `id`, if it is a `T`
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, id: EntityId) -> Option<Arc<T>> {
        self.data.get(&id).and_then(Entry::downcast::<T>)
    }

    /// Entities of exactly type `T` (full scan; snapshots carry no type index)
    #[must_use]
    pub fn entities<T: Any + Send + Sync>(&self) -> HashMap<EntityId, Arc<T>> {
        self.data
            .iter()
            .filter_map(|(id, entry)| entry.downcast::<T>().map(|entity| (*id, entity)))
            .collect()
    }

    /// All captured identities
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.data.keys().copied()
    }
}

impl fmt::Debug for RepositorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositorySnapshot")
            .field("entities", &self.data.len())
            .finish()
    }
}
