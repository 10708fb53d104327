//! Scoped storage with reference-counted entries

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult};

/// Scope levels, outermost first. A scope at level `L` may only store into
/// levels `<= L` of its chain and may only be queried up to its own level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum ScopeLevel {
    Global = 0,
    Workflow = 1,
    Group = 2,
    Branch = 3,
}

/// Number of scope levels; sizes the parent table.
const LEVEL_COUNT: usize = 4;

struct EntryCell {
    value: Arc<dyn Any + Send + Sync>,
    refs: Arc<AtomicUsize>,
}

/// One storage scope.
///
/// Each scope maps integer data IDs to owned, type-erased entries, and holds
/// links to the enclosing scopes so lookups can walk outward. Entry
/// membership is synchronised by the scope; mutation of the data *inside* an
/// entry is the caller's business.
pub struct DataStorage {
    level: ScopeLevel,
    parents: RwLock<[Option<Arc<DataStorage>>; LEVEL_COUNT]>,
    entries: DashMap<i32, EntryCell>,
}

impl DataStorage {
    /// Creates a scope with no parent links.
    pub fn new(level: ScopeLevel) -> Self {
        Self {
            level,
            parents: RwLock::new([None, None, None, None]),
            entries: DashMap::new(),
        }
    }

    /// Creates a scope linked to the given enclosing scopes.
    ///
    /// Every parent must sit at a level above (outside) `level` and at its
    /// own declared level.
    pub fn with_parents(level: ScopeLevel, parents: &[Arc<DataStorage>]) -> EngineResult<Self> {
        let storage = Self::new(level);
        for parent in parents {
            storage.set_parent(parent.level(), Some(Arc::clone(parent)))?;
        }
        Ok(storage)
    }

    pub fn level(&self) -> ScopeLevel {
        self.level
    }

    /// Installs or clears the link to the enclosing scope at `level`.
    pub fn set_parent(
        &self,
        level: ScopeLevel,
        parent: Option<Arc<DataStorage>>,
    ) -> EngineResult<()> {
        if level >= self.level {
            return Err(EngineError::OutOfRange {
                what: "parent scope level",
                value: level as i64,
            });
        }
        if let Some(parent) = &parent {
            if parent.level() != level {
                return Err(EngineError::invalid_argument(
                    "parent",
                    "scope does not sit at the declared level",
                ));
            }
        }
        self.parents.write()[level as usize] = parent;
        Ok(())
    }

    /// Link to the enclosing scope at `level`, if any.
    pub fn parent(&self, level: ScopeLevel) -> Option<Arc<DataStorage>> {
        self.parents.read()[level as usize].clone()
    }

    /// Stores `value` under `id` at the requested level of the chain.
    ///
    /// Inserting an ID that already exists at that level is an error, as is a
    /// level below this scope's own.
    pub fn add<T>(&self, id: i32, value: T, level: ScopeLevel) -> EngineResult<()>
    where
        T: Send + Sync + 'static,
    {
        match level.cmp(&self.level) {
            CmpOrdering::Greater => Err(EngineError::OutOfRange {
                what: "storage level",
                value: level as i64,
            }),
            CmpOrdering::Equal => match self.entries.entry(id) {
                Entry::Occupied(_) => Err(EngineError::invalid_argument(
                    "id",
                    format!("data {id} already exists at this level"),
                )),
                Entry::Vacant(vacant) => {
                    vacant.insert(EntryCell {
                        value: Arc::new(value),
                        refs: Arc::new(AtomicUsize::new(0)),
                    });
                    Ok(())
                }
            },
            CmpOrdering::Less => match self.parent(level) {
                Some(parent) => parent.add(id, value, level),
                None => Err(EngineError::invalid_argument(
                    "level",
                    "no scope linked at the requested level",
                )),
            },
        }
    }

    /// Looks `id` up in this scope only. A hit takes a counted reference.
    ///
    /// Returns `None` when the ID is absent or holds a different type.
    pub fn get<T>(&self, id: i32) -> Option<DataRef<T>>
    where
        T: Send + Sync + 'static,
    {
        let cell = self.entries.get(&id)?;
        let value = Arc::clone(&cell.value).downcast::<T>().ok()?;
        // Incremented while the shard guard pins the cell, so a concurrent
        // remove cannot miss this reference.
        cell.refs.fetch_add(1, Ordering::AcqRel);
        Some(DataRef {
            id,
            value,
            refs: Arc::clone(&cell.refs),
        })
    }

    /// Looks `id` up in this scope, then walks the parent links outward,
    /// stopping at `max_depth`.
    pub fn find<T>(&self, max_depth: ScopeLevel, id: i32) -> EngineResult<Option<DataRef<T>>>
    where
        T: Send + Sync + 'static,
    {
        if max_depth > self.level {
            return Err(EngineError::OutOfRange {
                what: "max depth",
                value: max_depth as i64,
            });
        }
        if let Some(found) = self.get(id) {
            return Ok(Some(found));
        }
        let parents = self.parents.read();
        for level in (max_depth as usize..self.level as usize).rev() {
            if let Some(parent) = &parents[level] {
                if let Some(found) = parent.get(id) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Removes `id` from the requested level of the chain.
    ///
    /// Refused while the entry is referenced. Removing an absent ID is a
    /// no-op.
    pub fn remove(&self, id: i32, level: ScopeLevel) -> EngineResult<()> {
        match level.cmp(&self.level) {
            CmpOrdering::Greater => Err(EngineError::OutOfRange {
                what: "storage level",
                value: level as i64,
            }),
            CmpOrdering::Equal => {
                if self
                    .entries
                    .remove_if(&id, |_, cell| cell.refs.load(Ordering::Acquire) == 0)
                    .is_some()
                {
                    return Ok(());
                }
                if self.entries.contains_key(&id) {
                    Err(EngineError::invalid_operation(format!(
                        "data {id} is still referenced"
                    )))
                } else {
                    Ok(())
                }
            }
            CmpOrdering::Less => match self.parent(level) {
                Some(parent) => parent.remove(id, level),
                None => Err(EngineError::invalid_argument(
                    "level",
                    "no scope linked at the requested level",
                )),
            },
        }
    }

    /// Drops every entry of this scope, referenced or not.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries stored directly in this scope.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counted reference to a stored entry.
///
/// While any `DataRef` to an entry is alive, [`DataStorage::remove`] refuses
/// to delete it.
pub struct DataRef<T> {
    id: i32,
    value: Arc<T>,
    refs: Arc<AtomicUsize>,
}

impl<T> DataRef<T> {
    /// ID of the entry this reference points at.
    pub fn data_id(&self) -> i32 {
        self.id
    }

    /// Shared handle to the stored value.
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }
}

impl<T> Deref for DataRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Clone for DataRef<T> {
    fn clone(&self) -> Self {
        self.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            refs: Arc::clone(&self.refs),
        }
    }
}

impl<T> Drop for DataRef<T> {
    fn drop(&mut self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }
}
