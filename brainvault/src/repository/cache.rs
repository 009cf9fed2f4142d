//! Local list cache
//!
//! Every view keeps the last fetched list in a `LocalCache` and applies
//! remote results to it through these methods, so reconciliation after
//! create, update, toggle and delete is the same for every entity.

use super::Record;

/// Last known list of one owner's rows
#[derive(Debug, Clone)]
pub struct LocalCache<T> {
    owner: Option<String>,
    items: Vec<T>,
    loaded: bool,
}

impl<T> Default for LocalCache<T> {
    fn default() -> Self {
        Self {
            owner: None,
            items: Vec::new(),
            loaded: false,
        }
    }
}

impl<T: Record> LocalCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// User the cached rows belong to; `None` for public listings
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// True once a list has been applied since the last `clear`
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Replace the contents with a freshly fetched list
    pub fn apply_list(&mut self, owner: Option<&str>, items: Vec<T>) {
        self.owner = owner.map(str::to_string);
        self.items = items;
        self.loaded = true;
    }

    /// Newly created rows sort first in every listing
    pub fn insert_front(&mut self, item: T) {
        self.items.retain(|existing| existing.id() != item.id());
        self.items.insert(0, item);
    }

    /// Swap in the server's copy of a row. Returns false when absent.
    pub fn replace(&mut self, item: T) -> bool {
        match self.items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    /// Apply a local edit mirroring a successful partial update
    pub fn patch<F>(&mut self, id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.items.iter_mut().find(|item| item.id() == id) {
            Some(item) => {
                edit(item);
                true
            }
            None => false,
        }
    }

    /// Move a row to the front, e.g. after it was just updated
    pub fn promote(&mut self, id: &str) {
        if let Some(pos) = self.items.iter().position(|item| item.id() == id) {
            let item = self.items.remove(pos);
            self.items.insert(0, item);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        let pos = self.items.iter().position(|item| item.id() == id)?;
        Some(self.items.remove(pos))
    }

    /// Drop everything, including the owner; the next view is "not loaded"
    pub fn clear(&mut self) {
        self.owner = None;
        self.items.clear();
        self.loaded = false;
    }
}
