//! Fixed-capacity ring with overwrite-oldest semantics.
//!
//! Logical index 0 is always the oldest item. Capacity is decided at
//! construction and never changes.

use crate::StorageError;

/// Fixed-capacity ring registry
#[derive(Debug, Clone)]
pub struct RingRegistry<T> {
    slots: Box<[Option<T>]>,
    oldest: usize,
    len: usize,
}

impl<T> RingRegistry<T> {
    /// Create an empty ring holding at most `capacity` items
    pub fn new(capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 {
            return Err(StorageError::ZeroCapacity);
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            oldest: 0,
            len: 0,
        })
    }

    /// Maximum number of items
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the next `put` will overwrite
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Remaining room before overwriting starts
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    fn slot(&self, index: usize) -> usize {
        (self.oldest + index) % self.capacity()
    }

    /// Store an item. When full, the oldest item is overwritten and returned.
    pub fn put(&mut self, item: T) -> Option<T> {
        if self.is_full() {
            let evicted = self.slots[self.oldest].replace(item);
            self.oldest = (self.oldest + 1) % self.capacity();
            evicted
        } else {
            let pos = self.slot(self.len);
            self.slots[pos] = Some(item);
            self.len += 1;
            None
        }
    }

    /// Replace the item at a logical index in place, returning the old one
    pub fn put_at(&mut self, index: usize, item: T) -> Result<T, StorageError> {
        self.check(index)?;
        let pos = self.slot(index);
        self.slots[pos]
            .replace(item)
            .ok_or(StorageError::IndexOutOfRange {
                index,
                len: self.len,
            })
    }

    /// Remove the item at a logical index, shifting newer items down by one
    pub fn remove_at(&mut self, index: usize) -> Result<T, StorageError> {
        self.check(index)?;
        let pos = self.slot(index);
        let removed = self.slots[pos].take();

        for i in index..self.len - 1 {
            let next = self.slot(i + 1);
            let cur = self.slot(i);
            self.slots[cur] = self.slots[next].take();
        }
        self.len -= 1;
        if self.len == 0 {
            self.oldest = 0;
        }

        removed.ok_or(StorageError::IndexOutOfRange {
            index,
            len: self.len + 1,
        })
    }

    /// Remove and return the oldest item
    pub fn pop_oldest(&mut self) -> Result<T, StorageError> {
        if self.is_empty() {
            return Err(StorageError::Empty);
        }
        self.remove_at(0)
    }

    /// Item at a logical index
    pub fn get_at(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[self.slot(index)].as_ref()
    }

    /// Mutable item at a logical index
    pub fn get_at_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let pos = self.slot(index);
        self.slots[pos].as_mut()
    }

    /// Most recently stored item
    pub fn newest(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get_at(i))
    }

    /// Logical index of the first item matching `pred`
    pub fn position<P>(&self, mut pred: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().position(|item| pred(item))
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.slots[self.slot(i)].as_ref())
    }

    /// Drop every item
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.oldest = 0;
        self.len = 0;
    }

    fn check(&self, index: usize) -> Result<(), StorageError> {
        if index >= self.len {
            return Err(StorageError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }
}

impl<T: PartialEq> RingRegistry<T> {
    /// Whether an equal item is stored
    pub fn contains(&self, item: &T) -> bool {
        self.iter().any(|stored| stored == item)
    }
}

impl<T: Clone> RingRegistry<T> {
    /// Copy the items out, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}
