//! Fixed-capacity FIFO

use generic_array::{ArrayLength, GenericArray};

/// First-in first-out queue holding at most `N` items, without allocation.
pub struct RingBuffer<T, N: ArrayLength<T>> {
    items: GenericArray<T, N>,
    head: usize,
    len: usize,
}

impl<T: Copy + Default, N: ArrayLength<T>> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, N: ArrayLength<T>> RingBuffer<T, N> {
    /// Empty queue.
    pub fn new() -> Self {
        Self {
            items: GenericArray::default(),
            head: 0,
            len: 0,
        }
    }

    /// Appends `item`, handing it back if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let tail = (self.head + self.len) % N::USIZE;
        self.items[tail] = item;
        self.len += 1;
        Ok(())
    }

    /// Removes the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.items[self.head];
        self.head = (self.head + 1) % N::USIZE;
        self.len -= 1;
        Some(item)
    }

    /// Oldest item, left in place.
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            Some(&self.items[self.head])
        }
    }

    /// Drops every queued item.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if another push would fail.
    pub fn is_full(&self) -> bool {
        self.len == N::USIZE
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        N::USIZE
    }
}
