use crate::kdtree::types::KdTreeError;
use std::ops::Index;

/// Key of an item inside an [`Arena`]
pub(crate) type ItemKey = u32;

///####################################################################################
/// Arena
///####################################################################################

/// Append-only contiguous storage addressed by index keys.
/// Items never move relative to their keys, so keys stay valid when the buffer grows or
/// when the whole arena is copied into or out of a byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Arena<T> {
    buffer: Vec<T>,
    label: &'static str,
}

impl<T> Arena<T> {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            buffer: Vec::new(),
            label,
        }
    }

    pub(crate) fn from_vec(label: &'static str, buffer: Vec<T>) -> Self {
        Self { buffer, label }
    }

    /// Makes room for at least `additional` more items, reporting allocation failure as an error
    pub(crate) fn reserve(&mut self, additional: usize) -> Result<(), KdTreeError> {
        self.buffer
            .try_reserve(additional)
            .map_err(|_| KdTreeError::ResourceExhausted(self.label))
    }

    /// Appends the item and returns with its key; capacity grows by doubling
    pub(crate) fn push(&mut self, item: T) -> Result<ItemKey, KdTreeError> {
        if self.buffer.len() >= ItemKey::MAX as usize {
            return Err(KdTreeError::ResourceExhausted(self.label));
        }
        if self.buffer.len() == self.buffer.capacity() {
            self.reserve(self.buffer.len().max(8))?;
        }
        self.buffer.push(item);
        Ok((self.buffer.len() - 1) as ItemKey)
    }

    pub(crate) fn extend_from_slice(&mut self, items: &[T]) -> Result<(), KdTreeError>
    where
        T: Clone,
    {
        if self.buffer.len() + items.len() > ItemKey::MAX as usize {
            return Err(KdTreeError::ResourceExhausted(self.label));
        }
        self.reserve(items.len())?;
        self.buffer.extend_from_slice(items);
        Ok(())
    }

    pub(crate) fn get(&self, key: ItemKey) -> &T {
        debug_assert!(self.key_is_valid(key));
        &self.buffer[key as usize]
    }

    pub(crate) fn get_mut(&mut self, key: ItemKey) -> &mut T {
        debug_assert!(self.key_is_valid(key));
        &mut self.buffer[key as usize]
    }

    pub(crate) fn key_is_valid(&self, key: ItemKey) -> bool {
        (key as usize) < self.buffer.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.buffer
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, T> {
        self.buffer.iter()
    }
}

impl<T> Index<ItemKey> for Arena<T> {
    type Output = T;

    fn index(&self, key: ItemKey) -> &T {
        self.get(key)
    }
}
