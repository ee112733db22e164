// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interning side tables referenced from the stream by small indices.
//!
//! All indices handed out here are 1-based; index 0 is reserved in the
//! stream to mean "absent". Insertion order is preserved so that a finished
//! picture can expose the tables as plain slices.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use peniko::kurbo::BezPath;

use crate::picture::Picture;

/// Value-deduplicating store: interning an already-present value returns its
/// existing index, so the table only grows on genuinely new values.
#[derive(Clone, Debug, Default)]
pub struct Dictionary<T> {
    index: HashMap<T, u32>,
    values: Vec<T>,
}

impl<T: Clone + Eq + Hash> Dictionary<T> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            values: Vec::new(),
        }
    }

    /// Returns the 1-based index for `value`, inserting it if new.
    pub fn intern(&mut self, value: &T) -> u32 {
        if let Some(&index) = self.index.get(value) {
            return index;
        }
        debug_assert!(self.values.len() < u32::MAX as usize - 1);
        let index = self.values.len() as u32 + 1;
        self.values.push(value.clone());
        self.index.insert(value.clone(), index);
        index
    }

    /// Looks up a previously interned value. Index 0 (absent) yields `None`.
    pub fn get(&self, index: u32) -> Option<&T> {
        index
            .checked_sub(1)
            .and_then(|i| self.values.get(i as usize))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }
}

/// Append-only path table. Paths are not value-deduplicated; every recorded
/// path gets a fresh 1-based slot.
#[derive(Clone, Debug, Default)]
pub struct PathStore {
    paths: Vec<BezPath>,
}

impl PathStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, path: &BezPath) -> u32 {
        self.paths.push(path.clone());
        self.paths.len() as u32
    }

    pub fn get(&self, index: u32) -> Option<&BezPath> {
        index.checked_sub(1).and_then(|i| self.paths.get(i as usize))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn into_paths(self) -> Vec<BezPath> {
        self.paths
    }
}

/// Nested pictures, deduplicated by allocation identity.
///
/// The store holds a strong reference for the recorder's lifetime; recording
/// the same picture again reuses the slot without taking another reference.
#[derive(Clone, Debug, Default)]
pub struct PictureStore {
    pictures: Vec<Arc<Picture>>,
}

impl PictureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, picture: &Arc<Picture>) -> u32 {
        if let Some(i) = self.pictures.iter().position(|p| Arc::ptr_eq(p, picture)) {
            return i as u32 + 1;
        }
        self.pictures.push(picture.clone());
        self.pictures.len() as u32
    }

    pub fn get(&self, index: u32) -> Option<&Arc<Picture>> {
        index
            .checked_sub(1)
            .and_then(|i| self.pictures.get(i as usize))
    }

    pub fn len(&self) -> usize {
        self.pictures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pictures.is_empty()
    }

    pub fn into_pictures(self) -> Vec<Arc<Picture>> {
        self.pictures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::Paint;
    use peniko::color::palette;

    #[test]
    fn intern_is_idempotent() {
        let mut dict = Dictionary::new();
        let red = Paint::new(palette::css::RED);
        let blue = Paint::new(palette::css::BLUE);
        assert_eq!(dict.intern(&red), 1);
        assert_eq!(dict.intern(&blue), 2);
        assert_eq!(dict.intern(&red), 1);
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn index_zero_is_absent() {
        let dict: Dictionary<Paint> = Dictionary::new();
        assert!(dict.get(0).is_none());
    }

    #[test]
    fn paths_always_append() {
        let mut store = PathStore::new();
        let path = BezPath::new();
        assert_eq!(store.append(&path), 1);
        assert_eq!(store.append(&path), 2);
        assert_eq!(store.len(), 2);
    }
}
