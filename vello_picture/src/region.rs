// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer-rect regions and their stable stream serialization.

use bytemuck::{Pod, Zeroable};

use crate::writer::Writer;

/// Axis-aligned rectangle on the integer grid.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct IntRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl IntRect {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }
}

/// A set of pixels described as a y-then-x sorted run of non-empty rects.
///
/// The recorder does not evaluate regions; it only needs a stable byte
/// serialization for the CLIP_REGION payload: a rect count followed by four
/// signed words per rect.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Region {
    rects: Vec<IntRect>,
}

impl Region {
    /// Builds a region from rects, dropping empty ones and sorting the rest.
    pub fn from_rects(rects: impl IntoIterator<Item = IntRect>) -> Self {
        let mut rects: Vec<_> = rects.into_iter().filter(|r| !r.is_empty()).collect();
        rects.sort_by_key(|r| (r.y0, r.x0));
        Self { rects }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[IntRect] {
        &self.rects
    }

    /// Byte count [`write_to`](Self::write_to) will produce.
    pub fn size_hint(&self) -> u32 {
        4 + self.rects.len() as u32 * 16
    }

    pub fn write_to(&self, writer: &mut Writer) {
        writer.append_u32(self.rects.len() as u32);
        writer.append_bytes_padded(bytemuck::cast_slice(&self.rects));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rects_normalizes() {
        let region = Region::from_rects([
            IntRect::new(0, 10, 5, 20),
            IntRect::new(3, 3, 3, 9), // empty
            IntRect::new(0, 0, 4, 4),
        ]);
        assert_eq!(
            region.rects(),
            &[IntRect::new(0, 0, 4, 4), IntRect::new(0, 10, 5, 20)]
        );
    }

    #[test]
    fn serialization_matches_hint() {
        let region = Region::from_rects([IntRect::new(1, 2, 3, 4), IntRect::new(5, 6, 7, 8)]);
        let mut w = Writer::new();
        region.write_to(&mut w);
        assert_eq!(w.bytes_written(), region.size_hint());
        assert_eq!(w.read_u32_at(0), 2);
        assert_eq!(w.read_u32_at(4), 1);
        assert_eq!(w.read_u32_at(20), 5);
    }
}
