// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Append-only, 4-byte-aligned byte buffer backing the command stream.

use peniko::kurbo::{Affine, Point, Rect, RoundedRect};

/// Serialized byte width of a rectangle (4 f32 words).
pub(crate) const RECT_BYTES: u32 = 16;
/// Serialized byte width of a rounded rectangle (rect plus 4 corner radii).
pub(crate) const RRECT_BYTES: u32 = 32;
/// Serialized byte width of an affine transform (6 f32 coefficients).
pub(crate) const AFFINE_BYTES: u32 = 24;
/// Serialized byte width of a point (2 f32 words).
pub(crate) const POINT_BYTES: u32 = 8;

/// Rounds `n` up to the next multiple of 4.
pub(crate) const fn align4(n: u32) -> u32 {
    (n + 3) & !3
}

/// Growable byte buffer that only ever appends whole 32-bit words.
///
/// Offsets are byte offsets from the start of the buffer and are always
/// multiples of 4; violating that is a logic bug in the caller and trips a
/// debug assertion. Previously written words can be patched in place with
/// [`write_u32_at`](Self::write_u32_at), and the tail can be discarded with
/// [`rewind_to`](Self::rewind_to).
#[derive(Clone, Default, Debug)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far. Always a multiple of 4.
    pub fn bytes_written(&self) -> u32 {
        self.buf.len() as u32
    }

    /// The written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, returning the underlying buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn append_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(bytemuck::bytes_of(&value));
    }

    pub fn append_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(bytemuck::bytes_of(&value));
    }

    pub fn append_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(bytemuck::bytes_of(&value));
    }

    /// Appends raw bytes, zero-padding up to the next word boundary.
    pub fn append_bytes_padded(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        let pad = align4(bytes.len() as u32) as usize - bytes.len();
        self.buf.extend_from_slice(&[0; 4][..pad]);
    }

    /// Appends a length-prefixed, NUL-terminated string, padded to a word
    /// boundary. Occupies `4 + align4(len + 1)` bytes.
    pub fn append_str(&mut self, s: &str) {
        self.append_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        let padded = align4(s.len() as u32 + 1) as usize - s.len();
        self.buf.extend_from_slice(&[0; 4][..padded]);
    }

    pub fn append_point(&mut self, p: Point) {
        self.append_f32(p.x as f32);
        self.append_f32(p.y as f32);
    }

    pub fn append_rect(&mut self, r: Rect) {
        self.append_f32(r.x0 as f32);
        self.append_f32(r.y0 as f32);
        self.append_f32(r.x1 as f32);
        self.append_f32(r.y1 as f32);
    }

    pub fn append_rounded_rect(&mut self, rr: RoundedRect) {
        self.append_rect(rr.rect());
        let radii = rr.radii();
        self.append_f32(radii.top_left as f32);
        self.append_f32(radii.top_right as f32);
        self.append_f32(radii.bottom_right as f32);
        self.append_f32(radii.bottom_left as f32);
    }

    pub fn append_affine(&mut self, transform: Affine) {
        for coeff in transform.as_coeffs() {
            self.append_f32(coeff as f32);
        }
    }

    /// Reads the word at `offset`.
    pub fn read_u32_at(&self, offset: u32) -> u32 {
        debug_assert_eq!(offset % 4, 0, "unaligned stream read");
        let offset = offset as usize;
        bytemuck::pod_read_unaligned(&self.buf[offset..offset + 4])
    }

    /// Overwrites the word at `offset`, which must already have been written.
    pub fn write_u32_at(&mut self, offset: u32, value: u32) {
        debug_assert_eq!(offset % 4, 0, "unaligned stream write");
        let offset = offset as usize;
        self.buf[offset..offset + 4].copy_from_slice(bytemuck::bytes_of(&value));
    }

    /// Truncates the buffer back to `offset`, discarding everything after it.
    pub fn rewind_to(&mut self, offset: u32) {
        debug_assert_eq!(offset % 4, 0, "unaligned rewind");
        debug_assert!(offset <= self.bytes_written());
        self.buf.truncate(offset as usize);
    }
}
