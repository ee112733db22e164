// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The finished, immutable recording and its playback-facing surface.

use std::sync::Arc;

use peniko::kurbo::BezPath;
use thiserror::Error;

use crate::bitmap::Bitmap;
use crate::op::{
    header_bytes, paint_offset, peek_op_and_size, Op, SAVE_LAYER_NO_BOUNDS_SIZE,
    SAVE_LAYER_WITH_BOUNDS_SIZE, SIZE_MASK,
};
use crate::paint::Paint;
use crate::writer::{align4, RECT_BYTES, RRECT_BYTES};

/// A finished recording: the raw command stream plus the side tables its
/// commands index into. Immutable once built; playback walks the stream via
/// [`peek`](Self::peek) or [`commands`](Self::commands) and resolves indices
/// against the tables.
#[derive(Clone, Debug, Default)]
pub struct Picture {
    stream: Vec<u8>,
    paints: Vec<Paint>,
    paths: Vec<BezPath>,
    bitmaps: Vec<Bitmap>,
    pictures: Vec<Arc<Picture>>,
}

static_assertions::assert_impl_all!(Picture: Send, Sync);

/// One command's location in the stream.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Command {
    pub op: Op,
    /// Byte offset of the command header.
    pub offset: u32,
    /// Total byte count, header included.
    pub size: u32,
}

impl Picture {
    pub(crate) fn new(
        stream: Vec<u8>,
        paints: Vec<Paint>,
        paths: Vec<BezPath>,
        bitmaps: Vec<Bitmap>,
        pictures: Vec<Arc<Picture>>,
    ) -> Self {
        Self {
            stream,
            paints,
            paths,
            bitmaps,
            pictures,
        }
    }

    /// The raw command stream.
    pub fn stream(&self) -> &[u8] {
        &self.stream
    }

    pub fn paints(&self) -> &[Paint] {
        &self.paints
    }

    pub fn paths(&self) -> &[BezPath] {
        &self.paths
    }

    pub fn bitmaps(&self) -> &[Bitmap] {
        &self.bitmaps
    }

    pub fn pictures(&self) -> &[Arc<Picture>] {
        &self.pictures
    }

    /// Opcode and total size of the command at `offset`.
    pub fn peek(&self, offset: u32) -> (Op, u32) {
        peek_op_and_size(&self.stream, offset)
    }

    /// Iterates over the commands in stream order, NOOPs included.
    pub fn commands(&self) -> Commands<'_> {
        Commands {
            stream: &self.stream,
            offset: 0,
        }
    }

    /// The paint index a command carries, or `None` for paintless commands.
    /// An index of 0 means the command was recorded without a paint.
    pub fn paint_index(&self, cmd: &Command) -> Option<u32> {
        let slot = paint_offset(cmd.op, cmd.size);
        (slot != 0).then(|| peek_word(&self.stream, cmd.offset + slot))
    }

    /// Checks the structural integrity of the stream against the side
    /// tables: header alignment and size sums, known opcodes, in-range
    /// indices, and resolved clip placeholders. Never panics; intended for
    /// release builds where the recorder's debug assertions are compiled
    /// out.
    pub fn validate(&self) -> Result<(), StreamError> {
        let len = self.stream.len() as u32;
        if len % 4 != 0 {
            return Err(StreamError::UnalignedLength { length: len });
        }
        let mut offset = 0;
        while offset < len {
            let (op, size) = self.checked_peek(offset, len)?;
            let end = offset + size;
            // First payload word, past the (possibly widened) header.
            let payload = offset + header_bytes(size);
            // Extra bytes an overflowed header adds to every fixed layout.
            let wide = header_bytes(size) - 4;
            match op {
                Op::SaveLayer => self.check_save_layer(offset, size)?,
                Op::ClipRect => self.check_clip(offset, size, 8 + RECT_BYTES + wide)?,
                Op::ClipRRect => self.check_clip(offset, size, 8 + RRECT_BYTES + wide)?,
                Op::ClipPath => {
                    self.check_clip(offset, size, 12 + wide)?;
                    self.check_path_index(offset, self.payload_word(offset, size, payload)?)?;
                }
                Op::ClipRegion => {
                    let rect_count = self.payload_word(offset, size, payload)?;
                    let base = (12 + wide).saturating_add(rect_count.saturating_mul(16));
                    self.check_clip(offset, size, base)?;
                }
                Op::DrawPath => {
                    self.check_path_index(offset, self.payload_word(offset, size, payload + 4)?)?;
                }
                Op::DrawTextOnPath => {
                    let text_len = self.payload_word(offset, size, payload + 4)?;
                    let slot = payload
                        .checked_add(8_u32.saturating_add(align4(text_len)))
                        .ok_or(StreamError::BadSize { offset, size })?;
                    self.check_path_index(offset, self.payload_word(offset, size, slot)?)?;
                }
                Op::DrawBitmap
                | Op::DrawBitmapRect
                | Op::DrawBitmapMatrix
                | Op::DrawBitmapNine
                | Op::DrawSprite => {
                    let index = self.payload_word(offset, size, payload + 4)?;
                    if index as usize > self.bitmaps.len() {
                        return Err(StreamError::BadBitmapIndex { offset, index });
                    }
                }
                Op::DrawPicture => {
                    let index = self.payload_word(offset, size, payload)?;
                    if index == 0 || index as usize > self.pictures.len() {
                        return Err(StreamError::BadPictureIndex { offset, index });
                    }
                }
                _ => {}
            }
            let paint_slot = paint_offset(op, size);
            if paint_slot != 0 {
                let index = self.payload_word(offset, size, offset + paint_slot)?;
                if index as usize > self.paints.len() {
                    return Err(StreamError::BadPaintIndex { offset, index });
                }
            }
            offset = end;
        }
        debug_assert_eq!(offset, len);
        Ok(())
    }

    fn checked_peek(&self, offset: u32, len: u32) -> Result<(Op, u32), StreamError> {
        if len - offset < 4 {
            return Err(StreamError::Truncated {
                offset,
                declared: 4,
                remaining: len - offset,
            });
        }
        let word = peek_word(&self.stream, offset);
        let op = Op::from_u8((word >> 24) as u8).ok_or(StreamError::UnknownOpcode {
            offset,
            opcode: (word >> 24) as u8,
        })?;
        let mut size = word & SIZE_MASK;
        if size == SIZE_MASK {
            if len - offset < 8 {
                return Err(StreamError::Truncated {
                    offset,
                    declared: 8,
                    remaining: len - offset,
                });
            }
            size = peek_word(&self.stream, offset + 4);
        }
        if size < 4 || size % 4 != 0 {
            return Err(StreamError::BadSize { offset, size });
        }
        if size > len - offset {
            return Err(StreamError::Truncated {
                offset,
                declared: size,
                remaining: len - offset,
            });
        }
        Ok((op, size))
    }

    /// Bounds-checked read of the word at `at` within the command spanning
    /// `[offset, offset + size)`.
    fn payload_word(&self, offset: u32, size: u32, at: u32) -> Result<u32, StreamError> {
        if at % 4 == 0 && at >= offset && at.checked_add(4).is_some_and(|e| e <= offset + size) {
            Ok(peek_word(&self.stream, at))
        } else {
            Err(StreamError::BadSize { offset, size })
        }
    }

    fn check_save_layer(&self, offset: u32, size: u32) -> Result<(), StreamError> {
        if size != SAVE_LAYER_NO_BOUNDS_SIZE && size != SAVE_LAYER_WITH_BOUNDS_SIZE {
            return Err(StreamError::BadSize { offset, size });
        }
        Ok(())
    }

    /// Clip commands may or may not carry the trailing placeholder word
    /// (scopeless clips omit it); `base` is the size without it.
    fn check_clip(&self, offset: u32, size: u32, base: u32) -> Result<(), StreamError> {
        if size == base {
            return Ok(());
        }
        if size != base.saturating_add(4) {
            return Err(StreamError::BadSize { offset, size });
        }
        let slot = offset + size - 4;
        let target = peek_word(&self.stream, slot);
        if target == 0 {
            return Ok(());
        }
        let aligned = target % 4 == 0 && target < self.stream.len() as u32;
        let resolves = aligned
            && Op::from_u8((peek_word(&self.stream, target) >> 24) as u8) == Some(Op::Restore);
        if !resolves {
            return Err(StreamError::UnresolvedPlaceholder {
                offset: slot,
                target,
            });
        }
        Ok(())
    }

    fn check_path_index(&self, offset: u32, index: u32) -> Result<(), StreamError> {
        if index as usize > self.paths.len() {
            return Err(StreamError::BadPathIndex { offset, index });
        }
        Ok(())
    }
}

fn peek_word(stream: &[u8], offset: u32) -> u32 {
    let offset = offset as usize;
    bytemuck::pod_read_unaligned(&stream[offset..offset + 4])
}

/// Forward iterator over the commands of a stream.
#[derive(Clone, Debug)]
pub struct Commands<'a> {
    stream: &'a [u8],
    offset: u32,
}

impl Iterator for Commands<'_> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        if self.offset >= self.stream.len() as u32 {
            return None;
        }
        let (op, size) = peek_op_and_size(self.stream, self.offset);
        let cmd = Command {
            op,
            offset: self.offset,
            size,
        };
        self.offset += size;
        Some(cmd)
    }
}

/// Structural defects a stream can exhibit, reported by
/// [`Picture::validate`].
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamError {
    #[error("stream length {length} is not a multiple of 4")]
    UnalignedLength { length: u32 },
    #[error("command at {offset} declares {declared} bytes but only {remaining} remain")]
    Truncated {
        offset: u32,
        declared: u32,
        remaining: u32,
    },
    #[error("unknown opcode {opcode:#04x} at {offset}")]
    UnknownOpcode { offset: u32, opcode: u8 },
    #[error("command at {offset} has invalid size {size}")]
    BadSize { offset: u32, size: u32 },
    #[error("paint index {index} at {offset} is out of range")]
    BadPaintIndex { offset: u32, index: u32 },
    #[error("path index {index} at {offset} is out of range")]
    BadPathIndex { offset: u32, index: u32 },
    #[error("bitmap index {index} at {offset} is out of range")]
    BadBitmapIndex { offset: u32, index: u32 },
    #[error("picture index {index} at {offset} is out of range")]
    BadPictureIndex { offset: u32, index: u32 },
    #[error("clip placeholder at {offset} points at {target}, which is not a RESTORE header")]
    UnresolvedPlaceholder { offset: u32, target: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::pack_header;

    fn word(value: u32) -> [u8; 4] {
        value.to_ne_bytes()
    }

    fn picture_of(words: &[u32]) -> Picture {
        let mut stream = Vec::new();
        for w in words {
            stream.extend_from_slice(&word(*w));
        }
        Picture::new(stream, Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    #[test]
    fn validate_accepts_empty_stream() {
        picture_of(&[]).validate().unwrap();
    }

    #[test]
    fn validate_rejects_truncated_command() {
        let picture = picture_of(&[pack_header(Op::Save, 8)]);
        assert!(matches!(
            picture.validate(),
            Err(StreamError::Truncated { offset: 0, .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_opcode() {
        let picture = picture_of(&[(0xab_u32 << 24) | 4]);
        assert!(matches!(
            picture.validate(),
            Err(StreamError::UnknownOpcode {
                opcode: 0xab,
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_paint_index() {
        // DRAW_PAINT referencing paint 3 of an empty dictionary.
        let picture = picture_of(&[pack_header(Op::DrawPaint, 8), 3]);
        assert!(matches!(
            picture.validate(),
            Err(StreamError::BadPaintIndex { index: 3, .. })
        ));
    }

    #[test]
    fn validate_rejects_dangling_placeholder() {
        // CLIP_PATH whose placeholder points into the middle of itself
        // rather than at a RESTORE header (or 0 for "no short-circuit").
        let picture = picture_of(&[pack_header(Op::ClipPath, 16), 0, 0, 4]);
        assert!(matches!(
            picture.validate(),
            Err(StreamError::UnresolvedPlaceholder { target: 4, .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_size() {
        let picture = picture_of(&[pack_header(Op::Restore, 0)]);
        assert!(matches!(
            picture.validate(),
            Err(StreamError::BadSize { offset: 0, size: 0 })
        ));
    }
}
