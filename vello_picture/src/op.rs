// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Opcodes, the command header codec, and per-op paint slot offsets.
//!
//! Every command in the stream starts at a 4-byte-aligned offset with a
//! header word packing the opcode into the high 8 bits and the command's
//! total byte count (header included) into the low 24. A count that does not
//! fit 24 bits is stored as the [`SIZE_MASK`] sentinel with the real count in
//! an extra word directly after the header.

use crate::writer::Writer;

/// Low-24-bit mask; also the in-header sentinel for an overflowed size.
pub const SIZE_MASK: u32 = 0x00ff_ffff;

/// Byte size of a SAVE command (header + flags).
pub(crate) const SAVE_SIZE: u32 = 8;
/// Byte size of a SAVE_LAYER command without bounds.
pub(crate) const SAVE_LAYER_NO_BOUNDS_SIZE: u32 = 16;
/// Byte size of a SAVE_LAYER command carrying a bounds rect.
pub(crate) const SAVE_LAYER_WITH_BOUNDS_SIZE: u32 = 32;

/// Command opcode. New opcodes may only be added at the tail.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Op {
    Noop = 0,
    Save = 1,
    SaveLayer = 2,
    Restore = 3,
    Translate = 4,
    Scale = 5,
    Rotate = 6,
    Skew = 7,
    Concat = 8,
    SetMatrix = 9,
    ClipRect = 10,
    ClipRRect = 11,
    ClipPath = 12,
    ClipRegion = 13,
    DrawPaint = 14,
    DrawPoints = 15,
    DrawOval = 16,
    DrawRect = 17,
    DrawRRect = 18,
    DrawPath = 19,
    DrawBitmap = 20,
    DrawBitmapRect = 21,
    DrawBitmapMatrix = 22,
    DrawBitmapNine = 23,
    DrawSprite = 24,
    DrawText = 25,
    DrawTextTopBot = 26,
    DrawPosText = 27,
    DrawPosTextTopBot = 28,
    DrawPosTextH = 29,
    DrawPosTextHTopBot = 30,
    DrawTextOnPath = 31,
    DrawVertices = 32,
    DrawPicture = 33,
    DrawClear = 34,
    DrawData = 35,
    BeginCommentGroup = 36,
    Comment = 37,
    EndCommentGroup = 38,
}

impl Op {
    /// Decodes an opcode byte. `None` for bytes past the end of the set.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Noop,
            1 => Self::Save,
            2 => Self::SaveLayer,
            3 => Self::Restore,
            4 => Self::Translate,
            5 => Self::Scale,
            6 => Self::Rotate,
            7 => Self::Skew,
            8 => Self::Concat,
            9 => Self::SetMatrix,
            10 => Self::ClipRect,
            11 => Self::ClipRRect,
            12 => Self::ClipPath,
            13 => Self::ClipRegion,
            14 => Self::DrawPaint,
            15 => Self::DrawPoints,
            16 => Self::DrawOval,
            17 => Self::DrawRect,
            18 => Self::DrawRRect,
            19 => Self::DrawPath,
            20 => Self::DrawBitmap,
            21 => Self::DrawBitmapRect,
            22 => Self::DrawBitmapMatrix,
            23 => Self::DrawBitmapNine,
            24 => Self::DrawSprite,
            25 => Self::DrawText,
            26 => Self::DrawTextTopBot,
            27 => Self::DrawPosText,
            28 => Self::DrawPosTextTopBot,
            29 => Self::DrawPosTextH,
            30 => Self::DrawPosTextHTopBot,
            31 => Self::DrawTextOnPath,
            32 => Self::DrawVertices,
            33 => Self::DrawPicture,
            34 => Self::DrawClear,
            35 => Self::DrawData,
            36 => Self::BeginCommentGroup,
            37 => Self::Comment,
            38 => Self::EndCommentGroup,
            _ => return None,
        })
    }

    /// True for commands that produce visible output.
    ///
    /// The set is spelled out rather than derived from discriminant order so
    /// that appending opcodes can never silently widen it.
    pub fn is_draw_verb(self) -> bool {
        matches!(
            self,
            Self::DrawPaint
                | Self::DrawPoints
                | Self::DrawOval
                | Self::DrawRect
                | Self::DrawRRect
                | Self::DrawPath
                | Self::DrawBitmap
                | Self::DrawBitmapRect
                | Self::DrawBitmapMatrix
                | Self::DrawBitmapNine
                | Self::DrawSprite
                | Self::DrawText
                | Self::DrawTextTopBot
                | Self::DrawPosText
                | Self::DrawPosTextTopBot
                | Self::DrawPosTextH
                | Self::DrawPosTextHTopBot
                | Self::DrawTextOnPath
                | Self::DrawVertices
                | Self::DrawPicture
                | Self::DrawClear
                | Self::DrawData
        )
    }

    /// True for the bitmap draws the save-layer fold can absorb a paint into.
    pub(crate) fn is_bitmap_flavor(self) -> bool {
        matches!(
            self,
            Self::DrawBitmap | Self::DrawBitmapRect | Self::DrawBitmapMatrix | Self::DrawBitmapNine
        )
    }
}

/// Appends a command header for `op` at the current tail.
///
/// `declared_size` is the command's total byte count assuming a one-word
/// header; when it cannot be stored in 24 bits it is grown by the extra size
/// word so that it stays the total count actually occupied. Returns the
/// header's offset.
pub(crate) fn emit_header(writer: &mut Writer, op: Op, declared_size: &mut u32) -> u32 {
    let offset = writer.bytes_written();
    if *declared_size & !SIZE_MASK != 0 || *declared_size == SIZE_MASK {
        *declared_size += 4;
        writer.append_u32(pack_header(op, SIZE_MASK));
        writer.append_u32(*declared_size);
    } else {
        writer.append_u32(pack_header(op, *declared_size));
    }
    offset
}

/// Packs an opcode and a 24-bit size into a header word.
pub(crate) const fn pack_header(op: Op, size24: u32) -> u32 {
    ((op as u32) << 24) | size24
}

/// Reads the opcode and total byte count of the command at `offset`.
///
/// Panics if `offset` is out of bounds or the opcode byte is not part of the
/// closed set; both are logic bugs on a stream this crate produced.
pub fn peek_op_and_size(stream: &[u8], offset: u32) -> (Op, u32) {
    let word = read_u32(stream, offset);
    let op = Op::from_u8((word >> 24) as u8).expect("invalid opcode in stream");
    let size = word & SIZE_MASK;
    if size == SIZE_MASK {
        (op, read_u32(stream, offset + 4))
    } else {
        (op, size)
    }
}

/// Rewrites the opcode at `offset` to NOOP, leaving the size field (and any
/// overflow word) intact so that iteration still skips the right span.
pub(crate) fn convert_to_noop(writer: &mut Writer, offset: u32) {
    let word = writer.read_u32_at(offset);
    writer.write_u32_at(offset, (word & SIZE_MASK) | ((Op::Noop as u32) << 24));
}

/// Byte width of the command header given the command's total size: 4, or 8
/// when the size needed the overflow word.
pub(crate) const fn header_bytes(op_size: u32) -> u32 {
    if op_size & !SIZE_MASK != 0 || op_size == SIZE_MASK {
        8
    } else {
        4
    }
}

/// Byte offset of the paint index word within the command at hand, or 0 when
/// the command carries no paint.
///
/// `op_size` is the command's total byte count as returned by
/// [`peek_op_and_size`]; it both selects between the two SAVE_LAYER layouts
/// and accounts for the extra word of an overflowed header.
pub(crate) fn paint_offset(op: Op, op_size: u32) -> u32 {
    let overflow = header_bytes(op_size) - 4;

    if op == Op::SaveLayer {
        return if op_size == SAVE_LAYER_NO_BOUNDS_SIZE + overflow {
            8 + overflow
        } else {
            debug_assert_eq!(op_size, SAVE_LAYER_WITH_BOUNDS_SIZE + overflow);
            8 + crate::writer::RECT_BYTES + overflow
        };
    }

    let has_paint = matches!(
        op,
        Op::DrawPaint
            | Op::DrawPoints
            | Op::DrawOval
            | Op::DrawRect
            | Op::DrawRRect
            | Op::DrawPath
            | Op::DrawBitmap
            | Op::DrawBitmapRect
            | Op::DrawBitmapMatrix
            | Op::DrawBitmapNine
            | Op::DrawSprite
            | Op::DrawText
            | Op::DrawTextTopBot
            | Op::DrawPosText
            | Op::DrawPosTextTopBot
            | Op::DrawPosTextH
            | Op::DrawPosTextHTopBot
            | Op::DrawTextOnPath
            | Op::DrawVertices
    );
    if has_paint {
        4 + overflow
    } else {
        0
    }
}

fn read_u32(stream: &[u8], offset: u32) -> u32 {
    debug_assert_eq!(offset % 4, 0, "unaligned stream read");
    let offset = offset as usize;
    bytemuck::pod_read_unaligned(&stream[offset..offset + 4])
}

/// Clip combinator applied by the clip commands.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ClipOp {
    Difference = 0,
    Intersect = 1,
    Union = 2,
    Xor = 3,
    ReverseDifference = 4,
    Replace = 5,
}

impl ClipOp {
    /// True when the combinator can enlarge the visible region, invalidating
    /// any earlier empty-clip short-circuit in the same scope.
    pub fn expands(self) -> bool {
        match self {
            Self::Union | Self::Xor | Self::ReverseDifference | Self::Replace => true,
            Self::Difference | Self::Intersect => false,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Difference,
            1 => Self::Intersect,
            2 => Self::Union,
            3 => Self::Xor,
            4 => Self::ReverseDifference,
            5 => Self::Replace,
            _ => return None,
        })
    }
}

/// Packs a clip combinator and the anti-alias flag into one word: the op
/// ordinal in the low 4 bits, AA in bit 4.
pub fn pack_clip_params(op: ClipOp, anti_alias: bool) -> u32 {
    (u32::from(anti_alias) << 4) | op as u32
}

/// Inverse of [`pack_clip_params`].
pub fn unpack_clip_params(word: u32) -> (ClipOp, bool) {
    let op = ClipOp::from_u8((word & 0xf) as u8).expect("invalid clip op in stream");
    (op, word & 0x10 != 0)
}

/// Interpretation of the point array in a DRAW_POINTS command.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum PointMode {
    Points = 0,
    Lines = 1,
    Polygon = 2,
}

/// Primitive assembly for a DRAW_VERTICES command.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum VertexMode {
    Triangles = 0,
    TriangleStrip = 1,
    TriangleFan = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut w = Writer::new();
        let mut size = 20;
        let offset = emit_header(&mut w, Op::DrawRect, &mut size);
        assert_eq!(offset, 0);
        assert_eq!(size, 20);
        assert_eq!(w.bytes_written(), 4);
        assert_eq!(peek_op_and_size(w.as_bytes(), 0), (Op::DrawRect, 20));
    }

    #[test]
    fn header_overflow_uses_extra_word() {
        let mut w = Writer::new();
        let mut size = SIZE_MASK;
        let offset = emit_header(&mut w, Op::DrawData, &mut size);
        // The declared size grew by the overflow word itself.
        assert_eq!(size, SIZE_MASK + 4);
        assert_eq!(w.bytes_written(), 8);
        assert_eq!(
            peek_op_and_size(w.as_bytes(), offset),
            (Op::DrawData, SIZE_MASK + 4)
        );
    }

    #[test]
    fn header_just_below_sentinel_stays_compact() {
        let mut w = Writer::new();
        let mut size = SIZE_MASK - 4;
        emit_header(&mut w, Op::DrawData, &mut size);
        assert_eq!(size, SIZE_MASK - 4);
        assert_eq!(w.bytes_written(), 4);
    }

    #[test]
    fn noop_conversion_preserves_size() {
        let mut w = Writer::new();
        let mut size = 12;
        let offset = emit_header(&mut w, Op::ClipPath, &mut size);
        w.append_u32(1);
        w.append_u32(2);
        convert_to_noop(&mut w, offset);
        assert_eq!(peek_op_and_size(w.as_bytes(), offset), (Op::Noop, 12));
    }

    #[test]
    fn clip_params_round_trip() {
        for op in [
            ClipOp::Difference,
            ClipOp::Intersect,
            ClipOp::Union,
            ClipOp::Xor,
            ClipOp::ReverseDifference,
            ClipOp::Replace,
        ] {
            for aa in [false, true] {
                assert_eq!(unpack_clip_params(pack_clip_params(op, aa)), (op, aa));
            }
        }
    }

    #[test]
    fn save_layer_paint_offset_tracks_bounds() {
        assert_eq!(paint_offset(Op::SaveLayer, SAVE_LAYER_NO_BOUNDS_SIZE), 8);
        assert_eq!(paint_offset(Op::SaveLayer, SAVE_LAYER_WITH_BOUNDS_SIZE), 24);
        assert_eq!(paint_offset(Op::DrawBitmap, 20), 4);
        assert_eq!(paint_offset(Op::Save, SAVE_SIZE), 0);
        assert_eq!(paint_offset(Op::ClipRect, 28), 0);
    }

    #[test]
    fn draw_verbs_exclude_state_ops() {
        assert!(Op::DrawRect.is_draw_verb());
        assert!(Op::DrawData.is_draw_verb());
        assert!(!Op::Save.is_draw_verb());
        assert!(!Op::SaveLayer.is_draw_verb());
        assert!(!Op::ClipRect.is_draw_verb());
        assert!(!Op::Translate.is_draw_verb());
        assert!(!Op::Comment.is_draw_verb());
    }
}
