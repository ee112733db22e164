// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Record-time peephole optimizations, tried when a `restore` arrives.
//!
//! Each rule inspects the tail of the stream starting at the scope's
//! SAVE/SAVE_LAYER header. A rule that fires either rewinds the stream or
//! rewrites matched commands in place, and in both cases the RESTORE is not
//! emitted. Rules never reorder commands.

use peniko::Color;

use crate::dictionary::Dictionary;
use crate::op::{
    convert_to_noop, paint_offset, peek_op_and_size, Op, SAVE_LAYER_WITH_BOUNDS_SIZE, SAVE_SIZE,
};
use crate::paint::Paint;
use crate::record::SaveFlags;
use crate::writer::Writer;

/// How a fired rule changed the stream, which decides the external hook to
/// notify.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum OptOutcome {
    /// The stream was rewound past the scope.
    Rewind,
    /// A save-layer pair was eliminated by in-place rewriting.
    CollapsedSaveLayer,
}

/// Runs the optimization rules in order; the first that fires wins.
///
/// `skip_rewind_rule` suppresses the save-collapse rule while recording into
/// a bounding-box hierarchy, where rewinding would also have to unwind
/// already-inserted geometry.
pub(crate) fn run_restore_optimizations(
    writer: &mut Writer,
    paints: &mut Dictionary<Paint>,
    save_offset: u32,
    skip_rewind_rule: bool,
) -> Option<OptOutcome> {
    if !skip_rewind_rule && collapse_save_clip_restore(writer, save_offset) {
        log::trace!("collapsed state-only save scope at {save_offset}");
        return Some(OptOutcome::Rewind);
    }
    if remove_save_layer_over_draw(writer, paints, save_offset)
        || remove_save_layer_over_clipped_draw(writer, paints, save_offset)
    {
        log::trace!("folded save_layer at {save_offset} into trailing bitmap draw");
        return Some(OptOutcome::CollapsedSaveLayer);
    }
    None
}

/// A command matched out of the stream tail.
#[derive(Copy, Clone, Debug)]
struct CommandInfo {
    op: Op,
    offset: u32,
    size: u32,
}

/// One element of a match pattern.
#[derive(Copy, Clone, Debug)]
enum Pat {
    Exact(Op),
    /// Any of the bitmap draws a save-layer paint can be folded into.
    BitmapFlavor,
}

/// Matches `pattern` against the commands from `start` to the end of the
/// stream, skipping NOOPs between (and after) pattern elements. On success
/// returns the matched commands' actual ops, offsets, and sizes.
fn match_tail(writer: &Writer, start: u32, pattern: &[Pat]) -> Option<Vec<CommandInfo>> {
    let bytes = writer.as_bytes();
    let end = writer.bytes_written();
    debug_assert!(start < end);

    let mut result = Vec::with_capacity(pattern.len());
    let mut offset = start;
    for pat in pattern {
        let (op, size) = loop {
            if offset >= end {
                return None;
            }
            let (op, size) = peek_op_and_size(bytes, offset);
            if op != Op::Noop {
                break (op, size);
            }
            offset += size;
        };
        let matched = match pat {
            Pat::Exact(expected) => op == *expected,
            Pat::BitmapFlavor => op.is_bitmap_flavor(),
        };
        if !matched {
            return None;
        }
        result.push(CommandInfo { op, offset, size });
        offset += size;
    }

    // Nothing but NOOPs may follow the matched run.
    while offset < end {
        let (op, size) = peek_op_and_size(bytes, offset);
        if op != Op::Noop {
            return None;
        }
        offset += size;
    }
    Some(result)
}

/// Collapses `save(MatrixClip) ... restore` when the scope body holds only
/// state changes. The whole scope is rewound away: a balanced scope without
/// draws has no observable effect on playback.
fn collapse_save_clip_restore(writer: &mut Writer, save_offset: u32) -> bool {
    let restore_offset = writer.bytes_written();
    let bytes = writer.as_bytes();

    let (op, op_size) = peek_op_and_size(bytes, save_offset);
    if op == Op::SaveLayer {
        // A save_layer composites its contents; never cull it here.
        return false;
    }
    debug_assert_eq!(op, Op::Save);
    debug_assert_eq!(op_size, SAVE_SIZE);

    let flags = SaveFlags::from_bits(writer.read_u32_at(save_offset + 4));
    if flags != SaveFlags::MATRIX_CLIP {
        // Only full matrix+clip saves are guaranteed restorable by dropping
        // the scope.
        return false;
    }

    let mut offset = save_offset + op_size;
    while offset < restore_offset {
        let (op, size) = peek_op_and_size(writer.as_bytes(), offset);
        if op.is_draw_verb() || op == Op::SaveLayer {
            return false;
        }
        offset += size;
    }

    writer.rewind_to(save_offset);
    true
}

/// Folds
///
/// ```text
/// SAVE_LAYER (no bounds)
///     DRAW_BITMAP | DRAW_BITMAP_RECT | DRAW_BITMAP_MATRIX | DRAW_BITMAP_NINE
/// RESTORE
/// ```
///
/// into the bitmap draw alone, moving the layer's alpha into the draw paint.
fn remove_save_layer_over_draw(
    writer: &mut Writer,
    paints: &mut Dictionary<Paint>,
    save_offset: u32,
) -> bool {
    let pattern = [Pat::Exact(Op::SaveLayer), Pat::BitmapFlavor];
    let Some(cmds) = match_tail(writer, save_offset, &pattern) else {
        return false;
    };
    if cmds[0].size == SAVE_LAYER_WITH_BOUNDS_SIZE {
        // A bounds rect can offset where the bitmap lands; leave it alone.
        return false;
    }
    merge_save_layer_paint_into_draw(writer, paints, &cmds[0], &cmds[1])
}

/// Like [`remove_save_layer_over_draw`], but tolerating the clipped form the
/// canvas layer emits around positioned bitmaps:
///
/// ```text
/// SAVE_LAYER (no bounds)
///    SAVE
///       CLIP_RECT
///       DRAW_BITMAP*
///    RESTORE
/// RESTORE
/// ```
fn remove_save_layer_over_clipped_draw(
    writer: &mut Writer,
    paints: &mut Dictionary<Paint>,
    save_offset: u32,
) -> bool {
    let pattern = [
        Pat::Exact(Op::SaveLayer),
        Pat::Exact(Op::Save),
        Pat::Exact(Op::ClipRect),
        Pat::BitmapFlavor,
        Pat::Exact(Op::Restore),
    ];
    let Some(cmds) = match_tail(writer, save_offset, &pattern) else {
        return false;
    };
    if cmds[0].size == SAVE_LAYER_WITH_BOUNDS_SIZE {
        return false;
    }
    merge_save_layer_paint_into_draw(writer, paints, &cmds[0], &cmds[3])
}

/// Moves the save-layer's paint into the matched bitmap draw and NOOPs the
/// save-layer header. Returns true when the caller should also suppress the
/// RESTORE.
fn merge_save_layer_paint_into_draw(
    writer: &mut Writer,
    paints: &mut Dictionary<Paint>,
    save_layer: &CommandInfo,
    draw: &CommandInfo,
) -> bool {
    debug_assert_eq!(save_layer.op, Op::SaveLayer);
    debug_assert!(draw.op.is_bitmap_flavor());

    let draw_slot = draw.offset + paint_offset(draw.op, draw.size);
    let layer_slot = save_layer.offset + paint_offset(Op::SaveLayer, save_layer.size);
    let draw_paint_ix = writer.read_u32_at(draw_slot);
    let layer_paint_ix = writer.read_u32_at(layer_slot);

    if layer_paint_ix == 0 {
        // The layer applies nothing; the pair is pure overhead.
        convert_to_noop(writer, save_layer.offset);
        return true;
    }

    if draw_paint_ix == 0 {
        // The draw has no paint of its own, so it can take the layer's.
        convert_to_noop(writer, save_layer.offset);
        writer.write_u32_at(draw_slot, layer_paint_ix);
        return true;
    }

    let Some(layer_paint) = paints.get(layer_paint_ix).cloned() else {
        return false;
    };
    if !layer_paint.is_simple() {
        return false;
    }

    // Only fold when the two colors differ at most in the layer's alpha: the
    // draw paint must be the layer color forced opaque. Folding two
    // non-opaque alphas would need a multiply, which playback can't express
    // here.
    let Some(draw_paint) = paints.get(draw_paint_ix).cloned() else {
        return false;
    };
    let layer_color = layer_paint.color.to_rgba8();
    let mut forced_opaque = layer_color;
    forced_opaque.a = 0xff;
    let draw_color = draw_paint.color.to_rgba8();
    if draw_color.to_u32() != forced_opaque.to_u32() {
        return false;
    }

    let mut merged = draw_paint;
    merged.color = Color::from_rgba8(draw_color.r, draw_color.g, draw_color.b, layer_color.a);
    let merged_ix = paints.intern(&merged);

    convert_to_noop(writer, save_layer.offset);
    writer.write_u32_at(draw_slot, merged_ix);
    true
}
