// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The recorder: one entry point per graphics op, serialized through the
//! opcode codec into the command stream.
//!
//! # Scopes and restore offsets
//!
//! Every `save`/`save_layer` pushes a [`ScopeFrame`] carrying the offset of
//! its header. Clip commands recorded inside a scope reserve one placeholder
//! word; the frames thread those words into a linked list through the stream
//! itself (each placeholder stores the offset of the previous one, 0
//! terminating the chain). When the matching `restore` is recorded, the
//! chain is walked and every placeholder is overwritten with the RESTORE
//! header's offset, letting playback jump straight past a scope whose clip
//! came up empty. A clip whose combinator can re-expand the region instead
//! neutralizes the chain built so far, writing zeros.
//!
//! The `restore` path first offers the stream tail to the peephole rules in
//! [`crate::optimize`]; when a rule fires, the RESTORE is not emitted.

use std::sync::Arc;

use peniko::kurbo::{Affine, BezPath, PathEl, Point, Rect, RoundedRect};
use peniko::{BlendMode, Color};
use smallvec::SmallVec;

use crate::bitmap::Bitmap;
use crate::dictionary::{Dictionary, PathStore, PictureStore};
use crate::op::{
    emit_header, pack_clip_params, paint_offset, peek_op_and_size, ClipOp, Op, PointMode,
    VertexMode, SAVE_LAYER_NO_BOUNDS_SIZE, SAVE_LAYER_WITH_BOUNDS_SIZE, SAVE_SIZE,
};
use crate::optimize::{run_restore_optimizations, OptOutcome};
use crate::paint::Paint;
use crate::picture::Picture;
use crate::region::{IntRect, Region};
use crate::writer::{align4, Writer, AFFINE_BYTES, POINT_BYTES, RECT_BYTES, RRECT_BYTES};

/// A lot of basic payload fields are stored as one 32-bit word: bools, flag
/// sets, indices, counts.
const WORD_SIZE: u32 = 4;

const DRAW_VERTICES_HAS_TEXS: u32 = 0x01;
const DRAW_VERTICES_HAS_COLORS: u32 = 0x02;
const DRAW_VERTICES_HAS_INDICES: u32 = 0x04;
const DRAW_VERTICES_HAS_XFER: u32 = 0x08;

/// What a `save` preserves; stored verbatim in the SAVE payload.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct SaveFlags(u32);

impl SaveFlags {
    pub const MATRIX: Self = Self(1 << 0);
    pub const CLIP: Self = Self(1 << 1);
    pub const HAS_ALPHA_LAYER: Self = Self(1 << 2);
    pub const FULL_COLOR_LAYER: Self = Self(1 << 3);
    pub const CLIP_TO_LAYER: Self = Self(1 << 4);
    /// Save both the matrix and the clip.
    pub const MATRIX_CLIP: Self = Self(0x03);
    /// Layer defaults: offscreen with alpha, not clipped to the layer bounds.
    pub const ARGB_NO_CLIP_LAYER: Self = Self(0x0f);
    /// Layer defaults: offscreen with alpha, clipped to the layer bounds.
    pub const ARGB_CLIP_LAYER: Self = Self(0x1f);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SaveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Recorder configuration, supplied at construction.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct RecordFlags(u32);

impl RecordFlags {
    pub const EMPTY: Self = Self(0);
    /// Suppress the restore-time peephole rules.
    pub const DISABLE_RECORD_OPTIMIZATIONS: Self = Self(1 << 0);
    /// Ask the surrounding canvas to track clips by conservative path
    /// bounds instead of exact path geometry. The recorder only stores the
    /// flag; the clip-update policy lives with the canvas.
    pub const USE_PATH_BOUNDS_FOR_CLIP: Self = Self(1 << 1);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RecordFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags stored in the DRAW_BITMAP_RECT payload.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct BitmapRectFlags(u32);

impl BitmapRectFlags {
    pub const NONE: Self = Self(0);
    /// Sample beyond the source rect edges when filtering.
    pub const BLEED: Self = Self(1 << 0);

    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Hook into an external bounding-box hierarchy fed alongside the stream.
pub trait BoundsHierarchy {
    /// Drop pending inserts for commands that were rewound away.
    fn rewind_inserts(&mut self);
}

/// Hook into an external state tree mirroring the scope structure.
pub trait StateTree {
    /// A save-layer scope was eliminated by in-place rewriting.
    fn save_collapsed(&mut self);
}

/// One open `save`/`save_layer` scope.
#[derive(Copy, Clone, Debug)]
struct ScopeFrame {
    /// Offset of the scope's SAVE or SAVE_LAYER header.
    save_offset: u32,
    /// Offset of the most recently reserved placeholder word, if any live
    /// placeholders exist in this scope.
    chain_head: Option<u32>,
}

/// Records a stream of 2D graphics calls into a compact binary command
/// stream for later linear playback.
///
/// Strictly single-threaded; every call runs to completion and the emitted
/// stream preserves call order exactly. The surrounding canvas owns the
/// current matrix/clip state; the recorder only serializes.
pub struct PictureRecorder {
    writer: Writer,
    paints: Dictionary<Paint>,
    bitmaps: Dictionary<Bitmap>,
    paths: PathStore,
    pictures: PictureStore,
    scope_stack: SmallVec<[ScopeFrame; 8]>,
    /// Stack depth right after the first still-open `save_layer`.
    first_saved_layer: Option<usize>,
    flags: RecordFlags,
    bounds_hierarchy: Option<Box<dyn BoundsHierarchy>>,
    state_tree: Option<Box<dyn StateTree>>,
    /// Stack depth when `begin_recording` ran; `end_recording` drains back
    /// to it. `None` until recording starts.
    initial_save_depth: Option<usize>,
}

impl PictureRecorder {
    pub fn new(flags: RecordFlags) -> Self {
        Self {
            writer: Writer::new(),
            paints: Dictionary::new(),
            bitmaps: Dictionary::new(),
            paths: PathStore::new(),
            pictures: PictureStore::new(),
            scope_stack: SmallVec::new(),
            first_saved_layer: None,
            flags,
            bounds_hierarchy: None,
            state_tree: None,
            initial_save_depth: None,
        }
    }

    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    /// Attaches a bounding-box hierarchy hook. Its presence disables the
    /// save-collapse rewind rule, which would otherwise have to unwind
    /// already-inserted geometry.
    pub fn set_bounds_hierarchy(&mut self, hierarchy: Box<dyn BoundsHierarchy>) {
        self.bounds_hierarchy = Some(hierarchy);
    }

    pub fn set_state_tree(&mut self, tree: Box<dyn StateTree>) {
        self.state_tree = Some(tree);
    }

    /// The bytes recorded so far.
    pub fn stream(&self) -> &[u8] {
        self.writer.as_bytes()
    }

    /// Number of open scopes.
    pub fn save_count(&self) -> usize {
        self.scope_stack.len()
    }

    /// True while at least one `save_layer` scope is open.
    pub fn is_drawing_to_layer(&self) -> bool {
        self.first_saved_layer.is_some()
    }

    // --- lifecycle -------------------------------------------------------

    /// Starts recording by opening the outermost scope, which the recorder
    /// owns so that playback always begins from a balanced save.
    pub fn begin_recording(&mut self) {
        debug_assert!(
            self.initial_save_depth.is_none(),
            "begin_recording called twice"
        );
        if self.initial_save_depth.is_some() {
            log::warn!("begin_recording called twice; ignoring");
            return;
        }
        self.initial_save_depth = Some(self.scope_stack.len());
        self.save(SaveFlags::MATRIX_CLIP);
    }

    /// Restores any scopes still open (the recorder's own outermost one
    /// included) and freezes the recording.
    pub fn end_recording(mut self) -> Picture {
        match self.initial_save_depth {
            Some(depth) => {
                while self.scope_stack.len() > depth {
                    self.restore();
                }
            }
            None => {
                debug_assert!(false, "end_recording without begin_recording");
                log::warn!("end_recording without begin_recording");
            }
        }
        Picture::new(
            self.writer.into_bytes(),
            self.paints.into_values(),
            self.paths.into_paths(),
            self.bitmaps.into_values(),
            self.pictures.into_pictures(),
        )
    }

    // --- scopes ----------------------------------------------------------

    pub fn save(&mut self, flags: SaveFlags) {
        self.scope_stack.push(ScopeFrame {
            save_offset: self.writer.bytes_written(),
            chain_head: None,
        });
        let mut size = SAVE_SIZE;
        let initial = self.add_draw(Op::Save, &mut size);
        self.writer.append_u32(flags.bits());
        self.validate(initial, size);
    }

    pub fn save_layer(&mut self, bounds: Option<Rect>, paint: Option<&Paint>, flags: SaveFlags) {
        self.scope_stack.push(ScopeFrame {
            save_offset: self.writer.bytes_written(),
            chain_head: None,
        });
        self.record_save_layer(bounds, paint, flags);
        if self.first_saved_layer.is_none() {
            self.first_saved_layer = Some(self.scope_stack.len());
        }
    }

    fn record_save_layer(&mut self, bounds: Option<Rect>, paint: Option<&Paint>, flags: SaveFlags) {
        // op + bounds flag + optional rect + paint index + flags
        let mut size = 2 * WORD_SIZE;
        if bounds.is_some() {
            size += RECT_BYTES;
        }
        size += 2 * WORD_SIZE;
        debug_assert!(size == SAVE_LAYER_NO_BOUNDS_SIZE || size == SAVE_LAYER_WITH_BOUNDS_SIZE);

        let initial = self.add_draw(Op::SaveLayer, &mut size);
        self.append_optional_rect(bounds);
        debug_assert_eq!(
            initial + paint_offset(Op::SaveLayer, size),
            self.writer.bytes_written()
        );
        self.add_paint(paint);
        self.writer.append_u32(flags.bits());
        self.validate(initial, size);
    }

    pub fn restore(&mut self) {
        let Some(frame) = self.scope_stack.last() else {
            debug_assert!(false, "restore with no matching save");
            log::warn!("restore called with an empty scope stack; ignoring");
            return;
        };
        let save_offset = frame.save_offset;

        if self.first_saved_layer == Some(self.scope_stack.len()) {
            self.first_saved_layer = None;
        }

        let mut outcome = None;
        if !self.flags.contains(RecordFlags::DISABLE_RECORD_OPTIMIZATIONS) {
            outcome = run_restore_optimizations(
                &mut self.writer,
                &mut self.paints,
                save_offset,
                self.bounds_hierarchy.is_some(),
            );
        }
        match outcome {
            Some(OptOutcome::Rewind) => {
                if let Some(hierarchy) = &mut self.bounds_hierarchy {
                    hierarchy.rewind_inserts();
                }
            }
            Some(OptOutcome::CollapsedSaveLayer) => {
                if let Some(tree) = &mut self.state_tree {
                    tree.save_collapsed();
                }
            }
            None => self.record_restore(),
        }
        self.scope_stack.pop();
    }

    fn record_restore(&mut self) {
        self.fill_restore_offset_placeholders(self.writer.bytes_written());
        let mut size = WORD_SIZE;
        let initial = self.add_draw(Op::Restore, &mut size);
        self.validate(initial, size);
    }

    /// Walks the current scope's placeholder chain, overwriting every slot
    /// with `fill_value` (the RESTORE offset, or 0 to neutralize).
    fn fill_restore_offset_placeholders(&mut self, fill_value: u32) {
        let Some(frame) = self.scope_stack.last_mut() else {
            return;
        };
        let mut slot = frame.chain_head.take();
        while let Some(at) = slot {
            let prev = self.writer.read_u32_at(at);
            self.writer.write_u32_at(at, fill_value);
            slot = (prev != 0).then_some(prev);
        }
        debug_assert!(matches!(
            peek_op_and_size(self.writer.as_bytes(), frame.save_offset).0,
            Op::Save | Op::SaveLayer
        ));
    }

    /// Reserves the restore-offset placeholder word of a clip command and
    /// links it into the current scope's chain. Scopeless clips reserve
    /// nothing.
    fn record_restore_offset_placeholder(&mut self, op: ClipOp) {
        if self.scope_stack.is_empty() {
            return;
        }
        if op.expands() {
            // An earlier empty clip may no longer be empty after this op;
            // its jump-to-restore must not fire.
            self.fill_restore_offset_placeholders(0);
        }
        let prev = self
            .scope_stack
            .last()
            .and_then(|frame| frame.chain_head)
            .unwrap_or(0);
        let here = self.writer.bytes_written();
        self.writer.append_u32(prev);
        if let Some(frame) = self.scope_stack.last_mut() {
            frame.chain_head = Some(here);
        }
    }

    // --- transforms ------------------------------------------------------

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.record_two_scalars(Op::Translate, dx, dy);
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.record_two_scalars(Op::Scale, sx, sy);
    }

    pub fn skew(&mut self, sx: f32, sy: f32) {
        self.record_two_scalars(Op::Skew, sx, sy);
    }

    pub fn rotate(&mut self, degrees: f32) {
        let mut size = WORD_SIZE + 4;
        let initial = self.add_draw(Op::Rotate, &mut size);
        self.writer.append_f32(degrees);
        self.validate(initial, size);
    }

    pub fn concat(&mut self, transform: Affine) {
        self.record_affine(Op::Concat, transform);
    }

    pub fn set_matrix(&mut self, transform: Affine) {
        self.record_affine(Op::SetMatrix, transform);
    }

    fn record_two_scalars(&mut self, op: Op, a: f32, b: f32) {
        let mut size = WORD_SIZE + 8;
        let initial = self.add_draw(op, &mut size);
        self.writer.append_f32(a);
        self.writer.append_f32(b);
        self.validate(initial, size);
    }

    fn record_affine(&mut self, op: Op, transform: Affine) {
        let mut size = WORD_SIZE + AFFINE_BYTES;
        let initial = self.add_draw(op, &mut size);
        self.writer.append_affine(transform);
        self.validate(initial, size);
    }

    // --- clips -----------------------------------------------------------

    pub fn clip_rect(&mut self, rect: Rect, op: ClipOp, anti_alias: bool) {
        // op + rect + clip params, plus the placeholder inside a scope
        let mut size = WORD_SIZE + RECT_BYTES + WORD_SIZE;
        if !self.scope_stack.is_empty() {
            size += WORD_SIZE;
        }
        let initial = self.add_draw(Op::ClipRect, &mut size);
        self.writer.append_rect(rect);
        self.writer.append_u32(pack_clip_params(op, anti_alias));
        self.record_restore_offset_placeholder(op);
        self.validate(initial, size);
    }

    pub fn clip_rrect(&mut self, rrect: RoundedRect, op: ClipOp, anti_alias: bool) {
        if let Some(rect) = rounded_rect_as_rect(&rrect) {
            return self.clip_rect(rect, op, anti_alias);
        }
        let mut size = WORD_SIZE + RRECT_BYTES + WORD_SIZE;
        if !self.scope_stack.is_empty() {
            size += WORD_SIZE;
        }
        let initial = self.add_draw(Op::ClipRRect, &mut size);
        self.writer.append_rounded_rect(rrect);
        self.writer.append_u32(pack_clip_params(op, anti_alias));
        self.record_restore_offset_placeholder(op);
        self.validate(initial, size);
    }

    pub fn clip_path(&mut self, path: &BezPath, op: ClipOp, anti_alias: bool) {
        if let Some(rect) = path_as_rect(path) {
            return self.clip_rect(rect, op, anti_alias);
        }
        let path_index = self.paths.append(path);
        // op + path index + clip params
        let mut size = 3 * WORD_SIZE;
        if !self.scope_stack.is_empty() {
            size += WORD_SIZE;
        }
        let initial = self.add_draw(Op::ClipPath, &mut size);
        self.writer.append_u32(path_index);
        self.writer.append_u32(pack_clip_params(op, anti_alias));
        self.record_restore_offset_placeholder(op);
        self.validate(initial, size);
    }

    pub fn clip_region(&mut self, region: &Region, op: ClipOp) {
        // op + region + clip params
        let mut size = WORD_SIZE + region.size_hint() + WORD_SIZE;
        if !self.scope_stack.is_empty() {
            size += WORD_SIZE;
        }
        let initial = self.add_draw(Op::ClipRegion, &mut size);
        region.write_to(&mut self.writer);
        self.writer.append_u32(pack_clip_params(op, false));
        self.record_restore_offset_placeholder(op);
        self.validate(initial, size);
    }

    // --- draws -----------------------------------------------------------

    pub fn clear(&mut self, color: Color) {
        let mut size = 2 * WORD_SIZE;
        let initial = self.add_draw(Op::DrawClear, &mut size);
        self.writer.append_u32(color.to_rgba8().to_u32());
        self.validate(initial, size);
    }

    pub fn draw_paint(&mut self, paint: &Paint) {
        let mut size = 2 * WORD_SIZE;
        let initial = self.add_draw(Op::DrawPaint, &mut size);
        self.check_paint_slot(initial, size, Op::DrawPaint);
        self.add_paint(Some(paint));
        self.validate(initial, size);
    }

    pub fn draw_points(&mut self, mode: PointMode, points: &[Point], paint: &Paint) {
        // op + paint index + mode + count + point data
        let mut size = 4 * WORD_SIZE + points.len() as u32 * POINT_BYTES;
        let initial = self.add_draw(Op::DrawPoints, &mut size);
        self.check_paint_slot(initial, size, Op::DrawPoints);
        self.add_paint(Some(paint));
        self.writer.append_u32(mode as u32);
        self.writer.append_u32(points.len() as u32);
        for point in points {
            self.writer.append_point(*point);
        }
        self.validate(initial, size);
    }

    pub fn draw_oval(&mut self, oval: Rect, paint: &Paint) {
        self.record_paint_and_rect(Op::DrawOval, oval, paint);
    }

    pub fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        self.record_paint_and_rect(Op::DrawRect, rect, paint);
    }

    pub fn draw_rrect(&mut self, rrect: RoundedRect, paint: &Paint) {
        if let Some(rect) = rounded_rect_as_rect(&rrect) {
            self.draw_rect(rect, paint);
        } else if let Some(oval) = rounded_rect_as_oval(&rrect) {
            self.draw_oval(oval, paint);
        } else {
            let mut size = 2 * WORD_SIZE + RRECT_BYTES;
            let initial = self.add_draw(Op::DrawRRect, &mut size);
            self.check_paint_slot(initial, size, Op::DrawRRect);
            self.add_paint(Some(paint));
            self.writer.append_rounded_rect(rrect);
            self.validate(initial, size);
        }
    }

    pub fn draw_path(&mut self, path: &BezPath, paint: &Paint) {
        let path_index = self.paths.append(path);
        // op + paint index + path index
        let mut size = 3 * WORD_SIZE;
        let initial = self.add_draw(Op::DrawPath, &mut size);
        self.check_paint_slot(initial, size, Op::DrawPath);
        self.add_paint(Some(paint));
        self.writer.append_u32(path_index);
        self.validate(initial, size);
    }

    pub fn draw_bitmap(&mut self, bitmap: &Bitmap, left: f32, top: f32, paint: Option<&Paint>) {
        // op + paint index + bitmap index + left + top
        let mut size = 3 * WORD_SIZE + 8;
        let initial = self.add_draw(Op::DrawBitmap, &mut size);
        self.check_paint_slot(initial, size, Op::DrawBitmap);
        self.add_paint(paint);
        self.add_bitmap(bitmap);
        self.writer.append_f32(left);
        self.writer.append_f32(top);
        self.validate(initial, size);
    }

    pub fn draw_bitmap_rect(
        &mut self,
        bitmap: &Bitmap,
        src: Option<Rect>,
        dst: Rect,
        paint: Option<&Paint>,
        flags: BitmapRectFlags,
    ) {
        // op + paint index + bitmap index + src flag + flags
        let mut size = 5 * WORD_SIZE + RECT_BYTES;
        if src.is_some() {
            size += RECT_BYTES;
        }
        let initial = self.add_draw(Op::DrawBitmapRect, &mut size);
        self.check_paint_slot(initial, size, Op::DrawBitmapRect);
        self.add_paint(paint);
        self.add_bitmap(bitmap);
        self.append_optional_rect(src);
        self.writer.append_rect(dst);
        self.writer.append_u32(flags.bits());
        self.validate(initial, size);
    }

    pub fn draw_bitmap_matrix(&mut self, bitmap: &Bitmap, transform: Affine, paint: Option<&Paint>) {
        // op + paint index + bitmap index + matrix
        let mut size = 3 * WORD_SIZE + AFFINE_BYTES;
        let initial = self.add_draw(Op::DrawBitmapMatrix, &mut size);
        self.check_paint_slot(initial, size, Op::DrawBitmapMatrix);
        self.add_paint(paint);
        self.add_bitmap(bitmap);
        self.writer.append_affine(transform);
        self.validate(initial, size);
    }

    pub fn draw_bitmap_nine(
        &mut self,
        bitmap: &Bitmap,
        center: IntRect,
        dst: Rect,
        paint: Option<&Paint>,
    ) {
        // op + paint index + bitmap index + center + dst rect
        let mut size = 3 * WORD_SIZE + 16 + RECT_BYTES;
        let initial = self.add_draw(Op::DrawBitmapNine, &mut size);
        self.check_paint_slot(initial, size, Op::DrawBitmapNine);
        self.add_paint(paint);
        self.add_bitmap(bitmap);
        self.writer.append_i32(center.x0);
        self.writer.append_i32(center.y0);
        self.writer.append_i32(center.x1);
        self.writer.append_i32(center.y1);
        self.writer.append_rect(dst);
        self.validate(initial, size);
    }

    /// Draws a bitmap at integer device coordinates, bypassing the matrix.
    pub fn draw_sprite(&mut self, bitmap: &Bitmap, left: i32, top: i32, paint: Option<&Paint>) {
        // op + paint index + bitmap index + left + top
        let mut size = 5 * WORD_SIZE;
        let initial = self.add_draw(Op::DrawSprite, &mut size);
        self.check_paint_slot(initial, size, Op::DrawSprite);
        self.add_paint(paint);
        self.add_bitmap(bitmap);
        self.writer.append_i32(left);
        self.writer.append_i32(top);
        self.validate(initial, size);
    }

    // --- text ------------------------------------------------------------

    /// Records a text run at a baseline position.
    ///
    /// `glyph_bounds` is the conservative `[top, bottom]` extent of the
    /// run's glyphs relative to the baseline, as computed by the external
    /// text subsystem; when supplied, the accelerated `_TOPBOT` opcode
    /// variant is recorded with absolute vertical bounds appended.
    pub fn draw_text(
        &mut self,
        text: &[u8],
        x: f32,
        y: f32,
        paint: &Paint,
        glyph_bounds: Option<[f32; 2]>,
    ) {
        // op + paint index + length + chars + x + y
        let mut size = 3 * WORD_SIZE + align4(text.len() as u32) + 8;
        if glyph_bounds.is_some() {
            size += 8;
        }
        let op = if glyph_bounds.is_some() {
            Op::DrawTextTopBot
        } else {
            Op::DrawText
        };
        let initial = self.add_draw(op, &mut size);
        self.check_paint_slot(initial, size, op);
        self.add_paint(Some(paint));
        self.add_text(text);
        self.writer.append_f32(x);
        self.writer.append_f32(y);
        if let Some([top, bottom]) = glyph_bounds {
            self.writer.append_f32(top + y);
            self.writer.append_f32(bottom + y);
        }
        self.validate(initial, size);
    }

    /// Records per-glyph positioned text. When every position shares one y,
    /// the horizontal variant is recorded instead, halving the point data.
    pub fn draw_pos_text(
        &mut self,
        text: &[u8],
        pos: &[Point],
        paint: &Paint,
        glyph_bounds: Option<[f32; 2]>,
    ) {
        let count = pos.len() as u32;
        if count == 0 {
            return;
        }

        let first_y = pos[0].y as f32;
        let mut min_y = first_y;
        let mut max_y = first_y;
        let mut can_use_h = true;
        for p in &pos[1..] {
            let y = p.y as f32;
            if y != first_y {
                can_use_h = false;
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }

        let fast_bounds = glyph_bounds.is_some();
        let fast = can_use_h && fast_bounds;

        // op + paint index + length + chars + point count
        let mut size = 3 * WORD_SIZE + align4(text.len() as u32) + WORD_SIZE;
        if can_use_h {
            if fast {
                size += 8;
            }
            // + constant y + x data
            size += WORD_SIZE + count * 4;
        } else {
            size += count * POINT_BYTES;
            if fast_bounds {
                size += 8;
            }
        }

        let op = if fast {
            Op::DrawPosTextHTopBot
        } else if can_use_h {
            Op::DrawPosTextH
        } else if fast_bounds {
            Op::DrawPosTextTopBot
        } else {
            Op::DrawPosText
        };
        let initial = self.add_draw(op, &mut size);
        self.check_paint_slot(initial, size, op);
        self.add_paint(Some(paint));
        self.add_text(text);
        self.writer.append_u32(count);
        if can_use_h {
            if let (true, Some([top, bottom])) = (fast, glyph_bounds) {
                self.writer.append_f32(top + first_y);
                self.writer.append_f32(bottom + first_y);
            }
            self.writer.append_f32(first_y);
            for p in pos {
                self.writer.append_f32(p.x as f32);
            }
        } else {
            for p in pos {
                self.writer.append_point(*p);
            }
            if let Some([top, bottom]) = glyph_bounds {
                self.writer.append_f32(top + min_y);
                self.writer.append_f32(bottom + max_y);
            }
        }
        self.validate(initial, size);
    }

    /// Records horizontally positioned text on a constant baseline.
    pub fn draw_pos_text_h(
        &mut self,
        text: &[u8],
        x_pos: &[f32],
        const_y: f32,
        paint: &Paint,
        glyph_bounds: Option<[f32; 2]>,
    ) {
        let count = x_pos.len() as u32;
        if count == 0 {
            return;
        }
        let fast = glyph_bounds.is_some();

        // op + paint index + length + chars + point count + y + x data
        let mut size = 3 * WORD_SIZE + align4(text.len() as u32) + WORD_SIZE;
        if fast {
            size += 8;
        }
        size += WORD_SIZE + count * 4;

        let op = if fast {
            Op::DrawPosTextHTopBot
        } else {
            Op::DrawPosTextH
        };
        let initial = self.add_draw(op, &mut size);
        self.check_paint_slot(initial, size, op);
        self.add_paint(Some(paint));
        self.add_text(text);
        self.writer.append_u32(count);
        if let Some([top, bottom]) = glyph_bounds {
            self.writer.append_f32(top + const_y);
            self.writer.append_f32(bottom + const_y);
        }
        self.writer.append_f32(const_y);
        for x in x_pos {
            self.writer.append_f32(*x);
        }
        self.validate(initial, size);
    }

    pub fn draw_text_on_path(
        &mut self,
        text: &[u8],
        path: &BezPath,
        transform: Option<Affine>,
        paint: &Paint,
    ) {
        let path_index = self.paths.append(path);
        // op + paint index + length + chars + path index + matrix
        let mut size = 3 * WORD_SIZE + align4(text.len() as u32) + WORD_SIZE + AFFINE_BYTES;
        let initial = self.add_draw(Op::DrawTextOnPath, &mut size);
        self.check_paint_slot(initial, size, Op::DrawTextOnPath);
        self.add_paint(Some(paint));
        self.add_text(text);
        self.writer.append_u32(path_index);
        self.writer
            .append_affine(transform.unwrap_or(Affine::IDENTITY));
        self.validate(initial, size);
    }

    // --- compound draws --------------------------------------------------

    pub fn draw_vertices(
        &mut self,
        mode: VertexMode,
        vertices: &[Point],
        texs: Option<&[Point]>,
        colors: Option<&[Color]>,
        blend: Option<BlendMode>,
        indices: Option<&[u16]>,
        paint: &Paint,
    ) {
        let count = vertices.len() as u32;
        debug_assert!(texs.is_none_or(|t| t.len() == vertices.len()));
        debug_assert!(colors.is_none_or(|c| c.len() == vertices.len()));

        let indices = indices.filter(|i| !i.is_empty());
        let mut flags = 0;
        if texs.is_some() {
            flags |= DRAW_VERTICES_HAS_TEXS;
        }
        if colors.is_some() {
            flags |= DRAW_VERTICES_HAS_COLORS;
        }
        if indices.is_some() {
            flags |= DRAW_VERTICES_HAS_INDICES;
        }
        if blend.is_some() {
            flags |= DRAW_VERTICES_HAS_XFER;
        }

        // op + paint index + flags + vertex mode + vertex count + vertices
        let mut size = 5 * WORD_SIZE + count * POINT_BYTES;
        if let Some(texs) = texs {
            size += texs.len() as u32 * POINT_BYTES;
        }
        if let Some(colors) = colors {
            size += colors.len() as u32 * 4;
        }
        if let Some(indices) = indices {
            // + index count + index data
            size += WORD_SIZE + align4(indices.len() as u32 * 2);
        }
        if blend.is_some() {
            size += WORD_SIZE;
        }

        let initial = self.add_draw(Op::DrawVertices, &mut size);
        self.check_paint_slot(initial, size, Op::DrawVertices);
        self.add_paint(Some(paint));
        self.writer.append_u32(flags);
        self.writer.append_u32(mode as u32);
        self.writer.append_u32(count);
        for vertex in vertices {
            self.writer.append_point(*vertex);
        }
        if let Some(texs) = texs {
            for tex in texs {
                self.writer.append_point(*tex);
            }
        }
        if let Some(colors) = colors {
            for color in colors {
                self.writer.append_u32(color.to_rgba8().to_u32());
            }
        }
        if let Some(indices) = indices {
            self.writer.append_u32(indices.len() as u32);
            self.writer.append_bytes_padded(bytemuck::cast_slice(indices));
        }
        if let Some(blend) = blend {
            self.writer
                .append_u32((blend.mix as u32) << 8 | blend.compose as u32);
        }
        self.validate(initial, size);
    }

    pub fn draw_picture(&mut self, picture: &Arc<Picture>) {
        let index = self.pictures.intern(picture);
        // op + picture index
        let mut size = 2 * WORD_SIZE;
        let initial = self.add_draw(Op::DrawPicture, &mut size);
        self.writer.append_u32(index);
        self.validate(initial, size);
    }

    /// Records an opaque data block for out-of-band consumers.
    pub fn draw_data(&mut self, data: &[u8]) {
        // op + length + data
        let mut size = 2 * WORD_SIZE + align4(data.len() as u32);
        let initial = self.add_draw(Op::DrawData, &mut size);
        self.writer.append_u32(data.len() as u32);
        self.writer.append_bytes_padded(data);
        self.validate(initial, size);
    }

    // --- annotations -----------------------------------------------------

    pub fn begin_comment_group(&mut self, description: &str) {
        // op + string
        let mut size = 2 * WORD_SIZE + align4(description.len() as u32 + 1);
        let initial = self.add_draw(Op::BeginCommentGroup, &mut size);
        self.writer.append_str(description);
        self.validate(initial, size);
    }

    pub fn add_comment(&mut self, keyword: &str, value: &str) {
        // op + two strings
        let mut size = 3 * WORD_SIZE
            + align4(keyword.len() as u32 + 1)
            + align4(value.len() as u32 + 1);
        let initial = self.add_draw(Op::Comment, &mut size);
        self.writer.append_str(keyword);
        self.writer.append_str(value);
        self.validate(initial, size);
    }

    pub fn end_comment_group(&mut self) {
        let mut size = WORD_SIZE;
        let initial = self.add_draw(Op::EndCommentGroup, &mut size);
        self.validate(initial, size);
    }

    // --- shared plumbing -------------------------------------------------

    fn add_draw(&mut self, op: Op, size: &mut u32) -> u32 {
        emit_header(&mut self.writer, op, size)
    }

    fn add_paint(&mut self, paint: Option<&Paint>) {
        let index = paint.map_or(0, |paint| self.paints.intern(paint));
        self.writer.append_u32(index);
    }

    fn add_bitmap(&mut self, bitmap: &Bitmap) {
        let index = self.bitmaps.intern(bitmap);
        self.writer.append_u32(index);
    }

    fn add_text(&mut self, text: &[u8]) {
        self.writer.append_u32(text.len() as u32);
        self.writer.append_bytes_padded(text);
    }

    fn append_optional_rect(&mut self, rect: Option<Rect>) {
        self.writer.append_u32(u32::from(rect.is_some()));
        if let Some(rect) = rect {
            self.writer.append_rect(rect);
        }
    }

    fn check_paint_slot(&self, initial: u32, size: u32, op: Op) {
        debug_assert_eq!(initial + paint_offset(op, size), self.writer.bytes_written());
    }

    fn record_paint_and_rect(&mut self, op: Op, rect: Rect, paint: &Paint) {
        // op + paint index + rect
        let mut size = 2 * WORD_SIZE + RECT_BYTES;
        let initial = self.add_draw(op, &mut size);
        self.check_paint_slot(initial, size, op);
        self.add_paint(Some(paint));
        self.writer.append_rect(rect);
        self.validate(initial, size);
    }

    fn validate(&self, initial: u32, size: u32) {
        debug_assert_eq!(self.writer.bytes_written(), initial + size);
    }
}

/// Extracts the rect a path traces, if it is exactly an axis-aligned
/// rectangle (a move followed by line segments, optionally closed).
fn path_as_rect(path: &BezPath) -> Option<Rect> {
    let mut points: SmallVec<[Point; 5]> = SmallVec::new();
    let mut closed = false;
    for element in path.elements() {
        if closed {
            return None;
        }
        match element {
            PathEl::MoveTo(p) if points.is_empty() => points.push(*p),
            PathEl::LineTo(p) if !points.is_empty() => points.push(*p),
            PathEl::ClosePath if !points.is_empty() => closed = true,
            _ => return None,
        }
        if points.len() > 5 {
            return None;
        }
    }
    if points.len() == 5 {
        if points[4] != points[0] {
            return None;
        }
        points.pop();
    }
    if points.len() != 4 {
        return None;
    }
    let [p0, p1, p2, p3] = [points[0], points[1], points[2], points[3]];
    let edges_h_v = p0.y == p1.y && p1.x == p2.x && p2.y == p3.y && p3.x == p0.x;
    let edges_v_h = p0.x == p1.x && p1.y == p2.y && p2.x == p3.x && p3.y == p0.y;
    (edges_h_v || edges_v_h).then(|| Rect::from_points(p0, p2))
}

fn rounded_rect_as_rect(rrect: &RoundedRect) -> Option<Rect> {
    let radii = rrect.radii();
    let square = [
        radii.top_left,
        radii.top_right,
        radii.bottom_right,
        radii.bottom_left,
    ]
    .iter()
    .all(|&r| r == 0.0);
    square.then(|| rrect.rect())
}

/// The oval a rounded rect degenerates to. Scalar corner radii can only
/// express the circular case, so this requires a square with half-width
/// radii.
fn rounded_rect_as_oval(rrect: &RoundedRect) -> Option<Rect> {
    let rect = rrect.rect();
    let radius = rect.width() * 0.5;
    if rect.width() != rect.height() {
        return None;
    }
    let radii = rrect.radii();
    let circular = [
        radii.top_left,
        radii.top_right,
        radii.bottom_right,
        radii.bottom_left,
    ]
    .iter()
    .all(|&r| r == radius);
    circular.then_some(rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::SIZE_MASK;
    use peniko::color::palette;
    use peniko::kurbo::Shape;

    fn commands(stream: &[u8]) -> Vec<(Op, u32, u32)> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < stream.len() as u32 {
            let (op, size) = peek_op_and_size(stream, offset);
            out.push((op, offset, size));
            offset += size;
        }
        out
    }

    #[test]
    fn sizes_sum_to_stream_length() {
        let mut rec = PictureRecorder::new(RecordFlags::DISABLE_RECORD_OPTIMIZATIONS);
        rec.save(SaveFlags::MATRIX_CLIP);
        rec.translate(2.0, 3.0);
        rec.clip_rect(Rect::new(0.0, 0.0, 10.0, 10.0), ClipOp::Intersect, true);
        rec.draw_rect(Rect::new(1.0, 1.0, 5.0, 5.0), &Paint::new(palette::css::RED));
        rec.restore();

        let total: u32 = commands(rec.stream()).iter().map(|&(_, _, size)| size).sum();
        assert_eq!(total, rec.stream().len() as u32);
    }

    #[test]
    fn placeholder_points_at_restore() {
        let mut rec = PictureRecorder::new(RecordFlags::EMPTY);
        rec.save(SaveFlags::MATRIX_CLIP);
        rec.clip_rect(Rect::new(0.0, 0.0, 4.0, 4.0), ClipOp::Intersect, false);
        rec.draw_rect(Rect::new(0.0, 0.0, 1.0, 1.0), &Paint::default());
        rec.restore();

        let cmds = commands(rec.stream());
        let &(_, clip_offset, clip_size) =
            cmds.iter().find(|&&(op, _, _)| op == Op::ClipRect).unwrap();
        let &(_, restore_offset, _) =
            cmds.iter().find(|&&(op, _, _)| op == Op::Restore).unwrap();
        let slot = clip_offset + clip_size - 4;
        let word: u32 =
            bytemuck::pod_read_unaligned(&rec.stream()[slot as usize..slot as usize + 4]);
        assert_eq!(word, restore_offset);
    }

    #[test]
    fn scopeless_clip_has_no_placeholder() {
        let mut rec = PictureRecorder::new(RecordFlags::EMPTY);
        rec.clip_rect(Rect::new(0.0, 0.0, 4.0, 4.0), ClipOp::Intersect, false);
        let cmds = commands(rec.stream());
        assert_eq!(cmds, vec![(Op::ClipRect, 0, 24)]);
    }

    #[test]
    fn restore_underflow_is_ignored() {
        let mut rec = PictureRecorder::new(RecordFlags::EMPTY);
        // Only meaningful in release builds; debug builds assert.
        if cfg!(not(debug_assertions)) {
            rec.restore();
            assert!(rec.stream().is_empty());
        }
    }

    #[test]
    fn rrect_reductions() {
        let mut rec = PictureRecorder::new(RecordFlags::DISABLE_RECORD_OPTIMIZATIONS);
        let paint = Paint::default();
        rec.draw_rrect(RoundedRect::new(0.0, 0.0, 4.0, 4.0, 0.0), &paint);
        rec.draw_rrect(RoundedRect::new(0.0, 0.0, 4.0, 4.0, 2.0), &paint);
        rec.draw_rrect(RoundedRect::new(0.0, 0.0, 6.0, 4.0, 1.0), &paint);
        let ops: Vec<Op> = commands(rec.stream()).iter().map(|&(op, _, _)| op).collect();
        assert_eq!(ops, vec![Op::DrawRect, Op::DrawOval, Op::DrawRRect]);
    }

    #[test]
    fn rect_path_clips_as_rect() {
        let mut rec = PictureRecorder::new(RecordFlags::EMPTY);
        let path = Rect::new(1.0, 2.0, 3.0, 4.0).to_path(0.1);
        rec.clip_path(&path, ClipOp::Intersect, false);
        let cmds = commands(rec.stream());
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].0, Op::ClipRect);
    }

    #[test]
    fn path_as_rect_rejects_non_rects() {
        let mut path = BezPath::new();
        path.move_to((0.0, 0.0));
        path.line_to((4.0, 1.0));
        path.line_to((4.0, 4.0));
        path.line_to((0.0, 4.0));
        path.close_path();
        assert!(path_as_rect(&path).is_none());

        let circle = peniko::kurbo::Circle::new((0.0, 0.0), 2.0).to_path(0.1);
        assert!(path_as_rect(&circle).is_none());
    }

    #[test]
    fn pos_text_with_constant_y_uses_h_variant() {
        let mut rec = PictureRecorder::new(RecordFlags::EMPTY);
        let paint = Paint::default();
        let pos = [Point::new(0.0, 5.0), Point::new(8.0, 5.0)];
        rec.draw_pos_text(b"ab", &pos, &paint, None);
        let varied = [Point::new(0.0, 5.0), Point::new(8.0, 6.0)];
        rec.draw_pos_text(b"ab", &varied, &paint, Some([-1.0, 1.0]));
        let ops: Vec<Op> = commands(rec.stream()).iter().map(|&(op, _, _)| op).collect();
        assert_eq!(ops, vec![Op::DrawPosTextH, Op::DrawPosTextTopBot]);
    }

    #[test]
    fn oversized_command_grows_header() {
        let mut rec = PictureRecorder::new(RecordFlags::EMPTY);
        let data = vec![0_u8; SIZE_MASK as usize];
        rec.draw_data(&data);
        let (op, size) = peek_op_and_size(rec.stream(), 0);
        assert_eq!(op, Op::DrawData);
        // header + overflow word + length word + payload
        assert_eq!(size, 12 + align4(SIZE_MASK));
        assert_eq!(size, rec.stream().len() as u32);
    }
}
