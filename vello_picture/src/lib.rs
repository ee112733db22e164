// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display list recording into a compact binary command stream.
//!
//! A [`PictureRecorder`] turns a stream of 2D graphics calls — transforms,
//! clips, save/restore scoping, and draw primitives — into a self-describing
//! byte stream of variable-length commands plus four interned side tables
//! (paints, paths, bitmaps, nested pictures), packaged as an immutable
//! [`Picture`] for later linear playback.
//!
//! Three mechanisms do the heavy lifting:
//!
//! - A header codec packing `(opcode, byte count)` into one word, with an
//!   overflow word for commands past 16 MiB.
//! - A scope stack that threads a linked list of placeholder words through
//!   the clip commands of each scope; the matching `restore` back-patches
//!   them with its own offset so playback can skip empty scopes in O(1).
//! - A restore-time peephole optimizer that erases state-only save scopes
//!   and folds `save_layer` / bitmap-draw / `restore` sandwiches into a
//!   single draw carrying the layer's alpha.
//!
//! The recorder is strictly single-threaded and preserves call order
//! exactly; the stream is a private in-memory representation, not a
//! persistence format.

// LINEBENDER LINT SET - lib.rs - v3
// See https://linebender.org/wiki/canonical-lints/
// These lints shouldn't apply to examples or tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
// These lints shouldn't apply to examples.
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![forbid(unsafe_code)]
#![expect(
    clippy::cast_possible_truncation,
    reason = "Stream scalars are f32 and offsets are u32; narrowing at the
write boundary is the serialization contract."
)]

mod bitmap;
mod dictionary;
mod op;
mod optimize;
mod paint;
mod picture;
mod record;
mod region;
mod writer;

pub use bitmap::Bitmap;
pub use dictionary::{Dictionary, PathStore, PictureStore};
pub use op::{
    pack_clip_params, peek_op_and_size, unpack_clip_params, ClipOp, Op, PointMode, VertexMode,
    SIZE_MASK,
};
pub use paint::{EffectRef, Paint, PaintStyle};
pub use picture::{Command, Commands, Picture, StreamError};
pub use record::{
    BitmapRectFlags, BoundsHierarchy, PictureRecorder, RecordFlags, SaveFlags, StateTree,
};
pub use region::{IntRect, Region};
pub use writer::Writer;

pub use peniko;
pub use peniko::color;
pub use peniko::kurbo;
