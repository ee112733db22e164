// Copyright 2026 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Paint values and the opaque handles to effect objects.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use peniko::{BlendMode, Color};

/// How geometry is filled or stroked.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum PaintStyle {
    #[default]
    Fill = 0,
    Stroke = 1,
    StrokeAndFill = 2,
}

/// Opaque, reference-counted handle to an effect owned by one of the effect
/// subsystems (shaders, filters, loopers, ...).
///
/// The recorder never interprets the flattened contents; it only needs a
/// stable identity, so equality and hashing go through the storage pointer.
#[derive(Clone, Debug)]
pub struct EffectRef(Arc<[u8]>);

impl EffectRef {
    pub fn new(flattened: impl Into<Arc<[u8]>>) -> Self {
        Self(flattened.into())
    }

    pub fn data(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for EffectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EffectRef {}

impl Hash for EffectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

/// Everything needed to rasterize a primitive: color, style, and optional
/// references into the effect subsystems.
///
/// Paints are interned into the paint dictionary, so cheap equality and
/// hashing matter more than field privacy here; the color contributes its
/// packed RGBA8 form, which is also the representation the stream stores for
/// DRAW_CLEAR and vertex colors.
#[derive(Clone, Debug)]
pub struct Paint {
    pub color: Color,
    pub style: PaintStyle,
    pub stroke_width: f32,
    pub anti_alias: bool,
    /// Blend applied when compositing; `None` means default source-over.
    pub blend_mode: Option<BlendMode>,
    pub path_effect: Option<EffectRef>,
    pub shader: Option<EffectRef>,
    pub mask_filter: Option<EffectRef>,
    pub color_filter: Option<EffectRef>,
    pub rasterizer: Option<EffectRef>,
    pub looper: Option<EffectRef>,
    pub image_filter: Option<EffectRef>,
}

impl Paint {
    /// A fill paint of the given color with no effects.
    pub fn new(color: Color) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }

    /// True when the paint carries nothing beyond color and basic style: no
    /// blend override and no effect references. Only simple paints can be
    /// folded out of a save-layer by the peephole optimizer.
    pub fn is_simple(&self) -> bool {
        self.blend_mode.is_none()
            && self.path_effect.is_none()
            && self.shader.is_none()
            && self.mask_filter.is_none()
            && self.color_filter.is_none()
            && self.rasterizer.is_none()
            && self.looper.is_none()
            && self.image_filter.is_none()
    }

    /// The packed RGBA8 color word stored in the stream.
    pub fn color_u32(&self) -> u32 {
        self.color.to_rgba8().to_u32()
    }
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            style: PaintStyle::Fill,
            stroke_width: 0.0,
            anti_alias: false,
            blend_mode: None,
            path_effect: None,
            shader: None,
            mask_filter: None,
            color_filter: None,
            rasterizer: None,
            looper: None,
            image_filter: None,
        }
    }
}

impl PartialEq for Paint {
    fn eq(&self, other: &Self) -> bool {
        self.color_u32() == other.color_u32()
            && self.style == other.style
            && self.stroke_width.to_bits() == other.stroke_width.to_bits()
            && self.anti_alias == other.anti_alias
            && self.blend_mode == other.blend_mode
            && self.path_effect == other.path_effect
            && self.shader == other.shader
            && self.mask_filter == other.mask_filter
            && self.color_filter == other.color_filter
            && self.rasterizer == other.rasterizer
            && self.looper == other.looper
            && self.image_filter == other.image_filter
    }
}

impl Eq for Paint {}

impl Hash for Paint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.color_u32().hash(state);
        self.style.hash(state);
        self.stroke_width.to_bits().hash(state);
        self.anti_alias.hash(state);
        self.blend_mode
            .map(|b| (b.mix as u8, b.compose as u8))
            .hash(state);
        self.path_effect.hash(state);
        self.shader.hash(state);
        self.mask_filter.hash(state);
        self.color_filter.hash(state);
        self.rasterizer.hash(state);
        self.looper.hash(state);
        self.image_filter.hash(state);
    }
}
