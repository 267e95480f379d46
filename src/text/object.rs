// Text object
//
// Owns a string, its layout and its mesh. Setters only stage changes; the
// relayout happens on the next `update` so several edits in one frame cost a
// single layout pass. The previous mesh stays visible until the new one is
// complete.

use glam::{Vec2, Vec4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use super::driver::Driver;
use super::font::FontMetrics;
use super::layout::{layout_text, LayoutSettings, Line, TextAlign, TextMesh};

static NEXT_TEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a text object, used to key GPU-side resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextId(u64);

impl TextId {
    fn next() -> Self {
        Self(NEXT_TEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextState {
    Idle,
    PendingRelayout,
}

/// Distance-field outline applied when drawing. Border and glow exclude each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextEffect {
    None,
    Border { driver: Driver, size: f32 },
    Glow { driver: Driver, size: f32 },
}

#[derive(Debug, Default)]
struct PendingChanges {
    text: Option<String>,
    font: Option<Arc<FontMetrics>>,
    max_line_width: Option<f32>,
    align: Option<TextAlign>,
}

pub struct TextObject {
    id: TextId,
    text: String,
    font: Arc<FontMetrics>,
    font_size: f32,
    settings: LayoutSettings,
    position: Vec2,

    lines: Vec<Line>,
    mesh: TextMesh,
    bounding: Vec2,
    mesh_revision: u64,

    state: TextState,
    pending: PendingChanges,

    text_colour: Vec4,
    border_colour: Vec4,
    effect: TextEffect,
}

impl TextObject {
    /// Create a text object and lay it out immediately.
    pub fn new(text: impl Into<String>, font: Arc<FontMetrics>, font_size: f32, max_line_width: f32, align: TextAlign) -> Self {
        let mut object = Self {
            id: TextId::next(),
            text: text.into(),
            font,
            font_size,
            settings: LayoutSettings {
                max_line_width,
                align,
                tracking: 0.0,
            },
            position: Vec2::ZERO,
            lines: Vec::new(),
            mesh: TextMesh::default(),
            bounding: Vec2::ZERO,
            mesh_revision: 0,
            state: TextState::Idle,
            pending: PendingChanges::default(),
            text_colour: Vec4::new(0.0, 0.0, 0.0, 1.0),
            border_colour: Vec4::new(0.0, 0.0, 0.0, 1.0),
            effect: TextEffect::None,
        };
        object.relayout();
        object
    }

    pub fn with_tracking(mut self, tracking: f32) -> Self {
        self.settings.tracking = tracking;
        self.relayout();
        self
    }

    /// Stage a new string. Setting the current string again is ignored.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        let current = self.pending.text.as_deref().unwrap_or(&self.text);
        if text != current {
            self.pending.text = Some(text);
            self.state = TextState::PendingRelayout;
        }
    }

    pub fn set_font(&mut self, font: Arc<FontMetrics>) {
        self.pending.font = Some(font);
        self.state = TextState::PendingRelayout;
    }

    pub fn set_max_line_width(&mut self, max_line_width: f32) {
        if max_line_width != self.settings.max_line_width {
            self.pending.max_line_width = Some(max_line_width);
            self.state = TextState::PendingRelayout;
        }
    }

    pub fn set_alignment(&mut self, align: TextAlign) {
        if align != self.settings.align {
            self.pending.align = Some(align);
            self.state = TextState::PendingRelayout;
        }
    }

    /// Layout is size-independent, so this applies without a relayout.
    pub fn set_font_size(&mut self, font_size: f32) {
        self.font_size = font_size;
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    pub fn set_text_colour(&mut self, colour: Vec4) {
        self.text_colour = colour;
    }

    pub fn set_border_colour(&mut self, colour: Vec4) {
        self.border_colour = colour;
    }

    /// Outline the text, replacing any glow.
    pub fn set_border(&mut self, driver: Driver) {
        let size = driver.value();
        self.effect = TextEffect::Border { driver, size };
    }

    /// Make the text glow, replacing any border.
    pub fn set_glowing(&mut self, driver: Driver) {
        let size = driver.value();
        self.effect = TextEffect::Glow { driver, size };
    }

    /// Clear both border and glow.
    pub fn remove_border(&mut self) {
        self.effect = TextEffect::None;
    }

    /// Apply staged changes and advance the effect driver.
    pub fn update(&mut self, delta: f32) {
        if self.state == TextState::PendingRelayout {
            let pending = std::mem::take(&mut self.pending);
            if let Some(text) = pending.text {
                self.text = text;
            }
            if let Some(font) = pending.font {
                self.font = font;
            }
            if let Some(max_line_width) = pending.max_line_width {
                self.settings.max_line_width = max_line_width;
            }
            if let Some(align) = pending.align {
                self.settings.align = align;
            }
            self.relayout();
        }

        match &mut self.effect {
            TextEffect::Border { driver, size } | TextEffect::Glow { driver, size } => {
                *size = driver.update(delta);
            }
            TextEffect::None => {}
        }
    }

    fn relayout(&mut self) {
        let layout = layout_text(&self.text, &self.font, &self.settings);

        self.lines = layout.lines;
        self.mesh = layout.mesh;
        self.bounding = layout.bounding;
        self.mesh_revision += 1;
        self.state = TextState::Idle;

        log::debug!(
            "Text {:?} laid out: {} lines, {} glyphs",
            self.id,
            self.lines.len(),
            self.mesh.glyph_count()
        );
    }

    /// Distance at which the glyph edge starts, grows slightly with size.
    pub fn edge_start(&self) -> f32 {
        let size = 0.5 * self.font_size;
        (size / 300.0) + (137.0 / 300.0)
    }

    /// Width of the antialiased edge band, narrower for larger text.
    pub fn antialias_size(&self) -> f32 {
        let size = 0.5 * self.font_size;
        let size = (size - 1.0) / (1.0 + size / 4.0) + 1.0;
        0.1 / size
    }

    pub fn total_border_size(&self) -> f32 {
        match self.effect {
            TextEffect::Border { size, .. } => {
                if size == 0.0 {
                    0.0
                } else {
                    self.edge_start() + size
                }
            }
            TextEffect::Glow { .. } => self.edge_start(),
            TextEffect::None => 0.0,
        }
    }

    pub fn glow_size(&self) -> f32 {
        match self.effect {
            TextEffect::Border { .. } => self.antialias_size(),
            TextEffect::Glow { size, .. } => size,
            TextEffect::None => 0.0,
        }
    }

    pub fn id(&self) -> TextId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn font(&self) -> &Arc<FontMetrics> {
        &self.font
    }

    pub fn font_size(&self) -> f32 {
        self.font_size
    }

    pub fn settings(&self) -> &LayoutSettings {
        &self.settings
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn state(&self) -> TextState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == TextState::Idle
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn number_of_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn mesh(&self) -> &TextMesh {
        &self.mesh
    }

    /// Bumped on every relayout.
    pub fn mesh_revision(&self) -> u64 {
        self.mesh_revision
    }

    /// Layout bounds scaled by the font size.
    pub fn bounding(&self) -> Vec2 {
        self.bounding * self.font_size
    }

    pub fn text_colour(&self) -> Vec4 {
        self.text_colour
    }

    pub fn border_colour(&self) -> Vec4 {
        self.border_colour
    }

    pub fn effect(&self) -> &TextEffect {
        &self.effect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::driver::DriverKind;

    fn object(text: &str) -> TextObject {
        TextObject::new(text, Arc::new(FontMetrics::ascii_grid()), 2.0, 2.0, TextAlign::Left)
    }

    #[test]
    fn test_new_lays_out_immediately() {
        let text = object("a bb ccc");
        assert!(text.is_loaded());
        assert_eq!(text.number_of_lines(), 2);
        assert_eq!(text.mesh().glyph_count(), 6);
        assert_eq!(text.mesh_revision(), 1);
    }

    #[test]
    fn test_set_text_waits_for_update() {
        let mut text = object("ab");
        text.set_text("abcdefgh");

        assert_eq!(text.state(), TextState::PendingRelayout);
        assert_eq!(text.mesh().glyph_count(), 2);

        text.update(0.0);
        assert_eq!(text.state(), TextState::Idle);
        assert_eq!(text.text(), "abcdefgh");
        assert_eq!(text.mesh().glyph_count(), 8);
        assert_eq!(text.number_of_lines(), 1);
        assert_eq!(text.mesh_revision(), 2);
    }

    #[test]
    fn test_same_text_is_not_staged() {
        let mut text = object("ab");
        text.set_text("ab");
        assert!(text.is_loaded());

        text.update(0.0);
        assert_eq!(text.mesh_revision(), 1);
    }

    #[test]
    fn test_font_size_needs_no_relayout() {
        let mut text = object("ab");
        text.set_font_size(4.0);

        assert!(text.is_loaded());
        assert_eq!(text.bounding(), Vec2::new(4.0, 4.0));
    }

    #[test]
    fn test_width_change_relayouts() {
        let mut text = object("ab cd");
        assert_eq!(text.number_of_lines(), 2);

        text.set_max_line_width(10.0);
        text.update(0.0);
        assert_eq!(text.number_of_lines(), 1);
    }

    #[test]
    fn test_border_and_glow_exclude_each_other() {
        let mut text = object("ab");

        text.set_border(Driver::constant(0.1));
        assert!(matches!(text.effect(), TextEffect::Border { .. }));

        text.set_glowing(Driver::constant(0.3));
        assert!(matches!(text.effect(), TextEffect::Glow { .. }));
        assert_eq!(text.glow_size(), 0.3);

        text.remove_border();
        assert_eq!(*text.effect(), TextEffect::None);
        assert_eq!(text.total_border_size(), 0.0);
        assert_eq!(text.glow_size(), 0.0);
    }

    #[test]
    fn test_border_sizes() {
        let mut text = object("ab");
        text.set_border(Driver::constant(0.2));

        assert!((text.total_border_size() - (text.edge_start() + 0.2)).abs() < 1e-6);
        assert_eq!(text.glow_size(), text.antialias_size());

        text.set_border(Driver::constant(0.0));
        assert_eq!(text.total_border_size(), 0.0);
    }

    #[test]
    fn test_edge_math() {
        // Font size 2 gives a half-size of 1.
        let text = object("ab");
        assert!((text.edge_start() - 138.0 / 300.0).abs() < 1e-6);
        assert!((text.antialias_size() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_update_advances_effect_driver() {
        let mut text = object("ab");
        text.set_glowing(Driver::new(DriverKind::Linear { start: 0.0, end: 1.0 }, 1.0));
        text.update(0.5);
        assert!((text.glow_size() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(object("a").id(), object("a").id());
    }
}
