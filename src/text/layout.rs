// Text layout
//
// Turns a string into wrapped lines and then into one textured quad per
// glyph. Layout runs in the font's normalized space; the font size is only
// applied when drawing, so resizing text never needs a relayout.
//
// Wrapping is greedy: words fill a line until the next one would exceed the
// maximum width. Words are never split, so a word wider than the line
// occupies a line of its own and overflows it.
//
// Every `\n` closes a line, blank or not. Whatever follows the last newline
// becomes a line only if it holds glyphs, so "a\n" and "a" both give one line
// while "\n" and "a\n\n" end with a blank one.

use glam::Vec2;
use serde::Deserialize;
use super::font::{Character, FontMetrics};

/// Horizontal alignment of wrapped lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Centre,
    Right,
}

/// One vertex of a glyph quad: position and atlas coordinate, interleaved.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TextVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Characters between two spaces.
#[derive(Debug, Clone, Default)]
pub struct Word {
    characters: Vec<Character>,
    width: f32,
}

impl Word {
    fn add_character(&mut self, character: Character, tracking: f32) {
        self.width += character.advance + tracking;
        self.characters.push(character);
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

/// Words that share a line.
#[derive(Debug, Clone)]
pub struct Line {
    words: Vec<Word>,
    width: f32,
    max_width: f32,
    space_width: f32,
}

impl Line {
    fn new(space_width: f32, max_width: f32) -> Self {
        Self {
            words: Vec::new(),
            width: 0.0,
            max_width,
            space_width,
        }
    }

    /// Appends `word` if it still fits, including the separating space.
    fn try_add_word(&mut self, word: &Word) -> bool {
        let additional = word.width + self.separator();
        if self.width + additional <= self.max_width {
            self.words.push(word.clone());
            self.width += additional;
            true
        } else {
            false
        }
    }

    fn force_add_word(&mut self, word: Word) {
        self.width += word.width + self.separator();
        self.words.push(word);
    }

    fn separator(&self) -> f32 {
        if self.words.is_empty() {
            0.0
        } else {
            self.space_width
        }
    }

    /// No glyphs on this line (only whitespace, or nothing).
    pub fn is_blank(&self) -> bool {
        self.words.iter().all(Word::is_empty)
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn max_width(&self) -> f32 {
        self.max_width
    }
}

/// Inputs of a layout pass besides the string and font.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutSettings {
    pub max_line_width: f32,
    pub align: TextAlign,
    /// Extra advance added after every glyph.
    pub tracking: f32,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            max_line_width: 1.0,
            align: TextAlign::Left,
            tracking: 0.0,
        }
    }
}

/// Glyph quads ready for upload: six vertices per glyph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextMesh {
    vertices: Vec<TextVertex>,
}

impl TextMesh {
    pub fn vertices(&self) -> &[TextVertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn glyph_count(&self) -> usize {
        self.vertices.len() / 6
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Min and max corner over all vertex positions.
    pub fn bounds(&self) -> Option<(Vec2, Vec2)> {
        let mut positions = self.vertices.iter().map(|v| Vec2::from(v.position));
        let first = positions.next()?;
        Some(positions.fold((first, first), |(min, max), p| (min.min(p), max.max(p))))
    }
}

/// Result of a layout pass.
#[derive(Debug, Clone)]
pub struct TextLayout {
    pub lines: Vec<Line>,
    pub mesh: TextMesh,
    /// Widest line by total height of all lines.
    pub bounding: Vec2,
}

impl TextLayout {
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

/// Lay out `text` with `font`. Pure; safe to run off the render thread.
pub fn layout_text(text: &str, font: &FontMetrics, settings: &LayoutSettings) -> TextLayout {
    let lines = create_structure(text, font, settings);
    let mesh = create_quad_vertices(&lines, font, settings);

    let widest = lines.iter().map(Line::width).fold(0.0f32, f32::max);
    let bounding = Vec2::new(widest, lines.len() as f32 * font.line_height());

    TextLayout { lines, mesh, bounding }
}

fn create_structure(text: &str, font: &FontMetrics, settings: &LayoutSettings) -> Vec<Line> {
    let new_line = || Line::new(font.space_width(), settings.max_line_width);

    let mut lines = Vec::new();
    let mut current_line = new_line();
    let mut current_word = Word::default();

    for c in text.chars() {
        if c == '\n' {
            place_word(&mut lines, &mut current_line, std::mem::take(&mut current_word), new_line);
            lines.push(std::mem::replace(&mut current_line, new_line()));
            continue;
        }

        if c.is_whitespace() {
            place_word(&mut lines, &mut current_line, std::mem::take(&mut current_word), new_line);
            continue;
        }

        match font.character(c) {
            Some(character) => current_word.add_character(*character, settings.tracking),
            None => log::trace!("No glyph for {:?}, skipping", c),
        }
    }

    place_word(&mut lines, &mut current_line, current_word, new_line);
    // An unterminated tail without glyphs is not a line.
    if !current_line.is_blank() {
        lines.push(current_line);
    }

    lines
}

fn place_word(lines: &mut Vec<Line>, current_line: &mut Line, word: Word, new_line: impl Fn() -> Line) {
    if current_line.try_add_word(&word) {
        return;
    }

    // Whitespace that no longer fits is absorbed by the line break.
    if word.is_empty() {
        if !current_line.is_blank() {
            lines.push(std::mem::replace(current_line, new_line()));
        }
        return;
    }

    if current_line.is_blank() {
        // Leading whitespace is dropped rather than pushing the word past the edge.
        *current_line = new_line();
    } else {
        lines.push(std::mem::replace(current_line, new_line()));
    }
    if current_line.try_add_word(&word) {
        return;
    }

    // Wider than a whole line: it gets one to itself.
    current_line.force_add_word(word);
}

fn create_quad_vertices(lines: &[Line], font: &FontMetrics, settings: &LayoutSettings) -> TextMesh {
    let glyphs: usize = lines
        .iter()
        .flat_map(|line| line.words.iter())
        .map(|word| word.characters.len())
        .sum();
    let mut vertices = Vec::with_capacity(glyphs * 6);

    let mut cursor_y = 0.0;
    for line in lines {
        let mut cursor_x = match settings.align {
            TextAlign::Left => 0.0,
            TextAlign::Centre => (line.max_width - line.width) / 2.0,
            TextAlign::Right => line.max_width - line.width,
        };

        for (i, word) in line.words.iter().enumerate() {
            if i > 0 {
                cursor_x += font.space_width();
            }
            for character in &word.characters {
                add_vertices_for_character(cursor_x, cursor_y, character, &mut vertices);
                cursor_x += character.advance + settings.tracking;
            }
        }

        cursor_y += font.line_height();
    }

    TextMesh { vertices }
}

fn add_vertices_for_character(cursor_x: f32, cursor_y: f32, character: &Character, vertices: &mut Vec<TextVertex>) {
    let min = Vec2::new(cursor_x, cursor_y) + character.offset;
    let max = min + character.size;
    let (uv_min, uv_max) = (character.tex_min, character.tex_max);

    let corners = [
        (Vec2::new(min.x, min.y), Vec2::new(uv_min.x, uv_min.y)),
        (Vec2::new(min.x, max.y), Vec2::new(uv_min.x, uv_max.y)),
        (Vec2::new(max.x, max.y), Vec2::new(uv_max.x, uv_max.y)),
        (Vec2::new(max.x, max.y), Vec2::new(uv_max.x, uv_max.y)),
        (Vec2::new(max.x, min.y), Vec2::new(uv_max.x, uv_min.y)),
        (Vec2::new(min.x, min.y), Vec2::new(uv_min.x, uv_min.y)),
    ];

    vertices.extend(corners.iter().map(|(position, uv)| TextVertex {
        position: position.to_array(),
        uv: uv.to_array(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font() -> FontMetrics {
        FontMetrics::ascii_grid()
    }

    fn settings(max_line_width: f32, align: TextAlign) -> LayoutSettings {
        LayoutSettings {
            max_line_width,
            align,
            tracking: 0.0,
        }
    }

    fn line_text(line: &Line) -> Vec<String> {
        line.words()
            .iter()
            .map(|w| w.characters().iter().filter_map(|c| char::from_u32(c.id)).collect())
            .collect()
    }

    #[test]
    fn test_word_width_accumulates_advance_and_tracking() {
        let layout = layout_text("abc", &font(), &LayoutSettings { tracking: 0.25, ..settings(10.0, TextAlign::Left) });
        assert_eq!(layout.lines[0].words()[0].width(), 2.25);
    }

    #[test]
    fn test_line_width_includes_spaces() {
        let layout = layout_text("ab cd", &font(), &settings(10.0, TextAlign::Left));
        assert_eq!(layout.line_count(), 1);
        assert_eq!(layout.lines[0].width(), 2.5);
    }

    #[test]
    fn test_wraps_when_word_does_not_fit() {
        // "ab cd" is 2.5 wide.
        let layout = layout_text("ab cd ef", &font(), &settings(2.5, TextAlign::Left));

        assert_eq!(layout.line_count(), 2);
        assert_eq!(line_text(&layout.lines[0]), vec!["ab", "cd"]);
        assert_eq!(line_text(&layout.lines[1]), vec!["ef"]);
    }

    #[test]
    fn test_newline_forces_break() {
        let layout = layout_text("ab\ncd", &font(), &settings(10.0, TextAlign::Left));
        assert_eq!(layout.line_count(), 2);
        assert_eq!(line_text(&layout.lines[1]), vec!["cd"]);
    }

    #[test]
    fn test_blank_input_has_no_lines() {
        assert_eq!(layout_text("", &font(), &settings(1.0, TextAlign::Left)).line_count(), 0);
        assert_eq!(layout_text("   ", &font(), &settings(1.0, TextAlign::Left)).line_count(), 0);
        assert!(layout_text("", &font(), &settings(1.0, TextAlign::Left)).mesh.is_empty());
    }

    #[test]
    fn test_trailing_newline_closes_line() {
        let count = |text: &str| layout_text(text, &font(), &settings(10.0, TextAlign::Left)).line_count();

        assert_eq!(count("a"), 1);
        assert_eq!(count("a\n"), 1);
        assert_eq!(count("\n"), 1);
        assert_eq!(count("a\n\n"), 2);
        assert_eq!(count("\na"), 2);
        assert_eq!(count("a\n  "), 1);
    }

    #[test]
    fn test_leading_whitespace_dropped_when_word_does_not_fit() {
        let layout = layout_text("   ab", &font(), &settings(1.0, TextAlign::Left));

        assert_eq!(layout.line_count(), 1);
        assert_eq!(line_text(&layout.lines[0]), vec!["ab"]);
        assert_eq!(layout.lines[0].width(), 1.0);
    }

    #[test]
    fn test_leading_whitespace_kept_when_it_fits() {
        let layout = layout_text("  ab", &font(), &settings(10.0, TextAlign::Left));
        assert_eq!(layout.lines[0].width(), 2.0);
        assert_eq!(layout.mesh.vertices()[0].position[0], 1.0);
    }

    #[test]
    fn test_six_vertices_per_glyph() {
        let layout = layout_text("ab c", &font(), &settings(10.0, TextAlign::Left));
        assert_eq!(layout.mesh.vertex_count(), 18);
        assert_eq!(layout.mesh.glyph_count(), 3);
    }

    #[test]
    fn test_missing_glyphs_are_skipped() {
        let layout = layout_text("a\u{2603}b", &font(), &settings(10.0, TextAlign::Left));
        assert_eq!(layout.mesh.glyph_count(), 2);
        assert_eq!(layout.lines[0].width(), 1.0);
    }

    #[test]
    fn test_quad_corners_and_uvs() {
        let layout = layout_text("A", &font(), &settings(10.0, TextAlign::Left));
        let vertices = layout.mesh.vertices();
        let a = font().character('A').copied().unwrap();

        assert_eq!(vertices[0].position, [0.0, 0.0]);
        assert_eq!(vertices[2].position, [0.5, 1.0]);
        assert_eq!(vertices[0].uv, a.tex_min.to_array());
        assert_eq!(vertices[2].uv, a.tex_max.to_array());
        assert_eq!(vertices[5], vertices[0]);
    }

    #[test]
    fn test_second_line_is_one_line_height_down() {
        let layout = layout_text("a\nb", &font(), &settings(10.0, TextAlign::Left));
        let second = layout.mesh.vertices()[6];
        assert_eq!(second.position, [0.0, 1.0]);
    }

    #[test]
    fn test_centre_alignment_offset() {
        let layout = layout_text("ab", &font(), &settings(3.0, TextAlign::Centre));
        assert_eq!(layout.mesh.vertices()[0].position[0], 1.0);
    }

    #[test]
    fn test_bounding_is_widest_line_by_height() {
        let layout = layout_text("abcd\nab", &font(), &settings(10.0, TextAlign::Left));
        assert_eq!(layout.bounding, Vec2::new(2.0, 2.0));

        let (min, max) = layout.mesh.bounds().unwrap();
        assert_eq!(min, Vec2::ZERO);
        assert_eq!(max, Vec2::new(2.0, 2.0));
    }

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<TextVertex>(), 16);
        let layout = layout_text("ab", &font(), &settings(10.0, TextAlign::Left));
        assert_eq!(layout.mesh.as_bytes().len(), 12 * 16);
    }
}
