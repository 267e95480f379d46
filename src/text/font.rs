// Font metrics
//
// Per-glyph metrics of a distance-field font, in normalized glyph space
// (the font's line height is 1.0). Metrics are produced once by a loader
// and then shared read-only between text objects.

use anyhow::{Context, Result};
use glam::Vec2;
use std::collections::HashMap;
use std::path::Path;

/// Padding the distance-field shader expects around every glyph, in pixels.
const DESIRED_PADDING: f32 = 8.0;

/// Metrics of one glyph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Character {
    pub id: u32,
    /// Top-left atlas coordinate.
    pub tex_min: Vec2,
    /// Bottom-right atlas coordinate.
    pub tex_max: Vec2,
    /// Bearing from the pen position to the quad's top-left corner.
    pub offset: Vec2,
    /// Quad size.
    pub size: Vec2,
    pub advance: f32,
}

/// Glyph metrics for one font.
#[derive(Debug, Clone)]
pub struct FontMetrics {
    characters: HashMap<u32, Character>,
    space_width: f32,
    line_height: f32,
}

impl FontMetrics {
    pub fn new(space_width: f32, line_height: f32) -> Self {
        Self {
            characters: HashMap::new(),
            space_width,
            line_height,
        }
    }

    pub fn with_character(mut self, character: Character) -> Self {
        self.insert(character);
        self
    }

    pub fn insert(&mut self, character: Character) {
        self.characters.insert(character.id, character);
    }

    pub fn character(&self, c: char) -> Option<&Character> {
        self.characters.get(&(c as u32))
    }

    pub fn space_width(&self) -> f32 {
        self.space_width
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// A fixed-width font laid out as a 16x16 grid of the first 256 code
    /// points. Each glyph is half as wide as a line is tall.
    pub fn ascii_grid() -> Self {
        let cell = 1.0 / 16.0;
        let mut font = Self::new(0.5, 1.0);

        for id in 33..256u32 {
            let column = (id % 16) as f32;
            let row = (id / 16) as f32;
            font.insert(Character {
                id,
                tex_min: Vec2::new(column * cell, row * cell),
                tex_max: Vec2::new((column + 1.0) * cell, (row + 1.0) * cell),
                offset: Vec2::ZERO,
                size: Vec2::new(0.5, 1.0),
                advance: 0.5,
            });
        }

        font
    }

    /// Load metrics from a text-format `.fnt` file
    pub fn load_fnt<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read font file: {:?}", path))?;

        let font = Self::parse_fnt(&source)
            .with_context(|| format!("Failed to parse font file: {:?}", path))?;

        log::info!("Loaded font {:?} ({} glyphs)", path, font.len());
        Ok(font)
    }

    /// Parse the text `.fnt` format (`info`, `common` and `char` lines).
    ///
    /// Pixel metrics are divided by the line height (without padding), so
    /// one line is 1.0 tall. Atlas coordinates are divided by the atlas
    /// width and height.
    pub fn parse_fnt(source: &str) -> Result<Self> {
        let mut padding = [0.0f32; 4];
        let mut line_height_px = None;
        let mut atlas_size = None;
        let mut glyph_lines = Vec::new();

        for line in source.lines() {
            let mut tokens = line.split_whitespace();
            let Some(tag) = tokens.next() else {
                continue;
            };
            let values = parse_pairs(tokens);

            match tag {
                "info" => {
                    if let Some(raw) = values.get("padding") {
                        let parsed: Vec<f32> = raw
                            .split(',')
                            .map(|v| v.trim().parse::<f32>())
                            .collect::<std::result::Result<_, _>>()
                            .with_context(|| format!("Invalid padding '{}'", raw))?;
                        if parsed.len() != 4 {
                            anyhow::bail!("Padding needs 4 values, got '{}'", raw);
                        }
                        padding.copy_from_slice(&parsed);
                    }
                }
                "common" => {
                    line_height_px = Some(number(&values, "lineHeight")?);
                    atlas_size = Some(Vec2::new(number(&values, "scaleW")?, number(&values, "scaleH")?));
                }
                "char" => glyph_lines.push(values),
                _ => {}
            }
        }

        let [pad_top, pad_left, pad_bottom, pad_right] = padding;
        let padding_width = pad_left + pad_right;
        let padding_height = pad_top + pad_bottom;

        let line_height_px = line_height_px.context("Missing 'common lineHeight'")? - padding_height;
        let atlas_size = atlas_size.context("Missing 'common scaleW/scaleH'")?;
        if line_height_px <= 0.0 || atlas_size.x <= 0.0 || atlas_size.y <= 0.0 {
            anyhow::bail!("Font line height and atlas size must be positive");
        }

        let per_pixel = 1.0 / line_height_px;
        let mut font = Self::new(0.0, 1.0);

        for values in glyph_lines {
            let id = number(&values, "id")? as u32;
            let advance = (number(&values, "xadvance")? - padding_width) * per_pixel;

            if id == ' ' as u32 {
                font.space_width = advance;
                continue;
            }

            let x = number(&values, "x")? + pad_left - DESIRED_PADDING;
            let y = number(&values, "y")? + pad_top - DESIRED_PADDING;
            let width = number(&values, "width")? - (padding_width - 2.0 * DESIRED_PADDING);
            let height = number(&values, "height")? - (padding_height - 2.0 * DESIRED_PADDING);
            let x_offset = number(&values, "xoffset")? + pad_left - DESIRED_PADDING;
            let y_offset = number(&values, "yoffset")? + pad_top - DESIRED_PADDING;

            let tex_min = Vec2::new(x, y) / atlas_size;
            font.insert(Character {
                id,
                tex_min,
                tex_max: tex_min + Vec2::new(width, height) / atlas_size,
                offset: Vec2::new(x_offset, y_offset) * per_pixel,
                size: Vec2::new(width, height) * per_pixel,
                advance,
            });
        }

        Ok(font)
    }
}

fn parse_pairs<'a>(tokens: impl Iterator<Item = &'a str>) -> HashMap<&'a str, &'a str> {
    tokens
        .filter_map(|token| token.split_once('='))
        .map(|(key, value)| (key, value.trim_matches('"')))
        .collect()
}

fn number(values: &HashMap<&str, &str>, key: &str) -> Result<f32> {
    let raw = values.get(key).with_context(|| format!("Missing '{}'", key))?;
    raw.parse::<f32>()
        .with_context(|| format!("Invalid value '{}' for '{}'", raw, key))
}
