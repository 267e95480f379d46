use glyph_pipeline::text::{layout_text, Character, FontMetrics, LayoutSettings, Line, TextAlign};
use glam::Vec2;

/// Widths are exact in binary floating point, so comparisons can be exact too.
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

fn words(line: &Line) -> Vec<String> {
    line.words()
        .iter()
        .map(|w| w.characters().iter().filter_map(|c| char::from_u32(c.id)).collect())
        .collect()
}

fn word_width(font: &FontMetrics, word: &str) -> f32 {
    word.chars().filter_map(|c| font.character(c)).map(|c| c.advance).sum()
}

#[test]
fn greedy_pack_fills_line_exactly() {
    let font = font();
    let max = word_width(&font, "a") + font.space_width() + word_width(&font, "bb");

    let layout = layout_text("a bb ccc", &font, &settings(max, TextAlign::Left));

    assert_eq!(layout.line_count(), 2);
    assert_eq!(words(&layout.lines[0]), vec!["a", "bb"]);
    assert_eq!(words(&layout.lines[1]), vec!["ccc"]);
    assert_eq!(layout.lines[0].width(), max);
}

#[test]
fn overlong_word_gets_its_own_line() {
    let font = font();
    let layout = layout_text("extraordinarily", &font, &settings(2.0, TextAlign::Left));

    assert_eq!(layout.line_count(), 1);
    assert_eq!(words(&layout.lines[0]), vec!["extraordinarily"]);
    assert_eq!(layout.lines[0].width(), word_width(&font, "extraordinarily"));
    assert!(layout.lines[0].width() > 2.0);
}

#[test]
fn overlong_word_between_short_words() {
    let layout = layout_text("a extraordinarily b", &font(), &settings(2.0, TextAlign::Left));

    let lines: Vec<_> = layout.lines.iter().map(words).collect();
    assert_eq!(lines, vec![vec!["a"], vec!["extraordinarily"], vec!["b"]]);
}

#[test]
fn lines_never_exceed_max_width() {
    let texts = [
        "the quick brown fox jumps over the lazy dog and keeps running far away",
        "   the quick brown fox",
        "ab   ab    ab ab",
        "lazy      dog\n    keeps   running  ",
    ];
    for text in texts {
        for max in [4.0, 4.5, 6.0, 10.0, 40.0] {
            let layout = layout_text(text, &font(), &settings(max, TextAlign::Left));
            for line in &layout.lines {
                assert!(line.width() <= max, "{:?}: line of width {} exceeds {}", text, line.width(), max);
            }
        }
    }
}

#[test]
fn whitespace_runs_wrap_within_width() {
    let font = font();
    let max = word_width(&font, "ab");

    let indented = layout_text("   ab", &font, &settings(max, TextAlign::Left));
    let widths: Vec<f32> = indented.lines.iter().map(Line::width).collect();
    assert_eq!(widths, vec![max]);

    let spaced = layout_text("ab   ab", &font, &settings(max, TextAlign::Left));
    let lines: Vec<_> = spaced.lines.iter().map(words).collect();
    assert_eq!(lines, vec![vec!["ab"], vec!["ab"]]);
    assert!(spaced.lines.iter().all(|line| line.width() <= max));
}

#[test]
fn relayout_is_byte_identical() {
    let text = "distance fields scale well\nacross sizes";
    let first = layout_text(text, &font(), &settings(5.0, TextAlign::Centre));
    let second = layout_text(text, &font(), &settings(5.0, TextAlign::Centre));

    assert_eq!(first.mesh.as_bytes(), second.mesh.as_bytes());
}

#[test]
fn wider_lines_never_add_lines() {
    let text = "one two three four five six seven eight nine ten";
    let mut previous = usize::MAX;
    for step in 1..=40 {
        let max = step as f32 * 0.5;
        let count = layout_text(text, &font(), &settings(max, TextAlign::Left)).line_count();
        assert!(count <= previous, "width {} produced {} lines after {}", max, count, previous);
        previous = count;
    }
}

#[test]
fn right_alignment_offsets_first_glyph() {
    let font = font();
    let max = 7.0;
    let layout = layout_text("word", &font, &settings(max, TextAlign::Right));

    let w = word_width(&font, "word");
    let first_x = layout.mesh.vertices()[0].position[0];
    assert!((first_x - (max - w)).abs() < 1e-6);
}

#[test]
fn layout_is_independent_of_font_size() {
    let layout = layout_text("ab cd", &font(), &settings(10.0, TextAlign::Left));
    assert_eq!(layout.bounding, Vec2::new(2.5, 1.0));
}

#[test]
fn bearing_offsets_quads() {
    let font = FontMetrics::new(0.25, 1.0).with_character(Character {
        id: 'x' as u32,
        tex_min: Vec2::ZERO,
        tex_max: Vec2::ONE,
        offset: Vec2::new(0.125, 0.25),
        size: Vec2::new(0.5, 0.5),
        advance: 0.75,
    });

    let layout = layout_text("xx", &font, &settings(10.0, TextAlign::Left));
    let vertices = layout.mesh.vertices();

    assert_eq!(vertices[0].position, [0.125, 0.25]);
    assert_eq!(vertices[2].position, [0.625, 0.75]);
    assert_eq!(vertices[6].position, [0.875, 0.25]);
}
