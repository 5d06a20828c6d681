use crate::font::{InkExtent, TextMetrics};
use crate::segment::{LineRun, ProcessedLine, RunKind, Segment, TextSegment};
use crate::style::{BlockKind, TextStyle};
use crate::tokenize::{TokenKind, tokenize};
use crate::types::Px;
use unicode_segmentation::UnicodeSegmentation;

pub(crate) const EMPTY_QUOTE_HEIGHT: i32 = 20;
pub(crate) const RULE_HEIGHT: i32 = 2;

#[derive(Debug, Clone, Copy)]
struct Piece<'a> {
    run: usize,
    text: &'a str,
    width: Px,
    kind: TokenKind,
}

/// Wraps one segment to `available` pixels. Lines only exceed `available`
/// when a single character is wider than it.
pub fn wrap(segment: &Segment, available: Px, metrics: &dyn TextMetrics) -> Vec<ProcessedLine> {
    let style = segment.style();
    if segment.text().is_empty() {
        return vec![empty_line(style, segment.base().span_lines)];
    }
    if style.block == BlockKind::Code {
        return wrap_code(segment.base(), available, metrics);
    }
    let runs = segment.runs();
    let pieces = measure_pieces(runs, metrics);
    fill(&pieces, runs, style, available, metrics, false)
}

fn wrap_code(code: &TextSegment, available: Px, metrics: &dyn TextMetrics) -> Vec<ProcessedLine> {
    let mut lines = Vec::new();
    for source_line in code.text.split('\n') {
        let expanded = source_line.trim_end_matches('\r').replace('\t', "    ");
        let run = TextSegment::new(expanded, code.style.clone());
        if run.text.is_empty() {
            lines.push(blank_code_line(&code.style));
            continue;
        }
        let runs = std::slice::from_ref(&run);
        let pieces = measure_pieces(runs, metrics);
        lines.extend(fill(&pieces, runs, &code.style, available, metrics, true));
    }
    lines
}

fn measure_pieces<'a>(runs: &'a [TextSegment], metrics: &dyn TextMetrics) -> Vec<Piece<'a>> {
    let mut pieces = Vec::new();
    for (index, run) in runs.iter().enumerate() {
        for token in tokenize(&run.text) {
            if token.kind == TokenKind::Newline {
                continue;
            }
            let width = match token.kind {
                TokenKind::Emoji => run.style.size_px(),
                _ => metrics.text_width(token.text, &run.style),
            };
            pieces.push(Piece {
                run: index,
                text: token.text,
                width,
                kind: token.kind,
            });
        }
    }
    pieces
}

fn fill(
    pieces: &[Piece<'_>],
    runs: &[TextSegment],
    style: &TextStyle,
    available: Px,
    metrics: &dyn TextMetrics,
    keep_spaces: bool,
) -> Vec<ProcessedLine> {
    let available = available.max(Px::from_i32(1));
    let mut lines: Vec<Vec<Piece<'_>>> = Vec::new();
    let mut current: Vec<Piece<'_>> = Vec::new();
    let mut current_width = Px::ZERO;

    for unit in pieces.chunk_by(joins_word) {
        let width: Px = unit.iter().map(|p| p.width).sum();
        let kind = unit[0].kind;
        let continuation = !lines.is_empty() || !current.is_empty();
        if current.is_empty() && kind == TokenKind::Space && continuation && !keep_spaces {
            continue;
        }
        if current_width + width <= available {
            current_width += width;
            current.extend_from_slice(unit);
            continue;
        }
        if width > available && kind == TokenKind::Word {
            for part in unit.iter().flat_map(|&piece| force_split(piece, runs, metrics)) {
                if !current.is_empty() && current_width + part.width > available {
                    lines.push(std::mem::take(&mut current));
                    current_width = Px::ZERO;
                }
                current_width += part.width;
                current.push(part);
            }
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        current_width = Px::ZERO;
        if kind == TokenKind::Space && !keep_spaces {
            continue;
        }
        current_width += width;
        current.extend_from_slice(unit);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    let mut out: Vec<ProcessedLine> = lines
        .into_iter()
        .map(|mut pieces| {
            if !keep_spaces {
                while pieces.last().is_some_and(|p| p.kind == TokenKind::Space) {
                    pieces.pop();
                }
            }
            build_line(&pieces, runs, style, metrics)
        })
        .filter(|line| !line.runs.is_empty())
        .collect();
    if out.is_empty() {
        out.push(empty_line(style, 1));
    }
    out
}

/// A style change inside a word is not a break opportunity.
fn joins_word(left: &Piece<'_>, right: &Piece<'_>) -> bool {
    left.kind == TokenKind::Word && right.kind == TokenKind::Word && left.run != right.run
}

/// Character-level split of a word that fits on no line by itself.
fn force_split<'a>(
    piece: Piece<'a>,
    runs: &[TextSegment],
    metrics: &dyn TextMetrics,
) -> Vec<Piece<'a>> {
    let style = &runs[piece.run].style;
    piece
        .text
        .graphemes(true)
        .map(|g| Piece {
            run: piece.run,
            text: g,
            width: metrics.text_width(g, style),
            kind: TokenKind::Word,
        })
        .collect()
}

fn build_line(
    pieces: &[Piece<'_>],
    runs: &[TextSegment],
    style: &TextStyle,
    metrics: &dyn TextMetrics,
) -> ProcessedLine {
    let mut line_runs: Vec<LineRun> = Vec::new();
    for piece in pieces {
        let kind = if piece.kind == TokenKind::Emoji {
            RunKind::Emoji
        } else {
            RunKind::Text
        };
        match line_runs.last_mut() {
            Some(last)
                if kind == RunKind::Text
                    && last.kind == RunKind::Text
                    && last.style == runs[piece.run].style =>
            {
                last.text.push_str(piece.text);
                last.width += piece.width;
            }
            _ => line_runs.push(LineRun {
                text: piece.text.to_string(),
                style: runs[piece.run].style.clone(),
                width: piece.width,
                kind,
            }),
        }
    }

    let extent = line_runs
        .iter()
        .map(|run| match run.kind {
            RunKind::Emoji => emoji_extent(&run.style),
            RunKind::Text => metrics.ink_extent(&run.text, &run.style),
        })
        .fold(InkExtent::default(), InkExtent::union);
    let extent = if extent.is_empty() {
        nominal_extent(style)
    } else {
        extent
    };
    ProcessedLine {
        width: line_runs.iter().map(|r| r.width).sum(),
        runs: line_runs,
        style: style.clone(),
        height: extent.height(),
        ascent: extent.ascent,
        line_count: 1,
    }
}

/// Emoji bitmaps are square, one em on a side, sitting 4/5 above the baseline.
pub(crate) fn emoji_extent(style: &TextStyle) -> InkExtent {
    let size = style.size_px();
    InkExtent {
        ascent: size.mul_ratio(4, 5),
        descent: size - size.mul_ratio(4, 5),
    }
}

fn nominal_extent(style: &TextStyle) -> InkExtent {
    emoji_extent(style)
}

fn blank_code_line(style: &TextStyle) -> ProcessedLine {
    let extent = nominal_extent(style);
    ProcessedLine {
        runs: Vec::new(),
        style: style.clone(),
        width: Px::ZERO,
        height: extent.height(),
        ascent: extent.ascent,
        line_count: 1,
    }
}

fn empty_line(style: &TextStyle, span_lines: u16) -> ProcessedLine {
    let height = match style.block {
        BlockKind::Quote => Px::from_i32(EMPTY_QUOTE_HEIGHT),
        BlockKind::Rule => Px::from_i32(RULE_HEIGHT),
        BlockKind::Code => nominal_extent(style).height(),
        _ => style.line_spacing * span_lines.max(1) as i32,
    };
    ProcessedLine {
        runs: Vec::new(),
        style: style.clone(),
        width: Px::ZERO,
        height,
        ascent: Px::ZERO,
        line_count: span_lines.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::testing::FixedAdvance;
    use crate::inline::format_line;
    use crate::style::FontWeight;

    fn plain(text: &str) -> Segment {
        Segment::Simple(TextSegment::new(text, TextStyle::plain()))
    }

    #[test]
    fn oversize_latin_token_is_split_within_width() {
        // 27 chars at 15px = 405px against 300px.
        let word = "a".repeat(27);
        let lines = wrap(&plain(&word), Px::from_i32(300), &FixedAdvance);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text().len(), 20);
        assert_eq!(lines[1].text().len(), 7);
        for line in &lines {
            assert!(line.width <= Px::from_i32(300));
        }
    }

    #[test]
    fn emoji_and_cjk_break_anywhere() {
        let lines = wrap(&plain("😀你好"), Px::from_i32(30), &FixedAdvance);
        let texts: Vec<String> = lines.iter().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["😀", "你", "好"]);
        assert_eq!(lines[0].runs[0].kind, RunKind::Emoji);
    }

    #[test]
    fn words_wrap_at_spaces_and_drop_leading_space() {
        // "hello" is 75px, a space 15px.
        let lines = wrap(&plain("hello hello hello"), Px::from_i32(170), &FixedAdvance);
        let texts: Vec<String> = lines.iter().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["hello hello", "hello"]);
        assert_eq!(lines[0].width, Px::from_i32(165));
    }

    #[test]
    fn widths_never_exceed_available() {
        let text = "Rust 与 CJK 混排 wrapping, with punctuation！还有 emoji 🎉🎉 and averyveryverylongword.";
        for width in [45, 60, 90, 120, 200, 333] {
            let available = Px::from_i32(width);
            for line in wrap(&plain(text), available, &FixedAdvance) {
                assert!(
                    line.width <= available,
                    "{:?} is {:?} wide at {width}",
                    line.text(),
                    line.width
                );
            }
        }
    }

    #[test]
    fn single_character_wider_than_line_overflows_by_itself() {
        let lines = wrap(&plain("你好"), Px::from_i32(10), &FixedAdvance);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.width == Px::from_i32(30)));
    }

    #[test]
    fn code_keeps_newlines_and_indentation() {
        let seg = Segment::Simple(TextSegment::new(
            "fn main() {\n    run();\n\n}",
            TextStyle::code_block(),
        ));
        let lines = wrap(&seg, Px::from_i32(2000), &FixedAdvance);
        let texts: Vec<String> = lines.iter().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["fn main() {", "    run();", "", "}"]);
        assert!(lines[2].height > Px::ZERO);
    }

    #[test]
    fn composite_runs_keep_their_styles() {
        let seg = format_line("**bold** and *italic*", &TextStyle::plain());
        let lines = wrap(&seg, Px::from_i32(1000), &FixedAdvance);
        assert_eq!(lines.len(), 1);
        let runs = &lines[0].runs;
        assert_eq!(runs[0].text, "bold");
        assert_eq!(runs[0].style.weight, FontWeight::Bold);
        assert_eq!(lines[0].text(), "bold and italic");
    }

    #[test]
    fn style_change_inside_a_word_is_not_a_break() {
        // "abcd" is 60px and fits on its own line.
        let seg = format_line("x **ab**cd", &TextStyle::plain());
        let lines = wrap(&seg, Px::from_i32(75), &FixedAdvance);
        let texts: Vec<String> = lines.iter().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["x", "abcd"]);
        let runs = &lines[1].runs;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].style.weight, FontWeight::Bold);
        assert_eq!(runs[1].style.weight, FontWeight::Regular);
        assert_eq!(lines[1].width, Px::from_i32(60));
    }

    #[test]
    fn oversize_styled_word_splits_across_runs() {
        // 12 chars at 15px against 100px: six per line.
        let seg = format_line("**abcdef**ghijkl", &TextStyle::plain());
        let lines = wrap(&seg, Px::from_i32(100), &FixedAdvance);
        let texts: Vec<String> = lines.iter().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["abcdef", "ghijkl"]);
        assert_eq!(lines[0].runs[0].style.weight, FontWeight::Bold);
    }

    #[test]
    fn empty_segments_get_kind_specific_heights() {
        let quote = Segment::Simple(TextSegment::new("", TextStyle::quote(1)));
        assert_eq!(
            wrap(&quote, Px::from_i32(100), &FixedAdvance)[0].height,
            Px::from_i32(EMPTY_QUOTE_HEIGHT)
        );
        let spacer = Segment::Simple(TextSegment::spacer(3, TextStyle::plain()));
        let line = &wrap(&spacer, Px::from_i32(100), &FixedAdvance)[0];
        assert_eq!(line.line_count, 3);
        assert_eq!(line.height, Px::from_i32(45));
    }

    #[test]
    fn line_height_follows_ink_not_point_size() {
        let lines = wrap(&plain("abc"), Px::from_i32(1000), &FixedAdvance);
        assert_eq!(lines[0].height, Px::from_i32(30));
        assert_eq!(lines[0].ascent, Px::from_i32(24));
    }
}
