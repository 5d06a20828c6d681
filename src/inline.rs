//! Inline formatting: color spans, then an ordered list of delimiter rules.
//!
//! Rules run in a fixed order and each one only sees the runs produced by the
//! previous ones:
//!
//! 1. `**bold**`
//! 2. `*italic*` and `_italic_`
//! 3. `` `code` ``
//! 4. `[text](url)`
//! 5. `~~strike~~`
//!
//! Delimiters pair across run boundaries, so `*a **b** c*` is italic
//! throughout. An opener without a matching closer stays in the text as
//! written.

use crate::segment::{Segment, TextSegment};
use crate::style::{FontSlant, FontWeight, TextStyle};
use crate::types::Color;
use std::collections::HashMap;

type InlineRule = fn(Vec<TextSegment>) -> Vec<TextSegment>;

const RULES: &[(&str, InlineRule)] = &[
    ("bold", apply_bold),
    ("italic", apply_italic),
    ("code", apply_inline_code),
    ("link", apply_links),
    ("strikethrough", apply_strikethrough),
];

/// Formats one source line into a segment, keeping color and style boundaries
/// as separate runs.
pub(crate) fn format_line(text: &str, base: &TextStyle) -> Segment {
    let mut runs = format_runs(text, base);
    if runs.len() == 1 && runs[0].style.color.is_none() {
        if let Some(only) = runs.pop() {
            return Segment::Simple(only);
        }
    }
    Segment::composite(base.clone(), runs)
}

pub(crate) fn format_runs(text: &str, base: &TextStyle) -> Vec<TextSegment> {
    let mut runs = extract_color_spans(text, base);
    for (name, rule) in RULES {
        let before = runs.len();
        runs = rule(runs);
        if runs.len() != before {
            log::trace!("inline rule {name} split line into {} runs", runs.len());
        }
    }
    runs.retain(|run| !run.text.is_empty());
    if runs.is_empty() {
        runs.push(TextSegment::new(String::new(), base.clone()));
    }
    runs
}

/// Splits `<span style="color: X">text</span>` tags out into colored runs.
/// Tags with an unknown color are left in place as literal text.
pub(crate) fn extract_color_spans(text: &str, base: &TextStyle) -> Vec<TextSegment> {
    let lower = text.to_ascii_lowercase();
    let mut runs = Vec::new();
    let mut plain = String::new();
    let mut cursor = 0usize;

    while let Some(rel) = lower[cursor..].find("<span") {
        let open_start = cursor + rel;
        let Some(span) = parse_color_span(text, &lower, open_start) else {
            plain.push_str(&text[cursor..open_start + "<span".len()]);
            cursor = open_start + "<span".len();
            continue;
        };
        plain.push_str(&text[cursor..open_start]);
        if !plain.is_empty() {
            runs.push(TextSegment::new(std::mem::take(&mut plain), base.clone()));
        }
        runs.push(TextSegment::new(
            &text[span.inner_start..span.inner_end],
            base.with_color(span.color),
        ));
        cursor = span.end;
    }
    plain.push_str(&text[cursor..]);
    if !plain.is_empty() || runs.is_empty() {
        runs.push(TextSegment::new(plain, base.clone()));
    }
    runs
}

struct ColorSpan {
    color: Color,
    inner_start: usize,
    inner_end: usize,
    end: usize,
}

fn parse_color_span(text: &str, lower: &str, open_start: usize) -> Option<ColorSpan> {
    let tag_end = open_start + lower[open_start..].find('>')?;
    let tag = &lower[open_start..tag_end];
    let attr = tag.find("color")?;
    let after = tag[attr + "color".len()..].trim_start().strip_prefix(':')?;
    let value_end = after
        .find(|c: char| c == ';' || c == '"' || c == '\'')
        .unwrap_or(after.len());
    let raw_value = after[..value_end].trim();
    let Some(color) = Color::parse(raw_value) else {
        log::debug!("ignoring color span with unknown color {raw_value:?}");
        return None;
    };
    let inner_start = tag_end + 1;
    let close_rel = lower[inner_start..].find("</span>")?;
    let inner_end = inner_start + close_rel;
    Some(ColorSpan {
        color,
        inner_start,
        inner_end,
        end: inner_end + "</span>".len(),
    })
}

fn apply_bold(runs: Vec<TextSegment>) -> Vec<TextSegment> {
    split_delimited(runs, "**", "**", DelimiterGuard::NonEmpty, |s| {
        s.with_weight(FontWeight::Bold)
    })
}

fn apply_italic(runs: Vec<TextSegment>) -> Vec<TextSegment> {
    let runs = split_delimited(runs, "*", "*", DelimiterGuard::Flanking, |s| {
        s.with_slant(FontSlant::Italic)
    });
    split_delimited(runs, "_", "_", DelimiterGuard::WordBoundary, |s| {
        s.with_slant(FontSlant::Italic)
    })
}

fn apply_inline_code(runs: Vec<TextSegment>) -> Vec<TextSegment> {
    split_delimited(runs, "`", "`", DelimiterGuard::NonEmpty, |s| {
        s.with_inline_code()
    })
}

fn apply_strikethrough(runs: Vec<TextSegment>) -> Vec<TextSegment> {
    split_delimited(runs, "~~", "~~", DelimiterGuard::NonEmpty, |s| {
        s.with_strikethrough()
    })
}

fn apply_links(runs: Vec<TextSegment>) -> Vec<TextSegment> {
    let mut out = Vec::with_capacity(runs.len());
    for run in runs {
        if run.style.code {
            out.push(run);
            continue;
        }
        let text = run.text.as_str();
        let mut cursor = 0usize;
        let mut pending = String::new();
        while let Some(rel) = text[cursor..].find('[') {
            let open = cursor + rel;
            let Some(link) = find_link(text, open) else {
                pending.push_str(&text[cursor..open + 1]);
                cursor = open + 1;
                continue;
            };
            pending.push_str(&text[cursor..open]);
            if !pending.is_empty() {
                out.push(TextSegment::new(std::mem::take(&mut pending), run.style.clone()));
            }
            out.push(TextSegment::new(
                &text[open + 1..link.label_end],
                run.style.with_underline(),
            ));
            cursor = link.end;
        }
        pending.push_str(&text[cursor..]);
        if !pending.is_empty() || out.is_empty() {
            out.push(TextSegment::new(pending, run.style.clone()));
        }
    }
    out
}

struct LinkMatch {
    label_end: usize,
    end: usize,
}

fn find_link(text: &str, open: usize) -> Option<LinkMatch> {
    let label_end = open + text[open..].find("](")?;
    if label_end == open + 1 || text[open + 1..label_end].contains('[') {
        return None;
    }
    let url_start = label_end + 2;
    let url_end = url_start + text[url_start..].find(')')?;
    if text[url_start..url_end].chars().any(char::is_whitespace) {
        return None;
    }
    Some(LinkMatch {
        label_end,
        end: url_end + 1,
    })
}

#[derive(Clone, Copy)]
enum DelimiterGuard {
    NonEmpty,
    /// Inner text may not start or end with whitespace.
    Flanking,
    /// Delimiters must not touch alphanumerics on the outside.
    WordBoundary,
}

impl DelimiterGuard {
    fn accepts(self, text: &str, open: usize, close: usize, delim_len: usize) -> bool {
        let inner = &text[open + delim_len..close];
        if inner.is_empty() {
            return false;
        }
        match self {
            DelimiterGuard::NonEmpty => true,
            DelimiterGuard::Flanking => {
                !inner.starts_with(char::is_whitespace) && !inner.ends_with(char::is_whitespace)
            }
            DelimiterGuard::WordBoundary => {
                let before = text[..open].chars().next_back();
                let after = text[close + delim_len..].chars().next();
                !before.is_some_and(char::is_alphanumeric)
                    && !after.is_some_and(char::is_alphanumeric)
                    && !inner.starts_with(char::is_whitespace)
            }
        }
    }
}

/// Run texts joined end to end, with the style and source run of every byte.
struct StyledText {
    text: String,
    styles: Vec<TextStyle>,
    style_of: Vec<usize>,
    run_of: Vec<usize>,
}

impl StyledText {
    fn new(runs: &[TextSegment]) -> Self {
        let total = runs.iter().map(|run| run.text.len()).sum();
        let mut text = String::with_capacity(total);
        let mut styles = Vec::with_capacity(runs.len());
        let mut style_of = Vec::with_capacity(total);
        let mut run_of = Vec::with_capacity(total);
        for (index, run) in runs.iter().enumerate() {
            text.push_str(&run.text);
            style_of.extend(std::iter::repeat_n(styles.len(), run.text.len()));
            run_of.extend(std::iter::repeat_n(index, run.text.len()));
            styles.push(run.style.clone());
        }
        Self {
            text,
            styles,
            style_of,
            run_of,
        }
    }

    fn is_code(&self, at: usize) -> bool {
        self.styles[self.style_of[at]].code
    }

    /// Next `delim` at or after `from` that is not inside inline code.
    fn find(&self, from: usize, delim: &str) -> Option<usize> {
        let mut cursor = from;
        while let Some(rel) = self.text[cursor..].find(delim) {
            let at = cursor + rel;
            if !(at..at + delim.len()).any(|i| self.is_code(i)) {
                return Some(at);
            }
            cursor = at + delim.len();
        }
        None
    }

    fn restyle(
        &mut self,
        range: std::ops::Range<usize>,
        derived: &mut HashMap<usize, usize>,
        apply: &impl Fn(&TextStyle) -> TextStyle,
    ) {
        for at in range {
            let old = self.style_of[at];
            let new = match derived.get(&old) {
                Some(&index) => index,
                None => {
                    let style = apply(&self.styles[old]);
                    self.styles.push(style);
                    let index = self.styles.len() - 1;
                    derived.insert(old, index);
                    index
                }
            };
            self.style_of[at] = new;
        }
    }

    /// Regroups the kept bytes into runs, splitting wherever the source run
    /// or the style changes.
    fn into_runs(self, keep: &[bool]) -> Vec<TextSegment> {
        let mut out: Vec<TextSegment> = Vec::new();
        let mut current: Option<(usize, usize)> = None;
        for (at, ch) in self.text.char_indices() {
            if !keep[at] {
                continue;
            }
            let key = (self.run_of[at], self.style_of[at]);
            if current != Some(key) {
                out.push(TextSegment::new(String::new(), self.styles[key.1].clone()));
                current = Some(key);
            }
            if let Some(last) = out.last_mut() {
                last.text.push(ch);
            }
        }
        out
    }
}

fn split_delimited(
    runs: Vec<TextSegment>,
    open_delim: &str,
    close_delim: &str,
    guard: DelimiterGuard,
    apply: impl Fn(&TextStyle) -> TextStyle,
) -> Vec<TextSegment> {
    let mut styled = StyledText::new(&runs);
    let mut keep = vec![true; styled.text.len()];
    // Old style index to its derived index, so equal inputs share one style.
    let mut derived: HashMap<usize, usize> = HashMap::new();
    let mut cursor = 0usize;
    let mut matched = false;
    while let Some(open) = styled.find(cursor, open_delim) {
        let search_from = open + open_delim.len();
        let candidate = styled.find(search_from, close_delim);
        let close =
            candidate.filter(|&close| guard.accepts(&styled.text, open, close, open_delim.len()));
        let Some(close) = close else {
            if candidate.is_none() {
                log::debug!("unmatched inline delimiter {open_delim:?} kept literal");
            }
            cursor = search_from;
            continue;
        };
        keep[open..search_from].fill(false);
        keep[close..close + close_delim.len()].fill(false);
        styled.restyle(search_from..close, &mut derived, &apply);
        cursor = close + close_delim.len();
        matched = true;
    }
    if !matched {
        return runs;
    }
    styled.into_runs(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(runs: &[TextSegment]) -> Vec<&str> {
        runs.iter().map(|r| r.text.as_str()).collect()
    }

    #[test]
    fn bold_then_italic_keeps_order_and_strips_markers() {
        let runs = format_runs("**bold** and *italic*", &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["bold", " and ", "italic"]);
        assert!(runs[0].style.is_bold());
        assert!(!runs[1].style.is_bold());
        assert!(!runs[2].style.is_bold());
        assert!(runs[2].style.is_italic());
        let joined: String = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(joined, "bold and italic");
    }

    #[test]
    fn markers_never_leak_into_run_text() {
        let line = "**a** *b* `c` [d](http://x.y) ~~e~~ _f_";
        let runs = format_runs(line, &TextStyle::plain());
        for run in &runs {
            for marker in ["**", "*", "`", "~~", "](", "_"] {
                assert!(!run.text.contains(marker), "{:?} leaked {marker}", run.text);
            }
        }
        let joined: String = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(joined, "a b c d e f");
        assert!(runs.iter().any(|r| r.text == "c" && r.style.code));
        assert!(runs.iter().any(|r| r.text == "d" && r.style.underline));
        assert!(runs.iter().any(|r| r.text == "e" && r.style.strikethrough));
        assert!(runs.iter().any(|r| r.text == "f" && r.style.is_italic()));
    }

    #[test]
    fn unmatched_delimiters_stay_literal() {
        let runs = format_runs("2 ** 3 and a*b", &TextStyle::plain());
        let joined: String = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(joined, "2 ** 3 and a*b");
        assert!(runs.iter().all(|r| !r.style.is_bold()));
    }

    #[test]
    fn underscores_inside_words_are_not_italic() {
        let runs = format_runs("call snake_case_name now", &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["call snake_case_name now"]);
    }

    #[test]
    fn color_spans_become_colored_runs() {
        let line = r#"前<span style="color: #ff0000">红</span>中<SPAN style='color:blue'>蓝</SPAN>后"#;
        let runs = extract_color_spans(line, &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["前", "红", "中", "蓝", "后"]);
        let colored: Vec<_> = runs.iter().filter(|r| r.style.color.is_some()).collect();
        assert_eq!(colored.len(), 2);
        assert_eq!(colored[0].style.color, Some(Color::rgb(255, 0, 0)));
        assert_eq!(colored[1].style.color, Some(Color::rgb(0, 0, 255)));
    }

    #[test]
    fn unknown_color_span_is_literal() {
        let line = r#"<span style="color: nope">x</span>"#;
        let runs = extract_color_spans(line, &TextStyle::plain());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, line);
        assert!(runs[0].style.color.is_none());
    }

    #[test]
    fn colored_bold_keeps_both_effects() {
        let seg = format_line(
            r#"<span style="color: green">**up**</span> today"#,
            &TextStyle::plain(),
        );
        let Segment::Composite { runs, base } = seg else {
            panic!("expected composite");
        };
        assert_eq!(base.text, "up today");
        assert!(runs[0].style.is_bold());
        assert_eq!(runs[0].style.color, Some(Color::rgb(0, 128, 0)));
        assert!(runs[1].style.color.is_none());
    }

    #[test]
    fn single_plain_run_is_simple() {
        let seg = format_line("just text", &TextStyle::plain());
        assert!(matches!(seg, Segment::Simple(ref s) if s.text == "just text"));
        let seg = format_line("**all bold**", &TextStyle::plain());
        assert!(matches!(seg, Segment::Simple(ref s) if s.style.is_bold()));
    }

    #[test]
    fn triple_star_is_bold_italic() {
        let runs = format_runs("***both***", &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["both"]);
        assert!(runs[0].style.is_bold());
        assert!(runs[0].style.is_italic());
    }

    #[test]
    fn italic_pair_spans_a_bold_run() {
        let runs = format_runs("*a **b** c*", &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["a ", "b", " c"]);
        assert!(runs.iter().all(|r| r.style.is_italic()));
        assert!(!runs[0].style.is_bold());
        assert!(runs[1].style.is_bold());
        assert!(!runs[2].style.is_bold());
    }

    #[test]
    fn italic_pair_spans_a_color_boundary() {
        let line = r#"*x<span style="color: red">y</span>z*"#;
        let runs = format_runs(line, &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["x", "y", "z"]);
        assert!(runs.iter().all(|r| r.style.is_italic()));
        assert_eq!(runs[1].style.color, Some(Color::rgb(255, 0, 0)));
    }

    #[test]
    fn delimiters_inside_inline_code_are_literal() {
        let runs = format_runs("`a*b` ~~c~~ `d~~e`", &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["a*b", " ", "c", " ", "d~~e"]);
        assert!(runs[0].style.code && !runs[0].style.is_italic());
        assert!(runs[2].style.strikethrough);
        assert!(runs[4].style.code && !runs[4].style.strikethrough);
    }

    #[test]
    fn link_label_is_kept_and_url_dropped() {
        let runs = format_runs("see [docs](https://example.com/a) here", &TextStyle::plain());
        assert_eq!(texts(&runs), vec!["see ", "docs", " here"]);
    }
}
