use crate::inline::format_line;
use crate::segment::{Segment, TextSegment};
use crate::style::{BASE_INDENT, BlockKind, FontWeight, TextStyle};
use crate::tokenize::starts_with_emoji;
use crate::types::Px;

pub const DEFAULT_SIGNATURE: &str = "—By 飞天";
pub const DEFAULT_CATEGORIES: &[&str] = &["国内要闻", "国际动态"];

const CHINESE_ORDINALS: &[&str] = &["一、", "二、", "三、", "四、"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
    /// Appended as the last, right-aligned line. `None` disables it.
    pub signature: Option<String>,
    /// Lines matching one of these exactly get category styling.
    pub categories: Vec<String>,
    pub escape_code_html: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            signature: Some(DEFAULT_SIGNATURE.to_string()),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            escape_code_html: true,
        }
    }
}

#[derive(Debug, Default)]
struct ParserState {
    current_section: Option<String>,
    quote_depth: u8,
    pending_blank_lines: u16,
}

#[derive(Debug, Clone, Default)]
pub struct MarkdownParser {
    config: ParserConfig,
}

impl MarkdownParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parses text into segments in reading order. Never fails: constructs
    /// that do not parse are kept as literal text.
    pub fn parse(&self, text: &str) -> Vec<Segment> {
        let mut state = ParserState::default();
        let mut out: Vec<Segment> = Vec::new();
        let lines: Vec<&str> = text.lines().collect();
        let mut i = 0usize;

        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();

            if is_fence_open(trimmed) {
                let start = i + 1;
                let mut end = start;
                while end < lines.len() && !is_fence_close(lines[end].trim()) {
                    end += 1;
                }
                if end >= lines.len() {
                    log::debug!(
                        "unterminated code fence at line {}; taking the remaining {} lines",
                        i + 1,
                        end - start
                    );
                }
                let body = lines[start..end.min(lines.len())].join("\n");
                let body = if self.config.escape_code_html {
                    escape_html(&body)
                } else {
                    body
                };
                let segment = Segment::Simple(TextSegment::new(body, TextStyle::code_block()));
                push_segment(&mut out, &mut state, segment);
                i = end + 1;
                continue;
            }

            if trimmed.is_empty() {
                state.pending_blank_lines = state.pending_blank_lines.saturating_add(1);
                state.quote_depth = 0;
                i += 1;
                continue;
            }

            let segment = self.parse_block(line, &mut state);
            push_segment(&mut out, &mut state, segment);
            i += 1;
        }

        if let Some(signature) = self
            .config
            .signature
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            out.push(Segment::Simple(TextSegment::new(
                signature,
                TextStyle::signature(),
            )));
        }
        out
    }

    fn parse_block(&self, line: &str, state: &mut ParserState) -> Segment {
        let trimmed = line.trim();

        if let Some((depth, content)) = split_quote(trimmed) {
            state.quote_depth = depth;
            let style = TextStyle::quote(depth);
            if content.is_empty() {
                return Segment::Simple(TextSegment::new(
                    String::new(),
                    style.with_line_spacing(Px::from_i32(8)),
                ));
            }
            return format_line(content, &style);
        }
        state.quote_depth = 0;

        if is_rule(trimmed) {
            return Segment::Simple(TextSegment::new(String::new(), TextStyle::rule()));
        }

        if let Some((level, content)) = split_heading(trimmed) {
            let size = match level {
                1 => 40,
                2 => 35,
                _ => 32,
            };
            let segment = format_line(content, &TextStyle::title(level, size));
            if level == 2 {
                state.current_section = Some(segment.text().to_string());
            }
            return segment;
        }

        if let Some(item) = split_list_item(line) {
            return self.list_segment(item);
        }

        if let Some(inner) = starred_header(trimmed) {
            let size = if CHINESE_ORDINALS.iter().any(|o| inner.starts_with(o)) {
                38
            } else {
                35
            };
            return Segment::Simple(TextSegment::new(inner, TextStyle::title(2, size)));
        }

        if self.config.categories.iter().any(|c| c == trimmed) {
            return Segment::Simple(TextSegment::new(trimmed, TextStyle::category()));
        }

        if starts_with_emoji(trimmed) {
            return format_line(trimmed, &TextStyle::title(1, 40));
        }

        let mut style = TextStyle::plain();
        if state.current_section.is_some() {
            style = style.with_indent(Px::from_i32(BASE_INDENT));
        }
        format_line(trimmed, &style)
    }

    fn list_segment(&self, item: ListItem<'_>) -> Segment {
        match item.marker {
            ListMarker::Ordered(number) => {
                if let Some((title, body)) = split_news_entry(item.content) {
                    let base = TextStyle::plain().with_line_spacing(Px::from_i32(20));
                    let mut runs = vec![TextSegment::new(
                        format!("{number}. {title}"),
                        base.with_weight(FontWeight::Bold),
                    )];
                    if !body.is_empty() {
                        runs.extend(format_line(body, &base).runs().iter().cloned());
                    }
                    return Segment::composite(base, runs);
                }
                format_line(
                    item.content,
                    &TextStyle::list(BlockKind::OrderedItem { number }, item.nesting),
                )
            }
            ListMarker::Bullet => {
                format_line(item.content, &TextStyle::list(BlockKind::ListItem, item.nesting))
            }
            ListMarker::Task(checked) => format_line(
                item.content,
                &TextStyle::list(BlockKind::TaskItem { checked }, item.nesting),
            ),
        }
    }
}

fn push_segment(out: &mut Vec<Segment>, state: &mut ParserState, segment: Segment) {
    let blanks = std::mem::take(&mut state.pending_blank_lines);
    if blanks > 0 && !out.is_empty() {
        let list_continues = out.last().is_some_and(|prev| prev.block().has_marker())
            && segment.block().has_marker();
        if !list_continues {
            out.push(Segment::Simple(TextSegment::spacer(
                blanks,
                TextStyle::plain(),
            )));
        }
    }
    out.push(segment);
}

fn is_fence_open(trimmed: &str) -> bool {
    trimmed
        .strip_prefix("```")
        .is_some_and(|info| !info.contains('`'))
}

fn is_fence_close(trimmed: &str) -> bool {
    trimmed == "```"
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `>`, `>>`, `> >` ... followed by optional content.
fn split_quote(trimmed: &str) -> Option<(u8, &str)> {
    if !trimmed.starts_with('>') {
        return None;
    }
    let mut depth: u8 = 0;
    let mut rest = trimmed;
    while let Some(after) = rest.strip_prefix('>') {
        depth = depth.saturating_add(1);
        rest = after.trim_start();
    }
    Some((depth, rest.trim()))
}

fn is_rule(trimmed: &str) -> bool {
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.chars().count() < 3 {
        return false;
    }
    compact.chars().all(|c| c == '-') || compact.chars().all(|c| c == '*')
}

fn split_heading(trimmed: &str) -> Option<(u8, &str)> {
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let content = rest.trim();
    if content.is_empty() {
        return None;
    }
    Some(((hashes as u8).min(3), content))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMarker {
    Bullet,
    Ordered(u32),
    Task(bool),
}

#[derive(Debug)]
struct ListItem<'a> {
    marker: ListMarker,
    nesting: u8,
    content: &'a str,
}

fn leading_columns(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn split_list_item(line: &str) -> Option<ListItem<'_>> {
    let nesting = (leading_columns(line) / 2).min(u8::MAX as usize) as u8;
    let rest = line.trim_start();
    let first = rest.chars().next()?;

    if matches!(first, '-' | '*' | '+') {
        let after = &rest[1..];
        if !after.starts_with(char::is_whitespace) {
            return None;
        }
        let content = after.trim();
        if content.is_empty() {
            return None;
        }
        if let Some((checked, task)) = split_task_box(content) {
            return Some(ListItem {
                marker: ListMarker::Task(checked),
                nesting,
                content: task,
            });
        }
        return Some(ListItem {
            marker: ListMarker::Bullet,
            nesting,
            content,
        });
    }

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits > 9 {
        return None;
    }
    let after = rest[digits..].strip_prefix('.')?;
    if !after.starts_with(char::is_whitespace) {
        return None;
    }
    let content = after.trim();
    if content.is_empty() {
        return None;
    }
    let number = rest[..digits].parse().ok()?;
    Some(ListItem {
        marker: ListMarker::Ordered(number),
        nesting,
        content,
    })
}

fn split_task_box(content: &str) -> Option<(bool, &str)> {
    let inner = content.strip_prefix('[')?;
    let mut chars = inner.chars();
    let mark = chars.next()?;
    let checked = match mark {
        ' ' => false,
        'x' | 'X' => true,
        _ => return None,
    };
    let after = chars.as_str().strip_prefix(']')?;
    if !after.is_empty() && !after.starts_with(char::is_whitespace) {
        return None;
    }
    Some((checked, after.trim()))
}

/// `Title：Body` with a full-width colon and a non-empty title.
fn split_news_entry(content: &str) -> Option<(&str, &str)> {
    let idx = content.find('：')?;
    let title_end = idx + '：'.len_utf8();
    if content[..idx].trim().is_empty() {
        return None;
    }
    Some((&content[..title_end], content[title_end..].trim()))
}

fn starred_header(trimmed: &str) -> Option<&str> {
    let inner = trimmed
        .strip_prefix("**")
        .and_then(|s| s.strip_suffix("**"))
        .or_else(|| trimmed.strip_prefix('*').and_then(|s| s.strip_suffix('*')))?;
    let inner = inner.trim();
    if inner.is_empty() || inner.contains('*') {
        return None;
    }
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    fn parser() -> MarkdownParser {
        MarkdownParser::new(ParserConfig {
            signature: None,
            ..ParserConfig::default()
        })
    }

    fn texts(segments: &[Segment]) -> Vec<String> {
        segments.iter().map(|s| s.text().to_string()).collect()
    }

    #[test]
    fn heading_then_paragraph() {
        let segments = parser().parse("# Hello\nWorld");
        assert_eq!(texts(&segments), vec!["Hello", "World"]);
        assert_eq!(segments[0].block(), BlockKind::Title { level: 1 });
        assert_eq!(segments[1].block(), BlockKind::Plain);
        assert!(segments[0].style().size > segments[1].style().size);
    }

    #[test]
    fn bold_and_italic_line_is_one_composite() {
        let segments = parser().parse("**bold** and *italic*");
        assert_eq!(segments.len(), 1);
        let runs = segments[0].runs();
        assert_eq!(segments[0].text(), "bold and italic");
        assert!(runs[0].style.is_bold());
        assert!(runs[1..].iter().all(|r| !r.style.is_bold()));
    }

    #[test]
    fn quotes_keep_an_empty_middle_line() {
        let segments = parser().parse("> line1\n>\n> line2");
        assert_eq!(texts(&segments), vec!["line1", "", "line2"]);
        assert!(segments.iter().all(|s| s.block() == BlockKind::Quote));
    }

    #[test]
    fn nested_quote_depth_sets_indent() {
        let segments = parser().parse(">> deep");
        assert_eq!(segments[0].style().quote_depth, 2);
        assert_eq!(segments[0].style().indent, Px::from_i32(80));
    }

    #[test]
    fn task_items() {
        let segments = parser().parse("- [x] Done\n- [ ] Todo");
        assert_eq!(texts(&segments), vec!["Done", "Todo"]);
        assert_eq!(segments[0].block(), BlockKind::TaskItem { checked: true });
        assert_eq!(segments[1].block(), BlockKind::TaskItem { checked: false });
    }

    #[test]
    fn list_nesting_from_leading_spaces() {
        let segments = parser().parse("* top\n  + child\n    - grandchild");
        assert!(segments.iter().all(|s| s.block() == BlockKind::ListItem));
        assert_eq!(segments[0].style().indent, Px::from_i32(40));
        assert_eq!(segments[1].style().indent, Px::from_i32(70));
        assert_eq!(segments[2].style().indent, Px::from_i32(100));
    }

    #[test]
    fn ordered_items_keep_their_number() {
        let segments = parser().parse("3. third\n10. tenth");
        assert_eq!(segments[0].block(), BlockKind::OrderedItem { number: 3 });
        assert_eq!(segments[1].block(), BlockKind::OrderedItem { number: 10 });
        assert_eq!(texts(&segments), vec!["third", "tenth"]);
    }

    #[test]
    fn news_entry_splits_bold_title_from_body() {
        let segments = parser().parse("1. 央行降准：释放长期资金");
        let Segment::Composite { base, runs } = &segments[0] else {
            panic!("expected composite");
        };
        assert_eq!(base.text, "1. 央行降准：释放长期资金");
        assert_eq!(runs[0].text, "1. 央行降准：");
        assert!(runs[0].style.is_bold());
        assert_eq!(runs[1].text, "释放长期资金");
        assert!(!runs[1].style.is_bold());
    }

    #[test]
    fn fenced_code_keeps_newlines_and_escapes() {
        let segments = parser().parse("```rust\nlet a = 1;\nif a < 2 {}\n```\nafter");
        assert_eq!(segments[0].block(), BlockKind::Code);
        assert_eq!(segments[0].text(), "let a = 1;\nif a &lt; 2 {}");
        assert_eq!(segments[1].text(), "after");
    }

    #[test]
    fn unterminated_fence_takes_the_rest() {
        let segments = parser().parse("```\nx = 1\ny = 2");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text(), "x = 1\ny = 2");
    }

    #[test]
    fn code_escaping_can_be_disabled() {
        let parser = MarkdownParser::new(ParserConfig {
            signature: None,
            escape_code_html: false,
            ..ParserConfig::default()
        });
        let segments = parser.parse("```\n<b>\n```");
        assert_eq!(segments[0].text(), "<b>");
    }

    #[test]
    fn horizontal_rules() {
        let segments = parser().parse("a\n---\n* * *\nb");
        assert_eq!(segments[1].block(), BlockKind::Rule);
        assert_eq!(segments[2].block(), BlockKind::Rule);
        assert_eq!(segments[1].text(), "");
    }

    #[test]
    fn blank_runs_collapse_into_one_spacer() {
        let segments = parser().parse("\n\na\n\n\nb\n\n");
        assert_eq!(texts(&segments), vec!["a", "", "b"]);
        assert!(segments[1].is_spacer());
        assert_eq!(segments[1].base().span_lines, 2);
    }

    #[test]
    fn no_spacer_between_list_items() {
        let segments = parser().parse("- a\n\n- b\n\nafter");
        assert_eq!(texts(&segments), vec!["a", "b", "", "after"]);
    }

    #[test]
    fn section_indents_following_paragraphs() {
        let segments = parser().parse("before\n## 国内\nafter");
        assert_eq!(segments[0].style().indent, Px::ZERO);
        assert_eq!(segments[2].style().indent, Px::from_i32(40));
    }

    #[test]
    fn categories_and_emoji_titles() {
        let segments = parser().parse("国内要闻\n🔥 今日热点");
        assert_eq!(segments[0].block(), BlockKind::Category);
        assert_eq!(segments[1].block(), BlockKind::Title { level: 1 });
        assert_eq!(segments[1].style().size, 40);
    }

    #[test]
    fn starred_headers_become_titles() {
        let segments = parser().parse("*一、宏观*\n**市场**");
        assert_eq!(texts(&segments), vec!["一、宏观", "市场"]);
        assert_eq!(segments[0].style().size, 38);
        assert_eq!(segments[1].style().size, 35);
    }

    #[test]
    fn color_spans_in_quotes_survive() {
        let segments = parser().parse(r#"> 今日<span style="color: #00ff00">上涨</span>"#);
        assert_eq!(segments[0].block(), BlockKind::Quote);
        let colored: Vec<_> = segments[0]
            .runs()
            .iter()
            .filter(|r| r.style.color == Some(Color::rgb(0, 255, 0)))
            .collect();
        assert_eq!(colored.len(), 1);
        assert_eq!(colored[0].text, "上涨");
    }

    #[test]
    fn signature_is_always_last_without_spacer() {
        let parser = MarkdownParser::new(ParserConfig::default());
        let segments = parser.parse("body\n\n\n");
        assert_eq!(texts(&segments), vec!["body", DEFAULT_SIGNATURE]);
        assert_eq!(
            segments[1].style().alignment,
            crate::style::Alignment::Right
        );
    }

    #[test]
    fn parse_is_pure() {
        let input = "# T\n\n- [ ] a\n> q\n```\nc\n```\n1. x：y";
        let p = MarkdownParser::default();
        assert_eq!(p.parse(input), p.parse(input));
    }
}
