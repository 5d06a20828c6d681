use crate::font::TextMetrics;
use crate::linebreak::wrap;
use crate::segment::{ProcessedLine, Segment};
use crate::style::{Alignment, BlockKind, FontWeight, TextStyle};
use crate::types::Px;

pub const MARKER_GUTTER: i32 = 10;
pub const MIN_CONTENT_HEIGHT: i32 = 120;
/// Reserved below the final segment, which is the signature when present.
pub const TRAILING_RESERVE: i32 = 40;
const CATEGORY_GAP: i32 = 15;
const TITLE_GAP: i32 = 10;
const CODE_PAD: i32 = 10;
const QUOTE_PAD: i32 = 5;
const RULE_PAD: i32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Bullet,
    Number(u32),
    Checkbox { checked: bool },
}

impl Marker {
    pub fn for_block(block: BlockKind) -> Option<Marker> {
        match block {
            BlockKind::ListItem => Some(Marker::Bullet),
            BlockKind::OrderedItem { number } => Some(Marker::Number(number)),
            BlockKind::TaskItem { checked } => Some(Marker::Checkbox { checked }),
            _ => None,
        }
    }

    /// Text drawn for the marker; checkboxes are drawn as shapes.
    pub fn label(&self) -> Option<String> {
        match self {
            Marker::Bullet => Some("•".to_string()),
            Marker::Number(n) => Some(format!("{n}.")),
            Marker::Checkbox { .. } => None,
        }
    }

    pub fn style(line_style: &TextStyle) -> TextStyle {
        line_style.with_weight(FontWeight::Bold)
    }

    pub fn box_size(line_style: &TextStyle) -> Px {
        line_style.size_px().mul_ratio(4, 5)
    }

    /// Horizontal space the marker occupies, gutter included.
    pub fn advance(&self, line_style: &TextStyle, metrics: &dyn TextMetrics) -> Px {
        let width = match self.label() {
            Some(label) => metrics.text_width(&label, &Marker::style(line_style)),
            None => Marker::box_size(line_style),
        };
        width + Px::from_i32(MARKER_GUTTER)
    }
}

/// A wrapped line with its position inside the content box.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub line: ProcessedLine,
    /// Left edge of the first run, relative to the content box.
    pub x: Px,
    /// Top of the line's ink box.
    pub y: Px,
    /// Set on the first line of a list item.
    pub marker: Option<(Marker, Px)>,
    /// Vertical extent of this line's share of a code or quote band. Shares
    /// of consecutive lines tile without gaps.
    pub block_top: Px,
    pub block_bottom: Px,
    /// The band continues on the next placed line.
    pub joins_next: bool,
}

impl PlacedLine {
    pub fn baseline(&self) -> Px {
        self.y + self.line.ascent
    }

    pub fn bottom(&self) -> Px {
        self.y + self.line.height
    }
}

pub trait LayoutSink {
    fn place(&mut self, line: PlacedLine);
}

impl LayoutSink for Vec<PlacedLine> {
    fn place(&mut self, line: PlacedLine) {
        self.push(line);
    }
}

/// Phase-one sink: counts lines, keeps nothing.
#[derive(Debug, Default)]
pub struct LineCounter {
    pub lines: usize,
}

impl LayoutSink for LineCounter {
    fn place(&mut self, _line: PlacedLine) {
        self.lines += 1;
    }
}

pub struct LayoutEngine<'a> {
    metrics: &'a dyn TextMetrics,
    content_width: Px,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(metrics: &'a dyn TextMetrics, content_width: Px) -> Self {
        Self {
            metrics,
            content_width,
        }
    }

    pub fn content_width(&self) -> Px {
        self.content_width
    }

    /// Content height the segments need, with the floor applied.
    pub fn measure(&self, segments: &[Segment]) -> Px {
        self.walk(segments, &mut LineCounter::default())
    }

    /// Places every line into `sink` and returns the content height. Both
    /// measuring and drawing go through here so they cannot disagree.
    pub fn walk(&self, segments: &[Segment], sink: &mut dyn LayoutSink) -> Px {
        let mut y = Px::ZERO;
        let mut previous: Option<(BlockKind, Px)> = None;

        for (index, segment) in segments.iter().enumerate() {
            let style = segment.style();
            let block = segment.block();
            let marker = Marker::for_block(block);
            let marker_advance = marker
                .map(|m| m.advance(style, self.metrics))
                .unwrap_or(Px::ZERO);
            let available = self.content_width - style.indent - marker_advance;
            let lines = wrap(segment, available, self.metrics);

            if let Some((prev_block, prev_spacing)) = previous {
                y += prev_spacing + extra_gap(prev_block, block);
            }
            let pad = Px::from_i32(block_padding(block));
            y += pad;

            let next_joins = segments
                .get(index + 1)
                .is_some_and(|next| banded(block) && next.block() == block);
            let count = lines.len();
            for (i, line) in lines.into_iter().enumerate() {
                if i > 0 {
                    y += style.line_spacing;
                }
                let last = i + 1 == count;
                let block_top = if i == 0 { y - pad } else { y };
                let block_bottom = if last {
                    let tail = y + line.height + pad;
                    if next_joins {
                        tail + style.line_spacing + extra_gap(block, block)
                    } else {
                        tail
                    }
                } else {
                    y + line.height + style.line_spacing
                };
                let x = self.line_x(&line, style, marker_advance, available);
                let height = line.height;
                sink.place(PlacedLine {
                    marker: marker
                        .filter(|_| i == 0)
                        .map(|m| (m, style.indent)),
                    line,
                    x,
                    y,
                    block_top,
                    block_bottom,
                    joins_next: banded(block) && (!last || next_joins),
                });
                y += height;
            }
            y += pad;
            if index + 1 == segments.len() {
                y += Px::from_i32(TRAILING_RESERVE);
            }
            previous = Some((block, style.line_spacing));
        }
        y.max(Px::from_i32(MIN_CONTENT_HEIGHT))
    }

    fn line_x(
        &self,
        line: &ProcessedLine,
        style: &TextStyle,
        marker_advance: Px,
        available: Px,
    ) -> Px {
        match style.alignment {
            Alignment::Left => style.indent + marker_advance,
            Alignment::Center => {
                style.indent + marker_advance + ((available - line.width).max(Px::ZERO) / 2)
            }
            Alignment::Right => (self.content_width - line.width).max(Px::ZERO),
        }
    }
}

fn extra_gap(previous: BlockKind, current: BlockKind) -> Px {
    let mut gap = 0;
    if previous == BlockKind::Category {
        gap += CATEGORY_GAP;
    }
    if previous.is_title() && !current.is_title() {
        gap += TITLE_GAP;
    }
    Px::from_i32(gap)
}

fn block_padding(block: BlockKind) -> i32 {
    match block {
        BlockKind::Code => CODE_PAD,
        BlockKind::Quote => QUOTE_PAD,
        BlockKind::Rule => RULE_PAD,
        _ => 0,
    }
}

fn banded(block: BlockKind) -> bool {
    matches!(block, BlockKind::Code | BlockKind::Quote)
}
