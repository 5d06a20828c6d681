use crate::style::{BlockKind, TextStyle};
use crate::types::Px;

#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    pub style: TextStyle,
    /// Blank input lines collapsed into this segment; only spacers carry more than one.
    pub span_lines: u16,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, style: TextStyle) -> Self {
        Self {
            text: text.into(),
            style,
            span_lines: 1,
        }
    }

    pub fn spacer(lines: u16, style: TextStyle) -> Self {
        Self {
            text: String::new(),
            style,
            span_lines: lines.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// One logical line of parsed input.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Simple(TextSegment),
    /// Differently styled runs sharing one line. `base.text` is the
    /// concatenation of the run texts.
    Composite {
        base: TextSegment,
        runs: Vec<TextSegment>,
    },
}

impl Segment {
    pub fn composite(base_style: TextStyle, runs: Vec<TextSegment>) -> Self {
        let text: String = runs.iter().map(|run| run.text.as_str()).collect();
        Segment::Composite {
            base: TextSegment::new(text, base_style),
            runs,
        }
    }

    pub fn base(&self) -> &TextSegment {
        match self {
            Segment::Simple(segment) => segment,
            Segment::Composite { base, .. } => base,
        }
    }

    pub fn text(&self) -> &str {
        &self.base().text
    }

    pub fn style(&self) -> &TextStyle {
        &self.base().style
    }

    pub fn block(&self) -> BlockKind {
        self.style().block
    }

    pub fn runs(&self) -> &[TextSegment] {
        match self {
            Segment::Simple(segment) => std::slice::from_ref(segment),
            Segment::Composite { runs, .. } => runs,
        }
    }

    /// An empty plain segment standing for one or more blank input lines.
    pub fn is_spacer(&self) -> bool {
        matches!(self, Segment::Simple(s) if s.is_empty() && s.style.block == BlockKind::Plain)
    }

    pub fn map_style(self, f: impl Fn(&TextStyle) -> TextStyle) -> Segment {
        match self {
            Segment::Simple(mut segment) => {
                segment.style = f(&segment.style);
                Segment::Simple(segment)
            }
            Segment::Composite { mut base, runs } => {
                base.style = f(&base.style);
                let runs = runs
                    .into_iter()
                    .map(|mut run| {
                        run.style = f(&run.style);
                        run
                    })
                    .collect();
                Segment::Composite { base, runs }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Text,
    Emoji,
}

/// A measured piece of a wrapped line with uniform style.
#[derive(Debug, Clone, PartialEq)]
pub struct LineRun {
    pub text: String,
    pub style: TextStyle,
    pub width: Px,
    pub kind: RunKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedLine {
    pub runs: Vec<LineRun>,
    /// Style of the source segment; drives block decoration.
    pub style: TextStyle,
    pub width: Px,
    pub height: Px,
    pub ascent: Px,
    pub line_count: u16,
}

impl ProcessedLine {
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|run| run.text.is_empty())
    }
}
