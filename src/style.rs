use crate::types::{Color, Px};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontWeight {
    #[default]
    Regular,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontSlant {
    #[default]
    Normal,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// Block-level role of a segment. Selects spacing in layout and decoration in
/// the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockKind {
    #[default]
    Plain,
    Title {
        level: u8,
    },
    Category,
    ListItem,
    OrderedItem {
        number: u32,
    },
    TaskItem {
        checked: bool,
    },
    Code,
    Quote,
    Rule,
}

impl BlockKind {
    pub fn is_title(self) -> bool {
        matches!(self, BlockKind::Title { .. })
    }

    /// Kinds drawn with a leading marker (bullet, number, checkbox).
    pub fn has_marker(self) -> bool {
        matches!(
            self,
            BlockKind::ListItem | BlockKind::OrderedItem { .. } | BlockKind::TaskItem { .. }
        )
    }
}

pub const BODY_SIZE: u16 = 30;
pub const CODE_SIZE: u16 = 28;
pub const SIGNATURE_SIZE: u16 = 30;
pub const BASE_INDENT: i32 = 40;
pub const QUOTE_INDENT_STEP: i32 = 20;
pub const LIST_INDENT_STEP: i32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub weight: FontWeight,
    pub slant: FontSlant,
    pub size: u16,
    pub indent: Px,
    pub line_spacing: Px,
    pub block: BlockKind,
    pub color: Option<Color>,
    pub alignment: Alignment,
    pub quote_depth: u8,
    pub dark_theme: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub code: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            weight: FontWeight::Regular,
            slant: FontSlant::Normal,
            size: BODY_SIZE,
            indent: Px::ZERO,
            line_spacing: Px::from_i32(15),
            block: BlockKind::Plain,
            color: None,
            alignment: Alignment::Left,
            quote_depth: 0,
            dark_theme: false,
            strikethrough: false,
            underline: false,
            code: false,
        }
    }
}

impl TextStyle {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn title(level: u8, size: u16) -> Self {
        Self {
            weight: FontWeight::Bold,
            size,
            line_spacing: Px::from_i32(25),
            block: BlockKind::Title { level },
            ..Self::default()
        }
    }

    pub fn category() -> Self {
        Self {
            weight: FontWeight::Bold,
            size: 35,
            line_spacing: Px::from_i32(20),
            block: BlockKind::Category,
            ..Self::default()
        }
    }

    pub fn code_block() -> Self {
        Self {
            size: CODE_SIZE,
            indent: Px::from_i32(BASE_INDENT),
            line_spacing: Px::from_i32(10),
            block: BlockKind::Code,
            code: true,
            ..Self::default()
        }
    }

    pub fn quote(depth: u8) -> Self {
        Self {
            indent: Px::from_i32(BASE_INDENT + QUOTE_INDENT_STEP * depth as i32),
            line_spacing: Px::from_i32(15),
            block: BlockKind::Quote,
            quote_depth: depth,
            ..Self::default()
        }
    }

    pub fn list(block: BlockKind, nesting: u8) -> Self {
        Self {
            indent: Px::from_i32(BASE_INDENT + LIST_INDENT_STEP * nesting as i32),
            line_spacing: Px::from_i32(15),
            block,
            ..Self::default()
        }
    }

    pub fn rule() -> Self {
        Self {
            line_spacing: Px::from_i32(15),
            block: BlockKind::Rule,
            ..Self::default()
        }
    }

    pub fn signature() -> Self {
        Self {
            size: SIGNATURE_SIZE,
            line_spacing: Px::from_i32(15),
            alignment: Alignment::Right,
            ..Self::default()
        }
    }

    pub fn with_weight(&self, weight: FontWeight) -> Self {
        Self {
            weight,
            ..self.clone()
        }
    }

    pub fn with_slant(&self, slant: FontSlant) -> Self {
        Self {
            slant,
            ..self.clone()
        }
    }

    pub fn with_color(&self, color: Color) -> Self {
        Self {
            color: Some(color),
            ..self.clone()
        }
    }

    pub fn with_indent(&self, indent: Px) -> Self {
        Self {
            indent,
            ..self.clone()
        }
    }

    pub fn with_line_spacing(&self, line_spacing: Px) -> Self {
        Self {
            line_spacing,
            ..self.clone()
        }
    }

    pub fn with_dark_theme(&self, dark_theme: bool) -> Self {
        Self {
            dark_theme,
            ..self.clone()
        }
    }

    pub fn with_strikethrough(&self) -> Self {
        Self {
            strikethrough: true,
            ..self.clone()
        }
    }

    pub fn with_underline(&self) -> Self {
        Self {
            underline: true,
            ..self.clone()
        }
    }

    pub fn with_inline_code(&self) -> Self {
        Self {
            code: true,
            ..self.clone()
        }
    }

    pub fn is_bold(&self) -> bool {
        self.weight == FontWeight::Bold
    }

    pub fn is_italic(&self) -> bool {
        self.slant == FontSlant::Italic
    }

    pub fn size_px(&self) -> Px {
        Px::from_i32(self.size as i32)
    }

    /// Explicit color, or the theme's text color.
    pub fn resolved_color(&self) -> Color {
        match self.color {
            Some(color) => color,
            None if self.dark_theme => Color::WHITE,
            None => Color::BLACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_styles_leave_the_source_untouched() {
        let base = TextStyle::plain();
        let bold = base.with_weight(FontWeight::Bold);
        assert!(!base.is_bold());
        assert!(bold.is_bold());
        assert_eq!(bold.size, base.size);
    }

    #[test]
    fn quote_indent_grows_with_depth() {
        assert_eq!(TextStyle::quote(1).indent, Px::from_i32(60));
        assert_eq!(TextStyle::quote(3).indent, Px::from_i32(100));
    }

    #[test]
    fn resolved_color_follows_theme_unless_explicit() {
        let style = TextStyle::plain();
        assert_eq!(style.resolved_color(), Color::BLACK);
        assert_eq!(style.with_dark_theme(true).resolved_color(), Color::WHITE);
        let red = Color::rgb(255, 0, 0);
        assert_eq!(
            style.with_color(red).with_dark_theme(true).resolved_color(),
            red
        );
    }

    #[test]
    fn marker_kinds() {
        assert!(BlockKind::ListItem.has_marker());
        assert!(BlockKind::TaskItem { checked: true }.has_marker());
        assert!(!BlockKind::Quote.has_marker());
        assert!(BlockKind::Title { level: 2 }.is_title());
    }
}
