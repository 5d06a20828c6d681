use crate::assets::{AssetResolver, Bitmap, EmojiGlyph};
use crate::canvas::{Canvas, Scene};
use crate::error::CardError;
use crate::font::{FaceKey, TextMetrics};
use crate::layout::{LayoutEngine, Marker, PlacedLine};
use crate::segment::{LineRun, RunKind, Segment};
use crate::style::BlockKind;
use crate::theme::Theme;
use crate::types::{Color, Px, Rect};
use std::time::Instant;

pub const PANEL_MARGIN: i32 = 40;
pub const TEXT_PADDING: i32 = 40;
pub const PANEL_RADIUS: i32 = 30;
const TITLE_IMAGE_INSET: i32 = 20;
const TITLE_IMAGE_RADIUS: i32 = 20;
const CODE_BAND_RADIUS: i32 = 6;
const QUOTE_BAR_WIDTH: i32 = 5;
const QUOTE_BAR_OFFSET: i32 = 15;
const MIN_CONTENT_WIDTH: i32 = 40;

/// Width left for text on a card `width` pixels wide.
pub fn content_width(width: u32) -> Px {
    Px::from_i32(width.min(i32::MAX as u32) as i32) - Px::from_i32(2 * (PANEL_MARGIN + TEXT_PADDING))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComposeStats {
    pub lines: usize,
    /// Time spent in both layout passes.
    pub layout_ms: f64,
    pub emoji_drawn: usize,
    pub emoji_fallbacks: usize,
    pub title_image: bool,
}

/// Where the title image lands inside the panel.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TitleImagePlacement {
    rect: Rect,
    /// Vertical space taken above the text, inset and gap included.
    block_height: Px,
}

pub(crate) struct Compositor<'a> {
    metrics: &'a dyn TextMetrics,
    assets: &'a AssetResolver,
    theme: Theme,
    deadline: Option<Instant>,
}

impl<'a> Compositor<'a> {
    pub fn new(
        metrics: &'a dyn TextMetrics,
        assets: &'a AssetResolver,
        theme: Theme,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            metrics,
            assets,
            theme,
            deadline,
        }
    }

    /// Lays out `segments` and paints the card. The canvas height comes from
    /// the measuring pass unless `height` pins it.
    pub fn compose(
        &self,
        segments: &[Segment],
        width: u32,
        height: Option<u32>,
        title_image: Option<Bitmap>,
    ) -> Result<(Scene, ComposeStats), CardError> {
        let text_width = content_width(width);
        if text_width < Px::from_i32(MIN_CONTENT_WIDTH) {
            return Err(CardError::InvalidConfiguration(format!(
                "width {width} leaves no room for text"
            )));
        }
        if height == Some(0) {
            return Err(CardError::InvalidConfiguration(
                "height must be positive".to_string(),
            ));
        }
        let engine = LayoutEngine::new(self.metrics, text_width);
        let measure_started = Instant::now();
        let content_height = engine.measure(segments);
        let mut layout_ms = measure_started.elapsed().as_secs_f64() * 1000.0;

        let margin = Px::from_i32(PANEL_MARGIN);
        let padding = Px::from_i32(TEXT_PADDING);
        let panel_width = Px::from_i32(width as i32) - margin * 2;
        let title = title_image
            .as_ref()
            .and_then(|image| place_title_image(image, margin, panel_width));
        let top_block = title.map(|t| t.block_height).unwrap_or(padding);
        let natural_height = margin * 2 + top_block + content_height + padding;
        let canvas_height = height.unwrap_or_else(|| natural_height.ceil_u32());

        let mut canvas = Canvas::new(width, canvas_height);
        let (start, end) = self.theme.gradient;
        canvas.fill_gradient(start, end, self.theme.direction);

        let panel = Rect::new(
            margin,
            margin,
            panel_width,
            Px::from_i32(canvas_height as i32) - margin * 2,
        );
        canvas.set_fill_color(self.theme.panel_color());
        canvas.fill_rounded_rect(panel, Px::from_i32(PANEL_RADIUS));

        let mut stats = ComposeStats::default();
        if let (Some(placement), Some(image)) = (title, title_image) {
            canvas.draw_image(placement.rect, image, Px::from_i32(TITLE_IMAGE_RADIUS));
            stats.title_image = true;
        }

        let origin = (margin + padding, margin + top_block);
        let mut placed: Vec<PlacedLine> = Vec::new();
        let walk_started = Instant::now();
        let drawn_height = engine.walk(segments, &mut placed);
        layout_ms += walk_started.elapsed().as_secs_f64() * 1000.0;
        if drawn_height != content_height {
            log::warn!(
                "layout passes disagree: measured {:?}, placed {:?}",
                content_height,
                drawn_height
            );
        }
        for line in &placed {
            self.paint_line(&mut canvas, line, origin, text_width, &mut stats);
        }
        stats.lines = placed.len();
        stats.layout_ms = layout_ms;
        Ok((canvas.finish(), stats))
    }

    fn paint_line(
        &self,
        canvas: &mut Canvas,
        placed: &PlacedLine,
        (left, top): (Px, Px),
        text_width: Px,
        stats: &mut ComposeStats,
    ) {
        let line = &placed.line;
        let style = &line.style;
        let x = left + placed.x;
        let y = top + placed.y;
        let baseline = top + placed.baseline();
        canvas.record_line_bounds(Rect::new(x, y, line.width, line.height));

        match style.block {
            BlockKind::Code => {
                let band = Rect::new(
                    x - Px::from_i32(10),
                    top + placed.block_top,
                    line.width + Px::from_i32(20),
                    placed.block_bottom - placed.block_top,
                );
                canvas.set_fill_color(self.theme.code_band());
                canvas.fill_rounded_rect(band, Px::from_i32(CODE_BAND_RADIUS));
            }
            BlockKind::Quote => {
                let band_left = left + style.indent - Px::from_i32(QUOTE_BAR_OFFSET);
                let band_top = top + placed.block_top;
                let band_height = placed.block_bottom - placed.block_top;
                canvas.set_fill_color(self.theme.quote_band());
                canvas.fill_rect(Rect::new(
                    band_left,
                    band_top,
                    left + text_width - band_left,
                    band_height,
                ));
                canvas.set_fill_color(self.theme.quote_bar());
                canvas.fill_rect(Rect::new(
                    band_left,
                    band_top,
                    Px::from_i32(QUOTE_BAR_WIDTH),
                    band_height,
                ));
            }
            BlockKind::Rule => {
                let mid = y + line.height / 2;
                canvas.set_stroke_color(self.theme.rule_color());
                canvas.set_line_width(Px::from_i32(2));
                canvas.stroke_line(left + style.indent, mid, left + text_width, mid);
            }
            _ => {}
        }

        if let Some((marker, marker_x)) = placed.marker {
            self.paint_marker(canvas, marker, left + marker_x, baseline, placed);
        }

        let mut pen = x;
        for run in &line.runs {
            self.paint_run(canvas, run, pen, baseline, stats);
            pen += run.width;
        }
    }

    fn paint_marker(
        &self,
        canvas: &mut Canvas,
        marker: Marker,
        x: Px,
        baseline: Px,
        placed: &PlacedLine,
    ) {
        let style = &placed.line.style;
        let color = style.resolved_color();
        if let Some(label) = marker.label() {
            canvas.set_fill_color(color);
            let bold = Marker::style(style);
            canvas.draw_text(x, baseline, label, FaceKey::of(&bold), bold.size);
            return;
        }
        let Marker::Checkbox { checked } = marker else {
            return;
        };
        let side = Marker::box_size(style);
        let rect = Rect::new(x, baseline - side, side, side);
        let radius = Px::from_i32(3);
        if checked {
            canvas.set_fill_color(color);
            canvas.fill_rounded_rect(rect, radius);
            let check_color = if self.theme.dark {
                Color::BLACK
            } else {
                Color::WHITE
            };
            canvas.set_stroke_color(check_color);
            canvas.set_line_width(Px::from_i32(3));
            canvas.stroke_polyline(vec![
                (x + side.mul_ratio(1, 5), baseline - side.mul_ratio(1, 2)),
                (x + side.mul_ratio(2, 5), baseline - side.mul_ratio(1, 4)),
                (x + side.mul_ratio(4, 5), baseline - side.mul_ratio(3, 4)),
            ]);
        } else {
            canvas.set_stroke_color(color);
            canvas.set_line_width(Px::from_i32(2));
            canvas.stroke_rounded_rect(rect, radius);
        }
    }

    fn paint_run(
        &self,
        canvas: &mut Canvas,
        run: &LineRun,
        x: Px,
        baseline: Px,
        stats: &mut ComposeStats,
    ) {
        let style = &run.style;
        let size = style.size_px();
        let color = style.resolved_color();

        if run.kind == RunKind::Emoji {
            match self.assets.resolve_emoji(&run.text, style.size, self.deadline) {
                EmojiGlyph::Bitmap(bitmap) => {
                    let rect = Rect::new(x, baseline - size.mul_ratio(4, 5), size, size);
                    canvas.draw_image(rect, bitmap, Px::ZERO);
                    stats.emoji_drawn += 1;
                }
                EmojiGlyph::Fallback => {
                    canvas.set_fill_color(color);
                    canvas.draw_text(x, baseline, run.text.clone(), FaceKey::REGULAR, style.size);
                    stats.emoji_fallbacks += 1;
                }
            }
            return;
        }

        if style.code && style.block != BlockKind::Code {
            let pad = Px::from_i32(3);
            canvas.set_fill_color(self.theme.code_band());
            canvas.fill_rounded_rect(
                Rect::new(
                    x - pad,
                    baseline - size.mul_ratio(4, 5) - pad,
                    run.width + pad * 2,
                    size + pad * 2,
                ),
                Px::from_i32(4),
            );
        }

        canvas.set_fill_color(color);
        canvas.draw_text(x, baseline, run.text.clone(), FaceKey::of(style), style.size);

        if style.strikethrough {
            let y = baseline - size.mul_ratio(3, 10);
            canvas.set_stroke_color(color);
            canvas.set_line_width(Px::from_i32(2));
            canvas.stroke_line(x, y, x + run.width, y);
        }
        if style.underline {
            let y = baseline + Px::from_i32(3);
            canvas.set_stroke_color(color);
            canvas.set_line_width(Px::from_i32(2));
            canvas.stroke_line(x, y, x + run.width, y);
        }
    }
}

/// Fits the image to the panel width minus the insets, caps its height at
/// half the panel width and centers it.
fn place_title_image(image: &Bitmap, margin: Px, panel_width: Px) -> Option<TitleImagePlacement> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }
    let inset = Px::from_i32(TITLE_IMAGE_INSET);
    let max_width = panel_width - inset * 2;
    let max_height = panel_width / 2;
    if max_width <= Px::ZERO {
        return None;
    }
    let (iw, ih) = (image.width() as i32, image.height() as i32);
    let mut width = max_width;
    let mut height = max_width.mul_ratio(ih, iw);
    if height > max_height {
        height = max_height;
        width = max_height.mul_ratio(iw, ih);
    }
    let x = margin + inset + (max_width - width) / 2;
    let y = margin + inset;
    Some(TitleImagePlacement {
        rect: Rect::new(x, y, width, height),
        block_height: inset * 2 + height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::RetryPolicy;
    use crate::canvas::Command;
    use crate::font::testing::FixedAdvance;
    use crate::markdown::{MarkdownParser, ParserConfig};
    use crate::theme::{GradientDirection, PALETTE};
    use std::sync::Arc;
    use tiny_skia::Pixmap;

    fn theme(dark: bool) -> Theme {
        Theme {
            dark,
            gradient: PALETTE[0],
            direction: GradientDirection::Diagonal,
        }
    }

    fn offline() -> AssetResolver {
        AssetResolver::new(RetryPolicy::default(), Vec::new(), None)
    }

    fn compose(text: &str, width: u32, image: Option<Bitmap>) -> (Scene, ComposeStats) {
        let segments = MarkdownParser::new(ParserConfig::default()).parse(text);
        let assets = offline();
        Compositor::new(&FixedAdvance, &assets, theme(false), None)
            .compose(&segments, width, None, image)
            .expect("compose")
    }

    fn measured(text: &str, width: u32) -> Px {
        let segments = MarkdownParser::new(ParserConfig::default()).parse(text);
        LayoutEngine::new(&FixedAdvance, content_width(width)).measure(&segments)
    }

    fn line_boxes(scene: &Scene) -> Vec<(i64, i64, i64, i64)> {
        scene
            .meta("__line_bbox")
            .map(|v| {
                let parts: Vec<i64> = v.split(',').filter_map(|p| p.parse().ok()).collect();
                (parts[0], parts[1], parts[2], parts[3])
            })
            .collect()
    }

    #[test]
    fn canvas_height_follows_measured_content() {
        let text = "# 标题\n\n正文第一段，内容足够长以便换行显示。\n- 列表\n> 引用";
        let (scene, stats) = compose(text, 720, None);
        let expected = Px::from_i32(2 * PANEL_MARGIN + 2 * TEXT_PADDING) + measured(text, 720);
        assert_eq!(scene.height, expected.ceil_u32());
        assert!(stats.lines >= 5);
        let bottom_limit = ((scene.height as i32 - PANEL_MARGIN - TEXT_PADDING) * 1000) as i64;
        for (_, y, _, h) in line_boxes(&scene) {
            assert!(y + h <= bottom_limit);
        }
    }

    #[test]
    fn explicit_height_is_respected() {
        let segments = MarkdownParser::new(ParserConfig::default()).parse("hello");
        let assets = offline();
        let (scene, _) = Compositor::new(&FixedAdvance, &assets, theme(true), None)
            .compose(&segments, 600, Some(900), None)
            .expect("compose");
        assert_eq!((scene.width, scene.height), (600, 900));
    }

    #[test]
    fn narrow_widths_are_rejected() {
        let assets = offline();
        let result =
            Compositor::new(&FixedAdvance, &assets, theme(false), None).compose(&[], 150, None, None);
        assert!(matches!(result, Err(CardError::InvalidConfiguration(_))));
    }

    #[test]
    fn title_image_is_capped_centered_and_pushes_text_down() {
        // Tall image: capped at half the panel width.
        let image: Bitmap = Arc::new(Pixmap::new(100, 400).expect("pixmap"));
        let (scene, stats) = compose("body", 720, Some(image));
        assert!(stats.title_image);
        let rect = scene
            .commands
            .iter()
            .find_map(|c| match c {
                Command::DrawImage { rect, .. } => Some(*rect),
                _ => None,
            })
            .expect("title image drawn");
        let panel_width = 720 - 2 * PANEL_MARGIN;
        assert_eq!(rect.height, Px::from_i32(panel_width / 2));
        assert_eq!(rect.width, Px::from_i32(panel_width / 8));
        let center = rect.x + rect.width / 2;
        assert_eq!(center, Px::from_i32(360));

        let first_line_top = line_boxes(&scene)[0].1;
        assert!(first_line_top >= (rect.bottom() + Px::from_i32(TITLE_IMAGE_INSET)).to_milli_i64());
        let expected = Px::from_i32(2 * PANEL_MARGIN + 2 * TITLE_IMAGE_INSET + TEXT_PADDING)
            + rect.height
            + measured("body", 720);
        assert_eq!(scene.height, expected.ceil_u32());
    }

    #[test]
    fn wide_image_keeps_aspect_ratio() {
        let image: Bitmap = Arc::new(Pixmap::new(640, 320).expect("pixmap"));
        let placement =
            place_title_image(&image, Px::from_i32(40), Px::from_i32(640)).expect("placement");
        assert_eq!(placement.rect.width, Px::from_i32(600));
        assert_eq!(placement.rect.height, Px::from_i32(300));
        assert_eq!(placement.block_height, Px::from_i32(340));
    }

    #[test]
    fn unavailable_emoji_fall_back_to_text() {
        let (scene, stats) = compose("今天 😀 不错", 720, None);
        assert_eq!(stats.emoji_fallbacks, 1);
        assert_eq!(stats.emoji_drawn, 0);
        assert!(scene.text_commands().any(|t| t == "😀"));
    }

    #[test]
    fn task_boxes_differ_by_state() {
        let (scene, _) = compose("- [x] Done\n- [ ] Todo", 720, None);
        let polylines = scene
            .commands
            .iter()
            .filter(|c| matches!(c, Command::StrokePolyline(_)))
            .count();
        let outlines = scene
            .commands
            .iter()
            .filter(|c| matches!(c, Command::StrokeRoundedRect { .. }))
            .count();
        assert_eq!((polylines, outlines), (1, 1));
    }

    #[test]
    fn quotes_get_bar_and_band_even_when_empty() {
        let (scene, _) = compose("> line1\n>\n> line2", 720, None);
        let bar = theme(false).quote_bar();
        let bars = scene
            .commands
            .windows(2)
            .filter(|w| {
                matches!(w[0], Command::SetFillColor(c) if c == bar)
                    && matches!(w[1], Command::FillRect(_))
            })
            .count();
        assert_eq!(bars, 3);
    }

    #[test]
    fn list_markers_and_rules_are_drawn() {
        let (scene, _) = compose("1. first\n2. second\n\n---\n\nend", 720, None);
        let texts: Vec<&str> = scene.text_commands().collect();
        assert!(texts.contains(&"1.") && texts.contains(&"2."));
        assert!(
            scene
                .commands
                .iter()
                .any(|c| matches!(c, Command::StrokeLine { .. }))
        );
    }
}
