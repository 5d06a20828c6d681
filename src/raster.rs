use crate::canvas::{Command, Scene};
use crate::error::CardError;
use crate::font::{FaceKey, FontTable};
use crate::style::TextStyle;
use crate::theme::GradientDirection;
use crate::types::{Color, Px};
use rayon::prelude::*;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use tiny_skia::{
    FillRule, FilterQuality, LineCap, LineJoin, Mask, Paint, Path, PathBuilder, Pixmap,
    PixmapPaint, Stroke, Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

const ITALIC_SKEW: f32 = 0.2;
const BOLD_STROKE_RATIO: f32 = 0.035;

#[derive(Clone)]
struct RasterState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Px,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Px::from_i32(1),
        }
    }
}

/// Executes `scene` on a fresh pixmap.
pub(crate) fn rasterize(scene: &Scene, fonts: &FontTable) -> Result<Pixmap, CardError> {
    let mut pixmap = Pixmap::new(scene.width, scene.height).ok_or_else(|| {
        CardError::CanvasAllocation(format!(
            "invalid raster size {}x{}",
            scene.width, scene.height
        ))
    })?;
    let mut state = RasterState::default();

    for command in &scene.commands {
        match command {
            Command::Meta { .. } => {}
            Command::SetFillColor(color) => state.fill_color = *color,
            Command::SetStrokeColor(color) => state.stroke_color = *color,
            Command::SetLineWidth(width) => state.line_width = *width,
            Command::FillGradient {
                start,
                end,
                direction,
            } => fill_gradient(&mut pixmap, *start, *end, *direction),
            Command::FillRect(rect) => {
                if let Some(rect) = sk_rect(rect.x, rect.y, rect.width, rect.height) {
                    pixmap.fill_rect(
                        rect,
                        &fill_paint(state.fill_color),
                        Transform::identity(),
                        None,
                    );
                }
            }
            Command::FillRoundedRect { rect, radius } => {
                if let Some(path) = rounded_rect_path(
                    rect.x.to_f32(),
                    rect.y.to_f32(),
                    rect.width.to_f32(),
                    rect.height.to_f32(),
                    radius.to_f32(),
                ) {
                    pixmap.fill_path(
                        &path,
                        &fill_paint(state.fill_color),
                        FillRule::Winding,
                        Transform::identity(),
                        None,
                    );
                }
            }
            Command::StrokeRoundedRect { rect, radius } => {
                if let Some(path) = rounded_rect_path(
                    rect.x.to_f32(),
                    rect.y.to_f32(),
                    rect.width.to_f32(),
                    rect.height.to_f32(),
                    radius.to_f32(),
                ) {
                    stroke_path(&mut pixmap, &path, &state);
                }
            }
            Command::StrokeLine { x1, y1, x2, y2 } => {
                let mut builder = PathBuilder::new();
                builder.move_to(x1.to_f32(), y1.to_f32());
                builder.line_to(x2.to_f32(), y2.to_f32());
                if let Some(path) = builder.finish() {
                    stroke_path(&mut pixmap, &path, &state);
                }
            }
            Command::StrokePolyline(points) => {
                let mut builder = PathBuilder::new();
                for (i, (x, y)) in points.iter().enumerate() {
                    if i == 0 {
                        builder.move_to(x.to_f32(), y.to_f32());
                    } else {
                        builder.line_to(x.to_f32(), y.to_f32());
                    }
                }
                if let Some(path) = builder.finish() {
                    stroke_path(&mut pixmap, &path, &state);
                }
            }
            Command::DrawText {
                x,
                y,
                text,
                face,
                size,
            } => {
                let drawn = draw_text(
                    &mut pixmap,
                    fonts,
                    x.to_f32(),
                    y.to_f32(),
                    text,
                    *face,
                    *size,
                    state.fill_color,
                );
                if drawn == 0 && !text.trim().is_empty() {
                    log::debug!("no outlines for {text:?}");
                }
            }
            Command::DrawImage {
                rect,
                resource,
                corner_radius,
            } => {
                let Some(image) = scene.images.get(*resource) else {
                    log::warn!("scene references missing image {resource}");
                    continue;
                };
                draw_image(
                    &mut pixmap,
                    image,
                    rect.x.to_f32(),
                    rect.y.to_f32(),
                    rect.width.to_f32(),
                    rect.height.to_f32(),
                    corner_radius.to_f32(),
                );
            }
        }
    }
    Ok(pixmap)
}

pub(crate) fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>, CardError> {
    pixmap
        .encode_png()
        .map_err(|e| CardError::Encoding(format!("png encode failed: {e}")))
}

/// Overwrites every pixel with the two-stop ramp. The ramp is computed once
/// per distinct position and rows are filled in parallel.
fn fill_gradient(pixmap: &mut Pixmap, start: Color, end: Color, direction: GradientDirection) {
    let width = pixmap.width();
    let height = pixmap.height();
    let steps = match direction {
        GradientDirection::Diagonal => width + height,
        GradientDirection::Vertical => height,
        GradientDirection::Horizontal => width,
    };
    let ramp: Vec<[u8; 4]> = (0..=steps)
        .map(|i| {
            let t = if steps == 0 { 0.0 } else { i as f32 / steps as f32 };
            let c = start.lerp(end, t);
            [
                premul_u8(c.r, c.a),
                premul_u8(c.g, c.a),
                premul_u8(c.b, c.a),
                c.a,
            ]
        })
        .collect();
    let row_bytes = width as usize * 4;
    pixmap
        .data_mut()
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let index = match direction {
                    GradientDirection::Diagonal => x + y,
                    GradientDirection::Vertical => y,
                    GradientDirection::Horizontal => x,
                };
                px.copy_from_slice(&ramp[index.min(ramp.len() - 1)]);
            }
        });
}

#[allow(clippy::too_many_arguments)]
fn draw_text(
    pixmap: &mut Pixmap,
    fonts: &FontTable,
    x: f32,
    baseline: f32,
    text: &str,
    face: FaceKey,
    size: u16,
    color: Color,
) -> usize {
    let style = TextStyle {
        weight: face.weight,
        slant: face.slant,
        size,
        ..TextStyle::default()
    };
    let Some(scaled) = fonts.scaled(&style) else {
        return 0;
    };
    let font_size = scaled.size_f32();
    if font_size <= 0.0 {
        return 0;
    }
    let paint = fill_paint(color);
    let skew = if scaled.synthetic_italic {
        ITALIC_SKEW
    } else {
        0.0
    };
    let mut pen_x = x;
    let mut drawn = 0usize;

    for run in fonts.fallback_runs(scaled.font_index, text) {
        let Some(font) = fonts.font(run.font_index) else {
            continue;
        };
        let Ok(ttf) = ttf_parser::Face::parse(&font.data, 0) else {
            continue;
        };
        let (placements, advance) = layout_text_glyphs(&font.data, &run.text, font_size, pen_x, baseline);
        for placement in placements {
            let mut builder = GlyphPathBuilder::new(
                placement.origin_x,
                placement.origin_y,
                placement.scale,
                skew,
            );
            if ttf
                .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
                .is_none()
            {
                continue;
            }
            let Some(path) = builder.finish() else {
                continue;
            };
            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
            if scaled.synthetic_bold {
                let stroke = Stroke {
                    width: (font_size * BOLD_STROKE_RATIO).max(0.5),
                    line_join: LineJoin::Round,
                    ..Stroke::default()
                };
                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
            drawn += 1;
        }
        pen_x += advance;
    }
    drawn
}

fn draw_image(
    pixmap: &mut Pixmap,
    image: &Pixmap,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    radius: f32,
) {
    if image.width() == 0 || image.height() == 0 || width <= 0.0 || height <= 0.0 {
        return;
    }
    let sx = width / image.width() as f32;
    let sy = height / image.height() as f32;
    let transform = Transform::from_row(sx, 0.0, 0.0, sy, x, y);
    let mask = if radius > 0.0 {
        rounded_rect_path(x, y, width, height, radius).and_then(|path| {
            let mut mask = Mask::new(pixmap.width(), pixmap.height())?;
            mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
            Some(mask)
        })
    } else {
        None
    };
    let paint = PixmapPaint {
        quality: FilterQuality::Bicubic,
        ..PixmapPaint::default()
    };
    pixmap.draw_pixmap(0, 0, image.as_ref(), &paint, transform, mask.as_ref());
}

#[derive(Clone, Copy)]
struct GlyphPlacement {
    glyph_id: u16,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

/// Shaped glyph origins for `text` starting at the pen position, plus the
/// total advance.
fn layout_text_glyphs(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> (Vec<GlyphPlacement>, f32) {
    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    };
    let hb_units = face.units_per_em().max(1) as f32;
    let scale = font_size / hb_units;
    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            out.push(GlyphPlacement {
                glyph_id: gid,
                origin_x: baseline_x + pen_x + pos.x_offset as f32 * scale,
                origin_y: baseline_y - pos.y_offset as f32 * scale,
                scale,
            });
        }
        pen_x += pos.x_advance as f32 * scale;
    }
    (out, pen_x)
}

fn layout_text_glyphs_unshaped(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> (Vec<GlyphPlacement>, f32) {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return (Vec::new(), 0.0);
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * 0.5;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x,
            origin_y: baseline_y,
            scale,
        });
        let advance_units = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
        let mut adv = advance_units * scale;
        if adv <= 0.0 {
            adv = font_size * 0.5;
        }
        pen_x += adv;
    }
    (out, pen_x)
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

/// Maps font units (y up) to device pixels (y down), with an optional
/// horizontal shear for synthetic italics.
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
    skew: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32, skew: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
            skew,
        }
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.origin_x + (x + y * self.skew) * self.scale,
            self.origin_y - y * self.scale,
        )
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn rounded_rect_path(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Option<Path> {
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let r = radius.max(0.0).min(width / 2.0).min(height / 2.0);
    if r <= 0.0 {
        let rect = tiny_skia::Rect::from_xywh(x, y, width, height)?;
        return Some(PathBuilder::from_rect(rect));
    }
    // Cubic quarter circles.
    let k = 0.552_284_8 * r;
    let (right, bottom) = (x + width, y + height);
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(right - r, y);
    pb.cubic_to(right - r + k, y, right, y + r - k, right, y + r);
    pb.line_to(right, bottom - r);
    pb.cubic_to(right, bottom - r + k, right - r + k, bottom, right - r, bottom);
    pb.line_to(x + r, bottom);
    pb.cubic_to(x + r - k, bottom, x, bottom - r + k, x, bottom - r);
    pb.line_to(x, y + r);
    pb.cubic_to(x, y + r - k, x + r - k, y, x + r, y);
    pb.close();
    pb.finish()
}

fn stroke_path(pixmap: &mut Pixmap, path: &Path, state: &RasterState) {
    let width = state.line_width.to_f32();
    if width <= 0.0 {
        return;
    }
    let stroke = Stroke {
        width,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(
        path,
        &fill_paint(state.stroke_color),
        &stroke,
        Transform::identity(),
        None,
    );
}

fn sk_rect(x: Px, y: Px, width: Px, height: Px) -> Option<tiny_skia::Rect> {
    tiny_skia::Rect::from_xywh(x.to_f32(), y.to_f32(), width.to_f32(), height.to_f32())
}

fn fill_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;
    paint
}

pub(crate) fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::font::testing::system_table;
    use crate::types::Rect;
    use std::sync::Arc;

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let c = pixmap.pixel(x, y).expect("pixel in range");
        [c.red(), c.green(), c.blue(), c.alpha()]
    }

    #[test]
    fn diagonal_gradient_runs_corner_to_corner() {
        let mut canvas = Canvas::new(40, 20);
        canvas.fill_gradient(
            Color::rgb(0, 0, 0),
            Color::rgb(240, 120, 60),
            GradientDirection::Diagonal,
        );
        let pixmap = rasterize(&canvas.finish(), &FontTable::new()).expect("raster");
        assert_eq!(pixel(&pixmap, 0, 0), [0, 0, 0, 255]);
        // (x + y) / (w + h) = 58 / 60
        assert_eq!(pixel(&pixmap, 39, 19), [232, 116, 58, 255]);
        assert_eq!(pixel(&pixmap, 10, 5), pixel(&pixmap, 5, 10));
    }

    #[test]
    fn vertical_gradient_is_constant_along_rows() {
        let mut canvas = Canvas::new(16, 16);
        canvas.fill_gradient(Color::WHITE, Color::BLACK, GradientDirection::Vertical);
        let pixmap = rasterize(&canvas.finish(), &FontTable::new()).expect("raster");
        assert_eq!(pixel(&pixmap, 0, 8), pixel(&pixmap, 15, 8));
        assert_ne!(pixel(&pixmap, 0, 0), pixel(&pixmap, 0, 15));
    }

    #[test]
    fn rounded_panel_leaves_corners_untouched() {
        let mut canvas = Canvas::new(100, 100);
        canvas.set_fill_color(Color::rgb(10, 20, 30));
        canvas.fill_rounded_rect(
            Rect::new(Px::ZERO, Px::ZERO, Px::from_i32(100), Px::from_i32(100)),
            Px::from_i32(30),
        );
        let pixmap = rasterize(&canvas.finish(), &FontTable::new()).expect("raster");
        assert_eq!(pixel(&pixmap, 0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&pixmap, 50, 50), [10, 20, 30, 255]);
    }

    #[test]
    fn images_are_scaled_into_their_rect() {
        let mut source = Pixmap::new(2, 2).expect("pixmap");
        source.fill(tiny_skia::Color::from_rgba8(0, 200, 0, 255));
        let mut canvas = Canvas::new(50, 50);
        canvas.draw_image(
            Rect::new(
                Px::from_i32(10),
                Px::from_i32(10),
                Px::from_i32(30),
                Px::from_i32(30),
            ),
            Arc::new(source),
            Px::ZERO,
        );
        let pixmap = rasterize(&canvas.finish(), &FontTable::new()).expect("raster");
        let [r, g, _, a] = pixel(&pixmap, 25, 25);
        assert!(r < 5 && (195..=205).contains(&g) && a > 250);
        assert_eq!(pixel(&pixmap, 5, 5)[3], 0);
    }

    #[test]
    fn zero_sized_scene_is_an_allocation_error() {
        let scene = Canvas::new(0, 10).finish();
        assert!(matches!(
            rasterize(&scene, &FontTable::new()),
            Err(CardError::CanvasAllocation(_))
        ));
    }

    #[test]
    fn png_encoding_has_signature() {
        let pixmap = Pixmap::new(3, 3).expect("pixmap");
        let png = encode_png(&pixmap).expect("png");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn text_draws_ink_with_a_system_font() {
        let Some(fonts) = system_table() else {
            return;
        };
        let mut canvas = Canvas::new(200, 60);
        canvas.set_fill_color(Color::BLACK);
        canvas.draw_text(
            Px::from_i32(10),
            Px::from_i32(40),
            "Hello",
            FaceKey::new(crate::style::FontWeight::Bold, crate::style::FontSlant::Italic),
            30,
        );
        let pixmap = rasterize(&canvas.finish(), &fonts).expect("raster");
        assert!(pixmap.pixels().iter().any(|p| p.alpha() > 0));
    }
}
