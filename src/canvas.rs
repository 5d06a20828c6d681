use crate::assets::Bitmap;
use crate::font::FaceKey;
use crate::theme::GradientDirection;
use crate::types::{Color, Px, Rect};

#[derive(Debug, Clone)]
pub enum Command {
    // Non-rendered metadata. Ignored by the rasterizer.
    Meta {
        key: String,
        value: String,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Px),
    FillGradient {
        start: Color,
        end: Color,
        direction: GradientDirection,
    },
    FillRect(Rect),
    FillRoundedRect {
        rect: Rect,
        radius: Px,
    },
    StrokeRoundedRect {
        rect: Rect,
        radius: Px,
    },
    StrokeLine {
        x1: Px,
        y1: Px,
        x2: Px,
        y2: Px,
    },
    StrokePolyline(Vec<(Px, Px)>),
    /// `y` is the baseline.
    DrawText {
        x: Px,
        y: Px,
        text: String,
        face: FaceKey,
        size: u16,
    },
    DrawImage {
        rect: Rect,
        resource: usize,
        corner_radius: Px,
    },
}

/// A finished display list with the bitmaps it references.
#[derive(Debug, Clone)]
pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub commands: Vec<Command>,
    pub images: Vec<Bitmap>,
}

impl Scene {
    pub fn meta(&self, key: &str) -> impl Iterator<Item = &str> + '_ {
        let key = key.to_string();
        self.commands.iter().filter_map(move |command| match command {
            Command::Meta { key: k, value } if *k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn text_commands(&self) -> impl Iterator<Item = &str> + '_ {
        self.commands.iter().filter_map(|command| match command {
            Command::DrawText { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Px,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Px::from_i32(1),
        }
    }
}

pub struct Canvas {
    width: u32,
    height: u32,
    commands: Vec<Command>,
    images: Vec<Bitmap>,
    state: GraphicsState,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
            images: Vec::new(),
            state: GraphicsState::default(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn record_line_bounds(&mut self, rect: Rect) {
        let value = format!(
            "{},{},{},{}",
            rect.x.to_milli_i64(),
            rect.y.to_milli_i64(),
            rect.width.to_milli_i64(),
            rect.height.to_milli_i64()
        );
        self.meta("__line_bbox", value);
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.state.fill_color == color {
            return;
        }
        self.state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.state.stroke_color == color {
            return;
        }
        self.state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Px) {
        let width = width.max(Px::ZERO);
        if self.state.line_width == width {
            return;
        }
        self.state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub fn fill_gradient(&mut self, start: Color, end: Color, direction: GradientDirection) {
        self.commands.push(Command::FillGradient {
            start,
            end,
            direction,
        });
    }

    pub fn fill_rect(&mut self, rect: Rect) {
        self.commands.push(Command::FillRect(rect));
    }

    pub fn fill_rounded_rect(&mut self, rect: Rect, radius: Px) {
        self.commands.push(Command::FillRoundedRect { rect, radius });
    }

    pub fn stroke_rounded_rect(&mut self, rect: Rect, radius: Px) {
        self.commands
            .push(Command::StrokeRoundedRect { rect, radius });
    }

    pub fn stroke_line(&mut self, x1: Px, y1: Px, x2: Px, y2: Px) {
        self.commands.push(Command::StrokeLine { x1, y1, x2, y2 });
    }

    pub fn stroke_polyline(&mut self, points: Vec<(Px, Px)>) {
        if points.len() < 2 {
            return;
        }
        self.commands.push(Command::StrokePolyline(points));
    }

    pub fn draw_text(&mut self, x: Px, y: Px, text: impl Into<String>, face: FaceKey, size: u16) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.commands.push(Command::DrawText {
            x,
            y,
            text,
            face,
            size,
        });
    }

    pub fn draw_image(&mut self, rect: Rect, image: Bitmap, corner_radius: Px) {
        let resource = self.images.len();
        self.images.push(image);
        self.commands.push(Command::DrawImage {
            rect,
            resource,
            corner_radius,
        });
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn finish(self) -> Scene {
        Scene {
            width: self.width,
            height: self.height,
            commands: self.commands,
            images: self.images,
        }
    }
}
