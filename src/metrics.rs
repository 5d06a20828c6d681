/// Per-render statistics returned by `CardRenderer::render_with_metrics`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderMetrics {
    pub parse_ms: f64,
    pub layout_ms: f64,
    pub compose_ms: f64,
    pub raster_ms: f64,
    pub encode_ms: f64,
    pub segment_count: usize,
    pub line_count: usize,
    pub command_count: usize,
    pub emoji_drawn: usize,
    pub emoji_fallbacks: usize,
    pub title_image: bool,
    pub width: u32,
    pub height: u32,
    pub png_bytes: usize,
}

impl RenderMetrics {
    pub fn total_ms(&self) -> f64 {
        self.parse_ms + self.layout_ms + self.compose_ms + self.raster_ms + self.encode_ms
    }
}
