mod assets;
mod canvas;
mod compositor;
mod error;
mod font;
mod inline;
mod layout;
mod linebreak;
mod markdown;
mod metrics;
mod perf;
mod raster;
mod segment;
mod style;
mod theme;
mod tokenize;
mod types;

pub use assets::{
    AssetCache, AssetResolver, Bitmap, DEFAULT_EMOJI_SOURCES, DEFAULT_NEGATIVE_TTL, EmojiGlyph,
    RetryPolicy, disk_cache_name,
};
pub use canvas::{Canvas, Command, Scene};
pub use compositor::{ComposeStats, PANEL_MARGIN, PANEL_RADIUS, TEXT_PADDING, content_width};
pub use error::CardError;
pub use font::{FaceKey, FontTable, InkExtent, TextMetrics};
pub use layout::{LayoutEngine, LayoutSink, LineCounter, Marker, PlacedLine};
pub use linebreak::wrap;
pub use markdown::{DEFAULT_CATEGORIES, DEFAULT_SIGNATURE, MarkdownParser, ParserConfig};
pub use metrics::RenderMetrics;
pub use segment::{LineRun, ProcessedLine, RunKind, Segment, TextSegment};
pub use style::{Alignment, BlockKind, FontSlant, FontWeight, TextStyle};
pub use theme::{GradientDirection, PALETTE, Theme, ThemeMode, ThemeSelector, is_daytime};
pub use tokenize::{Token, TokenKind, tokenize};
pub use types::{Color, Px, Rect};

use compositor::Compositor;
use perf::{PerfLogger, Span};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const DEFAULT_WIDTH: u32 = 720;

/// Per-call knobs. Everything else is fixed when the renderer is built.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub width: u32,
    /// Pins the canvas height; `None` sizes it to the content.
    pub height: Option<u32>,
    /// URL, `data:` URI or local path of an image drawn above the text.
    pub title_image: Option<String>,
    /// Wall-clock allowance for network fetches. Once spent, emoji come from
    /// the cache or fall back to text.
    pub asset_budget: Option<Duration>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: None,
            title_image: None,
            asset_budget: None,
        }
    }
}

impl RenderOptions {
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_title_image(mut self, locator: impl Into<String>) -> Self {
        self.title_image = Some(locator.into());
        self
    }

    pub fn with_asset_budget(mut self, budget: Duration) -> Self {
        self.asset_budget = Some(budget);
        self
    }
}

/// Renders Markdown into PNG cards. Cheap to share across threads; fonts and
/// the asset cache are reused by every call.
pub struct CardRenderer {
    fonts: FontTable,
    parser: MarkdownParser,
    theme: ThemeSelector,
    assets: AssetResolver,
    perf: Option<PerfLogger>,
    next_render_id: AtomicU64,
}

impl CardRenderer {
    pub fn builder() -> CardRendererBuilder {
        CardRendererBuilder::new()
    }

    pub fn fonts(&self) -> &FontTable {
        &self.fonts
    }

    pub fn assets(&self) -> &AssetResolver {
        &self.assets
    }

    pub fn parse(&self, markdown: &str) -> Vec<Segment> {
        self.parser.parse(markdown)
    }

    pub fn render(&self, markdown: &str, options: &RenderOptions) -> Result<Vec<u8>, CardError> {
        self.render_with_metrics(markdown, options)
            .map(|(bytes, _)| bytes)
    }

    /// Runs everything up to rasterization and returns the display list.
    pub fn render_scene(&self, markdown: &str, options: &RenderOptions) -> Result<Scene, CardError> {
        let render_id = self.next_render_id.fetch_add(1, Ordering::Relaxed);
        let mut metrics = RenderMetrics::default();
        self.compose_scene(render_id, markdown, options, &mut metrics)
    }

    pub fn render_with_metrics(
        &self,
        markdown: &str,
        options: &RenderOptions,
    ) -> Result<(Vec<u8>, RenderMetrics), CardError> {
        let render_id = self.next_render_id.fetch_add(1, Ordering::Relaxed);
        let mut metrics = RenderMetrics::default();
        let scene = self.compose_scene(render_id, markdown, options, &mut metrics)?;

        let span = Span::start("raster", render_id, self.perf.as_ref());
        let pixmap = raster::rasterize(&scene, &self.fonts)?;
        metrics.raster_ms = span.finish();

        let span = Span::start("encode", render_id, self.perf.as_ref());
        let bytes = raster::encode_png(&pixmap)?;
        metrics.encode_ms = span.finish();
        metrics.png_bytes = bytes.len();

        if let Some(perf) = &self.perf {
            perf.log_counts(
                "render",
                render_id,
                &[
                    ("segments", metrics.segment_count as u64),
                    ("lines", metrics.line_count as u64),
                    ("commands", metrics.command_count as u64),
                    ("emoji_drawn", metrics.emoji_drawn as u64),
                    ("emoji_fallbacks", metrics.emoji_fallbacks as u64),
                    ("png_bytes", metrics.png_bytes as u64),
                ],
            );
            perf.flush();
        }
        log::debug!(
            "render {render_id}: {}x{} in {:.1}ms",
            metrics.width,
            metrics.height,
            metrics.total_ms()
        );
        Ok((bytes, metrics))
    }

    /// Writes the PNG to `path` and returns the number of bytes written.
    pub fn render_to_file(
        &self,
        markdown: &str,
        options: &RenderOptions,
        path: impl AsRef<Path>,
    ) -> Result<usize, CardError> {
        let bytes = self.render(markdown, options)?;
        std::fs::write(path, &bytes)?;
        Ok(bytes.len())
    }

    fn compose_scene(
        &self,
        render_id: u64,
        markdown: &str,
        options: &RenderOptions,
        metrics: &mut RenderMetrics,
    ) -> Result<Scene, CardError> {
        let deadline = options.asset_budget.map(|budget| Instant::now() + budget);

        let span = Span::start("parse", render_id, self.perf.as_ref());
        let segments = self.parser.parse(markdown);
        metrics.parse_ms = span.finish();
        metrics.segment_count = segments.len();

        let theme = self.theme.select_now();
        let segments: Vec<Segment> = segments
            .into_iter()
            .map(|segment| segment.map_style(|style| style.with_dark_theme(theme.dark)))
            .collect();

        let compose_started = Instant::now();
        let title_image = options.title_image.as_deref().and_then(|locator| {
            let image = self.assets.resolve_image(locator, deadline);
            if image.is_none() {
                log::warn!("title image unavailable, rendering without it");
            }
            image
        });
        let compositor = Compositor::new(&self.fonts, &self.assets, theme, deadline);
        let (scene, stats) =
            compositor.compose(&segments, options.width, options.height, title_image)?;
        let compose_ms = compose_started.elapsed().as_secs_f64() * 1000.0;

        metrics.layout_ms = stats.layout_ms;
        metrics.compose_ms = (compose_ms - stats.layout_ms).max(0.0);
        if let Some(perf) = &self.perf {
            perf.log_span_ms("layout", render_id, metrics.layout_ms);
            perf.log_span_ms("compose", render_id, metrics.compose_ms);
        }
        metrics.line_count = stats.lines;
        metrics.emoji_drawn = stats.emoji_drawn;
        metrics.emoji_fallbacks = stats.emoji_fallbacks;
        metrics.title_image = stats.title_image;
        metrics.command_count = scene.commands.len();
        metrics.width = scene.width;
        metrics.height = scene.height;
        Ok(scene)
    }
}

pub struct CardRendererBuilder {
    font_files: Vec<(Option<FaceKey>, PathBuf)>,
    font_bytes: Vec<(Option<FaceKey>, Vec<u8>)>,
    fallback_files: Vec<PathBuf>,
    font_dirs: Vec<PathBuf>,
    system_fonts: bool,
    parser: ParserConfig,
    theme: ThemeSelector,
    retry_policy: RetryPolicy,
    emoji_sources: Vec<String>,
    emoji_cache_dir: Option<PathBuf>,
    negative_ttl: Duration,
    perf_path: Option<PathBuf>,
}

impl CardRendererBuilder {
    pub fn new() -> Self {
        Self {
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            fallback_files: Vec::new(),
            font_dirs: Vec::new(),
            system_fonts: true,
            parser: ParserConfig::default(),
            theme: ThemeSelector::default(),
            retry_policy: RetryPolicy::default(),
            emoji_sources: DEFAULT_EMOJI_SOURCES.iter().map(|s| s.to_string()).collect(),
            emoji_cache_dir: None,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            perf_path: None,
        }
    }

    /// Starts from the defaults and applies `MDCARD_FONT_DIR`,
    /// `MDCARD_SIGNATURE`, `MDCARD_EMOJI_CACHE_DIR` and `MDCARD_PERF_LOG`.
    pub fn from_env() -> Self {
        Self::new().apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dirs) = lookup("MDCARD_FONT_DIR") {
            for dir in std::env::split_paths(&dirs) {
                if !dir.as_os_str().is_empty() {
                    self.font_dirs.push(dir);
                }
            }
        }
        if let Some(signature) = lookup("MDCARD_SIGNATURE") {
            let signature = signature.trim().to_string();
            self.parser.signature = (!signature.is_empty()).then_some(signature);
        }
        if let Some(dir) = lookup("MDCARD_EMOJI_CACHE_DIR") {
            if !dir.trim().is_empty() {
                self.emoji_cache_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(path) = lookup("MDCARD_PERF_LOG") {
            if !path.trim().is_empty() {
                self.perf_path = Some(PathBuf::from(path));
            }
        }
        self
    }

    /// Registers a face for an explicit weight and slant.
    pub fn register_font(
        mut self,
        weight: FontWeight,
        slant: FontSlant,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.font_files
            .push((Some(FaceKey::new(weight, slant)), path.into()));
        self
    }

    /// Registers a face under the style its own tables declare.
    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push((None, path.into()));
        self
    }

    pub fn register_font_bytes(
        mut self,
        weight: FontWeight,
        slant: FontSlant,
        data: Vec<u8>,
    ) -> Self {
        self.font_bytes
            .push((Some(FaceKey::new(weight, slant)), data));
        self
    }

    pub fn register_fallback_font(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_files.push(path.into());
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    /// Whether well-known system fonts fill the faces nothing else provided.
    pub fn system_fonts(mut self, enabled: bool) -> Self {
        self.system_fonts = enabled;
        self
    }

    pub fn signature(mut self, signature: Option<String>) -> Self {
        self.parser.signature = signature;
        self
    }

    pub fn categories(mut self, categories: Vec<String>) -> Self {
        self.parser.categories = categories;
        self
    }

    pub fn escape_code_html(mut self, enabled: bool) -> Self {
        self.parser.escape_code_html = enabled;
        self
    }

    pub fn theme_mode(mut self, mode: ThemeMode) -> Self {
        self.theme.mode = mode;
        self
    }

    pub fn palette_index(mut self, index: Option<usize>) -> Self {
        self.theme.palette_index = index;
        self
    }

    pub fn gradient_direction(mut self, direction: GradientDirection) -> Self {
        self.theme.direction = direction;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// URL templates tried in order; `{code}` becomes the dash-joined
    /// lowercase hex code points of the emoji.
    pub fn emoji_sources(mut self, sources: Vec<String>) -> Self {
        self.emoji_sources = sources;
        self
    }

    pub fn emoji_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.emoji_cache_dir = Some(path.into());
        self
    }

    /// How long a failed emoji lookup is remembered before it is retried.
    pub fn negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<CardRenderer, CardError> {
        if self.retry_policy.max_attempts == 0 {
            return Err(CardError::InvalidConfiguration(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        let mut fonts = FontTable::new();
        for (key, data) in self.font_bytes {
            fonts.register_bytes(key, data, "<memory>")?;
        }
        for (key, path) in &self.font_files {
            fonts.register_file(*key, path)?;
        }
        for dir in &self.font_dirs {
            let count = fonts.register_dir(dir);
            log::debug!("registered {count} fonts from {}", dir.display());
        }
        if self.system_fonts {
            for (key, path) in font::discover_system_faces() {
                let key = (!fonts.has_face(key)).then_some(key);
                if let Err(err) = fonts.register_file(key, &path) {
                    log::warn!("skipping system font: {err}");
                }
            }
        }
        for path in &self.fallback_files {
            let data = std::fs::read(path).map_err(|err| {
                CardError::FontResourceMissing(format!("{}: {err}", path.display()))
            })?;
            fonts.register_fallback_bytes(data, &path.to_string_lossy())?;
        }
        if !fonts.has_face(FaceKey::REGULAR) {
            return Err(CardError::FontResourceMissing(
                "no regular face registered".to_string(),
            ));
        }

        if let Some(dir) = &self.emoji_cache_dir {
            std::fs::create_dir_all(dir)?;
        }
        let assets = AssetResolver::new(self.retry_policy, self.emoji_sources, self.emoji_cache_dir)
            .with_negative_ttl(self.negative_ttl);
        let perf = match self.perf_path {
            Some(path) => Some(PerfLogger::new(path)?),
            None => None,
        };
        Ok(CardRenderer {
            fonts,
            parser: MarkdownParser::new(self.parser),
            theme: self.theme,
            assets,
            perf,
            next_render_id: AtomicU64::new(0),
        })
    }
}

impl Default for CardRendererBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn system_renderer() -> Option<CardRenderer> {
        let renderer = CardRenderer::builder()
            .emoji_sources(Vec::new())
            .theme_mode(ThemeMode::Light)
            .palette_index(Some(0))
            .build();
        match renderer {
            Ok(renderer) => Some(renderer),
            Err(err) => {
                eprintln!("skipping: {err}");
                None
            }
        }
    }

    #[test]
    fn renderer_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CardRenderer>();
    }

    #[test]
    fn build_without_any_face_fails() {
        let err = CardRenderer::builder()
            .system_fonts(false)
            .build()
            .err()
            .expect("no fonts registered");
        assert!(matches!(err, CardError::FontResourceMissing(_)));
    }

    #[test]
    fn missing_font_file_is_reported() {
        let err = CardRenderer::builder()
            .system_fonts(false)
            .register_font(
                FontWeight::Regular,
                FontSlant::Normal,
                "/nonexistent/mdcard/font.ttf",
            )
            .build()
            .err()
            .expect("missing file");
        assert!(matches!(err, CardError::FontResourceMissing(_)));
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let err = CardRenderer::builder()
            .system_fonts(false)
            .register_font_bytes(FontWeight::Regular, FontSlant::Normal, b"not a font".to_vec())
            .build()
            .err()
            .expect("bad bytes");
        assert!(matches!(err, CardError::FontResourceMissing(_)));
    }

    #[test]
    fn zero_retry_attempts_are_rejected() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let err = CardRenderer::builder()
            .retry_policy(policy)
            .build()
            .err()
            .expect("zero attempts");
        assert!(matches!(err, CardError::InvalidConfiguration(_)));
    }

    #[test]
    fn environment_overrides_are_applied() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MDCARD_FONT_DIR", "/opt/fonts"),
            ("MDCARD_SIGNATURE", "  — team  "),
            ("MDCARD_EMOJI_CACHE_DIR", "/tmp/emoji"),
            ("MDCARD_PERF_LOG", "/tmp/perf.jsonl"),
        ]);
        let builder = CardRendererBuilder::new().apply_env(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(builder.font_dirs, vec![PathBuf::from("/opt/fonts")]);
        assert_eq!(builder.parser.signature.as_deref(), Some("— team"));
        assert_eq!(builder.emoji_cache_dir, Some(PathBuf::from("/tmp/emoji")));
        assert_eq!(builder.perf_path, Some(PathBuf::from("/tmp/perf.jsonl")));
    }

    #[test]
    fn plain_builder_ignores_the_environment() {
        let builder = CardRendererBuilder::new();
        assert!(builder.font_dirs.is_empty());
        assert!(builder.perf_path.is_none());
        assert!(builder.emoji_cache_dir.is_none());
    }

    #[test]
    fn blank_signature_variable_disables_the_signature() {
        let builder = CardRendererBuilder::new()
            .apply_env(|key| (key == "MDCARD_SIGNATURE").then(|| "   ".to_string()));
        assert_eq!(builder.parser.signature, None);
        assert!(builder.font_dirs.is_empty());
    }

    #[test]
    fn default_options_use_the_standard_width() {
        let options = RenderOptions::default();
        assert_eq!(options.width, DEFAULT_WIDTH);
        assert_eq!(options.height, None);
        let options = options.with_height(400).with_title_image("logo.png");
        assert_eq!(options.height, Some(400));
        assert_eq!(options.title_image.as_deref(), Some("logo.png"));
    }

    #[test]
    fn renders_png_with_metrics() {
        let Some(renderer) = system_renderer() else {
            return;
        };
        let (bytes, metrics) = renderer
            .render_with_metrics("# Hello\nWorld 😀", &RenderOptions::default())
            .expect("render");
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(metrics.width, DEFAULT_WIDTH);
        assert!(metrics.height >= 120);
        assert_eq!(metrics.png_bytes, bytes.len());
        // Title, body and signature.
        assert_eq!(metrics.segment_count, 3);
        assert_eq!(metrics.emoji_fallbacks, 1);
        assert!(!metrics.title_image);
    }

    #[test]
    fn scene_height_follows_the_content() {
        let Some(renderer) = system_renderer() else {
            return;
        };
        let options = RenderOptions::default();
        let short = renderer.render_scene("one line", &options).expect("short");
        let long_text = (0..20)
            .map(|i| format!("paragraph number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let long = renderer.render_scene(&long_text, &options).expect("long");
        assert!(long.height > short.height);
        let pinned = renderer
            .render_scene(&long_text, &options.clone().with_height(300))
            .expect("pinned");
        assert_eq!(pinned.height, 300);
    }

    #[test]
    fn missing_title_image_is_omitted() {
        let Some(renderer) = system_renderer() else {
            return;
        };
        let options = RenderOptions::default().with_title_image("/nonexistent/mdcard/logo.png");
        let (_, metrics) = renderer
            .render_with_metrics("body", &options)
            .expect("render");
        assert!(!metrics.title_image);
    }

    #[test]
    fn render_to_file_writes_the_png() {
        let Some(renderer) = system_renderer() else {
            return;
        };
        let dir = std::env::temp_dir().join(format!("mdcard-lib-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("card.png");
        let written = renderer
            .render_to_file("- item\n- [x] done", &RenderOptions::default(), &path)
            .expect("write");
        let on_disk = std::fs::read(&path).expect("read back");
        assert_eq!(on_disk.len(), written);
        let _ = std::fs::remove_dir_all(dir);
    }
}
