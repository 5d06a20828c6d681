use crate::error::AssetError;
use crate::raster::premul_u8;
use crate::tokenize::emoji_code;
use base64::Engine;
use image::RgbaImage;
use image::imageops::FilterType;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tiny_skia::Pixmap;

/// Decoded, premultiplied RGBA image shared between the cache and scenes.
pub type Bitmap = Arc<Pixmap>;

/// Emoji image sets tried in order. `{code}` is replaced by the cluster's
/// code point sequence.
pub const DEFAULT_EMOJI_SOURCES: &[&str] = &[
    "https://cdn.jsdelivr.net/gh/twitter/twemoji@14.0.2/assets/72x72/{code}.png",
    "https://cdnjs.cloudflare.com/ajax/libs/twemoji/14.0.2/72x72/{code}.png",
];

pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    /// Wait before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone)]
pub enum EmojiGlyph {
    Bitmap(Bitmap),
    /// No image available; draw the cluster as text.
    Fallback,
}

impl EmojiGlyph {
    pub fn is_fallback(&self) -> bool {
        matches!(self, EmojiGlyph::Fallback)
    }
}

/// What one fetch learned about an emoji.
#[derive(Debug, Clone)]
pub(crate) enum Lookup {
    Found(Bitmap),
    Missing,
    /// The fetching render ran out of budget. Never kept in the cache.
    OutOfTime,
}

type Slot = Arc<OnceLock<Lookup>>;
type CacheKey = (String, u16);

struct CacheEntry {
    slot: Slot,
    created: Instant,
}

/// Emoji bitmaps keyed by (cluster, size). Concurrent misses on one key wait
/// for a single fetch. Failures are kept for the negative TTL, successes for
/// the cache's lifetime. A fetch that ran out of budget is dropped, and
/// callers that were waiting on it fetch again under their own budget.
pub struct AssetCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    negative_ttl: Duration,
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new(DEFAULT_NEGATIVE_TTL)
    }
}

impl AssetCache {
    pub fn new(negative_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            negative_ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut entries = self.entries();
        let expired = entries.get(key).is_some_and(|entry| {
            matches!(entry.slot.get(), Some(Lookup::Missing))
                && entry.created.elapsed() >= self.negative_ttl
        });
        if expired {
            entries.remove(key);
        }
        entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry {
                slot: Arc::new(OnceLock::new()),
                created: Instant::now(),
            })
            .slot
            .clone()
    }

    /// Returns the cached value, running `fetch` on a miss. Only one caller
    /// per key runs `fetch`; the others block until it finishes.
    pub fn get_or_fetch(
        &self,
        cluster: &str,
        size: u16,
        fetch: impl FnOnce() -> Option<Bitmap>,
    ) -> Option<Bitmap> {
        let found = self.lookup(cluster, size, || match fetch() {
            Some(bitmap) => Lookup::Found(bitmap),
            None => Lookup::Missing,
        });
        match found {
            Lookup::Found(bitmap) => Some(bitmap),
            Lookup::Missing | Lookup::OutOfTime => None,
        }
    }

    pub(crate) fn lookup(&self, cluster: &str, size: u16, fetch: impl FnOnce() -> Lookup) -> Lookup {
        let key = (cluster.to_string(), size);
        let mut fetch = Some(fetch);
        loop {
            let slot = self.slot(&key);
            let mut ran = false;
            let value = slot
                .get_or_init(|| {
                    ran = true;
                    fetch.take().map_or(Lookup::OutOfTime, |fetch| fetch())
                })
                .clone();
            if !matches!(value, Lookup::OutOfTime) {
                return value;
            }
            self.evict(&key, &slot);
            if ran || fetch.is_none() {
                return Lookup::OutOfTime;
            }
            log::trace!("emoji {cluster:?} fetch ran out of time elsewhere, fetching again");
        }
    }

    fn evict(&self, key: &CacheKey, slot: &Slot) {
        let mut entries = self.entries();
        if entries
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.slot, slot))
        {
            entries.remove(key);
        }
    }

    /// Cache-only lookup. `None` means nothing is known about the key.
    pub fn peek(&self, cluster: &str, size: u16) -> Option<Option<Bitmap>> {
        let entries = self.entries();
        let entry = entries.get(&(cluster.to_string(), size))?;
        match entry.slot.get()? {
            Lookup::Found(bitmap) => Some(Some(bitmap.clone())),
            Lookup::Missing if entry.created.elapsed() < self.negative_ttl => Some(None),
            Lookup::Missing | Lookup::OutOfTime => None,
        }
    }

    pub fn forget(&self, cluster: &str, size: u16) {
        self.entries().remove(&(cluster.to_string(), size));
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetches emoji bitmaps and title images. Failures are logged and turned
/// into fallbacks; nothing here fails a render.
pub struct AssetResolver {
    client: Option<Client>,
    policy: RetryPolicy,
    emoji_sources: Vec<String>,
    disk_cache: Option<PathBuf>,
    cache: AssetCache,
}

impl AssetResolver {
    pub fn new(policy: RetryPolicy, emoji_sources: Vec<String>, disk_cache: Option<PathBuf>) -> Self {
        let client = match Client::builder().timeout(policy.per_attempt_timeout).build() {
            Ok(client) => Some(client),
            Err(err) => {
                log::warn!("http client unavailable, remote assets disabled: {err}");
                None
            }
        };
        Self {
            client,
            policy,
            emoji_sources,
            disk_cache,
            cache: AssetCache::default(),
        }
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.cache = AssetCache::new(ttl);
        self
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Bitmap for an emoji cluster at `size` px square. Past `deadline` only
    /// the cache is consulted.
    pub fn resolve_emoji(&self, cluster: &str, size: u16, deadline: Option<Instant>) -> EmojiGlyph {
        if past(deadline) {
            return match self.cache.peek(cluster, size) {
                Some(Some(bitmap)) => EmojiGlyph::Bitmap(bitmap),
                _ => EmojiGlyph::Fallback,
            };
        }
        let found = self.cache.lookup(cluster, size, || {
            match self.fetch_emoji(cluster, size, deadline) {
                Ok(bitmap) => Lookup::Found(bitmap),
                Err(AssetError::BudgetExhausted) => {
                    log::debug!("emoji {cluster:?} skipped, asset budget spent");
                    Lookup::OutOfTime
                }
                Err(err) => {
                    log::warn!("emoji {cluster:?} unavailable, drawing as text: {err}");
                    Lookup::Missing
                }
            }
        });
        match found {
            Lookup::Found(bitmap) => EmojiGlyph::Bitmap(bitmap),
            Lookup::Missing | Lookup::OutOfTime => EmojiGlyph::Fallback,
        }
    }

    /// Loads an `http(s)://` URL, a `data:` URI or a local path.
    pub fn resolve_image(&self, locator: &str, deadline: Option<Instant>) -> Option<Bitmap> {
        let locator = locator.trim();
        let loaded = if let Some((mime, data)) = parse_data_uri(locator) {
            decode_image(&data, Some(mime.as_str()))
        } else if locator.starts_with("http://") || locator.starts_with("https://") {
            self.download(locator, deadline)
                .and_then(|data| decode_image(&data, None))
        } else {
            fs::read(Path::new(locator))
                .map_err(AssetError::from)
                .and_then(|data| decode_image(&data, None))
        };
        match loaded {
            Ok(image) => rgba_to_pixmap(&image).map(Arc::new),
            Err(err) => {
                log::warn!("title image {} skipped: {err}", abbreviate(locator));
                None
            }
        }
    }

    fn fetch_emoji(&self, cluster: &str, size: u16, deadline: Option<Instant>) -> Result<Bitmap, AssetError> {
        let code = emoji_code(cluster);
        let disk_path = self.disk_cache.as_ref().map(|dir| dir.join(disk_cache_name(&code)));

        if let Some(path) = disk_path.as_ref().filter(|p| p.is_file()) {
            match fs::read(path).map_err(AssetError::from).and_then(|d| emoji_bitmap(&d, size)) {
                Ok(bitmap) => {
                    log::trace!("emoji {code} from disk cache");
                    return Ok(bitmap);
                }
                Err(err) => log::debug!("ignoring disk cache entry {}: {err}", path.display()),
            }
        }

        let mut last_error = AssetError::Http(format!("no emoji source configured for {code}"));
        for template in &self.emoji_sources {
            let url = template.replace("{code}", &code);
            let attempt = self
                .download(&url, deadline)
                .and_then(|data| emoji_bitmap(&data, size).map(|bitmap| (data, bitmap)));
            match attempt {
                Ok((data, bitmap)) => {
                    if let Some(path) = &disk_path {
                        store(path, &data);
                    }
                    return Ok(bitmap);
                }
                Err(AssetError::BudgetExhausted) => return Err(AssetError::BudgetExhausted),
                Err(err) => {
                    log::debug!("emoji source {url} failed: {err}");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn download(&self, url: &str, deadline: Option<Instant>) -> Result<Vec<u8>, AssetError> {
        let Some(client) = &self.client else {
            return Err(AssetError::Http("no http client".to_string()));
        };
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let Some(timeout) = attempt_timeout(&self.policy, deadline) else {
                return Err(AssetError::BudgetExhausted);
            };
            match get_once(client, url, timeout) {
                Ok(data) => return Ok(data),
                Err(err) if err.is_retryable() && past(deadline) => {
                    log::debug!("giving up on {url} at the asset deadline: {err}");
                    return Err(AssetError::BudgetExhausted);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    log::debug!("attempt {attempt}/{attempts} for {url} failed: {err}");
                    let delay = self.policy.delay(attempt);
                    std::thread::sleep(remaining(deadline).map_or(delay, |left| delay.min(left)));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Per-attempt timeout, shortened to what is left of the budget. `None` once
/// the budget is spent.
fn attempt_timeout(policy: &RetryPolicy, deadline: Option<Instant>) -> Option<Duration> {
    match remaining(deadline) {
        None => Some(policy.per_attempt_timeout),
        Some(left) if left.is_zero() => None,
        Some(left) => Some(policy.per_attempt_timeout.min(left)),
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

fn get_once(client: &Client, url: &str, timeout: Duration) -> Result<Vec<u8>, AssetError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .map_err(|e| AssetError::Http(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(AssetError::Status(status.as_u16()));
    }
    response
        .bytes()
        .map(|body| body.to_vec())
        .map_err(|e| AssetError::Http(e.to_string()))
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn store(path: &Path, data: &[u8]) {
    let written = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| fs::write(path, data));
    if let Err(err) = written {
        log::warn!("cannot write emoji cache {}: {err}", path.display());
    }
}

pub fn disk_cache_name(code: &str) -> String {
    format!("{}.png", hex::encode(Sha256::digest(code.as_bytes())))
}

fn emoji_bitmap(data: &[u8], size: u16) -> Result<Bitmap, AssetError> {
    let image = decode_image(data, Some("image/png"))?;
    let side = u32::from(size.max(1));
    let image = if image.dimensions() == (side, side) {
        image
    } else {
        image::imageops::resize(&image, side, side, FilterType::Lanczos3)
    };
    rgba_to_pixmap(&image)
        .map(Arc::new)
        .ok_or_else(|| AssetError::Decode("empty emoji image".to_string()))
}

pub(crate) fn decode_image(data: &[u8], mime: Option<&str>) -> Result<RgbaImage, AssetError> {
    let guessed_format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        _ => image::guess_format(data).ok(),
    };
    let decoded = match guessed_format {
        Some(format) => image::load_from_memory_with_format(data, format),
        None => image::load_from_memory(data),
    };
    decoded
        .map(|image| image.to_rgba8())
        .map_err(|e| AssetError::Decode(e.to_string()))
}

/// Premultiplies straight RGBA into a tiny-skia pixmap.
pub(crate) fn rgba_to_pixmap(image: &RgbaImage) -> Option<Pixmap> {
    let (width, height) = image.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = image.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

fn abbreviate(locator: &str) -> String {
    if locator.starts_with("data:") {
        return "data: URI".to_string();
    }
    let mut out: String = locator.chars().take(80).collect();
    if out.len() < locator.len() {
        out.push('…');
    }
    out
}
