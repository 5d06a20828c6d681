use crate::error::CardError;
use crate::style::{FontSlant, FontWeight, TextStyle};
use crate::types::Px;
use rustybuzz::{Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Width and glyph extent queries used by line breaking and layout.
pub trait TextMetrics {
    fn text_width(&self, text: &str, style: &TextStyle) -> Px;

    /// Union of the glyph bounding boxes of `text`, relative to the baseline.
    fn ink_extent(&self, text: &str, style: &TextStyle) -> InkExtent;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InkExtent {
    pub ascent: Px,
    pub descent: Px,
}

impl InkExtent {
    pub fn height(&self) -> Px {
        self.ascent + self.descent
    }

    pub fn union(self, other: InkExtent) -> InkExtent {
        InkExtent {
            ascent: self.ascent.max(other.ascent),
            descent: self.descent.max(other.descent),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.height() <= Px::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceKey {
    pub weight: FontWeight,
    pub slant: FontSlant,
}

impl FaceKey {
    pub const REGULAR: FaceKey = FaceKey {
        weight: FontWeight::Regular,
        slant: FontSlant::Normal,
    };

    pub fn new(weight: FontWeight, slant: FontSlant) -> Self {
        Self { weight, slant }
    }

    pub fn of(style: &TextStyle) -> Self {
        Self::new(style.weight, style.slant)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: usize,
    size: u16,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Px>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Px> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Px) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            let Some(old) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&old);
        }
    }
}

#[derive(Debug)]
pub(crate) struct LoadedFont {
    pub(crate) data: Arc<Vec<u8>>,
    pub(crate) units_per_em: u16,
}

/// A face resolved for one (weight, slant, size). Missing bold or italic faces
/// are emulated by stroking or skewing the regular outlines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScaledFont {
    pub(crate) font_index: usize,
    pub(crate) size: u16,
    pub(crate) synthetic_bold: bool,
    pub(crate) synthetic_italic: bool,
}

impl ScaledFont {
    pub(crate) fn size_f32(&self) -> f32 {
        self.size as f32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FontRun {
    pub(crate) font_index: usize,
    pub(crate) text: String,
}

#[derive(Debug)]
pub struct FontTable {
    fonts: Vec<LoadedFont>,
    faces: HashMap<FaceKey, usize>,
    fallbacks: Vec<usize>,
    sizes: RwLock<HashMap<(FaceKey, u16), ScaledFont>>,
    text_width_cache: Mutex<TextWidthCache>,
}

impl FontTable {
    pub(crate) fn new() -> Self {
        Self {
            fonts: Vec::new(),
            faces: HashMap::new(),
            fallbacks: Vec::new(),
            sizes: RwLock::new(HashMap::new()),
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        }
    }

    pub fn has_face(&self, key: FaceKey) -> bool {
        self.faces.contains_key(&key)
    }

    pub fn face_count(&self) -> usize {
        self.fonts.len()
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }

    pub(crate) fn font(&self, index: usize) -> Option<&LoadedFont> {
        self.fonts.get(index)
    }

    fn push_font(&mut self, data: Vec<u8>, source: &str) -> Result<(usize, FaceKey), CardError> {
        let (name, units_per_em, detected) = {
            let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
                return Err(CardError::FontResourceMissing(format!(
                    "invalid font data in {source}"
                )));
            };
            let weight = if face.is_bold() {
                FontWeight::Bold
            } else {
                FontWeight::Regular
            };
            let slant = if face.is_italic() || face.is_oblique() {
                FontSlant::Italic
            } else {
                FontSlant::Normal
            };
            (
                font_name(&face, Path::new(source)),
                face.units_per_em().max(1),
                FaceKey::new(weight, slant),
            )
        };
        let index = self.fonts.len();
        log::debug!("loaded font {name} from {source}");
        self.fonts.push(LoadedFont {
            data: Arc::new(data),
            units_per_em,
        });
        if let Ok(mut sizes) = self.sizes.write() {
            sizes.clear();
        }
        Ok((index, detected))
    }

    /// Registers a face under `key`, or under the style its OS/2 flags declare.
    /// The first face for a key wins; later ones join the fallback chain.
    pub(crate) fn register_bytes(
        &mut self,
        key: Option<FaceKey>,
        data: Vec<u8>,
        source: &str,
    ) -> Result<usize, CardError> {
        let (index, detected) = self.push_font(data, source)?;
        let key = key.unwrap_or(detected);
        if self.faces.contains_key(&key) {
            self.fallbacks.push(index);
        } else {
            self.faces.insert(key, index);
        }
        Ok(index)
    }

    pub(crate) fn register_file(
        &mut self,
        key: Option<FaceKey>,
        path: impl AsRef<Path>,
    ) -> Result<usize, CardError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|err| {
            CardError::FontResourceMissing(format!("{}: {err}", path.display()))
        })?;
        self.register_bytes(key, data, &path.to_string_lossy())
    }

    /// Adds a face consulted only for characters the styled face lacks.
    pub(crate) fn register_fallback_bytes(
        &mut self,
        data: Vec<u8>,
        source: &str,
    ) -> Result<usize, CardError> {
        let (index, _) = self.push_font(data, source)?;
        self.fallbacks.push(index);
        Ok(index)
    }

    /// Registers every font file in `path`, classifying faces by their OS/2 flags.
    pub(crate) fn register_dir(&mut self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let Ok(entries) = fs::read_dir(path) else {
            log::warn!("cannot read font directory {}", path.display());
            return 0;
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_font_file(path))
            .collect();
        files.sort();
        let mut count = 0;
        for file in files {
            match self.register_file(None, &file) {
                Ok(_) => count += 1,
                Err(err) => log::warn!("skipping font: {err}"),
            }
        }
        count
    }

    pub(crate) fn scaled(&self, style: &TextStyle) -> Option<ScaledFont> {
        let key = FaceKey::of(style);
        if let Ok(sizes) = self.sizes.read() {
            if let Some(found) = sizes.get(&(key, style.size)) {
                return Some(*found);
            }
        }
        let scaled = self.resolve_face(key, style.size)?;
        if let Ok(mut sizes) = self.sizes.write() {
            sizes.insert((key, style.size), scaled);
        }
        Some(scaled)
    }

    fn resolve_face(&self, key: FaceKey, size: u16) -> Option<ScaledFont> {
        if let Some(&font_index) = self.faces.get(&key) {
            return Some(ScaledFont {
                font_index,
                size,
                synthetic_bold: false,
                synthetic_italic: false,
            });
        }
        let want_bold = key.weight == FontWeight::Bold;
        let want_italic = key.slant == FontSlant::Italic;
        let candidates = [
            (FaceKey::new(key.weight, FontSlant::Normal), false, want_italic),
            (FaceKey::new(FontWeight::Regular, key.slant), want_bold, false),
            (FaceKey::REGULAR, want_bold, want_italic),
        ];
        candidates.into_iter().find_map(|(candidate, bold, italic)| {
            self.faces.get(&candidate).map(|&font_index| ScaledFont {
                font_index,
                size,
                synthetic_bold: bold,
                synthetic_italic: italic,
            })
        })
    }

    pub(crate) fn font_supports_char(&self, font_index: usize, ch: char) -> bool {
        let Some(font) = self.fonts.get(font_index) else {
            return false;
        };
        let Ok(face) = ttf_parser::Face::parse(&font.data, 0) else {
            return false;
        };
        let (_symbolic, symbol_subtable) = select_symbol_subtable(&face);
        glyph_index_for_codepoint(&face, ch as u32, symbol_subtable).is_some()
    }

    /// Splits `text` into runs drawn by the primary face or the first fallback
    /// that has a glyph. Characters no face covers stay with the primary.
    pub(crate) fn fallback_runs(&self, primary: usize, text: &str) -> Vec<FontRun> {
        if self.fallbacks.is_empty() {
            return vec![FontRun {
                font_index: primary,
                text: text.to_string(),
            }];
        }
        let mut stack = Vec::with_capacity(1 + self.fallbacks.len());
        stack.push(primary);
        stack.extend(self.fallbacks.iter().copied().filter(|&i| i != primary));

        let mut runs: Vec<FontRun> = Vec::new();
        let mut support_cache: HashMap<(usize, char), bool> = HashMap::new();
        for ch in text.chars() {
            let chosen = if ch.is_whitespace() {
                runs.last().map(|r| r.font_index).unwrap_or(primary)
            } else {
                stack
                    .iter()
                    .copied()
                    .find(|&idx| {
                        *support_cache
                            .entry((idx, ch))
                            .or_insert_with(|| self.font_supports_char(idx, ch))
                    })
                    .unwrap_or(primary)
            };
            match runs.last_mut() {
                Some(run) if run.font_index == chosen => run.text.push(ch),
                _ => runs.push(FontRun {
                    font_index: chosen,
                    text: ch.to_string(),
                }),
            }
        }
        runs
    }

    fn run_width(&self, font_index: usize, size: u16, text: &str) -> Px {
        let cache_key = TextWidthKey {
            font_index,
            size,
            text: text.to_string(),
        };
        if let Ok(cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let Some(font) = self.fonts.get(font_index) else {
            return Px::from_i32(size as i32).mul_ratio(text.chars().count() as i32, 2);
        };
        let value = measure_text_width_full(font, size, text)
            .unwrap_or_else(|| measure_text_width_unshaped(font, size, text));
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }

    fn run_extent(&self, font_index: usize, size: u16, text: &str) -> InkExtent {
        let Some(font) = self.fonts.get(font_index) else {
            return InkExtent::default();
        };
        let Ok(face) = ttf_parser::Face::parse(&font.data, 0) else {
            return InkExtent::default();
        };
        let (_symbolic, symbol_subtable) = select_symbol_subtable(&face);
        let mut y_max: i32 = 0;
        let mut y_min: i32 = 0;
        let mut any = false;
        for ch in text.chars() {
            let Some(gid) = glyph_index_for_codepoint(&face, ch as u32, symbol_subtable) else {
                continue;
            };
            let Some(bbox) = face.glyph_bounding_box(gid) else {
                continue;
            };
            if any {
                y_max = y_max.max(bbox.y_max as i32);
                y_min = y_min.min(bbox.y_min as i32);
            } else {
                y_max = bbox.y_max as i32;
                y_min = (bbox.y_min as i32).min(0);
                any = true;
            }
        }
        if !any {
            return InkExtent::default();
        }
        let size_px = Px::from_i32(size as i32);
        let upem = font.units_per_em as i32;
        InkExtent {
            ascent: size_px.mul_ratio(y_max.max(0), upem),
            descent: size_px.mul_ratio((-y_min).max(0), upem),
        }
    }
}

impl TextMetrics for FontTable {
    fn text_width(&self, text: &str, style: &TextStyle) -> Px {
        if text.is_empty() {
            return Px::ZERO;
        }
        let Some(scaled) = self.scaled(style) else {
            return style.size_px().mul_ratio(text.chars().count() as i32, 2);
        };
        self.fallback_runs(scaled.font_index, text)
            .iter()
            .map(|run| self.run_width(run.font_index, style.size, &run.text))
            .sum()
    }

    fn ink_extent(&self, text: &str, style: &TextStyle) -> InkExtent {
        let Some(scaled) = self.scaled(style) else {
            return InkExtent::default();
        };
        self.fallback_runs(scaled.font_index, text)
            .iter()
            .map(|run| self.run_extent(run.font_index, style.size, &run.text))
            .fold(InkExtent::default(), InkExtent::union)
    }
}

fn measure_text_width_full(font: &LoadedFont, size: u16, text: &str) -> Option<Px> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i32;

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let total_units: i32 = positions
        .iter()
        .fold(0i32, |acc, pos| acc.saturating_add(pos.x_advance));
    if total_units <= 0 {
        return Some(Px::ZERO);
    }
    Some(Px::from_i32(size as i32).mul_ratio(total_units, units_per_em))
}

fn measure_text_width_unshaped(font: &LoadedFont, size: u16, text: &str) -> Px {
    let size_px = Px::from_i32(size as i32);
    let Ok(face) = ttf_parser::Face::parse(&font.data, 0) else {
        return size_px.mul_ratio(text.chars().count() as i32, 2);
    };
    let upem = font.units_per_em as i32;
    text.chars()
        .map(|ch| {
            face.glyph_index(ch)
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| size_px.mul_ratio(adv as i32, upem))
                .unwrap_or_else(|| size_px / 2)
        })
        .sum()
}

pub(crate) fn select_symbol_subtable<'a>(
    face: &'a ttf_parser::Face<'a>,
) -> (bool, Option<ttf_parser::cmap::Subtable<'a>>) {
    let Some(cmap) = face.tables().cmap else {
        return (false, None);
    };
    let mut first = None;
    let mut symbol = None;
    let mut has_unicode = false;
    for subtable in cmap.subtables {
        if first.is_none() {
            first = Some(subtable);
        }
        if subtable.platform_id == ttf_parser::name::PlatformId::Windows
            && subtable.encoding_id == 0
        {
            symbol = Some(subtable);
        }
        if subtable.is_unicode() {
            has_unicode = true;
        }
    }
    if has_unicode {
        (false, None)
    } else {
        (symbol.is_some(), symbol.or(first))
    }
}

pub(crate) fn glyph_index_for_codepoint<'a>(
    face: &'a ttf_parser::Face<'a>,
    codepoint: u32,
    fallback: Option<ttf_parser::cmap::Subtable<'a>>,
) -> Option<ttf_parser::GlyphId> {
    if let Some(ch) = char::from_u32(codepoint) {
        if let Some(id) = face.glyph_index(ch) {
            return Some(id);
        }
    }
    let subtable = fallback?;
    subtable
        .glyph_index(codepoint)
        .or_else(|| subtable.glyph_index(codepoint + 0xF000))
}

fn font_name(face: &ttf_parser::Face<'_>, path: &Path) -> String {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::POST_SCRIPT_NAME if post.is_none() => post = Some(name),
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY if family.is_none() => {
                family = Some(name)
            }
            _ => {}
        }
    }
    post.or(family)
        .or_else(|| {
            path.file_stem()
                .and_then(|v| v.to_str())
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "EmbeddedFont".to_string())
}

pub(crate) fn is_font_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
        return false;
    };
    matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc")
}

pub(crate) fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".fonts"));
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

// Ordered by preference; CJK-capable families first.
const SYSTEM_FACE_CANDIDATES: &[(&str, FontWeight, FontSlant)] = &[
    ("msyh.ttc", FontWeight::Regular, FontSlant::Normal),
    ("msyhbd.ttc", FontWeight::Bold, FontSlant::Normal),
    ("NotoSansCJK-Regular.ttc", FontWeight::Regular, FontSlant::Normal),
    ("NotoSansCJK-Bold.ttc", FontWeight::Bold, FontSlant::Normal),
    ("NotoSansCJKsc-Regular.otf", FontWeight::Regular, FontSlant::Normal),
    ("NotoSansCJKsc-Bold.otf", FontWeight::Bold, FontSlant::Normal),
    ("PingFang.ttc", FontWeight::Regular, FontSlant::Normal),
    ("wqy-microhei.ttc", FontWeight::Regular, FontSlant::Normal),
    ("wqy-zenhei.ttc", FontWeight::Regular, FontSlant::Normal),
    ("DejaVuSans.ttf", FontWeight::Regular, FontSlant::Normal),
    ("DejaVuSans-Bold.ttf", FontWeight::Bold, FontSlant::Normal),
    ("DejaVuSans-Oblique.ttf", FontWeight::Regular, FontSlant::Italic),
    ("DejaVuSans-BoldOblique.ttf", FontWeight::Bold, FontSlant::Italic),
    ("LiberationSans-Regular.ttf", FontWeight::Regular, FontSlant::Normal),
    ("LiberationSans-Bold.ttf", FontWeight::Bold, FontSlant::Normal),
    ("LiberationSans-Italic.ttf", FontWeight::Regular, FontSlant::Italic),
    ("arial.ttf", FontWeight::Regular, FontSlant::Normal),
    ("arialbd.ttf", FontWeight::Bold, FontSlant::Normal),
    ("ariali.ttf", FontWeight::Regular, FontSlant::Italic),
];

/// Finds well-known system fonts. Returns (key, path) pairs in preference
/// order; callers register the first per key as primary and the rest as
/// fallbacks.
pub(crate) fn discover_system_faces() -> Vec<(FaceKey, PathBuf)> {
    let mut found: HashMap<String, PathBuf> = HashMap::new();
    for dir in system_font_dirs() {
        collect_font_files(&dir, 0, &mut found);
    }
    SYSTEM_FACE_CANDIDATES
        .iter()
        .filter_map(|(file, weight, slant)| {
            found
                .get(&file.to_ascii_lowercase())
                .map(|path| (FaceKey::new(*weight, *slant), path.clone()))
        })
        .collect()
}

fn collect_font_files(dir: &Path, depth: usize, found: &mut HashMap<String, PathBuf>) {
    if depth > 4 {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_font_files(&path, depth + 1, found);
        } else if is_font_file(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                found
                    .entry(name.to_ascii_lowercase())
                    .or_insert_with(|| path.clone());
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::tokenize::is_cjk;

    /// Half an em per Latin character, a full em for CJK; ink spans 0.8em
    /// above and 0.2em below the baseline.
    pub(crate) struct FixedAdvance;

    impl TextMetrics for FixedAdvance {
        fn text_width(&self, text: &str, style: &TextStyle) -> Px {
            let size = style.size_px();
            text.chars()
                .map(|ch| if is_cjk(ch) { size } else { size / 2 })
                .sum()
        }

        fn ink_extent(&self, text: &str, style: &TextStyle) -> InkExtent {
            if text.trim().is_empty() {
                return InkExtent::default();
            }
            let size = style.size_px();
            InkExtent {
                ascent: size.mul_ratio(4, 5),
                descent: size.mul_ratio(1, 5),
            }
        }
    }

    /// First regular system font found, for tests that need real outlines.
    pub(crate) fn system_table() -> Option<FontTable> {
        let mut table = FontTable::new();
        for (key, path) in discover_system_faces() {
            let _ = table.register_file(Some(key), path);
        }
        table.has_face(FaceKey::REGULAR).then_some(table)
    }
}
