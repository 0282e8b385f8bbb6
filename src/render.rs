use std::fs;
use std::path::{Path, PathBuf};

use fontdue::{Font, FontSettings as RasterSettings};
use image::{imageops, GrayImage, Luma, Rgba, RgbaImage};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Settings;

const CONTENT_PADDING: u32 = 30;
const LINE_SPACING: f32 = 1.35;
const SHADOW_COLOR: [u8; 4] = [0, 0, 0, 130];
const OUTLINE_COLOR: [u8; 4] = [0, 0, 0, 200];
const GLOW_ALPHA: u8 = 100;

const ARABIC_FONTS: &[&str] = &[
    "amiri-regular",
    "amiri",
    "notonaskharabic-regular",
    "notonaskharabic",
    "scheherazadenew-regular",
    "scheherazade",
    "notosansarabic-regular",
    "notosansarabic",
    "arialunicode",
    "dejavusans",
];

const LATIN_FONTS: &[&str] = &[
    "dejavusans",
    "liberationsans-regular",
    "liberationsans",
    "notosans-regular",
    "notosans",
    "arial",
    "helvetica",
];

#[derive(thiserror::Error, Debug)]
pub(crate) enum RenderError {
    #[error("No {0} font available")]
    MissingFont(&'static str),
    #[error("Failed to load font {0}: {1}")]
    FontLoad(PathBuf, String),
    #[error("Nothing visible to draw for `{0}`")]
    EmptyText(String),
    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextStyle {
    pub size: f32,
    pub color: [u8; 4],
    pub shadow: bool,
    pub glow: Option<[u8; 3]>,
    pub outline: bool,
    pub rtl: bool,
    pub wrap_width: u32,
}

impl TextStyle {
    pub fn new(size: f32, color: [u8; 4], wrap_width: u32) -> Self {
        Self {
            size,
            color,
            shadow: true,
            glow: None,
            outline: false,
            rtl: false,
            wrap_width,
        }
    }

    pub fn rtl(mut self) -> Self {
        self.rtl = true;
        self
    }

    pub fn glow(mut self, color: [u8; 3]) -> Self {
        self.glow = Some(color);
        self
    }

    pub fn outline(mut self) -> Self {
        self.outline = true;
        self
    }

    pub fn no_shadow(mut self) -> Self {
        self.shadow = false;
        self
    }
}

/// Produces the bitmaps the timeline positions. Each call either yields a finished
/// image or a `RenderError` for that one element.
pub(crate) trait OverlayPainter {
    fn render_text(&mut self, text: &str, style: &TextStyle) -> Result<RgbaImage, RenderError>;

    fn render_logo(&mut self, height: u32) -> Result<RgbaImage, RenderError>;

    fn render_bottom_branding(&mut self, text: &str, size: f32) -> Result<RgbaImage, RenderError>;

    fn render_page_indicator(
        &mut self,
        current: usize,
        total: usize,
        active: [u8; 3],
    ) -> Result<RgbaImage, RenderError> {
        Ok(page_indicator_image(current, total, active))
    }
}

pub(crate) struct FontPainter {
    arabic: Option<Font>,
    latin: Option<Font>,
    gold: [u8; 3],
    initials: String,
    logo_file: Option<PathBuf>,
}

impl FontPainter {
    pub fn new(settings: &Settings) -> Self {
        let arabic = load_font_with_fallback(settings.fonts.arabic.as_deref(), ARABIC_FONTS, "Arabic");
        let latin = load_font_with_fallback(settings.fonts.latin.as_deref(), LATIN_FONTS, "Latin");
        Self {
            arabic,
            latin,
            gold: settings.layout.gold_color,
            initials: settings.branding.initials(),
            logo_file: settings.paths.logo_file.clone(),
        }
    }

    fn font_for(&self, rtl: bool) -> Result<&Font, RenderError> {
        let (primary, secondary, label) = if rtl {
            (&self.arabic, &self.latin, "Arabic")
        } else {
            (&self.latin, &self.arabic, "Latin")
        };
        primary
            .as_ref()
            .or(secondary.as_ref())
            .ok_or(RenderError::MissingFont(label))
    }

    fn procedural_logo(&self, size: u32) -> RgbaImage {
        let mut logo = RgbaImage::new(size, size);
        let c = size as f32 / 2.0;
        let [r, g, b] = self.gold;
        fill_circle(&mut logo, c, c, c - 1.0, [r, g, b, 255]);
        fill_circle(&mut logo, c, c, c * 0.86, [18, 24, 40, 255]);
        fill_circle(&mut logo, c, c, c * 0.80, [r, g, b, 60]);

        if let Ok(font) = self.font_for(false) {
            let style = TextStyle::new(size as f32 * 0.38, [r, g, b, 255], size).no_shadow();
            if let Ok(mask) = text_mask(font, &self.initials, &style) {
                let (mw, mh) = mask.dimensions();
                let x = (i64::from(size) - i64::from(mw)) / 2;
                let y = (i64::from(size) - i64::from(mh)) / 2;
                tint_mask(&mut logo, &mask, [r, g, b, 255], x, y);
            }
        }
        logo
    }
}

impl OverlayPainter for FontPainter {
    fn render_text(&mut self, text: &str, style: &TextStyle) -> Result<RgbaImage, RenderError> {
        let font = self.font_for(style.rtl)?;
        let mask = text_mask(font, text, style)?;
        let image = decorate(&mask, style);
        crop_to_content(&image, CONTENT_PADDING).ok_or_else(|| RenderError::EmptyText(text.to_owned()))
    }

    fn render_logo(&mut self, height: u32) -> Result<RgbaImage, RenderError> {
        let height = height.max(8);
        match self.logo_file.as_deref().filter(|p| p.exists()) {
            Some(path) => {
                let source = image::open(path)?.to_rgba8();
                let mut logo = imageops::resize(
                    &source,
                    height,
                    height,
                    imageops::FilterType::Lanczos3,
                );
                circular_mask(&mut logo);
                let c = height as f32 / 2.0;
                let [r, g, b] = self.gold;
                ring(&mut logo, c, c, c - 1.5, 3.0, [r, g, b, 255]);
                Ok(logo)
            }
            None => Ok(self.procedural_logo(height)),
        }
    }

    fn render_bottom_branding(&mut self, text: &str, size: f32) -> Result<RgbaImage, RenderError> {
        let style = TextStyle::new(size, [255, 255, 255, 230], 1000);
        let label = self.render_text(text, &style)?;
        let (lw, lh) = label.dimensions();

        let rule_len = lw.saturating_sub(CONTENT_PADDING) + 40;
        let width = rule_len.max(lw) + 20;
        let mut canvas = RgbaImage::new(width, lh + 14);
        let rule_x = (width - rule_len) / 2;
        let [r, g, b] = self.gold;
        for i in 0..rule_len {
            let t = i as f32 / rule_len as f32;
            let ramp = if t < 0.2 {
                t / 0.2
            } else if t > 0.8 {
                (1.0 - t) / 0.2
            } else {
                1.0
            };
            let alpha = (80.0 * ramp).round() as u8;
            for y in 12..14 {
                blend_pixel(canvas.get_pixel_mut(rule_x + i, y), [r, g, b, alpha], 1.0);
            }
        }
        blend_over(&mut canvas, &label, i64::from((width - lw) / 2), 14, 1.0);
        Ok(canvas)
    }
}

fn load_font_with_fallback(explicit: Option<&Path>, preferred: &[&str], label: &str) -> Option<Font> {
    let candidate = explicit
        .filter(|p| p.exists())
        .map(Path::to_path_buf)
        .or_else(|| discover_font(preferred));

    let path = match candidate {
        Some(path) => path,
        None => {
            warn!("No {} font found; text of that script will be skipped", label);
            return None;
        }
    };
    match load_font(&path) {
        Ok(font) => {
            info!("Using {} font {}", label, path.display());
            Some(font)
        }
        Err(err) => {
            warn!("{}", err);
            None
        }
    }
}

pub(crate) fn load_font(path: &Path) -> Result<Font, RenderError> {
    let bytes = fs::read(path).map_err(|e| RenderError::Io(path.to_owned(), e.to_string()))?;
    Font::from_bytes(bytes, RasterSettings::default())
        .map_err(|e| RenderError::FontLoad(path.to_owned(), e.to_string()))
}

fn font_search_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/Library/Fonts",
        "/System/Library/Fonts",
        "C:\\Windows\\Fonts",
    ]
    .iter()
    .map(PathBuf::from)
    .collect();
    if let Some(dir) = dirs::font_dir() {
        dirs.push(dir);
    }
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".fonts"));
    }
    dirs.push(PathBuf::from("fonts"));
    dirs
}

/// Best installed match for `preferred`, ranked by list order, non-bold faces first.
pub(crate) fn discover_font(preferred: &[&str]) -> Option<PathBuf> {
    let mut best: Option<((usize, u8), PathBuf)> = None;
    for dir in font_search_dirs().into_iter().filter(|d| d.is_dir()) {
        for entry in WalkDir::new(&dir).max_depth(6).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            let is_font = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "ttf" | "otf"))
                .unwrap_or(false);
            if !is_font {
                continue;
            }
            if let Some(rank) = font_rank(path, preferred) {
                if best.as_ref().map_or(true, |(r, _)| rank < *r) {
                    best = Some((rank, path.to_path_buf()));
                }
            }
        }
    }
    best.map(|(_, path)| {
        debug!("Discovered font {}", path.display());
        path
    })
}

fn font_rank(path: &Path, preferred: &[&str]) -> Option<(usize, u8)> {
    let stem: String = path
        .file_stem()?
        .to_string_lossy()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_'))
        .collect();
    let index = preferred.iter().position(|name| stem.contains(name))?;
    let variant_penalty = ["bold", "italic", "oblique", "mono", "condensed", "light"]
        .iter()
        .filter(|v| stem.contains(*v))
        .count() as u8;
    Some((index, variant_penalty))
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0610..=0x061A | 0x064B..=0x065F | 0x0670 | 0x06D6..=0x06DC | 0x06DF..=0x06E4
        | 0x06E7 | 0x06E8 | 0x06EA..=0x06ED | 0x0300..=0x036F)
}

/// Reverses visual order for right-to-left lines while keeping each base letter
/// ahead of its diacritics. No contextual shaping is applied.
pub(crate) fn visual_order_rtl(line: &str) -> String {
    let mut clusters: Vec<String> = Vec::new();
    for c in line.chars() {
        match clusters.last_mut() {
            Some(cluster) if is_combining_mark(c) => cluster.push(c),
            _ => clusters.push(c.to_string()),
        }
    }
    clusters.into_iter().rev().collect()
}

fn line_width(font: &Font, text: &str, size: f32) -> f32 {
    text.chars().map(|c| font.metrics(c, size).advance_width).sum()
}

fn wrap_lines(font: &Font, text: &str, size: f32, max_width: u32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_owned()
            } else {
                format!("{} {}", line, word)
            };
            if !line.is_empty() && line_width(font, &candidate, size) > max_width as f32 {
                lines.push(std::mem::replace(&mut line, word.to_owned()));
            } else {
                line = candidate;
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Coverage mask of `text` laid out centered, with room around it for effects.
fn text_mask(font: &Font, text: &str, style: &TextStyle) -> Result<GrayImage, RenderError> {
    let lines = wrap_lines(font, text, style.size, style.wrap_width);
    if lines.is_empty() {
        return Err(RenderError::EmptyText(text.to_owned()));
    }
    let lines: Vec<String> = if style.rtl {
        lines.iter().map(|l| visual_order_rtl(l)).collect()
    } else {
        lines
    };

    let (ascent, line_height) = match font.horizontal_line_metrics(style.size) {
        Some(m) => (m.ascent, m.new_line_size * LINE_SPACING / 1.2),
        None => (style.size * 0.8, style.size * LINE_SPACING),
    };
    let widths: Vec<f32> = lines.iter().map(|l| line_width(font, l, style.size)).collect();
    let max_width = widths.iter().cloned().fold(0.0_f32, f32::max);

    let margin = effect_margin(style);
    let width = max_width.ceil() as u32 + 2 * margin;
    let height = (line_height * lines.len() as f32).ceil() as u32 + 2 * margin;
    let mut mask = GrayImage::new(width.max(1), height.max(1));

    for (row, (line, line_w)) in lines.iter().zip(&widths).enumerate() {
        let mut pen_x = margin as f32 + (max_width - line_w) / 2.0;
        let baseline = margin as f32 + ascent + row as f32 * line_height;
        for c in line.chars() {
            let (metrics, bitmap) = font.rasterize(c, style.size);
            let gx = (pen_x + metrics.xmin as f32).round() as i64;
            let gy = (baseline - metrics.height as f32 - metrics.ymin as f32).round() as i64;
            for (i, coverage) in bitmap.iter().enumerate() {
                if *coverage == 0 {
                    continue;
                }
                let px = gx + (i % metrics.width) as i64;
                let py = gy + (i / metrics.width) as i64;
                if px < 0 || py < 0 || px >= i64::from(width) || py >= i64::from(height) {
                    continue;
                }
                let pixel = mask.get_pixel_mut(px as u32, py as u32);
                pixel.0[0] = pixel.0[0].max(*coverage);
            }
            pen_x += metrics.advance_width;
        }
    }
    Ok(mask)
}

fn effect_margin(style: &TextStyle) -> u32 {
    let glow = if style.glow.is_some() { (style.size * 0.35) as u32 } else { 0 };
    let shadow = if style.shadow { 12 } else { 0 };
    8 + glow.max(shadow)
}

fn decorate(mask: &GrayImage, style: &TextStyle) -> RgbaImage {
    let (w, h) = mask.dimensions();
    let mut image = RgbaImage::new(w, h);

    if let Some([r, g, b]) = style.glow {
        let halo = imageops::blur(mask, (style.size * 0.12).max(2.0));
        tint_mask(&mut image, &halo, [r, g, b, GLOW_ALPHA], 0, 0);
        tint_mask(&mut image, &halo, [r, g, b, GLOW_ALPHA / 2], 0, 0);
    }
    if style.shadow {
        let shadow = imageops::blur(mask, 3.0);
        let offset = (style.size / 20.0).round().max(2.0) as i64;
        tint_mask(&mut image, &shadow, SHADOW_COLOR, offset, offset);
    }
    if style.outline {
        let outline = dilate(mask, 2);
        tint_mask(&mut image, &outline, OUTLINE_COLOR, 0, 0);
    }
    tint_mask(&mut image, mask, style.color, 0, 0);
    image
}

fn dilate(mask: &GrayImage, radius: i64) -> GrayImage {
    let (w, h) = mask.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let mut value = 0u8;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let sx = i64::from(x) + dx;
                let sy = i64::from(y) + dy;
                if sx >= 0 && sy >= 0 && sx < i64::from(w) && sy < i64::from(h) {
                    value = value.max(mask.get_pixel(sx as u32, sy as u32).0[0]);
                }
            }
        }
        Luma([value])
    })
}

fn tint_mask(image: &mut RgbaImage, mask: &GrayImage, color: [u8; 4], dx: i64, dy: i64) {
    let (w, h) = image.dimensions();
    for (x, y, coverage) in mask.enumerate_pixels() {
        let coverage = coverage.0[0];
        if coverage == 0 {
            continue;
        }
        let tx = i64::from(x) + dx;
        let ty = i64::from(y) + dy;
        if tx < 0 || ty < 0 || tx >= i64::from(w) || ty >= i64::from(h) {
            continue;
        }
        let alpha = (u16::from(coverage) * u16::from(color[3]) / 255) as u8;
        blend_pixel(
            image.get_pixel_mut(tx as u32, ty as u32),
            [color[0], color[1], color[2], alpha],
            1.0,
        );
    }
}

/// Source-over blend of one pixel, scaling the source alpha by `opacity`.
pub(crate) fn blend_pixel(dst: &mut Rgba<u8>, src: [u8; 4], opacity: f32) {
    let sa = f32::from(src[3]) / 255.0 * opacity;
    if sa <= 0.0 {
        return;
    }
    let da = f32::from(dst.0[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return;
    }
    for channel in 0..3 {
        let sc = f32::from(src[channel]);
        let dc = f32::from(dst.0[channel]);
        dst.0[channel] = ((sc * sa + dc * da * (1.0 - sa)) / out_a).round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Draws `src` onto `canvas` with its top-left corner at (`x`, `y`), clipping at the edges.
pub(crate) fn blend_over(canvas: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64, opacity: f32) {
    if opacity <= 0.0 {
        return;
    }
    let (cw, ch) = canvas.dimensions();
    let (sw, sh) = src.dimensions();
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + i64::from(sw)).min(i64::from(cw));
    let y1 = (y + i64::from(sh)).min(i64::from(ch));
    for cy in y0..y1 {
        for cx in x0..x1 {
            let s = src.get_pixel((cx - x) as u32, (cy - y) as u32).0;
            if s[3] == 0 {
                continue;
            }
            blend_pixel(canvas.get_pixel_mut(cx as u32, cy as u32), s, opacity);
        }
    }
}

pub(crate) fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, color: [u8; 4], opacity: f32) {
    let (cw, ch) = canvas.dimensions();
    for cy in y.max(0)..(y + i64::from(h)).min(i64::from(ch)) {
        for cx in x.max(0)..(x + i64::from(w)).min(i64::from(cw)) {
            blend_pixel(canvas.get_pixel_mut(cx as u32, cy as u32), color, opacity);
        }
    }
}

pub(crate) fn fill_circle(canvas: &mut RgbaImage, cx: f32, cy: f32, radius: f32, color: [u8; 4]) {
    let (w, h) = canvas.dimensions();
    let x0 = (cx - radius - 1.0).floor().max(0.0) as u32;
    let y0 = (cy - radius - 1.0).floor().max(0.0) as u32;
    let x1 = ((cx + radius + 1.0).ceil() as u32).min(w);
    let y1 = ((cy + radius + 1.0).ceil() as u32).min(h);
    for y in y0..y1 {
        for x in x0..x1 {
            let d = ((x as f32 + 0.5 - cx).powi(2) + (y as f32 + 0.5 - cy).powi(2)).sqrt();
            let coverage = (radius + 0.5 - d).clamp(0.0, 1.0);
            if coverage > 0.0 {
                blend_pixel(canvas.get_pixel_mut(x, y), color, coverage);
            }
        }
    }
}

fn ring(canvas: &mut RgbaImage, cx: f32, cy: f32, radius: f32, thickness: f32, color: [u8; 4]) {
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let d = ((x as f32 + 0.5 - cx).powi(2) + (y as f32 + 0.5 - cy).powi(2)).sqrt();
        let coverage = (thickness / 2.0 + 0.5 - (d - radius).abs()).clamp(0.0, 1.0);
        if coverage > 0.0 {
            blend_pixel(pixel, color, coverage);
        }
    }
}

fn circular_mask(image: &mut RgbaImage) {
    let (w, h) = image.dimensions();
    let c = w.min(h) as f32 / 2.0;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let d = ((x as f32 + 0.5 - w as f32 / 2.0).powi(2) + (y as f32 + 0.5 - h as f32 / 2.0).powi(2)).sqrt();
        let coverage = (c + 0.5 - d).clamp(0.0, 1.0);
        pixel.0[3] = (f32::from(pixel.0[3]) * coverage).round() as u8;
    }
}

pub(crate) fn page_indicator_image(current: usize, total: usize, active: [u8; 3]) -> RgbaImage {
    const SPACING: u32 = 35;
    let total = total.max(1);
    let width = (total as u32 * SPACING + 40).max(500);
    let height = 50;
    let mut image = RgbaImage::new(width, height);
    let first_x = (width - (total as u32 - 1) * SPACING) as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let [r, g, b] = active;

    for i in 0..total {
        let cx = first_x + (i as u32 * SPACING) as f32;
        if i == current {
            fill_circle(&mut image, cx, cy, 12.0, [r, g, b, 70]);
            fill_circle(&mut image, cx, cy, 7.0, [r, g, b, 255]);
        } else {
            fill_circle(&mut image, cx, cy, 5.0, [150, 150, 150, 180]);
        }
    }
    image
}

/// Tight crop around visible pixels plus `padding`. `None` when nothing is visible.
pub(crate) fn crop_to_content(image: &RgbaImage, padding: u32) -> Option<RgbaImage> {
    let (w, h) = image.dimensions();
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    let (x0, y0, x1, y1) = bounds?;
    let (cw, ch) = ((x1 + 1).min(w) - x0, (y1 + 1).min(h) - y0);
    let mut out = RgbaImage::new(cw + 2 * padding, ch + 2 * padding);
    let cropped = imageops::crop_imm(image, x0, y0, cw, ch).to_image();
    imageops::overlay(&mut out, &cropped, i64::from(padding), i64::from(padding));
    Some(out)
}
