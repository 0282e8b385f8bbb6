use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use crate::ai::OpenAi;
use crate::capture::ClipFrames;
use crate::http::{FetchError, HttpClient};
use crate::pipeline::BuildResources;
use crate::preset::{background_prompt, VisualPreset};
use crate::render::{blend_over, blend_pixel, fill_circle};

pub(crate) const FRAME_WIDTH: u32 = 1080;
pub(crate) const FRAME_HEIGHT: u32 = 1920;

const PEXELS_SEARCH_URL: &str = "https://api.pexels.com/videos/search";
const STILL_ZOOM: f64 = 0.02;
const ZOOM_MIN_DURATION: f64 = 5.0;
const GRADIENT_SPEED: f64 = 10.0;

/// Produces one full-size background frame per output timestamp.
pub(crate) trait FrameSource {
    fn frame_at(&mut self, t: f64) -> anyhow::Result<&RgbaImage>;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Background {
    Video(PathBuf),
    Image(PathBuf),
    Procedural(PathBuf),
    AnimatedGradient,
}

impl Background {
    /// Anything other than stock footage or a generated image.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Background::Procedural(_) | Background::AnimatedGradient)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Background::Video(_) => "stock video",
            Background::Image(_) => "AI image",
            Background::Procedural(_) => "procedural still",
            Background::AnimatedGradient => "animated gradient",
        }
    }
}

/// Opens frames for `background`, degrading to the animated gradient if the file cannot be read.
pub(crate) fn open_frames(background: &Background, preset: &VisualPreset, duration: f64) -> Box<dyn FrameSource> {
    let opened: anyhow::Result<Box<dyn FrameSource>> = match background {
        Background::Video(path) => ClipFrames::open(path, FRAME_WIDTH, FRAME_HEIGHT)
            .map(|clip| Box::new(GradedFrames::new(clip, preset)) as Box<dyn FrameSource>),
        Background::Image(path) | Background::Procedural(path) => {
            StillFrames::load(path, duration).map(|still| Box::new(still) as Box<dyn FrameSource>)
        }
        Background::AnimatedGradient => Ok(Box::new(GradientFrames::new(preset.gradient))),
    };
    opened.unwrap_or_else(|err| {
        warn!("Background {} unusable, using animated gradient: {:#}", background.describe(), err);
        Box::new(GradientFrames::new(preset.gradient))
    })
}

/// Scales `image` to cover `width`x`height` and crops the overflow evenly.
pub(crate) fn cover_resize(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (iw, ih) = image.dimensions();
    let scale = (width as f64 / iw as f64).max(height as f64 / ih as f64);
    let sw = ((iw as f64 * scale).ceil() as u32).max(width);
    let sh = ((ih as f64 * scale).ceil() as u32).max(height);
    let scaled = imageops::resize(image, sw, sh, FilterType::Triangle);
    imageops::crop_imm(&scaled, (sw - width) / 2, (sh - height) / 2, width, height).to_image()
}

pub(crate) struct StillFrames {
    base: RgbaImage,
    duration: f64,
    zoom: bool,
    current: RgbaImage,
    crop: (u32, u32),
}

impl StillFrames {
    pub fn load(path: &Path, duration: f64) -> anyhow::Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to open background {}", path.display()))?
            .to_rgba8();
        Ok(Self::new(cover_resize(&image, FRAME_WIDTH, FRAME_HEIGHT), duration))
    }

    pub fn new(base: RgbaImage, duration: f64) -> Self {
        let crop = base.dimensions();
        Self {
            current: base.clone(),
            base,
            duration,
            zoom: duration > ZOOM_MIN_DURATION,
            crop,
        }
    }
}

impl FrameSource for StillFrames {
    fn frame_at(&mut self, t: f64) -> anyhow::Result<&RgbaImage> {
        if !self.zoom {
            return Ok(&self.base);
        }
        let (w, h) = self.base.dimensions();
        let scale = 1.0 + STILL_ZOOM * (t / self.duration).clamp(0.0, 1.0);
        let crop = (
            ((w as f64 / scale).round() as u32).clamp(1, w),
            ((h as f64 / scale).round() as u32).clamp(1, h),
        );
        // the zoom is slow, so most frames reuse the previous crop
        if crop != self.crop {
            let region =
                imageops::crop_imm(&self.base, (w - crop.0) / 2, (h - crop.1) / 2, crop.0, crop.1).to_image();
            self.current = imageops::resize(&region, w, h, FilterType::Triangle);
            self.crop = crop;
        }
        Ok(&self.current)
    }
}

/// Three-stop vertical gradient as used by every preset.
pub(crate) fn gradient_color(stops: &[[u8; 3]; 3], ratio: f64) -> [u8; 3] {
    let mix = |a: [u8; 3], b: [u8; 3], k: f64| {
        let k = k.clamp(0.0, 1.0);
        [0, 1, 2].map(|i| (f64::from(a[i]) + (f64::from(b[i]) - f64::from(a[i])) * k) as u8)
    };
    if ratio < 0.33 {
        mix(stops[0], stops[1], ratio * 3.0)
    } else if ratio < 0.66 {
        mix(stops[1], stops[2], (ratio - 0.33) * 3.0)
    } else {
        stops[2]
    }
}

/// The preset gradient scrolling upward over time.
pub(crate) struct GradientFrames {
    rows: Vec<[u8; 3]>,
    frame: RgbaImage,
}

impl GradientFrames {
    pub fn new(stops: [[u8; 3]; 3]) -> Self {
        let rows = (0..FRAME_HEIGHT)
            .map(|y| gradient_color(&stops, f64::from(y) / f64::from(FRAME_HEIGHT)))
            .collect();
        Self {
            rows,
            frame: RgbaImage::new(FRAME_WIDTH, FRAME_HEIGHT),
        }
    }
}

impl FrameSource for GradientFrames {
    fn frame_at(&mut self, t: f64) -> anyhow::Result<&RgbaImage> {
        let height = self.rows.len();
        let offset = (t.max(0.0) * GRADIENT_SPEED) as usize % height;
        let row_len = FRAME_WIDTH as usize * 4;
        for (y, row) in self.frame.chunks_exact_mut(row_len).enumerate() {
            let [r, g, b] = self.rows[(y + offset) % height];
            for pixel in row.chunks_exact_mut(4) {
                pixel.copy_from_slice(&[r, g, b, 255]);
            }
        }
        Ok(&self.frame)
    }
}

/// Video frames under the preset's tint and, when asked for, a vignette.
pub(crate) struct GradedFrames<S> {
    inner: S,
    grade: RgbaImage,
    frame: RgbaImage,
}

impl<S: FrameSource> GradedFrames<S> {
    pub fn new(inner: S, preset: &VisualPreset) -> Self {
        let [r, g, b] = preset.gradient[1];
        let alpha = (preset.overlay_opacity * 0.7 * 255.0).round().clamp(0.0, 255.0) as u8;
        let mut grade = RgbaImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgba([r, g, b, alpha]));
        if preset.vignette {
            blend_over(&mut grade, &vignette(FRAME_WIDTH, FRAME_HEIGHT), 0, 0, 0.9);
        }
        Self {
            inner,
            grade,
            frame: RgbaImage::new(FRAME_WIDTH, FRAME_HEIGHT),
        }
    }
}

impl<S: FrameSource> FrameSource for GradedFrames<S> {
    fn frame_at(&mut self, t: f64) -> anyhow::Result<&RgbaImage> {
        let source = self.inner.frame_at(t)?;
        self.frame.copy_from_slice(source);
        blend_over(&mut self.frame, &self.grade, 0, 0, 1.0);
        Ok(&self.frame)
    }
}

/// Black edge darkening, transparent at the center.
pub(crate) fn vignette(width: u32, height: u32) -> RgbaImage {
    let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
    let max_radius = (cx * cx + cy * cy).sqrt();
    RgbaImage::from_fn(width, height, |x, y| {
        let d = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt() / max_radius;
        Rgba([0, 0, 0, (176.0 * d.powf(1.8)).round() as u8])
    })
}

/// Offline background built from the preset palette.
pub(crate) fn procedural_still<R: Rng + ?Sized>(preset: &VisualPreset, rng: &mut R) -> RgbaImage {
    const BANDS: u32 = 12;
    let (width, height) = (FRAME_WIDTH, FRAME_HEIGHT);
    let band_height = height / BANDS;

    let mut image = RgbaImage::from_fn(width, height, |_, y| {
        let ratio = f64::from(y) / f64::from(height);
        let [mut r, mut g, mut b] = gradient_color(&preset.gradient, ratio);
        if ratio >= 0.66 {
            let band_ratio = f64::from(y % band_height) / f64::from(band_height);
            let variation = (band_ratio * std::f64::consts::PI).sin() * 15.0;
            let shift = |c: u8| (f64::from(c) + variation).clamp(0.0, 255.0) as u8;
            (r, g, b) = (shift(r), shift(g), shift(b));
        }
        Rgba([r, g, b, 255])
    });

    if preset.particles {
        let mut layer = RgbaImage::new(width, height);
        for _ in 0..100 {
            let x = rng.gen_range(0..width) as f32;
            let y = rng.gen_range(0..height) as f32;
            let size = rng.gen_range(4..=10) as f32;
            let opacity = rng.gen_range(30..=80u8);
            let glow = if rng.gen_bool(0.4) { [255, 215, 100] } else { [255, 255, 255] };
            for step in (1..=5).rev() {
                let radius = size + step as f32 * 4.0;
                let alpha = (f32::from(opacity) * size / radius) as u8;
                fill_circle(&mut layer, x, y, radius, [glow[0], glow[1], glow[2], alpha]);
            }
            fill_circle(&mut layer, x, y, size, [255, 255, 255, opacity.saturating_add(30)]);
        }
        for _ in 0..300 {
            let x = rng.gen_range(0..width) as f32;
            let y = rng.gen_range(0..height) as f32;
            let size = rng.gen_range(1..=3) as f32;
            fill_circle(&mut layer, x, y, size, [255, 255, 255, rng.gen_range(60..=150)]);
        }
        let layer = imageops::blur(&layer, 2.5);
        blend_over(&mut image, &layer, 0, 0, 1.0);
    }

    if preset.vignette {
        blend_over(&mut image, &vignette(width, height), 0, 0, 1.0);
    }

    for pixel in image.pixels_mut() {
        let grain = 113 + rng.gen_range(0..30u8);
        blend_pixel(pixel, [grain, grain, grain, 255], 0.05);
    }
    image
}

#[derive(Deserialize)]
struct PexelsSearch {
    #[serde(default)]
    videos: Vec<PexelsVideo>,
}

#[derive(Deserialize)]
struct PexelsVideo {
    #[serde(default)]
    url: String,
    #[serde(default)]
    video_files: Vec<PexelsFile>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct PexelsFile {
    width: Option<u32>,
    height: Option<u32>,
    link: Option<String>,
}

/// The tallest portrait rendition of one stock video.
fn best_portrait_file(files: &[PexelsFile]) -> Option<&PexelsFile> {
    files
        .iter()
        .filter(|f| f.link.is_some())
        .filter(|f| f.width.unwrap_or(0) < f.height.unwrap_or(0))
        .max_by_key(|f| f.height.unwrap_or(0))
}

/// Acquires a background, trying stock footage, then a generated image, then
/// procedural fallbacks. Never fails.
pub(crate) struct BackgroundSource<'a> {
    pub http: &'a HttpClient,
    pub ai: Option<&'a OpenAi>,
    pub pexels_key: Option<&'a str>,
    pub dir: &'a Path,
}

impl BackgroundSource<'_> {
    pub async fn acquire<R: Rng + ?Sized>(
        &self,
        preset: &VisualPreset,
        rng: &mut R,
        resources: &mut BuildResources,
    ) -> Background {
        match self.stock_video(preset, rng, resources).await {
            Ok(path) => return Background::Video(path),
            Err(err) => warn!("Stock video background unavailable: {:#}", err),
        }
        match self.generated_image(preset, rng, resources).await {
            Ok(path) => return Background::Image(path),
            Err(err) => warn!("AI background unavailable: {:#}", err),
        }

        let still = procedural_still(preset, rng);
        let path = resources.register(self.unique_path("procedural", preset, "png"));
        match still.save(&path) {
            Ok(()) => {
                info!("Using procedural {} background", preset.name);
                Background::Procedural(path)
            }
            Err(err) => {
                warn!("Could not save procedural background: {}", err);
                Background::AnimatedGradient
            }
        }
    }

    fn unique_path(&self, kind: &str, preset: &VisualPreset, extension: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.{}",
            kind,
            preset.name,
            Local::now().format("%Y%m%d_%H%M%S_%6f"),
            extension
        ))
    }

    async fn stock_video<R: Rng + ?Sized>(
        &self,
        preset: &VisualPreset,
        rng: &mut R,
        resources: &mut BuildResources,
    ) -> anyhow::Result<PathBuf> {
        let key = self.pexels_key.ok_or(FetchError::Unconfigured("Pexels API key"))?;
        let page = rng.gen_range(1..=3).to_string();
        let mut search: PexelsSearch = self
            .http
            .get_json(
                PEXELS_SEARCH_URL,
                &[
                    ("query", preset.pexels_query),
                    ("per_page", "10"),
                    ("orientation", "portrait"),
                    ("page", page.as_str()),
                ],
                &[("Authorization", key)],
            )
            .await?;
        search.videos.shuffle(rng);

        let (video, file) = search
            .videos
            .iter()
            .find_map(|video| best_portrait_file(&video.video_files).map(|file| (video, file)))
            .ok_or(anyhow::anyhow!("No portrait video for `{}`", preset.pexels_query))?;
        let link = file.link.as_deref().unwrap_or_default();
        info!("Using stock video {}", video.url);

        let path = resources.register(self.unique_path("pexels", preset, "mp4"));
        self.http.download(link, &path, "background video").await?;
        Ok(path)
    }

    async fn generated_image<R: Rng + ?Sized>(
        &self,
        preset: &VisualPreset,
        rng: &mut R,
        resources: &mut BuildResources,
    ) -> anyhow::Result<PathBuf> {
        let ai = self.ai.ok_or(FetchError::Unconfigured("OpenAI API key"))?;
        let prompt = background_prompt(preset, rng, Local::now().naive_local());
        info!("Generating AI background for {}", preset.name);
        let bytes = ai.portrait_image(&prompt).await?;
        let image = image::load_from_memory(&bytes).context("Generated background is not an image")?;
        let path = resources.register(self.unique_path("ai", preset, "png"));
        image
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::find;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn gradient_stops_and_midpoints() {
        let stops = [[0, 0, 0], [90, 90, 90], [200, 100, 0]];
        assert_eq!(gradient_color(&stops, 0.0), [0, 0, 0]);
        assert_eq!(gradient_color(&stops, 0.33), [90, 90, 90]);
        assert_eq!(gradient_color(&stops, 0.9), [200, 100, 0]);
    }

    #[test]
    fn animated_gradient_scrolls() {
        let stops = [[10, 20, 30], [40, 50, 60], [70, 80, 90]];
        let mut frames = GradientFrames::new(stops);
        assert_eq!(frames.frame_at(0.0).unwrap().get_pixel(0, 0).0, [10, 20, 30, 255]);
        let expected = gradient_color(&stops, 10.0 / f64::from(FRAME_HEIGHT));
        let scrolled = frames.frame_at(1.0).unwrap().get_pixel(500, 0).0;
        assert_eq!(scrolled, [expected[0], expected[1], expected[2], 255]);
    }

    #[test]
    fn cover_resize_fills_and_centers() {
        let mut landscape = RgbaImage::from_pixel(400, 100, Rgba([0, 0, 255, 255]));
        for y in 0..100 {
            landscape.put_pixel(200, y, Rgba([255, 0, 0, 255]));
        }
        let covered = cover_resize(&landscape, 90, 160);
        assert_eq!(covered.dimensions(), (90, 160));
        let center = covered.get_pixel(45, 80).0;
        assert!(center[0] > 0, "center column should come from the middle of the source");
    }

    #[test]
    fn short_stills_do_not_zoom() {
        let base = RgbaImage::from_pixel(108, 192, Rgba([1, 2, 3, 255]));
        let mut still = StillFrames::new(base.clone(), 4.0);
        assert_eq!(still.frame_at(3.0).unwrap(), &base);
    }

    #[test]
    fn long_stills_zoom_in_toward_the_end() {
        let base = RgbaImage::from_fn(200, 400, |x, _| Rgba([(x % 256) as u8, 0, 0, 255]));
        let mut still = StillFrames::new(base.clone(), 10.0);
        assert_eq!(still.frame_at(0.0).unwrap(), &base);
        let end = still.frame_at(10.0).unwrap().clone();
        assert_eq!(end.dimensions(), (200, 400));
        assert_ne!(end, base);
    }

    #[test]
    fn vignette_darkens_corners_only() {
        let v = vignette(100, 200);
        assert_eq!(v.get_pixel(50, 100).0[3], 0);
        assert!(v.get_pixel(0, 0).0[3] > 150);
    }

    #[test]
    fn procedural_still_is_seeded() {
        let preset = find("cosmic_nebula").unwrap();
        let a = procedural_still(preset, &mut StdRng::seed_from_u64(3));
        let b = procedural_still(preset, &mut StdRng::seed_from_u64(3));
        assert_eq!(a.dimensions(), (FRAME_WIDTH, FRAME_HEIGHT));
        assert!(a == b);
    }

    #[test]
    fn portrait_files_pick_the_tallest() {
        let file = |w: u32, h: u32, link: Option<&str>| PexelsFile {
            width: Some(w),
            height: Some(h),
            link: link.map(str::to_owned),
        };
        let files = vec![
            file(1920, 1080, Some("landscape")),
            file(720, 1280, Some("hd")),
            file(1080, 1920, Some("fhd")),
            file(2160, 3840, None),
        ];
        assert_eq!(best_portrait_file(&files).and_then(|f| f.link.as_deref()), Some("fhd"));
        assert!(best_portrait_file(&files[..1]).is_none());
    }

    #[test]
    fn pexels_search_tolerates_null_sizes() {
        let search: PexelsSearch = serde_json::from_str(
            r#"{"page":1,"videos":[{"url":"https://www.pexels.com/video/1","video_files":[{"width":null,"height":null,"link":"x"}]}]}"#,
        )
        .unwrap();
        assert!(best_portrait_file(&search.videos[0].video_files).is_none());
    }
}
