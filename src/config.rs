use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::background::{FRAME_HEIGHT, FRAME_WIDTH};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "quran-reels.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub paths: PathSettings,
    pub page: PageSettings,
    pub layout: LayoutSettings,
    pub quality: QualitySettings,
    pub branding: BrandingSettings,
    pub audio: AudioSettings,
    pub network: NetworkSettings,
    pub batch: BatchSettings,
    pub fonts: FontSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct PathSettings {
    pub output_dir: PathBuf,
    pub database_file: String,
    pub logo_file: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("QuranVideos"),
            database_file: "quran_database.json".to_owned(),
            logo_file: None,
        }
    }
}

impl PathSettings {
    pub fn database_path(&self) -> PathBuf {
        self.output_dir.join(&self.database_file)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.output_dir.join("temp")
    }

    pub fn backgrounds_dir(&self) -> PathBuf {
        self.output_dir.join("backgrounds")
    }
}

/// Pagination and pacing knobs for multi-page verses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct PageSettings {
    pub max_chars_arabic: usize,
    pub max_chars_translation: usize,
    /// Seconds between an Arabic page appearing and its translation. Zero keeps both in sync with the recitation.
    pub translation_delay: f64,
    pub min_page_duration: f64,
    pub max_page_duration: f64,
    pub page_fade_duration: f64,
    pub show_page_indicators: bool,
    /// Transient Bismillah line ahead of the translation in single-page mode. Off by default: it overlapped the translation and drifted from the audio.
    pub bismillah_before_translation: bool,
    pub bismillah_display_duration: f64,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            max_chars_arabic: 120,
            max_chars_translation: 150,
            translation_delay: 0.0,
            min_page_duration: 2.5,
            max_page_duration: 8.0,
            page_fade_duration: 0.3,
            show_page_indicators: true,
            bismillah_before_translation: false,
            bismillah_display_duration: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct LayoutSettings {
    pub width: u32,
    pub height: u32,
    pub logo_size: u32,
    pub logo_position: (i32, i32),
    pub logo_opacity: f32,
    pub verse_reference_y: i32,
    pub verse_reference_size: f32,
    pub surah_name_y: i32,
    pub surah_name_size: f32,
    pub bismillah_header_y: i32,
    pub arabic_text_y: i32,
    pub arabic_text_y_multi: i32,
    pub arabic_text_size: f32,
    pub translation_y: i32,
    pub translation_y_multi: i32,
    pub translation_size: f32,
    pub translator_y: i32,
    pub page_indicator_y: i32,
    pub branding_bottom_y: i32,
    pub branding_bottom_size: f32,
    pub bottom_branding_start_delay: f64,
    pub progress_bar_y: i32,
    pub progress_bar_height: u32,
    pub wrap_width: u32,
    pub gold_color: [u8; 3],
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            logo_size: 90,
            logo_position: (50, 30),
            logo_opacity: 0.9,
            verse_reference_y: 150,
            verse_reference_size: 36.0,
            surah_name_y: 250,
            surah_name_size: 36.0,
            bismillah_header_y: 320,
            arabic_text_y: 500,
            arabic_text_y_multi: 480,
            arabic_text_size: 62.0,
            translation_y: 1100,
            translation_y_multi: 1050,
            translation_size: 30.0,
            translator_y: 1400,
            page_indicator_y: 1500,
            branding_bottom_y: 1650,
            branding_bottom_size: 26.0,
            bottom_branding_start_delay: 1.0,
            progress_bar_y: 1800,
            progress_bar_height: 8,
            wrap_width: 850,
            gold_color: [255, 215, 0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct QualitySettings {
    pub fps: u32,
    pub preset: String,
    pub crf: u32,
    pub video_bitrate_kbps: usize,
    pub audio_bitrate_kbps: usize,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            fps: 30,
            preset: "medium".to_owned(),
            crf: 23,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct BrandingSettings {
    pub channel_name: String,
    pub handle: String,
    pub tagline: String,
}

impl Default for BrandingSettings {
    fn default() -> Self {
        Self {
            channel_name: "AlilmHub".to_owned(),
            handle: "@AlilmHuB".to_owned(),
            tagline: "Like • Follow • Share".to_owned(),
        }
    }
}

impl BrandingSettings {
    pub fn bottom_line(&self) -> String {
        format!("{} — {}", self.channel_name, self.tagline)
    }

    pub fn initials(&self) -> String {
        let upper: String = self
            .channel_name
            .chars()
            .filter(|c| c.is_uppercase())
            .take(2)
            .collect();
        if upper.is_empty() {
            self.channel_name.chars().take(2).collect::<String>().to_uppercase()
        } else {
            upper
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AudioSettings {
    pub default_reciter: String,
    pub synthetic_voice: String,
    pub range_gap_secs: f64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            default_reciter: "mishary".to_owned(),
            synthetic_voice: "onyx".to_owned(),
            range_gap_secs: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct NetworkSettings {
    pub timeout_secs: u64,
    pub attempts: u32,
    pub backoff_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            attempts: 3,
            backoff_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct BatchSettings {
    pub pause_secs: u64,
    pub cleanup_interval: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            pause_secs: 3,
            cleanup_interval: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct FontSettings {
    pub arabic: Option<PathBuf>,
    pub latin: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ApiSettings {
    pub openai_key: Option<String>,
    pub pexels_key: Option<String>,
}

impl Settings {
    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading settings from {}", path.display()))?;
            toml::from_str::<Self>(&contents)
                .with_context(|| format!("parsing settings in {}", path.display()))?
        } else {
            let settings = Self::default();
            settings.save_to_path(path)?;
            settings
        };

        settings.apply_env();
        settings.sanitize();
        Ok(settings)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory {}", parent.display()))?;
        }

        let mut persisted = self.clone();
        persisted.api = ApiSettings::default();
        let toml = toml::to_string_pretty(&persisted).context("serializing settings")?;
        fs::write(path, toml).with_context(|| format!("writing settings to {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [
            self.paths.output_dir.clone(),
            self.paths.temp_dir(),
            self.paths.backgrounds_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            self.api.openai_key = Some(key);
        }
        if let Some(key) = non_empty_env("PEXELS_API_KEY") {
            self.api.pexels_key = Some(key);
        }
    }

    fn sanitize(&mut self) {
        let defaults = PageSettings::default();
        let page = &mut self.page;

        if page.max_chars_arabic == 0 {
            warn!("page.max_chars_arabic must be positive, using {}", defaults.max_chars_arabic);
            page.max_chars_arabic = defaults.max_chars_arabic;
        }
        if page.max_chars_translation == 0 {
            warn!(
                "page.max_chars_translation must be positive, using {}",
                defaults.max_chars_translation
            );
            page.max_chars_translation = defaults.max_chars_translation;
        }
        if !positive(page.min_page_duration)
            || !positive(page.max_page_duration)
            || page.min_page_duration > page.max_page_duration
        {
            warn!(
                "invalid page duration bounds [{}, {}], using [{}, {}]",
                page.min_page_duration,
                page.max_page_duration,
                defaults.min_page_duration,
                defaults.max_page_duration
            );
            page.min_page_duration = defaults.min_page_duration;
            page.max_page_duration = defaults.max_page_duration;
        }
        if !page.translation_delay.is_finite() || page.translation_delay < 0.0 {
            page.translation_delay = defaults.translation_delay;
        }
        if !page.page_fade_duration.is_finite() || page.page_fade_duration < 0.0 {
            page.page_fade_duration = defaults.page_fade_duration;
        }
        if !positive(page.bismillah_display_duration) {
            page.bismillah_display_duration = defaults.bismillah_display_duration;
        }

        if (self.layout.width, self.layout.height) != (FRAME_WIDTH, FRAME_HEIGHT) {
            warn!(
                "layout {}x{} is not supported, rendering {}x{}",
                self.layout.width, self.layout.height, FRAME_WIDTH, FRAME_HEIGHT
            );
            self.layout.width = FRAME_WIDTH;
            self.layout.height = FRAME_HEIGHT;
        }
        if self.quality.fps == 0 {
            warn!("quality.fps must be positive, using 30");
            self.quality.fps = QualitySettings::default().fps;
        }
        if self.network.attempts == 0 {
            self.network.attempts = 1;
        }
        if self.batch.cleanup_interval == 0 {
            self.batch.cleanup_interval = BatchSettings::default().cleanup_interval;
        }
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let settings = Settings::load_from_path(&path).unwrap();

        assert!(path.exists());
        assert_eq!(settings.page.max_chars_arabic, 120);
        assert_eq!(settings.page.translation_delay, 0.0);
        assert!(!settings.page.bismillah_before_translation);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[page]\nmax_chars_arabic = 90\n").unwrap();

        let settings = Settings::load_from_path(&path).unwrap();

        assert_eq!(settings.page.max_chars_arabic, 90);
        assert_eq!(settings.page.max_chars_translation, 150);
        assert_eq!(settings.quality.fps, 30);
        assert_eq!(settings.layout.progress_bar_y, 1800);
    }

    #[test]
    fn inverted_duration_bounds_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[page]\nmin_page_duration = 9.0\nmax_page_duration = 3.0\n").unwrap();

        let settings = Settings::load_from_path(&path).unwrap();

        assert_eq!(settings.page.min_page_duration, 2.5);
        assert_eq!(settings.page.max_page_duration, 8.0);
    }

    #[test]
    fn initials_come_from_capitals() {
        let branding = BrandingSettings::default();
        assert_eq!(branding.initials(), "AH");
        assert_eq!(branding.bottom_line(), "AlilmHub — Like • Follow • Share");
    }
}
