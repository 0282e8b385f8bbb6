use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use chrono::Local;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use walkdir::WalkDir;

use crate::ai::OpenAi;
use crate::audio::{AudioSource, Narration};
use crate::background::{open_frames, BackgroundSource, FRAME_HEIGHT, FRAME_WIDTH};
use crate::config::Settings;
use crate::http::HttpClient;
use crate::overlay::OverlayKind;
use crate::preset::PresetPicker;
use crate::quran_api::QuranApi;
use crate::render::FontPainter;
use crate::timeline::{build_timeline, DisplayMode};
use crate::verse::{output_file_name, Verse};
use crate::video::{compose, Composition};

const TEMP_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Temporary files owned by one build. Every registered file is removed when
/// the guard drops, whichever way the build exits.
#[derive(Debug, Default)]
pub(crate) struct BuildResources {
    files: Vec<PathBuf>,
}

impl BuildResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: PathBuf) -> PathBuf {
        self.files.push(path.clone());
        path
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

impl Drop for BuildResources {
    fn drop(&mut self) {
        for file in self.files.drain(..) {
            match fs::remove_file(&file) {
                Ok(()) => debug!("Removed {}", file.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove {}: {}", file.display(), err),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Degradation {
    SyntheticVoice,
    FallbackBackground(&'static str),
    DroppedElement(OverlayKind, String),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::SyntheticVoice => write!(f, "synthetic voice instead of recitation"),
            Degradation::FallbackBackground(kind) => write!(f, "{} background", kind),
            Degradation::DroppedElement(kind, why) => write!(f, "{} overlay dropped: {}", kind, why),
        }
    }
}

#[derive(Debug)]
pub(crate) struct BuildReport {
    pub output: PathBuf,
    pub mode: DisplayMode,
    pub duration: f64,
    pub element_count: usize,
    pub degradations: Vec<Degradation>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record<T, E>(&mut self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(_) => self.failed += 1,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed of {}",
            self.succeeded,
            self.failed,
            self.succeeded + self.failed
        )
    }
}

/// Removes files directly inside `dir` whose last modification is at least `max_age` ago.
pub(crate) fn cleanup_stale_files(dir: &Path, max_age: Duration) -> usize {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(|modified| now.duration_since(modified).unwrap_or_default());
        if age.is_some_and(|age| age >= max_age) {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to remove {}: {}", entry.path().display(), err),
            }
        }
    }
    if removed > 0 {
        info!("Cleaned {} stale files from {}", removed, dir.display());
    }
    removed
}

/// Long-lived services shared by every build in a run.
pub(crate) struct Pipeline {
    settings: Settings,
    http: HttpClient,
    ai: Option<OpenAi>,
    painter: FontPainter,
    rng: StdRng,
}

impl Pipeline {
    pub fn new(settings: Settings, rng: StdRng) -> anyhow::Result<Self> {
        settings.ensure_directories()?;
        crate::video::init()?;
        let http = HttpClient::new(&settings.network)?;
        let ai = OpenAi::from_settings(&settings);
        if ai.is_none() {
            info!("No OpenAI API key configured, AI fallbacks are disabled");
        }
        let painter = FontPainter::new(&settings);
        Ok(Self {
            settings,
            http,
            ai,
            painter,
            rng,
        })
    }

    pub fn quran_api(&self) -> QuranApi {
        QuranApi::new(self.http.clone(), self.ai.clone())
    }

    pub async fn build_video(
        &mut self,
        verse: &Verse,
        picker: &mut PresetPicker,
        narration: Narration<'_>,
    ) -> anyhow::Result<BuildReport> {
        let verse_ref = verse.validate()?;
        let preset = picker.next(&verse.translation_text, &mut self.rng);
        info!("Building {} with preset {}", verse.display_name(), preset.name);

        let mut resources = BuildResources::new();
        let temp_dir = self.settings.paths.temp_dir();
        let audio = AudioSource {
            http: &self.http,
            ai: self.ai.as_ref(),
            temp_dir: &temp_dir,
            synthetic_voice: &self.settings.audio.synthetic_voice,
            gap: self.settings.audio.range_gap_secs,
        }
        .obtain(&verse_ref, &verse.arabic_text, narration, &mut resources)
        .await?;
        let duration = audio.duration();
        info!("Audio: {} segment(s), {:.2}s", audio.segments.len(), duration);

        let backgrounds_dir = self.settings.paths.backgrounds_dir();
        let background = BackgroundSource {
            http: &self.http,
            ai: self.ai.as_ref(),
            pexels_key: self.settings.api.pexels_key.as_deref(),
            dir: &backgrounds_dir,
        }
        .acquire(preset, &mut self.rng, &mut resources)
        .await;
        info!("Background: {}", background.describe());

        let timeline = build_timeline(verse, duration, preset, &self.settings, &mut self.painter);

        let mut degradations = Vec::new();
        if audio.synthetic {
            degradations.push(Degradation::SyntheticVoice);
        }
        if background.is_fallback() {
            degradations.push(Degradation::FallbackBackground(background.describe()));
        }
        degradations.extend(
            timeline
                .dropped
                .iter()
                .map(|dropped| Degradation::DroppedElement(dropped.kind, dropped.error.to_string())),
        );

        let output = self
            .settings
            .paths
            .output_dir
            .join(output_file_name(verse, Local::now().naive_local())?);
        let mut frames = open_frames(&background, preset, duration);
        let job = Composition {
            background: frames.as_mut(),
            audio: &audio,
            elements: &timeline.elements,
            duration,
            dim: preset.overlay_opacity * 0.6,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        };
        if let Err(err) = compose(job, &self.settings.quality, &output) {
            if let Err(remove) = fs::remove_file(&output) {
                if remove.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove partial {}: {}", output.display(), remove);
                }
            }
            return Err(err).with_context(|| format!("Failed to render {}", verse.reference));
        }
        debug!("Released {} temporary files", resources.len());

        Ok(BuildReport {
            output,
            mode: timeline.mode,
            duration: timeline.total,
            element_count: timeline.elements.len(),
            degradations,
        })
    }

    /// Builds one video per verse, strictly in order. Failures are logged and counted.
    pub async fn batch(
        &mut self,
        verses: &[Verse],
        picker: &mut PresetPicker,
        narration: Narration<'_>,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let pause = Duration::from_secs(self.settings.batch.pause_secs);
        let interval = self.settings.batch.cleanup_interval.max(1);
        let temp_dir = self.settings.paths.temp_dir();

        for (index, verse) in verses.iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            info!("[{}/{}] {}", index + 1, verses.len(), verse.display_name());

            let result = self.build_video(verse, picker, narration).await;
            summary.record(&result);
            match result {
                Ok(report) => log_report(&report),
                Err(err) => error!("Failed to build {}: {:#}", verse.reference, err),
            }

            if (index + 1) % interval == 0 {
                cleanup_stale_files(&temp_dir, TEMP_MAX_AGE);
            }
        }
        info!("Batch finished: {}", summary);
        summary
    }
}

pub(crate) fn log_report(report: &BuildReport) {
    info!(
        "Created {} ({}, {:.1}s, {} overlays)",
        report.output.display(),
        report.mode,
        report.duration,
        report.element_count
    );
    for degradation in &report.degradations {
        warn!("Degraded: {}", degradation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resources_remove_registered_files_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.txt");
        let first = dir.path().join("a.mp3");
        let second = dir.path().join("b.png");
        for path in [&kept, &first, &second] {
            fs::write(path, b"x").unwrap();
        }

        {
            let mut resources = BuildResources::new();
            assert_eq!(resources.register(first.clone()), first);
            resources.register(second.clone());
            resources.register(dir.path().join("never-created.mp4"));
            assert_eq!(resources.len(), 3);
        }

        assert!(!first.exists());
        assert!(!second.exists());
        assert!(kept.exists());
    }

    #[test]
    fn cleanup_honours_age_threshold() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fresh.mp3"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(cleanup_stale_files(dir.path(), TEMP_MAX_AGE), 0);
        assert!(dir.path().join("fresh.mp3").exists());

        assert_eq!(cleanup_stale_files(dir.path(), Duration::ZERO), 1);
        assert!(!dir.path().join("fresh.mp3").exists());
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn summary_tallies_results() {
        let mut summary = BatchSummary::default();
        summary.record(&Ok::<_, ()>(()));
        summary.record(&Err::<(), _>("boom"));
        summary.record(&Ok::<_, ()>(()));
        assert_eq!(summary, BatchSummary { succeeded: 2, failed: 1 });
        assert_eq!(summary.to_string(), "2 succeeded, 1 failed of 3");
    }

    #[test]
    fn degradations_describe_themselves() {
        assert_eq!(
            Degradation::FallbackBackground("procedural still").to_string(),
            "procedural still background"
        );
        assert_eq!(
            Degradation::DroppedElement(OverlayKind::BrandingLogo, "no logo file".to_owned()).to_string(),
            "branding-logo overlay dropped: no logo file"
        );
    }
}
