use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use ffmpeg_next::{format, rescale};
use log::{info, warn};

use crate::ai::OpenAi;
use crate::http::HttpClient;
use crate::pipeline::BuildResources;
use crate::verse::VerseRef;

/// Output rate shared by every branch of the audio graph.
pub(crate) const SAMPLE_RATE: u32 = 44_100;
const SYNTHETIC_FADE: f64 = 0.5;

pub(crate) struct Reciter {
    pub id: &'static str,
    pub name: &'static str,
    pub style: &'static str,
    sources: [&'static str; 2],
}

impl fmt::Display for Reciter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8} {} ({})", self.id, self.name, self.style)
    }
}

pub(crate) static RECITERS: [Reciter; 5] = [
    Reciter {
        id: "mishary",
        name: "Mishary Rashid Alafasy",
        style: "Emotional and melodious",
        sources: [
            "https://everyayah.com/data/Alafasy_128kbps/",
            "https://everyayah.com/data/Alafasy_64kbps/",
        ],
    },
    Reciter {
        id: "sudais",
        name: "Abdul Rahman Al-Sudais",
        style: "Clear and powerful",
        sources: [
            "https://everyayah.com/data/Abdurrahmaan_As-Sudais_192kbps/",
            "https://everyayah.com/data/Abdurrahmaan_As-Sudais_64kbps/",
        ],
    },
    Reciter {
        id: "shuraim",
        name: "Saud Al-Shuraim",
        style: "Deep and moving",
        sources: [
            "https://everyayah.com/data/Saud_ash-Shuraym_128kbps/",
            "https://everyayah.com/data/Saud_ash-Shuraym_64kbps/",
        ],
    },
    Reciter {
        id: "maher",
        name: "Maher Al Muaiqly",
        style: "Beautiful and touching",
        sources: [
            "https://everyayah.com/data/MaherAlMuaiqly128kbps/",
            "https://everyayah.com/data/Maher_AlMuaiqly_64kbps/",
        ],
    },
    Reciter {
        id: "husary",
        name: "Mahmoud Khalil Al-Husary",
        style: "Classic and precise",
        sources: [
            "https://everyayah.com/data/Husary_128kbps/",
            "https://everyayah.com/data/Husary_64kbps/",
        ],
    },
];

pub(crate) fn find_reciter(id: &str) -> Option<&'static Reciter> {
    RECITERS.iter().find(|r| r.id.eq_ignore_ascii_case(id))
}

fn recitation_file_name(surah: u16, verse: u16) -> String {
    format!("{:03}{:03}.mp3", surah, verse)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AudioSegment {
    pub path: PathBuf,
    pub duration: f64,
}

/// One or more clips played back to back with `gap` seconds of silence between them.
#[derive(Debug, Clone)]
pub(crate) struct AudioTrack {
    pub segments: Vec<AudioSegment>,
    pub gap: f64,
    pub synthetic: bool,
}

impl AudioTrack {
    pub fn duration(&self) -> f64 {
        let clips: f64 = self.segments.iter().map(|s| s.duration).sum();
        clips + self.gap * self.segments.len().saturating_sub(1) as f64
    }

    /// The file fed through the graph's `in` buffer source.
    pub fn lead(&self) -> Option<&Path> {
        self.segments.first().map(|s| s.path.as_path())
    }

    /// Filter graph body between the `in` source and the `out` sink. Segments after
    /// the first are pulled in with `amovie` and joined by `concat`.
    pub fn filter_spec(&self) -> String {
        let normalize = format!("aresample={},aformat=sample_fmts=fltp:channel_layouts=stereo", SAMPLE_RATE);

        if self.synthetic {
            let fade_out_start = (self.duration() - SYNTHETIC_FADE).max(0.0);
            return format!(
                "[in]{normalize},afade=t=in:st=0:d={fade},afade=t=out:st={start:.3}:d={fade}[out]",
                fade = SYNTHETIC_FADE,
                start = fade_out_start
            );
        }
        if self.segments.len() <= 1 {
            return format!("[in]{}[out]", normalize);
        }

        let last = self.segments.len() - 1;
        let mut chains = Vec::with_capacity(self.segments.len() + 1);
        for (i, segment) in self.segments.iter().enumerate() {
            let source = if i == 0 {
                "[in]".to_owned()
            } else {
                format!("amovie=filename={},", escape_filter_path(&segment.path))
            };
            let pad = if i < last {
                format!(",apad=pad_dur={}", self.gap)
            } else {
                String::new()
            };
            chains.push(format!("{}{}{}[a{}]", source, normalize, pad, i));
        }
        let labels: String = (0..self.segments.len()).map(|i| format!("[a{}]", i)).collect();
        chains.push(format!("{}concat=n={}:v=0:a=1[out]", labels, self.segments.len()));
        chains.join(";")
    }
}

/// Quotes `path` for an option value, then escapes the result for the graph parser.
fn escape_filter_path(path: &Path) -> String {
    let quoted = format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"));
    let mut escaped = String::with_capacity(quoted.len() + 4);
    for c in quoted.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn probe_duration(path: &Path) -> anyhow::Result<f64> {
    let input = format::input(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let duration = input.duration() as f64 * f64::from(rescale::TIME_BASE);
    anyhow::ensure!(
        duration.is_finite() && duration > 0.0,
        "{} has no usable duration",
        path.display()
    );
    Ok(duration)
}

#[derive(Clone, Copy)]
pub(crate) enum Narration<'a> {
    Reciter(&'a Reciter),
    Synthetic,
}

/// Obtains recitation audio, falling back to synthetic speech.
pub(crate) struct AudioSource<'a> {
    pub http: &'a HttpClient,
    pub ai: Option<&'a OpenAi>,
    pub temp_dir: &'a Path,
    pub synthetic_voice: &'a str,
    pub gap: f64,
}

impl AudioSource<'_> {
    pub async fn obtain(
        &self,
        verse_ref: &VerseRef,
        arabic: &str,
        narration: Narration<'_>,
        resources: &mut BuildResources,
    ) -> anyhow::Result<AudioTrack> {
        if let Narration::Reciter(reciter) = narration {
            match self.recitation(verse_ref, reciter, resources).await {
                Ok(track) => return Ok(track),
                Err(err) => warn!("Recitation by {} unavailable: {:#}", reciter.name, err),
            }
        }

        info!("Using synthetic voice");
        self.synthetic(arabic, resources)
            .await
            .context("No audio could be obtained")
    }

    async fn recitation(
        &self,
        verse_ref: &VerseRef,
        reciter: &Reciter,
        resources: &mut BuildResources,
    ) -> anyhow::Result<AudioTrack> {
        let mut segments = Vec::with_capacity(verse_ref.verse_count());
        for verse in verse_ref.verses() {
            let path = self.download_verse(verse_ref.surah, verse, reciter, resources).await?;
            let duration = probe_duration(&path)?;
            segments.push(AudioSegment { path, duration });
        }
        Ok(AudioTrack {
            segments,
            gap: self.gap,
            synthetic: false,
        })
    }

    async fn download_verse(
        &self,
        surah: u16,
        verse: u16,
        reciter: &Reciter,
        resources: &mut BuildResources,
    ) -> anyhow::Result<PathBuf> {
        let file_name = recitation_file_name(surah, verse);
        let dest = resources.register(
            self.temp_dir
                .join(format!("recitation_{}_{}_{}.mp3", reciter.id, surah, verse)),
        );

        let mut last_error = None;
        for base in reciter.sources {
            let url = format!("{}{}", base, file_name);
            match self
                .http
                .download(&url, &dest, &format!("{} {}:{}", reciter.id, surah, verse))
                .await
            {
                Ok(bytes) => {
                    info!("Downloaded {} ({} KiB)", file_name, bytes / 1024);
                    return Ok(dest);
                }
                Err(err) => {
                    warn!("{}", err);
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err).with_context(|| format!("No source has {}:{}", surah, verse)),
            None => anyhow::bail!("Reciter {} has no sources", reciter.id),
        }
    }

    async fn synthetic(&self, arabic: &str, resources: &mut BuildResources) -> anyhow::Result<AudioTrack> {
        let ai = self
            .ai
            .ok_or(crate::http::FetchError::Unconfigured("OpenAI API key"))?;
        let path = resources.register(
            self.temp_dir
                .join(format!("synthetic_{}.mp3", Local::now().format("%Y%m%d_%H%M%S_%3f"))),
        );
        ai.speech(arabic, self.synthetic_voice, &path).await?;
        let duration = probe_duration(&path)?;
        Ok(AudioTrack {
            segments: vec![AudioSegment { path, duration }],
            gap: 0.0,
            synthetic: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(durations: &[f64], synthetic: bool) -> AudioTrack {
        AudioTrack {
            segments: durations
                .iter()
                .enumerate()
                .map(|(i, &duration)| AudioSegment {
                    path: PathBuf::from(format!("/tmp/seg{}.mp3", i)),
                    duration,
                })
                .collect(),
            gap: 0.3,
            synthetic,
        }
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(recitation_file_name(1, 2), "001002.mp3");
        assert_eq!(recitation_file_name(112, 4), "112004.mp3");
    }

    #[test]
    fn reciters_resolve_by_id() {
        assert_eq!(find_reciter("Husary").map(|r| r.name), Some("Mahmoud Khalil Al-Husary"));
        assert!(find_reciter("unknown").is_none());
        assert!(RECITERS.iter().all(|r| r.sources[1].contains("64kbps")));
    }

    #[test]
    fn range_duration_includes_gaps() {
        let track = track(&[4.0, 5.0, 6.0], false);
        assert!((track.duration() - 15.6).abs() < 1e-9);
        assert!((self::track(&[4.0], false).duration() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn single_segment_spec_only_normalizes() {
        assert_eq!(
            track(&[3.0], false).filter_spec(),
            "[in]aresample=44100,aformat=sample_fmts=fltp:channel_layouts=stereo[out]"
        );
    }

    #[test]
    fn range_spec_pads_all_but_last_and_concatenates() {
        let spec = track(&[3.0, 4.0], false).filter_spec();
        let chains: Vec<&str> = spec.split(';').collect();
        assert_eq!(chains.len(), 3);
        assert!(chains[0].starts_with("[in]aresample") && chains[0].ends_with("apad=pad_dur=0.3[a0]"));
        assert!(chains[1].starts_with(r"amovie=filename=\'/tmp/seg1.mp3\',"));
        assert!(!chains[1].contains("apad"));
        assert_eq!(chains[2], "[a0][a1]concat=n=2:v=0:a=1[out]");
    }

    #[test]
    fn synthetic_spec_fades_both_ends() {
        let spec = track(&[6.0], true).filter_spec();
        assert!(spec.contains("afade=t=in:st=0:d=0.5"));
        assert!(spec.contains("afade=t=out:st=5.500:d=0.5"));
    }

    #[test]
    fn filter_paths_escape_separators() {
        assert_eq!(escape_filter_path(Path::new("C:\\a b.mp3")), r"\'C:\\a b.mp3\'");
        assert_eq!(escape_filter_path(Path::new("it's,x")), r"\'it\'\\\'\'s\,x\'");
    }
}
