use std::fmt;

use chrono::NaiveDateTime;
use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VisualPreset {
    pub name: &'static str,
    pub prompt: &'static str,
    pub variations: [&'static str; 4],
    pub gradient: [[u8; 3]; 3],
    pub overlay_opacity: f32,
    pub text_color: [u8; 3],
    pub accent_color: [u8; 3],
    pub vignette: bool,
    pub particles: bool,
    pub category: &'static str,
    pub pexels_query: &'static str,
    pub best_for: [&'static str; 4],
    pub keywords: &'static [&'static str],
}

impl fmt::Display for VisualPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

const WHITE: [u8; 3] = [255, 255, 255];
const GOLD: [u8; 3] = [255, 215, 0];

/// Ordered: theme-score ties resolve to the earlier entry.
pub(crate) static PRESETS: [VisualPreset; 8] = [
    VisualPreset {
        name: "cosmic_nebula",
        prompt: "vast cosmic nebula, stars and galaxies, purple and blue space, divine creation, photorealistic, no text",
        variations: [
            "spiral galaxy with vibrant nebula clouds",
            "cosmic dust forming celestial patterns",
            "stellar nursery with newborn stars",
            "infinite universe with swirling galaxies",
        ],
        gradient: [[15, 5, 40], [50, 15, 80], [90, 30, 120]],
        overlay_opacity: 0.25,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: true,
        category: "space",
        pexels_query: "space nebula galaxy stars",
        best_for: ["creation", "power", "majesty", "signs"],
        keywords: &["creation", "heavens", "universe", "stars", "sky", "signs", "planets", "galaxies", "cosmos"],
    },
    VisualPreset {
        name: "aurora_sky",
        prompt: "aurora borealis northern lights, vibrant green and purple sky, arctic landscape, photorealistic, no text",
        variations: [
            "dancing aurora lights over snow-covered mountains",
            "vibrant northern lights reflected on frozen lake",
            "celestial aurora display with starry background",
            "mystical polar lights illuminating night sky",
        ],
        gradient: [[20, 30, 70], [40, 60, 120], [60, 90, 170]],
        overlay_opacity: 0.25,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: true,
        category: "nature",
        pexels_query: "aurora northern lights sky",
        best_for: ["wonder", "beauty", "signs", "night"],
        keywords: &["light", "guidance", "path", "straight", "guide", "truth", "enlighten", "wisdom"],
    },
    VisualPreset {
        name: "ocean_depths",
        prompt: "deep ocean underwater scene, rays of light through water, peaceful blue depths, photorealistic, no text",
        variations: [
            "underwater cathedral of light beams",
            "serene ocean depths with floating particles",
            "mystical underwater world with bioluminescence",
            "tranquil sea floor with dancing light rays",
        ],
        gradient: [[5, 30, 60], [15, 50, 100], [30, 70, 140]],
        overlay_opacity: 0.3,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: true,
        category: "water",
        pexels_query: "underwater ocean deep blue",
        best_for: ["mercy", "depth", "mystery", "tranquility"],
        keywords: &["ocean", "sea", "water", "rain", "river", "waves", "ship", "sail", "depths"],
    },
    VisualPreset {
        name: "golden_sunset",
        prompt: "beautiful golden sunset over landscape, warm orange and pink sky, peaceful evening, photorealistic, no text",
        variations: [
            "sunset over mountain peaks with golden clouds",
            "serene sunset reflecting on calm waters",
            "desert sunset with dramatic sky colors",
            "countryside sunset with silhouetted trees",
        ],
        gradient: [[60, 30, 20], [100, 60, 40], [140, 90, 60]],
        overlay_opacity: 0.25,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: false,
        category: "nature",
        pexels_query: "golden sunset sky beautiful",
        best_for: ["gratitude", "prayer", "evening", "peace"],
        keywords: &["prayer", "worship", "prostrate", "pray", "salah", "bow", "kneel", "devotion"],
    },
    VisualPreset {
        name: "midnight_forest",
        prompt: "majestic forest at midnight, moonlight through trees, peaceful Islamic scene, deep blue and purple sky, photorealistic, high quality, no text",
        variations: [
            "enchanted forest at night with moonbeams and mist",
            "mystical woodland under starry sky with ethereal glow",
            "serene forest path illuminated by soft moonlight",
            "ancient trees silhouetted against midnight blue sky",
        ],
        gradient: [[10, 25, 45], [25, 40, 70], [40, 55, 95]],
        overlay_opacity: 0.15,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: true,
        category: "nature",
        pexels_query: "dark forest night moonlight",
        best_for: ["peace", "reflection", "night", "contemplation"],
        keywords: &["night", "darkness", "moon", "sleep", "quiet", "rest", "peace", "tranquil"],
    },
    VisualPreset {
        name: "mountain_sunrise",
        prompt: "majestic mountain sunrise, first light on peaks, morning mist, photorealistic, no text",
        variations: [
            "alpine sunrise with golden light on snow peaks",
            "mountain dawn with layers of morning mist",
            "sunrise breaking through mountain clouds",
            "first light illuminating mountain ranges",
        ],
        gradient: [[40, 35, 50], [80, 70, 100], [120, 100, 150]],
        overlay_opacity: 0.25,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: false,
        category: "nature",
        pexels_query: "mountain sunrise dawn morning",
        best_for: ["hope", "new beginning", "strength", "morning"],
        keywords: &["mountain", "earth", "nature", "creation", "firm", "solid", "stable", "morning"],
    },
    VisualPreset {
        name: "grand_mosque",
        prompt: "beautiful mosque interior, ornate Islamic architecture, warm lighting, geometric patterns, photorealistic, no text",
        variations: [
            "grand mosque with intricate tile work",
            "peaceful mosque courtyard with arches",
            "mosque prayer hall with beautiful carpets",
            "Islamic architecture with geometric patterns",
        ],
        gradient: [[25, 30, 50], [45, 50, 80], [65, 70, 110]],
        overlay_opacity: 0.3,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: false,
        category: "spiritual",
        pexels_query: "mosque islamic architecture beautiful",
        best_for: ["worship", "prayer", "devotion", "faith"],
        keywords: &["mosque", "sacred", "holy", "prayer", "worship", "allah", "house", "kaaba", "mecca"],
    },
    VisualPreset {
        name: "desert_dunes",
        prompt: "golden desert sand dunes at sunset, Arabian landscape, warm tones, photorealistic, no text",
        variations: [
            "vast sahara dunes with windswept patterns",
            "desert sunset with golden sand waves",
            "endless dunes under dramatic sky",
            "Arabian desert with pristine sand formations",
        ],
        gradient: [[80, 60, 40], [120, 90, 60], [160, 120, 80]],
        overlay_opacity: 0.2,
        text_color: WHITE,
        accent_color: GOLD,
        vignette: true,
        particles: true,
        category: "nature",
        pexels_query: "desert dunes golden sunset",
        best_for: ["patience", "journey", "strength", "faith"],
        keywords: &["desert", "journey", "travel", "patience", "test", "trial", "perseverance", "sand"],
    },
];

const PROMPT_FLOURISHES: [&str; 9] = [
    "ultra high definition 8K quality",
    "professional cinematic lighting",
    "award-winning photography",
    "masterpiece composition",
    "breathtaking atmosphere",
    "divine peaceful energy",
    "spiritual serenity",
    "heavenly ambiance",
    "sacred harmony",
];

const PROMPT_EXCLUSIONS: &str = "photorealistic, extremely detailed, no text, no watermarks, no people faces";

pub(crate) fn find(name: &str) -> Option<&'static VisualPreset> {
    let name = name.trim().to_lowercase();
    PRESETS.iter().find(|p| p.name == name)
}

pub(crate) fn random_preset<R: Rng + ?Sized>(rng: &mut R) -> &'static VisualPreset {
    &PRESETS[rng.gen_range(0..PRESETS.len())]
}

/// +2 for every keyword found anywhere in the lower-cased translation, +3 once if any keyword
/// appears as a space-delimited word.
pub(crate) fn theme_score(preset: &VisualPreset, translation: &str) -> u32 {
    let text = translation.to_lowercase();
    let padded = format!(" {} ", text);
    let substring_hits = preset.keywords.iter().filter(|k| text.contains(*k)).count() as u32;
    let whole_word = preset
        .keywords
        .iter()
        .any(|k| padded.contains(&format!(" {} ", k)));
    substring_hits * 2 + if whole_word { 3 } else { 0 }
}

pub(crate) fn select_by_theme<R: Rng + ?Sized>(translation: &str, rng: &mut R) -> &'static VisualPreset {
    let mut best: Option<(&'static VisualPreset, u32)> = None;
    for preset in PRESETS.iter() {
        let score = theme_score(preset, translation);
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((preset, score));
        }
    }
    match best {
        Some((preset, score)) => {
            info!("Theme match selected preset '{}' (score {})", preset.name, score);
            preset
        }
        None => {
            let preset = random_preset(rng);
            info!("No theme match; randomly selected preset '{}'", preset.name);
            preset
        }
    }
}

/// Background prompt from one seeded variation plus three distinct flourishes.
pub(crate) fn background_prompt<R: Rng + ?Sized>(
    preset: &VisualPreset,
    rng: &mut R,
    now: NaiveDateTime,
) -> String {
    let variation = preset.variations.choose(rng).copied().unwrap_or(preset.prompt);
    let flourishes: Vec<&str> = PROMPT_FLOURISHES.choose_multiple(rng, 3).copied().collect();
    format!(
        "{}, style variation {}, {}, {}",
        variation,
        now.format("%H%M%S"),
        flourishes.join(", "),
        PROMPT_EXCLUSIONS
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum PresetStyle {
    /// Match the translation's themes.
    Auto,
    /// Use one preset for every video.
    Fixed,
    /// Cycle through the catalogue.
    Rotate,
    Random,
}

pub(crate) struct PresetPicker {
    style: PresetStyle,
    fixed: Option<&'static VisualPreset>,
    cursor: usize,
}

impl PresetPicker {
    pub fn new(style: PresetStyle, fixed: Option<&'static VisualPreset>) -> Self {
        Self {
            style,
            fixed,
            cursor: 0,
        }
    }

    pub fn next<R: Rng + ?Sized>(&mut self, translation: &str, rng: &mut R) -> &'static VisualPreset {
        match (self.style, self.fixed) {
            (PresetStyle::Fixed, Some(preset)) => preset,
            (PresetStyle::Rotate, _) => {
                let preset = &PRESETS[self.cursor % PRESETS.len()];
                self.cursor += 1;
                preset
            }
            (PresetStyle::Random, _) => random_preset(rng),
            _ => select_by_theme(translation, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn preset(name: &str) -> &'static VisualPreset {
        find(name).unwrap()
    }

    #[test]
    fn scoring_counts_substrings_and_one_whole_word_bonus() {
        let ocean = preset("ocean_depths");
        assert_eq!(theme_score(ocean, "The ship sailed on the sea and the waves"), 4 * 2 + 3);
        assert_eq!(theme_score(ocean, "seashore"), 2);
        assert_eq!(theme_score(ocean, "Nothing relevant"), 0);
    }

    #[test]
    fn theme_selection_prefers_highest_score() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(select_by_theme("Establish prayer", &mut rng).name, "golden_sunset");
        assert_eq!(
            select_by_theme("The ship sailed on the sea and the waves", &mut rng).name,
            "ocean_depths"
        );
    }

    #[test]
    fn ties_resolve_to_catalogue_order() {
        let mut rng = StdRng::seed_from_u64(1);
        // cosmic_nebula and ocean_depths both score 5
        let text = "And We send down rain from the sky";
        assert_eq!(theme_score(preset("cosmic_nebula"), text), 5);
        assert_eq!(theme_score(preset("ocean_depths"), text), 5);
        assert_eq!(select_by_theme(text, &mut rng).name, "cosmic_nebula");
    }

    #[test]
    fn unmatched_translation_falls_back_to_seeded_choice() {
        let first = select_by_theme("Say: He is One", &mut StdRng::seed_from_u64(42));
        let second = select_by_theme("Say: He is One", &mut StdRng::seed_from_u64(42));
        assert_eq!(first.name, second.name);
    }

    #[test]
    fn prompt_is_seeded_and_well_formed() {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 8, 7)
            .unwrap();
        let nebula = preset("cosmic_nebula");
        let a = background_prompt(nebula, &mut StdRng::seed_from_u64(3), now);
        let b = background_prompt(nebula, &mut StdRng::seed_from_u64(3), now);
        assert_eq!(a, b);
        assert!(nebula.variations.iter().any(|v| a.starts_with(v)));
        assert!(a.contains("style variation 090807"));
        assert!(a.ends_with(PROMPT_EXCLUSIONS));
        let flourishes = PROMPT_FLOURISHES.iter().filter(|f| a.contains(*f)).count();
        assert_eq!(flourishes, 3);
    }

    #[test]
    fn rotate_cycles_the_catalogue() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut picker = PresetPicker::new(PresetStyle::Rotate, None);
        let names: Vec<&str> = (0..9).map(|_| picker.next("", &mut rng).name).collect();
        assert_eq!(names[0], "cosmic_nebula");
        assert_eq!(names[7], "desert_dunes");
        assert_eq!(names[8], "cosmic_nebula");
    }

    #[test]
    fn fixed_style_ignores_translation() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut picker = PresetPicker::new(PresetStyle::Fixed, find("grand_mosque"));
        assert_eq!(picker.next("the sea and the waves", &mut rng).name, "grand_mosque");
        assert!(find("unknown").is_none());
        assert_eq!(find(" Desert_Dunes ").unwrap().name, "desert_dunes");
    }
}
