mod ai;
mod audio;
mod background;
mod capture;
mod config;
mod http;
mod overlay;
mod paginate;
mod pipeline;
mod preset;
mod quran_api;
mod render;
mod store;
mod timeline;
mod timing;
mod transliteration;
mod verse;
mod video;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::ai::OpenAi;
use crate::audio::{find_reciter, Narration, RECITERS};
use crate::config::{Settings, DEFAULT_CONFIG_FILE};
use crate::http::HttpClient;
use crate::pipeline::{log_report, Pipeline};
use crate::preset::{PresetPicker, PresetStyle, VisualPreset, PRESETS};
use crate::quran_api::{QuranApi, SUPPORTED_LANGUAGES};
use crate::store::VerseStore;
use crate::verse::{Verse, VerseRef};

#[derive(Parser)]
#[command(name = "quran-reels")]
#[command(about = "Render vertical Quran recitation videos with paged text and translation", long_about = None)]
struct Cli {
    /// Settings file, written with defaults when missing.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Seed for preset choice, prompt variation and procedural backgrounds.
    #[arg(long)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct NarrationArgs {
    /// Reciter id, see `reciters`.
    #[arg(short, long, conflicts_with = "synthetic")]
    reciter: Option<String>,
    /// Skip recitations and use text-to-speech.
    #[arg(long)]
    synthetic: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build a video for one verse or range, fetching it first if it is not stored.
    Create {
        /// Verse reference such as 2:255 or 1:1-7.
        reference: String,
        #[command(flatten)]
        narration: NarrationArgs,
        #[arg(short, long)]
        preset: Option<String>,
        #[arg(short, long, default_value = "en")]
        language: String,
    },
    /// Fetch a verse and store it in the database.
    Add {
        reference: String,
        #[arg(short, long, default_value = "en")]
        language: String,
    },
    /// Print the stored verses.
    List,
    /// Build videos for stored verses, one after another.
    Batch {
        /// Only verses whose surah name contains this text.
        #[arg(long)]
        surah: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t = PresetStyle::Auto)]
        style: PresetStyle,
        #[arg(short, long)]
        preset: Option<String>,
        #[command(flatten)]
        narration: NarrationArgs,
    },
    Presets,
    Reciters,
}

fn choose_narration(args: &NarrationArgs, settings: &Settings) -> anyhow::Result<Narration<'static>> {
    if args.synthetic {
        return Ok(Narration::Synthetic);
    }
    let id: &str = args
        .reciter
        .as_deref()
        .unwrap_or(&settings.audio.default_reciter);
    find_reciter(id)
        .map(Narration::Reciter)
        .ok_or(anyhow::anyhow!("Unknown reciter `{}`, run `quran-reels reciters`", id))
}

fn preset_named(name: Option<&str>) -> anyhow::Result<Option<&'static VisualPreset>> {
    name.map(|name| {
        preset::find(name).ok_or(anyhow::anyhow!("Unknown preset `{}`, run `quran-reels presets`", name))
    })
    .transpose()
}

fn check_language(language: &str) -> anyhow::Result<()> {
    anyhow::ensure!(
        SUPPORTED_LANGUAGES.contains(&language),
        "Unsupported language `{}` (supported: {})",
        language,
        SUPPORTED_LANGUAGES.join(", ")
    );
    Ok(())
}

/// Returns the stored verse when it is in `language`, otherwise fetches and stores it.
async fn resolve_verse(
    store: &mut VerseStore,
    api: &QuranApi,
    verse_ref: &VerseRef,
    language: &str,
) -> anyhow::Result<Verse> {
    let key = verse_ref.to_string();
    if let Some(verse) = store.get(&key).filter(|v| v.translation_language == language) {
        info!("Using stored verse {}", verse.display_name());
        return Ok(verse.clone());
    }

    let verse = api.fetch_verse(verse_ref, language).await?;
    if let Err(err) = store.put(&key, verse.clone()) {
        warn!("{}", err);
    }
    Ok(verse)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    let cli = Cli::parse();
    let settings = Settings::load_from_path(&cli.config)?;
    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    match cli.command {
        Command::Create {
            reference,
            narration: narration_args,
            preset,
            language,
        } => {
            let verse_ref = VerseRef::parse(&reference)?;
            check_language(&language)?;
            let narration = choose_narration(&narration_args, &settings)?;
            let fixed = preset_named(preset.as_deref())?;
            let style = if fixed.is_some() {
                PresetStyle::Fixed
            } else {
                PresetStyle::Auto
            };

            let mut store = VerseStore::open(settings.paths.database_path());
            let mut pipeline = Pipeline::new(settings, rng)?;
            let verse = resolve_verse(&mut store, &pipeline.quran_api(), &verse_ref, &language).await?;
            let report = pipeline
                .build_video(&verse, &mut PresetPicker::new(style, fixed), narration)
                .await?;
            log_report(&report);
        }
        Command::Add { reference, language } => {
            let verse_ref = VerseRef::parse(&reference)?;
            check_language(&language)?;
            settings.ensure_directories()?;

            let mut store = VerseStore::open(settings.paths.database_path());
            let api = QuranApi::new(HttpClient::new(&settings.network)?, OpenAi::from_settings(&settings));
            match api.fetch_verse(&verse_ref, &language).await {
                Ok(verse) => {
                    let name = verse.display_name();
                    match store.put(&verse_ref.to_string(), verse) {
                        Ok(()) => info!("Stored {} in {}", name, store.path().display()),
                        Err(err) => warn!("{}", err),
                    }
                }
                Err(err) => error!("Could not add {}: {:#}", verse_ref, err),
            }
        }
        Command::List => {
            let store = VerseStore::open(settings.paths.database_path());
            if store.is_empty() {
                println!("No verses stored, add one with `quran-reels add <REFERENCE>`");
                return Ok(());
            }
            for (reference, verse) in store.all() {
                println!(
                    "{:<10} {} [{}]{}",
                    reference,
                    verse.display_name(),
                    verse.translation_language,
                    if verse.verified { "" } else { " (unverified)" }
                );
            }
            println!("{} verses in {}", store.len(), store.path().display());
        }
        Command::Batch {
            surah,
            limit,
            style,
            preset,
            narration: narration_args,
        } => {
            let narration = choose_narration(&narration_args, &settings)?;
            let fixed = preset_named(preset.as_deref())?;
            if style == PresetStyle::Fixed && fixed.is_none() {
                warn!("--style fixed without --preset, matching themes instead");
            }

            let store = VerseStore::open(settings.paths.database_path());
            let filter = surah.map(|s| s.to_lowercase());
            let verses: Vec<Verse> = store
                .all()
                .values()
                .filter(|v| {
                    filter
                        .as_deref()
                        .map_or(true, |f| v.surah.to_lowercase().contains(f))
                })
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            if verses.is_empty() {
                warn!("No stored verses match, nothing to build");
                return Ok(());
            }

            let mut pipeline = Pipeline::new(settings, rng)?;
            pipeline
                .batch(&verses, &mut PresetPicker::new(style, fixed), narration)
                .await;
        }
        Command::Presets => {
            for preset in &PRESETS {
                println!("{}", preset);
            }
        }
        Command::Reciters => {
            for reciter in &RECITERS {
                println!("{}", reciter);
            }
        }
    }

    Ok(())
}
