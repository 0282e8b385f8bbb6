use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{info, warn};

use crate::verse::{ReferenceError, Verse, VerseRef};

const SEED_VERSES: &str = include_str!("../assets/seed_verses.json");

#[derive(thiserror::Error, Debug)]
pub(crate) enum StoreError {
    #[error("Failed to read verse database {0}: {1}")]
    Read(PathBuf, String),
    #[error("Failed to parse verse database {0}: {1}")]
    Parse(PathBuf, String),
    #[error("Failed to write verse database {0}: {1}")]
    Write(PathBuf, String),
    #[error("Rejected verse record: {0}")]
    Invalid(#[from] crate::verse::ReferenceError),
}

/// Flat reference -> verse JSON document. Every overwrite is preceded by a timestamped backup.
pub(crate) struct VerseStore {
    path: PathBuf,
    verses: BTreeMap<String, Verse>,
}

impl VerseStore {
    /// Opens the database, seeding it on first use. Unreadable files degrade to an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if !path.exists() {
            let verses = seed_verses();
            info!("Creating verse database with {} verified verses", verses.len());
            let store = Self { path, verses };
            if let Err(err) = store.persist() {
                warn!("{}", err);
            }
            return store;
        }

        let verses = match load_all(&path) {
            Ok(verses) => {
                info!("Loaded {} verses from {}", verses.len(), path.display());
                verses
            }
            Err(err) => {
                warn!("{}; continuing with an empty verse collection", err);
                BTreeMap::new()
            }
        };
        Self { path, verses }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, reference: &str) -> Option<&Verse> {
        self.verses.get(reference.trim())
    }

    pub fn all(&self) -> &BTreeMap<String, Verse> {
        &self.verses
    }

    pub fn len(&self) -> usize {
        self.verses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verses.is_empty()
    }

    /// Inserts the verse under its canonical reference and persists. The verse must
    /// describe `reference`. A failed write leaves the verse in memory and is returned
    /// for the caller to report.
    pub fn put(&mut self, reference: &str, mut verse: Verse) -> Result<(), StoreError> {
        if verse.reference.is_empty() {
            verse.reference = reference.trim().to_owned();
        }
        let verse_ref = keyed_ref(reference, &verse)?;
        let key = verse_ref.to_string();
        verse.reference = key.clone();
        self.verses.insert(key, verse);
        self.persist()
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        persist_all(&self.path, &self.verses)
    }
}

pub(crate) fn load_all(path: &Path) -> Result<BTreeMap<String, Verse>, StoreError> {
    let contents =
        fs::read_to_string(path).map_err(|e| StoreError::Read(path.to_owned(), e.to_string()))?;
    parse_records(&contents).map_err(|e| StoreError::Parse(path.to_owned(), e))
}

fn parse_records(contents: &str) -> Result<BTreeMap<String, Verse>, String> {
    let raw: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(contents).map_err(|e| e.to_string())?;

    let mut verses = BTreeMap::new();
    for (key, value) in raw {
        let mut verse: Verse = match serde_json::from_value(value) {
            Ok(verse) => verse,
            Err(err) => {
                warn!("Skipping malformed verse record `{}`: {}", key, err);
                continue;
            }
        };
        if verse.reference.is_empty() {
            verse.reference = key.clone();
        }
        match keyed_ref(&key, &verse) {
            Ok(verse_ref) => {
                let canonical = verse_ref.to_string();
                verse.reference = canonical.clone();
                if verses.insert(canonical, verse).is_some() {
                    warn!("Verse record `{}` duplicates an earlier key, keeping the later one", key);
                }
            }
            Err(err) => warn!("Skipping invalid verse record `{}`: {}", key, err),
        }
    }
    Ok(verses)
}

/// Validates `verse` and checks that it is the verse `key` names.
fn keyed_ref(key: &str, verse: &Verse) -> Result<VerseRef, ReferenceError> {
    let verse_ref = verse.validate()?;
    if VerseRef::parse(key)? != verse_ref {
        return Err(ReferenceError::InvalidRecord(
            key.trim().to_owned(),
            format!("record describes {}", verse_ref),
        ));
    }
    Ok(verse_ref)
}

pub(crate) fn persist_all(path: &Path, verses: &BTreeMap<String, Verse>) -> Result<(), StoreError> {
    let write_err = |e: String| StoreError::Write(path.to_owned(), e);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }

    if path.exists() {
        let backup = backup_path(path);
        match fs::copy(path, &backup) {
            Ok(_) => info!("Database backup written to {}", backup.display()),
            Err(err) => warn!("Could not back up {}: {}", path.display(), err),
        }
    }

    let json = serde_json::to_string_pretty(verses).map_err(|e| write_err(e.to_string()))?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, json).map_err(|e| write_err(e.to_string()))?;
    fs::rename(&staging, path).map_err(|e| {
        let _ = fs::remove_file(&staging);
        write_err(e.to_string())
    })?;
    Ok(())
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("quran_database_backup_{}.json", stamp))
}

fn seed_verses() -> BTreeMap<String, Verse> {
    match parse_records(SEED_VERSES) {
        Ok(mut verses) => {
            let now = Local::now().naive_local();
            for verse in verses.values_mut() {
                verse.added = now;
            }
            verses
        }
        Err(err) => {
            warn!("Bundled seed verses are unreadable: {}", err);
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verse::sample_verse;

    fn backups_in(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("quran_database_backup_")
            })
            .count()
    }

    #[test]
    fn first_open_seeds_verified_verses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quran_database.json");

        let store = VerseStore::open(&path);

        assert!(path.exists());
        assert_eq!(store.len(), 5);
        let fatiha = store.get("1:1-7").unwrap();
        assert_eq!(fatiha.surah, "Al-Fatiha");
        assert!(fatiha.verified);
        assert!(store.get("2:255").is_some());
    }

    #[test]
    fn put_then_reload_round_trips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "{}").unwrap();

        let mut verse = sample_verse(
            "94:5-6",
            "Ash-Sharh",
            "فَإِنَّ مَعَ ٱلْعُسْرِ يُسْرًا إِنَّ مَعَ ٱلْعُسْرِ يُسْرًا",
            "For indeed, with hardship [will be] ease.",
        );
        verse.transliteration = Some("Fa-inna maAAa alAAusri yusran.".to_owned());

        let mut store = VerseStore::open(&path);
        store.put("94:5-6", verse.clone()).unwrap();

        let reloaded = VerseStore::open(&path);
        assert_eq!(reloaded.get("94:5-6"), Some(&verse));
    }

    #[test]
    fn every_save_writes_a_new_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "{}").unwrap();

        let mut store = VerseStore::open(&path);
        store
            .put("2:255", sample_verse("2:255", "Al-Baqarah", "ٱللَّهُ", "Allah."))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .put("3:173", sample_verse("3:173", "Ali 'Imran", "ٱلَّذِينَ", "Those."))
            .unwrap();

        assert_eq!(backups_in(dir.path()), 2);
    }

    #[test]
    fn unparseable_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "not json at all").unwrap();

        let store = VerseStore::open(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_records_are_skipped_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(
            &path,
            r#"{
                "200:1": {"reference": "200:1", "surah": "X", "verse": "1", "arabic": "x", "added_date": "2024-01-01T00:00:00"},
                "2:1": {"surah": "Al-Baqarah"},
                "112:1-4": {"surah": "Al-Ikhlas", "verse": "1-4", "arabic": "قُلْ هُوَ ٱللَّهُ أَحَدٌ", "added_date": "2024-01-01T00:00:00"}
            }"#,
        )
        .unwrap();

        let store = VerseStore::open(&path);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("112:1-4").unwrap().reference, "112:1-4");
    }

    #[test]
    fn put_rejects_invalid_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "{}").unwrap();
        let mut store = VerseStore::open(&path);

        let mut verse = sample_verse("2:255", "Al-Baqarah", "ٱللَّهُ", "Allah.");
        verse.reference = "2:999-1".to_owned();
        assert!(matches!(
            store.put("2:999-1", verse),
            Err(StoreError::Invalid(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn records_stored_under_another_key_are_skipped_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(
            &path,
            r#"{
                "2:255": {"reference": "3:173", "surah": "Ali 'Imran", "verse": "173", "arabic": "ٱلَّذِينَ", "added_date": "2024-01-01T00:00:00"},
                " 94:5-6": {"reference": "94:5-6", "surah": "Ash-Sharh", "verse": "5-6", "arabic": "فَإِنَّ", "added_date": "2024-01-01T00:00:00"}
            }"#,
        )
        .unwrap();

        let mut store = VerseStore::open(&path);
        assert!(store.get("2:255").is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("94:5-6").unwrap().reference, "94:5-6");

        store
            .put("3:173", sample_verse("3:173", "Ali 'Imran", "ٱلَّذِينَ", "Those."))
            .unwrap();
        let copies = store.all().values().filter(|v| v.reference == "3:173").count();
        assert_eq!(copies, 1);
    }

    #[test]
    fn put_rejects_a_verse_for_another_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "{}").unwrap();
        let mut store = VerseStore::open(&path);

        let ayat_al_kursi = sample_verse("2:255", "Al-Baqarah", "ٱللَّهُ", "Allah.");
        assert!(matches!(
            store.put("112:1", ayat_al_kursi.clone()),
            Err(StoreError::Invalid(ReferenceError::InvalidRecord(..)))
        ));
        assert!(store.is_empty());

        store.put(" 2:255 ", ayat_al_kursi).unwrap();
        assert!(store.get("2:255").is_some());
    }
}
