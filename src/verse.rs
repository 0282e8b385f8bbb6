use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub(crate) const SURAH_COUNT: u16 = 114;
pub(crate) const BISMILLAH: &str = "بِسْمِ اللَّهِ الرَّحْمَٰنِ الرَّحِيمِ";
pub(crate) const BISMILLAH_GLOSS: &str = "In the name of Allah, the Most Gracious, the Most Merciful";
const NO_BISMILLAH_SURAH: &str = "Tawbah";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReferenceError {
    #[error("Malformed verse reference `{0}`, expected `surah:verse` or `surah:start-end`")]
    Malformed(String),
    #[error("Surah {0} out of range, must be 1-{SURAH_COUNT}")]
    SurahOutOfRange(u16),
    #[error("Verse numbers start at 1, got {0}")]
    VerseOutOfRange(u16),
    #[error("Verse range `{0}-{1}` ends before it starts")]
    InvertedRange(u16, u16),
    #[error("Invalid verse record `{0}`: {1}")]
    InvalidRecord(String, String),
    #[error("Name `{0}` has no usable filename characters")]
    InvalidFilename(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct VerseRef {
    pub surah: u16,
    pub start: u16,
    pub end: u16,
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,3}):(\d{1,3})(?:-(\d{1,3}))?$").expect("static reference pattern")
    })
}

impl VerseRef {
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let trimmed = reference.trim();
        let captures = reference_pattern()
            .captures(trimmed)
            .ok_or_else(|| ReferenceError::Malformed(reference.to_owned()))?;

        let number = |idx: usize| -> Result<Option<u16>, ReferenceError> {
            captures
                .get(idx)
                .map(|m| m.as_str().parse::<u16>())
                .transpose()
                .map_err(|_| ReferenceError::Malformed(reference.to_owned()))
        };

        let surah = number(1)?.ok_or_else(|| ReferenceError::Malformed(reference.to_owned()))?;
        let start = number(2)?.ok_or_else(|| ReferenceError::Malformed(reference.to_owned()))?;
        let end = number(3)?.unwrap_or(start);

        if !(1..=SURAH_COUNT).contains(&surah) {
            return Err(ReferenceError::SurahOutOfRange(surah));
        }
        if start == 0 {
            return Err(ReferenceError::VerseOutOfRange(start));
        }
        if end < start {
            return Err(ReferenceError::InvertedRange(start, end));
        }

        Ok(Self { surah, start, end })
    }

    pub fn is_range(&self) -> bool {
        self.end != self.start
    }

    pub fn verses(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    pub fn verse_count(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// "255" for a single verse, "1-7" for a range.
    pub fn label(&self) -> String {
        if self.is_range() {
            format!("{}-{}", self.start, self.end)
        } else {
            self.start.to_string()
        }
    }

    pub fn key_for(&self, verse: u16) -> String {
        format!("{}:{}", self.surah, verse)
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.surah, self.label())
    }
}

impl FromStr for VerseRef {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Verse {
    #[serde(default)]
    pub reference: String,
    pub surah: String,
    #[serde(rename = "verse")]
    pub verse_label: String,
    #[serde(rename = "arabic")]
    pub arabic_text: String,
    #[serde(rename = "translation", default)]
    pub translation_text: String,
    #[serde(rename = "translator", default)]
    pub translator_name: String,
    #[serde(default = "default_language")]
    pub translation_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transliteration: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "added_date", alias = "fetched_date")]
    pub added: NaiveDateTime,
}

fn default_language() -> String {
    "en".to_owned()
}

impl Verse {
    pub fn verse_ref(&self) -> Result<VerseRef, ReferenceError> {
        VerseRef::parse(&self.reference)
    }

    pub fn validate(&self) -> Result<VerseRef, ReferenceError> {
        let verse_ref = self.verse_ref()?;
        let invalid = |why: &str| ReferenceError::InvalidRecord(self.reference.clone(), why.to_owned());

        if self.arabic_text.trim().is_empty() {
            return Err(invalid("arabic text is empty"));
        }
        if self.surah.trim().is_empty() {
            return Err(invalid("surah name is empty"));
        }
        if self.verse_label != verse_ref.label() {
            return Err(invalid(&format!(
                "verse label `{}` does not match reference",
                self.verse_label
            )));
        }
        Ok(verse_ref)
    }

    pub fn display_name(&self) -> String {
        format!("{} - Verse {}", self.surah, self.verse_label)
    }
}

/// The opening Bismillah card belongs to the first verse of every surah except At-Tawbah.
pub(crate) fn should_show_title_card(verse: &Verse) -> bool {
    verse.verse_label == "1" && !verse.surah.contains(NO_BISMILLAH_SURAH)
}

pub(crate) fn sanitize_filename(name: &str) -> Result<String, ReferenceError> {
    let cleaned: String = name
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_owned();
    if cleaned.is_empty() {
        return Err(ReferenceError::InvalidFilename(name.to_owned()));
    }
    Ok(cleaned)
}

pub(crate) fn output_file_name(verse: &Verse, timestamp: NaiveDateTime) -> Result<String, ReferenceError> {
    Ok(format!(
        "Quran_{}_{}_{}_{}.mp4",
        sanitize_filename(&verse.surah)?,
        sanitize_filename(&verse.verse_label)?,
        verse.translation_language.to_uppercase(),
        timestamp.format("%Y%m%d_%H%M%S")
    ))
}

#[cfg(test)]
pub(crate) fn sample_verse(reference: &str, surah: &str, arabic: &str, translation: &str) -> Verse {
    let verse_ref = VerseRef::parse(reference).unwrap();
    Verse {
        reference: reference.to_owned(),
        surah: surah.to_owned(),
        verse_label: verse_ref.label(),
        arabic_text: arabic.to_owned(),
        translation_text: translation.to_owned(),
        translator_name: "Saheeh International".to_owned(),
        translation_language: "en".to_owned(),
        transliteration: None,
        verified: true,
        source: "test".to_owned(),
        added: chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap(),
    }
}
