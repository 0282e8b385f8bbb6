use std::sync::OnceLock;

use anyhow::Context;
use chrono::Local;
use log::{info, warn};
use regex::Regex;
use serde::Deserialize;

use crate::ai::{language_name, OpenAi};
use crate::http::{FetchError, HttpClient};
use crate::transliteration::transliterate;
use crate::verse::{Verse, VerseRef};

const VERSES_URL: &str = "https://api.quran.com/api/v4/verses/by_key";
const CHAPTERS_URL: &str = "https://api.quran.com/api/v4/chapters";
const TRANSLATIONS_URL: &str = "https://api.qurancdn.com/api/qdc/verses/by_key";
const SOURCE: &str = "Quran.com API";

pub(crate) const SUPPORTED_LANGUAGES: [&str; 8] = ["en", "de", "bs", "sq", "ar", "fr", "es", "tr"];

/// Catalogued translation ids per language, in preference order.
fn catalogue(language: &str) -> &'static [(u32, &'static str)] {
    match language {
        "en" => &[
            (131, "Dr. Mustafa Khattab, the Clear Quran"),
            (85, "Saheeh International"),
            (95, "Yusuf Ali"),
            (20, "Pickthall"),
            (203, "Taqi Usmani"),
        ],
        "de" => &[(27, "Frank Bubenheim & Nadeem Elyas")],
        "bs" => &[(25, "Muhamed Mehanović")],
        "sq" => &[(89, "Efendi Nahi")],
        "fr" => &[(31, "King Fahad Quran Complex")],
        "es" => &[(83, "Spanish Translation")],
        "tr" => &[(77, "Turkish Translation")],
        _ => &[],
    }
}

#[derive(Deserialize)]
struct VerseEnvelope {
    verse: VerseBody,
}

#[derive(Deserialize)]
struct VerseBody {
    #[serde(default)]
    text_uthmani: String,
    #[serde(default)]
    translations: Vec<TranslationBody>,
}

#[derive(Deserialize)]
struct TranslationBody {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ChapterEnvelope {
    chapter: ChapterBody,
}

#[derive(Deserialize)]
struct ChapterBody {
    name_simple: String,
}

fn strip_html(text: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("static tag pattern"));
    tags.replace_all(text, "").trim().to_owned()
}

/// Fetches verse text and translations from Quran.com, falling back to the
/// chat model when no catalogued translation answers.
pub(crate) struct QuranApi {
    http: HttpClient,
    ai: Option<OpenAi>,
}

impl QuranApi {
    pub fn new(http: HttpClient, ai: Option<OpenAi>) -> Self {
        Self { http, ai }
    }

    pub async fn fetch_verse(&self, verse_ref: &VerseRef, language: &str) -> anyhow::Result<Verse> {
        anyhow::ensure!(
            SUPPORTED_LANGUAGES.contains(&language),
            "Unsupported language `{}` (supported: {})",
            language,
            SUPPORTED_LANGUAGES.join(", ")
        );
        info!("Fetching verse {}", verse_ref);

        let arabic = self
            .arabic_text(verse_ref)
            .await
            .with_context(|| format!("Failed to fetch verse {}", verse_ref))?;
        let surah = self.surah_name(verse_ref.surah).await;
        let display = format!("{} - Verse {}", surah, verse_ref.label());
        let (translation, translator) = self.translation(verse_ref, &arabic, language, &display).await;

        let verse = Verse {
            reference: verse_ref.to_string(),
            surah,
            verse_label: verse_ref.label(),
            transliteration: Some(transliterate(&arabic)),
            arabic_text: arabic,
            translation_text: translation,
            translator_name: translator,
            translation_language: language.to_owned(),
            verified: true,
            source: SOURCE.to_owned(),
            added: Local::now().naive_local(),
        };
        verse.validate()?;
        Ok(verse)
    }

    async fn arabic_text(&self, verse_ref: &VerseRef) -> Result<String, FetchError> {
        let mut texts = Vec::with_capacity(verse_ref.verse_count());
        for verse in verse_ref.verses() {
            let key = verse_ref.key_for(verse);
            let url = format!("{}/{}", VERSES_URL, key);
            let body: VerseEnvelope = self
                .http
                .get_json(&url, &[("language", "en"), ("fields", "text_uthmani,verse_key")], &[])
                .await?;
            let text = body.verse.text_uthmani.trim().to_owned();
            if text.is_empty() {
                return Err(FetchError::Decode(url, "empty text_uthmani".to_owned()));
            }
            texts.push(text);
        }
        Ok(texts.join(" "))
    }

    async fn surah_name(&self, surah: u16) -> String {
        let url = format!("{}/{}", CHAPTERS_URL, surah);
        match self.http.get_json::<ChapterEnvelope>(&url, &[], &[]).await {
            Ok(body) if !body.chapter.name_simple.trim().is_empty() => body.chapter.name_simple,
            Ok(_) => format!("Surah {}", surah),
            Err(err) => {
                warn!("Chapter name unavailable: {}", err);
                format!("Surah {}", surah)
            }
        }
    }

    async fn translation(
        &self,
        verse_ref: &VerseRef,
        arabic: &str,
        language: &str,
        display: &str,
    ) -> (String, String) {
        for &(id, translator) in catalogue(language) {
            match self.catalogued_translation(verse_ref, id).await {
                Ok(text) => return (text, translator.to_owned()),
                Err(err) => warn!("Translation source {} failed: {:#}", id, err),
            }
        }

        if let Some(ai) = &self.ai {
            info!("Requesting AI translation to {}", language_name(language));
            match ai.translate(arabic, language, display).await {
                Ok(text) => return (text, format!("AI Translation to {}", language_name(language))),
                Err(err) => warn!("AI translation failed: {:#}", err),
            }
        }
        warn!("No translation available for {} in {}", verse_ref, language);
        ("Translation not available".to_owned(), "Unknown".to_owned())
    }

    async fn catalogued_translation(&self, verse_ref: &VerseRef, id: u32) -> anyhow::Result<String> {
        let id = id.to_string();
        let mut texts = Vec::with_capacity(verse_ref.verse_count());
        for verse in verse_ref.verses() {
            let url = format!("{}/{}", TRANSLATIONS_URL, verse_ref.key_for(verse));
            let body: VerseEnvelope = self.http.get_json(&url, &[("translations", id.as_str())], &[]).await?;
            let text = body
                .verse
                .translations
                .first()
                .map(|t| strip_html(&t.text))
                .unwrap_or_default();
            anyhow::ensure!(!text.is_empty(), "no translation text for {}", verse_ref.key_for(verse));
            texts.push(text);
        }
        Ok(texts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footnote_markup_is_removed() {
        assert_eq!(
            strip_html("Say, <i>\u{201c}He is Allah</i><sup foot_note=77>1</sup> the One\u{201d} "),
            "Say, \u{201c}He is Allah1 the One\u{201d}"
        );
    }

    #[test]
    fn english_prefers_clear_quran() {
        let ids: Vec<u32> = catalogue("en").iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![131, 85, 95, 20, 203]);
        assert!(catalogue("ar").is_empty());
        assert_eq!(catalogue("de")[0].0, 27);
    }

    #[test]
    fn verse_payloads_deserialize() {
        let body: VerseEnvelope = serde_json::from_str(
            r#"{"verse":{"id":6231,"verse_key":"112:1","text_uthmani":"قُلْ هُوَ ٱللَّهُ أَحَدٌ"}}"#,
        )
        .unwrap();
        assert_eq!(body.verse.text_uthmani, "قُلْ هُوَ ٱللَّهُ أَحَدٌ");
        assert!(body.verse.translations.is_empty());

        let body: VerseEnvelope = serde_json::from_str(
            r#"{"verse":{"translations":[{"id":1,"resource_id":85,"text":"Say, \"He is Allah, [who is] One,"}]}}"#,
        )
        .unwrap();
        assert_eq!(body.verse.translations[0].text, "Say, \"He is Allah, [who is] One,");

        let chapter: ChapterEnvelope =
            serde_json::from_str(r#"{"chapter":{"id":112,"name_simple":"Al-Ikhlas"}}"#).unwrap();
        assert_eq!(chapter.chapter.name_simple, "Al-Ikhlas");
    }
}
