use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, CreateImageRequestArgs,
    CreateSpeechRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize, SpeechModel, Voice,
};
use async_openai::Client;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::config::Settings;

const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const SPEECH_TIMEOUT: Duration = Duration::from_secs(120);
const IMAGE_TIMEOUT: Duration = Duration::from_secs(180);

const TRANSLATOR_ROLE: &str =
    "You are an expert Quran translator with deep knowledge of Islamic scripture.";

/// Thin wrapper over the OpenAI endpoints used for fallbacks.
#[derive(Clone)]
pub(crate) struct OpenAi {
    client: Client<OpenAIConfig>,
}

impl OpenAi {
    /// `None` when no API key is configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let key = settings.api.openai_key.as_deref()?;
        Some(Self {
            client: Client::with_config(OpenAIConfig::new().with_api_key(key)),
        })
    }

    pub async fn translate(&self, arabic: &str, language: &str, verse_label: &str) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model("gpt-4o-mini")
            .max_tokens(800_u32)
            .temperature(0.3)
            .messages([
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(TRANSLATOR_ROLE)
                        .build()?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(translation_prompt(arabic, language, verse_label))
                        .build()?,
                ),
            ])
            .build()?;

        let response = tokio::time::timeout(CHAT_TIMEOUT, self.client.chat().create(request)).await??;
        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(anyhow::anyhow!("No content in response from OpenAI"))?;
        let text = text.trim();
        anyhow::ensure!(!text.is_empty(), "OpenAI returned an empty translation");
        Ok(text.to_owned())
    }

    pub async fn speech(&self, text: &str, voice: &str, output_path: &Path) -> anyhow::Result<()> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .voice(voice_named(voice))
            .model(SpeechModel::Tts1Hd)
            .build()?;

        let response = tokio::time::timeout(SPEECH_TIMEOUT, self.client.audio().speech(request)).await??;
        response
            .save(output_path)
            .await
            .with_context(|| format!("Failed to save speech to {}", output_path.display()))?;
        Ok(())
    }

    /// Generates one portrait image and returns its encoded bytes.
    pub async fn portrait_image(&self, prompt: &str) -> anyhow::Result<Vec<u8>> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(ImageModel::DallE3)
            .size(ImageSize::S1024x1792)
            .response_format(ImageResponseFormat::B64Json)
            .n(1)
            .build()?;

        let response = tokio::time::timeout(IMAGE_TIMEOUT, self.client.images().create(request)).await??;
        let image = response
            .data
            .first()
            .ok_or(anyhow::anyhow!("No image in response from OpenAI"))?;
        match image.as_ref() {
            Image::B64Json { b64_json, .. } => BASE64_STANDARD
                .decode(b64_json.as_bytes())
                .context("Invalid base64 image from OpenAI"),
            Image::Url { .. } => anyhow::bail!("OpenAI returned a URL instead of image data"),
        }
    }
}

pub(crate) fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "de" => "German",
        "bs" => "Bosnian",
        "sq" => "Albanian",
        "ar" => "Arabic",
        "fr" => "French",
        "es" => "Spanish",
        "tr" => "Turkish",
        other => other,
    }
}

fn translation_prompt(arabic: &str, language: &str, verse_label: &str) -> String {
    let language = language_name(language);
    format!(
        "Translate this Quranic verse from Arabic to {language}:\n\n\
         Arabic: {arabic}\n\
         Verse: {verse_label}\n\n\
         Requirements:\n\
         1. Provide an accurate, respectful translation\n\
         2. Preserve the meaning and eloquence\n\
         3. Use appropriate Islamic terminology\n\
         4. Make it clear and understandable\n\
         5. Provide ONLY the translation, no explanations or notes\n\n\
         Translation in {language}:"
    )
}

fn voice_named(name: &str) -> Voice {
    match name.to_ascii_lowercase().as_str() {
        "alloy" => Voice::Alloy,
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Onyx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_target_language() {
        let prompt = translation_prompt("قُلْ هُوَ", "de", "112:1");
        assert!(prompt.contains("from Arabic to German"));
        assert!(prompt.ends_with("Translation in German:"));
        assert!(prompt.contains("Verse: 112:1"));
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(language_name("ur"), "ur");
        assert_eq!(language_name("sq"), "Albanian");
    }

    #[test]
    fn missing_key_disables_client() {
        let mut settings = Settings::default();
        settings.api.openai_key = None;
        assert!(OpenAi::from_settings(&settings).is_none());
        settings.api.openai_key = Some("sk-test".to_owned());
        assert!(OpenAi::from_settings(&settings).is_some());
    }

    #[test]
    fn voices_default_to_onyx() {
        assert!(matches!(voice_named("Nova"), Voice::Nova));
        assert!(matches!(voice_named("unknown"), Voice::Onyx));
    }
}
