use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use log::{debug, info, warn};

use crate::config::{PageSettings, Settings};
use crate::overlay::{Fade, ImageSource, OverlayElement, OverlayKind, Position, ProgressBarStyle};
use crate::paginate::{self, FATIHA_REFERENCE};
use crate::preset::VisualPreset;
use crate::render::{OverlayPainter, RenderError, TextStyle};
use crate::timing::{self, DurationBounds, Page};
use crate::verse::{self, Verse, BISMILLAH, BISMILLAH_GLOSS};

const TITLE_CARD_MAX_SECS: f64 = 4.0;
const TITLE_CARD_FRACTION: f64 = 0.25;
const TITLE_CARD_FADE: f64 = 0.5;
const TITLE_ARABIC_SIZE: f32 = 72.0;
const TITLE_GLOSS_SIZE: f32 = 28.0;
const TITLE_GLOSS_Y: i32 = 1100;
const HEADER_SIZE: f32 = 40.0;
const INTERLUDE_SIZE: f32 = 48.0;
const INTERLUDE_Y: i32 = 1100;
const TRANSLATOR_SIZE: f32 = 28.0;
/// Long single-page Arabic wraps onto more lines, so the translation drops below it.
const LONG_ARABIC_CHARS: usize = 150;
const LONG_ARABIC_TRANSLATION_Y: i32 = 1150;
const PROGRESS_TRACK: [u8; 3] = [128, 128, 128];
const PROGRESS_TRACK_OPACITY: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisplayMode {
    SinglePage,
    MultiPage,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayMode::SinglePage => f.write_str("single-page"),
            DisplayMode::MultiPage => f.write_str("multi-page"),
        }
    }
}

/// Multi-page iff either text is longer (in characters) than its per-page limit.
pub(crate) fn select_mode(verse: &Verse, page: &PageSettings) -> DisplayMode {
    let arabic_len = verse.arabic_text.chars().count();
    let translation_len = verse.translation_text.chars().count();
    if arabic_len > page.max_chars_arabic || translation_len > page.max_chars_translation {
        DisplayMode::MultiPage
    } else {
        DisplayMode::SinglePage
    }
}

#[derive(Debug)]
pub(crate) struct DroppedElement {
    pub kind: OverlayKind,
    pub error: RenderError,
}

#[derive(Debug)]
pub(crate) struct Timeline {
    pub mode: DisplayMode,
    pub total: f64,
    pub pages: Vec<Page>,
    pub elements: Vec<OverlayElement>,
    pub dropped: Vec<DroppedElement>,
}

#[cfg(test)]
impl Timeline {
    pub fn of_kind(&self, kind: OverlayKind) -> impl Iterator<Item = &OverlayElement> {
        self.elements.iter().filter(move |e| e.kind == kind)
    }

    pub fn count(&self, kind: OverlayKind) -> usize {
        self.of_kind(kind).count()
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: f64,
    duration: f64,
    fade: Fade,
}

impl Span {
    fn new(start: f64, duration: f64) -> Self {
        Self {
            start,
            duration,
            fade: Fade::NONE,
        }
    }

    fn fade_in(mut self, secs: f64) -> Self {
        self.fade.fade_in = secs;
        self
    }

    fn fade_out(mut self, secs: f64) -> Self {
        self.fade.fade_out = secs;
        self
    }
}

/// Lays out every overlay for `verse` across `total` seconds. Elements whose bitmap fails to
/// render are logged and listed in `dropped`; the rest of the timeline is still produced.
pub(crate) fn build_timeline(
    verse: &Verse,
    total: f64,
    preset: &VisualPreset,
    settings: &Settings,
    painter: &mut dyn OverlayPainter,
) -> Timeline {
    let mode = select_mode(verse, &settings.page);
    let mut builder = Builder {
        verse,
        total,
        preset,
        settings,
        painter,
        elements: Vec::new(),
        dropped: Vec::new(),
        pages: Vec::new(),
    };

    if total.is_nan() || total <= 0.0 {
        warn!("Refusing to lay out overlays for a {}s clip", total);
        return builder.finish(mode);
    }

    builder.title_card();
    builder.persistent_branding();
    match mode {
        DisplayMode::SinglePage => builder.single_page(),
        DisplayMode::MultiPage => builder.multi_page(),
    }
    builder.bottom_branding();
    builder.progress_bar();

    let timeline = builder.finish(mode);
    info!(
        "Built {} timeline: {} elements, {} pages, {} dropped",
        timeline.mode,
        timeline.elements.len(),
        timeline.pages.len(),
        timeline.dropped.len()
    );
    timeline
}

struct Builder<'a> {
    verse: &'a Verse,
    total: f64,
    preset: &'a VisualPreset,
    settings: &'a Settings,
    painter: &'a mut dyn OverlayPainter,
    elements: Vec<OverlayElement>,
    dropped: Vec<DroppedElement>,
    pages: Vec<Page>,
}

impl Builder<'_> {
    fn finish(self, mode: DisplayMode) -> Timeline {
        Timeline {
            mode,
            total: self.total,
            pages: self.pages,
            elements: self.elements,
            dropped: self.dropped,
        }
    }

    fn gold(&self, alpha: u8) -> [u8; 4] {
        let [r, g, b] = self.settings.layout.gold_color;
        [r, g, b, alpha]
    }

    fn body_color(&self, alpha: u8) -> [u8; 4] {
        let [r, g, b] = self.preset.text_color;
        [r, g, b, alpha]
    }

    fn text(&mut self, text: &str, style: TextStyle) -> Result<RgbaImage, RenderError> {
        self.painter.render_text(text, &style)
    }

    fn push(
        &mut self,
        kind: OverlayKind,
        rendered: Result<RgbaImage, RenderError>,
        position: Position,
        span: Span,
        opacity: f32,
    ) {
        match rendered {
            Ok(image) => self.place(kind, ImageSource::Bitmap(Arc::new(image)), position, span, opacity),
            Err(error) => {
                warn!("Dropping {} overlay: {}", kind, error);
                self.dropped.push(DroppedElement { kind, error });
            }
        }
    }

    fn place(&mut self, kind: OverlayKind, source: ImageSource, position: Position, span: Span, opacity: f32) {
        let start = span.start.max(0.0);
        let duration = span.duration.min(self.total - start);
        if duration.is_nan() || duration <= 0.0 {
            debug!("Skipping {} overlay starting at {:.2}s: no time left", kind, start);
            return;
        }
        self.elements.push(OverlayElement {
            kind,
            source,
            position,
            start,
            duration,
            fade: span.fade,
            opacity,
        });
    }

    fn title_card(&mut self) {
        if !verse::should_show_title_card(self.verse) {
            return;
        }
        let wrap = self.settings.layout.wrap_width;
        let duration = TITLE_CARD_MAX_SECS.min(self.total * TITLE_CARD_FRACTION);
        let span = Span::new(0.0, duration)
            .fade_in(TITLE_CARD_FADE)
            .fade_out(TITLE_CARD_FADE);
        let gold = self.settings.layout.gold_color;

        let glyph = self.text(
            BISMILLAH,
            TextStyle::new(TITLE_ARABIC_SIZE, self.gold(255), wrap)
                .rtl()
                .glow(gold)
                .outline(),
        );
        self.push(OverlayKind::TitleCard, glyph, Position::centered(), span, 1.0);

        let gloss = self.text(BISMILLAH_GLOSS, TextStyle::new(TITLE_GLOSS_SIZE, [255, 255, 255, 230], wrap));
        self.push(
            OverlayKind::BismillahTitle,
            gloss,
            Position::centered_at_y(TITLE_GLOSS_Y),
            span,
            1.0,
        );
    }

    fn persistent_branding(&mut self) {
        let layout = &self.settings.layout;
        let (logo_x, logo_y) = layout.logo_position;
        let logo_opacity = layout.logo_opacity;
        let logo_size = layout.logo_size;
        let reference_y = layout.verse_reference_y;
        let reference_size = layout.verse_reference_size;
        let wrap = layout.wrap_width;

        let logo = self.painter.render_logo(logo_size);
        self.push(
            OverlayKind::BrandingLogo,
            logo,
            Position::at(logo_x, logo_y),
            Span::new(0.0, self.total).fade_in(1.2),
            logo_opacity,
        );

        let reference = self.verse.reference.clone();
        let label = self.text(&reference, TextStyle::new(reference_size, self.gold(255), wrap));
        self.push(
            OverlayKind::VerseReference,
            label,
            Position::centered_at_y(reference_y),
            Span::new(0.0, self.total).fade_in(1.0),
            1.0,
        );
    }

    fn surah_header(&mut self, fade_in: f64) {
        let layout = &self.settings.layout;
        let (surah_y, surah_size, header_y, wrap) = (
            layout.surah_name_y,
            layout.surah_name_size,
            layout.bismillah_header_y,
            layout.wrap_width,
        );
        let accent = self.preset.accent_color;
        let full = Span::new(0.0, self.total).fade_in(fade_in);

        let name = self.verse.display_name();
        let surah = self.text(&name, TextStyle::new(surah_size, [255, 255, 255, 255], wrap).glow(accent));
        self.push(OverlayKind::SurahLabel, surah, Position::centered_at_y(surah_y), full, 1.0);

        let gold = self.settings.layout.gold_color;
        let header = self.text(BISMILLAH, TextStyle::new(HEADER_SIZE, self.gold(255), wrap).rtl().glow(gold));
        self.push(OverlayKind::BismillahHeader, header, Position::centered_at_y(header_y), full, 1.0);
    }

    fn arabic_style(&self) -> TextStyle {
        let layout = &self.settings.layout;
        TextStyle::new(layout.arabic_text_size, self.body_color(255), layout.wrap_width)
            .rtl()
            .glow(self.preset.accent_color)
    }

    fn translation_style(&self) -> TextStyle {
        let layout = &self.settings.layout;
        TextStyle::new(layout.translation_size, self.body_color(250), layout.wrap_width)
    }

    fn single_page(&mut self) {
        let layout = &self.settings.layout;
        let (arabic_y, mut translation_y, translator_y) =
            (layout.arabic_text_y, layout.translation_y, layout.translator_y);
        if self.verse.arabic_text.chars().count() > LONG_ARABIC_CHARS {
            translation_y = translation_y.max(LONG_ARABIC_TRANSLATION_Y);
        }
        let delay = self.settings.page.translation_delay;
        let total = self.total;

        self.surah_header(0.5);

        let arabic_text = self.verse.arabic_text.clone();
        let arabic = self.text(&arabic_text, self.arabic_style());
        self.push(
            OverlayKind::ArabicPageText,
            arabic,
            Position::centered_at_y(arabic_y),
            Span::new(0.0, total).fade_in(0.6),
            1.0,
        );

        if !self.verse.translation_text.trim().is_empty() {
            if self.settings.page.bismillah_before_translation {
                self.bismillah_interlude();
            }
            let quoted = format!("\"{}\"", self.verse.translation_text.trim());
            let translation = self.text(&quoted, self.translation_style());
            self.push(
                OverlayKind::TranslationPageText,
                translation,
                Position::centered_at_y(translation_y),
                Span::new(delay, total - delay).fade_in(0.5),
                1.0,
            );
        }

        self.translator_credit(Span::new(0.0, total).fade_in(1.5), translator_y);
    }

    /// Transient gold Bismillah over the translation slot. Off by default: it competed with the
    /// translation for the same screen position and drifted out of step with the recitation.
    /// The translation itself is never delayed by it.
    fn bismillah_interlude(&mut self) {
        let shown_for = self.settings.page.bismillah_display_duration;
        if self.total <= shown_for + 1.0 {
            return;
        }
        let gold = self.settings.layout.gold_color;
        let wrap = self.settings.layout.wrap_width;
        let image = self.text(BISMILLAH, TextStyle::new(INTERLUDE_SIZE, self.gold(220), wrap).rtl().glow(gold));
        self.push(
            OverlayKind::BismillahInterlude,
            image,
            Position::centered_at_y(INTERLUDE_Y),
            Span::new(0.0, shown_for).fade_in(0.4).fade_out(0.4),
            1.0,
        );
    }

    fn paged_text(&self) -> (Vec<String>, Vec<String>) {
        let page = &self.settings.page;
        let (mut arabic, mut translation) = if self.verse.reference == FATIHA_REFERENCE {
            (
                paginate::split_fatiha_arabic(&self.verse.arabic_text),
                paginate::split_fatiha_translation(&self.verse.translation_text),
            )
        } else {
            (
                paginate::paginate(&self.verse.arabic_text, page.max_chars_arabic, true),
                paginate::paginate(&self.verse.translation_text, page.max_chars_translation, false),
            )
        };
        paginate::equalize(&mut arabic, &mut translation);
        (arabic, translation)
    }

    fn multi_page(&mut self) {
        let page_settings = &self.settings.page;
        let layout = &self.settings.layout;
        let bounds = DurationBounds {
            min: page_settings.min_page_duration,
            max: page_settings.max_page_duration,
        };
        let fade = page_settings.page_fade_duration;
        let delay = page_settings.translation_delay;
        let show_indicators = page_settings.show_page_indicators;
        let (arabic_y, translation_y, indicator_y, translator_y) = (
            layout.arabic_text_y_multi,
            layout.translation_y_multi,
            layout.page_indicator_y,
            layout.translator_y,
        );
        let gold = layout.gold_color;

        self.surah_header(0.8);

        let (arabic_pages, translation_pages) = self.paged_text();
        let pages = timing::schedule(&arabic_pages, &translation_pages, self.total, bounds);
        let count = pages.len();

        for page in &pages {
            let last = page.index + 1 == count;
            let closing = |secs: f64| if last { 0.0 } else { secs };

            if !page.arabic_chunk.is_empty() {
                let arabic = self.text(&page.arabic_chunk, self.arabic_style());
                self.push(
                    OverlayKind::ArabicPageText,
                    arabic,
                    Position::centered_at_y(arabic_y),
                    Span::new(page.start, page.duration)
                        .fade_in(fade * 0.8)
                        .fade_out(closing(fade * 0.8)),
                    1.0,
                );
            }

            if !page.translation_chunk.is_empty() {
                let quoted = format!("\"{}\"", page.translation_chunk);
                let translation = self.text(&quoted, self.translation_style());
                self.push(
                    OverlayKind::TranslationPageText,
                    translation,
                    Position::centered_at_y(translation_y),
                    Span::new(page.start + delay, page.duration - delay)
                        .fade_in(fade * 0.9)
                        .fade_out(closing(fade * 0.8)),
                    1.0,
                );
            }

            if show_indicators {
                let dots = self.painter.render_page_indicator(page.index, count, gold);
                self.push(
                    OverlayKind::PageIndicator,
                    dots,
                    Position::centered_at_y(indicator_y),
                    Span::new(page.start, page.duration)
                        .fade_in(0.3)
                        .fade_out(closing(0.3)),
                    1.0,
                );
            }
        }

        let first_page = pages.first().map_or(self.total, |p| p.duration);
        let credit_start = (first_page * 0.8).min(2.0);
        self.translator_credit(
            Span::new(credit_start, self.total - credit_start).fade_in(1.2),
            translator_y,
        );
        self.pages = pages;
    }

    fn translator_credit(&mut self, span: Span, y: i32) {
        let translator = self.verse.translator_name.trim();
        if translator.is_empty() {
            return;
        }
        let line = format!("— {}", translator);
        let wrap = self.settings.layout.wrap_width;
        let credit = self.text(&line, TextStyle::new(TRANSLATOR_SIZE, [220, 220, 220, 200], wrap));
        self.push(OverlayKind::TranslatorCredit, credit, Position::centered_at_y(y), span, 1.0);
    }

    fn bottom_branding(&mut self) {
        let layout = &self.settings.layout;
        let delay = layout.bottom_branding_start_delay.max(0.0);
        if delay >= self.total {
            return;
        }
        let (y, size) = (layout.branding_bottom_y, layout.branding_bottom_size);
        let line = self.settings.branding.bottom_line();
        let image = self.painter.render_bottom_branding(&line, size);
        self.push(
            OverlayKind::BottomBranding,
            image,
            Position::centered_at_y(y),
            Span::new(delay, self.total - delay).fade_in(1.2),
            1.0,
        );
    }

    fn progress_bar(&mut self) {
        let layout = &self.settings.layout;
        let style = ProgressBarStyle {
            width: layout.width,
            height: layout.progress_bar_height,
            fill: layout.gold_color,
            track: PROGRESS_TRACK,
            track_opacity: PROGRESS_TRACK_OPACITY,
        };
        let y = layout.progress_bar_y;
        self.place(
            OverlayKind::ProgressBar,
            ImageSource::ProgressBar(style),
            Position::at(0, y),
            Span::new(0.0, self.total),
            1.0,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset;
    use crate::verse::sample_verse;

    struct StubPainter;

    impl OverlayPainter for StubPainter {
        fn render_text(&mut self, text: &str, _style: &TextStyle) -> Result<RgbaImage, RenderError> {
            let width = (text.chars().count() as u32 * 10).clamp(1, 900);
            Ok(RgbaImage::new(width, 40))
        }

        fn render_logo(&mut self, height: u32) -> Result<RgbaImage, RenderError> {
            Ok(RgbaImage::new(height, height))
        }

        fn render_bottom_branding(&mut self, text: &str, size: f32) -> Result<RgbaImage, RenderError> {
            self.render_text(text, &TextStyle::new(size, [255; 4], 1000))
        }
    }

    /// Fails every right-to-left text, as a painter without an Arabic font would.
    struct NoArabicPainter;

    impl OverlayPainter for NoArabicPainter {
        fn render_text(&mut self, text: &str, style: &TextStyle) -> Result<RgbaImage, RenderError> {
            if style.rtl {
                return Err(RenderError::MissingFont("Arabic"));
            }
            StubPainter.render_text(text, style)
        }

        fn render_logo(&mut self, height: u32) -> Result<RgbaImage, RenderError> {
            StubPainter.render_logo(height)
        }

        fn render_bottom_branding(&mut self, text: &str, size: f32) -> Result<RgbaImage, RenderError> {
            StubPainter.render_bottom_branding(text, size)
        }
    }

    fn nebula() -> &'static VisualPreset {
        preset::find("cosmic_nebula").unwrap()
    }

    fn short_verse() -> Verse {
        sample_verse("2:255", "Al-Baqarah", "ٱللَّهُ لَآ إِلَٰهَ إِلَّا هُوَ", "Allah - there is no deity except Him.")
    }

    fn long_verse() -> Verse {
        sample_verse(
            "2:286",
            "Al-Baqarah",
            &"لَا يُكَلِّفُ ٱللَّهُ نَفْسًا إِلَّا وُسْعَهَا، ".repeat(8),
            &"Allah does not charge a soul except with that within its capacity. ".repeat(6),
        )
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    fn build(verse: &Verse, total: f64, settings: &Settings) -> Timeline {
        build_timeline(verse, total, nebula(), settings, &mut StubPainter)
    }

    #[test]
    fn mode_follows_character_thresholds() {
        let page = PageSettings::default();
        let mut verse = short_verse();
        verse.arabic_text = "ب".repeat(200);
        assert_eq!(select_mode(&verse, &page), DisplayMode::MultiPage);

        verse.arabic_text = "ب".repeat(80);
        verse.translation_text = "a".repeat(150);
        assert_eq!(select_mode(&verse, &page), DisplayMode::SinglePage);

        verse.translation_text = "a".repeat(151);
        assert_eq!(select_mode(&verse, &page), DisplayMode::MultiPage);
    }

    #[test]
    fn first_verse_gets_one_title_card_at_start() {
        let verse = sample_verse("112:1", "Al-Ikhlas", "قُلْ هُوَ ٱللَّهُ أَحَدٌ", "Say, He is Allah, One.");
        let settings = Settings::default();

        let timeline = build(&verse, 20.0, &settings);
        let cards: Vec<_> = timeline.of_kind(OverlayKind::TitleCard).collect();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].start, 0.0);
        assert_close(cards[0].duration, 4.0);
        assert_eq!(timeline.count(OverlayKind::BismillahTitle), 1);

        let short = build(&verse, 10.0, &settings);
        assert_close(short.of_kind(OverlayKind::TitleCard).next().unwrap().duration, 2.5);
    }

    #[test]
    fn at_tawbah_and_later_verses_have_no_title_card() {
        let settings = Settings::default();
        let tawbah = sample_verse("9:1", "At-Tawbah", "بَرَآءَةٌ مِّنَ ٱللَّهِ وَرَسُولِهِۦٓ", "[This is a declaration of] disassociation.");
        assert_eq!(build(&tawbah, 20.0, &settings).count(OverlayKind::TitleCard), 0);
        assert_eq!(build(&short_verse(), 20.0, &settings).count(OverlayKind::TitleCard), 0);
    }

    #[test]
    fn single_page_layout_spans_the_clip() {
        let settings = Settings::default();
        let timeline = build(&short_verse(), 12.0, &settings);

        assert_eq!(timeline.mode, DisplayMode::SinglePage);
        assert!(timeline.pages.is_empty());
        for kind in [
            OverlayKind::BrandingLogo,
            OverlayKind::VerseReference,
            OverlayKind::SurahLabel,
            OverlayKind::BismillahHeader,
            OverlayKind::ArabicPageText,
            OverlayKind::TranslationPageText,
            OverlayKind::TranslatorCredit,
            OverlayKind::BottomBranding,
            OverlayKind::ProgressBar,
        ] {
            assert_eq!(timeline.count(kind), 1, "{kind}");
        }
        let translation = timeline.of_kind(OverlayKind::TranslationPageText).next().unwrap();
        let arabic = timeline.of_kind(OverlayKind::ArabicPageText).next().unwrap();
        assert_eq!(translation.start, arabic.start);
        assert_close(translation.duration, 12.0);

        let branding = timeline.of_kind(OverlayKind::BottomBranding).next().unwrap();
        assert_eq!(branding.start, 1.0);
        assert_close(branding.end(), 12.0);
        assert_eq!(timeline.count(OverlayKind::BismillahInterlude), 0);
    }

    #[test]
    fn long_single_page_arabic_pushes_translation_down() {
        let mut settings = Settings::default();
        settings.page.max_chars_arabic = 400;
        let translation_y = |verse: &Verse| {
            let timeline = build(verse, 12.0, &settings);
            assert_eq!(timeline.mode, DisplayMode::SinglePage);
            let position = timeline.of_kind(OverlayKind::TranslationPageText).next().unwrap().position;
            position
        };

        let mut verse = short_verse();
        assert_eq!(translation_y(&verse), Position::centered_at_y(settings.layout.translation_y));

        verse.arabic_text = "ب".repeat(150);
        assert_eq!(translation_y(&verse), Position::centered_at_y(1100));
        verse.arabic_text = "ب".repeat(151);
        assert_eq!(translation_y(&verse), Position::centered_at_y(1150));
    }

    #[test]
    fn multi_page_translation_starts_with_its_arabic_page() {
        let settings = Settings::default();
        let timeline = build(&long_verse(), 30.0, &settings);

        assert_eq!(timeline.mode, DisplayMode::MultiPage);
        assert!(timeline.pages.len() > 1);
        let arabic: Vec<_> = timeline.of_kind(OverlayKind::ArabicPageText).collect();
        let translation: Vec<_> = timeline.of_kind(OverlayKind::TranslationPageText).collect();
        assert!(arabic.len() >= 2 && translation.len() >= 2);
        for (a, t) in arabic.iter().zip(&translation).take(2) {
            assert_eq!(t.start, a.start);
        }
        assert_eq!(timeline.count(OverlayKind::PageIndicator), timeline.pages.len());
    }

    #[test]
    fn configured_delay_offsets_translation_pages() {
        let mut settings = Settings::default();
        settings.page.translation_delay = 0.5;
        let timeline = build(&long_verse(), 30.0, &settings);

        let arabic: Vec<_> = timeline.of_kind(OverlayKind::ArabicPageText).collect();
        let translation: Vec<_> = timeline.of_kind(OverlayKind::TranslationPageText).collect();
        for (a, t) in arabic.iter().zip(&translation).take(2) {
            assert_close(t.start, a.start + 0.5);
            assert_close(t.end(), a.end());
        }
    }

    #[test]
    fn last_page_has_no_fade_out() {
        let timeline = build(&long_verse(), 30.0, &Settings::default());
        let indicators: Vec<_> = timeline.of_kind(OverlayKind::PageIndicator).collect();
        let (last, rest) = indicators.split_last().unwrap();
        assert_eq!(last.fade.fade_out, 0.0);
        assert!(rest.iter().all(|e| e.fade.fade_out > 0.0));
        assert_close(last.end(), 30.0);

        let last_page = timeline.pages.last().unwrap();
        for element in timeline
            .elements
            .iter()
            .filter(|e| e.kind == OverlayKind::ArabicPageText && e.start == last_page.start)
        {
            assert_eq!(element.fade.fade_out, 0.0);
        }
    }

    #[test]
    fn every_element_ends_within_the_clip() {
        let settings = Settings::default();
        let verse = sample_verse("1:1", "Al-Fatiha", "بِسْمِ ٱللَّهِ ٱلرَّحْمَٰنِ ٱلرَّحِيمِ", "In the name of Allah.");
        for total in [0.8, 3.0, 45.0] {
            for timeline in [build(&verse, total, &settings), build(&long_verse(), total, &settings)] {
                assert!(!timeline.elements.is_empty());
                for element in &timeline.elements {
                    assert!(element.start >= 0.0);
                    assert!(element.duration > 0.0);
                    assert!(element.end() <= total + 1e-9, "{} ends at {}", element.kind, element.end());
                }
            }
        }
    }

    #[test]
    fn branding_is_skipped_when_clip_is_shorter_than_its_delay() {
        let timeline = build(&short_verse(), 0.8, &Settings::default());
        assert_eq!(timeline.count(OverlayKind::BottomBranding), 0);
        assert_eq!(timeline.count(OverlayKind::ProgressBar), 1);
    }

    #[test]
    fn failed_renders_are_dropped_not_fatal() {
        let settings = Settings::default();
        let timeline = build_timeline(&long_verse(), 30.0, nebula(), &settings, &mut NoArabicPainter);

        assert_eq!(timeline.count(OverlayKind::ArabicPageText), 0);
        assert_eq!(timeline.count(OverlayKind::BismillahHeader), 0);
        assert!(timeline.count(OverlayKind::TranslationPageText) >= 2);
        assert_eq!(timeline.count(OverlayKind::ProgressBar), 1);
        assert!(timeline
            .dropped
            .iter()
            .any(|d| d.kind == OverlayKind::ArabicPageText));
        assert!(timeline
            .dropped
            .iter()
            .all(|d| matches!(d.error, RenderError::MissingFont(_))));
    }

    #[test]
    fn fatiha_is_shown_one_verse_per_page() {
        let verse = sample_verse(
            FATIHA_REFERENCE,
            "Al-Fatiha",
            &"ٱلْحَمْدُ لِلَّهِ رَبِّ ٱلْعَٰلَمِينَ ".repeat(6),
            "In the name of Allah, the Entirely Merciful, the Especially Merciful. [All] praise is [due] to Allah, Lord of the worlds - The Entirely Merciful, the Especially Merciful, Sovereign of the Day of Recompense. It is You we worship and You we ask for help. Guide us to the straight path - The path of those upon whom You have bestowed favor, not of those who have evoked [Your] anger or of those who are astray.",
        );
        let timeline = build(&verse, 40.0, &Settings::default());

        assert_eq!(timeline.mode, DisplayMode::MultiPage);
        assert_eq!(timeline.pages.len(), 7);
        assert_eq!(timeline.count(OverlayKind::ArabicPageText), 7);
    }

    #[test]
    fn bismillah_interlude_is_separate_when_enabled() {
        let mut settings = Settings::default();
        settings.page.bismillah_before_translation = true;
        let timeline = build(&short_verse(), 12.0, &settings);

        let interlude: Vec<_> = timeline.of_kind(OverlayKind::BismillahInterlude).collect();
        assert_eq!(interlude.len(), 1);
        assert_close(interlude[0].duration, 2.5);
        assert_eq!(timeline.count(OverlayKind::TitleCard), 0);
        let translation = timeline.of_kind(OverlayKind::TranslationPageText).next().unwrap();
        assert_eq!(translation.start, 0.0);

        let too_short = build(&short_verse(), 3.0, &settings);
        assert_eq!(too_short.count(OverlayKind::BismillahInterlude), 0);
    }

    #[test]
    fn multi_page_translator_credit_starts_early_in_first_page() {
        let timeline = build(&long_verse(), 30.0, &Settings::default());
        let credit = timeline.of_kind(OverlayKind::TranslatorCredit).next().unwrap();
        let first = &timeline.pages[0];
        assert_close(credit.start, (first.duration * 0.8).min(2.0));
        assert_close(credit.end(), 30.0);
    }
}
