use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OverlayKind {
    TitleCard,
    BrandingLogo,
    VerseReference,
    SurahLabel,
    BismillahHeader,
    BismillahTitle,
    BismillahInterlude,
    ArabicPageText,
    TranslationPageText,
    TranslatorCredit,
    PageIndicator,
    BottomBranding,
    ProgressBar,
}

impl fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverlayKind::TitleCard => "title-card",
            OverlayKind::BrandingLogo => "branding-logo",
            OverlayKind::VerseReference => "verse-reference",
            OverlayKind::SurahLabel => "surah-label",
            OverlayKind::BismillahHeader => "bismillah-header",
            OverlayKind::BismillahTitle => "bismillah-title",
            OverlayKind::BismillahInterlude => "bismillah-interlude",
            OverlayKind::ArabicPageText => "arabic-page-text",
            OverlayKind::TranslationPageText => "translation-page-text",
            OverlayKind::TranslatorCredit => "translator-credit",
            OverlayKind::PageIndicator => "page-indicator",
            OverlayKind::BottomBranding => "bottom-branding",
            OverlayKind::ProgressBar => "progress-bar",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Anchor {
    Center,
    Px(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub x: Anchor,
    pub y: Anchor,
}

impl Position {
    pub fn at(x: i32, y: i32) -> Self {
        Self {
            x: Anchor::Px(x),
            y: Anchor::Px(y),
        }
    }

    pub fn centered_at_y(y: i32) -> Self {
        Self {
            x: Anchor::Center,
            y: Anchor::Px(y),
        }
    }

    pub fn centered() -> Self {
        Self {
            x: Anchor::Center,
            y: Anchor::Center,
        }
    }

    /// Top-left corner of a `width`x`height` element on a `canvas_w`x`canvas_h` frame.
    pub fn resolve(&self, width: u32, height: u32, canvas_w: u32, canvas_h: u32) -> (i64, i64) {
        let axis = |anchor: Anchor, size: u32, canvas: u32| match anchor {
            Anchor::Center => (i64::from(canvas) - i64::from(size)) / 2,
            Anchor::Px(px) => i64::from(px),
        };
        (axis(self.x, width, canvas_w), axis(self.y, height, canvas_h))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProgressBarStyle {
    pub width: u32,
    pub height: u32,
    pub fill: [u8; 3],
    pub track: [u8; 3],
    pub track_opacity: f32,
}

#[derive(Debug, Clone)]
pub(crate) enum ImageSource {
    Bitmap(Arc<RgbaImage>),
    /// Drawn per frame since its fill depends on playback time.
    ProgressBar(ProgressBarStyle),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct Fade {
    pub fade_in: f64,
    pub fade_out: f64,
}

impl Fade {
    pub const NONE: Fade = Fade {
        fade_in: 0.0,
        fade_out: 0.0,
    };

    #[cfg(test)]
    pub fn both(fade_in: f64, fade_out: f64) -> Self {
        Self { fade_in, fade_out }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OverlayElement {
    pub kind: OverlayKind,
    pub source: ImageSource,
    pub position: Position,
    pub start: f64,
    pub duration: f64,
    pub fade: Fade,
    pub opacity: f32,
}

impl OverlayElement {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn is_active(&self, t: f64) -> bool {
        t >= self.start && t < self.end()
    }

    /// Effective opacity at `t`: the base opacity scaled by the linear fade ramps, zero outside the window.
    pub fn opacity_at(&self, t: f64) -> f32 {
        if !self.is_active(t) {
            return 0.0;
        }
        let local = t - self.start;
        let mut ramp = 1.0_f64;
        if self.fade.fade_in > 0.0 && local < self.fade.fade_in {
            ramp = ramp.min(local / self.fade.fade_in);
        }
        let remaining = self.duration - local;
        if self.fade.fade_out > 0.0 && remaining < self.fade.fade_out {
            ramp = ramp.min(remaining / self.fade.fade_out);
        }
        (ramp.clamp(0.0, 1.0) as f32) * self.opacity
    }
}
