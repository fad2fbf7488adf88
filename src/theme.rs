use crate::preferences::{FontWeight, ReaderPreferences, ReaderTheme};
use once_cell::sync::Lazy;
use ratatui::style::{Color, Modifier, Style};

// Terminal colors for one reader theme
#[derive(Clone, Debug)]
pub struct ReaderPalette {
    pub background: Color,
    pub text: Color,
    pub muted: Color,  // chrome text, status
    pub chrome: Color, // header/footer background
    pub accent: Color, // progress, highlights
    pub error: Color,
}

const fn rgb(hex: u32) -> Color {
    Color::Rgb((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
}

impl ReaderTheme {
    pub fn palette(&self) -> &'static ReaderPalette {
        match self {
            ReaderTheme::Original => &ORIGINAL_PALETTE,
            ReaderTheme::Quiet => &QUIET_PALETTE,
            ReaderTheme::Paper => &PAPER_PALETTE,
            ReaderTheme::Focus => &FOCUS_PALETTE,
        }
    }
}

/// Body text style for the given preferences.
///
/// Terminals cannot switch typefaces, so the font family only shows up in the
/// status line. Only bold has a terminal attribute; medium renders as normal.
pub fn text_style(prefs: &ReaderPreferences) -> Style {
    let palette = prefs.theme.palette();
    let style = Style::default().fg(palette.text).bg(palette.background);
    match prefs.font_weight {
        FontWeight::Normal | FontWeight::Medium => style,
        FontWeight::Bold => style.add_modifier(Modifier::BOLD),
    }
}

pub fn chrome_style(prefs: &ReaderPreferences) -> Style {
    let palette = prefs.theme.palette();
    Style::default().fg(palette.muted).bg(palette.chrome)
}

// ============================================================================
// Built-in palettes
// ============================================================================

// Original - plain white page
static ORIGINAL_PALETTE: Lazy<ReaderPalette> = Lazy::new(|| ReaderPalette {
    background: rgb(0xFFFFFF),
    text: rgb(0x1C1C1E),
    muted: rgb(0x6E6E73),
    chrome: rgb(0xF2F2F7),
    accent: rgb(0x0A84FF),
    error: rgb(0xD70015),
});

// Quiet - dim grey for low light
static QUIET_PALETTE: Lazy<ReaderPalette> = Lazy::new(|| ReaderPalette {
    background: rgb(0x4A4A4D),
    text: rgb(0xD6D6D6),
    muted: rgb(0xA1A1A6),
    chrome: rgb(0x3A3A3C),
    accent: rgb(0x8EC5FF),
    error: rgb(0xFF6961),
});

// Paper - warm sepia
static PAPER_PALETTE: Lazy<ReaderPalette> = Lazy::new(|| ReaderPalette {
    background: rgb(0xF8F1E3),
    text: rgb(0x4F321C),
    muted: rgb(0x8B6D4F),
    chrome: rgb(0xEDE3CF),
    accent: rgb(0xA0522D),
    error: rgb(0xB22222),
});

// Focus - soft cream with high contrast text
static FOCUS_PALETTE: Lazy<ReaderPalette> = Lazy::new(|| ReaderPalette {
    background: rgb(0xFFFCF0),
    text: rgb(0x000000),
    muted: rgb(0x5C5C5C),
    chrome: rgb(0xF4EFD9),
    accent: rgb(0x2E7D32),
    error: rgb(0xC62828),
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_splits_channels() {
        assert_eq!(rgb(0xF8F1E3), Color::Rgb(0xF8, 0xF1, 0xE3));
    }

    #[test]
    fn test_bold_weight_sets_modifier() {
        let prefs = ReaderPreferences {
            font_weight: FontWeight::Bold,
            ..ReaderPreferences::default()
        };
        assert!(text_style(&prefs).add_modifier.contains(Modifier::BOLD));
        assert!(
            !text_style(&ReaderPreferences::default())
                .add_modifier
                .contains(Modifier::BOLD)
        );
    }

    #[test]
    fn test_every_theme_has_a_palette() {
        for theme in ReaderTheme::all() {
            let palette = theme.palette();
            assert_ne!(palette.background, palette.text);
        }
    }
}
