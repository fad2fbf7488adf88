use crate::storage::{ChangeBus, KeyValueStore, PersistentCell};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

pub const PREFERENCES_KEY: &str = "sarpay-reader-preferences";
pub const MIN_FONT_SIZE: u8 = 12;
pub const MAX_FONT_SIZE: u8 = 32;
const DEFAULT_FONT_SIZE: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderTheme {
    #[default]
    Original,
    Quiet,
    Paper,
    Focus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontFamily {
    #[default]
    Serif,
    Sans,
    /// Burmese-script system font.
    Pyidaungsu,
    /// Burmese-script sans-serif.
    NotoSansMyanmar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontWeight {
    #[default]
    Normal,
    Medium,
    Bold,
}

impl ReaderTheme {
    pub fn all() -> &'static [ReaderTheme] {
        &[
            ReaderTheme::Original,
            ReaderTheme::Quiet,
            ReaderTheme::Paper,
            ReaderTheme::Focus,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReaderTheme::Original => "Original",
            ReaderTheme::Quiet => "Quiet",
            ReaderTheme::Paper => "Paper",
            ReaderTheme::Focus => "Focus",
        }
    }

    pub fn next(self) -> Self {
        cycle(Self::all(), self)
    }
}

impl FontFamily {
    pub fn all() -> &'static [FontFamily] {
        &[
            FontFamily::Serif,
            FontFamily::Sans,
            FontFamily::Pyidaungsu,
            FontFamily::NotoSansMyanmar,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FontFamily::Serif => "Serif",
            FontFamily::Sans => "Sans",
            FontFamily::Pyidaungsu => "Pyidaungsu",
            FontFamily::NotoSansMyanmar => "Noto Sans Myanmar",
        }
    }

    pub fn next(self) -> Self {
        cycle(Self::all(), self)
    }
}

impl FontWeight {
    pub fn all() -> &'static [FontWeight] {
        &[FontWeight::Normal, FontWeight::Medium, FontWeight::Bold]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FontWeight::Normal => "Normal",
            FontWeight::Medium => "Medium",
            FontWeight::Bold => "Bold",
        }
    }

    pub fn next(self) -> Self {
        cycle(Self::all(), self)
    }
}

fn cycle<T: Copy + PartialEq>(all: &[T], current: T) -> T {
    let idx = all.iter().position(|t| *t == current).unwrap_or(0);
    all[(idx + 1) % all.len()]
}

/// Reader display options. Every field is a closed set, so a stored value is
/// either a valid combination or rejected as a whole and replaced by defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderPreferences {
    #[serde(default)]
    pub theme: ReaderTheme,
    #[serde(default)]
    pub font_family: FontFamily,
    #[serde(default)]
    pub font_weight: FontWeight,
    #[serde(default = "default_font_size", deserialize_with = "clamped_font_size")]
    pub font_size: u8,
}

fn default_font_size() -> u8 {
    DEFAULT_FONT_SIZE
}

fn clamp_font_size(size: i64) -> u8 {
    size.clamp(i64::from(MIN_FONT_SIZE), i64::from(MAX_FONT_SIZE)) as u8
}

// stored sizes come from other processes too, so out-of-range values are pulled back in
fn clamped_font_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    i64::deserialize(deserializer).map(clamp_font_size)
}

impl Default for ReaderPreferences {
    fn default() -> Self {
        Self {
            theme: ReaderTheme::default(),
            font_family: FontFamily::default(),
            font_weight: FontWeight::default(),
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

impl ReaderPreferences {
    pub fn with_font_size(self, size: i32) -> Self {
        Self {
            font_size: clamp_font_size(i64::from(size)),
            ..self
        }
    }
}

/// Preferences bound to their storage key.
pub fn preferences_cell(
    store: Arc<dyn KeyValueStore>,
    bus: ChangeBus,
) -> PersistentCell<ReaderPreferences> {
    PersistentCell::new(PREFERENCES_KEY, ReaderPreferences::default(), store, bus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyChange, MemoryStore};

    #[test]
    fn test_cycling_wraps() {
        assert_eq!(ReaderTheme::Focus.next(), ReaderTheme::Original);
        assert_eq!(FontWeight::Medium.next(), FontWeight::Bold);
        assert_eq!(FontFamily::NotoSansMyanmar.next(), FontFamily::Serif);
    }

    #[test]
    fn test_font_size_is_clamped() {
        let prefs = ReaderPreferences::default();
        assert_eq!(prefs.with_font_size(4).font_size, MIN_FONT_SIZE);
        assert_eq!(prefs.with_font_size(99).font_size, MAX_FONT_SIZE);
        assert_eq!(prefs.with_font_size(20).font_size, 20);
    }

    #[test]
    fn test_stored_font_size_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        store.set(PREFERENCES_KEY, r#"{"fontSize":200}"#).unwrap();

        let mut cell = preferences_cell(store, ChangeBus::new());
        assert_eq!(cell.get().font_size, MAX_FONT_SIZE);

        let change = KeyChange::cross_context(PREFERENCES_KEY, Some(r#"{"fontSize":-3}"#.to_string()));
        assert!(cell.apply_change(&change));
        assert_eq!(cell.get().font_size, MIN_FONT_SIZE);
    }

    #[test]
    fn test_unknown_theme_falls_back_to_defaults() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(PREFERENCES_KEY, r#"{"theme":"neon","fontFamily":"sans"}"#)
            .unwrap();

        let cell = preferences_cell(store, ChangeBus::new());
        assert_eq!(*cell.get(), ReaderPreferences::default());
    }

    #[test]
    fn test_stored_preferences_are_read() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                PREFERENCES_KEY,
                r#"{"theme":"paper","fontFamily":"noto-sans-myanmar","fontWeight":"bold"}"#,
            )
            .unwrap();

        let cell = preferences_cell(store, ChangeBus::new());
        let prefs = cell.get();
        assert_eq!(prefs.theme, ReaderTheme::Paper);
        assert_eq!(prefs.font_family, FontFamily::NotoSansMyanmar);
        assert_eq!(prefs.font_weight, FontWeight::Bold);
        assert_eq!(prefs.font_size, 18);
    }
}
