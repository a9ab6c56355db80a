// Option tables used to encode form choices into installer properties.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OptionKind {
    Boolean,
    Language,
}

/// A selectable value: the encoded form written to properties and the label
/// shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub kind: OptionKind,
    pub encoded: String,
    pub display: String,
}

impl SelectOption {
    fn new(kind: OptionKind, encoded: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            kind,
            encoded: encoded.into(),
            display: display.into(),
        }
    }
}

/// How a yes/no choice is encoded for the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolEncoding {
    /// `"1"` / `"0"`
    Numeric,
    /// `"yes"` / `"no"`
    Text,
}

/// The no/yes pair for an encoding, `no` first.
pub fn yes_no(encoding: BoolEncoding) -> [SelectOption; 2] {
    match encoding {
        BoolEncoding::Numeric => [
            SelectOption::new(OptionKind::Boolean, "0", "No"),
            SelectOption::new(OptionKind::Boolean, "1", "Yes"),
        ],
        BoolEncoding::Text => [
            SelectOption::new(OptionKind::Boolean, "no", "No"),
            SelectOption::new(OptionKind::Boolean, "yes", "Yes"),
        ],
    }
}

pub fn encode_bool(value: bool, encoding: BoolEncoding) -> String {
    let [no, yes] = yes_no(encoding);
    if value {
        yes.encoded
    } else {
        no.encoded
    }
}

/// Language id and native display name.
const LANGUAGES: &[(u32, &str)] = &[
    (1, "English"),
    (2, "Deutsch"),
    (3, "Français"),
    (4, "Italiano"),
    (5, "Português"),
    (6, "Español"),
    (7, "Русский"),
    (8, "Svenska"),
    (9, "中文 (简体)"),
    (10, "中文 (繁體)"),
    (11, "한국어"),
    (12, "العربية"),
    (13, "日本語"),
    (14, "Bahasa Indonesia"),
    (15, "Magyar"),
    (16, "Türkçe"),
    (17, "Українська"),
    (18, "ไทย"),
    (19, "فارسی"),
    (20, "Čeština"),
    (21, "Galego"),
    (22, "Suomi"),
    (23, "Polski"),
    (24, "Ελληνικά"),
    (25, "Nederlands"),
    (26, "עברית"),
    (27, "Català"),
    (28, "Български"),
    (29, "Dansk"),
    (30, "Slovenčina"),
];

pub fn language_by_id(id: u32) -> Option<SelectOption> {
    LANGUAGES
        .iter()
        .find(|(lang_id, _)| *lang_id == id)
        .map(|(id, name)| SelectOption::new(OptionKind::Language, id.to_string(), *name))
}

/// Fonts the document export may use.
pub const EXPORT_FONTS: [&str; 3] = ["TimesNewRoman", "Verdana", "Arial"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_encodings() {
        assert_eq!(encode_bool(true, BoolEncoding::Numeric), "1");
        assert_eq!(encode_bool(false, BoolEncoding::Numeric), "0");
        assert_eq!(encode_bool(true, BoolEncoding::Text), "yes");
        assert_eq!(encode_bool(false, BoolEncoding::Text), "no");
    }

    #[test]
    fn yes_no_lists_no_first() {
        let [no, yes] = yes_no(BoolEncoding::Text);
        assert_eq!(no.display, "No");
        assert_eq!(yes.display, "Yes");
        assert_eq!(no.kind, OptionKind::Boolean);
    }

    #[test]
    fn language_lookup() {
        let en = language_by_id(1).unwrap();
        assert_eq!(en.display, "English");
        assert_eq!(en.kind, OptionKind::Language);
        assert!(language_by_id(999).is_none());
        assert_eq!(language_by_id(30).unwrap().display, "Slovenčina");
    }
}
