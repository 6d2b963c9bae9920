//! Search-token normalization for release names.
//!
//! Folds case, strips punctuation, whitespace and diacritics, and collapses
//! `ё` into `е` so that trackers spelling a title slightly differently still
//! produce the same token. Cyrillic letters are kept whole (`й` is a letter,
//! not `и` with a breve) unless transliteration is switched on.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::config::NormalizeConfig;

/// Deterministic text-to-token reducer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normalizer {
    transliterate: bool,
}

impl Normalizer {
    pub fn new(transliterate: bool) -> Self {
        Self { transliterate }
    }

    pub fn from_config(config: &NormalizeConfig) -> Self {
        Self::new(config.transliterate)
    }

    /// Reduce `text` to its canonical search token.
    ///
    /// Never fails; input without any letters or digits yields an empty string.
    pub fn normalize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.nfc() {
            for lower in c.to_lowercase() {
                self.push_folded(lower, &mut out);
            }
        }
        out
    }

    fn push_folded(&self, c: char, out: &mut String) {
        if is_cyrillic(c) {
            let c = if c == 'ё' { 'е' } else { c };
            if self.transliterate {
                match transliterate(c) {
                    Some(latin) => out.push_str(latin),
                    None if c.is_alphanumeric() => out.push(c),
                    None => {}
                }
            } else if c.is_alphanumeric() {
                out.push(c);
            }
            return;
        }

        for d in std::iter::once(c).nfkd() {
            if is_combining_mark(d) {
                continue;
            }
            for l in d.to_lowercase() {
                if l.is_alphanumeric() {
                    out.push(l);
                }
            }
        }
    }
}

/// Normalize with default options.
pub fn normalize(text: &str) -> String {
    Normalizer::default().normalize(text)
}

fn is_cyrillic(c: char) -> bool {
    ('\u{0400}'..='\u{04FF}').contains(&c)
}

fn transliterate(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'ґ' => "g",
        'д' => "d",
        'е' => "e",
        'є' => "ye",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'і' => "i",
        'ї' => "yi",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ъ' => "",
        'ы' => "y",
        'ь' => "",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    };
    Some(latin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folds_case_and_whitespace() {
        assert_eq!(normalize("Interstellar"), "interstellar");
        assert_eq!(normalize("interstellar "), "interstellar");
        assert_eq!(normalize("INTERSTELLAR"), "interstellar");
        assert_eq!(normalize("  The   Matrix\t"), "thematrix");
    }

    #[test]
    fn test_strips_punctuation() {
        assert_eq!(normalize("Spider-Man: No Way Home"), "spidermannowayhome");
        assert_eq!(normalize("Mission: Impossible (1996)"), "missionimpossible1996");
    }

    #[test]
    fn test_strips_diacritics() {
        assert_eq!(normalize("Amélie"), "amelie");
        assert_eq!(normalize("Pokémon"), "pokemon");
        assert_eq!(normalize("Ｆｕｌｌｗｉｄｔｈ"), "fullwidth");
    }

    #[test]
    fn test_cyrillic_kept_and_yo_folded() {
        assert_eq!(normalize("Ёлки"), "елки");
        assert_eq!(normalize("Бойцовский клуб"), "бойцовскийклуб");
        // decomposed й composes back instead of losing its breve
        assert_eq!(normalize("и\u{0306}"), "й");
    }

    #[test]
    fn test_transliteration() {
        let n = Normalizer::new(true);
        assert_eq!(n.normalize("Ёлки"), "elki");
        assert_eq!(n.normalize("Щит"), "shchit");
        assert_eq!(n.normalize("Matrix"), "matrix");
    }

    #[test]
    fn test_empty_for_unparseable() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("!!! --- ???"), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "Interstellar",
            "Ёлки 2",
            "Amélie",
            "İstanbul",
            "Ⅻ Monkeys",
            "Человек-паук",
            "ﬁnal ﬁght",
        ];
        for translit in [false, true] {
            let n = Normalizer::new(translit);
            for s in samples {
                let once = n.normalize(s);
                assert_eq!(n.normalize(&once), once, "not idempotent for {:?}", s);
            }
        }
    }

    #[test]
    fn test_digits_survive() {
        assert_eq!(normalize("1984"), "1984");
        assert_eq!(normalize("9-1-1"), "911");
    }
}
