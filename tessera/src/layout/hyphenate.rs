// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Syllable-safe break points from embedded hyphenation dictionaries.

use hyphenation::{Hyphenator as _, Load as _};
use parking_lot::Mutex;
use swash::text::Language;
use tracing::warn;

/// Cached hyphenation dictionaries.
///
/// Dictionaries load lazily per language and stay cached for the lifetime
/// of the service; lookups for unsupported languages resolve to no break
/// points.
#[derive(Default)]
pub struct HyphenationService {
    dictionaries: Mutex<Vec<hyphenation::Standard>>,
}

impl HyphenationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offsets inside `word` where a syllable-safe break may occur.
    ///
    /// Returns an empty vector when the language has no dictionary or the
    /// word contains non-alphabetic characters the patterns cannot judge.
    pub fn break_points(&self, language: Option<&Language>, word: &str) -> Vec<usize> {
        if !word.chars().all(|c| c.is_alphabetic()) {
            return Vec::new();
        }
        let lang = match language_for(language) {
            Some(lang) => lang,
            None => return Vec::new(),
        };
        let mut dictionaries = self.dictionaries.lock();
        for d in dictionaries.iter() {
            if d.language() == lang {
                return d.hyphenate(word).breaks;
            }
        }
        match hyphenation::Standard::from_embedded(lang) {
            Ok(d) => {
                let breaks = d.hyphenate(word).breaks;
                dictionaries.push(d);
                breaks
            }
            Err(e) => {
                warn!("error loading hyphenation dictionary: {e}");
                Vec::new()
            }
        }
    }
}

/// Maps a configured language to the closest dictionary language.
/// English patterns are the default when nothing is configured.
fn language_for(language: Option<&Language>) -> Option<hyphenation::Language> {
    use hyphenation::Language::*;
    let language = match language {
        Some(language) => language,
        None => return Some(EnglishUS),
    };
    Some(match language.language() {
        "en" => EnglishUS,
        "de" => German1996,
        "fr" => French,
        "es" => Spanish,
        "pt" => Portuguese,
        "it" => Italian,
        "nl" => Dutch,
        "sv" => Swedish,
        "da" => Danish,
        "nb" | "no" => NorwegianBokmal,
        "fi" => Finnish,
        "cs" => Czech,
        "pl" => Polish,
        "ru" => Russian,
        "tr" => Turkish,
        "hu" => Hungarian,
        _ => return None,
    })
}
