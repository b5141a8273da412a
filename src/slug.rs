//! URL slugs for generated articles.
//!
//! Uniqueness comes from a time suffix rather than a lookup: every slug
//! carries a millisecond stamp, and the allocator never hands out the same
//! stamp twice within a process.

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::Clock;
use crate::models::Language;

const MIN_CANDIDATE_CHARS: usize = 3;
const MAX_CANDIDATE_CHARS: usize = 80;
const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

struct SlugState {
    rng: StdRng,
    last_millis: i64,
}

pub struct SlugAllocator {
    clock: Arc<dyn Clock>,
    state: Mutex<SlugState>,
}

impl SlugAllocator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(clock, StdRng::from_os_rng())
    }

    #[cfg(test)]
    pub fn with_seed(clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            clock,
            state: Mutex::new(SlugState { rng, last_millis: 0 }),
        }
    }

    pub fn allocate(&self, title: &str, locale: Language) -> String {
        let candidate = slugify(title, locale);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let millis = self.clock.now().timestamp_millis().max(state.last_millis + 1);
        state.last_millis = millis;

        if candidate.chars().count() < MIN_CANDIDATE_CHARS {
            let random: String = (0..6)
                .map(|_| BASE36_DIGITS[state.rng.random_range(0..BASE36_DIGITS.len())] as char)
                .collect();
            return format!("article-{millis}-{random}");
        }

        format!("{candidate}-{}", to_base36(millis.max(0) as u64))
    }
}

/// Locale-aware slug candidate without any uniqueness suffix.
pub fn slugify(title: &str, locale: Language) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars().flat_map(char::to_lowercase) {
        if is_arabic_mark(c) {
            continue;
        }
        let kept: Option<&str> = if c.is_ascii_alphanumeric() {
            None
        } else if locale == Language::Ar && is_arabic_letter_or_digit(c) {
            None
        } else if let Some(folded) = fold_latin(c) {
            Some(folded)
        } else {
            pending_hyphen = !out.is_empty();
            continue;
        };

        if pending_hyphen {
            out.push('-');
            pending_hyphen = false;
        }
        match kept {
            Some(folded) => out.push_str(folded),
            None => out.push(c),
        }
    }

    if out.chars().count() > MAX_CANDIDATE_CHARS {
        out = out.chars().take(MAX_CANDIDATE_CHARS).collect();
    }
    out.trim_matches('-').to_string()
}

/// Harakat, superscript alef and tatweel: dropped without leaving a gap.
fn is_arabic_mark(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{065F}' | '\u{0670}' | '\u{0640}' | '\u{06D6}'..='\u{06ED}')
}

fn is_arabic_letter_or_digit(c: char) -> bool {
    matches!(c, '\u{0621}'..='\u{064A}' | '\u{0660}'..='\u{0669}' | '\u{0671}'..='\u{06D3}' | '\u{06F0}'..='\u{06F9}')
}

fn fold_latin(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'ß' => "ss",
        _ => return None,
    };
    Some(folded)
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::testing::FixedClock;

    fn allocator() -> SlugAllocator {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()));
        SlugAllocator::with_seed(clock, 7)
    }

    fn is_fallback(slug: &str) -> bool {
        let Some(rest) = slug.strip_prefix("article-") else {
            return false;
        };
        let Some((millis, random)) = rest.split_once('-') else {
            return false;
        };
        !millis.is_empty()
            && millis.chars().all(|c| c.is_ascii_digit())
            && random.len() == 6
            && random.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    }

    #[test]
    fn english_titles_become_latin_slugs() {
        assert_eq!(slugify("Hello, World -- Rust & Café!", Language::En), "hello-world-rust-cafe");
        assert_eq!(slugify("مرحبا Rust", Language::En), "rust");
    }

    #[test]
    fn arabic_text_is_kept_for_arabic_locale() {
        assert_eq!(slugify("مَرْحَباً بالعالم", Language::Ar), "مرحبا-بالعالم");
        assert_eq!(slugify("دليل Rust ٢٠٢٦", Language::Ar), "دليل-rust-٢٠٢٦");
    }

    #[test]
    fn suffix_is_appended_to_real_candidates() {
        let slug = allocator().allocate("Learning Rust", Language::En);
        let expected_suffix = to_base36(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap().timestamp_millis() as u64);
        assert_eq!(slug, format!("learning-rust-{expected_suffix}"));
    }

    #[test]
    fn single_arabic_letter_falls_back() {
        let slug = allocator().allocate("ا", Language::Ar);
        assert!(is_fallback(&slug), "unexpected slug {slug}");
    }

    #[test]
    fn collapsing_titles_never_collide() {
        let allocator = allocator();
        let mut seen = HashSet::new();
        for title in ["ا", "ـ", "!!", "Same title", "Same title", "Same title"] {
            for locale in [Language::Ar, Language::En] {
                assert!(seen.insert(allocator.allocate(title, locale)));
            }
        }
    }

    #[test]
    fn long_titles_are_capped() {
        let title = "word ".repeat(40);
        let slug = slugify(&title, Language::En);
        assert!(slug.chars().count() <= MAX_CANDIDATE_CHARS);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
