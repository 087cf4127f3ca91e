//! Root-mention and gloss extraction from free etymology prose.

use std::collections::BTreeMap;

use regex::Regex;

use crate::SourceError;

/// Letters, combining marks, hyphens and subscript digits (laryngeals such
/// as `h₁`).
const ROOT_CHARS: &str = r"[\p{L}\p{M}\-₀-₉ₐ]";

const MIN_WORD_LEN: usize = 3;
const MAX_WORD_LEN: usize = 15;
const MAX_GLOSS_LEN: usize = 50;

const SKIP_WORDS: &[&str] = &[
    "all", "and", "are", "boy", "but", "can", "day", "did", "eat", "for", "get", "had", "has",
    "her", "him", "his", "how", "its", "may", "new", "not", "now", "oil", "old", "one", "our",
    "out", "run", "see", "set", "she", "sit", "the", "two", "use", "was", "way", "who", "you",
];

/// Optional numeric sense marker after a root, `*wer- (2)`.
const SENSE_MARKER: &str = r"(?:\s*(\(\d+\)))?";

/// A root string found in etymology text, before canonicalization. A sense
/// marker, when present, is kept in `raw_root` (`wer- (2)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMention {
    pub raw_root: String,
    pub gloss: Option<String>,
}

/// Compiled reconstructed-form and gloss patterns, built once per source.
#[derive(Debug, Clone)]
pub struct RootMentionExtractor {
    patterns: Vec<Regex>,
    glosses: Vec<Regex>,
}

impl RootMentionExtractor {
    pub fn new() -> Result<Self, SourceError> {
        let roots = [
            format!(r"(?i)\bproto-[a-z\-]+\s+\*({ROOT_CHARS}+){SENSE_MARKER}"),
            format!(r"(?i)\bPIE\s+\*({ROOT_CHARS}+){SENSE_MARKER}"),
            format!(r"\*({ROOT_CHARS}{{3,}}){SENSE_MARKER}"),
            format!(r"(?i)\bfrom\s+(?:the\s+)?root\s+\*?({ROOT_CHARS}{{3,}}){SENSE_MARKER}"),
            format!(r"(?i)\bultimately\s+from\s+\*({ROOT_CHARS}{{3,}}){SENSE_MARKER}"),
            format!(r"(?i)\bSanskrit\s+({ROOT_CHARS}{{3,}})\s*\("),
            format!(r"(?i)\bLatin\s+({ROOT_CHARS}{{3,}})\s*\("),
        ];
        // Anchored at the end of a root mention.
        let glosses = [
            r#"^-?\*?\s*\(\s*["“]([^"”]+)["”]\s*\)"#,
            r#"^-?\*?\s*["“]([^"”]+)["”]"#,
            r#"^-?\*?\s*\(([^)]+)\)"#,
        ];
        Ok(Self {
            patterns: roots
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?,
            glosses: glosses
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    /// Distinct root mentions in `text`, each with the gloss written right
    /// after its first occurrence.
    pub fn mentions(&self, text: &str) -> Vec<RootMention> {
        let mut found: BTreeMap<String, Option<String>> = BTreeMap::new();
        for pattern in &self.patterns {
            for caps in pattern.captures_iter(text) {
                let Some(root) = caps.get(1) else { continue };
                let core = root.as_str().trim_matches('-');
                if core.is_empty() || !core.chars().any(char::is_alphabetic) {
                    continue;
                }
                let sense = caps.get(2);
                let raw = match sense {
                    Some(sense) => text[root.start()..sense.end()].trim_start_matches('-'),
                    None => core,
                };
                if found.contains_key(raw) {
                    continue;
                }
                let end = sense.map_or(root.end(), |s| s.end());
                found.insert(raw.to_string(), self.gloss_after(&text[end..]));
            }
        }
        found
            .into_iter()
            .map(|(raw_root, gloss)| RootMention { raw_root, gloss })
            .collect()
    }

    /// Meaning given at the start of `rest`: `("meaning")`, `"meaning"` or
    /// `(meaning)`. Glosses of 50 characters or more and bare numbers are
    /// ignored.
    pub fn gloss_after(&self, rest: &str) -> Option<String> {
        self.glosses.iter().find_map(|re| {
            let gloss = re.captures(rest)?.get(1)?.as_str().trim();
            let usable = !gloss.is_empty()
                && gloss.chars().count() < MAX_GLOSS_LEN
                && !gloss.chars().all(|c| c.is_ascii_digit());
            usable.then(|| gloss.to_string())
        })
    }
}

/// Headwords worth pairing: 3 to 15 letters and not a function word.
pub fn is_valid_word(word: &str) -> bool {
    let len = word.chars().count();
    (MIN_WORD_LEN..=MAX_WORD_LEN).contains(&len)
        && word.chars().all(char::is_alphabetic)
        && !SKIP_WORDS.contains(&word.to_lowercase().as_str())
}
