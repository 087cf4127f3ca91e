//! Root canonicalization: noisy etymology root strings in, stable ids out.
//!
//! A canonical id is the uppercase, diacritic-free core of a root followed by
//! an optional numeric sense marker, e.g. `WER(2)`. Rejection is a normal
//! outcome and is reported as `None`.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Shortest core accepted without being on [`SHORT_ROOT_ALLOW_LIST`].
pub const MIN_ROOT_LEN: usize = 4;

/// Reconstructed-form and language prefixes stripped before normalization.
/// Matched case-insensitively and repeatedly, so `from PIE *bhel-` works.
const MARKER_PREFIXES: &[&str] = &[
    "proto-indo-european ",
    "proto-germanic ",
    "proto-celtic ",
    "proto-italic ",
    "proto-slavic ",
    "proto-baltic ",
    "ultimately from ",
    "the root ",
    "from ",
    "root ",
    "pie ",
    "sanskrit ",
    "latin ",
    "greek ",
];

/// Well attested roots whose canonical core is shorter than [`MIN_ROOT_LEN`].
const SHORT_ROOT_ALLOW_LIST: &[&str] = &[
    "DEI", "DEK", "DHE", "GEN", "GNO", "KAP", "KEL", "LEG", "MED", "MEN", "NEK", "PED", "REG",
    "SAL", "SED", "SEK", "SPE", "STA", "TEN", "WEG", "WER", "WID", "YEU",
];

/// Language names and function words that extraction regularly mistakes for
/// roots. Compared in lowercase.
const DENY_LIST: &[&str] = &[
    "akin", "also", "ancient", "and", "anglo", "arabic", "borrowed", "celtic", "cognate",
    "compare", "dutch", "early", "english", "french", "frisian", "from", "german", "germanic",
    "gothic", "greek", "hebrew", "influenced", "irish", "italian", "latin", "latvian",
    "literally", "lithuanian", "meaning", "middle", "norman", "norse", "origin", "originally",
    "perhaps", "persian", "polish", "possibly", "probably", "proto", "related", "root",
    "sanskrit", "saterland", "scots", "sense", "slavic", "source", "spanish", "term", "that",
    "the", "this", "uncertain", "unknown", "welsh", "with", "word",
];

/// Normalized root identifier. Construct with [`canonicalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRootId(String);

impl CanonicalRootId {
    /// Wraps an id that was canonicalized earlier and persisted, without
    /// re-running the rules (which may have changed since).
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id without its sense marker.
    pub fn core(&self) -> &str {
        match self.0.find('(') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn sense_marker(&self) -> Option<&str> {
        self.0.find('(').map(|idx| &self.0[idx..])
    }

    /// Lowercase rendering of the core, as it would appear inside a word.
    pub fn surface_form(&self) -> String {
        self.core().to_lowercase()
    }
}

impl fmt::Display for CanonicalRootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalRootId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn canonicalize(raw_root: &str) -> Option<CanonicalRootId> {
    let token = strip_markers(raw_root);
    if token.is_empty() {
        return None;
    }

    let (body, sense) = split_sense_marker(token);
    if is_denied(&body.to_lowercase()) {
        return None;
    }

    let core = fold_variants(&normalize_core(body));
    if core.is_empty() {
        return None;
    }
    if core.chars().count() < MIN_ROOT_LEN && !SHORT_ROOT_ALLOW_LIST.contains(&core.as_str()) {
        return None;
    }
    if is_denied(&core.to_lowercase()) {
        return None;
    }

    Some(CanonicalRootId(match sense {
        Some(marker) => format!("{core}{marker}"),
        None => core,
    }))
}

fn strip_markers(raw: &str) -> &str {
    let mut current = raw.trim();
    loop {
        let before = current;
        current = current.trim_start_matches('*').trim_start();
        for prefix in MARKER_PREFIXES {
            let matched = current
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matched {
                current = current[prefix.len()..].trim_start();
                break;
            }
        }
        if current == before {
            return current.trim_end();
        }
    }
}

/// Splits a trailing `(<digits>)` marker, ignoring hyphens and whitespace
/// after it (`*wer-(2)-`).
fn split_sense_marker(token: &str) -> (&str, Option<&str>) {
    let trimmed = token.trim_end_matches(|c: char| c == '-' || c.is_whitespace());
    let Some(without_close) = trimmed.strip_suffix(')') else {
        return (token, None);
    };
    let Some(open) = without_close.rfind('(') else {
        return (token, None);
    };
    let digits = &without_close[open + 1..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return (token, None);
    }
    (&trimmed[..open], Some(&trimmed[open..]))
}

fn is_denied(token: &str) -> bool {
    let token = token.trim_matches(|c: char| !c.is_alphanumeric());
    DENY_LIST.contains(&token)
}

/// Compatibility decomposition, combining marks dropped, letters only,
/// uppercased. Subscript laryngeal indices and hyphens disappear here.
fn normalize_core(body: &str) -> String {
    body.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_uppercase)
        .collect()
}

fn is_consonant(c: char) -> bool {
    c.is_ascii_uppercase() && !matches!(c, 'A' | 'E' | 'I' | 'O' | 'U')
}

struct VariantFamily {
    stem: &'static str,
    infix: &'static str,
    suffix: &'static str,
    canonical: &'static str,
}

impl VariantFamily {
    fn matches(&self, token: &str) -> bool {
        let Some(rest) = token.strip_prefix(self.stem) else {
            return false;
        };
        let Some(middle) = rest.strip_suffix(self.suffix) else {
            return false;
        };
        middle.chars().all(|c| self.infix.contains(c))
    }
}

const fn family(
    stem: &'static str,
    infix: &'static str,
    suffix: &'static str,
    canonical: &'static str,
) -> VariantFamily {
    VariantFamily {
        stem,
        infix,
        suffix,
        canonical,
    }
}

/// Ablaut grades and orthographic variants that name the same root.
/// Each family matches the whole token: stem, then only infix letters, then suffix.
const VARIANT_FAMILIES: &[VariantFamily] = &[
    family("HAB", "BJ", "AN", "HABJAN"),
    family("HAF", "FT", "AN", "HABJAN"),
    family("HEB", "BJ", "AN", "HABJAN"),
    family("WER", "HDNT", "", "WER"),
    family("WOR", "HDNT", "", "WER"),
    family("WUR", "HDNT", "", "WER"),
    family("BHEL", "HJLW", "", "BHEL"),
    family("BHOL", "HJLW", "", "BHEL"),
    family("BHUL", "HJLW", "", "BHEL"),
    family("DHE", "HJ", "", "DHE"),
    family("DHO", "HJ", "", "DHE"),
    family("DHA", "HJ", "", "DHE"),
];

fn fold_variants(core: &str) -> String {
    let shifted = shift_glides(&collapse_geminates(core));
    VARIANT_FAMILIES
        .iter()
        .find(|f| f.matches(&shifted))
        .map(|f| f.canonical.to_string())
        .unwrap_or(shifted)
}

fn collapse_geminates(core: &str) -> String {
    let mut out = String::with_capacity(core.len());
    let mut prev: Option<char> = None;
    for c in core.chars() {
        if prev == Some(c) && is_consonant(c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Germanic `-ian`/`-ij` spellings after a consonant become `-jan`/`-j`.
fn shift_glides(core: &str) -> String {
    let chars: Vec<char> = core.chars().collect();
    let mut out = String::with_capacity(core.len());
    for (i, &c) in chars.iter().enumerate() {
        let after_consonant = i > 0 && is_consonant(chars[i - 1]);
        if c == 'I' && after_consonant {
            match chars.get(i + 1..i + 3) {
                Some(['A', 'N']) => {
                    out.push('J');
                    continue;
                }
                _ if chars.get(i + 1) == Some(&'J') => continue,
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> Option<String> {
        canonicalize(raw).map(|id| id.as_str().to_string())
    }

    #[test]
    fn strips_reconstruction_markers_and_prefixes() {
        assert_eq!(canon("*sal-").as_deref(), Some("SAL"));
        assert_eq!(canon("PIE *bhel-").as_deref(), Some("BHEL"));
        assert_eq!(canon("from PIE root *ghen-").as_deref(), Some("GHEN"));
        assert_eq!(canon("Proto-Germanic *habjan-").as_deref(), Some("HABJAN"));
        assert_eq!(canon("  ghen ").as_deref(), Some("GHEN"));
    }

    #[test]
    fn strips_diacritics_through_decomposition() {
        assert_eq!(canon("*wr̥-idh-").as_deref(), Some("WRIDH"));
        assert_eq!(canon("*deḱ-").as_deref(), Some("DEK"));
        assert_eq!(canon("*dʰeh₁-").as_deref(), Some("DHE"));
    }

    #[test]
    fn precomposed_and_combining_forms_agree() {
        let precomposed = "*ǵʰen-";
        let combining = "*g\u{301}\u{2b0}en-";
        assert_eq!(canonicalize(precomposed), canonicalize(combining));
        assert_eq!(canon(precomposed).as_deref(), Some("GHEN"));

        let e_acute = "*kréd-";
        let e_combining = "*kre\u{301}d-";
        assert_eq!(canonicalize(e_acute), canonicalize(e_combining));
        assert_eq!(canon(e_acute).as_deref(), Some("KRED"));
    }

    #[test]
    fn sense_marker_is_part_of_identity() {
        assert_eq!(canon("*wer-(2)").as_deref(), Some("WER(2)"));
        assert_eq!(canon("*wer- (2)").as_deref(), Some("WER(2)"));
        assert_eq!(canon("*wer-").as_deref(), Some("WER"));
        assert_ne!(canonicalize("*wer-(2)"), canonicalize("*wer-(3)"));
        assert_ne!(canonicalize("*wer-(2)"), canonicalize("*wer-"));

        let id = canonicalize("*bher-(1)").expect("id");
        assert_eq!(id.core(), "BHER");
        assert_eq!(id.sense_marker(), Some("(1)"));
        assert_eq!(id.surface_form(), "bher");
    }

    #[test]
    fn short_cores_need_the_allow_list() {
        assert_eq!(canon("car"), None);
        assert_eq!(canon("*ab-"), None);
        assert_eq!(canon("*ped-").as_deref(), Some("PED"));
        assert_eq!(canon("wer(2)").as_deref(), Some("WER(2)"));
        assert_eq!(canon("*kwo-(2)"), None);
    }

    #[test]
    fn deny_list_is_case_insensitive() {
        for raw in ["Latin", "GREEK", "from", "The", "Germanic-", "*proto", "Sanskrit"] {
            assert_eq!(canon(raw), None, "{raw} should be rejected");
        }
    }

    #[test]
    fn empty_and_punctuation_only_inputs_are_rejected() {
        for raw in ["", "   ", "*", "---", "*-()", "(2)", "?!"] {
            assert_eq!(canon(raw), None, "{raw:?} should be rejected");
        }
    }

    #[test]
    fn spelling_variants_collide_on_purpose() {
        assert_eq!(canon("*habbjan-").as_deref(), Some("HABJAN"));
        assert_eq!(canon("*hebban-").as_deref(), Some("HABJAN"));
        assert_eq!(canon("*haftan-").as_deref(), Some("HABJAN"));
        assert_eq!(canon("*habian-").as_deref(), Some("HABJAN"));
        assert_eq!(canon("*wurd-").as_deref(), Some("WER"));
        assert_eq!(canon("*bholh-").as_deref(), Some("BHEL"));
    }

    #[test]
    fn folding_is_anchored_to_the_whole_token() {
        assert_eq!(canon("*swer-").as_deref(), Some("SWER"));
        assert_eq!(canon("*wera-").as_deref(), Some("WERA"));
    }

    #[test]
    fn canonical_ids_are_fixed_points() {
        for raw in ["*wer-(2)", "PIE *bhel-", "*ǵʰen-", "*habbjan-", "musculus"] {
            let id = canonicalize(raw).expect("id");
            assert_eq!(canonicalize(id.as_str()), Some(id.clone()));
        }
    }
}
