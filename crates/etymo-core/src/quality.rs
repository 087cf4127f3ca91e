//! Trivial-pair detection.
//!
//! A pair is trivial when the root's surface form shows up literally in both
//! words (`salary`/`salad` under `SAL`): that is plain derivation, not
//! divergence. The check is a substring heuristic. It can pass compounds that
//! are trivial in spirit and reject divergent pairs that happen to share the
//! letters.

use crate::canonical::CanonicalRootId;

/// Surface forms shorter than this match too many words by accident.
pub const MIN_SURFACE_LEN: usize = 3;

pub fn is_trivial(root_id: &CanonicalRootId, word1: &str, word2: &str) -> bool {
    let surface = root_id.surface_form();
    if surface.chars().count() < MIN_SURFACE_LEN {
        return false;
    }
    let word1 = word1.to_lowercase();
    let word2 = word2.to_lowercase();
    word1.contains(&surface) && word2.contains(&surface)
}
