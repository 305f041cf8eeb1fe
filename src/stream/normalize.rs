//! Unicode normalization of the carry, with cluster provenance.
//!
//! Decomposition assigns every expanded codepoint the source rune's
//! cluster; composition gives the engine's compose hook first refusal
//! and keeps the minimum cluster of the merged pair.

use unicode_normalization::char::{canonical_combining_class, compose, decompose_canonical};

use crate::engine::{Normalization, ScriptEngine};
use crate::tag::{tag_from_bytes, Tag};

/// Normalization actually performed on a run.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResolvedNormalization {
    None,
    Composed,
    Decomposed,
}

/// Scripts whose shaping canonically prefers decomposed input.
const DECOMPOSED_SCRIPTS: [Tag; 12] = [
    tag_from_bytes(b"deva"),
    tag_from_bytes(b"beng"),
    tag_from_bytes(b"guru"),
    tag_from_bytes(b"gujr"),
    tag_from_bytes(b"orya"),
    tag_from_bytes(b"taml"),
    tag_from_bytes(b"telu"),
    tag_from_bytes(b"knda"),
    tag_from_bytes(b"mlym"),
    tag_from_bytes(b"sinh"),
    tag_from_bytes(b"khmr"),
    tag_from_bytes(b"hang"),
];

pub fn resolve_mode(preference: Normalization, script: Tag) -> ResolvedNormalization {
    match preference {
        Normalization::None => ResolvedNormalization::None,
        Normalization::Composed => ResolvedNormalization::Composed,
        Normalization::Decomposed => ResolvedNormalization::Decomposed,
        Normalization::Auto => {
            if DECOMPOSED_SCRIPTS.contains(&script) {
                ResolvedNormalization::Decomposed
            } else {
                ResolvedNormalization::Composed
            }
        }
    }
}

/// Normalizes a run of runes with their clusters.
pub fn normalize(
    engine: &dyn ScriptEngine,
    mode: ResolvedNormalization,
    runes: &[char],
    clusters: &[u32],
) -> (Vec<char>, Vec<u32>) {
    debug_assert_eq!(runes.len(), clusters.len());
    if mode == ResolvedNormalization::None {
        return (runes.to_vec(), clusters.to_vec());
    }
    let mut decomposed: Vec<(char, u32)> = Vec::with_capacity(runes.len());
    for (&r, &cluster) in runes.iter().zip(clusters) {
        decompose_canonical(r, |d| decomposed.push((d, cluster)));
    }
    canonical_reorder(&mut decomposed);
    let composed = compose_pairs(engine, mode, &decomposed);
    composed.into_iter().unzip()
}

/// Canonical ordering: bubble combining marks into non-decreasing
/// combining-class order, keeping cluster ids attached.
fn canonical_reorder(items: &mut [(char, u32)]) {
    let mut i = 1;
    while i < items.len() {
        let ccc = canonical_combining_class(items[i].0);
        if ccc != 0 {
            let mut j = i;
            while j > 0 {
                let prev = canonical_combining_class(items[j - 1].0);
                if prev <= ccc {
                    break;
                }
                items.swap(j - 1, j);
                j -= 1;
            }
        }
        i += 1;
    }
}

/// Pairwise composition: the engine's compose hook runs first; Unicode
/// canonical composition applies only in composed mode. A composed pair
/// takes the minimum cluster of its parts.
fn compose_pairs(
    engine: &dyn ScriptEngine,
    mode: ResolvedNormalization,
    items: &[(char, u32)],
) -> Vec<(char, u32)> {
    let mut out: Vec<(char, u32)> = Vec::with_capacity(items.len());
    let mut starter: Option<usize> = None;
    let mut last_ccc: u8 = 0;
    for &(ch, cluster) in items {
        let ccc = canonical_combining_class(ch);
        if let Some(si) = starter {
            let blocked = last_ccc != 0 && last_ccc >= ccc;
            if !blocked {
                let a = out[si].0;
                let candidate = engine.compose(a, ch).or_else(|| {
                    if mode == ResolvedNormalization::Composed {
                        compose(a, ch)
                    } else {
                        None
                    }
                });
                if let Some(c) = candidate {
                    out[si].0 = c;
                    out[si].1 = out[si].1.min(cluster);
                    continue;
                }
            }
        }
        out.push((ch, cluster));
        if ccc == 0 {
            starter = Some(out.len() - 1);
            last_ccc = 0;
        } else {
            last_ccc = ccc;
        }
    }
    out
}
