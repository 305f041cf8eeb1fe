//! Substitution subtable application.

use super::matching::{MatchPositions, Matcher, SkipFilter};
use super::Applied;
use crate::buffer::{GlyphBuffer, GlyphId, UNSAFE_TO_BREAK};
use crate::layout::{Coverage, Ligature};

/// Indexes parallel payload data by coverage index, logging when the
/// parsed table is inconsistent. A malformed payload is a no-match,
/// never an abort.
pub(super) fn payload_slot<'t, T>(items: &'t [T], index: usize, what: &'static str) -> Option<&'t T> {
    let item = items.get(index);
    if item.is_none() {
        tracing::warn!(index, table = what, "coverage index out of payload range");
    }
    item
}

pub(super) fn single_subst1(
    coverage: &Coverage,
    delta: i16,
    buf: &mut GlyphBuffer,
    pos: usize,
) -> Option<Applied> {
    let gid = buf.glyphs[pos];
    coverage.match_glyph(gid)?;
    buf.set(pos, (gid as i32 + delta as i32) as GlyphId);
    Some(Applied::at(pos + 1))
}

pub(super) fn single_subst2(
    coverage: &Coverage,
    substitutes: &[GlyphId],
    buf: &mut GlyphBuffer,
    pos: usize,
) -> Option<Applied> {
    let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
    let subst = *payload_slot(substitutes, index, "single substitution")?;
    buf.set(pos, subst);
    Some(Applied::at(pos + 1))
}

pub(super) fn multiple_subst1(
    coverage: &Coverage,
    sequences: &[Vec<GlyphId>],
    buf: &mut GlyphBuffer,
    pos: usize,
) -> Option<Applied> {
    let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
    let sequence = payload_slot(sequences, index, "multiple substitution")?;
    if sequence.is_empty() {
        tracing::warn!(index, "multiple substitution sequence must not be empty");
        return None;
    }
    let edit = buf.replace(pos, pos + 1, sequence);
    Some(Applied {
        new_pos: pos + sequence.len(),
        edit: Some(edit),
    })
}

pub(super) fn alternate_subst1(
    coverage: &Coverage,
    alternates: &[Vec<GlyphId>],
    buf: &mut GlyphBuffer,
    pos: usize,
    alt: i32,
) -> Option<Applied> {
    let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
    let set = payload_slot(alternates, index, "alternate substitution")?;
    if set.is_empty() {
        return None;
    }
    let choice = if alt < 0 {
        set.len() - 1
    } else {
        alt as usize
    };
    let subst = *set.get(choice)?;
    buf.set(pos, subst);
    Some(Applied::at(pos + 1))
}

pub(super) fn ligature_subst1(
    coverage: &Coverage,
    sets: &[Vec<Ligature>],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
    let set = payload_slot(sets, index, "ligature substitution")?;
    // Rules are tried in payload order; the first whose components all
    // match wins.
    let (glyph, extent_end) = {
        let matcher = Matcher::new(buf, filter, 0, end);
        let mut found = None;
        for lig in set {
            let Some((&first, rest)) = lig.components.split_first() else {
                tracing::warn!(index, "ligature rule with no components");
                continue;
            };
            if first != buf.glyphs[pos] {
                continue;
            }
            if rest.is_empty() {
                found = Some((lig.glyph, pos + 1));
                break;
            }
            let mut positions = MatchPositions::new();
            if let Some(last) =
                matcher.match_glyph_sequence_forward(pos, rest, Some(&mut positions))
            {
                found = Some((lig.glyph, last + 1));
                break;
            }
        }
        found?
    };
    // The full extent is replaced, including glyphs the filter skipped
    // between components.
    let crosses = buf.spans_clusters(pos, extent_end);
    buf.merge_clusters(pos, extent_end);
    let edit = buf.replace(pos, extent_end, &[glyph]);
    if crosses {
        buf.mark_unsafe(edit.from, edit.from + edit.len, UNSAFE_TO_BREAK);
    }
    Some(Applied {
        new_pos: pos + 1,
        edit: Some(edit),
    })
}

/// Reverse chaining single substitution walks the span from the end
/// toward `pos`; substitutions change downstream match results, which is
/// why the direction is mandatory.
#[allow(clippy::too_many_arguments)]
pub(super) fn reverse_chain_subst1(
    coverage: &Coverage,
    backtrack: &[Coverage],
    lookahead: &[Coverage],
    substitutes: &[GlyphId],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    let mut applied = false;
    let mut i = end;
    while i > pos {
        i -= 1;
        let subst = {
            let matcher = Matcher::new(buf, filter, 0, end);
            if filter.skips(buf, i) {
                continue;
            }
            let Some(ci) = coverage.match_glyph(buf.glyphs[i]) else {
                continue;
            };
            if matcher.match_coverage_sequence_backward(i, backtrack).is_none() {
                continue;
            }
            if matcher
                .match_coverage_sequence_forward(i, lookahead, None)
                .is_none()
            {
                continue;
            }
            match payload_slot(substitutes, ci as usize, "reverse chaining substitution") {
                Some(&subst) => subst,
                None => continue,
            }
        };
        buf.set(i, subst);
        applied = true;
    }
    applied.then(|| Applied::at(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::ApplyContext;
    use crate::font::SyntheticFont;
    use crate::layout::{LayoutTable, Lookup, LookupKind, SubtablePayload};

    fn apply(
        lookup: Lookup,
        glyphs: Vec<GlyphId>,
        pos: usize,
        alt: i32,
    ) -> (Option<Applied>, GlyphBuffer) {
        let font = SyntheticFont::new();
        let table = LayoutTable {
            lookups: vec![lookup],
            ..LayoutTable::default()
        };
        let mut buf = GlyphBuffer::from_glyphs(glyphs);
        let mut ctx = ApplyContext::new(&font, &table);
        let len = buf.len();
        let lookup = &table.lookups[0];
        let applied = ctx.apply_lookup(lookup, &mut buf, pos, alt, len);
        (applied, buf)
    }

    #[test]
    fn single_delta_substitution() {
        let lookup = Lookup::new(
            0,
            LookupKind::SingleSubst,
            vec![SubtablePayload::SingleSubst1 {
                coverage: Coverage::from_glyphs(vec![18]),
                delta: 5,
            }],
        );
        let (applied, buf) = apply(lookup, vec![18, 19], 0, 0);
        assert_eq!(applied.unwrap().new_pos, 1);
        assert_eq!(buf.glyphs, vec![23, 19]);
    }

    #[test]
    fn alternate_selection_and_failure() {
        let payload = SubtablePayload::AlternateSubst1 {
            coverage: Coverage::from_glyphs(vec![18]),
            alternates: vec![vec![20, 21, 22]],
        };
        let lookup = || Lookup::new(0, LookupKind::AlternateSubst, vec![payload.clone()]);

        let (applied, buf) = apply(lookup(), vec![18], 0, 0);
        assert!(applied.is_some());
        assert_eq!(buf.glyphs, vec![20]);

        let (applied, buf) = apply(lookup(), vec![18], 0, 1);
        assert!(applied.is_some());
        assert_eq!(buf.glyphs, vec![21]);

        let (applied, buf) = apply(lookup(), vec![18], 0, -1);
        assert!(applied.is_some());
        assert_eq!(buf.glyphs, vec![22]);

        // Uncovered glyph: unchanged, not applied.
        let (applied, buf) = apply(lookup(), vec![19], 0, 0);
        assert!(applied.is_none());
        assert_eq!(buf.glyphs, vec![19]);

        // Out-of-range alternate index fails.
        let (applied, _) = apply(lookup(), vec![18], 0, 3);
        assert!(applied.is_none());
    }

    #[test]
    fn multiple_substitution_returns_edit() {
        let lookup = Lookup::new(
            0,
            LookupKind::MultipleSubst,
            vec![SubtablePayload::MultipleSubst1 {
                coverage: Coverage::from_glyphs(vec![10]),
                sequences: vec![vec![30, 31, 32]],
            }],
        );
        let (applied, buf) = apply(lookup, vec![9, 10, 11], 1, 0);
        let applied = applied.unwrap();
        assert_eq!(applied.new_pos, 4);
        let edit = applied.edit.unwrap();
        assert_eq!((edit.from, edit.to, edit.len), (1, 2, 3));
        assert_eq!(buf.glyphs, vec![9, 30, 31, 32, 11]);
    }

    #[test]
    fn ligature_consumes_full_extent() {
        let lookup = Lookup::new(
            0,
            LookupKind::LigatureSubst,
            vec![SubtablePayload::LigatureSubst1 {
                coverage: Coverage::from_glyphs(vec![21]),
                sets: vec![vec![Ligature {
                    glyph: 30,
                    components: vec![21, 22],
                }]],
            }],
        );
        let (applied, buf) = apply(lookup, vec![20, 21, 22], 1, 0);
        let applied = applied.unwrap();
        assert_eq!(applied.new_pos, 2);
        let edit = applied.edit.unwrap();
        assert_eq!((edit.from, edit.to, edit.len), (1, 3, 1));
        assert_eq!(buf.glyphs, vec![20, 30]);
    }

    #[test]
    fn ligature_merges_clusters_and_marks_unsafe() {
        let lookup = Lookup::new(
            0,
            LookupKind::LigatureSubst,
            vec![SubtablePayload::LigatureSubst1 {
                coverage: Coverage::from_glyphs(vec![20]),
                sets: vec![vec![Ligature {
                    glyph: 30,
                    components: vec![20, 21],
                }]],
            }],
        );
        let font = SyntheticFont::new();
        let table = LayoutTable {
            lookups: vec![lookup],
            ..LayoutTable::default()
        };
        let mut buf = GlyphBuffer::from_glyphs(vec![20, 21]);
        buf.clusters = Some(vec![0, 1]);
        let mut ctx = ApplyContext::new(&font, &table);
        let lookup = &table.lookups[0];
        ctx.apply_lookup(lookup, &mut buf, 0, 0, 2).unwrap();
        assert_eq!(buf.glyphs, vec![30]);
        assert_eq!(buf.clusters.as_ref().unwrap(), &vec![0]);
        assert_eq!(buf.unsafe_flags.as_ref().unwrap()[0] & UNSAFE_TO_BREAK, UNSAFE_TO_BREAK);
    }

    #[test]
    fn reverse_chain_walks_backward() {
        // Substitute 20 -> 40 when followed by 21. The trailing pair is
        // rewritten first, so the inner pair still sees its lookahead.
        let lookup = Lookup::new(
            0,
            LookupKind::ReverseChainSubst,
            vec![SubtablePayload::ReverseChainSubst1 {
                coverage: Coverage::from_glyphs(vec![20]),
                backtrack: vec![],
                lookahead: vec![Coverage::from_glyphs(vec![21])],
                substitutes: vec![40],
            }],
        );
        let (applied, buf) = apply(lookup, vec![20, 21, 20, 21], 0, 0);
        assert!(applied.is_some());
        assert_eq!(buf.glyphs, vec![40, 21, 40, 21]);
    }

    #[test]
    fn mismatched_payload_is_never_applied() {
        // A declared ligature lookup carrying a single-subst payload is
        // skipped under ConcreteFirst and escalated under ConcreteOnly;
        // either way nothing is applied and the buffer is untouched.
        let payload = SubtablePayload::SingleSubst1 {
            coverage: Coverage::from_glyphs(vec![18]),
            delta: 1,
        };
        let lookup = Lookup::new(0, LookupKind::LigatureSubst, vec![payload]);
        let (applied, buf) = apply(lookup, vec![18], 0, 0);
        assert!(applied.is_none());
        assert_eq!(buf.glyphs, vec![18]);
    }
}
