//! Contextual and chained contextual application, shared by GSUB and
//! GPOS: the payload shapes are identical and the sequence records
//! dispatch into the owning table's lookup list.

use smallvec::SmallVec;

use super::gsub::payload_slot;
use super::matching::{MatchPositions, Matcher, SkipFilter};
use super::{merge_edits, Applied, ApplyContext, MAX_NESTED_LOOKUPS};
use crate::buffer::{EditSpan, GlyphBuffer, UNSAFE_TO_BREAK};
use crate::layout::{
    ChainClassRule, ChainRule, ClassDef, ClassSequenceRule, Coverage, SequenceLookupRecord,
    SequenceRule,
};

impl<'a> ApplyContext<'a> {
    pub(super) fn context1(
        &mut self,
        coverage: &Coverage,
        sets: &[Vec<SequenceRule>],
        filter: SkipFilter<'a>,
        buf: &mut GlyphBuffer,
        pos: usize,
        end: usize,
    ) -> Option<Applied> {
        let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
        let rules = payload_slot(sets, index, "contextual rule set")?;
        for rule in rules {
            let mut positions = MatchPositions::new();
            positions.push(pos);
            {
                let matcher = Matcher::new(buf, filter, 0, end);
                if matcher
                    .match_glyph_sequence_forward(pos, &rule.input, Some(&mut positions))
                    .is_none()
                {
                    continue;
                }
            }
            return self.apply_records(&rule.records, &positions, buf, end);
        }
        None
    }

    pub(super) fn context2(
        &mut self,
        coverage: &Coverage,
        classes: &ClassDef,
        sets: &[Vec<ClassSequenceRule>],
        filter: SkipFilter<'a>,
        buf: &mut GlyphBuffer,
        pos: usize,
        end: usize,
    ) -> Option<Applied> {
        coverage.match_glyph(buf.glyphs[pos])?;
        let set_index = classes.lookup(buf.glyphs[pos]) as usize;
        // Class rule sets are legitimately sparse; a missing set is a
        // plain no-match.
        let rules = sets.get(set_index)?;
        for rule in rules {
            let mut positions = MatchPositions::new();
            positions.push(pos);
            {
                let matcher = Matcher::new(buf, filter, 0, end);
                if matcher
                    .match_class_sequence_forward(pos, classes, &rule.input, Some(&mut positions))
                    .is_none()
                {
                    continue;
                }
            }
            return self.apply_records(&rule.records, &positions, buf, end);
        }
        None
    }

    pub(super) fn context3(
        &mut self,
        coverages: &[Coverage],
        records: &[SequenceLookupRecord],
        filter: SkipFilter<'a>,
        buf: &mut GlyphBuffer,
        pos: usize,
        end: usize,
    ) -> Option<Applied> {
        let first = coverages.first()?;
        first.match_glyph(buf.glyphs[pos])?;
        let mut positions = MatchPositions::new();
        positions.push(pos);
        {
            let matcher = Matcher::new(buf, filter, 0, end);
            matcher.match_coverage_sequence_forward(pos, &coverages[1..], Some(&mut positions))?;
        }
        self.apply_records(records, &positions, buf, end)
    }

    pub(super) fn chain_context1(
        &mut self,
        coverage: &Coverage,
        sets: &[Vec<ChainRule>],
        filter: SkipFilter<'a>,
        buf: &mut GlyphBuffer,
        pos: usize,
        end: usize,
    ) -> Option<Applied> {
        let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
        let rules = payload_slot(sets, index, "chained contextual rule set")?;
        for rule in rules {
            let mut positions = MatchPositions::new();
            positions.push(pos);
            {
                let matcher = Matcher::new(buf, filter, 0, end);
                let Some(input_end) =
                    matcher.match_glyph_sequence_forward(pos, &rule.input, Some(&mut positions))
                else {
                    continue;
                };
                if matcher
                    .match_glyph_sequence_backward(pos, &rule.backtrack)
                    .is_none()
                {
                    continue;
                }
                if matcher
                    .match_glyph_sequence_forward(input_end, &rule.lookahead, None)
                    .is_none()
                {
                    continue;
                }
            }
            return self.apply_records(&rule.records, &positions, buf, end);
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn chain_context2(
        &mut self,
        coverage: &Coverage,
        backtrack_classes: &ClassDef,
        input_classes: &ClassDef,
        lookahead_classes: &ClassDef,
        sets: &[Vec<ChainClassRule>],
        filter: SkipFilter<'a>,
        buf: &mut GlyphBuffer,
        pos: usize,
        end: usize,
    ) -> Option<Applied> {
        coverage.match_glyph(buf.glyphs[pos])?;
        let set_index = input_classes.lookup(buf.glyphs[pos]) as usize;
        let rules = sets.get(set_index)?;
        for rule in rules {
            let mut positions = MatchPositions::new();
            positions.push(pos);
            {
                let matcher = Matcher::new(buf, filter, 0, end);
                let Some(input_end) = matcher.match_class_sequence_forward(
                    pos,
                    input_classes,
                    &rule.input,
                    Some(&mut positions),
                ) else {
                    continue;
                };
                if matcher
                    .match_class_sequence_backward(pos, backtrack_classes, &rule.backtrack)
                    .is_none()
                {
                    continue;
                }
                if matcher
                    .match_class_sequence_forward(input_end, lookahead_classes, &rule.lookahead, None)
                    .is_none()
                {
                    continue;
                }
            }
            return self.apply_records(&rule.records, &positions, buf, end);
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn chain_context3(
        &mut self,
        backtrack: &[Coverage],
        input: &[Coverage],
        lookahead: &[Coverage],
        records: &[SequenceLookupRecord],
        filter: SkipFilter<'a>,
        buf: &mut GlyphBuffer,
        pos: usize,
        end: usize,
    ) -> Option<Applied> {
        let mut positions = MatchPositions::new();
        {
            let matcher = Matcher::new(buf, filter, 0, end);
            matcher.match_chained_forward(pos, backtrack, input, lookahead, &mut positions)?;
        }
        self.apply_records(records, &positions, buf, end)
    }

    /// Applies a matching rule's sequence-lookup records.
    ///
    /// The input map starts as a copy of the matched positions; every
    /// edit produced by a nested lookup re-maps the whole map (and the
    /// span end) before the next record runs. This remapping is the only
    /// way context rules stay correct across substitutions that change
    /// the buffer length.
    fn apply_records(
        &mut self,
        records: &[SequenceLookupRecord],
        match_positions: &[usize],
        buf: &mut GlyphBuffer,
        end: usize,
    ) -> Option<Applied> {
        if self.depth >= MAX_NESTED_LOOKUPS {
            tracing::trace!("nested lookup depth cap reached");
            return None;
        }
        let extent_start = *match_positions.first()?;
        let extent_end = *match_positions.last()? + 1;
        let crossed = buf.spans_clusters(extent_start, extent_end);
        let mut input_map: SmallVec<[isize; 16]> =
            match_positions.iter().map(|&p| p as isize).collect();
        let mut end = end;
        let mut net: Option<EditSpan> = None;
        let mut applied = false;
        let table = self.table;
        for record in records {
            let Some(&target) = input_map.get(record.sequence_index as usize) else {
                continue;
            };
            if target < 0 {
                continue;
            }
            let Some(lookup) = table.lookup(record.lookup_list_index) else {
                tracing::warn!(
                    index = record.lookup_list_index,
                    "sequence record names a missing lookup"
                );
                continue;
            };
            self.depth += 1;
            let result = self.apply_lookup(lookup, buf, target as usize, 0, end);
            self.depth -= 1;
            let Some(inner) = result else {
                continue;
            };
            applied = true;
            if let Some(edit) = inner.edit {
                for entry in input_map.iter_mut() {
                    if *entry >= 0 {
                        *entry = edit
                            .remap(*entry as usize)
                            .map(|v| v as isize)
                            .unwrap_or(-1);
                    }
                }
                end = (end as isize + edit.delta()).max(0) as usize;
                net = Some(merge_edits(net, edit));
            }
        }
        if !applied {
            return None;
        }
        let new_pos = match input_map.last() {
            Some(&p) if p >= 0 => p as usize + 1,
            _ => net
                .map(|e| e.from + e.len)
                .unwrap_or(extent_end)
                .min(buf.len()),
        };
        if crossed {
            let start = match input_map.first() {
                Some(&p) if p >= 0 => p as usize,
                _ => extent_start.min(buf.len()),
            };
            buf.mark_unsafe(start, new_pos.min(buf.len()), UNSAFE_TO_BREAK);
        }
        Some(Applied {
            new_pos,
            edit: net,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::GlyphId;
    use crate::font::{GlyphClass, SyntheticFont};
    use crate::layout::{
        LayoutTable, Lookup, LookupFlags, LookupKind, SubtablePayload,
    };

    fn single_subst(index: u16, from: GlyphId, to: GlyphId) -> Lookup {
        Lookup::new(
            index,
            LookupKind::SingleSubst,
            vec![SubtablePayload::SingleSubst2 {
                coverage: Coverage::from_glyphs(vec![from]),
                substitutes: vec![to],
            }],
        )
    }

    fn record(sequence_index: u16, lookup_list_index: u16) -> SequenceLookupRecord {
        SequenceLookupRecord {
            sequence_index,
            lookup_list_index,
        }
    }

    /// Contextual rule over [20, 21, 22] substituting all three glyphs,
    /// with ignore-marks filtering (scenario: contextual with skips).
    fn context_table(flags: LookupFlags) -> LayoutTable {
        let mut context = Lookup::new(
            0,
            LookupKind::Context,
            vec![SubtablePayload::Context1 {
                coverage: Coverage::from_glyphs(vec![20]),
                sets: vec![vec![SequenceRule {
                    input: vec![21, 22],
                    records: vec![record(0, 1), record(1, 2), record(2, 3)],
                }]],
            }],
        );
        context.flags = flags;
        LayoutTable {
            lookups: vec![
                context,
                single_subst(1, 20, 60),
                single_subst(2, 21, 61),
                single_subst(3, 22, 62),
            ],
            ..LayoutTable::default()
        }
    }

    fn run(table: &LayoutTable, font: &SyntheticFont, glyphs: Vec<GlyphId>, pos: usize) -> (bool, Vec<GlyphId>) {
        let mut buf = GlyphBuffer::from_glyphs(glyphs);
        let mut ctx = ApplyContext::new(font, table);
        let len = buf.len();
        let applied = ctx
            .apply_lookup(&table.lookups[0], &mut buf, pos, 0, len)
            .is_some();
        (applied, buf.glyphs)
    }

    #[test]
    fn contextual_substitution_applies_records() {
        let table = context_table(LookupFlags::empty());
        let font = SyntheticFont::new();
        let (applied, glyphs) = run(&table, &font, vec![20, 21, 22], 0);
        assert!(applied);
        assert_eq!(glyphs, vec![60, 61, 62]);
    }

    #[test]
    fn contextual_mismatch_leaves_buffer_untouched() {
        let table = context_table(LookupFlags::empty());
        let font = SyntheticFont::new();
        let (applied, glyphs) = run(&table, &font, vec![20, 21, 23], 0);
        assert!(!applied);
        assert_eq!(glyphs, vec![20, 21, 23]);
    }

    #[test]
    fn contextual_with_ignored_marks_matches_across_them() {
        let table = context_table(LookupFlags::IGNORE_MARKS);
        let mut font = SyntheticFont::new();
        font.set_mark_class(90, 1);
        let (applied, glyphs) = run(&table, &font, vec![20, 90, 21, 22], 0);
        assert!(applied);
        assert_eq!(glyphs, vec![60, 90, 61, 62]);
    }

    #[test]
    fn contextual_at_interior_position() {
        let table = context_table(LookupFlags::empty());
        let font = SyntheticFont::new();
        let (applied, glyphs) = run(&table, &font, vec![10, 20, 21, 22], 1);
        assert!(applied);
        assert_eq!(glyphs, vec![10, 60, 61, 62]);
    }

    #[test]
    fn nested_edit_remaps_later_records() {
        // Record 0 expands the first glyph into three; record 1 must
        // still find the second matched glyph at its shifted position.
        let expand = Lookup::new(
            1,
            LookupKind::MultipleSubst,
            vec![SubtablePayload::MultipleSubst1 {
                coverage: Coverage::from_glyphs(vec![20]),
                sequences: vec![vec![70, 71, 72]],
            }],
        );
        let context = Lookup::new(
            0,
            LookupKind::Context,
            vec![SubtablePayload::Context1 {
                coverage: Coverage::from_glyphs(vec![20]),
                sets: vec![vec![SequenceRule {
                    input: vec![21],
                    records: vec![record(0, 1), record(1, 2)],
                }]],
            }],
        );
        let table = LayoutTable {
            lookups: vec![context, expand, single_subst(2, 21, 61)],
            ..LayoutTable::default()
        };
        let font = SyntheticFont::new();
        let (applied, glyphs) = run(&table, &font, vec![20, 21], 0);
        assert!(applied);
        assert_eq!(glyphs, vec![70, 71, 72, 61]);
    }

    #[test]
    fn chained_context_checks_backtrack_and_lookahead() {
        let chain = Lookup::new(
            0,
            LookupKind::ChainContext,
            vec![SubtablePayload::ChainContext3 {
                backtrack: vec![Coverage::from_glyphs(vec![10])],
                input: vec![Coverage::from_glyphs(vec![20])],
                lookahead: vec![Coverage::from_glyphs(vec![30])],
                records: vec![record(0, 1)],
            }],
        );
        let table = LayoutTable {
            lookups: vec![chain, single_subst(1, 20, 80)],
            ..LayoutTable::default()
        };
        let font = SyntheticFont::new();
        let (applied, glyphs) = run(&table, &font, vec![10, 20, 30], 1);
        assert!(applied);
        assert_eq!(glyphs, vec![10, 80, 30]);
        // Missing lookahead.
        let (applied, glyphs) = run(&table, &font, vec![10, 20, 31], 1);
        assert!(!applied);
        assert_eq!(glyphs, vec![10, 20, 31]);
        // Missing backtrack.
        let (applied, _) = run(&table, &font, vec![11, 20, 30], 1);
        assert!(!applied);
    }

    #[test]
    fn class_context_matches_by_class() {
        let classes = ClassDef::List {
            start_glyph: 20,
            classes: vec![1, 2, 2],
        };
        let context = Lookup::new(
            0,
            LookupKind::Context,
            vec![SubtablePayload::Context2 {
                coverage: Coverage::from_glyphs(vec![20]),
                classes,
                sets: vec![
                    Vec::new(),
                    vec![ClassSequenceRule {
                        input: vec![2, 2],
                        records: vec![record(0, 1)],
                    }],
                ],
            }],
        );
        let table = LayoutTable {
            lookups: vec![context, single_subst(1, 20, 90)],
            ..LayoutTable::default()
        };
        let font = SyntheticFont::new();
        let (applied, glyphs) = run(&table, &font, vec![20, 21, 22], 0);
        assert!(applied);
        assert_eq!(glyphs, vec![90, 21, 22]);
        let (applied, _) = run(&table, &font, vec![20, 21, 19], 0);
        assert!(!applied);
    }

    #[test]
    fn glyph_class_context_is_ignored_for_unrelated_glyphs() {
        let table = context_table(LookupFlags::empty());
        let font = SyntheticFont::new();
        // Base class annotation must not affect literal glyph matching.
        let mut font2 = font.clone();
        font2.set_class(21, GlyphClass::Base);
        let (applied, glyphs) = run(&table, &font2, vec![20, 21, 22], 0);
        assert!(applied);
        assert_eq!(glyphs, vec![60, 61, 62]);
    }
}
