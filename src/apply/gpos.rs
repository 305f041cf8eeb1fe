//! Positioning subtable application.
//!
//! Positioning accumulates value records and records attachments by
//! index and anchor reference; anchor coordinates are resolved by a
//! later stage, never here.

use super::gsub::payload_slot;
use super::matching::{Matcher, SkipFilter};
use super::Applied;
use crate::buffer::{AttachKind, GlyphBuffer, UNSAFE_TO_BREAK};
use crate::layout::{ClassDef, Coverage, CursiveRecord, MarkRecord, PairValue, ValueRecord};

pub(super) fn single_pos1(
    coverage: &Coverage,
    value: &ValueRecord,
    buf: &mut GlyphBuffer,
    pos: usize,
) -> Option<Applied> {
    coverage.match_glyph(buf.glyphs[pos])?;
    buf.ensure_positions();
    value.apply(&mut buf.positions.as_mut().unwrap()[pos]);
    Some(Applied::at(pos + 1))
}

pub(super) fn single_pos2(
    coverage: &Coverage,
    values: &[ValueRecord],
    buf: &mut GlyphBuffer,
    pos: usize,
) -> Option<Applied> {
    let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
    let value = *payload_slot(values, index, "single positioning")?;
    buf.ensure_positions();
    value.apply(&mut buf.positions.as_mut().unwrap()[pos]);
    Some(Applied::at(pos + 1))
}

pub(super) fn pair_pos1(
    coverage: &Coverage,
    sets: &[Vec<PairValue>],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
    let next = Matcher::new(buf, filter, 0, end).next_matchable(pos)?;
    let second = buf.glyphs[next];
    let set = payload_slot(sets, index, "pair set")?;
    // Pair sets are scanned linearly for the matching second glyph.
    let pair = set.iter().find(|pv| pv.second == second)?;
    let (first_value, second_value) = (pair.first_value, pair.second_value);
    apply_pair(buf, pos, next, first_value, second_value);
    Some(Applied::at(next))
}

#[allow(clippy::too_many_arguments)]
pub(super) fn pair_pos2(
    coverage: &Coverage,
    first_classes: &ClassDef,
    second_classes: &ClassDef,
    second_class_count: u16,
    values: &[(ValueRecord, ValueRecord)],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    coverage.match_glyph(buf.glyphs[pos])?;
    let next = Matcher::new(buf, filter, 0, end).next_matchable(pos)?;
    let c1 = first_classes.lookup(buf.glyphs[pos]) as usize;
    let c2 = second_classes.lookup(buf.glyphs[next]) as usize;
    if c2 >= second_class_count as usize {
        return None;
    }
    let cell = c1 * second_class_count as usize + c2;
    let &(first_value, second_value) = payload_slot(values, cell, "pair class matrix")?;
    apply_pair(buf, pos, next, first_value, second_value);
    Some(Applied::at(next))
}

fn apply_pair(
    buf: &mut GlyphBuffer,
    pos: usize,
    next: usize,
    first_value: ValueRecord,
    second_value: ValueRecord,
) {
    let crosses = buf.spans_clusters(pos, next + 1);
    buf.ensure_positions();
    let positions = buf.positions.as_mut().unwrap();
    first_value.apply(&mut positions[pos]);
    second_value.apply(&mut positions[next]);
    if crosses {
        buf.mark_unsafe(pos, next + 1, UNSAFE_TO_BREAK);
    }
}

pub(super) fn cursive_pos1(
    coverage: &Coverage,
    records: &[CursiveRecord],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    let index = coverage.match_glyph(buf.glyphs[pos])? as usize;
    let record = *payload_slot(records, index, "cursive attachment")?;
    if let Some(exit) = record.exit {
        // This glyph exits; the next matchable glyph's entry attaches
        // to it.
        let next = Matcher::new(buf, filter, 0, end).next_matchable(pos)?;
        let next_index = coverage.match_glyph(buf.glyphs[next])? as usize;
        let entry = records.get(next_index)?.entry?;
        let crosses = buf.spans_clusters(pos, next + 1);
        buf.ensure_positions();
        let positions = buf.positions.as_mut().unwrap();
        let p = &mut positions[next];
        p.attach_to = pos as i32;
        p.attach_kind = AttachKind::Cursive;
        p.anchor_ref.cursive = entry;
        positions[pos].anchor_ref.cursive = exit;
        if crosses {
            buf.mark_unsafe(pos, next + 1, UNSAFE_TO_BREAK);
        }
        return Some(Applied::at(next));
    }
    if let Some(entry) = record.entry {
        // Entry only: look back for the previous covered glyph that
        // exits and attach to it.
        let prev = Matcher::new(buf, filter, 0, end).prev_matchable(pos)?;
        let prev_index = coverage.match_glyph(buf.glyphs[prev])? as usize;
        let exit = records.get(prev_index)?.exit?;
        let crosses = buf.spans_clusters(prev, pos + 1);
        buf.ensure_positions();
        let positions = buf.positions.as_mut().unwrap();
        let p = &mut positions[pos];
        p.attach_to = prev as i32;
        p.attach_kind = AttachKind::Cursive;
        p.anchor_ref.cursive = entry;
        positions[prev].anchor_ref.cursive = exit;
        if crosses {
            buf.mark_unsafe(prev, pos + 1, UNSAFE_TO_BREAK);
        }
        return Some(Applied::at(pos + 1));
    }
    None
}

#[allow(clippy::too_many_arguments)]
pub(super) fn mark_base_pos1(
    mark_coverage: &Coverage,
    base_coverage: &Coverage,
    class_count: u16,
    marks: &[MarkRecord],
    base_anchors: &[Vec<Option<u16>>],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    let mark_index = mark_coverage.match_glyph(buf.glyphs[pos])? as usize;
    let mark = *payload_slot(marks, mark_index, "mark array")?;
    if mark.class >= class_count {
        tracing::warn!(class = mark.class, "mark class exceeds declared class count");
        return None;
    }
    // The nearest preceding non-mark glyph must be the covered base; no
    // other base may be skipped in between.
    let base_pos = Matcher::new(buf, filter, 0, end).prev_base(pos)?;
    let base_index = base_coverage.match_glyph(buf.glyphs[base_pos])? as usize;
    let anchors = payload_slot(base_anchors, base_index, "base anchor matrix")?;
    let base_anchor = (*anchors.get(mark.class as usize)?)?;
    attach_mark(
        buf,
        pos,
        base_pos,
        AttachKind::MarkToBase,
        mark,
        base_anchor,
        0,
    );
    Some(Applied::at(pos + 1))
}

#[allow(clippy::too_many_arguments)]
pub(super) fn mark_lig_pos1(
    mark_coverage: &Coverage,
    ligature_coverage: &Coverage,
    class_count: u16,
    marks: &[MarkRecord],
    ligature_anchors: &[Vec<Vec<Option<u16>>>],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    let mark_index = mark_coverage.match_glyph(buf.glyphs[pos])? as usize;
    let mark = *payload_slot(marks, mark_index, "mark array")?;
    if mark.class >= class_count {
        tracing::warn!(class = mark.class, "mark class exceeds declared class count");
        return None;
    }
    let lig_pos = Matcher::new(buf, filter, 0, end).prev_base(pos)?;
    let lig_index = ligature_coverage.match_glyph(buf.glyphs[lig_pos])? as usize;
    let components = payload_slot(ligature_anchors, lig_index, "ligature attach")?;
    if components.is_empty() {
        return None;
    }
    // TODO: component selection should be caret- or cluster-driven; the
    // last component stands in until a selection hook exists.
    let component = components.len() - 1;
    let lig_anchor = (*components[component].get(mark.class as usize)?)?;
    attach_mark(
        buf,
        pos,
        lig_pos,
        AttachKind::MarkToLigature,
        mark,
        lig_anchor,
        component as u16,
    );
    Some(Applied::at(pos + 1))
}

#[allow(clippy::too_many_arguments)]
pub(super) fn mark_mark_pos1(
    mark1_coverage: &Coverage,
    mark2_coverage: &Coverage,
    class_count: u16,
    marks: &[MarkRecord],
    mark2_anchors: &[Vec<Option<u16>>],
    filter: SkipFilter<'_>,
    buf: &mut GlyphBuffer,
    pos: usize,
    end: usize,
) -> Option<Applied> {
    let mark_index = mark1_coverage.match_glyph(buf.glyphs[pos])? as usize;
    let mark = *payload_slot(marks, mark_index, "mark array")?;
    if mark.class >= class_count {
        tracing::warn!(class = mark.class, "mark class exceeds declared class count");
        return None;
    }
    let mark2_pos = Matcher::new(buf, filter, 0, end).prev_matchable(pos)?;
    let mark2_index = mark2_coverage.match_glyph(buf.glyphs[mark2_pos])? as usize;
    let anchors = payload_slot(mark2_anchors, mark2_index, "mark2 anchor matrix")?;
    let mark2_anchor = (*anchors.get(mark.class as usize)?)?;
    attach_mark(
        buf,
        pos,
        mark2_pos,
        AttachKind::MarkToMark,
        mark,
        mark2_anchor,
        0,
    );
    Some(Applied::at(pos + 1))
}

fn attach_mark(
    buf: &mut GlyphBuffer,
    pos: usize,
    target: usize,
    kind: AttachKind,
    mark: MarkRecord,
    target_anchor: u16,
    component: u16,
) {
    let crosses = buf.spans_clusters(target, pos + 1);
    buf.ensure_positions();
    let p = &mut buf.positions.as_mut().unwrap()[pos];
    p.attach_kind = kind;
    p.attach_to = target as i32;
    p.attach_class = mark.class;
    p.anchor_ref.mark = mark.anchor;
    p.anchor_ref.base = target_anchor;
    p.anchor_ref.ligature_comp = component;
    if crosses {
        buf.mark_unsafe(target, pos + 1, UNSAFE_TO_BREAK);
    }
}
