//! Plan execution: drives the lookup applicator over a glyph buffer,
//! stage by stage, then runs the position policies.

use unicode_normalization::char::is_combining_mark;

use super::{Plan, PlanLookup, PlanLookupFlags, GLOBAL_BIT};
use crate::apply::ApplyContext;
use crate::buffer::{AttachKind, GlyphBuffer, JOINER_ZWJ, JOINER_ZWNJ};
use crate::error::Error;
use crate::font::{GlyphClass, ShapedFont};
use crate::layout::LayoutTable;

/// What the run actually did; drives the fallback position policies.
#[derive(Copy, Clone, Default, Debug)]
pub struct ExecOutcome {
    pub gsub_applied: bool,
    pub gpos_applied: bool,
}

/// Applies the plan to the buffer: mask seeding, the GSUB program with
/// pauses, the GPOS program, then the position-policy post-pass. The
/// buffer is exclusively owned by the executor for the duration.
pub fn execute(
    plan: &Plan,
    font: &dyn ShapedFont,
    buf: &mut GlyphBuffer,
) -> Result<ExecOutcome, Error> {
    plan.validate()?;
    seed_masks(plan, buf);
    let mut outcome = ExecOutcome::default();

    let gsub_table = font.gsub();
    for (index, stage) in plan.sub_stages.iter().enumerate() {
        let _span = tracing::trace_span!("gsub_stage", stage = index).entered();
        if let Some(table) = gsub_table {
            let mut ctx = ApplyContext::new(font, table);
            for plan_lookup in &plan.sub_lookups[stage.first_lookup..stage.last_lookup] {
                outcome.gsub_applied |=
                    run_lookup(plan, &mut ctx, table, plan_lookup, buf);
            }
        }
        if let Some(hook) = stage.pause {
            (plan.hooks[hook])(buf)?;
            debug_assert!(buf.validate().is_ok());
        }
    }

    if plan.policy.apply_gpos {
        if let Some(table) = font.gpos() {
            buf.ensure_positions();
            for (index, stage) in plan.pos_stages.iter().enumerate() {
                let _span = tracing::trace_span!("gpos_stage", stage = index).entered();
                let mut ctx = ApplyContext::new(font, table);
                for plan_lookup in &plan.pos_lookups[stage.first_lookup..stage.last_lookup] {
                    outcome.gpos_applied |=
                        run_lookup(plan, &mut ctx, table, plan_lookup, buf);
                }
                if let Some(hook) = stage.pause {
                    (plan.hooks[hook])(buf)?;
                }
            }
        }
    }

    position_policies(plan, font, buf, outcome);
    Ok(outcome)
}

/// Seeds per-glyph masks from the layout's global mask, preserving any
/// bits an engine's mask hook already set, then applies feature ranges
/// by cluster.
fn seed_masks(plan: &Plan, buf: &mut GlyphBuffer) {
    let len = buf.len();
    let global = if plan.mask_layout.global_mask == 0 {
        GLOBAL_BIT
    } else {
        plan.mask_layout.global_mask
    };
    match &mut buf.masks {
        Some(masks) => {
            for m in masks.iter_mut() {
                *m |= global;
            }
        }
        None => buf.masks = Some(vec![global; len]),
    }
    if plan.mask_ranges.is_empty() {
        return;
    }
    let clusters = buf.clusters.clone();
    let masks = buf.masks.as_mut().unwrap();
    for range in &plan.mask_ranges {
        for i in 0..len {
            let cluster = clusters.as_ref().map(|c| c[i]).unwrap_or(i as u32);
            if cluster >= range.start && cluster < range.end {
                masks[i] = (masks[i] & !range.mask) | range.value_bits;
            }
        }
    }
}

fn run_lookup(
    plan: &Plan,
    ctx: &mut ApplyContext<'_>,
    table: &LayoutTable,
    plan_lookup: &PlanLookup,
    buf: &mut GlyphBuffer,
) -> bool {
    let Some(lookup) = table.lookup(plan_lookup.lookup_index) else {
        tracing::warn!(
            index = plan_lookup.lookup_index,
            "plan references a lookup the table does not have"
        );
        return false;
    };
    if lookup.is_reverse() {
        // Reverse chaining lookups process the whole span in one call.
        let len = buf.len();
        return ctx.apply_lookup(lookup, buf, 0, 0, len).is_some();
    }
    let mut applied = false;
    let mut pos = 0;
    while pos < buf.len() {
        if !position_allowed(plan, plan_lookup, buf, pos) {
            pos += 1;
            continue;
        }
        let end = if plan_lookup.flags.contains(PlanLookupFlags::PER_SYLLABLE) {
            buf.span_end(pos)
        } else {
            buf.len()
        };
        let alt = alt_value(plan, plan_lookup, buf, pos);
        match ctx.apply_lookup(lookup, buf, pos, alt, end) {
            Some(result) => {
                applied = true;
                pos = result.new_pos.max(pos + 1);
            }
            None => pos += 1,
        }
    }
    applied
}

fn position_allowed(plan: &Plan, plan_lookup: &PlanLookup, buf: &GlyphBuffer, pos: usize) -> bool {
    if buf.mask_at(pos) & plan_lookup.mask == 0 {
        return false;
    }
    let joiner = match &buf.joiners {
        Some(joiners) => joiners[pos],
        None => plan
            .joiner_classes
            .get(&buf.glyphs[pos])
            .copied()
            .unwrap_or(0),
    };
    if joiner & JOINER_ZWJ != 0 && plan_lookup.flags.contains(PlanLookupFlags::AUTO_ZWJ) {
        return false;
    }
    if joiner & JOINER_ZWNJ != 0 && plan_lookup.flags.contains(PlanLookupFlags::AUTO_ZWNJ) {
        return false;
    }
    true
}

/// Alternate argument for a lookup at a position: random features pick
/// the last alternate, slotted features read the per-glyph value, and
/// global features use the plan-wide value.
fn alt_value(plan: &Plan, plan_lookup: &PlanLookup, buf: &GlyphBuffer, pos: usize) -> i32 {
    if plan_lookup.flags.contains(PlanLookupFlags::RANDOM) {
        return -1;
    }
    if let Some(slot) = plan.mask_layout.slot(plan_lookup.feature) {
        if buf.masks.is_some() {
            return ((buf.mask_at(pos) & slot.mask) >> slot.shift) as i32;
        }
        return slot.default_value as i32;
    }
    plan.feature_value(plan_lookup.feature).unwrap_or(1) as i32
}

/// A glyph is a mark if GDEF says so, its source codepoint is in
/// general category Mark, or positioning already attached it as one.
fn is_mark(font: &dyn ShapedFont, buf: &GlyphBuffer, index: usize) -> bool {
    if font.glyph_class(buf.glyphs[index]) == GlyphClass::Mark {
        return true;
    }
    if let Some(positions) = &buf.positions {
        if matches!(
            positions[index].attach_kind,
            AttachKind::MarkToBase | AttachKind::MarkToLigature | AttachKind::MarkToMark
        ) {
            return true;
        }
    }
    if let Some(codepoints) = &buf.codepoints {
        if let Some(c) = char::from_u32(codepoints[index]) {
            if is_combining_mark(c) {
                return true;
            }
        }
    }
    false
}

fn position_policies(plan: &Plan, font: &dyn ShapedFont, buf: &mut GlyphBuffer, outcome: ExecOutcome) {
    if !plan.policy.fallback_mark_pos && !plan.policy.zero_marks {
        return;
    }
    buf.ensure_positions();
    let marks: Vec<usize> = (0..buf.len())
        .filter(|&i| is_mark(font, buf, i))
        .collect();
    if marks.is_empty() {
        return;
    }

    if plan.policy.fallback_mark_pos && !outcome.gpos_applied {
        let mut attachments = Vec::new();
        for &i in &marks {
            if buf.positions.as_ref().unwrap()[i].attach_kind != AttachKind::None {
                continue;
            }
            if let Some(base) = (0..i).rev().find(|&j| !is_mark(font, buf, j)) {
                attachments.push((i, base));
            }
        }
        let positions = buf.positions.as_mut().unwrap();
        for (mark, base) in attachments {
            let p = &mut positions[mark];
            p.attach_kind = AttachKind::MarkToBase;
            p.attach_to = base as i32;
        }
    }

    if plan.policy.zero_marks {
        let keep_origin = !outcome.gpos_applied && !plan.rtl;
        let positions = buf.positions.as_mut().unwrap();
        for &i in &marks {
            let p = &mut positions[i];
            let advance = p.x_advance;
            p.x_advance = 0;
            p.y_advance = 0;
            if keep_origin {
                p.x_offset -= advance;
            }
        }
    }
}
