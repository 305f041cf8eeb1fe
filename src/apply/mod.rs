//! The GSUB/GPOS lookup applicator.
//!
//! [`ApplyContext::apply_lookup`] applies one lookup at one buffer
//! position: subtables are tried in order and the first that reports a
//! match wins. All matching respects the lookup's skip filter; all
//! buffer rewrites are reported as [`EditSpan`]s so that held indices
//! can be remapped instead of dangling.

mod context;
mod gpos;
mod gsub;
mod matching;

pub use matching::{MatchPositions, Matcher, SkipFilter};

use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::{EditSpan, GlyphBuffer};
use crate::font::ShapedFont;
use crate::layout::{LayoutTable, Lookup, SubtablePayload};

/// Nested sequence-lookup depth cap.
pub const MAX_NESTED_LOOKUPS: u8 = 4;

/// Lookup execution mode, kept while structured and byte-addressable
/// payload paths coexist upstream. This build carries only structured
/// payloads, so the flag governs dispatch-time strictness: under
/// `ConcreteOnly` a payload that contradicts its lookup's declared type
/// is escalated instead of skipped.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExecMode {
    ConcreteFirst,
    ConcreteOnly,
}

static EXEC_MODE: AtomicU32 = AtomicU32::new(0);

/// Reads the process-wide execution mode. Races with writers are benign;
/// the last write wins.
pub fn exec_mode() -> ExecMode {
    match EXEC_MODE.load(Ordering::Relaxed) {
        0 => ExecMode::ConcreteFirst,
        _ => ExecMode::ConcreteOnly,
    }
}

/// Sets the process-wide execution mode.
pub fn set_exec_mode(mode: ExecMode) {
    EXEC_MODE.store(
        match mode {
            ExecMode::ConcreteFirst => 0,
            ExecMode::ConcreteOnly => 1,
        },
        Ordering::Relaxed,
    );
}

/// Result of a successful lookup application.
#[derive(Copy, Clone, Debug)]
pub struct Applied {
    /// First position the caller's scan should continue from.
    pub new_pos: usize,
    /// Net buffer rewrite, when the application changed the length or
    /// rewrote a span.
    pub edit: Option<EditSpan>,
}

impl Applied {
    pub fn at(new_pos: usize) -> Self {
        Self {
            new_pos,
            edit: None,
        }
    }
}

/// Folds a subsequent edit (in post-`acc` coordinates) into an
/// accumulated bounding edit, preserving the net length delta so the
/// remap rule stays sound for callers holding pre-edit indices.
pub fn merge_edits(acc: Option<EditSpan>, next: EditSpan) -> EditSpan {
    let Some(a) = acc else { return next };
    let delta_a = a.delta();
    let pre_from = if next.from <= a.from {
        next.from
    } else {
        (next.from as isize - delta_a).max(a.from as isize) as usize
    };
    let pre_to = if next.to <= a.from {
        next.to
    } else {
        (next.to as isize - delta_a).max(a.to as isize) as usize
    };
    let from = a.from.min(pre_from);
    let to = a.to.max(pre_to);
    let len = ((to - from) as isize + delta_a + next.delta()).max(0) as usize;
    EditSpan { from, to, len }
}

/// Applicator state for one table. The font and lookup list are shared
/// read-only; the buffer is borrowed per call.
pub struct ApplyContext<'a> {
    pub font: &'a dyn ShapedFont,
    pub table: &'a LayoutTable,
    depth: u8,
}

impl<'a> ApplyContext<'a> {
    pub fn new(font: &'a dyn ShapedFont, table: &'a LayoutTable) -> Self {
        Self {
            font,
            table,
            depth: 0,
        }
    }

    /// Applies `lookup` at `pos`, bounded by `end` (per-syllable gating
    /// passes a span end here; otherwise the buffer length). `alt`
    /// selects among alternates; negative selects the last.
    ///
    /// Returns `None` when nothing matched. Malformed payload data
    /// (out-of-range indices, contradictory lengths) is logged and
    /// treated as no-match, never as an abort.
    pub fn apply_lookup(
        &mut self,
        lookup: &Lookup,
        buf: &mut GlyphBuffer,
        pos: usize,
        alt: i32,
        end: usize,
    ) -> Option<Applied> {
        let end = end.min(buf.len());
        if pos >= end {
            return None;
        }
        let filter = SkipFilter::new(self.font, lookup);
        // Reverse chaining scans its whole span for candidates itself;
        // for everything else a filtered glyph cannot start a match.
        if !lookup.is_reverse() && filter.skips(buf, pos) {
            return None;
        }
        for subtable in &lookup.subtables {
            if subtable.kind() != lookup.kind {
                if exec_mode() == ExecMode::ConcreteOnly {
                    tracing::error!(
                        lookup = lookup.index,
                        "subtable payload contradicts its lookup type"
                    );
                    return None;
                }
                tracing::warn!(
                    lookup = lookup.index,
                    "skipping subtable payload that contradicts its lookup type"
                );
                continue;
            }
            if let Some(applied) = self.apply_subtable(subtable, filter, buf, pos, alt, end) {
                return Some(applied);
            }
        }
        None
    }

    fn apply_subtable(
        &mut self,
        subtable: &SubtablePayload,
        filter: SkipFilter<'a>,
        buf: &mut GlyphBuffer,
        pos: usize,
        alt: i32,
        end: usize,
    ) -> Option<Applied> {
        use SubtablePayload::*;
        match subtable {
            SingleSubst1 { coverage, delta } => {
                gsub::single_subst1(coverage, *delta, buf, pos)
            }
            SingleSubst2 {
                coverage,
                substitutes,
            } => gsub::single_subst2(coverage, substitutes, buf, pos),
            MultipleSubst1 {
                coverage,
                sequences,
            } => gsub::multiple_subst1(coverage, sequences, buf, pos),
            AlternateSubst1 {
                coverage,
                alternates,
            } => gsub::alternate_subst1(coverage, alternates, buf, pos, alt),
            LigatureSubst1 { coverage, sets } => {
                gsub::ligature_subst1(coverage, sets, filter, buf, pos, end)
            }
            ReverseChainSubst1 {
                coverage,
                backtrack,
                lookahead,
                substitutes,
            } => gsub::reverse_chain_subst1(
                coverage,
                backtrack,
                lookahead,
                substitutes,
                filter,
                buf,
                pos,
                end,
            ),
            Context1 { coverage, sets } => {
                self.context1(coverage, sets, filter, buf, pos, end)
            }
            Context2 {
                coverage,
                classes,
                sets,
            } => self.context2(coverage, classes, sets, filter, buf, pos, end),
            Context3 { coverages, records } => {
                self.context3(coverages, records, filter, buf, pos, end)
            }
            ChainContext1 { coverage, sets } => {
                self.chain_context1(coverage, sets, filter, buf, pos, end)
            }
            ChainContext2 {
                coverage,
                backtrack_classes,
                input_classes,
                lookahead_classes,
                sets,
            } => self.chain_context2(
                coverage,
                backtrack_classes,
                input_classes,
                lookahead_classes,
                sets,
                filter,
                buf,
                pos,
                end,
            ),
            ChainContext3 {
                backtrack,
                input,
                lookahead,
                records,
            } => self.chain_context3(backtrack, input, lookahead, records, filter, buf, pos, end),
            SinglePos1 { coverage, value } => gpos::single_pos1(coverage, value, buf, pos),
            SinglePos2 { coverage, values } => gpos::single_pos2(coverage, values, buf, pos),
            PairPos1 { coverage, sets } => {
                gpos::pair_pos1(coverage, sets, filter, buf, pos, end)
            }
            PairPos2 {
                coverage,
                first_classes,
                second_classes,
                second_class_count,
                values,
            } => gpos::pair_pos2(
                coverage,
                first_classes,
                second_classes,
                *second_class_count,
                values,
                filter,
                buf,
                pos,
                end,
            ),
            CursivePos1 { coverage, records } => {
                gpos::cursive_pos1(coverage, records, filter, buf, pos, end)
            }
            MarkBasePos1 {
                mark_coverage,
                base_coverage,
                class_count,
                marks,
                base_anchors,
            } => gpos::mark_base_pos1(
                mark_coverage,
                base_coverage,
                *class_count,
                marks,
                base_anchors,
                filter,
                buf,
                pos,
                end,
            ),
            MarkLigPos1 {
                mark_coverage,
                ligature_coverage,
                class_count,
                marks,
                ligature_anchors,
            } => gpos::mark_lig_pos1(
                mark_coverage,
                ligature_coverage,
                *class_count,
                marks,
                ligature_anchors,
                filter,
                buf,
                pos,
                end,
            ),
            MarkMarkPos1 {
                mark1_coverage,
                mark2_coverage,
                class_count,
                marks,
                mark2_anchors,
            } => gpos::mark_mark_pos1(
                mark1_coverage,
                mark2_coverage,
                *class_count,
                marks,
                mark2_anchors,
                filter,
                buf,
                pos,
                end,
            ),
        }
    }
}
