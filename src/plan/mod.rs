//! Shape plans: the compiled schedule that turns a feature set plus
//! font and selection tags into an ordered program of lookups.
//!
//! A plan is a plain value. It captures no font pointers and carries no
//! mutable state beyond its pause-hook table, so the executor can be
//! exercised on synthetic plans without a font.

mod compile;
mod execute;

pub use compile::{compile, Planner, SegmentProps};
pub use execute::{execute, ExecOutcome};

use rustc_hash::FxHashMap;

use crate::buffer::{GlyphBuffer, GlyphId};
use crate::error::Error;
use crate::tag::Tag;

/// Global mask bit, set on every glyph. Bit 31 stays reserved.
pub const GLOBAL_BIT: u32 = 1;

/// Highest allocatable mask bit index (bit 31 is reserved).
pub const MAX_MASK_BITS: u8 = 31;

bitflags::bitflags! {
    /// Per-feature planning flags.
    #[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
    pub struct FeatureFlags: u8 {
        /// The feature handles ZWNJ itself; matching must not skip it.
        const MANUAL_ZWNJ = 1;
        /// The feature handles ZWJ itself.
        const MANUAL_ZWJ = 2;
        /// Alternate selection is randomized.
        const RANDOM = 4;
        /// Lookups must not match across syllable boundaries.
        const PER_SYLLABLE = 8;
        /// The feature may be dropped without a note when absent.
        const FALLBACK = 16;
    }
}

bitflags::bitflags! {
    /// Flags attached to each scheduled lookup.
    #[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
    pub struct PlanLookupFlags: u8 {
        const AUTO_ZWJ = 1;
        const AUTO_ZWNJ = 2;
        const RANDOM = 4;
        const PER_SYLLABLE = 8;
    }
}

/// Mask allocation for one feature.
#[derive(Copy, Clone, Debug)]
pub struct MaskSlot {
    pub mask: u32,
    pub shift: u8,
    pub default_value: u32,
}

/// The plan's mask layout: a global mask seeded onto every glyph plus
/// per-feature slots for range-scoped or multi-valued features.
#[derive(Clone, Default, Debug)]
pub struct MaskLayout {
    pub global_mask: u32,
    pub slots: FxHashMap<Tag, MaskSlot>,
}

impl MaskLayout {
    pub fn slot(&self, tag: Tag) -> Option<&MaskSlot> {
        self.slots.get(&tag)
    }
}

/// A contiguous slice of the plan's lookup list with an optional pause
/// hook invoked after the slice runs.
#[derive(Copy, Clone, Debug)]
pub struct Stage {
    pub first_lookup: usize,
    pub last_lookup: usize,
    pub pause: Option<usize>,
}

/// One scheduled lookup.
#[derive(Copy, Clone, Debug)]
pub struct PlanLookup {
    pub lookup_index: u16,
    pub feature: Tag,
    pub mask: u32,
    pub flags: PlanLookupFlags,
}

/// A feature the plan selected, with its resolved value.
#[derive(Copy, Clone, Debug)]
pub struct ActiveFeature {
    pub tag: Tag,
    pub value: u32,
    pub flags: FeatureFlags,
}

/// Cluster-addressed mask override from an indexed feature range.
#[derive(Copy, Clone, Debug)]
pub struct MaskRange {
    pub start: u32,
    pub end: u32,
    pub mask: u32,
    pub value_bits: u32,
}

/// Position-policy block.
#[derive(Copy, Clone, Debug)]
pub struct Policy {
    pub strict: bool,
    pub apply_gpos: bool,
    pub zero_marks: bool,
    pub fallback_mark_pos: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            strict: false,
            apply_gpos: true,
            zero_marks: true,
            fallback_mark_pos: true,
        }
    }
}

/// Pause callback. May mutate the buffer (and is free to recompute
/// syllables or joiner annotations); an error aborts the run.
pub type PauseFn = Box<dyn Fn(&mut GlyphBuffer) -> Result<(), Error> + Send + Sync>;

/// A compiled shape plan for one (script, language, features) selection.
pub struct Plan {
    pub script: Tag,
    pub language: Tag,
    pub rtl: bool,
    pub active_features: Vec<ActiveFeature>,
    pub mask_layout: MaskLayout,
    pub mask_ranges: Vec<MaskRange>,
    pub sub_stages: Vec<Stage>,
    pub sub_lookups: Vec<PlanLookup>,
    pub pos_stages: Vec<Stage>,
    pub pos_lookups: Vec<PlanLookup>,
    pub policy: Policy,
    pub hooks: Vec<PauseFn>,
    /// Joiner classes for the font's ZWNJ/ZWJ glyphs, derived from cmap.
    pub joiner_classes: FxHashMap<GlyphId, u8>,
    /// Non-fatal compilation notes (missing features, ignored toggles).
    pub notes: Vec<String>,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("script", &self.script)
            .field("language", &self.language)
            .field("rtl", &self.rtl)
            .field("active_features", &self.active_features)
            .field("mask_layout", &self.mask_layout)
            .field("mask_ranges", &self.mask_ranges)
            .field("sub_stages", &self.sub_stages)
            .field("sub_lookups", &self.sub_lookups)
            .field("pos_stages", &self.pos_stages)
            .field("pos_lookups", &self.pos_lookups)
            .field("policy", &self.policy)
            .field("hooks_len", &self.hooks.len())
            .field("joiner_classes", &self.joiner_classes)
            .field("notes", &self.notes)
            .finish()
    }
}

impl Plan {
    /// Validates stage bounds and pause-hook indices. Failure here is a
    /// programmer error, not a font problem.
    pub fn validate(&self) -> Result<(), Error> {
        validate_stages(&self.sub_stages, self.sub_lookups.len(), self.hooks.len())?;
        validate_stages(&self.pos_stages, self.pos_lookups.len(), self.hooks.len())
    }

    pub fn feature_value(&self, tag: Tag) -> Option<u32> {
        self.active_features
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.value)
    }
}

fn validate_stages(stages: &[Stage], lookup_count: usize, hook_count: usize) -> Result<(), Error> {
    let mut cursor = 0;
    for stage in stages {
        if stage.first_lookup != cursor
            || stage.last_lookup < stage.first_lookup
            || stage.last_lookup > lookup_count
        {
            return Err(Error::Internal("plan stage bounds are not contiguous"));
        }
        if let Some(hook) = stage.pause {
            if hook >= hook_count {
                return Err(Error::Internal("plan stage names a missing pause hook"));
            }
        }
        cursor = stage.last_lookup;
    }
    if cursor != lookup_count {
        return Err(Error::Internal("plan stages do not cover the lookup list"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_plan() -> Plan {
        Plan {
            script: crate::tag::DFLT_SCRIPT,
            language: crate::tag::DFLT_LANG,
            rtl: false,
            active_features: Vec::new(),
            mask_layout: MaskLayout::default(),
            mask_ranges: Vec::new(),
            sub_stages: Vec::new(),
            sub_lookups: Vec::new(),
            pos_stages: Vec::new(),
            pos_lookups: Vec::new(),
            policy: Policy::default(),
            hooks: Vec::new(),
            joiner_classes: FxHashMap::default(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn stage_validation_checks_contiguity_and_hooks() {
        let mut plan = empty_plan();
        plan.sub_lookups = vec![
            PlanLookup {
                lookup_index: 0,
                feature: crate::tag::features::LIGA,
                mask: GLOBAL_BIT,
                flags: PlanLookupFlags::empty(),
            };
            3
        ];
        plan.sub_stages = vec![
            Stage { first_lookup: 0, last_lookup: 2, pause: None },
            Stage { first_lookup: 2, last_lookup: 3, pause: None },
        ];
        plan.validate().unwrap();

        plan.sub_stages[1].first_lookup = 1;
        assert!(plan.validate().is_err());

        plan.sub_stages[1].first_lookup = 2;
        plan.sub_stages[1].pause = Some(0);
        assert!(plan.validate().is_err());
    }
}
