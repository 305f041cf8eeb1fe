//! Plan compilation: feature collection, mask layout, stage assembly.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::{
    ActiveFeature, FeatureFlags, MaskLayout, MaskRange, MaskSlot, PauseFn, Plan, PlanLookup,
    PlanLookupFlags, Policy, Stage, GLOBAL_BIT, MAX_MASK_BITS,
};
use crate::engine::{ScriptEngine, Selection};
use crate::error::Error;
use crate::font::ShapedFont;
use crate::layout::LayoutTable;
use crate::shaper::{Direction, FeatureRange};
use crate::tag::{features as feature_tags, tag_to_string, Tag, DFLT_LANG, DFLT_SCRIPT};

/// The per-segment selection a plan is compiled for.
#[derive(Copy, Clone, Debug)]
pub struct SegmentProps {
    pub script: Tag,
    pub language: Tag,
    pub direction: Direction,
}

/// Features every plan starts from, before engines add their own.
const DEFAULT_FEATURES: [Tag; 11] = [
    feature_tags::CCMP,
    feature_tags::LOCL,
    feature_tags::RVRN,
    feature_tags::LIGA,
    feature_tags::CLIG,
    feature_tags::CALT,
    feature_tags::CURS,
    feature_tags::DIST,
    feature_tags::KERN,
    feature_tags::MARK,
    feature_tags::MKMK,
];

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Anchor {
    Before,
    After,
}

struct PlannerFeature {
    tag: Tag,
    value: u32,
    enabled: bool,
    flags: FeatureFlags,
    /// Added by the planner or an engine rather than only by the user.
    declared: bool,
    /// Explicitly requested by the user.
    user: bool,
    /// GSUB stage counter at the time the feature was added.
    stage: usize,
}

/// Feature collection state handed to engine hooks.
///
/// Engines add features, request mask slots, and insert GSUB pause
/// stages; the compiler turns the result into a [`Plan`].
pub struct Planner {
    pub script: Tag,
    pub language: Tag,
    pub direction: Direction,
    features: Vec<PlannerFeature>,
    hooks: Vec<PauseFn>,
    /// Hook id closing GSUB stage `i`.
    stage_pauses: Vec<usize>,
    anchored: Vec<(Tag, Anchor, usize)>,
    mask_requests: FxHashMap<Tag, u32>,
}

impl Planner {
    fn new(script: Tag, language: Tag, direction: Direction) -> Self {
        Self {
            script,
            language,
            direction,
            features: Vec::new(),
            hooks: Vec::new(),
            stage_pauses: Vec::new(),
            anchored: Vec::new(),
            mask_requests: FxHashMap::default(),
        }
    }

    fn index_of(&self, tag: Tag) -> Option<usize> {
        self.features.iter().position(|f| f.tag == tag)
    }

    /// Adds a feature with flags derived from its tag, or re-enables an
    /// existing one.
    pub fn add_feature(&mut self, tag: Tag, value: u32) {
        self.add_feature_with_flags(tag, value, derive_feature_flags(tag));
    }

    pub fn add_feature_with_flags(&mut self, tag: Tag, value: u32, flags: FeatureFlags) {
        match self.index_of(tag) {
            Some(i) => {
                let f = &mut self.features[i];
                f.value = value;
                f.enabled = value != 0;
                f.flags |= flags;
            }
            None => self.features.push(PlannerFeature {
                tag,
                value,
                enabled: value != 0,
                flags,
                declared: true,
                user: false,
                stage: self.stage_pauses.len(),
            }),
        }
    }

    pub fn enable(&mut self, tag: Tag) {
        self.add_feature(tag, 1);
    }

    pub fn disable(&mut self, tag: Tag) {
        match self.index_of(tag) {
            Some(i) => {
                self.features[i].enabled = false;
                self.features[i].value = 0;
            }
            None => {
                self.add_feature(tag, 0);
            }
        }
    }

    /// Records a user toggle. User features are tracked so strict mode
    /// can fail on tags the font does not carry.
    pub fn set_user(&mut self, tag: Tag, on: bool, value: u32) {
        match self.index_of(tag) {
            Some(i) => {
                let f = &mut self.features[i];
                f.enabled = on;
                f.value = if on { value.max(1) } else { 0 };
                f.user = true;
            }
            None => self.features.push(PlannerFeature {
                tag,
                value: if on { value.max(1) } else { 0 },
                enabled: on,
                flags: derive_feature_flags(tag),
                declared: false,
                user: true,
                stage: self.stage_pauses.len(),
            }),
        }
    }

    /// Ensures a feature is scheduled without turning it on globally.
    /// Range-scoped features use this: their lookups are compiled in,
    /// but only glyphs inside the range carry the mask value.
    pub fn schedule(&mut self, tag: Tag) {
        match self.index_of(tag) {
            Some(i) => {
                self.features[i].enabled = true;
                self.features[i].user = true;
            }
            None => self.features.push(PlannerFeature {
                tag,
                value: 0,
                enabled: true,
                flags: derive_feature_flags(tag),
                declared: false,
                user: true,
                stage: self.stage_pauses.len(),
            }),
        }
    }

    /// Requests a mask slot wide enough for `max_value`.
    pub fn request_mask(&mut self, tag: Tag, max_value: u32) {
        let entry = self.mask_requests.entry(tag).or_insert(0);
        *entry = (*entry).max(max_value.max(1));
    }

    /// Closes the current GSUB stage with a pause hook; features added
    /// afterwards land in the next stage. Returns the hook id.
    pub fn add_gsub_pause(&mut self, hook: PauseFn) -> usize {
        let id = self.hooks.len();
        self.hooks.push(hook);
        self.stage_pauses.push(id);
        id
    }

    /// Anchors a pause stage immediately before the named feature's
    /// lookups.
    pub fn add_gsub_pause_before(&mut self, tag: Tag, hook: PauseFn) -> usize {
        let id = self.hooks.len();
        self.hooks.push(hook);
        self.anchored.push((tag, Anchor::Before, id));
        id
    }

    /// Anchors a pause stage immediately after the named feature's
    /// lookups.
    pub fn add_gsub_pause_after(&mut self, tag: Tag, hook: PauseFn) -> usize {
        let id = self.hooks.len();
        self.hooks.push(hook);
        self.anchored.push((tag, Anchor::After, id));
        id
    }

    /// Post-resolution view: whether a feature survived resolution with
    /// a non-zero value.
    pub fn is_enabled(&self, tag: Tag) -> bool {
        self.index_of(tag)
            .map(|i| self.features[i].enabled)
            .unwrap_or(false)
    }
}

/// Feature flag derivation rules.
fn derive_feature_flags(tag: Tag) -> FeatureFlags {
    let mut flags = FeatureFlags::empty();
    if tag == feature_tags::MARK || tag == feature_tags::MKMK {
        flags |= FeatureFlags::MANUAL_ZWJ | FeatureFlags::MANUAL_ZWNJ;
    }
    if tag == feature_tags::RLIG || feature_tags::JOINING.contains(&tag) {
        flags |= FeatureFlags::MANUAL_ZWJ;
    }
    if feature_tags::SYLLABIC.contains(&tag) {
        flags |= FeatureFlags::PER_SYLLABLE;
    }
    if tag == feature_tags::RAND {
        flags |= FeatureFlags::RANDOM;
    }
    flags
}

fn derive_lookup_flags(flags: FeatureFlags) -> PlanLookupFlags {
    let mut out = PlanLookupFlags::empty();
    if !flags.contains(FeatureFlags::MANUAL_ZWJ) {
        out |= PlanLookupFlags::AUTO_ZWJ;
    }
    if !flags.contains(FeatureFlags::MANUAL_ZWNJ) {
        out |= PlanLookupFlags::AUTO_ZWNJ;
    }
    if flags.contains(FeatureFlags::RANDOM) {
        out |= PlanLookupFlags::RANDOM;
    }
    if flags.contains(FeatureFlags::PER_SYLLABLE) {
        out |= PlanLookupFlags::PER_SYLLABLE;
    }
    out
}

/// Mask slot width for a feature argument, floored at one bit so an
/// on/off state always fits, and capped at eight.
fn bit_width(max_value: u32) -> u8 {
    let v = max_value.max(1);
    let width = (32 - (v - 1).leading_zeros()) as u8;
    width.clamp(1, 8)
}

/// A feature active for one table after resolution.
struct ResolvedFeature {
    tag: Tag,
    value: u32,
    flags: FeatureFlags,
    required: bool,
    declared: bool,
    order: usize,
    stage: usize,
    lookups: Vec<u16>,
}

/// Compiles a plan for `(font, props, engine, user features, policy)`.
pub fn compile(
    font: &dyn ShapedFont,
    props: &SegmentProps,
    engine: &mut dyn ScriptEngine,
    user_features: &[FeatureRange],
    policy: Policy,
) -> Result<Plan, Error> {
    let script = if props.script == 0 {
        DFLT_SCRIPT
    } else {
        props.script
    };
    let language = if props.language == 0 {
        DFLT_LANG
    } else {
        props.language
    };
    let selection = Selection {
        script,
        language,
        direction: props.direction,
    };
    let _span =
        tracing::debug_span!("plan_compile", script = %tag_to_string(script)).entered();

    let mut planner = Planner::new(script, language, props.direction);
    for tag in DEFAULT_FEATURES {
        planner.add_feature(tag, 1);
    }
    engine.collect_features(&mut planner, &selection);
    engine.override_features(&mut planner);

    let mut notes = Vec::new();
    for range in user_features {
        if range.is_global() {
            planner.set_user(range.tag, range.on, range.arg.max(0) as u32);
        } else {
            // Range-scoped features are scheduled unconditionally and
            // gated per glyph through their mask slot.
            planner.schedule(range.tag);
            planner.request_mask(range.tag, range.arg.max(1) as u32);
        }
    }

    let mask_layout = build_mask_layout(&planner)?;

    let mut resolved_sub = resolve_table(&planner, font.gsub(), script, language, policy, &mut notes)?;
    let resolved_pos = resolve_table(&planner, font.gpos(), script, language, policy, &mut notes)?;

    engine.post_resolve_features(&mut planner, &selection);

    let (sub_lookups, sub_stages) = assemble_stages(
        &mut resolved_sub,
        &mask_layout,
        &planner.stage_pauses,
        &planner.anchored,
    );
    let (pos_lookups, pos_stages) = {
        let mut pos = resolved_pos;
        assemble_stages(&mut pos, &mask_layout, &[], &[])
    };

    let mut active_features: Vec<ActiveFeature> = Vec::new();
    for f in sub_lookups
        .iter()
        .map(|l| l.feature)
        .chain(pos_lookups.iter().map(|l| l.feature))
    {
        if !active_features.iter().any(|a| a.tag == f) {
            let (value, flags) = planner
                .index_of(f)
                .map(|i| (planner.features[i].value, planner.features[i].flags))
                .unwrap_or((1, derive_feature_flags(f)));
            active_features.push(ActiveFeature {
                tag: f,
                value,
                flags,
            });
        }
    }

    let mut mask_ranges = Vec::new();
    for range in user_features {
        if range.is_global() {
            continue;
        }
        if let Some(slot) = mask_layout.slot(range.tag) {
            let value = if range.on { range.arg.max(1) as u32 } else { 0 };
            mask_ranges.push(MaskRange {
                start: range.start as u32,
                end: range.end as u32,
                mask: slot.mask,
                value_bits: (value << slot.shift) & slot.mask,
            });
        }
    }

    let mut joiner_classes = FxHashMap::default();
    let zwnj = font.glyph_for_codepoint(0x200C);
    if zwnj != 0 {
        *joiner_classes.entry(zwnj).or_insert(0) |= crate::buffer::JOINER_ZWNJ;
    }
    let zwj = font.glyph_for_codepoint(0x200D);
    if zwj != 0 {
        *joiner_classes.entry(zwj).or_insert(0) |= crate::buffer::JOINER_ZWJ;
    }

    let mut policy = policy;
    policy.apply_gpos = policy.apply_gpos && engine.apply_gpos();

    let mut plan = Plan {
        script,
        language,
        rtl: props.direction == Direction::RightToLeft,
        active_features,
        mask_layout,
        mask_ranges,
        sub_stages,
        sub_lookups,
        pos_stages,
        pos_lookups,
        policy,
        hooks: std::mem::take(&mut planner.hooks),
        joiner_classes,
        notes,
    };
    engine.init_plan(&mut plan);
    plan.validate()?;
    Ok(plan)
}

fn build_mask_layout(planner: &Planner) -> Result<MaskLayout, Error> {
    let mut layout = MaskLayout {
        global_mask: GLOBAL_BIT,
        slots: FxHashMap::default(),
    };
    let mut requests: Vec<(Tag, u32)> = planner
        .mask_requests
        .iter()
        .map(|(&tag, &value)| (tag, value))
        .collect();
    requests.sort_unstable_by_key(|&(tag, _)| tag);
    let mut next_bit: u8 = 1;
    for (tag, max_value) in requests {
        let width = bit_width(max_value);
        if next_bit + width > MAX_MASK_BITS {
            return Err(Error::MaskBitBudgetExhausted);
        }
        let mask = (((1u64 << width) - 1) as u32) << next_bit;
        let default_value = planner
            .index_of(tag)
            .map(|i| {
                let f = &planner.features[i];
                if f.enabled {
                    f.value
                } else {
                    0
                }
            })
            .unwrap_or(0);
        layout.global_mask |= (default_value << next_bit) & mask;
        layout.slots.insert(
            tag,
            MaskSlot {
                mask,
                shift: next_bit,
                default_value,
            },
        );
        next_bit += width;
    }
    Ok(layout)
}

fn resolve_table(
    planner: &Planner,
    table: Option<&LayoutTable>,
    script: Tag,
    language: Tag,
    policy: Policy,
    notes: &mut Vec<String>,
) -> Result<Vec<ResolvedFeature>, Error> {
    let mut resolved = Vec::new();
    let Some(table) = table else {
        return Ok(resolved);
    };
    let Some(lang_sys) = table.lang_sys(script, language) else {
        return Ok(resolved);
    };
    let mut available: FxHashMap<Tag, &crate::layout::Feature> = FxHashMap::default();
    for &fi in &lang_sys.feature_indices {
        if let Some(feature) = table.feature(fi) {
            available.entry(feature.tag).or_insert(feature);
        }
    }

    // The required feature is always active, even when user-disabled.
    if let Some(ri) = lang_sys.required_feature {
        if let Some(feature) = table.feature(ri) {
            let disabled = planner
                .index_of(feature.tag)
                .map(|i| !planner.features[i].enabled)
                .unwrap_or(false);
            if disabled {
                notes.push(format!(
                    "required feature '{}' stays active despite being disabled",
                    tag_to_string(feature.tag)
                ));
            }
            resolved.push(ResolvedFeature {
                tag: feature.tag,
                value: 1,
                flags: derive_feature_flags(feature.tag),
                required: true,
                declared: true,
                order: 0,
                stage: 0,
                lookups: feature.lookup_indices.clone(),
            });
        }
    }

    for (order, f) in planner.features.iter().enumerate() {
        if resolved.iter().any(|r| r.tag == f.tag && r.required) {
            continue;
        }
        let Some(feature) = available.get(&f.tag) else {
            if f.user && f.enabled && !f.flags.contains(FeatureFlags::FALLBACK) {
                if policy.strict {
                    return Err(Error::MissingFeature(f.tag));
                }
                notes.push(format!(
                    "requested feature '{}' not present; ignored",
                    tag_to_string(f.tag)
                ));
            }
            continue;
        };
        if !f.enabled {
            continue;
        }
        resolved.push(ResolvedFeature {
            tag: f.tag,
            value: f.value,
            flags: f.flags,
            required: false,
            declared: f.declared,
            order,
            stage: f.stage,
            lookups: feature.lookup_indices.clone(),
        });
    }
    Ok(resolved)
}

/// Orders features (required, then declared in order, then the rest by
/// tag), groups them into stages, splits stages at anchored pauses, and
/// merges each stage's lookups (mask union, flag OR, ascending index).
fn assemble_stages(
    resolved: &mut Vec<ResolvedFeature>,
    mask_layout: &MaskLayout,
    stage_pauses: &[usize],
    anchored: &[(Tag, Anchor, usize)],
) -> (Vec<PlanLookup>, Vec<Stage>) {
    resolved.sort_by(|a, b| {
        let rank = |f: &ResolvedFeature| if f.required { 0 } else if f.declared { 1 } else { 2 };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| match (rank(a), rank(b)) {
                (2, 2) => a.tag.cmp(&b.tag),
                _ => a.order.cmp(&b.order),
            })
    });

    struct StageBuild {
        members: Vec<usize>,
        pause: Option<usize>,
    }
    let stage_count = stage_pauses.len() + 1;
    let mut stages: Vec<StageBuild> = (0..stage_count)
        .map(|i| StageBuild {
            members: Vec::new(),
            pause: stage_pauses.get(i).copied(),
        })
        .collect();
    for (i, f) in resolved.iter().enumerate() {
        let s = f.stage.min(stage_count - 1);
        stages[s].members.push(i);
    }

    // Anchored pauses split the stage holding the named feature.
    for &(tag, anchor, hook) in anchored {
        let position = stages.iter().enumerate().find_map(|(si, stage)| {
            stage
                .members
                .iter()
                .position(|&fi| resolved[fi].tag == tag)
                .map(|k| (si, k))
        });
        let Some((si, k)) = position else { continue };
        let split = match anchor {
            Anchor::Before => k,
            Anchor::After => k + 1,
        };
        // The anchored pause runs between head and tail; the stage's
        // original pause stays with the tail.
        let tail = stages[si].members.split_off(split);
        let tail_pause = stages[si].pause;
        stages[si].pause = Some(hook);
        stages.insert(
            si + 1,
            StageBuild {
                members: tail,
                pause: tail_pause,
            },
        );
    }

    let mut lookups = Vec::new();
    let mut out_stages = Vec::new();
    for stage in &stages {
        let first = lookups.len();
        let mut merged: BTreeMap<u16, PlanLookup> = BTreeMap::new();
        for &fi in &stage.members {
            let f = &resolved[fi];
            let mask = mask_layout
                .slot(f.tag)
                .map(|slot| slot.mask)
                .unwrap_or(GLOBAL_BIT);
            let flags = derive_lookup_flags(f.flags);
            for &li in &f.lookups {
                let entry = merged.entry(li).or_insert(PlanLookup {
                    lookup_index: li,
                    feature: f.tag,
                    mask: 0,
                    flags: PlanLookupFlags::empty(),
                });
                entry.mask |= mask;
                entry.flags |= flags;
            }
        }
        lookups.extend(merged.into_values());
        out_stages.push(Stage {
            first_lookup: first,
            last_lookup: lookups.len(),
            pause: stage.pause,
        });
    }
    (lookups, out_stages)
}
