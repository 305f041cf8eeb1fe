//! Parsed OpenType layout data as consumed from the external parser.
//!
//! The shaper never touches SFNT bytes: lookups arrive as structured
//! payloads, one variant per supported (type, format) pair. Extension
//! subtables (GSUB type 7, GPOS type 9) must be unwrapped by the parser
//! and are absent from the variant by construction.

mod coverage;

pub use coverage::{ClassDef, ClassRange, Coverage, CoverageRange, MarkFilteringSet};

use crate::buffer::{GlyphId, PositionDelta};
use crate::tag::Tag;

bitflags::bitflags! {
    /// OpenType lookup flags.
    #[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
    pub struct LookupFlags: u16 {
        const RIGHT_TO_LEFT = 0x0001;
        const IGNORE_BASE_GLYPHS = 0x0002;
        const IGNORE_LIGATURES = 0x0004;
        const IGNORE_MARKS = 0x0008;
        const USE_MARK_FILTERING_SET = 0x0010;
        const MARK_ATTACHMENT_TYPE_MASK = 0xFF00;
    }
}

impl LookupFlags {
    /// Mark attachment class filter, zero when unset.
    pub fn mark_attachment_type(self) -> u16 {
        (self.bits() & Self::MARK_ATTACHMENT_TYPE_MASK.bits()) >> 8
    }
}

bitflags::bitflags! {
    /// ValueRecord field mask. Device entries are carried for
    /// completeness but hold unresolved offsets the shaper ignores.
    #[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
    pub struct ValueFormat: u16 {
        const X_PLACEMENT = 0x0001;
        const Y_PLACEMENT = 0x0002;
        const X_ADVANCE = 0x0004;
        const Y_ADVANCE = 0x0008;
        const X_PLACEMENT_DEVICE = 0x0010;
        const Y_PLACEMENT_DEVICE = 0x0020;
        const X_ADVANCE_DEVICE = 0x0040;
        const Y_ADVANCE_DEVICE = 0x0080;
    }
}

/// A positioning adjustment carried by GPOS subtables.
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct ValueRecord {
    pub format: ValueFormat,
    pub x_placement: i16,
    pub y_placement: i16,
    pub x_advance: i16,
    pub y_advance: i16,
}

impl ValueRecord {
    pub fn x_advance(value: i16) -> Self {
        Self {
            format: ValueFormat::X_ADVANCE,
            x_advance: value,
            ..Self::default()
        }
    }

    pub fn x_placement(value: i16) -> Self {
        Self {
            format: ValueFormat::X_PLACEMENT,
            x_placement: value,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.format.is_empty()
    }

    /// Accumulates the fields enabled by the format mask onto a position.
    pub fn apply(&self, pos: &mut PositionDelta) {
        if self.format.contains(ValueFormat::X_PLACEMENT) {
            pos.x_offset += self.x_placement as i32;
        }
        if self.format.contains(ValueFormat::Y_PLACEMENT) {
            pos.y_offset += self.y_placement as i32;
        }
        if self.format.contains(ValueFormat::X_ADVANCE) {
            pos.x_advance += self.x_advance as i32;
        }
        if self.format.contains(ValueFormat::Y_ADVANCE) {
            pos.y_advance += self.y_advance as i32;
        }
    }
}

/// Tells the executor to invoke a lookup at a matched input position.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SequenceLookupRecord {
    pub sequence_index: u16,
    pub lookup_list_index: u16,
}

/// Contextual rule over literal glyphs; `input` starts at the second
/// glyph of the matched sequence.
#[derive(Clone, Debug)]
pub struct SequenceRule {
    pub input: Vec<GlyphId>,
    pub records: Vec<SequenceLookupRecord>,
}

/// Contextual rule over glyph classes.
#[derive(Clone, Debug)]
pub struct ClassSequenceRule {
    pub input: Vec<u16>,
    pub records: Vec<SequenceLookupRecord>,
}

/// Chained rule over literal glyphs. Backtrack glyphs are listed in
/// reverse logical order, closest first.
#[derive(Clone, Debug)]
pub struct ChainRule {
    pub backtrack: Vec<GlyphId>,
    pub input: Vec<GlyphId>,
    pub lookahead: Vec<GlyphId>,
    pub records: Vec<SequenceLookupRecord>,
}

/// Chained rule over glyph classes.
#[derive(Clone, Debug)]
pub struct ChainClassRule {
    pub backtrack: Vec<u16>,
    pub input: Vec<u16>,
    pub lookahead: Vec<u16>,
    pub records: Vec<SequenceLookupRecord>,
}

/// One ligature: the produced glyph and the full component sequence.
/// `components[0]` corresponds to the coverage-matched first glyph; the
/// remainder must match forward through the lookup's skip filter.
#[derive(Clone, Debug)]
pub struct Ligature {
    pub glyph: GlyphId,
    pub components: Vec<GlyphId>,
}

/// Mark class and anchor reference for one covered mark glyph.
#[derive(Copy, Clone, Debug)]
pub struct MarkRecord {
    pub class: u16,
    pub anchor: u16,
}

/// Second-glyph entry of a format 1 pair set.
#[derive(Clone, Debug)]
pub struct PairValue {
    pub second: GlyphId,
    pub first_value: ValueRecord,
    pub second_value: ValueRecord,
}

/// Entry/exit anchor references for one cursively connected glyph.
#[derive(Copy, Clone, Default, Debug)]
pub struct CursiveRecord {
    pub entry: Option<u16>,
    pub exit: Option<u16>,
}

/// Lookup kind, shared by GSUB and GPOS. Contextual and chained kinds
/// serve both tables; the records dispatch into the owning table's
/// lookup list.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LookupKind {
    SingleSubst,
    MultipleSubst,
    AlternateSubst,
    LigatureSubst,
    Context,
    ChainContext,
    ReverseChainSubst,
    SinglePos,
    PairPos,
    CursivePos,
    MarkBasePos,
    MarkLigPos,
    MarkMarkPos,
}

impl LookupKind {
    pub fn is_substitution(self) -> bool {
        matches!(
            self,
            Self::SingleSubst
                | Self::MultipleSubst
                | Self::AlternateSubst
                | Self::LigatureSubst
                | Self::ReverseChainSubst
        )
    }
}

/// Parsed lookup subtable payload, one case per (type, format).
#[derive(Clone, Debug)]
pub enum SubtablePayload {
    /// GSUB 1.1: replace with `gid + delta`.
    SingleSubst1 { coverage: Coverage, delta: i16 },
    /// GSUB 1.2: replace via parallel substitute array.
    SingleSubst2 {
        coverage: Coverage,
        substitutes: Vec<GlyphId>,
    },
    /// GSUB 2.1: one glyph becomes a sequence.
    MultipleSubst1 {
        coverage: Coverage,
        sequences: Vec<Vec<GlyphId>>,
    },
    /// GSUB 3.1: caller-selected alternate.
    AlternateSubst1 {
        coverage: Coverage,
        alternates: Vec<Vec<GlyphId>>,
    },
    /// GSUB 4.1: ligature sets per first-glyph coverage row.
    LigatureSubst1 {
        coverage: Coverage,
        sets: Vec<Vec<Ligature>>,
    },
    /// GSUB 5.1 / GPOS 7.1.
    Context1 {
        coverage: Coverage,
        sets: Vec<Vec<SequenceRule>>,
    },
    /// GSUB 5.2 / GPOS 7.2.
    Context2 {
        coverage: Coverage,
        classes: ClassDef,
        sets: Vec<Vec<ClassSequenceRule>>,
    },
    /// GSUB 5.3 / GPOS 7.3: one coverage per input position.
    Context3 {
        coverages: Vec<Coverage>,
        records: Vec<SequenceLookupRecord>,
    },
    /// GSUB 6.1 / GPOS 8.1.
    ChainContext1 {
        coverage: Coverage,
        sets: Vec<Vec<ChainRule>>,
    },
    /// GSUB 6.2 / GPOS 8.2.
    ChainContext2 {
        coverage: Coverage,
        backtrack_classes: ClassDef,
        input_classes: ClassDef,
        lookahead_classes: ClassDef,
        sets: Vec<Vec<ChainClassRule>>,
    },
    /// GSUB 6.3 / GPOS 8.3.
    ChainContext3 {
        backtrack: Vec<Coverage>,
        input: Vec<Coverage>,
        lookahead: Vec<Coverage>,
        records: Vec<SequenceLookupRecord>,
    },
    /// GSUB 8.1: reverse chaining single substitution.
    ReverseChainSubst1 {
        coverage: Coverage,
        backtrack: Vec<Coverage>,
        lookahead: Vec<Coverage>,
        substitutes: Vec<GlyphId>,
    },
    /// GPOS 1.1: one value for every covered glyph.
    SinglePos1 { coverage: Coverage, value: ValueRecord },
    /// GPOS 1.2: value indexed by coverage index.
    SinglePos2 {
        coverage: Coverage,
        values: Vec<ValueRecord>,
    },
    /// GPOS 2.1: pair sets scanned by second glyph.
    PairPos1 {
        coverage: Coverage,
        sets: Vec<Vec<PairValue>>,
    },
    /// GPOS 2.2: class matrix, row-major by first class.
    PairPos2 {
        coverage: Coverage,
        first_classes: ClassDef,
        second_classes: ClassDef,
        second_class_count: u16,
        values: Vec<(ValueRecord, ValueRecord)>,
    },
    /// GPOS 3.1: cursive entry/exit attachment.
    CursivePos1 {
        coverage: Coverage,
        records: Vec<CursiveRecord>,
    },
    /// GPOS 4.1: mark-to-base attachment. `base_anchors` is indexed by
    /// base coverage index, then mark class; `None` means no anchor.
    MarkBasePos1 {
        mark_coverage: Coverage,
        base_coverage: Coverage,
        class_count: u16,
        marks: Vec<MarkRecord>,
        base_anchors: Vec<Vec<Option<u16>>>,
    },
    /// GPOS 5.1: mark-to-ligature attachment. `ligature_anchors` is
    /// indexed by ligature coverage index, component, then mark class.
    MarkLigPos1 {
        mark_coverage: Coverage,
        ligature_coverage: Coverage,
        class_count: u16,
        marks: Vec<MarkRecord>,
        ligature_anchors: Vec<Vec<Vec<Option<u16>>>>,
    },
    /// GPOS 6.1: mark-to-mark attachment.
    MarkMarkPos1 {
        mark1_coverage: Coverage,
        mark2_coverage: Coverage,
        class_count: u16,
        marks: Vec<MarkRecord>,
        mark2_anchors: Vec<Vec<Option<u16>>>,
    },
}

impl SubtablePayload {
    pub fn kind(&self) -> LookupKind {
        use SubtablePayload::*;
        match self {
            SingleSubst1 { .. } | SingleSubst2 { .. } => LookupKind::SingleSubst,
            MultipleSubst1 { .. } => LookupKind::MultipleSubst,
            AlternateSubst1 { .. } => LookupKind::AlternateSubst,
            LigatureSubst1 { .. } => LookupKind::LigatureSubst,
            Context1 { .. } | Context2 { .. } | Context3 { .. } => LookupKind::Context,
            ChainContext1 { .. } | ChainContext2 { .. } | ChainContext3 { .. } => {
                LookupKind::ChainContext
            }
            ReverseChainSubst1 { .. } => LookupKind::ReverseChainSubst,
            SinglePos1 { .. } | SinglePos2 { .. } => LookupKind::SinglePos,
            PairPos1 { .. } | PairPos2 { .. } => LookupKind::PairPos,
            CursivePos1 { .. } => LookupKind::CursivePos,
            MarkBasePos1 { .. } => LookupKind::MarkBasePos,
            MarkLigPos1 { .. } => LookupKind::MarkLigPos,
            MarkMarkPos1 { .. } => LookupKind::MarkMarkPos,
        }
    }
}

/// A lookup: subtables tried in order under shared flags.
#[derive(Clone, Debug)]
pub struct Lookup {
    pub index: u16,
    pub kind: LookupKind,
    pub flags: LookupFlags,
    pub mark_filtering_set: Option<u16>,
    pub subtables: Vec<SubtablePayload>,
}

impl Lookup {
    pub fn new(index: u16, kind: LookupKind, subtables: Vec<SubtablePayload>) -> Self {
        Self {
            index,
            kind,
            flags: LookupFlags::empty(),
            mark_filtering_set: None,
            subtables,
        }
    }

    pub fn is_reverse(&self) -> bool {
        self.kind == LookupKind::ReverseChainSubst
    }
}

/// Language system: an optional required feature plus feature indices
/// into the table's feature list.
#[derive(Clone, Default, Debug)]
pub struct LangSys {
    pub required_feature: Option<u16>,
    pub feature_indices: Vec<u16>,
}

/// Script record with its language systems.
#[derive(Clone, Debug)]
pub struct Script {
    pub tag: Tag,
    pub default_lang_sys: Option<LangSys>,
    pub lang_sys: Vec<(Tag, LangSys)>,
}

/// A named feature bound to lookup indices.
#[derive(Clone, Debug)]
pub struct Feature {
    pub tag: Tag,
    pub lookup_indices: Vec<u16>,
}

/// One layout table (GSUB or GPOS) as scripts, features and lookups.
#[derive(Clone, Default, Debug)]
pub struct LayoutTable {
    pub scripts: Vec<Script>,
    pub features: Vec<Feature>,
    pub lookups: Vec<Lookup>,
}

impl LayoutTable {
    pub fn script(&self, tag: Tag) -> Option<&Script> {
        self.scripts.iter().find(|s| s.tag == tag)
    }

    /// Resolves a language system: the named script (falling back to
    /// `DFLT`), then the named language system (falling back to the
    /// script's default).
    pub fn lang_sys(&self, script_tag: Tag, lang_tag: Tag) -> Option<&LangSys> {
        let script = self
            .script(script_tag)
            .or_else(|| self.script(crate::tag::DFLT_SCRIPT))?;
        script
            .lang_sys
            .iter()
            .find(|(tag, _)| *tag == lang_tag)
            .map(|(_, ls)| ls)
            .or(script.default_lang_sys.as_ref())
    }

    pub fn feature(&self, index: u16) -> Option<&Feature> {
        self.features.get(index as usize)
    }

    pub fn lookup(&self, index: u16) -> Option<&Lookup> {
        self.lookups.get(index as usize)
    }
}
