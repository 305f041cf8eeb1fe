//! The parsed-font provider boundary.
//!
//! The shaper consumes an already-parsed font through [`ShapedFont`];
//! SFNT containers, cmap formats and table offsets are the parser's
//! problem. The font is treated as immutable and shared read-only.

use crate::buffer::GlyphId;
use crate::layout::{LayoutTable, MarkFilteringSet};
use rustc_hash::FxHashMap;

/// GDEF-style glyph classification.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum GlyphClass {
    #[default]
    Unknown,
    Base,
    Ligature,
    Mark,
    Component,
}

/// Read-only queries the shaping core requires from the parsed font.
pub trait ShapedFont {
    /// Nominal glyph for a codepoint, `0` (notdef) when unmapped.
    fn glyph_for_codepoint(&self, cp: u32) -> GlyphId;

    fn glyph_class(&self, gid: GlyphId) -> GlyphClass;

    /// GDEF mark attachment class, zero when unclassified.
    fn mark_attachment_class(&self, gid: GlyphId) -> u16;

    /// Membership test against a GDEF mark filtering set.
    fn mark_filtering_set(&self, set_index: u16, gid: GlyphId) -> bool;

    fn gsub(&self) -> Option<&LayoutTable>;

    fn gpos(&self) -> Option<&LayoutTable>;
}

/// In-memory [`ShapedFont`] built directly from structured tables.
///
/// This is the reference provider used by the test suite and by callers
/// that synthesize layout tables without a real font file.
#[derive(Clone, Default, Debug)]
pub struct SyntheticFont {
    pub cmap: FxHashMap<u32, GlyphId>,
    pub classes: FxHashMap<GlyphId, GlyphClass>,
    pub mark_classes: FxHashMap<GlyphId, u16>,
    pub filtering_sets: Vec<MarkFilteringSet>,
    pub gsub: Option<LayoutTable>,
    pub gpos: Option<LayoutTable>,
}

impl SyntheticFont {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a contiguous run of codepoints starting at `first_cp` to
    /// glyph ids starting at `first_gid`.
    pub fn map_range(&mut self, first_cp: u32, first_gid: GlyphId, count: u32) {
        for i in 0..count {
            self.cmap.insert(first_cp + i, first_gid + i as GlyphId);
        }
    }

    pub fn set_class(&mut self, gid: GlyphId, class: GlyphClass) {
        self.classes.insert(gid, class);
    }

    pub fn set_mark_class(&mut self, gid: GlyphId, class: u16) {
        self.mark_classes.insert(gid, class);
        self.classes.insert(gid, GlyphClass::Mark);
    }
}

impl ShapedFont for SyntheticFont {
    fn glyph_for_codepoint(&self, cp: u32) -> GlyphId {
        self.cmap.get(&cp).copied().unwrap_or(0)
    }

    fn glyph_class(&self, gid: GlyphId) -> GlyphClass {
        self.classes.get(&gid).copied().unwrap_or_default()
    }

    fn mark_attachment_class(&self, gid: GlyphId) -> u16 {
        self.mark_classes.get(&gid).copied().unwrap_or(0)
    }

    fn mark_filtering_set(&self, set_index: u16, gid: GlyphId) -> bool {
        self.filtering_sets
            .get(set_index as usize)
            .map(|set| set.contains(gid))
            .unwrap_or(false)
    }

    fn gsub(&self) -> Option<&LayoutTable> {
        self.gsub.as_ref()
    }

    fn gpos(&self) -> Option<&LayoutTable> {
        self.gpos.as_ref()
    }
}
