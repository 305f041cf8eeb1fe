//! Coverage and class tables as delivered by the parser.

use crate::buffer::GlyphId;

/// Glyph coverage. Answers membership with the coverage index used to
/// select parallel per-glyph data.
#[derive(Clone, Debug)]
pub enum Coverage {
    /// Format 1: sorted glyph list; the coverage index is the position.
    Glyphs(Vec<GlyphId>),
    /// Format 2: sorted, non-overlapping ranges with a running start
    /// index per range.
    Ranges(Vec<CoverageRange>),
}

#[derive(Copy, Clone, Debug)]
pub struct CoverageRange {
    pub start: GlyphId,
    pub end: GlyphId,
    pub start_index: u32,
}

impl Coverage {
    /// Builds a format 1 coverage, sorting the glyph list.
    pub fn from_glyphs(mut glyphs: Vec<GlyphId>) -> Self {
        glyphs.sort_unstable();
        glyphs.dedup();
        Self::Glyphs(glyphs)
    }

    /// Builds a format 2 coverage from inclusive ranges, assigning
    /// running start indices.
    pub fn from_ranges(ranges: impl IntoIterator<Item = (GlyphId, GlyphId)>) -> Self {
        let mut out = Vec::new();
        let mut next_index = 0u32;
        for (start, end) in ranges {
            out.push(CoverageRange {
                start,
                end,
                start_index: next_index,
            });
            next_index += (end - start) as u32 + 1;
        }
        out.sort_unstable_by_key(|r| r.start);
        Self::Ranges(out)
    }

    /// Returns the coverage index for a glyph, or `None` when the glyph
    /// is not covered.
    pub fn match_glyph(&self, gid: GlyphId) -> Option<u32> {
        match self {
            Self::Glyphs(glyphs) => glyphs.binary_search(&gid).ok().map(|i| i as u32),
            Self::Ranges(ranges) => {
                let i = ranges.partition_point(|r| r.end < gid);
                let r = ranges.get(i)?;
                (r.start <= gid && gid <= r.end)
                    .then(|| r.start_index + (gid - r.start) as u32)
            }
        }
    }

    pub fn contains(&self, gid: GlyphId) -> bool {
        self.match_glyph(gid).is_some()
    }
}

/// Glyph class definition. Unlisted glyphs are class 0.
#[derive(Clone, Debug)]
pub enum ClassDef {
    /// Format 1: consecutive classes starting at `start_glyph`.
    List {
        start_glyph: GlyphId,
        classes: Vec<u16>,
    },
    /// Format 2: class ranges, sorted by start glyph.
    Ranges(Vec<ClassRange>),
}

#[derive(Copy, Clone, Debug)]
pub struct ClassRange {
    pub start: GlyphId,
    pub end: GlyphId,
    pub class: u16,
}

impl ClassDef {
    pub fn from_ranges(mut ranges: Vec<ClassRange>) -> Self {
        ranges.sort_unstable_by_key(|r| r.start);
        Self::Ranges(ranges)
    }

    pub fn lookup(&self, gid: GlyphId) -> u16 {
        match self {
            Self::List {
                start_glyph,
                classes,
            } => {
                if gid < *start_glyph {
                    return 0;
                }
                classes
                    .get((gid - start_glyph) as usize)
                    .copied()
                    .unwrap_or(0)
            }
            Self::Ranges(ranges) => {
                let i = ranges.partition_point(|r| r.end < gid);
                match ranges.get(i) {
                    Some(r) if r.start <= gid && gid <= r.end => r.class,
                    _ => 0,
                }
            }
        }
    }
}

/// A coverage-shaped membership test for mark filtering sets.
#[derive(Clone, Debug)]
pub struct MarkFilteringSet(pub Coverage);

impl MarkFilteringSet {
    pub fn contains(&self, gid: GlyphId) -> bool {
        self.0.contains(gid)
    }
}
