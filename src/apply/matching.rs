//! Skip filtering and sequence matching for lookup application.

use smallvec::SmallVec;

use crate::buffer::{GlyphBuffer, GlyphId};
use crate::font::{GlyphClass, ShapedFont};
use crate::layout::{ClassDef, Coverage, Lookup, LookupFlags};

/// Scratch for matched input positions. Context rules rarely exceed a
/// handful of glyphs.
pub type MatchPositions = SmallVec<[usize; 8]>;

/// Glyph filter derived from a lookup's flags: ignore-base,
/// ignore-ligature, ignore-mark, mark attachment class and mark
/// filtering set.
#[derive(Copy, Clone)]
pub struct SkipFilter<'a> {
    font: &'a dyn ShapedFont,
    flags: LookupFlags,
    mark_set: Option<u16>,
}

impl<'a> SkipFilter<'a> {
    pub fn new(font: &'a dyn ShapedFont, lookup: &Lookup) -> Self {
        let mark_set = if lookup.flags.contains(LookupFlags::USE_MARK_FILTERING_SET) {
            lookup.mark_filtering_set
        } else {
            None
        };
        Self {
            font,
            flags: lookup.flags,
            mark_set,
        }
    }

    /// True when the glyph at `index` is invisible to this lookup.
    pub fn skips(&self, buf: &GlyphBuffer, index: usize) -> bool {
        let gid = buf.glyphs[index];
        match self.font.glyph_class(gid) {
            GlyphClass::Base => self.flags.contains(LookupFlags::IGNORE_BASE_GLYPHS),
            GlyphClass::Ligature => self.flags.contains(LookupFlags::IGNORE_LIGATURES),
            GlyphClass::Mark => {
                if self.flags.contains(LookupFlags::IGNORE_MARKS) {
                    return true;
                }
                if let Some(set) = self.mark_set {
                    if !self.font.mark_filtering_set(set, gid) {
                        return true;
                    }
                }
                let attachment = self.flags.mark_attachment_type();
                attachment != 0 && self.font.mark_attachment_class(gid) != attachment
            }
            _ => false,
        }
    }

    pub fn is_mark(&self, buf: &GlyphBuffer, index: usize) -> bool {
        self.font.glyph_class(buf.glyphs[index]) == GlyphClass::Mark
    }
}

/// Sequence matcher over a buffer span `[start, end)` under a skip
/// filter. Matching never mutates; callers collect positions, drop the
/// matcher, then edit.
pub struct Matcher<'a> {
    buf: &'a GlyphBuffer,
    filter: SkipFilter<'a>,
    start: usize,
    end: usize,
}

impl<'a> Matcher<'a> {
    pub fn new(buf: &'a GlyphBuffer, filter: SkipFilter<'a>, start: usize, end: usize) -> Self {
        let end = end.min(buf.len());
        Self {
            buf,
            filter,
            start,
            end,
        }
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Next non-skipped index strictly after `index`.
    pub fn next_matchable(&self, index: usize) -> Option<usize> {
        ((index + 1)..self.end).find(|&i| !self.filter.skips(self.buf, i))
    }

    /// Previous non-skipped index strictly before `index`.
    pub fn prev_matchable(&self, index: usize) -> Option<usize> {
        (self.start..index)
            .rev()
            .find(|&i| !self.filter.skips(self.buf, i))
    }

    /// Previous non-skipped, non-mark index strictly before `index`.
    pub fn prev_base(&self, index: usize) -> Option<usize> {
        (self.start..index).rev().find(|&i| {
            !self.filter.skips(self.buf, i) && !self.filter.is_mark(self.buf, i)
        })
    }

    /// Advances from `index` (inclusive) to the first matchable glyph in
    /// `coverage`, returning its position and coverage index.
    pub fn match_coverage_forward(&self, index: usize, coverage: &Coverage) -> Option<(usize, u32)> {
        let mut i = index;
        loop {
            if i >= self.end {
                return None;
            }
            if !self.filter.skips(self.buf, i) {
                if let Some(ci) = coverage.match_glyph(self.buf.glyphs[i]) {
                    return Some((i, ci));
                }
            }
            i += 1;
        }
    }

    /// Matches `len` elements forward from (exclusive) `pos`, stepping
    /// through matchable glyphs. Records matched positions when `out` is
    /// provided and returns the last matched index.
    pub fn match_forward(
        &self,
        pos: usize,
        len: usize,
        pred: impl Fn(usize, GlyphId) -> bool,
        mut out: Option<&mut MatchPositions>,
    ) -> Option<usize> {
        let mut idx = pos;
        for i in 0..len {
            idx = self.next_matchable(idx)?;
            if !pred(i, self.buf.glyphs[idx]) {
                return None;
            }
            if let Some(out) = out.as_mut() {
                out.push(idx);
            }
        }
        Some(idx)
    }

    /// Matches `len` elements backward from (exclusive) `pos`.
    pub fn match_backward(
        &self,
        pos: usize,
        len: usize,
        pred: impl Fn(usize, GlyphId) -> bool,
    ) -> Option<usize> {
        let mut idx = pos;
        for i in 0..len {
            idx = self.prev_matchable(idx)?;
            if !pred(i, self.buf.glyphs[idx]) {
                return None;
            }
        }
        Some(idx)
    }

    pub fn match_glyph_sequence_forward(
        &self,
        pos: usize,
        glyphs: &[GlyphId],
        out: Option<&mut MatchPositions>,
    ) -> Option<usize> {
        self.match_forward(pos, glyphs.len(), |i, id| glyphs[i] == id, out)
    }

    pub fn match_glyph_sequence_backward(&self, pos: usize, glyphs: &[GlyphId]) -> Option<usize> {
        self.match_backward(pos, glyphs.len(), |i, id| glyphs[i] == id)
    }

    pub fn match_class_sequence_forward(
        &self,
        pos: usize,
        classes: &ClassDef,
        sequence: &[u16],
        out: Option<&mut MatchPositions>,
    ) -> Option<usize> {
        self.match_forward(pos, sequence.len(), |i, id| classes.lookup(id) == sequence[i], out)
    }

    pub fn match_class_sequence_backward(
        &self,
        pos: usize,
        classes: &ClassDef,
        sequence: &[u16],
    ) -> Option<usize> {
        self.match_backward(pos, sequence.len(), |i, id| classes.lookup(id) == sequence[i])
    }

    pub fn match_coverage_sequence_forward(
        &self,
        pos: usize,
        coverages: &[Coverage],
        out: Option<&mut MatchPositions>,
    ) -> Option<usize> {
        self.match_forward(
            pos,
            coverages.len(),
            |i, id| coverages[i].contains(id),
            out,
        )
    }

    pub fn match_coverage_sequence_backward(&self, pos: usize, coverages: &[Coverage]) -> Option<usize> {
        self.match_backward(pos, coverages.len(), |i, id| coverages[i].contains(id))
    }

    /// Chained match: input forward from `pos` (whose glyph must already
    /// satisfy `input[0]`), backtrack backward from `pos`, lookahead
    /// forward from the last input glyph. All three must succeed.
    pub fn match_chained_forward(
        &self,
        pos: usize,
        backtrack: &[Coverage],
        input: &[Coverage],
        lookahead: &[Coverage],
        out: &mut MatchPositions,
    ) -> Option<usize> {
        let first = input.first()?;
        if !first.contains(self.buf.glyphs[pos]) {
            return None;
        }
        out.push(pos);
        let input_end =
            self.match_coverage_sequence_forward(pos, &input[1..], Some(out))?;
        self.match_coverage_sequence_backward(pos, backtrack)?;
        self.match_coverage_sequence_forward(input_end, lookahead, None)?;
        Some(input_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::SyntheticFont;
    use crate::layout::LookupKind;

    fn setup() -> (SyntheticFont, GlyphBuffer) {
        let mut font = SyntheticFont::new();
        font.set_class(10, GlyphClass::Base);
        font.set_class(11, GlyphClass::Base);
        font.set_mark_class(40, 1);
        font.set_mark_class(41, 2);
        let buf = GlyphBuffer::from_glyphs(vec![10, 40, 11, 41, 10]);
        (font, buf)
    }

    fn lookup_with_flags(flags: LookupFlags) -> Lookup {
        let mut lookup = Lookup::new(0, LookupKind::SingleSubst, Vec::new());
        lookup.flags = flags;
        lookup
    }

    #[test]
    fn ignore_marks_skips_marks() {
        let (font, buf) = setup();
        let lookup = lookup_with_flags(LookupFlags::IGNORE_MARKS);
        let filter = SkipFilter::new(&font, &lookup);
        let m = Matcher::new(&buf, filter, 0, buf.len());
        assert_eq!(m.next_matchable(0), Some(2));
        assert_eq!(m.next_matchable(2), Some(4));
        assert_eq!(m.prev_matchable(4), Some(2));
    }

    #[test]
    fn mark_attachment_class_filters_other_marks() {
        let (font, buf) = setup();
        let lookup = lookup_with_flags(LookupFlags::from_bits_retain(2 << 8));
        let filter = SkipFilter::new(&font, &lookup);
        let m = Matcher::new(&buf, filter, 0, buf.len());
        // Mark class 1 at index 1 is skipped; class 2 at index 3 is kept.
        assert_eq!(m.next_matchable(0), Some(2));
        assert_eq!(m.next_matchable(2), Some(3));
    }

    #[test]
    fn glyph_sequence_matching_steps_over_skips() {
        let (font, buf) = setup();
        let lookup = lookup_with_flags(LookupFlags::IGNORE_MARKS);
        let filter = SkipFilter::new(&font, &lookup);
        let m = Matcher::new(&buf, filter, 0, buf.len());
        let mut out = MatchPositions::new();
        let last = m
            .match_glyph_sequence_forward(0, &[11, 10], Some(&mut out))
            .unwrap();
        assert_eq!(last, 4);
        assert_eq!(out.as_slice(), &[2, 4]);
        assert!(m.match_glyph_sequence_forward(0, &[11, 11], None).is_none());
    }

    #[test]
    fn prev_base_skips_marks() {
        let (font, buf) = setup();
        let lookup = lookup_with_flags(LookupFlags::empty());
        let filter = SkipFilter::new(&font, &lookup);
        let m = Matcher::new(&buf, filter, 0, buf.len());
        assert_eq!(m.prev_base(3), Some(2));
        assert_eq!(m.prev_base(1), Some(0));
    }
}
