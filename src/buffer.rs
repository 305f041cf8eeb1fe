//! Run buffer for shaping: glyph ids plus optional, always-aligned side
//! arrays and lazily allocated position deltas.

use crate::error::Error;

/// Glyph identifier. OpenType constrains glyph ids to 16 bits.
pub type GlyphId = u16;

/// The reserved missing-glyph id.
pub const NOTDEF: GlyphId = 0;

// Unsafe flag bits.
pub const UNSAFE_TO_BREAK: u16 = 1;
pub const UNSAFE_TO_CONCAT: u16 = 2;

// Joiner class bits.
pub const JOINER_ZWNJ: u8 = 1;
pub const JOINER_ZWJ: u8 = 2;

/// How a glyph is attached to another glyph by positioning.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum AttachKind {
    #[default]
    None,
    MarkToBase,
    MarkToLigature,
    MarkToMark,
    Cursive,
}

/// Unresolved anchor references recorded by positioning lookups.
///
/// Anchor coordinates are resolved by a later stage; the applicator only
/// records which anchor entries were selected. `ligature_comp` carries the
/// ligature component index rather than an anchor offset.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct AnchorRef {
    pub mark: u16,
    pub base: u16,
    pub ligature_comp: u16,
    pub cursive: u16,
}

/// Accumulated positioning for one glyph.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PositionDelta {
    pub x_advance: i32,
    pub y_advance: i32,
    pub x_offset: i32,
    pub y_offset: i32,
    /// Index of the glyph this one attaches to, -1 for none.
    pub attach_to: i32,
    pub attach_kind: AttachKind,
    pub attach_class: u16,
    pub anchor_ref: AnchorRef,
}

impl Default for PositionDelta {
    fn default() -> Self {
        Self {
            x_advance: 0,
            y_advance: 0,
            x_offset: 0,
            y_offset: 0,
            attach_to: -1,
            attach_kind: AttachKind::None,
            attach_class: 0,
            anchor_ref: AnchorRef::default(),
        }
    }
}

impl PositionDelta {
    pub fn is_attached(&self) -> bool {
        self.attach_kind != AttachKind::None
    }
}

/// A buffer rewrite: `[from, to)` was replaced by `len` glyphs.
///
/// Every index held across the edit must be remapped through [`EditSpan::remap`];
/// this is the only rule that keeps positions valid across substitutions
/// that change the buffer length.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct EditSpan {
    pub from: usize,
    pub to: usize,
    pub len: usize,
}

impl EditSpan {
    /// Signed change in buffer length.
    pub fn delta(&self) -> isize {
        self.len as isize - (self.to - self.from) as isize
    }

    /// Remaps a pre-edit index. Returns `None` when the index fell inside
    /// a span that was deleted outright.
    pub fn remap(&self, index: usize) -> Option<usize> {
        if index < self.from {
            Some(index)
        } else if index >= self.to {
            Some(index - self.to + self.from + self.len)
        } else if self.len == 0 {
            None
        } else {
            Some(self.from)
        }
    }
}

/// Replays a replacement onto an externally held side buffer, inserting
/// default-initialized items, so it stays aligned with the glyph array.
pub fn apply_edit<T: Clone + Default>(edit: EditSpan, side: &mut Vec<T>) {
    side.splice(
        edit.from..edit.to,
        std::iter::repeat(T::default()).take(edit.len),
    );
}

/// Structure-of-arrays run buffer.
///
/// The glyph array is authoritative; every side array, when present, has
/// exactly the same length. All mutating operations preserve that
/// alignment. Out-of-range indices are programmer errors and panic;
/// indices coming from parsed table data must be range-checked before
/// they reach the buffer.
#[derive(Clone, Default)]
pub struct GlyphBuffer {
    pub glyphs: Vec<GlyphId>,
    pub positions: Option<Vec<PositionDelta>>,
    pub codepoints: Option<Vec<u32>>,
    pub clusters: Option<Vec<u32>>,
    pub plan_ids: Option<Vec<u16>>,
    pub masks: Option<Vec<u32>>,
    pub unsafe_flags: Option<Vec<u16>>,
    pub syllables: Option<Vec<u16>>,
    pub joiners: Option<Vec<u8>>,
}

impl GlyphBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_glyphs(glyphs: Vec<GlyphId>) -> Self {
        Self {
            glyphs,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn at(&self, index: usize) -> GlyphId {
        self.glyphs[index]
    }

    pub fn set(&mut self, index: usize, gid: GlyphId) {
        self.glyphs[index] = gid;
    }

    /// Cluster id of a glyph, zero when clusters are not tracked.
    pub fn cluster_at(&self, index: usize) -> u32 {
        self.clusters.as_ref().map(|c| c[index]).unwrap_or(0)
    }

    pub fn mask_at(&self, index: usize) -> u32 {
        self.masks.as_ref().map(|m| m[index]).unwrap_or(!0)
    }

    pub fn joiner_at(&self, index: usize) -> u8 {
        self.joiners.as_ref().map(|j| j[index]).unwrap_or(0)
    }

    /// Replaces `[from, to)` with `new`, mirroring the replacement onto
    /// every present side array. Inserted slots take defaults except
    /// cluster, plan id, mask and syllable, which are inherited from the
    /// left neighbor (or from slot 0 at the buffer head).
    pub fn replace(&mut self, from: usize, to: usize, new: &[GlyphId]) -> EditSpan {
        assert!(from <= to && to <= self.glyphs.len(), "edit span out of range");
        let edit = EditSpan {
            from,
            to,
            len: new.len(),
        };
        self.glyphs.splice(from..to, new.iter().copied());
        self.splice_sides(edit);
        edit
    }

    /// Inserts glyphs before `index`.
    pub fn insert(&mut self, index: usize, glyphs: &[GlyphId]) -> EditSpan {
        self.replace(index, index, glyphs)
    }

    /// Inserts `count` copies of the glyph at `source` before `index`,
    /// propagating all aligned side-array values from `source`.
    pub fn insert_copies(&mut self, index: usize, source: usize, count: usize) -> EditSpan {
        assert!(source < self.glyphs.len(), "copy source out of range");
        let gid = self.glyphs[source];
        let codepoint = self.codepoints.as_ref().map(|v| v[source]);
        let cluster = self.clusters.as_ref().map(|v| v[source]);
        let plan_id = self.plan_ids.as_ref().map(|v| v[source]);
        let mask = self.masks.as_ref().map(|v| v[source]);
        let unsafe_bits = self.unsafe_flags.as_ref().map(|v| v[source]);
        let syllable = self.syllables.as_ref().map(|v| v[source]);
        let joiner = self.joiners.as_ref().map(|v| v[source]);
        let position = self.positions.as_ref().map(|v| v[source]);
        let edit = self.insert(index, &vec![gid; count]);
        let span = index..index + count;
        fill_span(&mut self.codepoints, span.clone(), codepoint);
        fill_span(&mut self.clusters, span.clone(), cluster);
        fill_span(&mut self.plan_ids, span.clone(), plan_id);
        fill_span(&mut self.masks, span.clone(), mask);
        fill_span(&mut self.unsafe_flags, span.clone(), unsafe_bits);
        fill_span(&mut self.syllables, span.clone(), syllable);
        fill_span(&mut self.joiners, span.clone(), joiner);
        fill_span(&mut self.positions, span, position);
        edit
    }

    /// Deletes `[from, to)`.
    pub fn delete(&mut self, from: usize, to: usize) -> EditSpan {
        self.replace(from, to, &[])
    }

    /// Lazily allocates the position array sized to the glyph count,
    /// realigning on resize.
    pub fn ensure_positions(&mut self) {
        let len = self.glyphs.len();
        match &mut self.positions {
            Some(positions) => positions.resize(len, PositionDelta::default()),
            None => self.positions = Some(vec![PositionDelta::default(); len]),
        }
    }

    /// Sets every cluster in `[lo, hi)` to the minimum cluster of the span.
    pub fn merge_clusters(&mut self, lo: usize, hi: usize) {
        if let Some(clusters) = &mut self.clusters {
            if lo >= hi || hi > clusters.len() {
                return;
            }
            let min = clusters[lo..hi].iter().copied().min().unwrap_or(0);
            for c in &mut clusters[lo..hi] {
                *c = min;
            }
        }
    }

    /// ORs `bits` into the unsafe flags of `[from, to)`, allocating the
    /// side array on first use.
    pub fn mark_unsafe(&mut self, from: usize, to: usize, bits: u16) {
        let len = self.glyphs.len();
        let flags = self
            .unsafe_flags
            .get_or_insert_with(|| vec![0; len]);
        for f in &mut flags[from..to.min(len)] {
            *f |= bits;
        }
    }

    /// True when the matched extent `[from, to)` covers more than one
    /// distinct cluster.
    pub fn spans_clusters(&self, from: usize, to: usize) -> bool {
        match &self.clusters {
            Some(clusters) if from < to && to <= clusters.len() => {
                let first = clusters[from];
                clusters[from..to].iter().any(|&c| c != first)
            }
            _ => false,
        }
    }

    /// End (exclusive) of the syllable containing `pos`; falls back to the
    /// cluster run when no syllable annotation is present.
    pub fn span_end(&self, pos: usize) -> usize {
        let len = self.glyphs.len();
        if pos >= len {
            return len;
        }
        if let Some(syllables) = &self.syllables {
            let s = syllables[pos];
            return (pos + 1..len).find(|&i| syllables[i] != s).unwrap_or(len);
        }
        if let Some(clusters) = &self.clusters {
            let c = clusters[pos];
            return (pos + 1..len).find(|&i| clusters[i] != c).unwrap_or(len);
        }
        len
    }

    /// Checks the side-array alignment invariant.
    pub fn validate(&self) -> Result<(), Error> {
        let len = self.glyphs.len();
        let aligned = self.positions.as_ref().map_or(true, |v| v.len() == len)
            && self.codepoints.as_ref().map_or(true, |v| v.len() == len)
            && self.clusters.as_ref().map_or(true, |v| v.len() == len)
            && self.plan_ids.as_ref().map_or(true, |v| v.len() == len)
            && self.masks.as_ref().map_or(true, |v| v.len() == len)
            && self.unsafe_flags.as_ref().map_or(true, |v| v.len() == len)
            && self.syllables.as_ref().map_or(true, |v| v.len() == len)
            && self.joiners.as_ref().map_or(true, |v| v.len() == len);
        if aligned {
            Ok(())
        } else {
            Err(Error::Internal("side array misaligned with glyph array"))
        }
    }

    fn splice_sides(&mut self, edit: EditSpan) {
        splice_inherit(&mut self.clusters, edit);
        splice_inherit(&mut self.plan_ids, edit);
        splice_inherit(&mut self.masks, edit);
        splice_inherit(&mut self.syllables, edit);
        splice_default(&mut self.codepoints, edit);
        splice_default(&mut self.unsafe_flags, edit);
        splice_default(&mut self.joiners, edit);
        splice_default(&mut self.positions, edit);
    }
}

fn splice_default<T: Clone + Default>(side: &mut Option<Vec<T>>, edit: EditSpan) {
    if let Some(side) = side {
        apply_edit(edit, side);
    }
}

fn splice_inherit<T: Copy + Default>(side: &mut Option<Vec<T>>, edit: EditSpan) {
    if let Some(side) = side {
        let inherited = if edit.from > 0 {
            side[edit.from - 1]
        } else {
            side.first().copied().unwrap_or_default()
        };
        side.splice(
            edit.from..edit.to,
            std::iter::repeat(inherited).take(edit.len),
        );
    }
}

fn fill_span<T: Copy>(side: &mut Option<Vec<T>>, span: std::ops::Range<usize>, value: Option<T>) {
    if let (Some(side), Some(value)) = (side, value) {
        for slot in &mut side[span] {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> GlyphBuffer {
        let mut buf = GlyphBuffer::from_glyphs(vec![10, 11, 12, 13]);
        buf.clusters = Some(vec![0, 1, 2, 3]);
        buf.masks = Some(vec![1, 1, 1, 1]);
        buf.codepoints = Some(vec![97, 98, 99, 100]);
        buf
    }

    #[test]
    fn replace_keeps_side_arrays_aligned() {
        let mut buf = buffer();
        let edit = buf.replace(1, 3, &[40, 41, 42]);
        assert_eq!(edit, EditSpan { from: 1, to: 3, len: 3 });
        assert_eq!(buf.glyphs, vec![10, 40, 41, 42, 13]);
        buf.validate().unwrap();
        // Clusters inherit from the left neighbor.
        assert_eq!(buf.clusters.as_ref().unwrap(), &vec![0, 0, 0, 0, 3]);
        // Codepoints default to zero for rewritten slots.
        assert_eq!(buf.codepoints.as_ref().unwrap(), &vec![97, 0, 0, 0, 100]);
    }

    #[test]
    fn replace_at_head_inherits_from_slot_zero() {
        let mut buf = buffer();
        buf.replace(0, 1, &[50, 51]);
        assert_eq!(buf.clusters.as_ref().unwrap(), &vec![0, 0, 1, 2, 3]);
    }

    #[test]
    fn insert_copies_propagates_all_sides() {
        let mut buf = buffer();
        buf.ensure_positions();
        buf.positions.as_mut().unwrap()[2].x_advance = 7;
        buf.insert_copies(1, 2, 2);
        assert_eq!(buf.glyphs, vec![10, 12, 12, 11, 12, 13]);
        assert_eq!(buf.clusters.as_ref().unwrap(), &vec![0, 2, 2, 1, 2, 3]);
        assert_eq!(buf.codepoints.as_ref().unwrap(), &vec![97, 99, 99, 98, 99, 100]);
        assert_eq!(buf.positions.as_ref().unwrap()[1].x_advance, 7);
        buf.validate().unwrap();
    }

    #[test]
    fn delete_remaps_and_aligns() {
        let mut buf = buffer();
        let edit = buf.delete(1, 3);
        assert_eq!(buf.glyphs, vec![10, 13]);
        assert_eq!(edit.remap(0), Some(0));
        assert_eq!(edit.remap(1), None);
        assert_eq!(edit.remap(2), None);
        assert_eq!(edit.remap(3), Some(1));
        buf.validate().unwrap();
    }

    #[test]
    fn remap_rule() {
        let edit = EditSpan { from: 2, to: 4, len: 3 };
        assert_eq!(edit.remap(1), Some(1));
        assert_eq!(edit.remap(2), Some(2));
        assert_eq!(edit.remap(3), Some(2));
        assert_eq!(edit.remap(4), Some(5));
        assert_eq!(edit.remap(7), Some(8));
    }

    #[test]
    fn merge_clusters_takes_minimum() {
        let mut buf = buffer();
        buf.clusters = Some(vec![4, 2, 3, 9]);
        buf.merge_clusters(0, 3);
        assert_eq!(buf.clusters.as_ref().unwrap(), &vec![2, 2, 2, 9]);
    }

    #[test]
    fn ensure_positions_realigns_after_growth() {
        let mut buf = buffer();
        buf.ensure_positions();
        assert_eq!(buf.positions.as_ref().unwrap().len(), 4);
        assert_eq!(buf.positions.as_ref().unwrap()[0].attach_to, -1);
        buf.insert(4, &[60]);
        buf.ensure_positions();
        assert_eq!(buf.positions.as_ref().unwrap().len(), 5);
    }

    #[test]
    fn external_side_buffer_resync() {
        let mut side = vec!["a", "b", "c", "d"];
        apply_edit(EditSpan { from: 1, to: 3, len: 1 }, &mut side);
        assert_eq!(side, vec!["a", "", "d"]);
    }

    #[test]
    fn span_end_follows_syllables_then_clusters() {
        let mut buf = buffer();
        assert_eq!(buf.span_end(1), 2);
        buf.syllables = Some(vec![0, 0, 0, 1]);
        assert_eq!(buf.span_end(1), 3);
    }
}
