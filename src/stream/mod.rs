//! The streaming pipeline: fills a rune carry from the source, shapes
//! it, finds a break-safe flush cut, emits to the sink and compacts.

mod normalize;

pub(crate) use normalize::{normalize, resolve_mode, ResolvedNormalization};

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::buffer::{GlyphBuffer, PositionDelta, JOINER_ZWJ, JOINER_ZWNJ};
use crate::engine::{RunContext, ScriptEngine};
use crate::error::Error;
use crate::font::ShapedFont;
use crate::plan::{compile, execute, Plan, Policy, SegmentProps};
use crate::shaper::{
    FeatureRange, FeatureSetting, FlushBoundary, GlyphRecord, GlyphSink, InputEvent,
    InputEventSource, RuneSource,
};

/// Resolved watermark configuration: `0 < low <= high <= max`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Watermarks {
    pub high: usize,
    pub low: usize,
    pub max: usize,
}

/// The two front ends a pipeline can read from.
pub(crate) enum Front<'s> {
    Runes(&'s mut dyn RuneSource),
    Events(&'s mut dyn InputEventSource),
}

struct PlanFrame {
    overrides: Vec<FeatureSetting>,
    plan_id: u16,
}

pub(crate) struct Pipeline<'a> {
    font: &'a dyn ShapedFont,
    engine: Box<dyn ScriptEngine>,
    props: SegmentProps,
    policy: Policy,
    base_features: Vec<FeatureRange>,
    boundary: FlushBoundary,
    marks: Watermarks,
    mode: ResolvedNormalization,
    event_mode: bool,
    // Carry of runes waiting to be shaped or flushed.
    runes: Vec<char>,
    clusters: Vec<u32>,
    plan_ids: Vec<u16>,
    next_cluster: u32,
    eof: bool,
    // Plan stack (event mode); the root frame is always present. Plans
    // are kept by id so carry spans survive a pop until flushed.
    stack: Vec<PlanFrame>,
    plans: FxHashMap<u16, Arc<Plan>>,
    next_plan_id: u16,
}

impl<'a> Pipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        font: &'a dyn ShapedFont,
        mut engine: Box<dyn ScriptEngine>,
        props: SegmentProps,
        policy: Policy,
        base_features: Vec<FeatureRange>,
        boundary: FlushBoundary,
        marks: Watermarks,
        event_mode: bool,
    ) -> Result<Self, Error> {
        let mode = resolve_mode(engine.normalization(), props.script);
        let root = Arc::new(compile(
            font,
            &props,
            engine.as_mut(),
            &base_features,
            policy,
        )?);
        let mut plans = FxHashMap::default();
        plans.insert(0u16, root);
        Ok(Self {
            font,
            engine,
            props,
            policy,
            base_features,
            boundary,
            marks,
            mode,
            event_mode,
            runes: Vec::new(),
            clusters: Vec::new(),
            plan_ids: Vec::new(),
            next_cluster: 0,
            eof: false,
            stack: vec![PlanFrame {
                overrides: Vec::new(),
                plan_id: 0,
            }],
            plans,
            next_plan_id: 0,
        })
    }

    /// Runs the shaping cycle until EOF is observed and the carry is
    /// empty. On final EOF the plan stack must equal the root frame.
    pub fn run(&mut self, mut front: Front<'_>, sink: &mut dyn GlyphSink) -> Result<(), Error> {
        let mut second_attempt = false;
        loop {
            let target = if second_attempt {
                self.marks.max
            } else {
                self.marks.high
            };
            self.fill(&mut front, target)?;
            if self.runes.is_empty() {
                if self.eof {
                    break;
                }
                continue;
            }
            let shaped = self.shape_carry()?;
            if let Some((glyph_cut, raw_flush)) = self.find_flush_cut(&shaped) {
                tracing::trace!(glyph_cut, raw_flush, "partial flush");
                self.emit(&shaped, glyph_cut, sink)?;
                self.compact(raw_flush);
                second_attempt = false;
                continue;
            }
            if self.eof || (second_attempt && self.runes.len() >= self.marks.max) {
                tracing::trace!(glyphs = shaped.len(), "full flush");
                self.emit(&shaped, shaped.len(), sink)?;
                let all = self.runes.len();
                self.compact(all);
                second_attempt = false;
                continue;
            }
            second_attempt = true;
        }
        if self.event_mode && self.stack.len() != 1 {
            return Err(Error::PlanStackUnclosedAtEof);
        }
        Ok(())
    }

    fn fill(&mut self, front: &mut Front<'_>, target: usize) -> Result<(), Error> {
        while self.runes.len() < target && !self.eof {
            match front {
                Front::Runes(source) => match source.read_rune()? {
                    Some((ch, _)) => self.push_rune(ch),
                    None => self.eof = true,
                },
                Front::Events(source) => match source.read_event()? {
                    Some(InputEvent::Rune { ch, .. }) => self.push_rune(ch),
                    Some(InputEvent::PushFeatures(settings)) => self.push_frame(settings)?,
                    Some(InputEvent::PopFeatures) => self.pop_frame()?,
                    None => self.eof = true,
                },
            }
        }
        debug_assert_eq!(self.runes.len(), self.clusters.len());
        debug_assert!(!self.event_mode || self.plan_ids.len() == self.runes.len());
        debug_assert!(self.runes.len() <= self.marks.max);
        debug_assert!(self.clusters.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    fn push_rune(&mut self, ch: char) {
        self.runes.push(ch);
        self.clusters.push(self.next_cluster);
        self.next_cluster += 1;
        if self.event_mode {
            let top = self.stack.last().map(|f| f.plan_id).unwrap_or(0);
            self.plan_ids.push(top);
        }
    }

    fn push_frame(&mut self, settings: Vec<FeatureSetting>) -> Result<(), Error> {
        if settings.is_empty() {
            return Err(Error::Shape(
                "feature push event carries no settings".into(),
            ));
        }
        let mut overrides = self.stack.last().unwrap().overrides.clone();
        for setting in settings {
            overrides.retain(|o| o.tag != setting.tag);
            overrides.push(setting);
        }
        let plan = self.compile_with(&overrides)?;
        self.next_plan_id = self.next_plan_id.wrapping_add(1);
        let plan_id = self.next_plan_id;
        self.plans.insert(plan_id, plan);
        self.stack.push(PlanFrame { overrides, plan_id });
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<(), Error> {
        if self.stack.len() <= 1 {
            return Err(Error::PlanStackUnderflow);
        }
        self.stack.pop();
        Ok(())
    }

    fn compile_with(&mut self, overrides: &[FeatureSetting]) -> Result<Arc<Plan>, Error> {
        let mut features = self.base_features.clone();
        for o in overrides {
            features.push(FeatureRange::global(
                o.tag,
                if o.enabled { 1 } else { 0 },
                o.enabled,
            ));
        }
        let plan = compile(
            self.font,
            &self.props,
            self.engine.as_mut(),
            &features,
            self.policy,
        )?;
        Ok(Arc::new(plan))
    }

    /// Shapes the whole carry into a fresh glyph buffer. In event mode
    /// the carry is partitioned into maximal same-plan-id spans, each
    /// shaped under its own plan.
    fn shape_carry(&mut self) -> Result<GlyphBuffer, Error> {
        let mut out = GlyphBuffer::new();
        out.codepoints = Some(Vec::new());
        out.clusters = Some(Vec::new());
        out.plan_ids = Some(Vec::new());
        out.masks = Some(Vec::new());
        out.unsafe_flags = Some(Vec::new());
        out.joiners = Some(Vec::new());
        out.ensure_positions();

        let font = self.font;
        let mut start = 0;
        while start < self.runes.len() {
            let plan_id = if self.event_mode {
                self.plan_ids[start]
            } else {
                0
            };
            let mut end = start + 1;
            if self.event_mode {
                while end < self.runes.len() && self.plan_ids[end] == plan_id {
                    end += 1;
                }
            } else {
                end = self.runes.len();
            }
            let plan = self
                .plans
                .get(&plan_id)
                .cloned()
                .ok_or(Error::Internal("carry references an unknown plan"))?;

            let (chars, clusters) =
                normalize(self.engine.as_ref(), self.mode, &self.runes[start..end], &self.clusters[start..end]);
            let mut buf = GlyphBuffer::from_glyphs(
                chars.iter().map(|&c| font.glyph_for_codepoint(c as u32)).collect(),
            );
            buf.codepoints = Some(chars.iter().map(|&c| c as u32).collect());
            buf.clusters = Some(clusters);
            buf.joiners = Some(
                chars
                    .iter()
                    .map(|&c| match c {
                        '\u{200C}' => JOINER_ZWNJ,
                        '\u{200D}' => JOINER_ZWJ,
                        _ => 0,
                    })
                    .collect(),
            );

            {
                let mut run = RunContext {
                    font,
                    plan: &plan,
                    buffer: &mut buf,
                };
                self.engine.preprocess_run(&mut run);
                let len = run.buffer.len();
                self.engine.reorder_marks(&mut run, 0, len);
                self.engine.prepare_gsub(&mut run);
                self.engine.setup_masks(&mut run);
            }
            execute(&plan, font, &mut buf)?;
            buf.ensure_positions();
            buf.validate()?;
            append_span(&mut out, &buf, plan_id);
            start = end;
        }
        out.validate()?;
        Ok(out)
    }

    /// Finds a break-safe flush cut over the shaped buffer.
    ///
    /// Partial compaction is only sound when clusters map one-to-one to
    /// source runes; merged clusters could hide already-consumed source
    /// positions and duplicate them next cycle. A ready cut flushes at
    /// least `low` runes and keeps `low` runes of context in the carry.
    fn find_flush_cut(&self, shaped: &GlyphBuffer) -> Option<(usize, usize)> {
        if self.boundary == FlushBoundary::OnRunBoundary {
            return None;
        }
        if shaped.len() != self.runes.len() {
            return None;
        }
        let clusters = shaped.clusters.as_ref()?;
        if clusters != &self.clusters {
            return None;
        }
        let flags = shaped.unsafe_flags.as_ref();
        let limit = self.runes.len().saturating_sub(self.marks.low);
        let mut best = None;
        for cut in 1..=limit {
            // Glyphs sharing a cluster stay together.
            if cut < shaped.len() && clusters[cut] == clusters[cut - 1] {
                continue;
            }
            let left = flags.map(|f| f[cut - 1]).unwrap_or(0);
            let right = if cut < shaped.len() {
                flags.map(|f| f[cut]).unwrap_or(0)
            } else {
                0
            };
            if left != 0 && right != 0 {
                continue;
            }
            best = Some(cut);
        }
        let cut = best?;
        (cut >= self.marks.low).then_some((cut, cut))
    }

    fn emit(
        &self,
        shaped: &GlyphBuffer,
        glyph_cut: usize,
        sink: &mut dyn GlyphSink,
    ) -> Result<(), Error> {
        for i in 0..glyph_cut.min(shaped.len()) {
            let record = GlyphRecord {
                gid: shaped.glyphs[i],
                position: shaped
                    .positions
                    .as_ref()
                    .map(|p| p[i])
                    .unwrap_or_default(),
                cluster: shaped.cluster_at(i),
                mask: shaped.masks.as_ref().map(|m| m[i]).unwrap_or(0),
                unsafe_flags: shaped.unsafe_flags.as_ref().map(|f| f[i]).unwrap_or(0),
            };
            sink.write_glyph(&record)?;
        }
        Ok(())
    }

    fn compact(&mut self, raw_flush: usize) {
        let n = raw_flush.min(self.runes.len());
        self.runes.drain(..n);
        self.clusters.drain(..n);
        if self.event_mode {
            self.plan_ids.drain(..n);
        }
        debug_assert!(self
            .clusters
            .last()
            .map_or(true, |&tail| self.next_cluster > tail));
    }
}

/// Concatenates a shaped span onto the output buffer, preserving
/// cluster values and tagging the span's plan id.
fn append_span(out: &mut GlyphBuffer, span: &GlyphBuffer, plan_id: u16) {
    let n = span.len();
    out.glyphs.extend_from_slice(&span.glyphs);
    extend_side(out.codepoints.as_mut(), span.codepoints.as_ref(), n, 0);
    extend_side(out.clusters.as_mut(), span.clusters.as_ref(), n, 0);
    extend_side(out.masks.as_mut(), span.masks.as_ref(), n, 0);
    extend_side(out.unsafe_flags.as_mut(), span.unsafe_flags.as_ref(), n, 0);
    extend_side(out.joiners.as_mut(), span.joiners.as_ref(), n, 0);
    if let Some(ids) = out.plan_ids.as_mut() {
        ids.extend(std::iter::repeat(plan_id).take(n));
    }
    if let Some(positions) = out.positions.as_mut() {
        match span.positions.as_ref() {
            Some(p) => positions.extend_from_slice(p),
            None => positions.extend(std::iter::repeat_with(PositionDelta::default).take(n)),
        }
    }
}

fn extend_side<T: Copy>(out: Option<&mut Vec<T>>, side: Option<&Vec<T>>, n: usize, default: T) {
    if let Some(out) = out {
        match side {
            Some(side) => out.extend_from_slice(side),
            None => out.extend(std::iter::repeat(default).take(n)),
        }
    }
}
