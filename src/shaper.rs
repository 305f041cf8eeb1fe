//! Public shaping entry points: parameters, sources, sinks, and the
//! [`Shaper`] itself.

use serde::{Deserialize, Serialize};

use crate::buffer::{GlyphId, PositionDelta};
use crate::engine::{select_engine, DefaultEngine, ScriptEngine, Selection};
use crate::error::Error;
use crate::font::ShapedFont;
use crate::plan::{Policy, SegmentProps};
use crate::stream::{Front, Pipeline, Watermarks};
use crate::tag::Tag;

/// Text direction of a run. Bidi analysis is the caller's job; a run
/// arrives in one direction.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    LeftToRight,
    RightToLeft,
}

/// A feature setting over a source range. `start == 0 && end == 0`
/// means global. In event mode only global ranges are allowed.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FeatureRange {
    pub tag: Tag,
    pub arg: i32,
    pub on: bool,
    pub start: usize,
    pub end: usize,
}

impl FeatureRange {
    pub fn global(tag: Tag, arg: i32, on: bool) -> Self {
        Self {
            tag,
            arg,
            on,
            start: 0,
            end: 0,
        }
    }

    pub fn is_global(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// A feature toggle inside a push event.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FeatureSetting {
    pub tag: Tag,
    pub enabled: bool,
}

/// When shaped glyphs may be handed to the sink.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum FlushBoundary {
    /// Emit only when the whole run is shaped.
    OnRunBoundary,
    /// Emit incrementally at break-safe cluster boundaries.
    #[default]
    OnClusterBoundary,
    /// Reserved; rejected with [`Error::FlushExplicitUnsupported`].
    Explicit,
}

/// Streaming buffer configuration. Zero watermarks select the defaults
/// (3500 / 1024 / 4096).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BufferOptions {
    pub flush_boundary: FlushBoundary,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub max_buffer: usize,
}

const DEFAULT_HIGH: usize = 3500;
const DEFAULT_LOW: usize = 1024;
const DEFAULT_MAX: usize = 4096;

impl BufferOptions {
    fn resolve(&self) -> Result<Watermarks, Error> {
        if self.flush_boundary == FlushBoundary::Explicit {
            return Err(Error::FlushExplicitUnsupported);
        }
        let high = if self.high_watermark == 0 {
            DEFAULT_HIGH
        } else {
            self.high_watermark
        };
        let low = if self.low_watermark == 0 {
            DEFAULT_LOW
        } else {
            self.low_watermark
        };
        let max = if self.max_buffer == 0 {
            DEFAULT_MAX
        } else {
            self.max_buffer
        };
        if low == 0 || low > high || high > max {
            return Err(Error::Shape(format!(
                "invalid watermarks: low {low}, high {high}, max {max}"
            )));
        }
        Ok(Watermarks { high, low, max })
    }
}

/// Per-call shaping parameters.
pub struct Params<'a> {
    pub font: Option<&'a dyn ShapedFont>,
    pub direction: Direction,
    /// ISO 15924 script tag; zero selects `DFLT`.
    pub script: Tag,
    /// OpenType language-system tag; zero selects the default.
    pub language: Tag,
    pub features: Vec<FeatureRange>,
}

impl<'a> Params<'a> {
    pub fn new(font: &'a dyn ShapedFont) -> Self {
        Self {
            font: Some(font),
            direction: Direction::LeftToRight,
            script: 0,
            language: 0,
            features: Vec::new(),
        }
    }
}

/// One shaped glyph as delivered to the sink.
#[derive(Copy, Clone, Debug, Default)]
pub struct GlyphRecord {
    pub gid: GlyphId,
    pub position: PositionDelta,
    pub cluster: u32,
    pub mask: u32,
    pub unsafe_flags: u16,
}

/// An input event on the event front end.
#[derive(Clone, Debug)]
pub enum InputEvent {
    Rune { ch: char, size: usize },
    PushFeatures(Vec<FeatureSetting>),
    PopFeatures,
}

/// Incremental rune input. `Ok(None)` signals end of input.
pub trait RuneSource {
    fn read_rune(&mut self) -> Result<Option<(char, usize)>, Error>;
}

/// Incremental event input. `Ok(None)` signals end of input.
pub trait InputEventSource {
    fn read_event(&mut self) -> Result<Option<InputEvent>, Error>;
}

/// Receives shaped glyphs. Output already written is never rescinded.
pub trait GlyphSink {
    fn write_glyph(&mut self, glyph: &GlyphRecord) -> Result<(), Error>;
}

/// Rune source over a string slice.
pub struct StrRuneSource<'a> {
    chars: std::str::Chars<'a>,
}

impl<'a> StrRuneSource<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars(),
        }
    }
}

impl RuneSource for StrRuneSource<'_> {
    fn read_rune(&mut self) -> Result<Option<(char, usize)>, Error> {
        Ok(self.chars.next().map(|c| (c, c.len_utf8())))
    }
}

/// Sink collecting records into a vector.
#[derive(Default)]
pub struct VecSink(pub Vec<GlyphRecord>);

impl GlyphSink for VecSink {
    fn write_glyph(&mut self, glyph: &GlyphRecord) -> Result<(), Error> {
        self.0.push(*glyph);
        Ok(())
    }
}

/// The shaper: a set of candidate engines and a policy. It holds no
/// mutable state across calls; distinct instances may shape in
/// parallel on distinct sources and sinks.
pub struct Shaper {
    engines: Vec<Box<dyn ScriptEngine>>,
    policy: Policy,
}

impl Default for Shaper {
    fn default() -> Self {
        Self::new()
    }
}

impl Shaper {
    /// A shaper with only the default engine registered.
    pub fn new() -> Self {
        Self {
            engines: vec![Box::new(DefaultEngine)],
            policy: Policy::default(),
        }
    }

    pub fn with_engines(engines: Vec<Box<dyn ScriptEngine>>) -> Self {
        Self {
            engines,
            policy: Policy::default(),
        }
    }

    pub fn register_engine(&mut self, engine: Box<dyn ScriptEngine>) {
        self.engines.push(engine);
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
    }

    /// Shapes a rune stream into the sink.
    pub fn shape(
        &self,
        params: &Params<'_>,
        source: Option<&mut dyn RuneSource>,
        sink: Option<&mut dyn GlyphSink>,
        options: &BufferOptions,
    ) -> Result<(), Error> {
        let marks = options.resolve()?;
        let font = params.font.ok_or(Error::NilFont)?;
        let source = source.ok_or(Error::NilRuneSource)?;
        let sink = sink.ok_or(Error::NilGlyphSink)?;
        let mut pipeline = self.pipeline(font, params, options.flush_boundary, marks, false)?;
        pipeline.run(Front::Runes(source), sink)
    }

    /// Shapes an event stream (runes plus feature push/pop scopes) into
    /// the sink. Indexed feature ranges are rejected.
    pub fn shape_events(
        &self,
        params: &Params<'_>,
        source: Option<&mut dyn InputEventSource>,
        sink: Option<&mut dyn GlyphSink>,
        options: &BufferOptions,
    ) -> Result<(), Error> {
        let marks = options.resolve()?;
        let font = params.font.ok_or(Error::NilFont)?;
        let source = source.ok_or(Error::NilEventSource)?;
        let sink = sink.ok_or(Error::NilGlyphSink)?;
        if params.features.iter().any(|f| !f.is_global()) {
            return Err(Error::EventIndexedFeatureRange);
        }
        let mut pipeline = self.pipeline(font, params, options.flush_boundary, marks, true)?;
        pipeline.run(Front::Events(source), sink)
    }

    /// Convenience: shapes a string with default buffering and returns
    /// the collected records.
    pub fn shape_str(&self, params: &Params<'_>, text: &str) -> Result<Vec<GlyphRecord>, Error> {
        let mut source = StrRuneSource::new(text);
        let mut sink = VecSink::default();
        self.shape(
            params,
            Some(&mut source),
            Some(&mut sink),
            &BufferOptions::default(),
        )?;
        Ok(sink.0)
    }

    fn pipeline<'f>(
        &self,
        font: &'f dyn ShapedFont,
        params: &Params<'_>,
        boundary: FlushBoundary,
        marks: Watermarks,
        event_mode: bool,
    ) -> Result<Pipeline<'f>, Error> {
        let selection = Selection {
            script: params.script,
            language: params.language,
            direction: params.direction,
        };
        let engine = select_engine(&self.engines, &selection)?;
        let props = SegmentProps {
            script: params.script,
            language: params.language,
            direction: params.direction,
        };
        Pipeline::new(
            font,
            engine,
            props,
            self.policy,
            params.features.clone(),
            boundary,
            marks,
            event_mode,
        )
    }
}
