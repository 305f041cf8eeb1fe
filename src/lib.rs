/*!
Streaming OpenType text shaping.

Shaping is the process of converting a sequence of Unicode code points
into a positioned sequence of glyph identifiers for a particular font,
script, language, direction, and set of typographic features. This
crate implements the layer between text and the rasterizer: glyph
mapping, Unicode normalization, GSUB substitution, GPOS positioning,
cluster bookkeeping, and incremental flush — all driven by a compiled
shape plan.

The shaper operates on one run at a time: a stretch of text with a
single script, language, direction, and feature selection. Producing
those runs (itemization, bidi analysis, line breaking) is out of scope,
as is parsing font files: the font arrives pre-parsed behind the
[`ShapedFont`](font::ShapedFont) trait.

# Shaping a string

```
use glyphstream::{Params, Shaper};
use glyphstream::font::SyntheticFont;

let mut font = SyntheticFont::new();
font.map_range('a' as u32, 1, 26);
let shaper = Shaper::new();
let params = Params::new(&font);
let glyphs = shaper.shape_str(&params, "abc").unwrap();
assert_eq!(glyphs.iter().map(|g| g.gid).collect::<Vec<_>>(), vec![1, 2, 3]);
```

# Streaming

For long runs, feed a [`RuneSource`](shaper::RuneSource) and receive
glyphs through a [`GlyphSink`](shaper::GlyphSink). The pipeline buffers
input between a low and a high watermark, shapes the carry, and flushes
prefixes whose cluster boundaries are safe to break at, so a slow
producer never forces the consumer to wait for the whole run:

```
use glyphstream::{BufferOptions, Params, Shaper, StrRuneSource, VecSink};
use glyphstream::font::SyntheticFont;

let mut font = SyntheticFont::new();
font.map_range('a' as u32, 1, 26);
let shaper = Shaper::new();
let params = Params::new(&font);
let mut source = StrRuneSource::new("stream me");
let mut sink = VecSink::default();
shaper
    .shape(&params, Some(&mut source), Some(&mut sink), &BufferOptions::default())
    .unwrap();
```

The event front end ([`Shaper::shape_events`]) additionally understands
feature push/pop scopes, compiling a fresh plan per scope and shaping
each same-plan span of the carry under its own plan.

# Custom script engines

Script-specific behavior (joining, reordering, composition) plugs in
through the [`ScriptEngine`](engine::ScriptEngine) trait. The crate
ships a neutral default engine; registering an engine whose
[`match_confidence`](engine::ScriptEngine::match_confidence) outranks
it routes runs of the claimed script through that engine's hooks.
*/

pub mod apply;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod font;
pub mod layout;
pub mod plan;
mod stream;
pub mod shaper;
pub mod tag;

pub use buffer::{EditSpan, GlyphBuffer, GlyphId, PositionDelta, NOTDEF};
pub use error::Error;
pub use shaper::{
    BufferOptions, Direction, FeatureRange, FeatureSetting, FlushBoundary, GlyphRecord,
    GlyphSink, InputEvent, InputEventSource, Params, RuneSource, Shaper, StrRuneSource, VecSink,
};
pub use tag::{tag_from_bytes, tag_from_str_lossy, Tag};
