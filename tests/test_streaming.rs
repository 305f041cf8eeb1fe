//! Streaming behavior: watermark-driven incremental flush, event-mode
//! feature scopes, plan-stack discipline, execution-mode parity.

use glyphstream::apply::{exec_mode, set_exec_mode, ExecMode};
use glyphstream::font::SyntheticFont;
use glyphstream::layout::{
    Coverage, Feature, LangSys, LayoutTable, Ligature, Lookup, LookupKind, Script,
    SubtablePayload,
};
use glyphstream::tag::{tag_from_bytes, DFLT_SCRIPT};
use glyphstream::{
    BufferOptions, Error, FeatureSetting, GlyphRecord, GlyphSink, InputEvent, InputEventSource,
    Params, RuneSource, Shaper, StrRuneSource, VecSink,
};

fn layout_table(features: Vec<Feature>, lookups: Vec<Lookup>) -> LayoutTable {
    LayoutTable {
        scripts: vec![Script {
            tag: DFLT_SCRIPT,
            default_lang_sys: Some(LangSys {
                required_feature: None,
                feature_indices: (0..features.len() as u16).collect(),
            }),
            lang_sys: Vec::new(),
        }],
        features,
        lookups,
    }
}

fn latin_font() -> SyntheticFont {
    let mut font = SyntheticFont::new();
    font.map_range('a' as u32, 1, 26);
    font
}

fn gid(c: char) -> u16 {
    (c as u32 - 'a' as u32 + 1) as u16
}

fn small_buffers() -> BufferOptions {
    BufferOptions {
        high_watermark: 4,
        low_watermark: 2,
        max_buffer: 8,
        ..BufferOptions::default()
    }
}

/// Sink that also records how many write calls had happened when each
/// glyph arrived, so flush batching is observable.
#[derive(Default)]
struct RecordingSink {
    glyphs: Vec<GlyphRecord>,
}

impl GlyphSink for RecordingSink {
    fn write_glyph(&mut self, glyph: &GlyphRecord) -> Result<(), Error> {
        self.glyphs.push(*glyph);
        Ok(())
    }
}

#[test]
fn incremental_flush_preserves_order_and_clusters() {
    let font = latin_font();
    let shaper = Shaper::new();
    let params = Params::new(&font);
    let text: String = std::iter::repeat("abcde").take(10).collect::<String>();
    let mut source = StrRuneSource::new(&text);
    let mut sink = RecordingSink::default();
    shaper
        .shape(&params, Some(&mut source), Some(&mut sink), &small_buffers())
        .unwrap();
    assert_eq!(sink.glyphs.len(), text.chars().count());
    // Every rune arrives exactly once, in logical order.
    let clusters: Vec<u32> = sink.glyphs.iter().map(|g| g.cluster).collect();
    let expected: Vec<u32> = (0..text.chars().count() as u32).collect();
    assert_eq!(clusters, expected);
    let ids: Vec<u16> = sink.glyphs.iter().map(|g| g.gid).collect();
    let expected_ids: Vec<u16> = text.chars().map(gid).collect();
    assert_eq!(ids, expected_ids);
}

#[test]
fn length_changing_shapes_defer_and_stay_consistent() {
    // f+i ligates, so the run is not length-preserving and partial
    // flushes must defer; the output still must not drop or duplicate.
    let mut font = latin_font();
    let liga = Lookup::new(
        0,
        LookupKind::LigatureSubst,
        vec![SubtablePayload::LigatureSubst1 {
            coverage: Coverage::from_glyphs(vec![gid('f')]),
            sets: vec![vec![Ligature {
                glyph: 100,
                components: vec![gid('f'), gid('i')],
            }]],
        }],
    );
    font.gsub = Some(layout_table(
        vec![Feature {
            tag: tag_from_bytes(b"liga"),
            lookup_indices: vec![0],
        }],
        vec![liga],
    ));
    let shaper = Shaper::new();
    let params = Params::new(&font);
    let text = "fifofifofi";
    let mut source = StrRuneSource::new(text);
    let mut sink = VecSink::default();
    shaper
        .shape(&params, Some(&mut source), Some(&mut sink), &small_buffers())
        .unwrap();
    let ids: Vec<u16> = sink.0.iter().map(|g| g.gid).collect();
    let (f, o) = (gid('f'), gid('o'));
    assert_eq!(ids, vec![100, f, o, 100, f, o, 100]);
    // Clusters stay non-decreasing across flush boundaries.
    let clusters: Vec<u32> = sink.0.iter().map(|g| g.cluster).collect();
    assert!(clusters.windows(2).all(|w| w[0] <= w[1]));
}

struct EventScript {
    events: std::vec::IntoIter<InputEvent>,
}

impl EventScript {
    fn new(events: Vec<InputEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }

    fn runes(text: &str) -> Vec<InputEvent> {
        text.chars()
            .map(|ch| InputEvent::Rune {
                ch,
                size: ch.len_utf8(),
            })
            .collect()
    }
}

impl InputEventSource for EventScript {
    fn read_event(&mut self) -> Result<Option<InputEvent>, Error> {
        Ok(self.events.next())
    }
}

fn ss01_font() -> SyntheticFont {
    let mut font = latin_font();
    let ss01 = Lookup::new(
        0,
        LookupKind::SingleSubst,
        vec![SubtablePayload::SingleSubst2 {
            coverage: Coverage::from_glyphs(vec![gid('a')]),
            substitutes: vec![60],
        }],
    );
    font.gsub = Some(layout_table(
        vec![Feature {
            tag: tag_from_bytes(b"ss01"),
            lookup_indices: vec![0],
        }],
        vec![ss01],
    ));
    font
}

#[test]
fn feature_scopes_shape_their_spans_under_their_own_plan() {
    let font = ss01_font();
    let shaper = Shaper::new();
    let params = Params::new(&font);
    let mut events = EventScript::runes("aa");
    events.push(InputEvent::PushFeatures(vec![FeatureSetting {
        tag: tag_from_bytes(b"ss01"),
        enabled: true,
    }]));
    events.extend(EventScript::runes("aa"));
    events.push(InputEvent::PopFeatures);
    events.extend(EventScript::runes("a"));
    let mut source = EventScript::new(events);
    let mut sink = VecSink::default();
    shaper
        .shape_events(
            &params,
            Some(&mut source),
            Some(&mut sink),
            &BufferOptions::default(),
        )
        .unwrap();
    let ids: Vec<u16> = sink.0.iter().map(|g| g.gid).collect();
    let a = gid('a');
    assert_eq!(ids, vec![a, a, 60, 60, a]);
    // Cluster values keep counting across scope boundaries.
    let clusters: Vec<u32> = sink.0.iter().map(|g| g.cluster).collect();
    assert_eq!(clusters, vec![0, 1, 2, 3, 4]);
}

#[test]
fn pop_with_empty_stack_fails() {
    let font = latin_font();
    let shaper = Shaper::new();
    let params = Params::new(&font);
    let mut source = EventScript::new(vec![InputEvent::PopFeatures]);
    let mut sink = VecSink::default();
    let err = shaper
        .shape_events(
            &params,
            Some(&mut source),
            Some(&mut sink),
            &BufferOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::PlanStackUnderflow));
}

#[test]
fn unclosed_scope_at_eof_fails_after_emitting() {
    let font = latin_font();
    let shaper = Shaper::new();
    let params = Params::new(&font);
    let mut events = EventScript::runes("ab");
    events.push(InputEvent::PushFeatures(vec![FeatureSetting {
        tag: tag_from_bytes(b"ss01"),
        enabled: true,
    }]));
    events.extend(EventScript::runes("c"));
    let mut source = EventScript::new(events);
    let mut sink = VecSink::default();
    let err = shaper
        .shape_events(
            &params,
            Some(&mut source),
            Some(&mut sink),
            &BufferOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::PlanStackUnclosedAtEof));
    // Glyphs already flushed stay at the sink.
    assert_eq!(sink.0.len(), 3);
}

#[test]
fn empty_feature_push_is_rejected() {
    let font = latin_font();
    let shaper = Shaper::new();
    let params = Params::new(&font);
    let mut source = EventScript::new(vec![InputEvent::PushFeatures(Vec::new())]);
    let mut sink = VecSink::default();
    let err = shaper
        .shape_events(
            &params,
            Some(&mut source),
            Some(&mut sink),
            &BufferOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Shape(_)));
}

#[test]
fn execution_modes_shape_identically() {
    let font = ss01_font();
    let shaper = Shaper::new();
    let saved = exec_mode();

    let shape = |text: &str| {
        let mut params = Params::new(&font);
        params.features.push(glyphstream::FeatureRange::global(
            tag_from_bytes(b"ss01"),
            1,
            true,
        ));
        shaper.shape_str(&params, text).unwrap()
    };

    set_exec_mode(ExecMode::ConcreteFirst);
    let first = shape("abab");
    set_exec_mode(ExecMode::ConcreteOnly);
    let only = shape("abab");
    set_exec_mode(saved);

    let project =
        |v: &[GlyphRecord]| -> Vec<(u16, u32, i32)> {
            v.iter()
                .map(|g| (g.gid, g.cluster, g.position.x_advance))
                .collect()
        };
    assert_eq!(project(&first), project(&only));
}

/// A source that fails mid-stream; the error must propagate verbatim
/// and abort the shape call.
struct FailingSource {
    remaining: usize,
}

impl RuneSource for FailingSource {
    fn read_rune(&mut self) -> Result<Option<(char, usize)>, Error> {
        if self.remaining == 0 {
            return Err(Error::Source("device gone".into()));
        }
        self.remaining -= 1;
        Ok(Some(('a', 1)))
    }
}

#[test]
fn source_errors_abort_shaping() {
    let font = latin_font();
    let shaper = Shaper::new();
    let params = Params::new(&font);
    let mut source = FailingSource { remaining: 2 };
    let mut sink = VecSink::default();
    let err = shaper
        .shape(&params, Some(&mut source), Some(&mut sink), &small_buffers())
        .unwrap_err();
    assert!(matches!(err, Error::Source(_)));
}
