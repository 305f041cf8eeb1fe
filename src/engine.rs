//! Script-engine hooks.
//!
//! Script-specific shapers (Arabic joining, Indic reordering, Hangul
//! composition) plug in behind this surface. The core ships only the
//! hook definitions and a default engine; an engine is a plain value
//! answering capability probes, not a subclass of anything.

use crate::buffer::GlyphBuffer;
use crate::error::Error;
use crate::font::ShapedFont;
use crate::plan::{Plan, Planner};
use crate::shaper::Direction;
use crate::tag::Tag;

/// How strongly an engine claims a selection.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Confidence {
    None,
    Fallback,
    Possible,
    Likely,
    Certain,
}

/// Engine preference for Unicode normalization of the run.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Normalization {
    /// Pick composed or decomposed from the script.
    Auto,
    /// Bypass normalization entirely.
    None,
    Composed,
    Decomposed,
}

/// The (script, language, direction) triple an engine is asked about.
#[derive(Copy, Clone, Debug)]
pub struct Selection {
    pub script: Tag,
    pub language: Tag,
    pub direction: Direction,
}

/// Narrow view handed to per-run hooks.
pub struct RunContext<'a> {
    pub font: &'a dyn ShapedFont,
    pub plan: &'a Plan,
    pub buffer: &'a mut GlyphBuffer,
}

/// A script shaping engine.
///
/// Only `name`, `match_confidence` and `new_instance` are mandatory;
/// every other method is an independent capability probe with a neutral
/// default. A fresh instance is requested per shape call, so hook
/// implementations may keep per-run state.
pub trait ScriptEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn match_confidence(&self, selection: &Selection) -> Confidence;

    /// Returns a fresh per-call instance.
    fn new_instance(&self) -> Box<dyn ScriptEngine>;

    fn normalization(&self) -> Normalization {
        Normalization::Auto
    }

    fn apply_gpos(&self) -> bool {
        true
    }

    fn collect_features(&mut self, _planner: &mut Planner, _selection: &Selection) {}

    fn override_features(&mut self, _planner: &mut Planner) {}

    fn init_plan(&mut self, _plan: &mut Plan) {}

    /// Called after feature resolution; the usual job is anchoring
    /// pause stages before or after a named feature.
    fn post_resolve_features(&mut self, _planner: &mut Planner, _selection: &Selection) {}

    fn preprocess_run(&mut self, _run: &mut RunContext) {}

    fn reorder_marks(&mut self, _run: &mut RunContext, _start: usize, _end: usize) {}

    fn prepare_gsub(&mut self, _run: &mut RunContext) {}

    fn setup_masks(&mut self, _run: &mut RunContext) {}

    fn postprocess_run(&mut self, _run: &mut RunContext) {}

    /// Script-specific composition, consulted before Unicode canonical
    /// composition.
    fn compose(&self, _a: char, _b: char) -> Option<char> {
        None
    }
}

/// The engine used when no script-specific engine claims the run.
#[derive(Default)]
pub struct DefaultEngine;

impl ScriptEngine for DefaultEngine {
    fn name(&self) -> &'static str {
        "default"
    }

    fn match_confidence(&self, _selection: &Selection) -> Confidence {
        Confidence::Fallback
    }

    fn new_instance(&self) -> Box<dyn ScriptEngine> {
        Box::new(DefaultEngine)
    }
}

/// Picks the candidate with the highest non-`None` confidence, ties
/// broken by name, and requests a fresh instance from it.
pub(crate) fn select_engine(
    candidates: &[Box<dyn ScriptEngine>],
    selection: &Selection,
) -> Result<Box<dyn ScriptEngine>, Error> {
    if candidates.is_empty() {
        return Err(Error::NoShaper);
    }
    let mut best: Option<(&dyn ScriptEngine, Confidence)> = None;
    for engine in candidates {
        let confidence = engine.match_confidence(selection);
        if confidence == Confidence::None {
            continue;
        }
        best = Some(match best {
            None => (engine.as_ref(), confidence),
            Some((current, current_confidence)) => {
                if confidence > current_confidence
                    || (confidence == current_confidence && engine.name() < current.name())
                {
                    (engine.as_ref(), confidence)
                } else {
                    (current, current_confidence)
                }
            }
        });
    }
    best.map(|(engine, _)| engine.new_instance())
        .ok_or(Error::NoMatchingShaper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::DFLT_SCRIPT;

    struct Claimer(&'static str, Confidence);

    impl ScriptEngine for Claimer {
        fn name(&self) -> &'static str {
            self.0
        }
        fn match_confidence(&self, _selection: &Selection) -> Confidence {
            self.1
        }
        fn new_instance(&self) -> Box<dyn ScriptEngine> {
            Box::new(Claimer(self.0, self.1))
        }
    }

    fn selection() -> Selection {
        Selection {
            script: DFLT_SCRIPT,
            language: crate::tag::DFLT_LANG,
            direction: Direction::LeftToRight,
        }
    }

    #[test]
    fn highest_confidence_wins() {
        let engines: Vec<Box<dyn ScriptEngine>> = vec![
            Box::new(Claimer("b", Confidence::Possible)),
            Box::new(Claimer("a", Confidence::Likely)),
        ];
        let chosen = select_engine(&engines, &selection()).unwrap();
        assert_eq!(chosen.name(), "a");
    }

    #[test]
    fn ties_break_by_name() {
        let engines: Vec<Box<dyn ScriptEngine>> = vec![
            Box::new(Claimer("zeta", Confidence::Likely)),
            Box::new(Claimer("alpha", Confidence::Likely)),
        ];
        let chosen = select_engine(&engines, &selection()).unwrap();
        assert_eq!(chosen.name(), "alpha");
    }

    #[test]
    fn no_candidates_and_no_match_are_distinct_errors() {
        let none: Vec<Box<dyn ScriptEngine>> = Vec::new();
        assert!(matches!(
            select_engine(&none, &selection()),
            Err(Error::NoShaper)
        ));
        let unclaimed: Vec<Box<dyn ScriptEngine>> =
            vec![Box::new(Claimer("a", Confidence::None))];
        assert!(matches!(
            select_engine(&unclaimed, &selection()),
            Err(Error::NoMatchingShaper)
        ));
    }
}
