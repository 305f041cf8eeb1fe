use crate::tag::{tag_to_string, Tag};

fn fmt_tag(tag: &Tag) -> String {
    tag_to_string(*tag)
}

/// Errors surfaced at the shaping boundary.
///
/// The first group covers caller-contract violations and is reported
/// before any glyph reaches the sink. Plan-compilation failures
/// short-circuit the shape call. Plan-stack errors are reported at the
/// point of detection; glyphs already emitted stay at the sink. Source
/// and sink failures propagate verbatim. `Internal` marks programmer
/// errors the caller cannot recover from.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no font provided")]
    NilFont,
    #[error("no rune source provided")]
    NilRuneSource,
    #[error("no glyph sink provided")]
    NilGlyphSink,
    #[error("no event source provided")]
    NilEventSource,
    #[error("no shaping engines registered")]
    NoShaper,
    #[error("no shaping engine matched the selection")]
    NoMatchingShaper,
    #[error("explicit flush boundary is reserved and unsupported")]
    FlushExplicitUnsupported,
    #[error("indexed feature ranges are not allowed in event mode")]
    EventIndexedFeatureRange,
    #[error("feature scope pop with empty plan stack")]
    PlanStackUnderflow,
    #[error("feature scopes left open at end of input")]
    PlanStackUnclosedAtEof,
    #[error("feature mask bit budget exhausted")]
    MaskBitBudgetExhausted,
    #[error("requested feature '{}' not present in font", fmt_tag(.0))]
    MissingFeature(Tag),
    #[error("shaping failed: {0}")]
    Shape(String),
    #[error("internal shaper error: {0}")]
    Internal(&'static str),
    #[error("rune source error: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("glyph sink error: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// True for errors detected before any side effect on the sink.
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            Error::NilFont
                | Error::NilRuneSource
                | Error::NilGlyphSink
                | Error::NilEventSource
                | Error::FlushExplicitUnsupported
                | Error::EventIndexedFeatureRange
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::tag_from_bytes;

    #[test]
    fn missing_feature_names_the_tag() {
        let err = Error::MissingFeature(tag_from_bytes(b"smcp"));
        assert_eq!(err.to_string(), "requested feature 'smcp' not present in font");
    }

    #[test]
    fn contract_errors_are_flagged() {
        assert!(Error::NilFont.is_contract());
        assert!(!Error::MaskBitBudgetExhausted.is_contract());
    }
}
