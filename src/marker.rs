//! Completion markers: the idempotency check and the post-condition check.

use std::borrow::Cow;

/// Marker phrases whose presence means the adaptation is already in place.
///
/// `legacy` holds phrases written by earlier revisions of the patch so that
/// files patched by an older engine are still recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    pub completion: String,
    pub legacy: Vec<String>,
}

impl MarkerSet {
    pub fn new(completion: impl Into<String>) -> Self {
        Self {
            completion: completion.into(),
            legacy: Vec::new(),
        }
    }

    pub fn with_legacy(mut self, marker: impl Into<String>) -> Self {
        self.legacy.push(marker.into());
        self
    }

    pub fn is_patched(&self, content: &str) -> bool {
        content.contains(self.completion.as_str())
            || self.legacy.iter().any(|m| content.contains(m.as_str()))
    }

    pub fn is_patched_bytes(&self, content: &[u8]) -> bool {
        self.is_patched(&decode(content))
    }
}

/// Post-condition check run against freshly written content.
///
/// The engine is generic over this so the check can be replaced in tests.
pub trait Verifier {
    fn is_satisfied(&self, content: &str) -> bool;

    /// Human-readable description of what is expected, for error messages.
    fn expectation(&self) -> String;
}

/// Default verifier: either a specific required marker or, when none is
/// configured, the same check as [`MarkerSet::is_patched`].
#[derive(Debug, Clone)]
pub struct PostCondition {
    markers: MarkerSet,
    required: Option<String>,
}

impl PostCondition {
    pub fn new(markers: MarkerSet, required: Option<String>) -> Self {
        Self { markers, required }
    }
}

impl Verifier for PostCondition {
    fn is_satisfied(&self, content: &str) -> bool {
        match &self.required {
            Some(marker) => content.contains(marker.as_str()),
            None => self.markers.is_patched(content),
        }
    }

    fn expectation(&self) -> String {
        match &self.required {
            Some(marker) => format!("marker {marker:?}"),
            None => format!("completion marker {:?}", self.markers.completion),
        }
    }
}

pub(crate) fn decode(content: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(content)
}
