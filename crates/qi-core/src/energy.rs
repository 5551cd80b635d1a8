use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Annotated energy value.
///
/// A magnitude that may carry a confidence annotation. The magnitude is the
/// only thing that takes part in arithmetic, ordering and equality: every
/// consumer goes through [`Energy::get`] (or `f64::from`). Two values with the
/// same magnitude but different confidence compare equal.
#[derive(Clone, Copy, Debug, Default)]
pub struct Energy {
    value: f64,
    confidence: Option<f64>,
}

impl Energy {
    pub const ZERO: Energy = Energy {
        value: 0.0,
        confidence: None,
    };

    pub fn new(value: f64) -> Self {
        Self {
            value,
            confidence: None,
        }
    }

    /// Energy with a confidence annotation, clamped to [0, 1].
    pub fn annotated(value: f64, confidence: f64) -> Self {
        Self {
            value,
            confidence: Some(confidence.clamp(0.0, 1.0)),
        }
    }

    /// Plain-number projection.
    pub fn get(self) -> f64 {
        self.value
    }

    pub fn confidence(self) -> Option<f64> {
        self.confidence
    }

    /// Same magnitude, new annotation.
    pub fn with_confidence(self, confidence: f64) -> Self {
        Self::annotated(self.value, confidence)
    }
}

impl From<f64> for Energy {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Energy> for f64 {
    fn from(e: Energy) -> Self {
        e.get()
    }
}

impl PartialEq for Energy {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl PartialOrd for Energy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.get().partial_cmp(&other.get())
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.confidence {
            Some(c) => write!(f, "{:.4} (p={c:.2})", self.value),
            None => write!(f, "{:.4}", self.value),
        }
    }
}

// Wire form: a bare number when unannotated, `{ value, confidence }` otherwise.

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireEnergy {
    Plain(f64),
    Annotated {
        value: f64,
        #[serde(default)]
        confidence: Option<f64>,
    },
}

impl Serialize for Energy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.confidence {
            None => WireEnergy::Plain(self.value),
            Some(confidence) => WireEnergy::Annotated {
                value: self.value,
                confidence: Some(confidence),
            },
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Energy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match WireEnergy::deserialize(deserializer)? {
            WireEnergy::Plain(value) => Energy::new(value),
            WireEnergy::Annotated { value, confidence } => Energy {
                value,
                confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_confidence() {
        let a = Energy::new(1.25);
        let b = Energy::annotated(1.25, 0.3);
        assert_eq!(a, b);
        assert_ne!(a, Energy::new(1.26));
    }

    #[test]
    fn test_ordering_uses_projection() {
        let low = Energy::annotated(0.5, 1.0);
        let high = Energy::annotated(0.7, 0.1);
        assert!(low < high);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(Energy::annotated(1.0, 4.0).confidence(), Some(1.0));
        assert_eq!(Energy::annotated(1.0, -1.0).confidence(), Some(0.0));
    }

    #[test]
    fn test_plain_serializes_as_number() {
        let json = serde_json::to_string(&Energy::new(2.5)).unwrap();
        assert_eq!(json, "2.5");
    }

    #[test]
    fn test_annotated_serializes_as_object() {
        let json = serde_json::to_string(&Energy::annotated(2.5, 0.5)).unwrap();
        assert_eq!(json, r#"{"value":2.5,"confidence":0.5}"#);
    }

    #[test]
    fn test_roundtrip_awkward_values() {
        for v in [0.1 + 0.2, 1.0 / 3.0, 1e-300, 123_456.789_012_345] {
            for e in [Energy::new(v), Energy::annotated(v, 0.42)] {
                let json = serde_json::to_string(&e).unwrap();
                let back: Energy = serde_json::from_str(&json).unwrap();
                assert_eq!(back.get().to_bits(), e.get().to_bits(), "{json}");
                assert_eq!(back.confidence(), e.confidence());
            }
        }
    }

    #[test]
    fn test_object_without_confidence() {
        let e: Energy = serde_json::from_str(r#"{"value":3.0}"#).unwrap();
        assert_eq!(e.get(), 3.0);
        assert_eq!(e.confidence(), None);
    }
}
