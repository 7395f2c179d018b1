//! Weight notification decoding.
//!
//! The data characteristic notifies the current weight as UTF-8 decimal
//! text, e.g. `"75.500"`. Frames that do not decode to a weight in
//! `[0, 9999)` are rejected; in a noisy radio environment that is expected
//! and never fatal.

use chrono::{DateTime, Utc};

/// Unit attached to samples when the scale does not send one.
pub const DEFAULT_UNIT: &str = "kg";

/// Upper bound (exclusive) of a valid weight.
pub const MAX_WEIGHT: f64 = 9999.0;

/// A single accepted weight reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightSample {
    value: f64,
    unit: String,
    observed_at: DateTime<Utc>,
}

impl WeightSample {
    /// The weight value, in `[0, 9999)`.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The unit of `value`.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// When the sample was decoded.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

impl std::fmt::Display for WeightSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} {}", self.value, self.unit)
    }
}

/// Why a data frame produced no sample.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightRejection {
    /// The frame was empty after trimming.
    Empty,
    /// The frame was not valid UTF-8.
    NotUtf8,
    /// The text is not a finite decimal number.
    NotNumeric(String),
    /// The number is outside `[0, 9999)`.
    OutOfRange(f64),
}

impl std::fmt::Display for WeightRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::NotUtf8 => write!(f, "frame is not UTF-8"),
            Self::NotNumeric(text) => write!(f, "not a number: {:?}", text),
            Self::OutOfRange(value) => write!(f, "weight {} out of range", value),
        }
    }
}

/// Decode a data notification into a [`WeightSample`].
///
/// # Example
///
/// ```
/// use kgiton_ble::protocol::decode_weight;
///
/// let sample = decode_weight(b" 72.350\n").unwrap();
/// assert!((sample.value() - 72.35).abs() < 1e-9);
/// assert_eq!(sample.unit(), "kg");
///
/// assert!(decode_weight(b"9999").is_err());
/// ```
pub fn decode_weight(data: &[u8]) -> Result<WeightSample, WeightRejection> {
    let text = std::str::from_utf8(data).map_err(|_| WeightRejection::NotUtf8)?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    if text.is_empty() {
        return Err(WeightRejection::Empty);
    }

    let value: f64 = text
        .parse()
        .map_err(|_| WeightRejection::NotNumeric(text.to_string()))?;

    if !value.is_finite() {
        return Err(WeightRejection::NotNumeric(text.to_string()));
    }

    if !(0.0..MAX_WEIGHT).contains(&value) {
        return Err(WeightRejection::OutOfRange(value));
    }

    Ok(WeightSample {
        value,
        unit: DEFAULT_UNIT.to_string(),
        observed_at: Utc::now(),
    })
}
