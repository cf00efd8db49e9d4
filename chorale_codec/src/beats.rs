// Exact musical time in beats (quarter lengths).
//
// Durations are rationals so that quantization (`floor(d / step)`) and
// cross-voice length comparisons never suffer float drift. Triplet and
// dotted values (1/3, 3/4, 3/2...) are represented exactly.
//
// Serialized form is a string "n/d" (or "n" for whole beats). Deserialization
// also accepts a plain JSON number, converted with a fixed denominator.

use num_rational::Ratio;
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serializer};

/// Exact duration or offset in beats.
pub type Beats = Ratio<i64>;

/// Denominator used when converting floats: LCM-friendly for common
/// musical subdivisions (2, 3, 4, 5, 6, 8, 12, 16, 24, 32...).
const FLOAT_DENOMINATOR: i64 = 9600;

/// Create a duration of `n / d` beats.
#[inline]
pub fn beats(n: i64, d: i64) -> Beats {
    Ratio::new(n, d)
}

/// Whole beats.
#[inline]
pub fn whole(n: i64) -> Beats {
    Ratio::from_integer(n)
}

/// Convert a float quarter length to the nearest representable `Beats`.
pub fn from_f64(value: f64) -> Beats {
    let numer = (value * FLOAT_DENOMINATOR as f64).round() as i64;
    Ratio::new(numer, FLOAT_DENOMINATOR)
}

/// Lossy conversion for display and MIDI tick math.
pub fn to_f64(value: Beats) -> f64 {
    *value.numer() as f64 / *value.denom() as f64
}

/// Number of whole time steps covered by `duration`, never less than one.
///
/// `duration` and `step` must both be positive.
pub fn steps_for(duration: Beats, step: Beats) -> usize {
    let steps = (duration / step).floor().to_integer();
    steps.max(1) as usize
}

/// Parse "3/4", "2" or "0.75".
pub fn parse(text: &str) -> Option<Beats> {
    let text = text.trim();
    if let Some((n, d)) = text.split_once('/') {
        let n: i64 = n.trim().parse().ok()?;
        let d: i64 = d.trim().parse().ok()?;
        if d == 0 {
            return None;
        }
        return Some(Ratio::new(n, d));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Ratio::from_integer(n));
    }
    let value: f64 = text.parse().ok()?;
    value.is_finite().then(|| from_f64(value))
}

/// Sum of a sequence of durations.
pub fn total<I: IntoIterator<Item = Beats>>(durations: I) -> Beats {
    durations.into_iter().fold(Beats::zero(), |acc, d| acc + d)
}

/// `#[serde(with = "crate::beats::serde_beats")]` helper.
pub mod serde_beats {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Beats, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Beats, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) if n.is_finite() => Ok(from_f64(n)),
            Repr::Number(n) => Err(serde::de::Error::custom(format!("invalid duration {n}"))),
            Repr::Text(t) => parse(&t)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {t:?}"))),
        }
    }
}
