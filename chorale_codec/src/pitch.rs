// Pitch normalization.
//
// Every pitched note is reduced to one canonical spelling per sounding pitch
// so that the pitch alphabet is finite and enumerable. The rewrite is driven
// by a single table from pitch class to spelling: black keys are spelled as
// flats (D-, E-, G-, A-, B-), everything else as naturals. Sharps, double
// accidentals, F-flat, C-flat, E-sharp and B-sharp all resolve through the
// same MIDI-number round trip, with the octave adjusted so the sounding pitch
// never changes (C-flat 4 becomes B3, B-sharp 3 becomes C4).
//
// Names follow the `<letter><accidentals><octave>` convention with `-` for
// flat, e.g. "B-3", "E-4", "C5". Accepted input accidentals are `#`, `-` and
// `b`, repeated for double accidentals.

use crate::error::{CodecError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Lowest supported pitch: C0 (octaves are written as non-negative numbers).
pub const MIN_MIDI: u8 = 12;
/// Highest MIDI note number.
pub const MAX_MIDI: u8 = 127;

/// Natural letters with their semitone offset from C.
const LETTER_OFFSETS: [(char, i16); 7] = [
    ('C', 0),
    ('D', 2),
    ('E', 4),
    ('F', 5),
    ('G', 7),
    ('A', 9),
    ('B', 11),
];

/// Canonical spelling per pitch class: (letter, is_flat).
const CANONICAL_SPELLING: [(char, bool); 12] = [
    ('C', false),
    ('D', true),
    ('D', false),
    ('E', true),
    ('E', false),
    ('F', false),
    ('G', true),
    ('G', false),
    ('A', true),
    ('A', false),
    ('B', true),
    ('B', false),
];

/// A normalized pitch, identified by its MIDI note number.
///
/// The spelling is derived, never stored, so two enharmonic inputs always
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pitch {
    midi: u8,
}

impl Pitch {
    /// Construct from a MIDI note number in `MIN_MIDI..=MAX_MIDI`.
    pub fn from_midi(midi: u8) -> Result<Self> {
        if (MIN_MIDI..=MAX_MIDI).contains(&midi) {
            Ok(Pitch { midi })
        } else {
            Err(CodecError::InvalidPitch(format!("midi {midi}")))
        }
    }

    pub fn midi(self) -> u8 {
        self.midi
    }

    pub fn octave(self) -> i16 {
        self.midi as i16 / 12 - 1
    }

    /// Canonical letter and flat flag.
    pub fn spelling(self) -> (char, bool) {
        CANONICAL_SPELLING[(self.midi % 12) as usize]
    }

    /// All pitches from `low` to `high` inclusive, one per semitone.
    pub fn range(low: Pitch, high: Pitch) -> impl Iterator<Item = Pitch> {
        (low.midi..=high.midi).map(|midi| Pitch { midi })
    }
}

/// Normalize any accepted spelling to its canonical pitch.
///
/// This is the only place spelling rewrites happen; the codec and vocabulary
/// builder both go through it.
pub fn normalize(name: &str) -> Result<Pitch> {
    let invalid = || CodecError::InvalidPitch(name.to_string());
    let mut chars = name.trim().chars().peekable();

    let letter = chars.next().ok_or_else(invalid)?.to_ascii_uppercase();
    let (_, base) = LETTER_OFFSETS
        .iter()
        .find(|(l, _)| *l == letter)
        .copied()
        .ok_or_else(invalid)?;

    let mut alteration: i32 = 0;
    while let Some(&c) = chars.peek() {
        match c {
            '#' => alteration = alteration.saturating_add(1),
            '-' | 'b' => alteration = alteration.saturating_sub(1),
            _ => break,
        }
        chars.next();
    }

    let octave_text: String = chars.collect();
    if octave_text.is_empty() || !octave_text.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let octave: i32 = octave_text.parse().map_err(|_| invalid())?;

    let midi = octave
        .checked_add(1)
        .and_then(|o| o.checked_mul(12))
        .and_then(|m| m.checked_add(i32::from(base))?.checked_add(alteration))
        .ok_or_else(invalid)?;
    if !(i32::from(MIN_MIDI)..=i32::from(MAX_MIDI)).contains(&midi) {
        return Err(invalid());
    }
    Ok(Pitch { midi: midi as u8 })
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (letter, flat) = self.spelling();
        let accidental = if flat { "-" } else { "" };
        write!(f, "{}{}{}", letter, accidental, self.octave())
    }
}

impl FromStr for Pitch {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        normalize(s)
    }
}

impl Serialize for Pitch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pitch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        normalize(&name).map_err(serde::de::Error::custom)
    }
}
