// Tokens exchanged between the codec and the generators.
//
// One token covers one time step of one voice. A note occupies an `Onset`
// step followed by `Hold` steps of the same pitch; a rest is continued by
// repeating `Rest`. `Boundary` frames sequences for the transition sampler
// and marks termination during generation.

use crate::error::{CodecError, Result};
use crate::pitch::{Pitch, normalize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prefix marking a continuation-of-pitch token in text form.
pub const HOLD_PREFIX: &str = "cont";
pub const REST_TEXT: &str = "rest";
pub const BOUNDARY_TEXT: &str = "<end>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    Boundary,
    Rest,
    Onset(Pitch),
    Hold(Pitch),
}

impl Token {
    /// True if this token continues whatever precedes it.
    ///
    /// A `Rest` is ambiguous in isolation; it is only a continuation when it
    /// follows another rest, which the decoder decides from context.
    pub fn is_hold(self) -> bool {
        matches!(self, Token::Hold(_))
    }

    /// The continuation token that extends this onset, if any.
    pub fn continuation(self) -> Option<Token> {
        match self {
            Token::Rest => Some(Token::Rest),
            Token::Onset(p) => Some(Token::Hold(p)),
            Token::Boundary | Token::Hold(_) => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Boundary => f.write_str(BOUNDARY_TEXT),
            Token::Rest => f.write_str(REST_TEXT),
            Token::Onset(p) => write!(f, "{p}"),
            Token::Hold(p) => write!(f, "{HOLD_PREFIX}{p}"),
        }
    }
}

impl FromStr for Token {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            BOUNDARY_TEXT => Ok(Token::Boundary),
            REST_TEXT => Ok(Token::Rest),
            _ => match s.strip_prefix(HOLD_PREFIX) {
                Some(name) => Ok(Token::Hold(normalize(name)?)),
                None => Ok(Token::Onset(normalize(s)?)),
            },
        }
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_forms() {
        let c4 = normalize("C4").unwrap();
        assert_eq!(Token::Onset(c4).to_string(), "C4");
        assert_eq!(Token::Hold(c4).to_string(), "contC4");
        assert_eq!(Token::Rest.to_string(), "rest");
        assert_eq!(Token::Boundary.to_string(), "<end>");
    }

    #[test]
    fn test_parse_normalizes_spelling() {
        let t: Token = "contC#4".parse().unwrap();
        assert_eq!(t.to_string(), "contD-4");
        let t: Token = "B-3".parse().unwrap();
        assert_eq!(t, Token::Onset(normalize("A#3").unwrap()));
    }

    #[test]
    fn test_continuation_pairs() {
        let e4 = normalize("E4").unwrap();
        assert_eq!(Token::Onset(e4).continuation(), Some(Token::Hold(e4)));
        assert_eq!(Token::Rest.continuation(), Some(Token::Rest));
        assert_eq!(Token::Boundary.continuation(), None);
        assert_eq!(Token::Hold(e4).continuation(), None);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("contrest".parse::<Token>().is_err());
        assert!("silence".parse::<Token>().is_err());
    }
}
