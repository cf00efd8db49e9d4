// Flat event records: the shape exchanged with notation parsers and renderers.
//
// A piece is a list of voices; a voice is an ordered list of events; an event
// is a rest or a normalized pitch with a duration in beats. Nothing here holds
// references to anything else, so values move freely through the pipeline.
//
// The wire shape is the `(rest, pitch, duration)` triple (`RawEvent`). Events
// convert from it with pitch normalization applied; non-positive durations are
// kept as-is and dropped later by the encoder, which counts them.

use crate::beats::{self, Beats, serde_beats};
use crate::error::{CodecError, Result};
use crate::pitch::{Pitch, normalize};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// What sounds during an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sound {
    Rest,
    Note(Pitch),
}

/// One occurrence in a single voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct Event {
    pub sound: Sound,
    pub duration: Beats,
}

impl Event {
    pub fn rest(duration: Beats) -> Self {
        Event {
            sound: Sound::Rest,
            duration,
        }
    }

    pub fn note(pitch: Pitch, duration: Beats) -> Self {
        Event {
            sound: Sound::Note(pitch),
            duration,
        }
    }

    pub fn is_rest(&self) -> bool {
        self.sound == Sound::Rest
    }

    pub fn pitch(&self) -> Option<Pitch> {
        match self.sound {
            Sound::Rest => None,
            Sound::Note(p) => Some(p),
        }
    }
}

/// The `(is-rest, pitch-or-none, duration)` triple as exchanged with
/// external parsers and renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub rest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    #[serde(with = "serde_beats")]
    pub duration: Beats,
}

impl TryFrom<RawEvent> for Event {
    type Error = CodecError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        match (raw.rest, raw.pitch) {
            (true, None) => Ok(Event::rest(raw.duration)),
            (false, Some(name)) => Ok(Event::note(normalize(&name)?, raw.duration)),
            (true, Some(name)) => Err(CodecError::MalformedEvent(format!(
                "rest carries pitch {name:?}"
            ))),
            (false, None) => Err(CodecError::MalformedEvent("note without pitch".into())),
        }
    }
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        RawEvent {
            rest: event.is_rest(),
            pitch: event.pitch().map(|p| p.to_string()),
            duration: event.duration,
        }
    }
}

/// An ordered event stream with a stable identifier (e.g. "Soprano").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub events: Vec<Event>,
}

impl Voice {
    pub fn new(id: impl Into<String>, events: Vec<Event>) -> Self {
        Voice {
            id: id.into(),
            events,
        }
    }

    /// Sum of all positive event durations.
    pub fn total_duration(&self) -> Beats {
        beats::total(
            self.events
                .iter()
                .map(|e| e.duration)
                .filter(|d| *d > Beats::zero()),
        )
    }

    /// Shortest positive event duration, if any.
    pub fn min_duration(&self) -> Option<Beats> {
        self.events
            .iter()
            .map(|e| e.duration)
            .filter(|d| *d > Beats::zero())
            .min()
    }

    /// Replay the voice into a renderer, in order.
    pub fn render<S: EventSink + ?Sized>(&self, sink: &mut S) {
        for event in &self.events {
            match event.sound {
                Sound::Rest => sink.rest(event.duration),
                Sound::Note(p) => sink.note(p, event.duration),
            }
        }
    }
}

/// Several simultaneous voices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub voices: Vec<Voice>,
}

impl Piece {
    pub fn new(voices: Vec<Voice>) -> Self {
        Piece {
            title: None,
            voices,
        }
    }

    pub fn voice(&self, id: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn voice_ids(&self) -> Vec<&str> {
        self.voices.iter().map(|v| v.id.as_str()).collect()
    }

    /// Real-time length of each voice, in voice order.
    pub fn total_durations(&self) -> Vec<(String, Beats)> {
        self.voices
            .iter()
            .map(|v| (v.id.clone(), v.total_duration()))
            .collect()
    }

    /// Compact one-line-per-voice listing for logs and the CLI.
    ///
    /// Each event prints as `name:duration`, rests as `.`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let width = self.voices.iter().map(|v| v.id.len()).max().unwrap_or(0);
        for voice in &self.voices {
            out.push_str(&format!("{:>width$}: ", voice.id));
            let items: Vec<String> = voice
                .events
                .iter()
                .map(|e| match e.sound {
                    Sound::Rest => format!(".:{}", e.duration),
                    Sound::Note(p) => format!("{}:{}", p, e.duration),
                })
                .collect();
            out.push_str(&items.join(" "));
            out.push('\n');
        }
        out
    }
}

/// Receiver for decoded voices: a renderer only needs to append rests and
/// notes, in order, one voice at a time.
pub trait EventSink {
    fn rest(&mut self, duration: Beats);
    fn note(&mut self, pitch: Pitch, duration: Beats);
}
