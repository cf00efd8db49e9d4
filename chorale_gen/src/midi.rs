// MIDI output for decoded pieces.
//
// `MidiTrackSink` is an `EventSink`: replaying a voice into it appends
// NoteOn/NoteOff pairs to one MIDI track, and rests only advance time.
// Beats are quarter lengths, so a beat is `TICKS_PER_QUARTER` ticks. Positions
// are kept as exact rationals and rounded to ticks only when an event is
// written, so rounding never accumulates across a voice.
//
// Output is SMF Format 1: track 0 carries the tempo, then one track per voice
// named after the voice id, on its own channel (skipping the percussion
// channel), with the choir aahs program.

use crate::error::{Error, Result};
use chorale_codec::{Beats, EventSink, Piece, Pitch};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use num_traits::Zero;
use std::path::Path;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// General MIDI "Choir Aahs".
const CHOIR_PROGRAM: u8 = 52;

const VELOCITY: u8 = 80;

/// Absolute tick of a beat position, rounded to the nearest tick.
fn ticks(position: Beats) -> u32 {
    let scaled = (position * Beats::from_integer(i64::from(TICKS_PER_QUARTER))).round();
    scaled.to_integer().clamp(0, i64::from(u32::MAX)) as u32
}

/// MIDI channel for the n-th voice, leaving channel 10 to percussion.
fn channel_for(voice: usize) -> u4 {
    let ch = if voice >= 9 { voice + 1 } else { voice };
    u4::new((ch % 16) as u8)
}

/// Collects one voice into a MIDI track.
pub struct MidiTrackSink<'a> {
    channel: u4,
    track: Track<'a>,
    position: Beats,
    last_tick: u32,
}

impl<'a> MidiTrackSink<'a> {
    pub fn new(name: &'a str, channel: u4) -> Self {
        let mut track: Track<'a> = Vec::new();
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
        });
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(CHOIR_PROGRAM),
                },
            },
        });
        MidiTrackSink {
            channel,
            track,
            position: Beats::zero(),
            last_tick: 0,
        }
    }

    fn push(&mut self, at: u32, message: MidiMessage) {
        self.track.push(TrackEvent {
            delta: u28::new(at.saturating_sub(self.last_tick)),
            kind: TrackEventKind::Midi {
                channel: self.channel,
                message,
            },
        });
        self.last_tick = self.last_tick.max(at);
    }

    /// Close the track at the current position.
    pub fn finish(mut self) -> Track<'a> {
        let end = ticks(self.position);
        self.track.push(TrackEvent {
            delta: u28::new(end.saturating_sub(self.last_tick)),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        self.track
    }
}

impl EventSink for MidiTrackSink<'_> {
    fn rest(&mut self, duration: Beats) {
        self.position += duration;
    }

    fn note(&mut self, pitch: Pitch, duration: Beats) {
        let key = u7::new(pitch.midi());
        let start = ticks(self.position);
        self.position += duration;
        let end = ticks(self.position);
        self.push(start, MidiMessage::NoteOn {
            key,
            vel: u7::new(VELOCITY),
        });
        self.push(end, MidiMessage::NoteOff {
            key,
            vel: u7::new(0),
        });
    }
}

/// Convert a piece to an in-memory SMF.
pub fn piece_to_smf(piece: &Piece, tempo_bpm: u16) -> Smf<'_> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo track
    let tempo_microseconds = 60_000_000 / u32::from(tempo_bpm.max(1));
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    for (i, voice) in piece.voices.iter().enumerate() {
        let mut sink = MidiTrackSink::new(&voice.id, channel_for(i));
        voice.render(&mut sink);
        smf.tracks.push(sink.finish());
    }
    smf
}

/// Convert a piece to MIDI and write it to a file.
pub fn write_midi(piece: &Piece, tempo_bpm: u16, path: &Path) -> Result<()> {
    let smf = piece_to_smf(piece, tempo_bpm);
    let mut buf = Vec::new();
    smf.write(&mut buf).map_err(|e| Error::Render(e.to_string()))?;
    std::fs::write(path, &buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorale_codec::beats::{beats, whole};
    use chorale_codec::{Event, Voice, normalize};

    fn piece() -> Piece {
        Piece::new(vec![
            Voice::new(
                "Soprano",
                vec![
                    Event::note(normalize("C4").unwrap(), whole(1)),
                    Event::rest(beats(1, 2)),
                    Event::note(normalize("E4").unwrap(), beats(1, 2)),
                ],
            ),
            Voice::new("Bass", vec![Event::note(normalize("C3").unwrap(), whole(2))]),
        ])
    }

    fn note_events(track: &Track) -> Vec<(u32, bool, u8)> {
        let mut tick = 0;
        let mut out = Vec::new();
        for event in track {
            tick += event.delta.as_int();
            if let TrackEventKind::Midi { message, .. } = &event.kind {
                match *message {
                    MidiMessage::NoteOn { key, .. } => out.push((tick, true, key.as_int())),
                    MidiMessage::NoteOff { key, .. } => out.push((tick, false, key.as_int())),
                    _ => {}
                }
            }
        }
        out
    }

    #[test]
    fn test_one_track_per_voice_plus_tempo() {
        let piece = piece();
        let smf = piece_to_smf(&piece, 72);
        assert_eq!(smf.tracks.len(), 3);
        assert!(matches!(
            smf.tracks[1][0].kind,
            TrackEventKind::Meta(MetaMessage::TrackName(b"Soprano"))
        ));
    }

    #[test]
    fn test_note_timing_follows_durations() {
        let piece = piece();
        let smf = piece_to_smf(&piece, 72);
        assert_eq!(
            note_events(&smf.tracks[1]),
            vec![(0, true, 60), (480, false, 60), (720, true, 64), (960, false, 64)]
        );
        assert_eq!(note_events(&smf.tracks[2]), vec![(0, true, 48), (960, false, 48)]);
    }

    #[test]
    fn test_fractional_positions_do_not_drift() {
        let c4 = normalize("C4").unwrap();
        let piece = Piece::new(vec![Voice::new("S", vec![Event::note(c4, beats(1, 7)); 7])]);
        let smf = piece_to_smf(&piece, 60);
        let events = note_events(&smf.tracks[1]);
        assert_eq!(events.last(), Some(&(480, false, 60)));
    }

    #[test]
    fn test_written_file_parses() {
        let piece = piece();
        let path = std::env::temp_dir().join(format!("chorale_midi_{}.mid", std::process::id()));
        write_midi(&piece, 90, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 3);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unwritable_path_is_io_error() {
        let path = std::env::temp_dir()
            .join(format!("chorale_missing_{}", std::process::id()))
            .join("out.mid");
        assert!(matches!(write_midi(&piece(), 90, &path), Err(Error::Io(_))));
    }

    #[test]
    fn test_channels_skip_percussion() {
        assert_eq!(channel_for(0).as_int(), 0);
        assert_eq!(channel_for(8).as_int(), 8);
        assert_eq!(channel_for(9).as_int(), 10);
    }
}
