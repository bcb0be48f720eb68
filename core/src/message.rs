// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The two event types the engine reasons about: a [PlayedNote] that the
//! press tracker considers logically held, and a raw [MidiMessage] exactly as
//! it arrived on the wire.

use crate::aspn;

pub const NOTE_OFF_STATUS: u8 = 0x8;
pub const NOTE_ON_STATUS: u8 = 0x9;
pub const POLY_AFTERTOUCH_STATUS: u8 = 0xA;
pub const CONTROL_CHANGE_STATUS: u8 = 0xB;
pub const CHANNEL_AFTERTOUCH_STATUS: u8 = 0xD;
pub const SUSTAIN_PEDAL_CC: u8 = 64;

/// One logically-held note. Identity is positional: the held list may
/// contain several PlayedNotes with the same `(note, channel)` if a key was
/// re-struck while sustain kept the earlier press alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayedNote {
    pub note: u8,
    pub channel: u8,
    pub velocity: u8,
    /// Monotonic nanoseconds (see [crate::time]).
    pub time: i64,
}
impl PlayedNote {
    pub fn new(note: u8, channel: u8, velocity: u8, time: i64) -> Self {
        Self {
            note,
            channel,
            velocity,
            time,
        }
    }

    pub fn aspn(&self) -> String {
        aspn::midi_to_aspn(self.note, false)
    }

    pub fn aspn_unicode(&self) -> String {
        aspn::midi_to_aspn(self.note, true)
    }

    /// 1-based piano key number (A0 = 1 on an 88-key keyboard).
    pub fn piano_key(&self) -> i32 {
        self.note as i32 - 20
    }
}

/// A raw MIDI message plus its arrival time. Wildcard catchers see these
/// verbatim, so the full byte vector is kept even for messages longer than
/// the usual three bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MidiMessage {
    bytes: Vec<u8>,
    time: i64,
}
impl MidiMessage {
    pub fn new(bytes: Vec<u8>, time: i64) -> Self {
        debug_assert!(!bytes.is_empty());
        Self { bytes, time }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn data_0(&self) -> u8 {
        self.bytes[0]
    }

    pub fn data_1(&self) -> Option<u8> {
        self.bytes.get(1).copied()
    }

    pub fn data_2(&self) -> Option<u8> {
        self.bytes.get(2).copied()
    }

    /// High nibble of the status byte.
    pub fn status(&self) -> u8 {
        self.bytes[0] >> 4
    }

    /// Low nibble of the status byte.
    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0xF
    }

    pub fn is_note_on(&self) -> bool {
        self.status() == NOTE_ON_STATUS && self.data_2().unwrap_or(0) > 0
    }

    /// Note-on with velocity zero is a release in disguise.
    pub fn is_note_off(&self) -> bool {
        self.status() == NOTE_OFF_STATUS
            || (self.status() == NOTE_ON_STATUS && self.data_2().unwrap_or(0) == 0)
    }

    pub fn is_note_message(&self) -> bool {
        self.status() == NOTE_ON_STATUS || self.status() == NOTE_OFF_STATUS
    }

    pub fn is_sustain_cc(&self) -> bool {
        self.status() == CONTROL_CHANGE_STATUS && self.data_1() == Some(SUSTAIN_PEDAL_CC)
    }

    pub fn is_aftertouch(&self) -> bool {
        self.status() == POLY_AFTERTOUCH_STATUS || self.status() == CHANNEL_AFTERTOUCH_STATUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibbles() {
        let m = MidiMessage::new(vec![0x93, 60, 100], 0);
        assert_eq!(m.status(), NOTE_ON_STATUS);
        assert_eq!(m.channel(), 3);
        assert_eq!(m.data_1(), Some(60));
        assert_eq!(m.data_2(), Some(100));
        assert!(m.is_note_on());
        assert!(!m.is_note_off());
    }

    #[test]
    fn note_on_velocity_zero_is_a_release() {
        let m = MidiMessage::new(vec![0x90, 60, 0], 0);
        assert!(m.is_note_off());
        assert!(!m.is_note_on());
    }

    #[test]
    fn sustain_cc() {
        let down = MidiMessage::new(vec![0xB0, 64, 127], 0);
        let other_cc = MidiMessage::new(vec![0xB0, 74, 127], 0);
        assert!(down.is_sustain_cc());
        assert!(!other_cc.is_sustain_cc());
    }

    #[test]
    fn short_message() {
        let m = MidiMessage::new(vec![0xD0, 55], 0);
        assert_eq!(m.data_2(), None);
        assert!(m.is_aftertouch());
    }

    #[test]
    fn piano_key_numbering() {
        let a0 = PlayedNote::new(21, 0, 64, 0);
        assert_eq!(a0.piano_key(), 1);
    }
}
