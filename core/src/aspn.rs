// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! American Standard Pitch Notation. `C4` is MIDI 60, and the octave of a
//! MIDI note is `floor((note - 12) / 12)`, so the name space starts at
//! `C-1` = 0 and ends at `G9` = 127.

const OCTAVE_POSITION_TO_PITCH: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const OCTAVE_POSITION_TO_PITCH_UNICODE: [&str; 12] = [
    "C", "C♯", "D", "D♯", "E", "F", "F♯", "G", "G♯", "A", "A♯", "B",
];

/// Semitone offset of a base letter within its octave.
pub fn base_pitch_octave_position(letter: char) -> Option<i32> {
    match letter.to_ascii_uppercase() {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

/// Renders a MIDI note number as an ASPN name. The caller is responsible for
/// passing a note in 0..=127; this never fails for in-range input.
pub fn midi_to_aspn(note: u8, unicode: bool) -> String {
    let table = if unicode {
        &OCTAVE_POSITION_TO_PITCH_UNICODE
    } else {
        &OCTAVE_POSITION_TO_PITCH
    };
    let octave = (note as i32 - 12).div_euclid(12);
    let pitch = table[((note as i32 - 12).rem_euclid(12)) as usize];
    format!("{pitch}{octave}")
}

/// The inverse direction: octave, base letter, and accumulated accidental
/// offset to a MIDI note number. Returns the raw sum; range checking is the
/// caller's job because the parser wants to report the out-of-range value.
pub fn aspn_to_midi(octave: i32, base_pitch: char, offset: i32) -> i32 {
    octave * 12 + 12 + base_pitch_octave_position(base_pitch).unwrap_or(0) + offset
}
