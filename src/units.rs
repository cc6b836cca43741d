//! Unit conversions: pitch, loudness and tempo.

/// Parse a scientific pitch name ("C4", "F#3", "bb2", "C-1") into a MIDI
/// note number. Any number of `#` or `b` accidentals is accepted.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let mut chars = note.char_indices().peekable();
    let (_, letter) = chars.next()?;
    let mut semitone = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let mut octave_at = note.len();
    while let Some(&(i, c)) = chars.peek() {
        match c {
            '#' => semitone += 1,
            'b' => semitone -= 1,
            _ => {
                octave_at = i;
                break;
            }
        }
        chars.next();
    }
    let octave: i32 = note[octave_at..].parse().ok()?;
    Some((octave + 1) * 12 + semitone)
}

/// MIDI note name with sharps replaced by the flat spelling soundfonts use
/// (`Db4` rather than `C#4`).
pub fn midi_to_note(midi: i32) -> String {
    const NAMES: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"];
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NAMES[midi.rem_euclid(12) as usize], octave)
}

/// `tuning_pitch` is the frequency of A4 (MIDI 69).
pub fn midi_to_frequency(midi: f64, tuning_pitch: f64) -> f64 {
    tuning_pitch * 2f64.powf((midi - 69.0) / 12.0)
}

pub fn frequency_to_midi(frequency: f64, tuning_pitch: f64) -> f64 {
    69.0 + 12.0 * (frequency / tuning_pitch).log2()
}

/// A4 = 440 Hz.
pub fn note_to_frequency(note: &str) -> Option<f64> {
    note_to_midi(note).map(|midi| midi_to_frequency(midi as f64, 440.0))
}

/// Frequency shifted by `cents`.
pub fn detuned(frequency: f64, cents: f64) -> f64 {
    frequency * 2f64.powf(cents / 1200.0)
}

/// Every 6 dB doubles (or halves) the gain.
pub fn db_to_gain(db: f64) -> f64 {
    2f64.powf(db / 6.0)
}

pub fn gain_to_db(gain: f64) -> f64 {
    20.0 * gain.log10()
}

/// Map a 0..100 fader level onto 0..1 gain along a quarter sine.
pub fn level_to_gain(level: f64) -> f64 {
    (0.5 * std::f64::consts::PI * level / 100.0).sin()
}

/// Cycles per second of a `subdivision`th-of-a-beat pulse at `bpm`.
pub fn tempo_to_frequency(bpm: f64, subdivision: f64) -> f64 {
    bpm / 60.0 * subdivision
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn note_names() {
        assert_eq!(note_to_midi("A4"), Some(69));
        assert_eq!(note_to_midi("C4"), Some(60));
        assert_eq!(note_to_midi("C0"), Some(12));
        assert_eq!(note_to_midi("C-1"), Some(0));
        assert_eq!(note_to_midi("f#3"), Some(54));
        assert_eq!(note_to_midi("Bb5"), Some(82));
        assert_eq!(note_to_midi("H2"), None);
        assert_eq!(note_to_midi("C"), None);
        assert_eq!(note_to_midi(""), None);
    }

    #[test]
    fn midi_names_use_flats() {
        assert_eq!(midi_to_note(61), "Db4");
        assert_eq!(midi_to_note(21), "A0");
        assert_eq!(note_to_midi(&midi_to_note(70)), Some(70));
    }

    #[test]
    fn frequencies() {
        assert!(approx_eq!(f64, midi_to_frequency(69.0, 440.0), 440.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, midi_to_frequency(69.0, 432.0), 432.0, epsilon = 1e-9));
        assert!((midi_to_frequency(60.0, 440.0) - 261.626).abs() < 0.01);
        assert!(approx_eq!(f64, frequency_to_midi(880.0, 440.0), 81.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, detuned(440.0, 1200.0), 880.0, epsilon = 1e-9));
    }

    #[test]
    fn loudness() {
        assert_eq!(db_to_gain(0.0), 1.0);
        assert_eq!(db_to_gain(-6.0), 0.5);
        assert_eq!(db_to_gain(12.0), 4.0);
        assert!(approx_eq!(f64, gain_to_db(10.0), 20.0, epsilon = 1e-9));
        assert_eq!(level_to_gain(0.0), 0.0);
        assert!(approx_eq!(f64, level_to_gain(100.0), 1.0, epsilon = 1e-9));
    }

    #[test]
    fn tempo() {
        assert_eq!(tempo_to_frequency(120.0, 1.0), 2.0);
        assert_eq!(tempo_to_frequency(90.0, 4.0), 6.0);
    }
}
