//! Viseme alphabets and their morph-target names.
//!
//! A viseme is a visual mouth shape that corresponds to a phoneme (sound).
//! Cue tracks use the nine Rhubarb mouth shapes ([`MouthShape`]); phoneme
//! estimation goes through the Oculus set ([`Viseme`]) first.

pub mod track;

pub use track::{VisemeCue, VisemeTrack};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rhubarb Lip Sync mouth shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MouthShape {
    /// Closed mouth (P, B, M).
    A,
    /// Slightly open, clenched teeth (most consonants).
    B,
    /// Open mouth (EH, AE).
    C,
    /// Wide open (AA).
    D,
    /// Slightly rounded (AO, ER).
    E,
    /// Puckered (UW, OW, W).
    F,
    /// Upper teeth on lower lip (F, V).
    G,
    /// Tongue raised (L, TH).
    H,
    /// Idle / rest.
    X,
}

impl MouthShape {
    pub const ALL: [MouthShape; 9] = [
        Self::A,
        Self::B,
        Self::C,
        Self::D,
        Self::E,
        Self::F,
        Self::G,
        Self::H,
        Self::X,
    ];

    pub fn from_letter(raw: &str) -> Option<Self> {
        match raw.trim() {
            "A" | "a" => Some(Self::A),
            "B" | "b" => Some(Self::B),
            "C" | "c" => Some(Self::C),
            "D" | "d" => Some(Self::D),
            "E" | "e" => Some(Self::E),
            "F" | "f" => Some(Self::F),
            "G" | "g" => Some(Self::G),
            "H" | "h" => Some(Self::H),
            "X" | "x" => Some(Self::X),
            _ => None,
        }
    }

    #[must_use]
    pub fn letter(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::G => "G",
            Self::H => "H",
            Self::X => "X",
        }
    }

    /// Default morph target for this shape (Ready Player Me / Oculus naming).
    #[must_use]
    pub fn default_target(self) -> &'static str {
        match self {
            Self::A | Self::X => "viseme_PP",
            Self::B => "viseme_kk",
            Self::C => "viseme_I",
            Self::D => "viseme_AA",
            Self::E => "viseme_O",
            Self::F => "viseme_U",
            Self::G => "viseme_FF",
            Self::H => "viseme_TH",
        }
    }
}

/// Mouth shape -> morph target name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeTable {
    targets: BTreeMap<MouthShape, String>,
}

impl Default for ShapeTable {
    fn default() -> Self {
        Self {
            targets: MouthShape::ALL
                .iter()
                .map(|s| (*s, s.default_target().to_owned()))
                .collect(),
        }
    }
}

impl ShapeTable {
    /// Default table with per-letter overrides applied; unknown letters are skipped.
    pub fn with_overrides<'a>(overrides: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut table = Self::default();
        for (letter, target) in overrides {
            match MouthShape::from_letter(letter) {
                Some(shape) => {
                    table.targets.insert(shape, target.clone());
                }
                None => tracing::warn!(letter = %letter, "unknown mouth shape in override table"),
            }
        }
        table
    }

    pub fn target(&self, shape: MouthShape) -> &str {
        self.targets
            .get(&shape)
            .map_or_else(|| shape.default_target(), String::as_str)
    }

    /// Distinct target names, in first-seen order.
    pub fn distinct_targets(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for target in self.targets.values() {
            if !seen.contains(&target.as_str()) {
                seen.push(target.as_str());
            }
        }
        seen
    }
}

/// Oculus viseme IDs (standard for lip-sync)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Viseme {
    /// Silence (default mouth closed)
    Sil = 0,
    /// /p/, /b/, /m/ (lips pressed together)
    PP = 1,
    /// /f/, /v/ (teeth on lip)
    FF = 2,
    /// /θ/, /ð/ (tongue between teeth)
    TH = 3,
    /// /t/, /d/, /n/, /l/ (tongue at roof)
    DD = 4,
    /// /k/, /g/, /ŋ/ (back of tongue up)
    KK = 5,
    /// /tʃ/, /dʒ/, /ʃ/, /ʒ/ (tongue curved)
    CH = 6,
    /// /s/, /z/ (teeth together, tongue forward)
    SS = 7,
    /// /n/, /nj/ (tongue at roof)
    NN = 8,
    /// /r/ (tongue curled)
    RR = 9,
    /// /a/ (mouth open wide)
    AA = 10,
    /// /e/ (mouth medium)
    E = 11,
    /// /i/ (mouth wide, teeth apart)
    I = 12,
    /// /o/ (rounded, medium)
    O = 13,
    /// /u/ (rounded, small)
    U = 14,
}

impl Viseme {
    /// Closest Rhubarb mouth shape.
    pub fn mouth_shape(&self) -> MouthShape {
        match self {
            Viseme::Sil => MouthShape::X,
            Viseme::PP => MouthShape::A,
            Viseme::FF => MouthShape::G,
            Viseme::TH => MouthShape::H,
            Viseme::DD | Viseme::KK | Viseme::CH | Viseme::SS | Viseme::NN | Viseme::RR => {
                MouthShape::B
            }
            Viseme::AA => MouthShape::D,
            Viseme::E | Viseme::I => MouthShape::C,
            Viseme::O => MouthShape::E,
            Viseme::U => MouthShape::F,
        }
    }
}

/// Timing class of a phone in estimated tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhoneKind {
    Pause,
    Vowel,
    Stop,
    Continuant,
}

impl PhoneKind {
    fn weight(self) -> f64 {
        match self {
            Self::Pause | Self::Continuant => 1.0,
            Self::Vowel => 1.5,
            Self::Stop => 0.8,
        }
    }
}

/// ARPABET (CMUdict) phones, stress digits removed.
const ARPABET: &[(&str, Viseme, PhoneKind)] = &[
    ("sil", Viseme::Sil, PhoneKind::Pause),
    ("sp", Viseme::Sil, PhoneKind::Pause),
    ("P", Viseme::PP, PhoneKind::Stop),
    ("B", Viseme::PP, PhoneKind::Stop),
    ("M", Viseme::PP, PhoneKind::Stop),
    ("EM", Viseme::PP, PhoneKind::Continuant),
    ("F", Viseme::FF, PhoneKind::Stop),
    ("V", Viseme::FF, PhoneKind::Stop),
    ("TH", Viseme::TH, PhoneKind::Continuant),
    ("DH", Viseme::TH, PhoneKind::Continuant),
    ("T", Viseme::DD, PhoneKind::Stop),
    ("D", Viseme::DD, PhoneKind::Stop),
    ("DX", Viseme::DD, PhoneKind::Continuant),
    ("N", Viseme::NN, PhoneKind::Stop),
    ("NX", Viseme::NN, PhoneKind::Continuant),
    ("EN", Viseme::NN, PhoneKind::Continuant),
    ("L", Viseme::DD, PhoneKind::Continuant),
    ("EL", Viseme::DD, PhoneKind::Continuant),
    ("K", Viseme::KK, PhoneKind::Stop),
    ("G", Viseme::KK, PhoneKind::Stop),
    ("NG", Viseme::KK, PhoneKind::Continuant),
    ("CH", Viseme::CH, PhoneKind::Continuant),
    ("JH", Viseme::CH, PhoneKind::Continuant),
    ("SH", Viseme::CH, PhoneKind::Continuant),
    ("ZH", Viseme::CH, PhoneKind::Continuant),
    ("S", Viseme::SS, PhoneKind::Stop),
    ("Z", Viseme::SS, PhoneKind::Stop),
    ("R", Viseme::RR, PhoneKind::Continuant),
    ("W", Viseme::U, PhoneKind::Continuant),
    ("HH", Viseme::E, PhoneKind::Continuant),
    ("Y", Viseme::I, PhoneKind::Continuant),
    ("AA", Viseme::AA, PhoneKind::Vowel),
    ("AO", Viseme::AA, PhoneKind::Vowel),
    ("AW", Viseme::AA, PhoneKind::Vowel),
    ("AE", Viseme::E, PhoneKind::Vowel),
    ("AH", Viseme::E, PhoneKind::Vowel),
    ("EH", Viseme::E, PhoneKind::Vowel),
    ("ER", Viseme::E, PhoneKind::Vowel),
    ("AY", Viseme::I, PhoneKind::Vowel),
    ("EY", Viseme::I, PhoneKind::Vowel),
    ("IH", Viseme::I, PhoneKind::Vowel),
    ("IY", Viseme::I, PhoneKind::Vowel),
    ("OW", Viseme::O, PhoneKind::Vowel),
    ("OY", Viseme::O, PhoneKind::Vowel),
    ("UH", Viseme::O, PhoneKind::Vowel),
    ("UW", Viseme::U, PhoneKind::Vowel),
];

/// Seconds per phone at speech rate 1.0.
const PHONE_SECS: f64 = 0.08;

fn classify(phone: &str) -> (Viseme, PhoneKind) {
    let stem = phone.trim_end_matches(['0', '1', '2']);
    ARPABET
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(stem))
        .map_or((Viseme::DD, PhoneKind::Continuant), |&(_, viseme, kind)| {
            (viseme, kind)
        })
}

impl Viseme {
    /// Viseme for one ARPABET phone; unknown phones get a slightly open mouth.
    #[must_use]
    pub fn from_arpabet(phone: &str) -> Self {
        classify(phone).0
    }
}

/// Estimate a cue track from a space-separated ARPABET phoneme string.
///
/// Used for utterances that arrive without cues. Vowels hold longer than
/// stops, pauses advance time without a cue, and consecutive phones with
/// the same mouth shape merge into one cue.
pub fn estimate_track(phonemes: &str, speech_rate: f32) -> VisemeTrack {
    let unit = PHONE_SECS / f64::from(speech_rate.max(0.5));
    let mut cues: Vec<VisemeCue> = Vec::new();
    let mut cursor = 0.0_f64;

    for phone in phonemes.split_whitespace() {
        let (viseme, kind) = classify(phone);
        let start = cursor;
        cursor += unit * kind.weight();
        if kind == PhoneKind::Pause {
            continue;
        }
        let shape = viseme.mouth_shape();
        match cues.last_mut() {
            Some(last) if last.shape == shape && (last.end - start).abs() < 1e-9 => {
                last.end = cursor;
            }
            _ => cues.push(VisemeCue {
                start,
                end: cursor,
                shape,
            }),
        }
    }

    VisemeTrack::new(cues)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn bilabials_share_closed_shape() {
        let track = estimate_track("B P M", 1.0);
        assert_eq!(track.len(), 1, "same shape merges");
        assert_eq!(track.cues()[0].shape, MouthShape::A);
    }

    #[test]
    fn vowels_hold_longer_than_stops() {
        let track = estimate_track("T AA1", 1.0);
        let cues = track.cues();
        assert_eq!(cues.len(), 2);
        let stop = cues[0].end - cues[0].start;
        let vowel = cues[1].end - cues[1].start;
        assert!(vowel > stop);
        assert!((cues[1].start - cues[0].end).abs() < 1e-9, "cues are contiguous");
    }

    #[test]
    fn silence_advances_time_without_cue() {
        let track = estimate_track("AA sil AA", 1.0);
        assert_eq!(track.len(), 2);
        assert!(track.cues()[1].start > track.cues()[0].end);
    }

    #[test]
    fn faster_rate_shortens_track() {
        let slow = estimate_track("HH AH0 L OW1", 1.0);
        let fast = estimate_track("HH AH0 L OW1", 2.0);
        assert!(fast.duration() < slow.duration());
    }

    #[test]
    fn empty_phonemes_give_empty_track() {
        assert!(estimate_track("  ", 1.0).is_empty());
    }

    #[test]
    fn default_table_matches_rhubarb_targets() {
        let table = ShapeTable::default();
        assert_eq!(table.target(MouthShape::A), "viseme_PP");
        assert_eq!(table.target(MouthShape::X), "viseme_PP");
        assert_eq!(table.target(MouthShape::D), "viseme_AA");
        assert_eq!(table.distinct_targets().len(), 8);
    }

    #[test]
    fn overrides_replace_targets() {
        let overrides: BTreeMap<String, String> = [
            ("d".to_owned(), "mouthOpen".to_owned()),
            ("?".to_owned(), "ignored".to_owned()),
        ]
        .into_iter()
        .collect();
        let table = ShapeTable::with_overrides(&overrides);
        assert_eq!(table.target(MouthShape::D), "mouthOpen");
        assert_eq!(table.target(MouthShape::B), "viseme_kk");
    }

    #[test]
    fn every_viseme_has_a_shape() {
        assert_eq!(Viseme::Sil.mouth_shape(), MouthShape::X);
        assert_eq!(Viseme::AA.mouth_shape(), MouthShape::D);
        assert_eq!(Viseme::from_arpabet("UW1"), Viseme::U);
        assert_eq!(Viseme::from_arpabet("XYZ"), Viseme::DD);
        assert_eq!(Viseme::from_arpabet("ow1"), Viseme::O);
    }
}
