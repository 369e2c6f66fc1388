//! Timed mouth-shape cues for one utterance.

use crate::error::Result;
use crate::viseme::MouthShape;
use serde::{Deserialize, Serialize};

/// One mouth shape held over `[start, end]` seconds from utterance start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeCue {
    pub start: f64,
    pub end: f64,
    #[serde(rename = "value")]
    pub shape: MouthShape,
}

impl VisemeCue {
    /// Inclusive on both ends.
    #[must_use]
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Cues ordered by non-decreasing `start`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisemeTrack {
    cues: Vec<VisemeCue>,
    longest: f64,
}

#[derive(Deserialize)]
struct MouthCuesDocument {
    #[serde(rename = "mouthCues")]
    mouth_cues: Vec<VisemeCue>,
}

impl VisemeTrack {
    /// Build a track, sorting cues by start and dropping inverted intervals.
    pub fn new(mut cues: Vec<VisemeCue>) -> Self {
        cues.retain(|c| c.end >= c.start && c.start.is_finite() && c.end.is_finite());
        cues.sort_by(|a, b| a.start.total_cmp(&b.start));
        let longest = cues.iter().map(|c| c.end - c.start).fold(0.0, f64::max);
        Self { cues, longest }
    }

    /// Parse a Rhubarb-style `{"mouthCues": [...]}` document.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: MouthCuesDocument = serde_json::from_str(json)?;
        Ok(Self::new(doc.mouth_cues))
    }

    pub fn cues(&self) -> &[VisemeCue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// End of the last cue.
    pub fn duration(&self) -> f64 {
        self.cues.iter().map(|c| c.end).fold(0.0, f64::max)
    }

    /// Cues whose interval contains `t`, in start order.
    pub fn active_at(&self, t: f64) -> impl Iterator<Item = &VisemeCue> {
        let upper = self.cues.partition_point(|c| c.start <= t);
        // Slack keeps a cue ending exactly at `t` despite rounding in `t - longest`.
        let earliest = t - self.longest - 1e-9;
        let lower = self.cues[..upper].partition_point(|c| c.start < earliest);
        self.cues[lower..upper].iter().filter(move |c| c.contains(t))
    }
}
