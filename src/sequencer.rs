//! Idle body-animation loop.
//!
//! [`IdleSequencer`] is a finite-state machine over a table of steps with a
//! single deadline. The host polls it from its frame loop with a monotonic
//! clock; cancelling clears the deadline and nothing fires afterwards.

use crate::config::{IdleConfig, IdleHold, IdleStep};
use crate::scene::AnimationActions;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Crossfades between full-body clips.
#[derive(Debug, Clone)]
pub struct ClipCrossfader {
    fade_secs: f32,
    current: Option<String>,
}

impl ClipCrossfader {
    pub fn new(fade_secs: f32) -> Self {
        Self {
            fade_secs: fade_secs.max(0.0),
            current: None,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Fade every other clip out and bring `clip` in from its first frame.
    ///
    /// Returns `false` when `clip` is already current or the scene has no
    /// such clip.
    pub fn switch_to<A: AnimationActions + ?Sized>(&mut self, actions: &mut A, clip: &str) -> bool {
        if self.current.as_deref() == Some(clip) {
            return false;
        }
        if !actions.has_clip(clip) {
            debug!(clip, "scene has no such clip");
            return false;
        }
        for other in actions.clip_names() {
            if other != clip {
                actions.fade_out(&other, self.fade_secs);
            }
        }
        actions.reset(clip);
        actions.fade_in(clip, self.fade_secs);
        actions.play(clip);
        self.current = Some(clip.to_owned());
        true
    }
}

/// Lifecycle of the idle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Not started yet.
    Stopped,
    /// Holding step `step` until the deadline.
    Running { step: usize },
    /// Cancelled; the deadline is gone for good.
    Cancelled,
}

/// Looping idle clip sequence with one pending deadline.
#[derive(Debug)]
pub struct IdleSequencer {
    enabled: bool,
    steps: Vec<IdleStep>,
    crossfader: ClipCrossfader,
    state: SequencerState,
    deadline: Option<Duration>,
}

impl IdleSequencer {
    pub fn new(config: &IdleConfig) -> Self {
        Self {
            enabled: config.enabled,
            steps: config.steps.clone(),
            crossfader: ClipCrossfader::new(config.fade_secs),
            state: SequencerState::Stopped,
            deadline: None,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Time at which the current step ends.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn current_clip(&self) -> Option<&str> {
        self.crossfader.current()
    }

    /// Steps that survived the clip check at start.
    pub fn steps(&self) -> &[IdleStep] {
        &self.steps
    }

    /// Start looping at `now`. Steps naming clips the scene lacks are dropped;
    /// with nothing left the sequencer stays stopped.
    pub fn start<A: AnimationActions + ?Sized>(&mut self, actions: &mut A, now: Duration) -> bool {
        if self.state != SequencerState::Stopped || !self.enabled {
            return false;
        }
        self.steps.retain(|step| {
            let present = actions.has_clip(&step.clip);
            if !present {
                warn!(clip = %step.clip, "idle clip missing from scene, skipping step");
            }
            present
        });
        if self.steps.is_empty() {
            debug!("no idle clips available");
            return false;
        }
        info!(steps = self.steps.len(), "idle sequence started");
        self.enter(actions, 0, now);
        true
    }

    /// Move to the next step if the deadline has passed. Returns the clip entered.
    pub fn advance<A: AnimationActions + ?Sized>(
        &mut self,
        actions: &mut A,
        now: Duration,
    ) -> Option<&str> {
        let SequencerState::Running { step } = self.state else {
            return None;
        };
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        let next = (step + 1) % self.steps.len();
        self.enter(actions, next, now);
        self.steps.get(next).map(|s| s.clip.as_str())
    }

    /// Stop the loop. Clips keep whatever pose they are in.
    pub fn cancel(&mut self) {
        if self.state != SequencerState::Cancelled {
            debug!("idle sequence cancelled");
        }
        self.state = SequencerState::Cancelled;
        self.deadline = None;
    }

    fn enter<A: AnimationActions + ?Sized>(&mut self, actions: &mut A, index: usize, now: Duration) {
        let Some(step) = self.steps.get(index) else {
            return;
        };
        let hold = match step.hold {
            IdleHold::Fixed { ms } => Duration::from_millis(ms),
            IdleHold::Clip { pause_ms } => {
                let clip = actions.clip_duration(&step.clip).unwrap_or(0.0);
                Duration::try_from_secs_f32(clip.max(0.0))
                    .unwrap_or(Duration::MAX)
                    .saturating_add(Duration::from_millis(pause_ms))
            }
        };
        let clip = step.clip.clone();
        self.crossfader.switch_to(actions, &clip);
        debug!(clip = %clip, hold_ms = hold.as_millis() as u64, "idle step");
        self.state = SequencerState::Running { step: index };
        self.deadline = Some(now.saturating_add(hold));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::scene::MemoryScene;

    fn scene() -> MemoryScene {
        MemoryScene::from_json(
            r#"{"clips":[{"name":"Action","duration":2.0},{"name":"Dance","duration":4.0}]}"#,
        )
        .unwrap()
    }

    fn config() -> IdleConfig {
        IdleConfig {
            enabled: true,
            fade_secs: 0.5,
            steps: vec![
                IdleStep {
                    clip: "Action".into(),
                    hold: IdleHold::Fixed { ms: 2000 },
                },
                IdleStep {
                    clip: "Dance".into(),
                    hold: IdleHold::Clip { pause_ms: 500 },
                },
                IdleStep {
                    clip: "Wave".into(),
                    hold: IdleHold::Clip { pause_ms: 0 },
                },
            ],
        }
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn loops_through_steps_on_deadlines() {
        let mut scene = scene();
        let mut seq = IdleSequencer::new(&config());
        assert!(seq.start(&mut scene, Duration::ZERO));
        assert_eq!(seq.steps().len(), 2, "missing clip dropped");
        assert_eq!(seq.current_clip(), Some("Action"));
        assert_eq!(seq.next_deadline(), Some(secs(2.0)));

        assert!(seq.advance(&mut scene, secs(1.9)).is_none());
        assert_eq!(seq.advance(&mut scene, secs(2.0)), Some("Dance"));
        assert_eq!(seq.next_deadline(), Some(secs(2.0) + secs(4.0) + Duration::from_millis(500)));
        assert_eq!(seq.advance(&mut scene, secs(6.5)), Some("Action"));
        assert_eq!(seq.state(), SequencerState::Running { step: 0 });
    }

    #[test]
    fn transition_crossfades_clips() {
        let mut scene = scene();
        let mut seq = IdleSequencer::new(&config());
        seq.start(&mut scene, Duration::ZERO);
        scene.advance(1.0);
        seq.advance(&mut scene, secs(2.0));

        let action = scene.clip("Action").unwrap();
        assert_eq!(action.fading_to(), Some(0.0));
        let dance = scene.clip("Dance").unwrap();
        assert!(dance.playing);
        assert_eq!(dance.fading_to(), Some(1.0));
        assert_eq!(dance.time, 0.0);

        scene.advance(0.5);
        assert!(!scene.clip("Action").unwrap().playing);
        assert!((scene.clip("Dance").unwrap().weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cancel_clears_the_deadline() {
        let mut scene = scene();
        let mut seq = IdleSequencer::new(&config());
        seq.start(&mut scene, Duration::ZERO);
        seq.cancel();
        assert_eq!(seq.next_deadline(), None);
        assert!(seq.advance(&mut scene, secs(60.0)).is_none());
        assert!(!seq.start(&mut scene, secs(60.0)), "cancelled for good");
    }

    #[test]
    fn no_clips_means_no_loop() {
        let mut scene = MemoryScene::default();
        let mut seq = IdleSequencer::new(&config());
        assert!(!seq.start(&mut scene, Duration::ZERO));
        assert_eq!(seq.state(), SequencerState::Stopped);
    }

    #[test]
    fn disabled_sequencer_never_starts() {
        let mut scene = scene();
        let mut cfg = config();
        cfg.enabled = false;
        let mut seq = IdleSequencer::new(&cfg);
        assert!(!seq.start(&mut scene, Duration::ZERO));
    }

    #[test]
    fn switching_to_current_clip_is_a_no_op() {
        let mut scene = scene();
        let mut fader = ClipCrossfader::new(0.5);
        assert!(fader.switch_to(&mut scene, "Action"));
        assert!(!fader.switch_to(&mut scene, "Action"));
        assert!(!fader.switch_to(&mut scene, "Wave"));
        assert_eq!(fader.current(), Some("Action"));
    }

    #[test]
    fn huge_clip_duration_saturates_the_deadline() {
        let mut scene =
            MemoryScene::from_json(r#"{"clips":[{"name":"Dance","duration":1e30}]}"#).unwrap();
        let mut seq = IdleSequencer::new(&IdleConfig {
            enabled: true,
            fade_secs: 0.5,
            steps: vec![IdleStep {
                clip: "Dance".into(),
                hold: IdleHold::Clip { pause_ms: 500 },
            }],
        });
        assert!(seq.start(&mut scene, secs(1.0)));
        assert_eq!(seq.next_deadline(), Some(Duration::MAX));
        assert!(seq.advance(&mut scene, secs(3600.0)).is_none());
        assert_eq!(seq.current_clip(), Some("Dance"));
    }
}
