//! Per-frame facial animation: mouth shapes, amplitude fallback and blinks.
//!
//! [`FacialAnimator::update`] is called once per rendered frame. It reads the
//! playback clock and the active cue track, then writes morph influences
//! through slots resolved once at bind time.

pub mod blink;

pub use blink::BlinkCycle;

use crate::config::AvatarConfig;
use crate::scene::bindings::{MorphBindings, MorphSlot, reset_influences};
use crate::scene::MorphTargetHost;
use crate::viseme::{MouthShape, ShapeTable, VisemeTrack};
use rand::Rng;
use rand::rngs::StdRng;

/// Inputs sampled by the host for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Seconds of the active stream that have played.
    pub elapsed_secs: f64,
    /// Cue track of the stream that is currently audible, if any.
    pub track: Option<&'a VisemeTrack>,
    /// Smoothed playback amplitude in [0, 1].
    pub amplitude: f32,
    /// Wall-clock seconds since the previous frame.
    pub delta_secs: f32,
}

/// What one frame did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Shapes whose cues contained the playback time.
    pub active_shapes: Vec<MouthShape>,
    /// Whether the amplitude fallback drove the mouth.
    pub amplitude_driven: bool,
    /// Eye influence written this frame, while a blink is in progress.
    pub blink: Option<f32>,
}

/// Blends visemes, amplitude and blinks into morph influences.
#[derive(Debug)]
pub struct FacialAnimator<R = StdRng> {
    bindings: MorphBindings,
    attack: f32,
    release: f32,
    amplitude_gain: f32,
    blink: BlinkCycle<R>,
}

impl FacialAnimator<StdRng> {
    /// Resolve bindings against `scene` and zero every influence.
    pub fn from_scene<S: MorphTargetHost + ?Sized>(scene: &mut S, config: &AvatarConfig) -> Self {
        let blink = BlinkCycle::new(&config.blink);
        Self::with_blink(scene, config, blink)
    }

    /// Same as [`from_scene`](Self::from_scene) with a reproducible blink schedule.
    pub fn seeded<S: MorphTargetHost + ?Sized>(
        scene: &mut S,
        config: &AvatarConfig,
        seed: u64,
    ) -> Self {
        let blink = BlinkCycle::seeded(&config.blink, seed);
        Self::with_blink(scene, config, blink)
    }
}

impl<R: Rng> FacialAnimator<R> {
    pub fn with_blink<S: MorphTargetHost + ?Sized>(
        scene: &mut S,
        config: &AvatarConfig,
        blink: BlinkCycle<R>,
    ) -> Self {
        let table = ShapeTable::with_overrides(&config.lipsync.shape_targets);
        let bindings = MorphBindings::resolve(
            &*scene,
            &table,
            config.lipsync.amplitude_target.as_deref(),
            &config.blink,
        );
        reset_influences(scene);
        Self {
            bindings,
            attack: config.lipsync.attack,
            release: config.lipsync.release,
            amplitude_gain: config.lipsync.amplitude_gain,
            blink,
        }
    }

    pub fn bindings(&self) -> &MorphBindings {
        &self.bindings
    }

    /// Advance one frame.
    pub fn update<S: MorphTargetHost + ?Sized>(
        &mut self,
        scene: &mut S,
        input: &FrameInput<'_>,
    ) -> FrameReport {
        let visemes = self.bindings.visemes();
        let mut applied = vec![false; visemes.len()];
        let mut report = FrameReport::default();

        if let Some(track) = input.track {
            for cue in track.active_at(input.elapsed_secs) {
                if !report.active_shapes.contains(&cue.shape) {
                    report.active_shapes.push(cue.shape);
                }
                let Some(pos) = self.bindings.shape_target(cue.shape) else {
                    continue;
                };
                if applied[pos] {
                    continue;
                }
                applied[pos] = true;
                drive(scene, &visemes[pos].slots, 1.0, self.attack);
            }
        }

        if let Some(amplitude) = self.bindings.amplitude() {
            let shared = visemes.iter().position(|b| b.name == amplitude.name);
            if input.track.is_none() {
                let goal = (input.amplitude * self.amplitude_gain).clamp(0.0, 1.0);
                let (attack, release) = (self.attack, self.release);
                for slot in &amplitude.slots {
                    if let Some(value) = scene.influence_mut(slot.mesh, slot.index) {
                        let factor = if goal > *value { attack } else { release };
                        *value += (goal - *value) * factor;
                    }
                }
                report.amplitude_driven = true;
                if let Some(pos) = shared {
                    applied[pos] = true;
                }
            } else if shared.is_none() {
                drive(scene, &amplitude.slots, 0.0, self.release);
            }
        }

        for (binding, _) in visemes.iter().zip(&applied).filter(|(_, done)| !**done) {
            drive(scene, &binding.slots, 0.0, self.release);
        }

        report.blink = self.blink.update(input.delta_secs);
        if let Some(eyes) = report.blink {
            set(scene, self.bindings.blink(), eyes);
        }
        set(scene, self.bindings.reserved(), 0.0);

        report
    }
}

/// Lerp every slot toward `goal` by `factor`.
fn drive<S: MorphTargetHost + ?Sized>(scene: &mut S, slots: &[MorphSlot], goal: f32, factor: f32) {
    for slot in slots {
        if let Some(value) = scene.influence_mut(slot.mesh, slot.index) {
            *value += (goal - *value) * factor;
        }
    }
}

fn set<S: MorphTargetHost + ?Sized>(scene: &mut S, slots: &[MorphSlot], value: f32) {
    for slot in slots {
        if let Some(v) = scene.influence_mut(slot.mesh, slot.index) {
            *v = value;
        }
    }
}
