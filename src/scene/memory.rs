//! In-memory scene graph for headless hosts and tests.

use crate::error::{AvatarError, Result};
use crate::scene::{AnimationActions, MeshHandle, MorphDictionary, MorphTargetHost};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneDescription {
    #[serde(default)]
    meshes: Vec<MeshDescription>,
    #[serde(default)]
    clips: Vec<ClipDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeshDescription {
    name: String,
    #[serde(default)]
    morph_targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClipDescription {
    name: String,
    duration: f32,
}

/// One mesh and its morph influences.
#[derive(Debug, Clone)]
pub struct MemoryMesh {
    pub name: String,
    dictionary: Option<MorphDictionary>,
    influences: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fade {
    from: f32,
    to: f32,
    secs: f32,
    elapsed: f32,
}

/// Playback state of one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipState {
    pub name: String,
    pub duration: f32,
    pub time: f32,
    pub weight: f32,
    pub playing: bool,
    fade: Option<Fade>,
}

impl ClipState {
    /// Target weight of the fade in progress, if any.
    pub fn fading_to(&self) -> Option<f32> {
        self.fade.map(|f| f.to)
    }
}

/// Scene graph held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryScene {
    meshes: Vec<MemoryMesh>,
    clips: Vec<ClipState>,
}

impl MemoryScene {
    /// Parse a JSON scene description:
    /// `{"meshes":[{"name","morphTargets":[..]}], "clips":[{"name","duration"}]}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        let desc: SceneDescription = serde_json::from_str(json)?;
        let meshes = desc
            .meshes
            .into_iter()
            .map(|m| {
                let dictionary = (!m.morph_targets.is_empty()).then(|| {
                    m.morph_targets
                        .iter()
                        .enumerate()
                        .map(|(i, name)| (name.clone(), i))
                        .collect()
                });
                MemoryMesh {
                    name: m.name,
                    influences: vec![0.0; m.morph_targets.len()],
                    dictionary,
                }
            })
            .collect();
        let clips = desc
            .clips
            .into_iter()
            .map(|c| ClipState {
                name: c.name,
                duration: c.duration.max(0.0),
                time: 0.0,
                weight: 0.0,
                playing: false,
                fade: None,
            })
            .collect();
        Ok(Self { meshes, clips })
    }

    /// Load a JSON scene description from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| AvatarError::Scene(format!("{}: {e}", path.display())))
    }

    pub fn mesh_named(&self, name: &str) -> Option<MeshHandle> {
        self.meshes.iter().position(|m| m.name == name).map(MeshHandle)
    }

    /// Influence of a named target on a named mesh.
    pub fn influence_by_name(&self, mesh: &str, target: &str) -> Option<f32> {
        let handle = self.mesh_named(mesh)?;
        let index = *self.morph_dictionary(handle)?.get(target)?;
        self.influence(handle, index)
    }

    /// Every (mesh, target, influence) triple with a non-zero influence.
    pub fn active_influences(&self) -> Vec<(String, String, f32)> {
        let mut out = Vec::new();
        for mesh in &self.meshes {
            let Some(dict) = &mesh.dictionary else {
                continue;
            };
            let mut named: Vec<_> = dict.iter().collect();
            named.sort_by_key(|(_, i)| **i);
            for (name, &index) in named {
                let value = mesh.influences.get(index).copied().unwrap_or(0.0);
                if value > 1e-4 {
                    out.push((mesh.name.clone(), name.clone(), value));
                }
            }
        }
        out
    }

    pub fn clip(&self, name: &str) -> Option<&ClipState> {
        self.clips.iter().find(|c| c.name == name)
    }

    fn clip_mut(&mut self, name: &str) -> Option<&mut ClipState> {
        self.clips.iter_mut().find(|c| c.name == name)
    }

    fn advance_clips(&mut self, dt: f32) {
        for clip in &mut self.clips {
            if clip.playing && clip.duration > 0.0 {
                clip.time = (clip.time + dt) % clip.duration;
            }
            if let Some(fade) = clip.fade.as_mut() {
                fade.elapsed += dt;
                let t = if fade.secs > 0.0 {
                    (fade.elapsed / fade.secs).min(1.0)
                } else {
                    1.0
                };
                clip.weight = fade.from + (fade.to - fade.from) * t;
                if t >= 1.0 {
                    if fade.to <= 0.0 {
                        clip.playing = false;
                    }
                    clip.fade = None;
                }
            }
        }
    }
}

impl MorphTargetHost for MemoryScene {
    fn meshes(&self) -> Vec<MeshHandle> {
        (0..self.meshes.len()).map(MeshHandle).collect()
    }

    fn morph_dictionary(&self, mesh: MeshHandle) -> Option<&MorphDictionary> {
        self.meshes.get(mesh.0)?.dictionary.as_ref()
    }

    fn influence_mut(&mut self, mesh: MeshHandle, index: usize) -> Option<&mut f32> {
        self.meshes.get_mut(mesh.0)?.influences.get_mut(index)
    }

    fn influence(&self, mesh: MeshHandle, index: usize) -> Option<f32> {
        self.meshes.get(mesh.0)?.influences.get(index).copied()
    }
}

impl AnimationActions for MemoryScene {
    fn clip_names(&self) -> Vec<String> {
        self.clips.iter().map(|c| c.name.clone()).collect()
    }

    fn clip_duration(&self, clip: &str) -> Option<f32> {
        self.clip(clip).map(|c| c.duration)
    }

    fn play(&mut self, clip: &str) {
        if let Some(c) = self.clip_mut(clip) {
            c.playing = true;
        }
    }

    fn reset(&mut self, clip: &str) {
        if let Some(c) = self.clip_mut(clip) {
            c.time = 0.0;
            c.weight = 1.0;
            c.fade = None;
        }
    }

    fn fade_in(&mut self, clip: &str, secs: f32) {
        if let Some(c) = self.clip_mut(clip) {
            c.weight = 0.0;
            c.fade = Some(Fade {
                from: 0.0,
                to: 1.0,
                secs,
                elapsed: 0.0,
            });
        }
    }

    fn fade_out(&mut self, clip: &str, secs: f32) {
        if let Some(c) = self.clip_mut(clip) {
            c.fade = Some(Fade {
                from: c.weight,
                to: 0.0,
                secs,
                elapsed: 0.0,
            });
        }
    }

    fn advance(&mut self, dt: f32) {
        self.advance_clips(dt);
    }
}
