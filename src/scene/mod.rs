//! Scene-graph contract.
//!
//! The avatar's mesh, skeleton and clip library are loaded elsewhere. The
//! animation code only needs named morph targets on meshes and a named-clip
//! player, expressed here as two traits.

pub mod bindings;
pub mod memory;

pub use bindings::{MorphBindings, MorphSlot};
pub use memory::MemoryScene;

use std::collections::HashMap;

/// Morph target name -> influence index for one mesh.
pub type MorphDictionary = HashMap<String, usize>;

/// Opaque index of a mesh within a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub usize);

/// Meshes exposing morph targets.
pub trait MorphTargetHost {
    /// Handles of every mesh, in traversal order.
    fn meshes(&self) -> Vec<MeshHandle>;

    /// Name -> index mapping for a mesh, if it has morph targets.
    fn morph_dictionary(&self, mesh: MeshHandle) -> Option<&MorphDictionary>;

    /// Mutable influence slot; `None` if the mesh or index does not exist.
    fn influence_mut(&mut self, mesh: MeshHandle, index: usize) -> Option<&mut f32>;

    /// Current influence value.
    fn influence(&self, mesh: MeshHandle, index: usize) -> Option<f32>;
}

/// Named-clip animation playback.
pub trait AnimationActions {
    /// Names of every clip in the library.
    fn clip_names(&self) -> Vec<String>;

    /// Natural length of a clip in seconds.
    fn clip_duration(&self, clip: &str) -> Option<f32>;

    fn play(&mut self, clip: &str);

    fn reset(&mut self, clip: &str);

    fn fade_in(&mut self, clip: &str, secs: f32);

    fn fade_out(&mut self, clip: &str, secs: f32);

    /// Step clip time and fades by `dt` seconds. Hosts whose mixer ticks on
    /// its own leave this empty.
    fn advance(&mut self, _dt: f32) {}

    fn has_clip(&self, clip: &str) -> bool {
        self.clip_duration(clip).is_some()
    }
}
