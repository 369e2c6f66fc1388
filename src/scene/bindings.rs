//! Morph-target index resolved once per scene.
//!
//! Resolving names to `(mesh, index)` slots at bind time keeps the per-frame
//! path to plain indexed writes. The same pass settles which channels belong
//! to the blink: those slots are never handed to mouth blending.

use crate::config::BlinkConfig;
use crate::scene::{MeshHandle, MorphTargetHost};
use crate::viseme::{MouthShape, ShapeTable};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// A concrete influence slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MorphSlot {
    pub mesh: MeshHandle,
    pub index: usize,
}

/// Every slot carrying one morph target name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBinding {
    pub name: String,
    pub slots: Vec<MorphSlot>,
}

/// Resolved slots for mouth, amplitude and blink channels.
#[derive(Debug, Clone, Default)]
pub struct MorphBindings {
    visemes: Vec<TargetBinding>,
    shapes: BTreeMap<MouthShape, usize>,
    amplitude: Option<TargetBinding>,
    blink: Vec<MorphSlot>,
    reserved: Vec<MorphSlot>,
}

impl MorphBindings {
    /// Resolve names against `scene`. Missing targets simply resolve to no slots.
    pub fn resolve<S: MorphTargetHost + ?Sized>(
        scene: &S,
        shapes: &ShapeTable,
        amplitude_target: Option<&str>,
        blink: &BlinkConfig,
    ) -> Self {
        let mut bindings = Self::default();
        let meshes = scene.meshes();

        for &mesh in &meshes {
            let Some(dict) = scene.morph_dictionary(mesh) else {
                continue;
            };
            let eyes = dict.get(&blink.target).copied();
            if let Some(index) = eyes {
                bindings.blink.push(MorphSlot { mesh, index });
            }
            for name in &blink.reserved_targets {
                if let Some(&index) = dict.get(name)
                    && Some(index) != eyes
                {
                    bindings.reserved.push(MorphSlot { mesh, index });
                }
            }
        }

        let claimed: HashSet<MorphSlot> = bindings
            .blink
            .iter()
            .chain(bindings.reserved.iter())
            .copied()
            .collect();

        let lookup = |name: &str| -> Vec<MorphSlot> {
            let mut slots = Vec::new();
            for &mesh in &meshes {
                let Some(&index) = scene.morph_dictionary(mesh).and_then(|d| d.get(name)) else {
                    continue;
                };
                let slot = MorphSlot { mesh, index };
                if claimed.contains(&slot) {
                    debug!(target_name = name, mesh = mesh.0, "morph target reserved for blink");
                    continue;
                }
                slots.push(slot);
            }
            slots
        };

        for name in shapes.distinct_targets() {
            let slots = lookup(name);
            if slots.is_empty() {
                debug!(target_name = name, "scene has no such viseme target");
            }
            bindings.visemes.push(TargetBinding {
                name: name.to_owned(),
                slots,
            });
        }
        for shape in MouthShape::ALL {
            let name = shapes.target(shape);
            if let Some(pos) = bindings.visemes.iter().position(|b| b.name == name) {
                bindings.shapes.insert(shape, pos);
            }
        }

        bindings.amplitude = amplitude_target.map(|name| TargetBinding {
            name: name.to_owned(),
            slots: lookup(name),
        });

        bindings
    }

    /// Viseme targets, one entry per distinct name.
    pub fn visemes(&self) -> &[TargetBinding] {
        &self.visemes
    }

    /// Position in [`visemes`](Self::visemes) of the target a shape drives.
    pub fn shape_target(&self, shape: MouthShape) -> Option<usize> {
        self.shapes.get(&shape).copied()
    }

    pub fn amplitude(&self) -> Option<&TargetBinding> {
        self.amplitude.as_ref()
    }

    /// Slots driven by the blink curve.
    pub fn blink(&self) -> &[MorphSlot] {
        &self.blink
    }

    /// Blink-family slots that are held at rest.
    pub fn reserved(&self) -> &[MorphSlot] {
        &self.reserved
    }
}

/// Zero every morph influence in the scene.
pub fn reset_influences<S: MorphTargetHost + ?Sized>(scene: &mut S) {
    for mesh in scene.meshes() {
        let indices: Vec<usize> = scene
            .morph_dictionary(mesh)
            .map(|d| d.values().copied().collect())
            .unwrap_or_default();
        for index in indices {
            if let Some(value) = scene.influence_mut(mesh, index) {
                *value = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::scene::MemoryScene;

    fn scene() -> MemoryScene {
        MemoryScene::from_json(
            r#"{"meshes":[
                {"name":"Head","morphTargets":["viseme_PP","viseme_AA","eyes","eyeBlinkLeft","jawOpen"]},
                {"name":"Teeth","morphTargets":["viseme_AA"]},
                {"name":"Body"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_slots_across_meshes() {
        let scene = scene();
        let bindings = MorphBindings::resolve(
            &scene,
            &ShapeTable::default(),
            Some("jawOpen"),
            &BlinkConfig::default(),
        );
        let aa = bindings.shape_target(MouthShape::D).unwrap();
        assert_eq!(bindings.visemes()[aa].name, "viseme_AA");
        assert_eq!(bindings.visemes()[aa].slots.len(), 2);
        assert_eq!(
            bindings.shape_target(MouthShape::A),
            bindings.shape_target(MouthShape::X)
        );
        assert_eq!(bindings.blink().len(), 1);
        assert_eq!(bindings.reserved().len(), 1);
        assert_eq!(bindings.amplitude().unwrap().slots.len(), 1);
    }

    #[test]
    fn missing_targets_resolve_empty() {
        let scene = scene();
        let bindings = MorphBindings::resolve(
            &scene,
            &ShapeTable::default(),
            None,
            &BlinkConfig::default(),
        );
        let kk = bindings.shape_target(MouthShape::B).unwrap();
        assert!(bindings.visemes()[kk].slots.is_empty());
        assert!(bindings.amplitude().is_none());
    }

    #[test]
    fn blink_channels_are_excluded_from_visemes() {
        let scene = scene();
        let overrides: BTreeMap<String, String> =
            [("A".to_owned(), "eyeBlinkLeft".to_owned())].into_iter().collect();
        let bindings = MorphBindings::resolve(
            &scene,
            &ShapeTable::with_overrides(&overrides),
            Some("eyes"),
            &BlinkConfig::default(),
        );
        let a = bindings.shape_target(MouthShape::A).unwrap();
        assert!(bindings.visemes()[a].slots.is_empty());
        assert!(bindings.amplitude().unwrap().slots.is_empty());
    }

    #[test]
    fn reserved_name_sharing_the_eyes_index_is_not_reserved() {
        let mut blink = BlinkConfig::default();
        blink.target = "blink".to_owned();
        let scene = MemoryScene::from_json(
            r#"{"meshes":[{"name":"Head","morphTargets":["blink","eyeBlinkRight"]}]}"#,
        )
        .unwrap();
        let bindings = MorphBindings::resolve(&scene, &ShapeTable::default(), None, &blink);
        assert_eq!(bindings.blink().len(), 1);
        assert_eq!(bindings.reserved().len(), 1);
        assert!(!bindings.reserved().contains(&bindings.blink()[0]));
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut scene = scene();
        let head = MeshHandle(0);
        *scene.influence_mut(head, 1).unwrap() = 0.8;
        reset_influences(&mut scene);
        assert_eq!(scene.influence(head, 1), Some(0.0));
    }
}
