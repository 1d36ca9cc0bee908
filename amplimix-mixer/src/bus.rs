//! The bus tree (C12): a flat arena of gain nodes with hierarchical gain
//! propagation and sibling-activity ducking (spec §4.12, §9 "own them in a
//! central arena, reference by index").

use crate::error::MixerError;
use crate::handles::AmBusID;
use amplimix_dsp::{Fader, FaderShape};

/// One other bus whose activity causes this bus to duck (spec §3: "a list
/// of sibling buses whose activity causes this bus to duck").
#[derive(Debug, Clone, Copy)]
pub struct DuckSource {
    pub watched_bus: AmBusID,
    pub target_duck_gain: f32,
    pub fade_in_s: f32,
    pub fade_out_s: f32,
    pub shape: FaderShape,
}

/// The engine-load-time definition of one bus (spec §3 "built at engine
/// load... structurally immutable thereafter").
#[derive(Debug, Clone)]
pub struct BusDef {
    pub name: String,
    pub static_gain: f32,
    pub parent: Option<AmBusID>,
    pub duck_sources: Vec<DuckSource>,
}

struct BusNode {
    def: BusDef,
    parent_index: Option<usize>,
    children: Vec<usize>,
    user_fader: Fader,
    duck_fader: Fader,
    duck_active: bool,
    mute: bool,
    final_gain: f32,
}

/// Arena of bus nodes, each addressed by its position (`AmBusID(index)`).
/// Built once at engine load; topology never changes afterward, only
/// per-block gain state.
pub struct BusTree {
    nodes: Vec<BusNode>,
    roots: Vec<usize>,
}

impl BusTree {
    /// Builds the tree from `defs`, whose position in the slice becomes
    /// each bus's [`AmBusID`]. Fails if a `parent` or `duck_sources` entry
    /// references an out-of-range index.
    pub fn build(defs: Vec<BusDef>) -> Result<(Self, Vec<AmBusID>), MixerError> {
        let ids: Vec<AmBusID> = (0..defs.len()).map(|i| AmBusID(i as u64)).collect();
        let mut nodes: Vec<BusNode> = Vec::with_capacity(defs.len());
        let mut roots = Vec::new();

        for def in &defs {
            if let Some(parent) = def.parent {
                if parent.0 as usize >= defs.len() {
                    return Err(MixerError::InvalidArgument(format!(
                        "bus {:?} references unknown parent {:?}",
                        def.name, parent
                    )));
                }
            }
            for d in &def.duck_sources {
                if d.watched_bus.0 as usize >= defs.len() {
                    return Err(MixerError::InvalidArgument(format!(
                        "bus {:?} ducks on unknown bus {:?}",
                        def.name, d.watched_bus
                    )));
                }
            }
        }

        for (index, def) in defs.into_iter().enumerate() {
            let parent_index = def.parent.map(|p| p.0 as usize);
            if parent_index.is_none() {
                roots.push(index);
            }
            nodes.push(BusNode {
                def,
                parent_index,
                children: Vec::new(),
                user_fader: Fader::new(1.0),
                duck_fader: Fader::new(1.0),
                duck_active: false,
                mute: false,
                final_gain: 1.0,
            });
        }

        for index in 0..nodes.len() {
            if let Some(parent) = nodes[index].parent_index {
                nodes[parent].children.push(index);
            }
        }

        Ok((Self { nodes, roots }, ids))
    }

    fn index_of(&self, id: AmBusID) -> Option<usize> {
        let i = id.0 as usize;
        (i < self.nodes.len()).then_some(i)
    }

    pub fn final_gain(&self, id: AmBusID) -> f32 {
        self.index_of(id).map(|i| self.nodes[i].final_gain).unwrap_or(0.0)
    }

    /// Immediate gain set (spec §6.5 `Bus(id).SetUserGain`): snaps without a
    /// fade.
    pub fn set_user_gain(&mut self, id: AmBusID, value: f32) {
        if let Some(i) = self.index_of(id) {
            self.nodes[i].user_fader.fade_to(value, 0.0, FaderShape::Linear);
        }
    }

    /// Fading gain set (spec §6.5 `Bus.FadeToGain(value, duration)`).
    pub fn fade_to_gain(&mut self, id: AmBusID, value: f32, duration_s: f32, shape: FaderShape) {
        if let Some(i) = self.index_of(id) {
            self.nodes[i].user_fader.fade_to(value, duration_s, shape);
        }
    }

    pub fn set_mute(&mut self, id: AmBusID, mute: bool) {
        if let Some(i) = self.index_of(id) {
            self.nodes[i].mute = mute;
        }
    }

    pub fn user_gain(&self, id: AmBusID) -> f32 {
        self.index_of(id).map(|i| self.nodes[i].user_fader.value()).unwrap_or(0.0)
    }

    /// Per-block update (spec §4.12): reset/advance duck fades, advance
    /// user-gain fades, then walk root-to-leaf computing `final_gain`.
    /// `active_layer_count[i]` is the number of currently playing layers
    /// attached to bus `i`, supplied by the orchestrator's per-block layer
    /// scan (the bus tree itself keeps no per-layer attachment list, unlike
    /// the data model's description, since the orchestrator already visits
    /// every layer once per block to run the DSP chain).
    pub fn update(&mut self, active_layer_count: &[usize], dt_s: f32) {
        for index in 0..self.nodes.len() {
            let any_sibling_active = self.nodes[index]
                .def
                .duck_sources
                .iter()
                .any(|d| active_layer_count.get(d.watched_bus.0 as usize).copied().unwrap_or(0) > 0);

            let node = &mut self.nodes[index];
            if any_sibling_active != node.duck_active {
                node.duck_active = any_sibling_active;
                if any_sibling_active {
                    // Ducking engages toward the strongest configured duck
                    // source's target/fade-in.
                    if let Some(d) = node.def.duck_sources.iter().find(|d| {
                        active_layer_count.get(d.watched_bus.0 as usize).copied().unwrap_or(0) > 0
                    }) {
                        node.duck_fader.fade_to(d.target_duck_gain, d.fade_in_s, d.shape);
                    }
                } else if let Some(d) = node.def.duck_sources.first() {
                    node.duck_fader.fade_to(1.0, d.fade_out_s, d.shape);
                }
            }
            node.duck_fader.advance(dt_s);
            node.user_fader.advance(dt_s);
        }

        for &root in self.roots.clone().iter() {
            self.propagate(root, 1.0);
        }
    }

    fn propagate(&mut self, index: usize, parent_final: f32) {
        let (static_gain, user, duck, mute) = {
            let node = &self.nodes[index];
            (node.def.static_gain, node.user_fader.value(), node.duck_fader.value(), node.mute)
        };
        let own = if mute { 0.0 } else { static_gain * user * duck };
        let final_gain = own * parent_final;
        self.nodes[index].final_gain = final_gain;
        let children = self.nodes[index].children.clone();
        for child in children {
            self.propagate(child, final_gain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_tree() -> (BusTree, Vec<AmBusID>) {
        let defs = vec![
            BusDef { name: "master".into(), static_gain: 1.0, parent: None, duck_sources: vec![] },
        ];
        BusTree::build(defs).unwrap()
    }

    #[test]
    fn root_final_gain_is_product_of_own_factors() {
        let (mut tree, ids) = simple_tree();
        tree.set_user_gain(ids[0], 0.5);
        tree.update(&[0], 0.0);
        assert_eq!(tree.final_gain(ids[0]), 0.5);
    }

    #[test]
    fn child_final_gain_multiplies_parent() {
        let defs = vec![
            BusDef { name: "master".into(), static_gain: 1.0, parent: None, duck_sources: vec![] },
            BusDef { name: "sfx".into(), static_gain: 0.5, parent: Some(AmBusID(0)), duck_sources: vec![] },
        ];
        let (mut tree, ids) = BusTree::build(defs).unwrap();
        tree.set_user_gain(ids[0], 0.8);
        tree.update(&[0, 0], 0.0);
        let expected = 1.0 * 0.8 * 1.0 * (0.5 * 1.0 * 1.0);
        assert!((tree.final_gain(ids[1]) - expected).abs() < 1e-6);
    }

    #[test]
    fn mute_zeroes_final_gain() {
        let (mut tree, ids) = simple_tree();
        tree.set_mute(ids[0], true);
        tree.update(&[5], 0.0);
        assert_eq!(tree.final_gain(ids[0]), 0.0);
    }

    #[test]
    fn sibling_activity_ducks_watching_bus() {
        let defs = vec![
            BusDef {
                name: "voice".into(),
                static_gain: 1.0,
                parent: None,
                duck_sources: vec![DuckSource {
                    watched_bus: AmBusID(1),
                    target_duck_gain: 0.2,
                    fade_in_s: 0.0,
                    fade_out_s: 0.0,
                    shape: FaderShape::Linear,
                }],
            },
            BusDef { name: "music".into(), static_gain: 1.0, parent: None, duck_sources: vec![] },
        ];
        let (mut tree, ids) = BusTree::build(defs).unwrap();
        tree.update(&[0, 0], 0.0);
        assert_eq!(tree.final_gain(ids[0]), 1.0);
        tree.update(&[0, 3], 0.0);
        assert!((tree.final_gain(ids[0]) - 0.2).abs() < 1e-6);
        tree.update(&[0, 0], 0.0);
        assert_eq!(tree.final_gain(ids[0]), 1.0);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let defs = vec![BusDef {
            name: "orphan".into(),
            static_gain: 1.0,
            parent: Some(AmBusID(99)),
            duck_sources: vec![],
        }];
        assert!(BusTree::build(defs).is_err());
    }
}
