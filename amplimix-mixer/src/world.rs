//! Listeners and entities (spec §3): positional, lock-free-published world
//! state the control thread updates and the audio thread reads once per
//! block. Position/orientation are multi-word, so they are published via
//! [`arc_swap::ArcSwapOption`] snapshots rather than individual atomics
//! (spec §9: "for multi-word updates... route through the command queue" —
//! here realized as a snapshot swap, which gives the same atomic-visibility
//! guarantee without needing a queued closure per transform update).

use crate::atomic_f32::AtomicF32;
use arc_swap::ArcSwapOption;
use glam::Vec3;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::handles::{AmEntityID, AmEnvironmentID, AmListenerID, EffectAsset};

/// Position, velocity, and orientation snapshot for a listener or entity.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            forward: Vec3::Z,
            up: Vec3::Y,
        }
    }
}

/// A registered listener (spec §3 "Listener").
pub struct ListenerState {
    transform: ArcSwapOption<Transform>,
    pub directivity_alpha: AtomicF32,
    pub directivity_order: AtomicF32,
}

impl Default for ListenerState {
    fn default() -> Self {
        Self {
            transform: ArcSwapOption::from(Some(std::sync::Arc::new(Transform::default()))),
            directivity_alpha: AtomicF32::new(0.0),
            directivity_order: AtomicF32::new(1.0),
        }
    }
}

impl ListenerState {
    pub fn set_transform(&self, transform: Transform) {
        self.transform.store(Some(std::sync::Arc::new(transform)));
    }

    pub fn transform(&self) -> Transform {
        self.transform
            .load()
            .as_deref()
            .copied()
            .unwrap_or_default()
    }
}

/// A registered positional sound emitter (spec §3 "Entity").
pub struct EntityState {
    transform: ArcSwapOption<Transform>,
    pub obstruction: AtomicF32,
    pub occlusion: AtomicF32,
    environments: Mutex<HashMap<AmEnvironmentID, f32>>,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            transform: ArcSwapOption::from(Some(std::sync::Arc::new(Transform::default()))),
            obstruction: AtomicF32::new(0.0),
            occlusion: AtomicF32::new(0.0),
            environments: Mutex::new(HashMap::new()),
        }
    }
}

impl EntityState {
    pub fn set_transform(&self, transform: Transform) {
        self.transform.store(Some(std::sync::Arc::new(transform)));
    }

    pub fn transform(&self) -> Transform {
        self.transform
            .load()
            .as_deref()
            .copied()
            .unwrap_or_default()
    }

    pub fn set_environment_factor(&self, env: AmEnvironmentID, factor: f32) {
        self.environments.lock().insert(env, factor.clamp(0.0, 1.0));
    }

    /// Environments the entity currently belongs to, ordered by factor
    /// descending (spec §4.9 step 3: "ordered by factor, descending"; spec
    /// §3: "the largest factor wins when selecting an effect" for single-
    /// effect consumers, while this ordered list serves the per-layer
    /// processor which blends all of them).
    pub fn environments_by_factor_desc(&self) -> Vec<(AmEnvironmentID, f32)> {
        let mut v: Vec<(AmEnvironmentID, f32)> = self
            .environments
            .lock()
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect();
        v.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        v
    }

    /// The single dominant environment, for consumers that need only one
    /// (spec §3: "the largest factor wins when selecting an effect").
    pub fn dominant_environment(&self) -> Option<(AmEnvironmentID, f32)> {
        self.environments_by_factor_desc().into_iter().next()
    }
}

/// The engine-owned registry of listeners and entities (spec §6.5
/// `RegisterListener`/`RegisterEntity`). The core borrows these by raw
/// reference for the duration of each `Mix` call; the control side is
/// responsible for keeping a listener/entity alive as long as any layer
/// still binds to it (spec §3 "Listener" lifecycle).
#[derive(Default)]
pub struct WorldRegistry {
    listeners: Mutex<HashMap<AmListenerID, Arc<ListenerState>>>,
    entities: Mutex<HashMap<AmEntityID, Arc<EntityState>>>,
    /// Effect asset bound to each environment id (spec §4.9 step 3: "for
    /// each environment the entity belongs to... instantiate the
    /// environment's effect"). Populated by the control/asset side via
    /// `register_environment_effect`, read by the orchestrator to resolve
    /// `EntityState::environments_by_factor_desc`'s ids into the effects
    /// the per-layer processor chain actually runs.
    environment_effects: Mutex<HashMap<AmEnvironmentID, Arc<dyn EffectAsset>>>,
    next_listener: AtomicU64,
    next_entity: AtomicU64,
}

impl WorldRegistry {
    pub fn register_listener(&self) -> AmListenerID {
        let id = AmListenerID(self.next_listener.fetch_add(1, Ordering::Relaxed) + 1);
        self.listeners.lock().insert(id, Arc::new(ListenerState::default()));
        id
    }

    pub fn listener(&self, id: AmListenerID) -> Option<Arc<ListenerState>> {
        self.listeners.lock().get(&id).cloned()
    }

    pub fn unregister_listener(&self, id: AmListenerID) {
        self.listeners.lock().remove(&id);
    }

    pub fn register_entity(&self) -> AmEntityID {
        let id = AmEntityID(self.next_entity.fetch_add(1, Ordering::Relaxed) + 1);
        self.entities.lock().insert(id, Arc::new(EntityState::default()));
        id
    }

    pub fn entity(&self, id: AmEntityID) -> Option<Arc<EntityState>> {
        self.entities.lock().get(&id).cloned()
    }

    pub fn unregister_entity(&self, id: AmEntityID) {
        self.entities.lock().remove(&id);
    }

    /// Binds an effect asset to an environment id (spec §6.5-adjacent asset
    /// plumbing: the control/asset side owns `EffectAsset`s and tells the
    /// core which environment each one realizes). `AmEnvironmentID`s are
    /// otherwise caller-chosen keys, as used by `SetEntityEnvironmentFactor`.
    pub fn register_environment_effect(&self, env: AmEnvironmentID, effect: Arc<dyn EffectAsset>) {
        self.environment_effects.lock().insert(env, effect);
    }

    pub fn unregister_environment_effect(&self, env: AmEnvironmentID) {
        self.environment_effects.lock().remove(&env);
    }

    pub fn environment_effect(&self, env: AmEnvironmentID) -> Option<Arc<dyn EffectAsset>> {
        self.environment_effects.lock().get(&env).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_transform_round_trips() {
        let listener = ListenerState::default();
        let t = Transform { position: Vec3::new(1.0, 2.0, 3.0), ..Default::default() };
        listener.set_transform(t);
        assert_eq!(listener.transform().position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn entity_environments_sorted_by_factor_descending() {
        let entity = EntityState::default();
        entity.set_environment_factor(AmEnvironmentID(1), 0.2);
        entity.set_environment_factor(AmEnvironmentID(2), 0.9);
        entity.set_environment_factor(AmEnvironmentID(3), 0.5);
        let ordered = entity.environments_by_factor_desc();
        assert_eq!(ordered[0].0, AmEnvironmentID(2));
        assert_eq!(ordered[1].0, AmEnvironmentID(3));
        assert_eq!(ordered[2].0, AmEnvironmentID(1));
    }

    #[test]
    fn registry_assigns_distinct_ids_and_forgets_on_unregister() {
        let registry = WorldRegistry::default();
        let l1 = registry.register_listener();
        let l2 = registry.register_listener();
        assert_ne!(l1, l2);
        assert!(registry.listener(l1).is_some());

        let e1 = registry.register_entity();
        assert!(registry.entity(e1).is_some());

        registry.unregister_listener(l1);
        assert!(registry.listener(l1).is_none());
        assert!(registry.listener(l2).is_some());

        registry.unregister_entity(e1);
        assert!(registry.entity(e1).is_none());
    }
}
