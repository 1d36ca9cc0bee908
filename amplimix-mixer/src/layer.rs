//! The layer pool (C10): a fixed-size array of playback slots, each a small
//! atomic state machine plus a richer, non-atomic payload that only the
//! audio thread touches.
//!
//! Two tiers of state per slot, matching spec §5's split between
//! lock-free scalar fields and command-queue-gated complex updates:
//! - [`LayerFields`]: single-word atomics (`state`, `id`, `cursor`, `gain`,
//!   `pan`, `pitch`, `play_speed`, `obstruction`, `occlusion`). The control
//!   thread writes these directly; the audio thread reads them once per
//!   block and tolerates staleness.
//! - the "rich" payload (decoder, resampler, per-effect cache, filter
//!   state): built by [`crate::commands::Command::Setup`] on the audio
//!   thread and never touched by the control thread. Guarded by an
//!   uncontended [`parking_lot::Mutex`] rather than the teacher's raw
//!   `UnsafeCell`-plus-`unsafe impl Sync` pattern, since nothing here can be
//!   compile-checked for soundness by hand.

use crate::atomic_f32::AtomicF32;
use crate::decoder::Decoder;
use crate::handles::{AmBusID, AmEffectID, AmEntityID, AmEnvironmentID, AmListenerID, AmSoundID, AttenuationAsset, EffectInstance, SoundFormat};
use amplimix_buffer::AudioBuffer;
use amplimix_dsp::filters::{GainSmoother, MonopoleLpf};
use amplimix_dsp::{Fader, Resampler};
use amplimix_spatial::ambisonics::SourceEncoder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// `{min, play, loop, halt, stop}` from spec §4.10. Represented as a `u8` so
/// it fits in a single-word atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LayerState {
    Min = 0,
    Play = 1,
    Loop = 2,
    Halt = 3,
    Stop = 4,
}

impl LayerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LayerState::Min,
            1 => LayerState::Play,
            2 => LayerState::Loop,
            3 => LayerState::Halt,
            _ => LayerState::Stop,
        }
    }

    pub fn is_playing(self) -> bool {
        matches!(self, LayerState::Play | LayerState::Loop | LayerState::Stop)
    }
}

/// `(slot_index, id)` address of a claimed layer (spec §6.5). `id == 0`
/// is the sentinel returned when `Play` could not allocate a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerToken {
    pub slot: u32,
    pub id: u64,
}

impl LayerToken {
    pub const fn sentinel() -> Self {
        Self { slot: 0, id: 0 }
    }

    pub fn is_sentinel(self) -> bool {
        self.id == 0
    }
}

/// Lock-free scalar fields, readable/writable from either thread.
pub struct LayerFields {
    state: AtomicU8,
    id: AtomicU64,
    cursor: AtomicU64,
    /// Mirrors `LayerRich::bus`, set once by `Setup` alongside the rich
    /// payload. Duplicated here so the orchestrator's per-block ducking scan
    /// (spec §4.12) can count active layers per bus from atomics alone,
    /// without taking every slot's rich mutex.
    bus: AtomicU64,
    /// Set/cleared directly by `Pause`/`Resume` (spec §6.5); read once per
    /// block by the orchestrator to decide whether to advance this layer's
    /// decode cursor and to pick the fade target for `LayerRich::pause_fader`.
    paused: AtomicBool,
    pub gain: AtomicF32,
    pub pan: AtomicF32,
    pub pitch: AtomicF32,
    pub play_speed: AtomicF32,
    pub obstruction: AtomicF32,
    pub occlusion: AtomicF32,
}

impl Default for LayerFields {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LayerState::Min as u8),
            id: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
            bus: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            gain: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.0),
            pitch: AtomicF32::new(1.0),
            play_speed: AtomicF32::new(1.0),
            obstruction: AtomicF32::new(0.0),
            occlusion: AtomicF32::new(0.0),
        }
    }
}

impl LayerFields {
    pub fn state(&self) -> LayerState {
        LayerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LayerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn set_cursor(&self, frame: u64) {
        self.cursor.store(frame, Ordering::Relaxed);
    }

    pub fn bus(&self) -> AmBusID {
        AmBusID(self.bus.load(Ordering::Relaxed))
    }

    pub fn set_bus(&self, bus: AmBusID) {
        self.bus.store(bus.0, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }
}

/// One environment's cached effect instance plus its current wet factor
/// (spec §4.9 step 3). Destroyed along with the rest of the layer's rich
/// state when the layer returns to `min`.
struct EnvironmentEffect {
    instance: Box<dyn EffectInstance>,
}

/// The heavier, non-atomic per-layer state. Built by `Setup`, read and
/// mutated only from the audio thread.
pub struct LayerRich {
    pub sound_id: AmSoundID,
    pub decoder: Box<dyn Decoder>,
    pub resampler: Resampler,
    pub format: SoundFormat,
    pub bus: AmBusID,
    pub listener: Option<AmListenerID>,
    pub entity: Option<AmEntityID>,
    /// The resolved attenuation asset this layer was `Play`ed with, read
    /// directly by `spatial_inputs` each block (spec §4.7) rather than
    /// through an `AmAttenuationID` indirection the core has no registry
    /// for.
    pub attenuation_asset: Option<Arc<dyn AttenuationAsset>>,
    pub start_frame: u64,
    pub end_frame: Option<u64>,
    pub spatialized: bool,

    pub obstruction_lpf: MonopoleLpf,
    pub occlusion_lpf: MonopoleLpf,
    pub obstruction_gain: GainSmoother,
    pub occlusion_gain: GainSmoother,
    pub directivity_gain: GainSmoother,
    pub stop_fade: Option<Fader>,
    /// Block-rate fader driving `Pause`/`Resume` (spec §6.5), applied as a
    /// flat per-block multiplier the same way the bus tree applies its own
    /// faders (spec §4.12), rather than smoothed per-sample like the
    /// obstruction/occlusion/directivity gains.
    pub pause_fader: Fader,

    pub encoder: Option<SourceEncoder>,
    effects: HashMap<AmEnvironmentID, EnvironmentEffect>,

    pub decode_scratch: AudioBuffer,
    /// One decoder-read-sized chunk, reused across the (possibly several,
    /// on loop wraparound) calls to `Decoder::read` needed to fill
    /// `decode_scratch` (spec §4.13 step 2b), since `Decoder::read` always
    /// writes starting at its output buffer's frame 0.
    pub decode_read_scratch: AudioBuffer,
    pub resample_scratch: AudioBuffer,
    /// Per-environment effect scratch, preallocated at setup so the
    /// environment-effect blend (spec §4.9 step 3) never allocates mid-Mix.
    pub effect_scratch: Vec<f32>,
    pub wet_sum_scratch: Vec<f32>,
    /// Doppler ratio computed by the previous block's processor chain,
    /// folded into this block's resample ratio (spec §4.9 step 5: "folded
    /// into the layer's effective sample-rate ratio for the next block").
    pub doppler_ratio: f32,
    /// The pitch/speed/doppler ratio the resampler's source rate was last
    /// reconfigured for, so `mix` only calls `set_sample_rate` when the
    /// ratio actually moved past `RATE_RATIO_EPSILON` instead of on every
    /// block.
    pub applied_ratio: f32,
}

/// Constructor argument bundle for [`LayerRich::new`], grouping the fields
/// `Command::Setup` fills in after resolving a claimed layer's sound,
/// resampler, and routing.
pub struct LayerRichInit {
    pub sound_id: AmSoundID,
    pub decoder: Box<dyn Decoder>,
    pub resampler: Resampler,
    pub format: SoundFormat,
    pub bus: AmBusID,
    pub listener: Option<AmListenerID>,
    pub entity: Option<AmEntityID>,
    pub attenuation_asset: Option<Arc<dyn AttenuationAsset>>,
    pub start_frame: u64,
    pub end_frame: Option<u64>,
    pub spatialized: bool,
    pub decode_scratch: AudioBuffer,
    pub decode_read_scratch: AudioBuffer,
    pub resample_scratch: AudioBuffer,
}

impl LayerRich {
    pub fn new(init: LayerRichInit) -> Self {
        Self {
            sound_id: init.sound_id,
            decoder: init.decoder,
            resampler: init.resampler,
            format: init.format,
            bus: init.bus,
            listener: init.listener,
            entity: init.entity,
            attenuation_asset: init.attenuation_asset,
            start_frame: init.start_frame,
            end_frame: init.end_frame,
            spatialized: init.spatialized,
            obstruction_lpf: MonopoleLpf::new(0.0),
            occlusion_lpf: MonopoleLpf::new(0.0),
            obstruction_gain: GainSmoother::new(1.0),
            occlusion_gain: GainSmoother::new(1.0),
            directivity_gain: GainSmoother::new(1.0),
            stop_fade: None,
            pause_fader: Fader::new(1.0),
            encoder: None,
            effects: HashMap::new(),
            decode_scratch: init.decode_scratch,
            decode_read_scratch: init.decode_read_scratch,
            resample_scratch: init.resample_scratch,
            effect_scratch: Vec::new(),
            wet_sum_scratch: Vec::new(),
            doppler_ratio: 1.0,
            applied_ratio: 1.0,
        }
    }

    /// Looks up (creating on first use) the cached effect instance for
    /// `env`, invoking `make` only on a cache miss.
    pub fn effect_instance(
        &mut self,
        env: AmEnvironmentID,
        make: impl FnOnce() -> Box<dyn EffectInstance>,
    ) -> &mut dyn EffectInstance {
        let entry = self
            .effects
            .entry(env)
            .or_insert_with(|| EnvironmentEffect { instance: make() });
        entry.instance.as_mut()
    }

    pub fn clear_effects(&mut self) {
        self.effects.clear();
    }
}

/// One pool slot: the atomic fields plus the mutex-guarded rich payload,
/// `None` whenever the slot is `min`.
pub struct LayerSlot {
    pub fields: LayerFields,
    pub rich: Mutex<Option<LayerRich>>,
}

impl Default for LayerSlot {
    fn default() -> Self {
        Self {
            fields: LayerFields::default(),
            rich: Mutex::new(None),
        }
    }
}

/// Fixed-size array of layer slots (spec §4.10; default capacity 4096,
/// configurable for tests).
pub struct LayerPool {
    slots: Vec<LayerSlot>,
    next_id: AtomicU64,
}

/// Default slot count from spec §3 ("a pool of size `L = 4096`").
pub const DEFAULT_CAPACITY: usize = 4096;

impl LayerPool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| LayerSlot::default()).collect();
        Self {
            slots,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> &LayerSlot {
        &self.slots[index]
    }

    pub fn slots(&self) -> &[LayerSlot] {
        &self.slots
    }

    /// Scans for the first `min` slot and atomically claims it for `state`
    /// (`Play` or `Loop`), bumping its `id`. Returns the sentinel token if
    /// every slot is occupied (spec §4.10: "`Play` is the only operation
    /// that allocates a layer... if none, the request fails").
    ///
    /// Claiming only flips the atomic state and `id`; the heavier setup
    /// (decoder, resampler, effect cache) is applied later by
    /// `Command::Setup` on the audio thread, so this never allocates and
    /// never blocks.
    pub fn claim(&self, looped: bool) -> LayerToken {
        let target = if looped { LayerState::Loop } else { LayerState::Play };
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .fields
                .state
                .compare_exchange(
                    LayerState::Min as u8,
                    target as u8,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                slot.fields.id.store(id, Ordering::Release);
                slot.fields.set_cursor(0);
                return LayerToken { slot: index as u32, id };
            }
        }
        LayerToken::sentinel()
    }

    /// Resolves `token` to its slot, verifying the `id` still matches
    /// (spec §3: "if `id` no longer matches, the operation is silently
    /// discarded").
    pub fn resolve(&self, token: LayerToken) -> Option<&LayerSlot> {
        if token.is_sentinel() {
            return None;
        }
        let slot = self.slots.get(token.slot as usize)?;
        if slot.fields.id() == token.id {
            Some(slot)
        } else {
            None
        }
    }

    /// Requests a stop with a fade (spec §6.5 `Stop`). Silent no-op on a
    /// stale token.
    pub fn request_stop(&self, token: LayerToken, fade_s: f32, block_duration_s: f32) {
        let Some(slot) = self.resolve(token) else { return };
        if !slot.fields.state().is_playing() {
            return;
        }
        slot.fields.set_state(LayerState::Stop);
        let mut rich = slot.rich.lock();
        if let Some(rich) = rich.as_mut() {
            let mut fader = Fader::new(1.0);
            fader.fade_to(0.0, fade_s.max(block_duration_s), amplimix_dsp::FaderShape::Linear);
            rich.stop_fade = Some(fader);
        }
    }

    /// Installs the rich payload for a freshly claimed slot. Called only by
    /// `Command::Setup`'s audio-thread execution.
    pub fn install(&self, token: LayerToken, rich: LayerRich) -> bool {
        let Some(slot) = self.resolve(token) else { return false };
        slot.fields.set_bus(rich.bus);
        *slot.rich.lock() = Some(rich);
        true
    }

    /// Transitions a slot back to `min`, dropping its rich payload, making
    /// it eligible for the next `claim` (spec §4.10: "eligible for reuse at
    /// the next block boundary; its per-effect caches are cleaned up
    /// then").
    pub fn reclaim(&self, index: usize) {
        let slot = &self.slots[index];
        *slot.rich.lock() = None;
        slot.fields.set_state(LayerState::Min);
    }

    /// Marks a slot `halt` (natural end, decode error, or a settled stop
    /// fade). Does not yet drop the rich payload; that happens on the next
    /// `reclaim` pass.
    pub fn halt(&self, index: usize) {
        self.slots[index].fields.set_state(LayerState::Halt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_allocates_from_min_and_bumps_id() {
        let pool = LayerPool::new(4);
        let a = pool.claim(false);
        assert!(!a.is_sentinel());
        let b = pool.claim(false);
        assert_ne!(a.slot, b.slot);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn saturated_pool_returns_sentinel_without_mutating() {
        let pool = LayerPool::new(2);
        let a = pool.claim(false);
        let b = pool.claim(false);
        assert!(!a.is_sentinel() && !b.is_sentinel());
        let c = pool.claim(false);
        assert!(c.is_sentinel());
        assert_eq!(pool.slot(a.slot as usize).fields.id(), a.id);
        assert_eq!(pool.slot(b.slot as usize).fields.id(), b.id);
    }

    #[test]
    fn stale_token_after_reclaim_does_not_resolve() {
        let pool = LayerPool::new(1);
        let token = pool.claim(false);
        pool.halt(token.slot as usize);
        pool.reclaim(token.slot as usize);
        assert!(pool.resolve(token).is_none());
        let new_token = pool.claim(false);
        assert_eq!(new_token.slot, token.slot);
        assert_ne!(new_token.id, token.id);
    }

    #[test]
    fn resolve_rejects_mismatched_id() {
        let pool = LayerPool::new(1);
        let token = pool.claim(false);
        let stale = LayerToken { slot: token.slot, id: token.id + 1 };
        assert!(pool.resolve(stale).is_none());
    }

    #[test]
    fn pause_flag_round_trips() {
        let pool = LayerPool::new(1);
        let token = pool.claim(false);
        let slot = pool.resolve(token).unwrap();
        assert!(!slot.fields.is_paused());
        slot.fields.set_paused(true);
        assert!(slot.fields.is_paused());
    }
}
