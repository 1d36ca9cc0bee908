//! The pipeline orchestrator (C13, named `Amplimix` after
//! `original_source/include/.../Mixer/Amplimix.h`): owns every piece built
//! in the sibling modules and runs the per-block algorithm of spec §4.13.
//!
//! Split in two halves, matching §5's thread model: [`Amplimix`] itself is
//! driven exclusively by the audio thread's `mix` call, while [`AmplimixHandle`]
//! is the cheaply cloned, `Send + Sync` handle the control thread holds to
//! issue `Play`/`Stop`/`SetGain`/... — every control method either writes a
//! per-layer atomic directly or pushes a closure onto the command queue,
//! never blocking (§6.5 "All these enqueue commands; none block").

use crate::bus::{BusDef, BusTree};
use crate::commands::{CommandQueue, FullPolicy};
use crate::decoder::Decoder;
use crate::handles::{
    AmBusID, AmEntityID, AmEnvironmentID, AmListenerID, AmSoundID, AttenuationAsset, EffectAsset,
    SoundAsset, SoundFormat,
};
use crate::layer::{LayerPool, LayerRich, LayerRichInit, LayerState, LayerToken};
use crate::processor::{self, DopplerParams, EnvironmentMembership, ObstructionOcclusionCurves, SpatialInputs};
use crate::world::{Transform, WorldRegistry};
use amplimix_buffer::AudioBuffer;
use amplimix_dsp::resampler::{Resampler, ResamplerConfig};
use amplimix_dsp::{Fader, FaderShape};
use amplimix_spatial::ambisonics::{channel_count, decoder_order_weight, AmbisonicDecoder, BFormatBuffer, Mode, Order, SourceEncoder};
use amplimix_spatial::hrir::{Binauralizer, HrirSphere, SamplingMode};
use amplimix_spatial::reflections::{ReflectionsProcessor, RoomParameters};
use glam::Vec3;
use parking_lot::Mutex;
use std::sync::Arc;

/// Output configuration (spec §4.13 step 4: "depending on output
/// configuration"). `Binaural` wraps every speaker's HRIR contribution into
/// a 2-channel convolution; `SpeakerDecode` dot-products the B-format signal
/// straight onto a fixed speaker layout with no convolution at all.
pub enum OutputStage {
    Binaural { decoder: AmbisonicDecoder, binauralizer: Binauralizer },
    SpeakerDecode { decoder: AmbisonicDecoder },
}

impl OutputStage {
    fn channel_count(&self) -> usize {
        match self {
            OutputStage::Binaural { .. } => 2,
            OutputStage::SpeakerDecode { decoder } => decoder.speaker_count(),
        }
    }

    fn decode(&mut self, input: &BFormatBuffer, out: &mut AudioBuffer) {
        match self {
            OutputStage::Binaural { binauralizer, .. } => binauralizer.process(input, out),
            OutputStage::SpeakerDecode { decoder } => decoder.decode(input, out),
        }
    }
}

/// How the final output stage is built (spec §4.13/§6.1).
pub enum OutputStageConfig {
    Binaural { sphere: HrirSphere, tail_block: usize, sampling: SamplingMode },
    SpeakerDecode { speaker_directions: Vec<Vec3> },
}

/// Engine-load-time configuration (spec §3 "built at engine load...
/// structurally immutable thereafter", generalized to cover everything
/// `Amplimix::new` needs to wire up).
pub struct AmplimixConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub layer_capacity: usize,
    pub command_queue_capacity: usize,
    pub command_queue_policy: FullPolicy,
    pub ambisonic_order: Order,
    pub ambisonic_mode: Mode,
    pub output_stage: OutputStageConfig,
    pub bus_defs: Vec<BusDef>,
    pub obstruction_occlusion_curves: ObstructionOcclusionCurves,
    pub doppler: DopplerParams,
    pub reflections_room: RoomParameters,
    pub reflections_max_delay_frames: usize,
    /// Channel count of the non-spatialized direct-mix bus accumulator
    /// (spec §4.13 step 2d "mix directly into the bus-routed stereo/mono
    /// accumulator"); `1` or `2`.
    pub direct_channels: u16,
    pub pause_fade_seconds: f32,
    pub master_gain_initial: f32,
}

/// `Amplimix::mix`'s unconditional result (spec §7: "`Amplimix::mix` returns
/// `MixResult`... never `Result`, matching 'the Mix call always returns a
/// valid block'").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixResult {
    pub frames_produced: u64,
}

/// Everything a `Play` call needs to resolve and route a new layer (spec
/// §6.5 `Play`).
pub struct PlayParams<'a> {
    pub sound: &'a dyn SoundAsset,
    pub bus: AmBusID,
    pub listener: Option<AmListenerID>,
    pub entity: Option<AmEntityID>,
    pub attenuation: Option<Arc<dyn AttenuationAsset>>,
    pub gain: f32,
    pub pan: f32,
    pub pitch: f32,
    pub play_speed: f32,
    pub looped: bool,
    /// Whether this layer goes through the ambisonic path (obstruction,
    /// occlusion, environment effects, directivity/attenuation, doppler)
    /// or mixes directly (spec §4.9 "Non-spatialized layers bypass 1-3 and
    /// the ambisonic path").
    pub spatialized: bool,
}

const MAX_RATE_RATIO: f32 = 4.0;
const MIN_RATE_RATIO: f32 = 0.25;
const RATE_RATIO_EPSILON: f32 = 0.01;

fn equal_power_pan(pan: f32) -> (f32, f32) {
    let p = pan.clamp(-1.0, 1.0);
    let angle = (p + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// The `Send + Sync` control-side handle (spec §6.5). Cheap to clone; every
/// clone shares the same layer pool, command queue, bus tree, and world
/// registry as the [`Amplimix`] instance it was split from.
#[derive(Clone)]
pub struct AmplimixHandle {
    pool: Arc<LayerPool>,
    queue: Arc<CommandQueue>,
    buses: Arc<Mutex<BusTree>>,
    world: Arc<WorldRegistry>,
    sample_rate: u32,
    block_size: usize,
    direct_channels: u16,
}

impl AmplimixHandle {
    /// Claims a layer and enqueues the decoder/resampler setup that finishes
    /// it (spec §6.5 `Play`). Returns the sentinel token immediately if the
    /// pool is saturated, mutating nothing (spec §8 "Saturated pool").
    pub fn play(&self, params: PlayParams<'_>) -> LayerToken {
        let token = self.pool.claim(params.looped);
        if token.is_sentinel() {
            return token;
        }
        let Some(slot) = self.pool.resolve(token) else { return token };
        slot.fields.gain.store(params.gain);
        slot.fields.pan.store(params.pan);
        slot.fields.pitch.store(params.pitch.max(1e-3));
        slot.fields.play_speed.store(params.play_speed.max(1e-3));
        slot.fields.set_bus(params.bus);

        let format: SoundFormat = params.sound.format();
        let decoder: Box<dyn Decoder> = params.sound.open();
        let dst_channels: u16 = if params.spatialized { 1 } else { self.direct_channels };
        let resampler_config = ResamplerConfig {
            src_rate: format.sample_rate,
            dst_rate: self.sample_rate,
            src_channels: format.channel_count,
            dst_channels,
        };
        // Sized for the worst-case pitch/doppler ratio so `process` never
        // needs more source frames than the scratch buffers hold.
        let max_in_frames = ((self.block_size as f32 * MAX_RATE_RATIO).ceil() as usize)
            .max(self.block_size)
            + 8;
        let Ok(resampler) = Resampler::new(resampler_config, max_in_frames) else {
            self.pool.reclaim(token.slot as usize);
            return LayerToken::sentinel();
        };

        let pool = self.pool.clone();
        let bus = params.bus;
        let listener = params.listener;
        let entity = params.entity;
        let attenuation = params.attenuation;
        let block_size = self.block_size;

        self.queue.enqueue(Box::new(move || {
            let rich = LayerRich::new(LayerRichInit {
                sound_id: format_sound_id(&*decoder),
                decoder,
                resampler,
                format,
                bus,
                listener,
                entity,
                attenuation_asset: attenuation,
                start_frame: 0,
                end_frame: format.frame_count,
                spatialized: params.spatialized,
                decode_scratch: AudioBuffer::new(max_in_frames, format.channel_count as usize),
                decode_read_scratch: AudioBuffer::new(block_size, format.channel_count as usize),
                resample_scratch: AudioBuffer::new(block_size, dst_channels as usize),
            });
            pool.install(token, rich)
        }));

        token
    }

    pub fn stop(&self, token: LayerToken, fade_duration_s: f32) {
        let pool = self.pool.clone();
        let block_duration = self.block_size as f32 / self.sample_rate as f32;
        self.queue.enqueue(Box::new(move || {
            pool.request_stop(token, fade_duration_s, block_duration);
            true
        }));
    }

    pub fn pause(&self, token: LayerToken) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.set_paused(true);
        }
    }

    pub fn resume(&self, token: LayerToken) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.set_paused(false);
        }
    }

    pub fn set_gain(&self, token: LayerToken, value: f32) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.gain.store(value);
        }
    }

    pub fn set_pan(&self, token: LayerToken, value: f32) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.pan.store(value.clamp(-1.0, 1.0));
        }
    }

    pub fn set_pitch(&self, token: LayerToken, value: f32) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.pitch.store(value.max(1e-3));
        }
    }

    pub fn set_play_speed(&self, token: LayerToken, value: f32) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.play_speed.store(value.max(1e-3));
        }
    }

    pub fn set_obstruction(&self, token: LayerToken, value: f32) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.obstruction.store(value.clamp(0.0, 1.0));
        }
    }

    pub fn set_occlusion(&self, token: LayerToken, value: f32) {
        if let Some(slot) = self.pool.resolve(token) {
            slot.fields.occlusion.store(value.clamp(0.0, 1.0));
        }
    }

    pub fn set_cursor(&self, token: LayerToken, frame: u64) {
        let pool = self.pool.clone();
        self.queue.enqueue(Box::new(move || {
            let Some(slot) = pool.resolve(token) else { return false };
            let mut rich = slot.rich.lock();
            let Some(rich) = rich.as_mut() else { return false };
            if rich.decoder.seek(frame).is_err() {
                return false;
            }
            rich.resampler.reset();
            slot.fields.set_cursor(frame);
            true
        }));
    }

    pub fn bus_set_user_gain(&self, bus: AmBusID, value: f32) {
        let buses = self.buses.clone();
        self.queue.enqueue(Box::new(move || {
            buses.lock().set_user_gain(bus, value);
            true
        }));
    }

    pub fn bus_fade_to_gain(&self, bus: AmBusID, value: f32, duration_s: f32, shape: FaderShape) {
        let buses = self.buses.clone();
        self.queue.enqueue(Box::new(move || {
            buses.lock().fade_to_gain(bus, value, duration_s, shape);
            true
        }));
    }

    pub fn bus_set_mute(&self, bus: AmBusID, mute: bool) {
        let buses = self.buses.clone();
        self.queue.enqueue(Box::new(move || {
            buses.lock().set_mute(bus, mute);
            true
        }));
    }

    pub fn register_listener(&self) -> AmListenerID {
        self.world.register_listener()
    }

    pub fn set_listener_location(&self, id: AmListenerID, position: Vec3, velocity: Vec3) {
        if let Some(listener) = self.world.listener(id) {
            let mut t = listener.transform();
            t.position = position;
            t.velocity = velocity;
            listener.set_transform(t);
        }
    }

    pub fn set_listener_orientation(&self, id: AmListenerID, forward: Vec3, up: Vec3) {
        if let Some(listener) = self.world.listener(id) {
            let mut t = listener.transform();
            t.forward = forward;
            t.up = up;
            listener.set_transform(t);
        }
    }

    pub fn register_entity(&self) -> AmEntityID {
        self.world.register_entity()
    }

    pub fn set_entity_location(&self, id: AmEntityID, position: Vec3, velocity: Vec3) {
        if let Some(entity) = self.world.entity(id) {
            let mut t = entity.transform();
            t.position = position;
            t.velocity = velocity;
            entity.set_transform(t);
        }
    }

    pub fn set_entity_orientation(&self, id: AmEntityID, forward: Vec3, up: Vec3) {
        if let Some(entity) = self.world.entity(id) {
            let mut t = entity.transform();
            t.forward = forward;
            t.up = up;
            entity.set_transform(t);
        }
    }

    pub fn set_entity_environment_factor(&self, id: AmEntityID, env: AmEnvironmentID, factor: f32) {
        if let Some(entity) = self.world.entity(id) {
            entity.set_environment_factor(env, factor);
        }
    }

    /// Binds the effect asset an environment id realizes (spec §4.9 step 3).
    /// Not itself a queued command: this is asset-graph setup done once
    /// before any layer references the environment, the same non-realtime
    /// path `RegisterListener`/`RegisterEntity` take.
    pub fn register_environment_effect(&self, env: AmEnvironmentID, effect: Arc<dyn EffectAsset>) {
        self.world.register_environment_effect(env, effect);
    }

    pub fn unregister_environment_effect(&self, env: AmEnvironmentID) {
        self.world.unregister_environment_effect(env);
    }
}

fn format_sound_id(_decoder: &dyn Decoder) -> AmSoundID {
    // The decoder doesn't carry its originating sound's id; callers that
    // need it for effect-instance caching key off `AmEnvironmentID` instead,
    // so this is only ever used for diagnostics.
    AmSoundID(0)
}

/// The realtime pipeline core (spec §4.13). Owned by whichever thread drives
/// the audio callback; `mix` is the only method that thread calls.
pub struct Amplimix {
    pool: Arc<LayerPool>,
    queue: Arc<CommandQueue>,
    buses: Arc<Mutex<BusTree>>,
    world: Arc<WorldRegistry>,

    sample_rate: u32,
    block_size: usize,
    direct_channels: u16,

    curves: ObstructionOcclusionCurves,
    doppler: DopplerParams,

    ambisonic_order: Order,
    ambisonic_mode: Mode,
    accumulator: BFormatBuffer,
    reflections: ReflectionsProcessor,
    reflections_scratch: Vec<f32>,
    direct_accumulator: AudioBuffer,
    output_stage: OutputStage,
    master_out: AudioBuffer,
    master_gain: Fader,
    pause_fade_seconds: f32,

    active_layer_count_by_bus: Vec<usize>,
}

impl Amplimix {
    pub fn new(config: AmplimixConfig) -> Result<Self, crate::error::MixerError> {
        let pool = Arc::new(LayerPool::new(config.layer_capacity));
        let queue = Arc::new(CommandQueue::new(config.command_queue_capacity, config.command_queue_policy));
        let (bus_tree, bus_ids) = BusTree::build(config.bus_defs)?;
        let buses = Arc::new(Mutex::new(bus_tree));
        let world = Arc::new(WorldRegistry::default());

        let ambisonic_channels = channel_count(config.ambisonic_order, config.ambisonic_mode);
        let accumulator = BFormatBuffer::new(config.block_size, config.ambisonic_order, config.ambisonic_mode);

        let output_stage = match config.output_stage {
            OutputStageConfig::Binaural { sphere, tail_block, sampling } => {
                let decoder = AmbisonicDecoder::stereo(config.ambisonic_order, config.ambisonic_mode);
                let binauralizer = Binauralizer::configure(
                    &sphere,
                    &decoder,
                    ambisonic_channels,
                    config.block_size,
                    tail_block,
                    sampling,
                );
                OutputStage::Binaural { decoder, binauralizer }
            }
            OutputStageConfig::SpeakerDecode { speaker_directions } => {
                let decoder = AmbisonicDecoder::new(config.ambisonic_order, config.ambisonic_mode, &speaker_directions);
                OutputStage::SpeakerDecode { decoder }
            }
        };
        let master_channels = output_stage.channel_count();

        Ok(Self {
            pool,
            queue,
            buses,
            world,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            direct_channels: config.direct_channels,
            curves: config.obstruction_occlusion_curves,
            doppler: config.doppler,
            ambisonic_order: config.ambisonic_order,
            ambisonic_mode: config.ambisonic_mode,
            accumulator,
            reflections: ReflectionsProcessor::new(
                config.sample_rate as f32,
                config.reflections_max_delay_frames,
                config.block_size,
                config.reflections_room,
            ),
            reflections_scratch: vec![0.0; config.block_size],
            direct_accumulator: AudioBuffer::new(config.block_size, config.direct_channels as usize),
            output_stage,
            master_out: AudioBuffer::new(config.block_size, master_channels),
            master_gain: {
                let mut f = Fader::new(config.master_gain_initial);
                f.fade_to(config.master_gain_initial, 0.0, FaderShape::Linear);
                f
            },
            pause_fade_seconds: config.pause_fade_seconds,
            active_layer_count_by_bus: vec![0; bus_ids.len()],
        })
    }

    /// A cheap, `Send + Sync` clone of the control-facing handles, for the
    /// control thread to hold independently of whatever drives `mix`.
    pub fn handle(&self) -> AmplimixHandle {
        AmplimixHandle {
            pool: self.pool.clone(),
            queue: self.queue.clone(),
            buses: self.buses.clone(),
            world: self.world.clone(),
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            direct_channels: self.direct_channels,
        }
    }

    pub fn set_master_gain(&mut self, value: f32, duration_s: f32, shape: FaderShape) {
        self.master_gain.fade_to(value, duration_s, shape);
    }

    /// Runs one block of spec §4.13's pipeline, producing up to `frames`
    /// frames into `output` (`output.channel_count() ==
    /// self.output_stage.channel_count()`). Returns the number of frames
    /// actually produced; never fails, matching §7's "the Mix call always
    /// returns a valid block."
    pub fn mix(&mut self, output: &mut AudioBuffer, frames: usize) -> MixResult {
        let frames = frames.min(self.block_size);
        let block_duration_s = frames as f32 / self.sample_rate as f32;

        // Step 1: drain the command queue before any layer state is read.
        self.queue.drain();

        self.accumulator.clear();
        self.direct_accumulator.clear();
        self.active_layer_count_by_bus.iter_mut().for_each(|c| *c = 0);

        // First pass: tally active layers per bus for this block's ducking
        // decision (spec §4.12 step 2), from atomics alone.
        for slot in self.pool.slots() {
            if slot.fields.state().is_playing() {
                let bus = slot.fields.bus().0 as usize;
                if let Some(count) = self.active_layer_count_by_bus.get_mut(bus) {
                    *count += 1;
                }
            }
        }
        self.buses.lock().update(&self.active_layer_count_by_bus, block_duration_s);

        // Step 2: per-layer pull + DSP chain + accumulate.
        for (index, slot) in self.pool.slots().iter().enumerate() {
            let state = slot.fields.state();
            if !state.is_playing() {
                continue;
            }
            let mut guard = slot.rich.lock();
            let Some(rich) = guard.as_mut() else { continue };

            let looped = state == LayerState::Loop;
            let paused = slot.fields.is_paused();
            if paused != (rich.pause_fader.target() < 0.5) {
                let target = if paused { 0.0 } else { 1.0 };
                rich.pause_fader.fade_to(target, self.pause_fade_seconds.max(block_duration_s), FaderShape::Linear);
            }
            rich.pause_fader.advance(block_duration_s);

            if let Some(fade) = rich.stop_fade.as_mut() {
                fade.advance(block_duration_s);
            }

            let pitch = slot.fields.pitch.load();
            let play_speed = slot.fields.play_speed.load();
            let ratio = (pitch * play_speed * rich.doppler_ratio).clamp(MIN_RATE_RATIO, MAX_RATE_RATIO);
            if (ratio - rich.applied_ratio).abs() > RATE_RATIO_EPSILON {
                let new_src = ((rich.format.sample_rate as f32) * ratio).round().max(1.0) as u32;
                rich.resampler.set_sample_rate(new_src, self.sample_rate);
                rich.applied_ratio = ratio;
            }

            let needed_in = rich
                .resampler
                .required_input_frames(frames)
                .min(rich.decode_scratch.frame_count());

            let (produced_in, hit_end) = pull_decoded_frames(rich, looped, needed_in);
            if produced_in < needed_in {
                for c in 0..rich.decode_scratch.channel_count() {
                    rich.decode_scratch.channel_mut(c)[produced_in..needed_in]
                        .iter_mut()
                        .for_each(|s| *s = 0.0);
                }
            }
            let cursor_before = slot.fields.cursor();
            let advanced = match rich.format.frame_count {
                Some(total) if total > 0 => (cursor_before + produced_in as u64) % total,
                _ => cursor_before + produced_in as u64,
            };
            slot.fields.set_cursor(advanced);

            let mut in_frames = needed_in;
            let mut out_frames = frames;
            rich.resampler.process(&rich.decode_scratch, &mut in_frames, &mut rich.resample_scratch, &mut out_frames);
            if out_frames < frames {
                for c in 0..rich.resample_scratch.channel_count() {
                    rich.resample_scratch.channel_mut(c)[out_frames..frames]
                        .iter_mut()
                        .for_each(|s| *s = 0.0);
                }
            }

            let stop_value = rich.stop_fade.as_ref().map(|f| f.value()).unwrap_or(1.0);
            let pause_value = rich.pause_fader.value();
            let bus_gain = self.buses.lock().final_gain(rich.bus);
            let layer_gain = slot.fields.gain.load();
            let combined = layer_gain * stop_value * pause_value * bus_gain;

            if rich.spatialized {
                let mono = &mut rich.resample_scratch.channel_mut(0)[..frames];
                let (attenuation_gain, spatial) = spatial_inputs(rich, &self.world, combined);
                let environments = environment_memberships(rich, &self.world);
                let doppler_ratio = processor::run_chain(
                    mono,
                    rich,
                    &self.curves,
                    slot.fields.obstruction.load(),
                    slot.fields.occlusion.load(),
                    attenuation_gain,
                    &environments,
                    spatial.as_ref(),
                    &self.doppler,
                );
                rich.doppler_ratio = doppler_ratio;

                let direction = spatial
                    .as_ref()
                    .map(|s| (s.listener_position - s.source_position).normalize_or_zero())
                    .unwrap_or(Vec3::Z);
                let encoder = rich.encoder.get_or_insert_with(|| SourceEncoder::new(self.ambisonic_order, self.ambisonic_mode));
                let n = channel_count(self.ambisonic_order, self.ambisonic_mode);
                let weights: Vec<f32> = (0..n).map(decoder_order_weight).collect();
                encoder.process_accumulate(mono, &mut self.accumulator, direction, 1.0, &weights, 0.5);
            } else {
                let channels = rich.resample_scratch.channel_count();
                let target = rich.directivity_gain.current();
                let _ = target;
                if channels >= 2 && self.direct_accumulator.channel_count() >= 2 {
                    let pan = slot.fields.pan.load();
                    let (l_gain, r_gain) = equal_power_pan(pan);
                    let left: Vec<f32> = rich.resample_scratch.channel(0)[..frames].to_vec();
                    rich.directivity_gain.process_mul_add(
                        &mut self.direct_accumulator.channel_mut(0)[..frames],
                        &left,
                        combined * l_gain,
                    );
                    let right: Vec<f32> = rich.resample_scratch.channel(channels.min(2) - 1)[..frames].to_vec();
                    rich.directivity_gain.process_mul_add(
                        &mut self.direct_accumulator.channel_mut(1)[..frames],
                        &right,
                        combined * r_gain,
                    );
                } else {
                    let mono: Vec<f32> = rich.resample_scratch.channel(0)[..frames].to_vec();
                    for c in 0..self.direct_accumulator.channel_count() {
                        rich.directivity_gain.process_mul_add(
                            &mut self.direct_accumulator.channel_mut(c)[..frames],
                            &mono,
                            combined,
                        );
                    }
                }
            }

            let stop_settled = rich.stop_fade.as_ref().map(|f| f.is_settled() && f.value() <= 1e-4).unwrap_or(false);
            drop(guard);
            if hit_end && !looped {
                self.pool.halt(index);
            } else if stop_settled {
                self.pool.halt(index);
            }
        }

        // Step 3: reflections off the ambisonic accumulator's omni channel.
        self.reflections_scratch[..frames].copy_from_slice(&self.accumulator.audio().channel(0)[..frames]);
        let reflected = self.reflections.process(&self.reflections_scratch[..frames]);
        // Reflections are always first-order (4 channels); the main
        // accumulator may be higher-order, so add channel-by-channel into
        // the first 4 rather than using `BFormatBuffer::add_assign`, which
        // asserts matching order.
        for c in 0..reflected.audio().channel_count().min(self.accumulator.audio().channel_count()) {
            let src = reflected.audio().channel(c)[..frames].to_vec();
            for (dst, s) in self.accumulator.audio_mut().channel_mut(c)[..frames].iter_mut().zip(src.iter()) {
                *dst += *s;
            }
        }

        // Step 4: binauralize / ambisonic-decode into the master buffer.
        self.output_stage.decode(&self.accumulator, &mut self.master_out);
        for c in 0..self.master_out.channel_count().min(self.direct_accumulator.channel_count()) {
            let direct = self.direct_accumulator.channel(c)[..frames].to_vec();
            for (dst, s) in self.master_out.channel_mut(c)[..frames].iter_mut().zip(direct.iter()) {
                *dst += *s;
            }
        }

        // Step 5: master gain, then copy to the caller's buffer.
        self.master_gain.advance(block_duration_s);
        let master_gain_value = self.master_gain.value();
        output.clear();
        for c in 0..output.channel_count().min(self.master_out.channel_count()) {
            for i in 0..frames {
                output.channel_mut(c)[i] = self.master_out.channel(c)[i] * master_gain_value;
            }
        }

        tracing::debug!(frames, "mix block produced");
        MixResult { frames_produced: frames as u64 }
    }
}

/// Fills `rich.decode_scratch[..needed]`, pulling from `rich.decoder` in
/// `decode_read_scratch`-sized chunks (since `Decoder::read` always writes
/// starting at its output buffer's frame 0), wrapping to the start on a
/// short read when `looped`. Returns `(frames_actually_filled,
/// hit_end_without_wrap)`.
fn pull_decoded_frames(rich: &mut LayerRich, looped: bool, needed: usize) -> (usize, bool) {
    let mut produced = 0usize;
    let chunk_cap = rich.decode_read_scratch.frame_count();
    if chunk_cap == 0 {
        return (0, true);
    }
    while produced < needed {
        let want = (needed - produced).min(chunk_cap);
        let n = match rich.decoder.read(&mut rich.decode_read_scratch, want) {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(%err, "decoder read failed, halting layer");
                return (produced, true);
            }
        };
        let channels = rich.decode_scratch.channel_count().min(rich.decode_read_scratch.channel_count());
        for c in 0..channels {
            rich.decode_scratch.copy_from(c, produced, &rich.decode_read_scratch, c, 0, n);
        }
        produced += n;
        if n < want {
            if looped {
                if rich.decoder.seek(0).is_err() {
                    return (produced, true);
                }
                continue;
            }
            return (produced, true);
        }
    }
    (produced, false)
}

/// Builds the spatial geometry inputs (when the layer has both a listener
/// and an entity bound) and the attenuation-scaled combined gain (spec
/// §4.9 step 4) for one layer.
fn spatial_inputs(rich: &LayerRich, world: &WorldRegistry, combined_non_attenuation_gain: f32) -> (f32, Option<SpatialInputs>) {
    let (Some(listener_id), Some(entity_id)) = (rich.listener, rich.entity) else {
        return (combined_non_attenuation_gain, None);
    };
    let (Some(listener), Some(entity)) = (world.listener(listener_id), world.entity(entity_id)) else {
        return (combined_non_attenuation_gain, None);
    };
    let lt = listener.transform();
    let et = entity.transform();
    let distance = (lt.position - et.position).length();
    let local_point = et.position - lt.position;
    let attenuation_gain = match &rich.attenuation_asset {
        Some(a) => a.gain(distance, local_point),
        None => 1.0,
    };
    let spatial = SpatialInputs {
        source_position: et.position,
        source_velocity: et.velocity,
        source_forward: et.forward,
        source_up: et.up,
        source_directivity_alpha: 0.0,
        source_directivity_order: 1.0,
        listener_position: lt.position,
        listener_velocity: lt.velocity,
        listener_forward: lt.forward,
        listener_up: lt.up,
        listener_directivity_alpha: listener.directivity_alpha.load(),
        listener_directivity_order: listener.directivity_order.load(),
    };
    (attenuation_gain * combined_non_attenuation_gain, Some(spatial))
}

fn environment_memberships(rich: &LayerRich, world: &WorldRegistry) -> Vec<EnvironmentMembership> {
    let Some(entity_id) = rich.entity else { return Vec::new() };
    let Some(entity) = world.entity(entity_id) else { return Vec::new() };
    entity
        .environments_by_factor_desc()
        .into_iter()
        .filter_map(|(environment, factor)| {
            world
                .environment_effect(environment)
                .map(|effect| EnvironmentMembership { environment, factor, effect })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::PreloadedDecoder;
    use crate::handles::SoundAsset;

    struct SineSound {
        format: SoundFormat,
        samples: Vec<f32>,
    }

    impl SoundAsset for SineSound {
        fn id(&self) -> AmSoundID {
            AmSoundID(1)
        }
        fn format(&self) -> SoundFormat {
            self.format
        }
        fn open(&self) -> Box<dyn Decoder> {
            Box::new(PreloadedDecoder::new(
                self.format,
                AudioBuffer::from_channels(vec![self.samples.clone()]),
            ))
        }
    }

    fn test_config(block_size: usize) -> AmplimixConfig {
        AmplimixConfig {
            sample_rate: 48000,
            block_size,
            layer_capacity: 8,
            command_queue_capacity: 64,
            command_queue_policy: FullPolicy::Drop,
            ambisonic_order: Order::First,
            ambisonic_mode: Mode::ThreeD,
            output_stage: OutputStageConfig::SpeakerDecode {
                speaker_directions: vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)],
            },
            bus_defs: vec![BusDef { name: "master".into(), static_gain: 1.0, parent: None, duck_sources: vec![] }],
            obstruction_occlusion_curves: flat_curves(),
            doppler: DopplerParams::default(),
            reflections_room: RoomParameters {
                walls: [amplimix_spatial::reflections::WallMaterial { reflection_coefficient: 0.0, distance_m: 5.0 }; 6],
                hf_absorption_cutoff_hz: 5000.0,
            },
            reflections_max_delay_frames: 4800,
            direct_channels: 2,
            pause_fade_seconds: 0.01,
            master_gain_initial: 1.0,
        }
    }

    fn flat_curves() -> ObstructionOcclusionCurves {
        use amplimix_dsp::{ControlPoint, Curve, FaderShape};
        let flat = |y: f32| Curve::new(vec![
            ControlPoint { x: 0.0, y, shape: FaderShape::Linear },
            ControlPoint { x: 1.0, y, shape: FaderShape::Linear },
        ]);
        ObstructionOcclusionCurves {
            obstruction_lpf_curve: flat(0.0),
            obstruction_gain_curve: flat(1.0),
            occlusion_lpf_curve: flat(0.0),
            occlusion_gain_curve: flat(1.0),
        }
    }

    #[test]
    fn silent_engine_produces_a_zeroed_block() {
        let mut engine = Amplimix::new(test_config(64)).unwrap();
        let mut out = AudioBuffer::new(64, 2);
        let result = engine.mix(&mut out, 64);
        assert_eq!(result.frames_produced, 64);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn non_spatialized_unity_sine_passes_through_at_unity_gain() {
        let mut engine = Amplimix::new(test_config(64)).unwrap();
        let handle = engine.handle();
        let samples: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.05).sin()).collect();
        let sound = SineSound {
            format: SoundFormat { sample_rate: 48000, channel_count: 1, frame_count: Some(samples.len() as u64) },
            samples,
        };
        let token = handle.play(PlayParams {
            sound: &sound,
            bus: AmBusID(0),
            listener: None,
            entity: None,
            attenuation: None,
            gain: 1.0,
            pan: 0.0,
            pitch: 1.0,
            play_speed: 1.0,
            looped: false,
            spatialized: false,
        });
        assert!(!token.is_sentinel());

        let mut out = AudioBuffer::new(64, 2);
        let mut produced_any_signal = false;
        for _ in 0..4 {
            engine.mix(&mut out, 64);
            if out.channel(0).iter().any(|&s| s.abs() > 1e-6) {
                produced_any_signal = true;
            }
        }
        assert!(produced_any_signal);
    }

    #[test]
    fn saturated_pool_play_returns_sentinel() {
        let mut engine = Amplimix::new(test_config(64)).unwrap();
        let handle = engine.handle();
        let samples = vec![0.0f32; 16];
        let sound = SineSound {
            format: SoundFormat { sample_rate: 48000, channel_count: 1, frame_count: Some(samples.len() as u64) },
            samples,
        };
        let mut last = LayerToken::sentinel();
        for _ in 0..8 {
            last = handle.play(PlayParams {
                sound: &sound,
                bus: AmBusID(0),
                listener: None,
                entity: None,
                attenuation: None,
                gain: 1.0,
                pan: 0.0,
                pitch: 1.0,
                play_speed: 1.0,
                looped: true,
                spatialized: false,
            });
            assert!(!last.is_sentinel());
        }
        let overflow = handle.play(PlayParams {
            sound: &sound,
            bus: AmBusID(0),
            listener: None,
            entity: None,
            attenuation: None,
            gain: 1.0,
            pan: 0.0,
            pitch: 1.0,
            play_speed: 1.0,
            looped: true,
            spatialized: false,
        });
        assert!(overflow.is_sentinel());
        let _ = engine.mix(&mut AudioBuffer::new(64, 2), 64);
    }
}
