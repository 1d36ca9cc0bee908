//! Thin driver program exercising the whole `amplimix` stack: opens the
//! platform audio device, plays a spatialized tone bound to a listener and
//! an entity, and lets arrow keys move the listener around the entity in
//! real time so the ambisonic panning/attenuation pipeline is audible.

use std::io::{stdout, Write};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::{terminal, ExecutableCommand};
use glam::Vec3;

use amplimix_backend::mixer_adapter::MixerAdapter;
use amplimix_backend::create_audio_backend;
use amplimix_buffer::AudioBuffer;
use amplimix_dsp::{ControlPoint, Curve, FaderShape};
use amplimix_mixer::commands::FullPolicy;
use amplimix_mixer::decoder::{Decoder, PreloadedDecoder};
use amplimix_mixer::handles::{AmBusID, AmSoundID, SoundAsset, SoundFormat};
use amplimix_mixer::orchestrator::{OutputStageConfig, PlayParams};
use amplimix_mixer::processor::{DopplerParams, ObstructionOcclusionCurves};
use amplimix_mixer::{Amplimix, AmplimixConfig, BusDef};
use amplimix_spatial::ambisonics::{Mode, Order};
use amplimix_spatial::reflections::{RoomParameters, WallMaterial};

const SAMPLE_RATE: u32 = 48_000;
const BLOCK_FRAMES: usize = 512;
const TONE_FREQ_HZ: f32 = 440.0;

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
        Box::new(PreloadedDecoder::new(self.format, AudioBuffer::from_channels(vec![self.samples.clone()])))
    }
}

fn flat_curve(y: f32) -> Curve {
    Curve::new(vec![
        ControlPoint { x: 0.0, y, shape: FaderShape::Linear },
        ControlPoint { x: 1.0, y, shape: FaderShape::Linear },
    ])
}

fn build_engine() -> Amplimix {
    Amplimix::new(AmplimixConfig {
        sample_rate: SAMPLE_RATE,
        block_size: BLOCK_FRAMES,
        layer_capacity: 64,
        command_queue_capacity: 256,
        command_queue_policy: FullPolicy::Drop,
        ambisonic_order: Order::First,
        ambisonic_mode: Mode::ThreeD,
        output_stage: OutputStageConfig::SpeakerDecode {
            speaker_directions: vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)],
        },
        bus_defs: vec![BusDef { name: "master".into(), static_gain: 1.0, parent: None, duck_sources: vec![] }],
        obstruction_occlusion_curves: ObstructionOcclusionCurves {
            obstruction_lpf_curve: flat_curve(0.0),
            obstruction_gain_curve: flat_curve(1.0),
            occlusion_lpf_curve: flat_curve(0.0),
            occlusion_gain_curve: flat_curve(1.0),
        },
        doppler: DopplerParams::default(),
        reflections_room: RoomParameters {
            walls: [WallMaterial { reflection_coefficient: 0.0, distance_m: 5.0 }; 6],
            hf_absorption_cutoff_hz: 8000.0,
        },
        reflections_max_delay_frames: SAMPLE_RATE as usize / 10,
        direct_channels: 2,
        pause_fade_seconds: 0.05,
        master_gain_initial: 1.0,
    })
    .expect("engine configuration is valid")
}

fn tone_sound() -> SineSound {
    let seconds = 4.0;
    let frames = (SAMPLE_RATE as f32 * seconds) as usize;
    let samples: Vec<f32> = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * TONE_FREQ_HZ * i as f32 / SAMPLE_RATE as f32).sin() * 0.3)
        .collect();
    SineSound {
        format: SoundFormat { sample_rate: SAMPLE_RATE, channel_count: 1, frame_count: Some(frames as u64) },
        samples,
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let mut stdout = stdout();
    terminal::enable_raw_mode()?;
    stdout.execute(crossterm::cursor::Hide)?;
    stdout.execute(terminal::EnterAlternateScreen)?;

    let engine = build_engine();
    let adapter = MixerAdapter::new(engine, 2, BLOCK_FRAMES);

    let sound = tone_sound();
    let (listener, entity) = adapter.with_engine(|engine| {
        let handle = engine.handle();
        let listener = handle.register_listener();
        let entity = handle.register_entity();
        handle.set_listener_location(listener, Vec3::new(0.0, 1.6, 0.0), Vec3::ZERO);
        handle.set_listener_orientation(listener, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
        handle.set_entity_location(entity, Vec3::new(1.0, 1.6, 0.0), Vec3::ZERO);
        let token = handle.play(PlayParams {
            sound: &sound,
            bus: AmBusID(0),
            listener: Some(listener),
            entity: Some(entity),
            attenuation: None,
            gain: 1.0,
            pan: 0.0,
            pitch: 1.0,
            play_speed: 1.0,
            looped: true,
            spatialized: true,
        });
        debug_assert!(!token.is_sentinel(), "layer pool exhausted on a fresh engine");
        (listener, entity)
    });

    let mut backend = create_audio_backend().expect("failed to open an audio device");
    backend.start(adapter.render_fn()).expect("failed to start the audio stream");

    let mut listener_pos = Vec3::new(0.0, 1.6, 0.0);
    let target_frame = Duration::from_micros(16_667);

    'running: loop {
        while event::poll(Duration::from_millis(0))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if key.code == KeyCode::Esc || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)) {
                    break 'running;
                }
                match key.code {
                    KeyCode::Left => listener_pos.x -= 0.2,
                    KeyCode::Right => listener_pos.x += 0.2,
                    KeyCode::Up => listener_pos.z -= 0.2,
                    KeyCode::Down => listener_pos.z += 0.2,
                    _ => {}
                }
            }
        }

        adapter.with_engine(|engine| {
            engine.handle().set_listener_location(listener, listener_pos, Vec3::ZERO);
        });

        stdout.execute(terminal::Clear(terminal::ClearType::All))?;
        writeln!(stdout, "amplimix-cli")?;
        writeln!(stdout, "arrow keys move the listener; entity is fixed at (1.0, 1.6, 0.0); Esc/Ctrl+C exits")?;
        writeln!(stdout, "listener: x={:.2} y={:.2} z={:.2}", listener_pos.x, listener_pos.y, listener_pos.z)?;
        stdout.flush().ok();

        let frame_start = Instant::now();
        let elapsed = frame_start.elapsed();
        if elapsed < target_frame {
            std::thread::sleep(target_frame - elapsed);
        }
    }

    let _ = backend.stop();
    let _ = entity;
    stdout.execute(terminal::LeaveAlternateScreen)?;
    stdout.execute(crossterm::cursor::Show)?;
    terminal::disable_raw_mode()?;
    Ok(())
}
