use std::sync::{atomic::{AtomicU64, Ordering}, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{AudioBackend, BackendError, DeviceInfo, DiagnosticEvent, DiagnosticsCb, RenderFn};

/// `cpal`-backed [`AudioBackend`]. The public handle is `Send`-safe; the
/// `cpal::Stream` itself (which is not `Send` on some hosts) stays on a
/// dedicated worker thread that owns the device for the stream's lifetime
/// and talks back to the handle only through atomics and a control channel.
pub struct CpalAudioBackend {
    inner: Arc<CpalBackendInner>,
}

struct CpalBackendInner {
    info: DeviceInfo,
    render: Arc<Mutex<Option<RenderFn>>>,
    frames: AtomicU64,
    ctrl_tx: Sender<CtrlMsg>,
}

enum CtrlMsg {
    SetRender(Option<RenderFn>),
    Start,
    Stop,
    SetDiagnostics(Option<DiagnosticsCb>),
    Shutdown,
}

impl CpalAudioBackend {
    pub fn new() -> Result<Self, BackendError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(BackendError::DeviceNotFound)?;
        let device_name = device.name().ok();

        let mut supported_configs: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| BackendError::Other(e.to_string()))?
            .collect();
        if supported_configs.is_empty() {
            return Err(BackendError::UnsupportedFormat("no supported output configs".into()));
        }

        let chosen = supported_configs
            .iter()
            .rev()
            .find(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2)
            .cloned()
            .unwrap_or_else(|| supported_configs.pop().unwrap());
        let config = chosen.with_max_sample_rate().config();

        let buffer_frames = match config.buffer_size {
            cpal::BufferSize::Fixed(n) => n as usize,
            cpal::BufferSize::Default => 0,
        };

        let info = DeviceInfo {
            sample_rate: config.sample_rate.0,
            buffer_size: buffer_frames,
            channels: config.channels as u16,
            device_name,
        };

        let (ctrl_tx, ctrl_rx) = unbounded::<CtrlMsg>();
        let inner = Arc::new(CpalBackendInner {
            info,
            render: Arc::new(Mutex::new(None)),
            frames: AtomicU64::new(0),
            ctrl_tx,
        });

        let worker_inner = inner.clone();
        thread::spawn(move || worker_loop(device, config, ctrl_rx, worker_inner));

        Ok(Self { inner })
    }
}

impl Drop for CpalAudioBackend {
    fn drop(&mut self) {
        let _ = self.inner.ctrl_tx.send(CtrlMsg::Shutdown);
    }
}

fn worker_loop(device: Device, config: StreamConfig, ctrl_rx: Receiver<CtrlMsg>, inner: Arc<CpalBackendInner>) {
    let channels = config.channels as usize;
    let mut diagnostics: Option<DiagnosticsCb> = None;
    let mut stream: Option<cpal::Stream> = None;

    loop {
        while let Ok(msg) = ctrl_rx.try_recv() {
            match msg {
                CtrlMsg::SetRender(opt) => *inner.render.lock().unwrap() = opt,
                CtrlMsg::Start => {
                    if stream.is_none() {
                        stream = build_stream(&device, &config, channels, &inner, diagnostics.clone());
                    }
                }
                CtrlMsg::Stop => stream = None,
                CtrlMsg::SetDiagnostics(cb) => diagnostics = cb,
                CtrlMsg::Shutdown => return,
            }
        }
        thread::sleep(Duration::from_millis(2));
    }
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    inner: &Arc<CpalBackendInner>,
    diagnostics: Option<DiagnosticsCb>,
) -> Option<cpal::Stream> {
    let sample_rate = config.sample_rate.0;
    let data_inner = inner.clone();
    let data_cb = move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
        let render = data_inner.render.lock().unwrap().clone();
        let frames = data.len() / channels;
        let filled = render
            .as_ref()
            .map(|r| std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (r)(data, sample_rate, frames))).is_ok())
            .unwrap_or(false);
        if !filled {
            data.iter_mut().for_each(|s| *s = 0.0);
        }
        data_inner.frames.fetch_add(frames as u64, Ordering::Relaxed);
    };

    let err_diagnostics = diagnostics.clone();
    let err_cb = move |err| {
        tracing::error!(%err, "cpal stream error");
        if let Some(cb) = &err_diagnostics {
            let cb = cb.clone();
            thread::spawn(move || cb(DiagnosticEvent::XRun { count: 1 }));
        }
    };

    match device.build_output_stream(config, data_cb, err_cb, None) {
        Ok(s) => match s.play() {
            Ok(()) => Some(s),
            Err(e) => {
                tracing::error!(%e, "failed to start cpal stream");
                None
            }
        },
        Err(e) => {
            tracing::error!(%e, "failed to build cpal stream");
            if let Some(cb) = diagnostics {
                thread::spawn(move || cb(DiagnosticEvent::Other(format!("stream build failed: {e}"))));
            }
            None
        }
    }
}

impl AudioBackend for CpalAudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError> {
        self.inner
            .ctrl_tx
            .send(CtrlMsg::SetRender(Some(render)))
            .map_err(|_| BackendError::Other("worker thread gone".into()))?;
        self.inner
            .ctrl_tx
            .send(CtrlMsg::Start)
            .map_err(|_| BackendError::Other("worker thread gone".into()))
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.inner
            .ctrl_tx
            .send(CtrlMsg::Stop)
            .map_err(|_| BackendError::Other("worker thread gone".into()))?;
        self.inner.ctrl_tx.send(CtrlMsg::SetRender(None)).ok();
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.inner.info.sample_rate
    }
    fn buffer_size(&self) -> usize {
        self.inner.info.buffer_size
    }
    fn channels(&self) -> u16 {
        self.inner.info.channels
    }
    fn frames_since_start(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }
    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>) {
        self.inner.ctrl_tx.send(CtrlMsg::SetDiagnostics(cb)).ok();
    }
    fn as_device_info_provider(&self) -> Option<&dyn crate::DeviceInfoProvider> {
        None
    }
}
