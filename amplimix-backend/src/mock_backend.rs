use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{AudioBackend, BackendError, DeviceInfo, DeviceInfoProvider, DiagnosticsCb, RenderFn};

/// A backend that never touches real hardware: `start` just stashes the
/// render callback, and tests drive it themselves by calling
/// [`MockAudioBackend::pull`]. Used in CI and in any test that needs a
/// deterministic, headless stand-in for [`crate::cpal_backend::CpalAudioBackend`].
pub struct MockAudioBackend {
    info: DeviceInfo,
    render: Arc<Mutex<Option<RenderFn>>>,
    frames: AtomicU64,
    diagnostics: Option<DiagnosticsCb>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self::with_info(DeviceInfo {
            sample_rate: 48_000,
            buffer_size: 256,
            channels: 2,
            device_name: Some("mock-device".to_string()),
        })
    }

    pub fn with_info(info: DeviceInfo) -> Self {
        Self {
            info,
            render: Arc::new(Mutex::new(None)),
            frames: AtomicU64::new(0),
            diagnostics: None,
        }
    }

    /// Drives the stored render callback as if the device had produced a
    /// callback for `data`, and advances the frame counter. Returns `false`
    /// (and zero-fills `data`) if no render callback is currently set.
    pub fn pull(&self, data: &mut [f32]) -> bool {
        let render = self.render.lock().unwrap().clone();
        let channels = self.info.channels.max(1) as usize;
        match render {
            Some(r) => {
                r(data, self.info.sample_rate, data.len() / channels);
                self.frames.fetch_add((data.len() / channels) as u64, Ordering::Relaxed);
                true
            }
            None => {
                data.iter_mut().for_each(|s| *s = 0.0);
                false
            }
        }
    }
}

impl Default for MockAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockAudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError> {
        *self.render.lock().unwrap() = Some(render);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        *self.render.lock().unwrap() = None;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }
    fn buffer_size(&self) -> usize {
        self.info.buffer_size
    }
    fn channels(&self) -> u16 {
        self.info.channels
    }
    fn frames_since_start(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>) {
        self.diagnostics = cb;
    }
    fn as_device_info_provider(&self) -> Option<&dyn DeviceInfoProvider> {
        Some(self)
    }
}

impl DeviceInfoProvider for MockAudioBackend {
    fn get_device_name(&self) -> Option<&str> {
        self.info.device_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_without_render_zero_fills() {
        let backend = MockAudioBackend::new();
        let mut buf = vec![1.0f32; 8];
        assert!(!backend.pull(&mut buf));
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn start_then_pull_invokes_render() {
        let mut backend = MockAudioBackend::new();
        backend
            .start(Arc::new(|buf: &mut [f32], _sr, _frames| buf.iter_mut().for_each(|s| *s = 0.5)))
            .unwrap();
        let mut buf = vec![0.0f32; 4];
        assert!(backend.pull(&mut buf));
        assert!(buf.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(backend.frames_since_start(), 2);
    }

    #[test]
    fn stop_clears_render() {
        let mut backend = MockAudioBackend::new();
        backend.start(Arc::new(|buf: &mut [f32], _sr, _frames| buf.iter_mut().for_each(|s| *s = 1.0))).unwrap();
        backend.stop().unwrap();
        let mut buf = vec![1.0f32; 4];
        assert!(!backend.pull(&mut buf));
        assert!(buf.iter().all(|&s| s == 0.0));
    }
}
