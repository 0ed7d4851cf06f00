use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vitalcall::media::{CaptureDevice, MediaDevices, MediaError, MediaFrame, TrackKind};

/// Capture devices that emit silence and count opens, stops and frames.
#[derive(Clone, Default)]
pub struct FakeDevices {
    denied: Arc<Mutex<HashSet<TrackKind>>>,
    missing: Arc<Mutex<HashSet<TrackKind>>>,
    opened: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
    frames: Arc<AtomicUsize>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user refuses access to `kind`.
    pub fn deny(self, kind: TrackKind) -> Self {
        self.denied.lock().insert(kind);
        self
    }

    /// No device of `kind` is plugged in.
    pub fn without(self, kind: TrackKind) -> Self {
        self.missing.lock().insert(kind);
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Frames read by senders so far, over all devices.
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

impl MediaDevices for FakeDevices {
    fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, MediaError> {
        if self.denied.lock().contains(&kind) {
            return Err(MediaError::PermissionDenied(kind));
        }
        if self.missing.lock().contains(&kind) {
            return Err(MediaError::DeviceUnavailable {
                kind,
                reason: "not connected".into(),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            kind,
            label: format!("fake {}", kind.device_name()),
            stopped: Arc::clone(&self.stopped),
            frames: Arc::clone(&self.frames),
        }))
    }
}

struct FakeDevice {
    kind: TrackKind,
    label: String,
    stopped: Arc<AtomicUsize>,
    frames: Arc<AtomicUsize>,
}

impl CaptureDevice for FakeDevice {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn read_frame(&mut self) -> Option<MediaFrame> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Some(MediaFrame::blank(self.kind))
    }

    fn stop(&mut self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}
