//! Microphone capture
//!
//! Each capture owns a dedicated thread that keeps the cpal input stream
//! alive. The stream callback pushes frames into a `FrameQueue`; the mixer
//! reads them through a `MicInput`. Stopping joins the thread, which drops
//! the stream and releases the hardware handle.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{create_frame_queue, AudioFrame, FrameReader, SharedFrameQueue};
use crate::audio::device::resolve_input_device;
use crate::config::CaptureConfig;
use crate::constants::MIC_QUEUE_CAPACITY;
use crate::error::{AudioError, DeviceError};

/// Mute and volume shared between the control side and the mixer
#[derive(Debug)]
pub struct CaptureControls {
    muted: AtomicBool,
    volume: AtomicU32,
}

impl CaptureControls {
    pub fn new() -> Self {
        Self {
            muted: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Linear input volume, clamped to 0.0..=2.0
    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 2.0).to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Acquire))
    }
}

impl Default for CaptureControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Mixer-side reader for captured mic audio
pub struct MicInput {
    reader: FrameReader,
    controls: Arc<CaptureControls>,
}

impl MicInput {
    pub fn new(queue: SharedFrameQueue, controls: Arc<CaptureControls>) -> Self {
        Self {
            reader: FrameReader::new(queue),
            controls,
        }
    }

    /// Fill `out` (interleaved stereo) with the next block of mic audio
    ///
    /// Muted input is still consumed so unmuting does not replay stale audio.
    pub fn read(&mut self, out: &mut [f32]) {
        self.reader.read_stereo(out);
        if self.controls.is_muted() {
            out.fill(0.0);
            return;
        }
        let volume = self.controls.volume();
        if (volume - 1.0).abs() > f32::EPSILON {
            for sample in out.iter_mut() {
                *sample *= volume;
            }
        }
    }
}

/// Capture from one input device
/// The mic lane is mixed without resampling, so it must run at the engine rate
pub fn ensure_engine_rate(capture_rate: u32, engine_rate: u32) -> Result<(), AudioError> {
    if capture_rate != engine_rate {
        return Err(AudioError::UnsupportedFormat(format!(
            "mic captures at {} Hz but the engine runs at {} Hz",
            capture_rate, engine_rate
        )));
    }
    Ok(())
}

pub struct MicCapture {
    device_id: String,
    running: Arc<AtomicBool>,
    controls: Arc<CaptureControls>,
    output: SharedFrameQueue,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<DeviceError>>,
    sequence: Arc<AtomicU32>,
    samples_captured: Arc<AtomicU64>,
    config: StreamConfig,
    settings: CaptureConfig,
}

impl MicCapture {
    /// Resolve the configured device and prepare a stream config
    pub fn new(settings: &CaptureConfig) -> Result<Self, AudioError> {
        let device = resolve_input_device(&settings.device)?;

        if !device.supports(settings.sample_rate, settings.channels) {
            let fallback = device.default_config()?;
            tracing::warn!(
                "Input device {} does not advertise {} Hz x{}; default is {} Hz x{}",
                device.name,
                settings.sample_rate,
                settings.channels,
                fallback.sample_rate().0,
                fallback.channels()
            );
        }

        let config = StreamConfig {
            channels: settings.channels,
            sample_rate: cpal::SampleRate(settings.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device_id: device.id(),
            running: Arc::new(AtomicBool::new(false)),
            controls: Arc::new(CaptureControls::new()),
            output: create_frame_queue(MIC_QUEUE_CAPACITY),
            thread_handle: None,
            error_rx: None,
            sequence: Arc::new(AtomicU32::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            config,
            settings: settings.clone(),
        })
    }

    /// Open the input stream and start capturing
    ///
    /// Returns once the stream is running or has failed to open.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.log_processing_hints();

        let device = resolve_input_device(&self.device_id)?;
        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let output = self.output.clone();
        let sequence = self.sequence.clone();
        let samples_captured = self.samples_captured.clone();
        let config = self.config.clone();
        let channels = self.config.channels;

        self.sequence.store(0, Ordering::SeqCst);
        self.samples_captured.store(0, Ordering::SeqCst);
        self.output.clear();
        let start_time = Instant::now();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        let timestamp = start_time.elapsed().as_micros() as u64;
                        let seq = sequence.fetch_add(1, Ordering::Relaxed);
                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);
                        output.push(AudioFrame::new(data.to_vec(), channels, timestamp, seq));
                    },
                    move |err| {
                        let _ = error_tx.try_send(DeviceError::Capture(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        running_for_loop.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    running_for_loop.store(false, Ordering::SeqCst);
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, releasing the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                tracing::info!("Mic capture started on {}", self.device_id);
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StreamError("capture stream did not start".to_string()))
            }
        }
    }

    /// Stop capturing and release the device
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Mic capture stopped on {}", self.device_id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.controls.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.controls.is_muted()
    }

    pub fn set_volume(&self, volume: f32) {
        self.controls.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.controls.volume()
    }

    /// Reader for the mixer's mic lane
    pub fn input(&self) -> MicInput {
        MicInput::new(self.output.clone(), self.controls.clone())
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> usize {
        self.output.dropped_count()
    }

    /// Next pending device error, if any
    pub fn check_errors(&self) -> Option<DeviceError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    /// cpal exposes no echo/noise/gain processing switches; the request is
    /// recorded so platforms that apply them at the OS level can be checked.
    fn log_processing_hints(&self) {
        if self.settings.echo_cancellation || self.settings.noise_suppression || self.settings.auto_gain {
            tracing::debug!(
                "Capture hints for {}: echo_cancellation={} noise_suppression={} auto_gain={} (left to the OS input pipeline)",
                self.device_id,
                self.settings.echo_cancellation,
                self.settings.noise_suppression,
                self.settings.auto_gain
            );
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
