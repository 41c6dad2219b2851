//! Output device stream driving the engine
//!
//! The output device's clock is the engine's clock: every cpal callback
//! hands its buffer to `EngineProcessor::process`, which renders decks,
//! mic, mixer and splitter in one pass. Like capture, the stream lives on
//! a dedicated thread because cpal streams are not `Send` on every host.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::resolve_output_device;
use crate::config::AudioConfig;
use crate::engine::EngineProcessor;
use crate::error::{AudioError, DeviceError};

/// Running output stream
pub struct OutputStream {
    device_id: String,
    running: Arc<AtomicBool>,
    callbacks: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<DeviceError>,
    config: StreamConfig,
}

impl OutputStream {
    /// Open the configured output device and start rendering `processor`
    pub fn open(settings: &AudioConfig, mut processor: EngineProcessor) -> Result<Self, AudioError> {
        let device = resolve_output_device(&settings.output_device)?;
        let default_config = device.default_config()?;
        let device_id = device.id();

        if processor.sample_rate() != settings.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "engine runs at {} Hz but output requested {} Hz",
                processor.sample_rate(),
                settings.sample_rate
            )));
        }

        let config = StreamConfig {
            channels: default_config.channels().max(1),
            sample_rate: cpal::SampleRate(settings.sample_rate),
            buffer_size: match settings.buffer_frames {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };

        let running = Arc::new(AtomicBool::new(true));
        let callbacks = Arc::new(AtomicU64::new(0));
        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running_for_loop = running.clone();
        let callback_count = callbacks.clone();
        let stream_config = config.clone();
        let channels = config.channels as usize;

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        processor.process(data, channels);
                        callback_count.fetch_add(1, Ordering::Relaxed);
                    },
                    move |err| {
                        let _ = error_tx.try_send(DeviceError::Output(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut output = Self {
            device_id,
            running,
            callbacks,
            thread_handle: Some(handle),
            error_rx,
            config,
        };

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                tracing::info!(
                    "Output stream started on {} ({} Hz, {} channels)",
                    output.device_id,
                    output.config.sample_rate.0,
                    output.config.channels
                );
                Ok(output)
            }
            Ok(Err(e)) => {
                output.stop();
                Err(e)
            }
            Err(_) => {
                output.stop();
                Err(AudioError::StreamError("output stream did not start".to_string()))
            }
        }
    }

    /// Tear the output path down; the engine processor goes with it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Output stream stopped on {}", self.device_id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread_handle.is_some()
    }

    /// Callbacks served so far
    pub fn callback_count(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn check_errors(&self) -> Option<DeviceError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}
