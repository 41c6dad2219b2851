//! Engine root
//!
//! `AudioEngine::new` builds the whole graph once and hands back its two
//! halves: the `AudioEngine` control root, owned by the application, and
//! the `EngineProcessor`, which moves into the output device callback.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::MixerConfig;
use crate::constants::MAX_BLOCK_FRAMES;
use crate::engine::command::DeckEvent;
use crate::engine::deck::{deck_pair, DeckId, DeckObserver, DeckPlayer, DeckVoice};
use crate::engine::mixer::{mixer_pair, MixerControl, MixerCore};
use crate::engine::splitter::{splitter, SharedTap, SplitterControl, SplitterCore};

/// Control root of the mixing engine
pub struct AudioEngine {
    sample_rate: u32,
    decks: [DeckPlayer; 2],
    mixer: MixerControl,
    splitter: SplitterControl,
    tap: SharedTap,
}

/// Audio callback side of the engine
///
/// Owns every real-time stage and all scratch buffers; `process` never
/// allocates, locks or blocks.
pub struct EngineProcessor {
    sample_rate: u32,
    voices: [DeckVoice; 2],
    mixer: MixerCore,
    splitter: SplitterCore,
    deck_a: Vec<f32>,
    deck_b: Vec<f32>,
    mic: Vec<f32>,
    master: Vec<f32>,
    monitor: Vec<f32>,
}

impl AudioEngine {
    pub fn new(sample_rate: u32, mixer_config: &MixerConfig) -> (Self, EngineProcessor) {
        let (player_a, voice_a) = deck_pair(DeckId::A, sample_rate);
        let (player_b, voice_b) = deck_pair(DeckId::B, sample_rate);
        let (mixer_control, mixer_core) = mixer_pair(sample_rate, mixer_config);
        let (splitter_control, splitter_core, tap) = splitter(sample_rate);

        let scratch = || vec![0.0f32; MAX_BLOCK_FRAMES * 2];
        let processor = EngineProcessor {
            sample_rate,
            voices: [voice_a, voice_b],
            mixer: mixer_core,
            splitter: splitter_core,
            deck_a: scratch(),
            deck_b: scratch(),
            mic: scratch(),
            master: scratch(),
            monitor: scratch(),
        };

        tracing::debug!("Audio engine built at {} Hz", sample_rate);

        let engine = Self {
            sample_rate,
            decks: [player_a, player_b],
            mixer: mixer_control,
            splitter: splitter_control,
            tap: Arc::new(Mutex::new(tap)),
        };
        (engine, processor)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn deck(&self, id: DeckId) -> &DeckPlayer {
        &self.decks[id.index()]
    }

    pub fn deck_mut(&mut self, id: DeckId) -> &mut DeckPlayer {
        &mut self.decks[id.index()]
    }

    pub fn deck_observers(&self) -> [DeckObserver; 2] {
        [self.decks[0].observer(), self.decks[1].observer()]
    }

    pub fn mixer(&self) -> &MixerControl {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut MixerControl {
        &mut self.mixer
    }

    pub fn splitter(&self) -> &SplitterControl {
        &self.splitter
    }

    /// Consumer end of the broadcast tap, shared with stream sessions
    pub fn broadcast_tap(&self) -> SharedTap {
        self.tap.clone()
    }

    /// Drain deck events and release objects retired by the audio side
    pub fn poll_events(&mut self) -> Vec<(DeckId, DeckEvent)> {
        self.mixer.poll();
        let mut events = Vec::new();
        for deck in self.decks.iter_mut() {
            let id = deck.id();
            events.extend(deck.poll_events().into_iter().map(|event| (id, event)));
        }
        events
    }
}

impl EngineProcessor {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Render into a device buffer with `channels` interleaved channels
    ///
    /// Mono devices get the L/R average; channels past the second are
    /// silent.
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            out.fill(0.0);
            return;
        }
        let total_frames = out.len() / channels;
        let mut done = 0;

        while done < total_frames {
            let frames = (total_frames - done).min(MAX_BLOCK_FRAMES);
            let n = frames * 2;

            let [voice_a, voice_b] = &mut self.voices;
            voice_a.render(&mut self.deck_a[..n]);
            voice_b.render(&mut self.deck_b[..n]);
            self.mixer.process(
                &mut self.deck_a[..n],
                &mut self.deck_b[..n],
                &mut self.mic[..n],
                &mut self.master[..n],
            );
            self.splitter.process(&self.master[..n], &mut self.monitor[..n]);

            let dst = &mut out[done * channels..(done + frames) * channels];
            for (frame, src) in dst.chunks_exact_mut(channels).zip(self.monitor[..n].chunks_exact(2)) {
                if channels == 1 {
                    frame[0] = (src[0] + src[1]) * 0.5;
                } else {
                    frame[0] = src[0];
                    frame[1] = src[1];
                    frame[2..].fill(0.0);
                }
            }
            done += frames;
        }

        // Trailing partial frame, if the host ever hands one over
        out[total_frames * channels..].fill(0.0);
    }

    /// Stereo convenience for tests and offline rendering
    pub fn process_stereo(&mut self, out: &mut [f32]) {
        self.process(out, 2);
    }
}
