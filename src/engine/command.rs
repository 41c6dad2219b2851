//! Lock-free command and event queues between control and audio threads
//!
//! The control thread pushes commands into `rtrb` ring buffers; the audio
//! callback pops them at the start of each block, so a parameter change
//! lands on the next processed frame. Each deck has its own queue pair, so
//! the two decks share nothing on this path either.
//!
//! Everything that crosses from the audio thread back to the control thread
//! (ended events, retired sources, detached mic inputs) travels the other
//! way through the same kind of queue. The callback never frees memory.

use crate::audio::{AudioSource, MicInput, SourceId};
use crate::constants::{COMMAND_QUEUE_CAPACITY, EVENT_QUEUE_CAPACITY};
use crate::engine::effects::EffectSettings;
use crate::engine::eq::EqBand;
use crate::engine::mixer::{CrossfadeCurve, LaneId};

/// Transport commands for one deck
pub enum DeckCommand {
    /// Replace the current source; playback stops and time resets to 0
    Load(AudioSource),
    Unload,
    Play,
    Pause,
    /// Absolute position in seconds, already clamped by the control side
    Seek(f64),
    SetRate(f64),
    SetLoop(bool),
    SetMuted(bool),
}

/// A deck command tagged with its issue order
///
/// The voice publishes the highest sequence it has applied, which lets the
/// control side tell whether a readback already reflects a command.
pub struct DeckMessage {
    pub seq: u64,
    pub command: DeckCommand,
}

/// Events raised by a deck voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckEvent {
    /// Playback reached the end of `source_id` with looping off
    ///
    /// `pass` counts ends on this deck; a restart after an end raises the
    /// next one with a higher value.
    Ended { source_id: SourceId, pass: u64 },
}

/// Mixer parameter changes
pub enum MixerCommand {
    SetLaneGain { lane: LaneId, gain: f32 },
    SetLaneMuted { lane: LaneId, muted: bool },
    SetEq { lane: LaneId, band: EqBand, gain_db: f32 },
    SetEffect { lane: LaneId, settings: EffectSettings },
    /// 0.0 is full deck A, 1.0 is full deck B
    SetCrossfader(f32),
    SetCrossfadeCurve(CrossfadeCurve),
    SetMasterGain(f32),
    /// Boxed so the command stays small in the ring buffer
    AttachMic(Box<MicInput>),
    DetachMic,
}

pub type DeckCommandProducer = rtrb::Producer<DeckMessage>;
pub type DeckCommandConsumer = rtrb::Consumer<DeckMessage>;

pub fn deck_command_channel() -> (DeckCommandProducer, DeckCommandConsumer) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

pub fn deck_event_channel() -> (rtrb::Producer<DeckEvent>, rtrb::Consumer<DeckEvent>) {
    rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY)
}

pub fn mixer_command_channel() -> (rtrb::Producer<MixerCommand>, rtrb::Consumer<MixerCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Return path for objects the audio thread must not drop
///
/// Sized like the command queue: at most one retiree per command.
pub fn retire_channel<T>() -> (rtrb::Producer<T>, rtrb::Consumer<T>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deck_channel_preserves_order() {
        let (mut tx, mut rx) = deck_command_channel();
        for seq in 1..=3 {
            assert!(tx.push(DeckMessage { seq, command: DeckCommand::Play }).is_ok());
        }
        let seqs: Vec<u64> = std::iter::from_fn(|| rx.pop().ok()).map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_channel() {
        let (_tx, mut rx) = mixer_command_channel();
        assert!(rx.pop().is_err());
    }
}
