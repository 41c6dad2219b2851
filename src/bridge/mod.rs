//! Encoder bridge: tap -> PCM chunks -> external encoder

#[allow(clippy::module_inception)]
pub mod bridge;
pub mod chunk;
pub mod packager;
pub mod queue;
pub mod session;
pub mod transport;

pub use bridge::{BridgeEvent, BridgeState, BridgeStats, BridgeStatus, EncoderBridge};
pub use chunk::EncodedChunk;
pub use packager::ChunkPackager;
pub use queue::{OutboundQueue, PushOutcome};
pub use session::{StreamEndpoints, StreamSession, StreamStatus, SyncReport, TapPump};
pub use transport::{EncoderTransport, ProcessConnector, ProcessTransport, TransportConnector};
