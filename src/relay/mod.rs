//! Relay core - translates messages between language channels.

pub mod engine;
pub mod events;
pub mod guard;
pub mod limiter;
pub mod provenance;
pub mod registry;
pub mod sweeper;
pub mod transport;

pub use engine::{Disposition, FanoutReport, GlobalBroadcast, GlobalRateLimit, RelayEngine, RelaySettings};
pub use events::{ChannelSink, EventSink, MemorySink, RelayEvent, TracingSink};
pub use guard::LoopGuard;
pub use limiter::RateLimiter;
pub use registry::{ChannelRegistry, GlobalChannel, LanguageChannel};
pub use sweeper::Sweeper;
pub use transport::{
    Author, InboundMessage, MessageId, OutboundKind, OutboundMessage, TranslateError, Translation, Translator,
    Transport, TransportError,
};
