//! Relays chat messages between language-specific channels, translating each
//! message into every other configured language and mirroring originals into
//! a shared global channel.

pub mod config;
pub mod lease;
pub mod relay;
pub mod relay_log;
pub mod telegram;
pub mod translate;
