//! Hubs shipped with the server.

pub mod identify;
pub mod ping;

pub use identify::IdentifyHub;
pub use ping::PingHub;
