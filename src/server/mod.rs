//! In-process emulated device server and its plugin seam.
//!
//! The server exists to drive the codec and the client state machine
//! without hardware: it accepts one connection, answers the handshake,
//! and delegates request parsing and response production to plugins.

mod emulator;
mod plugin;

pub use emulator::{DebugServer, ServerConfig, ServerEvent, ServerHandle};
pub use plugin::{
    BoxFuture, ClientConnectedEvent, ProvideRequestEvent, ProvideResponseEvent, SendResponseEvent,
    ServerMessage, ServerPlugin, StandardRequestParser,
};
