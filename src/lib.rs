//! # bsdebug
//!
//! Client/server core for the set-top-box script debugger wire protocol.
//!
//! The device exposes a TCP control channel speaking a little-endian,
//! length-prefixed binary protocol (handshake, request/response,
//! asynchronous updates), plus two text channels: an I/O port carrying
//! program output and a telnet shell used as a fallback command channel.
//!
//! - **Control Plane** ([`client`], [`protocol`]): binary frames, request
//!   bookkeeping by monotonically increasing ids, update dispatch
//! - **Telnet Plane** ([`telnet`]): a command queue over the line-oriented
//!   shell, serialized on its prompt
//! - **Emulation** ([`server`]): a single-connection server with a plugin
//!   seam, used to exercise the codec and session under test
//!
//! ## Example
//!
//! ```ignore
//! use bsdebug::{ClientConfig, DebugClient};
//!
//! #[tokio::main]
//! async fn main() -> bsdebug::Result<()> {
//!     let config = ClientConfig {
//!         host: "192.168.1.40".into(),
//!         ..ClientConfig::default()
//!     };
//!     let (client, mut events) = DebugClient::connect(config).await?;
//!     while let Some(event) = events.recv().await {
//!         // react to stops, thread attaches, program output...
//!     }
//!     Ok(())
//! }
//! ```

pub mod action_queue;
pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod telnet;
pub mod transport;

pub use client::{ClientConfig, ClientEvent, DebugClient, DebugSession};
pub use error::{DebugError, Result};
pub use server::{DebugServer, ServerConfig, ServerPlugin};
pub use telnet::{TelnetPipeline, TelnetShell};
