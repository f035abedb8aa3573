//! Direction-sensing relay engine.
//!
//! This module provides:
//! - Endpoint probing to discover which side is currently bound
//! - A mode controller that decides, each cycle, which side to listen on
//! - An accept loop that pairs every inbound connection with an outbound
//!   dial and the appropriate TLS role
//! - The per-connection bidirectional byte pump
//!
//! ## Architecture
//!
//! ```text
//! ModeController -(probe both endpoints)-> RelayMode
//!       |
//!       v (at most one listener at a time)
//! RelayListener -> dial opposite endpoint -> StreamWrap (TLS role)
//!       |
//!       v
//! ConnectionPair: two pump directions over a plaintext leg and a TLS leg
//! ```

mod controller;
mod listener;
mod probe;
mod pump;
mod stream;

pub use controller::{ModeController, RelayMode};
pub use listener::RelayListener;
pub use probe::{probe, CONNECT_TIMEOUT};
pub use pump::{ConnectionPair, RELAY_BUFFER_SIZE};
pub use stream::{RelayStream, StreamWrap};
