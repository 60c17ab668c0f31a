//! Download Engine - the heart of DLGate
//!
//! This module implements the concurrent download core:
//! - A registry of transfer units keyed by opaque id
//! - A counting admission gate capping concurrent transfers
//! - Cooperative pause/cancel checked at 8 KiB chunk boundaries
//! - A transport seam so the network layer can be swapped out

mod manager;
mod stop;
mod transfer;
mod transport;

pub use manager::*;
pub use stop::*;
pub use transfer::*;
pub use transport::*;
