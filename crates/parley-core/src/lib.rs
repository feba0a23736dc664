//! # parley-core
//!
//! Sync and reconciliation core of the Parley messenger.
//!
//! A [`Messenger`] owns the in-memory chat, contact and installation stores
//! backed by a [`parley_store::Database`], and talks to the outside world
//! through two collaborators: a [`Transport`] that moves sealed bytes and an
//! [`EncryptionLayer`] that seals and opens them. Inbound batches are merged
//! with clock-gated handlers; user actions stamp their payloads with the
//! logical clock and hand them to the dispatcher.

mod actions;
pub mod clock;
pub mod config;
mod dispatcher;
pub mod encryption;
pub mod entity_store;
pub mod error;
pub mod group;
mod handlers;
pub mod loops;
pub mod messenger;
pub mod response;
pub mod sealer;
pub mod settle;
mod state;
mod sync;
pub mod transport;
pub mod wallet;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testkit;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use config::MessengerConfig;
pub use encryption::{EncryptionLayer, SignedEnvelopeCodec};
pub use error::CoreError;
pub use loops::{spawn_background_loops, LoopHandles};
pub use messenger::{Collaborators, Messenger};
pub use response::MessengerResponse;
pub use transport::{Envelope, MemoryNetwork, MemoryTransport, Transport};
pub use wallet::{BalanceSource, FixedBalances};
