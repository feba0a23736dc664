//! # parley-store
//!
//! Durable storage for the Parley messenger, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers for every persisted
//! entity, plus [`StateFlush`] for writing the result of one inbound pass in
//! a single transaction.

pub mod chats;
pub mod contacts;
pub mod database;
pub mod flush;
pub mod installations;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod pins;
pub mod raw_messages;
pub mod settings;
pub mod transactions;
pub mod wallet;

mod columns;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use flush::StateFlush;
pub use models::*;
pub use settings::StoredSetting;
