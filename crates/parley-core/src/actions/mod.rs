//! User-initiated operations.
//!
//! Each public method takes the state lock for its whole run, stamps its
//! payload with the next logical clock of the chat (or entity) it touches,
//! dispatches it, persists the outcome and reports the touched entities.
//! Shared steps live in `*_locked` helpers so one operation never re-enters
//! another through its public entry point.

mod chats;
mod contacts;
mod installations;
mod messages;
mod profile;
mod wallet;
