//! # herald-store
//!
//! Transactional entity store for herald, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for users, groups,
//! broadcasts, delivery attempts and conversation messages. Multi-row writes
//! run inside [`Database::transaction`].

pub mod broadcasts;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
