//! `db` crate: pure persistence layer.
//!
//! Provides typed row structs, per-table query functions and the
//! [`Repository`] trait the engine persists through, with a Postgres and an
//! in-memory implementation. No business logic lives here.

pub mod error;
pub mod repository;
pub mod models;

pub use error::DbError;
pub use repository::{Repository, memory::MemoryRepository, postgres::{DbPool, PgRepository}};
