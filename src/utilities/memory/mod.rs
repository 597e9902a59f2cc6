//! Identifier management for arena-style storage.

pub mod id_pool;

pub use id_pool::IdPool;
