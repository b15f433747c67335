//! Reveille storage crate: SQLite persistence for alarms and reminders.
//!
//! Provides a WAL-mode SQLite database with migrations and an
//! `ItemPersistence` implementation backed by it.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::SqliteItemStore;
