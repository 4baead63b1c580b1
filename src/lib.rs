//! Transactional color-scheme engine.
//!
//! Applies a [`ColorScheme`](scheme::ColorScheme) to many application
//! config files at once: colors are validated, mapped per target, rendered
//! (with an LRU/TTL render cache), and written through a rollback-capable
//! [`Transaction`](transaction::Transaction) after a snapshot backup.
//!
//! The public API is organised into layers:
//!
//! - **[`scheme`]**: color parsing, conversion, validation and per-target mapping
//! - **[`cache`]**: render cache and color conversion cache
//! - **[`handlers`]**: the [`ApplicationHandler`](handlers::ApplicationHandler) trait and its registry
//! - **[`transaction`]**: reversible operations, transactions and backups
//! - **[`engine`]**: bounded concurrent dispatch and the [`Engine`](engine::Engine) itself
//! - **[`commands`]**: top-level subcommand orchestration (`apply`, `validate`, `list`, `cache`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod fs;
pub mod handlers;
pub mod logging;
pub mod scheme;
pub mod transaction;
