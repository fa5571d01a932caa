//! SQLite source catalog for catsync.
//!
//! Every attached database (`main` plus anything `ATTACH`ed) is a schema,
//! `sqlite_master` lists tables and views, and the `table_info` /
//! `foreign_key_list` pragmas supply columns and keys.

pub mod catalog;
pub mod config;
pub mod pool;

pub use catalog::SqliteSource;
pub use config::SqliteConfig;
pub use pool::SqlitePool;
