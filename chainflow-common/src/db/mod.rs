//! Database initialization shared by chainflow crates

pub mod init;

pub use init::{init_database, init_tables};
