//! Database bootstrap shared by every crate in the workspace

pub mod init;
pub mod migrations;

pub use init::init_database;
