//! CLI command implementations.

pub mod change;
pub mod init;
pub mod inspect;
pub mod repair;
pub mod transfer;
pub mod version;
