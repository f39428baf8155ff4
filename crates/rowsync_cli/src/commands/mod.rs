//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod order;
pub mod verify;
