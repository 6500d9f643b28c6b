//! Data Transfer Objects for admin API responses.

pub mod connection_dto;
pub mod system_dto;

pub use connection_dto::*;
pub use system_dto::*;
