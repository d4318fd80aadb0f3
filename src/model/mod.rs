//! Core data model: addresses, scanned messages, and recipient statistics.

pub mod address;
pub mod message;
pub mod recipient;
pub mod weight;
