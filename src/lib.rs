//! `muttlearn` learns how you write to people from the mail you sent.
//!
//! Every sent message is reduced to a small attribute record (sender,
//! signature, greeting, goodbye, language, charset). Records are kept in an
//! incremental cache keyed by Message-ID and folded into per-recipient-set
//! statistics, weighted by message age.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod scan;
pub mod store;
