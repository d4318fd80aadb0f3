//! Mail parsing: mailbox splitting, header and MIME decoding, body
//! segmentation, and the per-message pipeline built on top of them.

pub mod body;
pub mod eml;
pub mod header;
pub mod language;
pub mod mbox;
pub mod message;
pub mod mime;
pub mod segment;
