//! Mail stores the scanner reads from.

pub mod mailbox;
