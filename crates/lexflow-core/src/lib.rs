//! # LexFlow Core
//!
//! Shared error and result types for the LexFlow job engine. Every crate in
//! the workspace reports failures through [`LexError`] so that HTTP mapping,
//! retry classification, and logging stay consistent across layers.

pub mod error;
pub mod result;

pub use error::*;
pub use result::*;
