//! Result type aliases for LexFlow.

use crate::LexError;

/// A specialized `Result` type for LexFlow operations.
pub type LexResult<T> = Result<T, LexError>;

/// A boxed future returning a `LexResult`.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = LexResult<T>> + Send + 'a>>;
