//! Memo Module
//!
//! Function memoization over the cache: argument canonicalization, key
//! derivation, and the [`Memoized`] wrapper.

mod canonical;
mod key;
mod memoize;

pub use canonical::{CanonicalRepr, Canonicalize, Receiver, Repr, Stringified};
pub use key::{CallArgs, CallSignature, KeyBuilder};
pub use memoize::{memoize, memoize_in, MemoizeOptions, Memoized};
