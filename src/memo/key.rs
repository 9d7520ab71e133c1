//! Key Module
//!
//! Derives cache keys from a function identity and its canonicalized
//! arguments: `"{prefix}:{sha256 hex}"`.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::memo::canonical::{Canonicalize, Repr, Stringified};

// == Call Signature ==
/// Canonicalized positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSignature {
    positional: Vec<CanonicalArg>,
    keyword: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
struct CanonicalArg {
    value: Value,
    opaque: bool,
}

impl CallSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describes an argument pack.
    pub fn of<A: CallArgs + ?Sized>(args: &A) -> Self {
        let mut call = Self::new();
        args.describe(&mut call);
        call
    }

    /// Appends a positional argument.
    pub fn arg<T: Canonicalize + ?Sized>(&mut self, value: &T) -> &mut Self {
        self.positional.push(CanonicalArg {
            value: value.canonicalize(),
            opaque: value.is_opaque(),
        });
        self
    }

    /// Sets a keyword argument. Keyword order never affects the key.
    pub fn kwarg<T: Canonicalize + ?Sized>(&mut self, name: &str, value: &T) -> &mut Self {
        self.keyword.insert(name.to_string(), value.canonicalize());
        self
    }

    /// Number of positional arguments.
    pub fn arity(&self) -> usize {
        self.positional.len()
    }
}

// == Call Args ==
/// An argument pack that can describe itself to the key builder.
///
/// Implemented for `()`, tuples of up to eight [`Canonicalize`] values, and
/// single canonicalizable values. Request structs with named fields
/// implement it by hand, usually with [`CallSignature::kwarg`].
pub trait CallArgs {
    fn describe(&self, call: &mut CallSignature);
}

impl CallArgs for () {
    fn describe(&self, _call: &mut CallSignature) {}
}

impl CallArgs for CallSignature {
    fn describe(&self, call: &mut CallSignature) {
        call.positional.extend(self.positional.iter().cloned());
        call.keyword
            .extend(self.keyword.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

impl<T: CallArgs + ?Sized> CallArgs for &T {
    fn describe(&self, call: &mut CallSignature) {
        (**self).describe(call);
    }
}

macro_rules! tuple_call_args {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Canonicalize),+> CallArgs for ($($name,)+) {
            fn describe(&self, call: &mut CallSignature) {
                $( call.arg(&self.$idx); )+
            }
        }
    };
}

tuple_call_args!(A: 0);
tuple_call_args!(A: 0, B: 1);
tuple_call_args!(A: 0, B: 1, C: 2);
tuple_call_args!(A: 0, B: 1, C: 2, D: 3);
tuple_call_args!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_call_args!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_call_args!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_call_args!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

macro_rules! single_call_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CallArgs for $ty {
                fn describe(&self, call: &mut CallSignature) {
                    call.arg(self);
                }
            }
        )*
    };
}

single_call_arg!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, char, str, String, Value,
);

impl<T: Canonicalize> CallArgs for Option<T> {
    fn describe(&self, call: &mut CallSignature) {
        call.arg(self);
    }
}

impl<T: Canonicalize> CallArgs for Vec<T> {
    fn describe(&self, call: &mut CallSignature) {
        call.arg(self);
    }
}

impl<K: std::fmt::Display, V: Canonicalize, S> CallArgs for HashMap<K, V, S> {
    fn describe(&self, call: &mut CallSignature) {
        call.arg(self);
    }
}

impl<K: std::fmt::Display, V: Canonicalize> CallArgs for BTreeMap<K, V> {
    fn describe(&self, call: &mut CallSignature) {
        call.arg(self);
    }
}

impl<T: std::fmt::Display> CallArgs for Stringified<T> {
    fn describe(&self, call: &mut CallSignature) {
        call.arg(self);
    }
}

impl<T: crate::memo::CanonicalRepr> CallArgs for Repr<T> {
    fn describe(&self, call: &mut CallSignature) {
        call.arg(self);
    }
}

// == Key Builder ==
/// Builds namespaced, hashed cache keys.
///
/// Unless `include_self` is set, an opaque first positional argument is
/// assumed to be a method receiver and left out, so the same call on
/// different instances shares a key. This is a guess from the argument's
/// shape: a receiver passed as a plain value is kept, and a genuine data
/// argument wrapped in [`Stringified`] is dropped. Callers with such
/// signatures should set `include_self` or reorder their arguments.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    include_self: bool,
}

#[derive(Serialize)]
struct KeyPayload<'a> {
    args: Vec<&'a Value>,
    #[serde(rename = "fn")]
    function: &'a str,
    kwargs: &'a BTreeMap<String, Value>,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            include_self: false,
        }
    }

    /// Keep an opaque first argument in the key.
    pub fn include_self(mut self, include: bool) -> Self {
        self.include_self = include;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // == Build ==
    /// Returns `"{prefix}:{digest}"` for a call of `function`.
    pub fn build(&self, function: &str, call: &CallSignature) -> String {
        format!("{}:{}", self.prefix, self.digest(function, call))
    }

    /// SHA-256 hex digest of the canonical call record.
    pub fn digest(&self, function: &str, call: &CallSignature) -> String {
        let skip = match call.positional.first() {
            Some(first) if first.opaque && !self.include_self => 1,
            _ => 0,
        };

        let payload = KeyPayload {
            args: call.positional.iter().skip(skip).map(|a| &a.value).collect(),
            function,
            kwargs: &call.keyword,
        };
        // Field order above is alphabetical, and every nested object is built
        // from sorted keys, so the rendering is canonical.
        let raw = serde_json::to_string(&payload).unwrap_or_default();

        hex::encode(Sha256::digest(raw.as_bytes()))
    }
}
