//! Canonical Module
//!
//! Converts call arguments into an order-stable JSON form for key derivation.
//! Sequences keep their order; map keys are stringified and sorted; types
//! with no structural form fall back to their display string.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;

use serde_json::{Map, Number, Value};

// == Canonicalize ==
/// A value that can take part in a cache key.
pub trait Canonicalize {
    /// Returns the canonical JSON form.
    fn canonicalize(&self) -> Value;

    /// True for values canonicalized through the lossy display-string
    /// fallback. The key builder treats an opaque first argument as a method
    /// receiver.
    fn is_opaque(&self) -> bool {
        false
    }
}

// == Canonical Repr ==
/// Opt-in for domain types that have no structural canonical form.
///
/// Two values with the same representation produce the same key.
pub trait CanonicalRepr {
    fn canonical_repr(&self) -> String;
}

// == Stringified ==
/// Canonicalizes the wrapped value by its display string.
///
/// Lossy: distinct values that print identically collide.
#[derive(Debug, Clone, Copy)]
pub struct Stringified<T>(pub T);

impl<T: Display> Canonicalize for Stringified<T> {
    fn canonicalize(&self) -> Value {
        Value::String(self.0.to_string())
    }

    fn is_opaque(&self) -> bool {
        true
    }
}

// == Repr ==
/// Canonicalizes the wrapped value through [`CanonicalRepr`].
#[derive(Debug, Clone, Copy)]
pub struct Repr<T>(pub T);

impl<T: CanonicalRepr> Canonicalize for Repr<T> {
    fn canonicalize(&self) -> Value {
        Value::String(self.0.canonical_repr())
    }

    fn is_opaque(&self) -> bool {
        true
    }
}

// == Receiver ==
/// Marks a method receiver passed as the first argument.
///
/// Canonicalizes to the receiver's type name. Opaque, so the key builder
/// leaves it out unless `include_self` is set.
#[derive(Debug, Clone, Copy)]
pub struct Receiver<T>(pub T);

impl<T> std::ops::Deref for Receiver<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Canonicalize for Receiver<T> {
    fn canonicalize(&self) -> Value {
        Value::String(std::any::type_name::<T>().to_string())
    }

    fn is_opaque(&self) -> bool {
        true
    }
}

// == Primitive Implementations ==
macro_rules! canonical_via_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Canonicalize for $ty {
                fn canonicalize(&self) -> Value {
                    Value::from(*self)
                }
            }
        )*
    };
}

canonical_via_from!(bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Canonicalize for f32 {
    fn canonicalize(&self) -> Value {
        f64::from(*self).canonicalize()
    }
}

/// NaN and the infinities have no JSON number form and are spelled out.
impl Canonicalize for f64 {
    fn canonicalize(&self) -> Value {
        match Number::from_f64(*self) {
            Some(number) => Value::Number(number),
            None if self.is_nan() => Value::String("NaN".to_string()),
            None if self.is_sign_positive() => Value::String("Infinity".to_string()),
            None => Value::String("-Infinity".to_string()),
        }
    }
}

impl Canonicalize for char {
    fn canonicalize(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl Canonicalize for str {
    fn canonicalize(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl Canonicalize for String {
    fn canonicalize(&self) -> Value {
        Value::String(self.clone())
    }
}

impl Canonicalize for () {
    fn canonicalize(&self) -> Value {
        Value::Null
    }
}

impl<T: Canonicalize + ?Sized> Canonicalize for &T {
    fn canonicalize(&self) -> Value {
        (**self).canonicalize()
    }

    fn is_opaque(&self) -> bool {
        (**self).is_opaque()
    }
}

impl<T: Canonicalize + ?Sized> Canonicalize for Box<T> {
    fn canonicalize(&self) -> Value {
        (**self).canonicalize()
    }

    fn is_opaque(&self) -> bool {
        (**self).is_opaque()
    }
}

impl<T: Canonicalize> Canonicalize for Option<T> {
    fn canonicalize(&self) -> Value {
        match self {
            Some(value) => value.canonicalize(),
            None => Value::Null,
        }
    }
}

// == Sequence Implementations ==
impl<T: Canonicalize> Canonicalize for [T] {
    fn canonicalize(&self) -> Value {
        Value::Array(self.iter().map(Canonicalize::canonicalize).collect())
    }
}

impl<T: Canonicalize, const N: usize> Canonicalize for [T; N] {
    fn canonicalize(&self) -> Value {
        self.as_slice().canonicalize()
    }
}

impl<T: Canonicalize> Canonicalize for Vec<T> {
    fn canonicalize(&self) -> Value {
        self.as_slice().canonicalize()
    }
}

/// Sets have no meaningful order, so members are sorted by canonical text.
impl<T: Canonicalize> Canonicalize for HashSet<T> {
    fn canonicalize(&self) -> Value {
        let mut members: Vec<Value> = self.iter().map(Canonicalize::canonicalize).collect();
        members.sort_by_cached_key(|v| v.to_string());
        Value::Array(members)
    }
}

impl<T: Canonicalize> Canonicalize for BTreeSet<T> {
    fn canonicalize(&self) -> Value {
        let mut members: Vec<Value> = self.iter().map(Canonicalize::canonicalize).collect();
        members.sort_by_cached_key(|v| v.to_string());
        Value::Array(members)
    }
}

// == Mapping Implementations ==
/// Builds an object with stringified, lexicographically sorted keys.
fn sorted_object<'a, K, V, I>(pairs: I) -> Value
where
    K: Display + 'a,
    V: Canonicalize + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let sorted: BTreeMap<String, Value> = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.canonicalize()))
        .collect();
    Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
}

impl<K: Display, V: Canonicalize, S> Canonicalize for HashMap<K, V, S> {
    fn canonicalize(&self) -> Value {
        sorted_object(self.iter())
    }
}

impl<K: Display, V: Canonicalize> Canonicalize for BTreeMap<K, V> {
    fn canonicalize(&self) -> Value {
        sorted_object(self.iter())
    }
}

/// JSON arguments are re-canonicalized so nested object order never matters.
impl Canonicalize for Value {
    fn canonicalize(&self) -> Value {
        match self {
            Value::Array(items) => Value::Array(items.iter().map(Canonicalize::canonicalize).collect()),
            Value::Object(fields) => sorted_object(fields.iter()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Session {
        user: u32,
    }

    impl Display for Session {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Session({})", self.user)
        }
    }

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(7u8.canonicalize(), json!(7));
        assert_eq!((-3i64).canonicalize(), json!(-3));
        assert_eq!(1.5f64.canonicalize(), json!(1.5));
        assert_eq!(true.canonicalize(), json!(true));
        assert_eq!("abc".canonicalize(), json!("abc"));
        assert_eq!(None::<u32>.canonicalize(), Value::Null);
    }

    #[test]
    fn test_non_finite_floats_spelled_out() {
        assert_eq!(f64::NAN.canonicalize(), json!("NaN"));
        assert_eq!(f64::INFINITY.canonicalize(), json!("Infinity"));
        assert_eq!(f64::NEG_INFINITY.canonicalize(), json!("-Infinity"));
        assert_eq!(f32::NEG_INFINITY.canonicalize(), json!("-Infinity"));
        assert_eq!(f64::NAN.canonicalize(), (-f64::NAN).canonicalize());
    }

    #[test]
    fn test_sequences_keep_order() {
        assert_eq!(vec![3i32, 1, 2].canonicalize(), json!([3, 1, 2]));
        assert_eq!(["b", "a"].canonicalize(), json!(["b", "a"]));
    }

    #[test]
    fn test_map_keys_sorted_and_stringified() {
        let mut map: HashMap<u32, &str> = HashMap::new();
        map.insert(10, "ten");
        map.insert(2, "two");

        let canonical = map.canonicalize();
        assert_eq!(canonical.to_string(), r#"{"10":"ten","2":"two"}"#);
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let mut first = HashMap::new();
        first.insert("status", "accepted");
        first.insert("track", "systems");
        let mut second = HashMap::new();
        second.insert("track", "systems");
        second.insert("status", "accepted");

        assert_eq!(
            first.canonicalize().to_string(),
            second.canonicalize().to_string()
        );
    }

    #[test]
    fn test_json_objects_resorted_recursively() {
        let value = json!({"b": {"y": 1, "x": [ {"d": 1, "c": 2} ]}, "a": null});
        assert_eq!(
            value.canonicalize().to_string(),
            r#"{"a":null,"b":{"x":[{"c":2,"d":1}],"y":1}}"#
        );
    }

    #[test]
    fn test_sets_sorted() {
        let set: HashSet<u32> = [5, 1, 3].into_iter().collect();
        assert_eq!(set.canonicalize(), json!([1, 3, 5]));
    }

    #[test]
    fn test_stringified_is_opaque() {
        let session = Stringified(Session { user: 9 });
        assert_eq!(session.canonicalize(), json!("Session(9)"));
        assert!(session.is_opaque());
        assert!(!42i32.is_opaque());
        assert!((&session).is_opaque());
    }

    #[test]
    fn test_repr_uses_canonical_repr() {
        struct Track(&'static str);
        impl CanonicalRepr for Track {
            fn canonical_repr(&self) -> String {
                format!("track:{}", self.0)
            }
        }

        let track = Repr(Track("systems"));
        assert_eq!(track.canonicalize(), json!("track:systems"));
        assert!(track.is_opaque());
    }

    #[test]
    fn test_receiver_canonicalizes_to_type_name() {
        struct ReviewService;

        let a = Receiver(ReviewService);
        let b = Receiver(ReviewService);
        assert_eq!(a.canonicalize(), b.canonicalize());
        assert!(a.canonicalize().as_str().unwrap().ends_with("ReviewService"));
        assert!(a.is_opaque());
    }
}
