//! Memoize Module
//!
//! Wraps an async function so its calls go through the cache: derive a key
//! from the function identity and arguments, return the cached value on a
//! hit, otherwise run the function and store what it returns.

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::cache::{Cache, CacheFactory, Ttl};
use crate::error::{CacheError, Result};
use crate::memo::key::{CallArgs, CallSignature, KeyBuilder};

// == Memoize Options ==
/// Per-function memoization settings.
#[derive(Debug, Clone, Default)]
pub struct MemoizeOptions {
    ttl: Option<Ttl>,
    key_prefix: Option<String>,
    cache_none: bool,
    include_self: bool,
    name: Option<String>,
}

impl MemoizeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry lifetime. Defaults to the cache's configured default TTL.
    pub fn ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    /// Namespace for this function's keys. Defaults to the function's name.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Store null results too. Off by default, so a missing row is
    /// looked up again on the next call.
    pub fn cache_none(mut self, cache_none: bool) -> Self {
        self.cache_none = cache_none;
        self
    }

    /// Keep an opaque first argument (a receiver) in the key.
    pub fn include_self(mut self, include_self: bool) -> Self {
        self.include_self = include_self;
        self
    }

    /// Overrides the function identity hashed into every key.
    ///
    /// Closures all report the enclosing function's path, so two memoized
    /// closures in one function need distinct names to avoid sharing keys.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// == Memoized ==
/// An async function whose results are cached.
///
/// Built by [`memoize`] or [`memoize_in`]. `A` is the argument pack the
/// function takes: a single value, a tuple, or a type implementing
/// [`CallArgs`] by hand.
pub struct Memoized<F, A> {
    func: F,
    cache: Option<Cache>,
    keys: KeyBuilder,
    qualname: String,
    ttl: Option<Ttl>,
    cache_none: bool,
    _args: PhantomData<fn(A)>,
}

impl<F, A> fmt::Debug for Memoized<F, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("qualname", &self.qualname)
            .field("prefix", &self.keys.prefix())
            .field("ttl", &self.ttl)
            .field("cache_none", &self.cache_none)
            .finish()
    }
}

/// Memoizes `func` through the process-wide cache from [`CacheFactory::shared`].
///
/// Only functions returning a future are accepted; anything else is a
/// compile error here rather than a failure at call time.
pub fn memoize<F, A, Fut>(options: MemoizeOptions, func: F) -> Memoized<F, A>
where
    F: Fn(A) -> Fut,
    Fut: Future,
    A: CallArgs,
{
    Memoized::build(None, options, func)
}

/// Memoizes `func` through an explicit cache.
pub fn memoize_in<F, A, Fut>(cache: Cache, options: MemoizeOptions, func: F) -> Memoized<F, A>
where
    F: Fn(A) -> Fut,
    Fut: Future,
    A: CallArgs,
{
    Memoized::build(Some(cache), options, func)
}

impl<F, A: CallArgs> Memoized<F, A> {
    fn build(cache: Option<Cache>, options: MemoizeOptions, func: F) -> Self {
        let qualname = options.name.unwrap_or_else(function_name::<F>);
        let prefix = options
            .key_prefix
            .unwrap_or_else(|| short_name(&qualname).to_string());

        Self {
            func,
            cache,
            keys: KeyBuilder::new(prefix).include_self(options.include_self),
            qualname,
            ttl: options.ttl,
            cache_none: options.cache_none,
            _args: PhantomData,
        }
    }

    /// Fully qualified identity hashed into keys.
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    /// Namespace prefix of this function's keys.
    pub fn prefix(&self) -> &str {
        self.keys.prefix()
    }

    /// The key a call with `args` reads and writes.
    pub fn key_for(&self, args: &A) -> String {
        self.keys.build(&self.qualname, &CallSignature::of(args))
    }

    // == Call ==
    /// Calls through the cache.
    ///
    /// Cache outages never fail the call: the function runs and its result
    /// is returned as if the cache were empty.
    ///
    /// # Errors
    /// Returns [`CacheError::Serialization`] when the result cannot be
    /// encoded for storage.
    pub async fn call<Fut, T>(&self, args: A) -> Result<T>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = T>,
        T: Serialize + DeserializeOwned,
    {
        let Some(cache) = self.resolve_cache() else {
            return Ok((self.func)(args).await);
        };

        let key = self.key_for(&args);
        debug!("Memoized call {} -> {}", self.qualname, key);
        let ttl = self.ttl.unwrap_or_else(|| cache.default_ttl());

        cache
            .get_or_set(&key, ttl, move || (self.func)(args), self.cache_none)
            .await
    }

    /// Calls a fallible function through the cache. Only `Ok` values are
    /// stored; errors are returned as they are.
    pub async fn try_call<Fut, T, E>(&self, args: A) -> std::result::Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
    {
        let Some(cache) = self.resolve_cache() else {
            return (self.func)(args).await;
        };

        let key = self.key_for(&args);
        debug!("Memoized call {} -> {}", self.qualname, key);
        let ttl = self.ttl.unwrap_or_else(|| cache.default_ttl());

        cache
            .try_get_or_set(&key, ttl, move || (self.func)(args), self.cache_none)
            .await
    }

    // == Invalidate ==
    /// Drops the cached result for `args`, if any.
    pub async fn invalidate(&self, args: &A) {
        if let Some(cache) = self.resolve_cache() {
            cache.delete(&self.key_for(args)).await;
        }
    }

    fn resolve_cache(&self) -> Option<Cache> {
        if let Some(cache) = &self.cache {
            return Some(cache.clone());
        }
        match CacheFactory::shared() {
            Ok(cache) => Some(cache),
            Err(e) => {
                debug!("No cache for {}, calling through: {}", self.qualname, e);
                None
            }
        }
    }
}

/// Path of a function type, with closure markers removed.
fn function_name<F>() -> String {
    let mut name = type_name::<F>();
    while let Some(outer) = name.strip_suffix("::{{closure}}") {
        name = outer;
    }
    name.to_string()
}

/// Last path segment, ignoring generic arguments.
fn short_name(qualname: &str) -> &str {
    let base = qualname.split('<').next().unwrap_or(qualname);
    base.rsplit("::").next().unwrap_or(base)
}
