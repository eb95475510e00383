//! Provide a [`Context`] shared by every upstream call made for one client request.
//!
//! The context is created by the HTTP front-end and handed to the execution engine, which
//! passes the same handle to each root fetch and each delegated call. It carries the request
//! headers that must be forwarded upstream and a few counters used for logging.

use std::sync::Arc;

use dashmap::DashMap;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use serde::Serialize;
use tower::BoxError;

use crate::json_ext::Value;

/// Holds [`Context`] entries.
pub(crate) type Entries = Arc<DashMap<String, Value>>;

pub(crate) const PROPAGATED_HEADERS: &str = "stitch::propagated_headers";
pub(crate) const UPSTREAM_CALLS: &str = "stitch::upstream_calls";

/// Context for a client request.
#[derive(Clone, Debug, Default)]
pub struct Context {
    entries: Entries,
}

impl Context {
    pub fn new() -> Self {
        Context {
            entries: Default::default(),
        }
    }

    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: for<'de> serde::Deserialize<'de>,
    {
        self.entries
            .get(&key.into())
            .map(|v| serde_json_bytes::from_value(v.value().clone()))
            .transpose()
            .map_err(|e| e.into())
    }

    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: for<'de> serde::Deserialize<'de> + Serialize,
    {
        match serde_json_bytes::to_value(value) {
            Ok(value) => self
                .entries
                .insert(key.into(), value)
                .map(serde_json_bytes::from_value)
                .transpose()
                .map_err(|e| e.into()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn upsert<K, V>(
        &self,
        key: K,
        upsert: impl Fn(V) -> V,
        default: impl Fn() -> V,
    ) -> Result<(), BoxError>
    where
        K: Into<String>,
        V: for<'de> serde::Deserialize<'de> + Serialize,
    {
        let key = key.into();
        self.entries
            .entry(key.clone())
            .or_try_insert_with(|| serde_json_bytes::to_value((default)()))?;
        let mut result = Ok(());
        self.entries
            .alter(&key, |_, v| match serde_json_bytes::from_value(v.clone()) {
                Ok(value) => match serde_json_bytes::to_value((upsert)(value)) {
                    Ok(value) => value,
                    Err(e) => {
                        result = Err(e);
                        v
                    }
                },
                Err(e) => {
                    result = Err(e);
                    v
                }
            });
        result.map_err(|e| e.into())
    }

    /// Stores the incoming headers listed in `names` so that upstream calls can replay them.
    pub(crate) fn capture_headers(
        &self,
        headers: &HeaderMap,
        names: &[String],
    ) -> Result<(), BoxError> {
        let captured: Vec<(String, String)> = names
            .iter()
            .filter_map(|name| {
                let value = headers.get(name.as_str())?.to_str().ok()?;
                Some((name.to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        if !captured.is_empty() {
            self.insert(PROPAGATED_HEADERS, captured)?;
        }
        Ok(())
    }

    /// Headers captured by [`Context::capture_headers`], ready to be sent upstream.
    pub(crate) fn propagated_headers(&self) -> HeaderMap {
        let captured: Vec<(String, String)> = self
            .get(PROPAGATED_HEADERS)
            .ok()
            .flatten()
            .unwrap_or_default();
        captured
            .into_iter()
            .filter_map(|(name, value)| {
                Some((
                    HeaderName::try_from(name).ok()?,
                    HeaderValue::try_from(value).ok()?,
                ))
            })
            .collect()
    }

    pub(crate) fn count_upstream_call(&self) {
        if let Err(error) = self.upsert(UPSTREAM_CALLS, |calls: u64| calls + 1, || 0) {
            tracing::debug!(%error, "could not count upstream call");
        }
    }

    pub(crate) fn upstream_calls(&self) -> u64 {
        self.get(UPSTREAM_CALLS).ok().flatten().unwrap_or_default()
    }
}
