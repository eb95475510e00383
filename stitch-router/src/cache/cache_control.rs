use std::fmt::Write;

use http::HeaderMap;
use http::HeaderValue;
use http::header::AGE;
use http::header::CACHE_CONTROL;
use tower::BoxError;

use super::CachePolicy;
use super::CacheScope;

/// The subset of `Cache-Control` the gateway reads from clients and writes to responses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CacheControl {
    max_age: Option<u32>,
    age: Option<u32>,
    no_cache: bool,
    no_store: bool,
    private: bool,
    public: bool,
}

impl CacheControl {
    /// Parses request headers. Unknown directives are ignored.
    pub(crate) fn new(headers: &HeaderMap) -> Result<Self, BoxError> {
        let mut result = CacheControl::default();

        for header_value in headers.get_all(CACHE_CONTROL) {
            for value in header_value.to_str()?.split(',') {
                let mut it = value.trim().splitn(2, '=');
                match (it.next().unwrap_or_default(), it.next()) {
                    ("max-age", Some(v)) => {
                        result.max_age = Some(v.trim().parse()?);
                    }
                    ("no-cache", None) => {
                        result.no_cache = true;
                    }
                    ("no-store", None) => {
                        result.no_store = true;
                    }
                    ("private", None) => {
                        result.private = true;
                    }
                    ("public", None) => {
                        result.public = true;
                    }
                    _ => {}
                }
            }
        }

        if let Some(value) = headers.get(AGE) {
            result.age = Some(value.to_str()?.trim().parse()?);
        }

        Ok(result)
    }

    pub(crate) fn from_policy(policy: &CachePolicy) -> Self {
        let private = policy.scope() == CacheScope::Private;
        Self {
            max_age: Some(policy.max_age()),
            private,
            public: !private,
            ..Default::default()
        }
    }

    /// A shareable response stored for `max_age` seconds.
    pub(crate) fn public(max_age: u32) -> Self {
        Self {
            max_age: Some(max_age),
            public: true,
            ..Default::default()
        }
    }

    pub(crate) fn max_age(&self) -> Option<u32> {
        self.max_age
    }

    /// Whether a response carrying these directives may be stored by the shared cache.
    pub(crate) fn is_shareable(&self) -> bool {
        self.public && !self.private && !self.no_store && self.max_age.unwrap_or_default() > 0
    }

    pub(crate) fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    pub(crate) fn no_store(&self) -> bool {
        self.no_store
    }

    /// Whether a client asked to bypass stored responses.
    pub(crate) fn bypasses_cache(&self) -> bool {
        self.no_cache || self.no_store
    }

    pub(crate) fn to_headers(&self, headers: &mut HeaderMap) -> Result<(), BoxError> {
        let mut directives = Vec::new();
        if let Some(max_age) = self.max_age {
            let mut directive = String::new();
            write!(&mut directive, "max-age={max_age}")?;
            directives.push(directive);
        }
        if self.no_cache {
            directives.push("no-cache".to_string());
        }
        if self.no_store {
            directives.push("no-store".to_string());
        }
        // private takes precedence over public
        if self.private {
            directives.push("private".to_string());
        } else if self.public {
            directives.push("public".to_string());
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_str(&directives.join(", "))?);

        if let Some(age) = self.age {
            if age != 0 {
                headers.insert(AGE, age.into());
            }
        }

        Ok(())
    }
}
