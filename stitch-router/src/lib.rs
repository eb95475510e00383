//! A GraphQL gateway stitching the schemas of remote sources into one graph.
//!
//! Fields added to the merged schema by type extensions are delegated to the source that can
//! answer them, and responses are cached according to `@cacheControl` hints.
#![cfg_attr(feature = "failfast", allow(unreachable_code))]

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

#[macro_use]
pub mod json_ext;
pub(crate) mod axum_factory;
pub mod cache;
pub mod configuration;
pub mod context;
pub mod error;
mod executable;
pub(crate) mod execution;
pub mod graphql;
pub mod remote;
mod router;
pub mod services;
pub mod stitching;
pub mod test_harness;

pub use configuration::Configuration;
pub use context::Context;
pub use executable::Executable;
pub use executable::main;
pub use router::RouterHttpServer;
pub use router::ShutdownSource;
pub use test_harness::TestHarness;
