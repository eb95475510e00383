use std::net::SocketAddr;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// HTTP front-end configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct Server {
    /// The socket address and port to listen on.
    /// Defaults to 127.0.0.1:3000
    pub(crate) listen: SocketAddr,

    /// The path of the GraphQL endpoint.
    /// Defaults to /graphql
    pub(crate) graphql_path: String,

    /// The interactive query UI.
    pub(crate) playground: Playground,

    /// The health check endpoint.
    pub(crate) health_check: HealthCheck,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            graphql_path: "/graphql".to_string(),
            playground: Default::default(),
            health_check: Default::default(),
        }
    }
}

/// Interactive query UI configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct Playground {
    /// Serve the UI. Defaults to true.
    pub(crate) enabled: bool,

    /// Where the UI is served. Defaults to /playground
    pub(crate) path: String,
}

impl Default for Playground {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/playground".to_string(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct HealthCheck {
    /// Defaults to true.
    pub(crate) enabled: bool,

    /// Defaults to /health
    pub(crate) path: String,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
        }
    }
}
