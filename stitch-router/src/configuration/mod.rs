//! Logic for loading configuration in to an object model
mod cors;
mod expansion;
mod server;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bytesize::ByteSize;
pub(crate) use cors::Cors;
use derivative::Derivative;
use displaydoc::Display;
pub(crate) use expansion::Expansion;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
pub(crate) use server::Server;
use thiserror::Error;
use url::Url;

use crate::stitching::ArgumentRule;
use crate::stitching::DelegationBinding;
use crate::stitching::OperationKind;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not expand variable: {key}, {cause}
    CannotExpandVariable { key: String, cause: String },
    /// could not expand variable: {key}. Variables must be prefixed with one of '{supported_modes}' followed by '.' e.g. 'env.'
    UnknownExpansionMode {
        key: String,
        supported_modes: String,
    },
    /// invalid expansion mode configuration
    InvalidExpansionModeConfig,
    /// could not read configuration file '{path}': {error}
    CannotReadFile { path: PathBuf, error: String },
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// no upstream sources are configured, at least one entry is required under `sources`
    MissingSources,
    /// source '{name}' is misconfigured: {reason}
    InvalidSource { name: String, reason: String },
    /// delegation binding for '{type_name}.{field_name}' is misconfigured: {reason}
    InvalidBinding {
        type_name: String,
        field_name: String,
        reason: String,
    },
}

/// The configuration for the router.
///
/// Can be created through `serde::Deserialize` from various formats,
/// or inline in Rust code with `serde_json::json!` and `serde_json::from_value`.
#[derive(Clone, Derivative, Deserialize, Serialize, JsonSchema)]
#[derivative(Debug)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// HTTP front-end configuration
    #[serde(default)]
    pub(crate) server: Server,

    /// Cross origin request headers.
    #[serde(default)]
    pub(crate) cors: Cors,

    /// Upstream GraphQL sources, by name.
    #[serde(default)]
    pub(crate) sources: BTreeMap<String, Source>,

    /// Type extensions and their delegation bindings.
    #[serde(default)]
    pub(crate) stitching: Stitching,

    /// Response cache.
    #[serde(default)]
    pub(crate) cache: Cache,

    /// Request headers forwarded to upstream sources.
    #[serde(default)]
    pub(crate) headers: Headers,
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Configuration::from_yaml(s, &Expansion::default()?)
    }
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub(crate) fn new(
        server: Option<Server>,
        cors: Option<Cors>,
        sources: BTreeMap<String, Source>,
        stitching: Option<Stitching>,
        cache: Option<Cache>,
        headers: Option<Headers>,
    ) -> Result<Self, ConfigurationError> {
        let configuration = Self {
            server: server.unwrap_or_default(),
            cors: cors.unwrap_or_default(),
            sources,
            stitching: stitching.unwrap_or_default(),
            cache: cache.unwrap_or_default(),
            headers: headers.unwrap_or_default(),
        };
        configuration.validate()?;
        Ok(configuration)
    }

    /// Reads and validates a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::CannotReadFile {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
        content.parse()
    }

    pub(crate) fn from_yaml(yaml: &str, expansion: &Expansion) -> Result<Self, ConfigurationError> {
        // a document without content has no value to parse
        let is_blank = yaml.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with('#')
        });
        let raw: serde_json::Value = if is_blank {
            serde_json::Value::Null
        } else {
            serde_yaml::from_str(yaml).map_err(|e| ConfigurationError::InvalidConfiguration {
                message: "failed to parse the configuration file",
                error: e.to_string(),
            })?
        };
        let raw = if raw.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            raw
        };
        let expanded = expansion.expand(&raw)?;
        let configuration: Configuration = serde_json::from_value(expanded).map_err(|e| {
            ConfigurationError::InvalidConfiguration {
                message: "failed to read the configuration",
                error: e.to_string(),
            }
        })?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sources.is_empty() {
            return Err(ConfigurationError::MissingSources);
        }
        for (name, source) in &self.sources {
            source.url(name)?;
        }
        for binding in &self.stitching.bindings {
            binding.to_binding()?;
        }
        self.cors
            .clone()
            .into_layer()
            .map_err(|error| ConfigurationError::InvalidConfiguration {
                message: "invalid cors configuration",
                error,
            })?;
        for path in [
            &self.server.graphql_path,
            &self.server.playground.path,
            &self.server.health_check.path,
        ] {
            if !path.starts_with('/') {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "invalid server configuration",
                    error: format!("'{path}' must start with '/'"),
                });
            }
        }
        Ok(())
    }

    /// Delegation bindings declared in the configuration.
    pub(crate) fn bindings(&self) -> Result<Vec<DelegationBinding>, ConfigurationError> {
        self.stitching
            .bindings
            .iter()
            .map(BindingConfig::to_binding)
            .collect()
    }

    /// Overrides the listen address, used by the command line.
    pub(crate) fn with_listen(mut self, listen: Option<std::net::SocketAddr>) -> Self {
        if let Some(listen) = listen {
            self.server.listen = listen;
        }
        self
    }
}

/// Generate a JSON schema for the configuration.
pub(crate) fn generate_config_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Configuration)
}

/// An upstream GraphQL source.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct Source {
    /// The GraphQL endpoint of the source.
    pub(crate) url: String,

    /// Upstream request timeout. Defaults to 30s.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    #[schemars(with = "String")]
    pub(crate) timeout: Duration,

    /// Static headers sent with every request to this source.
    #[serde(default)]
    pub(crate) headers: BTreeMap<String, String>,

    /// Read the source schema from this SDL file instead of introspecting the endpoint.
    #[serde(default)]
    pub(crate) schema_file: Option<PathBuf>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Source {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: default_timeout(),
            headers: Default::default(),
            schema_file: None,
        }
    }

    pub(crate) fn url(&self, name: &str) -> Result<Url, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidSource {
            name: name.to_string(),
            reason,
        };
        if self.url.trim().is_empty() {
            return Err(invalid("the url is empty".to_string()));
        }
        let url = Url::parse(&self.url).map_err(|e| invalid(format!("invalid url: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(invalid(format!("unsupported url scheme '{scheme}'"))),
        }
    }
}

/// Schema stitching configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct Stitching {
    /// GraphQL type extensions (`extend type ...`) adding delegated fields.
    pub(crate) extensions: Option<String>,

    /// How each extension field is resolved.
    pub(crate) bindings: Vec<BindingConfig>,

    /// Answer introspection queries. Defaults to true.
    pub(crate) introspection: bool,
}

impl Default for Stitching {
    fn default() -> Self {
        Self {
            extensions: None,
            bindings: Vec::new(),
            introspection: true,
        }
    }
}

/// Resolve `type.field` by calling `target` on `source`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub(crate) struct BindingConfig {
    /// The extended type.
    #[serde(rename = "type")]
    pub(crate) type_name: String,

    /// The extension field.
    pub(crate) field: String,

    /// The source answering the field.
    pub(crate) source: String,

    /// Root type of the target field. Defaults to query.
    #[serde(default)]
    pub(crate) operation: OperationKind,

    /// Root field called on the source.
    pub(crate) target: String,

    /// Fields of the parent entity the arguments depend on.
    #[serde(default)]
    pub(crate) requires: Vec<String>,

    /// Argument template. `{"$parent": "<field>"}` is replaced with a required parent field and
    /// `{"$arg": "<name>"}` with an argument of the extension field.
    #[serde(default)]
    pub(crate) arguments: serde_json::Map<String, serde_json::Value>,
}

impl BindingConfig {
    fn to_binding(&self) -> Result<DelegationBinding, ConfigurationError> {
        let template = serde_json_bytes::to_value(&self.arguments).map_err(|e| {
            ConfigurationError::InvalidBinding {
                type_name: self.type_name.clone(),
                field_name: self.field.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(DelegationBinding::new(
            &self.type_name,
            &self.field,
            &self.source,
            &self.target,
        )
        .operation(self.operation)
        .requires(self.requires.iter())
        .arguments(ArgumentRule::template(template)))
    }
}

/// Response cache configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct Cache {
    /// Memoize cacheable responses. Defaults to true.
    pub(crate) enabled: bool,

    /// Memory budget of the response cache. Defaults to 10MiB.
    #[schemars(with = "String")]
    pub(crate) capacity: ByteSize,

    /// Cache duration given to root fields and composite fields without a hint. Defaults to 0s.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub(crate) default_max_age: Duration,

    /// Add the computed cache hints to `extensions.cacheControl`. Defaults to false.
    pub(crate) expose_hints: bool,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: ByteSize::b(10_485_760),
            default_max_age: Duration::ZERO,
            expose_hints: false,
        }
    }
}

/// Header propagation configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct Headers {
    /// Incoming request headers copied on every upstream request.
    pub(crate) propagate: Vec<String>,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} source(s), {} binding(s), listening on {}",
            self.sources.len(),
            self.stitching.bindings.len(),
            self.server.listen
        )
    }
}
