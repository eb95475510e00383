//! Environment variable expansion in the configuration file

#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::env::VarError;
use std::fs;

use serde_json::Value;

use super::ConfigurationError;

/// Expands `${env.NAME}`, `${env.NAME:-default}` and `${file.PATH}` references found in
/// string values of the configuration.
#[derive(buildstructor::Builder, Clone)]
pub(crate) struct Expansion {
    prefix: Option<String>,
    supported_modes: Vec<String>,
    #[cfg(test)]
    mocked_env_vars: HashMap<String, String>,
}

impl Expansion {
    pub(crate) fn default() -> Result<Self, ConfigurationError> {
        let prefix = match env::var("STITCH_ROUTER_CONFIG_ENV_PREFIX") {
            Ok(v) => Some(v),
            Err(VarError::NotPresent) => None,
            Err(VarError::NotUnicode(_)) => Err(ConfigurationError::InvalidExpansionModeConfig)?,
        };
        Ok(Expansion::builder()
            .and_prefix(prefix)
            .supported_mode("env")
            .supported_mode("file")
            .build())
    }

    fn context_fn(&self) -> impl Fn(&str) -> Result<Option<String>, ConfigurationError> + '_ {
        move |key: &str| {
            if !self
                .supported_modes
                .iter()
                .any(|prefix| key.starts_with(prefix.as_str()))
            {
                return Err(ConfigurationError::UnknownExpansionMode {
                    key: key.to_string(),
                    supported_modes: self.supported_modes.join("|"),
                });
            }

            if let Some(key) = key.strip_prefix("env.") {
                return self.expand_env(key);
            }
            if let Some(key) = key.strip_prefix("file.") {
                if !std::path::Path::new(key).exists() {
                    return Ok(None);
                }

                return fs::read_to_string(key).map(Some).map_err(|cause| {
                    ConfigurationError::CannotExpandVariable {
                        key: key.to_string(),
                        cause: format!("{cause}"),
                    }
                });
            }
            Err(ConfigurationError::InvalidExpansionModeConfig)
        }
    }

    // Unset variables are reported as `None` so that `${env.NAME:-default}` can fall back.
    fn expand_env(&self, key: &str) -> Result<Option<String>, ConfigurationError> {
        let name = match self.prefix.as_ref() {
            None => key.to_string(),
            Some(prefix) => format!("{prefix}_{key}"),
        };
        match self.get_env(&name) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(cause) => Err(ConfigurationError::CannotExpandVariable {
                key: key.to_string(),
                cause: format!("{cause}"),
            }),
        }
    }

    fn get_env(&self, name: &str) -> Result<String, VarError> {
        #[cfg(test)]
        if let Some(value) = self.mocked_env_vars.get(name) {
            return Ok(value.clone());
        }
        env::var(name)
    }

    pub(crate) fn expand(&self, configuration: &Value) -> Result<Value, ConfigurationError> {
        let mut configuration = configuration.clone();
        self.visit(&mut configuration)?;
        Ok(configuration)
    }

    fn visit(&self, value: &mut Value) -> Result<(), ConfigurationError> {
        let mut expanded: Option<String> = None;
        match value {
            Value::String(value) => {
                let new_value =
                    shellexpand::env_with_context(value, self.context_fn()).map_err(|e| e.cause)?;
                if let Some(key) = self.unresolved_reference(&new_value) {
                    return Err(ConfigurationError::CannotExpandVariable {
                        key,
                        cause: "no value is set and no default was provided".to_string(),
                    });
                }
                if &new_value != value {
                    expanded = Some(new_value.to_string());
                }
            }
            Value::Array(a) => {
                for v in a {
                    self.visit(v)?
                }
            }
            Value::Object(o) => {
                for v in o.values_mut() {
                    self.visit(v)?
                }
            }
            _ => {}
        }
        // The expansion may have resulted in a primitive, reparse and replace
        if let Some(expanded) = expanded {
            *value = coerce(&expanded)
        }
        Ok(())
    }

    /// Returns the first `${mode.KEY}` reference that survived expansion.
    fn unresolved_reference(&self, expanded: &str) -> Option<String> {
        self.supported_modes.iter().find_map(|mode| {
            let start = expanded.find(&format!("${{{mode}."))?;
            let rest = &expanded[start + 2..];
            let end = rest.find('}').unwrap_or(rest.len());
            Some(rest[..end].to_string())
        })
    }
}

pub(crate) fn coerce(expanded: &str) -> Value {
    match serde_yaml::from_str(expanded) {
        Ok(Value::Bool(b)) => Value::Bool(b),
        Ok(Value::Number(n)) => Value::Number(n),
        Ok(Value::Null) => Value::Null,
        _ => Value::String(expanded.to_string()),
    }
}
