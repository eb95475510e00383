use apollo_compiler::ast::Directive;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::json;

use crate::json_ext::Path;
use crate::json_ext::Value;

pub(crate) const CACHE_CONTROL_DIRECTIVE: &str = "cacheControl";
pub(crate) const CACHE_CONTROL_SCOPE: &str = "CacheControlScope";

/// Always part of the stitched schema.
pub(crate) const CACHE_CONTROL_SDL: &str = r#"enum CacheControlScope {
  PUBLIC
  PRIVATE
}

directive @cacheControl(maxAge: Int, scope: CacheControlScope, inheritMaxAge: Boolean) on FIELD_DEFINITION | OBJECT | INTERFACE | UNION

"#;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheScope {
    #[default]
    Public,
    Private,
}

/// A `@cacheControl` annotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheHint {
    pub max_age: Option<u32>,
    pub scope: Option<CacheScope>,
    pub inherit_max_age: bool,
}

impl CacheHint {
    pub(crate) fn max_age(max_age: u32) -> Self {
        Self {
            max_age: Some(max_age),
            ..Default::default()
        }
    }

    pub(crate) fn from_directive(directive: &Directive) -> Self {
        let max_age = directive
            .specified_argument_by_name("maxAge")
            .and_then(|value| value.to_i32())
            .map(|max_age| max_age.max(0) as u32);
        let scope = directive
            .specified_argument_by_name("scope")
            .and_then(|value| value.as_enum())
            .and_then(|scope| match scope.as_str() {
                "PUBLIC" => Some(CacheScope::Public),
                "PRIVATE" => Some(CacheScope::Private),
                _ => None,
            });
        let inherit_max_age = directive
            .specified_argument_by_name("inheritMaxAge")
            .and_then(|value| value.to_bool())
            .unwrap_or_default();
        Self {
            max_age,
            scope,
            inherit_max_age,
        }
    }

    /// A hint that constrains nothing.
    pub(crate) fn is_unconstrained(&self) -> bool {
        self.max_age.is_none() && self.scope.is_none()
    }
}

/// The cache policy of a whole response: the most restrictive of its field hints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachePolicy {
    max_age: Option<u32>,
    scope: CacheScope,
}

impl CachePolicy {
    pub(crate) fn restrict(&mut self, hint: &CacheHint) {
        if let Some(max_age) = hint.max_age {
            self.max_age = Some(self.max_age.map_or(max_age, |current| current.min(max_age)));
        }
        if hint.scope == Some(CacheScope::Private) {
            self.scope = CacheScope::Private;
        }
    }

    /// Zero when no field set a duration.
    pub fn max_age(&self) -> u32 {
        self.max_age.unwrap_or_default()
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    /// Whether clients may cache the response.
    pub fn is_cacheable(&self) -> bool {
        self.max_age() > 0
    }

    /// Whether the shared response cache may store the response.
    pub fn is_shareable(&self) -> bool {
        self.is_cacheable() && self.scope == CacheScope::Public
    }
}

/// Hints collected while completing a response, by response path.
#[derive(Clone, Debug, Default)]
pub(crate) struct CacheHints {
    policy: CachePolicy,
    hints: Vec<(Path, CacheHint)>,
}

impl CacheHints {
    pub(crate) fn add(&mut self, path: Path, hint: CacheHint) {
        if hint.is_unconstrained() {
            return;
        }
        self.policy.restrict(&hint);
        self.hints.push((path, hint));
    }

    pub(crate) fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// The `extensions.cacheControl` entry of a response.
    pub(crate) fn to_extension(&self) -> Value {
        let hints: Vec<Value> = self
            .hints
            .iter()
            .map(|(path, hint)| {
                let mut entry = json!({ "path": serde_json_bytes::to_value(path).unwrap_or_default() });
                if let Some(object) = entry.as_object_mut() {
                    if let Some(max_age) = hint.max_age {
                        object.insert("maxAge", max_age.into());
                    }
                    if let Some(scope) = hint.scope {
                        object.insert(
                            "scope",
                            serde_json_bytes::to_value(scope).unwrap_or_default(),
                        );
                    }
                }
                entry
            })
            .collect();
        json!({ "version": 1, "hints": hints })
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;

    use super::*;

    #[test]
    fn hints_are_read_from_directives() {
        let schema = Schema::parse_and_validate(
            format!(
                "{CACHE_CONTROL_SDL} type Query {{ \
                   a: Int @cacheControl(maxAge: 240) \
                   b: Int @cacheControl(maxAge: 10, scope: PRIVATE) \
                   c: Int @cacheControl(inheritMaxAge: true) \
                 }}"
            ),
            "schema.graphql",
        )
        .unwrap();
        let query = schema.get_object("Query").unwrap();
        let hint = |field: &str| {
            CacheHint::from_directive(
                query.fields[field]
                    .directives
                    .get(CACHE_CONTROL_DIRECTIVE)
                    .unwrap(),
            )
        };

        assert_eq!(hint("a"), CacheHint::max_age(240));
        assert_eq!(
            hint("b"),
            CacheHint {
                max_age: Some(10),
                scope: Some(CacheScope::Private),
                inherit_max_age: false
            }
        );
        assert!(hint("c").inherit_max_age);
        assert!(hint("c").is_unconstrained());
    }

    #[test]
    fn policy_is_the_most_restrictive_hint() {
        let mut hints = CacheHints::default();
        hints.add(Path::from("posts"), CacheHint::max_age(240));
        hints.add(Path::from("posts/0/comments"), CacheHint::max_age(60));
        hints.add(Path::from("posts/0/title"), CacheHint::default());
        let policy = hints.policy();
        assert_eq!(policy.max_age(), 60);
        assert!(policy.is_shareable());

        hints.add(
            Path::from("viewer"),
            CacheHint {
                max_age: None,
                scope: Some(CacheScope::Private),
                inherit_max_age: false,
            },
        );
        let policy = hints.policy();
        assert!(policy.is_cacheable());
        assert!(!policy.is_shareable());
    }

    #[test]
    fn zero_max_age_is_not_cacheable() {
        let mut hints = CacheHints::default();
        hints.add(Path::from("posts"), CacheHint::max_age(240));
        hints.add(Path::from("post"), CacheHint::max_age(0));
        assert!(!hints.policy().is_cacheable());
        assert!(!CachePolicy::default().is_cacheable());
    }

    #[test]
    fn hints_extension() {
        let mut hints = CacheHints::default();
        hints.add(Path::from("posts"), CacheHint::max_age(240));
        assert_eq!(
            hints.to_extension(),
            json!({"version": 1, "hints": [{"path": ["posts"], "maxAge": 240}]})
        );
    }
}
