use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vidyarth_core::Caller;

use crate::error::AccessError;
use crate::rule::{AccessGrant, MethodPermissionRule, Resolution};

/// Route pattern → HTTP method → capability rule.
///
/// Route keys are axum path patterns (`/api/videos/{id}`). Method keys are
/// stored upper-case. The TOML form is:
///
/// ```toml
/// [[routes."/api/videos".GET]]
/// capability = "MANAGE_VIDEOS"
/// priority = 1
///
/// [[routes."/api/videos".GET]]
/// capability = "VIEW_VIDEOS"
/// priority = 2
/// filter = { is_featured = true }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionTable {
    #[serde(default)]
    routes: BTreeMap<String, BTreeMap<String, MethodPermissionRule>>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style rule registration.
    pub fn with_rule(mut self, route: &str, method: &str, rule: MethodPermissionRule) -> Self {
        self.insert(route, method, rule);
        self
    }

    pub fn insert(&mut self, route: &str, method: &str, rule: MethodPermissionRule) {
        self.routes
            .entry(route.to_string())
            .or_default()
            .insert(method.to_ascii_uppercase(), rule);
    }

    /// Parse a table from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, AccessError> {
        let raw: PermissionTable =
            toml::from_str(text).map_err(|e| AccessError::Load(e.to_string()))?;

        // Normalise method keys written in lower case.
        let mut table = PermissionTable::new();
        for (route, methods) in raw.routes {
            for (method, rule) in methods {
                table.insert(&route, &method, rule);
            }
        }
        Ok(table)
    }

    /// Read a table from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AccessError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AccessError::Load(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Overlay `other` onto this table. Rules in `other` replace rules for
    /// the same route and method.
    pub fn merge(&mut self, other: PermissionTable) {
        for (route, methods) in other.routes {
            for (method, rule) in methods {
                self.insert(&route, &method, rule);
            }
        }
    }

    pub fn rule(&self, route: &str, method: &str) -> Option<&MethodPermissionRule> {
        self.routes
            .get(route)
            .and_then(|m| m.get(&method.to_ascii_uppercase()))
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Validate every rule. Priority ties are configuration errors and must
    /// be caught here, before the table serves any request.
    pub fn validate(&self) -> Result<(), AccessError> {
        for (route, methods) in &self.routes {
            for (method, rule) in methods {
                rule.validate(route, method)?;
            }
        }
        Ok(())
    }
}

/// Validated, read-only permission configuration shared by request handlers.
#[derive(Debug)]
pub struct AccessControl {
    table: PermissionTable,
}

impl AccessControl {
    /// Wrap a table after validating it.
    pub fn new(table: PermissionTable) -> Result<Self, AccessError> {
        table.validate()?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &PermissionTable {
        &self.table
    }

    /// Decide whether `caller` may perform `method` on `route`.
    ///
    /// Routes without a rule are denied. On success the grant's filter has
    /// caller placeholders already substituted.
    pub fn check(
        &self,
        route: &str,
        method: &str,
        caller: &Caller,
        requested: Option<&str>,
    ) -> Result<AccessGrant, AccessError> {
        let Some(rule) = self.table.rule(route, method) else {
            warn!("no permission rule for {method} {route}, denying");
            return Err(AccessError::Denied(format!(
                "no permission rule for {method} {route}"
            )));
        };

        let resolution = match requested {
            Some(cap) => rule.resolve_as(&caller.capabilities, cap),
            None => rule.resolve(&caller.capabilities),
        };

        match resolution {
            Resolution::Allowed(grant) => {
                debug!(
                    "{method} {route} admitted for {} via {}",
                    caller.id, grant.capability
                );
                Ok(AccessGrant {
                    filter: grant.filter.bind(caller),
                    capability: grant.capability,
                })
            }
            Resolution::Denied => Err(AccessError::Denied(match requested {
                Some(cap) => format!("{cap} does not admit {method} {route}"),
                None => format!("no granted capability admits {method} {route}"),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::rule::PermissionEntry;
    use serde_json::json;

    const TABLE: &str = r#"
[[routes."/api/videos".get]]
capability = "MANAGE_VIDEOS"
priority = 1

[[routes."/api/videos".get]]
capability = "VIEW_VIDEOS"
priority = 2
filter = { is_featured = true }

[[routes."/api/videos".get]]
capability = "VIEW_OWN_VIDEOS"
priority = 3
filter = { created_by = "$caller.id" }

[[routes."/api/videos".POST]]
capability = "MANAGE_VIDEOS"
priority = 1
"#;

    #[test]
    fn parse_toml_table() {
        let table = PermissionTable::from_toml_str(TABLE).unwrap();
        table.validate().unwrap();

        let get = table.rule("/api/videos", "GET").unwrap();
        assert_eq!(get.entries().len(), 3);
        assert_eq!(get.entries()[1].filter, Filter::new().with("is_featured", true));
        assert!(table.rule("/api/videos", "post").is_some());
        assert!(table.rule("/api/videos", "DELETE").is_none());
    }

    #[test]
    fn tie_rejected_at_construction() {
        let text = r#"
[[routes."/api/news".GET]]
capability = "MANAGE_NEWS"
priority = 1

[[routes."/api/news".GET]]
capability = "VIEW_NEWS"
priority = 1
"#;
        let table = PermissionTable::from_toml_str(text).unwrap();
        assert!(matches!(
            AccessControl::new(table),
            Err(AccessError::PriorityTie { .. })
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.toml");
        std::fs::write(&path, TABLE).unwrap();
        let table = PermissionTable::load(&path).unwrap();
        assert_eq!(table.routes().collect::<Vec<_>>(), vec!["/api/videos"]);

        assert!(matches!(
            PermissionTable::load(&dir.path().join("missing.toml")),
            Err(AccessError::Load(_))
        ));
    }

    #[test]
    fn merge_overrides_same_method() {
        let mut base = PermissionTable::from_toml_str(TABLE).unwrap();
        let overlay = PermissionTable::new().with_rule(
            "/api/videos",
            "POST",
            MethodPermissionRule::new(vec![PermissionEntry::new("UPLOAD_VIDEOS", 1)]),
        );
        base.merge(overlay);
        let post = base.rule("/api/videos", "POST").unwrap();
        assert_eq!(post.capabilities().collect::<Vec<_>>(), vec!["UPLOAD_VIDEOS"]);
        assert_eq!(base.rule("/api/videos", "GET").unwrap().entries().len(), 3);
    }

    #[test]
    fn check_binds_caller_and_denies_unknown() {
        let access = AccessControl::new(PermissionTable::from_toml_str(TABLE).unwrap()).unwrap();
        let student = Caller::new("stu-1", &["VIEW_OWN_VIDEOS"]);

        let grant = access.check("/api/videos", "GET", &student, None).unwrap();
        assert_eq!(grant.capability, "VIEW_OWN_VIDEOS");
        assert_eq!(grant.filter.get("created_by"), Some(&json!("stu-1")));

        assert!(matches!(
            access.check("/api/videos", "POST", &student, None),
            Err(AccessError::Denied(_))
        ));
        assert!(matches!(
            access.check("/api/unknown", "GET", &student, None),
            Err(AccessError::Denied(_))
        ));
    }

    #[test]
    fn check_with_requested_capability() {
        let access = AccessControl::new(PermissionTable::from_toml_str(TABLE).unwrap()).unwrap();
        let pc = Caller::new("pc-1", &["MANAGE_VIDEOS", "VIEW_VIDEOS"]);

        let full = access.check("/api/videos", "GET", &pc, None).unwrap();
        assert!(full.filter.is_empty());

        let narrowed = access
            .check("/api/videos", "GET", &pc, Some("VIEW_VIDEOS"))
            .unwrap();
        assert_eq!(narrowed.filter, Filter::new().with("is_featured", true));

        assert!(access
            .check("/api/videos", "GET", &pc, Some("VIEW_OWN_VIDEOS"))
            .is_err());
    }
}
