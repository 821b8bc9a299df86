use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::AccessError;
use crate::filter::Filter;

/// One grantable way to pass a method's check.
///
/// Lower `priority` outranks higher: when the caller holds several listed
/// capabilities, the entry with the smallest priority supplies the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub capability: String,
    pub priority: u32,
    #[serde(default)]
    pub filter: Filter,
}

impl PermissionEntry {
    pub fn new(capability: impl Into<String>, priority: u32) -> Self {
        Self {
            capability: capability.into(),
            priority,
            filter: Filter::new(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// The capability table for a single HTTP method of a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodPermissionRule {
    entries: Vec<PermissionEntry>,
}

/// The capability that admitted a request and the filter it imposes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessGrant {
    pub capability: String,
    pub filter: Filter,
}

/// Outcome of resolving a rule against a caller's capabilities.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Allowed(AccessGrant),
    Denied,
}

impl Resolution {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Resolution::Allowed(_))
    }

    /// The filter to merge, if allowed. Denied resolutions carry none.
    pub fn filter(&self) -> Option<&Filter> {
        match self {
            Resolution::Allowed(grant) => Some(&grant.filter),
            Resolution::Denied => None,
        }
    }
}

impl MethodPermissionRule {
    pub fn new(entries: Vec<PermissionEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PermissionEntry] {
        &self.entries
    }

    /// Capabilities that can admit this method.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.capability.as_str())
    }

    /// Select the highest-ranked entry the caller holds.
    ///
    /// The outcome does not depend on entry order. Ties cannot occur in a
    /// validated table; should one slip through, the capability name breaks
    /// it so the result stays deterministic.
    pub fn resolve(&self, capabilities: &BTreeSet<String>) -> Resolution {
        self.entries
            .iter()
            .filter(|e| capabilities.contains(&e.capability))
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.capability.cmp(&b.capability))
            })
            .map(|e| {
                Resolution::Allowed(AccessGrant {
                    capability: e.capability.clone(),
                    filter: e.filter.clone(),
                })
            })
            .unwrap_or(Resolution::Denied)
    }

    /// Resolve while acting under one declared capability only.
    ///
    /// Used when the request names the capability it exercises; the caller
    /// must still hold it and the rule must list it.
    pub fn resolve_as(&self, capabilities: &BTreeSet<String>, requested: &str) -> Resolution {
        if !capabilities.contains(requested) {
            return Resolution::Denied;
        }
        let only: BTreeSet<String> = [requested.to_string()].into();
        self.resolve(&only)
    }

    /// Reject priority ties, duplicate capabilities and unsafe filters.
    pub fn validate(&self, route: &str, method: &str) -> Result<(), AccessError> {
        let mut by_priority: BTreeMap<u32, &str> = BTreeMap::new();
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for entry in &self.entries {
            if !seen.insert(entry.capability.as_str()) {
                return Err(AccessError::DuplicateCapability {
                    route: route.to_string(),
                    method: method.to_string(),
                    capability: entry.capability.clone(),
                });
            }
            if let Some(first) = by_priority.insert(entry.priority, entry.capability.as_str()) {
                return Err(AccessError::PriorityTie {
                    route: route.to_string(),
                    method: method.to_string(),
                    first: first.to_string(),
                    second: entry.capability.clone(),
                    priority: entry.priority,
                });
            }
            entry.filter.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn videos_get() -> MethodPermissionRule {
        MethodPermissionRule::new(vec![
            PermissionEntry::new("MANAGE_VIDEOS", 1),
            PermissionEntry::new("VIEW_VIDEOS", 2)
                .with_filter(Filter::new().with("is_featured", true)),
            PermissionEntry::new("VIEW_OWN_VIDEOS", 3)
                .with_filter(Filter::new().with("created_by", "$caller.id")),
        ])
    }

    #[test]
    fn no_intersection_is_denied() {
        let rule = videos_get();
        let res = rule.resolve(&caps(&["ENABLE_COMPANY_DIRECTORY"]));
        assert_eq!(res, Resolution::Denied);
        assert!(res.filter().is_none());
        assert_eq!(rule.resolve(&caps(&[])), Resolution::Denied);
    }

    #[test]
    fn minimal_priority_wins() {
        let rule = videos_get();
        let res = rule.resolve(&caps(&["VIEW_OWN_VIDEOS", "VIEW_VIDEOS"]));
        match res {
            Resolution::Allowed(grant) => {
                assert_eq!(grant.capability, "VIEW_VIDEOS");
                assert_eq!(grant.filter, Filter::new().with("is_featured", true));
            }
            Resolution::Denied => panic!("expected allowed"),
        }
    }

    #[test]
    fn entry_order_does_not_matter() {
        let rule = videos_get();
        let mut reversed = rule.entries().to_vec();
        reversed.reverse();
        let reversed = MethodPermissionRule::new(reversed);

        let sets = [
            caps(&["MANAGE_VIDEOS", "VIEW_VIDEOS", "VIEW_OWN_VIDEOS"]),
            caps(&["VIEW_VIDEOS", "VIEW_OWN_VIDEOS"]),
            caps(&["VIEW_OWN_VIDEOS"]),
            caps(&["UNRELATED"]),
        ];
        for set in &sets {
            assert_eq!(rule.resolve(set), reversed.resolve(set));
        }
    }

    #[test]
    fn empty_filter_is_full_access_not_denial() {
        let rule = videos_get();
        let res = rule.resolve(&caps(&["MANAGE_VIDEOS"]));
        assert!(res.is_allowed());
        assert!(res.filter().unwrap().is_empty());
    }

    #[test]
    fn resolve_as_narrows_to_declared_capability() {
        let rule = videos_get();
        let held = caps(&["MANAGE_VIDEOS", "VIEW_VIDEOS"]);

        let res = rule.resolve_as(&held, "VIEW_VIDEOS");
        assert_eq!(
            res.filter(),
            Some(&Filter::new().with("is_featured", true))
        );
        // Declared but not held.
        assert_eq!(rule.resolve_as(&held, "VIEW_OWN_VIDEOS"), Resolution::Denied);
        // Held but not listed.
        let held = caps(&["MANAGE_NEWS"]);
        assert_eq!(rule.resolve_as(&held, "MANAGE_NEWS"), Resolution::Denied);
    }

    #[test]
    fn validate_rejects_ties_and_duplicates() {
        let tie = MethodPermissionRule::new(vec![
            PermissionEntry::new("A", 1),
            PermissionEntry::new("B", 1),
        ]);
        assert!(matches!(
            tie.validate("/x", "GET"),
            Err(AccessError::PriorityTie { priority: 1, .. })
        ));

        let dup = MethodPermissionRule::new(vec![
            PermissionEntry::new("A", 1),
            PermissionEntry::new("A", 2),
        ]);
        assert!(matches!(
            dup.validate("/x", "GET"),
            Err(AccessError::DuplicateCapability { .. })
        ));

        assert!(videos_get().validate("/videos", "GET").is_ok());
    }
}
