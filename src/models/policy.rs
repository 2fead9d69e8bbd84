//! Access policy consumed by storage backends.
//!
//! Rules are keyed on path patterns such as `uploads/*` or
//! `profile-pictures/{entity_id}/*`. A `{entity_id}` segment matches any
//! single segment and, for [`Grantee::Entity`] grants, must equal the
//! caller's identity.

use serde::{Deserialize, Serialize};

/// Who is calling the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    Guest,
    Identity(String),
}

impl Principal {
    pub fn identity(&self) -> Option<&str> {
        match self {
            Principal::Guest => None,
            Principal::Identity(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grantee {
    /// Unauthenticated callers.
    Guest,
    /// Any signed-in identity.
    Authenticated,
    /// The identity named by the `{entity_id}` segment of the path.
    Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: Grantee,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRule {
    pub pattern: String,
    pub grants: Vec<Grant>,
}

const ENTITY_PLACEHOLDER: &str = "{entity_id}";

impl AccessRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            grants: Vec::new(),
        }
    }

    pub fn allow(mut self, grantee: Grantee, actions: &[Action]) -> Self {
        self.grants.push(Grant {
            grantee,
            actions: actions.to_vec(),
        });
        self
    }

    /// Matches `key` against the pattern. On success returns the captured
    /// entity segment, if the pattern has one.
    fn matches<'k>(&self, key: &'k str) -> Option<Option<&'k str>> {
        let prefix = self.pattern.strip_suffix('*').unwrap_or(&self.pattern);
        let mut entity = None;
        let mut rest = key;
        for part in prefix.split_inclusive('/') {
            if part.trim_end_matches('/') == ENTITY_PLACEHOLDER {
                let end = rest.find('/')?;
                if end == 0 {
                    return None;
                }
                entity = Some(&rest[..end]);
                rest = &rest[end + 1..];
            } else {
                rest = rest.strip_prefix(part)?;
            }
        }
        Some(entity)
    }

    fn permits(&self, principal: &Principal, action: Action, key: &str) -> bool {
        let Some(entity) = self.matches(key) else {
            return false;
        };
        self.grants.iter().any(|grant| {
            let applies = match grant.grantee {
                Grantee::Guest => *principal == Principal::Guest,
                Grantee::Authenticated => principal.identity().is_some(),
                Grantee::Entity => match (principal.identity(), entity) {
                    (Some(id), Some(owner)) => id == owner,
                    _ => false,
                },
            };
            applies && grant.actions.contains(&action)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub rules: Vec<AccessRule>,
}

impl AccessPolicy {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    /// Grants everything to everyone. Handy for single-user setups and tests.
    pub fn allow_all() -> Self {
        let everything = [Action::Read, Action::Write, Action::Delete];
        Self::new(vec![
            AccessRule::new("*")
                .allow(Grantee::Guest, &everything)
                .allow(Grantee::Authenticated, &everything),
        ])
    }

    pub fn allows(&self, principal: &Principal, action: Action, key: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.permits(principal, action, key))
    }
}

impl Default for AccessPolicy {
    /// The upload bucket layout: a shared `uploads/` area writable by any
    /// signed-in user, and per-identity profile pictures.
    fn default() -> Self {
        Self::new(vec![
            AccessRule::new("profile-pictures/{entity_id}/*")
                .allow(Grantee::Guest, &[Action::Read])
                .allow(
                    Grantee::Entity,
                    &[Action::Read, Action::Write, Action::Delete],
                ),
            AccessRule::new("uploads/*")
                .allow(Grantee::Authenticated, &[Action::Read, Action::Write])
                .allow(Grantee::Guest, &[Action::Read]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Principal {
        Principal::Identity("alice".into())
    }

    #[test]
    fn test_uploads_rule() {
        let policy = AccessPolicy::default();
        assert!(policy.allows(&Principal::Guest, Action::Read, "uploads/a.txt"));
        assert!(!policy.allows(&Principal::Guest, Action::Write, "uploads/a.txt"));
        assert!(policy.allows(&alice(), Action::Write, "uploads/docs/a.txt"));
        assert!(policy.allows(&alice(), Action::Read, "uploads/"));
        assert!(!policy.allows(&alice(), Action::Delete, "uploads/a.txt"));
    }

    #[test]
    fn test_entity_scoped_rule() {
        let policy = AccessPolicy::default();
        let key = "profile-pictures/alice/me.png";
        assert!(policy.allows(&alice(), Action::Delete, key));
        assert!(policy.allows(&Principal::Guest, Action::Read, key));
        let bob = Principal::Identity("bob".into());
        assert!(!policy.allows(&bob, Action::Write, key));
        assert!(!policy.allows(&bob, Action::Read, key));
        assert!(!policy.allows(&alice(), Action::Read, "profile-pictures/"));
    }

    #[test]
    fn test_unmatched_key_is_denied() {
        let policy = AccessPolicy::default();
        assert!(!policy.allows(&alice(), Action::Read, "private/x"));
        assert!(AccessPolicy::allow_all().allows(&Principal::Guest, Action::Delete, "private/x"));
    }
}
