// Role to scope resolution policy
// The effective scope set of a login is the union of each granted role's
// declared scopes. Role and scope names are validated when the policy loads.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

static ROLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ROLE_[A-Z0-9_]+$").expect("role name regex"));

static SCOPE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]+:[a-z0-9_-]+$").expect("scope name regex"));

#[derive(Error, Debug)]
pub enum ScopePolicyError {
    #[error("invalid role name `{0}` (expected ROLE_[A-Z0-9_]+)")]
    InvalidRoleName(String),

    #[error("invalid scope `{0}` for role `{1}` (expected resource:action)")]
    InvalidScope(String, String),

    #[error("scope policy is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Declares which scopes each role grants.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    roles: HashMap<String, BTreeSet<String>>,
}

impl ScopePolicy {
    /// Build a policy from explicit role declarations. Scope names are
    /// normalized to lowercase; role and scope names are validated.
    pub fn new(
        declarations: HashMap<String, Vec<String>>,
    ) -> Result<Self, ScopePolicyError> {
        let mut roles = HashMap::new();

        for (role, scopes) in declarations {
            if !ROLE_NAME.is_match(&role) {
                return Err(ScopePolicyError::InvalidRoleName(role));
            }

            let mut normalized = BTreeSet::new();
            for scope in scopes {
                let scope = scope.to_lowercase();
                if !SCOPE_NAME.is_match(&scope) {
                    return Err(ScopePolicyError::InvalidScope(scope, role));
                }
                normalized.insert(scope);
            }

            roles.insert(role, normalized);
        }

        Ok(Self { roles })
    }

    /// Parse a `{"ROLE_X": ["res:action", ...]}` JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ScopePolicyError> {
        let declarations: HashMap<String, Vec<String>> = serde_json::from_str(raw)?;
        Self::new(declarations)
    }

    /// Built-in role declarations used when no policy document is configured.
    pub fn with_defaults() -> Self {
        let mut declarations = HashMap::new();
        declarations.insert(
            "ROLE_ADMIN".to_string(),
            vec![
                "user:manage".to_string(),
                "profile:read".to_string(),
                "profile:write".to_string(),
            ],
        );
        declarations.insert(
            "ROLE_USER".to_string(),
            vec!["profile:read".to_string(), "profile:write".to_string()],
        );

        Self::new(declarations).expect("built-in scope policy is valid")
    }

    /// Full resolved set: union of each role's declared scopes. Roles the
    /// policy does not know contribute nothing.
    pub fn resolve_scopes(&self, roles: &[String]) -> BTreeSet<String> {
        let mut resolved = BTreeSet::new();
        for role in roles {
            if let Some(scopes) = self.roles.get(role) {
                resolved.extend(scopes.iter().cloned());
            }
        }
        resolved
    }

    pub fn known_roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }
}
