//! Roles and permissions consulted by the resolution workflow
//!
//! Authentication lives outside this crate. The engine only asks whether a
//! user holds a role or a permission, and raises
//! [`Error::PermissionDenied`](crate::Error::PermissionDenied) when not.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A user role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Expert,
    Admin,
}

impl Role {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Expert => "expert",
            Self::Admin => "admin",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "expert" => Some(Self::Expert),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Permissions granted by this role
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Self::Viewer => &[],
            Self::Editor => &[Permission::EditGraph],
            Self::Expert => &[Permission::ResolveConflicts, Permission::EditGraph],
            Self::Admin => &[
                Permission::ResolveConflicts,
                Permission::EditGraph,
                Permission::ManageConflicts,
            ],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fine-grained permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Resolve conflicts manually
    ResolveConflicts,
    /// Mutate entities and relationships directly
    EditGraph,
    /// Assign, reject and escalate conflicts
    ManageConflicts,
}

impl Permission {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveConflicts => "resolve_conflicts",
            Self::EditGraph => "edit_graph",
            Self::ManageConflicts => "manage_conflicts",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Answers role and permission questions for a user
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether the user holds the role
    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool>;

    /// Whether the user holds the permission
    async fn has_permission(&self, user_id: &str, permission: Permission) -> Result<bool>;

    /// Fail with `PermissionDenied` unless the user holds one of `roles`
    async fn require_any_role(&self, user_id: &str, roles: &[Role], action: &str) -> Result<()> {
        for role in roles {
            if self.has_role(user_id, *role).await? {
                return Ok(());
            }
        }
        Err(Error::permission_denied(user_id, action))
    }

    /// Fail with `PermissionDenied` unless the user holds `permission`
    async fn require_permission(&self, user_id: &str, permission: Permission) -> Result<()> {
        if self.has_permission(user_id, permission).await? {
            Ok(())
        } else {
            Err(Error::permission_denied(user_id, permission.as_str()))
        }
    }
}

/// Permission checker backed by a fixed user → roles table
#[derive(Debug, Clone, Default)]
pub struct StaticPermissionChecker {
    roles: HashMap<String, Vec<Role>>,
}

impl StaticPermissionChecker {
    /// Create an empty checker (everyone denied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a user → role-name table, ignoring unknown role names
    pub fn from_config(table: &HashMap<String, Vec<String>>) -> Self {
        let roles = table
            .iter()
            .map(|(user, names)| {
                let parsed = names.iter().filter_map(|n| Role::parse(n)).collect();
                (user.clone(), parsed)
            })
            .collect();
        Self { roles }
    }

    /// Grant a role to a user
    pub fn with_role(mut self, user_id: impl Into<String>, role: Role) -> Self {
        let entry = self.roles.entry(user_id.into()).or_default();
        if !entry.contains(&role) {
            entry.push(role);
        }
        self
    }
}

#[async_trait]
impl PermissionChecker for StaticPermissionChecker {
    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool> {
        Ok(self
            .roles
            .get(user_id)
            .is_some_and(|roles| roles.contains(&role)))
    }

    async fn has_permission(&self, user_id: &str, permission: Permission) -> Result<bool> {
        Ok(self.roles.get(user_id).is_some_and(|roles| {
            roles
                .iter()
                .any(|role| role.permissions().contains(&permission))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_roles() {
        let checker = StaticPermissionChecker::new()
            .with_role("alice", Role::Expert)
            .with_role("root", Role::Admin);

        assert!(checker.has_role("alice", Role::Expert).await.unwrap());
        assert!(!checker.has_role("alice", Role::Admin).await.unwrap());
        assert!(checker
            .has_permission("alice", Permission::ResolveConflicts)
            .await
            .unwrap());
        assert!(!checker
            .has_permission("alice", Permission::ManageConflicts)
            .await
            .unwrap());
        assert!(checker
            .has_permission("root", Permission::ManageConflicts)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_denied() {
        let checker = StaticPermissionChecker::new();
        let err = checker
            .require_any_role("mallory", &[Role::Expert, Role::Admin], "resolve conflicts")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_from_config_skips_unknown_roles() {
        let mut table = HashMap::new();
        table.insert("bob".to_string(), vec!["editor".to_string(), "wizard".to_string()]);
        let checker = StaticPermissionChecker::from_config(&table);

        assert!(checker.has_role("bob", Role::Editor).await.unwrap());
        assert!(checker
            .require_permission("bob", Permission::EditGraph)
            .await
            .is_ok());
        assert!(checker
            .require_permission("bob", Permission::ResolveConflicts)
            .await
            .is_err());
    }
}
