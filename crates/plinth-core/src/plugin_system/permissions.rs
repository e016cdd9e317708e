//! Per-plugin permission declarations and runtime grants.
//!
//! Each plugin declares its permission set up front via
//! [`PluginPermissionManager::register_permissions`]; individual permissions
//! are then granted, checked, and revoked by id. A grant may only exist for a
//! permission id that was previously declared for the same plugin. Expiry is
//! lazy: an expired grant is revoked on the next read, never by a timer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::SystemTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kinds of platform resources a permission can cover.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Objects,
    Flows,
    Apis,
    Services,
    Storage,
    Network,
    Custom(String),
}

/// Actions a permission can allow on its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Read,
    Write,
    Create,
    Delete,
    Execute,
    Manage,
}

/// Scope at which a permission applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    Global,
    Tenant,
    User,
    Resource,
    Plugin,
}

/// A permission declared by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Unique within the declaring plugin.
    pub id: String,
    pub resource: ResourceType,
    pub actions: BTreeSet<PermissionAction>,
    pub scope: PermissionScope,
    pub description: String,
    /// Whether the plugin cannot operate without this permission granted.
    #[serde(default)]
    pub required: bool,
    /// Optional restriction to specific resource ids.
    #[serde(default)]
    pub resource_ids: Option<Vec<String>>,
}

impl Permission {
    /// Whether this permission covers the given resource/action pair, and the
    /// given resource id when one is supplied.
    pub fn covers(
        &self,
        resource: &ResourceType,
        action: PermissionAction,
        resource_id: Option<&str>,
    ) -> bool {
        if self.resource != *resource || !self.actions.contains(&action) {
            return false;
        }
        match (resource_id, &self.resource_ids) {
            (Some(id), Some(allowed)) => allowed.iter().any(|a| a == id),
            _ => true,
        }
    }
}

/// Runtime record that a declared permission has been authorized.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionGrant {
    pub permission_id: String,
    pub plugin_id: String,
    pub granted_at: SystemTime,
    pub granted_by: Option<String>,
    pub expires_at: Option<SystemTime>,
}

impl PermissionGrant {
    fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Error type for permission operations
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Permission '{permission_id}' was never declared by plugin '{plugin_id}'")]
    NotDeclared {
        plugin_id: String,
        permission_id: String,
    },
}

/// Outcome of an access check.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// The first declared permission that would allow the access, when denied
    /// for lack of a grant.
    pub required_permission: Option<String>,
    /// Ids of granted permissions matching the request.
    pub granted_permissions: Vec<String>,
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allowed {
            write!(f, "allowed via {:?}", self.granted_permissions)
        } else {
            write!(
                f,
                "denied: {}",
                self.reason.as_deref().unwrap_or("no reason recorded")
            )
        }
    }
}

/// Context supplied when validating a permission's scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub resource_id: Option<String>,
}

/// Registry of declared permissions and runtime grants, keyed by plugin id.
#[derive(Debug, Default)]
pub struct PluginPermissionManager {
    /// plugin id -> permission id -> declaration
    declared: HashMap<String, BTreeMap<String, Permission>>,
    /// plugin id -> permission id -> grant
    grants: HashMap<String, BTreeMap<String, PermissionGrant>>,
}

impl PluginPermissionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the full permission set for a plugin, replacing any prior
    /// set (and dropping grants that no longer have a declaration).
    pub fn register_permissions(&mut self, plugin_id: &str, permissions: Vec<Permission>) {
        let set: BTreeMap<String, Permission> = permissions
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        if let Some(grants) = self.grants.get_mut(plugin_id) {
            grants.retain(|id, _| set.contains_key(id));
        }
        log::debug!(
            "Registered {} permission(s) for plugin '{}'",
            set.len(),
            plugin_id
        );
        self.declared.insert(plugin_id.to_string(), set);
    }

    /// Grants a previously declared permission.
    pub fn grant_permission(
        &mut self,
        plugin_id: &str,
        permission_id: &str,
    ) -> Result<(), PermissionError> {
        self.grant_permission_with(plugin_id, permission_id, None, None)
    }

    /// Grants a previously declared permission, recording who granted it and
    /// an optional expiry.
    pub fn grant_permission_with(
        &mut self,
        plugin_id: &str,
        permission_id: &str,
        granted_by: Option<String>,
        expires_at: Option<SystemTime>,
    ) -> Result<(), PermissionError> {
        let declared_for_plugin = self.declared.get(plugin_id);
        if !declared_for_plugin.is_some_and(|set| set.contains_key(permission_id)) {
            return Err(PermissionError::NotDeclared {
                plugin_id: plugin_id.to_string(),
                permission_id: permission_id.to_string(),
            });
        }
        let grant = PermissionGrant {
            permission_id: permission_id.to_string(),
            plugin_id: plugin_id.to_string(),
            granted_at: SystemTime::now(),
            granted_by,
            expires_at,
        };
        self.grants
            .entry(plugin_id.to_string())
            .or_default()
            .insert(permission_id.to_string(), grant);
        Ok(())
    }

    /// Revokes a grant. Revoking an absent grant is a no-op.
    pub fn revoke_permission(&mut self, plugin_id: &str, permission_id: &str) {
        if let Some(grants) = self.grants.get_mut(plugin_id) {
            if grants.remove(permission_id).is_some() {
                log::debug!(
                    "Revoked permission '{}' from plugin '{}'",
                    permission_id,
                    plugin_id
                );
            }
        }
    }

    /// Drops all declarations and grants for a plugin.
    pub fn clear_plugin_permissions(&mut self, plugin_id: &str) {
        self.declared.remove(plugin_id);
        self.grants.remove(plugin_id);
    }

    /// Whether a grant exists and has not expired. An expired grant is
    /// revoked here, on read.
    pub fn has_permission(&mut self, plugin_id: &str, permission_id: &str) -> bool {
        let now = SystemTime::now();
        let Some(grants) = self.grants.get_mut(plugin_id) else {
            return false;
        };
        match grants.get(permission_id) {
            Some(grant) if grant.is_expired(now) => {
                log::debug!(
                    "Permission '{}' for plugin '{}' expired; auto-revoking",
                    permission_id,
                    plugin_id
                );
                grants.remove(permission_id);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Checks whether the plugin may perform `action` on `resource`,
    /// optionally narrowed to a specific resource id.
    pub fn check_access(
        &mut self,
        plugin_id: &str,
        resource: &ResourceType,
        action: PermissionAction,
        resource_id: Option<&str>,
    ) -> AccessDecision {
        let matching: Vec<String> = self
            .declared
            .get(plugin_id)
            .map(|set| {
                set.values()
                    .filter(|p| p.covers(resource, action, resource_id))
                    .map(|p| p.id.clone())
                    .collect()
            })
            .unwrap_or_default();

        if matching.is_empty() {
            return AccessDecision {
                allowed: false,
                reason: Some(format!(
                    "plugin '{}' declares no permission covering {:?}/{:?}",
                    plugin_id, resource, action
                )),
                required_permission: None,
                granted_permissions: Vec::new(),
            };
        }

        let granted: Vec<String> = matching
            .iter()
            .filter(|id| self.has_permission(plugin_id, id))
            .cloned()
            .collect();

        if granted.is_empty() {
            AccessDecision {
                allowed: false,
                reason: Some(format!(
                    "permission '{}' is declared but not granted",
                    matching[0]
                )),
                required_permission: Some(matching[0].clone()),
                granted_permissions: Vec::new(),
            }
        } else {
            AccessDecision {
                allowed: true,
                reason: None,
                required_permission: None,
                granted_permissions: granted,
            }
        }
    }

    /// Declared, `required`, but not currently granted permissions.
    pub fn get_missing_permissions(&mut self, plugin_id: &str) -> Vec<Permission> {
        let required: Vec<Permission> = self
            .declared
            .get(plugin_id)
            .map(|set| set.values().filter(|p| p.required).cloned().collect())
            .unwrap_or_default();
        required
            .into_iter()
            .filter(|p| !self.has_permission(plugin_id, &p.id))
            .collect()
    }

    /// Checks that the supplied context satisfies the permission's declared
    /// scope. A tenant-scoped permission needs a tenant id, a user-scoped
    /// one a user id, a resource-scoped one a resource id. Global and
    /// plugin scopes always pass.
    pub fn validate_permission_scope(permission: &Permission, ctx: &ScopeContext) -> bool {
        fn present(v: &Option<String>) -> bool {
            v.as_deref().is_some_and(|s| !s.is_empty())
        }
        match permission.scope {
            PermissionScope::Global | PermissionScope::Plugin => true,
            PermissionScope::Tenant => present(&ctx.tenant_id),
            PermissionScope::User => present(&ctx.user_id),
            PermissionScope::Resource => present(&ctx.resource_id),
        }
    }

    /// All declared permissions for a plugin.
    pub fn plugin_permissions(&self, plugin_id: &str) -> Vec<&Permission> {
        self.declared
            .get(plugin_id)
            .map(|set| set.values().collect())
            .unwrap_or_default()
    }

    /// Ids of currently granted permissions for a plugin. Does not apply
    /// lazy expiry; use [`has_permission`](Self::has_permission) for an
    /// authoritative check.
    pub fn granted_permissions(&self, plugin_id: &str) -> Vec<&PermissionGrant> {
        self.grants
            .get(plugin_id)
            .map(|g| g.values().collect())
            .unwrap_or_default()
    }
}
