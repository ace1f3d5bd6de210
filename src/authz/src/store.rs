//! Configuration store interface and in-memory implementation
//!
//! The store serializes administrative edits, validates them before they
//! become visible, and publishes each result as a new immutable snapshot with
//! a monotonically increasing version.

use crate::error::{AuthzError, Result};
use crate::scope::StaticScopeDirectory;
use crate::snapshot::{ChangeEvent, ConfigSnapshot};
use crate::types::{Permission, PermissionGroup, Principal, Role};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default number of change events retained
const DEFAULT_LOG_CAPACITY: usize = 1_024;

/// Source of configuration snapshots
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current snapshot
    async fn snapshot(&self) -> Result<Arc<ConfigSnapshot>>;

    /// Current version token
    async fn version(&self) -> Result<u64>;

    /// Changes committed after `version`, oldest first
    ///
    /// `None` when the log no longer reaches back to `version`; callers must
    /// then treat everything as changed.
    async fn changes_since(&self, version: u64) -> Result<Option<Vec<ChangeEvent>>>;
}

struct StoreState {
    current: Arc<ConfigSnapshot>,
    log: VecDeque<(u64, ChangeEvent)>,
}

/// In-memory configuration store with administrative validation
pub struct InMemoryConfigStore {
    state: Arc<RwLock<StoreState>>,
    log_capacity: usize,
}

impl InMemoryConfigStore {
    /// Create an empty store at version 0
    pub fn new() -> Self {
        Self::from_snapshot(ConfigSnapshot::empty())
    }

    /// Create a store seeded with `snapshot`
    pub fn from_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                current: Arc::new(snapshot),
                log: VecDeque::new(),
            })),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    /// Applies `edit` to a copy of the current snapshot and publishes it
    async fn commit<F>(&self, event: ChangeEvent, edit: F) -> Result<u64>
    where
        F: FnOnce(&ConfigSnapshot) -> Result<Option<ConfigSnapshot>>,
    {
        let mut state = self.state.write().await;

        let Some(mut next) = edit(state.current.as_ref())? else {
            // No-op edit
            return Ok(state.current.version());
        };

        let version = state.current.version() + 1;
        next.set_version(version);
        state.current = Arc::new(next);

        state.log.push_back((version, event.clone()));
        while state.log.len() > self.log_capacity {
            state.log.pop_front();
        }

        info!("Committed configuration v{}: {:?}", version, event);
        Ok(version)
    }

    /// Adds a permission; permissions are append-only
    ///
    /// Re-putting an identical record is a no-op.
    pub async fn put_permission(&self, permission: Permission) -> Result<u64> {
        let event = ChangeEvent::PermissionChanged {
            permission: permission.id.clone(),
        };
        self.commit(event, |current| match current.permission(&permission.id) {
            Some(existing) if *existing == permission => Ok(None),
            Some(_) => Err(AuthzError::ImmutablePermission(permission.id.clone())),
            None => {
                let mut next = current.clone();
                next.put_permission(permission);
                Ok(Some(next))
            }
        })
        .await
    }

    /// Creates or replaces a permission group
    pub async fn put_group(&self, group: PermissionGroup) -> Result<u64> {
        let event = ChangeEvent::GroupChanged { group: group.id.clone() };
        self.commit(event, |current| {
            if group.id.is_empty() {
                return Err(AuthzError::InvalidInput("group id cannot be empty".to_string()));
            }
            let mut next = current.clone();
            next.put_group(group);
            Ok(Some(next))
        })
        .await
    }

    /// Deletes a group; roles still attaching it keep a dangling reference
    pub async fn delete_group(&self, id: &str) -> Result<u64> {
        let event = ChangeEvent::GroupChanged { group: id.to_string() };
        self.commit(event, |current| {
            let mut next = current.clone();
            next.remove_group(id)
                .ok_or_else(|| AuthzError::UnknownGroup(id.to_string()))?;
            Ok(Some(next))
        })
        .await
    }

    /// Creates a new role
    ///
    /// # Errors
    ///
    /// - [`AuthzError::InvalidInput`] if the id already exists
    /// - [`AuthzError::UnknownRole`] if an inherited role does not exist
    /// - [`AuthzError::Configuration`] if inheritance would form a cycle
    /// - [`AuthzError::DuplicateDefaultRole`] if the level already has a default
    pub async fn create_role(&self, role: Role) -> Result<u64> {
        let event = ChangeEvent::RoleChanged { role: role.id.clone() };
        self.commit(event, |current| {
            if role.id.is_empty() {
                return Err(AuthzError::InvalidInput("role id cannot be empty".to_string()));
            }
            if current.role(&role.id).is_some() {
                return Err(AuthzError::InvalidInput(format!("role '{}' already exists", role.id)));
            }
            validate_role(current, &role)?;

            let mut next = current.clone();
            next.put_role(role);
            Ok(Some(next))
        })
        .await
    }

    /// Replaces an existing role; the only path that may change its scope
    /// type or hierarchy level
    ///
    /// System roles keep their name.
    pub async fn update_role(&self, role: Role) -> Result<u64> {
        let event = ChangeEvent::RoleChanged { role: role.id.clone() };
        self.commit(event, |current| {
            let existing = current
                .role(&role.id)
                .ok_or_else(|| AuthzError::UnknownRole(role.id.clone()))?;

            if existing.is_system_role && (existing.name != role.name || !role.is_system_role) {
                return Err(AuthzError::ProtectedRole(role.id.clone()));
            }
            if existing == &role {
                return Ok(None);
            }
            validate_role(current, &role)?;

            let mut next = current.clone();
            next.put_role(role);
            Ok(Some(next))
        })
        .await
    }

    /// Deletes a role; assignments and inheritance edges naming it become
    /// dangling
    pub async fn delete_role(&self, id: &str) -> Result<u64> {
        let event = ChangeEvent::RoleChanged { role: id.to_string() };
        self.commit(event, |current| {
            let existing = current
                .role(id)
                .ok_or_else(|| AuthzError::UnknownRole(id.to_string()))?;
            if existing.is_system_role {
                return Err(AuthzError::ProtectedRole(id.to_string()));
            }

            let mut next = current.clone();
            next.remove_role(id);
            Ok(Some(next))
        })
        .await
    }

    /// Creates or replaces a principal and its assignments
    pub async fn put_principal(&self, principal: Principal) -> Result<u64> {
        let event = ChangeEvent::AssignmentsChanged {
            principal: principal.id.clone(),
        };
        self.commit(event, |current| {
            if principal.id.is_empty() {
                return Err(AuthzError::InvalidInput("principal id cannot be empty".to_string()));
            }
            let mut next = current.clone();
            next.put_principal(principal);
            Ok(Some(next))
        })
        .await
    }

    /// Replaces the scope ancestry
    pub async fn set_directory(&self, directory: StaticScopeDirectory) -> Result<u64> {
        self.commit(ChangeEvent::DirectoryChanged, |current| {
            let mut next = current.clone();
            next.set_directory(directory);
            Ok(Some(next))
        })
        .await
    }
}

/// Checks shared by create and update
fn validate_role(current: &ConfigSnapshot, role: &Role) -> Result<()> {
    if let Some(missing) = role.inherited_roles.iter().find(|r| current.role(r).is_none() && **r != role.id) {
        return Err(AuthzError::UnknownRole(missing.clone()));
    }

    current.graph().check_inheritance(&role.id, &role.inherited_roles)?;

    if role.is_default {
        let existing = current
            .roles()
            .find(|r| r.is_default && r.hierarchy_level == role.hierarchy_level && r.id != role.id);
        if let Some(existing) = existing {
            return Err(AuthzError::DuplicateDefaultRole {
                level: role.hierarchy_level,
                existing: existing.id.clone(),
            });
        }
    }

    debug!("Validated role '{}' (level {}, {} inherited)", role.id, role.hierarchy_level, role.inherited_roles.len());
    Ok(())
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn snapshot(&self) -> Result<Arc<ConfigSnapshot>> {
        let state = self.state.read().await;
        Ok(Arc::clone(&state.current))
    }

    async fn version(&self) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.current.version())
    }

    async fn changes_since(&self, version: u64) -> Result<Option<Vec<ChangeEvent>>> {
        let state = self.state.read().await;
        let current = state.current.version();

        if version == current {
            return Ok(Some(Vec::new()));
        }
        if version > current {
            return Ok(None);
        }

        // The log must still hold the first change after `version`
        let complete = state.log.front().is_some_and(|(first, _)| *first <= version + 1);
        if !complete {
            return Ok(None);
        }

        Ok(Some(
            state
                .log
                .iter()
                .filter(|(v, _)| *v > version)
                .map(|(_, event)| event.clone())
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeType;
    use crate::types::RoleAssignment;

    fn role(id: &str) -> Role {
        Role::new(id, id, ScopeType::Business)
    }

    #[tokio::test]
    async fn test_versions_increase() {
        let store = InMemoryConfigStore::new();
        assert_eq!(store.version().await.unwrap(), 0);

        let v1 = store.create_role(role("cashier")).await.unwrap();
        let v2 = store.create_role(role("manager").inherits(["cashier"])).await.unwrap();
        assert_eq!((v1, v2), (1, 2));

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.version(), 2);
        assert!(snapshot.graph().contains("manager"));
    }

    #[tokio::test]
    async fn test_update_rejects_cycle() {
        let store = InMemoryConfigStore::new();
        store.create_role(role("A")).await.unwrap();
        store.create_role(role("B").inherits(["A"])).await.unwrap();

        let err = store.update_role(role("A").inherits(["B"])).await.unwrap_err();
        match err {
            AuthzError::Configuration { cycle } => assert_eq!(cycle, vec!["A", "B", "A"]),
            other => panic!("expected cycle error, got {:?}", other),
        }

        // Rejected write leaves the snapshot untouched
        assert_eq!(store.version().await.unwrap(), 2);
        assert!(store.snapshot().await.unwrap().role("A").unwrap().inherited_roles.is_empty());
    }

    #[tokio::test]
    async fn test_self_inheritance_rejected() {
        let store = InMemoryConfigStore::new();
        let err = store.create_role(role("A").inherits(["A"])).await.unwrap_err();
        assert!(matches!(err, AuthzError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unknown_inherited_role_rejected() {
        let store = InMemoryConfigStore::new();
        let err = store.create_role(role("A").inherits(["ghost"])).await.unwrap_err();
        assert!(matches!(err, AuthzError::UnknownRole(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_system_roles_are_protected() {
        let store = InMemoryConfigStore::new();
        store.create_role(role("owner").system()).await.unwrap();

        let mut renamed = role("owner").system();
        renamed.name = "Proprietor".to_string();
        assert!(matches!(store.update_role(renamed).await, Err(AuthzError::ProtectedRole(_))));
        assert!(matches!(store.delete_role("owner").await, Err(AuthzError::ProtectedRole(_))));

        // Other fields may still change
        let updated = role("owner").system().with_level(5);
        assert!(store.update_role(updated).await.is_ok());
    }

    #[tokio::test]
    async fn test_one_default_per_level() {
        let store = InMemoryConfigStore::new();
        store.create_role(role("staff").with_level(1).default_for_level()).await.unwrap();

        let err = store
            .create_role(role("crew").with_level(1).default_for_level())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::DuplicateDefaultRole { level: 1, ref existing } if existing == "staff"));

        assert!(store.create_role(role("lead").with_level(2).default_for_level()).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_does_not_overwrite() {
        let store = InMemoryConfigStore::new();
        store.create_role(role("cashier").with_level(1)).await.unwrap();

        let err = store.create_role(role("cashier").with_level(3)).await.unwrap_err();
        assert!(matches!(err, AuthzError::InvalidInput(_)));
        assert_eq!(store.snapshot().await.unwrap().role("cashier").unwrap().hierarchy_level, 1);
    }

    #[tokio::test]
    async fn test_permissions_are_immutable() {
        let store = InMemoryConfigStore::new();
        let permission = Permission::allow("order.create", "order", "create");

        let v1 = store.put_permission(permission.clone()).await.unwrap();
        let v2 = store.put_permission(permission).await.unwrap();
        assert_eq!(v1, v2);

        let changed = Permission::deny("order.create", "order", "create");
        assert!(matches!(
            store.put_permission(changed).await,
            Err(AuthzError::ImmutablePermission(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_group_leaves_dangling_reference() {
        let store = InMemoryConfigStore::new();
        store.put_group(PermissionGroup::new("sales", "Sales")).await.unwrap();
        store.create_role(role("cashier").with_groups(["sales"])).await.unwrap();

        store.delete_group("sales").await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.group("sales").is_none());
        assert_eq!(snapshot.role("cashier").unwrap().permission_groups, vec!["sales".to_string()]);

        assert!(matches!(store.delete_group("sales").await, Err(AuthzError::UnknownGroup(_))));
    }

    #[tokio::test]
    async fn test_change_log() {
        let store = InMemoryConfigStore::new();
        store.create_role(role("cashier")).await.unwrap();
        store
            .put_principal(Principal::new("u1").with_assignment(RoleAssignment::global("cashier")))
            .await
            .unwrap();
        store.set_directory(StaticScopeDirectory::new()).await.unwrap();

        let changes = store.changes_since(1).await.unwrap().unwrap();
        assert_eq!(
            changes,
            vec![
                ChangeEvent::AssignmentsChanged { principal: "u1".to_string() },
                ChangeEvent::DirectoryChanged,
            ]
        );
        assert_eq!(store.changes_since(3).await.unwrap(), Some(Vec::new()));
        assert_eq!(store.changes_since(9).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_log() {
        let store = InMemoryConfigStore::new().with_log_capacity(2);
        for id in ["a", "b", "c", "d"] {
            store.create_role(role(id)).await.unwrap();
        }

        assert_eq!(store.changes_since(2).await.unwrap().map(|c| c.len()), Some(2));
        assert_eq!(store.changes_since(1).await.unwrap(), None);
        assert_eq!(store.changes_since(0).await.unwrap(), None);
    }
}
