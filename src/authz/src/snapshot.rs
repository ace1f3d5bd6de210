//! Immutable, versioned configuration snapshots
//!
//! A resolution reads exactly one snapshot from start to finish, so
//! concurrent edits never produce a result mixing old and new definitions.

use crate::error::{AuthzError, Result};
use crate::roles::RoleGraph;
use crate::scope::StaticScopeDirectory;
use crate::types::{GroupId, Permission, PermissionGroup, PermissionId, Principal, PrincipalId, Role, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Wire form of a snapshot, as exported by the configuration store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub permission_groups: Vec<PermissionGroup>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub principals: Vec<Principal>,
    #[serde(default)]
    pub directory: StaticScopeDirectory,
}

/// A configuration edit, as recorded in the store's change log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    RoleChanged { role: RoleId },
    GroupChanged { group: GroupId },
    PermissionChanged { permission: PermissionId },
    AssignmentsChanged { principal: PrincipalId },
    DirectoryChanged,
}

/// Roles, groups, permissions, principals and scope ancestry at one version
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    version: u64,
    permissions: HashMap<PermissionId, Permission>,
    groups: HashMap<GroupId, PermissionGroup>,
    roles: HashMap<RoleId, Role>,
    principals: HashMap<PrincipalId, Principal>,
    directory: StaticScopeDirectory,
    graph: RoleGraph,
}

fn index<T, F>(kind: &str, items: Vec<T>, id: F) -> Result<HashMap<String, T>>
where
    F: Fn(&T) -> &str,
{
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        let key = id(&item).to_string();
        if map.contains_key(&key) {
            return Err(AuthzError::InvalidInput(format!("duplicate {} id '{}'", kind, key)));
        }
        map.insert(key, item);
    }
    Ok(map)
}

impl ConfigSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot, rejecting duplicate ids
    ///
    /// Inheritance cycles are accepted here (and logged): resolution fails
    /// closed for the affected roles only.
    pub fn from_document(doc: SnapshotDocument) -> Result<Self> {
        let roles = index("role", doc.roles, |r: &Role| r.id.as_str())?;
        let graph = RoleGraph::from_roles(roles.values());

        for cycle in graph.detect_cycles() {
            warn!("Snapshot v{} contains inheritance cycle {}", doc.version, cycle.join(" -> "));
        }

        Ok(Self {
            version: doc.version,
            permissions: index("permission", doc.permissions, |p: &Permission| p.id.as_str())?,
            groups: index("permission group", doc.permission_groups, |g: &PermissionGroup| g.id.as_str())?,
            roles,
            principals: index("principal", doc.principals, |p: &Principal| p.id.as_str())?,
            directory: doc.directory,
            graph,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_document(serde_json::from_str(json)?)
    }

    /// Loads a snapshot document from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let snapshot = Self::from_json(&content)?;
        info!(
            "Loaded snapshot v{} from {} ({} roles, {} groups, {} permissions, {} principals)",
            snapshot.version,
            path.display(),
            snapshot.roles.len(),
            snapshot.groups.len(),
            snapshot.permissions.len(),
            snapshot.principals.len()
        );
        Ok(snapshot)
    }

    /// Wire form, records sorted by id
    pub fn to_document(&self) -> SnapshotDocument {
        fn sorted<T: Clone>(map: &HashMap<String, T>) -> Vec<T> {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter().map(|k| map[k].clone()).collect()
        }

        SnapshotDocument {
            version: self.version,
            permissions: sorted(&self.permissions),
            permission_groups: sorted(&self.groups),
            roles: sorted(&self.roles),
            principals: sorted(&self.principals),
            directory: self.directory.clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn permission(&self, id: &str) -> Option<&Permission> {
        self.permissions.get(id)
    }

    pub fn group(&self, id: &str) -> Option<&PermissionGroup> {
        self.groups.get(id)
    }

    pub fn role(&self, id: &str) -> Option<&Role> {
        self.roles.get(id)
    }

    pub fn principal(&self, id: &str) -> Option<&Principal> {
        self.principals.get(id)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &PermissionGroup> {
        self.groups.values()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.values()
    }

    pub fn principals(&self) -> impl Iterator<Item = &Principal> {
        self.principals.values()
    }

    pub fn directory(&self) -> &StaticScopeDirectory {
        &self.directory
    }

    pub fn graph(&self) -> &RoleGraph {
        &self.graph
    }

    /// Roles attaching `group` directly
    pub fn roles_with_group(&self, group: &str) -> Vec<RoleId> {
        self.roles
            .values()
            .filter(|r| r.permission_groups.iter().any(|g| g == group))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Groups listing `permission`
    pub fn groups_with_permission(&self, permission: &str) -> Vec<GroupId> {
        self.groups
            .values()
            .filter(|g| g.permissions.iter().any(|p| p == permission))
            .map(|g| g.id.clone())
            .collect()
    }

    /// Roles granting `permission` directly or through one of their groups
    pub fn roles_with_permission(&self, permission: &str) -> Vec<RoleId> {
        let groups = self.groups_with_permission(permission);
        self.roles
            .values()
            .filter(|r| {
                r.permissions.iter().any(|p| p == permission)
                    || r.permission_groups.iter().any(|g| groups.contains(g))
            })
            .map(|r| r.id.clone())
            .collect()
    }

    // Mutation is crate-private: the in-memory store builds the next version
    // from a clone of the current one.

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn put_permission(&mut self, permission: Permission) {
        self.permissions.insert(permission.id.clone(), permission);
    }

    pub(crate) fn put_group(&mut self, group: PermissionGroup) {
        self.groups.insert(group.id.clone(), group);
    }

    pub(crate) fn remove_group(&mut self, id: &str) -> Option<PermissionGroup> {
        self.groups.remove(id)
    }

    pub(crate) fn put_role(&mut self, role: Role) {
        self.graph.set_edges(&role.id, &role.inherited_roles);
        self.roles.insert(role.id.clone(), role);
    }

    pub(crate) fn remove_role(&mut self, id: &str) -> Option<Role> {
        self.graph.remove_role(id);
        self.roles.remove(id)
    }

    pub(crate) fn put_principal(&mut self, principal: Principal) {
        self.principals.insert(principal.id.clone(), principal);
    }

    pub(crate) fn set_directory(&mut self, directory: StaticScopeDirectory) {
        self.directory = directory;
    }
}
