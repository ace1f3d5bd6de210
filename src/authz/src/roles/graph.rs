//! Role inheritance graph with three-colour DFS expansion
//!
//! This module:
//! 1. Expands a role into its transitive closure over `inheritedRoles`
//! 2. Detects cycles and reports the full cycle path
//! 3. Keeps reverse edges so edits can be traced to the roles they affect

use crate::error::{AuthzError, ReferenceKind, ResolutionWarning, Result};
use crate::types::{Role, RoleId};
use std::collections::{HashMap, HashSet, VecDeque};

// DFS node states
const WHITE: u8 = 0;
const GRAY: u8 = 1;
const BLACK: u8 = 2;

/// Result of expanding one role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// The role itself followed by every inherited role, DFS pre-order,
    /// each role exactly once
    pub order: Vec<RoleId>,

    /// Inheritance edges pointing at roles missing from the graph
    pub dangling: Vec<ResolutionWarning>,
}

impl Expansion {
    pub fn contains(&self, role: &str) -> bool {
        self.order.iter().any(|r| r == role)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Arena of roles by id with adjacency via `inheritedRoles`
///
/// # Example
///
/// ```
/// use scopegate_authz::roles::RoleGraph;
/// use scopegate_authz::scope::ScopeType;
/// use scopegate_authz::types::Role;
///
/// let roles = vec![
///     Role::new("manager", "Manager", ScopeType::Business).inherits(["cashier"]),
///     Role::new("cashier", "Cashier", ScopeType::Outlet),
/// ];
/// let graph = RoleGraph::from_roles(&roles);
///
/// let expansion = graph.expand("manager", 32).unwrap();
/// assert_eq!(expansion.order, vec!["manager", "cashier"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    /// role -> roles it inherits
    edges: HashMap<RoleId, Vec<RoleId>>,

    /// role -> roles that inherit it
    parents: HashMap<RoleId, Vec<RoleId>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roles<'a, I>(roles: I) -> Self
    where
        I: IntoIterator<Item = &'a Role>,
    {
        let mut graph = Self::new();
        for role in roles {
            graph.set_edges(&role.id, &role.inherited_roles);
        }
        graph
    }

    /// Replaces the inheritance edges of `role`
    pub fn set_edges(&mut self, role: &str, inherited: &[RoleId]) {
        self.remove_edges(role);

        let mut deduped: Vec<RoleId> = Vec::with_capacity(inherited.len());
        for child in inherited {
            if !deduped.contains(child) {
                deduped.push(child.clone());
            }
        }

        for child in &deduped {
            self.parents
                .entry(child.clone())
                .or_default()
                .push(role.to_string());
        }
        self.edges.insert(role.to_string(), deduped);
    }

    /// Removes `role` as a node; edges other roles hold towards it remain and
    /// become dangling
    pub fn remove_role(&mut self, role: &str) {
        self.remove_edges(role);
        self.edges.remove(role);
    }

    fn remove_edges(&mut self, role: &str) {
        if let Some(old) = self.edges.get(role) {
            for child in old {
                if let Some(parents) = self.parents.get_mut(child) {
                    parents.retain(|p| p != role);
                    if parents.is_empty() {
                        self.parents.remove(child);
                    }
                }
            }
        }
    }

    pub fn contains(&self, role: &str) -> bool {
        self.edges.contains_key(role)
    }

    pub fn inherited(&self, role: &str) -> &[RoleId] {
        self.edges.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Expands `root` into itself plus every transitively inherited role
    ///
    /// # Errors
    ///
    /// - [`AuthzError::UnknownRole`] when `root` is not in the graph
    /// - [`AuthzError::Configuration`] when a cycle is reachable, naming the
    ///   full path (`[A, B, A]`)
    /// - [`AuthzError::TraversalDepthExceeded`] when an inheritance chain is
    ///   longer than `max_depth` edges
    pub fn expand(&self, root: &str, max_depth: usize) -> Result<Expansion> {
        if !self.contains(root) {
            return Err(AuthzError::UnknownRole(root.to_string()));
        }

        let mut walk = Walk::new(self, root, max_depth);
        walk.visit(root)?;

        Ok(Expansion {
            order: walk.order,
            dangling: walk.dangling,
        })
    }

    /// Every role whose expansion includes one of `roles` (the roles
    /// themselves included), following reverse edges
    pub fn dependents<'a, I>(&self, roles: I) -> HashSet<RoleId>
    where
        I: IntoIterator<Item = &'a RoleId>,
    {
        let mut seen: HashSet<RoleId> = HashSet::new();
        let mut queue: VecDeque<RoleId> = VecDeque::new();

        for role in roles {
            if seen.insert(role.clone()) {
                queue.push_back(role.clone());
            }
        }

        while let Some(current) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&current) {
                for parent in parents {
                    if seen.insert(parent.clone()) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }

        seen
    }

    /// Detect all cycles in the graph
    ///
    /// Uses depth-first search with three states:
    /// - White (0): Unvisited
    /// - Gray (1): Currently on the DFS stack
    /// - Black (2): Fully visited
    ///
    /// A cycle exists if we encounter a gray node during DFS.
    pub fn detect_cycles(&self) -> Vec<Vec<RoleId>> {
        let mut state: HashMap<&str, u8> = HashMap::new();
        let mut cycles: Vec<Vec<RoleId>> = Vec::new();

        let mut starts: Vec<&RoleId> = self.edges.keys().collect();
        starts.sort();

        for start in starts {
            if state.get(start.as_str()).copied().unwrap_or(WHITE) == WHITE {
                let mut path = Vec::new();
                self.collect_cycles(start, &mut state, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn collect_cycles<'g>(
        &'g self,
        node: &'g str,
        state: &mut HashMap<&'g str, u8>,
        path: &mut Vec<&'g str>,
        cycles: &mut Vec<Vec<RoleId>>,
    ) {
        match state.get(node).copied().unwrap_or(WHITE) {
            GRAY => {
                if let Some(start) = path.iter().position(|n| *n == node) {
                    cycles.push(cycle_path(&path[start..], node));
                }
                return;
            }
            BLACK => return,
            _ => {}
        }

        state.insert(node, GRAY);
        path.push(node);

        for child in self.inherited(node) {
            if self.contains(child) {
                self.collect_cycles(child, state, path, cycles);
            }
        }

        state.insert(node, BLACK);
        path.pop();
    }

    /// Administrative pre-write check: would giving `role` these inherited
    /// roles create a cycle?
    ///
    /// Self-inheritance is reported as `[A, A]`.
    pub fn check_inheritance(&self, role: &str, inherited: &[RoleId]) -> Result<()> {
        let mut candidate = self.clone();
        candidate.set_edges(role, inherited);

        // Only cycles reachable from the edited role matter, so depth is unbounded
        Walk::new(&candidate, role, usize::MAX).visit(role)
    }
}

fn cycle_path(stack: &[&str], closing: &str) -> Vec<RoleId> {
    stack
        .iter()
        .chain(std::iter::once(&closing))
        .map(|s| s.to_string())
        .collect()
}

/// State of a single expansion
struct Walk<'g> {
    graph: &'g RoleGraph,
    root: &'g str,
    max_depth: usize,
    state: HashMap<&'g str, u8>,
    path: Vec<&'g str>,
    order: Vec<RoleId>,
    dangling: Vec<ResolutionWarning>,
}

impl<'g> Walk<'g> {
    fn new(graph: &'g RoleGraph, root: &'g str, max_depth: usize) -> Self {
        Self {
            graph,
            root,
            max_depth,
            state: HashMap::new(),
            path: Vec::new(),
            order: Vec::new(),
            dangling: Vec::new(),
        }
    }

    fn visit(&mut self, node: &'g str) -> Result<()> {
        match self.state.get(node).copied().unwrap_or(WHITE) {
            GRAY => {
                // Node is on the stack: the path from its first occurrence is the cycle
                let start = self.path.iter().position(|n| *n == node).unwrap_or(0);
                return Err(AuthzError::Configuration {
                    cycle: cycle_path(&self.path[start..], node),
                });
            }
            BLACK => return Ok(()),
            _ => {}
        }

        if self.path.len() > self.max_depth {
            return Err(AuthzError::TraversalDepthExceeded {
                role: self.root.to_string(),
                depth: self.max_depth,
            });
        }

        self.state.insert(node, GRAY);
        self.path.push(node);
        self.order.push(node.to_string());

        let graph = self.graph;
        for child in graph.inherited(node) {
            if graph.contains(child) {
                self.visit(child)?;
            } else {
                self.dangling.push(ResolutionWarning::DanglingReference {
                    owner: node.to_string(),
                    kind: ReferenceKind::Role,
                    missing_id: child.clone(),
                });
            }
        }

        self.state.insert(node, BLACK);
        self.path.pop();

        Ok(())
    }
}
