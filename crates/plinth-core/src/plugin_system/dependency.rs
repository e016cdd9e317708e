use std::collections::{BTreeMap, HashSet};
use std::fmt;
use semver::Version;
use serde::Serialize;
use thiserror::Error;

use crate::plugin_system::version::{self, VersionRange};

/// Represents a dependency on another plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginDependency {
    /// The name of the required plugin
    pub plugin_name: String,

    /// The version range that is acceptable
    pub version_range: Option<VersionRange>,

    /// Whether this is a hard requirement or optional dependency
    pub required: bool,
}

impl PluginDependency {
    /// Create a new required dependency with a specific version range
    pub fn required(plugin_name: &str, version_range: VersionRange) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range: Some(version_range),
            required: true,
        }
    }

    /// Create a new required dependency with any version
    pub fn required_any(plugin_name: &str) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range: None,
            required: true,
        }
    }

    /// Create a new optional dependency with a specific version range
    pub fn optional(plugin_name: &str, version_range: VersionRange) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range: Some(version_range),
            required: false,
        }
    }

    /// Create a new optional dependency with any version
    pub fn optional_any(plugin_name: &str) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range: None,
            required: false,
        }
    }

    /// Check if this dependency is compatible with the given plugin version string
    pub fn is_compatible_with(&self, version_str: &str) -> bool {
        match self.version_range {
            Some(ref range) => match version::parse_version(version_str) {
                Ok(v) => range.includes(&v),
                Err(_) => {
                    log::warn!(
                        "Could not parse version string '{}' for compatibility check with plugin '{}'",
                        version_str,
                        self.plugin_name
                    );
                    false
                }
            },
            // No version range means any version is acceptable
            None => true,
        }
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement_type = if self.required { "Requires" } else { "Optional" };
        match &self.version_range {
            Some(range) => write!(
                f,
                "{} plugin: {} (version: {})",
                requirement_type,
                self.plugin_name,
                range.constraint_string()
            ),
            None => write!(
                f,
                "{} plugin: {} (any version)",
                requirement_type, self.plugin_name
            ),
        }
    }
}

/// Error that can occur when resolving dependencies
#[derive(Debug, Error)]
pub enum DependencyError {
    /// The required plugin was not found
    #[error("Required dependency '{dependency}' of '{required_by}' not found")]
    MissingDependency {
        dependency: String,
        required_by: String,
    },

    /// Dependency cycle detected, named by its path
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),
}

/// A node carrying its declared version and the ranges it requires of others.
/// Input to [`DependencyResolver::detect_conflicts`].
#[derive(Debug, Clone)]
pub struct VersionedNode {
    pub version: String,
    pub dependencies: BTreeMap<String, VersionRange>,
}

/// A dependency edge whose target's declared version does not satisfy the
/// requested range.
#[derive(Debug, Clone, Serialize)]
pub struct VersionConflict {
    pub from: String,
    pub to: String,
    pub required_range: String,
    pub actual_version: String,
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' requires '{}' version '{}' but found '{}'",
            self.from, self.to, self.required_range, self.actual_version
        )
    }
}

/// Resolves plugin activation order from declared dependencies.
///
/// Performs a depth-first topological sort over the dependency graph.
/// Iteration roots come from a `BTreeMap`, so the resulting order is
/// deterministic for a given input.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Produces an activation order in which every dependency precedes its
    /// dependents.
    ///
    /// Fails with [`DependencyError::CircularDependency`] when a node is
    /// revisited while still on the DFS stack, and with
    /// [`DependencyError::MissingDependency`] when a *required* dependency
    /// id is not a key of `nodes`. Missing optional dependencies are skipped.
    pub fn resolve(
        nodes: &BTreeMap<String, Vec<PluginDependency>>,
    ) -> Result<Vec<String>, DependencyError> {
        let mut order = Vec::with_capacity(nodes.len());
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for id in nodes.keys() {
            Self::visit(id, nodes, &mut visited, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        id: &str,
        nodes: &BTreeMap<String, Vec<PluginDependency>>,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<(), DependencyError> {
        if let Some(pos) = stack.iter().position(|s| s == id) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(id.to_string());
            return Err(DependencyError::CircularDependency(cycle));
        }
        if visited.contains(id) {
            return Ok(());
        }

        stack.push(id.to_string());
        if let Some(deps) = nodes.get(id) {
            for dep in deps {
                if !nodes.contains_key(&dep.plugin_name) {
                    if dep.required {
                        return Err(DependencyError::MissingDependency {
                            dependency: dep.plugin_name.clone(),
                            required_by: id.to_string(),
                        });
                    }
                    continue;
                }
                Self::visit(&dep.plugin_name, nodes, visited, stack, order)?;
            }
        }
        stack.pop();

        visited.insert(id.to_string());
        order.push(id.to_string());
        Ok(())
    }

    /// Boolean cycle check over a plain adjacency map.
    ///
    /// Unlike [`resolve`](Self::resolve), references to ids that are not keys
    /// of the map are ignored rather than treated as errors.
    pub fn is_acyclic(dep_map: &BTreeMap<String, Vec<String>>) -> bool {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        fn walk(
            id: &str,
            dep_map: &BTreeMap<String, Vec<String>>,
            visited: &mut HashSet<String>,
            stack: &mut Vec<String>,
        ) -> bool {
            if stack.iter().any(|s| s == id) {
                return false;
            }
            if visited.contains(id) {
                return true;
            }
            stack.push(id.to_string());
            if let Some(deps) = dep_map.get(id) {
                for dep in deps {
                    if dep_map.contains_key(dep) && !walk(dep, dep_map, visited, stack) {
                        return false;
                    }
                }
            }
            stack.pop();
            visited.insert(id.to_string());
            true
        }

        dep_map
            .keys()
            .all(|id| walk(id, dep_map, &mut visited, &mut stack))
    }

    /// Checks every dependency edge whose target exists against the target's
    /// declared version. Returns the complete list of mismatches, empty when
    /// the graph is clean.
    pub fn detect_conflicts(nodes: &BTreeMap<String, VersionedNode>) -> Vec<VersionConflict> {
        let mut conflicts = Vec::new();
        for (id, node) in nodes {
            for (dep_id, range) in &node.dependencies {
                let Some(target) = nodes.get(dep_id) else {
                    continue;
                };
                let satisfied = match version::parse_version(&target.version) {
                    Ok(v) => range.includes(&v),
                    Err(_) => {
                        log::warn!(
                            "Could not parse declared version '{}' of '{}' during conflict detection",
                            target.version,
                            dep_id
                        );
                        false
                    }
                };
                if !satisfied {
                    conflicts.push(VersionConflict {
                        from: id.clone(),
                        to: dep_id.clone(),
                        required_range: range.constraint_string().to_string(),
                        actual_version: target.version.clone(),
                    });
                }
            }
        }
        conflicts
    }

    /// Picks the highest available version satisfying every constraint.
    /// See [`version::find_best_version`].
    pub fn find_best_version(
        available: &[String],
        constraints: &[VersionRange],
    ) -> Option<Version> {
        version::find_best_version(available, constraints)
    }
}
