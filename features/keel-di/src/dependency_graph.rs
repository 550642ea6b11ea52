use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};

use thiserror::Error;

use crate::{
    errors::InjectError,
    key::{Key, Target},
    provider::{Producer, Registration},
    scope::Scope,
    types::TypeInfo,
};

/// Registration `id` as cached in scope `scope`
type NodeId = (u64, u64);

/// Static view of everything resolvable from one scope
///
/// Built from declared dependencies only, nothing is constructed. Used to report cycles and
/// missing dependencies up front instead of on first use.
pub struct DependencyGraph {
    map: BTreeMap<NodeId, DependencyGraphEntry>,
    errors: Vec<DependencyGraphError>,
}

struct DependencyGraphEntry {
    key: Key,
    dependencies: Vec<DependencyEdge>,
}

struct DependencyEdge {
    target: NodeId,
    deferred: bool,
}

impl DependencyGraph {
    /// Collects every registration visible from `scope` and what they depend on
    pub fn for_scope(scope: &Scope) -> Self {
        let mut graph = DependencyGraph {
            map: BTreeMap::new(),
            errors: Vec::new(),
        };

        let mut queue: VecDeque<(Scope, Key)> = VecDeque::new();
        let mut seen = HashSet::new();
        for visible in scope.chain() {
            for key in visible.keys() {
                if seen.insert(key.clone()) {
                    queue.push_back((scope.clone(), key));
                }
            }
        }

        let mut visited = HashSet::new();
        while let Some((from, key)) = queue.pop_front() {
            let Some((registration, owner)) = graph.locate(&from, &key, None) else {
                continue;
            };
            let id = (owner.id(), registration.id);
            if !visited.insert(id) {
                continue;
            }

            let dependencies = graph.edges(&owner, &registration, &mut queue);
            graph.map.insert(
                id,
                DependencyGraphEntry {
                    key: registration.primary.clone(),
                    dependencies,
                },
            );
        }

        graph
    }

    /// Registration answering `key` from `from`, with the scope its instance is cached in
    fn locate(
        &mut self,
        from: &Scope,
        key: &Key,
        required_by: Option<&Key>,
    ) -> Option<(Arc<Registration>, Scope)> {
        match from.lookup(key) {
            Ok(Some((registration, found_in))) => {
                let owner = if registration.allow_multiple {
                    from.clone()
                } else {
                    found_in
                };
                Some((registration, owner))
            }
            Ok(None) => {
                let implicit = *key.target() == Target::Type(TypeInfo::of::<Scope>());
                if let (Some(required_by), false, false) = (required_by, key.is_optional(), implicit)
                {
                    self.errors.push(DependencyGraphError::MissingDependency {
                        dependency: key.plain(),
                        required_by: required_by.clone(),
                    });
                }
                None
            }
            Err(error) => {
                self.errors.push(DependencyGraphError::Lookup(error));
                None
            }
        }
    }

    fn edges(
        &mut self,
        owner: &Scope,
        registration: &Registration,
        queue: &mut VecDeque<(Scope, Key)>,
    ) -> Vec<DependencyEdge> {
        let mut requests = Vec::new();
        match &registration.producer {
            Producer::Value(_) => {}
            Producer::Factory(factory) => {
                for dependency in factory.dependencies().iter() {
                    requests.push((owner.clone(), dependency.key.clone()));
                }
            }
            Producer::Xref { scope, key } => match scope.upgrade() {
                Some(target) => requests.push((target, key.clone())),
                None => self.errors.push(DependencyGraphError::Lookup(InjectError::ScopeClosed(
                    format!("target of {}", registration.primary),
                ))),
            },
        }

        let mut edges = Vec::new();
        for (from, key) in requests {
            let Some((target, target_owner)) = self.locate(&from, &key, Some(&registration.primary))
            else {
                continue;
            };
            edges.push(DependencyEdge {
                target: (target_owner.id(), target.id),
                deferred: key.is_deferred(),
            });
            queue.push_back((from, key));
        }
        edges
    }

    /// Validate the graph
    ///
    /// Returns a list of all issues
    pub fn check(&self) -> Result<(), DependencyGraphErrors> {
        let mut checked = HashSet::new();
        let mut errors = self.errors.clone();
        for (id, entry) in &self.map {
            let mut dependency_chain = Vec::new();
            check_recurse(
                self,
                &mut checked,
                &mut errors,
                &mut dependency_chain,
                *id,
                entry,
            );
        }

        if !errors.is_empty() {
            return Err(DependencyGraphErrors { errors });
        }

        return Ok(());

        fn check_recurse(
            graph: &DependencyGraph,
            checked: &mut HashSet<NodeId>,
            errors: &mut Vec<DependencyGraphError>,
            dependency_chain: &mut Vec<(NodeId, Key)>,
            id: NodeId,
            entry: &DependencyGraphEntry,
        ) {
            // Circular Dependency Check
            if let Some(start) = dependency_chain.iter().position(|(node, _)| *node == id) {
                let mut chain: Vec<Key> = dependency_chain[start..]
                    .iter()
                    .map(|(_, key)| key.clone())
                    .collect();
                chain.push(entry.key.clone());

                errors.push(DependencyGraphError::CircularDependency {
                    from: dependency_chain[start].1.clone(),
                    to: entry.key.clone(),
                    chain,
                });
                return;
            }

            // Skip other checks if already checked
            if !checked.insert(id) {
                return;
            };

            dependency_chain.push((id, entry.key.clone()));

            for dependency in &entry.dependencies {
                if dependency.deferred {
                    // Resolved after construction, cannot deadlock
                    continue;
                }
                let Some(next_entry) = graph.map.get(&dependency.target) else {
                    continue;
                };

                check_recurse(
                    graph,
                    checked,
                    errors,
                    dependency_chain,
                    dependency.target,
                    next_entry,
                );
            }

            dependency_chain.pop();
        }
    }

    /// Number of registrations reachable from the scope
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Error, Debug, Clone)]
pub enum DependencyGraphError {
    #[error("{required_by} needs {dependency} but it is missing")]
    MissingDependency { dependency: Key, required_by: Key },
    #[error("A Circular Dependency exists between {from} and {to} through {chain:?} - Consider using `Deferred`")]
    CircularDependency { from: Key, to: Key, chain: Vec<Key> },
    #[error(transparent)]
    Lookup(InjectError),
}
impl std::fmt::Display for DependencyGraphErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push("The dependency graph had one or more errors:".to_string());
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

#[derive(Error, Debug, Clone)]
pub struct DependencyGraphErrors {
    pub errors: Vec<DependencyGraphError>,
}
