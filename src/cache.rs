//! Client-side cache of server resources with an explicit invalidation table.
//!
//! Entries are keyed by resource and scope (the list view or one entity). A mutation
//! never invalidates by guesswork: [`Mutation::invalidations`] names exactly the keys
//! that can hold a stale copy of what changed.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Workflow,
    Agent,
    KnowledgeBase,
    Skill,
    Connector,
    Dataset,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Workflow => "workflow",
            Resource::Agent => "agent",
            Resource::KnowledgeBase => "knowledge_base",
            Resource::Skill => "skill",
            Resource::Connector => "connector",
            Resource::Dataset => "dataset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    List,
    Detail(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource: Resource,
    pub scope: Scope,
}

impl ResourceKey {
    pub fn list(resource: Resource) -> Self {
        Self {
            resource,
            scope: Scope::List,
        }
    }

    pub fn detail(resource: Resource, id: impl Into<String>) -> Self {
        Self {
            resource,
            scope: Scope::Detail(id.into()),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::List => write!(f, "{}/list", self.resource.as_str()),
            Scope::Detail(id) => write!(f, "{}/{}", self.resource.as_str(), id),
        }
    }
}

/// A change made through the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum Mutation {
    Created { resource: Resource },
    Updated { resource: Resource, id: String },
    Deleted { resource: Resource, id: String },
    /// Running a workflow changes its last-run status, shown in both views.
    WorkflowRun { workflow_id: String },
}

impl Mutation {
    /// The invalidation table: every cache key that may hold a stale copy after this
    /// mutation.
    ///
    /// | mutation       | invalidated                         |
    /// |----------------|-------------------------------------|
    /// | `Created`      | list of the resource                |
    /// | `Updated`      | list + detail of the entity         |
    /// | `Deleted`      | list + detail of the entity         |
    /// | `WorkflowRun`  | workflow list + detail of the workflow |
    pub fn invalidations(&self) -> Vec<ResourceKey> {
        match self {
            Mutation::Created { resource } => vec![ResourceKey::list(*resource)],
            Mutation::Updated { resource, id } | Mutation::Deleted { resource, id } => vec![
                ResourceKey::list(*resource),
                ResourceKey::detail(*resource, id.clone()),
            ],
            Mutation::WorkflowRun { workflow_id } => vec![
                ResourceKey::list(Resource::Workflow),
                ResourceKey::detail(Resource::Workflow, workflow_id.clone()),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries actually removed by mutations or explicit invalidation.
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-wide query cache.
#[derive(Debug, Clone)]
pub struct QueryCache<V> {
    entries: AHashMap<ResourceKey, V>,
    stats: CacheStats,
}

impl<V> Default for QueryCache<V> {
    fn default() -> Self {
        Self {
            entries: AHashMap::new(),
            stats: CacheStats::default(),
        }
    }
}

impl<V> QueryCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &ResourceKey) -> Option<&V> {
        match self.entries.get(key) {
            Some(value) => {
                self.stats.hits += 1;
                Some(value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Returns the cached value, fetching and storing it on a miss.
    pub fn get_or_fetch<E>(
        &mut self,
        key: ResourceKey,
        fetch: impl FnOnce(&ResourceKey) -> Result<V, E>,
    ) -> Result<&V, E> {
        if self.entries.contains_key(&key) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            tracing::debug!(key = %key, "query cache miss");
            let value = fetch(&key)?;
            self.entries.insert(key.clone(), value);
        }
        Ok(&self.entries[&key])
    }

    pub fn insert(&mut self, key: ResourceKey, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drops one entry. Returns whether it was cached.
    pub fn invalidate(&mut self, key: &ResourceKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.invalidations += 1;
        }
        removed
    }

    /// Applies a mutation's row of the invalidation table and returns the keys that
    /// were actually dropped.
    pub fn apply(&mut self, mutation: &Mutation) -> Vec<ResourceKey> {
        let dropped: Vec<ResourceKey> = mutation
            .invalidations()
            .into_iter()
            .filter(|key| self.invalidate(key))
            .collect();
        tracing::debug!(?mutation, dropped = dropped.len(), "invalidated query cache");
        dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
