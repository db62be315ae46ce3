use crate::pipeline::ProtocolPipeline;
use crate::transformer::ProtocolTransformer;
use crate::transitions::StateTransitions;
use crossgrade_types::ProtocolVersion;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MAX_PATH_LEN: usize = 50;

/// A resolved chain, ordered from the client-adjacent hop to the server-adjacent one.
pub type TransformerPath = Arc<[Arc<ProtocolTransformer>]>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("transformer '{transformer}' uses unknown protocol version {version}")]
    UnknownVersion { transformer: String, version: i32 },
    #[error("transformer '{0}' translates a version to itself")]
    SelfLoop(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no translation path from {client} to {server}")]
    NoPath {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },
    #[error("translation path from {client} to {server} needs {len} hops, more than the allowed {max}")]
    PathTooLong {
        client: ProtocolVersion,
        server: ProtocolVersion,
        len: usize,
        max: usize,
    },
}

/// Collects transformers and state transitions before the registry is frozen.
pub struct ProtocolRegistryBuilder {
    transformers: Vec<Arc<ProtocolTransformer>>,
    transitions: HashMap<ProtocolVersion, StateTransitions>,
    extra_versions: HashSet<ProtocolVersion>,
    max_path_len: usize,
}

impl Default for ProtocolRegistryBuilder {
    fn default() -> Self {
        Self {
            transformers: Vec::new(),
            transitions: HashMap::new(),
            extra_versions: HashSet::new(),
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

impl ProtocolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transformer: ProtocolTransformer) -> &mut Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    /// State transitions for connections whose backend speaks `server`.
    pub fn register_transitions(
        &mut self,
        server: ProtocolVersion,
        transitions: StateTransitions,
    ) -> &mut Self {
        self.transitions.insert(server, transitions);
        self
    }

    /// Accept a version outside the built-in list.
    pub fn register_version(&mut self, version: ProtocolVersion) -> &mut Self {
        self.extra_versions.insert(version);
        self
    }

    pub fn max_path_len(&mut self, max: usize) -> &mut Self {
        self.max_path_len = max;
        self
    }

    pub fn build(self) -> Result<ProtocolRegistry, RegistryError> {
        let known = |v: ProtocolVersion| v.is_known() || self.extra_versions.contains(&v);
        let mut edges: HashMap<ProtocolVersion, Vec<usize>> = HashMap::new();
        for (index, transformer) in self.transformers.iter().enumerate() {
            for version in [transformer.client_version(), transformer.server_version()] {
                if !known(version) {
                    return Err(RegistryError::UnknownVersion {
                        transformer: transformer.name().to_string(),
                        version: version.id(),
                    });
                }
            }
            if transformer.client_version() == transformer.server_version() {
                return Err(RegistryError::SelfLoop(transformer.name().to_string()));
            }
            edges
                .entry(transformer.client_version())
                .or_default()
                .push(index);
        }

        debug!("Protocol registry built with {} transformers", self.transformers.len());

        Ok(ProtocolRegistry {
            transformers: self.transformers,
            edges,
            transitions: self
                .transitions
                .into_iter()
                .map(|(version, t)| (version, Arc::new(t)))
                .collect(),
            max_path_len: self.max_path_len,
            cache: RwLock::new(HashMap::new()),
        })
    }
}

/// Every registered transformer plus the resolved-path cache. Immutable once built.
pub struct ProtocolRegistry {
    transformers: Vec<Arc<ProtocolTransformer>>,
    /// Outgoing transformer indices per client version, in registration order.
    edges: HashMap<ProtocolVersion, Vec<usize>>,
    transitions: HashMap<ProtocolVersion, Arc<StateTransitions>>,
    max_path_len: usize,
    cache: RwLock<HashMap<(ProtocolVersion, ProtocolVersion), TransformerPath>>,
}

impl ProtocolRegistry {
    pub fn builder() -> ProtocolRegistryBuilder {
        ProtocolRegistryBuilder::new()
    }

    pub fn transformers(&self) -> &[Arc<ProtocolTransformer>] {
        &self.transformers
    }

    pub fn max_path_len(&self) -> usize {
        self.max_path_len
    }

    /// Shortest chain of transformers letting `client` talk to `server`.
    pub fn resolve(
        &self,
        client: ProtocolVersion,
        server: ProtocolVersion,
    ) -> Result<TransformerPath, PipelineError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(path) = cache.get(&(client, server)) {
                return Ok(path.clone());
            }
        }

        let path: TransformerPath = self
            .search(client, server)?
            .into_iter()
            .map(|index| self.transformers[index].clone())
            .collect();

        if let Ok(mut cache) = self.cache.write() {
            cache.insert((client, server), path.clone());
        }
        Ok(path)
    }

    /// Breadth-first search by hop count. Outgoing edges are tried newest
    /// registration first, so among equally short paths the later transformer wins.
    fn search(
        &self,
        client: ProtocolVersion,
        server: ProtocolVersion,
    ) -> Result<Vec<usize>, PipelineError> {
        if client == server {
            return Ok(Vec::new());
        }

        let mut parent: HashMap<ProtocolVersion, (ProtocolVersion, usize)> = HashMap::new();
        let mut queue = VecDeque::from([client]);
        let mut found = false;

        'search: while let Some(version) = queue.pop_front() {
            let Some(outgoing) = self.edges.get(&version) else {
                continue;
            };
            for &index in outgoing.iter().rev() {
                let next = self.transformers[index].server_version();
                if next == client || parent.contains_key(&next) {
                    continue;
                }
                parent.insert(next, (version, index));
                if next == server {
                    found = true;
                    break 'search;
                }
                queue.push_back(next);
            }
        }

        if !found {
            return Err(PipelineError::NoPath { client, server });
        }

        let mut path = Vec::new();
        let mut cursor = server;
        while let Some(&(previous, index)) = parent.get(&cursor) {
            path.push(index);
            cursor = previous;
        }
        path.reverse();

        if path.len() > self.max_path_len {
            return Err(PipelineError::PathTooLong {
                client,
                server,
                len: path.len(),
                max: self.max_path_len,
            });
        }
        Ok(path)
    }

    /// Resolve and wrap the chain in a pipeline.
    pub fn pipeline(
        &self,
        client: ProtocolVersion,
        server: ProtocolVersion,
        debug: bool,
    ) -> Result<ProtocolPipeline, PipelineError> {
        let path = self.resolve(client, server)?;
        Ok(ProtocolPipeline::new(path, client, server).with_debug(debug))
    }

    /// Transitions for a backend version; empty if none were registered.
    pub fn transitions(&self, server: ProtocolVersion) -> Arc<StateTransitions> {
        self.transitions.get(&server).cloned().unwrap_or_default()
    }

    /// Client versions that can reach `server`, including `server` itself.
    pub fn supported_clients(&self, server: ProtocolVersion) -> Vec<ProtocolVersion> {
        let mut versions: Vec<ProtocolVersion> = self
            .edges
            .keys()
            .copied()
            .filter(|&client| self.resolve(client, server).is_ok())
            .collect();
        versions.push(server);
        versions.sort();
        versions.dedup();
        versions
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("transformers", &self.transformers.len())
            .field("max_path_len", &self.max_path_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ProtocolVersion = ProtocolVersion::new(1001, "a");
    const B: ProtocolVersion = ProtocolVersion::new(1002, "b");
    const C: ProtocolVersion = ProtocolVersion::new(1003, "c");
    const D: ProtocolVersion = ProtocolVersion::new(1004, "d");

    fn builder() -> ProtocolRegistryBuilder {
        let mut builder = ProtocolRegistry::builder();
        for v in [A, B, C, D] {
            builder.register_version(v);
        }
        builder
    }

    fn edge(name: &str, client: ProtocolVersion, server: ProtocolVersion) -> ProtocolTransformer {
        ProtocolTransformer::builder(name, client, server).build()
    }

    fn names(path: &TransformerPath) -> Vec<&str> {
        path.iter().map(|t| t.name()).collect()
    }

    #[test]
    fn test_same_version_is_empty() {
        let registry = builder().build().unwrap();
        assert!(registry.resolve(A, A).unwrap().is_empty());
    }

    #[test]
    fn test_shortest_path_wins() {
        let mut builder = builder();
        builder
            .register(edge("a-b", A, B))
            .register(edge("b-c", B, C))
            .register(edge("c-d", C, D))
            .register(edge("a-c", A, C));
        let registry = builder.build().unwrap();
        assert_eq!(names(&registry.resolve(A, D).unwrap()), vec!["a-c", "c-d"]);
        assert_eq!(names(&registry.resolve(B, D).unwrap()), vec!["b-c", "c-d"]);
    }

    #[test]
    fn test_tie_prefers_latest_registration() {
        let mut builder = builder();
        builder
            .register(edge("first", A, B))
            .register(edge("second", A, B));
        let registry = builder.build().unwrap();
        assert_eq!(names(&registry.resolve(A, B).unwrap()), vec!["second"]);
    }

    #[test]
    fn test_no_path() {
        let mut builder = builder();
        builder.register(edge("a-b", A, B));
        let registry = builder.build().unwrap();
        assert!(matches!(
            registry.resolve(B, A),
            Err(PipelineError::NoPath { client, server }) if client == B && server == A
        ));
        assert!(registry.resolve(A, D).is_err());
    }

    #[test]
    fn test_path_length_bound() {
        let mut builder = builder();
        builder
            .register(edge("a-b", A, B))
            .register(edge("b-c", B, C))
            .max_path_len(1);
        let registry = builder.build().unwrap();
        assert!(registry.resolve(A, B).is_ok());
        assert!(matches!(
            registry.resolve(A, C),
            Err(PipelineError::PathTooLong { len: 2, max: 1, .. })
        ));
    }

    #[test]
    fn test_cached_path_is_shared() {
        let mut builder = builder();
        builder.register(edge("a-b", A, B));
        let registry = builder.build().unwrap();
        let first = registry.resolve(A, B).unwrap();
        let second = registry.resolve(A, B).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut builder = ProtocolRegistry::builder();
        builder.register(edge("bad", A, B));
        assert!(matches!(
            builder.build(),
            Err(RegistryError::UnknownVersion { version: 1001, .. })
        ));
    }

    #[test]
    fn test_supported_clients() {
        let mut builder = builder();
        builder
            .register(edge("b-a", B, A))
            .register(edge("c-b", C, B))
            .register(edge("d-c", D, C));
        let registry = builder.build().unwrap();
        assert_eq!(registry.supported_clients(A), vec![A, B, C, D]);
        assert_eq!(registry.supported_clients(C), vec![C, D]);
    }
}
