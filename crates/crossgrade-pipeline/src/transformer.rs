use crate::connection::ProtocolInfo;
use crate::storage::ConnectionStorage;
use crossgrade_mappings::MappingData;
use crossgrade_protocol_core::{
    ConnectionState, Direction, FieldType, FieldValue, PacketEnvelope, ProtocolError,
    ProtocolResult, Value,
};
use crossgrade_types::ProtocolVersion;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// What a handler sees besides the packet itself.
pub struct PacketContext<'a> {
    pub storage: &'a mut ConnectionStorage,
    pub info: &'a ProtocolInfo,
    pub transformer: &'a ProtocolTransformer,
}

impl PacketContext<'_> {
    pub fn mappings(&self) -> Option<&Arc<MappingData>> {
        self.transformer.mappings()
    }
}

pub type Handler =
    Arc<dyn Fn(&mut PacketEnvelope, &mut PacketContext<'_>) -> ProtocolResult<()> + Send + Sync>;

type ValueFn = Arc<dyn Fn(Value) -> ProtocolResult<Value> + Send + Sync>;

type InitHook = Arc<dyn Fn(&mut ConnectionStorage, &ProtocolInfo) + Send + Sync>;

#[derive(Clone)]
enum Step {
    Map(FieldType),
    MapTo(FieldType, FieldType),
    Transform(FieldType, FieldType, ValueFn),
    Read(FieldType),
    Create(FieldType, Value),
    Handler(Handler),
}

/// Ordered steps applied to a packet by one hop.
///
/// ```ignore
/// FieldChain::new()
///     .map(FieldType::Int)
///     .transform(FieldType::VarInt, FieldType::VarInt, |id: i32| Ok(id + 1))
///     .handler(|env, ctx| { /* ... */ Ok(()) });
/// ```
#[derive(Clone, Default)]
pub struct FieldChain {
    steps: Vec<Step>,
}

impl FieldChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain that only cancels the packet.
    pub fn cancel() -> Self {
        Self::new().handler(|env, _| {
            env.cancel();
            Ok(())
        })
    }

    /// Pass one field through unchanged.
    pub fn map(mut self, ty: FieldType) -> Self {
        self.steps.push(Step::Map(ty));
        self
    }

    /// Read a field as `from` and write the same value as `to`.
    pub fn map_to(mut self, from: FieldType, to: FieldType) -> Self {
        self.steps.push(Step::MapTo(from, to));
        self
    }

    /// Read a field as `from`, convert it, write it as `to`.
    pub fn transform<A, B>(
        mut self,
        from: FieldType,
        to: FieldType,
        f: impl Fn(A) -> ProtocolResult<B> + Send + Sync + 'static,
    ) -> Self
    where
        A: FieldValue,
        B: FieldValue,
    {
        let expected = from.name();
        let value_fn: ValueFn = Arc::new(move |value: Value| {
            let found = value.kind_name();
            let input = A::from_value(value).ok_or(ProtocolError::TypeMismatch { expected, found })?;
            f(input).map(FieldValue::into_value)
        });
        self.steps.push(Step::Transform(from, to, value_fn));
        self
    }

    /// Read a field and drop it.
    pub fn read(mut self, ty: FieldType) -> Self {
        self.steps.push(Step::Read(ty));
        self
    }

    /// Write a constant field.
    pub fn create<T: FieldValue>(mut self, ty: FieldType, value: T) -> Self {
        self.steps.push(Step::Create(ty, value.into_value()));
        self
    }

    pub fn handler(
        mut self,
        f: impl Fn(&mut PacketEnvelope, &mut PacketContext<'_>) -> ProtocolResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.steps.push(Step::Handler(Arc::new(f)));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, stopping early once the packet is cancelled.
    pub fn apply(&self, env: &mut PacketEnvelope, ctx: &mut PacketContext<'_>) -> ProtocolResult<()> {
        for step in &self.steps {
            if env.is_cancelled() {
                break;
            }
            match step {
                Step::Map(ty) => {
                    env.passthrough::<Value>(ty)?;
                }
                Step::MapTo(from, to) => {
                    let value = env.read_value(from)?;
                    env.write_value(to.clone(), value);
                }
                Step::Transform(from, to, f) => {
                    let value = env.read_value(from)?;
                    env.write_value(to.clone(), f(value)?);
                }
                Step::Read(ty) => {
                    env.read_value(ty)?;
                }
                Step::Create(ty, value) => env.write_value(ty.clone(), value.clone()),
                Step::Handler(handler) => handler(env, ctx)?,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FieldChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldChain")
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// The id a packet leaves a hop with, and the steps applied on the way.
#[derive(Debug, Clone)]
pub struct Remap {
    pub new_id: i32,
    pub chain: FieldChain,
}

type RemapTable = HashMap<(ConnectionState, i32), Remap>;

/// Rewrites packets between two adjacent protocol versions.
pub struct ProtocolTransformer {
    name: String,
    client_version: ProtocolVersion,
    server_version: ProtocolVersion,
    clientbound: RemapTable,
    serverbound: RemapTable,
    init_hooks: Vec<InitHook>,
    mappings: Option<Arc<MappingData>>,
}

impl ProtocolTransformer {
    pub fn builder(
        name: impl Into<String>,
        client_version: ProtocolVersion,
        server_version: ProtocolVersion,
    ) -> TransformerBuilder {
        TransformerBuilder {
            inner: ProtocolTransformer {
                name: name.into(),
                client_version,
                server_version,
                clientbound: HashMap::new(),
                serverbound: HashMap::new(),
                init_hooks: Vec::new(),
                mappings: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_version(&self) -> ProtocolVersion {
        self.client_version
    }

    pub fn server_version(&self) -> ProtocolVersion {
        self.server_version
    }

    pub fn mappings(&self) -> Option<&Arc<MappingData>> {
        self.mappings.as_ref()
    }

    /// The rewrite registered for a packet id entering this hop.
    pub fn remap(&self, direction: Direction, state: ConnectionState, id: i32) -> Option<&Remap> {
        self.table(direction).get(&(state, id))
    }

    pub fn registered(&self, direction: Direction) -> usize {
        self.table(direction).len()
    }

    /// Run the per-connection init hooks.
    pub fn init(&self, storage: &mut ConnectionStorage, info: &ProtocolInfo) {
        for hook in &self.init_hooks {
            hook(storage, info);
        }
    }

    fn table(&self, direction: Direction) -> &RemapTable {
        match direction {
            Direction::Clientbound => &self.clientbound,
            Direction::Serverbound => &self.serverbound,
        }
    }
}

impl std::fmt::Debug for ProtocolTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolTransformer")
            .field("name", &self.name)
            .field("client_version", &self.client_version)
            .field("server_version", &self.server_version)
            .finish_non_exhaustive()
    }
}

pub struct TransformerBuilder {
    inner: ProtocolTransformer,
}

impl TransformerBuilder {
    pub fn register_clientbound(self, state: ConnectionState, old: i32, new: i32, chain: FieldChain) -> Self {
        self.insert(Direction::Clientbound, state, old, new, chain, false)
    }

    pub fn register_serverbound(self, state: ConnectionState, old: i32, new: i32, chain: FieldChain) -> Self {
        self.insert(Direction::Serverbound, state, old, new, chain, false)
    }

    /// Register over an existing entry without a warning.
    pub fn replace_clientbound(self, state: ConnectionState, old: i32, new: i32, chain: FieldChain) -> Self {
        self.insert(Direction::Clientbound, state, old, new, chain, true)
    }

    pub fn replace_serverbound(self, state: ConnectionState, old: i32, new: i32, chain: FieldChain) -> Self {
        self.insert(Direction::Serverbound, state, old, new, chain, true)
    }

    pub fn cancel_clientbound(self, state: ConnectionState, id: i32) -> Self {
        self.insert(Direction::Clientbound, state, id, id, FieldChain::cancel(), false)
    }

    pub fn cancel_serverbound(self, state: ConnectionState, id: i32) -> Self {
        self.insert(Direction::Serverbound, state, id, id, FieldChain::cancel(), false)
    }

    /// Called for every connection whose pipeline includes this transformer.
    pub fn on_connection_init(
        mut self,
        hook: impl Fn(&mut ConnectionStorage, &ProtocolInfo) + Send + Sync + 'static,
    ) -> Self {
        self.inner.init_hooks.push(Arc::new(hook));
        self
    }

    pub fn mappings(mut self, mappings: Arc<MappingData>) -> Self {
        self.inner.mappings = Some(mappings);
        self
    }

    pub fn is_registered(&self, direction: Direction, state: ConnectionState, old: i32) -> bool {
        self.inner.remap(direction, state, old).is_some()
    }

    pub fn build(self) -> ProtocolTransformer {
        self.inner
    }

    fn insert(
        mut self,
        direction: Direction,
        state: ConnectionState,
        old: i32,
        new: i32,
        chain: FieldChain,
        override_existing: bool,
    ) -> Self {
        let table = match direction {
            Direction::Clientbound => &mut self.inner.clientbound,
            Direction::Serverbound => &mut self.inner.serverbound,
        };
        let previous = table.insert((state, old), Remap { new_id: new, chain });
        if previous.is_some() && !override_existing {
            warn!(
                "Transformer '{}' registers {} {:?} packet 0x{:02X} twice, keeping the last",
                self.inner.name, direction, state, old
            );
        }
        self
    }
}
