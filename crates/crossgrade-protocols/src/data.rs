use anyhow::{Context, Result};
use crossgrade_mappings::{MappingData, MappingFile};
use crossgrade_pipeline::{FieldChain, TransformerBuilder};
use crossgrade_protocol_core::{ComponentLayout, ConnectionState, Direction};
use crossgrade_types::ProtocolVersion;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Packet id pairs `(old, new)` per state, for one direction.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PacketIds {
    pub login: Vec<(i32, i32)>,
    pub configuration: Vec<(i32, i32)>,
    pub play: Vec<(i32, i32)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PacketIdTables {
    pub clientbound: PacketIds,
    pub serverbound: PacketIds,
}

/// Optional data shipped for one version pair in `<server>-<client>.json`.
#[derive(Debug, Default, Deserialize)]
pub struct PairData {
    #[serde(flatten)]
    pub ids: MappingFile,
    #[serde(default)]
    pub client_components: Option<ComponentLayout>,
    #[serde(default)]
    pub server_components: Option<ComponentLayout>,
    #[serde(default)]
    pub packets: PacketIdTables,
}

impl PairData {
    pub fn file_name(server: ProtocolVersion, client: ProtocolVersion) -> String {
        format!("{}-{}.json", server.name(), client.name())
    }

    /// Read the pair's file from `dir`. A missing file is not an error.
    pub fn load(dir: &Path, server: ProtocolVersion, client: ProtocolVersion) -> Result<Option<Self>> {
        let path = dir.join(Self::file_name(server, client));
        if !path.exists() {
            debug!("No pair data at {}", path.display());
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let data: PairData = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!("Loaded pair data for {} -> {} from {}", client, server, path.display());
        Ok(Some(data))
    }

    /// Build the pair's id tables, moving them out of the file data.
    pub fn take_mappings(&mut self) -> Result<MappingData> {
        Ok(MappingData::from_file(std::mem::take(&mut self.ids))?)
    }

    /// Component layouts for both sides, when the file has them.
    pub fn layouts(&mut self) -> Option<(Arc<ComponentLayout>, Arc<ComponentLayout>)> {
        match (self.client_components.take(), self.server_components.take()) {
            (Some(client), Some(server)) => Some((Arc::new(client), Arc::new(server))),
            _ => None,
        }
    }

    /// Register the plain id remaps the code does not already handle.
    pub fn register_packets(&self, mut builder: TransformerBuilder) -> TransformerBuilder {
        let tables = [
            (Direction::Clientbound, &self.packets.clientbound),
            (Direction::Serverbound, &self.packets.serverbound),
        ];
        for (direction, ids) in tables {
            let states = [
                (ConnectionState::Login, &ids.login),
                (ConnectionState::Configuration, &ids.configuration),
                (ConnectionState::Play, &ids.play),
            ];
            for (state, pairs) in states {
                for &(old, new) in pairs {
                    if builder.is_registered(direction, state, old) {
                        continue;
                    }
                    builder = match direction {
                        Direction::Clientbound => builder.register_clientbound(state, old, new, FieldChain::new()),
                        Direction::Serverbound => builder.register_serverbound(state, old, new, FieldChain::new()),
                    };
                }
            }
        }
        builder
    }
}
