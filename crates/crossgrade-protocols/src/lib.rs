pub mod base;
pub mod data;
pub mod v1_13_1;
pub mod v1_13_2;
pub mod v1_14;
pub mod v1_14_4;
pub mod v1_15;
pub mod v1_20_3;
pub mod v1_21;

#[cfg(test)]
mod testing;

use anyhow::Result;
use crossgrade_mappings::MappingData;
use crossgrade_pipeline::{ProtocolRegistryBuilder, ProtocolTransformer};
use crossgrade_protocol_core::Direction;
use crossgrade_types::{ProtocolVersion, V1_13, V1_13_1, V1_13_2, V1_14, V1_14_4, V1_15, V1_20_2, V1_20_3, V1_20_5, V1_21};
use data::PairData;
use std::path::PathBuf;
use tracing::info;

pub use data::{PacketIdTables, PacketIds};

/// Settings the bundled version pairs read while being built.
#[derive(Debug, Clone, Default)]
pub struct ProtocolOptions {
    /// Directory holding `<server>-<client>.json` pair files.
    pub data_dir: Option<PathBuf>,
    /// Stop logging ids that have no mapping.
    pub suppress_conversion_warnings: bool,
    /// Sent to 1.15 clients, which expect the server to say whether to skip the death screen.
    pub instant_respawn: bool,
}

impl ProtocolOptions {
    fn pair_data(&self, server: ProtocolVersion, client: ProtocolVersion) -> Result<Option<PairData>> {
        match &self.data_dir {
            Some(dir) => PairData::load(dir, server, client),
            None => Ok(None),
        }
    }
}

/// Merge a pair file's id tables over the built-in ones.
pub(crate) fn pair_mappings(
    mut builtin: MappingData,
    mut data: Option<PairData>,
    options: &ProtocolOptions,
) -> Result<(MappingData, Option<PairData>)> {
    if let Some(data) = data.as_mut() {
        builtin.merge(data.take_mappings()?);
    }
    if options.suppress_conversion_warnings {
        builtin.suppress_warnings();
    }
    Ok((builtin, data))
}

/// Register every bundled version pair and the per-version state transitions.
pub fn register_all(builder: &mut ProtocolRegistryBuilder, options: &ProtocolOptions) -> Result<()> {
    type Build = fn(Option<PairData>, &ProtocolOptions) -> Result<ProtocolTransformer>;
    let pairs: [(ProtocolVersion, ProtocolVersion, Build); 7] = [
        (V1_13, V1_13_1, v1_13_1::transformer),
        (V1_13_1, V1_13_2, v1_13_2::transformer),
        (V1_13_2, V1_14, v1_14::transformer),
        (V1_14, V1_14_4, v1_14_4::transformer),
        (V1_14_4, V1_15, v1_15::transformer),
        (V1_20_2, V1_20_3, v1_20_3::transformer),
        (V1_20_5, V1_21, v1_21::transformer),
    ];

    for (server, client, build) in pairs {
        let transformer = build(options.pair_data(server, client)?, options)?;
        info!(
            "Registered {} ({} clientbound, {} serverbound packets)",
            transformer.name(),
            transformer.registered(Direction::Clientbound),
            transformer.registered(Direction::Serverbound),
        );
        builder.register(transformer);
    }
    base::register_transitions(builder);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use bytes::BytesMut;
    use crossgrade_pipeline::{EntityTracker, ProtocolRegistry, UserConnection};
    use crossgrade_protocol_core::{
        read_bool, read_i32, read_i64, read_string, read_u8, read_varint, write_bool, write_i32, write_string,
        write_u8, ConnectionState,
    };

    fn registry() -> ProtocolRegistry {
        let mut builder = ProtocolRegistry::builder();
        register_all(&mut builder, &ProtocolOptions::default()).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_full_chain_resolves() {
        let registry = registry();
        let path = registry.resolve(V1_15, V1_13).unwrap();
        let names: Vec<&str> = path.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["1.15->1.14.4", "1.14.4->1.14", "1.14->1.13.2", "1.13.2->1.13.1", "1.13.1->1.13"]
        );
        assert!(registry.resolve(V1_21, V1_20_3).is_err());
        assert_eq!(registry.resolve(V1_20_3, V1_20_2).unwrap().len(), 1);
        assert_eq!(registry.resolve(V1_21, V1_20_5).unwrap().len(), 1);
    }

    #[test]
    fn test_no_path_between_eras() {
        let registry = registry();
        assert!(UserConnection::new(&registry, V1_20_3, V1_15, ConnectionState::Login, false).is_err());
        assert!(registry.resolve(V1_13, V1_13_2).is_err());
    }

    #[test]
    fn test_supported_clients_of_1_13() {
        let registry = registry();
        let clients = registry.supported_clients(V1_13);
        assert_eq!(clients.first(), Some(&V1_13));
        assert_eq!(clients.last(), Some(&V1_15));
        assert_eq!(clients.len(), 6);
    }

    /// A 1.15 client joining a 1.13 server through five hops.
    #[test]
    fn test_join_game_across_five_hops() {
        let registry = registry();
        let path = registry.resolve(V1_15, V1_13).unwrap();
        let transformers: Vec<ProtocolTransformer> = vec![
            v1_15::transformer(None, &ProtocolOptions::default()).unwrap(),
            v1_14_4::transformer(None, &ProtocolOptions::default()).unwrap(),
            v1_14::transformer(None, &ProtocolOptions::default()).unwrap(),
            v1_13_2::transformer(None, &ProtocolOptions::default()).unwrap(),
            v1_13_1::transformer(None, &ProtocolOptions::default()).unwrap(),
        ];
        assert_eq!(path.len(), transformers.len());
        let mut h = Harness::chain(transformers);

        // 1.13 join game: entity, gamemode, dimension, difficulty, max players, level type, reduced debug.
        let mut buf = BytesMut::new();
        write_i32(&mut buf, 42);
        write_u8(&mut buf, 1);
        write_i32(&mut buf, 0);
        write_u8(&mut buf, 2);
        write_u8(&mut buf, 20);
        write_string(&mut buf, "default");
        write_bool(&mut buf, false);

        let mut result = h.transform(Direction::Clientbound, 0x25, buf);
        assert!(result.is_forwarded());
        assert_eq!(result.packets.len(), 2);
        let join = result.packets.remove(0);
        let difficulty = result.packets.remove(0);
        assert_eq!(join.id, 0x26);

        // 1.15 join game: entity, gamemode, dimension, seed, max players, level type,
        // view distance, reduced debug, show death screen.
        let mut out = join.payload;
        assert_eq!(read_i32(&mut out).unwrap(), 42);
        assert_eq!(read_u8(&mut out).unwrap(), 1);
        assert_eq!(read_i32(&mut out).unwrap(), 0);
        assert_eq!(read_i64(&mut out).unwrap(), 0);
        assert_eq!(read_u8(&mut out).unwrap(), 20);
        assert_eq!(read_string(&mut out, 16).unwrap(), "default");
        assert_eq!(read_varint(&mut out).unwrap(), 64);
        assert!(!read_bool(&mut out).unwrap());
        assert!(read_bool(&mut out).unwrap());
        assert!(out.is_empty());

        // The difficulty moved out of join game in 1.14 and was shifted by 1.15.
        assert_eq!(difficulty.id, 0x0E);
        let mut out = difficulty.payload;
        assert_eq!(read_u8(&mut out).unwrap(), 2);
        assert!(!read_bool(&mut out).unwrap());

        assert_eq!(h.storage.get::<EntityTracker>().unwrap().client_entity_id(), Some(42));
    }

    #[test]
    fn test_login_state_follows_backend() {
        let registry = registry();
        let mut conn = UserConnection::new(&registry, V1_21, V1_20_5, ConnectionState::Login, false).unwrap();
        conn.transform(Direction::Serverbound, 0x03, BytesMut::new()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Configuration);
        conn.transform(Direction::Serverbound, 0x03, BytesMut::new()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Play);

        let mut conn = UserConnection::new(&registry, V1_14_4, V1_13, ConnectionState::Login, false).unwrap();
        let mut success = BytesMut::new();
        write_string(&mut success, "00000000-0000-0000-0000-000000000000");
        write_string(&mut success, "Steve");
        conn.transform(Direction::Clientbound, 0x02, success).unwrap();
        assert_eq!(conn.state(), ConnectionState::Play);
    }
}
