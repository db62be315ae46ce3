//! 1.14.4 clients on 1.14 servers. Only the trade list grew.

use crate::data::PairData;
use crate::pair_mappings;
use crate::ProtocolOptions;
use anyhow::Result;
use crossgrade_mappings::MappingData;
use crossgrade_pipeline::{FieldChain, ProtocolTransformer};
use crossgrade_protocol_core::{ConnectionState, FieldType, FlatItem, PacketEnvelope, ProtocolResult};
use crossgrade_types::{V1_14, V1_14_4};
use std::sync::Arc;

const TRADE_LIST: i32 = 0x27;

pub fn transformer(data: Option<PairData>, options: &ProtocolOptions) -> Result<ProtocolTransformer> {
    let (mappings, data) = pair_mappings(MappingData::new(), data, options)?;

    let builder = ProtocolTransformer::builder("1.14.4->1.14", V1_14_4, V1_14)
        .mappings(Arc::new(mappings))
        .register_clientbound(
            ConnectionState::Play,
            TRADE_LIST,
            TRADE_LIST,
            FieldChain::new().map(FieldType::VarInt).handler(|env, _| {
                let size: u8 = env.passthrough(&FieldType::UnsignedByte)?;
                for _ in 0..size {
                    passthrough_item(env)?;
                    passthrough_item(env)?;
                    if env.passthrough::<bool>(&FieldType::Boolean)? {
                        passthrough_item(env)?;
                    }
                    env.passthrough::<bool>(&FieldType::Boolean)?;
                    env.passthrough::<i32>(&FieldType::Int)?;
                    env.passthrough::<i32>(&FieldType::Int)?;
                    env.passthrough::<i32>(&FieldType::Int)?;
                    env.passthrough::<i32>(&FieldType::Int)?;
                    env.passthrough::<f32>(&FieldType::Float)?;
                    // demand
                    env.write(FieldType::Int, 0i32);
                }
                env.passthrough::<i32>(&FieldType::VarInt)?;
                env.passthrough::<i32>(&FieldType::VarInt)?;
                env.passthrough::<bool>(&FieldType::Boolean)?;
                // can restock
                env.write(FieldType::Boolean, false);
                Ok(())
            }),
        );

    let builder = match &data {
        Some(data) => data.register_packets(builder),
        None => builder,
    };
    Ok(builder.build())
}

fn passthrough_item(env: &mut PacketEnvelope) -> ProtocolResult<()> {
    env.passthrough::<Option<FlatItem>>(&FieldType::FlatVarIntItem)?;
    Ok(())
}
