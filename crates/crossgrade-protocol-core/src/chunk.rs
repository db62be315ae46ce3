use crate::codec::*;
use bytes::{Buf, BufMut, BytesMut};

/// Block entries in a section.
pub const SECTION_BLOCKS: usize = 4096;
/// Biome entries in a section (4x4x4).
pub const SECTION_BIOMES: usize = 64;

/// Which data a paletted container holds; decides the palette thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    BlockStates,
    Biomes,
}

impl ContainerKind {
    fn size(self) -> usize {
        match self {
            ContainerKind::BlockStates => SECTION_BLOCKS,
            ContainerKind::Biomes => SECTION_BIOMES,
        }
    }

    /// Largest bits-per-entry that still uses an indirect palette.
    fn max_indirect_bits(self) -> u8 {
        match self {
            ContainerKind::BlockStates => 8,
            ContainerKind::Biomes => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Palette {
    /// Every entry has this value; no data array is needed.
    Single(i32),
    /// Entries are indices into this list.
    Indirect(Vec<i32>),
    /// Entries are global ids.
    Direct,
}

/// A 1.18+ paletted container as sent in chunk data.
#[derive(Debug, Clone, PartialEq)]
pub struct PalettedContainer {
    pub kind: ContainerKind,
    pub bits_per_entry: u8,
    pub palette: Palette,
    pub data: Vec<i64>,
}

impl PalettedContainer {
    pub fn single(kind: ContainerKind, value: i32) -> Self {
        Self {
            kind,
            bits_per_entry: 0,
            palette: Palette::Single(value),
            data: Vec::new(),
        }
    }

    pub fn read(buf: &mut BytesMut, kind: ContainerKind) -> CodecResult<Self> {
        let bits_per_entry = read_u8(buf)?;
        let palette = if bits_per_entry == 0 {
            Palette::Single(read_varint(buf)?)
        } else if bits_per_entry <= kind.max_indirect_bits() {
            Palette::Indirect(read_varint_array(buf)?)
        } else if bits_per_entry <= 32 {
            Palette::Direct
        } else {
            return Err(CodecError::InvalidPalette(bits_per_entry));
        };
        let data = read_long_array(buf)?;
        if bits_per_entry > 0 {
            let entries_per_long = 64 / bits_per_entry as usize;
            if data.len() * entries_per_long < kind.size() {
                return Err(CodecError::InvalidLength(data.len() as i32));
            }
        }
        Ok(Self {
            kind,
            bits_per_entry,
            palette,
            data,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_entry);
        match &self.palette {
            Palette::Single(value) => write_varint(buf, *value),
            Palette::Indirect(entries) => write_varint_array(buf, entries),
            Palette::Direct => {}
        }
        write_long_array(buf, &self.data);
    }

    fn raw_index(&self, index: usize) -> u64 {
        let entries_per_long = 64 / self.bits_per_entry as usize;
        let long_index = index / entries_per_long;
        let bit_index = (index % entries_per_long) * self.bits_per_entry as usize;
        let mask = (1u64 << self.bits_per_entry) - 1;
        self.data
            .get(long_index)
            .map_or(0, |long| (*long as u64 >> bit_index) & mask)
    }

    /// Value stored at `index` (y * 256 + z * 16 + x for block states).
    pub fn get(&self, index: usize) -> i32 {
        match &self.palette {
            Palette::Single(value) => *value,
            Palette::Indirect(entries) => entries
                .get(self.raw_index(index) as usize)
                .copied()
                .unwrap_or(0),
            Palette::Direct => self.raw_index(index) as i32,
        }
    }

    /// Apply an id mapping to every entry. Palettes are rewritten in place;
    /// direct containers are unpacked and repacked with the same width.
    pub fn remap(&mut self, mut f: impl FnMut(i32) -> i32) {
        match &mut self.palette {
            Palette::Single(value) => *value = f(*value),
            Palette::Indirect(entries) => {
                for entry in entries.iter_mut() {
                    *entry = f(*entry);
                }
            }
            Palette::Direct => self.repack_direct(f),
        }
    }

    fn repack_direct(&mut self, mut f: impl FnMut(i32) -> i32) {
        let values: Vec<i32> = (0..self.kind.size()).map(|i| f(self.get(i))).collect();
        let bits = self.bits_per_entry as usize;
        let entries_per_long = 64 / bits;
        let mask = (1u64 << bits) - 1;
        let mut data = vec![0i64; self.kind.size().div_ceil(entries_per_long)];
        for (i, value) in values.into_iter().enumerate() {
            let long_index = i / entries_per_long;
            let bit_index = (i % entries_per_long) * bits;
            data[long_index] |= ((value as u64 & mask) << bit_index) as i64;
        }
        self.data = data;
    }
}

/// A 16x16x16 chunk section.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSection {
    /// Non-air block count.
    pub block_count: i16,
    pub block_states: PalettedContainer,
    pub biomes: PalettedContainer,
}

impl ChunkSection {
    pub fn empty() -> Self {
        Self {
            block_count: 0,
            block_states: PalettedContainer::single(ContainerKind::BlockStates, 0),
            biomes: PalettedContainer::single(ContainerKind::Biomes, 0),
        }
    }

    pub fn read(buf: &mut BytesMut) -> CodecResult<Self> {
        if buf.remaining() < 2 {
            return Err(CodecError::NotEnoughData);
        }
        let block_count = buf.get_i16();
        let block_states = PalettedContainer::read(buf, ContainerKind::BlockStates)?;
        let biomes = PalettedContainer::read(buf, ContainerKind::Biomes)?;
        Ok(Self {
            block_count,
            block_states,
            biomes,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_i16(self.block_count);
        self.block_states.write(buf);
        self.biomes.write(buf);
    }

    pub fn get_block(&self, x: usize, y: usize, z: usize) -> i32 {
        self.block_states.get(y * 256 + z * 16 + x)
    }
}
