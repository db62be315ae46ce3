pub mod nbt;

pub use nbt::*;
