pub mod mapping;

pub use mapping::*;
