//! Mapper implementations for NES cartridges
//!
//! The NES uses on-cartridge memory mappers to expand the address space of
//! the hardware. This module provides implementations for mappers 000, 001,
//! 002 and 004, which cover a large percentage of the NES game library.
//!
//! A mapper translates CPU/PPU bus addresses into offsets of the cartridge's
//! PRG/CHR backing stores. An operation either declines the address ("not
//! handled", the bus keeps decoding), forwards an offset into the backing
//! store, or serves the data itself (on-cartridge RAM).

mod mapper000; // NROM
mod mapper001; // MMC1
mod mapper002; // UxROM
mod mapper004; // MMC3

pub use mapper000::Mapper000;
pub use mapper001::Mapper001;
pub use mapper002::Mapper002;
pub use mapper004::Mapper004;

use thiserror::Error;

use crate::cartridge::Mirroring;

/// Version tag prefixed to every serialized mapper blob
pub const MAPPER_BLOB_VERSION: u8 = 1;

/// Result of a CPU-side address mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedRead {
    /// Address maps to this offset of the PRG backing store
    Offset(u32),

    /// The mapper served the byte itself (internal cartridge RAM)
    Data(u8),
}

/// Result of a CPU-side write mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedWrite {
    /// Write goes to this offset of the PRG backing store
    Offset(u32),

    /// The mapper absorbed the byte itself (internal cartridge RAM)
    Absorbed,
}

/// Errors raised while serializing or restoring mapper state blobs
#[derive(Error, Debug)]
pub enum MapperStateError {
    #[error("mapper state blob truncated or malformed: {0}")]
    Malformed(#[from] bincode::error::DecodeError),

    #[error("failed to encode mapper state: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("unsupported mapper state version {0}")]
    Version(u8),

    #[error("mapper state bank layout mismatch")]
    LayoutMismatch,
}

/// Trait for NES mappers
pub trait Mapper: Send {
    /// Map a CPU bus read to a PRG store offset or self-served data
    fn cpu_map_read(&self, addr: u16) -> Option<MappedRead>;

    /// Map a CPU bus write; register writes mutate banking state
    fn cpu_map_write(&mut self, addr: u16, data: u8) -> Option<MappedWrite>;

    /// Map a PPU bus read to a CHR store offset
    fn ppu_map_read(&self, addr: u16) -> Option<u32>;

    /// Map a PPU bus write to a CHR store offset (CHR RAM only)
    fn ppu_map_write(&self, addr: u16) -> Option<u32>;

    /// Reset the mapper to its power-on banking state
    fn reset(&mut self);

    /// Current nametable mirroring; `Hardware` defers to the iNES header
    fn mirror_mode(&self) -> Mirroring {
        Mirroring::Hardware
    }

    /// Whether the mapper is asserting its IRQ line
    fn irq_state(&self) -> bool {
        false
    }

    /// Acknowledge the IRQ line
    fn irq_clear(&mut self) {}

    /// Called by the PPU at dot 260 of every rendering-enabled scanline
    fn scanline_tick(&mut self) {}

    /// Serialize the mapper state into a version-tagged blob
    fn serialize(&self) -> Result<Vec<u8>, MapperStateError>;

    /// Restore the mapper state from a blob produced by [`Mapper::serialize`]
    fn deserialize(&mut self, blob: &[u8]) -> Result<(), MapperStateError>;
}

/// Create a new mapper instance for the given iNES mapper number
///
/// Returns `None` for mapper numbers outside the supported set {0, 1, 2, 4}.
pub fn create_mapper(
    mapper_number: u8,
    prg_banks: u16,
    chr_banks: u16,
) -> Option<Box<dyn Mapper + Send>> {
    match mapper_number {
        0 => Some(Box::new(Mapper000::new(prg_banks, chr_banks))),
        1 => Some(Box::new(Mapper001::new(prg_banks, chr_banks))),
        2 => Some(Box::new(Mapper002::new(prg_banks, chr_banks))),
        4 => Some(Box::new(Mapper004::new(prg_banks, chr_banks))),
        _ => None,
    }
}

/// Bincode configuration for mapper blobs: little-endian, fixed-width ints
pub(crate) fn blob_config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Encode a mapper state struct behind the shared version tag
pub(crate) fn encode_blob<S: bincode::Encode>(state: &S) -> Result<Vec<u8>, MapperStateError> {
    let mut blob = vec![MAPPER_BLOB_VERSION];
    blob.extend(bincode::encode_to_vec(state, blob_config())?);
    Ok(blob)
}

/// Decode a mapper state struct, validating the version tag
pub(crate) fn decode_blob<S: bincode::Decode<()>>(blob: &[u8]) -> Result<S, MapperStateError> {
    let (&version, body) = blob
        .split_first()
        .ok_or(MapperStateError::Version(0))?;
    if version != MAPPER_BLOB_VERSION {
        return Err(MapperStateError::Version(version));
    }
    let (state, _) = bincode::decode_from_slice(body, blob_config())?;
    Ok(state)
}
