//! NES cartridge implementation
//!
//! This module handles the iNES cartridge format (1.0 plus the 2.0 size
//! extension), including the optional trainer, the PRG/CHR backing stores and
//! the mapper that remaps bus addresses into them. The cartridge gets first
//! claim on every CPU and PPU bus transaction; addresses it declines fall
//! through to the rest of the memory map.

use bincode::{Decode, Encode};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mappers::{self, MappedRead, MappedWrite, Mapper, MapperStateError};

/// Size of the iNES header
pub const INES_HEADER_SIZE: usize = 16;

/// Size of a PRG ROM bank (16 KiB)
pub const PRG_BANK_SIZE: usize = 16 * 1024;

/// Size of a CHR ROM/RAM bank (8 KiB)
pub const CHR_BANK_SIZE: usize = 8 * 1024;

/// Size of the optional trainer blob
pub const TRAINER_SIZE: usize = 512;

/// Errors that can occur when parsing ROM images
#[derive(Error, Debug)]
pub enum RomError {
    #[error("invalid iNES header")]
    InvalidHeader,

    #[error("unsupported mapper: {0}")]
    UnsupportedMapper(u8),

    #[error("ROM image shorter than the sizes declared in its header")]
    InvalidRomSize,
}

/// Nametable mirroring modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum Mirroring {
    /// Horizontal mirroring (vertical arrangement of nametables)
    Horizontal,

    /// Vertical mirroring (horizontal arrangement of nametables)
    Vertical,

    /// Single-screen mirroring, lower bank
    OneScreenLo,

    /// Single-screen mirroring, upper bank
    OneScreenHi,

    /// Defer to the solder-pad setting in the iNES header
    Hardware,
}

/// The raw 16-byte iNES header, with named accessors over the flag bytes
#[derive(Debug, Clone, Copy)]
pub struct InesHeader {
    bytes: [u8; INES_HEADER_SIZE],
}

impl InesHeader {
    pub fn parse(data: &[u8]) -> Result<Self, RomError> {
        if data.len() < INES_HEADER_SIZE {
            return Err(RomError::InvalidHeader);
        }
        let mut bytes = [0u8; INES_HEADER_SIZE];
        bytes.copy_from_slice(&data[..INES_HEADER_SIZE]);
        let header = InesHeader { bytes };
        if !header.is_valid() {
            return Err(RomError::InvalidHeader);
        }
        Ok(header)
    }

    pub fn from_bytes(bytes: [u8; INES_HEADER_SIZE]) -> Self {
        InesHeader { bytes }
    }

    pub fn bytes(&self) -> &[u8; INES_HEADER_SIZE] {
        &self.bytes
    }

    /// "NES" followed by the MS-DOS EOF character
    pub fn is_valid(&self) -> bool {
        self.bytes[0..4] == [0x4E, 0x45, 0x53, 0x1A]
    }

    fn flags6(&self) -> u8 {
        self.bytes[6]
    }

    fn flags7(&self) -> u8 {
        self.bytes[7]
    }

    fn flags8(&self) -> u8 {
        self.bytes[8]
    }

    /// iNES 2.0 images are flagged in bits 2-3 of flags 7
    pub fn is_nes2(&self) -> bool {
        self.flags7() & 0x0C == 0x08
    }

    /// Number of 16 KiB PRG banks, including the iNES 2.0 high bits
    pub fn prg_banks(&self) -> u16 {
        let lo = u16::from(self.bytes[4]);
        if self.is_nes2() {
            (u16::from(self.flags8() & 0x07) << 8) | lo
        } else {
            lo
        }
    }

    /// Number of 8 KiB CHR banks, including the iNES 2.0 high bits
    pub fn chr_banks(&self) -> u16 {
        let lo = u16::from(self.bytes[5]);
        if self.is_nes2() {
            (u16::from((self.flags8() >> 3) & 0x1F) << 8) | lo
        } else {
            lo
        }
    }

    pub fn mapper_number(&self) -> u8 {
        (self.flags6() >> 4) | (self.flags7() & 0xF0)
    }

    pub fn has_trainer(&self) -> bool {
        self.flags6() & 0x04 != 0
    }

    pub fn has_battery(&self) -> bool {
        self.flags6() & 0x02 != 0
    }

    /// Solder-pad mirroring: 0 = horizontal, 1 = vertical
    pub fn mirroring(&self) -> Mirroring {
        if self.flags6() & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }
}

/// Represents an NES cartridge: header, optional trainer, PRG/CHR stores and
/// the mapper that owns the address translation
pub struct Cartridge {
    header: InesHeader,
    trainer: Vec<u8>,
    prg: Vec<u8>,
    chr: Vec<u8>,
    mapper: Box<dyn Mapper + Send>,
}

impl Cartridge {
    /// Create a cartridge from ROM data in iNES format
    pub fn from_bytes(data: &[u8]) -> Result<Self, RomError> {
        let header = InesHeader::parse(data)?;

        let mapper_number = header.mapper_number();
        let prg_banks = header.prg_banks();
        let chr_banks = header.chr_banks();

        let trainer_size = if header.has_trainer() { TRAINER_SIZE } else { 0 };
        let prg_size = usize::from(prg_banks) * PRG_BANK_SIZE;
        let chr_size = usize::from(chr_banks) * CHR_BANK_SIZE;

        if prg_banks == 0
            || data.len() < INES_HEADER_SIZE + trainer_size + prg_size + chr_size
        {
            return Err(RomError::InvalidRomSize);
        }

        let mapper = mappers::create_mapper(mapper_number, prg_banks, chr_banks)
            .ok_or(RomError::UnsupportedMapper(mapper_number))?;

        let trainer_start = INES_HEADER_SIZE;
        let prg_start = trainer_start + trainer_size;
        let chr_start = prg_start + prg_size;

        let trainer = data[trainer_start..prg_start].to_vec();
        let prg = data[prg_start..chr_start].to_vec();
        let chr = if chr_banks == 0 {
            // No CHR ROM: the cartridge supplies 8 KiB of CHR RAM instead
            vec![0; CHR_BANK_SIZE]
        } else {
            data[chr_start..chr_start + chr_size].to_vec()
        };

        info!(
            "Loaded cartridge - mapper {}, PRG {} x 16KB, CHR {} {}, mirroring {:?}, battery {}",
            mapper_number,
            prg_banks,
            if chr_banks == 0 { 1 } else { chr_banks },
            if chr_banks == 0 { "x 8KB RAM" } else { "x 8KB ROM" },
            header.mirroring(),
            header.has_battery(),
        );

        Ok(Cartridge {
            header,
            trainer,
            prg,
            chr,
            mapper,
        })
    }

    /// CPU bus read; `None` means the cartridge declined the address
    pub fn cpu_read(&self, addr: u16) -> Option<u8> {
        match self.mapper.cpu_map_read(addr)? {
            MappedRead::Offset(offset) => {
                Some(self.prg.get(offset as usize).copied().unwrap_or(0))
            }
            MappedRead::Data(data) => Some(data),
        }
    }

    /// CPU bus write; returns whether the cartridge claimed the address
    pub fn cpu_write(&mut self, addr: u16, data: u8) -> bool {
        match self.mapper.cpu_map_write(addr, data) {
            Some(MappedWrite::Offset(offset)) => {
                if let Some(slot) = self.prg.get_mut(offset as usize) {
                    *slot = data;
                }
                true
            }
            Some(MappedWrite::Absorbed) => true,
            None => false,
        }
    }

    /// PPU bus read; `None` means the cartridge declined the address
    pub fn ppu_read(&self, addr: u16) -> Option<u8> {
        let offset = self.mapper.ppu_map_read(addr)?;
        Some(self.chr.get(offset as usize).copied().unwrap_or(0))
    }

    /// PPU bus write; returns whether the cartridge claimed the address
    pub fn ppu_write(&mut self, addr: u16, data: u8) -> bool {
        match self.mapper.ppu_map_write(addr) {
            Some(offset) => {
                if let Some(slot) = self.chr.get_mut(offset as usize) {
                    *slot = data;
                }
                true
            }
            None => false,
        }
    }

    /// Current mirroring: the mapper's unless it defers to the header
    pub fn mirror_mode(&self) -> Mirroring {
        match self.mapper.mirror_mode() {
            Mirroring::Hardware => self.header.mirroring(),
            mode => mode,
        }
    }

    pub fn reset(&mut self) {
        self.mapper.reset();
    }

    /// Whether the mapper is asserting its IRQ line
    pub fn irq_state(&self) -> bool {
        self.mapper.irq_state()
    }

    /// Acknowledge the mapper IRQ line
    pub fn irq_clear(&mut self) {
        self.mapper.irq_clear();
    }

    /// PPU scanline hook, drives the MMC3 IRQ counter
    pub fn scanline_tick(&mut self) {
        self.mapper.scanline_tick();
    }

    pub fn header(&self) -> &InesHeader {
        &self.header
    }

    pub fn mapper_number(&self) -> u8 {
        self.header.mapper_number()
    }

    pub fn trainer(&self) -> &[u8] {
        &self.trainer
    }

    pub fn prg(&self) -> &[u8] {
        &self.prg
    }

    pub fn chr(&self) -> &[u8] {
        &self.chr
    }

    /// Serialize the mapper's internal state into a version-tagged blob
    pub fn serialize_mapper(&self) -> Result<Vec<u8>, MapperStateError> {
        self.mapper.serialize()
    }

    /// Restore a previously saved machine image into this cartridge
    ///
    /// The caller has already verified that the saved mapper number matches;
    /// the PRG/CHR stores are replaced wholesale and the mapper state blob is
    /// decoded on top of the live mapper.
    pub fn restore(
        &mut self,
        header: InesHeader,
        trainer: Vec<u8>,
        prg: Vec<u8>,
        chr: Vec<u8>,
        mapper_blob: &[u8],
    ) -> Result<(), MapperStateError> {
        self.mapper.deserialize(mapper_blob)?;
        self.header = header;
        self.trainer = trainer;
        self.prg = prg;
        self.chr = chr;
        Ok(())
    }
}
