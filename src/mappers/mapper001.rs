//! Mapper 001 (MMC1) implementation
//!
//! Banking is programmed through a 5-bit serial shift register: CPU writes to
//! $8000-$FFFF shift data bit 0 in LSB-first, and the fifth write latches the
//! value into the register selected by address bits 13-14:
//!
//! - $8000-$9FFF: control (mirroring bits 0-1, PRG mode bits 2-3, CHR mode bit 4)
//! - $A000-$BFFF: CHR bank 0
//! - $C000-$DFFF: CHR bank 1
//! - $E000-$FFFF: PRG bank
//!
//! A write with bit 7 set resets the shift register and ORs the control
//! register with $0C. The cartridge carries 32 KiB of RAM at $6000-$7FFF,
//! served by the mapper itself.
//!
//! Used by games like The Legend of Zelda, Metroid and Final Fantasy.

use bincode::{Decode, Encode};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{decode_blob, encode_blob, MappedRead, MappedWrite, Mapper, MapperStateError};
use crate::cartridge::Mirroring;

/// Size of the on-cartridge static RAM
const STATIC_RAM_SIZE: usize = 32 * 1024;

pub struct Mapper001 {
    prg_banks: u16,
    chr_banks: u16,

    /// Serial load register, filled LSB-first over five writes
    load: u8,

    /// Number of bits shifted into the load register so far
    load_count: u8,

    /// Control register: mirroring, PRG mode, CHR mode
    control: u8,

    /// 4 KiB CHR bank at PPU $0000 (4 KiB mode)
    chr_lo: u8,

    /// 4 KiB CHR bank at PPU $1000 (4 KiB mode)
    chr_hi: u8,

    /// 8 KiB CHR bank (8 KiB mode)
    chr_full: u8,

    /// 16 KiB PRG bank at CPU $8000
    prg_lo: u8,

    /// 16 KiB PRG bank at CPU $C000
    prg_hi: u8,

    /// 32 KiB PRG bank (32 KiB mode)
    prg_full: u8,

    mirror: Mirroring,

    /// Battery-backed cartridge RAM at $6000-$7FFF
    static_ram: Vec<u8>,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct Mapper001State {
    prg_banks: u16,
    chr_banks: u16,
    load: u8,
    load_count: u8,
    control: u8,
    chr_lo: u8,
    chr_hi: u8,
    chr_full: u8,
    prg_lo: u8,
    prg_hi: u8,
    prg_full: u8,
    mirror: Mirroring,
    static_ram: Vec<u8>,
}

impl Mapper001 {
    pub fn new(prg_banks: u16, chr_banks: u16) -> Self {
        let mut mapper = Mapper001 {
            prg_banks,
            chr_banks,
            load: 0,
            load_count: 0,
            control: 0,
            chr_lo: 0,
            chr_hi: 0,
            chr_full: 0,
            prg_lo: 0,
            prg_hi: 0,
            prg_full: 0,
            mirror: Mirroring::Horizontal,
            static_ram: vec![0; STATIC_RAM_SIZE],
        };
        mapper.reset();
        mapper
    }

    /// Latch the completed 5-bit value into the register selected by the
    /// address of the final write
    fn write_register(&mut self, addr: u16) {
        match (addr >> 13) & 0x03 {
            0 => {
                // Control register ($8000-$9FFF)
                self.control = self.load & 0x1F;
                self.mirror = match self.control & 0x03 {
                    0 => Mirroring::OneScreenLo,
                    1 => Mirroring::OneScreenHi,
                    2 => Mirroring::Vertical,
                    _ => Mirroring::Horizontal,
                };
            }
            1 => {
                // CHR bank 0 ($A000-$BFFF)
                if self.control & 0b10000 != 0 {
                    self.chr_lo = self.load & 0x1F;
                } else {
                    self.chr_full = self.load & 0x1E;
                }
            }
            2 => {
                // CHR bank 1 ($C000-$DFFF), only meaningful in 4 KiB mode
                if self.control & 0b10000 != 0 {
                    self.chr_hi = self.load & 0x1F;
                }
            }
            3 => {
                // PRG bank ($E000-$FFFF)
                match (self.control >> 2) & 0x03 {
                    0 | 1 => {
                        // 32 KiB bank at $8000
                        self.prg_full = (self.load & 0x0E) >> 1;
                    }
                    2 => {
                        // First bank fixed at $8000, switchable at $C000
                        self.prg_lo = 0;
                        self.prg_hi = self.load & 0x0F;
                    }
                    _ => {
                        // Switchable at $8000, last bank fixed at $C000
                        self.prg_lo = self.load & 0x0F;
                        self.prg_hi = (self.prg_banks - 1) as u8;
                    }
                }
            }
            _ => unreachable!(),
        }

        debug!(
            "MMC1 register latch: addr=${:04X} control=${:02X} chr=({},{},{}) prg=({},{},{})",
            addr,
            self.control,
            self.chr_lo,
            self.chr_hi,
            self.chr_full,
            self.prg_lo,
            self.prg_hi,
            self.prg_full
        );
    }

    #[cfg(test)]
    pub(crate) fn control(&self) -> u8 {
        self.control
    }
}

impl Mapper for Mapper001 {
    fn cpu_map_read(&self, addr: u16) -> Option<MappedRead> {
        match addr {
            0x6000..=0x7FFF => Some(MappedRead::Data(
                self.static_ram[(addr & 0x1FFF) as usize],
            )),
            0x8000..=0xFFFF => {
                if self.control & 0b01000 != 0 {
                    // 16 KiB mode
                    if addr < 0xC000 {
                        Some(MappedRead::Offset(
                            u32::from(self.prg_lo) * 0x4000 + u32::from(addr & 0x3FFF),
                        ))
                    } else {
                        Some(MappedRead::Offset(
                            u32::from(self.prg_hi) * 0x4000 + u32::from(addr & 0x3FFF),
                        ))
                    }
                } else {
                    // 32 KiB mode
                    Some(MappedRead::Offset(
                        u32::from(self.prg_full) * 0x8000 + u32::from(addr & 0x7FFF),
                    ))
                }
            }
            _ => None,
        }
    }

    fn cpu_map_write(&mut self, addr: u16, data: u8) -> Option<MappedWrite> {
        match addr {
            0x6000..=0x7FFF => {
                self.static_ram[(addr & 0x1FFF) as usize] = data;
                Some(MappedWrite::Absorbed)
            }
            0x8000..=0xFFFF => {
                if data & 0x80 != 0 {
                    // Reset serial loading
                    self.load = 0;
                    self.load_count = 0;
                    self.control |= 0x0C;
                } else {
                    // Data arrives LSB-first, so insert at bit 4
                    self.load >>= 1;
                    self.load |= (data & 0x01) << 4;
                    self.load_count += 1;

                    if self.load_count == 5 {
                        self.write_register(addr);
                        self.load = 0;
                        self.load_count = 0;
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn ppu_map_read(&self, addr: u16) -> Option<u32> {
        if addr > 0x1FFF {
            return None;
        }
        if self.chr_banks == 0 {
            return Some(u32::from(addr));
        }
        if self.control & 0b10000 != 0 {
            // 4 KiB banks
            if addr < 0x1000 {
                Some(u32::from(self.chr_lo) * 0x1000 + u32::from(addr & 0x0FFF))
            } else {
                Some(u32::from(self.chr_hi) * 0x1000 + u32::from(addr & 0x0FFF))
            }
        } else {
            // 8 KiB bank
            Some(u32::from(self.chr_full) * 0x2000 + u32::from(addr & 0x1FFF))
        }
    }

    fn ppu_map_write(&self, addr: u16) -> Option<u32> {
        if addr <= 0x1FFF && self.chr_banks == 0 {
            Some(u32::from(addr))
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.control = 0x1C;
        self.load = 0;
        self.load_count = 0;
        self.chr_lo = 0;
        self.chr_hi = 0;
        self.chr_full = 0;
        self.prg_lo = 0;
        self.prg_full = 0;
        self.prg_hi = (self.prg_banks - 1) as u8;
    }

    fn mirror_mode(&self) -> Mirroring {
        self.mirror
    }

    fn serialize(&self) -> Result<Vec<u8>, MapperStateError> {
        encode_blob(&Mapper001State {
            prg_banks: self.prg_banks,
            chr_banks: self.chr_banks,
            load: self.load,
            load_count: self.load_count,
            control: self.control,
            chr_lo: self.chr_lo,
            chr_hi: self.chr_hi,
            chr_full: self.chr_full,
            prg_lo: self.prg_lo,
            prg_hi: self.prg_hi,
            prg_full: self.prg_full,
            mirror: self.mirror,
            static_ram: self.static_ram.clone(),
        })
    }

    fn deserialize(&mut self, blob: &[u8]) -> Result<(), MapperStateError> {
        let state: Mapper001State = decode_blob(blob)?;
        if state.prg_banks != self.prg_banks
            || state.chr_banks != self.chr_banks
            || state.static_ram.len() != STATIC_RAM_SIZE
        {
            return Err(MapperStateError::LayoutMismatch);
        }
        self.load = state.load;
        self.load_count = state.load_count;
        self.control = state.control;
        self.chr_lo = state.chr_lo;
        self.chr_hi = state.chr_hi;
        self.chr_full = state.chr_full;
        self.prg_lo = state.prg_lo;
        self.prg_hi = state.prg_hi;
        self.prg_full = state.prg_full;
        self.mirror = state.mirror;
        self.static_ram = state.static_ram;
        Ok(())
    }
}
