//! Mapper 002 (UxROM) implementation
//!
//! Any CPU write to $8000-$FFFF selects the 16 KiB PRG bank mapped at $8000;
//! the bank at $C000 is fixed to the last one. CHR is a single 8 KiB bank,
//! usually RAM.
//!
//! Used by games like Mega Man, Castlevania and Contra.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use super::{decode_blob, encode_blob, MappedRead, MappedWrite, Mapper, MapperStateError};

pub struct Mapper002 {
    prg_banks: u16,
    chr_banks: u16,

    /// Switchable 16 KiB bank at CPU $8000
    prg_lo: u8,

    /// Fixed 16 KiB bank at CPU $C000 (last bank)
    prg_hi: u8,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct Mapper002State {
    prg_banks: u16,
    chr_banks: u16,
    prg_lo: u8,
    prg_hi: u8,
}

impl Mapper002 {
    pub fn new(prg_banks: u16, chr_banks: u16) -> Self {
        let mut mapper = Mapper002 {
            prg_banks,
            chr_banks,
            prg_lo: 0,
            prg_hi: 0,
        };
        mapper.reset();
        mapper
    }
}

impl Mapper for Mapper002 {
    fn cpu_map_read(&self, addr: u16) -> Option<MappedRead> {
        match addr {
            0x8000..=0xBFFF => Some(MappedRead::Offset(
                u32::from(self.prg_lo) * 0x4000 + u32::from(addr & 0x3FFF),
            )),
            0xC000..=0xFFFF => Some(MappedRead::Offset(
                u32::from(self.prg_hi) * 0x4000 + u32::from(addr & 0x3FFF),
            )),
            _ => None,
        }
    }

    fn cpu_map_write(&mut self, addr: u16, data: u8) -> Option<MappedWrite> {
        if addr >= 0x8000 {
            self.prg_lo = data & 0x0F;
        }
        None
    }

    fn ppu_map_read(&self, addr: u16) -> Option<u32> {
        if addr <= 0x1FFF {
            Some(u32::from(addr))
        } else {
            None
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
        self.prg_lo = 0;
        self.prg_hi = (self.prg_banks - 1) as u8;
    }

    fn serialize(&self) -> Result<Vec<u8>, MapperStateError> {
        encode_blob(&Mapper002State {
            prg_banks: self.prg_banks,
            chr_banks: self.chr_banks,
            prg_lo: self.prg_lo,
            prg_hi: self.prg_hi,
        })
    }

    fn deserialize(&mut self, blob: &[u8]) -> Result<(), MapperStateError> {
        let state: Mapper002State = decode_blob(blob)?;
        if state.prg_banks != self.prg_banks || state.chr_banks != self.chr_banks {
            return Err(MapperStateError::LayoutMismatch);
        }
        self.prg_lo = state.prg_lo;
        self.prg_hi = state.prg_hi;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_select_switches_low_region_only() {
        let mut mapper = Mapper002::new(8, 0);
        mapper.cpu_map_write(0x8000, 0x03);

        assert_eq!(
            mapper.cpu_map_read(0x8000),
            Some(MappedRead::Offset(3 * 0x4000))
        );
        // High region stays pinned to the last bank
        assert_eq!(
            mapper.cpu_map_read(0xC000),
            Some(MappedRead::Offset(7 * 0x4000))
        );
    }

    #[test]
    fn reset_restores_bank_zero() {
        let mut mapper = Mapper002::new(4, 0);
        mapper.cpu_map_write(0x9000, 0x02);
        mapper.reset();
        assert_eq!(mapper.cpu_map_read(0x8000), Some(MappedRead::Offset(0)));
        assert_eq!(
            mapper.cpu_map_read(0xC000),
            Some(MappedRead::Offset(3 * 0x4000))
        );
    }
}
