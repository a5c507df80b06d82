//! Mapper 000 (NROM) implementation
//!
//! No bank switching. 16 KiB PRG images mirror $8000-$BFFF into $C000-$FFFF;
//! 32 KiB images map flat. CHR is a single fixed 8 KiB bank, writable only
//! when the cartridge carries CHR RAM.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use super::{decode_blob, encode_blob, MappedRead, MappedWrite, Mapper, MapperStateError};

pub struct Mapper000 {
    prg_banks: u16,
    chr_banks: u16,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct Mapper000State {
    prg_banks: u16,
    chr_banks: u16,
}

impl Mapper000 {
    pub fn new(prg_banks: u16, chr_banks: u16) -> Self {
        Mapper000 {
            prg_banks,
            chr_banks,
        }
    }

    fn prg_mask(&self) -> u16 {
        if self.prg_banks > 1 {
            0x7FFF
        } else {
            0x3FFF
        }
    }
}

impl Mapper for Mapper000 {
    fn cpu_map_read(&self, addr: u16) -> Option<MappedRead> {
        if addr >= 0x8000 {
            Some(MappedRead::Offset(u32::from(addr & self.prg_mask())))
        } else {
            None
        }
    }

    fn cpu_map_write(&mut self, addr: u16, _data: u8) -> Option<MappedWrite> {
        if addr >= 0x8000 {
            Some(MappedWrite::Offset(u32::from(addr & self.prg_mask())))
        } else {
            None
        }
    }

    fn ppu_map_read(&self, addr: u16) -> Option<u32> {
        if addr <= 0x1FFF {
            Some(u32::from(addr))
        } else {
            None
        }
    }

    fn ppu_map_write(&self, addr: u16) -> Option<u32> {
        // CHR is only writable when the cartridge supplies RAM instead of ROM
        if addr <= 0x1FFF && self.chr_banks == 0 {
            Some(u32::from(addr))
        } else {
            None
        }
    }

    fn reset(&mut self) {}

    fn serialize(&self) -> Result<Vec<u8>, MapperStateError> {
        encode_blob(&Mapper000State {
            prg_banks: self.prg_banks,
            chr_banks: self.chr_banks,
        })
    }

    fn deserialize(&mut self, blob: &[u8]) -> Result<(), MapperStateError> {
        let state: Mapper000State = decode_blob(blob)?;
        if state.prg_banks != self.prg_banks || state.chr_banks != self.chr_banks {
            return Err(MapperStateError::LayoutMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bank_prg_mirrors() {
        let mapper = Mapper000::new(1, 1);
        assert_eq!(
            mapper.cpu_map_read(0xC000),
            Some(MappedRead::Offset(0x0000))
        );
        assert_eq!(
            mapper.cpu_map_read(0xFFFF),
            Some(MappedRead::Offset(0x3FFF))
        );
        assert_eq!(mapper.cpu_map_read(0x7FFF), None);
    }

    #[test]
    fn double_bank_prg_maps_flat() {
        let mapper = Mapper000::new(2, 1);
        assert_eq!(
            mapper.cpu_map_read(0xC000),
            Some(MappedRead::Offset(0x4000))
        );
    }

    #[test]
    fn chr_rom_rejects_writes() {
        let mapper = Mapper000::new(1, 1);
        assert_eq!(mapper.ppu_map_write(0x1000), None);

        let ram_mapper = Mapper000::new(1, 0);
        assert_eq!(ram_mapper.ppu_map_write(0x1000), Some(0x1000));
    }
}
