//! Mapper 004 (MMC3) implementation
//!
//! Four register pairs selected by even/odd addresses:
//!
//! - $8000/$8001: bank select / bank data (eight 1 KiB CHR and 8 KiB PRG slots)
//! - $A000/$A001: mirroring / PRG RAM protect
//! - $C000/$C001: IRQ latch / IRQ reload
//! - $E000/$E001: IRQ disable (and acknowledge) / IRQ enable
//!
//! The scanline counter is driven by the PPU at dot 260 of every
//! rendering-enabled scanline and asserts the IRQ line when it counts down
//! to zero while enabled.
//!
//! Used by games like Super Mario Bros. 2/3, Mega Man 3-6 and Kirby's
//! Adventure.

use bincode::{Decode, Encode};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{decode_blob, encode_blob, MappedRead, MappedWrite, Mapper, MapperStateError};
use crate::cartridge::Mirroring;

/// Size of the on-cartridge static RAM
const STATIC_RAM_SIZE: usize = 32 * 1024;

pub struct Mapper004 {
    prg_banks: u16,
    chr_banks: u16,

    /// Register index selected by the last $8000 write
    target_register: u8,

    /// PRG mode bit: swaps the switchable and second-to-last 8 KiB slots
    prg_bank_mode: bool,

    /// CHR inversion bit: swaps the 2 KiB and 1 KiB halves of the table
    chr_inversion: bool,

    mirror: Mirroring,

    /// Raw values of bank registers R0-R7
    registers: [u32; 8],

    /// Resolved CHR offsets for each 1 KiB slot
    chr_bank: [u32; 8],

    /// Resolved PRG offsets for each 8 KiB slot
    prg_bank: [u32; 4],

    irq_counter: u16,
    irq_reload: u16,
    irq_active: bool,
    irq_enable: bool,

    /// Cartridge RAM at $6000-$7FFF
    static_ram: Vec<u8>,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct Mapper004State {
    prg_banks: u16,
    chr_banks: u16,
    target_register: u8,
    prg_bank_mode: bool,
    chr_inversion: bool,
    mirror: Mirroring,
    registers: [u32; 8],
    chr_bank: [u32; 8],
    prg_bank: [u32; 4],
    irq_counter: u16,
    irq_reload: u16,
    irq_active: bool,
    irq_enable: bool,
    static_ram: Vec<u8>,
}

impl Mapper004 {
    pub fn new(prg_banks: u16, chr_banks: u16) -> Self {
        let mut mapper = Mapper004 {
            prg_banks,
            chr_banks,
            target_register: 0,
            prg_bank_mode: false,
            chr_inversion: false,
            mirror: Mirroring::Horizontal,
            registers: [0; 8],
            chr_bank: [0; 8],
            prg_bank: [0; 4],
            irq_counter: 0,
            irq_reload: 0,
            irq_active: false,
            irq_enable: false,
            static_ram: vec![0; STATIC_RAM_SIZE],
        };
        mapper.reset();
        mapper
    }

    /// Rebuild the CHR and PRG offset tables from the raw bank registers
    fn update_bank_tables(&mut self) {
        // One half of the CHR table holds two 2 KiB banks (R0/R1, low bit
        // forced even), the other four 1 KiB banks (R2-R5); the inversion
        // bit picks which half is which.
        let write_chr = |chr_bank: &mut [u32; 8], registers: &[u32; 8], base: usize, paired: bool| {
            if paired {
                for i in 0..4 {
                    // 2 KiB pair: the register's low bit is ignored
                    if i % 2 == 1 {
                        chr_bank[base + i] = (registers[i / 2] & 0xFE) * 0x0400 + 0x0400;
                    } else {
                        chr_bank[base + i] = (registers[i / 2] & 0xFE) * 0x0400;
                    }
                }
            } else {
                for i in 0..4 {
                    chr_bank[base + i] = registers[i + 2] * 0x0400;
                }
            }
        };

        if self.chr_inversion {
            write_chr(&mut self.chr_bank, &self.registers, 0, false);
            write_chr(&mut self.chr_bank, &self.registers, 4, true);
        } else {
            write_chr(&mut self.chr_bank, &self.registers, 0, true);
            write_chr(&mut self.chr_bank, &self.registers, 4, false);
        }

        let bank_count = u32::from(self.prg_banks) * 2;
        self.prg_bank[0] = (self.registers[6] & 0x3F) * 0x2000;
        self.prg_bank[2] = (bank_count - 2) * 0x2000;
        if self.prg_bank_mode {
            self.prg_bank.swap(0, 2);
        }
        self.prg_bank[1] = (self.registers[7] & 0x3F) * 0x2000;
        self.prg_bank[3] = (bank_count - 1) * 0x2000;
    }
}

impl Mapper for Mapper004 {
    fn cpu_map_read(&self, addr: u16) -> Option<MappedRead> {
        match addr {
            0x6000..=0x7FFF => Some(MappedRead::Data(
                self.static_ram[(addr & 0x1FFF) as usize],
            )),
            0x8000..=0xFFFF => {
                let slot = usize::from(addr - 0x8000) >> 13;
                Some(MappedRead::Offset(
                    self.prg_bank[slot] + u32::from(addr & 0x1FFF),
                ))
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
            0x8000..=0x9FFF => {
                if addr & 1 == 0 {
                    self.target_register = data & 0x07;
                    self.prg_bank_mode = data & 0x40 != 0;
                    self.chr_inversion = data & 0x80 != 0;
                } else {
                    self.registers[usize::from(self.target_register)] = u32::from(data);
                    self.update_bank_tables();
                }
                None
            }
            0xA000..=0xBFFF => {
                if addr & 1 == 0 {
                    self.mirror = if data & 0x01 != 0 {
                        Mirroring::Horizontal
                    } else {
                        Mirroring::Vertical
                    };
                } else {
                    debug!("MMC3 PRG RAM protect write ignored: ${:02X}", data);
                }
                None
            }
            0xC000..=0xDFFF => {
                if addr & 1 == 0 {
                    self.irq_reload = u16::from(data);
                } else {
                    // Force a reload on the next scanline tick
                    self.irq_counter = 0;
                }
                None
            }
            0xE000..=0xFFFF => {
                if addr & 1 == 0 {
                    self.irq_enable = false;
                    self.irq_active = false;
                } else {
                    self.irq_enable = true;
                }
                None
            }
            _ => None,
        }
    }

    fn ppu_map_read(&self, addr: u16) -> Option<u32> {
        if addr <= 0x1FFF {
            let slot = usize::from(addr) >> 10;
            Some(self.chr_bank[slot] + u32::from(addr & 0x03FF))
        } else {
            None
        }
    }

    fn ppu_map_write(&self, _addr: u16) -> Option<u32> {
        None
    }

    fn reset(&mut self) {
        self.target_register = 0;
        self.prg_bank_mode = false;
        self.chr_inversion = false;
        self.mirror = Mirroring::Horizontal;
        self.registers = [0; 8];
        self.chr_bank = [0; 8];
        self.irq_counter = 0;
        self.irq_reload = 0;
        self.irq_active = false;
        self.irq_enable = false;

        let bank_count = u32::from(self.prg_banks) * 2;
        self.prg_bank = [
            0,
            0x2000,
            (bank_count - 2) * 0x2000,
            (bank_count - 1) * 0x2000,
        ];
    }

    fn mirror_mode(&self) -> Mirroring {
        self.mirror
    }

    fn irq_state(&self) -> bool {
        self.irq_active
    }

    fn irq_clear(&mut self) {
        self.irq_active = false;
    }

    fn scanline_tick(&mut self) {
        if self.irq_counter == 0 {
            self.irq_counter = self.irq_reload;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_counter == 0 && self.irq_enable {
            self.irq_active = true;
        }
    }

    fn serialize(&self) -> Result<Vec<u8>, MapperStateError> {
        encode_blob(&Mapper004State {
            prg_banks: self.prg_banks,
            chr_banks: self.chr_banks,
            target_register: self.target_register,
            prg_bank_mode: self.prg_bank_mode,
            chr_inversion: self.chr_inversion,
            mirror: self.mirror,
            registers: self.registers,
            chr_bank: self.chr_bank,
            prg_bank: self.prg_bank,
            irq_counter: self.irq_counter,
            irq_reload: self.irq_reload,
            irq_active: self.irq_active,
            irq_enable: self.irq_enable,
            static_ram: self.static_ram.clone(),
        })
    }

    fn deserialize(&mut self, blob: &[u8]) -> Result<(), MapperStateError> {
        let state: Mapper004State = decode_blob(blob)?;
        if state.prg_banks != self.prg_banks
            || state.chr_banks != self.chr_banks
            || state.static_ram.len() != STATIC_RAM_SIZE
        {
            return Err(MapperStateError::LayoutMismatch);
        }
        self.target_register = state.target_register;
        self.prg_bank_mode = state.prg_bank_mode;
        self.chr_inversion = state.chr_inversion;
        self.mirror = state.mirror;
        self.registers = state.registers;
        self.chr_bank = state.chr_bank;
        self.prg_bank = state.prg_bank;
        self.irq_counter = state.irq_counter;
        self.irq_reload = state.irq_reload;
        self.irq_active = state.irq_active;
        self.irq_enable = state.irq_enable;
        self.static_ram = state.static_ram;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(mapper: &mut Mapper004, register: u8, value: u8) {
        mapper.cpu_map_write(0x8000, register);
        mapper.cpu_map_write(0x8001, value);
    }

    #[test]
    fn power_on_prg_layout_fixes_last_two_banks() {
        let mapper = Mapper004::new(8, 8);
        // 8 * 16 KiB PRG = 16 slots of 8 KiB; slots 2 and 3 pin the last two
        assert_eq!(
            mapper.cpu_map_read(0xC000),
            Some(MappedRead::Offset(14 * 0x2000))
        );
        assert_eq!(
            mapper.cpu_map_read(0xE000),
            Some(MappedRead::Offset(15 * 0x2000))
        );
    }

    #[test]
    fn prg_mode_swaps_switchable_slot() {
        let mut mapper = Mapper004::new(8, 8);
        write_pair(&mut mapper, 6, 5);

        assert_eq!(
            mapper.cpu_map_read(0x8000),
            Some(MappedRead::Offset(5 * 0x2000))
        );

        // Setting the PRG mode bit moves the switchable bank to $C000
        mapper.cpu_map_write(0x8000, 0x46);
        mapper.cpu_map_write(0x8001, 5);
        assert_eq!(
            mapper.cpu_map_read(0xC000),
            Some(MappedRead::Offset(5 * 0x2000))
        );
        assert_eq!(
            mapper.cpu_map_read(0x8000),
            Some(MappedRead::Offset(14 * 0x2000))
        );
    }

    #[test]
    fn chr_pairs_force_even_banks() {
        let mut mapper = Mapper004::new(8, 8);
        write_pair(&mut mapper, 0, 7);

        // R0 is a 2 KiB bank: its low bit is ignored and the pair is adjacent
        assert_eq!(mapper.ppu_map_read(0x0000), Some(6 * 0x0400));
        assert_eq!(mapper.ppu_map_read(0x0400), Some(7 * 0x0400));
    }

    #[test]
    fn irq_counts_scanlines_and_asserts() {
        let mut mapper = Mapper004::new(8, 8);
        mapper.cpu_map_write(0xC000, 3); // latch
        mapper.cpu_map_write(0xC001, 0); // force reload
        mapper.cpu_map_write(0xE001, 0); // enable

        // First tick reloads the counter to 3, three more count it to zero
        for _ in 0..3 {
            mapper.scanline_tick();
            assert!(!mapper.irq_state());
        }
        mapper.scanline_tick();
        assert!(mapper.irq_state());

        mapper.irq_clear();
        assert!(!mapper.irq_state());
    }

    #[test]
    fn irq_disable_acknowledges_pending() {
        let mut mapper = Mapper004::new(8, 8);
        mapper.cpu_map_write(0xC000, 0);
        mapper.cpu_map_write(0xE001, 0);
        mapper.scanline_tick();
        assert!(mapper.irq_state());

        mapper.cpu_map_write(0xE000, 0);
        assert!(!mapper.irq_state());

        // While disabled, further ticks never assert
        mapper.scanline_tick();
        assert!(!mapper.irq_state());
    }
}
