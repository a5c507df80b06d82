//! Memory bus implementation for the NES
//!
//! The CPU sees a 16-bit address space with memory-mapped devices. The
//! cartridge gets first claim on every transaction (mappers may shadow any
//! region); what it declines falls through to the fixed map:
//!
//! - $0000-$1FFF: 2 KiB internal RAM, mirrored every $0800
//! - $2000-$3FFF: PPU registers, mirrored every 8
//! - $4000-$4013, $4015: APU registers
//! - $4014: OAM DMA trigger
//! - $4016-$4017: controller shift registers
//!
//! The bus owns the cartridge, PPU, APU, controllers and the DMA latch; the
//! CPU and the master-clock driver live one level up in [`crate::nes::Nes`].

use log::trace;

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::controller::Controller;
use crate::ppu::Ppu;

/// Size of the internal RAM (2 KiB)
pub const RAM_SIZE: usize = 0x0800;

/// OAM DMA transfer latch
#[derive(Debug, Default, Clone, Copy)]
pub struct Dma {
    /// Source page: bytes are read from page << 8
    pub page: u8,

    /// Next byte offset within the page (also the OAM target address)
    pub addr: u8,

    /// Byte in flight between the read and write halves
    pub data: u8,

    /// Still waiting for the alignment cycle before the transfer starts
    pub dummy: bool,

    /// A transfer is in progress, stealing the CPU's clock slots
    pub transfer: bool,
}

/// Represents the CPU-visible bus and the devices hanging off it
pub struct MemoryBus {
    /// Internal RAM (2 KiB, mirrored to $1FFF)
    pub ram: [u8; RAM_SIZE],

    /// Cartridge (PRG/CHR stores plus mapper)
    pub cart: Cartridge,

    /// Picture processing unit
    pub ppu: Ppu,

    /// Audio processing unit
    pub apu: Apu,

    /// Controller ports
    pub controllers: [Controller; 2],

    /// OAM DMA state
    pub dma: Dma,
}

impl MemoryBus {
    pub fn new(cart: Cartridge) -> Self {
        MemoryBus {
            ram: [0; RAM_SIZE],
            cart,
            ppu: Ppu::new(),
            apu: Apu::new(),
            controllers: [Controller::new(); 2],
            dma: Dma {
                dummy: true,
                ..Dma::default()
            },
        }
    }

    /// Reset the bus-side state; the CPU is reset by the owner
    pub fn reset(&mut self) {
        self.ram = [0; RAM_SIZE];
        self.cart.reset();
        self.ppu.reset();
        self.apu.reset();
        self.dma = Dma {
            dummy: true,
            ..Dma::default()
        };
    }

    /// Read a byte from the CPU address space
    pub fn cpu_read(&mut self, addr: u16) -> u8 {
        if let Some(data) = self.cart.cpu_read(addr) {
            return data;
        }

        match addr {
            // Internal RAM and mirrors
            0x0000..=0x1FFF => self.ram[usize::from(addr & 0x07FF)],

            // PPU registers and mirrors
            0x2000..=0x3FFF => self.ppu.cpu_read(addr, &self.cart),

            // APU status
            0x4015 => self.apu.cpu_read(addr),

            // Controller shift registers
            0x4016 | 0x4017 => self.controllers[usize::from(addr & 0x0001)].read(),

            _ => 0,
        }
    }

    /// Write a byte to the CPU address space
    pub fn cpu_write(&mut self, addr: u16, data: u8) {
        if self.cart.cpu_write(addr, data) {
            return;
        }

        match addr {
            // Internal RAM and mirrors
            0x0000..=0x1FFF => self.ram[usize::from(addr & 0x07FF)] = data,

            // PPU registers and mirrors
            0x2000..=0x3FFF => self.ppu.cpu_write(addr, data, &mut self.cart),

            // APU channel and control registers
            0x4000..=0x4013 | 0x4015 => self.apu.cpu_write(addr, data),

            // OAM DMA: arm the transfer, the clock driver drains it
            0x4014 => {
                self.dma.page = data;
                self.dma.addr = 0x00;
                self.dma.transfer = true;
            }

            // Controller strobe: latch the input shadow
            0x4016 | 0x4017 => self.controllers[usize::from(addr & 0x0001)].latch(),

            _ => trace!("unmapped CPU write ${:04X} = ${:02X}", addr, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::PRG_BANK_SIZE;

    fn test_bus() -> MemoryBus {
        let mut rom = Vec::new();
        rom.extend_from_slice(b"NES\x1A");
        rom.push(1);
        rom.push(0);
        rom.extend_from_slice(&[0u8; 10]);
        rom.extend_from_slice(&vec![0u8; PRG_BANK_SIZE]);
        MemoryBus::new(Cartridge::from_bytes(&rom).unwrap())
    }

    #[test]
    fn ram_mirrors_every_2k() {
        let mut bus = test_bus();
        bus.cpu_write(0x0000, 0x42);
        assert_eq!(bus.cpu_read(0x0800), 0x42);
        assert_eq!(bus.cpu_read(0x1800), 0x42);

        bus.cpu_write(0x1FFF, 0x24);
        assert_eq!(bus.cpu_read(0x07FF), 0x24);
    }

    #[test]
    fn ppu_registers_mirror_every_8() {
        let mut bus = test_bus();
        bus.cpu_write(0x2001, 0x1E);
        assert_eq!(bus.ppu.mask.0, 0x1E);
        bus.cpu_write(0x3FF9, 0x18);
        assert_eq!(bus.ppu.mask.0, 0x18);
    }

    #[test]
    fn dma_write_arms_transfer() {
        let mut bus = test_bus();
        bus.cpu_write(0x4014, 0x02);
        assert!(bus.dma.transfer);
        assert_eq!(bus.dma.page, 0x02);
        assert_eq!(bus.dma.addr, 0x00);
    }

    #[test]
    fn controller_strobe_and_serial_read() {
        let mut bus = test_bus();
        bus.controllers[0].input = 0x80; // A pressed
        bus.cpu_write(0x4016, 0x01);
        assert_eq!(bus.cpu_read(0x4016), 1);
        assert_eq!(bus.cpu_read(0x4016), 0);
    }

    #[test]
    fn unmapped_reads_are_zero() {
        let mut bus = test_bus();
        assert_eq!(bus.cpu_read(0x5000), 0);
    }
}
