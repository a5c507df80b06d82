//! NES system implementation
//!
//! [`Nes`] ties the CPU, the memory bus (PPU, APU, cartridge, controllers,
//! DMA) and the master clock together. Every master tick advances the PPU one
//! dot and the APU one clock; every third tick either the CPU steps or an
//! armed OAM DMA transfer steals its slot. PPU NMIs and mapper IRQs are
//! dispatched to the CPU between ticks, and an audio-time accumulator decides
//! when the APU mix becomes one host-facing sample.
//!
//! The whole machine is a single-threaded value type and is `Send`: a host
//! with a separate audio thread wraps it in a `Mutex` and holds the lock
//! around `clock()` and any other state-mutating call.

use std::io::{Read, Write};

use log::info;

use crate::cartridge::{Cartridge, RomError};
use crate::cpu::Cpu;
use crate::memory::MemoryBus;
use crate::savestate::{self, StateError};
use crate::PPU_CLOCK_HZ;

/// Represents the complete NES machine
pub struct Nes {
    /// CPU
    pub cpu: Cpu,

    /// Everything the CPU talks to
    pub bus: MemoryBus,

    /// Master clock ticks since reset
    pub(crate) system_clock: u64,

    /// Accumulated emulated time since the last audio sample
    pub(crate) audio_time: f64,

    /// Emulated seconds per master tick (scaled by the speed factor)
    time_per_clock: f64,

    /// Host seconds per audio sample
    time_per_sample: f64,

    /// Most recent audio sample
    pub(crate) audio_sample: f32,
}

impl Nes {
    /// Build a machine around an iNES image and reset it
    pub fn new(rom: &[u8]) -> Result<Self, RomError> {
        let cart = Cartridge::from_bytes(rom)?;
        let mut nes = Nes {
            cpu: Cpu::new(),
            bus: MemoryBus::new(cart),
            system_clock: 0,
            audio_time: 0.0,
            time_per_clock: 0.0,
            time_per_sample: 0.0,
            audio_sample: 0.0,
        };
        nes.set_sample_rate(44_100, 1.0);
        nes.reset();
        Ok(nes)
    }

    /// Configure audio output: host sample rate and emulation speed factor
    pub fn set_sample_rate(&mut self, sample_rate: u32, speed: f64) {
        self.time_per_sample = 1.0 / f64::from(sample_rate);
        self.time_per_clock = 1.0 / (PPU_CLOCK_HZ * speed);
    }

    /// Reset the machine to its power-on state (cartridge contents kept)
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset(&mut self.bus);
        self.system_clock = 0;
        self.audio_time = 0.0;
        info!("system reset");
    }

    /// Advance one master clock tick; returns whether an audio sample is
    /// ready in [`Nes::audio_sample`]
    pub fn clock(&mut self) -> bool {
        self.bus.ppu.clock(&mut self.bus.cart);
        self.bus.apu.clock();

        // CPU slot on every third master tick; a running DMA steals it
        if self.system_clock % 3 == 0 {
            if self.bus.dma.transfer {
                if self.bus.dma.dummy {
                    // Alignment: wait for an odd master tick before starting
                    if self.system_clock % 2 == 1 {
                        self.bus.dma.dummy = false;
                    }
                } else if self.system_clock % 2 == 0 {
                    // Even ticks read from the CPU bus
                    let addr =
                        (u16::from(self.bus.dma.page) << 8) | u16::from(self.bus.dma.addr);
                    self.bus.dma.data = self.bus.cpu_read(addr);
                } else {
                    // Odd ticks write into OAM; wrap-around ends the transfer
                    let (addr, data) = (self.bus.dma.addr, self.bus.dma.data);
                    self.bus.ppu.oam_write_byte(addr, data);
                    self.bus.dma.addr = self.bus.dma.addr.wrapping_add(1);
                    if self.bus.dma.addr == 0 {
                        self.bus.dma.transfer = false;
                        self.bus.dma.dummy = true;
                    }
                }
            } else {
                self.cpu.clock(&mut self.bus);
            }
        }

        // Audio resampling: emit the APU mix whenever emulated time crosses
        // the next sample boundary
        let mut sample_ready = false;
        self.audio_time += self.time_per_clock;
        if self.audio_time >= self.time_per_sample {
            self.audio_time -= self.time_per_sample;
            self.audio_sample = self.bus.apu.sample();
            sample_ready = true;
        }

        // The PPU's NMI is an edge, consumed here; the mapper IRQ is a level,
        // acknowledged when taken
        if self.bus.ppu.nmi {
            self.bus.ppu.nmi = false;
            self.cpu.nmi(&mut self.bus);
        }

        if self.bus.cart.irq_state() {
            self.bus.cart.irq_clear();
            self.cpu.irq(&mut self.bus);
        }

        self.system_clock += 1;
        sample_ready
    }

    /// Run until the PPU finishes the frame, then let the CPU finish its
    /// in-flight instruction
    pub fn drive_one_frame(&mut self) {
        while !self.bus.ppu.frame_complete {
            self.clock();
        }
        while self.cpu.cycles != 0 {
            self.clock();
        }
        self.bus.ppu.frame_complete = false;
    }

    /// The current 256x240 RGB24 frame
    pub fn framebuffer(&self) -> &[u8] {
        self.bus.ppu.framebuffer()
    }

    /// The most recent audio sample, valid after `clock()` returned true
    pub fn audio_sample(&self) -> f32 {
        self.audio_sample
    }

    /// Set a controller port's button byte (A=$80 ... Right=$01)
    pub fn set_controller(&mut self, port: usize, buttons: u8) {
        self.bus.controllers[port & 1].input = buttons;
    }

    pub fn system_clock(&self) -> u64 {
        self.system_clock
    }

    /// Serialize the full machine state into `writer`
    pub fn save_state<W: Write>(&self, writer: &mut W) -> Result<(), StateError> {
        savestate::save(self, writer)
    }

    /// Restore a machine state previously written by [`Nes::save_state`]
    pub fn load_state<R: Read>(&mut self, reader: &mut R) -> Result<(), StateError> {
        savestate::load(self, reader)
    }
}
