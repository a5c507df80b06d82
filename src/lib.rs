//! Famicore - a cycle-driven NES emulator core
//!
//! The crate simulates the interconnected 6502 CPU, 2C02 PPU and 2A03 APU of
//! the NES together with iNES cartridges (mappers 0, 1, 2 and 4), driven by a
//! single master clock with the hardware's 1:3 CPU:PPU ratio. The core
//! consumes a cartridge image and controller bytes and produces 256x240 RGB
//! frames, mono audio samples and bit-stable save states.
//!
//! The host is responsible for windowing, texture upload, audio output and
//! input decoding; the core exposes only a framebuffer view, an audio sample,
//! a controller byte per port and save/load byte streams.

pub mod apu;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod mappers;
pub mod memory;
pub mod nes;
pub mod ppu;
pub mod savestate;
pub mod util;

pub use cartridge::{Cartridge, Mirroring, RomError};
pub use nes::Nes;
pub use savestate::StateError;

/// NES screen width in pixels
pub const SCREEN_WIDTH: usize = 256;

/// NES screen height in pixels
pub const SCREEN_HEIGHT: usize = 240;

/// PPU master clock frequency in Hz (NTSC)
pub const PPU_CLOCK_HZ: f64 = 5_369_318.0;

/// CPU clock frequency in Hz (NTSC, one third of the PPU clock)
pub const CPU_CLOCK_HZ: f64 = 1_789_773.0;
