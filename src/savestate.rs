//! Save state implementation
//!
//! A save state captures the complete machine: the cartridge image (header,
//! trainer, PRG, CHR), the mapper's internal registers (as a version-tagged
//! blob), and the CPU, PPU and bus state down to the in-flight instruction's
//! cycle debit. Loading a state restores the machine bit-for-bit, so a
//! continued run is indistinguishable from one that was never interrupted.
//!
//! The stream is bincode with fixed-width little-endian integers: every
//! variable-sized section travels as an 8-byte length followed by its bytes,
//! and fixed-width fields land at fixed offsets. The layout is versioned.

use std::io::{Read, Write};

use bincode::{decode_from_std_read, encode_into_std_write, Decode, Encode};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cartridge::InesHeader;
use crate::mappers::MapperStateError;
use crate::memory::RAM_SIZE;
use crate::nes::Nes;
use crate::ppu::{Ctrl, Mask, OamEntry, Status, VramAddr, MAX_SPRITES_PER_SCANLINE};

/// Current save state format version
const SAVE_STATE_VERSION: u32 = 1;

/// Errors that can occur during save state operations
#[derive(Error, Debug)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode save state: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("save stream truncated or corrupt: {0}")]
    Corrupt(#[from] bincode::error::DecodeError),

    #[error("incompatible save state version {found}, expected {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },

    #[error("save state was taken with mapper {saved}, cartridge uses mapper {loaded}")]
    MapperMismatch { saved: u8, loaded: u8 },

    #[error(transparent)]
    Mapper(#[from] MapperStateError),

    #[error("save state section has the wrong size")]
    InvalidData,
}

/// Bincode configuration: little-endian, fixed-width integers
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Complete machine snapshot
#[derive(Serialize, Deserialize, Encode, Decode)]
pub struct SaveState {
    version: u32,

    /// Raw iNES header
    header: [u8; 16],

    /// Trainer bytes (empty when the image has none)
    trainer: Vec<u8>,

    /// PRG store
    prg: Vec<u8>,

    /// CHR store (ROM or RAM contents)
    chr: Vec<u8>,

    /// Version-tagged mapper blob
    mapper: Vec<u8>,

    cpu: CpuState,
    ppu: PpuState,
    bus: BusState,

    /// Full APU snapshot, appended so restored runs produce identical audio
    apu: crate::apu::Apu,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct CpuState {
    a: u8,
    x: u8,
    y: u8,
    s: u8,
    p: u8,
    pc: u16,
    input_alu: u8,
    opcode: u8,
    opcode_addr: u16,
    temp: u16,
    absolute_addr: u16,
    relative_addr: u16,
    cycles: u16,
    cycle_count: u32,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct BackgroundState {
    next_tile_id: u8,
    next_tile_attrib: u8,
    next_tile_lsb: u8,
    next_tile_msb: u8,
    shift_pattern_lo: u16,
    shift_pattern_hi: u16,
    shift_attrib_lo: u16,
    shift_attrib_hi: u16,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct SpriteState {
    /// Scanline sprite cache as raw OAM bytes (8 entries x 4 bytes)
    entries: Vec<u8>,
    count: u8,
    shift_pattern_lo: Vec<u8>,
    shift_pattern_hi: Vec<u8>,
    zero_hit_possible: bool,
    zero_drawing: bool,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct PpuState {
    ctrl: u8,
    mask: u8,
    status: u8,
    v: u16,
    t: u16,
    fine_x: u8,
    bg: BackgroundState,
    oam: Vec<u8>,
    oam_addr: u8,
    sprites: SpriteState,
    name_table: Vec<u8>,
    pattern_table: Vec<u8>,
    palette: Vec<u8>,
    address_latch: u8,
    data_buffer: u8,
    scanline: i16,
    cycle: i16,
    nmi: bool,
    nmi_suppress: bool,
    odd_frame: bool,
    frame_complete: bool,
}

#[derive(Serialize, Deserialize, Encode, Decode)]
struct BusState {
    dma_page: u8,
    dma_addr: u8,
    dma_data: u8,
    dma_dummy: bool,
    dma_transfer: bool,
    ram: Vec<u8>,
    /// Master-clock counter; DMA alignment depends on its parity
    system_clock: u64,
    /// Audio-time accumulator, so sample emission replays identically
    audio_time: f64,
    audio_sample: f32,
}

impl SaveState {
    /// Capture the machine
    pub fn from_nes(nes: &Nes) -> Result<Self, StateError> {
        let cart = &nes.bus.cart;
        let ppu = &nes.bus.ppu;
        let cpu = &nes.cpu;

        let cpu_state = CpuState {
            a: cpu.a,
            x: cpu.x,
            y: cpu.y,
            s: cpu.s,
            p: cpu.p,
            pc: cpu.pc,
            input_alu: cpu.input_alu,
            opcode: cpu.opcode,
            opcode_addr: cpu.opcode_addr,
            temp: cpu.temp,
            absolute_addr: cpu.absolute_addr,
            relative_addr: cpu.relative_addr,
            cycles: cpu.cycles,
            cycle_count: cpu.cycle_count,
        };

        let bg_state = BackgroundState {
            next_tile_id: ppu.bg.next_tile_id,
            next_tile_attrib: ppu.bg.next_tile_attrib,
            next_tile_lsb: ppu.bg.next_tile_lsb,
            next_tile_msb: ppu.bg.next_tile_msb,
            shift_pattern_lo: ppu.bg.shift_pattern_lo,
            shift_pattern_hi: ppu.bg.shift_pattern_hi,
            shift_attrib_lo: ppu.bg.shift_attrib_lo,
            shift_attrib_hi: ppu.bg.shift_attrib_hi,
        };

        let mut sprite_entries = Vec::with_capacity(MAX_SPRITES_PER_SCANLINE * 4);
        for entry in &ppu.sprites.entries {
            sprite_entries.extend_from_slice(&[entry.y, entry.id, entry.attributes, entry.x]);
        }
        let sprite_state = SpriteState {
            entries: sprite_entries,
            count: ppu.sprites.count,
            shift_pattern_lo: ppu.sprites.shift_pattern_lo.to_vec(),
            shift_pattern_hi: ppu.sprites.shift_pattern_hi.to_vec(),
            zero_hit_possible: ppu.sprites.zero_hit_possible,
            zero_drawing: ppu.sprites.zero_drawing,
        };

        let oam: Vec<u8> = (0..=255u8).map(|addr| ppu.oam_read_byte(addr)).collect();
        let name_table: Vec<u8> = ppu
            .name_table
            .iter()
            .flat_map(|bank| bank.iter().copied())
            .collect();
        let pattern_table: Vec<u8> = ppu
            .pattern_table
            .iter()
            .flat_map(|bank| bank.iter().copied())
            .collect();

        let ppu_state = PpuState {
            ctrl: ppu.ctrl.0,
            mask: ppu.mask.0,
            status: ppu.status.0,
            v: ppu.v.0,
            t: ppu.t.0,
            fine_x: ppu.fine_x,
            bg: bg_state,
            oam,
            oam_addr: ppu.oam_addr,
            sprites: sprite_state,
            name_table,
            pattern_table,
            palette: ppu.palette_table.to_vec(),
            address_latch: ppu.address_latch,
            data_buffer: ppu.data_buffer,
            scanline: ppu.scanline,
            cycle: ppu.cycle,
            nmi: ppu.nmi,
            nmi_suppress: ppu.nmi_suppress(),
            odd_frame: ppu.odd_frame,
            frame_complete: ppu.frame_complete,
        };

        let bus_state = BusState {
            dma_page: nes.bus.dma.page,
            dma_addr: nes.bus.dma.addr,
            dma_data: nes.bus.dma.data,
            dma_dummy: nes.bus.dma.dummy,
            dma_transfer: nes.bus.dma.transfer,
            ram: nes.bus.ram.to_vec(),
            system_clock: nes.system_clock,
            audio_time: nes.audio_time,
            audio_sample: nes.audio_sample,
        };

        Ok(SaveState {
            version: SAVE_STATE_VERSION,
            header: *cart.header().bytes(),
            trainer: cart.trainer().to_vec(),
            prg: cart.prg().to_vec(),
            chr: cart.chr().to_vec(),
            mapper: cart.serialize_mapper()?,
            cpu: cpu_state,
            ppu: ppu_state,
            bus: bus_state,
            apu: nes.bus.apu.clone(),
        })
    }

    /// Restore the machine
    pub fn apply(self, nes: &mut Nes) -> Result<(), StateError> {
        if self.version != SAVE_STATE_VERSION {
            return Err(StateError::IncompatibleVersion {
                found: self.version,
                expected: SAVE_STATE_VERSION,
            });
        }

        let header = InesHeader::from_bytes(self.header);
        if header.mapper_number() != nes.bus.cart.mapper_number() {
            return Err(StateError::MapperMismatch {
                saved: header.mapper_number(),
                loaded: nes.bus.cart.mapper_number(),
            });
        }

        if self.bus.ram.len() != RAM_SIZE
            || self.ppu.oam.len() != 256
            || self.ppu.name_table.len() != 2048
            || self.ppu.pattern_table.len() != 8192
            || self.ppu.palette.len() != 32
            || self.ppu.sprites.entries.len() != MAX_SPRITES_PER_SCANLINE * 4
            || self.ppu.sprites.shift_pattern_lo.len() != MAX_SPRITES_PER_SCANLINE
            || self.ppu.sprites.shift_pattern_hi.len() != MAX_SPRITES_PER_SCANLINE
        {
            return Err(StateError::InvalidData);
        }

        nes.bus
            .cart
            .restore(header, self.trainer, self.prg, self.chr, &self.mapper)?;

        let cpu = &mut nes.cpu;
        cpu.a = self.cpu.a;
        cpu.x = self.cpu.x;
        cpu.y = self.cpu.y;
        cpu.s = self.cpu.s;
        cpu.p = self.cpu.p;
        cpu.pc = self.cpu.pc;
        cpu.input_alu = self.cpu.input_alu;
        cpu.opcode = self.cpu.opcode;
        cpu.opcode_addr = self.cpu.opcode_addr;
        cpu.temp = self.cpu.temp;
        cpu.absolute_addr = self.cpu.absolute_addr;
        cpu.relative_addr = self.cpu.relative_addr;
        cpu.cycles = self.cpu.cycles;
        cpu.cycle_count = self.cpu.cycle_count;

        let ppu = &mut nes.bus.ppu;
        ppu.ctrl = Ctrl(self.ppu.ctrl);
        ppu.mask = Mask(self.ppu.mask);
        ppu.status = Status(self.ppu.status);
        ppu.v = VramAddr(self.ppu.v);
        ppu.t = VramAddr(self.ppu.t);
        ppu.fine_x = self.ppu.fine_x;

        ppu.bg.next_tile_id = self.ppu.bg.next_tile_id;
        ppu.bg.next_tile_attrib = self.ppu.bg.next_tile_attrib;
        ppu.bg.next_tile_lsb = self.ppu.bg.next_tile_lsb;
        ppu.bg.next_tile_msb = self.ppu.bg.next_tile_msb;
        ppu.bg.shift_pattern_lo = self.ppu.bg.shift_pattern_lo;
        ppu.bg.shift_pattern_hi = self.ppu.bg.shift_pattern_hi;
        ppu.bg.shift_attrib_lo = self.ppu.bg.shift_attrib_lo;
        ppu.bg.shift_attrib_hi = self.ppu.bg.shift_attrib_hi;

        for (addr, byte) in self.ppu.oam.iter().enumerate() {
            ppu.oam_write_byte(addr as u8, *byte);
        }
        ppu.oam_addr = self.ppu.oam_addr;

        for (i, chunk) in self.ppu.sprites.entries.chunks_exact(4).enumerate() {
            ppu.sprites.entries[i] = OamEntry {
                y: chunk[0],
                id: chunk[1],
                attributes: chunk[2],
                x: chunk[3],
            };
        }
        ppu.sprites.count = self.ppu.sprites.count;
        ppu.sprites
            .shift_pattern_lo
            .copy_from_slice(&self.ppu.sprites.shift_pattern_lo);
        ppu.sprites
            .shift_pattern_hi
            .copy_from_slice(&self.ppu.sprites.shift_pattern_hi);
        ppu.sprites.zero_hit_possible = self.ppu.sprites.zero_hit_possible;
        ppu.sprites.zero_drawing = self.ppu.sprites.zero_drawing;

        for (bank, chunk) in self.ppu.name_table.chunks_exact(1024).enumerate() {
            ppu.name_table[bank].copy_from_slice(chunk);
        }
        for (bank, chunk) in self.ppu.pattern_table.chunks_exact(4096).enumerate() {
            ppu.pattern_table[bank].copy_from_slice(chunk);
        }
        ppu.palette_table.copy_from_slice(&self.ppu.palette);

        ppu.address_latch = self.ppu.address_latch;
        ppu.data_buffer = self.ppu.data_buffer;
        ppu.scanline = self.ppu.scanline;
        ppu.cycle = self.ppu.cycle;
        ppu.nmi = self.ppu.nmi;
        ppu.set_nmi_suppress(self.ppu.nmi_suppress);
        ppu.odd_frame = self.ppu.odd_frame;
        ppu.frame_complete = self.ppu.frame_complete;

        nes.bus.dma.page = self.bus.dma_page;
        nes.bus.dma.addr = self.bus.dma_addr;
        nes.bus.dma.data = self.bus.dma_data;
        nes.bus.dma.dummy = self.bus.dma_dummy;
        nes.bus.dma.transfer = self.bus.dma_transfer;
        nes.bus.ram.copy_from_slice(&self.bus.ram);
        nes.system_clock = self.bus.system_clock;
        nes.audio_time = self.bus.audio_time;
        nes.audio_sample = self.bus.audio_sample;

        nes.bus.apu = self.apu;

        info!("save state restored");
        Ok(())
    }
}

/// Serialize the machine into `writer`
pub fn save<W: Write>(nes: &Nes, writer: &mut W) -> Result<(), StateError> {
    let state = SaveState::from_nes(nes)?;
    encode_into_std_write(&state, writer, config())?;
    Ok(())
}

/// Restore the machine from `reader`
pub fn load<R: Read>(nes: &mut Nes, reader: &mut R) -> Result<(), StateError> {
    let state: SaveState = decode_from_std_read(reader, config())?;
    state.apply(nes)
}
