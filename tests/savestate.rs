//! Save-state round-trip tests: byte identity, replay equivalence and the
//! corrupt-stream error paths

use famicore::{Nes, StateError};

/// Mapper-0, CHR-RAM image whose program paints palette and pattern memory,
/// enables rendering and starts pulse 1, then spins incrementing $00
fn demo_rom() -> Vec<u8> {
    #[rustfmt::skip]
    let program: &[u8] = &[
        0xA9, 0x3F, 0x8D, 0x06, 0x20, // LDA #$3F; STA $2006
        0xA9, 0x00, 0x8D, 0x06, 0x20, // LDA #$00; STA $2006
        0xA9, 0x21, 0x8D, 0x07, 0x20, // LDA #$21; STA $2007
        0xA9, 0x16, 0x8D, 0x07, 0x20, // LDA #$16; STA $2007
        0xA9, 0x00, 0x8D, 0x06, 0x20, // LDA #$00; STA $2006
        0x8D, 0x06, 0x20,             // STA $2006
        0xA9, 0xFF, 0xA2, 0x08,       // LDA #$FF; LDX #$08
        0x8D, 0x07, 0x20,             // loop: STA $2007
        0xCA,                         // DEX
        0xD0, 0xFA,                   // BNE loop
        0xA9, 0x1E, 0x8D, 0x01, 0x20, // LDA #$1E; STA $2001
        0xA9, 0x0F, 0x8D, 0x15, 0x40, // LDA #$0F; STA $4015
        0xA9, 0xBF, 0x8D, 0x00, 0x40, // LDA #$BF; STA $4000
        0xA9, 0x40, 0x8D, 0x02, 0x40, // LDA #$40; STA $4002
        0xA9, 0x02, 0x8D, 0x03, 0x40, // LDA #$02; STA $4003
        0xE6, 0x00,                   // spin: INC $00
        0x4C, 0x3F, 0x80,             // JMP spin
    ];

    let mut bank = vec![0u8; 16 * 1024];
    bank[..program.len()].copy_from_slice(program);
    bank[0x3FFC] = 0x00;
    bank[0x3FFD] = 0x80;

    let mut rom = Vec::new();
    rom.extend_from_slice(b"NES\x1A");
    rom.push(1);
    rom.push(0); // CHR RAM
    rom.extend_from_slice(&[0u8; 10]);
    rom.extend_from_slice(&bank);
    rom
}

/// Mapper-1 image: spin loop in bank 0, vectors in the fixed last bank
fn mmc1_rom() -> Vec<u8> {
    let mut bank0 = vec![0u8; 16 * 1024];
    bank0[0] = 0x4C; // JMP $8000
    bank0[1] = 0x00;
    bank0[2] = 0x80;
    let mut bank1 = vec![0u8; 16 * 1024];
    bank1[0x3FFC] = 0x00;
    bank1[0x3FFD] = 0x80;

    let mut rom = Vec::new();
    rom.extend_from_slice(b"NES\x1A");
    rom.push(2);
    rom.push(0);
    rom.push(0x10); // mapper 1
    rom.extend_from_slice(&[0u8; 9]);
    rom.extend_from_slice(&bank0);
    rom.extend_from_slice(&bank1);
    rom
}

fn save_blob(nes: &Nes) -> Vec<u8> {
    let mut blob = Vec::new();
    nes.save_state(&mut blob).unwrap();
    blob
}

#[test]
fn save_load_save_is_byte_identical() {
    let rom = demo_rom();
    let mut nes = Nes::new(&rom).unwrap();
    for _ in 0..3 {
        nes.drive_one_frame();
    }

    let first = save_blob(&nes);

    let mut restored = Nes::new(&rom).unwrap();
    restored.load_state(&mut first.as_slice()).unwrap();
    let second = save_blob(&restored);

    assert_eq!(first, second);
}

#[test]
fn restored_run_replays_identically() {
    let rom = demo_rom();
    let mut nes = Nes::new(&rom).unwrap();
    for _ in 0..2 {
        nes.drive_one_frame();
    }
    let blob = save_blob(&nes);

    // Continue the original and record its outputs
    const TICKS: usize = 200_000;
    let mut reference_audio = Vec::new();
    for _ in 0..TICKS {
        if nes.clock() {
            reference_audio.push(nes.audio_sample().to_bits());
        }
    }
    let reference_frame = nes.framebuffer().to_vec();

    // Replay from the snapshot
    let mut replay = Nes::new(&rom).unwrap();
    replay.load_state(&mut blob.as_slice()).unwrap();
    let mut replay_audio = Vec::new();
    for _ in 0..TICKS {
        if replay.clock() {
            replay_audio.push(replay.audio_sample().to_bits());
        }
    }

    assert_eq!(reference_audio, replay_audio);
    assert_eq!(reference_frame, replay.framebuffer());
    assert_eq!(nes.cpu.pc, replay.cpu.pc);
    assert_eq!(nes.cpu.cycle_count, replay.cpu.cycle_count);
    assert_eq!(nes.system_clock(), replay.system_clock());
}

#[test]
fn load_restores_cartridge_stores() {
    let rom = demo_rom();
    let mut nes = Nes::new(&rom).unwrap();
    for _ in 0..2 {
        nes.drive_one_frame();
    }
    let blob = save_blob(&nes);

    let mut restored = Nes::new(&rom).unwrap();
    restored.load_state(&mut blob.as_slice()).unwrap();

    assert_eq!(restored.bus.cart.header().bytes(), nes.bus.cart.header().bytes());
    assert_eq!(restored.bus.cart.prg(), nes.bus.cart.prg());
    // The program painted CHR RAM; the snapshot carries it
    assert_eq!(restored.bus.cart.chr(), nes.bus.cart.chr());
    assert_eq!(&restored.bus.cart.chr()[..8], &[0xFF; 8]);
}

#[test]
fn mmc1_static_ram_survives_the_round_trip() {
    let rom = mmc1_rom();
    let mut nes = Nes::new(&rom).unwrap();
    nes.drive_one_frame();
    nes.bus.cpu_write(0x6123, 0xAB);

    let blob = save_blob(&nes);
    let mut restored = Nes::new(&rom).unwrap();
    restored.load_state(&mut blob.as_slice()).unwrap();

    assert_eq!(restored.bus.cpu_read(0x6123), 0xAB);
}

#[test]
fn truncated_stream_is_rejected() {
    let rom = demo_rom();
    let mut nes = Nes::new(&rom).unwrap();
    nes.drive_one_frame();
    let blob = save_blob(&nes);

    let truncated = &blob[..blob.len() / 2];
    let result = nes.load_state(&mut &truncated[..]);
    assert!(matches!(result, Err(StateError::Corrupt(_))));
}

#[test]
fn mapper_mismatch_is_rejected() {
    let mut source = Nes::new(&demo_rom()).unwrap();
    source.drive_one_frame();
    let blob = save_blob(&source);

    let mut target = Nes::new(&mmc1_rom()).unwrap();
    let result = target.load_state(&mut blob.as_slice());
    assert!(matches!(
        result,
        Err(StateError::MapperMismatch { saved: 0, loaded: 1 })
    ));
}
