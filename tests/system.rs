//! Whole-machine tests: clocking ratios, OAM DMA timing and the host surface

use famicore::Nes;

/// Mapper-0 image whose reset vector points at a `JMP $8000` spin loop
fn spin_rom() -> Vec<u8> {
    let mut bank = vec![0u8; 16 * 1024];
    bank[0] = 0x4C; // JMP $8000
    bank[1] = 0x00;
    bank[2] = 0x80;
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

/// Count the CPU-slot master ticks a DMA transfer occupies when triggered at
/// the given master-clock alignment (mod 6)
fn dma_stall_cycles(alignment: u64) -> u64 {
    let mut nes = Nes::new(&spin_rom()).unwrap();

    for i in 0..=255u16 {
        nes.bus.cpu_write(0x0200 + i, i as u8);
    }

    while nes.system_clock() % 6 != alignment {
        nes.clock();
    }
    nes.bus.cpu_write(0x4014, 0x02);

    let mut stalled = 0;
    while nes.bus.dma.transfer {
        if nes.system_clock() % 3 == 0 {
            stalled += 1;
        }
        nes.clock();
    }

    // The transfer copied the whole page into OAM
    for i in 0..=255u8 {
        assert_eq!(nes.bus.ppu.oam_read_byte(i), i);
    }

    stalled
}

#[test]
fn oam_dma_stalls_513_cycles_from_odd_alignment() {
    assert_eq!(dma_stall_cycles(3), 513);
}

#[test]
fn oam_dma_stalls_514_cycles_from_even_alignment() {
    assert_eq!(dma_stall_cycles(0), 514);
}

#[test]
fn cpu_runs_every_third_master_tick() {
    let mut nes = Nes::new(&spin_rom()).unwrap();
    let start_cycles = nes.cpu.cycle_count;

    // 300 master ticks = 100 CPU ticks; the spin loop is 3 cycles per lap,
    // minus the 8-cycle reset debit
    for _ in 0..300 {
        nes.clock();
    }
    let executed = nes.cpu.cycle_count - start_cycles;
    assert!(executed >= 90 && executed <= 100, "executed {executed}");
}

#[test]
fn drive_one_frame_advances_exactly_one_frame() {
    let mut nes = Nes::new(&spin_rom()).unwrap();
    let frames = nes.bus.ppu.frame_count();
    nes.drive_one_frame();
    assert_eq!(nes.bus.ppu.frame_count(), frames + 1);
    assert!(!nes.bus.ppu.frame_complete);
    // The CPU is between instructions
    assert_eq!(nes.cpu.cycles, 0);
}

#[test]
fn audio_samples_arrive_at_the_requested_rate() {
    let mut nes = Nes::new(&spin_rom()).unwrap();
    nes.set_sample_rate(44_100, 1.0);

    // One frame is 341 * 262 master ticks at ~5.37 MHz: ~735 samples
    let mut samples = 0;
    for _ in 0..341 * 262 {
        if nes.clock() {
            samples += 1;
            let sample = nes.audio_sample();
            assert!((-1.0..=1.0).contains(&sample));
        }
    }
    assert!((730..=740).contains(&samples), "got {samples} samples");
}

#[test]
fn controller_byte_reaches_the_cpu() {
    let mut nes = Nes::new(&spin_rom()).unwrap();
    nes.set_controller(0, 0x80); // A held

    // Strobe, then read eight bits through the bus
    nes.bus.cpu_write(0x4016, 0x01);
    let bits: Vec<u8> = (0..8).map(|_| nes.bus.cpu_read(0x4016)).collect();
    assert_eq!(bits[0], 1);
    assert_eq!(&bits[1..], &[0; 7]);
}

#[test]
fn machine_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<Nes>();
}
