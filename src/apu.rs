//! APU (Audio Processing Unit) implementation
//!
//! The 2A03 audio subset: two pulse channels and the noise channel, each
//! built from small hardware units (sequencer, envelope, length counter and,
//! for the pulses, a frequency sweeper), driven by a frame sequencer that
//! fires quarter- and half-frame clocks at fixed points of the 4-step cycle.
//!
//! The pulse output is synthesised as a band-limited square wave from the
//! sequencer's programmed period rather than from the raw duty bit, so the
//! mix can be resampled by the host without aliasing badly. The noise channel
//! output is its LFSR bit scaled by the envelope.

use bincode::{Decode, Encode};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::CPU_CLOCK_HZ;

/// Length-counter load values, indexed by the 5-bit field of register 3
const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

/// Noise channel timer periods, indexed by the 4-bit period field
const NOISE_PERIODS: [u16; 16] = [
    0, 4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 1016, 2034, 4068,
];

/// Duty bit patterns and their analog duty ratios, by duty select 0-3
const DUTY_SEQUENCES: [(u32, f64); 4] = [
    (0b0100_0000, 0.125),
    (0b0110_0000, 0.25),
    (0b0111_1000, 0.5),
    (0b1001_1111, 0.75),
];

/// Frame-sequencer tick counts for the 4-step sequence
const QUARTER_FRAME_1: u32 = 3729;
const HALF_FRAME_1: u32 = 7457;
const QUARTER_FRAME_3: u32 = 11186;
const FRAME_END: u32 = 14916;

/// Emulated seconds advanced per master clock
const CLOCK_TIME_STEP: f64 = (1.0 / 3.0) / CPU_CLOCK_HZ;

/// Fast sine approximation used by the pulse synthesiser
fn fast_sin(t: f64) -> f64 {
    let mut j = t * 0.15915;
    j -= j.floor();
    20.785 * j * (j - 0.5) * (j - 1.0)
}

/// Programmable timer plus bit pattern; the pulse channels rotate a duty
/// byte through it, the noise channel a 15-bit LFSR
#[derive(Debug, Default, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Sequencer {
    pub sequence: u32,
    pub next_sequence: u32,
    pub timer: u16,
    pub reload: u16,
    pub output: u8,
}

impl Sequencer {
    /// Tick the timer; on underflow reload it, advance the pattern with
    /// `advance` and latch bit 0 as the output
    pub fn clock(&mut self, enable: bool, advance: impl FnOnce(u32) -> u32) -> u8 {
        if enable {
            self.timer = self.timer.wrapping_sub(1);
            if self.timer == 0xFFFF {
                self.timer = self.reload;
                self.sequence = advance(self.sequence);
                self.output = (self.sequence & 0x0000_0001) as u8;
            }
        }
        self.output
    }
}

/// Down-counter that silences a channel when it expires
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, Encode, Decode)]
pub struct LengthCounter {
    pub counter: u8,
}

impl LengthCounter {
    pub fn clock(&mut self, enable: bool, halt: bool) -> u8 {
        if !enable {
            self.counter = 0;
        } else if self.counter > 0 && !halt {
            self.counter -= 1;
        }
        self.counter
    }
}

/// Volume envelope: a divider feeding a decay counter, restartable
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, Encode, Decode)]
pub struct Envelope {
    pub start: bool,
    pub disable: bool,
    pub divider: u16,
    pub volume: u16,
    pub output: u16,
    pub decay: u16,
}

impl Envelope {
    const DECAY_BASE: u16 = 15;

    pub fn clock(&mut self, loop_flag: bool) {
        if !self.start {
            if self.divider == 0 {
                self.divider = self.volume;
                if self.decay == 0 {
                    if loop_flag {
                        self.decay = Self::DECAY_BASE;
                    }
                } else {
                    self.decay -= 1;
                }
            } else {
                self.divider -= 1;
            }
        } else {
            self.start = false;
            self.decay = Self::DECAY_BASE;
            self.divider = self.volume;
        }

        self.output = if self.disable { self.volume } else { self.decay };
    }
}

/// Pulse frequency sweeper; mutes the channel outside the usable range
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, Encode, Decode)]
pub struct Sweeper {
    pub enabled: bool,
    pub down: bool,
    pub reload: bool,
    pub muted: bool,
    pub shift: u8,
    pub timer: u8,
    pub period: u8,
    pub change: u16,
}

impl Sweeper {
    /// Continuous tracking of the target period (runs every master clock)
    pub fn track(&mut self, target: u16) {
        if self.enabled {
            self.change = target >> self.shift;
            self.muted = target < 8 || target > 0x7FF;
        }
    }

    /// Half-frame clock; adjusts the target period in place. Pulse 2 adds
    /// one extra on a downward sweep (`channel` = true).
    pub fn clock(&mut self, target: &mut u16, channel: bool) -> bool {
        let mut changed = false;
        if self.timer == 0
            && self.enabled
            && self.shift > 0
            && !self.muted
            && *target >= 8
            && self.change < 0x07FF
        {
            if self.down {
                *target = target.wrapping_sub(self.change + u16::from(channel));
            } else {
                *target += self.change;
            }
            changed = true;
        }

        if self.enabled {
            if self.timer == 0 || self.reload {
                self.timer = self.period;
                self.reload = false;
            } else {
                self.timer -= 1;
            }
            self.muted = *target < 8 || *target > 0x7FF;
        }

        changed
    }
}

/// Band-limited square synthesiser fed by the sequencer's period
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct PulseWave {
    pub frequency: f64,
    pub duty: f64,
    pub amplitude: f64,
    prev_sample: f64,
}

impl Default for PulseWave {
    fn default() -> Self {
        PulseWave {
            frequency: 0.0,
            duty: 0.0,
            amplitude: 1.0,
            prev_sample: 0.0,
        }
    }
}

impl PulseWave {
    /// Number of harmonic terms in the square-wave sum
    const HARMONICS: u32 = 3;

    pub fn sample(&mut self, t: f64) -> f64 {
        let mut a = 0.0;
        let mut b = 0.0;
        let p = 2.0 * std::f64::consts::PI * self.duty;

        for j in 1..Self::HARMONICS {
            let j = f64::from(j);
            let tc = j * self.frequency * 2.0 * std::f64::consts::PI * t;
            a += -fast_sin(tc) / j;
            b += -fast_sin(tc - p * j) / j;
        }

        let s = (2.0 * self.amplitude / std::f64::consts::PI) * (a - b);
        let out = s + self.prev_sample;
        self.prev_sample = s;
        out
    }
}

/// One pulse channel
#[derive(Debug, Default, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct PulseChannel {
    pub enable: bool,
    pub halt: bool,

    /// Mixing weight applied in [`Apu::sample`]
    pub volume: f32,

    pub sample: f64,
    pub output: f64,

    pub sequencer: Sequencer,
    pub wave: PulseWave,
    pub envelope: Envelope,
    pub length: LengthCounter,
    pub sweeper: Sweeper,
}

impl PulseChannel {
    /// Handle a write to one of the channel's four registers
    pub fn write(&mut self, register: u16, data: u8) {
        match register {
            0 => {
                let (sequence, duty) = DUTY_SEQUENCES[usize::from(data >> 6)];
                self.sequencer.next_sequence = sequence;
                self.sequencer.sequence = sequence;
                self.wave.duty = duty;
                self.halt = data & 0x20 != 0;
                self.envelope.volume = u16::from(data & 0x0F);
                self.envelope.disable = data & 0x10 != 0;
            }
            1 => {
                self.sweeper.enabled = data & 0x80 != 0;
                self.sweeper.period = (data & 0x70) >> 4;
                self.sweeper.down = data & 0x08 != 0;
                self.sweeper.shift = data & 0x07;
                self.sweeper.reload = true;
            }
            2 => {
                self.sequencer.reload = (self.sequencer.reload & 0xFF00) | u16::from(data);
            }
            3 => {
                self.sequencer.reload =
                    (u16::from(data & 0x07) << 8) | (self.sequencer.reload & 0x00FF);
                self.sequencer.timer = self.sequencer.reload;
                self.sequencer.sequence = self.sequencer.next_sequence;
                self.length.counter = LENGTH_TABLE[usize::from(data >> 3)];
                self.envelope.start = true;
            }
            _ => {}
        }
    }

    /// Per-APU-tick update: rotate the duty pattern, synthesise the sample
    /// and gate it through the counters
    pub fn update(&mut self, system_time: f64) {
        self.sequencer.clock(self.enable, |s| {
            // Rotate the 8-bit duty pattern right by one
            ((s & 0x0000_0001) << 7) | ((s & 0x0000_00FE) >> 1)
        });

        self.wave.frequency =
            CPU_CLOCK_HZ / (16.0 * (f64::from(self.sequencer.reload) + 1.0));
        self.wave.amplitude = (f64::from(self.envelope.output) - 1.0) / 16.0;
        self.sample = self.wave.sample(system_time);

        if self.length.counter > 0
            && self.sequencer.timer >= 8
            && !self.sweeper.muted
            && self.envelope.output > 2
        {
            self.output += self.sample - self.output;
        } else {
            self.output = 0.0;
        }

        if !self.enable {
            self.output = 0.0;
        }
    }
}

/// The noise channel: LFSR-driven pseudo-random bit stream
#[derive(Debug, Default, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct NoiseChannel {
    pub enable: bool,
    pub halt: bool,

    /// Mixing weight applied in [`Apu::sample`]
    pub volume: f32,

    pub envelope: Envelope,
    pub length: LengthCounter,
    pub sequencer: Sequencer,
    pub output: f64,
}

/// 15-bit LFSR step: feedback = bit0 ^ bit1 into bit 14
pub fn noise_lfsr_step(s: u32) -> u32 {
    (((s & 0x0001) ^ ((s & 0x0002) >> 1)) << 14) | ((s & 0x7FFF) >> 1)
}

/// Represents the NES 2A03 APU (pulse x2 + noise subset)
#[derive(Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Apu {
    pub pulse1: PulseChannel,
    pub pulse2: PulseChannel,
    pub noise: NoiseChannel,

    /// Frame-sequencer tick counter (one tick per 6 master clocks)
    frame_clock_count: u32,

    /// Master clocks seen
    clock_count: u32,

    /// Emulated wall-clock used by the pulse synthesisers
    system_time: f64,
}

impl Apu {
    pub fn new() -> Self {
        let mut apu = Apu {
            pulse1: PulseChannel {
                volume: 0.1,
                ..PulseChannel::default()
            },
            pulse2: PulseChannel {
                volume: 0.1,
                ..PulseChannel::default()
            },
            noise: NoiseChannel {
                volume: 0.2,
                ..NoiseChannel::default()
            },
            frame_clock_count: 0,
            clock_count: 0,
            system_time: 0.0,
        };
        apu.noise.sequencer.sequence = 0xDBDB;
        apu
    }

    pub fn reset(&mut self) {
        let pulse1_volume = self.pulse1.volume;
        let pulse2_volume = self.pulse2.volume;
        let noise_volume = self.noise.volume;
        *self = Apu::new();
        self.pulse1.volume = pulse1_volume;
        self.pulse2.volume = pulse2_volume;
        self.noise.volume = noise_volume;
    }

    /// Handle a CPU write to $4000-$4013 / $4015
    pub fn cpu_write(&mut self, addr: u16, data: u8) {
        match addr {
            0x4000..=0x4003 => self.pulse1.write(addr - 0x4000, data),
            0x4004..=0x4007 => self.pulse2.write(addr - 0x4004, data),
            0x400C => {
                self.noise.envelope.volume = u16::from(data & 0x0F);
                self.noise.envelope.disable = data & 0x10 != 0;
                self.noise.halt = data & 0x20 != 0;
            }
            0x400E => {
                self.noise.sequencer.reload = NOISE_PERIODS[usize::from(data & 0x0F)];
            }
            0x400F => {
                self.pulse1.envelope.start = true;
                self.pulse2.envelope.start = true;
                self.noise.envelope.start = true;
                self.noise.length.counter = LENGTH_TABLE[usize::from(data >> 3)];
            }
            0x4015 => {
                self.pulse1.enable = data & 0x01 != 0;
                self.pulse2.enable = data & 0x02 != 0;
                self.noise.enable = data & 0x04 != 0;
            }
            _ => trace!("unhandled APU write ${:04X} = ${:02X}", addr, data),
        }
    }

    /// Handle a CPU read; only $4015 (length-counter status) responds
    pub fn cpu_read(&self, addr: u16) -> u8 {
        let mut data = 0;
        if addr == 0x4015 {
            data |= u8::from(self.pulse1.length.counter > 0);
            data |= u8::from(self.pulse2.length.counter > 0) << 1;
            data |= u8::from(self.noise.length.counter > 0) << 2;
        }
        data
    }

    /// Advance one master clock. Frame-sequencer state moves every 6th call
    /// (one APU tick per two CPU cycles).
    pub fn clock(&mut self) {
        let mut quarter_frame = false;
        let mut half_frame = false;

        self.system_time += CLOCK_TIME_STEP;

        if self.clock_count % 6 == 0 {
            self.frame_clock_count += 1;

            // 4-step sequence
            if self.frame_clock_count == QUARTER_FRAME_1
                || self.frame_clock_count == QUARTER_FRAME_3
            {
                quarter_frame = true;
            }
            if self.frame_clock_count == HALF_FRAME_1 {
                quarter_frame = true;
                half_frame = true;
            }
            if self.frame_clock_count == FRAME_END {
                quarter_frame = true;
                half_frame = true;
                self.frame_clock_count = 0;
            }

            if quarter_frame {
                self.pulse1.envelope.clock(self.pulse1.halt);
                self.pulse2.envelope.clock(self.pulse2.halt);
                self.noise.envelope.clock(self.noise.halt);
            }

            if half_frame {
                self.pulse1.length.clock(self.pulse1.enable, self.pulse1.halt);
                self.pulse2.length.clock(self.pulse2.enable, self.pulse2.halt);
                self.noise.length.clock(self.noise.enable, self.noise.halt);

                self.pulse1
                    .sweeper
                    .clock(&mut self.pulse1.sequencer.reload, false);
                self.pulse2
                    .sweeper
                    .clock(&mut self.pulse2.sequencer.reload, true);
            }

            self.pulse1.update(self.system_time);
            self.pulse2.update(self.system_time);

            self.noise
                .sequencer
                .clock(self.noise.enable, noise_lfsr_step);

            if self.noise.length.counter > 0 && self.noise.sequencer.timer >= 8 {
                self.noise.output = f64::from(self.noise.sequencer.output)
                    * ((f64::from(self.noise.envelope.output) - 1.0) / 16.0);
            }
            if !self.noise.enable {
                self.noise.output = 0.0;
            }
        }

        self.pulse1.sweeper.track(self.pulse1.sequencer.reload);
        self.pulse2.sweeper.track(self.pulse2.sequencer.reload);

        self.clock_count += 1;
    }

    /// Mixed output: weighted sum of the channel outputs
    pub fn sample(&self) -> f32 {
        (self.pulse1.output * f64::from(self.pulse1.volume)
            + self.pulse2.output * f64::from(self.pulse2.volume)
            + self.noise.output * f64::from(self.noise.volume)) as f32
    }
}

impl Default for Apu {
    fn default() -> Self {
        Apu::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfsr_period_is_32767_from_seed() {
        let mut state: u32 = 0xDBDB & 0x7FFF;
        let seed = state;
        let mut steps = 0u32;
        loop {
            state = noise_lfsr_step(state);
            steps += 1;
            assert_ne!(state, 0, "LFSR collapsed to zero");
            if state == seed {
                break;
            }
            assert!(steps < 40000, "LFSR never returned to its seed");
        }
        assert_eq!(steps, 32767);
    }

    #[test]
    fn noise_seed_matches_power_on_state()  {
        let apu = Apu::new();
        assert_eq!(apu.noise.sequencer.sequence, 0xDBDB);
    }

    #[test]
    fn length_counter_loads_from_table() {
        let mut apu = Apu::new();
        apu.cpu_write(0x4015, 0x01);
        // Register 3, length index 1 -> 254
        apu.cpu_write(0x4003, 0x08);
        assert_eq!(apu.pulse1.length.counter, 254);
        assert!(apu.pulse1.envelope.start);
    }

    #[test]
    fn duty_select_programs_sequence() {
        let mut apu = Apu::new();
        apu.cpu_write(0x4000, 0xC0); // duty 3
        assert_eq!(apu.pulse1.sequencer.sequence, 0b1001_1111);
        apu.cpu_write(0x4000, 0x00); // duty 0
        assert_eq!(apu.pulse1.sequencer.sequence, 0b0100_0000);
    }

    #[test]
    fn noise_period_table_lookup() {
        let mut apu = Apu::new();
        apu.cpu_write(0x400E, 0x0F);
        assert_eq!(apu.noise.sequencer.reload, 4068);
        apu.cpu_write(0x400E, 0x01);
        assert_eq!(apu.noise.sequencer.reload, 4);
    }

    #[test]
    fn status_read_reports_length_counters() {
        let mut apu = Apu::new();
        assert_eq!(apu.cpu_read(0x4015), 0);

        apu.cpu_write(0x4015, 0x05); // pulse 1 + noise on
        apu.cpu_write(0x4003, 0x08);
        apu.cpu_write(0x400F, 0x08);
        assert_eq!(apu.cpu_read(0x4015), 0x05);
    }

    #[test]
    fn half_frame_decrements_length_counter() {
        let mut apu = Apu::new();
        apu.cpu_write(0x4015, 0x01);
        apu.cpu_write(0x4003, 0x08); // length 254
        let loaded = apu.pulse1.length.counter;

        // One half-frame arrives after 7457 APU ticks = 6 * 7457 clocks
        for _ in 0..6 * 7457 {
            apu.clock();
        }
        assert_eq!(apu.pulse1.length.counter, loaded - 1);
    }

    #[test]
    fn envelope_restart_and_decay() {
        let mut envelope = Envelope {
            start: true,
            volume: 0,
            ..Envelope::default()
        };
        envelope.clock(false);
        assert_eq!(envelope.decay, 15);
        assert_eq!(envelope.output, 15);

        // Divider period 0: every clock steps the decay
        envelope.clock(false);
        assert_eq!(envelope.output, 14);

        for _ in 0..14 {
            envelope.clock(false);
        }
        assert_eq!(envelope.output, 0);

        // Without the loop flag it stays silent
        envelope.clock(false);
        assert_eq!(envelope.output, 0);
        // With it the decay wraps back to 15
        envelope.clock(true);
        assert_eq!(envelope.output, 15);
    }

    #[test]
    fn sweeper_mutes_out_of_range_periods() {
        let mut sweeper = Sweeper {
            enabled: true,
            shift: 1,
            ..Sweeper::default()
        };
        sweeper.track(4);
        assert!(sweeper.muted);
        sweeper.track(0x400);
        assert!(!sweeper.muted);
        sweeper.track(0x900);
        assert!(sweeper.muted);
    }

    #[test]
    fn sweeper_shifts_period_upward() {
        let mut sweeper = Sweeper {
            enabled: true,
            shift: 2,
            period: 0,
            ..Sweeper::default()
        };
        let mut target: u16 = 0x100;
        sweeper.track(target);
        assert!(sweeper.clock(&mut target, false));
        assert_eq!(target, 0x100 + 0x40);
    }

    #[test]
    fn disabled_channels_output_silence() {
        let mut apu = Apu::new();
        apu.cpu_write(0x4003, 0x08);
        apu.cpu_write(0x400F, 0x08);
        for _ in 0..60 {
            apu.clock();
        }
        assert_eq!(apu.sample(), 0.0);
    }
}
