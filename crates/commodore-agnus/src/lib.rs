//! Amiga-class chipset scheduler.
//!
//! Time advances one colour-clock slot at a time. Each slot is offered to
//! the DMA channels in fixed priority order — bitplanes, then the
//! fixed-function odd-slot windows (disk, audio, sprites, refresh), then
//! the Copper, then the Blitter — and whatever is left goes to the CPU.
//! A vertical-blank interrupt posts at the top of each frame, when the
//! Copper also reloads from COP1LC.

mod beam;
mod blitter;
mod copper;
mod interrupts;

pub use beam::{Beam, BeamCrossings, VideoStandard};
pub use blitter::{Blitter, apply_minterms};
pub use copper::{Copper, CopperAction, State as CopperState};
pub use interrupts::{Interrupts, apply_set_clear, source};

use emu_core::{ClockingPreference, ClockingSource, HalfCycles};
use log::trace;

/// Half cycles per colour-clock slot.
pub const HALF_CYCLES_PER_SLOT: i64 = 4;

/// Who won a DMA slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    Bitplane(u8),
    Disk,
    Audio(u8),
    Sprite(u8),
    Refresh,
    Copper,
    Blitter,
    Cpu,
}

/// DMACON channel-enable bits.
pub mod dma {
    pub const AUD0: u16 = 1 << 0;
    pub const AUD1: u16 = 1 << 1;
    pub const AUD2: u16 = 1 << 2;
    pub const AUD3: u16 = 1 << 3;
    pub const DISK: u16 = 1 << 4;
    pub const SPRITE: u16 = 1 << 5;
    pub const BLITTER: u16 = 1 << 6;
    pub const COPPER: u16 = 1 << 7;
    pub const BITPLANE: u16 = 1 << 8;
    /// The global gate, ANDed into all of the above.
    pub const MASTER: u16 = 1 << 9;
    pub const BLITTER_PRIORITY: u16 = 1 << 10;
}

/// Lo-res plane fetch order within an 8-slot group; `None` slots stay
/// available to lower-priority channels. Plane 0 comes last and latches
/// the completed shifter pair.
pub const LOWRES_FETCH_ORDER: [Option<u8>; 8] = [
    None,
    Some(3),
    Some(5),
    Some(1),
    None,
    Some(2),
    Some(4),
    Some(0),
];

/// Hi-res planes cycle every 4 slots.
pub const HIRES_FETCH_ORDER: [Option<u8>; 4] = [Some(3), Some(1), Some(2), Some(0)];

pub struct Chipset {
    pub beam: Beam,
    pub copper: Copper,
    pub blitter: Blitter,
    pub interrupts: Interrupts,

    /// Chip RAM, as words.
    pub ram: Vec<u16>,

    dmacon: u16,
    bplcon0: u16,
    diwstrt: u16,
    diwstop: u16,
    ddfstrt: u16,
    ddfstop: u16,
    pub palette: [u16; 32],
    pub bpl_pointers: [u32; 6],

    /// CPU-usable slots accumulated since last drained.
    cpu_slots: u32,
    /// A completed plane-0 fetch this line, for the shifter latch.
    shifter_latched: bool,
    slot_residue: HalfCycles,
}

impl Chipset {
    #[must_use]
    pub fn new(standard: VideoStandard, chip_ram_words: usize) -> Self {
        Self {
            beam: Beam::new(standard),
            copper: Copper::new(),
            blitter: Blitter::new(),
            interrupts: Interrupts::default(),
            ram: vec![0; chip_ram_words],
            dmacon: 0,
            bplcon0: 0,
            diwstrt: 0x2C81,
            diwstop: 0xF4C1,
            ddfstrt: 0x38,
            ddfstop: 0xD0,
            palette: [0; 32],
            bpl_pointers: [0; 6],
            cpu_slots: 0,
            shifter_latched: false,
            slot_residue: HalfCycles::ZERO,
        }
    }

    #[must_use]
    pub fn dma_enabled(&self, bit: u16) -> bool {
        self.dmacon & dma::MASTER != 0 && self.dmacon & bit != 0
    }

    #[must_use]
    pub fn interrupt_level(&self) -> u8 {
        self.interrupts.level()
    }

    /// Slots granted to the CPU since the last call.
    pub fn drain_cpu_slots(&mut self) -> u32 {
        core::mem::take(&mut self.cpu_slots)
    }

    #[must_use]
    fn bitplane_count(&self) -> u8 {
        ((self.bplcon0 >> 12) & 7).min(6) as u8
    }

    #[must_use]
    fn is_hires(&self) -> bool {
        self.bplcon0 & 0x8000 != 0
    }

    /// Vertical display window test for the current line.
    fn in_vertical_display(&self) -> bool {
        let start = self.diwstrt >> 8;
        // The stop value's vertical byte has an implied set bit 8.
        let stop = (self.diwstop >> 8) | 0x100;
        self.beam.y >= start && self.beam.y < stop
    }

    /// Horizontal fetch window test; stop is inclusive of the final fetch
    /// group.
    fn in_fetch_window(&self) -> bool {
        let x = self.beam.x;
        x >= self.ddfstrt && x <= self.ddfstop + 7
    }

    /// Offers the current slot to each channel in priority order.
    #[must_use]
    pub fn slot_owner(&self) -> SlotOwner {
        let x = self.beam.x;

        // 1: bitplane fetches outrank everything.
        if self.dma_enabled(dma::BITPLANE)
            && self.bitplane_count() > 0
            && self.in_vertical_display()
            && self.in_fetch_window()
        {
            let plane = if self.is_hires() {
                HIRES_FETCH_ORDER[((x - self.ddfstrt) % 4) as usize]
            } else {
                LOWRES_FETCH_ORDER[((x - self.ddfstrt) % 8) as usize]
            };
            if let Some(plane) = plane {
                if plane < self.bitplane_count() {
                    return SlotOwner::Bitplane(plane);
                }
            }
        }

        // 2: the fixed-function windows live on odd slots.
        if x & 1 == 1 {
            if (7..12).contains(&x) {
                if self.dma_enabled(dma::DISK) {
                    return SlotOwner::Disk;
                }
            } else if (13..=19).contains(&x) {
                let channel = ((x - 13) / 2) as u8;
                if self.dma_enabled(dma::AUD0 << channel) {
                    return SlotOwner::Audio(channel);
                }
            } else if (21..52).contains(&x) {
                if self.dma_enabled(dma::SPRITE) && self.in_vertical_display() {
                    return SlotOwner::Sprite(((x - 21) / 4) as u8);
                }
            } else if x < 7 {
                return SlotOwner::Refresh;
            }

            // 3: remaining odd slots go to the Copper.
            if self.dma_enabled(dma::COPPER) {
                return SlotOwner::Copper;
            }
        }

        // 4: the Blitter takes what is left while busy; with the priority
        // bit clear the CPU still gets every other opportunity, which is
        // approximated by granting the Blitter even slots only.
        if self.dma_enabled(dma::BLITTER) && self.blitter.busy() {
            if self.dmacon & dma::BLITTER_PRIORITY != 0 || x & 1 == 0 {
                return SlotOwner::Blitter;
            }
        }

        SlotOwner::Cpu
    }

    /// Advances one slot: arbitration, channel work, beam movement.
    pub fn advance_slot(&mut self) -> SlotOwner {
        let owner = self.slot_owner();

        match owner {
            SlotOwner::Bitplane(plane) => {
                let address = self.bpl_pointers[plane as usize];
                self.bpl_pointers[plane as usize] = address.wrapping_add(2);
                if plane == 0 {
                    // Plane 0 completes the fetch group and latches the
                    // shifters.
                    self.shifter_latched = true;
                }
            }
            SlotOwner::Copper => {
                let position = self.beam.copper_position();
                let blitter_busy = self.blitter.busy();
                let ram_mask = self.ram.len() - 1;
                let action = {
                    let ram = &self.ram;
                    self.copper.advance_dma(position, blitter_busy, |address| {
                        ram[(address as usize / 2) & ram_mask]
                    })
                };
                if let CopperAction::Move { register, value } = action {
                    trace!("copper MOVE {register:03x} = {value:04x}");
                    self.write_register(register, value);
                }
            }
            SlotOwner::Blitter => {
                if self.blitter.advance(&mut self.ram) {
                    self.interrupts.post(source::BLIT);
                }
            }
            SlotOwner::Cpu => self.cpu_slots += 1,
            // Disk, audio, sprite and refresh transfers are owned by their
            // devices; the scheduler's concern is only that the slot is
            // spoken for.
            _ => {}
        }

        let crossings = self.beam.advance_slot();
        if crossings.new_line {
            self.shifter_latched = false;
        }
        if crossings.new_frame {
            self.interrupts.post(source::VERTB);
            self.copper.reload_1();
        }
        owner
    }

    /// Runs whole slots out of `duration`, carrying any residue to the
    /// next call so batching never loses time.
    pub fn run_for(&mut self, duration: HalfCycles) {
        let total = self.slot_residue + duration;
        let slots = total.get() / HALF_CYCLES_PER_SLOT;
        self.slot_residue = total % HALF_CYCLES_PER_SLOT;
        for _ in 0..slots {
            let _ = self.advance_slot();
        }
    }

    //
    // Register file.
    //

    pub fn write_register(&mut self, offset: u16, value: u16) {
        match offset & 0x1FE {
            0x02E => self.copper.danger = value & 2 != 0,
            0x040 => self.blitter.set_control_0(value),
            0x042 => self.blitter.set_control_1(value),
            0x044 => self.blitter.set_first_word_mask(value),
            0x046 => self.blitter.set_last_word_mask(value),
            0x048 => set_pointer_high(&mut self.blitter.pointer[2], value),
            0x04A => set_pointer_low(&mut self.blitter.pointer[2], value),
            0x04C => set_pointer_high(&mut self.blitter.pointer[1], value),
            0x04E => set_pointer_low(&mut self.blitter.pointer[1], value),
            0x050 => set_pointer_high(&mut self.blitter.pointer[0], value),
            0x052 => set_pointer_low(&mut self.blitter.pointer[0], value),
            0x054 => set_pointer_high(&mut self.blitter.pointer[3], value),
            0x056 => set_pointer_low(&mut self.blitter.pointer[3], value),
            0x058 => self.blitter.set_size(value),
            0x060 => self.blitter.modulo[2] = value as i16,
            0x062 => self.blitter.modulo[1] = value as i16,
            0x064 => self.blitter.modulo[0] = value as i16,
            0x066 => self.blitter.modulo[3] = value as i16,
            0x070 => self.blitter.data[2] = value,
            0x072 => self.blitter.data[1] = value,
            0x074 => self.blitter.data[0] = value,

            0x080 => set_pointer_high(&mut self.copper.cop1lc, value),
            0x082 => set_pointer_low(&mut self.copper.cop1lc, value),
            0x084 => set_pointer_high(&mut self.copper.cop2lc, value),
            0x086 => set_pointer_low(&mut self.copper.cop2lc, value),
            0x088 => self.copper.reload_1(),
            0x08A => self.copper.reload_2(),

            0x08E => self.diwstrt = value,
            0x090 => self.diwstop = value,
            0x092 => self.ddfstrt = value & 0xFC,
            0x094 => self.ddfstop = value & 0xFC,

            0x096 => apply_set_clear(&mut self.dmacon, value, 0x7FFF),
            0x09A => self.interrupts.write_enable(value),
            0x09C => self.interrupts.write_request(value),

            0x0E0 | 0x0E4 | 0x0E8 | 0x0EC | 0x0F0 | 0x0F4 => {
                let plane = ((offset & 0x1FE) - 0x0E0) as usize / 4;
                set_pointer_high(&mut self.bpl_pointers[plane], value);
            }
            0x0E2 | 0x0E6 | 0x0EA | 0x0EE | 0x0F2 | 0x0F6 => {
                let plane = ((offset & 0x1FE) - 0x0E2) as usize / 4;
                set_pointer_low(&mut self.bpl_pointers[plane], value);
            }

            0x100 => self.bplcon0 = value,

            0x180..=0x1BE => {
                self.palette[((offset & 0x3E) >> 1) as usize] = value & 0x0FFF;
            }

            other => trace!("unhandled chipset write {other:03x} = {value:04x}"),
        }
    }

    #[must_use]
    pub fn read_register(&self, offset: u16) -> u16 {
        match offset & 0x1FE {
            0x002 => {
                // DMACONR: blitter-busy in bit 14.
                (self.dmacon & 0x3FFF) | (u16::from(self.blitter.busy()) << 14)
            }
            0x004 => self.beam.y >> 8,
            0x006 => ((self.beam.y & 0xFF) << 8) | (self.beam.x & 0xFF),
            0x01C => self.interrupts.enable(),
            0x01E => self.interrupts.pending(),
            _ => 0xFFFF,
        }
    }

    #[must_use]
    pub fn border_colour(&self) -> u16 {
        self.palette[0]
    }
}

impl ClockingSource for Chipset {
    /// Slot arbitration is deterministic from register state, so the bus
    /// owner may run the chipset in arbitrary batches.
    fn preferred_clocking(&self) -> ClockingPreference {
        ClockingPreference::JustInTime
    }
}

fn set_pointer_high(pointer: &mut u32, value: u16) {
    *pointer = (*pointer & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
}

fn set_pointer_low(pointer: &mut u32, value: u16) {
    *pointer = (*pointer & 0xFFFF_0000) | u32::from(value & 0xFFFE);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chipset() -> Chipset {
        Chipset::new(VideoStandard::Pal, 0x8000)
    }

    fn enable_dma(chipset: &mut Chipset, bits: u16) {
        chipset.write_register(0x096, 0x8000 | dma::MASTER | bits);
    }

    #[test]
    fn dmaen_gates_individual_channels() {
        let mut chipset = chipset();
        chipset.write_register(0x096, 0x8000 | dma::COPPER);
        assert!(!chipset.dma_enabled(dma::COPPER)); // no master bit
        chipset.write_register(0x096, 0x8000 | dma::MASTER);
        assert!(chipset.dma_enabled(dma::COPPER));
    }

    #[test]
    fn fixed_windows_claim_their_odd_slots() {
        let mut chipset = chipset();
        enable_dma(
            &mut chipset,
            dma::DISK | dma::AUD0 | dma::AUD1 | dma::AUD2 | dma::AUD3 | dma::SPRITE,
        );
        chipset.beam.y = 0x50; // inside the vertical display window

        chipset.beam.x = 7;
        assert_eq!(chipset.slot_owner(), SlotOwner::Disk);
        chipset.beam.x = 11;
        assert_eq!(chipset.slot_owner(), SlotOwner::Disk);
        chipset.beam.x = 13;
        assert_eq!(chipset.slot_owner(), SlotOwner::Audio(0));
        chipset.beam.x = 19;
        assert_eq!(chipset.slot_owner(), SlotOwner::Audio(3));
        chipset.beam.x = 21;
        assert_eq!(chipset.slot_owner(), SlotOwner::Sprite(0));
        chipset.beam.x = 51;
        assert_eq!(chipset.slot_owner(), SlotOwner::Sprite(7));
        chipset.beam.x = 1;
        assert_eq!(chipset.slot_owner(), SlotOwner::Refresh);

        // Even slots in the same ranges fall through to the CPU.
        chipset.beam.x = 8;
        assert_eq!(chipset.slot_owner(), SlotOwner::Cpu);
    }

    #[test]
    fn bitplanes_outrank_the_fixed_windows() {
        let mut chipset = chipset();
        enable_dma(&mut chipset, dma::BITPLANE | dma::DISK);
        chipset.write_register(0x100, 1 << 12); // one bitplane
        chipset.write_register(0x092, 0x0008);
        chipset.write_register(0x094, 0x0008);
        chipset.beam.y = 0x50;

        // Slot ddfstrt+7 is the plane-0 fetch in the lo-res order.
        chipset.beam.x = 8 + 7;
        assert_eq!(chipset.slot_owner(), SlotOwner::Bitplane(0));
    }

    #[test]
    fn hires_uses_the_four_slot_cycle() {
        let mut chipset = chipset();
        enable_dma(&mut chipset, dma::BITPLANE);
        chipset.write_register(0x100, (2 << 12) | 0x8000); // hires, 2 planes
        chipset.write_register(0x092, 0x0008);
        chipset.write_register(0x094, 0x0008);
        chipset.beam.y = 0x50;

        chipset.beam.x = 8 + 3;
        assert_eq!(chipset.slot_owner(), SlotOwner::Bitplane(0));
        chipset.beam.x = 8 + 1;
        assert_eq!(chipset.slot_owner(), SlotOwner::Bitplane(1));
    }

    #[test]
    fn outside_display_window_frees_slots() {
        let mut chipset = chipset();
        enable_dma(&mut chipset, dma::BITPLANE);
        chipset.write_register(0x100, 1 << 12);
        chipset.write_register(0x092, 0x0038);
        chipset.write_register(0x094, 0x0038);

        chipset.beam.y = 0; // above the display window
        chipset.beam.x = 0x38 + 7;
        assert_eq!(chipset.slot_owner(), SlotOwner::Cpu);
    }

    #[test]
    fn copper_scenario_changes_border_colour_mid_frame() {
        let mut chipset = chipset();
        enable_dma(&mut chipset, dma::COPPER);

        // MOVE BPLCON0, #$0200 | WAIT line $29 | MOVE COLOR00, #$0F00.
        let program: [u16; 6] = [0x0100, 0x0200, 0x2901, 0xFFFE, 0x0180, 0x0F00];
        for (index, word) in program.iter().enumerate() {
            chipset.ram[0x100 + index] = *word;
        }
        chipset.write_register(0x080, 0x0000);
        chipset.write_register(0x082, 0x0200); // byte address of word 0x100
        chipset.write_register(0x088, 0);

        // Run to mid-frame line by line, sampling the border colour.
        let slots_per_line = i64::from(beam::PAL_SLOTS_PER_LINE);
        let mut colour_at_line = Vec::new();
        for _ in 0..0x40 {
            chipset.run_for(HalfCycles::new(slots_per_line * HALF_CYCLES_PER_SLOT));
            colour_at_line.push(chipset.border_colour());
        }

        // The first MOVE committed immediately; the second waited for
        // line $29.
        assert_eq!(colour_at_line[0x10], 0x0000);
        assert_eq!(colour_at_line[0x28], 0x0000);
        assert_eq!(colour_at_line[0x2A], 0x0F00);
        assert_eq!(chipset.border_colour(), 0x0F00);
    }

    #[test]
    fn vertical_blank_posts_at_frame_top() {
        let mut chipset = chipset();
        chipset.interrupts.write_enable(0x8000 | (1 << 14) | source::VERTB);

        let frame_slots = i64::from(beam::PAL_SLOTS_PER_LINE)
            * i64::from(beam::PAL_SHORT_FRAME_LINES)
            * HALF_CYCLES_PER_SLOT;
        chipset.run_for(HalfCycles::new(frame_slots - 4));
        assert_eq!(chipset.interrupt_level(), 0);

        chipset.run_for(HalfCycles::new(4));
        assert_eq!(chipset.interrupt_level(), 3);
    }

    #[test]
    fn blitter_completion_posts_its_interrupt() {
        let mut chipset = chipset();
        enable_dma(&mut chipset, dma::BLITTER);
        chipset
            .interrupts
            .write_enable(0x8000 | (1 << 14) | source::BLIT);

        chipset.write_register(0x040, 0x09F0); // USEA|USED, D = A
        chipset.write_register(0x050, 0);
        chipset.write_register(0x052, 0);
        chipset.write_register(0x054, 0);
        chipset.write_register(0x056, 0x100);
        chipset.write_register(0x058, (1 << 6) | 1); // 1×1

        chipset.run_for(HalfCycles::new(64));
        assert!(!chipset.blitter.busy());
        assert_eq!(chipset.interrupt_level(), 3);
    }

    #[test]
    fn blitter_priority_bit_takes_cpu_slots() {
        let mut chipset = chipset();
        enable_dma(&mut chipset, dma::BLITTER | dma::BLITTER_PRIORITY);
        chipset.write_register(0x040, 0x09F0);
        chipset.write_register(0x058, (4 << 6) | 4);

        chipset.beam.x = 60; // a free even slot
        assert_eq!(chipset.slot_owner(), SlotOwner::Blitter);
        chipset.beam.x = 61; // a free odd slot, copper disabled
        assert_eq!(chipset.slot_owner(), SlotOwner::Blitter);

        // Without nasty mode the odd free slot returns to the CPU.
        chipset.write_register(0x096, dma::BLITTER_PRIORITY);
        chipset.beam.x = 61;
        assert_eq!(chipset.slot_owner(), SlotOwner::Cpu);
    }

    #[test]
    fn run_for_carries_half_cycle_residue() {
        let mut chipset = chipset();
        let mut reference = Chipset::new(VideoStandard::Pal, 0x8000);

        // 1001 half cycles in odd batches must equal one batch.
        reference.run_for(HalfCycles::new(1001));
        for _ in 0..7 {
            chipset.run_for(HalfCycles::new(143));
        }
        assert_eq!(chipset.beam.x, reference.beam.x);
        assert_eq!(chipset.beam.y, reference.beam.y);
    }
}
