//! An Archimedes-class machine: ARM2 over the MEMC bus, with the floppy
//! controller and interrupt latches behind the I/O controller window.

use acorn_arm2::{Executor, Model};
use acorn_memc::{IoController, MemoryController, ROM_SIZE};
use drive_floppy::fm::{Sector, SectorDisk};
use emu_core::{Cycles, HalfCycles, Observer};
use emu_reflect::{Reflectable, declare_fields, reflectable_enum};
use log::debug;
use media_analyser::Target;
use wd_1770::{Personality, Wd1770};

use crate::inputs::{Key, KeyboardMapper, Mouse, MouseAccumulator};
use crate::rom::{RomFetcher, RomRequest};
use crate::{ConfigurableDevice, KeyboardMachine, MachineError, TimedMachine};

reflectable_enum! {
    pub enum DisplayOutput { Rgb, Television }
}

/// User-configurable options, exposed through the reflection layer.
#[derive(Debug)]
pub struct ArchimedesOptions {
    pub output: DisplayOutput,
    pub quickload: bool,
}

declare_fields!(ArchimedesOptions {
    output,
    quickload,
});

impl Default for ArchimedesOptions {
    fn default() -> Self {
        // The user-friendly defaults a host shows before construction.
        Self {
            output: DisplayOutput::Rgb,
            quickload: true,
        }
    }
}

/// The I/O controller space: interrupt latches, the floppy controller,
/// and the keyboard serial latch.
pub struct Ioc {
    pub fdc: Wd1770,
    irq_status_a: u8,
    irq_mask_a: u8,
    keyboard_data: u8,
}

impl Ioc {
    fn new() -> Self {
        Self {
            fdc: Wd1770::new(Personality::P1772),
            irq_status_a: 0,
            irq_mask_a: 0,
            keyboard_data: 0,
        }
    }

    /// The IRQ line as the CPU sees it: any unmasked latched source.
    fn irq_asserted(&self) -> bool {
        let mut status = self.irq_status_a;
        if self.fdc.interrupt_request() {
            status |= 1 << 3;
        }
        status & self.irq_mask_a != 0
    }
}

impl IoController for Ioc {
    fn read(&mut self, address: u32) -> u32 {
        match (address >> 2) & 0x1F {
            // IRQ status A / mask A.
            0x04 => {
                let mut status = self.irq_status_a;
                if self.fdc.interrupt_request() {
                    status |= 1 << 3;
                }
                u32::from(status)
            }
            0x05 => u32::from(self.irq_mask_a),
            0x06 => u32::from(self.keyboard_data),
            // Floppy controller registers.
            0x10..=0x13 => u32::from(self.fdc.get_register(address >> 2)),
            _ => !0,
        }
    }

    fn write(&mut self, address: u32, value: u32) {
        match (address >> 2) & 0x1F {
            0x04 => self.irq_status_a &= !(value as u8),
            0x05 => self.irq_mask_a = value as u8,
            0x06 => self.keyboard_data = value as u8,
            0x10..=0x13 => self.fdc.set_register(address >> 2, value as u8, None),
            _ => {}
        }
    }
}

/// A very plain keyboard map: Acorn KART scancodes for the keys a debug
/// host most wants.
pub struct ArchimedesKeyboardMapper;

impl KeyboardMapper for ArchimedesKeyboardMapper {
    fn keycode_for(&self, key: Key) -> Option<u16> {
        let code = match key {
            Key::Escape => 0x00,
            Key::Digit1 => 0x11,
            Key::Digit2 => 0x12,
            Key::Digit3 => 0x13,
            Key::Digit4 => 0x14,
            Key::Digit5 => 0x15,
            Key::Digit6 => 0x16,
            Key::Digit7 => 0x17,
            Key::Digit8 => 0x18,
            Key::Digit9 => 0x19,
            Key::Digit0 => 0x1A,
            Key::Q => 0x27,
            Key::W => 0x28,
            Key::E => 0x29,
            Key::R => 0x2A,
            Key::T => 0x2B,
            Key::Y => 0x2C,
            Key::U => 0x2D,
            Key::I => 0x2E,
            Key::O => 0x2F,
            Key::P => 0x30,
            Key::A => 0x3C,
            Key::S => 0x3D,
            Key::D => 0x3E,
            Key::F => 0x3F,
            Key::G => 0x40,
            Key::H => 0x41,
            Key::J => 0x42,
            Key::K => 0x43,
            Key::L => 0x44,
            Key::Z => 0x4E,
            Key::X => 0x4F,
            Key::C => 0x50,
            Key::V => 0x51,
            Key::B => 0x52,
            Key::N => 0x53,
            Key::M => 0x54,
            Key::Space => 0x5F,
            Key::Enter => 0x47,
            Key::Backspace => 0x1E,
            Key::Tab => 0x26,
            Key::LeftShift => 0x4C,
            Key::RightShift => 0x58,
            Key::Control => 0x3B,
            Key::CapsLock => 0x5D,
            Key::Up => 0x59,
            Key::Down => 0x62,
            Key::Left => 0x61,
            Key::Right => 0x63,
            _ => return None,
        };
        Some(code)
    }
}

/// CPU clock: 8 MHz ARM2, quoted here in half cycles.
const HALF_CYCLES_PER_INSTRUCTION_ESTIMATE: i64 = 8;

pub struct Archimedes {
    executor: Executor<MemoryController<Ioc>>,
    options: ArchimedesOptions,
    mouse: MouseAccumulator,
    mapper: ArchimedesKeyboardMapper,
    time_residue: HalfCycles,
}

impl Archimedes {
    pub fn new(target: &Target, rom_fetcher: &dyn RomFetcher) -> Result<Self, MachineError> {
        let request = RomRequest {
            machine_name: "Archimedes",
            file_name: "riscos.rom",
            expected_size: ROM_SIZE,
            expected_crc: None,
        };
        let Some(rom) = rom_fetcher.fetch(&request) else {
            return Err(MachineError::MissingRoms(vec![
                request.file_name.to_string(),
            ]));
        };
        if !request.matches(&rom) {
            return Err(MachineError::MissingRoms(vec![
                request.file_name.to_string(),
            ]));
        }

        let mut memory = MemoryController::new(Ioc::new());
        if !memory.set_rom(&rom) {
            return Err(MachineError::MissingRoms(vec![
                request.file_name.to_string(),
            ]));
        }

        let mut machine = Self {
            executor: Executor::new(Model::Armv2, memory),
            options: ArchimedesOptions::default(),
            mouse: MouseAccumulator::new(3),
            mapper: ArchimedesKeyboardMapper,
            time_residue: HalfCycles::ZERO,
        };

        // Media: the first disk image becomes drive 0's contents, mapped
        // as flat 256-byte sectors.
        if let Some(image) = target.media.disks.first() {
            machine
                .executor
                .bus
                .io
                .fdc
                .drive
                .insert_disk(Box::new(disk_from_flat_image(image)));
        }

        machine.executor.reset();
        Ok(machine)
    }

    #[must_use]
    pub fn mouse(&mut self) -> &mut MouseAccumulator {
        &mut self.mouse
    }

    pub fn register_activity(&mut self, observer: &mut dyn Observer) {
        self.executor.bus.io.fdc.drive.register(observer);
    }
}

/// Wraps a flat image into cylinders of sixteen 256-byte sectors.
fn disk_from_flat_image(image: &[u8]) -> SectorDisk {
    const SECTOR_SIZE: usize = 256;
    const SECTORS_PER_TRACK: usize = 16;

    let mut sectors = Vec::new();
    for (index, chunk) in image.chunks(SECTOR_SIZE).enumerate() {
        let mut data = chunk.to_vec();
        data.resize(SECTOR_SIZE, 0);
        sectors.push(Sector {
            cylinder: (index / SECTORS_PER_TRACK) as u8,
            head: 0,
            sector: (index % SECTORS_PER_TRACK) as u8 + 1,
            data,
        });
    }
    debug!("mapped {} sectors from flat image", sectors.len());
    SectorDisk::new(sectors, false)
}

impl TimedMachine for Archimedes {
    fn run_for(&mut self, duration: HalfCycles) {
        let total = self.time_residue + duration;
        let instructions = total.get() / HALF_CYCLES_PER_INSTRUCTION_ESTIMATE;
        self.time_residue =
            total - HalfCycles::new(instructions * HALF_CYCLES_PER_INSTRUCTION_ESTIMATE);

        for _ in 0..instructions {
            let irq = self.executor.bus.io.irq_asserted();
            self.executor.set_irq_line(irq);
            self.executor.step();
            self.executor
                .bus
                .io
                .fdc
                .run_for(Cycles::new(HALF_CYCLES_PER_INSTRUCTION_ESTIMATE / 2));
        }
    }
}

impl ConfigurableDevice for Archimedes {
    fn options(&self) -> &dyn Reflectable {
        &self.options
    }

    fn options_mut(&mut self) -> &mut dyn Reflectable {
        &mut self.options
    }
}

impl KeyboardMachine for Archimedes {
    fn keyboard_mapper(&self) -> &dyn KeyboardMapper {
        &self.mapper
    }

    fn set_key_state(&mut self, scancode: u16, pressed: bool) {
        // KART frames carry the row/column with an up/down marker; the
        // serial protocol itself is not modelled, so latch the most
        // recent event for the OS to poll.
        let frame = (scancode & 0x7F) as u8 | if pressed { 0x80 } else { 0 };
        self.executor.bus.io.keyboard_data = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_analyser::{Machine, MachineOptions, Media};

    struct ZeroRoms;
    impl RomFetcher for ZeroRoms {
        fn fetch(&self, request: &RomRequest) -> Option<Vec<u8>> {
            Some(vec![0; request.expected_size])
        }
    }

    fn target() -> Target {
        Target {
            machine: Machine::Archimedes,
            media: Media {
                disks: vec![vec![0xA5; 8192]],
                ..Media::default()
            },
            loading_command: String::new(),
            confidence: 0.5,
            options: MachineOptions::None,
        }
    }

    #[test]
    fn machine_runs_time_without_incident() {
        let Ok(mut machine) = Archimedes::new(&target(), &ZeroRoms) else {
            panic!("construction should succeed");
        };
        // An all-zero ROM executes andeq r0, r0, r0 forever; the machine
        // must simply consume the time.
        machine.run_for(HalfCycles::new(10_000));
    }

    #[test]
    fn run_for_batches_preserve_total_time() {
        let Ok(mut a) = Archimedes::new(&target(), &ZeroRoms) else {
            panic!();
        };
        let Ok(mut b) = Archimedes::new(&target(), &ZeroRoms) else {
            panic!();
        };

        a.run_for(HalfCycles::new(999));
        for _ in 0..37 {
            b.run_for(HalfCycles::new(27));
        }
        assert_eq!(a.executor.pc(), b.executor.pc());
    }

    #[test]
    fn keyboard_mapper_translates_known_keys() {
        let Ok(machine) = Archimedes::new(&target(), &ZeroRoms) else {
            panic!();
        };
        let mapper = machine.keyboard_mapper();
        assert_eq!(mapper.keycode_for(Key::A), Some(0x3C));
        assert_eq!(mapper.keycode_for(Key::F12), None);
    }

    #[test]
    fn disk_image_maps_to_sectors() {
        let disk = disk_from_flat_image(&vec![0x42; 256 * 20]);
        assert!(disk.sector(0, 0, 1).is_some());
        assert!(disk.sector(1, 0, 4).is_some());
        assert!(disk.sector(2, 0, 1).is_none());
    }
}
