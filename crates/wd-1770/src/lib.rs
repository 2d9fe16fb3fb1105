//! WD1770/1772/1793 floppy disk controller.
//!
//! The controller is an explicit state machine fed by three event sources:
//! register writes from the host, index holes and bit windows from the
//! selected drive, and an internal millisecond timer. Bit windows pass
//! through a shift-register tokeniser that recognises the FM address marks
//! by their missing clock pulses (plus the MFM sync word), and everything
//! downstream consumes tokens.

mod tokeniser;

use drive_floppy::fm::crc16;
use drive_floppy::{Drive, DriveSignal, ReadyType};
use emu_core::{ClockingPreference, ClockingSource, Cycles, Time};
use log::debug;
pub use tokeniser::{Token, Tokeniser};

/// Input clock, as on the schematics: 8 MHz.
pub const CLOCK_RATE: u64 = 8_000_000;

const CYCLES_PER_MS: u64 = CLOCK_RATE / 1000;

/// Status register bits. Several are shared between command classes:
/// bit 1 is the index pulse for type 1 and DRQ otherwise; bit 2 is
/// track-zero for type 1 and lost-data otherwise; bit 5 is spin-up for
/// type 1 and the record type for type 2 reads.
pub mod status {
    pub const BUSY: u8 = 0x01;
    pub const DATA_REQUEST: u8 = 0x02;
    pub const TRACK_ZERO: u8 = 0x04;
    pub const LOST_DATA: u8 = 0x04;
    pub const CRC_ERROR: u8 = 0x08;
    pub const SEEK_ERROR: u8 = 0x10;
    pub const RECORD_NOT_FOUND: u8 = 0x10;
    pub const SPIN_UP: u8 = 0x20;
    pub const RECORD_TYPE: u8 = 0x20;
    pub const WRITE_PROTECT: u8 = 0x40;
    pub const MOTOR_ON: u8 = 0x80;
}

/// Which member of the family is being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Personality {
    /// Motor-on line, standard step rates.
    P1770,
    /// Motor-on line, the fast step rates and halved settling delay.
    P1772,
    /// Head-load line instead of motor-on; no spin-up sequence.
    P1793,
}

impl Personality {
    const fn has_motor_on_line(self) -> bool {
        !matches!(self, Personality::P1793)
    }

    /// Step rate in milliseconds for command bits 0–1.
    const fn step_rate_ms(self, rate: u8) -> u64 {
        match (self, rate & 3) {
            (Personality::P1772, 0) => 2,
            (Personality::P1772, 1) => 3,
            (Personality::P1772, 2) => 5,
            (Personality::P1772, _) => 6,
            (_, 0) => 6,
            (_, 1) => 12,
            (_, 2) => 20,
            (_, _) => 30,
        }
    }

    const fn settle_ms(self) -> u64 {
        match self {
            Personality::P1772 => 15,
            _ => 30,
        }
    }
}

fn reborrow_delegate<'a>(
    delegate: &'a mut Option<&mut dyn Delegate>,
) -> Option<&'a mut dyn Delegate> {
    match delegate {
        Some(d) => Some(&mut **d),
        None => None,
    }
}

/// Host-visible line changes.
pub trait Delegate {
    fn wd1770_did_set_interrupt_request(&mut self, asserted: bool) {
        let _ = asserted;
    }

    fn wd1770_did_set_data_request(&mut self, asserted: bool) {
        let _ = asserted;
    }

    /// The 1793-style head-load request, also used by machines that page
    /// ROM on head load.
    fn wd1770_did_set_head_load_request(&mut self, asserted: bool) {
        let _ = asserted;
    }
}

/// Where a spin-up sequence resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Type1,
    Type2,
    Type3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// Counting index holes until the motor is at speed.
    SpinUp {
        remaining: u8,
        resume: Resume,
    },
    /// A type-1 step is settling; the timer ends it.
    StepDelay,
    /// Type-2 head-settle delay under the E flag.
    SettleDelay,
    /// Scanning for an ID address mark.
    SearchId {
        verify_only: bool,
    },
    /// Collecting the six ID-field bytes.
    ReadHeader {
        count: u8,
        verify_only: bool,
    },
    /// Awaiting the data address mark within the documented window.
    SearchData {
        bytes: u8,
    },
    /// Transferring sector bytes to the host.
    ReadData {
        count: u16,
    },
    /// Collecting the two data CRC bytes.
    ReadCrc {
        count: u8,
    },
    /// Waiting the documented gap before a write, then checking DRQ
    /// service.
    WriteWait {
        bytes: u8,
    },
    /// Accepting sector bytes from the host.
    WriteData {
        count: u16,
    },
    /// Type 3: streaming an ID field to the host.
    ReadAddress {
        count: u8,
    },
    /// Type 3: streaming raw bytes until the next index hole.
    ReadTrack {
        started: bool,
    },
    /// Type 3: accepting raw bytes until the next index hole.
    WriteTrack {
        started: bool,
    },
}

pub struct Wd1770 {
    personality: Personality,

    status: u8,
    command: u8,
    track: u8,
    sector: u8,
    data: u8,

    state: State,
    step_in: bool,
    index_count: u8,
    delay_cycles: u64,
    header: [u8; 6],
    buffer: Vec<u8>,
    /// Index-pulse force-interrupt armed by command $D4.
    interrupt_on_index: bool,
    /// Index holes seen while idle, for motor spin-down.
    idle_index_count: u8,

    irq: bool,
    tokeniser: Tokeniser,
    pub drive: Drive,
    signals: Vec<DriveSignal>,
}

impl Wd1770 {
    #[must_use]
    pub fn new(personality: Personality) -> Self {
        let ready_type = match personality {
            Personality::P1793 => ReadyType::ShugartModifiedRdy,
            _ => ReadyType::ShugartRdy,
        };
        let mut drive = Drive::new("0", CLOCK_RATE, ready_type);
        drive.set_expected_bit_length(Time::new(1, 250_000));
        Self {
            personality,
            status: 0,
            command: 0xD0,
            track: 0,
            sector: 0,
            data: 0,
            state: State::Idle,
            step_in: true,
            index_count: 0,
            delay_cycles: 0,
            header: [0; 6],
            buffer: Vec::new(),
            interrupt_on_index: false,
            idle_index_count: 0,
            irq: false,
            tokeniser: Tokeniser::new(),
            drive,
            signals: Vec::new(),
        }
    }

    #[must_use]
    pub fn interrupt_request(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn data_request(&self) -> bool {
        self.status & status::DATA_REQUEST != 0
    }

    pub fn set_is_double_density(&mut self, double_density: bool) {
        self.tokeniser.set_is_double_density(double_density);
        let clock_rate = if double_density { 500_000 } else { 250_000 };
        self.drive.set_expected_bit_length(Time::new(1, clock_rate));
    }

    //
    // Register interface.
    //

    pub fn set_register(&mut self, address: u32, value: u8, delegate: Option<&mut dyn Delegate>) {
        match address & 3 {
            0 => self.begin_command(value, delegate),
            1 => self.track = value,
            2 => self.sector = value,
            _ => {
                self.data = value;
                self.set_data_request(false, None);
            }
        }
    }

    #[must_use]
    pub fn get_register(&mut self, address: u32) -> u8 {
        match address & 3 {
            0 => {
                self.set_interrupt_request(false, None);
                let mut value = self.status;
                // Type-1 status multiplexes the drive's physical state.
                if self.command & 0x80 == 0 || self.command & 0xF0 == 0xD0 {
                    value &= !status::TRACK_ZERO;
                    if self.drive.is_track_zero() {
                        value |= status::TRACK_ZERO;
                    }
                }
                value
            }
            1 => self.track,
            2 => self.sector,
            _ => {
                self.status &= !status::DATA_REQUEST;
                self.data
            }
        }
    }

    fn set_interrupt_request(&mut self, asserted: bool, delegate: Option<&mut dyn Delegate>) {
        if self.irq != asserted {
            self.irq = asserted;
            if let Some(delegate) = delegate {
                delegate.wd1770_did_set_interrupt_request(asserted);
            }
        }
    }

    fn set_data_request(&mut self, asserted: bool, delegate: Option<&mut dyn Delegate>) {
        let was = self.status & status::DATA_REQUEST != 0;
        if asserted {
            self.status |= status::DATA_REQUEST;
        } else {
            self.status &= !status::DATA_REQUEST;
        }
        if was != asserted {
            if let Some(delegate) = delegate {
                delegate.wd1770_did_set_data_request(asserted);
            }
        }
    }

    //
    // Command acceptance.
    //

    fn begin_command(&mut self, command: u8, mut delegate: Option<&mut dyn Delegate>) {
        // Force interrupt is honoured at any time; anything else is
        // ignored while busy.
        if command & 0xF0 == 0xD0 {
            self.force_interrupt(command, delegate);
            return;
        }
        if self.status & status::BUSY != 0 {
            return;
        }

        debug!("command {command:02x} accepted");
        self.command = command;
        self.status |= status::BUSY;
        self.set_interrupt_request(false, reborrow_delegate(&mut delegate));
        self.idle_index_count = 0;

        let resume = if command & 0x80 == 0 {
            self.status &= !(status::CRC_ERROR | status::SEEK_ERROR);
            self.set_data_request(false, reborrow_delegate(&mut delegate));
            Resume::Type1
        } else if command & 0x40 == 0 {
            self.status &= !(status::LOST_DATA
                | status::RECORD_NOT_FOUND
                | status::RECORD_TYPE
                | status::WRITE_PROTECT
                | status::CRC_ERROR);
            self.set_data_request(false, reborrow_delegate(&mut delegate));
            Resume::Type2
        } else {
            self.status &= !(status::LOST_DATA | status::RECORD_NOT_FOUND | status::CRC_ERROR);
            self.set_data_request(false, reborrow_delegate(&mut delegate));
            Resume::Type3
        };

        // Spin up: six index holes unless the h flag or an already-running
        // motor says otherwise. The 1793 has no motor line to wait on.
        let spun = self.status & status::MOTOR_ON != 0;
        self.status |= status::MOTOR_ON;
        self.drive.set_motor_on(true, None);
        if let Some(delegate) = reborrow_delegate(&mut delegate) {
            delegate.wd1770_did_set_head_load_request(true);
        }

        if self.personality.has_motor_on_line() && command & 0x08 == 0 && !spun {
            self.state = State::SpinUp {
                remaining: 6,
                resume,
            };
            self.index_count = 0;
        } else {
            self.resume_after_spin_up(resume);
        }
    }

    fn force_interrupt(&mut self, command: u8, delegate: Option<&mut dyn Delegate>) {
        self.state = State::Idle;
        self.status &= !status::BUSY;
        self.command = command;
        self.interrupt_on_index = command & 0x04 != 0;
        if command & 0x08 != 0 {
            // Immediate interrupt.
            self.set_interrupt_request(true, delegate);
        }
    }

    fn resume_after_spin_up(&mut self, resume: Resume) {
        if self.personality.has_motor_on_line() && Resume::Type1 == resume {
            self.status |= status::SPIN_UP;
        }
        match resume {
            Resume::Type1 => self.type1_begin(),
            Resume::Type2 | Resume::Type3 => {
                // The E flag requests a head-settle delay first.
                if self.command & 0x04 != 0 {
                    self.state = State::SettleDelay;
                    self.delay_cycles = self.personality.settle_ms() * CYCLES_PER_MS;
                } else {
                    self.type2_or_3_post_settle();
                }
            }
        }
    }

    //
    // Type 1.
    //

    fn type1_begin(&mut self) {
        match self.command >> 5 {
            1 => {} // Step: keep the previous direction.
            2 => self.step_in = true,
            3 => self.step_in = false,
            _ => {
                // Restore or seek.
                if self.command & 0x10 == 0 {
                    self.track = 0xFF;
                    self.data = 0x00;
                }
                self.type1_seek_iteration();
                return;
            }
        }
        // Plain step commands.
        if self.command & 0x10 != 0 {
            // The u flag updates the track register.
            self.track = if self.step_in {
                self.track.wrapping_add(1)
            } else {
                self.track.wrapping_sub(1)
            };
        }
        self.type1_perform_step();
    }

    fn type1_seek_iteration(&mut self) {
        if self.track == self.data {
            self.type1_verify();
            return;
        }
        self.step_in = self.data > self.track;
        self.track = if self.step_in {
            self.track.wrapping_add(1)
        } else {
            self.track.wrapping_sub(1)
        };
        self.type1_perform_step();
    }

    fn type1_perform_step(&mut self) {
        if !self.step_in && self.drive.is_track_zero() {
            self.track = 0;
            self.type1_verify();
            return;
        }
        self.drive.step(if self.step_in { 1 } else { -1 }, None);
        self.state = State::StepDelay;
        self.delay_cycles =
            self.personality.step_rate_ms(self.command) * CYCLES_PER_MS;
    }

    fn type1_step_delay_elapsed(&mut self) {
        if self.command >> 5 != 0 {
            self.type1_verify();
        } else {
            self.type1_seek_iteration();
        }
    }

    fn type1_verify(&mut self) {
        if self.command & 0x04 == 0 {
            self.complete_command();
            return;
        }
        self.index_count = 0;
        self.state = State::SearchId { verify_only: true };
    }

    //
    // Type 2 and 3 entry.
    //

    fn type2_or_3_post_settle(&mut self) {
        if self.command & 0xC0 == 0x80 {
            // Type 2: write protection gates writes up front.
            if self.command & 0x20 != 0 && self.drive.is_write_protected() {
                self.status |= status::WRITE_PROTECT;
                self.complete_command();
                return;
            }
            self.index_count = 0;
            self.state = State::SearchId { verify_only: false };
        } else {
            match self.command & 0xF0 {
                0xC0 => {
                    self.index_count = 0;
                    self.state = State::ReadAddress { count: 0 };
                }
                0xE0 => self.state = State::ReadTrack { started: false },
                0xF0 => {
                    if self.drive.is_write_protected() {
                        self.status |= status::WRITE_PROTECT;
                        self.complete_command();
                    } else {
                        self.buffer.clear();
                        self.state = State::WriteTrack { started: false };
                    }
                }
                _ => self.complete_command(),
            }
        }
    }

    fn complete_command(&mut self) {
        self.status &= !status::BUSY;
        self.state = State::Idle;
        self.idle_index_count = 0;
        self.set_interrupt_request(true, None);
    }

    //
    // Event pump.
    //

    /// Advances time; the drive spins, the tokeniser shifts, the state
    /// machine reacts.
    pub fn run_for(&mut self, cycles: Cycles) {
        if self.status & status::MOTOR_ON != 0 {
            let mut signals = core::mem::take(&mut self.signals);
            signals.clear();
            self.drive.run_for(cycles, &mut signals);
            for signal in &signals {
                match signal {
                    DriveSignal::Bit(bit) => {
                        if let Some(token) = self.tokeniser.add_bit(*bit) {
                            self.posit_token(token);
                        }
                    }
                    DriveSignal::Index => self.posit_index(),
                }
            }
            self.signals = signals;
        }

        // Timers may chain, e.g. one step delay scheduling the next, so
        // keep consuming the budget until no timer is pending.
        let mut remaining = cycles.get() as u64;
        while self.delay_cycles > 0 && remaining > 0 {
            let step = self.delay_cycles.min(remaining);
            self.delay_cycles -= step;
            remaining -= step;
            if self.delay_cycles == 0 {
                self.posit_timer();
            }
        }
    }

    fn posit_timer(&mut self) {
        match self.state {
            State::StepDelay => self.type1_step_delay_elapsed(),
            State::SettleDelay => self.type2_or_3_post_settle(),
            _ => {}
        }
    }

    fn posit_index(&mut self) {
        self.index_count = self.index_count.wrapping_add(1);

        if self.interrupt_on_index {
            self.set_interrupt_request(true, None);
        }

        match self.state {
            State::Idle => {
                // Spin down after nine idle revolutions.
                self.idle_index_count = self.idle_index_count.saturating_add(1);
                if self.idle_index_count >= 9 && self.personality.has_motor_on_line() {
                    self.status &= !(status::MOTOR_ON | status::SPIN_UP);
                    self.drive.set_motor_on(false, None);
                }
            }
            State::SpinUp { remaining, resume } => {
                if remaining <= 1 {
                    self.resume_after_spin_up(resume);
                } else {
                    self.state = State::SpinUp {
                        remaining: remaining - 1,
                        resume,
                    };
                }
            }
            State::SearchId { verify_only } | State::ReadHeader { verify_only, .. } => {
                if self.index_count >= 5 {
                    self.status |= if verify_only {
                        status::SEEK_ERROR
                    } else {
                        status::RECORD_NOT_FOUND
                    };
                    self.complete_command();
                }
            }
            State::ReadAddress { .. } => {
                if self.index_count >= 6 {
                    self.status |= status::RECORD_NOT_FOUND;
                    self.complete_command();
                }
            }
            State::ReadTrack { started } => {
                if started {
                    self.complete_command();
                } else {
                    self.state = State::ReadTrack { started: true };
                }
            }
            State::WriteTrack { started } => {
                if started {
                    self.complete_command();
                } else {
                    self.state = State::WriteTrack { started: true };
                }
            }
            _ => {}
        }
    }

    fn posit_token(&mut self, token: Token) {
        match self.state {
            State::SearchId { verify_only } => {
                if token == Token::Id {
                    self.state = State::ReadHeader {
                        count: 0,
                        verify_only,
                    };
                }
            }
            State::ReadHeader { count, verify_only } => {
                let Token::Byte(byte) = token else {
                    // A stray mark restarts the search.
                    self.state = State::SearchId { verify_only };
                    return;
                };
                self.header[count as usize] = byte;
                if count < 5 {
                    self.state = State::ReadHeader {
                        count: count + 1,
                        verify_only,
                    };
                    return;
                }
                self.header_complete(verify_only);
            }
            State::SearchData { bytes } => match token {
                Token::Data | Token::DeletedData => {
                    if token == Token::DeletedData {
                        self.status |= status::RECORD_TYPE;
                    }
                    self.buffer.clear();
                    self.state = State::ReadData { count: 0 };
                }
                _ => {
                    // The data mark must arrive within 30 bytes of the ID.
                    if bytes >= 30 {
                        self.state = State::SearchId { verify_only: false };
                    } else {
                        self.state = State::SearchData { bytes: bytes + 1 };
                    }
                }
            },
            State::ReadData { count } => {
                let Token::Byte(byte) = token else { return };
                if self.status & status::DATA_REQUEST != 0 {
                    self.status |= status::LOST_DATA;
                }
                self.data = byte;
                self.set_data_request(true, None);
                self.buffer.push(byte);

                let length = self.sector_length();
                if count + 1 == length {
                    self.state = State::ReadCrc { count: 0 };
                } else {
                    self.state = State::ReadData { count: count + 1 };
                }
            }
            State::ReadCrc { count } => {
                let Token::Byte(byte) = token else { return };
                self.header[count as usize] = byte;
                if count == 0 {
                    self.state = State::ReadCrc { count: 1 };
                    return;
                }
                let mark = if self.status & status::RECORD_TYPE != 0 {
                    0xF8
                } else {
                    0xFB
                };
                let mut check = vec![mark];
                check.extend_from_slice(&self.buffer);
                let computed = crc16(&check);
                let read = (u16::from(self.header[0]) << 8) | u16::from(self.header[1]);
                if computed != read {
                    self.status |= status::CRC_ERROR;
                    self.complete_command();
                    return;
                }

                if self.command & 0x10 != 0 {
                    // Multi-sector: bump the sector register and continue.
                    self.sector = self.sector.wrapping_add(1);
                    self.index_count = 0;
                    self.state = State::SearchId { verify_only: false };
                } else {
                    self.complete_command();
                }
            }
            State::WriteWait { bytes } => {
                if !matches!(token, Token::Byte(_)) {
                    return;
                }
                let bytes = bytes + 1;
                if bytes == 2 {
                    self.set_data_request(true, None);
                }
                if bytes >= 11 {
                    if self.status & status::DATA_REQUEST != 0 {
                        self.status |= status::LOST_DATA;
                        self.complete_command();
                        return;
                    }
                    self.buffer.clear();
                    self.buffer.push(self.data);
                    self.set_data_request(true, None);
                    self.state = State::WriteData { count: 1 };
                    return;
                }
                self.state = State::WriteWait { bytes };
            }
            State::WriteData { count } => {
                if !matches!(token, Token::Byte(_)) {
                    return;
                }
                let length = self.sector_length();
                if count == length {
                    // All bytes gathered: lay the sector down.
                    let cylinder = self.drive.head_position() as u8;
                    let head = 0;
                    let sector = self.sector;
                    let buffer = core::mem::take(&mut self.buffer);
                    if let Some(disk) = self.drive.disk_mut() {
                        disk.commit_sector(cylinder, head, sector, &buffer);
                    }
                    self.buffer = buffer;
                    self.complete_command();
                    return;
                }

                if self.status & status::DATA_REQUEST != 0 {
                    // Host starved the register: a zero goes to disk.
                    self.status |= status::LOST_DATA;
                    self.buffer.push(0);
                } else {
                    self.buffer.push(self.data);
                }
                self.set_data_request(true, None);
                self.state = State::WriteData { count: count + 1 };
            }
            State::ReadAddress { count } => match token {
                Token::Id if count == 0 => {
                    self.state = State::ReadAddress { count: 1 };
                }
                Token::Byte(byte) if count > 0 => {
                    self.header[(count - 1) as usize] = byte;
                    if self.status & status::DATA_REQUEST != 0 {
                        self.status |= status::LOST_DATA;
                    }
                    self.data = byte;
                    self.set_data_request(true, None);
                    if count == 6 {
                        // The track address replaces the sector register.
                        self.sector = self.header[0];
                        let computed = crc16(&[
                            0xFE,
                            self.header[0],
                            self.header[1],
                            self.header[2],
                            self.header[3],
                        ]);
                        let read =
                            (u16::from(self.header[4]) << 8) | u16::from(self.header[5]);
                        if computed != read {
                            self.status |= status::CRC_ERROR;
                        }
                        self.complete_command();
                    } else {
                        self.state = State::ReadAddress { count: count + 1 };
                    }
                }
                _ => {}
            },
            State::ReadTrack { started: true } => {
                if let Token::Byte(byte) = token {
                    if self.status & status::DATA_REQUEST != 0 {
                        self.status |= status::LOST_DATA;
                    }
                    self.data = byte;
                    self.set_data_request(true, None);
                }
            }
            State::WriteTrack { started: true } => {
                if matches!(token, Token::Byte(_)) {
                    // Raw formatting data is accepted and discarded; the
                    // sector-image disks this controller fronts cannot be
                    // reformatted in place.
                    if self.status & status::DATA_REQUEST != 0 {
                        self.status |= status::LOST_DATA;
                    }
                    self.set_data_request(true, None);
                }
            }
            _ => {}
        }
    }

    fn header_complete(&mut self, verify_only: bool) {
        let id_crc = crc16(&[
            0xFE,
            self.header[0],
            self.header[1],
            self.header[2],
            self.header[3],
        ]);
        let read_crc = (u16::from(self.header[4]) << 8) | u16::from(self.header[5]);

        if verify_only {
            if self.header[0] == self.track {
                if id_crc == read_crc {
                    self.status &= !status::SEEK_ERROR;
                    self.complete_command();
                } else {
                    self.status |= status::CRC_ERROR;
                    self.state = State::SearchId { verify_only };
                }
            } else {
                self.state = State::SearchId { verify_only };
            }
            return;
        }

        // Type 2: the track and sector registers must both match.
        if self.header[0] != self.track || self.header[2] != self.sector {
            self.state = State::SearchId { verify_only };
            return;
        }
        if id_crc != read_crc {
            self.status |= status::CRC_ERROR;
            self.state = State::SearchId { verify_only };
            return;
        }
        self.status &= !status::CRC_ERROR;

        if self.command & 0x20 != 0 {
            self.state = State::WriteWait { bytes: 0 };
        } else {
            self.state = State::SearchData { bytes: 0 };
        }
    }

    fn sector_length(&self) -> u16 {
        128 << (self.header[3] & 3)
    }
}

impl ClockingSource for Wd1770 {
    /// With the motor off nothing observable can happen until the next
    /// register write; with it on, the bit stream demands real-time
    /// clocking.
    fn preferred_clocking(&self) -> ClockingPreference {
        if self.status & status::MOTOR_ON != 0 {
            ClockingPreference::RealTime
        } else {
            ClockingPreference::None
        }
    }
}
