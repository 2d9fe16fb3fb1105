//! Floppy drive mechanism.
//!
//! A [`Disk`] supplies lazy, restartable [`Track`] event streams: flux
//! transitions and an index hole, each with a rational length, summing to
//! one revolution. The [`Drive`] spins a selected track against an input
//! clock, resolves flux intervals into bit windows, and reports head
//! position, write protection and readiness to its controller.

pub mod fm;
mod pcm;

use emu_core::{Cycles, DriveEvent, LedPresentation, Observer, Time};
use log::debug;
pub use pcm::PcmTrack;

/// One element of a track's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEventType {
    FluxTransition,
    IndexHole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEvent {
    pub event_type: TrackEventType,
    /// Time from the previous event to this one.
    pub length: Time,
}

/// A lazy, restartable, finite sequence of flux events.
///
/// One full pass, index hole to index hole, must sum to exactly one
/// revolution.
pub trait Track {
    /// Restarts the stream from the index hole.
    fn reset(&mut self);

    /// The next event; wraps at the end of the revolution.
    fn next_event(&mut self) -> TrackEvent;
}

/// A disk inserted into a drive.
pub trait Disk {
    /// A fresh event stream for the given cylinder and head, or `None`
    /// where no track exists.
    fn track(&self, cylinder: u8, head: u8) -> Option<Box<dyn Track>>;

    fn write_protected(&self) -> bool {
        false
    }

    /// Receives a sector rewritten by the controller's write path.
    fn commit_sector(&mut self, cylinder: u8, head: u8, sector: u8, data: &[u8]) {
        let _ = (cylinder, head, sector, data);
    }

    /// Convenience sector access for hosts and tests; `None` where the
    /// disk has no sector-level view.
    fn read_sector(&self, cylinder: u8, head: u8, sector: u8) -> Option<Vec<u8>> {
        let _ = (cylinder, head, sector);
        None
    }
}

/// How the drive derives its ready output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyType {
    /// Ready whenever a disk is present and the motor is on.
    ShugartRdy,
    /// As Shugart, but an index hole must have passed since insertion.
    ShugartModifiedRdy,
    /// Ready follows the motor line.
    IbmRdy,
}

/// What the drive delivers to its controller as the disk turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSignal {
    /// One bit window elapsed; true for a flux transition in the window.
    Bit(bool),
    Index,
}

/// Nominal rotation: 300 RPM, i.e. one revolution per 200 ms.
pub const REVOLUTION_MS: u32 = 200;

pub struct Drive {
    name: String,
    input_clock_rate: u64,
    bit_length: Time,

    motor_on: bool,
    head_loaded: bool,
    head_position: i16,
    side: u8,
    max_position: i16,

    disk: Option<Box<dyn Disk>>,
    track: Option<Box<dyn Track>>,
    ready_type: ReadyType,
    index_seen_since_insert: bool,

    /// Ticks until the pending event fires.
    ticks_to_event: u64,
    pending: Option<TrackEventType>,
    /// Ticks in the current flux interval so far, for window resolution.
    interval_ticks: u64,
}

impl Drive {
    #[must_use]
    pub fn new(name: &str, input_clock_rate: u64, ready_type: ReadyType) -> Self {
        Self {
            name: name.to_string(),
            input_clock_rate,
            bit_length: Time::new(1, 250_000),
            motor_on: false,
            head_loaded: false,
            head_position: 0,
            side: 0,
            max_position: 83,
            disk: None,
            track: None,
            ready_type,
            index_seen_since_insert: false,
            ticks_to_event: 0,
            pending: None,
            interval_ticks: 0,
        }
    }

    pub fn register(&self, observer: &mut dyn Observer) {
        observer.register_drive(&self.name);
        // The access LED shares the drive's name, which ties the two
        // together on the receiving side.
        observer.register_led(&self.name, LedPresentation::default());
    }

    /// Sets the controller's expected bit window, e.g. 1/250000 s for FM at
    /// double density clocking.
    pub fn set_expected_bit_length(&mut self, bit_length: Time) {
        self.bit_length = bit_length;
    }

    pub fn insert_disk(&mut self, disk: Box<dyn Disk>) {
        self.disk = Some(disk);
        self.track = None;
        self.index_seen_since_insert = false;
        debug!("disk inserted into {}", self.name);
    }

    pub fn eject_disk(&mut self) -> Option<Box<dyn Disk>> {
        self.track = None;
        self.disk.take()
    }

    #[must_use]
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    #[must_use]
    pub fn disk_mut(&mut self) -> Option<&mut dyn Disk> {
        match &mut self.disk {
            Some(disk) => Some(disk.as_mut()),
            None => None,
        }
    }

    pub fn set_motor_on(&mut self, on: bool, observer: Option<&mut dyn Observer>) {
        if on == self.motor_on {
            return;
        }
        self.motor_on = on;
        if let Some(observer) = observer {
            observer.set_drive_motor_status(&self.name, on);
            observer.set_led_status(&self.name, on);
        }
    }

    #[must_use]
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    pub fn set_head_loaded(&mut self, loaded: bool) {
        self.head_loaded = loaded;
    }

    pub fn set_side(&mut self, side: u8) {
        if side != self.side {
            self.side = side;
            self.track = None;
        }
    }

    /// Steps the head by `direction` cylinders (positive is inward),
    /// clamping at the physical stops and announcing the result.
    pub fn step(&mut self, direction: i16, observer: Option<&mut dyn Observer>) {
        let target = self.head_position + direction;
        let (clamped, event) = if target < 0 {
            (0, DriveEvent::StepBelowZero)
        } else if target > self.max_position {
            (self.max_position, DriveEvent::StepBeyondMaximum)
        } else {
            (target, DriveEvent::StepNormal)
        };
        self.head_position = clamped;
        self.track = None;
        if let Some(observer) = observer {
            observer.announce_drive_event(&self.name, event);
        }
    }

    #[must_use]
    pub fn head_position(&self) -> i16 {
        self.head_position
    }

    #[must_use]
    pub fn is_track_zero(&self) -> bool {
        self.head_position == 0
    }

    #[must_use]
    pub fn is_write_protected(&self) -> bool {
        self.disk.as_ref().is_some_and(|disk| disk.write_protected())
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self.ready_type {
            ReadyType::ShugartRdy => self.disk.is_some() && self.motor_on,
            ReadyType::ShugartModifiedRdy => {
                self.disk.is_some() && self.motor_on && self.index_seen_since_insert
            }
            ReadyType::IbmRdy => self.motor_on,
        }
    }

    fn ensure_track(&mut self) -> bool {
        if self.track.is_none() {
            if let Some(disk) = &self.disk {
                self.track = disk.track(self.head_position as u8, self.side);
                self.pending = None;
                self.interval_ticks = 0;
            }
        }
        self.track.is_some()
    }

    fn advance_event(&mut self) {
        let Some(track) = &mut self.track else { return };
        let event = track.next_event();
        self.ticks_to_event = event.length.as_ticks(self.input_clock_rate).max(1);
        self.pending = Some(event.event_type);
    }

    /// Spins the disk for `cycles` of the input clock, appending resolved
    /// bit windows and index holes to `signals`.
    pub fn run_for(&mut self, cycles: Cycles, signals: &mut Vec<DriveSignal>) {
        if !self.motor_on || !self.ensure_track() {
            return;
        }

        let mut budget = cycles.get() as u64;
        let window = self.bit_length.as_ticks(self.input_clock_rate).max(1);

        while budget > 0 {
            if self.pending.is_none() {
                self.advance_event();
            }

            let step = budget.min(self.ticks_to_event);
            budget -= step;
            self.ticks_to_event -= step;
            self.interval_ticks += step;

            if self.ticks_to_event == 0 {
                match self.pending.take() {
                    Some(TrackEventType::FluxTransition) => {
                        // Resolve the interval into whole bit windows: the
                        // transition lands in the final one.
                        let windows = (self.interval_ticks + window / 2) / window;
                        for _ in 1..windows.max(1) {
                            signals.push(DriveSignal::Bit(false));
                        }
                        signals.push(DriveSignal::Bit(true));
                        self.interval_ticks = 0;
                    }
                    Some(TrackEventType::IndexHole) => {
                        self.index_seen_since_insert = true;
                        signals.push(DriveSignal::Index);
                    }
                    None => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::LedPresentation;

    struct OneSectorDisk;

    impl Disk for OneSectorDisk {
        fn track(&self, cylinder: u8, _head: u8) -> Option<Box<dyn Track>> {
            if cylinder == 0 {
                // Alternating cells: 16 one-bits over a tiny revolution.
                Some(Box::new(PcmTrack::from_bits(
                    vec![true; 16],
                    Time::new(1, 250_000),
                )))
            } else {
                None
            }
        }
        fn write_protected(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct EventLog(Vec<(String, DriveEvent)>);

    impl Observer for EventLog {
        fn register_led(&mut self, _name: &str, _presentation: LedPresentation) {}
        fn announce_drive_event(&mut self, name: &str, event: DriveEvent) {
            self.0.push((name.to_string(), event));
        }
    }

    fn drive_with_disk() -> Drive {
        let mut drive = Drive::new("0", 8_000_000, ReadyType::ShugartRdy);
        drive.insert_disk(Box::new(OneSectorDisk));
        drive
    }

    #[test]
    fn revolution_delivers_all_bits_and_one_index() {
        let mut drive = drive_with_disk();
        drive.set_motor_on(true, None);

        let mut signals = Vec::new();
        // 16 cells at 32 ticks each = 512 ticks per revolution.
        drive.run_for(Cycles::new(512), &mut signals);

        let ones = signals
            .iter()
            .filter(|signal| matches!(signal, DriveSignal::Bit(true)))
            .count();
        let indexes = signals
            .iter()
            .filter(|signal| matches!(signal, DriveSignal::Index))
            .count();
        assert_eq!(ones, 16);
        assert_eq!(indexes, 1);
    }

    #[test]
    fn split_batches_deliver_identical_streams() {
        let mut whole = drive_with_disk();
        whole.set_motor_on(true, None);
        let mut batched = drive_with_disk();
        batched.set_motor_on(true, None);

        let mut expected = Vec::new();
        whole.run_for(Cycles::new(1024), &mut expected);

        let mut actual = Vec::new();
        for _ in 0..64 {
            batched.run_for(Cycles::new(16), &mut actual);
        }
        assert_eq!(expected, actual);
    }

    #[test]
    fn stationary_when_motor_off() {
        let mut drive = drive_with_disk();
        let mut signals = Vec::new();
        drive.run_for(Cycles::new(1000), &mut signals);
        assert!(signals.is_empty());
    }

    #[test]
    fn stepping_clamps_and_announces() {
        let mut drive = drive_with_disk();
        let mut log = EventLog::default();

        drive.step(-1, Some(&mut log));
        assert!(drive.is_track_zero());
        drive.step(1, Some(&mut log));
        assert_eq!(drive.head_position(), 1);

        assert_eq!(log.0[0].1, DriveEvent::StepBelowZero);
        assert_eq!(log.0[1].1, DriveEvent::StepNormal);
    }

    #[test]
    fn ready_types_differ_on_index_requirement() {
        let mut plain = Drive::new("0", 8_000_000, ReadyType::ShugartRdy);
        plain.insert_disk(Box::new(OneSectorDisk));
        plain.set_motor_on(true, None);
        assert!(plain.is_ready());

        let mut modified = Drive::new("0", 8_000_000, ReadyType::ShugartModifiedRdy);
        modified.insert_disk(Box::new(OneSectorDisk));
        modified.set_motor_on(true, None);
        assert!(!modified.is_ready());

        let mut signals = Vec::new();
        modified.run_for(Cycles::new(600), &mut signals);
        assert!(modified.is_ready());
    }

    #[test]
    fn write_protect_reports_from_disk() {
        let drive = drive_with_disk();
        assert!(drive.is_write_protected());
    }
}
