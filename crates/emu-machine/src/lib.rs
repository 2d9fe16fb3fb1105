//! Machine construction and the facet surfaces hosts talk to.
//!
//! A [`media_analyser::Target`] plus a ROM fetcher turns into a
//! [`DynamicMachine`]; the host then asks for the facets it needs —
//! timed execution, scan output, audio, inputs, configuration, activity —
//! each of which is optional per machine.

mod archimedes;
mod inputs;
mod rom;

pub use archimedes::{Archimedes, ArchimedesOptions};
pub use inputs::{Joystick, Key, KeyboardMapper, Mouse, MouseAccumulator};
pub use rom::{RomFetcher, RomRequest};

use emu_core::{HalfCycles, Observer, ScanTarget, SpeakerDelegate};
use emu_reflect::Reflectable;
use media_analyser::{Machine, Target};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    /// One or more required ROMs could not be fetched; the host should
    /// re-query the user.
    #[error("missing ROMs: {0:?}")]
    MissingRoms(Vec<String>),
    /// The target is self-inconsistent, e.g. carries no media.
    #[error("invalid target")]
    InvalidTarget,
    /// The nominated machine has no implementation here.
    #[error("unsupported machine")]
    UnsupportedMachine,
}

/// The `run_for` surface.
pub trait TimedMachine {
    fn run_for(&mut self, duration: HalfCycles);
}

/// Video output hookup.
pub trait ScanProducer {
    /// Emits any frames produced since the last call into `target`.
    fn update_scan_target(&mut self, target: &mut dyn ScanTarget);
}

/// Audio output hookup.
pub trait AudioProducer {
    fn set_speaker_delegate(&mut self, delegate: Box<dyn SpeakerDelegate>);
}

/// Named-option configuration through the reflection layer.
pub trait ConfigurableDevice {
    fn options(&self) -> &dyn Reflectable;
    fn options_mut(&mut self) -> &mut dyn Reflectable;
}

/// Keyboard input: the host maps physical keys to the abstract set, the
/// machine's mapper translates those into platform scancodes.
pub trait KeyboardMachine {
    fn keyboard_mapper(&self) -> &dyn KeyboardMapper;
    fn set_key_state(&mut self, scancode: u16, pressed: bool);
}

/// One constructed machine, of whichever concrete type.
///
/// Facets return `None` where the machine has no such surface; hosts are
/// expected to cope.
pub enum DynamicMachine {
    Archimedes(Archimedes),
}

impl std::fmt::Debug for DynamicMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DynamicMachine::Archimedes(_) => f.write_str("DynamicMachine::Archimedes(..)"),
        }
    }
}

impl DynamicMachine {
    #[must_use]
    pub fn timed_machine(&mut self) -> Option<&mut dyn TimedMachine> {
        match self {
            DynamicMachine::Archimedes(machine) => Some(machine),
        }
    }

    #[must_use]
    pub fn scan_producer(&mut self) -> Option<&mut dyn ScanProducer> {
        match self {
            DynamicMachine::Archimedes(_) => None,
        }
    }

    #[must_use]
    pub fn audio_producer(&mut self) -> Option<&mut dyn AudioProducer> {
        match self {
            DynamicMachine::Archimedes(_) => None,
        }
    }

    #[must_use]
    pub fn configurable_device(&mut self) -> Option<&mut dyn ConfigurableDevice> {
        match self {
            DynamicMachine::Archimedes(machine) => Some(machine),
        }
    }

    #[must_use]
    pub fn keyboard_machine(&mut self) -> Option<&mut dyn KeyboardMachine> {
        match self {
            DynamicMachine::Archimedes(machine) => Some(machine),
        }
    }

    #[must_use]
    pub fn mouse(&mut self) -> Option<&mut dyn Mouse> {
        match self {
            DynamicMachine::Archimedes(machine) => Some(machine.mouse()),
        }
    }

    #[must_use]
    pub fn joystick(&mut self) -> Option<&mut dyn Joystick> {
        match self {
            DynamicMachine::Archimedes(_) => None,
        }
    }

    /// Registers an activity observer for LEDs and drive events.
    pub fn set_activity_observer(&mut self, observer: &mut dyn Observer) {
        match self {
            DynamicMachine::Archimedes(machine) => machine.register_activity(observer),
        }
    }
}

/// Builds the machine a target nominates.
pub fn machine_for_target(
    target: &Target,
    rom_fetcher: &dyn RomFetcher,
) -> Result<DynamicMachine, MachineError> {
    if target.media.is_empty() {
        return Err(MachineError::InvalidTarget);
    }

    match target.machine {
        Machine::Archimedes => {
            let machine = Archimedes::new(target, rom_fetcher)?;
            Ok(DynamicMachine::Archimedes(machine))
        }
        _ => Err(MachineError::UnsupportedMachine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_analyser::{MachineOptions, Media};

    fn archimedes_target() -> Target {
        Target {
            machine: Machine::Archimedes,
            media: Media {
                disks: vec![vec![0; 1024]],
                ..Media::default()
            },
            loading_command: String::new(),
            confidence: 0.5,
            options: MachineOptions::None,
        }
    }

    struct NoRoms;
    impl RomFetcher for NoRoms {
        fn fetch(&self, _request: &RomRequest) -> Option<Vec<u8>> {
            None
        }
    }

    struct ZeroRoms;
    impl RomFetcher for ZeroRoms {
        fn fetch(&self, request: &RomRequest) -> Option<Vec<u8>> {
            Some(vec![0; request.expected_size])
        }
    }

    #[test]
    fn construction_without_roms_reports_what_is_missing() {
        let result = machine_for_target(&archimedes_target(), &NoRoms);
        let Err(MachineError::MissingRoms(names)) = result else {
            panic!("expected missing ROMs");
        };
        assert!(!names.is_empty());
    }

    #[test]
    fn empty_media_is_an_invalid_target() {
        let mut target = archimedes_target();
        target.media = Media::default();
        assert_eq!(
            machine_for_target(&target, &ZeroRoms).unwrap_err(),
            MachineError::InvalidTarget
        );
    }

    #[test]
    fn unsupported_machines_are_reported_as_such() {
        let mut target = archimedes_target();
        target.machine = Machine::ColecoVision;
        target.media.cartridges = vec![vec![0; 8192]];
        assert_eq!(
            machine_for_target(&target, &ZeroRoms).unwrap_err(),
            MachineError::UnsupportedMachine
        );
    }

    #[test]
    fn constructed_machine_exposes_expected_facets() {
        let Ok(mut machine) = machine_for_target(&archimedes_target(), &ZeroRoms) else {
            panic!("construction should succeed with ROMs supplied");
        };
        assert!(machine.timed_machine().is_some());
        assert!(machine.configurable_device().is_some());
        assert!(machine.keyboard_machine().is_some());
        assert!(machine.mouse().is_some());
        assert!(machine.audio_producer().is_none());
    }

    #[test]
    fn options_are_settable_by_name() {
        let Ok(mut machine) = machine_for_target(&archimedes_target(), &ZeroRoms) else {
            panic!();
        };
        let Some(configurable) = machine.configurable_device() else {
            panic!();
        };
        assert!(emu_reflect::fuzzy_set(
            configurable.options_mut(),
            "output",
            "television"
        ));
        assert_eq!(
            configurable.options().get("output"),
            Some(emu_reflect::Value::Enum("Television"))
        );
    }
}
