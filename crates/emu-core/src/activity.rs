//! Activity feedback: LEDs and drive events.

/// Presentation hints for a registered LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedPresentation(pub u8);

impl LedPresentation {
    /// The LED reflects persistent state, e.g. caps lock, rather than an
    /// ephemeral event such as media access.
    pub const PERSISTENT: Self = Self(1);

    #[must_use]
    pub const fn is_persistent(self) -> bool {
        self.0 & Self::PERSISTENT.0 != 0
    }
}

/// Events a drive can announce beyond motor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveEvent {
    StepNormal,
    StepBelowZero,
    StepBeyondMaximum,
}

/// Receiver of any user-perceivable feedback other than audio and video:
/// status LEDs, drive steps, motor state.
///
/// All methods default to no-ops so hosts implement only what they present.
/// A callback MUST NOT call back into the component that fired it during
/// the same call.
pub trait Observer {
    /// Announces an LED named `name`. If a drive is later registered with
    /// the same name, the LED belongs to that drive.
    fn register_led(&mut self, name: &str, presentation: LedPresentation) {
        let _ = (name, presentation);
    }

    /// Announces a drive named `name`.
    fn register_drive(&mut self, name: &str) {
        let _ = name;
    }

    fn set_led_status(&mut self, name: &str, lit: bool) {
        let _ = (name, lit);
    }

    fn set_drive_motor_status(&mut self, name: &str, on: bool) {
        let _ = (name, on);
    }

    fn announce_drive_event(&mut self, name: &str, event: DriveEvent) {
        let _ = (name, event);
    }
}
