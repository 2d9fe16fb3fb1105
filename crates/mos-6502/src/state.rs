//! Reflectable state snapshots.

use emu_reflect::{declare_fields, reflectable_enum};

use crate::registers::Phase;
use crate::Mos6502;

reflectable_enum! {
    pub enum ExecutionPhase { Instruction, Ready, Jammed, Waiting, Stopped }
}

impl From<Phase> for ExecutionPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Instruction => ExecutionPhase::Instruction,
            Phase::Ready => ExecutionPhase::Ready,
            Phase::Jammed => ExecutionPhase::Jammed,
            Phase::Waiting => ExecutionPhase::Waiting,
            Phase::Stopped => ExecutionPhase::Stopped,
        }
    }
}

impl From<ExecutionPhase> for Phase {
    fn from(phase: ExecutionPhase) -> Self {
        match phase {
            ExecutionPhase::Instruction => Phase::Instruction,
            ExecutionPhase::Ready => Phase::Ready,
            ExecutionPhase::Jammed => Phase::Jammed,
            ExecutionPhase::Waiting => Phase::Waiting,
            ExecutionPhase::Stopped => Phase::Stopped,
        }
    }
}

/// A register-file snapshot, captured at an instruction boundary, with
/// every field visible to the reflection layer for serialisation.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
    pub pc: u16,
    pub phase: ExecutionPhase,
}

declare_fields!(State {
    a,
    x,
    y,
    s,
    p,
    pc,
    phase,
});

impl Mos6502 {
    /// Captures the architectural state. Intended for instruction
    /// boundaries; mid-instruction micro-op progress is not recorded.
    #[must_use]
    pub fn state(&self) -> State {
        State {
            a: self.regs.a,
            x: self.regs.x,
            y: self.regs.y,
            s: self.regs.s,
            p: self.regs.p,
            pc: self.regs.pc,
            phase: self.phase().into(),
        }
    }

    /// Restores a snapshot; the processor resumes at an instruction fetch.
    pub fn restore(&mut self, state: &State) {
        self.regs.a = state.a;
        self.regs.x = state.x;
        self.regs.y = state.y;
        self.regs.s = state.s;
        self.regs.p = state.p;
        self.regs.pc = state.pc;
        self.set_phase_for_restore(state.phase.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_serialisation() {
        let mut cpu = Mos6502::new();
        cpu.regs.a = 0x42;
        cpu.regs.x = 0x10;
        cpu.regs.pc = 0x8000;

        let snapshot = cpu.state();
        let document = emu_reflect::serialise(&snapshot);

        let mut restored = Mos6502::new().state();
        assert!(emu_reflect::deserialise(&mut restored, &document));
        assert_eq!(restored, snapshot);

        let mut fresh = Mos6502::new();
        fresh.restore(&restored);
        assert_eq!(fresh.regs.a, 0x42);
        assert_eq!(fresh.regs.pc, 0x8000);
    }

    #[test]
    fn phase_is_reflected_by_name() {
        use emu_reflect::Reflectable;

        let cpu = Mos6502::new();
        let snapshot = cpu.state();
        assert_eq!(
            snapshot.get("phase"),
            Some(emu_reflect::Value::Enum("Instruction"))
        );
    }
}
