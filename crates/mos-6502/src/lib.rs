//! MOS 6502 CPU core.
//!
//! Microcoded: every opcode expands to a sequence of micro-ops and exactly
//! one micro-op executes per bus cycle, so the bus sees the authentic
//! pattern of fetches, dummy accesses and read-modify-write double stores.
//! IRQ is level-sampled at the final cycle of each instruction; NMI is
//! edge-captured and can hijack an in-flight BRK's vector fetch.

mod registers;
mod state;

use emu_core::Cycles;
pub use registers::{Phase, Registers, flag};
pub use state::{ExecutionPhase, State};

/// One byte transferred per bus cycle.
pub trait Bus {
    fn read(&mut self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicroOp {
    // Operand/address assembly.
    ImmediateOperand,
    FetchZeroPage,
    IndexZeroPageX,
    IndexZeroPageY,
    ReadPointerLow,
    ReadPointerHigh,
    ReadPointerHighAddY,
    FetchAddressLow,
    FetchAddressHigh,
    FetchAddressHighAddX,
    FetchAddressHighAddY,

    // Terminal data cycles.
    ReadEffective,
    ReadEffectiveFixup,
    FixupAlways,
    WriteEffective,
    DummyWriteOld,
    WriteModified,

    // Implied/accumulator.
    DummyPcRead,

    // Stack and control flow.
    PushValue,
    StackSpin,
    PullValue,
    JsrSpin,
    PushPch,
    PushPcl,
    JsrJump,
    PullP,
    PullPcl,
    PullPch,
    RtsIncrement,
    BrkPadding,
    InterruptPadding,
    PushStatus,
    VectorLow,
    VectorHigh,
    ResetSpin,
    JumpAbsolute,
    ReadIndirectLow,
    JumpIndirect,
    BranchOperand,
    BranchAdd,
    BranchFixup,
}

use MicroOp as M;

const IMPLIED: &[M] = &[M::DummyPcRead];
const IMMEDIATE: &[M] = &[M::ImmediateOperand];

const ZP_READ: &[M] = &[M::FetchZeroPage, M::ReadEffective];
const ZPX_READ: &[M] = &[M::FetchZeroPage, M::IndexZeroPageX, M::ReadEffective];
const ZPY_READ: &[M] = &[M::FetchZeroPage, M::IndexZeroPageY, M::ReadEffective];
const ABS_READ: &[M] = &[M::FetchAddressLow, M::FetchAddressHigh, M::ReadEffective];
const ABSX_READ: &[M] = &[M::FetchAddressLow, M::FetchAddressHighAddX, M::ReadEffectiveFixup];
const ABSY_READ: &[M] = &[M::FetchAddressLow, M::FetchAddressHighAddY, M::ReadEffectiveFixup];
const INDX_READ: &[M] = &[
    M::FetchZeroPage,
    M::IndexZeroPageX,
    M::ReadPointerLow,
    M::ReadPointerHigh,
    M::ReadEffective,
];
const INDY_READ: &[M] = &[
    M::FetchZeroPage,
    M::ReadPointerLow,
    M::ReadPointerHighAddY,
    M::ReadEffectiveFixup,
];

const ZP_WRITE: &[M] = &[M::FetchZeroPage, M::WriteEffective];
const ZPX_WRITE: &[M] = &[M::FetchZeroPage, M::IndexZeroPageX, M::WriteEffective];
const ZPY_WRITE: &[M] = &[M::FetchZeroPage, M::IndexZeroPageY, M::WriteEffective];
const ABS_WRITE: &[M] = &[M::FetchAddressLow, M::FetchAddressHigh, M::WriteEffective];
const ABSX_WRITE: &[M] = &[
    M::FetchAddressLow,
    M::FetchAddressHighAddX,
    M::FixupAlways,
    M::WriteEffective,
];
const ABSY_WRITE: &[M] = &[
    M::FetchAddressLow,
    M::FetchAddressHighAddY,
    M::FixupAlways,
    M::WriteEffective,
];
const INDX_WRITE: &[M] = &[
    M::FetchZeroPage,
    M::IndexZeroPageX,
    M::ReadPointerLow,
    M::ReadPointerHigh,
    M::WriteEffective,
];
const INDY_WRITE: &[M] = &[
    M::FetchZeroPage,
    M::ReadPointerLow,
    M::ReadPointerHighAddY,
    M::FixupAlways,
    M::WriteEffective,
];

const ZP_RMW: &[M] = &[
    M::FetchZeroPage,
    M::ReadEffective,
    M::DummyWriteOld,
    M::WriteModified,
];
const ZPX_RMW: &[M] = &[
    M::FetchZeroPage,
    M::IndexZeroPageX,
    M::ReadEffective,
    M::DummyWriteOld,
    M::WriteModified,
];
const ABS_RMW: &[M] = &[
    M::FetchAddressLow,
    M::FetchAddressHigh,
    M::ReadEffective,
    M::DummyWriteOld,
    M::WriteModified,
];
const ABSX_RMW: &[M] = &[
    M::FetchAddressLow,
    M::FetchAddressHighAddX,
    M::FixupAlways,
    M::ReadEffective,
    M::DummyWriteOld,
    M::WriteModified,
];

const PUSH: &[M] = &[M::DummyPcRead, M::PushValue];
const PULL: &[M] = &[M::DummyPcRead, M::StackSpin, M::PullValue];
const JSR: &[M] = &[
    M::FetchAddressLow,
    M::JsrSpin,
    M::PushPch,
    M::PushPcl,
    M::JsrJump,
];
const RTS: &[M] = &[
    M::DummyPcRead,
    M::StackSpin,
    M::PullPcl,
    M::PullPch,
    M::RtsIncrement,
];
const RTI: &[M] = &[
    M::DummyPcRead,
    M::StackSpin,
    M::PullP,
    M::PullPcl,
    M::PullPch,
];
const BRK: &[M] = &[
    M::BrkPadding,
    M::PushPch,
    M::PushPcl,
    M::PushStatus,
    M::VectorLow,
    M::VectorHigh,
];
const INTERRUPT: &[M] = &[
    M::InterruptPadding,
    M::InterruptPadding,
    M::PushPch,
    M::PushPcl,
    M::PushStatus,
    M::VectorLow,
    M::VectorHigh,
];
const RESET: &[M] = &[
    M::InterruptPadding,
    M::InterruptPadding,
    M::ResetSpin,
    M::ResetSpin,
    M::ResetSpin,
    M::VectorLow,
    M::VectorHigh,
];
const JMP_ABS: &[M] = &[M::FetchAddressLow, M::JumpAbsolute];
const JMP_IND: &[M] = &[
    M::FetchAddressLow,
    M::FetchAddressHigh,
    M::ReadIndirectLow,
    M::JumpIndirect,
];
const BRANCH: &[M] = &[M::BranchOperand, M::BranchAdd, M::BranchFixup];

/// What an instruction does once its addressing micro-ops resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Lda,
    Ldx,
    Ldy,
    Sta,
    Stx,
    Sty,
    Adc,
    Sbc,
    And,
    Ora,
    Eor,
    Cmp,
    Cpx,
    Cpy,
    Bit,
    Asl,
    Lsr,
    Rol,
    Ror,
    Inc,
    Dec,
    AslA,
    LsrA,
    RolA,
    RorA,
    Inx,
    Iny,
    Dex,
    Dey,
    Tax,
    Tay,
    Txa,
    Tya,
    Tsx,
    Txs,
    Clc,
    Sec,
    Cli,
    Sei,
    Cld,
    Sed,
    Clv,
    Nop,
    Pha,
    Php,
    Pla,
    Plp,
    Brk,
    Irq,
    Nmi,
    Reset,
    Jmp,
    Jsr,
    Rts,
    Rti,
    Branch(u8),
    Jam,
}

enum StepOutcome {
    Advance,
    Repeat,
    Done,
}

pub struct Mos6502 {
    pub regs: Registers,
    phase: Phase,

    program: &'static [M],
    step: usize,
    operation: Operation,
    fetching: bool,

    address: u16,
    pointer: u8,
    operand: u8,
    crossed: bool,
    vector: u16,

    irq_line: bool,
    nmi_line: bool,
    nmi_pending: bool,
    rdy_line: bool,
}

impl Default for Mos6502 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mos6502 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            phase: Phase::Instruction,
            program: RESET,
            step: 0,
            operation: Operation::Reset,
            fetching: false,
            address: 0,
            pointer: 0,
            operand: 0,
            crossed: false,
            vector: 0xFFFC,
            irq_line: false,
            nmi_line: false,
            nmi_pending: false,
            rdy_line: true,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Level-triggered interrupt request input.
    pub fn set_irq_line(&mut self, asserted: bool) {
        self.irq_line = asserted;
    }

    /// Edge-triggered non-maskable interrupt input.
    pub fn set_nmi_line(&mut self, asserted: bool) {
        if asserted && !self.nmi_line {
            self.nmi_pending = true;
        }
        self.nmi_line = asserted;
    }

    /// The RDY input: while low the processor stalls.
    pub fn set_rdy_line(&mut self, asserted: bool) {
        self.rdy_line = asserted;
        if !asserted && self.phase == Phase::Instruction {
            self.phase = Phase::Ready;
        } else if asserted && self.phase == Phase::Ready {
            self.phase = Phase::Instruction;
        }
    }

    /// Re-enters execution after a state restore: the next cycle fetches
    /// at the restored PC, unless the restored phase forbids it.
    pub(crate) fn set_phase_for_restore(&mut self, phase: Phase) {
        self.phase = phase;
        self.program = &[];
        self.step = 0;
        self.fetching = true;
        self.nmi_pending = false;
    }

    /// Schedules the reset sequence; it completes within the next calls to
    /// `run_for`.
    pub fn reset(&mut self) {
        self.phase = Phase::Instruction;
        self.program = RESET;
        self.operation = Operation::Reset;
        self.step = 0;
        self.fetching = false;
        self.nmi_pending = false;
    }

    /// Runs for `cycles` bus cycles.
    pub fn run_for<B: Bus>(&mut self, cycles: Cycles, bus: &mut B) {
        for _ in 0..cycles.get() {
            self.perform_cycle(bus);
        }
    }

    /// Executes exactly one bus cycle.
    pub fn perform_cycle<B: Bus>(&mut self, bus: &mut B) {
        match self.phase {
            Phase::Jammed | Phase::Stopped | Phase::Ready => return,
            Phase::Waiting => {
                if self.nmi_pending || self.irq_line {
                    self.phase = Phase::Instruction;
                    self.finish_instruction();
                } else {
                    return;
                }
            }
            Phase::Instruction => {}
        }

        if self.fetching {
            let opcode = bus.read(self.regs.pc);
            self.regs.pc = self.regs.pc.wrapping_add(1);
            self.decode(opcode);
            self.fetching = false;
            self.step = 0;
            return;
        }

        let micro_op = self.program[self.step];
        match self.execute_micro_op(micro_op, bus) {
            StepOutcome::Advance => {
                self.step += 1;
                if self.step == self.program.len() {
                    self.finish_instruction();
                }
            }
            StepOutcome::Repeat => {}
            StepOutcome::Done => self.finish_instruction(),
        }
    }

    /// Samples interrupts; the 6502 does this on the concluding cycle of
    /// every instruction.
    fn finish_instruction(&mut self) {
        if self.nmi_pending {
            self.program = INTERRUPT;
            self.operation = Operation::Nmi;
            self.step = 0;
            self.fetching = false;
        } else if self.irq_line && !self.regs.flag(flag::INTERRUPT) {
            self.program = INTERRUPT;
            self.operation = Operation::Irq;
            self.step = 0;
            self.fetching = false;
        } else {
            self.fetching = true;
        }
    }

    fn execute_micro_op<B: Bus>(&mut self, micro_op: M, bus: &mut B) -> StepOutcome {
        match micro_op {
            M::ImmediateOperand => {
                self.operand = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.apply_read_operation();
            }
            M::FetchZeroPage => {
                self.pointer = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.address = u16::from(self.pointer);
            }
            M::IndexZeroPageX => {
                let _ = bus.read(self.address);
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.address = u16::from(self.pointer);
            }
            M::IndexZeroPageY => {
                let _ = bus.read(self.address);
                self.pointer = self.pointer.wrapping_add(self.regs.y);
                self.address = u16::from(self.pointer);
            }
            M::ReadPointerLow => {
                self.operand = bus.read(u16::from(self.pointer));
            }
            M::ReadPointerHigh => {
                let high = bus.read(u16::from(self.pointer.wrapping_add(1)));
                self.address = u16::from(self.operand) | (u16::from(high) << 8);
            }
            M::ReadPointerHighAddY => {
                let high = bus.read(u16::from(self.pointer.wrapping_add(1)));
                let base = u16::from(self.operand) | (u16::from(high) << 8);
                let sum = u16::from(self.operand) + u16::from(self.regs.y);
                self.crossed = sum > 0xFF;
                self.address = (base & 0xFF00) | (sum & 0xFF);
            }
            M::FetchAddressLow => {
                self.operand = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.address = u16::from(self.operand);
            }
            M::FetchAddressHigh => {
                let high = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.address |= u16::from(high) << 8;
            }
            M::FetchAddressHighAddX => self.fetch_high_indexed(bus, self.regs.x),
            M::FetchAddressHighAddY => self.fetch_high_indexed(bus, self.regs.y),

            M::ReadEffective => {
                self.operand = bus.read(self.address);
                if is_read_operation(self.operation) {
                    self.apply_read_operation();
                }
            }
            M::ReadEffectiveFixup => {
                if self.crossed {
                    let _ = bus.read(self.address);
                    self.address = self.address.wrapping_add(0x100);
                    self.crossed = false;
                    return StepOutcome::Repeat;
                }
                self.operand = bus.read(self.address);
                self.apply_read_operation();
            }
            M::FixupAlways => {
                let _ = bus.read(self.address);
                if self.crossed {
                    self.address = self.address.wrapping_add(0x100);
                    self.crossed = false;
                }
            }
            M::WriteEffective => {
                let value = self.store_value();
                bus.write(self.address, value);
            }
            M::DummyWriteOld => {
                bus.write(self.address, self.operand);
            }
            M::WriteModified => {
                let value = self.apply_rmw(self.operand);
                bus.write(self.address, value);
            }

            M::DummyPcRead => {
                let _ = bus.read(self.regs.pc);
                self.apply_implied_operation();
            }

            M::PushValue => {
                let value = match self.operation {
                    Operation::Php => self.regs.p | flag::BREAK | flag::ALWAYS,
                    _ => self.regs.a,
                };
                bus.write(0x0100 | u16::from(self.regs.s), value);
                self.regs.s = self.regs.s.wrapping_sub(1);
            }
            M::StackSpin => {
                let _ = bus.read(0x0100 | u16::from(self.regs.s));
            }
            M::PullValue => {
                self.regs.s = self.regs.s.wrapping_add(1);
                let value = bus.read(0x0100 | u16::from(self.regs.s));
                match self.operation {
                    Operation::Plp => {
                        self.regs.p = (value & !flag::BREAK) | flag::ALWAYS;
                    }
                    _ => {
                        self.regs.a = value;
                        self.regs.set_nz(value);
                    }
                }
            }
            M::JsrSpin => {
                let _ = bus.read(0x0100 | u16::from(self.regs.s));
            }
            M::PushPch => {
                bus.write(0x0100 | u16::from(self.regs.s), (self.regs.pc >> 8) as u8);
                self.regs.s = self.regs.s.wrapping_sub(1);
            }
            M::PushPcl => {
                bus.write(0x0100 | u16::from(self.regs.s), self.regs.pc as u8);
                self.regs.s = self.regs.s.wrapping_sub(1);
            }
            M::JsrJump => {
                let high = bus.read(self.regs.pc);
                self.regs.pc = u16::from(self.operand) | (u16::from(high) << 8);
            }
            M::PullP => {
                self.regs.s = self.regs.s.wrapping_add(1);
                let value = bus.read(0x0100 | u16::from(self.regs.s));
                self.regs.p = (value & !flag::BREAK) | flag::ALWAYS;
            }
            M::PullPcl => {
                self.regs.s = self.regs.s.wrapping_add(1);
                self.operand = bus.read(0x0100 | u16::from(self.regs.s));
            }
            M::PullPch => {
                self.regs.s = self.regs.s.wrapping_add(1);
                let high = bus.read(0x0100 | u16::from(self.regs.s));
                self.regs.pc = u16::from(self.operand) | (u16::from(high) << 8);
            }
            M::RtsIncrement => {
                let _ = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }

            M::BrkPadding => {
                let _ = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            M::InterruptPadding => {
                let _ = bus.read(self.regs.pc);
            }
            M::PushStatus => {
                let brk_bit = if self.operation == Operation::Brk {
                    flag::BREAK
                } else {
                    0
                };
                bus.write(
                    0x0100 | u16::from(self.regs.s),
                    self.regs.p | brk_bit | flag::ALWAYS,
                );
                self.regs.s = self.regs.s.wrapping_sub(1);
            }
            M::VectorLow => {
                // An NMI arriving during a BRK or IRQ sequence hijacks the
                // vector fetch.
                self.vector = if self.operation == Operation::Reset {
                    0xFFFC
                } else if self.nmi_pending {
                    self.nmi_pending = false;
                    0xFFFA
                } else {
                    0xFFFE
                };
                self.regs.set_flag(flag::INTERRUPT, true);
                self.regs.set_flag(flag::DECIMAL, false);
                self.operand = bus.read(self.vector);
            }
            M::VectorHigh => {
                let high = bus.read(self.vector.wrapping_add(1));
                self.regs.pc = u16::from(self.operand) | (u16::from(high) << 8);
            }
            M::ResetSpin => {
                let _ = bus.read(0x0100 | u16::from(self.regs.s));
                self.regs.s = self.regs.s.wrapping_sub(1);
            }

            M::JumpAbsolute => {
                let high = bus.read(self.regs.pc);
                self.regs.pc = u16::from(self.operand) | (u16::from(high) << 8);
            }
            M::ReadIndirectLow => {
                self.operand = bus.read(self.address);
            }
            M::JumpIndirect => {
                // The indirect vector read does not cross pages.
                let high_address = (self.address & 0xFF00) | (self.address.wrapping_add(1) & 0xFF);
                let high = bus.read(high_address);
                self.regs.pc = u16::from(self.operand) | (u16::from(high) << 8);
            }

            M::BranchOperand => {
                self.operand = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let Operation::Branch(opcode) = self.operation else {
                    return StepOutcome::Done;
                };
                if !self.branch_taken(opcode) {
                    return StepOutcome::Done;
                }
            }
            M::BranchAdd => {
                let _ = bus.read(self.regs.pc);
                let target = self.regs.pc.wrapping_add(self.operand as i8 as u16);
                self.crossed = target & 0xFF00 != self.regs.pc & 0xFF00;
                let fixed_low = (self.regs.pc & 0xFF00) | (target & 0xFF);
                self.address = target;
                self.regs.pc = fixed_low;
                if !self.crossed {
                    self.regs.pc = target;
                    return StepOutcome::Done;
                }
            }
            M::BranchFixup => {
                let _ = bus.read(self.regs.pc);
                self.regs.pc = self.address;
            }
        }

        StepOutcome::Advance
    }

    fn fetch_high_indexed<B: Bus>(&mut self, bus: &mut B, index: u8) {
        let high = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        let sum = u16::from(self.operand) + u16::from(index);
        self.crossed = sum > 0xFF;
        self.address = (u16::from(high) << 8) | (sum & 0xFF);
    }

    fn branch_taken(&self, opcode: u8) -> bool {
        let flag_value = match opcode >> 6 {
            0 => self.regs.flag(flag::NEGATIVE),
            1 => self.regs.flag(flag::OVERFLOW),
            2 => self.regs.flag(flag::CARRY),
            _ => self.regs.flag(flag::ZERO),
        };
        flag_value == (opcode & 0x20 != 0)
    }

    fn store_value(&self) -> u8 {
        match self.operation {
            Operation::Stx => self.regs.x,
            Operation::Sty => self.regs.y,
            _ => self.regs.a,
        }
    }

    fn apply_read_operation(&mut self) {
        let operand = self.operand;
        match self.operation {
            Operation::Lda => {
                self.regs.a = operand;
                self.regs.set_nz(operand);
            }
            Operation::Ldx => {
                self.regs.x = operand;
                self.regs.set_nz(operand);
            }
            Operation::Ldy => {
                self.regs.y = operand;
                self.regs.set_nz(operand);
            }
            Operation::And => {
                self.regs.a &= operand;
                self.regs.set_nz(self.regs.a);
            }
            Operation::Ora => {
                self.regs.a |= operand;
                self.regs.set_nz(self.regs.a);
            }
            Operation::Eor => {
                self.regs.a ^= operand;
                self.regs.set_nz(self.regs.a);
            }
            Operation::Adc => self.add_with_carry(operand),
            Operation::Sbc => self.subtract_with_carry(operand),
            Operation::Cmp => self.compare(self.regs.a, operand),
            Operation::Cpx => self.compare(self.regs.x, operand),
            Operation::Cpy => self.compare(self.regs.y, operand),
            Operation::Bit => {
                self.regs
                    .set_flag(flag::ZERO, self.regs.a & operand == 0);
                self.regs
                    .set_flag(flag::NEGATIVE, operand & 0x80 != 0);
                self.regs
                    .set_flag(flag::OVERFLOW, operand & 0x40 != 0);
            }
            Operation::Nop => {}
            _ => {}
        }
    }

    fn add_with_carry(&mut self, operand: u8) {
        let carry = u16::from(self.regs.flag(flag::CARRY));
        let a = self.regs.a;
        if self.regs.flag(flag::DECIMAL) {
            // NMOS BCD: N/V/Z derive from intermediate binary stages.
            let binary = u16::from(a) + u16::from(operand) + carry;
            self.regs.set_flag(flag::ZERO, binary as u8 == 0);

            let mut low = (a & 0x0F) as u16 + (operand & 0x0F) as u16 + carry;
            if low > 9 {
                low += 6;
            }
            let mut high =
                (a >> 4) as u16 + (operand >> 4) as u16 + u16::from(low > 0x0F);
            self.regs
                .set_flag(flag::NEGATIVE, high & 0x08 != 0);
            self.regs.set_flag(
                flag::OVERFLOW,
                !(a ^ operand) & (a ^ (high << 4) as u8) & 0x80 != 0,
            );
            if high > 9 {
                high += 6;
            }
            self.regs.set_flag(flag::CARRY, high > 0x0F);
            self.regs.a = ((high << 4) as u8 & 0xF0) | (low as u8 & 0x0F);
        } else {
            let sum = u16::from(a) + u16::from(operand) + carry;
            self.regs.set_flag(flag::CARRY, sum > 0xFF);
            self.regs.set_flag(
                flag::OVERFLOW,
                !(a ^ operand) & (a ^ sum as u8) & 0x80 != 0,
            );
            self.regs.a = sum as u8;
            self.regs.set_nz(self.regs.a);
        }
    }

    fn subtract_with_carry(&mut self, operand: u8) {
        let borrow = u16::from(!self.regs.flag(flag::CARRY));
        let a = self.regs.a;
        let difference = u16::from(a)
            .wrapping_sub(u16::from(operand))
            .wrapping_sub(borrow);
        let result = difference as u8;

        self.regs.set_flag(flag::CARRY, difference < 0x100);
        self.regs
            .set_flag(flag::OVERFLOW, (a ^ operand) & (a ^ result) & 0x80 != 0);

        if self.regs.flag(flag::DECIMAL) {
            // Flags above come from the binary result; only A is adjusted.
            let mut low = (a & 0x0F) as i16 - (operand & 0x0F) as i16 - borrow as i16;
            let mut high = (a >> 4) as i16 - (operand >> 4) as i16;
            if low < 0 {
                low -= 6;
                high -= 1;
            }
            if high < 0 {
                high -= 6;
            }
            self.regs.set_nz(result);
            self.regs.a = (((high as u8) << 4) & 0xF0) | (low as u8 & 0x0F);
        } else {
            self.regs.a = result;
            self.regs.set_nz(result);
        }
    }

    fn compare(&mut self, register: u8, operand: u8) {
        let difference = register.wrapping_sub(operand);
        self.regs.set_flag(flag::CARRY, register >= operand);
        self.regs.set_nz(difference);
    }

    fn apply_rmw(&mut self, value: u8) -> u8 {
        let result = match self.operation {
            Operation::Asl => {
                self.regs.set_flag(flag::CARRY, value & 0x80 != 0);
                value << 1
            }
            Operation::Lsr => {
                self.regs.set_flag(flag::CARRY, value & 1 != 0);
                value >> 1
            }
            Operation::Rol => {
                let carry_in = u8::from(self.regs.flag(flag::CARRY));
                self.regs.set_flag(flag::CARRY, value & 0x80 != 0);
                (value << 1) | carry_in
            }
            Operation::Ror => {
                let carry_in = u8::from(self.regs.flag(flag::CARRY)) << 7;
                self.regs.set_flag(flag::CARRY, value & 1 != 0);
                (value >> 1) | carry_in
            }
            Operation::Inc => value.wrapping_add(1),
            Operation::Dec => value.wrapping_sub(1),
            _ => value,
        };
        self.regs.set_nz(result);
        result
    }

    fn apply_implied_operation(&mut self) {
        match self.operation {
            Operation::AslA => {
                self.operation = Operation::Asl;
                self.regs.a = self.apply_rmw(self.regs.a);
            }
            Operation::LsrA => {
                self.operation = Operation::Lsr;
                self.regs.a = self.apply_rmw(self.regs.a);
            }
            Operation::RolA => {
                self.operation = Operation::Rol;
                self.regs.a = self.apply_rmw(self.regs.a);
            }
            Operation::RorA => {
                self.operation = Operation::Ror;
                self.regs.a = self.apply_rmw(self.regs.a);
            }
            Operation::Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.set_nz(self.regs.x);
            }
            Operation::Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.regs.set_nz(self.regs.y);
            }
            Operation::Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.set_nz(self.regs.x);
            }
            Operation::Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.regs.set_nz(self.regs.y);
            }
            Operation::Tax => {
                self.regs.x = self.regs.a;
                self.regs.set_nz(self.regs.x);
            }
            Operation::Tay => {
                self.regs.y = self.regs.a;
                self.regs.set_nz(self.regs.y);
            }
            Operation::Txa => {
                self.regs.a = self.regs.x;
                self.regs.set_nz(self.regs.a);
            }
            Operation::Tya => {
                self.regs.a = self.regs.y;
                self.regs.set_nz(self.regs.a);
            }
            Operation::Tsx => {
                self.regs.x = self.regs.s;
                self.regs.set_nz(self.regs.x);
            }
            Operation::Txs => self.regs.s = self.regs.x,
            Operation::Clc => self.regs.set_flag(flag::CARRY, false),
            Operation::Sec => self.regs.set_flag(flag::CARRY, true),
            Operation::Cli => self.regs.set_flag(flag::INTERRUPT, false),
            Operation::Sei => self.regs.set_flag(flag::INTERRUPT, true),
            Operation::Cld => self.regs.set_flag(flag::DECIMAL, false),
            Operation::Sed => self.regs.set_flag(flag::DECIMAL, true),
            Operation::Clv => self.regs.set_flag(flag::OVERFLOW, false),
            _ => {}
        }
    }

    fn decode(&mut self, opcode: u8) {
        use Operation as O;

        let (program, operation): (&'static [M], Operation) = match opcode {
            0x00 => (BRK, O::Brk),
            0x20 => (JSR, O::Jsr),
            0x40 => (RTI, O::Rti),
            0x60 => (RTS, O::Rts),
            0x4C => (JMP_ABS, O::Jmp),
            0x6C => (JMP_IND, O::Jmp),

            0x10 | 0x30 | 0x50 | 0x70 | 0x90 | 0xB0 | 0xD0 | 0xF0 => {
                (BRANCH, O::Branch(opcode))
            }

            0x48 => (PUSH, O::Pha),
            0x08 => (PUSH, O::Php),
            0x68 => (PULL, O::Pla),
            0x28 => (PULL, O::Plp),

            0xA9 => (IMMEDIATE, O::Lda),
            0xA5 => (ZP_READ, O::Lda),
            0xB5 => (ZPX_READ, O::Lda),
            0xAD => (ABS_READ, O::Lda),
            0xBD => (ABSX_READ, O::Lda),
            0xB9 => (ABSY_READ, O::Lda),
            0xA1 => (INDX_READ, O::Lda),
            0xB1 => (INDY_READ, O::Lda),

            0xA2 => (IMMEDIATE, O::Ldx),
            0xA6 => (ZP_READ, O::Ldx),
            0xB6 => (ZPY_READ, O::Ldx),
            0xAE => (ABS_READ, O::Ldx),
            0xBE => (ABSY_READ, O::Ldx),

            0xA0 => (IMMEDIATE, O::Ldy),
            0xA4 => (ZP_READ, O::Ldy),
            0xB4 => (ZPX_READ, O::Ldy),
            0xAC => (ABS_READ, O::Ldy),
            0xBC => (ABSX_READ, O::Ldy),

            0x85 => (ZP_WRITE, O::Sta),
            0x95 => (ZPX_WRITE, O::Sta),
            0x8D => (ABS_WRITE, O::Sta),
            0x9D => (ABSX_WRITE, O::Sta),
            0x99 => (ABSY_WRITE, O::Sta),
            0x81 => (INDX_WRITE, O::Sta),
            0x91 => (INDY_WRITE, O::Sta),

            0x86 => (ZP_WRITE, O::Stx),
            0x96 => (ZPY_WRITE, O::Stx),
            0x8E => (ABS_WRITE, O::Stx),
            0x84 => (ZP_WRITE, O::Sty),
            0x94 => (ZPX_WRITE, O::Sty),
            0x8C => (ABS_WRITE, O::Sty),

            0x69 => (IMMEDIATE, O::Adc),
            0x65 => (ZP_READ, O::Adc),
            0x75 => (ZPX_READ, O::Adc),
            0x6D => (ABS_READ, O::Adc),
            0x7D => (ABSX_READ, O::Adc),
            0x79 => (ABSY_READ, O::Adc),
            0x61 => (INDX_READ, O::Adc),
            0x71 => (INDY_READ, O::Adc),

            0xE9 => (IMMEDIATE, O::Sbc),
            0xE5 => (ZP_READ, O::Sbc),
            0xF5 => (ZPX_READ, O::Sbc),
            0xED => (ABS_READ, O::Sbc),
            0xFD => (ABSX_READ, O::Sbc),
            0xF9 => (ABSY_READ, O::Sbc),
            0xE1 => (INDX_READ, O::Sbc),
            0xF1 => (INDY_READ, O::Sbc),

            0x29 => (IMMEDIATE, O::And),
            0x25 => (ZP_READ, O::And),
            0x35 => (ZPX_READ, O::And),
            0x2D => (ABS_READ, O::And),
            0x3D => (ABSX_READ, O::And),
            0x39 => (ABSY_READ, O::And),
            0x21 => (INDX_READ, O::And),
            0x31 => (INDY_READ, O::And),

            0x09 => (IMMEDIATE, O::Ora),
            0x05 => (ZP_READ, O::Ora),
            0x15 => (ZPX_READ, O::Ora),
            0x0D => (ABS_READ, O::Ora),
            0x1D => (ABSX_READ, O::Ora),
            0x19 => (ABSY_READ, O::Ora),
            0x01 => (INDX_READ, O::Ora),
            0x11 => (INDY_READ, O::Ora),

            0x49 => (IMMEDIATE, O::Eor),
            0x45 => (ZP_READ, O::Eor),
            0x55 => (ZPX_READ, O::Eor),
            0x4D => (ABS_READ, O::Eor),
            0x5D => (ABSX_READ, O::Eor),
            0x59 => (ABSY_READ, O::Eor),
            0x41 => (INDX_READ, O::Eor),
            0x51 => (INDY_READ, O::Eor),

            0xC9 => (IMMEDIATE, O::Cmp),
            0xC5 => (ZP_READ, O::Cmp),
            0xD5 => (ZPX_READ, O::Cmp),
            0xCD => (ABS_READ, O::Cmp),
            0xDD => (ABSX_READ, O::Cmp),
            0xD9 => (ABSY_READ, O::Cmp),
            0xC1 => (INDX_READ, O::Cmp),
            0xD1 => (INDY_READ, O::Cmp),

            0xE0 => (IMMEDIATE, O::Cpx),
            0xE4 => (ZP_READ, O::Cpx),
            0xEC => (ABS_READ, O::Cpx),
            0xC0 => (IMMEDIATE, O::Cpy),
            0xC4 => (ZP_READ, O::Cpy),
            0xCC => (ABS_READ, O::Cpy),

            0x24 => (ZP_READ, O::Bit),
            0x2C => (ABS_READ, O::Bit),

            0x0A => (IMPLIED, O::AslA),
            0x06 => (ZP_RMW, O::Asl),
            0x16 => (ZPX_RMW, O::Asl),
            0x0E => (ABS_RMW, O::Asl),
            0x1E => (ABSX_RMW, O::Asl),

            0x4A => (IMPLIED, O::LsrA),
            0x46 => (ZP_RMW, O::Lsr),
            0x56 => (ZPX_RMW, O::Lsr),
            0x4E => (ABS_RMW, O::Lsr),
            0x5E => (ABSX_RMW, O::Lsr),

            0x2A => (IMPLIED, O::RolA),
            0x26 => (ZP_RMW, O::Rol),
            0x36 => (ZPX_RMW, O::Rol),
            0x2E => (ABS_RMW, O::Rol),
            0x3E => (ABSX_RMW, O::Rol),

            0x6A => (IMPLIED, O::RorA),
            0x66 => (ZP_RMW, O::Ror),
            0x76 => (ZPX_RMW, O::Ror),
            0x6E => (ABS_RMW, O::Ror),
            0x7E => (ABSX_RMW, O::Ror),

            0xE6 => (ZP_RMW, O::Inc),
            0xF6 => (ZPX_RMW, O::Inc),
            0xEE => (ABS_RMW, O::Inc),
            0xFE => (ABSX_RMW, O::Inc),
            0xC6 => (ZP_RMW, O::Dec),
            0xD6 => (ZPX_RMW, O::Dec),
            0xCE => (ABS_RMW, O::Dec),
            0xDE => (ABSX_RMW, O::Dec),

            0xE8 => (IMPLIED, O::Inx),
            0xC8 => (IMPLIED, O::Iny),
            0xCA => (IMPLIED, O::Dex),
            0x88 => (IMPLIED, O::Dey),
            0xAA => (IMPLIED, O::Tax),
            0xA8 => (IMPLIED, O::Tay),
            0x8A => (IMPLIED, O::Txa),
            0x98 => (IMPLIED, O::Tya),
            0xBA => (IMPLIED, O::Tsx),
            0x9A => (IMPLIED, O::Txs),

            0x18 => (IMPLIED, O::Clc),
            0x38 => (IMPLIED, O::Sec),
            0x58 => (IMPLIED, O::Cli),
            0x78 => (IMPLIED, O::Sei),
            0xD8 => (IMPLIED, O::Cld),
            0xF8 => (IMPLIED, O::Sed),
            0xB8 => (IMPLIED, O::Clv),
            0xEA => (IMPLIED, O::Nop),

            // The undocumented halts.
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2
            | 0xF2 => {
                self.phase = Phase::Jammed;
                (IMPLIED, O::Jam)
            }

            // Everything else behaves as a NOP of the decoded shape's
            // length; a one-byte NOP is a safe default for the remainder.
            _ => (IMPLIED, O::Nop),
        };

        self.program = program;
        self.operation = operation;
        self.crossed = false;
    }
}

fn is_read_operation(operation: Operation) -> bool {
    !matches!(
        operation,
        Operation::Asl
            | Operation::Lsr
            | Operation::Rol
            | Operation::Ror
            | Operation::Inc
            | Operation::Dec
    )
}
