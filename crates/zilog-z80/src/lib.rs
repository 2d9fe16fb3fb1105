//! Zilog Z80 CPU core.
//!
//! Execution is scheduled as a queue of micro-ops, one bus transaction (or
//! internal delay) each, consumed one T-state at a time; decode happens at
//! opcode-fetch completion and either acts immediately or queues operand
//! traffic plus a follow-up. Interrupts are sampled at instruction
//! boundaries — a DD/FD/ED prefix and its instruction form one sampling
//! unit. NMI is edge-triggered; HALT burns fetch cycles at an unmoving PC
//! until an interrupt arrives.

mod alu;
mod registers;

use emu_core::Cycles;
pub use registers::{Phase, Registers, flag};

/// Memory, port and interrupt-acknowledge traffic.
pub trait Bus {
    fn read(&mut self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);

    fn port_in(&mut self, port: u16) -> u8 {
        let _ = port;
        0xFF
    }

    fn port_out(&mut self, port: u16, value: u8) {
        let _ = (port, value);
    }

    /// The byte placed on the bus during interrupt acknowledge; used as the
    /// low vector byte in mode 2.
    fn irq_ack(&mut self) -> u8 {
        0xFF
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicroOp {
    Fetch,
    FetchSub,
    ReadImmLow,
    ReadImmHigh,
    ReadDisplacement,
    ReadLow,
    ReadHigh,
    Write,
    WriteHigh,
    PushHigh,
    PushLow,
    PopLow,
    PopHigh,
    PortIn,
    PortOut,
    IntAck,
    Internal(u8),
}

impl MicroOp {
    const fn t_states(self) -> u8 {
        match self {
            MicroOp::Fetch | MicroOp::FetchSub | MicroOp::PortIn | MicroOp::PortOut => 4,
            MicroOp::IntAck => 7,
            MicroOp::Internal(t) => t,
            _ => 3,
        }
    }
}

/// Which decode table the next `FetchSub` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubTable {
    Cb,
    Ed,
}

/// Deferred work to run once queued operand traffic completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Followup {
    /// Re-dispatch on the main-table opcode.
    Main,
    /// Re-dispatch on the CB-table opcode.
    Cb,
    /// `IN A, (n)`: load A, flags untouched.
    InA,
    /// `LD A, (…)`: load A, flags untouched.
    LoadA,
    /// `LD HL/IX/IY, (nn)` completion.
    LoadIndexPair,
    /// `IN r, (C)` completion; the payload is the register index.
    InReg(u8),
    /// `LD rp,(nn)` / `LD (nn),rp` after the address bytes; payload is the
    /// ED opcode.
    EdPair(u8),
    /// `LD rp,(nn)` completion; payload is the pair index.
    EdLoadPair(u8),
    /// RETN/RETI completion.
    EdRet,
    Rrd,
    Rld,
    /// Block transfer/compare; payload is the ED opcode.
    EdBlock(u8),
    /// Mode-2 vector fetched.
    Im2Vector,
    /// EX (SP),HL: old value read, writes pending.
    ExSpWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexPrefix {
    None,
    Ix,
    Iy,
}

pub struct Z80 {
    pub regs: Registers,
    phase: Phase,

    queue: Vec<MicroOp>,
    queue_index: usize,
    t_remaining: u8,
    followup: Option<Followup>,
    sub_table: SubTable,

    opcode: u8,
    prefix: IndexPrefix,
    displacement: i8,
    addr: u16,
    data: u8,
    data2: u8,

    halted: bool,
    ei_pending: bool,
    irq_line: bool,
    nmi_line: bool,
    nmi_pending: bool,
    wait_line: bool,
    bus_request: bool,
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            phase: Phase::Reset,
            queue: Vec::with_capacity(8),
            queue_index: 0,
            t_remaining: 0,
            followup: None,
            sub_table: SubTable::Cb,
            opcode: 0,
            prefix: IndexPrefix::None,
            displacement: 0,
            addr: 0,
            data: 0,
            data2: 0,
            halted: false,
            ei_pending: false,
            irq_line: false,
            nmi_line: false,
            nmi_pending: false,
            wait_line: false,
            bus_request: false,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Level-triggered maskable interrupt input.
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

    /// The /WAIT input: while asserted, T-states elapse without progress.
    pub fn set_wait_line(&mut self, asserted: bool) {
        self.wait_line = asserted;
    }

    /// Bus request: the processor tristates and stalls until released.
    pub fn set_bus_request(&mut self, asserted: bool) {
        self.bus_request = asserted;
    }

    pub fn reset(&mut self) {
        self.regs.pc = 0;
        self.regs.sp = 0xFFFF;
        self.regs.i = 0;
        self.regs.r = 0;
        self.regs.im = 0;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.halted = false;
        self.phase = Phase::Reset;
        self.queue.clear();
        self.queue_index = 0;
        self.t_remaining = 0;
        self.followup = None;
        self.prefix = IndexPrefix::None;
        self.ei_pending = false;
        self.nmi_pending = false;
    }

    /// Runs for `cycles` T-states.
    pub fn run_for<B: Bus>(&mut self, cycles: Cycles, bus: &mut B) {
        for _ in 0..cycles.get() {
            self.tick(bus);
        }
    }

    /// Advances one T-state.
    pub fn tick<B: Bus>(&mut self, bus: &mut B) {
        if self.wait_line || self.bus_request {
            return;
        }
        if self.t_remaining == 0 {
            if self.queue_index == self.queue.len() {
                self.instruction_boundary();
            }
            self.t_remaining = self.queue[self.queue_index].t_states();
        }

        self.t_remaining -= 1;
        if self.t_remaining > 0 {
            return;
        }

        // The current micro-op completes on this T-state.
        let op = self.queue[self.queue_index];
        self.queue_index += 1;
        self.complete(op, bus);

        if self.queue_index == self.queue.len() {
            if let Some(followup) = self.followup.take() {
                self.run_followup(followup);
            }
        }
    }

    fn push_op(&mut self, op: MicroOp) {
        self.queue.push(op);
    }

    /// The boundary between instructions: sample interrupts and schedule
    /// either an acknowledge sequence or the next opcode fetch.
    fn instruction_boundary(&mut self) {
        self.queue.clear();
        self.queue_index = 0;
        self.prefix = IndexPrefix::None;
        self.phase = Phase::Op;

        let ei_shadow = self.ei_pending;
        self.ei_pending = false;

        if self.nmi_pending {
            self.nmi_pending = false;
            self.halted = false;
            self.regs.iff1 = false;
            self.phase = Phase::Nmi;
            self.data = self.regs.pc as u8;
            self.data2 = (self.regs.pc >> 8) as u8;
            self.regs.pc = 0x0066;
            self.regs.memptr = 0x0066;
            self.regs.increment_r();
            self.push_op(MicroOp::Internal(5));
            self.push_op(MicroOp::PushHigh);
            self.push_op(MicroOp::PushLow);
            return;
        }

        if self.irq_line && self.regs.iff1 && !ei_shadow {
            self.halted = false;
            self.regs.iff1 = false;
            self.regs.iff2 = false;
            self.regs.increment_r();
            self.data = self.regs.pc as u8;
            self.data2 = (self.regs.pc >> 8) as u8;
            if self.regs.im == 2 {
                self.phase = Phase::Irq2;
                self.push_op(MicroOp::IntAck);
                self.push_op(MicroOp::PushHigh);
                self.push_op(MicroOp::PushLow);
                self.push_op(MicroOp::ReadLow);
                self.push_op(MicroOp::ReadHigh);
                self.followup = Some(Followup::Im2Vector);
            } else {
                // Mode 0 is treated as the common hardware arrangement of
                // an RST 38h on the bus, making it equivalent to mode 1.
                self.phase = if self.regs.im == 0 {
                    Phase::Irq0
                } else {
                    Phase::Irq1
                };
                self.regs.pc = 0x0038;
                self.regs.memptr = 0x0038;
                self.push_op(MicroOp::IntAck);
                self.push_op(MicroOp::PushHigh);
                self.push_op(MicroOp::PushLow);
            }
            return;
        }

        if ei_shadow {
            self.regs.iff1 = true;
            self.regs.iff2 = true;
        }

        self.push_op(MicroOp::Fetch);
    }

    fn complete<B: Bus>(&mut self, op: MicroOp, bus: &mut B) {
        match op {
            MicroOp::Fetch => {
                if self.halted {
                    // HALT re-executes NOP at the same PC.
                    let _ = bus.read(self.regs.pc);
                    self.regs.increment_r();
                    return;
                }
                self.opcode = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.regs.increment_r();
                self.decode_main(self.opcode);
            }
            MicroOp::FetchSub => {
                self.opcode = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                if self.prefix == IndexPrefix::None {
                    self.regs.increment_r();
                }
                match self.sub_table {
                    SubTable::Cb => self.decode_cb(),
                    SubTable::Ed => self.decode_ed(),
                }
            }
            MicroOp::ReadImmLow => {
                self.data = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            MicroOp::ReadImmHigh => {
                self.data2 = bus.read(self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            MicroOp::ReadDisplacement => {
                self.displacement = bus.read(self.regs.pc) as i8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                if self.prefix != IndexPrefix::None {
                    self.addr = self.indexed_address();
                    self.regs.memptr = self.addr;
                }
            }
            MicroOp::ReadLow => self.data = bus.read(self.addr),
            MicroOp::ReadHigh => self.data2 = bus.read(self.addr.wrapping_add(1)),
            MicroOp::Write => bus.write(self.addr, self.data),
            MicroOp::WriteHigh => bus.write(self.addr.wrapping_add(1), self.data2),
            MicroOp::PushHigh => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                bus.write(self.regs.sp, self.data2);
            }
            MicroOp::PushLow => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                bus.write(self.regs.sp, self.data);
            }
            MicroOp::PopLow => {
                self.data = bus.read(self.regs.sp);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            MicroOp::PopHigh => {
                self.data2 = bus.read(self.regs.sp);
                self.regs.sp = self.regs.sp.wrapping_add(1);
            }
            MicroOp::PortIn => self.data = bus.port_in(self.addr),
            MicroOp::PortOut => bus.port_out(self.addr, self.data),
            MicroOp::IntAck => {
                let ack = bus.irq_ack();
                if self.phase == Phase::Irq2 {
                    self.addr = (u16::from(self.regs.i) << 8) | u16::from(ack);
                }
            }
            MicroOp::Internal(_) => {}
        }
    }

    //
    // Register helpers.
    //

    fn index_pair(&self) -> u16 {
        match self.prefix {
            IndexPrefix::None => self.regs.hl(),
            IndexPrefix::Ix => self.regs.ix,
            IndexPrefix::Iy => self.regs.iy,
        }
    }

    fn set_index_pair(&mut self, value: u16) {
        match self.prefix {
            IndexPrefix::None => self.regs.set_hl(value),
            IndexPrefix::Ix => self.regs.ix = value,
            IndexPrefix::Iy => self.regs.iy = value,
        }
    }

    /// Effective (HL)/(IX+d)/(IY+d) address; `displacement` must already
    /// be fetched for the indexed cases.
    fn indexed_address(&self) -> u16 {
        match self.prefix {
            IndexPrefix::None => self.regs.hl(),
            IndexPrefix::Ix => self.regs.ix.wrapping_add(self.displacement as u16),
            IndexPrefix::Iy => self.regs.iy.wrapping_add(self.displacement as u16),
        }
    }

    /// 8-bit register by decode index; `use_index` substitutes IXH/IXL for
    /// H/L under a DD/FD prefix.
    fn reg8(&self, index: u8, use_index: bool) -> u8 {
        match index {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => {
                if use_index && self.prefix != IndexPrefix::None {
                    (self.index_pair() >> 8) as u8
                } else {
                    self.regs.h
                }
            }
            5 => {
                if use_index && self.prefix != IndexPrefix::None {
                    self.index_pair() as u8
                } else {
                    self.regs.l
                }
            }
            _ => self.regs.a,
        }
    }

    fn set_reg8(&mut self, index: u8, value: u8, use_index: bool) {
        match index {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => {
                if use_index && self.prefix != IndexPrefix::None {
                    let pair = (self.index_pair() & 0x00FF) | (u16::from(value) << 8);
                    self.set_index_pair(pair);
                } else {
                    self.regs.h = value;
                }
            }
            5 => {
                if use_index && self.prefix != IndexPrefix::None {
                    let pair = (self.index_pair() & 0xFF00) | u16::from(value);
                    self.set_index_pair(pair);
                } else {
                    self.regs.l = value;
                }
            }
            _ => self.regs.a = value,
        }
    }

    fn reg16(&self, index: u8) -> u16 {
        match index {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.index_pair(),
            _ => self.regs.sp,
        }
    }

    fn set_reg16(&mut self, index: u8, value: u16) {
        match index {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.set_index_pair(value),
            _ => self.regs.sp = value,
        }
    }

    fn condition(&self, index: u8) -> bool {
        match index {
            0 => self.regs.f & flag::Z == 0,
            1 => self.regs.f & flag::Z != 0,
            2 => self.regs.f & flag::C == 0,
            3 => self.regs.f & flag::C != 0,
            4 => self.regs.f & flag::PV == 0,
            5 => self.regs.f & flag::PV != 0,
            6 => self.regs.f & flag::S == 0,
            _ => self.regs.f & flag::S != 0,
        }
    }

    fn alu_a(&mut self, operation: u8, value: u8) {
        let carry = u8::from(self.regs.f & flag::C != 0);
        match operation {
            0 => {
                let (result, flags) = alu::add8(self.regs.a, value, 0);
                self.regs.a = result;
                self.regs.f = flags;
            }
            1 => {
                let (result, flags) = alu::add8(self.regs.a, value, carry);
                self.regs.a = result;
                self.regs.f = flags;
            }
            2 => {
                let (result, flags) = alu::sub8(self.regs.a, value, 0);
                self.regs.a = result;
                self.regs.f = flags;
            }
            3 => {
                let (result, flags) = alu::sub8(self.regs.a, value, carry);
                self.regs.a = result;
                self.regs.f = flags;
            }
            4 => {
                self.regs.a &= value;
                self.regs.f = alu::sz53p(self.regs.a) | flag::H;
            }
            5 => {
                self.regs.a ^= value;
                self.regs.f = alu::sz53p(self.regs.a);
            }
            6 => {
                self.regs.a |= value;
                self.regs.f = alu::sz53p(self.regs.a);
            }
            _ => {
                // CP: flags from the subtraction, Y/X from the operand.
                let (_, flags) = alu::sub8(self.regs.a, value, 0);
                self.regs.f = (flags & !(flag::Y | flag::X)) | (value & (flag::Y | flag::X));
            }
        }
    }

    fn queue_indexed_read(&mut self) {
        if self.prefix == IndexPrefix::None {
            self.addr = self.regs.hl();
            self.push_op(MicroOp::ReadLow);
        } else {
            self.push_op(MicroOp::ReadDisplacement);
            self.push_op(MicroOp::Internal(5));
            self.push_op(MicroOp::ReadLow);
        }
    }

    fn queue_indexed_write(&mut self) {
        if self.prefix == IndexPrefix::None {
            self.addr = self.regs.hl();
            self.push_op(MicroOp::Write);
        } else {
            self.push_op(MicroOp::ReadDisplacement);
            self.push_op(MicroOp::Internal(5));
            self.push_op(MicroOp::Write);
        }
    }

    //
    // Decode: main table.
    //

    fn decode_main(&mut self, opcode: u8) {
        let x = opcode >> 6;
        let y = (opcode >> 3) & 7;
        let z = opcode & 7;

        match x {
            0 => self.decode_x0(opcode, y, z),
            1 => {
                if opcode == 0x76 {
                    self.halted = true;
                    return;
                }
                if z == 6 {
                    // LD r, (HL)/(IX+d).
                    self.queue_indexed_read();
                    self.followup = Some(Followup::Main);
                } else if y == 6 {
                    // LD (HL)/(IX+d), r — plain H/L even under a prefix.
                    self.data = self.reg8(z, false);
                    self.queue_indexed_write();
                } else {
                    let value = self.reg8(z, true);
                    self.set_reg8(y, value, true);
                }
            }
            2 => {
                if z == 6 {
                    self.queue_indexed_read();
                    self.followup = Some(Followup::Main);
                } else {
                    let value = self.reg8(z, true);
                    self.alu_a(y, value);
                }
            }
            _ => self.decode_x3(opcode, y, z),
        }
    }

    fn decode_x0(&mut self, opcode: u8, y: u8, z: u8) {
        match z {
            0 => match y {
                0 => {}
                1 => {
                    // EX AF, AF'.
                    core::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                    core::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
                }
                2 => {
                    // DJNZ d.
                    self.push_op(MicroOp::Internal(1));
                    self.push_op(MicroOp::ReadDisplacement);
                    self.followup = Some(Followup::Main);
                }
                _ => {
                    // JR d / JR cc, d.
                    self.push_op(MicroOp::ReadDisplacement);
                    self.followup = Some(Followup::Main);
                }
            },
            1 => {
                if opcode & 8 == 0 {
                    // LD rp, nn.
                    self.push_op(MicroOp::ReadImmLow);
                    self.push_op(MicroOp::ReadImmHigh);
                    self.followup = Some(Followup::Main);
                } else {
                    // ADD HL, rp.
                    self.push_op(MicroOp::Internal(7));
                    let lhs = self.index_pair();
                    let rhs = self.reg16(y >> 1);
                    self.regs.memptr = lhs.wrapping_add(1);
                    let (result, flags) = alu::add16(lhs, rhs);
                    self.set_index_pair(result);
                    self.regs.f = (self.regs.f & (flag::S | flag::Z | flag::PV)) | flags;
                }
            }
            2 => match y {
                0 | 2 => {
                    // LD (BC)/(DE), A.
                    self.addr = if y == 0 { self.regs.bc() } else { self.regs.de() };
                    self.data = self.regs.a;
                    self.regs.memptr =
                        (u16::from(self.regs.a) << 8) | (self.addr.wrapping_add(1) & 0xFF);
                    self.push_op(MicroOp::Write);
                }
                1 | 3 => {
                    // LD A, (BC)/(DE).
                    self.addr = if y == 1 { self.regs.bc() } else { self.regs.de() };
                    self.regs.memptr = self.addr.wrapping_add(1);
                    self.push_op(MicroOp::ReadLow);
                    self.followup = Some(Followup::LoadA);
                }
                _ => {
                    // LD (nn),HL / LD HL,(nn) / LD (nn),A / LD A,(nn).
                    self.push_op(MicroOp::ReadImmLow);
                    self.push_op(MicroOp::ReadImmHigh);
                    self.followup = Some(Followup::Main);
                }
            },
            3 => {
                // INC/DEC rp.
                self.push_op(MicroOp::Internal(2));
                let index = y >> 1;
                let value = self.reg16(index);
                let value = if opcode & 8 == 0 {
                    value.wrapping_add(1)
                } else {
                    value.wrapping_sub(1)
                };
                self.set_reg16(index, value);
            }
            4 | 5 => {
                if y == 6 {
                    // INC/DEC (HL)/(IX+d).
                    self.queue_indexed_read();
                    self.followup = Some(Followup::Main);
                } else {
                    let value = self.reg8(y, true);
                    let (result, flags) = if z == 4 {
                        alu::inc8(value)
                    } else {
                        alu::dec8(value)
                    };
                    self.set_reg8(y, result, true);
                    self.regs.f = (self.regs.f & flag::C) | flags;
                }
            }
            6 => {
                // LD r/(HL)/(IX+d), n.
                if y == 6 && self.prefix != IndexPrefix::None {
                    self.push_op(MicroOp::ReadDisplacement);
                    self.push_op(MicroOp::ReadImmLow);
                    self.push_op(MicroOp::Internal(2));
                } else {
                    self.push_op(MicroOp::ReadImmLow);
                }
                self.followup = Some(Followup::Main);
            }
            _ => self.decode_accumulator_misc(y),
        }
    }

    fn decode_accumulator_misc(&mut self, y: u8) {
        let keep = self.regs.f & (flag::S | flag::Z | flag::PV);
        match y {
            0 => {
                // RLCA.
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a.rotate_left(1);
                self.regs.f = keep | (self.regs.a & (flag::Y | flag::X)) | carry;
            }
            1 => {
                // RRCA.
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a.rotate_right(1);
                self.regs.f = keep | (self.regs.a & (flag::Y | flag::X)) | carry;
            }
            2 => {
                // RLA.
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | (self.regs.f & flag::C);
                self.regs.f = keep | (self.regs.a & (flag::Y | flag::X)) | carry;
            }
            3 => {
                // RRA.
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | ((self.regs.f & flag::C) << 7);
                self.regs.f = keep | (self.regs.a & (flag::Y | flag::X)) | carry;
            }
            4 => {
                let (result, flags) = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = result;
                self.regs.f = flags;
            }
            5 => {
                // CPL.
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (flag::S | flag::Z | flag::PV | flag::C))
                    | flag::H
                    | flag::N
                    | (self.regs.a & (flag::Y | flag::X));
            }
            6 => {
                // SCF.
                self.regs.f = (self.regs.f & (flag::S | flag::Z | flag::PV))
                    | flag::C
                    | (self.regs.a & (flag::Y | flag::X));
            }
            _ => {
                // CCF: H takes the old carry.
                let old_carry = self.regs.f & flag::C;
                self.regs.f = (self.regs.f & (flag::S | flag::Z | flag::PV))
                    | (old_carry << 4)
                    | (self.regs.a & (flag::Y | flag::X))
                    | (old_carry ^ flag::C);
            }
        }
    }

    fn decode_x3(&mut self, opcode: u8, y: u8, z: u8) {
        match z {
            0 => {
                // RET cc.
                self.push_op(MicroOp::Internal(1));
                if self.condition(y) {
                    self.push_op(MicroOp::PopLow);
                    self.push_op(MicroOp::PopHigh);
                    self.followup = Some(Followup::Main);
                }
            }
            1 => {
                if opcode & 8 == 0 {
                    // POP rp2.
                    self.push_op(MicroOp::PopLow);
                    self.push_op(MicroOp::PopHigh);
                    self.followup = Some(Followup::Main);
                } else {
                    match y >> 1 {
                        0 => {
                            // RET.
                            self.push_op(MicroOp::PopLow);
                            self.push_op(MicroOp::PopHigh);
                            self.followup = Some(Followup::Main);
                        }
                        1 => {
                            // EXX.
                            core::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                            core::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                            core::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                            core::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                            core::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                            core::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
                        }
                        2 => self.regs.pc = self.index_pair(), // JP (HL)
                        _ => {
                            // LD SP, HL.
                            self.push_op(MicroOp::Internal(2));
                            self.regs.sp = self.index_pair();
                        }
                    }
                }
            }
            2 => {
                // JP cc, nn.
                self.push_op(MicroOp::ReadImmLow);
                self.push_op(MicroOp::ReadImmHigh);
                self.followup = Some(Followup::Main);
            }
            3 => match y {
                0 => {
                    // JP nn.
                    self.push_op(MicroOp::ReadImmLow);
                    self.push_op(MicroOp::ReadImmHigh);
                    self.followup = Some(Followup::Main);
                }
                1 => {
                    // CB prefix; DDCB reads the displacement first.
                    self.sub_table = SubTable::Cb;
                    if self.prefix != IndexPrefix::None {
                        self.push_op(MicroOp::ReadDisplacement);
                    }
                    self.push_op(MicroOp::FetchSub);
                }
                2 => {
                    // OUT (n), A.
                    self.push_op(MicroOp::ReadImmLow);
                    self.followup = Some(Followup::Main);
                }
                3 => {
                    // IN A, (n).
                    self.push_op(MicroOp::ReadImmLow);
                    self.followup = Some(Followup::Main);
                }
                4 => {
                    // EX (SP), HL.
                    self.addr = self.regs.sp;
                    self.push_op(MicroOp::ReadLow);
                    self.push_op(MicroOp::ReadHigh);
                    self.push_op(MicroOp::Internal(1));
                    self.followup = Some(Followup::ExSpWrite);
                }
                5 => {
                    // EX DE, HL — unaffected by DD/FD.
                    let de = self.regs.de();
                    let hl = self.regs.hl();
                    self.regs.set_de(hl);
                    self.regs.set_hl(de);
                }
                6 => {
                    // DI.
                    self.regs.iff1 = false;
                    self.regs.iff2 = false;
                }
                _ => {
                    // EI: takes effect after the following instruction.
                    self.ei_pending = true;
                }
            },
            4 => {
                // CALL cc, nn.
                self.push_op(MicroOp::ReadImmLow);
                self.push_op(MicroOp::ReadImmHigh);
                self.followup = Some(Followup::Main);
            }
            5 => {
                if opcode & 8 == 0 {
                    // PUSH rp2.
                    self.push_op(MicroOp::Internal(1));
                    let value = match y >> 1 {
                        0 => self.regs.bc(),
                        1 => self.regs.de(),
                        2 => self.index_pair(),
                        _ => self.regs.af(),
                    };
                    self.data = value as u8;
                    self.data2 = (value >> 8) as u8;
                    self.push_op(MicroOp::PushHigh);
                    self.push_op(MicroOp::PushLow);
                } else {
                    match y >> 1 {
                        0 => {
                            // CALL nn.
                            self.push_op(MicroOp::ReadImmLow);
                            self.push_op(MicroOp::ReadImmHigh);
                            self.followup = Some(Followup::Main);
                        }
                        1 => {
                            // DD prefix.
                            self.prefix = IndexPrefix::Ix;
                            self.push_op(MicroOp::Fetch);
                        }
                        2 => {
                            // ED prefix.
                            self.sub_table = SubTable::Ed;
                            self.push_op(MicroOp::FetchSub);
                        }
                        _ => {
                            // FD prefix.
                            self.prefix = IndexPrefix::Iy;
                            self.push_op(MicroOp::Fetch);
                        }
                    }
                }
            }
            6 => {
                // ALU a, n.
                self.push_op(MicroOp::ReadImmLow);
                self.followup = Some(Followup::Main);
            }
            _ => {
                // RST y*8.
                self.push_op(MicroOp::Internal(1));
                self.data = self.regs.pc as u8;
                self.data2 = (self.regs.pc >> 8) as u8;
                self.push_op(MicroOp::PushHigh);
                self.push_op(MicroOp::PushLow);
                self.regs.pc = u16::from(y) * 8;
                self.regs.memptr = self.regs.pc;
            }
        }
    }

    //
    // Follow-ups.
    //

    fn run_followup(&mut self, followup: Followup) {
        match followup {
            Followup::Main => self.followup_main(),
            Followup::Cb => self.followup_cb(),
            Followup::InA | Followup::LoadA => self.regs.a = self.data,
            Followup::LoadIndexPair => {
                let value = (u16::from(self.data2) << 8) | u16::from(self.data);
                self.set_index_pair(value);
            }
            Followup::InReg(y) => {
                self.regs.f = (self.regs.f & flag::C) | alu::sz53p(self.data);
                if y != 6 {
                    self.set_reg8(y, self.data, false);
                }
            }
            Followup::EdPair(opcode) => self.ed_pair_address_ready(opcode),
            Followup::EdLoadPair(index) => {
                let value = (u16::from(self.data2) << 8) | u16::from(self.data);
                match index {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.regs.set_hl(value),
                    _ => self.regs.sp = value,
                }
            }
            Followup::EdRet => {
                self.regs.pc = (u16::from(self.data2) << 8) | u16::from(self.data);
                self.regs.memptr = self.regs.pc;
            }
            Followup::Rrd => {
                let memory = self.data;
                let a = self.regs.a;
                self.regs.a = (a & 0xF0) | (memory & 0x0F);
                self.data = (memory >> 4) | (a << 4);
                self.regs.f = (self.regs.f & flag::C) | alu::sz53p(self.regs.a);
                self.regs.memptr = self.regs.hl().wrapping_add(1);
                self.push_op(MicroOp::Write);
            }
            Followup::Rld => {
                let memory = self.data;
                let a = self.regs.a;
                self.regs.a = (a & 0xF0) | (memory >> 4);
                self.data = (memory << 4) | (a & 0x0F);
                self.regs.f = (self.regs.f & flag::C) | alu::sz53p(self.regs.a);
                self.regs.memptr = self.regs.hl().wrapping_add(1);
                self.push_op(MicroOp::Write);
            }
            Followup::EdBlock(opcode) => self.followup_ed_block(opcode),
            Followup::Im2Vector => {
                self.regs.pc = (u16::from(self.data2) << 8) | u16::from(self.data);
                self.regs.memptr = self.regs.pc;
            }
            Followup::ExSpWrite => {
                let old = (u16::from(self.data2) << 8) | u16::from(self.data);
                let pair = self.index_pair();
                self.data = pair as u8;
                self.data2 = (pair >> 8) as u8;
                self.set_index_pair(old);
                self.regs.memptr = old;
                self.push_op(MicroOp::WriteHigh);
                self.push_op(MicroOp::Write);
                self.push_op(MicroOp::Internal(2));
            }
        }
    }

    fn followup_main(&mut self) {
        let opcode = self.opcode;
        let x = opcode >> 6;
        let y = (opcode >> 3) & 7;
        let z = opcode & 7;

        match (x, z) {
            (0, 0) => {
                // DJNZ / JR / JR cc.
                let taken = match y {
                    2 => {
                        self.regs.b = self.regs.b.wrapping_sub(1);
                        self.regs.b != 0
                    }
                    3 => true,
                    _ => self.condition(y - 4),
                };
                if taken {
                    self.push_op(MicroOp::Internal(5));
                    self.regs.pc = self.regs.pc.wrapping_add(self.displacement as u16);
                    self.regs.memptr = self.regs.pc;
                }
            }
            (0, 1) => {
                // LD rp, nn.
                let value = (u16::from(self.data2) << 8) | u16::from(self.data);
                self.set_reg16(y >> 1, value);
            }
            (0, 2) => {
                // The (nn) forms, after the address bytes arrive.
                self.addr = (u16::from(self.data2) << 8) | u16::from(self.data);
                match y {
                    4 => {
                        // LD (nn), HL.
                        self.regs.memptr = self.addr.wrapping_add(1);
                        let pair = self.index_pair();
                        self.data = pair as u8;
                        self.data2 = (pair >> 8) as u8;
                        self.push_op(MicroOp::Write);
                        self.push_op(MicroOp::WriteHigh);
                    }
                    5 => {
                        // LD HL, (nn).
                        self.regs.memptr = self.addr.wrapping_add(1);
                        self.push_op(MicroOp::ReadLow);
                        self.push_op(MicroOp::ReadHigh);
                        self.followup = Some(Followup::LoadIndexPair);
                    }
                    6 => {
                        // LD (nn), A.
                        self.regs.memptr = (u16::from(self.regs.a) << 8)
                            | (self.addr.wrapping_add(1) & 0xFF);
                        self.data = self.regs.a;
                        self.push_op(MicroOp::Write);
                    }
                    _ => {
                        // LD A, (nn).
                        self.regs.memptr = self.addr.wrapping_add(1);
                        self.push_op(MicroOp::ReadLow);
                        self.followup = Some(Followup::LoadA);
                    }
                }
            }
            (0, 4 | 5) => {
                // INC/DEC (HL)/(IX+d): modify, then write back.
                self.addr = self.indexed_address();
                let (result, flags) = if z == 4 {
                    alu::inc8(self.data)
                } else {
                    alu::dec8(self.data)
                };
                self.data = result;
                self.regs.f = (self.regs.f & flag::C) | flags;
                self.push_op(MicroOp::Internal(1));
                self.push_op(MicroOp::Write);
            }
            (0, 6) => {
                // LD r/(HL)/(IX+d), n.
                if y == 6 {
                    self.addr = self.indexed_address();
                    self.push_op(MicroOp::Write);
                } else {
                    self.set_reg8(y, self.data, true);
                }
            }
            (1, _) => {
                // LD r, (HL)/(IX+d) — plain H/L even under a prefix.
                self.set_reg8(y, self.data, false);
            }
            (2, _) => self.alu_a(y, self.data),
            (3, 0 | 1) => {
                // RET / RET cc / POP rp2.
                let value = (u16::from(self.data2) << 8) | u16::from(self.data);
                if z == 1 && opcode & 8 == 0 {
                    match y >> 1 {
                        0 => self.regs.set_bc(value),
                        1 => self.regs.set_de(value),
                        2 => self.set_index_pair(value),
                        _ => self.regs.set_af(value),
                    }
                } else {
                    self.regs.pc = value;
                    self.regs.memptr = value;
                }
            }
            (3, 2) => {
                // JP cc, nn.
                let target = (u16::from(self.data2) << 8) | u16::from(self.data);
                self.regs.memptr = target;
                if self.condition(y) {
                    self.regs.pc = target;
                }
            }
            (3, 3) => match y {
                0 => {
                    // JP nn.
                    let target = (u16::from(self.data2) << 8) | u16::from(self.data);
                    self.regs.pc = target;
                    self.regs.memptr = target;
                }
                2 => {
                    // OUT (n), A.
                    self.addr = (u16::from(self.regs.a) << 8) | u16::from(self.data);
                    self.data = self.regs.a;
                    self.push_op(MicroOp::PortOut);
                }
                3 => {
                    // IN A, (n).
                    self.addr = (u16::from(self.regs.a) << 8) | u16::from(self.data);
                    self.push_op(MicroOp::PortIn);
                    self.followup = Some(Followup::InA);
                }
                _ => {}
            },
            (3, 4 | 5) => {
                // CALL cc,nn / CALL nn.
                let taken = z == 5 || self.condition(y);
                let target = (u16::from(self.data2) << 8) | u16::from(self.data);
                self.regs.memptr = target;
                if taken {
                    self.push_op(MicroOp::Internal(1));
                    self.data = self.regs.pc as u8;
                    self.data2 = (self.regs.pc >> 8) as u8;
                    self.push_op(MicroOp::PushHigh);
                    self.push_op(MicroOp::PushLow);
                    self.regs.pc = target;
                } else {
                    self.phase = Phase::UntakenCondCall;
                }
            }
            (3, 6) => self.alu_a(y, self.data),
            _ => {}
        }
    }

    //
    // Decode: CB table.
    //

    fn decode_cb(&mut self) {
        let opcode = self.opcode;
        let x = opcode >> 6;
        let y = (opcode >> 3) & 7;
        let z = opcode & 7;

        // Under DD/FD every CB operation works on memory at (IX+d), with
        // the displacement already fetched.
        if z == 6 || self.prefix != IndexPrefix::None {
            self.addr = self.indexed_address();
            if self.prefix != IndexPrefix::None {
                self.push_op(MicroOp::Internal(2));
            }
            self.push_op(MicroOp::ReadLow);
            self.followup = Some(Followup::Cb);
            return;
        }

        let value = self.reg8(z, false);
        match x {
            0 => {
                let (result, flags) = self.rotate(y, value);
                self.set_reg8(z, result, false);
                self.regs.f = flags;
            }
            1 => self.bit_test(y, value, value),
            2 => self.set_reg8(z, value & !(1 << y), false),
            _ => self.set_reg8(z, value | (1 << y), false),
        }
    }

    fn followup_cb(&mut self) {
        let opcode = self.opcode;
        let x = opcode >> 6;
        let y = (opcode >> 3) & 7;
        let z = opcode & 7;
        let value = self.data;

        match x {
            0 => {
                let (result, flags) = self.rotate(y, value);
                self.regs.f = flags;
                self.write_cb_result(z, result);
            }
            1 => {
                // BIT: Y/X leak from the internal address latch for the
                // memory form.
                self.bit_test(y, value, (self.regs.memptr >> 8) as u8);
                self.push_op(MicroOp::Internal(1));
            }
            2 => self.write_cb_result(z, value & !(1 << y)),
            _ => self.write_cb_result(z, value | (1 << y)),
        }
    }

    /// Writes back a CB rotate/res/set result: to memory, and for the
    /// undocumented DD CB forms additionally to a register.
    fn write_cb_result(&mut self, z: u8, result: u8) {
        self.data = result;
        self.push_op(MicroOp::Internal(1));
        self.push_op(MicroOp::Write);
        if self.prefix != IndexPrefix::None && z != 6 {
            self.set_reg8(z, result, false);
        }
    }

    fn rotate(&mut self, operation: u8, value: u8) -> (u8, u8) {
        let carry_in = self.regs.f & flag::C;
        let (result, carry_out) = match operation {
            0 => (value.rotate_left(1), value >> 7),
            1 => (value.rotate_right(1), value & 1),
            2 => ((value << 1) | carry_in, value >> 7),
            3 => ((value >> 1) | (carry_in << 7), value & 1),
            4 => (value << 1, value >> 7),
            5 => ((value >> 1) | (value & 0x80), value & 1),
            6 => ((value << 1) | 1, value >> 7), // undocumented SLL
            _ => (value >> 1, value & 1),
        };
        (result, alu::sz53p(result) | carry_out)
    }

    fn bit_test(&mut self, bit: u8, value: u8, yx_source: u8) {
        let result = value & (1 << bit);
        let mut flags = (self.regs.f & flag::C) | flag::H | (yx_source & (flag::Y | flag::X));
        if result == 0 {
            flags |= flag::Z | flag::PV;
        }
        flags |= result & flag::S;
        self.regs.f = flags;
    }

    //
    // Decode: ED table.
    //

    fn decode_ed(&mut self) {
        let opcode = self.opcode;
        let x = opcode >> 6;
        let y = (opcode >> 3) & 7;
        let z = opcode & 7;

        if x == 1 {
            match z {
                0 => {
                    // IN r, (C).
                    self.addr = self.regs.bc();
                    self.regs.memptr = self.addr.wrapping_add(1);
                    self.push_op(MicroOp::PortIn);
                    self.followup = Some(Followup::InReg(y));
                }
                1 => {
                    // OUT (C), r; the undocumented y=6 form outputs zero.
                    self.addr = self.regs.bc();
                    self.regs.memptr = self.addr.wrapping_add(1);
                    self.data = if y == 6 { 0 } else { self.reg8(y, false) };
                    self.push_op(MicroOp::PortOut);
                }
                2 => {
                    // SBC/ADC HL, rp.
                    self.push_op(MicroOp::Internal(7));
                    let lhs = self.regs.hl();
                    let rhs = self.reg16(y >> 1);
                    self.regs.memptr = lhs.wrapping_add(1);
                    let carry = u8::from(self.regs.f & flag::C != 0);
                    let (result, flags) = if y & 1 == 0 {
                        alu::sbc16(lhs, rhs, carry)
                    } else {
                        alu::adc16(lhs, rhs, carry)
                    };
                    self.regs.set_hl(result);
                    self.regs.f = flags;
                }
                3 => {
                    // LD (nn), rp / LD rp, (nn).
                    self.push_op(MicroOp::ReadImmLow);
                    self.push_op(MicroOp::ReadImmHigh);
                    self.followup = Some(Followup::EdPair(opcode));
                }
                4 => {
                    // NEG.
                    let (result, flags) = alu::sub8(0, self.regs.a, 0);
                    self.regs.a = result;
                    self.regs.f = flags;
                }
                5 => {
                    // RETN/RETI: restore IFF1 from IFF2 and return.
                    self.regs.iff1 = self.regs.iff2;
                    self.push_op(MicroOp::PopLow);
                    self.push_op(MicroOp::PopHigh);
                    self.followup = Some(Followup::EdRet);
                }
                6 => {
                    self.regs.im = match y & 3 {
                        2 => 1,
                        3 => 2,
                        _ => 0,
                    };
                }
                _ => match y {
                    0 => {
                        self.push_op(MicroOp::Internal(1));
                        self.regs.i = self.regs.a;
                    }
                    1 => {
                        self.push_op(MicroOp::Internal(1));
                        self.regs.r = self.regs.a;
                    }
                    2 | 3 => {
                        // LD A, I / LD A, R: P/V mirrors IFF2.
                        self.push_op(MicroOp::Internal(1));
                        self.regs.a = if y == 2 { self.regs.i } else { self.regs.r };
                        self.regs.f = (self.regs.f & flag::C)
                            | (alu::sz53p(self.regs.a) & !flag::PV)
                            | if self.regs.iff2 { flag::PV } else { 0 };
                    }
                    4 | 5 => {
                        // RRD/RLD.
                        self.addr = self.regs.hl();
                        self.push_op(MicroOp::ReadLow);
                        self.push_op(MicroOp::Internal(4));
                        self.followup = Some(if y == 4 {
                            Followup::Rrd
                        } else {
                            Followup::Rld
                        });
                    }
                    _ => {}
                },
            }
            return;
        }

        if x == 2 && z <= 1 && y >= 4 {
            // The block transfers and compares.
            self.addr = self.regs.hl();
            self.push_op(MicroOp::ReadLow);
            self.followup = Some(Followup::EdBlock(opcode));
            return;
        }

        // Every other ED opcode is a two-byte NOP.
    }

    fn ed_pair_address_ready(&mut self, opcode: u8) {
        let y = (opcode >> 3) & 7;
        let index = y >> 1;
        self.addr = (u16::from(self.data2) << 8) | u16::from(self.data);
        self.regs.memptr = self.addr.wrapping_add(1);

        if y & 1 == 0 {
            // LD (nn), rp.
            let value = match index {
                0 => self.regs.bc(),
                1 => self.regs.de(),
                2 => self.regs.hl(),
                _ => self.regs.sp,
            };
            self.data = value as u8;
            self.data2 = (value >> 8) as u8;
            self.push_op(MicroOp::Write);
            self.push_op(MicroOp::WriteHigh);
        } else {
            self.push_op(MicroOp::ReadLow);
            self.push_op(MicroOp::ReadHigh);
            self.followup = Some(Followup::EdLoadPair(index));
        }
    }

    fn followup_ed_block(&mut self, opcode: u8) {
        let y = (opcode >> 3) & 7;
        let z = opcode & 7;
        let increments = y & 1 == 0;
        let repeats = y >= 6;

        if z == 0 {
            // LDI/LDD/LDIR/LDDR: move the byte to (DE).
            self.addr = self.regs.de();
            let bc = self.regs.bc().wrapping_sub(1);
            self.regs.set_bc(bc);

            let n = self.data.wrapping_add(self.regs.a);
            self.regs.f = (self.regs.f & (flag::S | flag::Z | flag::C))
                | (n & flag::X)
                | ((n << 4) & flag::Y)
                | if bc != 0 { flag::PV } else { 0 };

            if increments {
                self.regs.set_hl(self.regs.hl().wrapping_add(1));
                self.regs.set_de(self.regs.de().wrapping_add(1));
            } else {
                self.regs.set_hl(self.regs.hl().wrapping_sub(1));
                self.regs.set_de(self.regs.de().wrapping_sub(1));
            }

            self.push_op(MicroOp::Write);
            self.push_op(MicroOp::Internal(2));
            if repeats && bc != 0 {
                self.push_op(MicroOp::Internal(5));
                self.regs.pc = self.regs.pc.wrapping_sub(2);
                self.regs.memptr = self.regs.pc.wrapping_add(1);
            }
        } else {
            // CPI/CPD/CPIR/CPDR.
            let (_, partial) = alu::sub8(self.regs.a, self.data, 0);
            let bc = self.regs.bc().wrapping_sub(1);
            self.regs.set_bc(bc);

            let n = self
                .regs
                .a
                .wrapping_sub(self.data)
                .wrapping_sub(u8::from(partial & flag::H != 0));
            let flags = (partial & !(flag::Y | flag::X | flag::PV | flag::C))
                | (self.regs.f & flag::C)
                | (n & flag::X)
                | ((n << 4) & flag::Y)
                | if bc != 0 { flag::PV } else { 0 };
            self.regs.f = flags;

            if increments {
                self.regs.set_hl(self.regs.hl().wrapping_add(1));
                self.regs.memptr = self.regs.memptr.wrapping_add(1);
            } else {
                self.regs.set_hl(self.regs.hl().wrapping_sub(1));
                self.regs.memptr = self.regs.memptr.wrapping_sub(1);
            }

            self.push_op(MicroOp::Internal(5));
            let matched = flags & flag::Z != 0;
            if repeats && bc != 0 && !matched {
                self.push_op(MicroOp::Internal(5));
                self.regs.pc = self.regs.pc.wrapping_sub(2);
                self.regs.memptr = self.regs.pc.wrapping_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ram {
        memory: Vec<u8>,
        ports_out: Vec<(u16, u8)>,
        port_value: u8,
    }

    impl Ram {
        fn new(program: &[u8]) -> Self {
            let mut memory = vec![0; 0x10000];
            memory[..program.len()].copy_from_slice(program);
            Self {
                memory,
                ports_out: Vec::new(),
                port_value: 0xFF,
            }
        }
    }

    impl Bus for Ram {
        fn read(&mut self, address: u16) -> u8 {
            self.memory[address as usize]
        }
        fn write(&mut self, address: u16, value: u8) {
            self.memory[address as usize] = value;
        }
        fn port_in(&mut self, _port: u16) -> u8 {
            self.port_value
        }
        fn port_out(&mut self, port: u16, value: u8) {
            self.ports_out.push((port, value));
        }
        fn irq_ack(&mut self) -> u8 {
            0x40
        }
    }

    fn run(cpu: &mut Z80, bus: &mut Ram, t_states: i64) {
        cpu.run_for(Cycles::new(t_states), bus);
    }

    #[test]
    fn ld_and_alu_basics() {
        // LD A,$21; LD B,$21; ADD A,B; LD ($4000),A
        let mut bus = Ram::new(&[0x3E, 0x21, 0x06, 0x21, 0x80, 0x32, 0x00, 0x40]);
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 7 + 7 + 4 + 13);
        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(bus.memory[0x4000], 0x42);
        assert_eq!(cpu.regs.pc, 8);
    }

    #[test]
    fn instruction_timings_match_documentation() {
        // LD BC,$1234 is 10 T-states: confirm the PC hasn't advanced past
        // it one T early.
        let mut bus = Ram::new(&[0x01, 0x34, 0x12, 0x00]);
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 9);
        assert_eq!(cpu.regs.bc(), 0); // still mid-instruction
        run(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.regs.bc(), 0x1234);
    }

    #[test]
    fn halt_spins_at_same_pc_until_interrupt() {
        // EI; HALT; then an IM1 handler at $38 does INC A; RETI-ish loop.
        let mut bus = Ram::new(&[0xFB, 0x76]);
        bus.memory[0x0038] = 0x3C; // INC A
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 4 + 4 + 40);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc, 2);

        cpu.set_irq_line(true);
        // 13 T acknowledge plus the INC A.
        run(&mut cpu, &mut bus, 13);
        cpu.set_irq_line(false);
        assert!(!cpu.is_halted());
        assert_eq!(cpu.regs.pc, 0x38);
        // The pushed return address is the byte after HALT.
        assert_eq!(bus.memory[0xFFFF], 0x00);
        assert_eq!(bus.memory[0xFFFE], 0x02);

        run(&mut cpu, &mut bus, 4);
        assert_eq!(cpu.regs.a, 1);
    }

    #[test]
    fn nmi_is_edge_triggered_and_ignores_iff1() {
        let mut bus = Ram::new(&[0x00, 0x00, 0x00]);
        bus.memory[0x0066] = 0x00;
        let mut cpu = Z80::new();
        // Interrupts disabled; NMI must still fire.
        cpu.set_nmi_line(true);

        run(&mut cpu, &mut bus, 11);
        assert_eq!(cpu.regs.pc, 0x66);

        // Line held high: no second acknowledge.
        run(&mut cpu, &mut bus, 4);
        assert_eq!(cpu.regs.pc, 0x67);
    }

    #[test]
    fn im2_fetches_vector_from_table() {
        let mut bus = Ram::new(&[0xFB, 0x00, 0x00]); // EI; NOP; NOP
        let mut cpu = Z80::new();
        cpu.regs.i = 0x20;
        cpu.regs.im = 2;
        // Vector table at $2040 (irq_ack returns $40).
        bus.memory[0x2040] = 0x00;
        bus.memory[0x2041] = 0x50;

        run(&mut cpu, &mut bus, 8); // EI + NOP
        cpu.set_irq_line(true);
        run(&mut cpu, &mut bus, 4 + 19); // NOP + IM2 acknowledge
        assert_eq!(cpu.regs.pc, 0x5000);
        assert!(!cpu.regs.iff1);
    }

    #[test]
    fn ei_delays_interrupt_by_one_instruction() {
        let mut bus = Ram::new(&[0xFB, 0x3C, 0x3C]); // EI; INC A; INC A
        bus.memory[0x0038] = 0x00;
        let mut cpu = Z80::new();
        cpu.set_irq_line(true);

        // EI executes, then exactly one instruction must run before the
        // interrupt is accepted.
        run(&mut cpu, &mut bus, 4 + 4);
        assert_eq!(cpu.regs.a, 1);
        run(&mut cpu, &mut bus, 13);
        assert_eq!(cpu.regs.pc, 0x38);
        assert_eq!(cpu.regs.a, 1);
    }

    #[test]
    fn indexed_loads_use_displacement() {
        // LD IX,$4000; LD (IX+5),$77; LD A,(IX+5)
        let mut bus = Ram::new(&[
            0xDD, 0x21, 0x00, 0x40, // LD IX,$4000
            0xDD, 0x36, 0x05, 0x77, // LD (IX+5),$77
            0xDD, 0x7E, 0x05, // LD A,(IX+5)
        ]);
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 14 + 19 + 19);
        assert_eq!(bus.memory[0x4005], 0x77);
        assert_eq!(cpu.regs.a, 0x77);
    }

    #[test]
    fn cb_bit_and_set_work_on_registers_and_memory() {
        // LD HL,$4000; SET 3,(HL); BIT 3,(HL); LD B,(HL)
        let mut bus = Ram::new(&[
            0x21, 0x00, 0x40, // LD HL,$4000
            0xCB, 0xDE, // SET 3,(HL)
            0xCB, 0x5E, // BIT 3,(HL)
            0x46, // LD B,(HL)
        ]);
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 10 + 15 + 12 + 7);
        assert_eq!(bus.memory[0x4000], 0x08);
        assert_eq!(cpu.regs.b, 0x08);
        assert_eq!(cpu.regs.f & flag::Z, 0); // bit was set
    }

    #[test]
    fn ldir_copies_and_repeats() {
        // LD HL,$1000; LD DE,$2000; LD BC,$0003; LDIR
        let mut bus = Ram::new(&[
            0x21, 0x00, 0x10, 0x11, 0x00, 0x20, 0x01, 0x03, 0x00, 0xED, 0xB0,
        ]);
        bus.memory[0x1000] = 0xAA;
        bus.memory[0x1001] = 0xBB;
        bus.memory[0x1002] = 0xCC;
        let mut cpu = Z80::new();

        // Three loads at 10 each; LDIR is 21+21+16.
        run(&mut cpu, &mut bus, 30 + 21 + 21 + 16);
        assert_eq!(&bus.memory[0x2000..0x2003], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(cpu.regs.bc(), 0);
        assert_eq!(cpu.regs.hl(), 0x1003);
        assert_eq!(cpu.regs.de(), 0x2003);
        assert_eq!(cpu.regs.pc, 11);
    }

    #[test]
    fn call_and_ret_with_conditions() {
        // CALL $0010; ... at $0010: RET NZ (taken, Z clear after XOR? no —
        // use OR A with A=1).
        let mut bus = Ram::new(&[0x3E, 0x01, 0xB7, 0xCD, 0x10, 0x00]);
        bus.memory[0x0010] = 0xC0; // RET NZ
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 7 + 4 + 17 + 11);
        assert_eq!(cpu.regs.pc, 6);
        assert_eq!(cpu.regs.sp, 0);
    }

    #[test]
    fn out_reaches_the_port_bus() {
        // LD A,$FE; OUT ($FE),A
        let mut bus = Ram::new(&[0x3E, 0xFE, 0xD3, 0xFE]);
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 7 + 11);
        assert_eq!(bus.ports_out, [(0xFEFE, 0xFE)]);
    }

    #[test]
    fn ex_sp_hl_swaps_through_memory() {
        // LD HL,$1234; LD SP,$8000; EX (SP),HL
        let mut bus = Ram::new(&[0x21, 0x34, 0x12, 0x31, 0x00, 0x80, 0xE3]);
        bus.memory[0x8000] = 0x78;
        bus.memory[0x8001] = 0x56;
        let mut cpu = Z80::new();

        run(&mut cpu, &mut bus, 10 + 10 + 19);
        assert_eq!(cpu.regs.hl(), 0x5678);
        assert_eq!(bus.memory[0x8000], 0x34);
        assert_eq!(bus.memory[0x8001], 0x12);
    }
}
