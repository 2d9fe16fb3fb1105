//! The register file, status flags and exception model.
//!
//! The 26-bit ARM keeps its status bits in R15, so the register file and
//! flags are one structure: R15 reads compose the PSR bits over the
//! program counter, and flag state is held in the lazy representation the
//! condition tests want rather than as packed bits.

use crate::decoder::Condition;

/// PSR bit positions within a 26-bit R15 read.
pub mod condition_code {
    pub const NEGATIVE: u32 = 1 << 31;
    pub const ZERO: u32 = 1 << 30;
    pub const CARRY: u32 = 1 << 29;
    pub const OVERFLOW: u32 = 1 << 28;
    pub const IRQ_DISABLE: u32 = 1 << 27;
    pub const FIQ_DISABLE: u32 = 1 << 26;
    pub const MODE: u32 = 0b11;

    /// The bits of R15 that are actually program counter.
    pub const ADDRESS: u32 = FIQ_DISABLE - MODE - 1;
}

/// Processor mode, from the bottom two bits of R15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    User = 0b00,
    Fiq = 0b01,
    Irq = 0b10,
    Supervisor = 0b11,
}

impl Mode {
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Mode::User,
            0b01 => Mode::Fiq,
            0b10 => Mode::Irq,
            _ => Mode::Supervisor,
        }
    }
}

/// The architectural exceptions, in descending priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Reset,
    DataAbort,
    Fiq,
    Irq,
    PrefetchAbort,
    Address,
    UndefinedInstruction,
    SoftwareInterrupt,
}

impl Exception {
    /// The hardware vector fetched after this exception.
    #[must_use]
    pub const fn vector(self) -> u32 {
        match self {
            Exception::Reset => 0x00,
            Exception::UndefinedInstruction => 0x04,
            Exception::SoftwareInterrupt => 0x08,
            Exception::PrefetchAbort => 0x0C,
            Exception::DataAbort => 0x10,
            Exception::Address => 0x14,
            Exception::Irq => 0x18,
            Exception::Fiq => 0x1C,
        }
    }

    /// The mode the processor arrives in.
    #[must_use]
    pub const fn arrival_mode(self) -> Mode {
        match self {
            Exception::Irq => Mode::Irq,
            Exception::Fiq => Mode::Fiq,
            _ => Mode::Supervisor,
        }
    }

    /// Offset added to the in-flight R15 when forming the return address
    /// saved to the new mode's R14.
    const fn return_offset(self) -> u32 {
        match self {
            // Raised mid-instruction, while R15 holds the address of the
            // instruction after the one executing: the documented return
            // points are +4 for these...
            Exception::UndefinedInstruction | Exception::SoftwareInterrupt => 0,
            // ...and +8 for aborts and address exceptions; IRQ/FIQ arrive at
            // an instruction boundary and save boundary+4.
            _ => 4,
        }
    }
}

/// The bank-aware register file plus status flags.
pub struct Registers {
    /// The registers visible in the current mode. `active[15]` holds the
    /// address of the instruction after the one currently executing; PSR
    /// bits are multiplexed in on read.
    active: [u32; 16],

    mode: Mode,

    // Banked copies. FIQ banks R8–R14; the other modes bank R13–R14 and
    // share R8–R12, whose non-FIQ values are stashed while FIQ is active.
    user_bank: [u32; 2],
    irq_bank: [u32; 2],
    svc_bank: [u32; 2],
    fiq_bank: [u32; 7],
    shared_r8_r12: [u32; 5],

    // Lazy flag state: Z is set iff `zero_result` is zero; N, C and V are
    // judged from bit 31 / truthiness as appropriate.
    zero_result: u32,
    negative_flag: u32,
    carry_flag: u32,
    overflow_flag: u32,
    interrupt_flags: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: [0; 16],
            mode: Mode::Supervisor,
            user_bank: [0; 2],
            irq_bank: [0; 2],
            svc_bank: [0; 2],
            fiq_bank: [0; 7],
            shared_r8_r12: [0; 5],
            zero_result: 1,
            negative_flag: 0,
            carry_flag: 0,
            overflow_flag: 0,
            interrupt_flags: condition_code::IRQ_DISABLE | condition_code::FIQ_DISABLE,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// A currently-visible register, by index. Index 15 returns the raw
    /// stored value; use `pc`/`pc_status` for architectural R15 reads.
    #[must_use]
    pub fn active(&self, index: u32) -> u32 {
        self.active[index as usize]
    }

    pub fn set_active(&mut self, index: u32, value: u32) {
        self.active[index as usize] = value;
    }

    /// Reads register `index` from the user bank if `user_bank` is set,
    /// otherwise from the active bank; this is the LDM/STM S-bit view.
    #[must_use]
    pub fn reg(&self, user_bank: bool, index: u32) -> u32 {
        let index = index as usize;
        if !user_bank || self.mode == Mode::User || index < 8 {
            return self.active[index];
        }
        match index {
            8..=12 => {
                if self.mode == Mode::Fiq {
                    self.shared_r8_r12[index - 8]
                } else {
                    self.active[index]
                }
            }
            13 | 14 => self.user_bank[index - 13],
            _ => self.active[index],
        }
    }

    pub fn set_reg(&mut self, user_bank: bool, index: u32, value: u32) {
        let index = index as usize;
        if !user_bank || self.mode == Mode::User || index < 8 {
            self.active[index] = value;
            return;
        }
        match index {
            8..=12 => {
                if self.mode == Mode::Fiq {
                    self.shared_r8_r12[index - 8] = value;
                } else {
                    self.active[index] = value;
                }
            }
            13 | 14 => self.user_bank[index - 13] = value,
            _ => self.active[index] = value,
        }
    }

    //
    // Flags.
    //

    /// Sets N and Z from `value`.
    pub fn set_nz(&mut self, value: u32) {
        self.zero_result = value;
        self.negative_flag = value;
    }

    /// Sets C if `value` is non-zero, clears it otherwise.
    pub fn set_c(&mut self, value: u32) {
        self.carry_flag = value;
    }

    /// 1 if carry is set, 0 otherwise.
    #[must_use]
    pub fn c(&self) -> u32 {
        u32::from(self.carry_flag != 0)
    }

    /// Sets V from bit 31 of `value`.
    pub fn set_v(&mut self, value: u32) {
        self.overflow_flag = value;
    }

    #[must_use]
    pub fn irq_disabled(&self) -> bool {
        self.interrupt_flags & condition_code::IRQ_DISABLE != 0
    }

    #[must_use]
    pub fn fiq_disabled(&self) -> bool {
        self.interrupt_flags & condition_code::FIQ_DISABLE != 0
    }

    //
    // R15 views.
    //

    /// The full R15: PC plus PSR bits, as ARM software observes when R15
    /// appears in an Rm position.
    #[must_use]
    pub fn pc_status(&self, offset: u32) -> u32 {
        (self.mode as u32)
            | (self.active[15].wrapping_add(offset) & condition_code::ADDRESS)
            | (self.negative_flag & condition_code::NEGATIVE)
            | (if self.zero_result == 0 {
                condition_code::ZERO
            } else {
                0
            })
            | (if self.carry_flag != 0 {
                condition_code::CARRY
            } else {
                0
            })
            | ((self.overflow_flag >> 3) & condition_code::OVERFLOW)
            | self.interrupt_flags
    }

    /// The PC alone, with PSR bits as zeroes: the Rn/Rs view of R15.
    #[must_use]
    pub fn pc(&self, offset: u32) -> u32 {
        self.active[15].wrapping_add(offset) & condition_code::ADDRESS
    }

    /// Stores a new PC, stripping status bits.
    pub fn set_pc(&mut self, value: u32) {
        self.active[15] = value & condition_code::ADDRESS;
    }

    /// Applies a value written to R15 as status: N, Z, C and V always; in
    /// non-user modes the I, F and mode bits are also accepted.
    pub fn set_status(&mut self, status: u32) {
        self.negative_flag = status;
        self.zero_result = !status & condition_code::ZERO;
        self.carry_flag = status & condition_code::CARRY;
        self.overflow_flag = status << 3;

        if self.mode != Mode::User {
            self.interrupt_flags =
                status & (condition_code::IRQ_DISABLE | condition_code::FIQ_DISABLE);
            self.set_mode(Mode::from_bits(status));
        }
    }

    /// Switches processor mode, performing the register bank swaps.
    pub fn set_mode(&mut self, new_mode: Mode) {
        if new_mode == self.mode {
            return;
        }

        // Retire the active bank.
        match self.mode {
            Mode::Fiq => {
                self.fiq_bank.copy_from_slice(&self.active[8..15]);
                let shared = self.shared_r8_r12;
                self.active[8..13].copy_from_slice(&shared);
            }
            Mode::User => self.user_bank.copy_from_slice(&self.active[13..15]),
            Mode::Irq => self.irq_bank.copy_from_slice(&self.active[13..15]),
            Mode::Supervisor => self.svc_bank.copy_from_slice(&self.active[13..15]),
        }

        // Install the incoming bank.
        match new_mode {
            Mode::Fiq => {
                let mut shared = [0; 5];
                shared.copy_from_slice(&self.active[8..13]);
                self.shared_r8_r12 = shared;
                let fiq = self.fiq_bank;
                self.active[8..15].copy_from_slice(&fiq);
            }
            Mode::User => self.active[13..15].copy_from_slice(&self.user_bank),
            Mode::Irq => self.active[13..15].copy_from_slice(&self.irq_bank),
            Mode::Supervisor => self.active[13..15].copy_from_slice(&self.svc_bank),
        }

        self.mode = new_mode;
    }

    /// Takes `exception`: saves the return address plus PSR into the target
    /// mode's R14, disables IRQ (and FIQ where documented), and vectors.
    pub fn exception(&mut self, exception: Exception) {
        let return_address = self.pc_status(exception.return_offset());
        self.set_mode(exception.arrival_mode());
        self.active[14] = return_address;

        self.interrupt_flags |= condition_code::IRQ_DISABLE;
        if matches!(exception, Exception::Reset | Exception::Fiq) {
            self.interrupt_flags |= condition_code::FIQ_DISABLE;
        }

        self.set_pc(exception.vector());
    }

    /// Evaluates `condition` against the current flags.
    #[must_use]
    pub fn test(&self, condition: Condition) -> bool {
        let ne = self.zero_result != 0;
        let cs = self.carry_flag != 0;
        let mi = self.negative_flag & condition_code::NEGATIVE != 0;
        let vs = self.overflow_flag & condition_code::NEGATIVE != 0;
        let hi = cs && ne;
        let lt = ((self.negative_flag ^ self.overflow_flag) & condition_code::NEGATIVE) != 0;
        let le = !ne || lt;

        match condition {
            Condition::Eq => !ne,
            Condition::Ne => ne,
            Condition::Cs => cs,
            Condition::Cc => !cs,
            Condition::Mi => mi,
            Condition::Pl => !mi,
            Condition::Vs => vs,
            Condition::Vc => !vs,
            Condition::Hi => hi,
            Condition::Ls => !hi,
            Condition::Ge => !lt,
            Condition::Lt => lt,
            Condition::Gt => !le,
            Condition::Le => le,
            Condition::Al => true,
            Condition::Nv => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r15_composes_pc_and_psr() {
        let mut registers = Registers::new();
        registers.set_pc(0x8000);
        registers.set_nz(0x8000_0000); // negative, non-zero
        registers.set_c(1);

        let r15 = registers.pc_status(4);
        assert_eq!(r15 & condition_code::ADDRESS, 0x8004);
        assert_ne!(r15 & condition_code::NEGATIVE, 0);
        assert_eq!(r15 & condition_code::ZERO, 0);
        assert_ne!(r15 & condition_code::CARRY, 0);
        assert_eq!(r15 & condition_code::MODE, Mode::Supervisor as u32);
    }

    #[test]
    fn fiq_banks_r8_to_r14() {
        let mut registers = Registers::new();
        registers.set_mode(Mode::User);
        for index in 8..15 {
            registers.set_active(index, 0x100 + index);
        }

        registers.set_mode(Mode::Fiq);
        for index in 8..15 {
            registers.set_active(index, 0x200 + index);
        }
        // The user bank is still visible through the S-bit view.
        assert_eq!(registers.reg(true, 9), 0x109);
        assert_eq!(registers.reg(true, 13), 0x10D);

        registers.set_mode(Mode::User);
        for index in 8..15 {
            assert_eq!(registers.active(index), 0x100 + index);
        }

        registers.set_mode(Mode::Fiq);
        for index in 8..15 {
            assert_eq!(registers.active(index), 0x200 + index);
        }
    }

    #[test]
    fn irq_and_supervisor_bank_r13_r14_only() {
        let mut registers = Registers::new();
        registers.set_active(13, 0xAAAA);
        registers.set_active(12, 0x1234);

        registers.set_mode(Mode::Irq);
        registers.set_active(13, 0xBBBB);
        assert_eq!(registers.active(12), 0x1234); // shared

        registers.set_mode(Mode::Supervisor);
        assert_eq!(registers.active(13), 0xAAAA);
        registers.set_mode(Mode::Irq);
        assert_eq!(registers.active(13), 0xBBBB);
    }

    #[test]
    fn user_mode_status_writes_protect_control_bits() {
        let mut registers = Registers::new();
        registers.set_mode(Mode::User);
        registers.set_status(
            condition_code::NEGATIVE | condition_code::IRQ_DISABLE | Mode::Supervisor as u32,
        );
        // N took; I and mode did not.
        assert!(registers.test(Condition::Mi));
        assert_eq!(registers.mode(), Mode::User);
        assert!(!registers.irq_disabled());
    }

    #[test]
    fn exception_saves_return_and_disables_irq() {
        let mut registers = Registers::new();
        registers.set_mode(Mode::User);
        registers.set_pc(0x1004); // instruction at 0x1000 executing

        registers.exception(Exception::SoftwareInterrupt);
        assert_eq!(registers.mode(), Mode::Supervisor);
        assert_eq!(registers.active(14) & condition_code::ADDRESS, 0x1004);
        assert_eq!(
            registers.active(14) & condition_code::MODE,
            Mode::User as u32
        );
        assert!(registers.irq_disabled());
        assert!(!registers.fiq_disabled());
        assert_eq!(registers.pc(0), Exception::SoftwareInterrupt.vector());
    }

    #[test]
    fn fiq_exception_also_disables_fiq() {
        let mut registers = Registers::new();
        registers.set_status(0); // enable both, user? no: mode bits 0 => User
        registers.exception(Exception::Fiq);
        assert!(registers.irq_disabled());
        assert!(registers.fiq_disabled());
        assert_eq!(registers.mode(), Mode::Fiq);
    }

    #[test]
    fn condition_tests_follow_flags() {
        let mut registers = Registers::new();
        registers.set_nz(0); // zero
        assert!(registers.test(Condition::Eq));
        assert!(!registers.test(Condition::Ne));

        registers.set_nz(0x8000_0000);
        registers.set_v(0);
        assert!(registers.test(Condition::Mi));
        assert!(registers.test(Condition::Lt)); // N != V
        assert!(!registers.test(Condition::Ge));

        registers.set_v(0x8000_0000);
        assert!(registers.test(Condition::Ge)); // N == V
        assert!(!registers.test(Condition::Nv));
        assert!(registers.test(Condition::Al));
    }
}
