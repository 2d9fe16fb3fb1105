//! Instruction execution.

use crate::barrel_shifter::{ShiftType, shift};
use crate::decoder::{
    BlockDataTransfer, Branch, DataProcessing, DataProcessingOperation, Multiply,
    SingleDataTransfer, SoftwareInterrupt, decode,
};
use crate::registers::{Exception, Mode, Registers};
use crate::{Model, Operation};

/// The memory system as the processor sees it.
///
/// `mode` and `trans` describe the privilege of the access: `trans` is the
/// /TRANS pin, asserted for user-mode accesses and for post-indexed
/// transfers with forced address translation. A read returning `None` or a
/// write returning `false` is a bus abort: the executor raises the data
/// abort exception and honours the documented rollback rules.
pub trait Bus {
    fn read_word(&mut self, address: u32, mode: Mode, trans: bool) -> Option<u32>;
    fn read_byte(&mut self, address: u32, mode: Mode, trans: bool) -> Option<u8>;
    fn write_word(&mut self, address: u32, value: u32, mode: Mode, trans: bool) -> bool;
    fn write_byte(&mut self, address: u32, value: u8, mode: Mode, trans: bool) -> bool;
}

/// Receiver of control-flow notifications.
///
/// Handlers observe; they must not mutate CPU state from a callback.
pub trait ControlFlowHandler {
    /// A potential pipeline-affecting status change occurred: processor
    /// mode or interrupt flags.
    fn did_set_status(&mut self) {}

    /// The PC was changed non-sequentially.
    fn did_set_pc(&mut self) {}

    /// An SWI is about to be taken. Returning `false` suppresses the
    /// exception, letting a host substitute a high-level reimplementation
    /// of the service call; execution then continues at the next
    /// instruction.
    fn should_swi(&mut self, comment: u32) -> bool {
        let _ = comment;
        true
    }
}

/// The do-nothing handler.
#[derive(Default)]
pub struct NullControlFlowHandler;

impl ControlFlowHandler for NullControlFlowHandler {}

/// The shift control bits shared by the data-processing and single-transfer
/// forms.
trait ShiftOperand {
    fn operand2(&self) -> u32;
    fn shift_type(&self) -> ShiftType;
    fn shift_count_is_register(&self) -> bool;
    fn shift_register(&self) -> u32;
    fn shift_amount(&self) -> u32;
}

macro_rules! impl_shift_operand {
    ($($t:ty),+) => {$(
        impl ShiftOperand for $t {
            fn operand2(&self) -> u32 {
                <$t>::operand2(*self)
            }
            fn shift_type(&self) -> ShiftType {
                <$t>::shift_type(*self)
            }
            fn shift_count_is_register(&self) -> bool {
                <$t>::shift_count_is_register(*self)
            }
            fn shift_register(&self) -> u32 {
                <$t>::shift_register(*self)
            }
            fn shift_amount(&self) -> u32 {
                <$t>::shift_amount(*self)
            }
        }
    )+};
}

impl_shift_operand!(DataProcessing, SingleDataTransfer);

fn carried_out_add(lhs: u32, rhs: u32, result: u32) -> bool {
    ((lhs & rhs) | ((lhs | rhs) & !result)) & 0x8000_0000 != 0
}

fn borrowed_sub(lhs: u32, rhs: u32, result: u32) -> bool {
    ((!lhs & rhs) | ((!lhs | rhs) & result)) & 0x8000_0000 != 0
}

fn overflowed_add(lhs: u32, rhs: u32, result: u32) -> bool {
    (!(lhs ^ rhs) & (lhs ^ result)) & 0x8000_0000 != 0
}

fn overflowed_sub(lhs: u32, rhs: u32, result: u32) -> bool {
    ((lhs ^ rhs) & (lhs ^ result)) & 0x8000_0000 != 0
}

/// Applies decoded instructions immediately against a [`Bus`], maintaining
/// the register file and exception state.
///
/// `registers.active(15)` holds the address of the instruction after the
/// one currently executing, so documented R15 reads of +8/+12 appear here
/// as `pc(4)`/`pc(8)`.
pub struct Executor<B: Bus, H: ControlFlowHandler = NullControlFlowHandler> {
    pub bus: B,
    handler: H,
    registers: Registers,
    model: Model,
    irq_line: bool,
    fiq_line: bool,
}

impl<B: Bus> Executor<B, NullControlFlowHandler> {
    pub fn new(model: Model, bus: B) -> Self {
        Self::with_handler(model, bus, NullControlFlowHandler)
    }
}

impl<B: Bus, H: ControlFlowHandler> Executor<B, H> {
    pub fn with_handler(model: Model, bus: B, handler: H) -> Self {
        Self {
            bus,
            handler,
            registers: Registers::new(),
            model,
            irq_line: false,
            fiq_line: false,
        }
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// The address of the instruction that should be fetched next.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.registers.pc(0)
    }

    /// External interrupt request line; level-sampled at instruction
    /// boundaries while the CPSR I bit is clear.
    pub fn set_irq_line(&mut self, asserted: bool) {
        self.irq_line = asserted;
    }

    /// External fast interrupt line.
    pub fn set_fiq_line(&mut self, asserted: bool) {
        self.fiq_line = asserted;
    }

    /// Asserts reset: vectors through `Reset` in supervisor mode with both
    /// interrupts disabled.
    pub fn reset(&mut self) {
        self.registers.exception(Exception::Reset);
        self.handler.did_set_pc();
    }

    /// Indicates that the fetch of the next instruction aborted.
    pub fn prefetch_abort(&mut self) {
        self.take_exception(Exception::PrefetchAbort);
    }

    /// Samples interrupt lines, then fetches and executes one instruction.
    pub fn step(&mut self) {
        if self.fiq_line && !self.registers.fiq_disabled() {
            self.take_exception(Exception::Fiq);
            return;
        }
        if self.irq_line && !self.registers.irq_disabled() {
            self.take_exception(Exception::Irq);
            return;
        }

        let fetch_address = self.registers.pc(0);
        let trans = self.registers.mode() == Mode::User;
        let Some(instruction) = self
            .bus
            .read_word(fetch_address, self.registers.mode(), trans)
        else {
            self.prefetch_abort();
            return;
        };
        self.execute(instruction);
    }

    /// Executes `instruction`, which should have been fetched from
    /// `self.pc()`.
    pub fn execute(&mut self, instruction: u32) {
        self.registers.set_pc(self.registers.pc(4));

        let (condition, operation) = decode(instruction);
        if !self.registers.test(condition) {
            return;
        }

        match operation {
            Operation::DataProcessing(fields) => self.perform_data_processing(fields),
            Operation::Multiply(fields) => self.perform_multiply(fields),
            Operation::SingleDataTransfer(fields) => self.perform_single_data_transfer(fields),
            Operation::BlockDataTransfer(fields) => self.perform_block_data_transfer(fields),
            Operation::Branch(fields) => self.perform_branch(fields),
            Operation::SoftwareInterrupt(swi) => self.software_interrupt(swi),
            // No coprocessors are attached.
            Operation::CoprocessorDataOperation
            | Operation::CoprocessorRegisterTransfer
            | Operation::CoprocessorDataTransfer
            | Operation::Undefined => self.take_exception(Exception::UndefinedInstruction),
        }
    }

    fn take_exception(&mut self, exception: Exception) {
        self.registers.exception(exception);
        self.handler.did_set_pc();
    }

    fn set_pc_notifying(&mut self, value: u32) {
        self.registers.set_pc(value);
        self.handler.did_set_pc();
    }

    fn set_status_notifying(&mut self, status: u32) {
        self.registers.set_status(status);
        self.handler.did_set_status();
    }

    fn is_invalid_address(&self, address: u32) -> bool {
        match self.model {
            Model::Armv2With32BitAddressing => false,
            Model::Armv2 => address >= 1 << 26,
        }
    }

    /// Resolves a shifted-register operand 2.
    ///
    /// When R15 appears as Rm it supplies PC plus PSR; as Rs, PC alone. The
    /// PC is 8 bytes ahead for instruction-specified shift amounts and 12
    /// bytes ahead for register-specified ones, passed here as `pc_offset`.
    fn decode_shift<T: ShiftOperand>(
        &mut self,
        fields: &T,
        allow_register_count: bool,
        rotate_carry: &mut u32,
        set_carry: bool,
        pc_offset: u32,
    ) -> u32 {
        let mut value = if fields.operand2() == 15 {
            self.registers.pc_status(pc_offset)
        } else {
            self.registers.active(fields.operand2())
        };

        if allow_register_count && fields.shift_count_is_register() {
            // The shift amount lives in the bottom byte of Rs.
            let amount = if fields.shift_register() == 15 {
                self.registers.pc(4)
            } else {
                self.registers.active(fields.shift_register())
            } & 0xFF;

            // Register-specified shift amounts of zero perform no shift at
            // all, rather than the immediate-zero special cases.
            if amount != 0 {
                shift(
                    fields.shift_type(),
                    &mut value,
                    amount,
                    rotate_carry,
                    set_carry,
                );
            }
        } else {
            shift(
                fields.shift_type(),
                &mut value,
                fields.shift_amount(),
                rotate_carry,
                set_carry,
            );
        }

        value
    }

    fn perform_data_processing(&mut self, fields: DataProcessing) {
        let flags = fields.flags();
        let operation = flags.operation();
        let shift_by_register = !flags.operand2_is_immediate() && fields.shift_count_is_register();
        let pc_offset = if shift_by_register { 8 } else { 4 };

        let operand1 = if fields.operand1() == 15 {
            self.registers.pc(pc_offset)
        } else {
            self.registers.active(fields.operand1())
        };

        let mut rotate_carry = self.registers.c();
        let shift_sets_carry = operation.is_logical() && flags.set_condition_codes();

        let operand2 = if flags.operand2_is_immediate() {
            let mut value = fields.immediate();
            shift(
                ShiftType::RotateRight,
                &mut value,
                fields.rotate(),
                &mut rotate_carry,
                shift_sets_carry,
            );
            value
        } else {
            self.decode_shift(&fields, true, &mut rotate_carry, shift_sets_carry, pc_offset)
        };

        let set_cc = flags.set_condition_codes();
        let mut destination_value = None;

        let conditions = match operation {
            DataProcessingOperation::And => {
                let result = operand1 & operand2;
                destination_value = Some(result);
                result
            }
            DataProcessingOperation::Eor => {
                let result = operand1 ^ operand2;
                destination_value = Some(result);
                result
            }
            DataProcessingOperation::Orr => {
                let result = operand1 | operand2;
                destination_value = Some(result);
                result
            }
            DataProcessingOperation::Bic => {
                let result = operand1 & !operand2;
                destination_value = Some(result);
                result
            }
            DataProcessingOperation::Mov => {
                destination_value = Some(operand2);
                operand2
            }
            DataProcessingOperation::Mvn => {
                destination_value = Some(!operand2);
                !operand2
            }
            DataProcessingOperation::Tst => operand1 & operand2,
            DataProcessingOperation::Teq => operand1 ^ operand2,

            DataProcessingOperation::Add
            | DataProcessingOperation::Adc
            | DataProcessingOperation::Cmn => {
                let mut result = operand1.wrapping_add(operand2);
                if operation == DataProcessingOperation::Adc {
                    result = result.wrapping_add(self.registers.c());
                }
                if set_cc {
                    self.registers
                        .set_c(u32::from(carried_out_add(operand1, operand2, result)));
                    self.registers.set_v(
                        if overflowed_add(operand1, operand2, result) {
                            0x8000_0000
                        } else {
                            0
                        },
                    );
                }
                if operation != DataProcessingOperation::Cmn {
                    destination_value = Some(result);
                }
                result
            }

            DataProcessingOperation::Sub
            | DataProcessingOperation::Sbc
            | DataProcessingOperation::Cmp => {
                let result = self.subtract(operand1, operand2, operation, set_cc);
                if operation != DataProcessingOperation::Cmp {
                    destination_value = Some(result);
                }
                result
            }
            DataProcessingOperation::Rsb | DataProcessingOperation::Rsc => {
                let result = self.subtract(operand2, operand1, operation, set_cc);
                destination_value = Some(result);
                result
            }
        };

        if let Some(result) = destination_value {
            if fields.destination() == 15 {
                self.set_pc_notifying(result);
            } else {
                self.registers.set_active(fields.destination(), result);
            }
        }

        if set_cc {
            // With Rd = R15 the PSR is overwritten by the corresponding
            // bits of the ALU result, even for the compare instructions.
            if fields.destination() == 15 {
                self.set_status_notifying(conditions);
            } else {
                self.registers.set_nz(conditions);
                if shift_sets_carry {
                    self.registers.set_c(rotate_carry);
                }
            }
        }
    }

    /// Shared subtraction path; `lhs - rhs`, with SBC/RSC folding in the
    /// carry. C is set to not-borrow.
    fn subtract(
        &mut self,
        lhs: u32,
        rhs: u32,
        operation: DataProcessingOperation,
        set_cc: bool,
    ) -> u32 {
        let mut result = lhs.wrapping_sub(rhs);
        if matches!(
            operation,
            DataProcessingOperation::Sbc | DataProcessingOperation::Rsc
        ) {
            result = result.wrapping_add(self.registers.c()).wrapping_sub(1);
        }

        if set_cc {
            self.registers
                .set_c(u32::from(!borrowed_sub(lhs, rhs, result)));
            self.registers.set_v(if overflowed_sub(lhs, rhs, result) {
                0x8000_0000
            } else {
                0
            });
        }
        result
    }

    fn perform_multiply(&mut self, fields: Multiply) {
        let flags = fields.flags();

        // R15 observations: Rs is PC alone at +8; Rm is PC+PSR at +8;
        // the accumulator sees PC+PSR at +12.
        let multiplicand = if fields.multiplicand() == 15 {
            self.registers.pc(4)
        } else {
            self.registers.active(fields.multiplicand())
        };
        let multiplier = if fields.multiplier() == 15 {
            self.registers.pc_status(4)
        } else {
            self.registers.active(fields.multiplier())
        };
        let accumulator = if flags.is_mla() {
            if fields.accumulator() == 15 {
                self.registers.pc_status(8)
            } else {
                self.registers.active(fields.accumulator())
            }
        } else {
            0
        };

        let result = multiplicand
            .wrapping_mul(multiplier)
            .wrapping_add(accumulator);

        if flags.set_condition_codes() {
            // V is unaffected; C is undefined.
            self.registers.set_nz(result);
        }

        // R15 is never a valid multiply destination.
        if fields.destination() != 15 {
            self.registers.set_active(fields.destination(), result);
        }
    }

    fn perform_branch(&mut self, fields: Branch) {
        if fields.flags().is_link() {
            let link = self.registers.pc_status(0);
            self.registers.set_active(14, link);
        }
        let target = self.registers.pc(4).wrapping_add(fields.offset());
        self.set_pc_notifying(target);
    }

    fn perform_single_data_transfer(&mut self, fields: SingleDataTransfer) {
        let flags = fields.flags();

        // Offset: immediate, or register passed through the barrel shifter
        // with an instruction-specified amount.
        let offset = if flags.offset_is_register() {
            // Register-specified shift amounts are unavailable in this form.
            let mut carry = self.registers.c();
            self.decode_shift(&fields, false, &mut carry, false, 4)
        } else {
            fields.immediate()
        };

        let base = if fields.base() == 15 {
            self.registers.pc(4)
        } else {
            self.registers.active(fields.base())
        };

        let offsetted_address = if flags.add_offset() {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };

        let address = if flags.pre_index() {
            offsetted_address
        } else {
            base
        };

        if self.is_invalid_address(address) {
            self.take_exception(Exception::Address);
            return;
        }

        // Post-indexed transfers always write back; the W bit then only
        // forces /TRANS low for the access.
        let should_write_back = !flags.pre_index() || flags.write_back_address();
        let mode = self.registers.mode();
        let trans = mode == Mode::User || (!flags.pre_index() && flags.write_back_address());

        if flags.is_load() {
            let value = if flags.transfer_byte() {
                match self.bus.read_byte(address, mode, trans) {
                    Some(byte) => u32::from(byte),
                    None => {
                        self.take_exception(Exception::DataAbort);
                        return;
                    }
                }
            } else {
                match self.bus.read_word(address, mode, trans) {
                    Some(mut word) => {
                        if self.model != Model::Armv2With32BitAddressing {
                            // An offset from a word boundary rotates the data
                            // so the addressed byte lands in bits 0–7.
                            word = word.rotate_right((address & 3) * 8);
                        }
                        word
                    }
                    None => {
                        self.take_exception(Exception::DataAbort);
                        return;
                    }
                }
            };

            // Write back happens before the bus value lands, so a load of
            // the base register keeps the loaded value.
            if should_write_back && fields.base() != fields.destination() {
                self.write_back(fields.base(), offsetted_address);
            }

            if fields.destination() == 15 {
                self.set_pc_notifying(value);
            } else {
                self.registers.set_active(fields.destination(), value);
            }
        } else {
            let source = if fields.destination() == 15 {
                self.registers.pc_status(8)
            } else {
                self.registers.active(fields.destination())
            };

            let did_write = if flags.transfer_byte() {
                self.bus.write_byte(address, source as u8, mode, trans)
            } else {
                self.bus.write_word(address, source, mode, trans)
            };

            if !did_write {
                self.take_exception(Exception::DataAbort);
                return;
            }

            if should_write_back {
                self.write_back(fields.base(), offsetted_address);
            }
        }
    }

    fn write_back(&mut self, base: u32, value: u32) {
        if base == 15 {
            self.set_pc_notifying(value);
        } else {
            self.registers.set_active(base, value);
        }
    }

    fn perform_block_data_transfer(&mut self, fields: BlockDataTransfer) {
        let flags = fields.flags();
        let is_ldm = flags.is_load();
        let list = fields.register_list();

        let base = fields.base();
        let initial_address = if base == 15 {
            self.registers.pc_status(4)
        } else {
            self.registers.active(base)
        };

        // The S bit transfers user-bank registers — unless this is an LDM
        // whose list includes R15, where it means "also load the PSR".
        let adopt_user_bank = flags.load_psr() && (!is_ldm || list & 0x8000 == 0);

        // Collect indices low to high; transfers always walk ascending
        // memory addresses regardless of direction bits.
        let mut indices = [0u32; 16];
        let mut total: u32 = 0;
        for index in 0..16 {
            if list & (1 << index) != 0 {
                indices[total as usize] = index;
                total += 1;
            }
        }

        // Write back applies unless the base is R15, or this is an LDM that
        // also loads the base.
        let mut write_back = base != 15 && flags.write_back_address();
        if is_ldm && list & (1 << base) != 0 {
            write_back = false;
        }

        let final_address = if flags.add_offset() {
            initial_address.wrapping_add(total * 4)
        } else {
            initial_address.wrapping_sub(total * 4)
        };

        // Writes run lowest address first; descending transfers start from
        // the bottom of the block.
        let mut address = if flags.add_offset() {
            initial_address
        } else {
            final_address
        };
        if flags.pre_index() == flags.add_offset() {
            address = address.wrapping_add(4);
        }

        // Write back is applied up front, even if an abort follows.
        if write_back {
            self.registers.set_active(base, final_address);
        }

        let mode = self.registers.mode();
        let trans = mode == Mode::User;
        let address_error = self.is_invalid_address(address);
        let mut accesses_succeeded = true;
        let mut loaded_pc = None;

        if is_ldm {
            // A data abort cancels the aborting load and rolls back the one
            // before it; the base register keeps its written-back value, or
            // its original one if write back was disabled.
            let mut last_replacement: Option<(u32, u32)> = None;

            for &index in &indices[..total as usize] {
                if accesses_succeeded {
                    match self.bus.read_word(address, mode, trans) {
                        Some(value) => {
                            if index == 15 {
                                loaded_pc = Some(value);
                            } else {
                                let replaced = self.registers.reg(adopt_user_bank, index);
                                self.registers.set_reg(adopt_user_bank, index, value);
                                last_replacement = Some((index, replaced));
                            }
                        }
                        None => {
                            accesses_succeeded = false;
                            if let Some((undo_index, undo_value)) = last_replacement.take() {
                                self.registers
                                    .set_reg(adopt_user_bank, undo_index, undo_value);
                            }
                            loaded_pc = None;
                            if base != 15 {
                                if write_back {
                                    self.registers.set_active(base, final_address);
                                } else {
                                    self.registers.set_active(base, initial_address);
                                }
                            }
                        }
                    }
                } else {
                    // Subsequent accesses still occur, for timing; values
                    // are discarded.
                    let _ = self.bus.read_word(address, mode, trans);
                }
                address = address.wrapping_add(4);
            }
        } else {
            let mut first = true;
            for &index in &indices[..total as usize] {
                let value = if index == 15 {
                    self.registers.pc_status(8)
                } else if first && index == base {
                    // The first-listed register, if it is the base, stores
                    // the unmodified base address.
                    initial_address
                } else {
                    self.registers.reg(adopt_user_bank, index)
                };
                first = false;

                if address_error {
                    // The memory manager is deemed responsible after an
                    // address error on STM; issue throwaway reads so cycle
                    // timing is preserved.
                    let _ = self.bus.read_word(address, mode, trans);
                } else {
                    accesses_succeeded &= self.bus.write_word(address, value, mode, trans);
                }
                address = address.wrapping_add(4);
            }
        }

        if address_error {
            self.take_exception(Exception::Address);
        } else if !accesses_succeeded {
            self.take_exception(Exception::DataAbort);
        } else if let Some(pc) = loaded_pc {
            self.set_pc_notifying(pc);
            if flags.load_psr() {
                self.set_status_notifying(pc);
            }
        }
    }

    fn software_interrupt(&mut self, swi: SoftwareInterrupt) {
        if self.handler.should_swi(swi.comment()) {
            self.take_exception(Exception::SoftwareInterrupt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::condition_code;

    /// 64 KB RAM bus with an optional aborting window.
    struct TestBus {
        ram: Vec<u8>,
        abort_from: u32,
        abort_to: u32,
        reject_user: bool,
    }

    impl TestBus {
        fn new() -> Self {
            Self {
                ram: vec![0; 0x10000],
                abort_from: u32::MAX,
                abort_to: u32::MAX,
                reject_user: false,
            }
        }

        fn aborts(&self, address: u32, trans: bool) -> bool {
            (address >= self.abort_from && address < self.abort_to)
                || (self.reject_user && trans)
        }

        fn poke_word(&mut self, address: u32, value: u32) {
            let address = (address as usize) & 0xFFFC;
            self.ram[address..address + 4].copy_from_slice(&value.to_le_bytes());
        }

        fn peek_word(&self, address: u32) -> u32 {
            let address = (address as usize) & 0xFFFC;
            u32::from_le_bytes([
                self.ram[address],
                self.ram[address + 1],
                self.ram[address + 2],
                self.ram[address + 3],
            ])
        }
    }

    impl Bus for TestBus {
        fn read_word(&mut self, address: u32, _mode: Mode, trans: bool) -> Option<u32> {
            if self.aborts(address, trans) {
                return None;
            }
            Some(self.peek_word(address))
        }

        fn read_byte(&mut self, address: u32, _mode: Mode, trans: bool) -> Option<u8> {
            if self.aborts(address, trans) {
                return None;
            }
            Some(self.ram[(address as usize) & 0xFFFF])
        }

        fn write_word(&mut self, address: u32, value: u32, _mode: Mode, trans: bool) -> bool {
            if self.aborts(address, trans) {
                return false;
            }
            self.poke_word(address, value);
            true
        }

        fn write_byte(&mut self, address: u32, value: u8, _mode: Mode, trans: bool) -> bool {
            if self.aborts(address, trans) {
                return false;
            }
            self.ram[(address as usize) & 0xFFFF] = value;
            true
        }
    }

    fn executor() -> Executor<TestBus> {
        let mut executor = Executor::new(Model::Armv2, TestBus::new());
        // The instruction under test sits at 0x1000: callers fetch from
        // pc() and then execute, so pc() holds the instruction address.
        executor.registers_mut().set_pc(0x1000);
        executor
    }

    #[test]
    fn movs_r15_restores_mode_and_flags_from_r14() {
        let mut executor = executor();
        executor.registers_mut().set_nz(0x8000_0000); // N set
        executor
            .registers_mut()
            .set_active(14, 0x0100_0003 | condition_code::IRQ_DISABLE);

        // MOVS pc, r14
        executor.execute(0xE1B0_F00E);

        let registers = executor.registers();
        assert_eq!(registers.pc(0), 0x0100_0000);
        assert_eq!(registers.mode(), Mode::Supervisor);
        assert!(!registers.test(crate::Condition::Mi)); // N cleared
        assert!(!registers.test(crate::Condition::Eq)); // Z clear
        assert!(!registers.test(crate::Condition::Cs)); // C clear
        assert!(!registers.test(crate::Condition::Vs)); // V clear
        assert!(registers.irq_disabled());
    }

    #[test]
    fn adds_sets_carry_and_overflow() {
        let mut executor = executor();
        executor.registers_mut().set_active(1, 0x7FFF_FFFF);
        executor.registers_mut().set_active(2, 1);

        // ADDS r0, r1, r2
        executor.execute(0xE091_0002);

        assert_eq!(executor.registers().active(0), 0x8000_0000);
        assert!(executor.registers().test(crate::Condition::Mi));
        assert!(executor.registers().test(crate::Condition::Vs));
        assert!(!executor.registers().test(crate::Condition::Cs));
    }

    #[test]
    fn subtraction_carry_is_not_borrow() {
        let mut executor = executor();
        executor.registers_mut().set_active(1, 5);
        executor.registers_mut().set_active(2, 3);

        // SUBS r0, r1, r2 — no borrow, so C set.
        executor.execute(0xE051_0002);
        assert_eq!(executor.registers().active(0), 2);
        assert!(executor.registers().test(crate::Condition::Cs));

        // SUBS r0, r2, r1 — borrow, so C clear.
        executor.registers_mut().set_active(1, 5);
        executor.execute(0xE052_0001);
        assert!(!executor.registers().test(crate::Condition::Cs));
    }

    #[test]
    fn logical_ops_take_carry_from_shifter() {
        let mut executor = executor();
        executor.registers_mut().set_active(1, 0x8000_0001);

        // MOVS r0, r1, LSL #1 — carry out is old bit 31.
        executor.execute(0xE1B0_0081);
        assert_eq!(executor.registers().active(0), 2);
        assert!(executor.registers().test(crate::Condition::Cs));
    }

    #[test]
    fn bl_links_and_branches() {
        let mut executor = executor();

        // BL +8 (offset field 2): target = pc+8+8.
        executor.execute(0xEB00_0002);

        // R14 holds the next instruction's address plus PSR bits.
        assert_eq!(
            executor.registers().active(14) & condition_code::ADDRESS,
            0x1004
        );
        assert_eq!(executor.registers().pc(0), 0x1010);
    }

    #[test]
    fn unaligned_word_load_rotates() {
        let mut executor = executor();
        executor.bus.poke_word(0x2000, 0x1122_3344);
        executor.registers_mut().set_active(1, 0x2001);

        // LDR r0, [r1] — address & 3 == 1: addressed byte to bits 0–7.
        executor.execute(0xE591_0000);
        assert_eq!(executor.registers().active(0), 0x4411_2233);
    }

    #[test]
    fn post_index_writes_back_base() {
        let mut executor = executor();
        executor.bus.poke_word(0x2000, 0xCAFE_F00D);
        executor.registers_mut().set_active(1, 0x2000);

        // LDR r0, [r1], #4
        executor.execute(0xE491_0004);
        assert_eq!(executor.registers().active(0), 0xCAFE_F00D);
        assert_eq!(executor.registers().active(1), 0x2004);
    }

    #[test]
    fn aborted_load_leaves_destination_and_vectors() {
        let mut executor = executor();
        executor.bus.abort_from = 0x2000;
        executor.bus.abort_to = 0x3000;
        executor.registers_mut().set_active(0, 0xDEAD_BEEF);
        executor.registers_mut().set_active(1, 0x2000);

        // LDR r0, [r1]
        executor.execute(0xE591_0000);
        assert_eq!(executor.registers().active(0), 0xDEAD_BEEF);
        assert_eq!(executor.registers().pc(0), Exception::DataAbort.vector());
        assert_eq!(executor.registers().mode(), Mode::Supervisor);
    }

    #[test]
    fn address_exception_on_26_bit_overflow() {
        let mut executor = executor();
        executor.registers_mut().set_active(1, 0x0400_0000);

        // LDR r0, [r1]
        executor.execute(0xE591_0000);
        assert_eq!(executor.registers().pc(0), Exception::Address.vector());
    }

    #[test]
    fn stm_stores_ascending_regardless_of_direction() {
        let mut executor = executor();
        executor.registers_mut().set_active(0, 0x10);
        executor.registers_mut().set_active(1, 0x11);
        executor.registers_mut().set_active(2, 0x12);
        executor.registers_mut().set_active(13, 0x2100);

        // STMDB r13!, {r0-r2}
        executor.execute(0xE92D_0007);

        assert_eq!(executor.registers().active(13), 0x20F4);
        assert_eq!(executor.bus.peek_word(0x20F4), 0x10);
        assert_eq!(executor.bus.peek_word(0x20F8), 0x11);
        assert_eq!(executor.bus.peek_word(0x20FC), 0x12);
    }

    #[test]
    fn ldm_round_trips_stm() {
        let mut executor = executor();
        executor.registers_mut().set_active(0, 0xA);
        executor.registers_mut().set_active(1, 0xB);
        executor.registers_mut().set_active(4, 0xC);
        executor.registers_mut().set_active(13, 0x2100);

        // STMDB r13!, {r0, r1, r4}
        executor.execute(0xE92D_0013);
        executor.registers_mut().set_active(0, 0);
        executor.registers_mut().set_active(1, 0);
        executor.registers_mut().set_active(4, 0);

        // LDMIA r13!, {r0, r1, r4}
        executor.registers_mut().set_pc(0x1008);
        executor.execute(0xE8BD_0013);

        assert_eq!(executor.registers().active(0), 0xA);
        assert_eq!(executor.registers().active(1), 0xB);
        assert_eq!(executor.registers().active(4), 0xC);
        assert_eq!(executor.registers().active(13), 0x2100);
    }

    #[test]
    fn ldm_abort_rolls_back_previous_load() {
        let mut executor = executor();
        executor.registers_mut().set_active(0, 0xAAA);
        executor.registers_mut().set_active(1, 0xBBB);
        executor.registers_mut().set_active(2, 0xCCC);
        executor.registers_mut().set_active(13, 0x2FF8);
        executor.bus.poke_word(0x2FF8, 1);
        executor.bus.poke_word(0x2FFC, 2);
        // The third word aborts.
        executor.bus.abort_from = 0x3000;
        executor.bus.abort_to = 0x3100;

        // LDMIA r13!, {r0-r2}
        executor.execute(0xE8BD_0007);

        // r0 committed; r1 rolled back; r2 untouched; base keeps the
        // written-back value.
        assert_eq!(executor.registers().active(0), 1);
        assert_eq!(executor.registers().active(1), 0xBBB);
        assert_eq!(executor.registers().active(2), 0xCCC);
        assert_eq!(executor.registers().active(13), 0x3004);
        assert_eq!(executor.registers().pc(0), Exception::DataAbort.vector());
    }

    #[test]
    fn swi_vectors_unless_intercepted() {
        struct Intercept {
            last_comment: u32,
            swallow: bool,
        }
        impl ControlFlowHandler for Intercept {
            fn should_swi(&mut self, comment: u32) -> bool {
                self.last_comment = comment;
                !self.swallow
            }
        }

        let mut executor = Executor::with_handler(
            Model::Armv2,
            TestBus::new(),
            Intercept {
                last_comment: 0,
                swallow: true,
            },
        );
        executor.registers_mut().set_pc(0x1000);

        // SWI 0x42 — intercepted, so execution continues.
        executor.execute(0xEF00_0042);
        assert_eq!(executor.handler.last_comment, 0x42);
        assert_eq!(executor.registers().pc(0), 0x1004);

        executor.handler.swallow = false;
        executor.execute(0xEF00_0043);
        assert_eq!(
            executor.registers().pc(0),
            Exception::SoftwareInterrupt.vector()
        );
    }

    #[test]
    fn condition_failure_skips_side_effects() {
        let mut executor = executor();
        executor.registers_mut().set_nz(1); // Z clear

        // ADDEQ r0, r0, #1 — not taken.
        executor.execute(0x0280_0001);
        assert_eq!(executor.registers().active(0), 0);
        assert_eq!(executor.registers().pc(0), 0x1004);

        // The NV condition never executes.
        executor.execute(0xF280_0001);
        assert_eq!(executor.registers().active(0), 0);
    }

    #[test]
    fn irq_taken_at_boundary_when_enabled() {
        let mut executor = executor();
        // Enable IRQs: write a status with I clear from supervisor mode.
        executor
            .registers_mut()
            .set_status(Mode::Supervisor as u32);
        executor.registers_mut().set_pc(0x1000);
        executor.set_irq_line(true);

        executor.step();
        assert_eq!(executor.registers().mode(), Mode::Irq);
        assert_eq!(executor.registers().pc(0), Exception::Irq.vector());
        // Return address is boundary + 4.
        assert_eq!(
            executor.registers().active(14) & condition_code::ADDRESS,
            0x1004
        );
        assert!(executor.registers().irq_disabled());
    }
}
