//! A static 6502 disassembler.
//!
//! Traces reachable instructions from a set of entry points, following
//! branches, jumps and subroutine calls, and buckets every memory operand
//! as an internal or external load, store or modify. The paging analysers
//! care only about those access sets, not about a listing.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Store,
    Modify,
    Compare,
    Jump,
    JumpIndirect,
    Jsr,
    Branch,
    Return,
    Break,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirectX,
    IndirectIndexedY,
    Relative,
}

impl AddressingMode {
    #[must_use]
    pub const fn length(self) -> u16 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 1,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirectX
            | AddressingMode::IndirectIndexedY
            | AddressingMode::Relative => 2,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub operation: Operation,
    pub addressing_mode: AddressingMode,
    pub operand: u16,
}

/// The outcome of a trace.
#[derive(Debug, Default)]
pub struct Disassembly {
    pub instructions_by_address: BTreeMap<u16, Instruction>,
    pub internal_loads: BTreeSet<u16>,
    pub internal_stores: BTreeSet<u16>,
    pub internal_modifies: BTreeSet<u16>,
    pub external_loads: BTreeSet<u16>,
    pub external_stores: BTreeSet<u16>,
    pub external_modifies: BTreeSet<u16>,
}

/// Decodes one opcode byte into operation and addressing mode.
#[must_use]
pub fn decode(opcode: u8) -> (Operation, AddressingMode) {
    use AddressingMode as M;
    use Operation as O;

    // The irregular column first.
    match opcode {
        0x00 => return (O::Break, M::Implied),
        0x20 => return (O::Jsr, M::Absolute),
        0x40 | 0x60 => return (O::Return, M::Implied),
        0x4C => return (O::Jump, M::Absolute),
        0x6C => return (O::JumpIndirect, M::Indirect),
        0x10 | 0x30 | 0x50 | 0x70 | 0x90 | 0xB0 | 0xD0 | 0xF0 => {
            return (O::Branch, M::Relative);
        }
        0x08 | 0x28 | 0x48 | 0x68 | 0x18 | 0x38 | 0x58 | 0x78 | 0x88 | 0x8A | 0x98 | 0x9A
        | 0xA8 | 0xAA | 0xB8 | 0xBA | 0xC8 | 0xCA | 0xD8 | 0xE8 | 0xEA | 0xF8 => {
            return (O::Other, M::Implied);
        }
        0x0A | 0x2A | 0x4A | 0x6A => return (O::Other, M::Accumulator),
        _ => {}
    }

    // The regular aaa-bbb-cc grid.
    let aaa = opcode >> 5;
    let bbb = (opcode >> 2) & 7;
    let cc = opcode & 3;

    let mode = match (cc, bbb) {
        (1, 0) => M::IndexedIndirectX,
        (1, 1) | (0 | 2, 1) => M::ZeroPage,
        (1, 2) | (0 | 2, 0) => M::Immediate,
        (1, 3) | (0 | 2, 3) => M::Absolute,
        (1, 4) => M::IndirectIndexedY,
        (1, 5) | (2, 5) | (0, 5) => M::ZeroPageX,
        (1, 6) => M::AbsoluteY,
        (1, 7) | (2, 7) | (0, 7) => M::AbsoluteX,
        _ => M::Implied,
    };

    // LDX/STX use Y indexing where the grid says X.
    let mode = if cc == 2 && (aaa == 4 || aaa == 5) {
        match mode {
            M::ZeroPageX => M::ZeroPageY,
            M::AbsoluteX => M::AbsoluteY,
            other => other,
        }
    } else {
        mode
    };

    let operation = match cc {
        1 => match aaa {
            4 => O::Store,        // STA
            0..=3 | 5 => O::Load, // ORA/AND/EOR/ADC read; LDA
            6 => O::Compare,      // CMP
            _ => O::Load,         // SBC reads
        },
        2 => match aaa {
            0..=3 => O::Modify, // ASL/ROL/LSR/ROR
            4 => O::Store,      // STX
            5 => O::Load,       // LDX
            _ => O::Modify,     // DEC/INC
        },
        0 => match aaa {
            1 => O::Load,    // BIT
            4 => O::Store,   // STY
            5 => O::Load,    // LDY
            6 | 7 => O::Compare,
            _ => O::Other,
        },
        _ => O::Other,
    };

    (operation, mode)
}

/// Traces `data` from `entry_points`, with `address_mapper` translating a
/// CPU address into an offset within `data` (or `None` for addresses
/// outside it).
#[must_use]
pub fn disassemble(
    data: &[u8],
    address_mapper: impl Fn(u16) -> Option<usize>,
    entry_points: &[u16],
) -> Disassembly {
    let mut disassembly = Disassembly::default();
    let mut queue: VecDeque<u16> = entry_points.iter().copied().collect();

    while let Some(address) = queue.pop_front() {
        if disassembly.instructions_by_address.contains_key(&address) {
            continue;
        }
        let Some(offset) = address_mapper(address) else {
            continue;
        };
        let Some(&opcode) = data.get(offset) else {
            continue;
        };

        let (operation, addressing_mode) = decode(opcode);
        let length = addressing_mode.length();

        let operand = match length {
            2 => data.get(offset + 1).copied().map(u16::from).unwrap_or(0),
            3 => {
                let low = data.get(offset + 1).copied().unwrap_or(0);
                let high = data.get(offset + 2).copied().unwrap_or(0);
                u16::from(low) | (u16::from(high) << 8)
            }
            _ => 0,
        };

        disassembly.instructions_by_address.insert(
            address,
            Instruction {
                operation,
                addressing_mode,
                operand,
            },
        );

        // Bucket data accesses.
        let accesses_memory = matches!(
            addressing_mode,
            AddressingMode::ZeroPage
                | AddressingMode::ZeroPageX
                | AddressingMode::ZeroPageY
                | AddressingMode::Absolute
                | AddressingMode::AbsoluteX
                | AddressingMode::AbsoluteY
                | AddressingMode::IndexedIndirectX
                | AddressingMode::IndirectIndexedY
        ) && !matches!(
            operation,
            Operation::Jump | Operation::JumpIndirect | Operation::Jsr
        );
        if accesses_memory {
            let internal = address_mapper(operand).is_some();
            let set = match (operation, internal) {
                (Operation::Load | Operation::Compare, true) => {
                    Some(&mut disassembly.internal_loads)
                }
                (Operation::Load | Operation::Compare, false) => {
                    Some(&mut disassembly.external_loads)
                }
                (Operation::Store, true) => Some(&mut disassembly.internal_stores),
                (Operation::Store, false) => Some(&mut disassembly.external_stores),
                (Operation::Modify, true) => Some(&mut disassembly.internal_modifies),
                (Operation::Modify, false) => Some(&mut disassembly.external_modifies),
                _ => None,
            };
            if let Some(set) = set {
                set.insert(operand);
            }
        }

        // Queue successors.
        match operation {
            Operation::Jump => queue.push_back(operand),
            Operation::Jsr => {
                queue.push_back(operand);
                queue.push_back(address.wrapping_add(length));
            }
            Operation::Branch => {
                let target = address
                    .wrapping_add(length)
                    .wrapping_add((operand as u8 as i8) as u16);
                queue.push_back(target);
                queue.push_back(address.wrapping_add(length));
            }
            Operation::Return | Operation::Break | Operation::JumpIndirect => {}
            _ => queue.push_back(address.wrapping_add(length)),
        }
    }

    disassembly
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_mapper(limit: usize) -> impl Fn(u16) -> Option<usize> {
        move |address| {
            let address = address as usize;
            if address < limit { Some(address) } else { None }
        }
    }

    #[test]
    fn classifies_loads_stores_and_modifies() {
        // LDA $0010; STA $2000; INC $0020; RTS
        let program = [0xAD, 0x10, 0x00, 0x8D, 0x00, 0x20, 0xEE, 0x20, 0x00, 0x60];
        let disassembly = disassemble(&program, identity_mapper(program.len()), &[0]);

        // All three operands lie beyond the 10-byte program, so every
        // access is external.
        assert!(disassembly.internal_loads.is_empty());
        assert!(disassembly.external_loads.contains(&0x0010));
        assert!(disassembly.external_stores.contains(&0x2000));
        assert!(disassembly.external_modifies.contains(&0x0020));
        assert_eq!(disassembly.instructions_by_address.len(), 4);
    }

    #[test]
    fn follows_branches_both_ways() {
        // BEQ +2; LDA #$00; RTS; LDX #$00; RTS
        let program = [0xF0, 0x03, 0xA9, 0x00, 0x60, 0xA2, 0x00, 0x60];
        let disassembly = disassemble(&program, identity_mapper(program.len()), &[0]);

        assert!(disassembly.instructions_by_address.contains_key(&2)); // fall-through
        assert!(disassembly.instructions_by_address.contains_key(&5)); // taken
    }

    #[test]
    fn jsr_traces_subroutine_and_continuation() {
        // JSR $0006; RTS; padding; LDA #$01; RTS
        let program = [0x20, 0x06, 0x00, 0x60, 0xEA, 0xEA, 0xA9, 0x01, 0x60];
        let disassembly = disassemble(&program, identity_mapper(program.len()), &[0]);
        assert!(disassembly.instructions_by_address.contains_key(&6));
        assert!(disassembly.instructions_by_address.contains_key(&3));
    }

    #[test]
    fn indexed_indirect_store_is_recorded() {
        // STA ($40,X); RTS
        let program = [0x81, 0x40, 0x60];
        let disassembly = disassemble(&program, identity_mapper(program.len()), &[0]);
        let instruction = disassembly.instructions_by_address[&0];
        assert_eq!(instruction.operation, Operation::Store);
        assert_eq!(instruction.addressing_mode, AddressingMode::IndexedIndirectX);
    }
}
