//! The barrel shifter.

/// The four shift types of instruction bits 5–6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftType {
    LogicalLeft = 0b00,
    LogicalRight = 0b01,
    ArithmeticRight = 0b10,
    RotateRight = 0b11,
}

impl ShiftType {
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0b00 => ShiftType::LogicalLeft,
            0b01 => ShiftType::LogicalRight,
            0b10 => ShiftType::ArithmeticRight,
            _ => ShiftType::RotateRight,
        }
    }
}

/// Applies a shift of `shift_type` to `source` by `amount`.
///
/// `carry` must hold the current carry (0 or non-zero) at call; if
/// `set_carry` is true it receives the shifter's carry out, 0 for clear and
/// non-zero for set.
///
/// Shift amounts of 0 carry the meanings attributed to them for immediate
/// shift counts:
///
/// - `LSL #0` passes the value through, carry unchanged;
/// - `LSR #0` and `ASR #0` mean shift-by-32;
/// - `ROR #0` is rotate-right-by-one-through-carry (RRX).
pub fn shift(
    shift_type: ShiftType,
    source: &mut u32,
    amount: u32,
    carry: &mut u32,
    set_carry: bool,
) {
    match shift_type {
        ShiftType::LogicalLeft => {
            if amount > 32 {
                if set_carry {
                    *carry = 0;
                }
                *source = 0;
            } else if amount == 32 {
                if set_carry {
                    *carry = *source & 1;
                }
                *source = 0;
            } else if amount > 0 {
                if set_carry {
                    *carry = *source & (0x8000_0000 >> (amount - 1));
                }
                *source <<= amount;
            }
        }

        ShiftType::LogicalRight => {
            if amount > 32 {
                if set_carry {
                    *carry = 0;
                }
                *source = 0;
            } else if amount == 32 || amount == 0 {
                // A logical shift right by 0 is treated as a shift by 32;
                // assemblers are supposed to map LSR #0 to LSL #0.
                if set_carry {
                    *carry = *source & 0x8000_0000;
                }
                *source = 0;
            } else {
                if set_carry {
                    *carry = *source & (1 << (amount - 1));
                }
                *source >>= amount;
            }
        }

        ShiftType::ArithmeticRight => {
            let sign = if *source & 0x8000_0000 != 0 {
                0xffff_ffff
            } else {
                0x0000_0000
            };

            if amount >= 32 || amount == 0 {
                // As per logical right, an arithmetic shift of 0 is treated
                // as a shift by 32.
                if set_carry {
                    *carry = *source & 0x8000_0000;
                }
                *source = sign;
            } else {
                if set_carry {
                    *carry = *source & (1 << (amount - 1));
                }
                *source = (*source >> amount) | (sign << (32 - amount));
            }
        }

        ShiftType::RotateRight => {
            if amount == 0 {
                // Rotate right by 0 is rotate right by 1 through carry.
                let high = *carry << 31;
                if set_carry {
                    *carry = *source & 1;
                }
                *source = (*source >> 1) | high;
            } else if amount & 31 == 0 {
                // Any multiple of 32 leaves the value unchanged with carry
                // from bit 31.
                if set_carry {
                    *carry = *source & 0x8000_0000;
                }
            } else {
                let amount = amount & 31;
                if set_carry {
                    *carry = *source & (1 << (amount - 1));
                }
                *source = source.rotate_right(amount);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(shift_type: ShiftType, source: u32, amount: u32, carry_in: u32) -> (u32, u32) {
        let mut value = source;
        let mut carry = carry_in;
        shift(shift_type, &mut value, amount, &mut carry, true);
        (value, carry)
    }

    // A fixed multiplicative generator gives a spread of sample values
    // without dragging in a randomness dependency.
    fn samples() -> impl Iterator<Item = u32> {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        std::iter::repeat_with(move || {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (state >> 32) as u32
        })
        .take(512)
        .chain([0, 1, 0x8000_0000, 0xffff_ffff, 0x7fff_ffff])
    }

    #[test]
    fn lsl_zero_passes_through_with_carry_unchanged() {
        for source in samples() {
            assert_eq!(apply(ShiftType::LogicalLeft, source, 0, 1), (source, 1));
            assert_eq!(apply(ShiftType::LogicalLeft, source, 0, 0), (source, 0));
        }
    }

    #[test]
    fn lsl_32_clears_value_with_carry_from_bit_0() {
        for source in samples() {
            let (value, carry) = apply(ShiftType::LogicalLeft, source, 32, 0);
            assert_eq!(value, 0);
            assert_eq!(carry, source & 1);
        }
    }

    #[test]
    fn lsl_and_lsr_by_33_or_more_clear_value_and_carry() {
        for source in samples() {
            for amount in [33, 40, 64, 255] {
                assert_eq!(apply(ShiftType::LogicalLeft, source, amount, 1), (0, 0));
                assert_eq!(apply(ShiftType::LogicalRight, source, amount, 1), (0, 0));
            }
        }
    }

    #[test]
    fn lsr_zero_is_shift_by_32() {
        for source in samples() {
            let (value, carry) = apply(ShiftType::LogicalRight, source, 0, 0);
            assert_eq!(value, 0);
            assert_eq!(carry, source & 0x8000_0000);
        }
    }

    #[test]
    fn asr_zero_and_32_plus_sign_extend_with_carry_from_sign() {
        for source in samples() {
            let sign = if source & 0x8000_0000 != 0 {
                0xffff_ffff
            } else {
                0
            };
            for amount in [0, 32, 33, 100] {
                let (value, carry) = apply(ShiftType::ArithmeticRight, source, amount, 0);
                assert_eq!(value, sign);
                assert_eq!(carry, source & 0x8000_0000);
            }
        }
    }

    #[test]
    fn ror_zero_is_rrx() {
        for source in samples() {
            let (value, carry) = apply(ShiftType::RotateRight, source, 0, 1);
            assert_eq!(value, (source >> 1) | 0x8000_0000);
            assert_eq!(carry, source & 1);

            let (value, carry) = apply(ShiftType::RotateRight, source, 0, 0);
            assert_eq!(value, source >> 1);
            assert_eq!(carry, source & 1);
        }
    }

    #[test]
    fn ror_by_multiples_of_32_leaves_value() {
        for source in samples() {
            for amount in [32, 64] {
                let (value, carry) = apply(ShiftType::RotateRight, source, amount, 0);
                assert_eq!(value, source);
                assert_eq!(carry, source & 0x8000_0000);
            }
        }
    }

    #[test]
    fn ordinary_shifts_match_native_operators() {
        for source in samples() {
            for amount in 1..32 {
                let (value, carry) = apply(ShiftType::LogicalLeft, source, amount, 0);
                assert_eq!(value, source << amount);
                assert_eq!(carry != 0, source & (0x8000_0000 >> (amount - 1)) != 0);

                let (value, _) = apply(ShiftType::LogicalRight, source, amount, 0);
                assert_eq!(value, source >> amount);

                let (value, _) = apply(ShiftType::ArithmeticRight, source, amount, 0);
                assert_eq!(value, ((source as i32) >> amount) as u32);

                let (value, _) = apply(ShiftType::RotateRight, source, amount, 0);
                assert_eq!(value, source.rotate_right(amount));
            }
        }
    }
}
