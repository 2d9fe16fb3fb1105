//! Bit-shift tokeniser: raw cells in, marks and bytes out.

use drive_floppy::fm;

/// What the shift register has recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// The track-start index address mark.
    IndexMark,
    /// An ID address mark; the six ID bytes follow.
    Id,
    /// A data address mark.
    Data,
    /// A deleted-data address mark.
    DeletedData,
    /// Sixteen cells' worth of ordinary data.
    Byte(u8),
}

/// The MFM sync cell pattern (an A1 with a missing clock).
const MFM_SYNC: u16 = 0x4489;

pub struct Tokeniser {
    shift_register: u32,
    bits_since_token: u32,
    is_double_density: bool,
    /// MFM: a sync word has been seen and the next byte is a mark.
    mfm_synced: bool,
}

impl Default for Tokeniser {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokeniser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shift_register: 0,
            bits_since_token: 0,
            is_double_density: false,
            mfm_synced: false,
        }
    }

    pub fn set_is_double_density(&mut self, double_density: bool) {
        self.is_double_density = double_density;
        self.bits_since_token = 0;
        self.mfm_synced = false;
    }

    /// Extracts the eight data bits from sixteen interleaved cells.
    fn data_bits(cells: u16) -> u8 {
        let mut byte = 0u8;
        for bit in 0..8 {
            byte |= (((cells >> (bit * 2)) & 1) as u8) << bit;
        }
        byte
    }

    /// Shifts in one cell; returns a token when one completes.
    pub fn add_bit(&mut self, bit: bool) -> Option<Token> {
        self.shift_register = (self.shift_register << 1) | u32::from(bit);
        self.bits_since_token += 1;
        let cells = self.shift_register as u16;

        if self.is_double_density {
            if cells == MFM_SYNC {
                self.mfm_synced = true;
                self.bits_since_token = 0;
                return None;
            }
            if self.bits_since_token < 16 {
                return None;
            }
            self.bits_since_token = 0;
            let byte = Self::data_bits(cells);
            if self.mfm_synced {
                self.mfm_synced = false;
                return Some(match byte {
                    0xFE => Token::Id,
                    0xFB => Token::Data,
                    0xF8 => Token::DeletedData,
                    0xFC => Token::IndexMark,
                    other => Token::Byte(other),
                });
            }
            return Some(Token::Byte(byte));
        }

        // FM: the marks announce themselves through missing clock pulses,
        // so they match at any bit alignment and resynchronise the byte
        // framing.
        let mark = match cells {
            fm::INDEX_ADDRESS_MARK => Some(Token::IndexMark),
            fm::ID_ADDRESS_MARK => Some(Token::Id),
            fm::DATA_ADDRESS_MARK => Some(Token::Data),
            fm::DELETED_DATA_ADDRESS_MARK => Some(Token::DeletedData),
            _ => None,
        };
        if mark.is_some() {
            self.bits_since_token = 0;
            return mark;
        }

        if self.bits_since_token == 16 {
            self.bits_since_token = 0;
            return Some(Token::Byte(Self::data_bits(cells)));
        }
        None
    }
}
