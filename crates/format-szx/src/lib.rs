//! SZX (ZX-State) snapshots.
//!
//! A 8-byte `ZXST` header carrying version and machine id, followed by
//! length-prefixed blocks tagged with four ASCII characters. Recognised
//! blocks: `Z80R` (registers), `SPCR` (border and paging), `RAMP` (one
//! 16 KB page, optionally zlib-compressed) and `AY\0\0`. Unknown blocks
//! are skipped by their recorded length, both here and by other readers,
//! which is what keeps the format forward-compatible.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::debug;
use thiserror::Error;
use zilog_z80::Registers;

const SIGNATURE: &[u8; 4] = b"ZXST";
const RAM_PAGE_SIZE: usize = 16 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SzxError {
    #[error("not an SZX file")]
    InvalidSignature,
    #[error("unsupported major version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported machine id {0}")]
    UnsupportedMachine(u8),
    #[error("file truncated")]
    Truncated,
    #[error("malformed {0} block")]
    MalformedBlock(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    SixteenK,
    FortyEightK,
    OneTwoEightK,
    Plus2,
    Plus2a,
    Plus3,
}

impl Model {
    fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Model::SixteenK),
            1 => Some(Model::FortyEightK),
            2 => Some(Model::OneTwoEightK),
            3 => Some(Model::Plus2),
            4 => Some(Model::Plus2a),
            5 => Some(Model::Plus3),
            _ => None,
        }
    }

    fn id(self) -> u8 {
        match self {
            Model::SixteenK => 0,
            Model::FortyEightK => 1,
            Model::OneTwoEightK => 2,
            Model::Plus2 => 3,
            Model::Plus2a => 4,
            Model::Plus3 => 5,
        }
    }

    #[must_use]
    pub fn ram_size(self) -> usize {
        match self {
            Model::SixteenK => 16 * 1024,
            Model::FortyEightK => 48 * 1024,
            _ => 128 * 1024,
        }
    }
}

/// AY-3-8910 state, as the `AY\0\0` block carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AyState {
    pub selected_register: u8,
    pub registers: [u8; 16],
}

/// Everything a snapshot restores.
#[derive(Debug, Clone)]
pub struct State {
    pub model: Model,
    pub registers: Registers,
    pub halted: bool,
    pub half_cycles_since_interrupt: i32,
    pub border_colour: u8,
    pub last_7ffd: u8,
    pub last_1ffd: u8,
    pub ay: Option<AyState>,
    pub ram: Vec<u8>,
}

impl State {
    #[must_use]
    pub fn new(model: Model) -> Self {
        Self {
            model,
            registers: Registers::default(),
            halted: false,
            half_cycles_since_interrupt: 0,
            border_colour: 0,
            last_7ffd: 0,
            last_1ffd: 0,
            ay: None,
            ram: vec![0; model.ram_size()],
        }
    }

    /// Where a numbered RAM page lands. The 16K/48K machines only map
    /// pages 5, 2 and 0, in that address order.
    fn page_offset(&self, page: u8) -> Option<usize> {
        match self.model {
            Model::SixteenK | Model::FortyEightK => {
                let offset = match page {
                    5 => 0x0000,
                    2 => 0x4000,
                    0 => 0x8000,
                    _ => return None,
                };
                if offset < self.ram.len() { Some(offset) } else { None }
            }
            _ => {
                if page < 8 {
                    Some(usize::from(page) * RAM_PAGE_SIZE)
                } else {
                    None
                }
            }
        }
    }

    fn pages(&self) -> Vec<u8> {
        match self.model {
            Model::SixteenK => vec![5],
            Model::FortyEightK => vec![5, 2, 0],
            _ => (0..8).collect(),
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, SzxError> {
        let byte = *self.bytes.get(self.offset).ok_or(SzxError::Truncated)?;
        self.offset += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, SzxError> {
        Ok(u16::from(self.u8()?) | (u16::from(self.u8()?) << 8))
    }

    fn u32(&mut self) -> Result<u32, SzxError> {
        Ok(u32::from(self.u16()?) | (u32::from(self.u16()?) << 16))
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], SzxError> {
        let slice = self
            .bytes
            .get(self.offset..self.offset + count)
            .ok_or(SzxError::Truncated)?;
        self.offset += count;
        Ok(slice)
    }

    fn at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }
}

/// Parses a snapshot. Nothing is applied on error: the caller receives
/// either a complete state or none of one.
pub fn load(data: &[u8]) -> Result<State, SzxError> {
    let mut reader = Reader {
        bytes: data,
        offset: 0,
    };

    if reader.take(4)? != SIGNATURE {
        return Err(SzxError::InvalidSignature);
    }
    let major = reader.u8()?;
    let _minor = reader.u8()?;
    if major > 1 {
        return Err(SzxError::UnsupportedVersion(major));
    }
    let machine_id = reader.u8()?;
    let model = Model::from_id(machine_id).ok_or(SzxError::UnsupportedMachine(machine_id))?;
    let _flags = reader.u8()?;

    let mut state = State::new(model);

    while !reader.at_end() {
        let tag = reader.take(4)?;
        let tag: [u8; 4] = [tag[0], tag[1], tag[2], tag[3]];
        let size = reader.u32()? as usize;
        let block = reader.take(size)?;

        match &tag {
            b"Z80R" => read_z80_registers(block, &mut state)?,
            b"SPCR" => {
                if block.len() < 3 {
                    return Err(SzxError::MalformedBlock("SPCR"));
                }
                state.border_colour = block[0];
                state.last_7ffd = block[1];
                state.last_1ffd = block[2];
            }
            b"RAMP" => read_ram_page(block, &mut state)?,
            b"AY\0\0" => {
                if block.len() < 18 {
                    return Err(SzxError::MalformedBlock("AY"));
                }
                let mut ay = AyState {
                    selected_register: block[1],
                    registers: [0; 16],
                };
                ay.registers.copy_from_slice(&block[2..18]);
                state.ay = Some(ay);
            }
            other => {
                debug!(
                    "skipping unhandled block {}{}{}{}",
                    other[0] as char, other[1] as char, other[2] as char, other[3] as char
                );
            }
        }
    }

    Ok(state)
}

fn read_z80_registers(block: &[u8], state: &mut State) -> Result<(), SzxError> {
    if block.len() < 37 {
        return Err(SzxError::MalformedBlock("Z80R"));
    }
    let mut reader = Reader {
        bytes: block,
        offset: 0,
    };

    let regs = &mut state.registers;
    regs.f = reader.u8()?;
    regs.a = reader.u8()?;
    regs.set_bc(reader.u16()?);
    regs.set_de(reader.u16()?);
    regs.set_hl(reader.u16()?);

    let af_alt = reader.u16()?;
    regs.f_alt = af_alt as u8;
    regs.a_alt = (af_alt >> 8) as u8;
    let bc_alt = reader.u16()?;
    regs.c_alt = bc_alt as u8;
    regs.b_alt = (bc_alt >> 8) as u8;
    let de_alt = reader.u16()?;
    regs.e_alt = de_alt as u8;
    regs.d_alt = (de_alt >> 8) as u8;
    let hl_alt = reader.u16()?;
    regs.l_alt = hl_alt as u8;
    regs.h_alt = (hl_alt >> 8) as u8;

    regs.ix = reader.u16()?;
    regs.iy = reader.u16()?;
    regs.sp = reader.u16()?;
    regs.pc = reader.u16()?;

    regs.i = reader.u8()?;
    regs.r = reader.u8()?;
    regs.iff1 = reader.u8()? != 0;
    regs.iff2 = reader.u8()? != 0;
    regs.im = reader.u8()?;

    state.half_cycles_since_interrupt = reader.u32()? as i32 * 2;
    // Cycles of remaining interrupt assertion: only relevant to hardware
    // this library does not model.
    let _hold_cycles = reader.u8()?;
    let flags = reader.u8()?;
    state.halted = flags & 2 != 0;

    regs.memptr = reader.u16()?;
    Ok(())
}

fn read_ram_page(block: &[u8], state: &mut State) -> Result<(), SzxError> {
    if block.len() < 3 {
        return Err(SzxError::MalformedBlock("RAMP"));
    }
    let flags = u16::from(block[0]) | (u16::from(block[1]) << 8);
    let page = block[2];
    let payload = &block[3..];

    let contents = if flags & 1 != 0 {
        let mut contents = Vec::with_capacity(RAM_PAGE_SIZE);
        let mut decoder = ZlibDecoder::new(payload);
        decoder
            .read_to_end(&mut contents)
            .map_err(|_| SzxError::MalformedBlock("RAMP"))?;
        contents
    } else {
        payload.to_vec()
    };
    if contents.len() != RAM_PAGE_SIZE {
        return Err(SzxError::MalformedBlock("RAMP"));
    }

    if let Some(offset) = state.page_offset(page) {
        let end = (offset + RAM_PAGE_SIZE).min(state.ram.len());
        state.ram[offset..end].copy_from_slice(&contents[..end - offset]);
    } else {
        debug!("ignoring out-of-range RAM page {page}");
    }
    Ok(())
}

fn push_block(out: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Serialises `state`, compressing RAM pages.
#[must_use]
pub fn save(state: &State) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.push(1); // major
    out.push(4); // minor
    out.push(state.model.id());
    out.push(0); // flags

    // Z80R.
    let mut z80 = Vec::with_capacity(37);
    let regs = &state.registers;
    z80.push(regs.f);
    z80.push(regs.a);
    z80.extend_from_slice(&regs.bc().to_le_bytes());
    z80.extend_from_slice(&regs.de().to_le_bytes());
    z80.extend_from_slice(&regs.hl().to_le_bytes());
    z80.extend_from_slice(
        &((u16::from(regs.a_alt) << 8) | u16::from(regs.f_alt)).to_le_bytes(),
    );
    z80.extend_from_slice(
        &((u16::from(regs.b_alt) << 8) | u16::from(regs.c_alt)).to_le_bytes(),
    );
    z80.extend_from_slice(
        &((u16::from(regs.d_alt) << 8) | u16::from(regs.e_alt)).to_le_bytes(),
    );
    z80.extend_from_slice(
        &((u16::from(regs.h_alt) << 8) | u16::from(regs.l_alt)).to_le_bytes(),
    );
    z80.extend_from_slice(&regs.ix.to_le_bytes());
    z80.extend_from_slice(&regs.iy.to_le_bytes());
    z80.extend_from_slice(&regs.sp.to_le_bytes());
    z80.extend_from_slice(&regs.pc.to_le_bytes());
    z80.push(regs.i);
    z80.push(regs.r);
    z80.push(u8::from(regs.iff1));
    z80.push(u8::from(regs.iff2));
    z80.push(regs.im);
    z80.extend_from_slice(&((state.half_cycles_since_interrupt / 2) as u32).to_le_bytes());
    z80.push(0); // interrupt hold cycles
    z80.push(if state.halted { 2 } else { 0 });
    z80.extend_from_slice(&regs.memptr.to_le_bytes());
    push_block(&mut out, b"Z80R", &z80);

    // SPCR.
    let spcr = [
        state.border_colour,
        state.last_7ffd,
        state.last_1ffd,
        0,
        0,
        0,
        0,
        0,
    ];
    push_block(&mut out, b"SPCR", &spcr);

    // AY, if present.
    if let Some(ay) = &state.ay {
        let mut block = vec![0, ay.selected_register];
        block.extend_from_slice(&ay.registers);
        push_block(&mut out, b"AY\0\0", &block);
    }

    // RAM pages.
    for page in state.pages() {
        let Some(offset) = state.page_offset(page) else {
            continue;
        };
        let end = (offset + RAM_PAGE_SIZE).min(state.ram.len());
        let mut padded = state.ram[offset..end].to_vec();
        padded.resize(RAM_PAGE_SIZE, 0);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let compressed = encoder
            .write_all(&padded)
            .and_then(|()| encoder.finish())
            .unwrap_or(padded.clone());

        let mut block = vec![1, 0, page];
        block.extend_from_slice(&compressed);
        push_block(&mut out, b"RAMP", &block);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> State {
        let mut state = State::new(Model::FortyEightK);
        state.registers.a = 0x42;
        state.registers.f = 0xA5;
        state.registers.set_bc(0x1234);
        state.registers.set_hl(0x8000);
        state.registers.sp = 0xFFF0;
        state.registers.pc = 0x9000;
        state.registers.i = 0x3F;
        state.registers.iff1 = true;
        state.registers.iff2 = true;
        state.registers.im = 1;
        state.registers.memptr = 0x5CCB;
        state.border_colour = 5;
        state.ay = Some(AyState {
            selected_register: 7,
            registers: [0x11; 16],
        });
        for (index, byte) in state.ram.iter_mut().enumerate() {
            *byte = (index * 7) as u8;
        }
        state
    }

    #[test]
    fn save_and_load_round_trip() {
        let state = sample_state();
        let file = save(&state);
        let Ok(restored) = load(&file) else {
            panic!("round trip should parse");
        };

        assert_eq!(restored.model, Model::FortyEightK);
        assert_eq!(restored.registers.a, 0x42);
        assert_eq!(restored.registers.bc(), 0x1234);
        assert_eq!(restored.registers.hl(), 0x8000);
        assert_eq!(restored.registers.sp, 0xFFF0);
        assert_eq!(restored.registers.pc, 0x9000);
        assert!(restored.registers.iff1);
        assert_eq!(restored.registers.im, 1);
        assert_eq!(restored.registers.memptr, 0x5CCB);
        assert_eq!(restored.border_colour, 5);
        assert_eq!(restored.ay, state.ay);
        assert_eq!(restored.ram, state.ram);
    }

    #[test]
    fn wrong_signature_is_rejected() {
        assert_eq!(load(b"ZX82....").unwrap_err(), SzxError::InvalidSignature);
    }

    #[test]
    fn future_major_version_is_rejected() {
        let mut file = save(&sample_state());
        file[4] = 2;
        assert_eq!(load(&file).unwrap_err(), SzxError::UnsupportedVersion(2));
    }

    #[test]
    fn unknown_machine_is_rejected() {
        let mut file = save(&sample_state());
        file[6] = 0x7F;
        assert_eq!(load(&file).unwrap_err(), SzxError::UnsupportedMachine(0x7F));
    }

    #[test]
    fn unknown_blocks_are_skipped_by_length() {
        let mut file = save(&sample_state());
        // Splice an unknown block in after the header.
        let mut spliced = file[..8].to_vec();
        spliced.extend_from_slice(b"CRTR");
        spliced.extend_from_slice(&8u32.to_le_bytes());
        spliced.extend_from_slice(b"emulator");
        spliced.extend_from_slice(&file[8..]);
        file = spliced;

        let Ok(restored) = load(&file) else {
            panic!("unknown blocks must not break parsing");
        };
        assert_eq!(restored.registers.a, 0x42);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let file = save(&sample_state());
        assert_eq!(
            load(&file[..file.len() - 10]).unwrap_err(),
            SzxError::Truncated
        );
    }

    #[test]
    fn uncompressed_ram_pages_load() {
        let mut file = save(&State::new(Model::SixteenK));
        let mut page = vec![0u8, 0, 5]; // flags 0, page 5
        page.extend_from_slice(&[0xAB; RAM_PAGE_SIZE]);
        push_block(&mut file, b"RAMP", &page);

        let Ok(restored) = load(&file) else {
            panic!();
        };
        assert_eq!(restored.ram[0], 0xAB);
    }
}
