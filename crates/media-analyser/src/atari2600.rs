//! Atari 2600 cartridge analysis.
//!
//! The paging model is inferred by disassembling the top 4 KB from the
//! RESET/BRK vectors and counting accesses into each scheme's hot
//! address range; cartridge size narrows the candidates first.

use std::collections::BTreeSet;

use log::debug;

use crate::disassembler::{AddressingMode, Disassembly, Operation, disassemble};
use crate::{Machine, MachineOptions, Media, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingModel {
    None,
    CommaVid,
    Atari8k,
    Atari16k,
    Atari32k,
    ActivisionStack,
    ParkerBros,
    Tigervision,
    CbsRamPlus,
    MNetwork,
    MegaBoy,
    Pitfall2,
}

/// The full analysis result, also exposed for direct use by tests and
/// curious hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atari2600Analysis {
    pub paging_model: PagingModel,
    pub uses_superchip: bool,
}

const PLAUSIBLE_SIZES: [usize; 7] = [2048, 4096, 8192, 10495, 12288, 16384, 32768];

#[must_use]
pub fn analyse(data: &[u8]) -> Option<Target> {
    if !PLAUSIBLE_SIZES.contains(&data.len()) && data.len() != 65536 {
        return None;
    }

    let analysis = determine_paging(data);
    debug!("2600 paging verdict: {:?}", analysis.paging_model);

    Some(Target {
        machine: Machine::Atari2600,
        media: Media {
            cartridges: vec![data.to_vec()],
            ..Media::default()
        },
        loading_command: String::new(),
        confidence: 0.5,
        options: MachineOptions::Atari2600 {
            paging_model: analysis.paging_model,
            uses_superchip: analysis.uses_superchip,
        },
    })
}

/// Disassembles the final 4 KB of the image from its vectors.
fn disassemble_top(data: &[u8]) -> Disassembly {
    let top = &data[data.len().saturating_sub(4096)..];
    let entry = u16::from(top[0xFFC]) | (u16::from(top[0xFFD]) << 8);
    let brk = u16::from(top[0xFFE]) | (u16::from(top[0xFFF]) << 8);

    // Only addresses with A12 set reach the cartridge.
    let mapper = |address: u16| {
        if address & 0x1000 != 0 {
            Some((address & 0xFFF) as usize)
        } else {
            None
        }
    };
    disassemble(top, mapper, &[entry & 0x1FFF, brk & 0x1FFF])
}

fn internal_accesses(disassembly: &Disassembly) -> BTreeSet<u16> {
    let mut accesses = BTreeSet::new();
    accesses.extend(disassembly.internal_loads.iter().copied());
    accesses.extend(disassembly.internal_stores.iter().copied());
    accesses.extend(disassembly.internal_modifies.iter().copied());
    accesses
}

#[must_use]
pub fn determine_paging(data: &[u8]) -> Atari2600Analysis {
    let mut analysis = Atari2600Analysis {
        paging_model: PagingModel::None,
        uses_superchip: false,
    };

    if data.len() == 2048 {
        determine_2k(data, &mut analysis);
        return analysis;
    }

    let disassembly = disassemble_top(data);
    match data.len() {
        8192 => determine_8k(data, &disassembly, &mut analysis),
        10495 => analysis.paging_model = PagingModel::Pitfall2,
        12288 => analysis.paging_model = PagingModel::CbsRamPlus,
        16384 => determine_16k(&disassembly, &mut analysis),
        32768 => analysis.paging_model = PagingModel::Atari32k,
        65536 => {
            analysis.paging_model = if disassembly.external_stores.contains(&0x3F) {
                PagingModel::Tigervision
            } else {
                PagingModel::MegaBoy
            };
        }
        _ => {}
    }

    // Super Chip heuristic: images for RAM-equipped carts repeat their
    // first 128 bytes, since that window is unreadable as ROM.
    if analysis.paging_model != PagingModel::CbsRamPlus
        && analysis.paging_model != PagingModel::MNetwork
    {
        analysis.uses_superchip = data.len() >= 256 && data[..128] == data[128..256];
    }

    // A Tigervision-esque scheme reveals itself by external stores to $3F
    // even at otherwise-unpaged sizes.
    if analysis.paging_model == PagingModel::None
        && data.len() > 4096
        && disassembly.external_stores.contains(&0x3F)
    {
        analysis.paging_model = PagingModel::Tigervision;
    }

    analysis
}

fn determine_2k(data: &[u8], analysis: &mut Atari2600Analysis) {
    // A 2 KB image is either unpaged or a CommaVid; a CommaVid entry
    // point must land outside its RAM window.
    let entry = (u16::from(data[0x7FC]) | (u16::from(data[0x7FD]) << 8)) & 0x1FFF;
    let brk = (u16::from(data[0x7FE]) | (u16::from(data[0x7FF]) << 8)) & 0x1FFF;
    if entry < 0x1800 || brk < 0x1800 {
        return;
    }

    let mapper = |address: u16| {
        let address = address & 0x1FFF;
        if address >= 0x1800 {
            Some((address - 0x1800) as usize)
        } else {
            None
        }
    };
    let disassembly = disassemble(data, mapper, &[entry, brk]);

    // Any store that looks aimed at large amounts of memory implies the
    // CommaVid's RAM.
    let wide_store = disassembly
        .instructions_by_address
        .values()
        .any(|instruction| {
            instruction.operation == Operation::Store
                && matches!(
                    instruction.addressing_mode,
                    AddressingMode::IndexedIndirectX | AddressingMode::IndirectIndexedY
                )
        });
    if wide_store {
        analysis.paging_model = PagingModel::CommaVid;
    }
}

fn determine_8k(data: &[u8], disassembly: &Disassembly, analysis: &mut Atari2600Analysis) {
    // Activision stack titles put their vectors at the top of the low 4 KB
    // and open with SEI.
    if data[4095] == 0xF0
        && data[4093] == 0xF0
        && data[4094] == 0x00
        && data[4092] == 0x00
        && (data[8191] != 0xF0 || data[8189] != 0xF0 || data[8190] != 0x00 || data[8188] != 0x00)
        && data[0] == 0x78
    {
        analysis.paging_model = PagingModel::ActivisionStack;
        return;
    }

    analysis.paging_model = PagingModel::Atari8k;

    let accesses = internal_accesses(disassembly);
    let mut atari = 0;
    let mut parker = 0;
    for address in &accesses {
        let masked = address & 0x1FFF;
        atari += i32::from((0x1FF8..0x1FFA).contains(&masked));
        parker += i32::from((0x1FE0..0x1FF8).contains(&masked));
    }
    let tigervision = i32::from(disassembly.external_stores.contains(&0x3F));

    if parker > atari {
        analysis.paging_model = PagingModel::ParkerBros;
    } else if tigervision > atari {
        analysis.paging_model = PagingModel::Tigervision;
    }
}

fn determine_16k(disassembly: &Disassembly, analysis: &mut Atari2600Analysis) {
    analysis.paging_model = PagingModel::Atari16k;

    let accesses = internal_accesses(disassembly);
    let mut atari = 0;
    let mut mnetwork = 0;
    for address in &accesses {
        let masked = address & 0x1FFF;
        atari += i32::from((0x1FF6..0x1FFA).contains(&masked));
        mnetwork += i32::from((0x1FE0..0x1FFB).contains(&masked));
    }

    if mnetwork > atari {
        analysis.paging_model = PagingModel::MNetwork;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a 4 KB bank ending in vectors that point at `entry`.
    fn bank_with_program(program: &[u8], entry: u16) -> Vec<u8> {
        let mut bank = vec![0xEA; 4096];
        bank[..program.len()].copy_from_slice(program);
        bank[0xFFC] = (entry & 0xFF) as u8;
        bank[0xFFD] = 0xF0 | ((entry >> 8) & 0xF) as u8;
        bank[0xFFE] = (entry & 0xFF) as u8;
        bank[0xFFF] = 0xF0 | ((entry >> 8) & 0xF) as u8;
        bank
    }

    #[test]
    fn sixteen_kb_mnetwork_outvotes_atari() {
        // The program hammers $1FE4 (an M-Network hot address that is not
        // an Atari one) and never touches $1FF6–$1FF9.
        let program = [
            0xAD, 0xE4, 0x1F, // LDA $1FE4
            0xAD, 0xE5, 0x1F, // LDA $1FE5
            0xAD, 0xE6, 0x1F, // LDA $1FE6
            0x60, // RTS
        ];
        let mut image = vec![0u8; 16384 - 4096];
        image.extend(bank_with_program(&program, 0xF000));

        let analysis = determine_paging(&image);
        assert_eq!(analysis.paging_model, PagingModel::MNetwork);

        let target = analyse(&image).expect("16 KB image is plausible");
        assert!(target.confidence >= 0.5);
        assert_eq!(
            target.options,
            MachineOptions::Atari2600 {
                paging_model: PagingModel::MNetwork,
                uses_superchip: false,
            }
        );
    }

    #[test]
    fn sixteen_kb_defaults_to_atari16k() {
        let program = [
            0xAD, 0xF6, 0x1F, // LDA $1FF6
            0xAD, 0xF7, 0x1F, // LDA $1FF7
            0x60,
        ];
        let mut image = vec![0u8; 16384 - 4096];
        image.extend(bank_with_program(&program, 0xF000));

        assert_eq!(determine_paging(&image).paging_model, PagingModel::Atari16k);
    }

    #[test]
    fn special_sizes_map_directly() {
        assert_eq!(
            determine_paging(&vec![0; 10495]).paging_model,
            PagingModel::Pitfall2
        );
        assert_eq!(
            determine_paging(&vec![0; 12288]).paging_model,
            PagingModel::CbsRamPlus
        );
        assert_eq!(
            determine_paging(&vec![0; 32768]).paging_model,
            PagingModel::Atari32k
        );
    }

    #[test]
    fn superchip_detected_from_repeated_ram_window() {
        let program = [0x60];
        let mut image: Vec<u8> = Vec::new();
        // First 256 bytes: two identical 128-byte stripes.
        for _ in 0..2 {
            image.extend((0..128).map(|value| value as u8));
        }
        image.resize(16384 - 4096, 0);
        image.extend(bank_with_program(&program, 0xF000));

        assert!(determine_paging(&image).uses_superchip);
    }

    #[test]
    fn two_kb_commavid_needs_wide_stores() {
        // STA ($40),Y then RTS, reachable from the vectors.
        let program = [0x91, 0x40, 0x60];
        let mut image = vec![0xEA; 2048];
        image[..program.len()].copy_from_slice(&program);
        // Vectors at $F800-relative top; entry $1800.
        image[0x7FC] = 0x00;
        image[0x7FD] = 0x18;
        image[0x7FE] = 0x00;
        image[0x7FF] = 0x18;

        assert_eq!(determine_paging(&image).paging_model, PagingModel::CommaVid);

        // The same image with a plain store stays unpaged.
        let mut plain = image.clone();
        plain[0] = 0x8D; // STA absolute
        plain[1] = 0x00;
        plain[2] = 0x02;
        assert_eq!(determine_paging(&plain).paging_model, PagingModel::None);
    }
}
