//! MSX cartridge mapper detection.
//!
//! Megaroms larger than 32 KB need a mapper, and the ROM betrays which by
//! the addresses its code writes bank numbers to. Occurrences of
//! `LD (nnnn), A` against each scheme's switching registers are tallied
//! and the best-scoring scheme wins.

use log::debug;

use crate::{Machine, MachineOptions, Media, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsxMapper {
    /// No paging: the image fits the cartridge window directly.
    None,
    Konami,
    KonamiWithScc,
    Ascii8Kb,
    Ascii16Kb,
}

/// Scores, per mapper, for inspection and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsxAnalysis {
    pub konami: u32,
    pub konami_scc: u32,
    pub ascii_8kb: u32,
    pub ascii_16kb: u32,
}

impl MsxAnalysis {
    #[must_use]
    pub fn verdict(&self) -> MsxMapper {
        let best = self
            .konami
            .max(self.konami_scc)
            .max(self.ascii_8kb)
            .max(self.ascii_16kb);
        if best == 0 {
            MsxMapper::None
        } else if best == self.konami_scc {
            MsxMapper::KonamiWithScc
        } else if best == self.konami {
            MsxMapper::Konami
        } else if best == self.ascii_8kb {
            MsxMapper::Ascii8Kb
        } else {
            MsxMapper::Ascii16Kb
        }
    }
}

/// Tallies `LD (nnnn), A` opcodes against each mapper's switch addresses.
#[must_use]
pub fn score(data: &[u8]) -> MsxAnalysis {
    let mut analysis = MsxAnalysis::default();

    for window in data.windows(3) {
        if window[0] != 0x32 {
            continue;
        }
        let address = u16::from(window[1]) | (u16::from(window[2]) << 8);
        match address {
            // Unambiguous registers score double; $6000 and $7000 are
            // shared between schemes and count as weak evidence for each.
            0x8000 | 0xA000 => analysis.konami += 2,
            0x5000 | 0x9000 | 0xB000 => analysis.konami_scc += 2,
            0x6800 | 0x7800 => analysis.ascii_8kb += 2,
            0x6000 => {
                analysis.konami += 1;
                analysis.ascii_8kb += 1;
                analysis.ascii_16kb += 1;
            }
            0x7000 => {
                analysis.konami_scc += 1;
                analysis.ascii_8kb += 1;
                analysis.ascii_16kb += 2;
            }
            _ => {}
        }
    }

    analysis
}

#[must_use]
pub fn analyse(data: &[u8]) -> Option<Target> {
    // The cartridge header: "AB" at the start of a 16 KB-aligned image.
    if data.len() < 16 || data.len() % 8192 != 0 {
        return None;
    }
    if &data[0..2] != b"AB" {
        return None;
    }

    let mapper = if data.len() > 32768 {
        let analysis = score(data);
        debug!("MSX mapper scores: {analysis:?}");
        analysis.verdict()
    } else {
        MsxMapper::None
    };

    Some(Target {
        machine: Machine::Msx,
        media: Media {
            cartridges: vec![data.to_vec()],
            ..Media::default()
        },
        loading_command: String::new(),
        confidence: 0.6,
        options: MachineOptions::Msx { mapper },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn megarom_with_stores(addresses: &[u16]) -> Vec<u8> {
        let mut image = vec![0u8; 131_072];
        image[0] = b'A';
        image[1] = b'B';
        let mut offset = 16;
        for &address in addresses {
            image[offset] = 0x32; // LD (nnnn), A
            image[offset + 1] = (address & 0xFF) as u8;
            image[offset + 2] = (address >> 8) as u8;
            offset += 3;
        }
        image
    }

    #[test]
    fn konami_pattern_wins() {
        let image = megarom_with_stores(&[0x6000, 0x8000, 0xA000, 0x8000]);
        let Some(target) = analyse(&image) else {
            panic!("megarom should be recognised");
        };
        assert_eq!(
            target.options,
            MachineOptions::Msx {
                mapper: MsxMapper::Konami
            }
        );
    }

    #[test]
    fn scc_pattern_wins() {
        let image = megarom_with_stores(&[0x5000, 0x7000, 0x9000, 0xB000, 0x9000]);
        let Some(Target {
            options: MachineOptions::Msx { mapper },
            ..
        }) = analyse(&image)
        else {
            panic!("megarom should be recognised");
        };
        assert_eq!(mapper, MsxMapper::KonamiWithScc);
    }

    #[test]
    fn ascii_8kb_pattern_wins() {
        let image = megarom_with_stores(&[0x6800, 0x7800, 0x6800, 0x7800]);
        let analysis = score(&image);
        assert_eq!(analysis.verdict(), MsxMapper::Ascii8Kb);
    }

    #[test]
    fn small_cartridges_need_no_mapper() {
        let mut image = vec![0u8; 32768];
        image[0] = b'A';
        image[1] = b'B';
        let Some(Target {
            options: MachineOptions::Msx { mapper },
            ..
        }) = analyse(&image)
        else {
            panic!("plain cartridge should be recognised");
        };
        assert_eq!(mapper, MsxMapper::None);
    }

    #[test]
    fn missing_header_is_rejected() {
        let image = vec![0u8; 32768];
        assert!(analyse(&image).is_none());
    }
}
