//! Static media analysis.
//!
//! Given a media file, each per-machine analyser judges whether the file
//! is plausibly for its machine, fills in machine-specific options — a
//! 2600 paging model, a CPC loading command, an MSX mapper — and assigns a
//! confidence in [0, 1]. The host runs the resulting targets in confidence
//! order. Nothing here executes the media; everything is inference from
//! bytes.

mod amstrad;
mod atari2600;
mod coleco;
mod disassembler;
mod msx;

pub use amstrad::AmstradCpcAnalysis;
pub use atari2600::{Atari2600Analysis, PagingModel};
pub use coleco::ColecoAnalysis;
pub use disassembler::{AddressingMode, Disassembly, Operation, disassemble};
pub use msx::{MsxAnalysis, MsxMapper};

/// Everything a target might need to carry.
#[derive(Debug, Clone, Default)]
pub struct Media {
    pub disks: Vec<Vec<u8>>,
    pub tapes: Vec<Vec<u8>>,
    pub cartridges: Vec<Vec<u8>>,
}

impl Media {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.disks.is_empty() && self.tapes.is_empty() && self.cartridges.is_empty()
    }
}

/// The machines an analyser can nominate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    AmstradCpc,
    Archimedes,
    Atari2600,
    ColecoVision,
    Msx,
    ZxSpectrum,
}

/// Machine-specific configuration decided by analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineOptions {
    Atari2600 {
        paging_model: PagingModel,
        uses_superchip: bool,
    },
    Msx {
        mapper: MsxMapper,
    },
    None,
}

/// One proposed machine + configuration for a piece of media.
#[derive(Debug, Clone)]
pub struct Target {
    pub machine: Machine,
    pub media: Media,
    /// Text typed into the machine to start the media, where applicable.
    pub loading_command: String,
    /// Plausibility in [0, 1]; 0.5 is "plausible but not confirmed".
    pub confidence: f32,
    pub options: MachineOptions,
}

/// Analyses `data` under its file name, returning targets ordered from
/// most to least confident. An empty list means no analyser recognised
/// the media.
#[must_use]
pub fn targets_for(file_name: &str, data: &[u8]) -> Vec<Target> {
    let extension = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut targets = Vec::new();

    match extension.as_str() {
        "a26" => {
            targets.extend(atari2600::analyse(data));
        }
        "dsk" => {
            targets.extend(amstrad::analyse(data));
        }
        "col" => {
            targets.extend(coleco::analyse(data));
        }
        "rom" | "bin" | "cart" => {
            // Ambiguous cartridge extensions: let every cartridge analyser
            // have a look.
            targets.extend(msx::analyse(data));
            targets.extend(coleco::analyse(data));
            targets.extend(atari2600::analyse(data));
        }
        _ => {}
    }

    targets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(core::cmp::Ordering::Equal)
    });
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_media_yields_no_targets() {
        assert!(targets_for("mystery.xyz", &[0; 1024]).is_empty());
    }

    #[test]
    fn targets_arrive_in_confidence_order() {
        // A Coleco-signature image under a generic extension: Coleco
        // should outrank the fallback cartridge guesses.
        let mut image = vec![0u8; 32768];
        image[0] = 0xAA;
        image[1] = 0x55;
        let targets = targets_for("game.rom", &image);
        assert!(!targets.is_empty());
        for pair in targets.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert_eq!(targets[0].machine, Machine::ColecoVision);
    }
}
