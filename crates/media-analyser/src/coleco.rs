//! ColecoVision cartridge recognition.

use crate::{Machine, MachineOptions, Media, Target};

/// What the header signature told us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColecoAnalysis {
    pub skips_title_screen: bool,
}

/// A Coleco cartridge is a single 8–32 KB block opening with the BIOS
/// signature `AA 55` (skip-title) or `55 AA` (title-screen).
#[must_use]
pub fn inspect(data: &[u8]) -> Option<ColecoAnalysis> {
    let size = data.len();
    if size & 8191 != 0 && size != 12 * 1024 {
        return None;
    }
    if !(8192..=32768).contains(&size) {
        return None;
    }

    match (data[0], data[1]) {
        (0xAA, 0x55) => Some(ColecoAnalysis {
            skips_title_screen: true,
        }),
        (0x55, 0xAA) => Some(ColecoAnalysis {
            skips_title_screen: false,
        }),
        _ => None,
    }
}

#[must_use]
pub fn analyse(data: &[u8]) -> Option<Target> {
    inspect(data)?;

    Some(Target {
        machine: Machine::ColecoVision,
        media: Media {
            cartridges: vec![data.to_vec()],
            ..Media::default()
        },
        loading_command: String::new(),
        // The signature plus size test leaves little room for a false
        // positive.
        confidence: 0.8,
        options: MachineOptions::None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_signature_orders() {
        let mut image = vec![0u8; 16384];
        image[0] = 0xAA;
        image[1] = 0x55;
        assert!(analyse(&image).is_some());

        image[0] = 0x55;
        image[1] = 0xAA;
        assert!(analyse(&image).is_some());
    }

    #[test]
    fn rejects_wrong_sizes_and_signatures() {
        let mut image = vec![0u8; 16384];
        image[0] = 0xAA;
        image[1] = 0x55;

        assert!(analyse(&image[..1000]).is_none());
        assert!(analyse(&vec![0u8; 65536]).is_none());

        image[1] = 0x00;
        assert!(analyse(&image).is_none());
    }

    #[test]
    fn twelve_kb_is_allowed() {
        let mut image = vec![0u8; 12 * 1024];
        image[0] = 0x55;
        image[1] = 0xAA;
        assert!(analyse(&image).is_some());
    }
}
