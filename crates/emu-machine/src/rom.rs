//! ROM requests and fetching.

use flate2::Crc;

/// Names one ROM a machine needs, with enough metadata for a host to
/// find and verify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomRequest {
    pub machine_name: &'static str,
    pub file_name: &'static str,
    pub expected_size: usize,
    /// CRC32 of the expected image, or `None` where any dump will do.
    pub expected_crc: Option<u32>,
}

impl RomRequest {
    /// Verifies a candidate image against the request.
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        if data.len() != self.expected_size {
            return false;
        }
        match self.expected_crc {
            None => true,
            Some(expected) => {
                let mut crc = Crc::new();
                crc.update(data);
                crc.sum() == expected
            }
        }
    }
}

/// Maps a request onto ROM file contents, or `None` if unavailable.
pub trait RomFetcher {
    fn fetch(&self, request: &RomRequest) -> Option<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_and_crc_are_checked() {
        let request = RomRequest {
            machine_name: "test",
            file_name: "rom.bin",
            expected_size: 4,
            expected_crc: Some({
                let mut crc = Crc::new();
                crc.update(&[1, 2, 3, 4]);
                crc.sum()
            }),
        };

        assert!(request.matches(&[1, 2, 3, 4]));
        assert!(!request.matches(&[1, 2, 3]));
        assert!(!request.matches(&[4, 3, 2, 1]));
    }

    #[test]
    fn any_dump_passes_without_a_crc() {
        let request = RomRequest {
            machine_name: "test",
            file_name: "rom.bin",
            expected_size: 2,
            expected_crc: None,
        };
        assert!(request.matches(&[9, 9]));
    }
}
