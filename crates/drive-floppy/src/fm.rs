//! FM (single density) encoding and a sector-image disk.

use emu_core::Time;

use crate::{Disk, PcmTrack, Track};

/// FM cell rate: 125 kbit/s of data, two cells per data bit.
pub const FM_CELL_RATE: u32 = 250_000;

/// Cells in one 200 ms revolution at the FM cell rate.
pub const CELLS_PER_REVOLUTION: usize = 50_000;

/// The address marks, as full 16-cell clock/data patterns. Their missing
/// clock pulses are what distinguishes them from ordinary data bytes.
pub const INDEX_ADDRESS_MARK: u16 = 0xF77A; // data $FC, clock $D7
pub const ID_ADDRESS_MARK: u16 = 0xF57E; // data $FE, clock $C7
pub const DATA_ADDRESS_MARK: u16 = 0xF56F; // data $FB, clock $C7
pub const DELETED_DATA_ADDRESS_MARK: u16 = 0xF56A; // data $F8, clock $C7

/// CRC-CCITT as the WD controllers compute it: polynomial $1021,
/// initial value $FFFF, big-endian bit order.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Interleaves a clock byte and a data byte into 16 cells, clock first.
#[must_use]
pub fn interleave(clock: u8, data: u8) -> u16 {
    let mut cells = 0u16;
    for bit in 0..8 {
        cells |= u16::from((clock >> (7 - bit)) & 1) << (15 - bit * 2);
        cells |= u16::from((data >> (7 - bit)) & 1) << (14 - bit * 2);
    }
    cells
}

/// One sector's identity and contents.
#[derive(Debug, Clone)]
pub struct Sector {
    pub cylinder: u8,
    pub head: u8,
    pub sector: u8,
    pub data: Vec<u8>,
}

impl Sector {
    /// The size code recorded in the ID field: data length is
    /// `128 << code`.
    #[must_use]
    pub fn size_code(&self) -> u8 {
        match self.data.len() {
            128 => 0,
            256 => 1,
            512 => 2,
            _ => 3,
        }
    }
}

struct CellWriter {
    cells: Vec<bool>,
}

impl CellWriter {
    fn push_pattern(&mut self, pattern: u16) {
        for bit in (0..16).rev() {
            self.cells.push(pattern & (1 << bit) != 0);
        }
    }

    fn push_byte(&mut self, byte: u8) {
        self.push_pattern(interleave(0xFF, byte));
    }

    fn push_bytes(&mut self, byte: u8, count: usize) {
        for _ in 0..count {
            self.push_byte(byte);
        }
    }
}

/// Lays out the sectors of one track in FM, with standard-ish gaps, padded
/// to a full revolution.
#[must_use]
pub fn build_track(sectors: &[&Sector]) -> PcmTrack {
    let mut writer = CellWriter { cells: Vec::new() };

    // Post-index gap and the index mark.
    writer.push_bytes(0xFF, 16);
    writer.push_bytes(0x00, 6);
    writer.push_pattern(INDEX_ADDRESS_MARK);

    for sector in sectors {
        // ID field.
        writer.push_bytes(0xFF, 11);
        writer.push_bytes(0x00, 6);
        writer.push_pattern(ID_ADDRESS_MARK);
        let id = [
            sector.cylinder,
            sector.head,
            sector.sector,
            sector.size_code(),
        ];
        for byte in id {
            writer.push_byte(byte);
        }
        let id_crc = crc16(&[&[0xFE], &id[..]].concat());
        writer.push_byte((id_crc >> 8) as u8);
        writer.push_byte(id_crc as u8);

        // Gap 2, then the data field.
        writer.push_bytes(0xFF, 11);
        writer.push_bytes(0x00, 6);
        writer.push_pattern(DATA_ADDRESS_MARK);
        for &byte in &sector.data {
            writer.push_byte(byte);
        }
        let data_crc = crc16(&[&[0xFB], &sector.data[..]].concat());
        writer.push_byte((data_crc >> 8) as u8);
        writer.push_byte(data_crc as u8);
        writer.push_byte(0xFF);
    }

    // Fill the remainder of the revolution with gap bytes.
    while writer.cells.len() < CELLS_PER_REVOLUTION {
        writer.push_byte(0xFF);
    }

    PcmTrack::from_bits(writer.cells, Time::new(1, FM_CELL_RATE))
}

/// An in-memory disk holding discrete sectors, rendered to FM on demand.
pub struct SectorDisk {
    sectors: Vec<Sector>,
    write_protected: bool,
}

impl SectorDisk {
    #[must_use]
    pub fn new(sectors: Vec<Sector>, write_protected: bool) -> Self {
        Self {
            sectors,
            write_protected,
        }
    }

    #[must_use]
    pub fn sector(&self, cylinder: u8, head: u8, sector: u8) -> Option<&Sector> {
        self.sectors
            .iter()
            .find(|s| s.cylinder == cylinder && s.head == head && s.sector == sector)
    }
}

impl Disk for SectorDisk {
    fn track(&self, cylinder: u8, head: u8) -> Option<Box<dyn Track>> {
        let sectors: Vec<&Sector> = self
            .sectors
            .iter()
            .filter(|s| s.cylinder == cylinder && s.head == head)
            .collect();
        if sectors.is_empty() {
            return None;
        }
        Some(Box::new(build_track(&sectors)))
    }

    fn write_protected(&self) -> bool {
        self.write_protected
    }

    fn commit_sector(&mut self, cylinder: u8, head: u8, sector: u8, data: &[u8]) {
        if let Some(existing) = self
            .sectors
            .iter_mut()
            .find(|s| s.cylinder == cylinder && s.head == head && s.sector == sector)
        {
            let count = existing.data.len().min(data.len());
            existing.data[..count].copy_from_slice(&data[..count]);
        }
    }

    fn read_sector(&self, cylinder: u8, head: u8, sector: u8) -> Option<Vec<u8>> {
        self.sector(cylinder, head, sector).map(|s| s.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackEventType;

    #[test]
    fn address_marks_match_their_interleavings() {
        assert_eq!(interleave(0xD7, 0xFC), INDEX_ADDRESS_MARK);
        assert_eq!(interleave(0xC7, 0xFE), ID_ADDRESS_MARK);
        assert_eq!(interleave(0xC7, 0xFB), DATA_ADDRESS_MARK);
        assert_eq!(interleave(0xC7, 0xF8), DELETED_DATA_ADDRESS_MARK);
    }

    #[test]
    fn crc_matches_known_vector() {
        // The CCITT check value for "123456789".
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn track_fills_exactly_one_revolution() {
        let sector = Sector {
            cylinder: 0,
            head: 0,
            sector: 1,
            data: (0..=255).collect(),
        };
        let mut track = build_track(&[&sector]);

        let mut total_cells = 0u32;
        loop {
            let event = track.next_event();
            total_cells += event.length.length;
            if event.event_type == TrackEventType::IndexHole {
                break;
            }
        }
        assert_eq!(total_cells as usize, CELLS_PER_REVOLUTION);
    }

    #[test]
    fn commit_sector_rewrites_contents() {
        let mut disk = SectorDisk::new(
            vec![Sector {
                cylinder: 0,
                head: 0,
                sector: 1,
                data: vec![0; 4],
            }],
            false,
        );
        disk.commit_sector(0, 0, 1, &[1, 2, 3, 4]);
        assert_eq!(disk.sector(0, 0, 1).map(|s| s.data.clone()), Some(vec![1, 2, 3, 4]));
    }
}
