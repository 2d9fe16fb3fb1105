//! A track backed by a flat bit-cell recording.

use emu_core::Time;

use crate::{Track, TrackEvent, TrackEventType};

/// A track stored as one bit per cell, all cells equally long. Set cells
/// are flux transitions; the index hole arrives at the wrap point.
pub struct PcmTrack {
    cells: Vec<bool>,
    cell_length: Time,
    position: usize,
    /// Cells consumed since the last emitted event.
    cells_since_event: u32,
}

impl PcmTrack {
    #[must_use]
    pub fn from_bits(cells: Vec<bool>, cell_length: Time) -> Self {
        Self {
            cells,
            cell_length,
            position: 0,
            cells_since_event: 0,
        }
    }

    /// Packs bytes most-significant-bit first.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], cell_length: Time) -> Self {
        let mut cells = Vec::with_capacity(bytes.len() * 8);
        for byte in bytes {
            for bit in (0..8).rev() {
                cells.push(byte & (1 << bit) != 0);
            }
        }
        Self::from_bits(cells, cell_length)
    }

    fn length_of(&self, cells: u32) -> Time {
        Time::new(self.cell_length.length * cells, self.cell_length.clock_rate)
    }
}

impl Track for PcmTrack {
    fn reset(&mut self) {
        self.position = 0;
        self.cells_since_event = 0;
    }

    fn next_event(&mut self) -> TrackEvent {
        loop {
            if self.position == self.cells.len() {
                self.position = 0;
                let length = self.length_of(self.cells_since_event);
                self.cells_since_event = 0;
                return TrackEvent {
                    event_type: TrackEventType::IndexHole,
                    length,
                };
            }

            let set = self.cells[self.position];
            self.position += 1;
            self.cells_since_event += 1;

            if set {
                let length = self.length_of(self.cells_since_event);
                self.cells_since_event = 0;
                return TrackEvent {
                    event_type: TrackEventType::FluxTransition,
                    length,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_lengths_sum_to_one_revolution() {
        // 64 cells with sparse transitions.
        let mut cells = vec![false; 64];
        cells[3] = true;
        cells[10] = true;
        cells[63] = true;
        let mut track = PcmTrack::from_bits(cells, Time::new(1, 250_000));

        let mut total = 0u32;
        loop {
            let event = track.next_event();
            total += event.length.length;
            if event.event_type == TrackEventType::IndexHole {
                break;
            }
        }
        assert_eq!(total, 64);
    }

    #[test]
    fn reset_restarts_the_stream() {
        let mut track = PcmTrack::from_bytes(&[0x80], Time::new(1, 250_000));
        let first = track.next_event();
        track.reset();
        assert_eq!(track.next_event(), first);
    }
}
