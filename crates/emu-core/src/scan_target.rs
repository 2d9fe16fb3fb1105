//! The host-provided video sink.

/// Receiver for raster output.
///
/// A video source walks its line and describes it as a sequence of sync,
/// blank, level and data periods, all measured in master-clock cycles. The
/// host decides how to composite those into a picture; the source promises
/// only that periods are emitted in beam order and that pixel data written
/// through `begin_data` is complete before the matching `output_data`.
///
/// Implementations must never block: if a frame cannot be accepted the sink
/// should drop data rather than stall the emulation thread.
pub trait ScanTarget {
    /// A period of sync level.
    fn output_sync(&mut self, duration: u32);

    /// A period of blanking.
    fn output_blank(&mut self, duration: u32);

    /// A period of constant colour, e.g. border.
    fn output_level(&mut self, duration: u32, colour: u16);

    /// A colour burst at the given phase angle.
    fn output_colour_burst(&mut self, duration: u32, phase: u8);

    /// Requests a buffer for up to `required_pixels` pixels of upcoming data.
    ///
    /// Returns `None` if the sink cannot accept pixels right now; the source
    /// should then skip the corresponding `output_data`.
    fn begin_data(&mut self, required_pixels: usize) -> Option<&mut [u16]>;

    /// Commits `pixel_count` pixels from the most recent `begin_data` buffer,
    /// displayed over `duration` master cycles.
    fn output_data(&mut self, duration: u32, pixel_count: usize);
}
