//! The host-provided audio sink.

/// Receiver of completed audio sample blocks.
///
/// The producer runs on the emulation thread; the consumer typically
/// dequeues on a host audio thread. The boundary between the two must be a
/// bounded buffer with overwrite-oldest semantics — the emulation thread
/// never blocks on audio.
pub trait SpeakerDelegate {
    /// Delivers a block of interleaved signed 16-bit samples.
    fn complete_samples(&mut self, samples: &[i16]);

    /// The producer's ideal output rate changed, e.g. because the machine
    /// was reconfigured between PAL and NTSC.
    fn sample_rate_changed(&mut self, sample_rate: u32) {
        let _ = sample_rate;
    }
}
