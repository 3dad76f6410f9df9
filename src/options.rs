use super::{OPENSSH_DEFAULT_MAX_PACKET_SIZE, OPENSSH_DEFAULT_WINDOW_SIZE};

use std::num::NonZeroU32;

#[derive(Debug, Copy, Clone)]
pub struct ChannelOptions {
    local_window_size: Option<NonZeroU32>,
    local_max_packet_size: Option<NonZeroU32>,
    adjust_threshold: Option<NonZeroU32>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelOptions {
    pub const fn new() -> Self {
        Self {
            local_window_size: None,
            local_max_packet_size: None,
            adjust_threshold: None,
        }
    }

    /// Set `local_window_size`, the number of bytes the peer may send
    /// before we grant it more.
    ///
    /// It is [`OPENSSH_DEFAULT_WINDOW_SIZE`] by default.
    #[must_use]
    pub const fn local_window_size(mut self, local_window_size: NonZeroU32) -> Self {
        self.local_window_size = Some(local_window_size);
        self
    }

    pub const fn get_local_window_size(&self) -> NonZeroU32 {
        match self.local_window_size {
            Some(size) => size,
            None => OPENSSH_DEFAULT_WINDOW_SIZE,
        }
    }

    /// Set `local_max_packet_size`, the largest data frame the peer may send.
    ///
    /// It is [`OPENSSH_DEFAULT_MAX_PACKET_SIZE`] by default.
    #[must_use]
    pub const fn local_max_packet_size(mut self, local_max_packet_size: NonZeroU32) -> Self {
        self.local_max_packet_size = Some(local_max_packet_size);
        self
    }

    pub const fn get_local_max_packet_size(&self) -> NonZeroU32 {
        match self.local_max_packet_size {
            Some(size) => size,
            None => OPENSSH_DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Set `adjust_threshold`: a window adjustment is queued once more than
    /// this many bytes have been read since the last one.
    ///
    /// It is half of the local window size by default, and is capped at
    /// the local window size minus one since no more than a window can be
    /// read between two adjustments.
    #[must_use]
    pub const fn adjust_threshold(mut self, adjust_threshold: NonZeroU32) -> Self {
        self.adjust_threshold = Some(adjust_threshold);
        self
    }

    pub const fn get_adjust_threshold(&self) -> u32 {
        let window = self.get_local_window_size().get();

        let threshold = match self.adjust_threshold {
            Some(threshold) => threshold.get(),
            None => window / 2,
        };

        if threshold >= window {
            window - 1
        } else {
            threshold
        }
    }
}

/// Parameters announced by the peer in its channel open or open
/// confirmation message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RemoteParams {
    /// The peer's id for the channel.
    pub id: u32,
    /// Initial send window.
    pub window_size: u32,
    /// Largest data frame the peer accepts.
    pub max_packet_size: NonZeroU32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_openssh() {
        let options = ChannelOptions::default();

        assert_eq!(options.get_local_window_size().get(), 64 * 32768);
        assert_eq!(options.get_local_max_packet_size().get(), 32768);
        assert_eq!(options.get_adjust_threshold(), 32 * 32768);
    }

    #[test]
    fn overrides() {
        let options = ChannelOptions::new()
            .local_window_size(NonZeroU32::new(100).unwrap())
            .local_max_packet_size(NonZeroU32::new(10).unwrap());

        assert_eq!(options.get_local_window_size().get(), 100);
        assert_eq!(options.get_local_max_packet_size().get(), 10);
        assert_eq!(options.get_adjust_threshold(), 50);

        let options = options.adjust_threshold(NonZeroU32::new(7).unwrap());
        assert_eq!(options.get_adjust_threshold(), 7);
    }

    #[test]
    fn threshold_is_capped_below_the_window() {
        let options = ChannelOptions::new().local_window_size(NonZeroU32::new(8).unwrap());

        let capped = options.adjust_threshold(NonZeroU32::new(8).unwrap());
        assert_eq!(capped.get_adjust_threshold(), 7);

        let capped = options.adjust_threshold(NonZeroU32::new(1000).unwrap());
        assert_eq!(capped.get_adjust_threshold(), 7);

        let tiny = ChannelOptions::new().local_window_size(NonZeroU32::new(1).unwrap());
        assert_eq!(tiny.get_adjust_threshold(), 0);
    }
}
