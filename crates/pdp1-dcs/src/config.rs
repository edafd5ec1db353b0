/// Channel numbers travel in the low 6 bits of a request block word, and 0100 is reserved as
/// the "no channel" marker.
pub const MAX_CHANNELS: usize = 0o77;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcsConfig {
    /// Number of channels in the table.
    pub channels: usize,
    /// Poll interval (instruction cycles) enabled when the controller initializes.
    pub poll_interval: u32,
    /// Backlog passed to `listen(2)` for server ports.
    pub listen_backlog: i32,
    /// Initial state of the priority-system enable bit (see RES).
    pub priority_enabled: bool,
}

impl DcsConfig {
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_poll_interval(mut self, cycles: u32) -> Self {
        self.poll_interval = cycles;
        self
    }

    /// Channel count actually used: at least one, at most [`MAX_CHANNELS`].
    pub fn channel_count(&self) -> usize {
        self.channels.clamp(1, MAX_CHANNELS)
    }
}

impl Default for DcsConfig {
    fn default() -> Self {
        Self {
            channels: 8,
            poll_interval: 20,
            listen_backlog: 4,
            priority_enabled: true,
        }
    }
}
