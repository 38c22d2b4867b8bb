//! Body size ceiling shared by the dispatcher and the client.

/// Ceiling applied when none is configured: 4 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 << 20;

/// Largest body, in bytes, either side reads into memory.
///
/// ```
/// use apiwire_core::MessageLimits;
///
/// let limits = MessageLimits::new(1024);
/// assert_eq!(limits.exceeded_by(2048), Some(1024));
/// assert_eq!(limits.exceeded_by(512), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageLimits {
    max: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageLimits {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max: max_message_size,
        }
    }

    /// The ceiling, in the form body readers take it.
    pub fn max_message_size(&self) -> Option<usize> {
        Some(self.max)
    }

    /// The ceiling, if an announced length of `length` bytes is over it.
    pub fn exceeded_by(&self, length: u64) -> Option<usize> {
        (length > self.max as u64).then_some(self.max)
    }
}
