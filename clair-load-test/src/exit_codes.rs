#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// An attack could not complete (request task failure, unexpected engine state).
    AttackFailed = 20,

    /// Invalid CLI/config (bad flags, conflicting identifier sources, zero rate, empty batch, bad PSK).
    InvalidInput = 30,

    /// Internal/runtime error (process spawning, IO, unexpected invariants).
    RuntimeError = 40,

    /// Every attack completed but at least one result could not be published.
    PublishFailed = 50,

    /// Stopped by Ctrl-C.
    Interrupted = 130,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_publish_failures(failures: usize) -> Self {
        if failures == 0 {
            Self::Success
        } else {
            Self::PublishFailed
        }
    }
}
