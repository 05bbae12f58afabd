use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] duplex_slot::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The echoed payload differs from what was sent.
    #[error(
        "echo mismatch in round {round}: sent {sent} bytes, received {received} bytes, first difference at byte {first_diff}"
    )]
    EchoMismatch {
        round: u64,
        sent: usize,
        received: usize,
        first_diff: usize,
    },

    /// The responder closed the channel while a reply was expected.
    #[error("peer closed the channel mid-benchmark")]
    PeerClosed,

    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(String),

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("waitpid failed: {0}")]
    Wait(#[source] nix::Error),

    /// Responder process exited non-zero or was killed.
    #[error("responder failed: {0}")]
    ResponderFailed(String),
}
