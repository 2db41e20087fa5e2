use thiserror::Error;

/// Result type for group operations.
pub type CollectiveResult<T> = Result<T, CollectiveError>;

/// Errors raised by group operations.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CollectiveError {
    /// A peer went away mid-collective.
    #[error("process group member {rank} is unreachable")]
    Unreachable {
        /// Rank of the unreachable member.
        rank: usize,
    },

    /// A rank argument fell outside the group.
    #[error("rank {rank} out of range for group of {size}")]
    RankOutOfRange {
        /// Offending rank.
        rank: usize,
        /// Group size.
        size: usize,
    },

    /// A message arrived from an unexpected sender, meaning members
    /// disagreed about the collective schedule.
    #[error("expected message from rank {expected}, got one from rank {actual}")]
    Mismatched {
        /// Sender the receiver was waiting for.
        expected: usize,
        /// Sender the message actually came from.
        actual: usize,
    },

    /// A broadcast payload could not be decoded.
    #[error("broadcast payload is malformed: {0}")]
    Payload(String),
}
