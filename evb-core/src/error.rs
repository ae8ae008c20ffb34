use evb_wire::WireError;

/// Errors the engine can return. Out-of-order data, duplicate timestamps,
/// late fragments and stalled barriers are not modeled as errors: they are
/// notified to observers and counted in statistics instead, since none of
/// them prevent the engine from making forward progress.
#[derive(Debug, thiserror::Error)]
pub enum EvbError {
    #[error("malformed fragment block: {0}")]
    MalformedBlock(#[from] WireError),

    #[error("source {0} is not registered")]
    UnknownSource(u32),

    #[error("downstream write failed: {0}")]
    DownstreamWriteFailure(#[source] std::io::Error),

    #[error("sort thread channel closed")]
    SortChannelClosed,

    #[error("output thread channel closed")]
    OutputChannelClosed,
}

pub type Result<T> = std::result::Result<T, EvbError>;
