use std::io;

/// Disposition-carrying error for a single request's current operation.
///
/// None of these ever escape the reactor: every variant is matched on
/// inside a sweep and turned into a reschedule, a `Delete`, or a dropped
/// DNS response, per the error handling design.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("SOCKS protocol error: {0}")]
    Protocol(&'static str),

    #[error("name resolution yielded no addresses")]
    Resolution,

    #[error("retry budget exhausted")]
    RetriesExhausted,

    #[error("unknown connection mode reached at runtime")]
    UnknownMode,

    #[error("cancelled by cooperative termination")]
    Terminated,
}

impl ConnectError {
    pub fn protocol(msg: &'static str) -> Self {
        Self::Protocol(msg)
    }
}
