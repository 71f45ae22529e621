use crate::command::CommandCode;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// A request buffer ended before the 3-byte header.
    #[error("request truncated below header: {len} bytes")]
    HeaderTooShort { len: usize },

    /// The command byte does not name a known command.
    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    /// A request buffer is shorter than its command's fixed layout.
    #[error("{command} request too short: {len} bytes, need {min}")]
    RequestTooShort {
        command: CommandCode,
        len: usize,
        min: usize,
    },

    /// A response buffer is shorter than the 2-byte response header.
    #[error("{command} response too short: {len} bytes")]
    ResponseTooShort { command: CommandCode, len: usize },

    /// A successful block response did not carry exactly one block.
    #[error("block response must carry exactly {expected} data bytes, got {len}")]
    BlockSizeMismatch { len: usize, expected: usize },

    /// A device information block payload has the wrong size.
    #[error("device info block must be {expected} bytes, got {len}")]
    InfoTooShort { len: usize, expected: usize },
}

pub type Result<T> = std::result::Result<T, ProtoError>;
