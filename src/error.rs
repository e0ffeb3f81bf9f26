use std::fmt;
use std::sync::Arc;
use crate::codes::{disconnect, open};

/// Result type for our [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error that occured while handling an SSH connection.
///
/// When the connection fails, the error is recorded once and every operation that is still
/// waiting on the connection receives a clone of it, so this type is cheap to clone.
///
/// This enum is `#[non_exhaustive]`, new variants may be added in minor releases.
#[derive(thiserror::Error, Debug, Clone)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    #[error("cryptography error: {0}")]
    Crypto(&'static str),
    #[error("randomness error: {0}")]
    Random(&'static str),
    #[error("framing error: {0}")]
    Framing(&'static str),
    #[error("mac verification failed")]
    Mac,
    #[error("host key signature verification failed")]
    Signature,
    #[error("server host key was rejected")]
    HostKeyRejected,
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    #[error("unsupported protocol version: {0:?}")]
    Version(String),
    #[error("could not decode bytes: {0}")]
    Decode(&'static str),
    #[error("could not negotiate algorithm: {0}")]
    AlgoNegotiate(AlgoNegotiateError),
    #[error("algorithm {0:?} is not supported")]
    UnsupportedAlgo(String),
    #[error("unexpected message {0}")]
    UnexpectedMessage(u8),
    #[error("unexpected authentication message {0}")]
    UnexpectedAuthMessage(u8),
    #[error("unexpected channel message {0}")]
    UnexpectedChannelMessage(u8),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(&'static str),
    #[error("authentication was already attempted on this session")]
    AuthAlreadyAttempted,
    #[error("the session is not authenticated")]
    NotAuthenticated,
    #[error("channel is closed")]
    ChannelClosed,
    #[error("could not open channel: {0}")]
    ChannelOpen(ChannelOpenError),
    #[error("channel request failed")]
    ChannelReq,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("client was closed")]
    ClientClosed,
    #[error("IO error when reading")]
    ReadIo(#[source] Arc<std::io::Error>),
    #[error("IO error when writing")]
    WriteIo(#[source] Arc<std::io::Error>),
    #[error("connection unexpectedly closed by peer")]
    PeerClosed,
    #[error("peer disconnected: {0}")]
    PeerDisconnected(DisconnectError),
}

impl Error {
    pub(crate) fn read_io(err: std::io::Error) -> Error {
        Error::ReadIo(Arc::new(err))
    }

    pub(crate) fn write_io(err: std::io::Error) -> Error {
        Error::WriteIo(Arc::new(err))
    }
}

/// Error that occured because we could not negotiate an algorithm.
///
/// Client and server each list their algorithms in `SSH_MSG_KEXINIT` (RFC 4253, section 7.1) and
/// this error means that for one of the eight categories the two lists have nothing in common.
#[derive(Debug, Clone, thiserror::Error)]
#[error("for {algo_name:}, our algos are {our_algos:?}, their algos are {their_algos:?}")]
pub struct AlgoNegotiateError {
    /// Human readable name of the algorithm category.
    pub algo_name: String,
    /// The algorithms offered by us (the client).
    pub our_algos: Vec<String>,
    /// The algorithms offered by them (the server).
    pub their_algos: Vec<String>,
}

/// Error that occured because the peer disconnected.
///
/// This corresponds to `SSH_MSG_DISCONNECT` (RFC 4253, section 11.1). The same type is used when
/// we disconnect ourselves with [`Client::disconnect()`][crate::Client::disconnect()].
#[derive(Debug, Clone, thiserror::Error)]
pub struct DisconnectError {
    /// Machine-readable reason code (see [`codes::disconnect`][crate::codes::disconnect]).
    pub reason_code: u32,
    /// Human-readable description of the error.
    pub description: String,
    /// Language tag of `description` (per RFC 3066).
    pub description_lang: String,
}

impl DisconnectError {
    /// A disconnect with reason `SSH_DISCONNECT_BY_APPLICATION`.
    pub fn by_app() -> DisconnectError {
        DisconnectError {
            reason_code: disconnect::BY_APPLICATION,
            description: "client closed the connection".into(),
            description_lang: "".into(),
        }
    }

    /// Translates the [`reason_code`][Self::reason_code] into a string.
    pub fn reason_to_str(&self) -> Option<&'static str> {
        disconnect::to_str(self.reason_code)
    }

    /// A disconnect "by application" is an orderly shutdown, any other reason is abnormal.
    pub fn is_graceful(&self) -> bool {
        self.reason_code == disconnect::BY_APPLICATION
    }
}

impl fmt::Display for DisconnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_reason(f, disconnect::to_str(self.reason_code), self.reason_code, &self.description)
    }
}

/// Error that occured when opening a channel.
///
/// This corresponds to `SSH_MSG_CHANNEL_OPEN_FAILURE` (RFC 4254, section 5.1).
#[derive(Debug, Clone, thiserror::Error)]
pub struct ChannelOpenError {
    /// Machine-readable reason code (see [`codes::open`][crate::codes::open]).
    pub reason_code: u32,
    /// Human-readable description of the error.
    pub description: String,
    /// Language tag of `description` (per RFC 3066).
    pub description_lang: String,
}

impl fmt::Display for ChannelOpenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_reason(f, open::to_str(self.reason_code), self.reason_code, &self.description)
    }
}

fn fmt_reason(
    f: &mut fmt::Formatter,
    reason: Option<&'static str>,
    reason_code: u32,
    description: &str,
) -> fmt::Result {
    write!(f, "peer returned error ")?;
    if let Some(reason) = reason {
        write!(f, "`{}` ({})", reason, reason_code)?;
    } else {
        write!(f, "{}", reason_code)?;
    }
    if !description.is_empty() {
        write!(f, ": {:?}", description)?;
    }
    Ok(())
}
