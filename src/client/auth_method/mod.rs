use bytes::Bytes;
use std::task::{Context, Poll};
use crate::codec::PacketDecode;
use crate::error::Result;

pub(super) mod keyboard_interactive;
pub(super) mod password;
pub(super) mod pubkey;

/// One method of user authentication (RFC 4252, section 5), driven by the auth state.
///
/// The generic part of the protocol (service request, `SSH_MSG_USERAUTH_SUCCESS` and
/// `SSH_MSG_USERAUTH_FAILURE`) is handled by the auth state itself, the method only produces its
/// requests and handles the method-specific messages.
pub(super) trait AuthMethod {
    fn name(&self) -> &'static str;

    /// True if the server may continue with method-specific messages instead of a final answer.
    fn is_interactive(&self) -> bool;

    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()>;

    /// Produces the next packet that should be sent to the server.
    ///
    /// An error fails only this authentication attempt, not the whole connection.
    fn poll_send_packet(&mut self, session_id: &[u8], cx: &mut Context)
        -> Poll<Result<Option<Bytes>>>;
}
