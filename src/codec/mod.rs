pub use self::packet_encode::PacketEncode;
pub use self::packet_decode::PacketDecode;
pub(crate) use self::ident::check_ident;
pub(crate) use self::recv_pipe::{RecvPipe, RecvPacket};
pub(crate) use self::send_pipe::SendPipe;

/// Maximum value of the `packet_length` field that we accept from the peer (RFC 4253, section
/// 6.1 requires at least 35000).
pub(crate) const PACKET_LEN_MAX: usize = 35000;

pub(crate) struct Codec {
    pub recv_pipe: RecvPipe,
    pub send_pipe: SendPipe,
}

mod ident;
mod packet_encode;
mod packet_decode;
mod recv_pipe;
mod send_pipe;
