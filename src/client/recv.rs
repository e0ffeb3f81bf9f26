use futures_core::ready;
use std::task::{Context, Poll};
use crate::codec::{PacketDecode, PacketEncode, RecvPacket};
use crate::codes::msg;
use crate::error::{Error, Result, DisconnectError};
use super::{auth, conn, negotiate};
use super::client_event::{ClientEvent, DebugMsg};
use super::client_state::ClientState;
use super::pump::Pump;

/// Work that must finish before the next packet is read from the server.
///
/// Delivering an event may block on a full channel, and we must not read further packets until
/// the event is delivered, otherwise events could be reordered.
pub(super) trait RecvState {
    fn poll(&mut self, st: &mut ClientState, cx: &mut Context) -> Poll<Result<()>>;
}

pub(super) type ResultRecvState = Result<Option<Box<dyn RecvState + Send>>>;

pub(super) fn pump_recv(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    match st.recv_st.take() {
        Some(mut recv_st) => match recv_st.poll(st, cx) {
            Poll::Ready(Ok(())) => Ok(Pump::Progress),
            Poll::Ready(Err(err)) => Err(err),
            Poll::Pending => {
                st.recv_st = Some(recv_st);
                Ok(Pump::Pending)
            },
        },
        None => Ok(Pump::Pending),
    }
}

pub(super) fn recv_packet(st: &mut ClientState, packet: RecvPacket) -> ResultRecvState {
    let mut payload = PacketDecode::new(packet.payload.clone());
    let msg_id = payload.get_u8()?;
    log::trace!("received packet {}, seq {}", msg_id, packet.packet_seq);
    match msg_id {
        msg::DISCONNECT => recv_disconnect(st, &mut payload),
        msg::IGNORE => Ok(None),
        msg::UNIMPLEMENTED => recv_unimplemented(st, &mut payload),
        msg::DEBUG => recv_debug(st, &mut payload),
        msg::SERVICE_ACCEPT => recv_service_accept(st, &mut payload),
        msg::KEXINIT | msg::NEWKEYS =>
            negotiate::recv_negotiate_packet(st, msg_id, &mut payload),
        30..=49 => negotiate::recv_kex_packet(st, msg_id, &mut payload),
        msg::USERAUTH_FAILURE | msg::USERAUTH_SUCCESS | msg::USERAUTH_BANNER =>
            auth::recv_auth_packet(st, msg_id, &mut payload),
        60..=79 => auth::recv_auth_method_packet(st, msg_id, &mut payload),
        msg::GLOBAL_REQUEST..=msg::CHANNEL_FAILURE =>
            conn::recv_conn_packet(st, msg_id, &mut payload),
        _ => send_unimplemented(st, msg_id, packet.packet_seq),
    }
}

fn recv_disconnect(_: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let disconnect = DisconnectError {
        reason_code: payload.get_u32()?,
        description: payload.get_string()?,
        description_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_DISCONNECT: {:?}", disconnect);
    Err(Error::PeerDisconnected(disconnect))
}

fn recv_debug(_: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let debug_msg = DebugMsg {
        always_display: payload.get_bool()?,
        message: payload.get_string()?,
        message_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_DEBUG: {:?}", debug_msg.message);
    send_event(ClientEvent::DebugMsg(debug_msg))
}

fn recv_unimplemented(_: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let packet_seq = payload.get_u32()?;
    log::debug!("received SSH_MSG_UNIMPLEMENTED for packet seq {}", packet_seq);
    Ok(None)
}

fn recv_service_accept(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let service_name = payload.get_string()?;
    if service_name != "ssh-userauth" {
        log::debug!("received SSH_MSG_SERVICE_ACCEPT for unknown service {:?}", service_name);
        return Err(Error::UnexpectedMessage(msg::SERVICE_ACCEPT))
    }
    auth::recv_service_accept(st)
}

fn send_unimplemented(st: &mut ClientState, msg_id: u8, packet_seq: u32) -> ResultRecvState {
    log::debug!("received unknown packet {}, seq {}, replying SSH_MSG_UNIMPLEMENTED",
        msg_id, packet_seq);
    let mut reply = PacketEncode::new();
    reply.put_u8(msg::UNIMPLEMENTED);
    reply.put_u32(packet_seq);
    st.codec.send_pipe.feed_packet(&reply.finish())?;
    Ok(None)
}

pub(super) fn send_event(event: ClientEvent) -> ResultRecvState {
    struct SendEventState {
        event: Option<ClientEvent>,
    }

    impl RecvState for SendEventState {
        fn poll(&mut self, st: &mut ClientState, cx: &mut Context) -> Poll<Result<()>> {
            let reserve_res = ready!(st.event_tx.poll_reserve(cx));
            if let (Ok(()), Some(event)) = (reserve_res, self.event.take()) {
                // the receiver may be dropped at any time, then we just ignore the event
                let _ = st.event_tx.send_item(event);
            }
            Poll::Ready(Ok(()))
        }
    }

    Ok(Some(Box::new(SendEventState { event: Some(event) })))
}
