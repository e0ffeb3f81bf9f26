use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::task::Context;
use tokio::sync::{mpsc, oneshot};
use crate::codec::{PacketEncode, PacketDecode};
use crate::codes::{msg, open};
use crate::error::{Result, Error};
use super::{auth, negotiate};
use super::channel::{ChannelConfig, ChannelEvent, DataType};
use super::channel_state::{self, ChannelState, ChannelInit};
use super::client_state::{self, ClientState};
use super::pump::Pump;
use super::recv::ResultRecvState;

/// Capacity of the queue of events of each channel.
const CHANNEL_EVENT_CAPACITY: usize = 16;

#[derive(Default)]
pub(super) struct ConnState {
    channels: HashMap<u32, Arc<Mutex<ChannelState>>>,
    next_id: u32,
    replies: VecDeque<Bytes>,
}

pub(super) struct OpenedChannel {
    pub our_id: u32,
    pub channel_st: Weak<Mutex<ChannelState>>,
    pub event_rx: mpsc::Receiver<ChannelEvent>,
    pub open_rx: oneshot::Receiver<Result<Bytes>>,
}

pub(super) fn init_conn() -> ConnState {
    ConnState::default()
}

pub(super) fn pump_conn(st: &mut ClientState, _cx: &mut Context) -> Result<Pump> {
    let mut progress = Pump::Pending;
    let ready = negotiate::is_ready(st);

    if ready {
        while let Some(reply) = st.conn_st.replies.pop_front() {
            st.codec.send_pipe.feed_packet(&reply)?;
            progress = Pump::Progress;
        }
    }

    let mut finished_ids = Vec::new();
    for (&our_id, channel_mutex) in st.conn_st.channels.iter() {
        let mut channel_st = channel_mutex.lock();
        while channel_state::pump_channel(&mut channel_st)?.is_progress() {
            progress = Pump::Progress;
        }

        // channel messages must not interleave with a key exchange, so they wait in the outbox
        if ready {
            while let Some(payload) = channel_state::pop_outbox(&mut channel_st) {
                st.codec.send_pipe.feed_packet(&payload)?;
                progress = Pump::Progress;
            }
            if channel_state::is_finished(&channel_st) {
                finished_ids.push(our_id);
            }
        }
    }

    for our_id in finished_ids {
        log::debug!("removing our channel {}", our_id);
        st.conn_st.channels.remove(&our_id);
    }

    Ok(progress)
}

pub(super) fn open_channel(
    st: &mut ClientState,
    channel_type: String,
    open_payload: Bytes,
    config: &ChannelConfig,
) -> Result<OpenedChannel> {
    if !auth::is_authenticated(st) {
        return Err(Error::NotAuthenticated)
    }

    let our_id = st.conn_st.next_id;
    st.conn_st.next_id = our_id.checked_add(1)
        .ok_or(Error::Protocol("all channel ids were used"))?;

    let (event_tx, event_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
    let (open_tx, open_rx) = oneshot::channel();
    let channel_st = channel_state::init_channel(ChannelInit {
        our_id,
        channel_type,
        open_payload,
        config: config.clone(),
        event_tx,
        open_tx,
    });
    let channel_st = Arc::new(Mutex::new(channel_st));
    let weak_channel_st = Arc::downgrade(&channel_st);
    st.conn_st.channels.insert(our_id, channel_st);

    client_state::wakeup_client(st);
    Ok(OpenedChannel { our_id, channel_st: weak_channel_st, event_rx, open_rx })
}

pub(super) fn recv_conn_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::GLOBAL_REQUEST => recv_global_request(st, payload),
        msg::REQUEST_SUCCESS | msg::REQUEST_FAILURE => {
            // we never send global requests, so there is nothing to reply to
            Err(Error::UnexpectedMessage(msg_id))
        },
        msg::CHANNEL_OPEN => recv_channel_open(st, payload),
        _ => recv_channel_packet(st, msg_id, payload),
    }
}

fn recv_channel_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    let our_id = payload.get_u32()?;
    let Some(channel_mutex) = st.conn_st.channels.get(&our_id).cloned() else {
        log::debug!("received message {} for unknown channel {}", msg_id, our_id);
        return Err(Error::UnexpectedChannelMessage(msg_id))
    };

    let mut channel_st = channel_mutex.lock();
    if matches!(channel_state::stage(&channel_st),
        channel_state::ChannelStage::Initial
        | channel_state::ChannelStage::Closed
        | channel_state::ChannelStage::Errored)
    {
        return Err(Error::UnexpectedChannelMessage(msg_id))
    }

    let recv_state = match msg_id {
        msg::CHANNEL_OPEN_CONFIRMATION =>
            channel_state::recv_channel_open_confirmation(&mut channel_st, payload),
        msg::CHANNEL_OPEN_FAILURE =>
            channel_state::recv_channel_open_failure(&mut channel_st, payload),
        msg::CHANNEL_SUCCESS => channel_state::recv_channel_success(&mut channel_st),
        msg::CHANNEL_FAILURE => channel_state::recv_channel_failure(&mut channel_st),
        msg::CHANNEL_REQUEST =>
            channel_state::recv_channel_request(&mut channel_st, channel_mutex.clone(), payload),
        msg::CHANNEL_DATA => {
            let data = payload.get_bytes()?;
            channel_state::recv_channel_data(
                &mut channel_st, channel_mutex.clone(), DataType::Standard, data)
        },
        msg::CHANNEL_EXTENDED_DATA => {
            let code = payload.get_u32()?;
            let data = payload.get_bytes()?;
            channel_state::recv_channel_data(
                &mut channel_st, channel_mutex.clone(), DataType::Extended(code), data)
        },
        msg::CHANNEL_WINDOW_ADJUST =>
            channel_state::recv_channel_window_adjust(&mut channel_st, payload),
        msg::CHANNEL_EOF => channel_state::recv_channel_eof(&mut channel_st, channel_mutex.clone()),
        msg::CHANNEL_CLOSE => channel_state::recv_channel_close(&mut channel_st, channel_mutex.clone()),
        _ => Err(Error::UnexpectedMessage(msg_id)),
    }?;

    drop(channel_st);
    client_state::wakeup_client(st);
    Ok(recv_state)
}

fn recv_channel_open(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let channel_type = payload.get_string()?;
    let their_id = payload.get_u32()?;
    log::debug!("received SSH_MSG_CHANNEL_OPEN {:?} for their channel {}, refusing it",
        channel_type, their_id);

    let reason_code = open::ADMINISTRATIVELY_PROHIBITED;
    let mut reply = PacketEncode::new();
    reply.put_u8(msg::CHANNEL_OPEN_FAILURE);
    reply.put_u32(their_id);
    reply.put_u32(reason_code);
    reply.put_str(open::to_str(reason_code).unwrap_or("refused"));
    reply.put_str("");
    queue_reply(st, reply);
    Ok(None)
}

fn recv_global_request(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let request_type = payload.get_string()?;
    let want_reply = payload.get_bool()?;
    log::debug!("received SSH_MSG_GLOBAL_REQUEST {:?}", request_type);

    if want_reply {
        let mut reply = PacketEncode::new();
        reply.put_u8(msg::REQUEST_FAILURE);
        queue_reply(st, reply);
    }
    Ok(None)
}

fn queue_reply(st: &mut ClientState, reply: PacketEncode) {
    st.conn_st.replies.push_back(reply.finish());
    client_state::wakeup_client(st);
}

#[cfg(test)]
pub(super) fn channel_count(st: &ClientState) -> usize {
    st.conn_st.channels.len()
}
