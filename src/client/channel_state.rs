use bytes::Bytes;
use futures_core::ready;
use parking_lot::Mutex;
use std::cmp::min;
use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::PollSender;
use crate::codec::{PacketEncode, PacketDecode};
use crate::codes::msg;
use crate::error::{ChannelOpenError, Error, Result};
use super::channel::{ChannelConfig, ChannelEvent, ChannelReq, DataType};
use super::client_state::ClientState;
use super::pump::Pump;
use super::recv::{ResultRecvState, RecvState};

/// Stage of a channel (RFC 4254, section 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ChannelStage {
    Initial,
    WaitingOnOpenConfirmation,
    Open,
    WaitingOnRequestResponse,
    Closed,
    Errored,
}

/// State of a single channel.
///
/// The channel never writes to the connection directly: every message is queued into `outbox`,
/// which the connection state drains into the send pipe whenever no key exchange is running.
pub(super) struct ChannelState {
    our_id: u32,
    their_id: u32,
    stage: ChannelStage,
    channel_type: String,
    open_payload: Bytes,
    open_tx: Option<oneshot::Sender<Result<Bytes>>>,
    event_tx: PollSender<ChannelEvent>,
    outbox: VecDeque<Bytes>,
    send_reqs: VecDeque<SendReq>,
    reply_tx: Option<oneshot::Sender<Result<()>>>,
    send_datas: VecDeque<SendData>,
    send_window: usize,
    send_len_max: usize,
    recv_window: usize,
    recv_window_refill: usize,
    recv_packet_len_max: usize,
    want_close: bool,
    close_sent: bool,
    close_recvd: bool,
}

pub(super) struct ChannelInit {
    pub our_id: u32,
    pub channel_type: String,
    pub open_payload: Bytes,
    pub config: ChannelConfig,
    pub event_tx: mpsc::Sender<ChannelEvent>,
    pub open_tx: oneshot::Sender<Result<Bytes>>,
}

struct SendReq {
    request_type: String,
    payload: Bytes,
    reply_tx: Option<oneshot::Sender<Result<()>>>,
}

struct SendData {
    data: ChannelSendData,
    sent_tx: oneshot::Sender<Result<()>>,
}

#[derive(Debug)]
pub(super) enum ChannelSendData {
    Data(Bytes, DataType),
    Eof,
}

pub(super) fn init_channel(init: ChannelInit) -> ChannelState {
    ChannelState {
        our_id: init.our_id,
        their_id: 0,
        stage: ChannelStage::Initial,
        channel_type: init.channel_type,
        open_payload: init.open_payload,
        open_tx: Some(init.open_tx),
        event_tx: PollSender::new(init.event_tx),
        outbox: VecDeque::new(),
        send_reqs: VecDeque::new(),
        reply_tx: None,
        send_datas: VecDeque::new(),
        send_window: 0,
        send_len_max: 0,
        recv_window: clamp_u32(init.config.recv_window_max),
        recv_window_refill: clamp_u32(init.config.recv_window_refill).max(1),
        recv_packet_len_max: clamp_u32(init.config.recv_packet_len_max),
        want_close: false,
        close_sent: false,
        close_recvd: false,
    }
}

pub(super) fn stage(channel_st: &ChannelState) -> ChannelStage {
    channel_st.stage
}

pub(super) fn is_finished(channel_st: &ChannelState) -> bool {
    matches!(channel_st.stage, ChannelStage::Closed | ChannelStage::Errored)
}

fn is_open(channel_st: &ChannelState) -> bool {
    matches!(channel_st.stage, ChannelStage::Open | ChannelStage::WaitingOnRequestResponse)
}

/// Takes the next message that should be sent to the server.
pub(super) fn pop_outbox(channel_st: &mut ChannelState) -> Option<Bytes> {
    channel_st.outbox.pop_front()
}

pub(super) fn pump_channel(channel_st: &mut ChannelState) -> Result<Pump> {
    match channel_st.stage {
        ChannelStage::Initial => {
            queue_channel_open(channel_st);
            channel_st.stage = ChannelStage::WaitingOnOpenConfirmation;
            return Ok(Pump::Progress)
        },
        ChannelStage::Open | ChannelStage::WaitingOnRequestResponse => {},
        _ => return Ok(Pump::Pending),
    }

    if channel_st.want_close && !channel_st.close_sent {
        queue_channel_close(channel_st);
        channel_st.close_sent = true;
        fail_pending(channel_st);
        return Ok(Pump::Progress)
    }

    if channel_st.close_recvd && channel_st.close_sent {
        log::debug!("our channel {} is closed", channel_st.our_id);
        channel_st.stage = ChannelStage::Closed;
        fail_pending(channel_st);
        return Ok(Pump::Progress)
    }

    if channel_st.close_sent {
        return Ok(Pump::Pending)
    }

    if channel_st.stage == ChannelStage::Open {
        if let Some(req) = channel_st.send_reqs.pop_front() {
            queue_channel_request(channel_st, &req);
            if req.reply_tx.is_some() {
                channel_st.reply_tx = req.reply_tx;
                channel_st.stage = ChannelStage::WaitingOnRequestResponse;
            }
            return Ok(Pump::Progress)
        }
    }

    if let Some(mut data) = channel_st.send_datas.pop_front() {
        let (done, progress) = queue_channel_data(channel_st, &mut data.data);
        if done {
            let _ = data.sent_tx.send(Ok(()));
        } else {
            channel_st.send_datas.push_front(data);
        }
        if done || progress {
            return Ok(Pump::Progress)
        }
    }

    Ok(Pump::Pending)
}

fn fail_pending(channel_st: &mut ChannelState) {
    for req in channel_st.send_reqs.drain(..) {
        if let Some(reply_tx) = req.reply_tx {
            let _ = reply_tx.send(Err(Error::ChannelClosed));
        }
    }
    if let Some(reply_tx) = channel_st.reply_tx.take() {
        let _ = reply_tx.send(Err(Error::ChannelClosed));
    }
    for data in channel_st.send_datas.drain(..) {
        let _ = data.sent_tx.send(Err(Error::ChannelClosed));
    }
}

fn queue(channel_st: &mut ChannelState, payload: PacketEncode) {
    channel_st.outbox.push_back(payload.finish());
}

fn queue_channel_open(channel_st: &mut ChannelState) {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_OPEN);
    payload.put_str(&channel_st.channel_type);
    payload.put_u32(channel_st.our_id);
    payload.put_u32(to_wire_u32(channel_st.recv_window));
    payload.put_u32(to_wire_u32(channel_st.recv_packet_len_max));
    payload.put_raw(&channel_st.open_payload);
    queue(channel_st, payload);
    log::debug!("sending SSH_MSG_CHANNEL_OPEN {:?} for our channel {}",
        channel_st.channel_type, channel_st.our_id);
}

pub(super) fn recv_channel_open_confirmation(
    channel_st: &mut ChannelState,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    if channel_st.stage != ChannelStage::WaitingOnOpenConfirmation {
        return Err(Error::UnexpectedChannelMessage(msg::CHANNEL_OPEN_CONFIRMATION))
    }

    channel_st.their_id = payload.get_u32()?;
    channel_st.send_window = payload.get_u32()? as usize;
    let send_packet_len_max = payload.get_u32()? as usize;
    channel_st.send_len_max = packet_len_max_to_len_max(send_packet_len_max);
    let confirm_payload = payload.remaining();
    log::debug!("received SSH_MSG_CHANNEL_OPEN_CONFIRMATION for our channel {}, their channel {}, \
        window {}, max packet size {}",
        channel_st.our_id, channel_st.their_id, channel_st.send_window, send_packet_len_max);

    channel_st.stage = ChannelStage::Open;
    let delivered = match channel_st.open_tx.take() {
        Some(open_tx) => open_tx.send(Ok(confirm_payload)).is_ok(),
        None => false,
    };
    if !delivered {
        // the caller of `open_channel()` gave up, nobody will ever own this channel
        log::debug!("nobody waits for our channel {} any more, closing it", channel_st.our_id);
        channel_st.want_close = true;
    }
    Ok(None)
}

pub(super) fn recv_channel_open_failure(
    channel_st: &mut ChannelState,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    if channel_st.stage != ChannelStage::WaitingOnOpenConfirmation {
        return Err(Error::UnexpectedChannelMessage(msg::CHANNEL_OPEN_FAILURE))
    }

    let error = ChannelOpenError {
        reason_code: payload.get_u32()?,
        description: payload.get_string()?,
        description_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_CHANNEL_OPEN_FAILURE for our channel {}: {}",
        channel_st.our_id, error);

    channel_st.stage = ChannelStage::Errored;
    if let Some(open_tx) = channel_st.open_tx.take() {
        let _ = open_tx.send(Err(Error::ChannelOpen(error)));
    }
    Ok(None)
}

pub(super) fn send_request(
    channel_st: &mut ChannelState,
    request_type: String,
    payload: Bytes,
    reply_tx: Option<oneshot::Sender<Result<()>>>,
) -> Result<()> {
    if !is_open(channel_st) || channel_st.want_close || channel_st.close_recvd {
        return Err(Error::ChannelClosed)
    }
    channel_st.send_reqs.push_back(SendReq { request_type, payload, reply_tx });
    Ok(())
}

fn queue_channel_request(channel_st: &mut ChannelState, req: &SendReq) {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_REQUEST);
    payload.put_u32(channel_st.their_id);
    payload.put_str(&req.request_type);
    payload.put_bool(req.reply_tx.is_some());
    payload.put_raw(&req.payload);
    queue(channel_st, payload);
    log::debug!("sending SSH_MSG_CHANNEL_REQUEST {:?} for our channel {}",
        req.request_type, channel_st.our_id);
}

pub(super) fn recv_channel_success(channel_st: &mut ChannelState) -> ResultRecvState {
    recv_channel_reply(channel_st, msg::CHANNEL_SUCCESS, Ok(()))
}

pub(super) fn recv_channel_failure(channel_st: &mut ChannelState) -> ResultRecvState {
    recv_channel_reply(channel_st, msg::CHANNEL_FAILURE, Err(Error::ChannelReq))
}

fn recv_channel_reply(channel_st: &mut ChannelState, msg_id: u8, reply: Result<()>) -> ResultRecvState {
    if channel_st.stage != ChannelStage::WaitingOnRequestResponse {
        return Err(Error::UnexpectedChannelMessage(msg_id))
    }
    log::debug!("received reply {} to a request on our channel {}", msg_id, channel_st.our_id);
    channel_st.stage = ChannelStage::Open;
    if let Some(reply_tx) = channel_st.reply_tx.take() {
        let _ = reply_tx.send(reply);
    }
    Ok(None)
}

pub(super) fn recv_channel_request(
    channel_st: &mut ChannelState,
    channel_mutex: Arc<Mutex<ChannelState>>,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    if !is_open(channel_st) {
        return Err(Error::UnexpectedChannelMessage(msg::CHANNEL_REQUEST))
    }

    let request_type = payload.get_string()?;
    let want_reply = payload.get_bool()?;
    let req_payload = payload.remaining();
    log::debug!("received SSH_MSG_CHANNEL_REQUEST {:?} for our channel {}",
        request_type, channel_st.our_id);

    // requests from the server are only reported, we never agree to them
    if want_reply {
        let mut reply = PacketEncode::new();
        reply.put_u8(msg::CHANNEL_FAILURE);
        reply.put_u32(channel_st.their_id);
        queue(channel_st, reply);
    }

    let req = ChannelReq { request_type, want_reply, payload: req_payload };
    send_event(channel_mutex, ChannelEvent::Request(req))
}

pub(super) fn send_data(
    channel_st: &mut ChannelState,
    data: ChannelSendData,
) -> Result<oneshot::Receiver<Result<()>>> {
    let eof_queued = channel_st.send_datas.iter()
        .any(|data| matches!(data.data, ChannelSendData::Eof));
    if !is_open(channel_st) || channel_st.want_close || channel_st.close_recvd || eof_queued {
        return Err(Error::ChannelClosed)
    }

    let (sent_tx, sent_rx) = oneshot::channel();
    channel_st.send_datas.push_back(SendData { data, sent_tx });
    Ok(sent_rx)
}

/// Queues as much of `data` as the send window allows.
///
/// Returns `(done, progress)`, where `done` means that the whole `data` was queued.
fn queue_channel_data(channel_st: &mut ChannelState, data: &mut ChannelSendData) -> (bool, bool) {
    match data {
        ChannelSendData::Data(data, data_type) => {
            let mut progress = false;
            while !data.is_empty() {
                let send_len = min(data.len(), min(channel_st.send_window, channel_st.send_len_max));
                if send_len == 0 { return (false, progress) }
                let send_data = data.split_to(send_len);

                let mut payload = PacketEncode::with_capacity(send_len + 16);
                match data_type {
                    DataType::Standard => {
                        payload.put_u8(msg::CHANNEL_DATA);
                        payload.put_u32(channel_st.their_id);
                    },
                    DataType::Extended(code) => {
                        payload.put_u8(msg::CHANNEL_EXTENDED_DATA);
                        payload.put_u32(channel_st.their_id);
                        payload.put_u32(*code);
                    },
                }
                payload.put_bytes(&send_data);
                queue(channel_st, payload);
                log::trace!("sending {} bytes of {:?} data on our channel {}",
                    send_len, data_type, channel_st.our_id);

                channel_st.send_window -= send_len;
                progress = true;
            }
            (true, progress)
        },
        ChannelSendData::Eof => {
            let mut payload = PacketEncode::new();
            payload.put_u8(msg::CHANNEL_EOF);
            payload.put_u32(channel_st.their_id);
            queue(channel_st, payload);
            log::debug!("sending SSH_MSG_CHANNEL_EOF for our channel {}", channel_st.our_id);
            (true, true)
        },
    }
}

pub(super) fn recv_channel_data(
    channel_st: &mut ChannelState,
    channel_mutex: Arc<Mutex<ChannelState>>,
    data_type: DataType,
    data: Bytes,
) -> ResultRecvState {
    let msg_id = match data_type {
        DataType::Standard => msg::CHANNEL_DATA,
        DataType::Extended(_) => msg::CHANNEL_EXTENDED_DATA,
    };
    if !is_open(channel_st) {
        return Err(Error::UnexpectedChannelMessage(msg_id))
    }

    let mut data = data;
    if data.len() > channel_st.recv_window {
        log::warn!("server sent {} bytes on our channel {}, but the window is only {} bytes, \
            truncating the data", data.len(), channel_st.our_id, channel_st.recv_window);
        data.truncate(channel_st.recv_window);
    }
    log::trace!("received {} bytes of {:?} data on our channel {}",
        data.len(), data_type, channel_st.our_id);

    channel_st.recv_window -= data.len();
    if channel_st.recv_window == 0 {
        // the adjustment must be queued before the data is delivered, so that a slow consumer
        // of the data does not stall the server
        queue_window_adjust(channel_st, channel_st.recv_window_refill);
        channel_st.recv_window += channel_st.recv_window_refill;
    }

    if data.is_empty() {
        return Ok(None)
    }
    send_event(channel_mutex, ChannelEvent::Data(data, data_type))
}

fn queue_window_adjust(channel_st: &mut ChannelState, adjust: usize) {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_WINDOW_ADJUST);
    payload.put_u32(channel_st.their_id);
    payload.put_u32(to_wire_u32(adjust));
    queue(channel_st, payload);
    log::trace!("sending SSH_MSG_CHANNEL_WINDOW_ADJUST for our channel {} with {} bytes",
        channel_st.our_id, adjust);
}

pub(super) fn recv_channel_window_adjust(
    channel_st: &mut ChannelState,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    if !is_open(channel_st) {
        return Err(Error::UnexpectedChannelMessage(msg::CHANNEL_WINDOW_ADJUST))
    }

    let adjust = payload.get_u32()? as usize;
    match channel_st.send_window.checked_add(adjust) {
        Some(send_window) if send_window <= u32::MAX as usize => {
            log::trace!("received SSH_MSG_CHANNEL_WINDOW_ADJUST for our channel {} with {} bytes",
                channel_st.our_id, adjust);
            channel_st.send_window = send_window;
            Ok(None)
        },
        _ => Err(Error::Protocol("received SSH_MSG_CHANNEL_WINDOW_ADJUST that overflows the window")),
    }
}

pub(super) fn recv_channel_eof(
    channel_st: &mut ChannelState,
    channel_mutex: Arc<Mutex<ChannelState>>,
) -> ResultRecvState {
    if !is_open(channel_st) {
        return Err(Error::UnexpectedChannelMessage(msg::CHANNEL_EOF))
    }
    log::debug!("received SSH_MSG_CHANNEL_EOF for our channel {}", channel_st.our_id);
    send_event(channel_mutex, ChannelEvent::Eof)
}

pub(super) fn close(channel_st: &mut ChannelState) {
    if !channel_st.want_close {
        channel_st.want_close = true;
    }
}

fn queue_channel_close(channel_st: &mut ChannelState) {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_CLOSE);
    payload.put_u32(channel_st.their_id);
    queue(channel_st, payload);
    log::debug!("sending SSH_MSG_CHANNEL_CLOSE for our channel {}", channel_st.our_id);
}

pub(super) fn recv_channel_close(
    channel_st: &mut ChannelState,
    channel_mutex: Arc<Mutex<ChannelState>>,
) -> ResultRecvState {
    if !is_open(channel_st) || channel_st.close_recvd {
        return Err(Error::UnexpectedChannelMessage(msg::CHANNEL_CLOSE))
    }
    log::debug!("received SSH_MSG_CHANNEL_CLOSE for our channel {}", channel_st.our_id);
    channel_st.close_recvd = true;
    channel_st.want_close = true;
    send_event(channel_mutex, ChannelEvent::Close)
}

fn send_event(channel_mutex: Arc<Mutex<ChannelState>>, event: ChannelEvent) -> ResultRecvState {
    struct SendEventState {
        channel_mutex: Arc<Mutex<ChannelState>>,
        event: Option<ChannelEvent>,
    }

    impl RecvState for SendEventState {
        fn poll(&mut self, _st: &mut ClientState, cx: &mut Context) -> Poll<Result<()>> {
            let mut channel_st = self.channel_mutex.lock();
            let reserve_res = ready!(channel_st.event_tx.poll_reserve(cx));
            if let (Ok(()), Some(event)) = (reserve_res, self.event.take()) {
                // the receiver may be dropped, then we simply discard the event
                let _ = channel_st.event_tx.send_item(event);
            }
            Poll::Ready(Ok(()))
        }
    }

    Ok(Some(Box::new(SendEventState { channel_mutex, event: Some(event) })))
}

fn clamp_u32(value: usize) -> usize {
    value.min(u32::MAX as usize)
}

fn to_wire_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn packet_len_max_to_len_max(packet_len_max: usize) -> usize {
    // the 'maximum packet size' of RFC 4254 does not clearly say which parts of the packet it
    // covers, so we leave a generous reserve for the headers of the message and the packet
    usize::max(packet_len_max, 200) - 100
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestChannel {
        channel_st: Arc<Mutex<ChannelState>>,
        event_rx: mpsc::Receiver<ChannelEvent>,
        open_rx: oneshot::Receiver<Result<Bytes>>,
    }

    fn new_channel(config: ChannelConfig) -> TestChannel {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (open_tx, open_rx) = oneshot::channel();
        let channel_st = init_channel(ChannelInit {
            our_id: 3,
            channel_type: "session".into(),
            open_payload: Bytes::new(),
            config,
            event_tx,
            open_tx,
        });
        TestChannel { channel_st: Arc::new(Mutex::new(channel_st)), event_rx, open_rx }
    }

    fn pump_all(channel_st: &mut ChannelState) {
        while pump_channel(channel_st).unwrap().is_progress() {}
    }

    fn drain_outbox(channel_st: &mut ChannelState) -> Vec<PacketDecode> {
        let mut packets = Vec::new();
        while let Some(payload) = pop_outbox(channel_st) {
            packets.push(PacketDecode::new(payload));
        }
        packets
    }

    fn confirm(channel_st: &mut ChannelState, send_window: u32, packet_len_max: u32) {
        let mut payload = PacketEncode::new();
        payload.put_u32(77);
        payload.put_u32(send_window);
        payload.put_u32(packet_len_max);
        recv_channel_open_confirmation(channel_st, &mut PacketDecode::new(payload.finish()))
            .unwrap();
    }

    fn open_channel(config: ChannelConfig, send_window: u32) -> TestChannel {
        let mut test = new_channel(config);
        {
            let mut channel_st = test.channel_st.lock();
            pump_all(&mut channel_st);
            let packets = drain_outbox(&mut channel_st);
            assert_eq!(packets.len(), 1);
            confirm(&mut channel_st, send_window, 32768);
        }
        assert!(test.open_rx.try_recv().unwrap().is_ok());
        test
    }

    // delivery of the event needs the whole client state, so here we only check that the
    // event was produced and nothing was delivered yet
    fn produces_event(test: &mut TestChannel, recv_state: ResultRecvState) -> bool {
        let recv_state = recv_state.unwrap();
        assert!(test.event_rx.try_recv().is_err());
        recv_state.is_some()
    }

    #[test]
    fn test_open_sends_channel_open() {
        let test = new_channel(ChannelConfig::default().with(|c| c.recv_window_max = 1000));
        let mut channel_st = test.channel_st.lock();
        assert_eq!(stage(&channel_st), ChannelStage::Initial);
        pump_all(&mut channel_st);
        assert_eq!(stage(&channel_st), ChannelStage::WaitingOnOpenConfirmation);

        let mut packets = drain_outbox(&mut channel_st);
        let open = &mut packets[0];
        assert_eq!(open.get_u8().unwrap(), msg::CHANNEL_OPEN);
        assert_eq!(open.get_string().unwrap(), "session");
        assert_eq!(open.get_u32().unwrap(), 3);
        assert_eq!(open.get_u32().unwrap(), 1000);
        assert_eq!(open.get_u32().unwrap(), 32 * 1024);
    }

    #[test]
    fn test_huge_window_is_clamped() {
        let config = ChannelConfig::default().with(|c| {
            c.recv_window_max = usize::MAX;
            c.recv_window_refill = usize::MAX;
            c.recv_packet_len_max = u32::MAX as usize + 1;
        });
        let test = new_channel(config);
        let mut channel_st = test.channel_st.lock();
        assert_eq!(channel_st.recv_window, u32::MAX as usize);
        assert_eq!(channel_st.recv_window_refill, u32::MAX as usize);
        pump_all(&mut channel_st);

        let mut packets = drain_outbox(&mut channel_st);
        let open = &mut packets[0];
        assert_eq!(open.get_u8().unwrap(), msg::CHANNEL_OPEN);
        open.get_string().unwrap();
        open.get_u32().unwrap();
        assert_eq!(open.get_u32().unwrap(), u32::MAX);
        assert_eq!(open.get_u32().unwrap(), u32::MAX);
    }

    #[test]
    fn test_abandoned_open_is_closed_after_confirmation() {
        let test = new_channel(ChannelConfig::default());
        drop(test.open_rx);
        let mut channel_st = test.channel_st.lock();
        pump_all(&mut channel_st);
        assert_eq!(drain_outbox(&mut channel_st).len(), 1);

        confirm(&mut channel_st, 1000, 32768);
        assert!(channel_st.want_close);
        pump_all(&mut channel_st);
        let mut packets = drain_outbox(&mut channel_st);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].get_u8().unwrap(), msg::CHANNEL_CLOSE);
        assert_eq!(packets[0].get_u32().unwrap(), 77);
        assert!(!is_finished(&channel_st));

        recv_channel_close(&mut channel_st, test.channel_st.clone()).unwrap();
        pump_all(&mut channel_st);
        assert_eq!(stage(&channel_st), ChannelStage::Closed);
        assert!(is_finished(&channel_st));
    }

    #[test]
    fn test_open_failure() {
        let mut test = new_channel(ChannelConfig::default());
        {
            let mut channel_st = test.channel_st.lock();
            pump_all(&mut channel_st);
            let mut payload = PacketEncode::new();
            payload.put_u32(crate::codes::open::CONNECT_FAILED);
            payload.put_str("no route");
            payload.put_str("");
            recv_channel_open_failure(&mut channel_st, &mut PacketDecode::new(payload.finish()))
                .unwrap();
            assert_eq!(stage(&channel_st), ChannelStage::Errored);
            assert!(is_finished(&channel_st));
        }
        match test.open_rx.try_recv().unwrap() {
            Err(Error::ChannelOpen(err)) => assert_eq!(err.description, "no route"),
            res => panic!("unexpected result {:?}", res),
        }
    }

    #[test]
    fn test_messages_before_open_are_unexpected() {
        let test = new_channel(ChannelConfig::default());
        let mut channel_st = test.channel_st.lock();
        let mut empty = PacketDecode::new(Bytes::from_static(&[0, 0, 0, 1]));
        assert!(matches!(recv_channel_window_adjust(&mut channel_st, &mut empty),
            Err(Error::UnexpectedChannelMessage(93))));
        assert!(matches!(recv_channel_success(&mut channel_st),
            Err(Error::UnexpectedChannelMessage(99))));
        // the open confirmation is unexpected until we actually send the open request
        assert!(matches!(
            recv_channel_open_confirmation(&mut channel_st, &mut PacketDecode::new(Bytes::new())),
            Err(Error::UnexpectedChannelMessage(91))));
    }

    #[test]
    fn test_request_reply() {
        let test = open_channel(ChannelConfig::default(), 1000);
        let mut channel_st = test.channel_st.lock();

        let (reply_tx, mut reply_rx) = oneshot::channel();
        send_request(&mut channel_st, "exec".into(), Bytes::from_static(b"\0\0\0\x02ls"),
            Some(reply_tx)).unwrap();
        let (second_tx, mut second_rx) = oneshot::channel();
        send_request(&mut channel_st, "env".into(), Bytes::new(), Some(second_tx)).unwrap();
        pump_all(&mut channel_st);
        assert_eq!(stage(&channel_st), ChannelStage::WaitingOnRequestResponse);

        // only the first request is sent until it is answered
        let mut packets = drain_outbox(&mut channel_st);
        assert_eq!(packets.len(), 1);
        let req = &mut packets[0];
        assert_eq!(req.get_u8().unwrap(), msg::CHANNEL_REQUEST);
        assert_eq!(req.get_u32().unwrap(), 77);
        assert_eq!(req.get_string().unwrap(), "exec");
        assert!(req.get_bool().unwrap());

        recv_channel_success(&mut channel_st).unwrap();
        assert!(reply_rx.try_recv().unwrap().is_ok());
        assert_eq!(stage(&channel_st), ChannelStage::Open);

        pump_all(&mut channel_st);
        assert_eq!(drain_outbox(&mut channel_st).len(), 1);
        recv_channel_failure(&mut channel_st).unwrap();
        assert!(matches!(second_rx.try_recv().unwrap(), Err(Error::ChannelReq)));

        // a reply that nobody asked for
        assert!(matches!(recv_channel_success(&mut channel_st),
            Err(Error::UnexpectedChannelMessage(99))));
    }

    #[test]
    fn test_write_within_window() {
        let test = open_channel(ChannelConfig::default(), 1000);
        let mut channel_st = test.channel_st.lock();

        let mut sent_rx = send_data(&mut channel_st,
            ChannelSendData::Data(Bytes::from(vec![1; 600]), DataType::Standard)).unwrap();
        pump_all(&mut channel_st);
        assert!(sent_rx.try_recv().unwrap().is_ok());
        assert_eq!(channel_st.send_window, 400);

        let mut packets = drain_outbox(&mut channel_st);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].get_u8().unwrap(), msg::CHANNEL_DATA);
        assert_eq!(packets[0].get_u32().unwrap(), 77);
        assert_eq!(packets[0].get_bytes().unwrap().len(), 600);
    }

    #[test]
    fn test_write_waits_for_window_adjust() {
        let test = open_channel(ChannelConfig::default(), 100);
        let mut channel_st = test.channel_st.lock();

        let mut sent_rx = send_data(&mut channel_st,
            ChannelSendData::Data(Bytes::from(vec![2; 250]), DataType::Extended(1))).unwrap();
        pump_all(&mut channel_st);
        assert!(sent_rx.try_recv().is_err());
        assert_eq!(channel_st.send_window, 0);
        assert_eq!(drain_outbox(&mut channel_st).len(), 1);

        let mut adjust = PacketEncode::new();
        adjust.put_u32(200);
        recv_channel_window_adjust(&mut channel_st, &mut PacketDecode::new(adjust.finish()))
            .unwrap();
        pump_all(&mut channel_st);
        assert!(sent_rx.try_recv().unwrap().is_ok());
        assert_eq!(channel_st.send_window, 50);

        let mut packets = drain_outbox(&mut channel_st);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].get_u8().unwrap(), msg::CHANNEL_EXTENDED_DATA);
        packets[0].get_u32().unwrap();
        assert_eq!(packets[0].get_u32().unwrap(), 1);
        assert_eq!(packets[0].get_bytes().unwrap().len(), 150);
    }

    #[test]
    fn test_write_is_chunked_by_packet_size() {
        let test = new_channel(ChannelConfig::default());
        let mut channel_st = test.channel_st.lock();
        pump_all(&mut channel_st);
        drain_outbox(&mut channel_st);
        confirm(&mut channel_st, 10_000, 1100);

        send_data(&mut channel_st,
            ChannelSendData::Data(Bytes::from(vec![0; 2500]), DataType::Standard)).unwrap();
        pump_all(&mut channel_st);
        let lens: Vec<usize> = drain_outbox(&mut channel_st).iter_mut()
            .map(|packet| {
                packet.get_u8().unwrap();
                packet.get_u32().unwrap();
                packet.get_bytes().unwrap().len()
            })
            .collect();
        assert_eq!(lens, vec![1000, 1000, 500]);
    }

    #[test]
    fn test_recv_window_refill() {
        let config = ChannelConfig::default().with(|c| {
            c.recv_window_max = 100;
            c.recv_window_refill = 64;
        });
        let mut test = open_channel(config, 1000);
        let channel_mutex = test.channel_st.clone();

        let recv_state = recv_channel_data(&mut channel_mutex.lock(), channel_mutex.clone(),
            DataType::Standard, Bytes::from(vec![0; 60]));
        assert!(produces_event(&mut test, recv_state));
        assert!(drain_outbox(&mut channel_mutex.lock()).is_empty());

        // overrun of the window: the data is truncated to the 40 remaining bytes
        let recv_state = recv_channel_data(&mut channel_mutex.lock(), channel_mutex.clone(),
            DataType::Standard, Bytes::from(vec![0; 55]));
        assert!(produces_event(&mut test, recv_state));

        let mut channel_st = channel_mutex.lock();
        assert_eq!(channel_st.recv_window, 64);
        let mut packets = drain_outbox(&mut channel_st);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].get_u8().unwrap(), msg::CHANNEL_WINDOW_ADJUST);
        assert_eq!(packets[0].get_u32().unwrap(), 77);
        assert_eq!(packets[0].get_u32().unwrap(), 64);
    }

    #[test]
    fn test_server_request_is_refused() {
        let mut test = open_channel(ChannelConfig::default(), 1000);
        let channel_mutex = test.channel_st.clone();

        let mut payload = PacketEncode::new();
        payload.put_str("keepalive@openssh.com");
        payload.put_bool(true);
        let recv_state = recv_channel_request(&mut channel_mutex.lock(), channel_mutex.clone(),
            &mut PacketDecode::new(payload.finish()));
        assert!(produces_event(&mut test, recv_state));

        let mut packets = drain_outbox(&mut channel_mutex.lock());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].get_u8().unwrap(), msg::CHANNEL_FAILURE);
        assert_eq!(packets[0].get_u32().unwrap(), 77);
    }

    #[test]
    fn test_close_handshake() {
        let test = open_channel(ChannelConfig::default(), 0);
        let channel_mutex = test.channel_st.clone();

        let mut sent_rx = {
            let mut channel_st = channel_mutex.lock();
            let sent_rx = send_data(&mut channel_st,
                ChannelSendData::Data(Bytes::from_static(b"stuck"), DataType::Standard)).unwrap();
            close(&mut channel_st);
            pump_all(&mut channel_st);
            sent_rx
        };
        // data that did not fit into the window is dropped on close
        assert!(matches!(sent_rx.try_recv().unwrap(), Err(Error::ChannelClosed)));

        let mut channel_st = channel_mutex.lock();
        let mut packets = drain_outbox(&mut channel_st);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].get_u8().unwrap(), msg::CHANNEL_CLOSE);
        assert_eq!(stage(&channel_st), ChannelStage::Open);
        assert!(matches!(send_data(&mut channel_st, ChannelSendData::Eof),
            Err(Error::ChannelClosed)));

        recv_channel_close(&mut channel_st, channel_mutex.clone()).unwrap();
        pump_all(&mut channel_st);
        assert_eq!(stage(&channel_st), ChannelStage::Closed);
        assert!(drain_outbox(&mut channel_st).is_empty());
        assert!(matches!(recv_channel_eof(&mut channel_st, channel_mutex.clone()),
            Err(Error::UnexpectedChannelMessage(96))));
    }
}
