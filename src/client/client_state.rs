use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, PollSender};
use crate::codec::{check_ident, Codec, PacketEncode, RecvPipe, SendPipe};
use crate::codes::msg;
use crate::error::{DisconnectError, Error, Result};
use crate::pubkey::Pubkey;
use crate::util::{poll_read_buf, AsyncReadWrite, CryptoRngCore};
use super::auth::{self, AuthState};
use super::client::ClientConfig;
use super::client_event::ClientEvent;
use super::conn::{self, ConnState};
use super::negotiate::{self, NegotiateState, NegotiatedAlgos};
use super::pump::Pump;
use super::recv::{self, RecvState};

pub(super) struct ClientState {
    pub config: ClientConfig,
    pub rng: Box<dyn CryptoRngCore + Send>,
    pub event_tx: PollSender<ClientEvent>,
    pub codec: Codec,
    pub our_ident: Bytes,
    pub their_ident: Option<Bytes>,
    pub peer_addr: Option<SocketAddr>,
    pub shared: Arc<SessionShared>,
    our_disconnect: Option<DisconnectError>,
    disconnect_sent: bool,
    closed: bool,
    pub recv_st: Option<Box<dyn RecvState + Send>>,
    pub negotiate_st: Box<NegotiateState>,
    pub auth_st: Box<AuthState>,
    pub conn_st: Box<ConnState>,
    pub session_id: Option<Vec<u8>>,
    waker: Option<Waker>,
}

/// The part of the session that outlives [`ClientState`] and is shared with every pending
/// operation.
///
/// When the session fails, the first error is recorded here and the token is cancelled, so that
/// all operations waiting in [`SessionShared::wait()`] wake up and fail with that error.
pub(super) struct SessionShared {
    cancel: CancellationToken,
    failure: Mutex<Option<Error>>,
}

impl SessionShared {
    pub fn new() -> SessionShared {
        SessionShared { cancel: CancellationToken::new(), failure: Mutex::new(None) }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Records `error` (unless an error was already recorded) and cancels the session.
    pub fn fail(&self, error: Error) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                log::debug!("session failed: {}", error);
                *failure = Some(error);
            }
        }
        self.cancel.cancel();
    }

    /// The error that pending operations should fail with.
    pub fn failure(&self) -> Error {
        self.failure.lock().clone().unwrap_or(Error::Cancelled)
    }

    /// Fails if the session was already cancelled.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.failure())
        }
        Ok(())
    }

    /// Waits for a reply from the client state, or for the session to be cancelled.
    pub async fn wait<T>(&self, rx: oneshot::Receiver<T>) -> Result<T> {
        match self.cancel.run_until_cancelled(rx).await {
            Some(Ok(value)) => Ok(value),
            Some(Err(_)) | None => Err(self.failure()),
        }
    }
}

/// Snapshot of the state of a connection, obtained from
/// [`Client::connection_info()`][super::Client::connection_info()].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectionInfo {
    /// Address of the server, if the client was opened with
    /// [`Client::connect()`][super::Client::connect()].
    pub peer_addr: Option<SocketAddr>,
    /// Our identification string (without the trailing CR LF).
    pub our_ident: Bytes,
    /// The server identification string, once received.
    pub their_ident: Option<Bytes>,
    /// Sequence number of the next packet that we will send.
    pub send_packet_seq: u32,
    /// Sequence number of the next packet that we will receive.
    pub recv_packet_seq: u32,
    /// Total number of bytes fed to the outbound pipe.
    pub sent_bytes: u64,
    /// Total number of bytes received from the server.
    pub recvd_bytes: u64,
    /// Algorithms negotiated in the last completed key exchange.
    pub algos: Option<NegotiatedAlgos>,
    /// Public host key of the server, verified in the last key exchange.
    pub server_pubkey: Option<Pubkey>,
    /// Session identifier (the exchange hash of the first key exchange).
    pub session_id: Option<Bytes>,
    /// True if the user has been authenticated.
    pub authenticated: bool,
    /// Number of completed key exchanges.
    pub kex_count: u32,
}

pub(super) fn new_client(
    config: ClientConfig,
    mut rng: Box<dyn CryptoRngCore + Send>,
    event_tx: mpsc::Sender<ClientEvent>,
    peer_addr: Option<SocketAddr>,
) -> Result<ClientState> {
    let mut send_pipe = SendPipe::new(&mut *rng)?;
    let our_ident: Bytes = format!("SSH-2.0-{}", config.ident).into();
    send_pipe.feed_ident(&our_ident);

    Ok(ClientState {
        config,
        rng,
        event_tx: PollSender::new(event_tx),
        codec: Codec {
            recv_pipe: RecvPipe::new(),
            send_pipe,
        },
        our_ident,
        their_ident: None,
        peer_addr,
        shared: Arc::new(SessionShared::new()),
        our_disconnect: None,
        disconnect_sent: false,
        closed: false,
        recv_st: None,
        negotiate_st: Box::new(negotiate::init_negotiate()),
        auth_st: Box::new(auth::init_auth()),
        conn_st: Box::new(conn::init_conn()),
        session_id: None,
        waker: None,
    })
}

pub(super) fn poll_client(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Poll<Result<()>> {
    if st.closed {
        return Poll::Ready(Ok(()))
    }

    if !st.disconnect_sent {
        if let Some(error) = st.our_disconnect.take() {
            send_disconnect(st, error)?;
            st.disconnect_sent = true;
        }
    }

    loop {
        let mut progress = false;

        if !st.disconnect_sent {
            while recv::pump_recv(st, cx)?.is_progress() { progress = true }
            while negotiate::pump_negotiate(st, cx)?.is_progress() { progress = true }
            while auth::pump_auth(st, cx)?.is_progress() { progress = true }
            while conn::pump_conn(st, cx)?.is_progress() { progress = true }

            if pump_read(st, stream.as_mut(), cx)?.is_progress() { continue }
        }

        while pump_write(st, stream.as_mut(), cx)?.is_progress() { progress = true }

        if !progress { break }
    }

    let flushed = flush_write(st, stream.as_mut(), cx)?;
    if st.disconnect_sent && flushed {
        return Poll::Ready(Ok(()))
    }

    st.waker = Some(cx.waker().clone());
    Poll::Pending
}

pub(super) fn wakeup_client(st: &mut ClientState) {
    if let Some(waker) = st.waker.take() {
        waker.wake();
    }
}

fn pump_read(
    st: &mut ClientState,
    stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    if st.their_ident.is_some() {
        pump_read_packet(st, stream, cx)
    } else {
        pump_read_ident(st, stream, cx)
    }
}

fn pump_read_packet(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    if st.recv_st.is_some() {
        return Ok(Pump::Pending)
    }

    let packet = pump_ready!(poll_read(st, stream.as_mut(), cx, |pipe| pipe.consume_packet()))?;
    st.recv_st = recv::recv_packet(st, packet)?;
    Ok(Pump::Progress)
}

fn pump_read_ident(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    let ident = pump_ready!(poll_read(st, stream.as_mut(), cx, |pipe| pipe.consume_ident()))?;

    // the returned `Bytes` reference the internal buffer in `st.codec.recv_pipe`, so we
    // copy the data into a new `Bytes` to avoid keeping this reference in `ClientState`
    let ident = Bytes::copy_from_slice(&ident);
    log::debug!("received server identification: {:?}", ident);
    check_ident(&ident)?;
    st.their_ident = Some(ident);

    Ok(Pump::Progress)
}

fn pump_write(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    let data = st.codec.send_pipe.peek_bytes();
    if data.is_empty() { return Ok(Pump::Pending) }
    match stream.as_mut().poll_write(cx, data) {
        Poll::Ready(Ok(0)) | Poll::Pending => {
            log::trace!("pending write of {} bytes", data.len());
            Ok(Pump::Pending)
        },
        Poll::Ready(Ok(written_len)) => {
            log::trace!("written {}/{} bytes", written_len, data.len());
            st.codec.send_pipe.consume_bytes(written_len);
            Ok(Pump::Progress)
        },
        Poll::Ready(Err(err)) => {
            log::debug!("error when writing: {}", err);
            Err(Error::write_io(err))
        },
    }
}

fn flush_write(
    st: &mut ClientState,
    stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<bool> {
    match stream.poll_flush(cx) {
        Poll::Ready(Ok(())) => Ok(st.codec.send_pipe.is_empty()),
        Poll::Pending => Ok(false),
        Poll::Ready(Err(err)) => Err(Error::write_io(err)),
    }
}

fn poll_read<F, T>(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
    consume_f: F
) -> Poll<Result<T>>
    where F: Fn(&mut RecvPipe) -> Result<Option<T>>
{
    loop {
        if let Some(value) = consume_f(&mut st.codec.recv_pipe)? {
            return Poll::Ready(Ok(value))
        }

        match poll_read_buf(stream.as_mut(), cx, st.codec.recv_pipe.feed_buf()) {
            Poll::Pending => {
                log::trace!("pending read");
                return Poll::Pending
            },
            Poll::Ready(Ok(0)) => {
                log::debug!("received eof");
                return Poll::Ready(Err(Error::PeerClosed))
            },
            Poll::Ready(Ok(read_len)) => {
                log::trace!("read {} bytes", read_len);
                continue
            },
            Poll::Ready(Err(err)) => {
                log::debug!("error when reading: {}", err);
                return Poll::Ready(Err(Error::read_io(err)))
            },
        }
    }
}

pub(super) fn disconnect(st: &mut ClientState, error: DisconnectError) -> Result<()> {
    if st.closed || st.disconnect_sent || st.our_disconnect.is_some() {
        return Err(Error::ClientClosed)
    }
    st.our_disconnect = Some(error);
    wakeup_client(st);
    Ok(())
}

/// Stops the client without sending anything: pending operations are cancelled and the
/// [`ClientFuture`][super::ClientFuture] resolves on its next poll.
pub(super) fn close(st: &mut ClientState) {
    if !st.closed {
        log::debug!("closing the client");
        st.closed = true;
        st.shared.fail(Error::Cancelled);
        wakeup_client(st);
    }
}

pub(super) fn is_closed(st: &ClientState) -> bool {
    st.closed || st.disconnect_sent || st.our_disconnect.is_some()
}

fn send_disconnect(st: &mut ClientState, error: DisconnectError) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::DISCONNECT);
    payload.put_u32(error.reason_code);
    payload.put_str(&error.description);
    payload.put_str(&error.description_lang);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_DISCONNECT with reason code {}", error.reason_code);
    Ok(())
}

pub(super) fn connection_info(st: &ClientState) -> ConnectionInfo {
    ConnectionInfo {
        peer_addr: st.peer_addr,
        our_ident: st.our_ident.clone(),
        their_ident: st.their_ident.clone(),
        send_packet_seq: st.codec.send_pipe.packet_seq(),
        recv_packet_seq: st.codec.recv_pipe.packet_seq(),
        sent_bytes: st.codec.send_pipe.sent_bytes(),
        recvd_bytes: st.codec.recv_pipe.recvd_bytes(),
        algos: negotiate::last_exchange(st).map(|exchange| exchange.algos.clone()),
        server_pubkey: negotiate::server_pubkey(st).cloned(),
        session_id: st.session_id.as_deref().map(Bytes::copy_from_slice),
        authenticated: auth::is_authenticated(st),
        kex_count: negotiate::kex_count(st),
    }
}
