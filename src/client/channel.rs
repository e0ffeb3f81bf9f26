use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use crate::error::{Result, Error};
use super::channel_state::{self, ChannelState, ChannelSendData};
use super::client_state::{self, ClientState, SessionShared};

/// Handle to an SSH channel (low level API).
///
/// Use this object to send requests and data to the server over an SSH channel. To receive events
/// and data from the server, use the matching [`ChannelReceiver`]. To obtain an instance of
/// [`Channel`] and [`ChannelReceiver`], use the method
/// [`Client::open_channel()`][super::Client::open_channel()].
///
/// This is part of a **low level API** that gives you direct access to an SSH channel, as
/// described in RFC 4254, section 5. If you want to execute programs, consider using a
/// [`Session`][super::Session], which provides an API that hides the details of the SSH protocol.
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Channel {
    pub(super) client_st: Weak<Mutex<ClientState>>,
    pub(super) channel_st: Weak<Mutex<ChannelState>>,
    pub(super) shared: Arc<SessionShared>,
    pub(super) our_id: u32,
}

impl Channel {
    /// Our (local) id of the channel.
    pub fn channel_id(&self) -> u32 {
        self.our_id
    }

    /// Sends a request to the server and waits for the reply.
    ///
    /// This sends a `SSH_MSG_CHANNEL_REQUEST` with `want reply` set (RFC 4254, section 5.4). The
    /// bytes in `payload` are appended as the type-specific data. Requests are sent one at a
    /// time: the next request is sent only after the server replied to the previous one.
    ///
    /// Fails with [`Error::ChannelReq`] if the server replies with `SSH_MSG_CHANNEL_FAILURE`.
    pub async fn request(&self, request_type: &str, payload: Bytes) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.with_channel_st(|channel_st| {
            channel_state::send_request(channel_st, request_type.into(), payload, Some(reply_tx))
        })?;
        self.shared.wait(reply_rx).await?
    }

    /// Sends a request to the server without asking for a reply.
    pub fn request_no_reply(&self, request_type: &str, payload: Bytes) -> Result<()> {
        self.with_channel_st(|channel_st| {
            channel_state::send_request(channel_st, request_type.into(), payload, None)
        })
    }

    /// Sends standard data to the server.
    ///
    /// This is the same as [`send_data()`][Self::send_data()] with [`DataType::Standard`].
    pub async fn write(&self, data: Bytes) -> Result<()> {
        self.send_data(data, DataType::Standard).await
    }

    /// Sends channel data to the server.
    ///
    /// This sends a series of `SSH_MSG_CHANNEL_DATA` or `SSH_MSG_CHANNEL_EXTENDED_DATA` (depending
    /// on `data_type`) to the channel (RFC 4254, section 5.2). We split `data` into chunks that
    /// fit into the send window and the maximum packet size of the server. If the window is
    /// exhausted, this method waits until the server adjusts it with
    /// `SSH_MSG_CHANNEL_WINDOW_ADJUST`.
    ///
    /// This method returns after all bytes have been accepted by the flow control mechanism,
    /// but possibly before we write them to the socket.
    pub async fn send_data(&self, data: Bytes, data_type: DataType) -> Result<()> {
        self.send_channel_data(ChannelSendData::Data(data, data_type)).await
    }

    /// Sends end-of-file marker to the server.
    ///
    /// This sends `SSH_MSG_CHANNEL_EOF` to the channel (RFC 4254, section 5.3), after all data
    /// that was sent before.
    ///
    /// If the channel is closed before you call this method, or if it closes before this method
    /// returns, we quietly ignore this error and return `Ok`.
    pub async fn send_eof(&self) -> Result<()> {
        match self.send_channel_data(ChannelSendData::Eof).await {
            Ok(_) => Ok(()),
            // the server often closes the channel before we have a chance to send EOF
            Err(Error::ChannelClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Closes the channel.
    ///
    /// This sends `SSH_MSG_CHANNEL_CLOSE` to the channel (RFC 4254, section 5.3) and the channel
    /// becomes closed after we receive the same message from the server. Data and requests that
    /// are still waiting for the window or for a reply fail with [`Error::ChannelClosed`].
    ///
    /// This method is idempotent: if the channel is already closed or closing, we do nothing.
    pub fn close(&self) {
        let _ = self.with_channel_st(|channel_st| {
            channel_state::close(channel_st);
            Ok(())
        });
    }

    async fn send_channel_data(&self, data: ChannelSendData) -> Result<()> {
        let sent_rx = self.with_channel_st(|channel_st| channel_state::send_data(channel_st, data))?;
        self.shared.wait(sent_rx).await?
    }

    fn with_channel_st<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut ChannelState) -> Result<T>
    {
        self.shared.check()?;
        let client_st = self.client_st.upgrade().ok_or(Error::ClientClosed)?;
        let mut st = client_st.lock();
        let channel_st = self.channel_st.upgrade().ok_or(Error::ChannelClosed)?;
        let res = f(&mut channel_st.lock());
        client_state::wakeup_client(&mut st);
        res
    }
}

/// Receiving half of a [`Channel`] (low level API).
///
/// [`ChannelReceiver`] produces [`ChannelEvent`]s, which correspond to the requests and data sent
/// by the server on the channel. You can ignore these events if you don't need them, but you
/// **must** receive them, otherwise the client will stall when the internal buffer of events fills
/// up.
#[derive(Debug)]
pub struct ChannelReceiver {
    pub(super) event_rx: mpsc::Receiver<ChannelEvent>,
}

impl ChannelReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the channel was closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.event_rx.recv().await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ChannelEvent>> {
        self.event_rx.poll_recv(cx)
    }
}

/// An event returned from [`ChannelReceiver`] (low level API).
///
/// These events are delivered in the order in which the server sent the corresponding messages.
#[derive(Debug)]
#[non_exhaustive]
pub enum ChannelEvent {
    /// Data received from the server.
    ///
    /// These events correspond to received `SSH_MSG_CHANNEL_DATA` or
    /// `SSH_MSG_CHANNEL_EXTENDED_DATA` (RFC 4254, section 5.2). You should handle this data as a
    /// byte stream, the boundaries between consecutive `Data` events might be arbitrary.
    Data(Bytes, DataType),

    /// End-of-file marker received from the server (`SSH_MSG_CHANNEL_EOF`).
    Eof,

    /// The server closed the channel (`SSH_MSG_CHANNEL_CLOSE`).
    ///
    /// This is the last event on the channel.
    Close,

    /// Request received from the server (`SSH_MSG_CHANNEL_REQUEST`).
    ///
    /// If the server wanted a reply, we have already replied with `SSH_MSG_CHANNEL_FAILURE`.
    Request(ChannelReq),
}

/// Request on an SSH channel that we received from the server (low level API).
#[derive(Debug, Clone)]
pub struct ChannelReq {
    /// The type of the request, such as `"exit-status"`.
    pub request_type: String,
    /// True if the server asked for a reply.
    pub want_reply: bool,
    /// The raw type-specific request data.
    ///
    /// You may want to use [`PacketDecode`][crate::PacketDecode] to decode it.
    pub payload: Bytes,
}

/// Configuration of a channel.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ChannelConfig {
    /// Initial size of the receive window, in bytes.
    ///
    /// This is the window that we announce in `SSH_MSG_CHANNEL_OPEN`.
    pub recv_window_max: usize,

    /// Number of bytes that we add to the receive window when it is exhausted.
    pub recv_window_refill: usize,

    /// Maximum packet size that we announce to the server.
    pub recv_packet_len_max: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            recv_window_max: 2 * 1024 * 1024,
            recv_window_refill: 2 * 1024 * 1024,
            recv_packet_len_max: 32 * 1024,
        }
    }
}

impl ChannelConfig {
    /// Update the configuration in pseudo-builder pattern style.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }
}

/// Type of data sent over an SSH channel (low level API).
///
/// Channel data transfer is described in RFC 4254, section 5.2. In practice, the only two data
/// types used are `DataType::Standard` ([`DATA_STANDARD`]) and `DataType::Extended(1)`
/// ([`DATA_STDERR`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Standard channel data sent using `SSH_MSG_CHANNEL_DATA`.
    Standard,
    /// Extended channel data sent using `SSH_MSG_CHANNEL_EXTENDED_DATA`.
    Extended(u32),
}

/// Shorthand for `DataType::Standard`.
pub const DATA_STANDARD: DataType = DataType::Standard;

/// Shorthand for `DataType::Extended(1)`.
pub const DATA_STDERR: DataType = DataType::Extended(1);
