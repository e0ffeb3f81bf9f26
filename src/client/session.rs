use bytes::Bytes;
use futures_core::ready;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::terminal_mode;
use crate::error::Result;
use super::channel::{
    Channel, ChannelReceiver, ChannelEvent, ChannelConfig, ChannelReq, DATA_STANDARD, DATA_STDERR,
};
use super::client::Client;

/// Handle to an SSH session.
///
/// SSH session (RFC 4254, section 6) corresponds to the execution of a single process. The
/// [`Session`] is used to send requests and data to the server, and [`SessionReceiver`] will
/// receive the data and the exit status from the server. To open the session, use
/// [`Client::open_session()`][super::Client::open_session].
///
/// Once the session is open, you will typically go through three stages:
/// - prepare the execution environment: [`request_pty()`][Self::request_pty()],
/// [`env()`][Self::env()],
/// - start the execution: [`shell()`][Self::shell()], [`exec()`][Self::exec()],
/// [`subsystem()`][Self::subsystem()],
/// - interact with the process: [`send_stdin()`][Self::send_stdin()],
/// [`send_eof()`][Self::send_eof()], [`signal()`][Self::signal()],
/// [`window_change()`][Self::window_change()].
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Session {
    channel: Channel,
}

impl Session {
    pub(super) async fn open(client: &Client, config: ChannelConfig) -> Result<(Session, SessionReceiver)> {
        let (channel, channel_rx, _) = client.open_channel("session", config, Bytes::new()).await?;
        Ok((Session { channel }, SessionReceiver { channel_rx }))
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Close the session.
    ///
    /// We won't send any further requests or data to the server and the session will be closed
    /// once the server acknowledges our request.
    ///
    /// This method is idempotent: if the session is already closed or closing, we do nothing.
    pub fn close(&self) {
        self.channel.close()
    }
}

/// # Preparing the execution environment
///
/// Use these methods to configure the session before starting the process. Each of them waits for
/// the reply from the server and fails with [`Error::ChannelReq`][crate::Error::ChannelReq] if the
/// server refuses the request.
impl Session {
    /// Request a pseudo-terminal (pty) for the future process.
    pub async fn request_pty(&self, pty: &PtyRequest) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_str(&pty.term);
        payload.put_u32(pty.width);
        payload.put_u32(pty.height);
        payload.put_u32(pty.width_px);
        payload.put_u32(pty.height_px);
        payload.put_bytes(&pty.modes.encode());
        self.channel.request("pty-req", payload.finish()).await
    }

    /// Pass an environment variable to the future process.
    pub async fn env(&self, name: &[u8], value: &[u8]) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_bytes(name);
        payload.put_bytes(value);
        self.channel.request("env", payload.finish()).await
    }
}

/// # Starting the process
///
/// Use one of these methods to start the remote process. Only one of them can succeed, you cannot
/// start multiple processes with a single session (but you may open multiple sessions).
impl Session {
    /// Start the user's default shell on the server.
    pub async fn shell(&self) -> Result<()> {
        self.channel.request("shell", Bytes::new()).await
    }

    /// Start a command on the server.
    pub async fn exec(&self, command: &[u8]) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_bytes(command);
        self.channel.request("exec", payload.finish()).await
    }

    /// Start an SSH subsystem on the server (RFC 4254, section 6.5).
    pub async fn subsystem(&self, subsystem_name: &str) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_str(subsystem_name);
        self.channel.request("subsystem", payload.finish()).await
    }
}

/// # Interacting with a running process
impl Session {
    /// Send data to the standard input of the running process.
    ///
    /// This method returns after all bytes have been accepted by the flow control mechanism, but
    /// possibly before we write them to the socket.
    pub async fn send_stdin(&self, data: Bytes) -> Result<()> {
        self.channel.send_data(data, DATA_STANDARD).await
    }

    /// Close the standard input of the running process.
    ///
    /// If the session is closed before you call this method, or if it closes before this method
    /// returns, we quietly ignore this error and return `Ok`.
    pub async fn send_eof(&self) -> Result<()> {
        self.channel.send_eof().await
    }

    /// Deliver a signal to the running process.
    ///
    /// Signal names are described in RFC 4254, section 6.10.
    /// [`codes::signal`][crate::codes::signal] lists the signal names defined by SSH.
    ///
    /// This method returns immediately, the server never replies to this request.
    pub fn signal(&self, signal_name: &str) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_str(signal_name);
        self.channel.request_no_reply("signal", payload.finish())
    }

    /// Notify the process that the size of the terminal has changed (RFC 4254, section 6.7).
    pub fn window_change(&self, change: &WindowChange) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_u32(change.width);
        payload.put_u32(change.height);
        payload.put_u32(change.width_px);
        payload.put_u32(change.height_px);
        self.channel.request_no_reply("window-change", payload.finish())
    }
}

/// Pseudo-terminal request, passed to [`Session::request_pty()`].
#[derive(Debug, Clone, Default)]
pub struct PtyRequest {
    /// Value of the `TERM` environment variable (e.g. `"vt100"`).
    pub term: String,
    /// Terminal width, in characters.
    pub width: u32,
    /// Terminal height, in rows.
    pub height: u32,
    /// Terminal width, in pixels.
    pub width_px: u32,
    /// Terminal height, in pixels.
    pub height_px: u32,
    /// Terminal modes.
    pub modes: PtyTerminalModes,
}

/// Encoded terminal modes of a [`PtyRequest`] (RFC 4254, section 8).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtyTerminalModes {
    modes: Vec<(u8, u32)>,
}

impl PtyTerminalModes {
    /// Creates an empty list of modes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of a mode.
    ///
    /// [`codes::terminal_mode`][crate::codes::terminal_mode] lists the common opcodes. Setting the
    /// same opcode again replaces the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `op` is `TTY_OP_END` or is not below 160 (opcodes from 160 up carry other
    /// argument types).
    pub fn set(&mut self, op: u8, value: u32) {
        assert!(op != terminal_mode::TTY_OP_END && op < 160, "invalid terminal mode opcode {}", op);
        match self.modes.iter_mut().find(|(o, _)| *o == op) {
            Some(mode) => mode.1 = value,
            None => self.modes.push((op, value)),
        }
    }

    fn encode(&self) -> Bytes {
        let mut encoded = PacketEncode::new();
        for &(op, value) in self.modes.iter() {
            encoded.put_u8(op);
            encoded.put_u32(value);
        }
        encoded.put_u8(terminal_mode::TTY_OP_END);
        encoded.finish()
    }
}

/// Change of the terminal size, passed to [`Session::window_change()`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowChange {
    /// Terminal width, in characters.
    pub width: u32,
    /// Terminal height, in rows.
    pub height: u32,
    /// Terminal width, in pixels.
    pub width_px: u32,
    /// Terminal height, in pixels.
    pub height_px: u32,
}

/// An event returned from [`SessionReceiver`].
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility. It should always be safe to ignore any events that you don't intend to
/// handle.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionEvent {
    /// Data from the standard output of the running process.
    ///
    /// You should handle this data as a byte stream, the boundaries between consecutive
    /// `StdoutData` events might be arbitrary.
    StdoutData(Bytes),

    /// Data from the standard error of the running process.
    StderrData(Bytes),

    /// End-of-file marker from the running process.
    ///
    /// After this, the server should not send more data (both stdout and stderr).
    Eof,

    /// The process terminated with given exit status.
    ExitStatus(u32),

    /// The process terminated violently due to a signal.
    ExitSignal(ExitSignal),

    /// The server closed the session. This is the last event.
    Close,
}

/// Information about a process that terminated due to a signal.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    /// Name of the signal that terminated the process.
    ///
    /// [`codes::signal`][crate::codes::signal] lists the signal names defined by SSH.
    pub signal_name: String,

    /// True if the process produced a core dump.
    pub core_dumped: bool,

    /// Error message.
    pub message: String,

    /// Language tag of `message` (per RFC 3066).
    pub message_lang: String,
}

/// Receiving half of a [`Session`].
///
/// [`SessionReceiver`] produces [`SessionEvent`]s. You can ignore these events if you don't need
/// them, but you **must** receive them, otherwise the client will stall when the internal buffer
/// of events fills up.
#[derive(Debug)]
pub struct SessionReceiver {
    channel_rx: ChannelReceiver,
}

impl SessionReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the session was closed.
    pub async fn recv(&mut self) -> Result<Option<SessionEvent>> {
        struct Recv<'a> { rx: &'a mut SessionReceiver }
        impl<'a> Future for Recv<'a> {
            type Output = Result<Option<SessionEvent>>;
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
                self.rx.poll_recv(cx)
            }
        }
        Recv { rx: self }.await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<SessionEvent>>> {
        loop {
            match ready!(self.channel_rx.poll_recv(cx)) {
                Some(channel_event) => match translate_event(channel_event)? {
                    Some(event) => return Poll::Ready(Ok(Some(event))),
                    None => continue,
                },
                None => return Poll::Ready(Ok(None)),
            }
        }
    }
}

fn translate_event(event: ChannelEvent) -> Result<Option<SessionEvent>> {
    Ok(match event {
        ChannelEvent::Data(data, DATA_STANDARD) => Some(SessionEvent::StdoutData(data)),
        ChannelEvent::Data(data, DATA_STDERR) => Some(SessionEvent::StderrData(data)),
        ChannelEvent::Data(_, _) => None,
        ChannelEvent::Eof => Some(SessionEvent::Eof),
        ChannelEvent::Close => Some(SessionEvent::Close),
        ChannelEvent::Request(req) => translate_request(req)?,
    })
}

fn translate_request(request: ChannelReq) -> Result<Option<SessionEvent>> {
    let mut payload = PacketDecode::new(request.payload);
    Ok(match request.request_type.as_str() {
        "exit-status" => Some(SessionEvent::ExitStatus(payload.get_u32()?)),
        "exit-signal" => Some(SessionEvent::ExitSignal(ExitSignal {
            signal_name: payload.get_string()?,
            core_dumped: payload.get_bool()?,
            message: payload.get_string()?,
            message_lang: payload.get_string()?,
        })),
        _ => {
            log::debug!("ignoring session request {:?}", request.request_type);
            None
        },
    })
}
