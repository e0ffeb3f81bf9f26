use bytes::Bytes;
use derivative::Derivative;
use parking_lot::Mutex;
use pin_project::{pin_project, pinned_drop};
use rand::rngs::OsRng;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use crate::{Error, Result, DisconnectError};
use crate::cipher::{self, CipherAlgo};
use crate::compress::{self, CompressAlgo};
use crate::kex::{self, KexAlgo};
use crate::mac::{self, MacAlgo};
use crate::pubkey::{self, PubkeyAlgo, Pubkey};
use super::{auth, conn, negotiate};
use super::auth_method::AuthMethod;
use super::auth_method::keyboard_interactive::{AuthKeyboardInteractive, Prompter};
use super::auth_method::password::AuthPassword;
use super::auth_method::pubkey::{AuthPubkey, Signer};
use super::channel::{Channel, ChannelReceiver, ChannelConfig};
use super::client_event::ClientEvent;
use super::client_state::{self, ClientState, ConnectionInfo, SessionShared};
use super::session::{Session, SessionReceiver};
use super::tunnel::{Tunnel, TunnelReceiver};

/// Capacity of the queue of [`ClientEvent`]s.
const EVENT_CAPACITY: usize = 16;

/// Handle to an SSH connection.
///
/// Use this object to send requests to the SSH server. In tandem, you will also need to use
/// [`ClientReceiver`] to handle events that we receive from the server, and [`ClientFuture`] to
/// perform the actual I/O.
///
/// To open a connection, use [`Client::connect()`], or pass your own I/O stream to
/// [`Client::open()`]. Then authenticate using one of the `auth_*` methods. Once you are
/// authenticated, you can open a [`Session`] and execute a program, or open a [`Tunnel`]. You can
/// open multiple channels over a single connection.
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Client {
    client_st: Weak<Mutex<ClientState>>,
    shared: Arc<SessionShared>,
}

impl Client {
    /// Creates an SSH connection from an existing stream.
    ///
    /// We initialize the client, but do not perform any I/O in this method. You should use the
    /// returned objects as follows:
    ///
    /// - [`Client`] allows you to interact with the SSH client. You should use it to authenticate
    /// yourself to the server and then you can open channels, sessions or tunnels.
    /// - [`ClientReceiver`] is the receiving half of the client. It produces [`ClientEvent`]s,
    /// which correspond to debugging messages and banners sent by the server. You **must**
    /// receive these events in a timely manner (or drop the receiver), otherwise the client will
    /// stall.
    /// - [`ClientFuture`] is a future that you must poll to drive the connection state machine
    /// forward. You will usually spawn a task for this future.
    pub fn open<IO>(stream: IO, config: ClientConfig) -> Result<(Client, ClientReceiver, ClientFuture<IO>)>
        where IO: AsyncRead + AsyncWrite
    {
        Self::open_with_peer(stream, config, None)
    }

    /// Connects to `host` and `port` over TCP and creates an SSH connection.
    ///
    /// This resolves the address and opens the TCP connection, then proceeds as
    /// [`Client::open()`].
    pub async fn connect(host: &str, port: u16, config: ClientConfig)
        -> Result<(Client, ClientReceiver, ClientFuture<TcpStream>)>
    {
        let stream = TcpStream::connect((host, port)).await.map_err(Error::read_io)?;
        let peer_addr = stream.peer_addr().ok();
        log::debug!("connected to {}:{} ({:?})", host, port, peer_addr);
        Self::open_with_peer(stream, config, peer_addr)
    }

    fn open_with_peer<IO>(stream: IO, config: ClientConfig, peer_addr: Option<SocketAddr>)
        -> Result<(Client, ClientReceiver, ClientFuture<IO>)>
        where IO: AsyncRead + AsyncWrite
    {
        let rng = Box::new(OsRng);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let client_st = client_state::new_client(config, rng, event_tx, peer_addr)?;
        let shared = client_st.shared.clone();
        let client_st = Arc::new(Mutex::new(client_st));

        let client = Client { client_st: Arc::downgrade(&client_st), shared };
        let client_rx = ClientReceiver { event_rx };
        let client_fut = ClientFuture { client_st, stream };
        Ok((client, client_rx, client_fut))
    }

    fn upgrade(&self) -> Result<Arc<Mutex<ClientState>>> {
        self.shared.check()?;
        self.client_st.upgrade().ok_or(Error::ClientClosed)
    }

    async fn authenticate(&self, method: Box<dyn AuthMethod + Send>) -> Result<bool> {
        let (result_tx, result_rx) = oneshot::channel();
        auth::start_method(&mut self.upgrade()?.lock(), method, result_tx)?;
        self.shared.wait(result_rx).await?
    }

    /// Authenticates using the "password" method (RFC 4252, section 8).
    ///
    /// Returns `Ok(true)` if the server accepted the password and `Ok(false)` if it refused it.
    /// Only one authentication attempt is allowed per connection: any further attempt fails with
    /// [`Error::AuthAlreadyAttempted`].
    pub async fn auth_password(&self, username: &str, password: &str) -> Result<bool> {
        check_username(username)?;
        let method = AuthPassword::new(username.into(), password.into());
        self.authenticate(Box::new(method)).await
    }

    /// Authenticates using the "keyboard-interactive" method (RFC 4256).
    ///
    /// The server may send any number of rounds of prompts; we pass every prompt to the
    /// `prompter` and send the answers back to the server. Returns `Ok(true)` if the server
    /// accepted the answers and `Ok(false)` if it refused them. If the prompter fails, this method
    /// fails with the same error.
    pub async fn auth_keyboard_interactive<P>(&self, username: &str, prompter: P) -> Result<bool>
        where P: Prompter + Send + 'static
    {
        check_username(username)?;
        let cancel = self.shared.cancel_token().child_token();
        let method = AuthKeyboardInteractive::new(username.into(), Box::new(prompter), cancel);
        self.authenticate(Box::new(method)).await
    }

    /// Authenticates using the "publickey" method (RFC 4252, section 7).
    ///
    /// The `pubkey_blob` is the encoded public key and `algo_name` is the name of the signature
    /// algorithm (such as `"rsa-sha2-256"`). The private key never enters this library: the
    /// `signer` (such as an SSH agent) signs the authentication request and returns the encoded
    /// signature.
    ///
    /// Returns `Ok(true)` if the server accepted the signature and `Ok(false)` if it refused it.
    pub async fn auth_pubkey<S>(
        &self,
        username: &str,
        pubkey_blob: Bytes,
        algo_name: &str,
        signer: S,
    ) -> Result<bool>
        where S: Signer + Send + 'static
    {
        check_username(username)?;
        let algo = pubkey::by_name(algo_name)?;
        let cancel = self.shared.cancel_token().child_token();
        let method = AuthPubkey::new(username.into(), pubkey_blob, algo.name, Box::new(signer), cancel);
        self.authenticate(Box::new(method)).await
    }

    /// Returns true if the server has authenticated you.
    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(auth::is_authenticated(&self.upgrade()?.lock()))
    }

    /// Opens an SSH session to execute a program or the shell.
    ///
    /// If the session is opened successfully, you receive two objects:
    ///
    /// - [`Session`] is the handle for interacting with the session and sending data to the
    /// server.
    /// - [`SessionReceiver`] receives the [`SessionEvent`][super::SessionEvent]s produced by the
    /// session. You **must** receive these events in time, otherwise the client will stall.
    ///
    /// Fails with [`Error::NotAuthenticated`] if you are not authenticated yet.
    pub async fn open_session(&self, config: ChannelConfig) -> Result<(Session, SessionReceiver)> {
        Session::open(self, config).await
    }

    /// Opens a tunnel to `connect_addr` through the server (`"direct-tcpip"` channel).
    ///
    /// The `originator_addr` is the address of the client that initiated the connection, which
    /// the server may use for logging.
    pub async fn connect_tunnel(
        &self,
        config: ChannelConfig,
        connect_addr: (&str, u16),
        originator_addr: (&str, u16),
    ) -> Result<(Tunnel, TunnelReceiver)> {
        Tunnel::connect(self, config, connect_addr, originator_addr).await
    }

    /// Opens a raw SSH channel (low level API).
    ///
    /// Use this to directly open an SSH channel, as described in RFC 4254, section 5.
    /// The bytes in `open_payload` will be appended to the `SSH_MSG_CHANNEL_OPEN` packet as the
    /// "channel specific data". This method waits for the reply from the server and fails with
    /// [`Error::ChannelOpen`] if the server refuses to open the channel.
    ///
    /// If the channel is opened successfully, you receive the [`Channel`], the
    /// [`ChannelReceiver`] and the channel specific data from the
    /// `SSH_MSG_CHANNEL_OPEN_CONFIRMATION` packet.
    pub async fn open_channel(&self, channel_type: &str, config: ChannelConfig, open_payload: Bytes)
        -> Result<(Channel, ChannelReceiver, Bytes)>
    {
        let opened = conn::open_channel(
            &mut self.upgrade()?.lock(), channel_type.into(), open_payload, &config)?;
        let confirm_payload = self.shared.wait(opened.open_rx).await??;

        let channel = Channel {
            client_st: self.client_st.clone(),
            channel_st: opened.channel_st,
            shared: self.shared.clone(),
            our_id: opened.our_id,
        };
        let channel_rx = ChannelReceiver { event_rx: opened.event_rx };
        Ok((channel, channel_rx, confirm_payload))
    }

    /// Triggers key re-exchange (RFC 4253, section 9).
    ///
    /// Normally, we trigger the re-exchange automatically (see
    /// [`ClientConfig::rekey_after_bytes`] and [`ClientConfig::rekey_after_duration`]), but you
    /// can use this method to start the exchange earlier. Channels keep working during the
    /// exchange, their messages are held back until the new keys are in place.
    ///
    /// This method returns when the key exchange completes. If an exchange is already in progress,
    /// no new exchange is started and we return as soon as the running exchange completes.
    pub async fn rekey(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        negotiate::start_kex(&mut self.upgrade()?.lock(), done_tx);
        self.shared.wait(done_rx).await
    }

    /// Disconnects from the server and closes the client.
    ///
    /// We send `SSH_MSG_DISCONNECT` to the server. After this message is written, the
    /// [`ClientFuture`] returns.
    ///
    /// The `error` describes the reasons for the disconnection to the server. You may want to use
    /// [`DisconnectError::by_app()`] as a reasonable default value.
    pub fn disconnect(&self, error: DisconnectError) -> Result<()> {
        client_state::disconnect(&mut self.upgrade()?.lock(), error)
    }

    /// Closes the client without notifying the server.
    ///
    /// All pending operations fail with [`Error::Cancelled`] and the [`ClientFuture`] returns as
    /// soon as it is polled. This method is idempotent.
    pub fn close(&self) {
        match self.client_st.upgrade() {
            Some(client_st) => client_state::close(&mut client_st.lock()),
            None => self.shared.fail(Error::Cancelled),
        }
    }

    #[cfg(test)]
    pub(super) fn channel_count(&self) -> usize {
        self.client_st.upgrade().map_or(0, |client_st| conn::channel_count(&client_st.lock()))
    }

    /// Returns a snapshot of the state of the connection.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let client_st = self.client_st.upgrade().ok_or(Error::ClientClosed)?;
        let info = client_state::connection_info(&client_st.lock());
        Ok(info)
    }
}

fn check_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(Error::InvalidCredentials("the username must not be empty"))
    }
    Ok(())
}

/// Receiving half of a [`Client`].
///
/// [`ClientReceiver`] provides you with the [`ClientEvent`]s, various events that are produced
/// during the life of the connection. You can ignore them, but you **must** receive these events
/// (or drop the receiver), otherwise the client will stall when the internal buffer of events
/// fills up.
#[derive(Debug)]
pub struct ClientReceiver {
    event_rx: mpsc::Receiver<ClientEvent>,
}

impl ClientReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the connection was closed.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.event_rx.recv().await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ClientEvent>> {
        self.event_rx.poll_recv(cx)
    }
}

/// Future that drives the connection state machine.
///
/// This future performs the reads and writes on `IO` and stores the state of the connection. You
/// must poll this future, usually by spawning a task for it. The future completes when the
/// connection is closed or when an error happens.
///
/// When the server disconnects gracefully (with `SSH_DISCONNECT_BY_APPLICATION`), the future
/// resolves to `Ok(())`. Every other error is returned, and all operations that are still
/// pending fail with the same error. Dropping the future closes the client.
#[pin_project(PinnedDrop)]
pub struct ClientFuture<IO> {
    client_st: Arc<Mutex<ClientState>>,
    #[pin] stream: IO,
}

impl<IO> Future for ClientFuture<IO>
    where IO: AsyncRead + AsyncWrite
{
    type Output = Result<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        let this = self.project();
        let mut client_st = this.client_st.lock();
        let res = match client_state::poll_client(&mut client_st, this.stream, cx) {
            Poll::Ready(res) => res,
            Poll::Pending => return Poll::Pending,
        };

        match res {
            Ok(()) => {
                client_st.shared.fail(Error::ClientClosed);
                Poll::Ready(Ok(()))
            },
            Err(Error::PeerDisconnected(error)) if error.is_graceful() => {
                log::debug!("server disconnected: {}", error);
                client_st.shared.fail(Error::PeerDisconnected(error));
                Poll::Ready(Ok(()))
            },
            Err(err) => {
                log::debug!("client failed: {}", err);
                client_st.shared.fail(err.clone());
                Poll::Ready(Err(err))
            },
        }
    }
}

#[pinned_drop]
impl<IO> PinnedDrop for ClientFuture<IO> {
    fn drop(self: Pin<&mut Self>) {
        self.client_st.lock().shared.fail(Error::ClientClosed);
    }
}

/// Configuration of a [`Client`].
///
/// You should start from the [default][Default] instance, which supports every algorithm that we
/// implement, and modify it according to your needs. You may also find the method
/// [`ClientConfig::with()`] syntactically convenient.
///
/// This struct is `#[non_exhaustive]`, so we may add more fields without breaking backward
/// compatibility.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Supported [key exchange algorithms][crate::kex].
    ///
    /// We will use the first algorithm that is also supported by the server. If there is no
    /// overlap, the connection will abort.
    pub kex_algos: Vec<&'static KexAlgo>,

    /// Supported [server public key algorithms][crate::pubkey].
    pub server_pubkey_algos: Vec<&'static PubkeyAlgo>,

    /// Supported [encryption algorithms][crate::cipher], used in both directions.
    pub cipher_algos: Vec<&'static CipherAlgo>,

    /// Supported [message authentication algorithms][crate::mac], used in both directions.
    pub mac_algos: Vec<&'static MacAlgo>,

    /// Supported [compression algorithms][crate::compress], used in both directions.
    pub compress_algos: Vec<&'static CompressAlgo>,

    /// Our software version, sent in the identification string `SSH-2.0-<ident>`.
    pub ident: String,

    /// Decides whether we trust the public key of the server.
    ///
    /// This callback is invoked once per key exchange, after we verified that the server owns
    /// the key. If it returns false, the connection fails with [`Error::HostKeyRejected`]. If it is
    /// `None`, we accept any key.
    #[derivative(Debug = "ignore")]
    pub accept_host_key: Option<Arc<dyn Fn(&Pubkey) -> bool + Send + Sync>>,

    /// Sizes of the group that we ask for in the group exchange: `(min, preferred, max)` bits
    /// (RFC 4419).
    pub gex_bits: (u32, u32, u32),

    /// Start key re-exchange after this many bytes.
    ///
    /// We trigger a key re-exchange after this number of bytes is transmitted or received since
    /// the last exchange. By default, this is 2^30 bytes (as recommended by RFC 4253, section 9).
    /// We only allow you to make this value lower: higher values are capped to the default.
    pub rekey_after_bytes: u64,

    /// Start key re-exchange after this amount of time.
    ///
    /// By default, we perform the re-exchange after one hour.
    pub rekey_after_duration: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            kex_algos: kex::all().to_vec(),
            server_pubkey_algos: pubkey::all().to_vec(),
            cipher_algos: cipher::all().to_vec(),
            mac_algos: mac::all().to_vec(),
            compress_algos: compress::all().to_vec(),
            ident: "sshengine".into(),
            accept_host_key: None,
            gex_bits: (1024, 2048, 8192),
            rekey_after_bytes: 1 << 30,
            rekey_after_duration: Duration::from_secs(60 * 60),
        }
    }
}

impl ClientConfig {
    /// Builds a configuration that supports exactly the given algorithms, in the given order.
    ///
    /// Fails with [`Error::UnsupportedAlgo`] if we don't implement one of the algorithms.
    pub fn from_algo_names(
        kex_names: &[&str],
        server_pubkey_names: &[&str],
        cipher_names: &[&str],
        mac_names: &[&str],
    ) -> Result<ClientConfig> {
        Ok(ClientConfig {
            kex_algos: kex_names.iter().map(|name| kex::by_name(name)).collect::<Result<_>>()?,
            server_pubkey_algos: server_pubkey_names.iter()
                .map(|name| pubkey::by_name(name)).collect::<Result<_>>()?,
            cipher_algos: cipher_names.iter().map(|name| cipher::by_name(name)).collect::<Result<_>>()?,
            mac_algos: mac_names.iter().map(|name| mac::by_name(name)).collect::<Result<_>>()?,
            ..ClientConfig::default()
        })
    }

    /// Sets the callback that decides whether we trust the public key of the server.
    pub fn accept_host_key<F>(mut self, f: F) -> Self
        where F: Fn(&Pubkey) -> bool + Send + Sync + 'static
    {
        self.accept_host_key = Some(Arc::new(f));
        self
    }

    /// Mutate `self` in a closure.
    ///
    /// This method applies your closure to `self` and returns the mutated configuration.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }
}
