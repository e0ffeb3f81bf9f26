pub use self::auth_method::keyboard_interactive::{AuthPrompt, Prompter};
pub use self::auth_method::pubkey::Signer;
pub use self::channel::{
    Channel, ChannelReceiver, ChannelEvent, ChannelReq, ChannelConfig,
    DataType, DATA_STANDARD, DATA_STDERR,
};
pub use self::client::{Client, ClientReceiver, ClientFuture, ClientConfig};
pub use self::client_event::{ClientEvent, DebugMsg, AuthBanner};
pub use self::client_state::ConnectionInfo;
pub use self::negotiate::{AlgoLists, NegotiatedAlgos, KexInitExchange, select_algo, negotiate_algos};
pub use self::session::{
    Session, SessionReceiver, SessionEvent, ExitSignal,
    PtyRequest, PtyTerminalModes, WindowChange,
};
pub use self::tunnel::{Tunnel, TunnelReceiver, TunnelEvent};

#[macro_use] mod pump;
mod auth;
mod auth_method;
mod channel;
mod channel_state;
mod client;
mod client_event;
mod client_state;
mod conn;
mod negotiate;
mod recv;
mod session;
mod tunnel;
