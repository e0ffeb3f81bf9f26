//! Asynchronous SSH client protocol engine.
//!
//! - Entry point for making SSH connections is the [`Client`]. It performs the key exchange,
//! authenticates the user and multiplexes channels ([`Session`], [`Tunnel`], raw [`Channel`])
//! over a single connection.
//! - Algorithms are pluggable and selected by name: see the [`kex`], [`pubkey`], [`cipher`],
//! [`mac`] and [`compress`] modules.
//! - [`PacketEncode`] and [`PacketDecode`] implement the SSH wire encoding (RFC 4251, section 5).
//!
#![allow(clippy::box_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::unused_unit)]
#![allow(clippy::unit_arg)]
#![allow(clippy::module_inception)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

pub use crate::client::{AuthPrompt, Prompter, Signer};
pub use crate::client::{
    Channel, ChannelReceiver, ChannelEvent, ChannelReq, ChannelConfig,
    DataType, DATA_STANDARD, DATA_STDERR,
};
pub use crate::client::{Client, ClientReceiver, ClientFuture, ClientConfig, ConnectionInfo};
pub use crate::client::{ClientEvent, DebugMsg, AuthBanner};
pub use crate::client::{AlgoLists, NegotiatedAlgos, KexInitExchange, select_algo, negotiate_algos};
pub use crate::client::{
    Session, SessionReceiver, SessionEvent, ExitSignal,
    PtyRequest, PtyTerminalModes, WindowChange,
};
pub use crate::client::{Tunnel, TunnelReceiver, TunnelEvent};
pub use crate::codec::{PacketEncode, PacketDecode};
pub use crate::error::{Result, Error, AlgoNegotiateError, DisconnectError, ChannelOpenError};

pub use self::cipher::CipherAlgo;
pub use self::compress::CompressAlgo;
pub use self::kex::KexAlgo;
pub use self::mac::MacAlgo;
pub use self::pubkey::{PubkeyAlgo, Pubkey};

pub use bytes;

pub mod cipher;
mod client;
mod codec;
pub mod codes;
pub mod compress;
mod error;
pub mod kex;
pub mod mac;
pub mod pubkey;
mod util;
