/// An event returned from [`ClientReceiver`][super::ClientReceiver].
///
/// These are "global" events that are related to the SSH connection, not to a particular channel.
/// You can safely ignore all of them, but you must keep receiving them, otherwise the client will
/// stall when the internal buffer of events fills up.
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Server sent us a debugging message.
    ///
    /// This is the "debug message" (`SSH_MSG_DEBUG`) described in RFC 4253, section 11.3.
    DebugMsg(DebugMsg),

    /// Server sent a text that the user should see before authentication.
    ///
    /// This is the "banner message" (`SSH_MSG_USERAUTH_BANNER`) described in RFC 4252, section
    /// 5.4.
    AuthBanner(AuthBanner),
}

/// Debugging message sent by the SSH server.
#[derive(Debug, Clone)]
pub struct DebugMsg {
    /// If true, you should display this message.
    pub always_display: bool,
    /// The debugging message string.
    pub message: String,
    /// Language tag of the message (as in RFC 3066).
    pub message_lang: String,
}

/// Banner message sent by the SSH server.
#[derive(Debug, Clone)]
pub struct AuthBanner {
    /// The banner message string.
    pub message: String,
    /// Language tag of the message (per RFC 3066).
    pub message_lang: String,
}
