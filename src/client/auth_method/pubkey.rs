use bytes::Bytes;
use futures_core::future::BoxFuture;
use futures_core::ready;
use std::future::Future as _;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::AuthMethod;

/// Produces signatures for the "publickey" authentication method (RFC 4252, section 7).
///
/// The private key never enters this crate: the signer may be an SSH agent, a hardware token or
/// any other holder of the key.
pub trait Signer {
    /// Signs `data` with the private key.
    ///
    /// Must return the signature in the SSH encoding (RFC 4253, section 6.6), that is the string
    /// with the signature format followed by the string with the signature blob.
    fn sign(&self, data: Bytes, cancel: CancellationToken) -> BoxFuture<'static, Result<Bytes>>;
}

pub(in super::super) struct AuthPubkey {
    username: String,
    pubkey_blob: Bytes,
    algo_name: &'static str,
    signer: Box<dyn Signer + Send>,
    cancel: CancellationToken,
    sign_fut: Option<BoxFuture<'static, Result<Bytes>>>,
    request_sent: bool,
}

impl AuthPubkey {
    pub fn new(
        username: String,
        pubkey_blob: Bytes,
        algo_name: &'static str,
        signer: Box<dyn Signer + Send>,
        cancel: CancellationToken,
    ) -> AuthPubkey {
        AuthPubkey {
            username, pubkey_blob, algo_name, signer, cancel,
            sign_fut: None,
            request_sent: false,
        }
    }

    fn encode_request(&self, payload: &mut PacketEncode) {
        payload.put_u8(msg::USERAUTH_REQUEST);
        payload.put_str(&self.username);
        payload.put_str("ssh-connection");
        payload.put_str("publickey");
        payload.put_bool(true);
        payload.put_str(self.algo_name);
        payload.put_bytes(&self.pubkey_blob);
    }
}

impl AuthMethod for AuthPubkey {
    fn name(&self) -> &'static str { "publickey" }

    fn is_interactive(&self) -> bool { false }

    fn recv_packet(&mut self, msg_id: u8, _payload: &mut PacketDecode) -> Result<()> {
        // we always send the signature right away, so SSH_MSG_USERAUTH_PK_OK never comes
        Err(Error::UnexpectedAuthMessage(msg_id))
    }

    fn poll_send_packet(&mut self, session_id: &[u8], cx: &mut Context)
        -> Poll<Result<Option<Bytes>>>
    {
        if self.request_sent {
            return Poll::Ready(Ok(None))
        }

        if self.sign_fut.is_none() {
            let mut signed = PacketEncode::new();
            signed.put_bytes(session_id);
            self.encode_request(&mut signed);
            log::debug!("asking the signer to sign the 'publickey' request");
            self.sign_fut = Some(self.signer.sign(signed.finish(), self.cancel.child_token()));
        }

        let signature = match self.sign_fut.as_mut() {
            Some(sign_fut) => ready!(sign_fut.as_mut().poll(cx))?,
            None => return Poll::Ready(Ok(None)),
        };
        self.sign_fut = None;
        if signature.is_empty() {
            return Poll::Ready(Err(Error::InvalidCredentials("signer returned an empty signature")))
        }

        let mut payload = PacketEncode::new();
        self.encode_request(&mut payload);
        payload.put_bytes(&signature);
        log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method 'publickey' with algorithm {:?}",
            self.algo_name);
        self.request_sent = true;
        Poll::Ready(Ok(Some(payload.finish())))
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt as _;
    use futures::task::noop_waker_ref;
    use std::sync::{Arc, Mutex};
    use super::*;

    struct RecordingSigner {
        signed: Arc<Mutex<Option<Bytes>>>,
    }

    impl Signer for RecordingSigner {
        fn sign(&self, data: Bytes, _: CancellationToken) -> BoxFuture<'static, Result<Bytes>> {
            *self.signed.lock().unwrap() = Some(data);
            async { Ok(Bytes::from_static(b"signature")) }.boxed()
        }
    }

    #[test]
    fn test_signed_data_and_request() {
        let mut cx = Context::from_waker(noop_waker_ref());
        let signed = Arc::new(Mutex::new(None));
        let signer = Box::new(RecordingSigner { signed: signed.clone() });
        let mut method = AuthPubkey::new("carol".into(), Bytes::from_static(b"blob"),
            "ecdsa-sha2-nistp256", signer, CancellationToken::new());

        let Poll::Ready(Ok(Some(payload))) = method.poll_send_packet(b"session", &mut cx) else {
            panic!("expected a request")
        };

        let signed = signed.lock().unwrap().clone().unwrap();
        let mut signed = PacketDecode::new(signed);
        assert_eq!(signed.get_bytes().unwrap().as_ref(), b"session");
        assert_eq!(signed.get_u8().unwrap(), msg::USERAUTH_REQUEST);
        assert_eq!(signed.get_string().unwrap(), "carol");
        assert_eq!(signed.get_string().unwrap(), "ssh-connection");
        assert_eq!(signed.get_string().unwrap(), "publickey");
        assert!(signed.get_bool().unwrap());
        assert_eq!(signed.get_string().unwrap(), "ecdsa-sha2-nistp256");
        assert_eq!(signed.get_bytes().unwrap().as_ref(), b"blob");
        assert_eq!(signed.remaining_len(), 0);

        let mut payload = PacketDecode::new(payload);
        assert_eq!(payload.get_u8().unwrap(), msg::USERAUTH_REQUEST);
        for _ in 0..3 { payload.get_string().unwrap(); }
        assert!(payload.get_bool().unwrap());
        payload.get_string().unwrap();
        assert_eq!(payload.get_bytes().unwrap().as_ref(), b"blob");
        assert_eq!(payload.get_bytes().unwrap().as_ref(), b"signature");

        assert!(matches!(method.poll_send_packet(b"session", &mut cx), Poll::Ready(Ok(None))));
    }

    #[test]
    fn test_pending_signer() {
        struct PendingSigner;
        impl Signer for PendingSigner {
            fn sign(&self, _: Bytes, _: CancellationToken) -> BoxFuture<'static, Result<Bytes>> {
                futures::future::pending().boxed()
            }
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut method = AuthPubkey::new("carol".into(), Bytes::from_static(b"blob"),
            "rsa-sha2-256", Box::new(PendingSigner), CancellationToken::new());
        assert!(method.poll_send_packet(b"session", &mut cx).is_pending());
        assert!(method.poll_send_packet(b"session", &mut cx).is_pending());
    }
}
