use bytes::Bytes;
use std::task::{Context, Poll};
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::AuthMethod;

pub(in super::super) struct AuthPassword {
    username: String,
    password: String,
    request_sent: bool,
}

impl AuthPassword {
    pub fn new(username: String, password: String) -> AuthPassword {
        AuthPassword { username, password, request_sent: false }
    }
}

impl AuthMethod for AuthPassword {
    fn name(&self) -> &'static str { "password" }

    fn is_interactive(&self) -> bool { false }

    fn recv_packet(&mut self, msg_id: u8, _payload: &mut PacketDecode) -> Result<()> {
        // we never change the password, so SSH_MSG_USERAUTH_PASSWD_CHANGEREQ is unexpected too
        Err(Error::UnexpectedAuthMessage(msg_id))
    }

    fn poll_send_packet(&mut self, _session_id: &[u8], _cx: &mut Context)
        -> Poll<Result<Option<Bytes>>>
    {
        if self.request_sent {
            return Poll::Ready(Ok(None))
        }

        let mut payload = PacketEncode::new();
        payload.put_u8(msg::USERAUTH_REQUEST);
        payload.put_str(&self.username);
        payload.put_str("ssh-connection");
        payload.put_str("password");
        payload.put_bool(false);
        payload.put_str(&self.password);
        log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method 'password'");
        self.request_sent = true;
        Poll::Ready(Ok(Some(payload.finish())))
    }
}

#[cfg(test)]
mod tests {
    use futures::task::noop_waker_ref;
    use super::*;

    #[test]
    fn test_request_is_sent_once() {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut method = AuthPassword::new("alice".into(), "secret".into());

        let Poll::Ready(Ok(Some(payload))) = method.poll_send_packet(b"sid", &mut cx) else {
            panic!("expected a request")
        };
        let mut decode = PacketDecode::new(payload);
        assert_eq!(decode.get_u8().unwrap(), msg::USERAUTH_REQUEST);
        assert_eq!(decode.get_string().unwrap(), "alice");
        assert_eq!(decode.get_string().unwrap(), "ssh-connection");
        assert_eq!(decode.get_string().unwrap(), "password");
        assert!(!decode.get_bool().unwrap());
        assert_eq!(decode.get_string().unwrap(), "secret");
        assert_eq!(decode.remaining_len(), 0);

        assert!(matches!(method.poll_send_packet(b"sid", &mut cx), Poll::Ready(Ok(None))));
    }

    #[test]
    fn test_passwd_changereq_is_unexpected() {
        let mut method = AuthPassword::new("alice".into(), "secret".into());
        let mut payload = PacketDecode::new(Bytes::new());
        assert!(matches!(
            method.recv_packet(msg::USERAUTH_PASSWD_CHANGEREQ, &mut payload),
            Err(Error::UnexpectedAuthMessage(60)),
        ));
    }
}
