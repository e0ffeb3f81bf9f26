use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::negotiate;
use super::auth_method::AuthMethod;
use super::client_event::{ClientEvent, AuthBanner};
use super::client_state::{self, ClientState};
use super::pump::Pump;
use super::recv::{self, ResultRecvState};

/// Stage of the user authentication (RFC 4252).
///
/// Only one authentication attempt is allowed per connection: an attempt can start only in
/// `Initial` and the connection stays in `Completed` or `Failed` when the attempt ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AuthStage {
    Initial,
    WaitingOnServiceAccept,
    WaitingOnCredentialSuccessOrInteractive,
    WaitingOnCredentialSuccess,
    Completed,
    Failed,
}

pub(super) struct AuthState {
    stage: AuthStage,
    service_request_sent: bool,
    method: Option<Box<dyn AuthMethod + Send>>,
    result_tx: Option<oneshot::Sender<Result<bool>>>,
}

pub(super) fn init_auth() -> AuthState {
    AuthState {
        stage: AuthStage::Initial,
        service_request_sent: false,
        method: None,
        result_tx: None,
    }
}

pub(super) fn start_method(
    st: &mut ClientState,
    method: Box<dyn AuthMethod + Send>,
    result_tx: oneshot::Sender<Result<bool>>,
) -> Result<()> {
    if st.auth_st.stage != AuthStage::Initial {
        return Err(Error::AuthAlreadyAttempted)
    }

    log::debug!("starting authentication with method {:?}", method.name());
    st.auth_st.stage = AuthStage::WaitingOnServiceAccept;
    st.auth_st.method = Some(method);
    st.auth_st.result_tx = Some(result_tx);
    client_state::wakeup_client(st);
    Ok(())
}

pub(super) fn pump_auth(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    if !negotiate::is_ready(st) || st.session_id.is_none() {
        return Ok(Pump::Pending)
    }

    match st.auth_st.stage {
        AuthStage::WaitingOnServiceAccept if !st.auth_st.service_request_sent => {
            send_service_request(st)?;
            st.auth_st.service_request_sent = true;
            Ok(Pump::Progress)
        },
        AuthStage::WaitingOnCredentialSuccessOrInteractive | AuthStage::WaitingOnCredentialSuccess => {
            let (Some(session_id), Some(method)) = (st.session_id.as_ref(), st.auth_st.method.as_mut())
                else { return Ok(Pump::Pending) };

            match method.poll_send_packet(session_id, cx) {
                Poll::Ready(Ok(Some(payload))) => {
                    st.codec.send_pipe.feed_packet(&payload)?;
                    Ok(Pump::Progress)
                },
                Poll::Ready(Ok(None)) | Poll::Pending => Ok(Pump::Pending),
                Poll::Ready(Err(err)) => {
                    // errors from the method (such as a failed signer or prompter) belong to the
                    // caller of the authentication, the connection itself is still fine
                    log::debug!("authentication method failed: {}", err);
                    finish_auth(st, AuthStage::Failed, Err(err));
                    Ok(Pump::Progress)
                },
            }
        },
        _ => Ok(Pump::Pending),
    }
}

fn finish_auth(st: &mut ClientState, stage: AuthStage, result: Result<bool>) {
    st.auth_st.stage = stage;
    st.auth_st.method = None;
    if let Some(result_tx) = st.auth_st.result_tx.take() {
        let _ = result_tx.send(result);
    }
}

fn send_service_request(st: &mut ClientState) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::SERVICE_REQUEST);
    payload.put_str("ssh-userauth");
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_SERVICE_REQUEST for 'ssh-userauth'");
    Ok(())
}

pub(super) fn recv_service_accept(st: &mut ClientState) -> ResultRecvState {
    let is_waiting = st.auth_st.stage == AuthStage::WaitingOnServiceAccept
        && st.auth_st.service_request_sent;
    let Some(method) = st.auth_st.method.as_ref().filter(|_| is_waiting) else {
        return Err(Error::UnexpectedAuthMessage(msg::SERVICE_ACCEPT))
    };

    log::debug!("received SSH_MSG_SERVICE_ACCEPT for 'ssh-userauth'");
    st.auth_st.stage = if method.is_interactive() {
        AuthStage::WaitingOnCredentialSuccessOrInteractive
    } else {
        AuthStage::WaitingOnCredentialSuccess
    };
    Ok(None)
}

pub(super) fn recv_auth_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::USERAUTH_FAILURE => recv_auth_failure(st, payload),
        msg::USERAUTH_SUCCESS => recv_auth_success(st),
        msg::USERAUTH_BANNER => recv_auth_banner(st, payload),
        _ => Err(Error::UnexpectedAuthMessage(msg_id)),
    }
}

pub(super) fn recv_auth_method_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    // method-specific messages share their numbers, so they are only meaningful while a method
    // that expects them is running
    match (st.auth_st.stage, st.auth_st.method.as_mut()) {
        (AuthStage::WaitingOnCredentialSuccessOrInteractive, Some(method)) => {
            method.recv_packet(msg_id, payload)?;
            Ok(None)
        },
        _ => Err(Error::UnexpectedAuthMessage(msg_id)),
    }
}

fn is_waiting_on_credential(st: &ClientState) -> bool {
    matches!(st.auth_st.stage,
        AuthStage::WaitingOnCredentialSuccessOrInteractive | AuthStage::WaitingOnCredentialSuccess)
}

fn recv_auth_failure(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    if !is_waiting_on_credential(st) {
        return Err(Error::UnexpectedAuthMessage(msg::USERAUTH_FAILURE))
    }

    let methods_can_continue = payload.get_name_list()?;
    let partial_success = payload.get_bool()?;
    log::debug!("received SSH_MSG_USERAUTH_FAILURE, methods that can continue {:?}, \
        partial success {}", methods_can_continue, partial_success);

    finish_auth(st, AuthStage::Failed, Ok(false));
    Ok(None)
}

fn recv_auth_success(st: &mut ClientState) -> ResultRecvState {
    if !is_waiting_on_credential(st) {
        return Err(Error::UnexpectedAuthMessage(msg::USERAUTH_SUCCESS))
    }

    log::debug!("received SSH_MSG_USERAUTH_SUCCESS");
    finish_auth(st, AuthStage::Completed, Ok(true));
    Ok(None)
}

fn recv_auth_banner(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    if st.auth_st.stage == AuthStage::Completed {
        return Err(Error::UnexpectedAuthMessage(msg::USERAUTH_BANNER))
    }

    let banner = AuthBanner {
        message: payload.get_string()?,
        message_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_USERAUTH_BANNER");
    recv::send_event(ClientEvent::AuthBanner(banner))
}

pub(super) fn is_authenticated(st: &ClientState) -> bool {
    st.auth_st.stage == AuthStage::Completed
}

#[cfg(test)]
pub(super) fn auth_stage(st: &ClientState) -> AuthStage {
    st.auth_st.stage
}
