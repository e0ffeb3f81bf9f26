use bytes::Bytes;
use futures_core::future::BoxFuture;
use futures_core::ready;
use std::collections::VecDeque;
use std::future::Future as _;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::AuthMethod;

/// Answers the prompts of the "keyboard-interactive" authentication method (RFC 4256).
///
/// [`prompt()`][Self::prompt] is called once for every prompt that the server sends, in order.
/// The returned future is polled by the task that drives the
/// [`ClientFuture`][crate::ClientFuture], so it should not block.
///
/// If the future fails, the authentication fails with the same error. The token is cancelled
/// when the connection is closed.
pub trait Prompter {
    /// Returns the response to a single prompt.
    fn prompt(&mut self, prompt: AuthPrompt, cancel: CancellationToken)
        -> BoxFuture<'static, Result<String>>;
}

/// One prompt from `SSH_MSG_USERAUTH_INFO_REQUEST` (RFC 4256, section 3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrompt {
    /// Name of the request (shared by all prompts in the same request).
    pub name: String,
    /// Instruction for the user (shared by all prompts in the same request).
    pub instruction: String,
    /// The prompt itself, such as `"Password: "`.
    pub prompt: String,
    /// True if the response may be displayed while the user types it.
    pub echo: bool,
}

pub(in super::super) struct AuthKeyboardInteractive {
    username: String,
    prompter: Box<dyn Prompter + Send>,
    cancel: CancellationToken,
    request_sent: bool,
    round: Option<InfoRound>,
}

struct InfoRound {
    name: String,
    instruction: String,
    prompts: VecDeque<(String, bool)>,
    responses: Vec<String>,
    prompt_fut: Option<BoxFuture<'static, Result<String>>>,
}

impl AuthKeyboardInteractive {
    pub fn new(
        username: String,
        prompter: Box<dyn Prompter + Send>,
        cancel: CancellationToken,
    ) -> AuthKeyboardInteractive {
        AuthKeyboardInteractive { username, prompter, cancel, request_sent: false, round: None }
    }
}

impl AuthMethod for AuthKeyboardInteractive {
    fn name(&self) -> &'static str { "keyboard-interactive" }

    fn is_interactive(&self) -> bool { true }

    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        if msg_id != msg::USERAUTH_INFO_REQUEST || !self.request_sent || self.round.is_some() {
            return Err(Error::UnexpectedAuthMessage(msg_id))
        }

        let name = payload.get_string()?;
        let instruction = payload.get_string()?;
        payload.get_string()?; // language tag
        let num_prompts = payload.get_u32()?;
        let mut prompts = VecDeque::new();
        for _ in 0..num_prompts {
            let prompt = payload.get_string()?;
            let echo = payload.get_bool()?;
            prompts.push_back((prompt, echo));
        }
        log::debug!("received SSH_MSG_USERAUTH_INFO_REQUEST with {} prompts", prompts.len());

        let responses = Vec::with_capacity(prompts.len());
        self.round = Some(InfoRound { name, instruction, prompts, responses, prompt_fut: None });
        Ok(())
    }

    fn poll_send_packet(&mut self, _session_id: &[u8], cx: &mut Context)
        -> Poll<Result<Option<Bytes>>>
    {
        if !self.request_sent {
            let mut payload = PacketEncode::new();
            payload.put_u8(msg::USERAUTH_REQUEST);
            payload.put_str(&self.username);
            payload.put_str("ssh-connection");
            payload.put_str("keyboard-interactive");
            payload.put_str(""); // language tag
            payload.put_str(""); // submethods
            log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method 'keyboard-interactive'");
            self.request_sent = true;
            return Poll::Ready(Ok(Some(payload.finish())))
        }

        let Some(round) = self.round.as_mut() else { return Poll::Ready(Ok(None)) };
        loop {
            if let Some(prompt_fut) = round.prompt_fut.as_mut() {
                let response = ready!(prompt_fut.as_mut().poll(cx))?;
                round.prompt_fut = None;
                round.responses.push(response);
            } else if let Some((prompt, echo)) = round.prompts.pop_front() {
                let prompt = AuthPrompt {
                    name: round.name.clone(),
                    instruction: round.instruction.clone(),
                    prompt,
                    echo,
                };
                round.prompt_fut = Some(self.prompter.prompt(prompt, self.cancel.child_token()));
            } else {
                break
            }
        }

        let mut payload = PacketEncode::new();
        payload.put_u8(msg::USERAUTH_INFO_RESPONSE);
        payload.put_u32(round.responses.len() as u32);
        for response in round.responses.iter() {
            payload.put_str(response);
        }
        log::debug!("sending SSH_MSG_USERAUTH_INFO_RESPONSE with {} responses", round.responses.len());
        self.round = None;
        Poll::Ready(Ok(Some(payload.finish())))
    }
}
