use bytes::{Bytes, BytesMut};
use crate::{Error, Result};
use crate::cipher::{self, Decrypt};
use crate::compress::{self, Decompress};
use crate::mac::{self, Mac, MacVerified};
use super::PACKET_LEN_MAX;

/// Inbound half of the connection: parses the identification line and decrypts packets.
pub(crate) struct RecvPipe {
    buf: BytesMut,
    state: State,
    decrypt: Box<dyn Decrypt + Send>,
    mac: Box<dyn Mac + Send>,
    decompress: Box<dyn Decompress + Send>,
    block_len: usize,
    tag_len: usize,
    packet_seq: u32,
    recvd_bytes: u64,
}

#[derive(Debug, Copy, Clone)]
enum State {
    Ready,
    ScanningLine { pos: usize },
    DecryptedLen { packet_len: usize },
}

#[derive(Debug)]
pub struct RecvPacket {
    pub payload: Bytes,
    pub packet_seq: u32,
}

impl RecvPipe {
    pub fn new() -> RecvPipe {
        RecvPipe {
            buf: BytesMut::new(),
            state: State::Ready,
            decrypt: Box::new(cipher::Identity),
            mac: Box::new(mac::Empty),
            decompress: Box::new(compress::Identity),
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            recvd_bytes: 0,
        }
    }

    pub fn feed_buf(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Returns the first line that starts with `SSH-`, skipping any lines before it.
    pub fn consume_ident(&mut self) -> Result<Option<Bytes>> {
        // RFC 4253, section 4.2
        loop {
            let line = match self.consume_line()? {
                Some(line) => line,
                None => {
                    if self.buf.len() > 8 * 1024 {
                        return Err(Error::Protocol("no identification line received"))
                    }
                    return Ok(None)
                },
            };

            if line.starts_with(&b"SSH-"[..]) {
                if line.len() > 255 {
                    return Err(Error::Protocol("received identification string is too long"))
                }
                return Ok(Some(line));
            }
            log::debug!("ignoring line before identification: {:?}", String::from_utf8_lossy(&line));
        }
    }

    fn consume_line(&mut self) -> Result<Option<Bytes>> {
        let mut pos = match self.state {
            State::Ready => 0,
            State::ScanningLine { pos } => pos,
            State::DecryptedLen { .. } =>
                return Err(Error::Protocol("identification line expected after a packet")),
        };

        let mut line_len = None;
        while pos < self.buf.len() {
            if self.buf[pos] == b'\r' {
                if pos + 1 >= self.buf.len() {
                    break
                } else if self.buf[pos + 1] == b'\n' {
                    line_len = Some(pos);
                    pos += 2;
                    break;
                }
            } else if self.buf[pos] == b'\n' {
                line_len = Some(pos);
                pos += 1;
                break;
            }
            pos += 1;
        }

        if let Some(line_len) = line_len {
            self.state = State::Ready;
            let mut line = self.buf.split_to(pos).freeze();
            line.truncate(line_len);
            Ok(Some(line))
        } else {
            self.state = State::ScanningLine { pos };
            Ok(None)
        }
    }

    /// Decrypts the next packet, returning `None` if more bytes are needed.
    pub fn consume_packet(&mut self) -> Result<Option<RecvPacket>> {
        let packet_len = match self.state {
            State::Ready => {
                if self.buf.len() < self.block_len {
                    return Ok(None)
                }

                // the first block carries the packet length, we decrypt it in place and
                // remember the length so that it is not decrypted twice
                self.decrypt.decrypt(&mut self.buf[..self.block_len]);
                let mut len_bytes = [0; 4];
                len_bytes.copy_from_slice(&self.buf[..4]);
                let packet_len = u32::from_be_bytes(len_bytes) as usize;

                if packet_len > PACKET_LEN_MAX {
                    return Err(Error::Framing("packet length exceeds the maximum"));
                } else if packet_len < 5 {
                    return Err(Error::Framing("packet length is too short"));
                } else if (4 + packet_len) % self.block_len != 0 {
                    return Err(Error::Framing("packet length is not aligned to cipher block"));
                }

                log::trace!("decrypted packet len {}", packet_len);
                self.state = State::DecryptedLen { packet_len };
                packet_len
            },
            State::DecryptedLen { packet_len } =>
                packet_len,
            State::ScanningLine { .. } =>
                return Err(Error::Protocol("packet expected after an incomplete line")),
        };

        let total_packet_len = 4 + packet_len + self.tag_len;
        if self.buf.len() < total_packet_len {
            log::trace!("received only {} bytes", self.buf.len());
            self.buf.reserve(total_packet_len - self.buf.len());
            return Ok(None)
        }

        let mut packet = self.buf.split_to(total_packet_len);
        let _verified: MacVerified = self.decrypt_packet_body(&mut packet, packet_len)?;

        let padding_len = packet[4] as usize;
        if padding_len < 4 {
            return Err(Error::Framing("padding is shorter than 4 bytes"));
        } else if packet_len < 1 + padding_len {
            return Err(Error::Framing("packet is too short for its padding"));
        }

        let payload_len = packet_len - padding_len - 1;
        let payload = packet.freeze().slice(5..(5 + payload_len));
        let payload = self.decompress.decompress(payload)?;
        let packet_seq = self.packet_seq;

        self.packet_seq = self.packet_seq.wrapping_add(1);
        self.recvd_bytes += total_packet_len as u64;
        self.state = State::Ready;
        Ok(Some(RecvPacket { payload, packet_seq }))
    }

    fn decrypt_packet_body(&mut self, packet: &mut [u8], packet_len: usize) -> Result<MacVerified> {
        self.decrypt.decrypt(&mut packet[self.block_len..(4 + packet_len)]);
        let (plaintext, tag) = packet.split_at(4 + packet_len);
        self.mac.verify(self.packet_seq, plaintext, tag)
    }

    /// Switches to new inbound keys. Called when the peer's NEWKEYS was received.
    pub fn set_decrypt(
        &mut self,
        decrypt: Box<dyn Decrypt + Send>,
        mac: Box<dyn Mac + Send>,
        block_len: usize,
        tag_len: usize,
    ) {
        self.decrypt = decrypt;
        self.mac = mac;
        self.block_len = block_len.max(8);
        self.tag_len = tag_len;
    }

    pub fn set_decompress(&mut self, decompress: Box<dyn Decompress + Send>) {
        self.decompress = decompress;
    }

    /// Sequence number of the next packet.
    pub fn packet_seq(&self) -> u32 {
        self.packet_seq
    }

    /// Number of packet bytes received since the pipe was created.
    pub fn recvd_bytes(&self) -> u64 {
        self.recvd_bytes
    }

    #[cfg(test)]
    pub fn set_packet_seq(&mut self, packet_seq: u32) {
        self.packet_seq = packet_seq;
    }
}
