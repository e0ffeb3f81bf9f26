use bytes::{Buf as _, Bytes};
use num_bigint_dig::BigUint;
use std::str;
use crate::{Error, Result};

/// Decoder of SSH messages (low level API).
///
/// Reads the data types of RFC 4251, section 5 from a [`Bytes`] buffer. Every read past the end
/// of the buffer fails with [`Error::Decode`] and leaves the decoder unusable for the rest of the
/// message.
#[derive(Debug)]
pub struct PacketDecode {
    orig_buf: Bytes,
    buf: Bytes,
}

impl PacketDecode {
    /// Wraps the bytes into [`PacketDecode`].
    pub fn new(buf: Bytes) -> PacketDecode {
        PacketDecode { orig_buf: buf.clone(), buf }
    }

    /// Decode a `byte`.
    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Decode a `boolean`.
    pub fn get_bool(&mut self) -> Result<bool> {
        self.get_u8().map(|x| x != 0)
    }

    /// Decode a `uint32`.
    pub fn get_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Decode a `string` of arbitrary bytes.
    pub fn get_bytes(&mut self) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Decode a `string` in UTF-8.
    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        match str::from_utf8(&bytes) {
            Ok(string) => Ok(string.into()),
            Err(_) => Err(Error::Decode("string is not valid utf-8")),
        }
    }

    /// Decode a `name-list`. An empty string is an empty list.
    pub fn get_name_list(&mut self) -> Result<Vec<String>> {
        let list = self.get_string()?;
        if list.is_empty() {
            return Ok(Vec::new())
        }
        Ok(list.split(',').map(String::from).collect())
    }

    /// Decode a non-negative `mpint`.
    pub fn get_biguint(&mut self) -> Result<BigUint> {
        let bytes = self.get_bytes()?;
        if matches!(bytes.first(), Some(&b) if b & 0x80 != 0) {
            return Err(Error::Decode("mpint is negative"))
        }
        Ok(BigUint::from_bytes_be(&bytes))
    }

    /// Decode a non-negative `mpint` as a big endian scalar of exactly `len` bytes.
    pub fn get_scalar(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = self.get_bytes()?;
        while bytes.first() == Some(&0) {
            bytes.advance(1);
        }

        if bytes.len() > len {
            return Err(Error::Decode("mpint is too long"));
        }

        let mut digits_be = vec![0; len];
        digits_be[len - bytes.len()..].copy_from_slice(&bytes);
        Ok(digits_be)
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }

    /// Read `len` bytes directly from the buffer.
    pub fn get_raw(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    fn ensure(&self, min_remaining: usize) -> Result<()> {
        if min_remaining <= self.buf.remaining() {
            Ok(())
        } else {
            Err(Error::Decode("unexpected end of message"))
        }
    }

    /// All bytes given to [`PacketDecode::new()`], including those already decoded.
    pub fn as_original_bytes(&self) -> &[u8] {
        &self.orig_buf
    }

    /// The bytes that were not decoded yet.
    pub fn remaining(&self) -> Bytes {
        self.buf.clone()
    }

    /// Number of bytes that were not decoded yet.
    pub fn remaining_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::PacketEncode;
    use super::*;

    fn decode<D: AsRef<[u8]> + ?Sized>(data: &D) -> PacketDecode {
        PacketDecode::new(Bytes::copy_from_slice(data.as_ref()))
    }

    #[test]
    fn test_get_u32() {
        let mut d = decode(&[0,0,1,0, 0xff,0xff,0xff,0xff]);
        assert_eq!(d.get_u32().unwrap(), 256);
        assert_eq!(d.get_u32().unwrap(), u32::MAX);
        assert_eq!(d.remaining_len(), 0);

        assert!(decode(&[0, 1, 2]).get_u32().is_err());
    }

    #[test]
    fn test_get_bytes() {
        let mut d = decode(&[0,0,0,0, 0,0,0,2, 7,8]);
        assert!(d.get_bytes().unwrap().is_empty());
        assert_eq!(d.get_bytes().unwrap().as_ref(), &[7, 8]);

        assert!(decode(&[0,0,0,5, 1,2,3]).get_bytes().is_err());
        assert!(decode(&[0,0,0]).get_bytes().is_err());
    }

    #[test]
    fn test_get_string_invalid_utf8() {
        assert!(decode(&[0,0,0,2, 0xc3,0x28]).get_string().is_err());
    }

    #[test]
    fn test_get_name_list() {
        assert_eq!(decode(b"\0\0\0\0").get_name_list().unwrap(), Vec::<String>::new());
        assert_eq!(decode(b"\0\0\0\x04none").get_name_list().unwrap(), vec!["none"]);
        assert_eq!(
            decode(b"\0\0\0\x12hmac-sha1,hmac-md5").get_name_list().unwrap(),
            vec!["hmac-sha1", "hmac-md5"],
        );
        assert_eq!(decode(b"\0\0\0\x05none,").get_name_list().unwrap(), vec!["none", ""]);
    }

    #[test]
    fn test_get_biguint() {
        assert_eq!(decode(&[0,0,0,0]).get_biguint().unwrap(), BigUint::from(0u32));
        assert_eq!(decode(&[0,0,0,2, 0x00,0x80]).get_biguint().unwrap(), BigUint::from(128u32));
        assert!(decode(&[0,0,0,1, 0x80]).get_biguint().is_err());
        // length runs past the end
        assert!(decode(&[0,0,0,9, 0x01,0x02]).get_biguint().is_err());
    }

    #[test]
    fn test_biguint_round_trip() {
        let values = [
            BigUint::from(0u32),
            BigUint::from(1u32),
            BigUint::from(0x7fu32),
            BigUint::from(0x80u32),
            BigUint::from(0xffffu32),
            BigUint::from(1u32) << 255,
            (BigUint::from(1u32) << 255) - 1u32,
            BigUint::from(1u32) << 1024,
        ];

        for value in values.iter() {
            let mut e = PacketEncode::new();
            e.put_biguint(value);
            let bytes = e.finish();
            let magnitude = value.to_bytes_be();
            let magnitude_len = if *value == BigUint::from(0u32) { 0 } else { magnitude.len() };
            let expected_len = magnitude_len + (magnitude_len > 0 && magnitude[0] & 0x80 != 0) as usize;
            assert_eq!(bytes.len(), 4 + expected_len, "length of {}", value);

            let mut d = PacketDecode::new(bytes);
            assert_eq!(&d.get_biguint().unwrap(), value);
            assert_eq!(d.remaining_len(), 0);
        }
    }

    #[test]
    fn test_get_scalar() {
        assert_eq!(decode(&[0,0,0,2, 0x00,0x85]).get_scalar(3).unwrap(), vec![0, 0, 0x85]);
        assert!(decode(&[0,0,0,3, 1,2,3]).get_scalar(2).is_err());
    }
}
