use regex::bytes::Regex;
use std::sync::OnceLock;
use crate::{Error, Result};

/// Checks the identification line received from the server (RFC 4253, section 4.2).
///
/// Only protocol versions "2.0" and "1.99" (a server that also speaks 2.0) are accepted.
pub(crate) fn check_ident(line: &[u8]) -> Result<()> {
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = IDENT_RE.get_or_init(|| {
        Regex::new(r"(?-u)^SSH-(\d\.\d+)-\S+").expect("identification regex is valid")
    });

    let Some(captures) = re.captures(line) else {
        return Err(Error::Version(String::from_utf8_lossy(line).into_owned()))
    };

    match &captures[1] {
        b"2.0" | b"1.99" => Ok(()),
        version => Err(Error::Version(String::from_utf8_lossy(version).into_owned())),
    }
}
