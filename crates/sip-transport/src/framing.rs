//! Message framing for stream transports.
//!
//! A stream carries SIP messages back to back, optionally separated by
//! RFC 5626 keep-alives (`CRLFCRLF` pings and `CRLF` pongs). A message ends
//! after its blank line plus Content-Length body bytes.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Largest message accepted on a stream
pub const MAX_MESSAGE_SIZE: usize = 65535;

/// One unit cut from a stream buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A run of bare CRLFs
    KeepAlive,
    /// A complete SIP message, headers and body
    Message(Bytes),
}

/// Cuts the next frame from `buf`, or returns `None` when more bytes are needed
pub fn next_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    let leading = buf
        .iter()
        .take_while(|b| **b == b'\r' || **b == b'\n')
        .count();
    if leading > 0 {
        buf.advance(leading);
        return Ok(Some(Frame::KeepAlive));
    }
    if buf.is_empty() {
        return Ok(None);
    }

    let head_end = match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => pos,
        None => {
            if buf.len() > MAX_MESSAGE_SIZE {
                return Err(Error::MessageTooLarge(buf.len()));
            }
            return Ok(None);
        }
    };

    let content_length = content_length(&buf[..head_end])?;
    if content_length > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge(content_length));
    }
    let total = head_end + 4 + content_length;
    if total > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge(total));
    }
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(Frame::Message(buf.split_to(total).freeze())))
}

/// Content-Length (or compact `l`) from a header block; 0 when absent
fn content_length(head: &[u8]) -> Result<usize> {
    let text = String::from_utf8_lossy(head);
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
                return value.trim().parse::<usize>().map_err(|_| {
                    Error::Parse(rcs_sip_core::Error::InvalidHeader(format!(
                        "Content-Length: '{}'",
                        value.trim()
                    )))
                });
            }
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_then_message() {
        let mut buf = BytesMut::from(
            &b"\r\n\r\nSIP/2.0 200 OK\r\nContent-Length: 2\r\n\r\nhiSIP/2.0 1"[..],
        );
        assert_eq!(next_frame(&mut buf).unwrap(), Some(Frame::KeepAlive));
        match next_frame(&mut buf).unwrap() {
            Some(Frame::Message(m)) => assert!(m.ends_with(b"\r\n\r\nhi")),
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(next_frame(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"SIP/2.0 1");
    }

    #[test]
    fn test_waits_for_full_body() {
        let mut buf = BytesMut::from(&b"SIP/2.0 200 OK\r\nl: 5\r\n\r\nabc"[..]);
        assert_eq!(next_frame(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"de");
        assert!(matches!(next_frame(&mut buf).unwrap(), Some(Frame::Message(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_content_length() {
        let mut buf = BytesMut::from(&b"SIP/2.0 200 OK\r\nContent-Length: x\r\n\r\n"[..]);
        assert!(next_frame(&mut buf).is_err());
    }

    #[test]
    fn test_huge_content_length() {
        let mut buf = BytesMut::from(
            &b"SIP/2.0 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nhi"[..],
        );
        assert!(matches!(
            next_frame(&mut buf),
            Err(Error::MessageTooLarge(len)) if len == usize::MAX
        ));

        let mut buf = BytesMut::from(&b"SIP/2.0 200 OK\r\nl: 65535\r\n\r\n"[..]);
        assert!(matches!(next_frame(&mut buf), Err(Error::MessageTooLarge(_))));
    }
}
