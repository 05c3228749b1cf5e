//! Wire parser tests: framing, compact headers and Content-Length handling

use proptest::prelude::*;
use rcs_sip_core::prelude::*;

const INVITE: &str = "INVITE sip:+33600000002@ims.example.com SIP/2.0\r\n\
v: SIP/2.0/UDP 10.0.0.1:5062;branch=z9hG4bKnashds8;rport\r\n\
Max-Forwards: 70\r\n\
f: <sip:+33600000001@ims.example.com>;tag=a73kszlfl\r\n\
t: <sip:+33600000002@ims.example.com>\r\n\
i: 1j9FpLxk3uxtm8tn@10.0.0.1\r\n\
CSeq: 1 INVITE\r\n\
m: <sip:10.0.0.1:5062;transport=udp>;+g.oma.sip-im\r\n\
Subject: folded\r\n subject\r\n\
c: application/sdp\r\n\
l: 4\r\n\
\r\n\
v=0\r\n";

/// Test compact header names and folded lines normalize on parse
#[test]
fn test_parse_invite_with_compact_headers() {
    let msg = Message::parse(INVITE.as_bytes()).unwrap();
    let req = msg.as_request().unwrap();
    assert_eq!(req.method, Method::Invite);
    assert_eq!(req.uri.user.as_deref(), Some("+33600000002"));
    assert_eq!(msg.call_id(), Some("1j9FpLxk3uxtm8tn@10.0.0.1"));
    assert_eq!(msg.from_tag().as_deref(), Some("a73kszlfl"));
    assert_eq!(msg.to_tag(), None);
    assert_eq!(msg.cseq(), Some(CSeq::new(1, Method::Invite)));
    assert_eq!(msg.subject(), Some("folded subject"));
    assert_eq!(msg.top_via().unwrap().branch(), Some("z9hG4bKnashds8"));
    // Content-Length cuts the trailing CRLF of the datagram
    assert_eq!(msg.content().as_deref(), Some("v=0\r"));
    println!("✅ Compact INVITE parsed");
}

/// Test that serialization recomputes Content-Length
#[test]
fn test_serialize_recomputes_content_length() {
    let msg = Message::parse(INVITE.as_bytes()).unwrap();
    let mut req = msg.as_request().unwrap().clone();
    req.body = bytes::Bytes::from_static(b"v=0\r\no=- 0 0 IN IP4 10.0.0.1\r\n");
    let text = String::from_utf8(req.to_bytes()).unwrap();
    assert!(text.contains("Content-Length: 31\r\n\r\nv=0"));
    assert_eq!(text.matches("Content-Length").count(), 1);

    let reparsed = Message::parse(text.as_bytes()).unwrap();
    assert_eq!(reparsed.body().len(), 31);
}

/// Test response status line parsing and the default reason phrase
#[test]
fn test_parse_response() {
    let raw = b"SIP/2.0 180 Ringing\r\nCall-ID: abc@host\r\nCSeq: 1 INVITE\r\n\r\n";
    let msg = Message::parse(raw).unwrap();
    let resp = msg.as_response().unwrap();
    assert_eq!(resp.status, StatusCode::RINGING);
    assert_eq!(resp.reason_phrase(), "Ringing");

    let raw = b"SIP/2.0 200\r\nCall-ID: abc@host\r\n\r\n";
    let resp = Message::parse(raw).unwrap();
    assert_eq!(resp.as_response().unwrap().reason_phrase(), "OK");
}

/// Test leading keep-alive CRLFs are ignored
#[test]
fn test_leading_crlf_skipped() {
    let raw = b"\r\n\r\nSIP/2.0 200 OK\r\nCall-ID: x@y\r\n\r\n";
    assert!(Message::parse(raw).unwrap().is_response());
}

/// Test malformed input is rejected rather than half-parsed
#[test]
fn test_malformed_messages() {
    assert!(Message::parse(b"").is_err());
    assert!(Message::parse(b"\r\n\r\n").is_err());
    assert!(Message::parse(b"INVITE sip:a@b SIP/2.0\r\nCall-ID x\r\n\r\n").is_err());
    assert!(Message::parse(b"INVITE sip:a@b SIP/3.0\r\n\r\n").is_err());
    assert!(Message::parse(b"SIP/2.0 999 Nope\r\n\r\n").is_err());
    assert!(Message::parse(b"SIP/2.0 200 OK\r\nContent-Length: 10\r\n\r\nshort").is_err());
}

proptest! {
    /// Test the parser never panics on arbitrary bytes
    #[test]
    fn prop_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = Message::parse(&data);
    }

    /// Test any token Call-ID survives serialization
    #[test]
    fn prop_call_id_preserved(id in "[a-zA-Z0-9]{1,32}@[a-z0-9.]{1,20}") {
        let req = Request::new(Method::Options, Uri::sip("example.com"))
            .with_header(Header::new(HeaderName::CallId, id.clone()).unwrap());
        let parsed = Message::parse(&req.to_bytes()).unwrap();
        prop_assert_eq!(parsed.call_id(), Some(id.as_str()));
    }
}
