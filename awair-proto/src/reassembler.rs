//! Fragment reassembly
//!
//! Notifications carry JSON with no length prefix or delimiter, and message
//! boundaries do not line up with notification boundaries. The reassembler
//! appends every fragment to a pending buffer and emits a message as soon as
//! the whole buffer parses as a JSON object or an array of objects.
//!
//! Note that a prefix which already parses is emitted immediately: if the
//! device ever split `{"a":1}{"b":2}` across fragments as `{"a":1}` and
//! `{"b":2}`, that yields two messages, but a single fragment containing
//! both documents is never valid JSON and stays pending.

use crate::message::DecodedMessage;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("pending buffer grew to {len} bytes, over the {limit} byte limit; discarded")]
    Overflow { limit: usize, len: usize },
}

/// Accumulates fragments until they form one complete message
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Vec<u8>,
    max_pending: Option<usize>,
}

impl Reassembler {
    /// `max_pending` of `None` leaves the buffer unbounded: a device that
    /// keeps sending bytes that never parse grows it without limit.
    pub fn new(max_pending: Option<usize>) -> Self {
        Self {
            pending: Vec::new(),
            max_pending,
        }
    }

    pub fn max_pending(&self) -> Option<usize> {
        self.max_pending
    }

    /// Bytes held back waiting for more fragments
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one fragment in arrival order.
    ///
    /// Returns the completed message, if any. The limit is only enforced on
    /// buffers that did not parse, so a complete message is never rejected.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<DecodedMessage>, ReassemblyError> {
        self.pending.extend_from_slice(fragment);

        if let Some(message) = DecodedMessage::parse(&self.pending) {
            self.pending.clear();
            return Ok(Some(message));
        }

        if let Some(limit) = self.max_pending
            && self.pending.len() > limit
        {
            let len = self.pending.len();
            self.pending.clear();
            return Err(ReassemblyError::Overflow { limit, len });
        }

        Ok(None)
    }

    /// Drop whatever is pending
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::JsonObject;
    use serde_json::json;

    fn object(value: serde_json::Value) -> DecodedMessage {
        match value {
            serde_json::Value::Object(o) => DecodedMessage::Object(o),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn two_chunk_state_message() {
        let mut r = Reassembler::default();
        assert_eq!(r.push(br#"{"state""#), Ok(None));
        assert_eq!(
            r.push(br#":"OK"}"#),
            Ok(Some(object(json!({"state": "OK"}))))
        );
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn every_split_point_yields_one_message_after_last_fragment() {
        let doc = br#"{"fw":"1.4.2","mac":"70:88:6b:00:00:01","ok":true,"n":[1,2,3]}"#;
        let expected = object(serde_json::from_slice(doc).unwrap());

        for a in 1..doc.len() {
            for b in a + 1..doc.len() {
                let mut r = Reassembler::default();
                let mut out = Vec::new();
                for part in [&doc[..a], &doc[a..b], &doc[b..]] {
                    if let Some(m) = r.push(part).unwrap() {
                        out.push(m);
                    }
                }
                assert_eq!(out, vec![expected.clone()], "split at {a}/{b}");
            }
        }
    }

    #[test]
    fn byte_at_a_time() {
        let doc = br#"[{"state":"scanning"},{"state":"joining"}]"#;
        let mut r = Reassembler::default();
        let mut out = Vec::new();
        for byte in doc.iter() {
            if let Some(m) = r.push(std::slice::from_ref(byte)).unwrap() {
                out.push(m);
            }
        }
        assert_eq!(out.len(), 1);
        match &out[0] {
            DecodedMessage::Array(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1]["state"], "joining");
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn buffer_resets_after_decode() {
        let mut r = Reassembler::default();
        assert!(r.push(br#"{"a":1}"#).unwrap().is_some());
        assert_eq!(r.push(br#"{"b":"#), Ok(None));
        assert_eq!(
            r.push(b"2}"),
            Ok(Some(object(json!({"b": 2}))))
        );
    }

    #[test]
    fn early_prefix_parse_is_emitted() {
        // A fragment boundary that happens to close a document emits it; the
        // bytes that follow start a new buffer.
        let mut r = Reassembler::default();
        assert_eq!(r.push(br#"{"a":1}"#), Ok(Some(object(json!({"a": 1})))));
        assert_eq!(r.push(br#"{"b":2}"#), Ok(Some(object(json!({"b": 2})))));
    }

    #[test]
    fn trailing_garbage_is_not_dropped() {
        let mut r = Reassembler::default();
        assert_eq!(r.push(br#"{"a":1}x"#), Ok(None));
        assert_eq!(r.pending_len(), 8);

        let mut r = Reassembler::default();
        assert_eq!(r.push(br#"x{"a":1}"#), Ok(None));
    }

    #[test]
    fn whitespace_around_document_is_accepted() {
        let mut r = Reassembler::default();
        assert_eq!(
            r.push(b"  {\"a\":1}\r\n"),
            Ok(Some(object(json!({"a": 1}))))
        );
    }

    #[test]
    fn non_message_json_is_retained() {
        let mut r = Reassembler::default();
        assert_eq!(r.push(b"42"), Ok(None));
        assert_eq!(r.pending_len(), 2);
    }

    #[test]
    fn stray_null_does_not_block_later_messages() {
        let mut r = Reassembler::default();
        assert_eq!(
            r.push(b"null"),
            Ok(Some(DecodedMessage::Object(JsonObject::new())))
        );
        assert_eq!(r.pending_len(), 0);

        let next = r.push(br#"{"state":"OK"}"#).unwrap().unwrap();
        assert_eq!(next.state(), Some("OK"));
    }

    #[test]
    fn unbounded_by_default() {
        let mut r = Reassembler::default();
        assert_eq!(r.max_pending(), None);
        let junk = vec![b'x'; 64 * 1024];
        for _ in 0..4 {
            assert_eq!(r.push(&junk), Ok(None));
        }
        assert_eq!(r.pending_len(), 4 * 64 * 1024);
    }

    #[test]
    fn cap_discards_oversized_buffer() {
        let mut r = Reassembler::new(Some(8));
        assert_eq!(r.push(br#"{"abc""#), Ok(None));
        assert_eq!(
            r.push(br#":"defgh"#),
            Err(ReassemblyError::Overflow { limit: 8, len: 14 })
        );
        assert_eq!(r.pending_len(), 0);

        // The next fragment starts fresh.
        assert_eq!(r.push(br#"{"a":1}"#), Ok(Some(object(json!({"a": 1})))));
    }

    #[test]
    fn cap_does_not_reject_complete_message() {
        let mut r = Reassembler::new(Some(4));
        assert_eq!(
            r.push(br#"{"state":"OK"}"#),
            Ok(Some(object(json!({"state": "OK"}))))
        );
    }
}
