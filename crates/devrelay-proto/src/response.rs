use bytes::{BufMut, Bytes, BytesMut};

/// One relay response: echoed sequence, status byte, success payload.
///
/// Status 0 means success; any other value is a command-specific
/// failure or sentinel and is carried as data, not as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Sequence number echoed from the request.
    pub seq: u8,
    /// 0 on success, command-specific otherwise.
    pub status: u8,
    /// Payload, present only on success.
    pub body: Bytes,
}

impl Response {
    pub fn new(seq: u8, status: u8, body: Bytes) -> Self {
        Self { seq, status, body }
    }

    /// A successful response carrying `body`.
    pub fn ok(seq: u8, body: impl Into<Bytes>) -> Self {
        Self::new(seq, 0, body.into())
    }

    /// A failed response; the status byte says why.
    pub fn failure(seq: u8, status: u8) -> Self {
        Self::new(seq, status, Bytes::new())
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Serialize to wire bytes: `[seq][status]`, then the body when the
    /// status is success.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.body.len());
        buf.put_u8(self.seq);
        buf.put_u8(self.status);
        if self.status == 0 {
            buf.put_slice(&self.body);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_layout() {
        let wire = Response::ok(7, vec![1, 2, 3]).serialize();
        assert_eq!(wire.as_ref(), &[7, 0, 1, 2, 3]);
    }

    #[test]
    fn test_failure_carries_no_body() {
        let wire = Response::failure(7, 0x2B).serialize();
        assert_eq!(wire.as_ref(), &[7, 0x2B]);

        // Even a hand-built failure with a body stays header-only on
        // the wire.
        let wire = Response::new(7, 1, Bytes::from_static(b"zz")).serialize();
        assert_eq!(wire.as_ref(), &[7, 1]);
    }

    #[test]
    fn test_is_success() {
        assert!(Response::ok(1, Bytes::new()).is_success());
        assert!(!Response::failure(1, 5).is_success());
    }
}
