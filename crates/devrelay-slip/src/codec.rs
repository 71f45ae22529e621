use bytes::BytesMut;

/// Frame delimiter. Opens and closes every frame on the wire.
pub const END: u8 = 0xC0;

/// Escape introducer for payload bytes that collide with `END` or `ESC`.
pub const ESC: u8 = 0xDB;

/// Second byte of the escape sequence standing in for `END`.
pub const ESC_END: u8 = 0xDC;

/// Second byte of the escape sequence standing in for `ESC`.
pub const ESC_ESC: u8 = 0xDD;

/// Encode one payload into a delimited wire frame.
///
/// Wire format:
/// ```text
/// ┌──────┬──────────────────────────────┬──────┐
/// │ END  │ payload, with END → ESC ESC_END │ END  │
/// │ 0xC0 │          and ESC → ESC ESC_ESC  │ 0xC0 │
/// └──────┴──────────────────────────────┴──────┘
/// ```
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(END);
    for &b in payload {
        match b {
            END => {
                frame.push(ESC);
                frame.push(ESC_END);
            }
            ESC => {
                frame.push(ESC);
                frame.push(ESC_ESC);
            }
            other => frame.push(other),
        }
    }
    frame.push(END);
    frame
}

/// Decode one wire frame back into its payload.
///
/// The frame must start and end with `END` and contain only valid escape
/// pairs in between. Anything malformed (unterminated frame,
/// delimiter-only input with no payload, a raw delimiter inside the body,
/// a dangling or invalid escape) decodes to an empty vector; callers test
/// for emptiness before trusting the bytes.
pub fn decode(frame: &[u8]) -> Vec<u8> {
    if frame.len() < 3 || frame[0] != END || frame[frame.len() - 1] != END {
        return Vec::new();
    }
    let body = &frame[1..frame.len() - 1];
    let mut payload = Vec::with_capacity(body.len());
    let mut iter = body.iter();
    while let Some(&b) = iter.next() {
        match b {
            ESC => match iter.next() {
                Some(&ESC_END) => payload.push(END),
                Some(&ESC_ESC) => payload.push(ESC),
                _ => return Vec::new(),
            },
            END => return Vec::new(),
            other => payload.push(other),
        }
    }
    payload
}

/// Split a raw byte buffer into decoded frames.
///
/// Scans for delimiter-to-delimiter spans; a closing delimiter also opens
/// the next span, so back-to-back frames need no separator. Runs of
/// consecutive delimiters collapse into one boundary. Each span is
/// decoded independently: a malformed span yields an empty entry, which
/// callers skip before using the first byte as a sequence number.
///
/// Bytes before the first delimiter and after the last are not part of
/// any span and are ignored; feeding a buffer that may end mid-frame goes
/// through [`drain_frames`] instead.
pub fn split_into_packets(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    let mut open = None;
    for (i, &b) in stream.iter().enumerate() {
        if b != END {
            continue;
        }
        if let Some(s) = open {
            if i > s + 1 {
                packets.push(decode(&stream[s..=i]));
            }
        }
        open = Some(i);
    }
    packets
}

/// Split an accumulation buffer into decoded frames, consuming what was
/// used.
///
/// Complete spans are decoded as in [`split_into_packets`]. The buffer is
/// then advanced to its last delimiter, which stays in place to open the
/// next frame, so a frame split across two reads survives intact. A
/// buffer holding no delimiter at all is inter-frame noise and is
/// cleared.
pub fn drain_frames(buf: &mut BytesMut) -> Vec<Vec<u8>> {
    let Some(last_end) = buf.iter().rposition(|&b| b == END) else {
        buf.clear();
        return Vec::new();
    };
    let packets = split_into_packets(&buf[..=last_end]);
    let _ = buf.split_to(last_end);
    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wraps_with_delimiters() {
        let frame = encode(b"abc");
        assert_eq!(frame, vec![END, b'a', b'b', b'c', END]);
    }

    #[test]
    fn test_roundtrip_plain() {
        let payload = b"hello, relay!";
        assert_eq!(decode(&encode(payload)), payload);
    }

    #[test]
    fn test_roundtrip_delimiter_and_escape_bytes() {
        let payload = [0x00, END, 0x7F, ESC, ESC_END, ESC_ESC, 0xFF];
        let frame = encode(&payload);
        // Raw END must never appear inside the encoded body.
        assert!(!frame[1..frame.len() - 1].contains(&END));
        assert_eq!(decode(&frame), payload);
    }

    #[test]
    fn test_roundtrip_every_byte_value() {
        let payload: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&encode(&payload)), payload);
    }

    #[test]
    fn test_encode_escapes_grow_frame() {
        let frame = encode(&[END, ESC]);
        assert_eq!(frame, vec![END, ESC, ESC_END, ESC, ESC_ESC, END]);
    }

    #[test]
    fn test_decode_rejects_unterminated() {
        assert!(decode(&[END, b'a', b'b']).is_empty());
    }

    #[test]
    fn test_decode_rejects_missing_open() {
        assert!(decode(&[b'a', b'b', END]).is_empty());
    }

    #[test]
    fn test_decode_rejects_delimiter_only() {
        assert!(decode(&[END, END]).is_empty());
        assert!(decode(&[END]).is_empty());
        assert!(decode(&[]).is_empty());
    }

    #[test]
    fn test_decode_rejects_dangling_escape() {
        assert!(decode(&[END, b'a', ESC, END]).is_empty());
    }

    #[test]
    fn test_decode_rejects_invalid_escape() {
        assert!(decode(&[END, ESC, 0x42, END]).is_empty());
    }

    #[test]
    fn test_decode_rejects_embedded_delimiter() {
        assert!(decode(&[END, b'a', END, b'b', END]).is_empty());
    }

    #[test]
    fn test_split_concatenated_frames() {
        let mut stream = encode(b"first");
        stream.extend(encode(b"second"));
        stream.extend(encode(&[END, ESC]));

        let packets = split_into_packets(&stream);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0], b"first");
        assert_eq!(packets[1], b"second");
        assert_eq!(packets[2], [END, ESC]);
    }

    #[test]
    fn test_split_shared_delimiter_between_frames() {
        // One END both closes the first frame and opens the second.
        let stream = [END, b'a', END, b'b', END];
        let packets = split_into_packets(&stream);
        assert_eq!(packets, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_split_collapses_delimiter_runs() {
        let stream = [END, END, END, b'a', END, END];
        let packets = split_into_packets(&stream);
        assert_eq!(packets, vec![b"a".to_vec()]);
    }

    #[test]
    fn test_split_ignores_surrounding_noise() {
        let mut stream = vec![0x01, 0x02];
        stream.extend(encode(b"frame"));
        stream.extend([0x03, 0x04]);

        let packets = split_into_packets(&stream);
        assert_eq!(packets, vec![b"frame".to_vec()]);
    }

    #[test]
    fn test_split_keeps_malformed_span_as_empty_entry() {
        // Dangling escape inside an otherwise well-delimited span.
        let mut stream = encode(b"ok");
        stream.extend([ESC, END]);

        let packets = split_into_packets(&stream);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], b"ok");
        assert!(packets[1].is_empty());
    }

    #[test]
    fn test_split_no_delimiters() {
        assert!(split_into_packets(b"no frames here").is_empty());
    }

    #[test]
    fn test_drain_consumes_complete_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(b"one"));
        buf.extend_from_slice(&encode(b"two"));

        let packets = drain_frames(&mut buf);
        assert_eq!(packets, vec![b"one".to_vec(), b"two".to_vec()]);
        // Only the final delimiter stays behind as the next opener.
        assert_eq!(buf.as_ref(), [END]);
    }

    #[test]
    fn test_drain_retains_partial_tail() {
        let frame = encode(b"split");
        let (head, tail) = frame.split_at(3);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(head);
        assert!(drain_frames(&mut buf).is_empty());

        buf.extend_from_slice(tail);
        let packets = drain_frames(&mut buf);
        assert_eq!(packets, vec![b"split".to_vec()]);
    }

    #[test]
    fn test_drain_frame_arriving_byte_by_byte() {
        let frame = encode(&[0x07, END, 0x01]);
        let mut buf = BytesMut::new();
        let mut all = Vec::new();
        for &b in &frame {
            buf.extend_from_slice(&[b]);
            all.extend(drain_frames(&mut buf));
        }
        let complete: Vec<&Vec<u8>> = all.iter().filter(|p| !p.is_empty()).collect();
        assert_eq!(complete, vec![&vec![0x07, END, 0x01]]);
    }

    #[test]
    fn test_drain_clears_pure_noise() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"noise without any delimiter");
        assert!(drain_frames(&mut buf).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_empty_buffer() {
        let mut buf = BytesMut::new();
        assert!(drain_frames(&mut buf).is_empty());
    }
}
