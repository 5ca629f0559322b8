//! Response body framing: monolithic and multipart/byteranges decoding
//!
//! A response is classified once from its headers, then every delivered
//! body chunk runs through the matching decoder. Monolithic bodies are a
//! single contiguous slice of the file; multipart bodies interleave
//! boundary lines, part headers, and counted part bodies, and must be
//! scanned incrementally because parts span delivered chunks freely.

use bytes::Bytes;

use super::{PieceSink, TransportError};
use crate::network::HttpReply;

/// Parsed `Content-Range: bytes start-end/total` header.
///
/// `start` and `end` are inclusive, as on the wire; `total` is `None`
/// when the server reports `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

/// Parses a `Content-Range` header value.
///
/// # Errors
/// - `TransportError::InvalidContentRange` - If the value does not match
///   `bytes start-end/total`
pub(crate) fn parse_content_range(value: &str) -> Result<ContentRange, TransportError> {
    let invalid = || TransportError::InvalidContentRange {
        value: value.to_string(),
    };
    let rest = value
        .trim()
        .strip_prefix("bytes")
        .ok_or_else(invalid)?
        .trim_start();
    let (span, total) = rest.split_once('/').ok_or_else(invalid)?;
    let total = match total.trim() {
        "*" => None,
        digits => Some(digits.parse::<u64>().map_err(|_| invalid())?),
    };
    let (start, end) = span.trim().split_once('-').ok_or_else(invalid)?;
    let start = start.parse::<u64>().map_err(|_| invalid())?;
    let end = end.parse::<u64>().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }
    Ok(ContentRange { start, end, total })
}

/// Body decoder selected from the response headers.
pub(crate) enum FramingDecoder {
    Monolithic(MonolithicDecoder),
    Multipart(MultipartDecoder),
}

impl FramingDecoder {
    /// Feeds one delivered chunk through the decoder.
    ///
    /// Returns `Ok(false)` once the sink reports cancellation.
    pub fn push(&mut self, chunk: Bytes, sink: &PieceSink) -> Result<bool, TransportError> {
        match self {
            FramingDecoder::Monolithic(decoder) => decoder.push(chunk, sink),
            FramingDecoder::Multipart(decoder) => decoder.push(chunk, sink),
        }
    }

    /// Validates that the body ended at a part boundary.
    pub fn finish(self) -> Result<(), TransportError> {
        match self {
            FramingDecoder::Monolithic(_) => Ok(()),
            FramingDecoder::Multipart(decoder) => decoder.finish(),
        }
    }
}

/// Classifies a response into its framing mode.
///
/// Single `Content-Range` means a monolithic body starting at the
/// declared offset; a `multipart/...` content type with a boundary means
/// multipart mode; neither means the server sent the whole file from
/// offset 0. Returns the total file size when the headers reveal it.
///
/// # Errors
/// - `TransportError::UnexpectedStatus` - Non-2xx response
/// - `TransportError::InvalidContentRange` - Unparseable `Content-Range`
/// - `TransportError::MultipartFraming` - Multipart type without boundary
pub(crate) fn classify(reply: &HttpReply) -> Result<(FramingDecoder, Option<u64>), TransportError> {
    if !reply.is_success() {
        return Err(TransportError::UnexpectedStatus {
            status: reply.status,
        });
    }
    if let Some(content_type) = &reply.content_type {
        if content_type
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("multipart/")
        {
            let boundary = boundary_param(content_type)?;
            return Ok((
                FramingDecoder::Multipart(MultipartDecoder::new(&boundary)),
                None,
            ));
        }
    }
    if let Some(value) = &reply.content_range {
        let range = parse_content_range(value)?;
        return Ok((
            FramingDecoder::Monolithic(MonolithicDecoder::new(range.start)),
            range.total,
        ));
    }
    Ok((FramingDecoder::Monolithic(MonolithicDecoder::new(0)), None))
}

fn boundary_param(content_type: &str) -> Result<String, TransportError> {
    for param in content_type.split(';').skip(1) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Ok(value.to_string());
            }
        }
    }
    Err(TransportError::MultipartFraming {
        reason: format!("no boundary parameter in Content-Type: {content_type}"),
    })
}

/// Decoder for a single contiguous byte range.
///
/// Every delivered chunk is a piece at the running offset.
pub(crate) struct MonolithicDecoder {
    next_offset: u64,
}

impl MonolithicDecoder {
    pub fn new(start_offset: u64) -> Self {
        Self {
            next_offset: start_offset,
        }
    }

    fn push(&mut self, chunk: Bytes, sink: &PieceSink) -> Result<bool, TransportError> {
        if chunk.is_empty() {
            return Ok(true);
        }
        let offset = self.next_offset;
        self.next_offset += chunk.len() as u64;
        Ok(sink.deliver(offset, chunk))
    }
}

#[derive(Debug, Clone)]
enum PartState {
    /// Scanning for the next boundary line.
    Boundary,
    /// Reading part header lines up to the blank separator.
    Headers { content_range: Option<ContentRange> },
    /// Consuming the counted part body.
    Body { offset: u64, remaining: u64 },
    /// Terminal boundary seen; everything further is ignored.
    Finished,
}

/// Incremental decoder for `multipart/byteranges` bodies.
pub(crate) struct MultipartDecoder {
    delimiter: String,
    buf: Vec<u8>,
    state: PartState,
}

impl MultipartDecoder {
    pub fn new(boundary: &str) -> Self {
        Self {
            delimiter: format!("--{boundary}"),
            buf: Vec::new(),
            state: PartState::Boundary,
        }
    }

    fn push(&mut self, chunk: Bytes, sink: &PieceSink) -> Result<bool, TransportError> {
        self.buf.extend_from_slice(&chunk);
        loop {
            match self.state.clone() {
                PartState::Boundary => {
                    let Some(line) = self.take_line()? else {
                        return Ok(true);
                    };
                    if line.is_empty() {
                        continue;
                    }
                    if line == format!("{}--", self.delimiter) {
                        self.state = PartState::Finished;
                    } else if line == self.delimiter {
                        self.state = PartState::Headers {
                            content_range: None,
                        };
                    } else {
                        return Err(TransportError::MultipartFraming {
                            reason: format!("expected boundary line, got {line:?}"),
                        });
                    }
                }
                PartState::Headers { content_range } => {
                    let Some(line) = self.take_line()? else {
                        return Ok(true);
                    };
                    if line.is_empty() {
                        let range = content_range.ok_or(TransportError::MissingContentRange)?;
                        if let Some(total) = range.total {
                            sink.report_total(total);
                        }
                        self.state = PartState::Body {
                            offset: range.start,
                            remaining: range.end - range.start + 1,
                        };
                        continue;
                    }
                    let Some((name, value)) = line.split_once(':') else {
                        return Err(TransportError::MultipartFraming {
                            reason: format!("malformed header line: {line:?}"),
                        });
                    };
                    if name.trim().eq_ignore_ascii_case("content-range") {
                        self.state = PartState::Headers {
                            content_range: Some(parse_content_range(value.trim())?),
                        };
                    }
                }
                PartState::Body { offset, remaining } => {
                    if self.buf.is_empty() {
                        return Ok(true);
                    }
                    let take = remaining.min(self.buf.len() as u64) as usize;
                    let piece: Bytes = self.buf.drain(..take).collect::<Vec<u8>>().into();
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        PartState::Boundary
                    } else {
                        PartState::Body {
                            offset: offset + take as u64,
                            remaining: left,
                        }
                    };
                    if !sink.deliver(offset, piece) {
                        return Ok(false);
                    }
                }
                PartState::Finished => {
                    self.buf.clear();
                    return Ok(true);
                }
            }
        }
    }

    fn finish(self) -> Result<(), TransportError> {
        match self.state {
            PartState::Finished => Ok(()),
            // The terminal boundary line is optional here: with ranged
            // usage the body simply ends after the last part.
            PartState::Boundary => {
                let leftover = String::from_utf8_lossy(&self.buf);
                let leftover = leftover.trim();
                if leftover.is_empty()
                    || leftover == self.delimiter
                    || leftover == format!("{}--", self.delimiter)
                {
                    Ok(())
                } else {
                    Err(TransportError::MultipartFraming {
                        reason: format!("trailing bytes after final part: {leftover:?}"),
                    })
                }
            }
            PartState::Headers { .. } | PartState::Body { .. } => {
                Err(TransportError::MultipartFraming {
                    reason: "truncated multipart response".to_string(),
                })
            }
        }
    }

    /// Takes the next `\n`-terminated line off the buffer, stripping the
    /// terminator and an optional `\r`.
    ///
    /// # Errors
    /// - `TransportError::MultipartFraming` - Disallowed control byte in
    ///   the line
    fn take_line(&mut self) -> Result<Option<String>, TransportError> {
        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if let Some(&byte) = line.iter().find(|&&b| b < 0x20 && b != b'\t') {
            return Err(TransportError::MultipartFraming {
                reason: format!("control byte 0x{byte:02x} in header line"),
            });
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ReplyBody;

    fn reply(
        status: u16,
        content_type: Option<&str>,
        content_range: Option<&str>,
    ) -> HttpReply {
        HttpReply {
            status,
            content_type: content_type.map(str::to_owned),
            content_range: content_range.map(str::to_owned),
            body: ReplyBody::Complete(Bytes::new()),
        }
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 0-9/1000").unwrap(),
            ContentRange {
                start: 0,
                end: 9,
                total: Some(1000)
            }
        );
        assert_eq!(
            parse_content_range("bytes 500-509/*").unwrap(),
            ContentRange {
                start: 500,
                end: 509,
                total: None
            }
        );
    }

    #[test]
    fn test_parse_content_range_rejects_garbage() {
        for value in ["", "0-9/1000", "bytes 9-0/1000", "bytes x-y/z", "bytes 0-9"] {
            assert!(
                matches!(
                    parse_content_range(value),
                    Err(TransportError::InvalidContentRange { .. })
                ),
                "accepted {value:?}"
            );
        }
    }

    #[test]
    fn test_classify_rejects_non_2xx() {
        let result = classify(&reply(404, None, None));
        assert!(matches!(
            result,
            Err(TransportError::UnexpectedStatus { status: 404 })
        ));
    }

    #[test]
    fn test_classify_single_range_as_monolithic() {
        let (decoder, total) = classify(&reply(
            206,
            Some("application/octet-stream"),
            Some("bytes 100-199/1000"),
        ))
        .unwrap();
        assert!(matches!(decoder, FramingDecoder::Monolithic(_)));
        assert_eq!(total, Some(1000));
    }

    #[test]
    fn test_classify_whole_file_as_monolithic_from_zero() {
        let (mut decoder, total) = classify(&reply(200, Some("video/mp4"), None)).unwrap();
        assert_eq!(total, None);

        let (sink, pieces) = PieceSink::collector();
        decoder.push(Bytes::from_static(b"abc"), &sink).unwrap();
        assert_eq!(pieces.lock()[0].0, 0);
    }

    #[test]
    fn test_classify_multipart() {
        let (decoder, _) = classify(&reply(
            206,
            Some("multipart/byteranges; boundary=abc123"),
            None,
        ))
        .unwrap();
        assert!(matches!(decoder, FramingDecoder::Multipart(_)));
    }

    #[test]
    fn test_classify_multipart_without_boundary_fails() {
        let result = classify(&reply(206, Some("multipart/byteranges"), None));
        assert!(matches!(
            result,
            Err(TransportError::MultipartFraming { .. })
        ));
    }

    #[test]
    fn test_monolithic_advances_offset_per_chunk() {
        let mut decoder = MonolithicDecoder::new(100);
        let (sink, pieces) = PieceSink::collector();

        decoder.push(Bytes::from_static(b"0123"), &sink).unwrap();
        decoder.push(Bytes::from_static(b"45"), &sink).unwrap();
        decoder.push(Bytes::new(), &sink).unwrap();
        decoder.push(Bytes::from_static(b"6789"), &sink).unwrap();

        let pieces = pieces.lock();
        assert_eq!(pieces.len(), 3);
        assert_eq!((pieces[0].0, pieces[0].1.as_ref()), (100, b"0123".as_ref()));
        assert_eq!((pieces[1].0, pieces[1].1.as_ref()), (104, b"45".as_ref()));
        assert_eq!((pieces[2].0, pieces[2].1.as_ref()), (106, b"6789".as_ref()));
    }

    fn two_part_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUND\r\n");
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        body.extend_from_slice(b"Content-Range: bytes 0-9/1000\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"0123456789");
        body.extend_from_slice(b"\r\n--BOUND\r\n");
        body.extend_from_slice(b"Content-Range: bytes 500-509/1000\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"abcdefghij");
        body.extend_from_slice(b"\r\n--BOUND--\r\n");
        body
    }

    #[test]
    fn test_multipart_two_parts_one_chunk() {
        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, pieces) = PieceSink::collector();

        assert!(decoder.push(two_part_body().into(), &sink).unwrap());
        decoder.finish().unwrap();

        let pieces = pieces.lock();
        assert_eq!(pieces.len(), 2);
        assert_eq!((pieces[0].0, pieces[0].1.as_ref()), (0, b"0123456789".as_ref()));
        assert_eq!(
            (pieces[1].0, pieces[1].1.as_ref()),
            (500, b"abcdefghij".as_ref())
        );
    }

    #[test]
    fn test_multipart_survives_arbitrary_chunk_splits() {
        // Feed the same body one byte at a time; the decoded coverage
        // must be identical even though every line and part body is torn
        // across chunk boundaries.
        let body = two_part_body();
        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, pieces) = PieceSink::collector();

        for byte in body {
            assert!(decoder.push(Bytes::copy_from_slice(&[byte]), &sink).unwrap());
        }
        decoder.finish().unwrap();

        let pieces = pieces.lock();
        let mut first_part = Vec::new();
        let mut second_part = Vec::new();
        for (offset, bytes) in pieces.iter() {
            if *offset < 500 {
                first_part.extend_from_slice(bytes);
            } else {
                second_part.extend_from_slice(bytes);
            }
        }
        assert_eq!(first_part, b"0123456789");
        assert_eq!(second_part, b"abcdefghij");
    }

    #[test]
    fn test_multipart_without_terminal_boundary() {
        // In ranged usage the body often just ends after the last part.
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUND\r\n");
        body.extend_from_slice(b"Content-Range: bytes 5-8/100\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"wxyz");

        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, pieces) = PieceSink::collector();
        decoder.push(body.into(), &sink).unwrap();
        decoder.finish().unwrap();

        assert_eq!(pieces.lock().as_slice(), &[(5, Bytes::from_static(b"wxyz"))]);
    }

    #[test]
    fn test_multipart_missing_content_range_fails() {
        let body = b"--BOUND\r\nContent-Type: text/plain\r\n\r\n".to_vec();
        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, _) = PieceSink::collector();
        let result = decoder.push(body.into(), &sink);
        assert!(matches!(result, Err(TransportError::MissingContentRange)));
    }

    #[test]
    fn test_multipart_rejects_unexpected_boundary_line() {
        let body = b"garbage\r\n".to_vec();
        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, _) = PieceSink::collector();
        let result = decoder.push(body.into(), &sink);
        assert!(matches!(
            result,
            Err(TransportError::MultipartFraming { .. })
        ));
    }

    #[test]
    fn test_multipart_rejects_control_byte_in_header() {
        let body = b"--BOUND\r\nContent-Range: bytes 0-1/2\x01\r\n".to_vec();
        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, _) = PieceSink::collector();
        let result = decoder.push(body.into(), &sink);
        assert!(matches!(
            result,
            Err(TransportError::MultipartFraming { .. })
        ));
    }

    #[test]
    fn test_multipart_truncated_part_fails_on_finish() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUND\r\n");
        body.extend_from_slice(b"Content-Range: bytes 0-9/100\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(b"0123"); // 4 of 10 declared bytes

        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, _) = PieceSink::collector();
        decoder.push(body.into(), &sink).unwrap();
        assert!(matches!(
            decoder.finish(),
            Err(TransportError::MultipartFraming { .. })
        ));
    }

    #[test]
    fn test_multipart_ignores_trailing_bytes_after_terminal() {
        let mut body = two_part_body();
        body.extend_from_slice(b"epilogue to be ignored");

        let mut decoder = MultipartDecoder::new("BOUND");
        let (sink, pieces) = PieceSink::collector();
        decoder.push(body.into(), &sink).unwrap();
        decoder.finish().unwrap();
        assert_eq!(pieces.lock().len(), 2);
    }
}
