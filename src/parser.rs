//! Incremental byte-stream → frame-queue framer.
//!
//! The grammar (command line, header lines, content-length-or-NUL body) is
//! built from `nom`'s function combinators over the *streaming* parsers, so
//! a frame that hasn't fully arrived yet surfaces as `nom::Err::Incomplete`
//! instead of a hand-rolled "not enough bytes" check.

use std::collections::{BTreeMap, VecDeque};

use bytes::{Buf, BytesMut};
use nom::branch::alt;
use nom::bytes::streaming::{is_not, tag, take, take_till, take_until};
use nom::character::streaming::space0;
use nom::multi::many0;
use nom::sequence::terminated;
use nom::IResult;
use tracing::trace;

use crate::error::StompError;
use crate::frame::Frame;

fn eol(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag("\r\n"), tag("\n")))(input)
}

fn header_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, _) = space0(input)?;
    let (input, name) = is_not(":\r\n")(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = take_till(|c| c == b'\r' || c == b'\n')(input)?;
    let (input, _) = eol(input)?;
    Ok((input, (name, value)))
}

fn command_and_headers(input: &[u8]) -> IResult<&[u8], (&[u8], Vec<(&[u8], &[u8])>)> {
    let (input, _) = space0(input)?;
    let (input, command) = terminated(is_not("\r\n"), eol)(input)?;
    let (input, headers) = many0(header_line)(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = eol(input)?;
    Ok((input, (command, headers)))
}

/// Parses a single complete frame from the front of `input`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame and
/// more bytes are needed. Returns `Err` only for genuine grammar violations:
/// a malformed header block once a NUL
/// has already appeared in the buffer, or a declared `content-length` body
/// whose terminating byte isn't NUL.
fn parse_frame(input: &[u8]) -> Result<Option<(Frame, usize)>, StompError> {
    let head = match command_and_headers(input) {
        Ok(ok) => ok,
        Err(nom::Err::Incomplete(_)) => {
            return if input.contains(&0) {
                Err(StompError::protocol("Invalid frame (malformed headers)"))
            } else {
                Ok(None)
            };
        }
        Err(_) => {
            return if input.contains(&0) {
                Err(StompError::protocol("Invalid frame (malformed headers)"))
            } else {
                Ok(None)
            };
        }
    };
    let (rest, (command, raw_headers)) = head;

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &raw_headers {
        let name = String::from_utf8_lossy(name).into_owned();
        let value = String::from_utf8_lossy(value).into_owned();
        headers.entry(name).or_insert(value);
    }

    let content_length: Option<usize> = headers
        .get("content-length")
        .and_then(|v| v.trim().parse().ok());

    let (after_body, body): (&[u8], &[u8]) = match content_length {
        Some(len) => match take::<_, _, nom::error::Error<&[u8]>>(len)(rest) {
            Ok((after, body)) => {
                let (after, _nul) = match tag::<_, _, nom::error::Error<&[u8]>>("\x00")(after) {
                    Ok(ok) => ok,
                    Err(nom::Err::Incomplete(_)) => return Ok(None),
                    Err(_) => {
                        return Err(StompError::protocol("Invalid frame (missing null terminator)"))
                    }
                };
                (after, body)
            }
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => return Ok(None),
        },
        None => match take_until::<_, _, nom::error::Error<&[u8]>>("\x00")(rest) {
            Ok((after, body)) => {
                let (after, _nul) = tag::<_, _, nom::error::Error<&[u8]>>("\x00")(after)
                    .expect("take_until guarantees the delimiter follows");
                (after, body)
            }
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => return Ok(None),
        },
    };

    let consumed = input.len() - after_body.len();
    let mut frame = Frame::new(String::from_utf8_lossy(command).into_owned());
    for (name, value) in headers {
        frame.set_header_if_absent(name, value);
    }
    let frame = frame.with_body(body.to_vec());
    Ok(Some((frame, consumed)))
}

/// Strips leading heartbeat bytes (`\n`, `\r`, `\r\n`) between frames.
fn strip_heartbeats(buffer: &mut BytesMut) {
    let mut skip = 0;
    while skip < buffer.len() {
        match buffer[skip] {
            b'\n' => skip += 1,
            b'\r' => {
                if buffer.get(skip + 1) == Some(&b'\n') {
                    skip += 2;
                } else {
                    skip += 1;
                }
            }
            _ => break,
        }
    }
    if skip > 0 {
        buffer.advance(skip);
    }
}

/// A single-buffer incremental STOMP framer.
///
/// `feed` appends bytes and drains as many complete frames as possible into
/// an internal queue; `next` dequeues them one at a time. Feeding the same
/// serialized frame split at any byte boundary yields the same result as
/// feeding it whole.
#[derive(Debug, Default)]
pub struct Parser {
    buffer: BytesMut,
    queue: VecDeque<Frame>,
}

impl Parser {
    pub fn new() -> Self {
        Parser::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), StompError> {
        self.buffer.extend_from_slice(bytes);
        loop {
            strip_heartbeats(&mut self.buffer);
            if self.buffer.is_empty() {
                break;
            }
            match parse_frame(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    trace!(command = %frame.command, consumed, "parsed frame");
                    self.buffer.advance(consumed);
                    self.queue.push_back(frame);
                }
                Ok(None) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn next(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }
}
