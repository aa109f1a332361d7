//! Decoding of the compressed replay wire format into flat event records.
//!
//! Replay data arrives as a base64 string wrapping an LZMA stream of
//! comma-separated `timeDelta|x|y` frames. Malformed input is flagged as
//! `InvalidReplay`; there is no recovery beyond that.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::{ReplayError, ReplayEvent};

/// Sentinel frame appended by the source encoder at end of stream.
const TERMINATOR_DELTA: i32 = -12345;

/// Decodes a base64 + LZMA replay data string into events.
pub fn decode_replay_string(data: &str) -> Result<Vec<ReplayEvent>, ReplayError> {
    let compressed = BASE64
        .decode(data.trim().as_bytes())
        .map_err(|e| ReplayError::InvalidReplay(format!("base64 decode failed: {e}")))?;

    let mut decompressed = Vec::new();
    lzma_rs::lzma_decompress(&mut Cursor::new(compressed), &mut decompressed)
        .map_err(|e| ReplayError::InvalidReplay(format!("lzma decompress failed: {e}")))?;

    let text = String::from_utf8(decompressed)
        .map_err(|e| ReplayError::InvalidReplay(format!("replay data is not utf-8: {e}")))?;
    parse_events(&text)
}

/// Parses comma-separated `timeDelta|x|y[|...]` frames. A trailing comma is
/// tolerated and the terminator sentinel frame at list end is dropped.
pub fn parse_events(data: &str) -> Result<Vec<ReplayEvent>, ReplayError> {
    let trimmed = data.trim().trim_end_matches(',');
    if trimmed.is_empty() {
        return Err(ReplayError::InvalidReplay("empty event stream".into()));
    }

    let frames: Vec<&str> = trimmed.split(',').collect();
    let mut events = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let event = parse_frame(frame)?;
        if event.time_delta == TERMINATOR_DELTA && index == frames.len() - 1 {
            continue;
        }
        events.push(event);
    }
    Ok(events)
}

fn parse_frame(frame: &str) -> Result<ReplayEvent, ReplayError> {
    let mut parts = frame.split('|');
    let (Some(dt), Some(x), Some(y)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ReplayError::InvalidReplay(format!(
            "malformed frame '{frame}'"
        )));
    };
    Ok(ReplayEvent {
        time_delta: dt
            .parse()
            .map_err(|_| ReplayError::InvalidReplay(format!("bad time delta '{dt}'")))?,
        x: x
            .parse()
            .map_err(|_| ReplayError::InvalidReplay(format!("bad x coordinate '{x}'")))?,
        y: y
            .parse()
            .map_err(|_| ReplayError::InvalidReplay(format!("bad y coordinate '{y}'")))?,
    })
}
