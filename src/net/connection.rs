use std::io::{self, Read, Write};

use tracing::trace;

use crate::net::packet::{decode_frame_header, hex_dump, FrameError, PacketReader};

const READ_CHUNK: usize = 1024;
const TRACE_MAX_BYTES: usize = 64;
const RECEIVED_KEEP: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub length: usize,
    pub kind: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub struct FrameConnection<S> {
    stream: S,
    buffer: Vec<u8>,
    received: Vec<u8>,
    max_frame: usize,
}

impl<S: Read + Write> FrameConnection<S> {
    pub fn new(stream: S, max_frame: usize) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
            received: Vec::new(),
            max_frame,
        }
    }

    /// `Ok(None)` on a clean end of stream between frames. A stream that ends
    /// or stalls inside a frame is a truncated frame.
    pub fn read_frame(&mut self) -> Result<Option<InboundFrame>, ReadError> {
        loop {
            if let Some((length, prefix)) = decode_frame_header(&self.buffer, self.max_frame)? {
                if self.buffer.len() >= prefix + length {
                    let frame: Vec<u8> = self.buffer.drain(..prefix + length).collect();
                    return decode_frame(&frame[prefix..]).map(Some);
                }
            }

            match self.fill() {
                Ok(0) if self.buffer.is_empty() => return Ok(None),
                Ok(0) => return Err(self.truncated().into()),
                Ok(_) => {}
                Err(err) if is_stall(&err) && !self.buffer.is_empty() => {
                    return Err(self.truncated().into());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }

    pub fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        trace!(len = frame.len(), data = %hex_dump(frame, TRACE_MAX_BYTES), "out");
        self.stream.write_all(frame)?;
        self.stream.flush()
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = loop {
            match self.stream.read(&mut chunk) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };
        if read > 0 {
            trace!(len = read, data = %hex_dump(&chunk[..read], TRACE_MAX_BYTES), "in");
            self.buffer.extend_from_slice(&chunk[..read]);
            let keep = RECEIVED_KEEP.saturating_sub(self.received.len()).min(read);
            self.received.extend_from_slice(&chunk[..keep]);
        }
        Ok(read)
    }

    fn truncated(&self) -> FrameError {
        let needed = match decode_frame_header(&self.buffer, self.max_frame) {
            Ok(Some((length, prefix))) => length + prefix,
            _ => self.buffer.len() + 1,
        };
        FrameError::Truncated {
            needed,
            available: self.buffer.len(),
        }
    }
}

fn decode_frame(body: &[u8]) -> Result<InboundFrame, ReadError> {
    let mut reader = PacketReader::new(body);
    let kind = reader.read_var_int()?;
    Ok(InboundFrame {
        length: body.len(),
        kind,
        payload: reader.rest().to_vec(),
    })
}

pub fn is_stall(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
