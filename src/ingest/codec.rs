use std::io;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// One decoded unit of the wire protocol.
#[derive(Debug)]
pub enum WireFrame {
    Line(String),
    /// An over-long or non-UTF-8 line. Its bytes are consumed and the
    /// connection keeps going.
    Rejected(LinesCodecError),
}

/// Newline framing that survives bad lines.
///
/// A plain `LinesCodec` inside `Framed` puts the stream into its errored
/// state on any decode error, which pauses reading and ends the stream for
/// loops that treat `None` as end of input. Here those errors become
/// [`WireFrame::Rejected`] items instead; only transport errors surface as `Err`.
#[derive(Debug, Clone)]
pub struct WireCodec {
    lines: LinesCodec,
}

impl WireCodec {
    pub fn new(max_line_length: usize) -> Self {
        WireCodec {
            lines: LinesCodec::new_with_max_length(max_line_length),
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.lines.max_length()
    }
}

fn recover(decoded: Result<Option<String>, LinesCodecError>) -> Result<Option<WireFrame>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(WireFrame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => {
            Ok(Some(WireFrame::Rejected(LinesCodecError::MaxLineLengthExceeded)))
        }
        // the offending line has already been split off the buffer
        Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
            Ok(Some(WireFrame::Rejected(LinesCodecError::Io(e))))
        }
        Err(e) => Err(e),
    }
}

impl Decoder for WireCodec {
    type Item = WireFrame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<WireFrame>, LinesCodecError> {
        recover(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<WireFrame>, LinesCodecError> {
        recover(self.lines.decode_eof(buf))
    }
}

impl Encoder<String> for WireCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.lines.encode(line, buf)
    }
}
