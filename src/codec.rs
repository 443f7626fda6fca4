use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

/// Frames raw bytes of a non-UTF-8 export into UTF-8 chunks.
///
/// Procmon can save exports in the system ANSI code page; the CSV layer only
/// ever sees UTF-8 coming out of this decoder. BOM sniffing is left to
/// `encoding_rs`, so a UTF-16 export with a BOM is handled too.
pub struct CharsetDecoder {
    decoder: encoding_rs::Decoder,
}

impl CharsetDecoder {
    pub fn new(encoding: &'static encoding_rs::Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
        }
    }

    fn drain(&mut self, src: &mut BytesMut, last: bool) -> Option<BytesMut> {
        let capacity = if last {
            self.decoder.max_utf8_buffer_length(src.len())
        } else {
            self.decoder
                .max_utf8_buffer_length_without_replacement(src.len())
        }
        .unwrap_or_else(|| src.len() * 3 + 4);

        let mut out = vec![0u8; capacity];
        let (_result, read, written, _replaced) = self.decoder.decode_to_utf8(src, &mut out, last);
        src.advance(read);

        if written == 0 {
            return None;
        }
        out.truncate(written);
        Some(BytesMut::from(&out[..]))
    }
}

impl Decoder for CharsetDecoder {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        // A partial multi-byte sequence yields nothing until more bytes arrive.
        Ok(self.drain(src, false))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }
        let out = self.drain(buf, true);
        buf.clear();
        Ok(out)
    }
}
