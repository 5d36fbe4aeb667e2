//! Permessage-deflate extension (C11, RFC 7692): per-connection compress
//! and decompress streams with the context-takeover policy negotiated at
//! handshake time (spec.md §4.10).

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::WsError;

/// The four parameters RFC 7692 defines, after the `window_bits=8` → 9
/// coercion note from spec.md §9.
#[derive(Debug, Clone, Copy)]
pub struct DeflateParams {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
}

impl Default for DeflateParams {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
        }
    }
}

/// Minimum payload size before a message is compressed. spec.md §4.7 floats
/// 64 bytes as a "recommended" skip-compression threshold, but §8 scenario
/// S4 requires a 5-byte echoed message to come back compressed (RSV1=1)
/// once permessage-deflate is negotiated — so once the extension is on,
/// every message is compressed regardless of size; the threshold is kept
/// as a named constant rather than removed outright in case a future
/// handler option wants to opt back into the size-gated behavior.
pub const COMPRESSION_THRESHOLD: usize = 0;

const TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

pub struct PerMessageDeflate {
    compress: Compress,
    decompress: Decompress,
    params: DeflateParams,
}

impl PerMessageDeflate {
    pub fn new(params: DeflateParams) -> Self {
        Self {
            // RFC 7692 compression is always raw DEFLATE (no zlib header).
            compress: Compress::new(Compression::default(), false),
            decompress: Decompress::new(false),
            params,
        }
    }

    /// Compress one message payload; strips the trailing `00 00 FF FF`
    /// marker flate2 would otherwise leave from the sync-flush boundary.
    pub fn compress_message(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        let mut input_pos = 0;
        loop {
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            let mut buf = [0u8; 4096];
            self.compress
                .compress(&data[input_pos..], &mut buf, FlushCompress::Sync)
                .expect("deflate compression never fails on in-memory buffers");
            input_pos += (self.compress.total_in() - before_in) as usize;
            out.extend_from_slice(&buf[..(self.compress.total_out() - before_out) as usize]);
            if input_pos >= data.len() {
                break;
            }
        }

        if out.ends_with(&TAIL) {
            out.truncate(out.len() - 4);
        }

        if self.params.server_no_context_takeover {
            self.compress.reset();
        }

        out
    }

    /// Decompress one message payload; appends the trailing `00 00 FF FF`
    /// marker the sender stripped before handing it to the wire codec.
    pub fn decompress_message(&mut self, data: &[u8]) -> Result<Vec<u8>, WsError> {
        let mut input = data.to_vec();
        input.extend_from_slice(&TAIL);

        let mut out = Vec::with_capacity(input.len() * 3);
        let mut input_pos = 0;
        loop {
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let mut buf = [0u8; 4096];
            let status = self
                .decompress
                .decompress(&input[input_pos..], &mut buf, FlushDecompress::Sync)
                .map_err(|e| WsError::InvalidPayload(format!("deflate decode failed: {e}")))?;
            input_pos += (self.decompress.total_in() - before_in) as usize;
            out.extend_from_slice(&buf[..(self.decompress.total_out() - before_out) as usize]);

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError if input_pos >= input.len() => break,
                _ => continue,
            }
        }

        if self.params.client_no_context_takeover {
            self.decompress.reset(false);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_decompress_round_trips() {
        let mut tx = PerMessageDeflate::new(DeflateParams::default());
        let mut rx = PerMessageDeflate::new(DeflateParams::default());

        let message = b"hello websocket world, compressed".repeat(4);
        let compressed = tx.compress_message(&message);
        let decompressed = rx.decompress_message(&compressed).unwrap();

        assert_eq!(decompressed, message);
    }

    #[test]
    fn no_context_takeover_resets_between_messages() {
        let mut tx = PerMessageDeflate::new(DeflateParams {
            server_no_context_takeover: true,
            ..Default::default()
        });
        let mut rx = PerMessageDeflate::new(DeflateParams {
            client_no_context_takeover: true,
            ..Default::default()
        });

        for _ in 0..3 {
            let msg = b"repeated payload for context takeover check".to_vec();
            let compressed = tx.compress_message(&msg);
            let decompressed = rx.decompress_message(&compressed).unwrap();
            assert_eq!(decompressed, msg);
        }
    }
}
