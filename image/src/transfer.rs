// StreamTransfer
// Bounded-chunk copy from a source reader into an engine stream

use cim_core::{CimError, PipelineConfig, Result, StreamSink};
use std::io::{ErrorKind, Read};

#[derive(Debug, Clone, Copy)]
pub struct StreamTransfer {
    chunk_size: usize,
}

impl StreamTransfer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            chunk_size: config.transfer_chunk_size.max(1),
        }
    }

    /// Copy until the source returns a zero-length read.
    ///
    /// Any read or write failure aborts with `Io`; whatever was written stays
    /// in the engine stream. No retries.
    pub fn copy(&self, dest: &mut dyn StreamSink, src: &mut dyn Read) -> Result<u64> {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            let n = match src.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CimError::io("read source stream", e)),
            };

            dest.write_chunk(&buffer[..n]).map_err(|e| match e {
                CimError::Io { .. } => e,
                other => CimError::io(
                    "write image stream",
                    std::io::Error::new(ErrorKind::Other, other.to_string()),
                ),
            })?;
            total += n as u64;
        }

        log::debug!("Transferred {} bytes", total);
        Ok(total)
    }
}

impl Default for StreamTransfer {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}
