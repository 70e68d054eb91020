//! Output sinks for composited frames.
//!
//! The sink receives planar I420 pictures. `write_frame` owns the retry
//! policy: partial writes are resumed until the frame is complete, a zero
//! byte write or an I/O error fails the frame.

mod loopback;
mod i420;

use std::io;

use anyhow::{anyhow, Result};

pub use loopback::LoopbackSink;
pub use i420::{i420_len, rgb_to_i420};

/// Byte sink for encoded output frames.
pub trait OutputSink: Send {
    /// Human-readable destination, for logs.
    fn describe(&self) -> String;

    /// Write some prefix of `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

/// Write a complete frame, resuming after partial writes.
pub fn write_frame(sink: &mut dyn OutputSink, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match sink.write(bytes) {
            Ok(0) => {
                return Err(anyhow!(
                    "{} accepted no bytes with {} remaining",
                    sink.describe(),
                    bytes.len()
                ))
            }
            Ok(n) => bytes = &bytes[n.min(bytes.len())..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(anyhow!("write to {} failed: {}", sink.describe(), err)),
        }
    }
    Ok(())
}
