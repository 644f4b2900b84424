//! Length-prefixed framing of map output files.
//!
//! An intermediate file is a sequence of frames:
//!
//! ```text
//!   uleb128(len) record[len] uleb128(len) record[len] ...
//! ```
//!
//! where `record` is the bincode encoding of a [`Record`]. Frames are written
//! in ascending key order by the map phase.

use std::io;
use std::path::Path;

use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::error::{ShuffleError, ShuffleResult};
use crate::record::Record;

/// Longest LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode an unsigned 64-bit integer as LEB128 into `buf`.
#[inline]
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a LEB128 unsigned 64-bit integer from `buf` starting at `*pos`.
/// Advances `*pos` past the consumed bytes.
#[inline]
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        if *pos >= buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "varint: unexpected end of buffer",
            ));
        }
        let byte = buf[*pos];
        *pos += 1;

        let payload = (byte & 0x7F) as u64;
        if shift >= 63 && payload > 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift as usize >= MAX_VARINT_LEN * 7 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long"));
        }
    }
}

/// Writes records as length-prefixed frames.
pub struct RecordWriter<W> {
    dest: W,
    frame: Vec<u8>,
    records_written: u64,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    pub fn new(dest: W) -> Self {
        Self {
            dest,
            frame: Vec::with_capacity(MAX_VARINT_LEN),
            records_written: 0,
            bytes_written: 0,
        }
    }

    pub async fn write(&mut self, record: &Record) -> io::Result<()> {
        let body = record
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.frame.clear();
        encode_varint(body.len() as u64, &mut self.frame);
        self.dest.write_all(&self.frame).await?;
        self.dest.write_all(&body).await?;
        self.records_written += 1;
        self.bytes_written += (self.frame.len() + body.len()) as u64;
        Ok(())
    }

    /// Return how many (bytes, records) have been written.
    pub fn stats(&self) -> (u64, u64) {
        (self.bytes_written, self.records_written)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush and hand back the destination.
    pub async fn finish(mut self) -> io::Result<W> {
        self.dest.flush().await?;
        Ok(self.dest)
    }
}

/// Write a complete map output file, creating parent directories as needed.
///
/// The caller is responsible for passing records already sorted by key.
pub async fn write_map_output<P: AsRef<Path>>(path: P, records: &[Record]) -> ShuffleResult<u64> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ShuffleError::io(parent, e))?;
    }
    let file = File::create(path)
        .await
        .map_err(|e| ShuffleError::io(path, e))?;
    let mut writer = RecordWriter::new(BufWriter::new(file));
    for record in records {
        writer
            .write(record)
            .await
            .map_err(|e| ShuffleError::io(path, e))?;
    }
    let (bytes, _) = writer.stats();
    writer
        .finish()
        .await
        .map_err(|e| ShuffleError::io(path, e))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(val: u64) {
        let mut buf = Vec::new();
        encode_varint(val, &mut buf);
        let mut pos = 0;
        let decoded = decode_varint(&buf, &mut pos).unwrap();
        assert_eq!(decoded, val);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn test_round_trip_boundaries() {
        for val in [0, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX] {
            round_trip(val);
        }
    }

    #[test]
    fn test_encoding_sizes() {
        let mut buf = Vec::new();
        encode_varint(127, &mut buf);
        assert_eq!(buf, vec![0x7F]);

        buf.clear();
        encode_varint(300, &mut buf);
        assert_eq!(buf, vec![0xAC, 0x02]);

        buf.clear();
        encode_varint(u64::MAX, &mut buf);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_truncated_varint() {
        let mut pos = 0;
        let err = decode_varint(&[0x80, 0x80], &mut pos).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_overflowing_varint() {
        let buf = [0xFF; 11];
        let mut pos = 0;
        let err = decode_varint(&buf, &mut pos).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_writer_frames_records() {
        let mut writer = RecordWriter::new(Vec::new());
        let record = Record::new("k", "v");
        writer.write(&record).await.unwrap();
        assert_eq!(writer.records_written(), 1);
        let bytes = writer.finish().await.unwrap();

        let mut pos = 0;
        let len = decode_varint(&bytes, &mut pos).unwrap() as usize;
        assert_eq!(pos + len, bytes.len());
        assert_eq!(Record::from_bytes(&bytes[pos..]).unwrap(), record);
    }
}
