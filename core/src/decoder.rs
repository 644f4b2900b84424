//! Streaming decoder for map output files.
//!
//! A decoder reads one intermediate file front to back and yields its
//! records in file order. It knows nothing about key ordering; the map phase
//! guarantees each file is already sorted.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::{MAX_VARINT_LEN, decode_varint};
use crate::error::{ShuffleError, ShuffleResult};
use crate::record::Record;

/// Default read buffer in front of each file.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 << 10;

/// Initial size of the scratch buffer records are read into.
const INITIAL_SCRATCH_SIZE: usize = 1 << 10;

/// Frames longer than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: u64 = 1 << 30;

/// Items travelling from a decoder to the merge engine.
pub type DecodedRecord = ShuffleResult<Record>;

/// Decodes length-prefixed records from a buffered reader.
pub struct StreamDecoder<R> {
    path: PathBuf,
    reader: BufReader<R>,
    scratch: Vec<u8>,
    offset: u64,
    records_read: u64,
}

impl StreamDecoder<File> {
    /// Open `path` for decoding behind a read buffer of `read_buffer_size` bytes.
    pub async fn open<P: AsRef<Path>>(path: P, read_buffer_size: usize) -> ShuffleResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| ShuffleError::io(path, e))?;
        Ok(Self::new(path, file, read_buffer_size))
    }
}

impl<R: AsyncRead + Unpin> StreamDecoder<R> {
    /// Wrap an arbitrary reader. `path` is only used in error messages.
    pub fn new<P: AsRef<Path>>(path: P, reader: R, read_buffer_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: BufReader::with_capacity(read_buffer_size.max(MAX_VARINT_LEN), reader),
            scratch: vec![0; INITIAL_SCRATCH_SIZE],
            offset: 0,
            records_read: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return how many (records, bytes) have been decoded.
    pub fn stats(&self) -> (u64, u64) {
        (self.records_read, self.offset)
    }

    /// Decode the next record, or `None` at a clean end of file.
    pub async fn next_record(&mut self) -> ShuffleResult<Option<Record>> {
        let frame_start = self.offset;
        let Some((len, prefix_len)) = self.read_length_prefix().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_LEN {
            return Err(ShuffleError::corrupt(
                &self.path,
                frame_start,
                format!("frame length {} exceeds {}", len, MAX_FRAME_LEN),
            ));
        }
        let len = len as usize;

        if self.scratch.len() < len {
            self.scratch.resize(len, 0);
        }
        let body = &mut self.scratch[..len];
        if let Err(e) = self.reader.read_exact(body).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ShuffleError::corrupt(
                    &self.path,
                    frame_start,
                    format!("truncated record: expected {} bytes", len),
                ),
                _ => ShuffleError::io(&self.path, e),
            });
        }

        let record = Record::from_bytes(&self.scratch[..len])
            .map_err(|e| ShuffleError::corrupt(&self.path, frame_start, e.to_string()))?;

        self.offset += (prefix_len + len) as u64;
        self.records_read += 1;
        Ok(Some(record))
    }

    /// Peek at the buffered bytes, decode the length prefix and discard
    /// exactly the bytes it occupied. The prefix may straddle a refill.
    async fn read_length_prefix(&mut self) -> ShuffleResult<Option<(u64, usize)>> {
        let mut prefix = [0u8; MAX_VARINT_LEN];
        let mut filled = 0;

        loop {
            let buf = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| ShuffleError::io(&self.path, e))?;
            if buf.is_empty() {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ShuffleError::corrupt(
                    &self.path,
                    self.offset,
                    "truncated length prefix",
                ));
            }

            let mut taken = 0;
            let mut complete = false;
            for &byte in buf.iter().take(MAX_VARINT_LEN - filled) {
                prefix[filled] = byte;
                filled += 1;
                taken += 1;
                if byte & 0x80 == 0 {
                    complete = true;
                    break;
                }
            }
            self.reader.consume(taken);

            if complete {
                let mut pos = 0;
                let len = decode_varint(&prefix[..filled], &mut pos).map_err(|e| {
                    ShuffleError::corrupt(&self.path, self.offset, e.to_string())
                })?;
                return Ok(Some((len, filled)));
            }
            if filled == MAX_VARINT_LEN {
                return Err(ShuffleError::corrupt(
                    &self.path,
                    self.offset,
                    "length prefix longer than 10 bytes",
                ));
            }
        }
    }
}

/// Decode `path` in a background task, sending records into a bounded channel.
///
/// The channel closes when the file is exhausted. A decode failure is
/// forwarded through the channel as its last item, so the consumer sees it
/// in stream order. The handle yields the number of records sent.
pub fn spawn_decoder(
    path: PathBuf,
    read_buffer_size: usize,
    channel_capacity: usize,
) -> (mpsc::Receiver<DecodedRecord>, JoinHandle<ShuffleResult<u64>>) {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let handle = tokio::spawn(async move {
        match decode_into(&path, read_buffer_size, &tx).await {
            Ok(sent) => {
                debug!(path = %path.display(), records = sent, "map output decoded");
                Ok(sent)
            }
            Err(e) => match tx.reserve().await {
                Ok(permit) => {
                    permit.send(Err(e));
                    Err(ShuffleError::TaskFailed(format!(
                        "decoder for {} stopped on error",
                        path.display()
                    )))
                }
                // Nobody is listening any more; keep the original error.
                Err(_) => Err(e),
            },
        }
    });
    (rx, handle)
}

async fn decode_into(
    path: &Path,
    read_buffer_size: usize,
    tx: &mpsc::Sender<DecodedRecord>,
) -> ShuffleResult<u64> {
    let mut decoder = StreamDecoder::open(path, read_buffer_size).await?;
    let mut sent = 0;
    while let Some(record) = decoder.next_record().await? {
        if tx.send(Ok(record)).await.is_err() {
            // The merge went away, which only happens when it failed.
            break;
        }
        sent += 1;
    }
    Ok(sent)
}
