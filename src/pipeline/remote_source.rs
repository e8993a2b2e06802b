use super::{DataReply, DataRequest, RemoteMessage, SharedRegion};
use flume::{Receiver, Sender};
use std::io::{
    Error as IoError,
    ErrorKind as IoErrorKind,
    Read,
    Result as IoResult,
    Seek,
    SeekFrom,
};
use symphonia_core::io::MediaSource;
use tracing::trace;

/// Endpoint-side view of the host's data source.
///
/// Every read which misses the local chunk becomes a [`DataRequest`] to the host,
/// and blocks the endpoint thread until the matching [`DataReply`] arrives. If the
/// host goes away, blocked reads fail rather than hang.
pub(crate) struct RemoteSource {
    requests: Sender<RemoteMessage>,
    replies: Receiver<DataReply>,
    size: Option<u64>,
    streaming: bool,
    chunk_size: usize,
    position: u64,
    next_seq: u64,
    chunk: Option<(u64, SharedRegion)>,
}

impl RemoteSource {
    pub(crate) fn new(
        requests: Sender<RemoteMessage>,
        replies: Receiver<DataReply>,
        size: Option<u64>,
        streaming: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            requests,
            replies,
            size,
            streaming,
            chunk_size: chunk_size.max(1),
            position: 0,
            next_seq: 0,
            chunk: None,
        }
    }

    fn fetch(&mut self, position: u64, len: usize) -> IoResult<SharedRegion> {
        self.next_seq += 1;
        let seq = self.next_seq;

        self.requests
            .send(RemoteMessage::ReadData(DataRequest { seq, position, len }))
            .map_err(|_| aborted())?;

        loop {
            let reply = self.replies.recv().map_err(|_| aborted())?;

            if reply.seq == seq {
                return reply
                    .result
                    .map_err(|e| IoError::new(IoErrorKind::Other, e));
            }

            trace!("Discarding stale data reply {} (awaiting {}).", reply.seq, seq);
        }
    }
}

impl Read for RemoteSource {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let cached = self.chunk.as_ref().and_then(|(start, region)| {
            let offset = self.position.checked_sub(*start)?;
            let offset = usize::try_from(offset).ok()?;
            (offset < region.len()).then(|| (region.clone(), offset))
        });

        let (region, offset) = match cached {
            Some(hit) => hit,
            None => {
                let region = self.fetch(self.position, self.chunk_size.max(buf.len()))?;
                if region.is_empty() {
                    return Ok(0);
                }
                self.chunk = Some((self.position, region.clone()));
                (region, 0)
            },
        };

        let n = buf.len().min(region.len() - offset);
        buf[..n].copy_from_slice(&region[offset..offset + n]);
        self.position += n as u64;

        Ok(n)
    }
}

impl Seek for RemoteSource {
    fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self
                .size
                .ok_or_else(|| {
                    IoError::new(IoErrorKind::Unsupported, "source length is unknown")
                })?
                .checked_add_signed(delta),
        };

        self.position = target.ok_or_else(|| {
            IoError::new(IoErrorKind::InvalidInput, "seek to a negative position")
        })?;

        Ok(self.position)
    }
}

impl MediaSource for RemoteSource {
    fn is_seekable(&self) -> bool {
        !self.streaming
    }

    fn byte_len(&self) -> Option<u64> {
        self.size
    }
}

fn aborted() -> IoError {
    IoError::new(IoErrorKind::ConnectionAborted, "data channel closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::thread;

    fn serve(data: Vec<u8>, req_rx: Receiver<RemoteMessage>, reply_tx: Sender<DataReply>) {
        thread::spawn(move || {
            while let Ok(RemoteMessage::ReadData(req)) = req_rx.recv() {
                let start = (req.position as usize).min(data.len());
                let end = (start + req.len).min(data.len());
                let result = Ok(SharedRegion::from(&data[start..end]));
                if reply_tx.send(DataReply { seq: req.seq, result }).is_err() {
                    break;
                }
            }
        });
    }

    #[test]
    fn reads_through_chunks() {
        let (req_tx, req_rx) = flume::unbounded();
        let (reply_tx, reply_rx) = flume::unbounded();
        let data: Vec<u8> = (0..=255).collect();
        serve(data.clone(), req_rx, reply_tx);

        let mut src = RemoteSource::new(req_tx, reply_rx, Some(256), false, 7);
        let mut out = vec![];
        src.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);

        src.seek(SeekFrom::End(-6)).unwrap();
        let mut tail = [0u8; 6];
        src.read_exact(&mut tail).unwrap();
        assert_eq!(tail, [250, 251, 252, 253, 254, 255]);
    }

    #[test]
    fn host_errors_become_io_errors() {
        let (req_tx, req_rx) = flume::unbounded();
        let (reply_tx, reply_rx) = flume::unbounded();
        thread::spawn(move || {
            if let Ok(RemoteMessage::ReadData(req)) = req_rx.recv() {
                reply_tx
                    .send(DataReply {
                        seq: req.seq - 1,
                        result: Ok(SharedRegion::from(vec![9])),
                    })
                    .unwrap();
                reply_tx
                    .send(DataReply {
                        seq: req.seq,
                        result: Err(PipelineError::Aborted),
                    })
                    .unwrap();
            }
        });

        let mut src = RemoteSource::new(req_tx, reply_rx, None, true, 16);
        let err = src.read(&mut [0u8; 4]).unwrap_err();

        assert_eq!(err.kind(), IoErrorKind::Other);
        assert!(!src.is_seekable());
        assert_eq!(
            src.seek(SeekFrom::End(0)).unwrap_err().kind(),
            IoErrorKind::Unsupported
        );
    }

    #[test]
    fn vanished_host_aborts_reads() {
        let (req_tx, _) = flume::unbounded();
        let (_, reply_rx) = flume::unbounded();

        let mut src = RemoteSource::new(req_tx, reply_rx, None, false, 16);

        let err = src.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), IoErrorKind::ConnectionAborted);
    }
}
