//! Worker pool driving a [`ChunkCodec`] across threads.
//!
//! Chunks compress independently, so the archive read and write paths
//! fan each metadata resource or data blob chunk out to a fixed set of
//! workers. Every worker owns its codec instance (and with it any
//! decode tables, LRU queues and scratch), so codec state is never
//! shared between threads.

use futures::channel::oneshot;
use futures::FutureExt;
use std::future::Future;
use std::{fmt, io, mem, thread};

use crate::codec::ChunkCodec;
use crate::pool;

pub use crate::pool::Buffer;

pub struct ParallelCodec {
    // Destructors run top-down, so the channel closes before the workers
    // are joined.
    sender: flume::Sender<Request>,
    workers: Joiner,
}

#[derive(Debug, Copy, Clone)]
enum RequestKind {
    Compress,
    Decompress { max_size: usize },
}

struct Request {
    data: Vec<u8>,
    kind: RequestKind,
    reply: oneshot::Sender<io::Result<Response>>,
}

pub struct Response {
    pub data: pool::Buffer<'static>,
    /// False when the data did not shrink and is returned as-is.
    pub compressed: bool,
}

impl ParallelCodec {
    /// One worker per logical CPU, each with its own codec from
    /// `codec_factory`.
    pub fn new<C, F>(codec_factory: F) -> Self
    where
        C: ChunkCodec + 'static,
        F: FnMut() -> C,
    {
        Self::with_workers(codec_factory, num_cpus::get())
    }

    pub fn with_workers<C, F>(mut codec_factory: F, workers: usize) -> Self
    where
        C: ChunkCodec + 'static,
        F: FnMut() -> C,
    {
        assert!(workers > 0);

        let (sender, receiver) = flume::bounded(0);
        let workers = Joiner(
            (0..workers)
                .map(|_| {
                    let receiver = receiver.clone();
                    let codec = codec_factory();
                    thread::spawn(move || worker(receiver, codec))
                })
                .collect(),
        );

        Self { sender, workers }
    }

    /// Submit a chunk for compression. The outer future resolves once
    /// the request is queued; the inner one when a worker finishes.
    /// Compression cannot fail: an incompressible chunk comes back
    /// unchanged with `compressed == false`.
    pub async fn compress(&self, data: Vec<u8>) -> impl Future<Output = Response> {
        let (reply, response) = oneshot::channel();
        let request = Request {
            data,
            kind: RequestKind::Compress,
            reply,
        };

        self.sender.send_async(request).await.unwrap();

        response.map(Result::unwrap).map(Result::unwrap)
    }

    /// Submit a chunk for decompression into at most `max_size` bytes.
    pub async fn decompress(
        &self,
        data: Vec<u8>,
        max_size: usize,
    ) -> impl Future<Output = io::Result<Response>> {
        let (reply, response) = oneshot::channel();
        let request = Request {
            data,
            kind: RequestKind::Decompress { max_size },
            reply,
        };

        self.sender.send_async(request).await.unwrap();

        response.map(Result::unwrap)
    }
}

fn worker<C: ChunkCodec>(receiver: flume::Receiver<Request>, mut codec: C) {
    for mut request in receiver {
        let mut src = pool::attach_chunk(mem::take(&mut request.data));
        let mut response = Response {
            data: pool::chunk(),
            compressed: false,
        };
        let result: io::Result<Response> = match request.kind {
            RequestKind::Compress => {
                // Target one byte less than the input, so an output that
                // merely ties is stored uncompressed.
                response.data.resize(src.len() - 1, 0);
                match codec.compress(&src, &mut response.data) {
                    Ok(n) => {
                        response.data.truncate(n);
                        response.compressed = true;
                        Ok(response)
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        // Did not fit; hand the input back unchanged and
                        // let the scratch buffer return to the pool.
                        mem::swap(&mut src, &mut response.data);
                        response.compressed = false;
                        Ok(response)
                    }
                    Err(e) => Err(e),
                }
            }
            RequestKind::Decompress { max_size } => {
                response.data.resize(max_size, 0);
                codec.decompress(&src, &mut response.data).map(|n| {
                    response.data.truncate(n);
                    response
                })
            }
        };
        let _ = request.reply.send(result);
    }
}

struct Joiner(Vec<thread::JoinHandle<()>>);

impl Drop for Joiner {
    fn drop(&mut self) {
        for handle in self.0.drain(..) {
            let result = handle.join();
            if !thread::panicking() {
                result.unwrap();
            }
        }
    }
}

impl fmt::Debug for ParallelCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelCodec").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A run-length codec good enough to exercise both outcomes: a
    /// buffer of one repeated byte compresses to five bytes, anything
    /// else does not fit.
    struct RunLength;

    impl ChunkCodec for RunLength {
        fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
            let first = match src.first() {
                Some(&b) => b,
                None => return Err(io::ErrorKind::UnexpectedEof.into()),
            };
            if dst.len() < 5 || !src.iter().all(|&b| b == first) {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            dst[0] = first;
            dst[1..5].copy_from_slice(&(src.len() as u32).to_le_bytes());
            Ok(5)
        }

        fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
            if src.len() != 5 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "bad chunk"));
            }
            let n = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
            if n > dst.len() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "chunk too big"));
            }
            for b in &mut dst[..n] {
                *b = src[0];
            }
            Ok(n)
        }
    }

    #[test]
    fn compress_decompress_round_trip() {
        futures::executor::block_on(async {
            let codec = ParallelCodec::with_workers(|| RunLength, 2);

            let chunk = vec![7u8; 4096];
            let compressed = codec.compress(chunk.clone()).await.await;
            assert!(compressed.compressed);
            assert_eq!(compressed.data.len(), 5);

            let restored = codec
                .decompress(compressed.data.detach(), 4096)
                .await
                .await
                .unwrap();
            assert_eq!(&*restored.data, &chunk[..]);
        });
    }

    #[test]
    fn incompressible_chunks_pass_through() {
        futures::executor::block_on(async {
            let codec = ParallelCodec::with_workers(|| RunLength, 1);

            let chunk = vec![1, 2, 3, 4, 5];
            let response = codec.compress(chunk.clone()).await.await;
            assert!(!response.compressed);
            assert_eq!(&*response.data, &chunk[..]);
        });
    }

    #[test]
    fn requests_overlap_across_workers() {
        futures::executor::block_on(async {
            let codec = ParallelCodec::with_workers(|| RunLength, 2);

            let a = codec.compress(vec![9u8; 1024]).await;
            let b = codec.compress(vec![1, 2, 3]).await;
            let (a, b) = futures::join!(a, b);

            assert!(a.compressed);
            assert!(!b.compressed);
        });
    }
}
