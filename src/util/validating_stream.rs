use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::{ready, Stream};
use pin_project_lite::pin_project;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::trace;

use crate::storage::item::BlobStream;

/// the error chunk a `ValidatingStream` appends when its content does not match
#[derive(Debug, Error)]
#[error("content verification failed: {0}")]
pub struct VerificationError(pub String);

pin_project! {
    /// Wraps a byte stream, passing data through without materializing it, while verifying
    ///  properties of the entire content (e.g. its SHA1 checksum).
    ///
    /// If verification fails, an error chunk is appended to the stream. Once a chunk with an
    ///  error was returned, the stream stops polling upstream and always returns an error.
    pub struct ValidatingStream {
        #[pin]
        inner: BlobStream,
        verifiers: Vec<Box<dyn StreamVerifier>>,
        is_failed: bool,
    }
}

impl ValidatingStream {
    pub fn new(inner: BlobStream, verifiers: Vec<Box<dyn StreamVerifier>>) -> ValidatingStream {
        ValidatingStream {
            inner,
            verifiers,
            is_failed: false,
        }
    }
}

impl Stream for ValidatingStream {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_failed {
            return Poll::Ready(Some(Err(VerificationError("polling from failed stream".to_string()).into())));
        }

        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(data)) => {
                for v in this.verifiers.iter_mut() {
                    v.add_data(&data);
                }
                Poll::Ready(Some(Ok(data)))
            }
            None => {
                match this.verifiers.iter().find_map(|v| v.verify().err()) {
                    None => Poll::Ready(None),
                    Some(msg) => {
                        *this.is_failed = true;
                        Poll::Ready(Some(Err(VerificationError(msg).into())))
                    }
                }
            }
            Some(Err(e)) => {
                *this.is_failed = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub trait StreamVerifier: Send {
    fn add_data(&mut self, data: &Bytes);
    /// `Err` carries a description of the mismatch
    fn verify(&self) -> Result<(), String>;
}

pub struct NopStreamVerifier {}
impl StreamVerifier for NopStreamVerifier {
    fn add_data(&mut self, _data: &Bytes) {}

    fn verify(&self) -> Result<(), String> {
        Ok(())
    }
}

pub struct Sha1StreamVerifier {
    hasher: Sha1,
    expected_hash: [u8; 20],
}
impl Sha1StreamVerifier {
    pub fn new(expected_hash: [u8; 20]) -> Sha1StreamVerifier {
        Sha1StreamVerifier {
            hasher: Default::default(),
            expected_hash,
        }
    }
}
impl StreamVerifier for Sha1StreamVerifier {
    fn add_data(&mut self, data: &Bytes) {
        self.hasher.update(data);
    }

    fn verify(&self) -> Result<(), String> {
        let hash: [u8; 20] = self.hasher.clone().finalize().into();
        trace!("verifying SHA1 hash");
        if hash == self.expected_hash {
            Ok(())
        }
        else {
            Err(format!("SHA1 was {}, expected {}", hex::encode(hash), hex::encode(self.expected_hash)))
        }
    }
}

pub struct Md5StreamVerifier {
    context: md5::Context,
    expected_hash: [u8; 16],
}
impl Md5StreamVerifier {
    pub fn new(expected_hash: [u8; 16]) -> Md5StreamVerifier {
        Md5StreamVerifier {
            context: md5::Context::new(),
            expected_hash,
        }
    }
}
impl StreamVerifier for Md5StreamVerifier {
    fn add_data(&mut self, data: &Bytes) {
        self.context.consume(data);
    }

    fn verify(&self) -> Result<(), String> {
        let hash: [u8; 16] = self.context.clone().compute().0;
        trace!("verifying MD5 hash");
        if hash == self.expected_hash {
            Ok(())
        }
        else {
            Err(format!("MD5 was {}, expected {}", hex::encode(hash), hex::encode(self.expected_hash)))
        }
    }
}

pub fn sha1_hex(data: &[u8]) -> String {
    let hash: [u8; 20] = Sha1::digest(data).into();
    hex::encode(hash)
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

#[cfg(test)]
mod test {
    use futures::StreamExt;
    use hex::FromHex;

    use super::*;
    use crate::storage::item::read_all;

    fn chunks(data: &[&'static [u8]]) -> BlobStream {
        let chunks: Vec<anyhow::Result<Bytes>> = data.iter().map(|d| Ok(Bytes::from_static(d))).collect();
        Box::pin(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_matching_checksums_pass() {
        let sha1 = <[u8; 20]>::from_hex(sha1_hex(b"hello world")).unwrap();
        let md5 = <[u8; 16]>::from_hex(md5_hex(b"hello world")).unwrap();
        let stream = ValidatingStream::new(
            chunks(&[b"hello ", b"world"]),
            vec![Box::new(Sha1StreamVerifier::new(sha1)), Box::new(Md5StreamVerifier::new(md5))],
        );
        assert_eq!(read_all(Box::pin(stream)).await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_mismatch_appends_error_chunk() {
        let mut stream = ValidatingStream::new(
            chunks(&[b"tampered"]),
            vec![Box::new(Sha1StreamVerifier::new([0u8; 20]))],
        );
        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.downcast_ref::<VerificationError>().is_some());
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_nop_verifier() {
        let stream = ValidatingStream::new(chunks(&[b"x"]), vec![Box::new(NopStreamVerifier {})]);
        assert_eq!(read_all(Box::pin(stream)).await.unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
