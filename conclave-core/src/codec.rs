//! Postcard codec for length-delimited framing with serde serialization.
//!
//! Every session frame is a length prefix followed by a postcard payload.
//! Decode failures (truncation, unknown discriminant, garbage) surface as
//! [`io::ErrorKind::InvalidData`], which the session layer treats as a
//! malformed message and closes the connection.

use std::io;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

fn new_length_delimited_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(64 * 1024)
        .new_codec()
}

/// Wraps [`LengthDelimitedCodec`] with automatic postcard serialization.
#[derive(Debug)]
pub struct PostcardCodec<T> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<T>,
}

impl<T> PostcardCodec<T> {
    /// Max frame length: 64 KiB.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: new_length_delimited_codec(),
            _marker: PhantomData,
        }
    }
}

impl<T> Decoder for PostcardCodec<T>
where
    T: for<'de> Deserialize<'de>,
{
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = postcard::from_bytes(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T> Encoder<T> for PostcardCodec<T>
where
    T: Serialize,
{
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = postcard::to_allocvec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(bytes), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, PeerId, ProposalNumber, Value};

    fn peer(id: u8) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn roundtrip(frame: Frame) -> Frame {
        let mut codec = PostcardCodec::<Frame>::new();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn all_variants_roundtrip() {
        let n = ProposalNumber::new(3, peer(1));
        let prior = ProposalNumber::new(2, peer(2));
        let v = Value::new("Alice").unwrap();

        let frames = [
            Frame::Handshake { sender: peer(4) },
            Frame::Prepare { number: n, sender: peer(1) },
            Frame::Promise {
                number: n,
                sender: peer(2),
                accepted: None,
            },
            Frame::Promise {
                number: n,
                sender: peer(2),
                accepted: Some((prior, v.clone())),
            },
            Frame::Accept {
                number: n,
                value: v.clone(),
                sender: peer(1),
            },
            Frame::Accepted {
                number: n,
                value: v,
                sender: peer(3),
            },
            Frame::Reject {
                promised: prior,
                sender: peer(5),
            },
        ];

        for frame in frames {
            assert_eq!(roundtrip(frame.clone()), frame);
        }
    }

    #[test]
    fn partial_frame_decodes_to_none() {
        let mut codec = PostcardCodec::<Frame>::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::Handshake { sender: peer(1) }, &mut buf)
            .unwrap();

        // Withhold the last byte: the decoder must wait for more input.
        let last = buf.split_off(buf.len() - 1);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.unsplit(last);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn unknown_discriminant_is_invalid_data() {
        let mut inner = new_length_delimited_codec();
        let mut buf = BytesMut::new();
        // 0xFF is not a Frame variant tag.
        inner.encode(Bytes::from_static(&[0xFF, 0x01]), &mut buf).unwrap();

        let mut codec = PostcardCodec::<Frame>::new();
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_payload_is_invalid_data() {
        let mut codec = PostcardCodec::<Frame>::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame::Prepare {
                    number: ProposalNumber::new(1, peer(1)),
                    sender: peer(1),
                },
                &mut buf,
            )
            .unwrap();

        // Re-frame a truncated payload under a valid length prefix.
        let payload = buf.split_off(4);
        let mut inner = new_length_delimited_codec();
        let mut cut = BytesMut::new();
        inner
            .encode(Bytes::copy_from_slice(&payload[..payload.len() - 1]), &mut cut)
            .unwrap();

        let err = codec.decode(&mut cut).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
