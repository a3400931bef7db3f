use playlink_proto::MAX_SIGNALING_FRAME;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Signaling frames: a 4-byte big-endian length followed by one JSON message.
pub fn signaling_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_SIGNALING_FRAME)
        .new_codec()
}

pub fn framed<S>(stream: S) -> Framed<S, LengthDelimitedCodec>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite,
{
    Framed::new(stream, signaling_codec())
}
