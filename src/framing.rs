//! Length-prefixed message framing.
//!
//! Every message on the wire is a fixed-width text header followed by a
//! UTF-8 payload:
//!
//! ```text
//! Header:  <decimal byte length, left-justified, space padded to 64 bytes>
//! Payload: <exactly that many bytes>
//!
//! Example (header shown truncated):
//! "18                                 ..."{"action":"login"}
//! ```
//!
//! The header and payload of an outbound frame are assembled into a single
//! buffer so they always reach the socket in order.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the length header in bytes.
pub const HEADER_SIZE: usize = 64;

/// Default upper bound on a single payload (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Fill byte used to right-pad the header.
const PAD_BYTE: u8 = b' ';

/// Framing errors. All of them end the connection they occur on.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid frame header: {0:?}")]
    InvalidHeader(String),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("payload length {0} does not fit in a {width}-byte header", width = HEADER_SIZE)]
    HeaderOverflow(usize),

    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("connection closed in the middle of a frame")]
    UnexpectedEof,

    #[error("timed out waiting for a frame")]
    Timeout,
}

/// Encode a payload length as a padded header.
pub fn encode_header(length: usize) -> Result<[u8; HEADER_SIZE], FrameError> {
    let digits = length.to_string();
    // Unreachable while usize has at most 20 digits; kept for wider targets.
    if digits.len() > HEADER_SIZE {
        return Err(FrameError::HeaderOverflow(length));
    }
    let mut header = [PAD_BYTE; HEADER_SIZE];
    header[..digits.len()].copy_from_slice(digits.as_bytes());
    Ok(header)
}

/// Decode a header into the payload length it announces.
///
/// Trailing pad bytes (spaces or NULs) are ignored; whatever remains must be
/// a non-empty run of ASCII digits.
pub fn decode_header(header: &[u8]) -> Result<usize, FrameError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| FrameError::InvalidHeader(String::from_utf8_lossy(header).into_owned()))?;
    let digits = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidHeader(text.to_string()));
    }

    digits
        .parse()
        .map_err(|_| FrameError::InvalidHeader(text.to_string()))
}

/// Assemble a complete frame (header followed by payload).
pub fn encode_frame(payload: &str) -> Result<BytesMut, FrameError> {
    let header = encode_header(payload.len())?;
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&header);
    frame.put_slice(payload.as_bytes());
    Ok(frame)
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before sending
/// any header byte. A stream that ends anywhere else inside a frame is an
/// [`FrameError::UnexpectedEof`].
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;

    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::UnexpectedEof);
        }
        filled += n;
    }

    let length = decode_header(&header)?;
    if length > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            length,
            limit: max_frame_size,
        });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::UnexpectedEof
        } else {
            FrameError::Io(e)
        }
    })?;

    Ok(Some(String::from_utf8(payload)?))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn header(length: usize) -> Vec<u8> {
        let mut header = length.to_string().into_bytes();
        header.resize(HEADER_SIZE, b' ');
        header
    }

    #[test]
    fn test_encode_header_pads_to_width() {
        let header = encode_header(42).unwrap();
        assert_eq!(header.len(), HEADER_SIZE);
        assert_eq!(&header[..2], b"42");
        assert!(header[2..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_decode_header() {
        assert_eq!(decode_header(&header(1234)).unwrap(), 1234);

        let mut nul_padded = b"17".to_vec();
        nul_padded.resize(HEADER_SIZE, 0);
        assert_eq!(decode_header(&nul_padded).unwrap(), 17);
    }

    #[test]
    fn test_decode_header_rejects_garbage() {
        let mut bad = b"12ab".to_vec();
        bad.resize(HEADER_SIZE, b' ');
        assert!(matches!(decode_header(&bad), Err(FrameError::InvalidHeader(_))));

        let blank = vec![b' '; HEADER_SIZE];
        assert!(matches!(decode_header(&blank), Err(FrameError::InvalidHeader(_))));
    }

    #[test]
    fn test_decode_header_rejects_length_beyond_usize() {
        let all_digits = vec![b'9'; HEADER_SIZE];
        assert!(matches!(
            decode_header(&all_digits),
            Err(FrameError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_encode_frame_counts_bytes_not_chars() {
        let frame = encode_frame("café").unwrap();
        assert_eq!(decode_header(&frame[..HEADER_SIZE]).unwrap(), 5);
        assert_eq!(&frame[HEADER_SIZE..], "café".as_bytes());
    }

    #[tokio::test]
    async fn test_read_frame() {
        let mut mock = Builder::new()
            .read(&header(8))
            .read(b"Get Menu")
            .build();

        let payload = read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(payload.as_deref(), Some("Get Menu"));
    }

    #[tokio::test]
    async fn test_read_frame_split_header() {
        let full = header(2);
        let mut mock = Builder::new()
            .read(&full[..10])
            .read(&full[10..])
            .read(b"[]")
            .build();

        let payload = read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(payload.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let mut mock = Builder::new().build();
        assert!(read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_read_frame_eof_inside_header() {
        let mut mock = Builder::new().read(b"12  ").build();
        let result = read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(FrameError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_read_frame_eof_inside_payload() {
        let mut mock = Builder::new().read(&header(10)).read(b"short").build();
        let result = read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(FrameError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_read_frame_too_large() {
        let mut mock = Builder::new().read(&header(4096)).build();
        let result = read_frame(&mut mock, 1024).await;
        assert!(matches!(
            result,
            Err(FrameError::FrameTooLarge {
                length: 4096,
                limit: 1024
            })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_invalid_utf8() {
        let mut mock = Builder::new()
            .read(&header(2))
            .read(&[0xff, 0xfe])
            .build();
        let result = read_frame(&mut mock, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(FrameError::InvalidUtf8(_))));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let mut expected = header(11);
        expected.extend_from_slice(b"!DISCONNECT");
        let mut mock = Builder::new().write(&expected).build();

        write_frame(&mut mock, "!DISCONNECT").await.unwrap();
    }
}
