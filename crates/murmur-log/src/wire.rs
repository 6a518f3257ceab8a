//! Replication wire protocol.
//!
//! Every frame is a bincode-encoded [`Frame`] preceded by its length as a
//! big-endian `u32`. Frames larger than the configured limit are refused
//! in both directions.

use crate::error::{LogError, LogResult};
use crate::log::DiscoveryKey;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encoded size of an [`Frame::Entry`] around its payload: variant tag,
/// discovery key, position and payload length
pub const ENTRY_FRAME_OVERHEAD: usize = 4 + 32 + 8 + 8;

/// Largest entry payload that fits a frame of `max_frame_size` bytes
#[must_use]
pub fn max_entry_size(max_frame_size: usize) -> usize {
    max_frame_size.saturating_sub(ENTRY_FRAME_OVERHEAD)
}

/// Replication frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame on a stream: the rendezvous both peers join plus
    /// opaque user data
    Handshake {
        /// Discovery key of the rendezvous log
        discovery_key: DiscoveryKey,
        /// Application payload carried alongside the handshake
        user_data: Vec<u8>,
    },

    /// Ask the remote owner of a log to stream entries from `from` onward
    Want {
        /// Discovery key of the wanted log
        discovery_key: DiscoveryKey,
        /// First position wanted
        from: u64,
    },

    /// One log entry
    Entry {
        /// Discovery key of the log the entry belongs to
        discovery_key: DiscoveryKey,
        /// Position of the entry
        position: u64,
        /// Entry payload
        data: Vec<u8>,
    },
}

impl Frame {
    /// Serialize frame to bytes
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> LogResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LogError::Serialization(e.to_string()))
    }

    /// Deserialize frame from bytes
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Serialization`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> LogResult<Self> {
        bincode::deserialize(bytes).map_err(|e| LogError::Serialization(e.to_string()))
    }

    /// Get the frame type name
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Handshake { .. } => "Handshake",
            Frame::Want { .. } => "Want",
            Frame::Entry { .. } => "Entry",
        }
    }
}

/// Write one length-prefixed frame.
///
/// # Errors
///
/// Returns [`LogError::FrameTooLarge`] if the encoded frame exceeds
/// `max_frame_size`, or an I/O error from the writer.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_frame_size: usize) -> LogResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = frame.to_bytes()?;
    if bytes.len() > max_frame_size {
        return Err(LogError::FrameTooLarge {
            size: bytes.len(),
            limit: max_frame_size,
        });
    }
    let len = u32::try_from(bytes.len()).map_err(|_| LogError::FrameTooLarge {
        size: bytes.len(),
        limit: u32::MAX as usize,
    })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the stream ends cleanly between frames.
///
/// # Errors
///
/// Returns [`LogError::FrameTooLarge`] if the announced length exceeds
/// `max_frame_size`, [`LogError::Serialization`] on a malformed frame, or
/// an I/O error (including EOF in the middle of a frame).
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> LogResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_be_bytes(len) as usize;
    if size > max_frame_size {
        return Err(LogError::FrameTooLarge {
            size,
            limit: max_frame_size,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Frame::from_bytes(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_a_pipe_in_order() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let frames = vec![
            Frame::Handshake {
                discovery_key: [1; 32],
                user_data: vec![9; 72],
            },
            Frame::Want {
                discovery_key: [2; 32],
                from: 0,
            },
            Frame::Entry {
                discovery_key: [2; 32],
                position: 0,
                data: b"hello".to_vec(),
            },
        ];

        for frame in &frames {
            write_frame(&mut a, frame, 4096).await.unwrap();
        }
        drop(a);

        for frame in &frames {
            assert_eq!(read_frame(&mut b, 4096).await.unwrap().as_ref(), Some(frame));
        }
        assert!(read_frame(&mut b, 4096).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_refused_on_write() {
        let (mut a, _b) = tokio::io::duplex(1024);
        let frame = Frame::Entry {
            discovery_key: [0; 32],
            position: 0,
            data: vec![0; 256],
        };

        assert!(matches!(
            write_frame(&mut a, &frame, 64).await,
            Err(LogError::FrameTooLarge { limit: 64, .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_refused_on_read() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        assert!(matches!(
            read_frame(&mut b, 1024).await,
            Err(LogError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&16u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0u8; 4]).await.unwrap();
        drop(a);

        assert!(matches!(read_frame(&mut b, 1024).await, Err(LogError::Io(_))));
    }

    #[tokio::test]
    async fn test_largest_entry_fits_exactly() {
        let limit = 4096;
        let (mut a, mut b) = tokio::io::duplex(2 * limit);

        let fits = Frame::Entry {
            discovery_key: [4; 32],
            position: u64::MAX,
            data: vec![1; max_entry_size(limit)],
        };
        assert_eq!(fits.to_bytes().unwrap().len(), limit);
        write_frame(&mut a, &fits, limit).await.unwrap();
        assert_eq!(read_frame(&mut b, limit).await.unwrap(), Some(fits));

        let over = Frame::Entry {
            discovery_key: [4; 32],
            position: 0,
            data: vec![1; max_entry_size(limit) + 1],
        };
        assert!(matches!(
            write_frame(&mut a, &over, limit).await,
            Err(LogError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_kind() {
        let frame = Frame::Want {
            discovery_key: [0; 32],
            from: 3,
        };
        assert_eq!(frame.kind(), "Want");
        assert!(Frame::from_bytes(&[0xFF; 3]).is_err());
    }
}
