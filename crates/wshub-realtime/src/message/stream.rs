//! Reading a bounded amount of data from a source stream.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::error::RegistryError;

/// Reads up to `length` bytes from `stream` in chunks of `chunk_size`.
///
/// Stops early at end of stream. Returns whatever was read.
pub async fn read_up_to<R>(
    stream: &mut R,
    length: usize,
    chunk_size: usize,
) -> Result<Bytes, std::io::Error>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut buf = BytesMut::with_capacity(length);
    let mut chunk = vec![0u8; chunk_size.min(length.max(1))];

    while buf.len() < length {
        let want = (length - buf.len()).min(chunk.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(buf.freeze())
}

/// Reads exactly the data a stream send should deliver.
///
/// Zero bytes aborts with [`RegistryError::EmptyRead`]; a short read logs a
/// warning and returns the partial data.
pub async fn read_for_send<R>(
    stream: &mut R,
    length: usize,
    chunk_size: usize,
) -> Result<Bytes, RegistryError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if length == 0 {
        return Err(RegistryError::invalid("stream length must be greater than zero"));
    }

    let data = read_up_to(stream, length, chunk_size).await?;

    if data.is_empty() {
        return Err(RegistryError::EmptyRead);
    }

    if data.len() < length {
        let partial = RegistryError::PartialRead {
            read: data.len(),
            requested: length,
        };
        warn!(read = data.len(), requested = length, "{partial}");
    }

    Ok(data)
}
