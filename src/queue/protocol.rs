//! Wire format between queue clients and the queue server.
//!
//! Every frame is a big-endian `u32` length followed by that many bytes of
//! JSON. A connection starts with [`Request::Hello`] carrying the shared
//! secret; the server answers [`Response::Welcome`] or [`Response::Denied`]
//! and then serves one response per request, in order.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{JobMessage, ResultEnvelope};
use crate::error::{Error, Result};

/// Frames above this size are refused.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Largest job or result that still fits in a frame once wrapped in its
/// request or response.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN as usize - 512;

/// Cap on the first frame of a connection, read before authentication.
pub const HELLO_FRAME_LEN: u32 = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
pub enum Request {
    Hello { secret: String },
    PutJob(JobMessage),
    TryGetJob,
    PutResult(ResultEnvelope),
    TryGetResult,
    Register { worker_id: String },
    Deregister { worker_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
pub enum Response {
    Welcome,
    Denied,
    Done,
    Job(Option<JobMessage>),
    Result(Option<ResultEnvelope>),
    Error(String),
}

pub async fn write_frame<W, M>(writer: &mut W, message: &M) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| Error::Protocol(format!("frame of {} bytes is too large", body.len())))?;

    writer.write_u32(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` when the peer closed the connection cleanly
/// between frames.
pub async fn read_frame<R, M>(reader: &mut R) -> Result<Option<M>>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    read_frame_limited(reader, MAX_FRAME_LEN).await
}

/// [`read_frame`] with a tighter size cap, checked before allocating.
pub async fn read_frame_limited<R, M>(reader: &mut R, limit: u32) -> Result<Option<M>>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > limit {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, limit
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// JSON size of `message` without buffering it.
pub fn encoded_len<M: Serialize>(message: &M) -> Result<usize> {
    let mut counter = ByteCounter(0);
    serde_json::to_writer(&mut counter, message)?;
    Ok(counter.0)
}

struct ByteCounter(usize);

impl std::io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{JobEnvelope, Operation};

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let job = JobEnvelope::new(1, 2, Operation::PHRED33, vec!["II".to_string()]);
        write_frame(&mut a, &Request::PutJob(JobMessage::Job(job.clone())))
            .await
            .unwrap();
        write_frame(&mut a, &Request::TryGetJob).await.unwrap();
        drop(a);

        let first: Option<Request> = read_frame(&mut b).await.unwrap();
        assert_eq!(first, Some(Request::PutJob(JobMessage::Job(job))));
        let second: Option<Request> = read_frame(&mut b).await.unwrap();
        assert_eq!(second, Some(Request::TryGetJob));
        let eof: Option<Request> = read_frame(&mut b).await.unwrap();
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(MAX_FRAME_LEN + 1).await.unwrap();
        let err = read_frame::<_, Request>(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn limited_read_refuses_before_allocating() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(HELLO_FRAME_LEN + 1).await.unwrap();
        let err = read_frame_limited::<_, Request>(&mut b, HELLO_FRAME_LEN)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn encoded_len_matches_serialized_size() {
        let job = JobMessage::Job(JobEnvelope::new(0, 0, Operation::PHRED33, vec!["I\"\\".into()]));
        assert_eq!(
            encoded_len(&job).unwrap(),
            serde_json::to_vec(&job).unwrap().len()
        );
    }

    #[tokio::test]
    async fn garbage_body_is_a_json_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(3).await.unwrap();
        a.write_all(b"{x}").await.unwrap();
        let err = read_frame::<_, Request>(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
