use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::protocol::{read_frame, write_frame, Request, Response};
use super::{Queue, WorkerRegistry};
use crate::common::{JobMessage, ResultEnvelope};
use crate::error::{Error, Result};

/// One authenticated connection to a [`QueueServer`](super::QueueServer).
///
/// Requests on a session are answered in order, so concurrent callers take
/// turns on the stream.
pub struct QueueSession {
    addr: String,
    stream: Mutex<TcpStream>,
}

impl QueueSession {
    /// Connect and authenticate. Any failure is [`Error::QueueUnavailable`].
    pub async fn connect(addr: &str, secret: &str, connect_timeout: Duration) -> Result<Arc<Self>> {
        let unavailable = |reason: String| Error::QueueUnavailable {
            addr: addr.to_string(),
            reason,
        };

        let mut stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| unavailable(format!("no answer within {:?}", connect_timeout)))?
            .map_err(|e| unavailable(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| unavailable(e.to_string()))?;

        let hello = Request::Hello {
            secret: secret.to_string(),
        };
        write_frame(&mut stream, &hello)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let reply = timeout(connect_timeout, read_frame::<_, Response>(&mut stream))
            .await
            .map_err(|_| unavailable("handshake timed out".to_string()))?
            .map_err(|e| unavailable(e.to_string()))?;

        match reply {
            Some(Response::Welcome) => {
                tracing::info!(%addr, "Connected to queue server");
                Ok(Arc::new(Self {
                    addr: addr.to_string(),
                    stream: Mutex::new(stream),
                }))
            }
            Some(Response::Denied) => Err(unavailable("authentication rejected".to_string())),
            Some(other) => Err(unavailable(format!("unexpected handshake reply {:?}", other))),
            None => Err(unavailable("connection closed during handshake".to_string())),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn call(&self, request: Request) -> Result<Response> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &request).await?;
        match read_frame(&mut *stream).await? {
            Some(Response::Error(message)) => Err(Error::Protocol(message)),
            Some(response) => Ok(response),
            None => Err(Error::Protocol(format!(
                "queue server {} closed the connection",
                self.addr
            ))),
        }
    }

    pub fn job_queue(self: &Arc<Self>) -> RemoteQueue<JobMessage> {
        RemoteQueue::new(Arc::clone(self))
    }

    pub fn result_queue(self: &Arc<Self>) -> RemoteQueue<ResultEnvelope> {
        RemoteQueue::new(Arc::clone(self))
    }
}

#[async_trait]
impl WorkerRegistry for QueueSession {
    async fn register(&self, worker_id: &str) -> Result<()> {
        let request = Request::Register {
            worker_id: worker_id.to_string(),
        };
        expect_done(self.call(request).await?)
    }

    async fn deregister(&self, worker_id: &str) -> Result<()> {
        let request = Request::Deregister {
            worker_id: worker_id.to_string(),
        };
        expect_done(self.call(request).await?)
    }
}

fn expect_done(response: Response) -> Result<()> {
    match response {
        Response::Done => Ok(()),
        other => Err(Error::Protocol(format!("expected done, got {:?}", other))),
    }
}

/// Maps a queue item type onto the requests that move it.
pub trait Routed: Sized + Send + 'static {
    fn put_request(self) -> Request;
    fn get_request() -> Request;
    fn from_response(response: Response) -> Result<Option<Self>>;
}

impl Routed for JobMessage {
    fn put_request(self) -> Request {
        Request::PutJob(self)
    }

    fn get_request() -> Request {
        Request::TryGetJob
    }

    fn from_response(response: Response) -> Result<Option<Self>> {
        match response {
            Response::Job(job) => Ok(job),
            other => Err(Error::Protocol(format!("expected job, got {:?}", other))),
        }
    }
}

impl Routed for ResultEnvelope {
    fn put_request(self) -> Request {
        Request::PutResult(self)
    }

    fn get_request() -> Request {
        Request::TryGetResult
    }

    fn from_response(response: Response) -> Result<Option<Self>> {
        match response {
            Response::Result(result) => Ok(result),
            other => Err(Error::Protocol(format!("expected result, got {:?}", other))),
        }
    }
}

/// Typed view of one of the server's queues over a shared session.
pub struct RemoteQueue<T> {
    session: Arc<QueueSession>,
    _item: PhantomData<fn() -> T>,
}

impl<T> RemoteQueue<T> {
    fn new(session: Arc<QueueSession>) -> Self {
        Self {
            session,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Routed> Queue<T> for RemoteQueue<T> {
    async fn put(&self, item: T) -> Result<()> {
        expect_done(self.session.call(item.put_request()).await?)
    }

    async fn try_get(&self) -> Result<Option<T>> {
        T::from_response(self.session.call(T::get_request()).await?)
    }
}
