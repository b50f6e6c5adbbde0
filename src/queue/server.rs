use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

use super::protocol::{read_frame, read_frame_limited, write_frame, Request, Response, HELLO_FRAME_LEN};
use super::{LiveWorkers, LocalQueue, Queue};
use crate::common::{JobMessage, ResultEnvelope};
use crate::error::{Error, Result};

/// How long a new connection has to present its secret.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves the job and result queues to remote clients.
pub struct QueueServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

struct Shared {
    secret: String,
    jobs: Arc<LocalQueue<JobMessage>>,
    results: Arc<LocalQueue<ResultEnvelope>>,
    workers: Arc<LiveWorkers>,
}

impl QueueServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, secret: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(Shared::new(secret.into()));
        tracing::info!(addr = %local_addr, "Queue server listening");

        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        Ok(Self {
            local_addr,
            shared,
            accept,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn jobs(&self) -> Arc<LocalQueue<JobMessage>> {
        Arc::clone(&self.shared.jobs)
    }

    pub fn results(&self) -> Arc<LocalQueue<ResultEnvelope>> {
        Arc::clone(&self.shared.results)
    }

    pub fn workers(&self) -> Arc<LiveWorkers> {
        Arc::clone(&self.shared.workers)
    }

    /// Stop accepting and drop every open connection.
    pub async fn shutdown(self) {
        self.accept.abort();
        let _ = self.accept.await;
        tracing::info!(addr = %self.local_addr, "Queue server stopped");
    }
}

impl Shared {
    fn new(secret: String) -> Self {
        Self {
            secret,
            jobs: Arc::new(LocalQueue::new()),
            results: Arc::new(LocalQueue::new()),
            workers: Arc::new(LiveWorkers::new()),
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    // dropping the set aborts every connection task
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(stream, peer, Arc::clone(&shared)));
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
            },
            Some(joined) = connections.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "Could not set TCP_NODELAY");
    }

    match handshake(&mut stream, &shared.secret, HANDSHAKE_TIMEOUT).await {
        Ok(true) => tracing::info!(%peer, "Client connected"),
        Ok(false) => {
            tracing::warn!(%peer, "Client failed authentication");
            return;
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "Handshake failed");
            return;
        }
    }

    let mut registered = HashSet::new();
    if let Err(e) = serve_requests(&mut stream, &shared, &mut registered).await {
        tracing::warn!(%peer, error = %e, "Connection closed with error");
    } else {
        tracing::info!(%peer, "Client disconnected");
    }

    // workers of a vanished client are no longer alive
    for worker_id in registered {
        if shared.workers.remove(&worker_id) {
            tracing::debug!(%peer, %worker_id, "Dropped registration of disconnected worker");
        }
    }
}

async fn handshake<S>(stream: &mut S, secret: &str, limit: Duration) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(limit, authenticate(stream, secret))
        .await
        .map_err(|_| Error::Protocol(format!("no hello within {:?}", limit)))?
}

async fn authenticate<S>(stream: &mut S, secret: &str) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let accepted = matches!(
        read_frame_limited::<_, Request>(stream, HELLO_FRAME_LEN).await?,
        Some(Request::Hello { secret: ref offered }) if offered == secret
    );
    let reply = if accepted {
        Response::Welcome
    } else {
        Response::Denied
    };
    write_frame(stream, &reply).await?;
    Ok(accepted)
}

async fn serve_requests<S>(
    stream: &mut S,
    shared: &Shared,
    registered: &mut HashSet<String>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(request) = read_frame::<_, Request>(stream).await? {
        let response = match handle(request, shared, registered).await {
            Ok(response) => response,
            Err(e) => Response::Error(e.to_string()),
        };
        if let Err(e) = write_frame(stream, &response).await {
            requeue(response, shared).await;
            return Err(e);
        }
    }
    Ok(())
}

/// Put back an item that was taken off a queue but never reached the client.
async fn requeue(response: Response, shared: &Shared) {
    let restored = match response {
        Response::Job(Some(job)) => shared.jobs.put(job).await,
        Response::Result(Some(result)) => shared.results.put(result).await,
        _ => return,
    };
    match restored {
        Ok(()) => tracing::warn!("Reply was not delivered, item put back on its queue"),
        Err(e) => tracing::error!(error = %e, "Could not put back an undelivered item"),
    }
}

async fn handle(
    request: Request,
    shared: &Shared,
    registered: &mut HashSet<String>,
) -> Result<Response> {
    Ok(match request {
        Request::Hello { .. } => Response::Error("already authenticated".to_string()),
        Request::PutJob(job) => {
            shared.jobs.put(job).await?;
            Response::Done
        }
        Request::TryGetJob => Response::Job(shared.jobs.try_get().await?),
        Request::PutResult(result) => {
            shared.results.put(result).await?;
            Response::Done
        }
        Request::TryGetResult => Response::Result(shared.results.try_get().await?),
        Request::Register { worker_id } => {
            shared.workers.insert(&worker_id);
            registered.insert(worker_id);
            Response::Done
        }
        Request::Deregister { worker_id } => {
            shared.workers.remove(&worker_id);
            registered.remove(&worker_id);
            Response::Done
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{JobEnvelope, Operation};
    use tokio::io::AsyncWriteExt;

    fn job() -> JobMessage {
        JobMessage::Job(JobEnvelope::new(0, 0, Operation::PHRED33, vec!["II".to_string()]))
    }

    #[tokio::test]
    async fn job_is_put_back_when_the_reply_cannot_be_written() {
        let shared = Shared::new("s".to_string());
        shared.jobs.put(job()).await.unwrap();

        let (mut server, mut client) = tokio::io::duplex(4096);
        write_frame(&mut client, &Request::TryGetJob).await.unwrap();
        drop(client);

        let mut registered = HashSet::new();
        let err = serve_requests(&mut server, &shared, &mut registered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(shared.jobs.len(), 1);
    }

    #[tokio::test]
    async fn silent_peer_times_out_in_handshake() {
        let (mut server, _client) = tokio::io::duplex(64);
        let err = handshake(&mut server, "s", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no hello"));
    }

    #[tokio::test]
    async fn oversized_hello_is_refused() {
        let (mut server, mut client) = tokio::io::duplex(64);
        client.write_u32(HELLO_FRAME_LEN + 1).await.unwrap();
        let err = handshake(&mut server, "s", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn right_secret_is_welcomed() {
        let (mut server, mut client) = tokio::io::duplex(1024);
        write_frame(
            &mut client,
            &Request::Hello {
                secret: "s".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(handshake(&mut server, "s", Duration::from_secs(1)).await.unwrap());
        let reply: Option<Response> = read_frame(&mut client).await.unwrap();
        assert_eq!(reply, Some(Response::Welcome));
    }
}
