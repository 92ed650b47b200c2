//! Transports carrying [`ReviewRequest`]s to a [`ReviewService`].
//!
//! The loopback transport posts each request as JSON to an axum route and
//! reads back a serialized [`RpcResult`], so a failure arrives as a
//! [`Status`] with the same code an in-process caller would see.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::runtime::{self, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::api::{
    Commit, ReviewRequest, ReviewResponse, RpcResult, Status, StatusCode, TextDiff, WorkspaceInfo,
};
use crate::service::{ReviewService, INTERNAL_MESSAGE};
use crate::{Error, Result};

/// Something that can deliver a request and return the service's reply.
pub trait ReviewTransport: Send + Sync {
    /// Issue one call.
    ///
    /// # Errors
    ///
    /// The service's [`Status`], or [`StatusCode::Unavailable`] when the
    /// transport itself failed.
    fn call(&self, request: ReviewRequest) -> RpcResult;
}

/// Direct calls into a service living in the same process.
#[derive(Debug, Clone)]
pub struct InProcessChannel {
    service: Arc<ReviewService>,
}

impl InProcessChannel {
    /// Channel to `service`.
    #[must_use]
    pub const fn new(service: Arc<ReviewService>) -> Self {
        Self { service }
    }
}

impl ReviewTransport for InProcessChannel {
    fn call(&self, request: ReviewRequest) -> RpcResult {
        self.service.handle(request)
    }
}

/// Route every request is posted to.
pub const RPC_PATH: &str = "/rpc";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// HTTP server bound to `127.0.0.1`, answering JSON requests on [`RPC_PATH`].
///
/// The server owns its tokio runtime. Handlers run each request on the
/// blocking pool, so calls on different workspaces proceed in parallel while
/// calls on one workspace queue on its path lock inside the service.
#[derive(Debug)]
pub struct LoopbackServer {
    address: SocketAddr,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
    runtime: Option<Runtime>,
}

impl LoopbackServer {
    /// Bind `127.0.0.1:port` (0 picks a free port) and start serving.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] if the runtime cannot start or the socket cannot
    /// be bound.
    pub fn bind(service: Arc<ReviewService>, port: u16) -> Result<Self> {
        let requested = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let transport = |source| Error::Transport {
            address: requested.to_string(),
            source,
        };

        let runtime = runtime::Builder::new_multi_thread()
            .thread_name("workbench-rpc")
            .enable_all()
            .build()
            .map_err(transport)?;
        let listener = runtime
            .block_on(TcpListener::bind(requested))
            .map_err(transport)?;
        let address = listener.local_addr().map_err(transport)?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let app = router(service);
        let server = runtime.spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(err) = served {
                warn!(error = %err, "review server failed");
            }
        });

        info!(%address, "review service listening");
        Ok(Self {
            address,
            shutdown,
            server: Some(server),
            runtime: Some(runtime),
        })
    }

    /// Address the server is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Block until the server exits.
    pub fn wait(mut self) {
        if let (Some(runtime), Some(server)) = (self.runtime.as_ref(), self.server.take()) {
            if let Err(err) = runtime.block_on(server) {
                warn!(error = %err, "review server task failed");
            }
        }
    }

    /// Stop accepting requests and let in-flight ones finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            match runtime.block_on(tokio::time::timeout(SHUTDOWN_GRACE, server)) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "review server task failed"),
                Err(_) => warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "review server did not drain in time"
                ),
            }
        }
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        info!(address = %self.address, "review service stopped");
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn router(service: Arc<ReviewService>) -> Router {
    Router::new()
        .route(RPC_PATH, post(handle_rpc))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn handle_rpc(State(service): State<Arc<ReviewService>>, body: Bytes) -> Json<RpcResult> {
    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(status) => return Json(Err(status)),
    };
    let method = request.method();
    // Repository calls block on git and the path locks.
    let reply = tokio::task::spawn_blocking(move || service.handle(request))
        .await
        .unwrap_or_else(|err| {
            warn!(method, error = %err, "request handler panicked");
            Err(Status::internal(INTERNAL_MESSAGE))
        });
    Json(reply)
}

fn decode_request(body: &[u8]) -> std::result::Result<ReviewRequest, Status> {
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "rejecting malformed request");
        Status::new(
            StatusCode::InvalidArgument,
            format!("malformed request: {err}"),
        )
    })
}

/// Client side of a [`LoopbackServer`].
///
/// Requests go through a pooled HTTP client, so one channel may be shared by
/// threads issuing calls in parallel.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    address: SocketAddr,
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpChannel {
    /// Channel to a server at `address`. Connections open on first use.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the HTTP client cannot be built.
    pub fn connect(address: SocketAddr) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|source| Error::Http {
                address: address.to_string(),
                source,
            })?;
        Ok(Self {
            address,
            endpoint: format!("http://{address}{RPC_PATH}"),
            client,
        })
    }

    /// Address of the server.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.address
    }
}

impl ReviewTransport for HttpChannel {
    fn call(&self, request: ReviewRequest) -> RpcResult {
        let unavailable =
            |err: reqwest::Error| Status::unavailable(format!("{}: {err}", self.address));

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(unavailable)?;
        response
            .json::<RpcResult>()
            .map_err(|err| Status::unavailable(format!("malformed reply: {err}")))?
    }
}

/// Blocking, typed stub over any [`ReviewTransport`].
#[derive(Debug)]
pub struct ReviewClient<T> {
    transport: T,
}

impl ReviewClient<InProcessChannel> {
    /// Client calling `service` directly.
    #[must_use]
    pub const fn in_process(service: Arc<ReviewService>) -> Self {
        Self::new(InProcessChannel::new(service))
    }
}

impl ReviewClient<HttpChannel> {
    /// Client for a loopback server.
    ///
    /// # Errors
    ///
    /// See [`HttpChannel::connect`].
    pub fn connect(address: SocketAddr) -> Result<Self> {
        HttpChannel::connect(address).map(Self::new)
    }
}

impl<T: ReviewTransport> ReviewClient<T> {
    /// Wrap a transport.
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a raw request.
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn call(&self, request: ReviewRequest) -> RpcResult {
        self.transport.call(request)
    }

    /// See [`ReviewService::get_uncommitted_files`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn get_uncommitted_files(&self, workspace: &str) -> std::result::Result<Vec<String>, Status> {
        match self.call(ReviewRequest::GetUncommittedFiles {
            workspace: workspace.to_owned(),
        })? {
            ReviewResponse::UncommittedFiles { paths } => Ok(paths),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::get_diff`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn get_diff(
        &self,
        workspace: &str,
        path: &str,
        revision_a: &str,
        revision_b: Option<&str>,
    ) -> std::result::Result<TextDiff, Status> {
        match self.call(ReviewRequest::GetDiff {
            workspace: workspace.to_owned(),
            path: path.to_owned(),
            revision_a: revision_a.to_owned(),
            revision_b: revision_b.map(str::to_owned),
        })? {
            ReviewResponse::Diff { diff } => Ok(diff),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::commit`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn commit(
        &self,
        workspace: &str,
        paths: &[&str],
        message: &str,
    ) -> std::result::Result<Commit, Status> {
        match self.call(ReviewRequest::Commit {
            workspace: workspace.to_owned(),
            paths: paths.iter().map(|path| (*path).to_owned()).collect(),
            message: message.to_owned(),
        })? {
            ReviewResponse::Commit { commit } => Ok(commit),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::get_file`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn get_file(
        &self,
        workspace: &str,
        path: &str,
        revision: Option<&str>,
    ) -> std::result::Result<String, Status> {
        match self.call(ReviewRequest::GetFile {
            workspace: workspace.to_owned(),
            path: path.to_owned(),
            revision: revision.map(str::to_owned),
        })? {
            ReviewResponse::File { content } => Ok(content),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::get_commits`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn get_commits(
        &self,
        workspace: &str,
        limit: Option<usize>,
    ) -> std::result::Result<Vec<Commit>, Status> {
        match self.call(ReviewRequest::GetCommits {
            workspace: workspace.to_owned(),
            limit,
        })? {
            ReviewResponse::Commits { commits } => Ok(commits),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::get_head_commit`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn get_head_commit(&self, workspace: &str) -> std::result::Result<Option<String>, Status> {
        match self.call(ReviewRequest::GetHeadCommit {
            workspace: workspace.to_owned(),
        })? {
            ReviewResponse::HeadCommit { id } => Ok(id),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::create_workspace`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn create_workspace(&self, name: &str) -> std::result::Result<WorkspaceInfo, Status> {
        match self.call(ReviewRequest::CreateWorkspace {
            name: name.to_owned(),
        })? {
            ReviewResponse::Workspace { workspace } => Ok(workspace),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::delete_workspace`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn delete_workspace(&self, name: &str) -> std::result::Result<(), Status> {
        match self.call(ReviewRequest::DeleteWorkspace {
            name: name.to_owned(),
        })? {
            ReviewResponse::Deleted { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// See [`ReviewService::list_workspaces`].
    ///
    /// # Errors
    ///
    /// The [`Status`] returned by the service or the transport.
    pub fn list_workspaces(&self) -> std::result::Result<Vec<WorkspaceInfo>, Status> {
        match self.call(ReviewRequest::ListWorkspaces)? {
            ReviewResponse::Workspaces { workspaces } => Ok(workspaces),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &ReviewResponse) -> Status {
    Status::internal(format!("unexpected response: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_requests_decode() {
        let body = serde_json::to_vec(&ReviewRequest::GetHeadCommit {
            workspace: "ws1".to_owned(),
        })
        .expect("encode");
        assert_eq!(
            decode_request(&body),
            Ok(ReviewRequest::GetHeadCommit {
                workspace: "ws1".to_owned(),
            })
        );
    }

    #[test]
    fn malformed_requests_are_invalid_arguments() {
        for body in [&b"not json"[..], b"{\"method\":\"no_such_method\"}", b""] {
            let status = decode_request(body).expect_err("malformed");
            assert_eq!(status.code, StatusCode::InvalidArgument);
            assert!(status.message.starts_with("malformed request"));
        }
    }

    #[test]
    fn endpoint_targets_the_rpc_route() -> Result<()> {
        let channel = HttpChannel::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, 4242)))?;
        assert_eq!(channel.endpoint, "http://127.0.0.1:4242/rpc");
        Ok(())
    }
}
