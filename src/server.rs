//! HTTP server setup and lifecycle management.
//!
//! Builds the immutable server context at startup and runs the accept loop,
//! one task per connection, with a header-read timeout so stalled clients
//! cannot pin resources.

use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::credentials::CredentialStore;
use crate::error::SandbarError;
use crate::filesystem::ObjectStore;
use crate::multipart::MultipartManager;
use crate::paths::PathResolver;
use crate::s3_handlers::{CorsConfig, S3Handler};

const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Main server struct holding configuration; all shared state is built in
/// `run` and injected into the handler context.
pub struct Server {
    bind_address: String,
    port: NonZeroU16,
    root_dir: PathBuf,
    credentials_dir: PathBuf,
    max_object_size: u64,
    cors: Option<CorsConfig>,
    verbose: bool,
}

impl Server {
    pub fn new(cli: Cli) -> Self {
        let cors = cli.cors.then(|| CorsConfig {
            allow_origin: cli.cors_allow_origin,
            ..CorsConfig::default()
        });
        Self {
            bind_address: cli.host,
            port: cli.port,
            root_dir: cli.root_dir,
            credentials_dir: cli.credentials_dir,
            max_object_size: cli.max_object_size,
            cors,
            verbose: cli.verbose,
        }
    }

    /// Create a server for tests, bound to an ephemeral port.
    pub async fn test_mode(
        root_dir: PathBuf,
        credentials_dir: PathBuf,
    ) -> Result<(Self, u16), SandbarError> {
        let host = "127.0.0.1".to_string();
        let listener = TcpListener::bind(format!("{host}:0")).await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let server = Server {
            bind_address: host,
            port: NonZeroU16::try_from(port).map_err(|_| {
                SandbarError::Configuration(format!("Failed to convert port '{port}'"))
            })?,
            root_dir,
            credentials_dir,
            max_object_size: 5 * 1024 * 1024 * 1024 * 1024,
            cors: Some(CorsConfig::default()),
            verbose: true,
        };
        Ok((server, port))
    }

    pub async fn run(self) -> Result<(), SandbarError> {
        let addr: SocketAddr = format!("{}:{}", self.bind_address, self.port).parse()?;

        let resolver = PathResolver::new(&self.root_dir)?;
        let store = Arc::new(ObjectStore::new(resolver));
        let multipart = Arc::new(MultipartManager::new(&self.root_dir));
        let credentials = Arc::new(CredentialStore::new(self.credentials_dir.clone())?);

        let handler = Arc::new(S3Handler::new(
            store,
            multipart,
            credentials,
            self.cors.clone(),
            self.max_object_size,
            self.verbose,
        ));

        info!(
            root_dir = ?self.root_dir,
            credentials_dir = ?self.credentials_dir,
            max_object_size = self.max_object_size,
            cors_enabled = self.cors.is_some(),
            address = %addr,
            "Starting sandbar..."
        );

        let listener = TcpListener::bind(addr).await?;

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            debug!(remote_addr = %remote_addr, "Accepted new connection");

            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(HEADER_READ_TIMEOUT)
                    .serve_connection(
                        io,
                        service_fn(move |req| {
                            let handler = Arc::clone(&handler);
                            async move { handler.handle_request(req).await }
                        }),
                    )
                    .await
                {
                    // Client disconnects and header timeouts land here
                    debug!(error = %err, remote_addr = %remote_addr, "Error serving connection");
                }
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("root_dir", &self.root_dir)
            .finish_non_exhaustive()
    }
}
