//! Common test utilities for integration tests.

pub mod fixtures;

use statestore::client::RemoteStore;
use statestore::config::{RemoteConfig, ServiceConfig};
use statestore::service::{router, serve, ServiceState};
use statestore::shutdown::ShutdownCoordinator;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

pub use fixtures::*;

/// Find an available port for testing. Nothing listens on it afterwards.
pub fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port");
    listener.local_addr().unwrap().port()
}

/// Reference service running inside the test runtime.
pub struct TestService {
    pub addr: SocketAddr,
    pub prefix: String,
    pub state: Arc<ServiceState>,
    coordinator: ShutdownCoordinator,
}

impl TestService {
    pub async fn start() -> Self {
        Self::start_with_prefix("/api").await
    }

    pub async fn start_with_prefix(prefix: &str) -> Self {
        let config = ServiceConfig {
            api_prefix: prefix.to_string(),
            ..ServiceConfig::default()
        };
        let state = Arc::new(ServiceState::new(&config));
        let app = router(state.clone(), prefix);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind service listener");
        let addr = listener.local_addr().unwrap();

        let coordinator = ShutdownCoordinator::new();
        tokio::spawn(serve(listener, app, coordinator.signal()));

        Self {
            addr,
            prefix: prefix.to_string(),
            state,
            coordinator,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of an API route, for raw HTTP checks.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.endpoint(), self.prefix, path)
    }

    /// Client pointed at this service.
    pub fn store(&self) -> RemoteStore {
        RemoteStore::from_config(&RemoteConfig {
            endpoint: self.endpoint(),
            api_prefix: self.prefix.clone(),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            ..RemoteConfig::default()
        })
        .expect("Failed to build client")
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self.coordinator.shutdown();
    }
}

/// Serve an arbitrary router on a free local port.
pub async fn spawn_router(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}
