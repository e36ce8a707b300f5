use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::handle_connection;
use crate::store::backend::{Backend, JsonFileBackend, MemoryBackend};
use crate::store::VehicleStore;

/// Store type the server runs on; the backend is picked from configuration.
pub type SharedStore = VehicleStore<Box<dyn Backend>>;

pub struct Server {
    listener: TcpListener,
    store: Arc<SharedStore>,
}

impl Server {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let backend: Box<dyn Backend> = if config.storage.persist {
            Box::new(JsonFileBackend::open(config.storage.snapshot_path()).await?)
        } else {
            info!("persistence disabled, vehicles are kept in memory");
            Box::new(MemoryBackend::new())
        };

        let store = VehicleStore::new(backend);
        Self::with_store(&config.server.address, config.server.port, store).await
    }

    pub async fn with_store(address: &str, port: u16, store: SharedStore) -> Result<Self> {
        let listener = TcpListener::bind((address, port)).await?;
        info!(addr = %listener.local_addr()?, "listening");

        Ok(Self {
            listener,
            store: Arc::new(store),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<SharedStore> {
        Arc::clone(&self.store)
    }

    pub async fn start(&self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            let store = Arc::clone(&self.store);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, &store).await {
                                    warn!(%peer, error = %e, "connection error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept error");
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("ctrl+c pressed, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
