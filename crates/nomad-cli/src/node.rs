//! Opens the node a project directory describes.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use nomad_config::{ConfigLoader, NomadConfig, Paths, StorageBackend};
use nomad_server::{
    ChangeCoordinator, ConfigChangeApplicator, NomadServer, RuntimeConfig, SerializingNomadServer,
};
use nomad_storage::{FileStore, MemoryStore, StateStore};
use nomad_types::{Node, NodeContext};

pub type Store = Box<dyn StateStore>;

pub struct LocalNode {
    pub config: NomadConfig,
    pub server: Arc<SerializingNomadServer<Store>>,
}

impl LocalNode {
    pub fn open(project_dir: &Path) -> Result<Self> {
        if !Paths::is_initialized(project_dir) {
            anyhow::bail!(
                "No nomad.toml in {}. Run `nomad init` first.",
                project_dir.display()
            );
        }

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .context("Failed to load configuration")?;

        let store: Store = match config.storage.backend {
            StorageBackend::File => Box::new(
                FileStore::open_in(&config.node.data_dir, config.storage.sync_writes)
                    .with_context(|| {
                        format!("Failed to open node state in {}", config.node.data_dir.display())
                    })?,
            ),
            StorageBackend::Memory => Box::new(MemoryStore::new()),
        };

        let mut server = NomadServer::new(store).context("Failed to initialize node state")?;
        let runtime = RuntimeConfig::new(server.current_committed_config().cloned());
        server.set_applicator(Box::new(ConfigChangeApplicator::new(
            config.node.name.clone(),
            runtime,
        )));
        tracing::debug!(node = %config.node.name, backend = ?config.storage.backend, "opened node");

        Ok(Self {
            config,
            server: Arc::new(SerializingNomadServer::new(server)),
        })
    }

    /// The node as the cluster model describes it.
    pub fn node(&self) -> Node {
        Node::new(
            self.config.node.name.clone(),
            self.config.node.hostname.clone(),
            self.config.node.port,
        )
    }

    /// The configuration this node runs with: the committed one if any,
    /// otherwise the node alone.
    pub fn startup_config(&self) -> NodeContext {
        self.server
            .with_exclusive(|s| s.current_committed_config().cloned())
            .unwrap_or_else(|| NodeContext::alone(self.node()))
    }

    pub fn coordinator(&self) -> ChangeCoordinator<Store> {
        ChangeCoordinator::new(
            vec![Arc::clone(&self.server)],
            self.config.mutation.host.clone(),
            self.config.mutation.user.clone(),
        )
    }
}
