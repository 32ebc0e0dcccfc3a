use std::fmt::Debug;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::ClientConfig;
use crate::Codec;
use crate::Error;
use crate::HistoryClient;
use crate::Result;
use crate::Transport;

/// Collaborators and configuration shared by every channel of one connection.
#[derive(Clone)]
pub struct ChannelContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) history: Arc<dyn HistoryClient>,
    pub(crate) config: Arc<ClientConfig>,
    /// Runtime the channel timers are spawned on
    pub(crate) runtime: Handle,
}

impl Debug for ChannelContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChannelContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChannelContext {
    /// Builds a context on the current tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        history: Arc<dyn HistoryClient>,
        config: ClientConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        Self::with_runtime(transport, codec, history, config, runtime)
    }

    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        history: Arc<dyn HistoryClient>,
        config: ClientConfig,
        runtime: Handle,
    ) -> Result<Self> {
        let config = config.validate()?;
        Ok(Self {
            transport,
            codec,
            history,
            config: Arc::new(config),
            runtime,
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }
}
