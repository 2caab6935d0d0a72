use std::{fmt, ops::Deref, sync::Arc};

use crate::config::Config;
use crate::enforcement::{EnforcementRequest, EnforcementService};
use tokio::sync::mpsc::Sender;
use tracing::error;

/// State shared by every command invocation
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

pub struct DataInner {
    pub config: Config,
    pub service: EnforcementService,
    /// Queue into the enforcement task
    pub requests: Sender<EnforcementRequest>,
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("control_guild_id", &self.config.control_guild_id)
            .field("exempt_guilds", &self.config.exempt_guilds.len())
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(
        config: Config,
        service: EnforcementService,
        requests: Sender<EnforcementRequest>,
    ) -> Self {
        Self(Arc::new(DataInner {
            config,
            service,
            requests,
        }))
    }

    /// Queue a request for the enforcement task; false if it has stopped
    pub async fn request(&self, request: EnforcementRequest) -> bool {
        match self.requests.send(request).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to queue enforcement request: {e}");
                false
            }
        }
    }
}
