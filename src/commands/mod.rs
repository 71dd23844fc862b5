pub mod jobs;
pub mod serve;
pub mod sync;

use std::sync::Arc;

use calsync_core::remote::{Provider, RemoteCalendar};

use crate::config::AppConfig;

/// The remote calendar store named by the config.
fn remote(config: &AppConfig) -> Arc<dyn RemoteCalendar> {
    Arc::new(Provider::new(&config.provider, config.remote.clone()))
}
