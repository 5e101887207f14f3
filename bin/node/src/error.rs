use strand_config::StrandConfigError;

use crate::adapter::BoxError;
use crate::boot::StartupError;
use crate::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum NodeInitError {
    #[error(transparent)]
    Config(#[from] StrandConfigError),
    #[error("create outbound [{tag}]: {source}")]
    BuildOutbound { tag: String, source: BoxError },
    #[error("create outbound-provider [{tag}]: {source}")]
    BuildProvider {
        tag: String,
        source: ProviderError,
    },
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("start outbound-provider [{tag}]: {source}")]
    StartProvider { tag: String, source: BoxError },
}
