use hud_core::HudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse hook input: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] HudError),
}
