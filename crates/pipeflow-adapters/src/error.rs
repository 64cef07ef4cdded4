use pipeflow_core::errors::ConfigError;
use pipeflow_core::StageKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("stage '{stage}': invalid params: {source}")]
    Params {
        stage: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("stage '{stage}': kind '{kind}' has no built-in implementation")]
    UnsupportedKind { stage: String, kind: StageKind },
}
