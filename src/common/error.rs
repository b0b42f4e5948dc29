use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RustSquadError {
    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Ensembles are not supported: expected 1 language model, got {0}")]
    EnsembleNotSupported(usize),

    #[error("Dictionary error: {0}")]
    DictionaryError(String),

    #[error("Value error: {0}")]
    ValueError(String),
}

impl From<std::io::Error> for RustSquadError {
    fn from(error: std::io::Error) -> Self {
        RustSquadError::IOError(error.to_string())
    }
}

impl From<TchError> for RustSquadError {
    fn from(error: TchError) -> Self {
        RustSquadError::TchError(error.to_string())
    }
}

impl From<serde_json::Error> for RustSquadError {
    fn from(error: serde_json::Error) -> Self {
        RustSquadError::InvalidConfigurationError(error.to_string())
    }
}
