use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistillError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("YAML error while {context}: {source}")]
    Yaml {
        context: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{context}: {message}")]
    Model {
        context: &'static str,
        message: String,
    },
    #[error("model '{model_type}' is not supported")]
    UnsupportedModel { model_type: String },
    #[error("checkpoint state mismatch while {context}: {message}")]
    StateMismatch {
        context: &'static str,
        message: String,
    },
    #[error("token id {id} is out of range for vocabulary of size {vocab_size}")]
    IdOutOfRange { id: i64, vocab_size: usize },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl DistillError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn yaml(context: &'static str, source: serde_yaml::Error) -> Self {
        Self::Yaml { context, source }
    }

    pub(crate) fn model(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Model {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn state_mismatch(context: &'static str, message: impl Into<String>) -> Self {
        Self::StateMismatch {
            context,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}
