//! Error type shared by the store, the forms and the view layer.

/// Everything that can go wrong below the HTTP boundary.
///
/// Views turn these into `500` responses; they are never shown to clients
/// verbatim.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("the {0} could not be saved because the data didn't validate")]
    InvalidForm(String),

    #[error("model `{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("model `{0}` is not registered")]
    NotRegistered(String),

    #[error("no URL named `{0}`")]
    NoReverseMatch(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
