use thiserror::Error;

/// Failures raised by the persistence layer. Handlers surface these to the
/// actor as a generic notice; the session is never advanced past a failed
/// write.
#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub(crate) enum AssetError {
    #[error("asset io: {0}")]
    Io(#[from] std::io::Error),
}

/// One failed delivery attempt. Carries the transport's error detail for the
/// log; the initiating admin only ever sees the aggregate count.
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct SendError(pub(crate) String);

#[derive(Debug, Error)]
pub(crate) enum WizardError {
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("asset failure: {0}")]
    Asset(#[from] AssetError),
    #[error("payload encoding: {0}")]
    Codec(#[from] serde_json::Error),
}
