#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },

    /// Opening or configuring an endpoint failed before the run started.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Route configuration rejected by validation.
    #[error("Invalid route config: {0}")]
    Config(String),

    /// Reading from the route source failed; terminates the run.
    #[error("source read failed: {0}")]
    TransportRead(#[source] std::io::Error),

    /// Writing to the route sink failed; terminates the run.
    #[error("sink write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// A pipeline thread could not be started or panicked.
    #[error("pipeline thread failure: {0}")]
    Thread(String),
}

pub type Result<T> = std::result::Result<T, Error>;
