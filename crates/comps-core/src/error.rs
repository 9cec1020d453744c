use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("vendor request failed: {0}")]
    Request(String),

    #[error("vendor returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("rate limited by vendor")]
    RateLimited,

    #[error("failed to decode vendor payload: {0}")]
    Decode(String),

    #[error("market client is shutting down")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SecError {
    #[error("SEC query failed: {0}")]
    Query(String),

    #[error("SEC provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}
