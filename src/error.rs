use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Pin {0} is already registered")]
    AlreadyRegistered(u32),
    #[error("Pin not found: {0}")]
    NotFound(u32),
    #[error("Resource error: {0}")]
    Resource(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Wait interrupted")]
    Interrupted,
}
