use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("solver error: {0}")]
    Solver(#[from] SolverError),
    #[error("setup error: {0}")]
    Setup(#[from] SetupError),
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver returned unknown: {0}")]
    Unknown(String),
    #[error("no model available: {0}")]
    ModelUnavailable(String),
    #[error("model value not concretizable: {0}")]
    NonConcreteModelValue(String),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("contract index {0} is not loaded")]
    UnknownContract(usize),
    #[error("method {method_id} is not present in contract {contract}")]
    UnknownMethod { contract: usize, method_id: i64 },
    #[error("invalid routing scheme: {0}")]
    InvalidRouting(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
}
