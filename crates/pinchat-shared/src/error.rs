use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("PIN must be exactly {expected} digits, got {actual} characters")]
    WrongLength { expected: usize, actual: usize },

    #[error("PIN must contain only ASCII digits")]
    NonDigit,
}
