use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidObjective {
        missing_weights: Vec<String>,
        missing_losses: Vec<String>,
        invalid_weights: Vec<String>,
    },
    InvalidOptimizerState {
        expected: &'static str,
        got: &'static str,
    },
    InvalidSchedulerState {
        expected: &'static str,
        got: &'static str,
    },
    InvalidInit(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidObjective {
                missing_weights,
                missing_losses,
                invalid_weights,
            } => {
                write!(f, "Invalid objective:")?;

                if !missing_weights.is_empty() {
                    write!(f, " losses without a weight {missing_weights:?};")?;
                }
                if !missing_losses.is_empty() {
                    write!(f, " weights without a loss {missing_losses:?};")?;
                }
                if !invalid_weights.is_empty() {
                    write!(f, " negative or non finite weights {invalid_weights:?};")?;
                }

                Ok(())
            }
            MlErr::InvalidOptimizerState { expected, got } => write!(
                f,
                "Can't restore a {got} optimizer state into a {expected} optimizer"
            ),
            MlErr::InvalidSchedulerState { expected, got } => write!(
                f,
                "Can't restore a {got} schedule state into a {expected} schedule"
            ),
            MlErr::InvalidInit(msg) => write!(f, "Failed to initialize parameters: {msg}"),
        }
    }
}

impl Error for MlErr {}
