use thiserror::Error;

/// Caller-visible failure modes of the router.
///
/// `Unroutable` and `Timeout` are recoverable: routing entry points report
/// them as a `false` result or unwind the in-progress route and keep the
/// last completed state. `Input` and `Rule` propagate to the API boundary.
/// `Invariant` indicates corruption and must abort the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    #[error("invalid board description: {0}")]
    Input(String),

    #[error("track violates net rules (legal_area={legal_area}, legal_rules={legal_rules})")]
    Rule { legal_area: bool, legal_rules: bool },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("no path between connection endpoints")]
    Unroutable,
}

pub type Result<T> = std::result::Result<T, RouteError>;

pub(crate) fn input_err<T>(msg: impl Into<String>) -> Result<T> {
    Err(RouteError::Input(msg.into()))
}

pub(crate) fn invariant_err<T>(msg: impl Into<String>) -> Result<T> {
    Err(RouteError::Invariant(msg.into()))
}
