use thiserror::Error;

/// Errors raised by the ticket library.
///
/// Tampered or corrupt tickets are not errors: decoding them yields
/// `Ok(None)`. These variants cover caller mistakes and setup problems.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    /// The encoded ticket passed in was empty or longer than the maximum
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The crypto provider produced no output while protecting a ticket
    #[error("unable to encode the authentication ticket")]
    EncodeFailed,

    /// Key material could not be parsed or has the wrong size
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, TicketError>;
