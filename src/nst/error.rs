#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("NST_PARAM_ERROR: unknown parameter {0}")]
    UnknownKey(String),

    #[error("NST_PARAM_ERROR: invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("NST_PRECONDITION_ERROR: {0}")]
    Precondition(&'static str),

    #[error("NST_BUSY")]
    Busy,

    #[error("NST_RADIO_ERROR: {0}")]
    RadioFault(String),
}
