//! Error types for PC/SC transport

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),
}

impl From<PcscError> for nexum_apdu_core::Error {
    fn from(error: PcscError) -> Self {
        match error {
            PcscError::Pcsc(pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard)
            | PcscError::NoCard(_) => Self::NotOpen,
            PcscError::NoReadersAvailable | PcscError::ReaderNotFound(_) => Self::ConnectionError,
            other => Self::DeviceError(other.to_string()),
        }
    }
}
