use thiserror::Error;

pub type Result<T, E = DemError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum DemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML read error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("{path}: malformed DEM file: {reason}")]
    MalformedInput { path: String, reason: String },

    #[error("{path}: extent mismatch: {detail}")]
    ExtentMismatch { path: String, detail: String },

    #[error("mesh code must look like 9999-99: {0}")]
    InvalidMeshFilter(String),

    #[error("no DEM10 file found for requested mesh {0}")]
    MissingDem10(String),

    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl DemError {
    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        DemError::MalformedInput {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn extent(path: &str, detail: impl Into<String>) -> Self {
        DemError::ExtentMismatch {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}
