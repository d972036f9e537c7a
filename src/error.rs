use std::fmt;

#[derive(Debug)]
pub enum InkspreadError {
    InvalidConfiguration(String),
    Asset(String),
    Raster(String),
    Pdf(String),
    Io(std::io::Error),
}

impl fmt::Display for InkspreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InkspreadError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            InkspreadError::Asset(message) => write!(f, "asset error: {}", message),
            InkspreadError::Raster(message) => write!(f, "raster error: {}", message),
            InkspreadError::Pdf(message) => write!(f, "pdf error: {}", message),
            InkspreadError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for InkspreadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InkspreadError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InkspreadError {
    fn from(value: std::io::Error) -> Self {
        InkspreadError::Io(value)
    }
}
