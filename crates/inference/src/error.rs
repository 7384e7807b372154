use {base::TensorError, std::fmt};

#[derive(Debug)]
pub enum InferError {
    /// A named tensor, workload, module or catalog entry does not exist.
    NotFound(String),
    /// The workload is checked out by another stage.
    AlreadyInUse(String),
    /// A bulk or unload operation found resources still checked out.
    InUse(String),
    TypeMismatch {
        id: String,
        expected: &'static str,
        found: &'static str,
    },
    /// The tensor pool was disposed, the pipeline must abort.
    Disposed,
    Unsupported(String),
    Shape(String),
    Candle(String),
    Io(String),
    Json(String),
    Runtime(String),
}

impl fmt::Display for InferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferError::NotFound(what) => write!(f, "not found: {what}"),
            InferError::AlreadyInUse(hash) => write!(f, "workload already in use: {hash}"),
            InferError::InUse(msg) => write!(f, "still in use: {msg}"),
            InferError::TypeMismatch {
                id,
                expected,
                found,
            } => write!(f, "module {id} is a {found} module, requested as {expected}"),
            InferError::Disposed => write!(f, "tensor pool disposed"),
            InferError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            InferError::Shape(msg) => write!(f, "shape error: {msg}"),
            InferError::Candle(msg) => write!(f, "candle error: {msg}"),
            InferError::Io(msg) => write!(f, "io error: {msg}"),
            InferError::Json(msg) => write!(f, "json error: {msg}"),
            InferError::Runtime(msg) => write!(f, "runtime error: {msg}"),
        }
    }
}

impl std::error::Error for InferError {}

impl From<candle_core::Error> for InferError {
    fn from(err: candle_core::Error) -> Self {
        InferError::Candle(err.to_string())
    }
}

impl From<std::io::Error> for InferError {
    fn from(err: std::io::Error) -> Self {
        InferError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for InferError {
    fn from(err: serde_json::Error) -> Self {
        InferError::Json(err.to_string())
    }
}

impl From<TensorError> for InferError {
    fn from(err: TensorError) -> Self {
        InferError::Shape(err.to_string())
    }
}

impl From<audio::AudioError> for InferError {
    fn from(err: audio::AudioError) -> Self {
        InferError::Runtime(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = InferError::TypeMismatch {
            id: "eng".to_string(),
            expected: "actor",
            found: "language",
        };
        assert_eq!(
            err.to_string(),
            "module eng is a language module, requested as actor"
        );
    }

    #[test]
    fn test_from_tensor_error() {
        let err: InferError = TensorError::ShapeOverflow.into();
        assert!(matches!(err, InferError::Shape(_)));
    }
}
