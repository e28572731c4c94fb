use thiserror::Error;

#[derive(Error, Debug)]
pub enum TomoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: registration pitch={pitch} yaw={yaw} is not supported (both must be 0)")]
    UnsupportedRegistration { pitch: f64, yaw: f64 },

    #[error("Validation error: downsample factor {downsample} does not divide dimension {dimension}")]
    InvalidDownsample { dimension: usize, downsample: usize },

    #[error("no projection exceeds the leaf activity threshold")]
    EmptyDelivery,

    #[error("plan total tau is not known")]
    MissingTotalTau,

    #[error("no local or remote dose engine is available")]
    EngineUnavailable,

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("dose engine reported a failure:\n{output}")]
    ExternalEngine { output: String },

    #[error("dose engine did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("dose job for plan {plan_uid} on image {image_uid} failed: {source}")]
    Job {
        plan_uid: String,
        image_uid: String,
        #[source]
        source: Box<TomoError>,
    },
}

impl TomoError {
    /// Innermost error, looking through job context.
    pub fn root(&self) -> &TomoError {
        match self {
            TomoError::Job { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self.root(),
            TomoError::Validation(_)
                | TomoError::UnsupportedRegistration { .. }
                | TomoError::InvalidDownsample { .. }
        )
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, TomoError>;
