use std::fmt;

use strata_gateway::GatewayError;
use strata_types::{TypeError, VersionId};

/// Boxed cause for failures that may originate outside the gateway, such as
/// record encoding.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Store operation an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Set,
    Get,
    Has,
    Unregister,
    Publish,
    Metadata,
    List,
    LinkJob,
    JobVersions,
    LatestVersion,
    Import,
    Stats,
}

impl Operation {
    /// Stable lowercase name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Set => "set",
            Self::Get => "get",
            Self::Has => "has",
            Self::Unregister => "unregister",
            Self::Publish => "publish",
            Self::Metadata => "metadata",
            Self::List => "list",
            Self::LinkJob => "link_job",
            Self::JobVersions => "job_versions",
            Self::LatestVersion => "latest_version",
            Self::Import => "import",
            Self::Stats => "stats",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error happened: the operation plus the key and version involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: Operation,
    pub key: Option<String>,
    pub version: Option<VersionId>,
}

impl ErrorContext {
    /// Context for `operation` with no key or version yet.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            key: None,
            version: None,
        }
    }

    /// Attach the key being operated on.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach the version being operated on.
    pub fn with_version(mut self, version: VersionId) -> Self {
        self.version = Some(version);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(key) = &self.key {
            write!(f, " key={key:?}")?;
        }
        if let Some(version) = &self.version {
            write!(f, " version={version}")?;
        }
        Ok(())
    }
}

/// Fieldless mirror of [`StoreError`] for matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmptyKey,
    InvalidInit,
    InvalidPayload,
    MissingKey,
    NoVersion,
    AlreadyRegistered,
    NotRegistered,
    RegistrationWriteFailed,
    InitialPopulationFailed,
    MetadataWriteFailed,
    PayloadWriteFailed,
    FetchFailed,
    DecodeFailed,
    ValidationRejected,
    GatewayTimeout,
}

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key was empty.
    #[error("{ctx}: key must not be empty")]
    EmptyKey { ctx: ErrorContext },

    /// `init` was requested without an initial object.
    #[error("{ctx}: init requested without an initial object")]
    InvalidInit { ctx: ErrorContext },

    /// The payload was not a JSON object.
    #[error("{ctx}: invalid payload")]
    InvalidPayload {
        ctx: ErrorContext,
        #[source]
        source: TypeError,
    },

    /// A read named neither a key nor a version.
    #[error("{ctx}: neither key nor version id given")]
    MissingKey { ctx: ErrorContext },

    /// No version resolved for the key, or the named version does not exist.
    #[error("{ctx}: no version")]
    NoVersion { ctx: ErrorContext },

    /// Strict mode: the key already has a live registration.
    #[error("{ctx}: key is already registered")]
    AlreadyRegistered { ctx: ErrorContext },

    /// Strict mode: the key has no live registration.
    #[error("{ctx}: key is not registered")]
    NotRegistered { ctx: ErrorContext },

    /// The registration record could not be written.
    #[error("{ctx}: registration write failed")]
    RegistrationWriteFailed {
        ctx: ErrorContext,
        #[source]
        source: BoxError,
    },

    /// The key was registered but its initial object could not be written.
    #[error("{ctx}: initial population failed")]
    InitialPopulationFailed {
        ctx: ErrorContext,
        #[source]
        source: Box<StoreError>,
    },

    /// A metadata record could not be written.
    #[error("{ctx}: metadata write failed")]
    MetadataWriteFailed {
        ctx: ErrorContext,
        #[source]
        source: BoxError,
    },

    /// An object version or job link could not be written.
    #[error("{ctx}: payload write failed")]
    PayloadWriteFailed {
        ctx: ErrorContext,
        #[source]
        source: BoxError,
    },

    /// A read from the gateway failed.
    #[error("{ctx}: fetch failed")]
    FetchFailed {
        ctx: ErrorContext,
        #[source]
        source: GatewayError,
    },

    /// Stored bytes did not decode.
    #[error("{ctx}: stored record could not be decoded")]
    DecodeFailed {
        ctx: ErrorContext,
        #[source]
        source: serde_json::Error,
    },

    /// The validate-on-write hook refused the payload.
    #[error("{ctx}: validation rejected payload: {reason}")]
    ValidationRejected { ctx: ErrorContext, reason: String },

    /// The operation deadline expired in the gateway.
    #[error("{ctx}: gateway timed out")]
    GatewayTimeout {
        ctx: ErrorContext,
        #[source]
        source: GatewayError,
    },
}

impl StoreError {
    /// The fieldless kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyKey { .. } => ErrorKind::EmptyKey,
            Self::InvalidInit { .. } => ErrorKind::InvalidInit,
            Self::InvalidPayload { .. } => ErrorKind::InvalidPayload,
            Self::MissingKey { .. } => ErrorKind::MissingKey,
            Self::NoVersion { .. } => ErrorKind::NoVersion,
            Self::AlreadyRegistered { .. } => ErrorKind::AlreadyRegistered,
            Self::NotRegistered { .. } => ErrorKind::NotRegistered,
            Self::RegistrationWriteFailed { .. } => ErrorKind::RegistrationWriteFailed,
            Self::InitialPopulationFailed { .. } => ErrorKind::InitialPopulationFailed,
            Self::MetadataWriteFailed { .. } => ErrorKind::MetadataWriteFailed,
            Self::PayloadWriteFailed { .. } => ErrorKind::PayloadWriteFailed,
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            Self::ValidationRejected { .. } => ErrorKind::ValidationRejected,
            Self::GatewayTimeout { .. } => ErrorKind::GatewayTimeout,
        }
    }

    /// Operation, key and version the error occurred on.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::EmptyKey { ctx }
            | Self::InvalidInit { ctx }
            | Self::InvalidPayload { ctx, .. }
            | Self::MissingKey { ctx }
            | Self::NoVersion { ctx }
            | Self::AlreadyRegistered { ctx }
            | Self::NotRegistered { ctx }
            | Self::RegistrationWriteFailed { ctx, .. }
            | Self::InitialPopulationFailed { ctx, .. }
            | Self::MetadataWriteFailed { ctx, .. }
            | Self::PayloadWriteFailed { ctx, .. }
            | Self::FetchFailed { ctx, .. }
            | Self::DecodeFailed { ctx, .. }
            | Self::ValidationRejected { ctx, .. }
            | Self::GatewayTimeout { ctx, .. } => ctx,
        }
    }

    /// Returns `true` if the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::GatewayTimeout
    }

    /// Wrap a gateway failure as `kind`. Deadline expiry is always reported
    /// as [`StoreError::GatewayTimeout`], whatever step hit it.
    pub(crate) fn gateway(kind: ErrorKind, ctx: ErrorContext, err: GatewayError) -> Self {
        if err.is_timeout() {
            return Self::GatewayTimeout { ctx, source: err };
        }
        match kind {
            ErrorKind::RegistrationWriteFailed => Self::RegistrationWriteFailed {
                ctx,
                source: Box::new(err),
            },
            ErrorKind::MetadataWriteFailed => Self::MetadataWriteFailed {
                ctx,
                source: Box::new(err),
            },
            ErrorKind::PayloadWriteFailed => Self::PayloadWriteFailed {
                ctx,
                source: Box::new(err),
            },
            _ => Self::FetchFailed { ctx, source: err },
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure inside a gateway transaction.
///
/// Steps inside the transaction attribute their own errors; failures of
/// `begin` and `commit` arrive unattributed and are classified by the caller.
#[derive(Debug)]
pub(crate) enum TxError {
    Gateway(GatewayError),
    Store(StoreError),
}

impl TxError {
    pub(crate) fn attribute(self, kind: ErrorKind, ctx: &ErrorContext) -> StoreError {
        match self {
            Self::Gateway(err) => StoreError::gateway(kind, ctx.clone(), err),
            Self::Store(err) => err,
        }
    }
}

impl From<GatewayError> for TxError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

impl From<StoreError> for TxError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
