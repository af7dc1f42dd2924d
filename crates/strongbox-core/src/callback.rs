use std::fmt;

/// Failure categories reported to error callbacks and carried by [`crate::PropertiesError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Failure that fits no other category (malformed encoding, bad input).
    Unknown,
    /// Key store failure: session error, missing key, checksum mismatch.
    Hsm,
    /// Local cipher failure: init, encrypt, or tag verification.
    Crypto,
    /// Stored digest does not match the recomputed digest.
    Digest,
    /// The backing store call failed.
    InnerStorage,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Unknown => "UNKNOWN_ERROR",
            StatusCode::Hsm => "HSM_ERROR",
            StatusCode::Crypto => "CRYPTO_ERROR",
            StatusCode::Digest => "DIGEST_ERROR",
            StatusCode::InnerStorage => "INNER_STORAGE_ERROR",
        };
        f.write_str(name)
    }
}

/// Decision returned by an [`ErrorCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Keep the default behaviour of the failing checkpoint.
    Continue,
    /// Abort the call.
    Fail,
    /// Delete the offending record and fail the current call.
    ClearData,
    /// Re-attempt the operation, bounded by the [`crate::RetryPolicy`].
    Retry,
}

/// Which checkpoint a failure was observed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Open,
    Get,
    Put,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Open => "open",
            OperationType::Get => "get",
            OperationType::Put => "put",
        };
        f.write_str(name)
    }
}

/// Application hook consulted whenever a properties operation fails.
///
/// Every method defaults to [`Action::Continue`], so implementors only
/// override the checkpoints they care about.
pub trait ErrorCallback: Send + Sync {
    /// Opening the container (loading or creating its data key) failed.
    fn on_open_properties_error(&self, _status: StatusCode, _config_uri: &str) -> Action {
        Action::Continue
    }

    /// Reading `key` failed.
    fn on_get_property_error(&self, _status: StatusCode, _config_uri: &str, _key: &str) -> Action {
        Action::Continue
    }

    /// Writing or removing `key` failed.
    fn on_put_property_error(&self, _status: StatusCode, _config_uri: &str, _key: &str) -> Action {
        Action::Continue
    }
}

impl<'a> dyn ErrorCallback + 'a {
    /// Routes a failure to the callback method for `operation`.
    pub fn decide(
        &self,
        operation: OperationType,
        status: StatusCode,
        config_uri: &str,
        key: &str,
    ) -> Action {
        match operation {
            OperationType::Open => self.on_open_properties_error(status, config_uri),
            OperationType::Get => self.on_get_property_error(status, config_uri, key),
            OperationType::Put => self.on_put_property_error(status, config_uri, key),
        }
    }
}
