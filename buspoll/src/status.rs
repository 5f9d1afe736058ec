use std::collections::HashMap;
use std::fmt::Display;

use crate::error::RequestError;
use crate::types::RegisterKind;

/// Key of a status cache entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatusKey {
    /// bus address of the device, 0 for the connection itself
    pub address: u8,
    /// register kind of the failing request
    pub kind: RegisterKind,
}

impl StatusKey {
    /// Key for errors of the connection rather than of a single device
    pub const CONNECTION: StatusKey = StatusKey {
        address: 0,
        kind: RegisterKind::Invalid,
    };

    /// Create a key for requests of a kind on one device
    pub fn new(address: u8, kind: RegisterKind) -> Self {
        Self { address, kind }
    }
}

impl Display for StatusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::CONNECTION {
            f.write_str("connection")
        } else {
            write!(f, "unit {} {}", self.address, self.kind)
        }
    }
}

/// Remembers the last error reported for each key so that persistent failures are
/// logged once instead of on every poll cycle
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: HashMap<StatusKey, RequestError>,
}

impl StatusCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error for a key
    ///
    /// The message is logged only if the error differs from the one already recorded.
    /// Returns true if it was logged.
    pub fn report(&mut self, key: StatusKey, err: RequestError, msg: impl Display) -> bool {
        if self.entries.get(&key) == Some(&err) {
            return false;
        }
        tracing::warn!("{}", msg);
        self.entries.insert(key, err);
        true
    }

    /// Forget the error of a key after a success
    ///
    /// Logs the recovery and returns true if an error was recorded.
    pub fn clear(&mut self, key: StatusKey) -> bool {
        if self.entries.remove(&key).is_some() {
            tracing::info!("{} recovered", key);
            return true;
        }
        false
    }

    /// Forget every recorded error without logging
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Last error recorded for a key
    pub fn get(&self, key: StatusKey) -> Option<RequestError> {
        self.entries.get(&key).copied()
    }

    /// Number of keys currently failing
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no key is failing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ExceptionCode;

    const KEY: StatusKey = StatusKey {
        address: 5,
        kind: RegisterKind::HoldingRegister,
    };

    #[test]
    fn repeated_errors_are_reported_once() {
        let mut cache = StatusCache::new();
        let emitted = (0..5)
            .filter(|_| cache.report(KEY, RequestError::ResponseTimeout, "timeout"))
            .count();
        assert_eq!(emitted, 1);
        assert_eq!(cache.get(KEY), Some(RequestError::ResponseTimeout));
    }

    #[test]
    fn a_different_error_is_always_reported() {
        let mut cache = StatusCache::new();
        assert!(cache.report(KEY, RequestError::ResponseTimeout, "timeout"));
        let exception = RequestError::Exception(ExceptionCode::IllegalDataAddress);
        assert!(cache.report(KEY, exception, "exception"));
        assert!(cache.report(KEY, RequestError::ResponseTimeout, "timeout"));
    }

    #[test]
    fn keys_are_independent() {
        let mut cache = StatusCache::new();
        assert!(cache.report(KEY, RequestError::ResponseTimeout, "timeout"));
        assert!(cache.report(
            StatusKey::CONNECTION,
            RequestError::ResponseTimeout,
            "timeout"
        ));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn recovery_is_reported_once_and_clears_the_key() {
        let mut cache = StatusCache::new();
        assert!(!cache.clear(KEY));
        cache.report(KEY, RequestError::NoConnection, "no connection");
        assert!(cache.clear(KEY));
        assert!(!cache.clear(KEY));
        assert!(cache.is_empty());
        assert!(cache.report(KEY, RequestError::NoConnection, "no connection"));
    }

    #[test]
    fn clear_all_resets_silently() {
        let mut cache = StatusCache::new();
        cache.report(KEY, RequestError::NoConnection, "no connection");
        cache.clear_all();
        assert!(!cache.clear(KEY));
        assert!(cache.report(KEY, RequestError::NoConnection, "no connection"));
    }

    #[test]
    fn connection_key_displays_by_name() {
        assert_eq!(StatusKey::CONNECTION.to_string(), "connection");
        assert_eq!(KEY.to_string(), "unit 5 HoldingRegisters");
    }
}
