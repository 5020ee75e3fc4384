/// Enumeration of all possible errors returned by this library.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "kind={:?} message=\"{}\"", self.kind, self.message)
    }
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Error {
        Error {
            kind,
            message: msg.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Upstream | ErrorKind::HistoryCompacted)
    }
}

/// The error taxonomy for the repository, store, index, deletion and watch
/// subsystems. This is a semantic taxonomy, not a wire protocol: the HTTP
/// layer (external to this crate) maps each variant to a status code.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    /// Object/schema/key absent. `Get`/`Delete` surface this; `Replace`
    /// treats it as "create".
    NotFound,
    /// Path/param/patch/schema validation failed, a patch touched a
    /// sensitive field, or the type is unregistered on Replace.
    InvalidInput,
    /// Body parsed but failed schema validation.
    InvalidResource,
    /// Optimistic-lock compare predicate missed on Replace.
    Conflict,
    /// `Repository::Delete` called without holding the current deletion lock.
    LockLost,
    /// JSON encode/decode or key parse failure. Treated as internal.
    Marshaling,
    /// Transient KV engine failure; retryable with backoff.
    Upstream,
    /// The KV engine compacted history at the requested revision; the watch
    /// cannot resume without a reconciliation pass. Not user-visible.
    HistoryCompacted,
    /// Context/cancellation-triggered shutdown.
    Fatal,
}

macro_rules! err {
    ($kind:ident, $($t:tt)*) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($t)*))
    };
}
pub(crate) use err;

macro_rules! bail {
    ($kind:ident, $($t:tt)*) => {
        return Err($crate::error::err!($kind, $($t)*))
    };
}
pub(crate) use bail;

pub(crate) fn not_found(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::NotFound, msg)
}

pub(crate) fn conflict(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::Conflict, msg)
}

pub(crate) fn invalid_input(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidInput, msg)
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorKind::Marshaling, format!("json error: {e}"))
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        // etcd reports history compaction as a gRPC status with this text;
        // there is no dedicated error variant in etcd-client for it.
        let msg = e.to_string();
        if msg.contains("required revision has been compacted") {
            return Error::new(ErrorKind::HistoryCompacted, msg);
        }
        Error::new(ErrorKind::Upstream, format!("etcd error: {msg}"))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Error::new(ErrorKind::Marshaling, format!("invalid integer: {e}"))
    }
}
