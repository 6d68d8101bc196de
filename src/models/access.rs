//! Permissions resolved from the request's bearer token.

/// What the caller is allowed to do.
///
/// Populated by the authorization middleware; it performs no checks itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Access {
    /// Unrestricted read, including private files.
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}
