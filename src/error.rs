//! Errors surfaced from the few fallible public entry points.
//!
//! Everything that happens inside a bus access (§7 of the design
//! notes: register writes, socket commands, virtual-network frame
//! handling) stays local — failures become register/state-machine
//! outcomes, not `Result`s. This type only covers the handful of
//! calls that do host I/O before any socket-level state exists
//! (binding a listening redirector, loading a ROM image).

/// Errors returned from card construction and ROM loading.
#[non_exhaustive]
#[derive(Debug)]
pub enum CardError {
    /// A host I/O call failed.
    Io(std::io::Error),
    /// A ROM image was the wrong size to be a mouse ROM bank set.
    BadRomSize { expected: usize, actual: usize },
}

impl std::fmt::Display for CardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BadRomSize { expected, actual } => write!(
                f,
                "ROM image is {actual} bytes, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for CardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::BadRomSize { .. } => None,
        }
    }
}

impl From<std::io::Error> for CardError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
