use std::fmt;

/// Errors from script loading and execution.
#[derive(Debug)]
pub enum ScriptError {
    /// Error while discovering or reading script files.
    Load(String),
    /// Error from the Lua runtime.
    Lua(String),
    /// Script execution exceeded its deadline.
    Timeout,
    /// Script code panicked the host.
    Panic(String),
    /// Script attempted a sandboxed operation.
    Sandbox(String),
    /// I/O error (script files, socket operations).
    Io(std::io::Error),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(msg) => write!(f, "script load error: {msg}"),
            Self::Lua(msg) => write!(f, "lua error: {msg}"),
            Self::Timeout => write!(f, "script execution timeout"),
            Self::Panic(msg) => write!(f, "script panic: {msg}"),
            Self::Sandbox(msg) => write!(f, "sandbox violation: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScriptError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<mlua::Error> for ScriptError {
    fn from(err: mlua::Error) -> Self {
        Self::Lua(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_variants() {
        assert_eq!(
            ScriptError::Load("missing dir".into()).to_string(),
            "script load error: missing dir"
        );
        assert_eq!(ScriptError::Timeout.to_string(), "script execution timeout");
        assert_eq!(
            ScriptError::Panic("boom".into()).to_string(),
            "script panic: boom"
        );
    }

    #[test]
    fn io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(ScriptError::from(io), ScriptError::Io(_)));
    }
}
