use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("usage")]
    Usage,

    #[error("Error: {0}")]
    Argument(String),

    #[error("Error: invalid configuration: {0}")]
    Config(String),

    #[error("Error opening the device: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error fetching the device info: {0}")]
    DeviceInfo(#[source] io::Error),

    #[error("Error: cannot grab the device, something else is grabbing it.")]
    Grab { path: PathBuf },

    #[error("Error: this device does not have absolute x/y axes")]
    MissingAxes,

    #[error("Error: cannot keep up")]
    Desync,

    #[error("Error: {0}")]
    Read(#[source] io::Error),

    #[error("Error writing output: {0}")]
    Output(#[source] io::Error),
}

impl ProbeError {
    /// Every failure is fatal and reported with status 1.
    pub fn exit_status(&self) -> u8 {
        1
    }

    /// Extra lines printed after the main diagnostic.
    pub fn hint(&self) -> Option<String> {
        match self {
            ProbeError::Grab { path } => Some(format!(
                "Use 'fuser -v {}' to find processes with an open fd",
                path.display()
            )),
            ProbeError::Open { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
                Some(crate::config::permission_hint())
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grab_hint_names_the_path() {
        let err = ProbeError::Grab {
            path: PathBuf::from("/dev/input/event7"),
        };
        assert_eq!(
            err.hint().as_deref(),
            Some("Use 'fuser -v /dev/input/event7' to find processes with an open fd")
        );
    }

    #[test]
    fn desync_message_matches_cli_output() {
        assert_eq!(ProbeError::Desync.to_string(), "Error: cannot keep up");
        assert!(ProbeError::Desync.hint().is_none());
    }

    #[test]
    fn not_found_open_has_no_permission_hint() {
        let err = ProbeError::Open {
            path: PathBuf::from("/nope"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.hint().is_none());
        assert!(err.to_string().starts_with("Error opening the device"));
    }
}
