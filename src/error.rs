//! Error taxonomy for discovery, catalog and process control.
//!
//! All of these are recovered at the component boundary and turned into a
//! banner or a live-view line; none of them end the shell.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("cannot read '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("no application with id '{0}'")]
    NotFound(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StartError {
    #[error("session already active: '{unit}' is still running")]
    AlreadyActive { unit: String },

    #[error("'{unit}' has an empty launch command")]
    EmptyCommand { unit: String },

    #[error("failed to start '{unit}': {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StopError {
    #[error("no active session")]
    NoActiveSession,

    #[error("session is already stopping")]
    AlreadyStopping,

    #[error("process {pid} did not terminate after a forced kill")]
    Unkillable { pid: u32 },
}
