//! Shared state handed to every handler and middleware.

use crate::{config::Security, services::file_service::FileService};
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FileService>,
    pub security: Arc<Security>,
    /// Checked by `/readyz`; `None` for the in-memory backend.
    pub storage_dir: Option<PathBuf>,
    pub size_limit: usize,
    pub timeout: Duration,
}
