use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::ChatError;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "campus";
pub const APP_NAME: &str = "messenger";

pub fn data_dir() -> Result<PathBuf, ChatError> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| ChatError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Default location of the file-backed master secret.
pub fn master_secret_path() -> Result<PathBuf, ChatError> {
    if let Ok(override_path) = std::env::var("CM_SECRET_PATH") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("master.key"))
}
