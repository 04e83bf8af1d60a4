use std::path::PathBuf;

/// Return the application state directory
pub fn state_dir() -> PathBuf {
    let dir = if let Some(state_dir) = dirs::state_dir() {
        state_dir
    } else {
        // Fallback to home directory if state dir is not available
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local")
            .join("state")
    };
    dir.join(env!("LUMEN_PKG_NAME"))
}

/// Return the root of the persistent key-value storage
pub fn storage_dir() -> PathBuf {
    state_dir().join("storage")
}

/// Return the directory holding the firmware update slots
pub fn firmware_dir() -> PathBuf {
    state_dir().join("firmware")
}
