use crate::error::AppError;

/// Turns a client-supplied path into the collection-relative form every
/// identity is computed from: leading `/`, POSIX separators, `.` and `..`
/// resolved lexically, no trailing slash except for the root itself.
/// Backslashes are separators only on Windows; elsewhere they are ordinary
/// filename characters.
pub fn to_collection_path(path: &str) -> Result<String, AppError> {
    let normalized = if cfg!(windows) {
        path.replace('\\', "/")
    } else {
        path.to_string()
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(AppError::General(format!(
                        "path escapes the collection root: {path}"
                    )));
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", parts.join("/")))
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
