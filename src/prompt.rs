use std::path::PathBuf;

use dialoguer::Password;

/// Ask for the API key with masked input. None if empty or the prompt was aborted.
pub fn api_key() -> Option<String> {
    let answer = Password::new()
        .with_prompt("Enter your OpenAI API key")
        .allow_empty_password(true)
        .interact();
    match answer {
        Ok(key) => non_empty(key),
        Err(e) => {
            tracing::debug!(error = %e, "API key prompt aborted");
            None
        }
    }
}

/// Ask for the source directory. None if empty or cancelled.
#[cfg(not(feature = "native-dialog"))]
pub fn directory() -> Option<PathBuf> {
    use dialoguer::Input;

    let answer = Input::<String>::new()
        .with_prompt("Select directory")
        .allow_empty(true)
        .interact_text();
    match answer {
        Ok(dir) => non_empty(dir).map(PathBuf::from),
        Err(e) => {
            tracing::debug!(error = %e, "directory prompt aborted");
            None
        }
    }
}

/// Ask for the source directory with the native folder picker.
#[cfg(feature = "native-dialog")]
pub fn directory() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Select Directory")
        .pick_folder()
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
