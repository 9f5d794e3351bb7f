pub mod analyze;
pub mod detect;

use std::path::Path;

/// Name handed to the analysis: the final path component.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
