use std::ffi::OsStr;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Names of the image files directly inside `dir`, sorted.
///
/// This is the ground truth for what can be shown. A missing directory is an
/// empty library, not an error.
pub fn list_images(dir: &Path) -> io::Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[inline]
pub fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if ["jpg", "jpeg", "png", "webp"].contains(&e.as_str())
    )
}
