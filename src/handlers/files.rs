use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

pub fn get_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        _ => "text/plain",
    }
}

/// Reads a regular file for serving, with its MIME type.
pub fn read_file(path: &Path) -> io::Result<(Vec<u8>, &'static str)> {
    let content = fs::read(path)?;
    Ok((content, get_mime_type(path)))
}

pub fn delete_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)?;
    info!(path = %path.display(), "file deleted");
    Ok(())
}
