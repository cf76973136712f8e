// Self-update: replaces the installed tool with the published copy
use crate::error::{BisectError, Result};
use crate::remote::Fetcher;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::io::Write;
use std::path::Path;

/// Downloads the base64 payload at `url` and atomically replaces `target`
/// with the decoded bytes, keeping its permissions. Returns the new size.
pub async fn update_script(fetcher: &dyn Fetcher, url: &str, target: &Path) -> Result<usize> {
    log::info!("Fetching update from {}", url);
    let payload = fetcher.get_text(url).await?;
    let content = decode_payload(&payload)?;
    if content.is_empty() {
        return Err(BisectError::BackendUnavailable(format!("empty update payload from {}", url)));
    }
    replace_file(target, &content)?;
    log::info!("Wrote {} bytes to {}", content.len(), target.display());
    Ok(content.len())
}

fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| BisectError::BackendUnavailable(format!("update payload is not base64: {}", e)))
}

fn replace_file(target: &Path, content: &[u8]) -> Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(target).ok().map(|m| m.permissions());
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.flush()?;
    if let Some(permissions) = permissions {
        file.as_file().set_permissions(permissions)?;
    }
    file.persist(target).map_err(|e| BisectError::Io(e.error))?;
    Ok(())
}
