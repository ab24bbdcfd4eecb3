//! Per-display icon metrics, read by the session's health checks.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::save_json;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    #[serde(rename = "icons-found")]
    pub icons_found: usize,
    #[serde(rename = "icons-rendered")]
    pub icons_rendered: usize,
    #[serde(rename = "grid-full")]
    pub grid_full: bool,
}

/// `:0.0` → `0.0`; anything that is not alphanumeric or `.` becomes `_`.
pub fn sanitize_display(display: &str) -> String {
    let trimmed = display.trim_start_matches(':');
    let cleaned: String = trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "0".to_string()
    } else {
        cleaned
    }
}

pub fn metrics_path(display: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/kdesk-metrics-{}.json", sanitize_display(display)))
}

pub fn write(path: &Path, metrics: &Metrics) -> Result<()> {
    save_json(path, metrics)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_sanitized() {
        assert_eq!(sanitize_display(":0"), "0");
        assert_eq!(sanitize_display(":1.0"), "1.0");
        assert_eq!(sanitize_display("host/unix:2"), "host_unix_2");
        assert_eq!(sanitize_display(""), "0");
        assert_eq!(metrics_path(":0"), PathBuf::from("/tmp/kdesk-metrics-0.json"));
    }

    #[test]
    fn metrics_use_dashed_keys() {
        let m = Metrics {
            icons_found: 12,
            icons_rendered: 11,
            grid_full: true,
        };
        let v = serde_json::to_value(m).unwrap();
        assert_eq!(v["icons-found"], 12);
        assert_eq!(v["icons-rendered"], 11);
        assert_eq!(v["grid-full"], true);
    }

    #[test]
    fn written_file_is_world_readable() {
        let path = std::env::temp_dir().join(format!("kdesk-metrics-test-{}.json", std::process::id()));
        write(&path, &Metrics::default()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
        let _ = std::fs::remove_file(path);
    }
}
