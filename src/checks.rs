use std::path::Path;
use std::process::Command;

use crate::config::{IconRecord, Settings};

#[derive(Debug, Default)]
pub struct ConfigReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// External tools: (binary, what for, needed only when)
const TOOLS: &[(&str, &str, &str)] = &[
    ("xrefresh", "screen redraw after the screen saver", "screensavertimeout"),
    ("mpg123", "sound playback without the rodio backend", "enablesound"),
];

/// What `kdesk -t` reports: missing files and tools, grouped by severity.
pub fn check_configuration(settings: &Settings, records: &[IconRecord]) -> ConfigReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if records.is_empty() {
        errors.push("no icon records found".to_string());
    }

    for key in ["background.file-4-3", "background.file-16-9", "background.file-medium"] {
        let file = settings.get_string(key);
        if !file.is_empty() && !Path::new(file).is_file() {
            warnings.push(format!("{key}: '{file}' not found"));
        }
    }

    let default_icon = settings.get_string("defaultdesktopicon");
    if default_icon.is_empty() {
        warnings.push("DefaultDesktopIcon not set, missing icons will not render".to_string());
    }

    for record in records {
        if !record.icon.is_file() {
            warnings.push(format!("{}: icon '{}' not found", record.filename, record.icon.display()));
        }
        if record.singleton && record.app_id.is_none() {
            warnings.push(format!("{}: Singleton without AppID is never detected", record.filename));
        }
    }

    let hook = settings.get_string("iconhook");
    if !hook.is_empty() && !Path::new(hook).is_file() {
        warnings.push(format!("IconHook '{hook}' not found"));
    }

    for (bin, desc, setting) in TOOLS {
        let wanted = match *setting {
            "enablesound" => settings.get_bool(setting) && !cfg!(feature = "sound"),
            other => settings.get_int(other) > 0,
        };
        if wanted && !which(bin) {
            warnings.push(format!("'{bin}' not found ({desc})"));
        }
    }

    ConfigReport {
        ok: errors.is_empty(),
        errors,
        warnings,
    }
}

fn which(bin: &str) -> bool {
    Command::new("which")
        .arg(bin)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn print_report(report: &ConfigReport) {
    for e in &report.errors {
        eprintln!("  ✗ {e}");
    }
    for w in &report.warnings {
        eprintln!("  ! {w}");
    }
    if report.ok && report.warnings.is_empty() {
        eprintln!("  ✓ configuration looks good");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_record_list_is_an_error() {
        let report = check_configuration(&Settings::parse("DefaultDesktopIcon: /x.png\n"), &[]);
        assert!(!report.ok);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn missing_files_are_warnings() {
        let settings = Settings::parse("Background.File-16-9: /nonexistent/wall.png\n");
        let record = IconRecord {
            filename: "a.lnk".into(),
            icon: PathBuf::from("/nonexistent/a.png"),
            singleton: true,
            ..IconRecord::default()
        };
        let report = check_configuration(&settings, &[record]);
        assert!(report.ok);
        assert!(report.warnings.iter().any(|w| w.contains("wall.png")));
        assert!(report.warnings.iter().any(|w| w.contains("a.png")));
        assert!(report.warnings.iter().any(|w| w.contains("AppID")));
        assert!(report.warnings.iter().any(|w| w.contains("DefaultDesktopIcon")));
    }
}
