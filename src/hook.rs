//! Icon hook output.
//!
//! When an icon is alerted, kdesk runs `<IconHook> <icon-name>` and reads back
//! `Key: value` lines telling it how to change the icon face:
//!
//! ```text
//! Caption: 3 new
//! Message: Level 4|250 XP
//! IconStatus: /usr/share/icons/badge.png
//! ```

use std::path::PathBuf;

use crate::icon::IconEntity;

pub const SCREENSAVER_START: &str = "ScreenSaverStart";
pub const SCREENSAVER_FINISH: &str = "ScreenSaverFinish";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookUpdate {
    pub caption: Option<String>,
    pub message: Option<String>,
    pub icon: Option<PathBuf>,
    pub stamp: Option<PathBuf>,
    pub status: Option<PathBuf>,
}

impl HookUpdate {
    pub fn parse(output: &str) -> Self {
        let mut update = Self::default();
        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "caption" => update.caption = Some(value.to_string()),
                "message" => update.message = Some(value.to_string()),
                "icon" if !value.is_empty() => update.icon = Some(PathBuf::from(value)),
                "iconstamp" if !value.is_empty() => update.stamp = Some(PathBuf::from(value)),
                "iconstatus" if !value.is_empty() => update.status = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        update
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, icon: &mut IconEntity) {
        if let Some(caption) = self.caption {
            icon.set_caption(caption);
        }
        if let Some(message) = self.message {
            icon.set_message(message);
        }
        if let Some(path) = self.icon {
            icon.set_icon(path);
        }
        if let Some(path) = self.stamp {
            icon.set_icon_stamp(path);
        }
        if let Some(path) = self.status {
            icon.set_icon_status(path);
        }
    }
}

/// The shell line for `hook` with one argument.
pub fn hook_command(hook: &str, arg: &str) -> String {
    format!("{hook} {arg}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_skips_noise() {
        let update = HookUpdate::parse(
            "starting hook\nCaption: 3 new\nMessage: Level 4|250 XP\nIconStatus: /x/badge.png\nBogus: 1\n",
        );
        assert_eq!(update.caption.as_deref(), Some("3 new"));
        assert_eq!(update.message.as_deref(), Some("Level 4|250 XP"));
        assert_eq!(update.status, Some(PathBuf::from("/x/badge.png")));
        assert_eq!(update.icon, None);
        assert_eq!(update.stamp, None);
    }

    #[test]
    fn empty_caption_clears_but_empty_path_is_ignored() {
        let update = HookUpdate::parse("Caption:\nIcon: \n");
        assert_eq!(update.caption.as_deref(), Some(""));
        assert_eq!(update.icon, None);
    }

    #[test]
    fn silent_hook_changes_nothing() {
        assert!(HookUpdate::parse("").is_empty());
        assert!(HookUpdate::parse("ok\n").is_empty());
    }
}
