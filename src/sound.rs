//! kdesk sound cues
//!
//! Each cue maps to a file named in `.kdeskrc`. Sound only plays when
//! `EnableSound: true` and kdesk runs on the primary display `:0`.
//! Built with `--features sound` files are decoded in-process with rodio;
//! otherwise an external `mpg123 -q` is spawned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Settings;

pub const PRIMARY_DISPLAY: &str = ":0";

// ── Sound catalogue ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SoundCue {
    Welcome,
    LaunchApp,
    DisabledIcon,
}

impl SoundCue {
    pub const ALL: [SoundCue; 3] = [SoundCue::Welcome, SoundCue::LaunchApp, SoundCue::DisabledIcon];

    pub fn setting_key(self) -> &'static str {
        match self {
            SoundCue::Welcome => "soundwelcome",
            SoundCue::LaunchApp => "soundlaunchapp",
            SoundCue::DisabledIcon => "sounddisabledicon",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SoundPlayer {
    enabled: bool,
    files: BTreeMap<SoundCue, PathBuf>,
}

impl SoundPlayer {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings, display_name: &str) -> Self {
        let enabled = settings.get_bool("enablesound") && is_primary_display(display_name);
        let files = SoundCue::ALL
            .iter()
            .filter_map(|cue| {
                let path = settings.get_string(cue.setting_key());
                (!path.is_empty()).then(|| (*cue, PathBuf::from(path)))
            })
            .collect();
        debug!(enabled, display = %display_name, "sound player configured");
        Self { enabled, files }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn file_for(&self, cue: SoundCue) -> Option<&Path> {
        self.files.get(&cue).map(PathBuf::as_path)
    }

    // ── Playback ──────────────────────────────────────────────────────────────

    /// Fire and forget. No-op if sound is disabled or the cue has no file.
    pub fn play(&self, cue: SoundCue) {
        if !self.enabled {
            return;
        }
        let Some(path) = self.file_for(cue) else {
            return;
        };
        if let Err(err) = play_file(path) {
            debug!(?cue, file = %path.display(), "sound failed: {err:#}");
        }
    }

    pub fn play_welcome(&self) {
        self.play(SoundCue::Welcome);
    }
}

/// `:0` and `:0.0` are the primary display; remote or nested ones are not.
pub fn is_primary_display(display: &str) -> bool {
    display == PRIMARY_DISPLAY || display == ":0.0"
}

#[cfg(feature = "sound")]
fn play_file(path: &Path) -> anyhow::Result<()> {
    use rodio::{Decoder, OutputStream, Sink};
    use std::io::BufReader;

    let file = std::fs::File::open(path)?;
    std::thread::spawn(move || {
        let play = || -> anyhow::Result<()> {
            // Keep _stream alive until playback ends; dropping it stops audio.
            let (_stream, stream_handle) = OutputStream::try_default()?;
            let sink = Sink::try_new(&stream_handle)?;
            sink.append(Decoder::new(BufReader::new(file))?);
            sink.sleep_until_end();
            Ok(())
        };
        if let Err(err) = play() {
            debug!("rodio playback failed: {err:#}");
        }
    });
    Ok(())
}

#[cfg(not(feature = "sound"))]
fn play_file(path: &Path) -> anyhow::Result<()> {
    let argv = [
        "mpg123".to_string(),
        "-q".to_string(),
        path.display().to_string(),
    ];
    crate::launcher::spawn_argv(&argv).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_needs_flag_and_primary_display() {
        let settings = Settings::parse("EnableSound: true\nSoundWelcome: /s/welcome.mp3\n");
        assert!(SoundPlayer::from_settings(&settings, ":0").is_enabled());
        assert!(!SoundPlayer::from_settings(&settings, ":1").is_enabled());

        let off = Settings::parse("EnableSound: false\n");
        assert!(!SoundPlayer::from_settings(&off, ":0").is_enabled());
    }

    #[test]
    fn cues_map_to_configured_files() {
        let settings = Settings::parse(
            "SoundLaunchApp: /s/launch.mp3\nSoundDisabledIcon: /s/no.mp3\n",
        );
        let player = SoundPlayer::from_settings(&settings, ":0");
        assert_eq!(player.file_for(SoundCue::LaunchApp), Some(Path::new("/s/launch.mp3")));
        assert_eq!(player.file_for(SoundCue::DisabledIcon), Some(Path::new("/s/no.mp3")));
        assert_eq!(player.file_for(SoundCue::Welcome), None);
    }

    #[test]
    fn disabled_player_ignores_play() {
        SoundPlayer::disabled().play(SoundCue::Welcome);
    }
}
