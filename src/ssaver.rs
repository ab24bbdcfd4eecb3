//! Idle monitor: starts the configured screen saver program after a period
//! without user input. Runs on its own thread with its own X connection and
//! never touches the desktop session.

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::screensaver::{self, ConnectionExt as _};

use crate::config::Settings;
use crate::hook::{hook_command, SCREENSAVER_FINISH, SCREENSAVER_START};
use crate::launcher;

pub const POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const GUI_CONSOLE: u16 = 7;
pub const TTY_QUERY: &str = "/dev/tty1";
pub const XREFRESH: &str = "xrefresh";

const VT_GETSTATE: libc::c_ulong = 0x5603;

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct VtStat {
    v_active: libc::c_ushort,
    v_signal: libc::c_ushort,
    v_state: libc::c_ushort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaverConfig {
    pub timeout_secs: u32,
    pub program: String,
    pub hook: Option<String>,
}

impl SaverConfig {
    /// `None` when no timeout or program is configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let timeout = settings.get_int("screensavertimeout");
        let program = settings.get_string("screensaverprogram").trim();
        if timeout <= 0 || program.is_empty() {
            return None;
        }
        let hook = settings.get_string("iconhook").trim();
        Some(Self {
            timeout_secs: u32::try_from(timeout).unwrap_or(u32::MAX),
            program: program.to_string(),
            hook: (!hook.is_empty()).then(|| hook.to_string()),
        })
    }
}

/// Active virtual console, `None` if it cannot be queried.
pub fn active_console() -> Option<u16> {
    let path = std::ffi::CString::new(TTY_QUERY).ok()?;
    // SAFETY: plain open/ioctl/close on a local fd with a correctly sized vt_stat.
    unsafe {
        let fd = libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_NOCTTY);
        if fd < 0 {
            return None;
        }
        let mut stat = VtStat::default();
        let rc = libc::ioctl(fd, VT_GETSTATE as _, &mut stat as *mut VtStat);
        libc::close(fd);
        (rc >= 0).then_some(stat.v_active)
    }
}

/// An unknown console counts as the GUI one.
pub fn should_start(idle_ms: u32, timeout_secs: u32, console: Option<u16>) -> bool {
    u64::from(idle_ms) > u64::from(timeout_secs) * 1000 && console.map_or(true, |c| c == GUI_CONSOLE)
}

/// Runs the hook; a hook that cannot run at all counts as success.
fn run_hook(hook: Option<&str>, phase: &str) -> bool {
    let Some(hook) = hook else {
        return true;
    };
    match launcher::run_status(&hook_command(hook, phase)) {
        Ok(status) => {
            debug!(phase, %status, "screen saver hook finished");
            status.success()
        }
        Err(err) => {
            warn!(phase, "screen saver hook did not run, assuming success: {err:#}");
            true
        }
    }
}

fn run_saver(config: &SaverConfig) {
    if !run_hook(config.hook.as_deref(), SCREENSAVER_START) {
        info!("screen saver cancelled by hook");
        return;
    }
    info!(program = %config.program, "starting screen saver");
    if let Err(err) = launcher::run_status(&config.program) {
        warn!("screen saver program failed: {err:#}");
    }
    if let Err(err) = launcher::run_argv(&[XREFRESH]) {
        debug!("xrefresh failed: {err:#}");
    }
    run_hook(config.hook.as_deref(), SCREENSAVER_FINISH);
}

/// A running idle monitor. Stopping it lets the thread exit after its
/// current sleep.
pub struct IdleMonitor {
    config: SaverConfig,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl IdleMonitor {
    pub fn config(&self) -> &SaverConfig {
        &self.config
    }

    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        debug!(thread = ?self.handle.thread().name(), "idle monitor stopping");
    }
}

/// Whether a reload that produced `next` must replace `current`.
pub fn restart_needed(current: Option<&IdleMonitor>, next: Option<&SaverConfig>) -> bool {
    current.map(IdleMonitor::config) != next
}

pub fn spawn(display: Option<String>, config: SaverConfig) -> Result<IdleMonitor> {
    let (conn, screen_num) =
        x11rb::connect(display.as_deref()).context("idle monitor cannot open the display")?;
    if conn
        .extension_information(screensaver::X11_EXTENSION_NAME)?
        .is_none()
    {
        bail!("X server has no {} extension", screensaver::X11_EXTENSION_NAME);
    }
    conn.screensaver_query_version(1, 1)?.reply()?;
    let root = conn.setup().roots[screen_num].root;

    info!(timeout_secs = config.timeout_secs, "idle monitor started");
    let stop = Arc::new(AtomicBool::new(false));
    let stopped = Arc::clone(&stop);
    let thread_config = config.clone();
    let handle = std::thread::Builder::new()
        .name("kdesk-ssaver".into())
        .spawn(move || loop {
            std::thread::sleep(POLL_INTERVAL);
            if stopped.load(Ordering::Relaxed) {
                debug!("idle monitor stopped");
                return;
            }
            let idle = match conn
                .screensaver_query_info(root)
                .map_err(anyhow::Error::from)
                .and_then(|c| c.reply().map_err(anyhow::Error::from))
            {
                Ok(info) => info.ms_since_user_input,
                Err(err) => {
                    warn!("idle query failed, idle monitor stopping: {err:#}");
                    return;
                }
            };
            debug!(idle_ms = idle, "idle time");
            if should_start(idle, thread_config.timeout_secs, active_console()) {
                run_saver(&thread_config);
            }
        })
        .context("starting idle monitor thread")?;
    Ok(IdleMonitor {
        config,
        stop,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_timeout_and_program() {
        assert_eq!(SaverConfig::from_settings(&Settings::parse("ScreenSaverTimeout: 300\n")), None);
        let cfg = SaverConfig::from_settings(&Settings::parse(
            "ScreenSaverTimeout: 300\nScreenSaverProgram: kano-screensaver\nIconHook: /usr/bin/hook\n",
        ))
        .unwrap();
        assert_eq!(cfg.timeout_secs, 300);
        assert_eq!(cfg.hook.as_deref(), Some("/usr/bin/hook"));
    }

    #[test]
    fn huge_timeout_saturates() {
        let cfg = SaverConfig::from_settings(&Settings::parse(
            "ScreenSaverTimeout: 99999999999\nScreenSaverProgram: saver\n",
        ))
        .unwrap();
        assert_eq!(cfg.timeout_secs, u32::MAX);
    }

    #[test]
    fn monitor_restarts_only_when_configured_differently() {
        let cfg = SaverConfig {
            timeout_secs: 300,
            program: "saver".into(),
            hook: None,
        };
        assert!(!restart_needed(None, None));
        assert!(restart_needed(None, Some(&cfg)));
    }

    #[test]
    fn starts_only_when_idle_on_gui_console() {
        assert!(should_start(301_000, 300, Some(GUI_CONSOLE)));
        assert!(should_start(301_000, 300, None));
        assert!(!should_start(301_000, 300, Some(2)));
        assert!(!should_start(299_000, 300, Some(GUI_CONSOLE)));
    }

    #[test]
    fn missing_hook_counts_as_success() {
        assert!(run_hook(None, SCREENSAVER_START));
        assert!(run_hook(Some("true"), SCREENSAVER_START));
        assert!(!run_hook(Some("false"), SCREENSAVER_START));
    }
}
