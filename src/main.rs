use anyhow::{Context, Result};
use serde::Serialize;
use std::process::ExitCode;
use tracing::{error, info, warn};
use x11rb::connection::Connection;

use kdesk::checks::{check_configuration, print_report};
use kdesk::cli::{self, Command, Options};
use kdesk::config::{self, ConfigStore, IconRecord, IconStore, Settings};
use kdesk::desktop::{DesktopSession, Flow};
use kdesk::signal::Signal;
use kdesk::x11::control::{self, Delivery};
use kdesk::x11::X11Host;
use kdesk::{background, logging, metrics, ssaver};

// ── Control client ────────────────────────────────────────────────────────────

fn connect_client() -> Result<(x11rb::rust_connection::RustConnection, u32)> {
    let (conn, screen_num) = x11rb::connect(None).context("cannot open the X display")?;
    let root = conn.setup().roots[screen_num].root;
    Ok((conn, root))
}

fn send(signal: &Signal) -> Result<ExitCode> {
    let (conn, root) = connect_client()?;
    match control::send_signal(&conn, root, signal)? {
        Delivery::Sent => Ok(ExitCode::SUCCESS),
        Delivery::NotRunning => {
            eprintln!("kdesk is not running");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn probe() -> Result<ExitCode> {
    let (conn, root) = connect_client()?;
    Ok(if control::is_running(&conn, root)? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn icon_geometry(name: &str) -> Result<ExitCode> {
    let (conn, root) = connect_client()?;
    match control::icon_geometry(&conn, root, name)? {
        Some(geometry) => {
            println!("{}", serde_json::to_string(&geometry)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("icon {name} not found");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ── One-shot modes ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ConfigDump<'a> {
    settings: &'a Settings,
    icons: &'a [IconRecord],
}

fn test_config(opts: &Options) -> Result<ExitCode> {
    let mut store = ConfigStore::load(opts.config_file.as_deref())?;
    let records = store.load_icon_records().unwrap_or_else(|err| {
        warn!("cannot load icon records: {err:#}");
        Vec::new()
    });
    let dump = ConfigDump {
        settings: store.settings(),
        icons: &records,
    };
    println!("{}", serde_json::to_string_pretty(&dump)?);

    let report = check_configuration(store.settings(), &records);
    print_report(&report);
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn paint_wallpaper(opts: &Options) -> Result<ExitCode> {
    let settings = config::load_settings(opts.config_file.as_deref())?;
    let mut host = X11Host::connect(None)?;
    host.paint_background(&settings, true)?;
    Ok(ExitCode::SUCCESS)
}

// ── Desktop ───────────────────────────────────────────────────────────────────

fn start_idle_monitor(config: Option<ssaver::SaverConfig>) -> Option<ssaver::IdleMonitor> {
    let config = config?;
    match ssaver::spawn(None, config) {
        Ok(monitor) => Some(monitor),
        Err(err) => {
            warn!("screen saver disabled: {err:#}");
            None
        }
    }
}

fn run_desktop(opts: &Options) -> Result<ExitCode> {
    let store = ConfigStore::load(opts.config_file.as_deref()).context("configuration unreadable")?;
    let mut host = X11Host::connect(None)?;
    if control::is_running(host.conn(), host.root())? {
        eprintln!("kdesk is already running");
        return Ok(ExitCode::FAILURE);
    }

    host.apply_settings(store.settings());
    if let Err(err) = host.paint_background(store.settings(), false) {
        warn!("cannot paint wallpaper: {err:#}");
    }
    host.sound().play_welcome();
    std::thread::sleep(background::startup_delay(store.settings()));

    let mut monitor = start_idle_monitor(ssaver::SaverConfig::from_settings(store.settings()));

    let metrics_path = metrics::metrics_path(host.display());
    let mut session = DesktopSession::new(host, store).with_metrics(metrics_path);
    session.initialize()?;
    session.create_icons();
    loop {
        match session.run()? {
            Flow::Reload => {
                let settings = match config::load_settings(opts.config_file.as_deref()) {
                    Ok(settings) => settings,
                    Err(err) => {
                        warn!("configuration reload failed, keeping the old one: {err:#}");
                        continue;
                    }
                };
                if let Err(err) = session.stage_reload(settings) {
                    warn!("icon reload failed, keeping the current desktop: {err:#}");
                    continue;
                }

                let settings = session.store().settings().clone();
                let host = session.host_mut();
                host.apply_settings(&settings);
                if let Err(err) = host.paint_background(&settings, false) {
                    warn!("cannot paint wallpaper: {err:#}");
                }
                let next = ssaver::SaverConfig::from_settings(&settings);
                if ssaver::restart_needed(monitor.as_ref(), next.as_ref()) {
                    if let Some(old) = monitor.take() {
                        old.stop();
                    }
                    monitor = start_idle_monitor(next);
                }

                session.initialize()?;
                session.create_icons();
                info!("configuration reloaded");
            }
            Flow::Finish | Flow::Continue => break,
        }
    }
    if let Some(monitor) = monitor {
        monitor.stop();
    }
    session.finish();
    info!("kdesk finished");
    Ok(ExitCode::SUCCESS)
}

fn dispatch(opts: &Options) -> Result<ExitCode> {
    match &opts.command {
        Command::Help => {
            print!("{}", cli::USAGE);
            Ok(ExitCode::SUCCESS)
        }
        Command::Send(signal) => send(signal),
        Command::Probe => probe(),
        Command::IconGeometry(name) => icon_geometry(name),
        Command::TestConfig => test_config(opts),
        Command::Wallpaper => paint_wallpaper(opts),
        Command::Run => run_desktop(opts),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match cli::parse(&args) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("kdesk: {err}\n");
            eprint!("{}", cli::USAGE);
            return ExitCode::FAILURE;
        }
    };
    logging::init(opts.verbose);

    match dispatch(&opts) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
