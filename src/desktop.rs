//! Desktop session: owns every icon, the grid and the control window, and
//! turns host events into icon actions.

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::click::{ClickArbiter, ClickDecision, ClickPolicy};
use crate::config::{IconRecord, IconStore, Settings};
use crate::grid::{GridAllocator, GridGeometry};
use crate::hook::{hook_command, HookUpdate};
use crate::host::{DesktopEvent, Host, IconLook, SoundCue, WindowId};
use crate::icon::{IconEntity, IconError};
use crate::metrics::{self, Metrics};
use crate::signal::{IconName, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Running,
    Reloading,
    Finished,
}

/// What the caller should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Tear the icons down, re-read the configuration, start again.
    Reload,
    Finish,
}

/// Settings the session reads once per `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub click: ClickPolicy,
    pub geometry: GridGeometry,
    pub maximize_singleton: bool,
    pub icon_hook: Option<String>,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let hook = settings.get_string("iconhook").trim();
        Self {
            click: ClickPolicy::from_settings(settings),
            geometry: GridGeometry::from_settings(settings),
            maximize_singleton: settings.get_bool("maximizesingleton"),
            icon_hook: (!hook.is_empty()).then(|| hook.to_string()),
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct DesktopSession<H: Host, S: IconStore> {
    host: H,
    store: S,
    state: SessionState,
    config: SessionConfig,
    grid: GridAllocator,
    control: Option<WindowId>,
    icons: HashMap<WindowId, IconEntity>,
    records: Vec<IconRecord>,
    arbiter: ClickArbiter,
    startup_pending: bool,
    metrics_path: Option<PathBuf>,
}

impl<H: Host, S: IconStore> DesktopSession<H, S> {
    pub fn new(host: H, store: S) -> Self {
        let config = SessionConfig::from_settings(store.settings());
        let (w, h) = host.screen_size();
        Self {
            grid: GridAllocator::new(w, h, config.geometry),
            arbiter: ClickArbiter::new(config.click),
            host,
            store,
            state: SessionState::Uninitialized,
            config,
            control: None,
            icons: HashMap::new(),
            records: Vec::new(),
            startup_pending: false,
            metrics_path: None,
        }
    }

    pub fn with_metrics(mut self, path: PathBuf) -> Self {
        self.metrics_path = Some(path);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn grid(&self) -> &GridAllocator {
        &self.grid
    }

    pub fn control_window(&self) -> Option<WindowId> {
        self.control
    }

    pub fn icon_count(&self) -> usize {
        self.icons.len()
    }

    pub fn icon(&self, window: WindowId) -> Option<&IconEntity> {
        self.icons.get(&window)
    }

    pub fn icons(&self) -> impl Iterator<Item = &IconEntity> {
        self.icons.values()
    }

    pub fn records(&self) -> &[IconRecord] {
        &self.records
    }

    /// Window of the live icon called `name`.
    pub fn find_icon_name(&self, name: &str) -> Option<WindowId> {
        self.icons
            .iter()
            .find(|(_, e)| e.name() == name)
            .map(|(w, _)| *w)
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            icons_found: self.records.len(),
            icons_rendered: self.icons.len(),
            grid_full: self.grid.is_full(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Read the current settings and make sure the control window exists.
    /// Called again after every full reload; live icons must be gone by then.
    pub fn initialize(&mut self) -> Result<()> {
        if !self.icons.is_empty() {
            self.destroy_icons();
        }
        self.config = SessionConfig::from_settings(self.store.settings());
        self.arbiter.set_policy(self.config.click);
        let (w, h) = self.host.screen_size();
        self.grid = GridAllocator::new(w, h, self.config.geometry);

        if self.control.is_none() {
            let window = self.host.create_control_window()?;
            info!(window, "control window created");
            self.control = Some(window);
        }
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Returns how many icons made it onto the desktop.
    pub fn create_icons(&mut self) -> usize {
        self.store.reset_icon_records();
        self.records = match self.store.load_icon_records() {
            Ok(records) => records,
            Err(err) => {
                warn!("cannot load icon records: {err:#}");
                Vec::new()
            }
        };
        let all: Vec<usize> = (0..self.records.len()).collect();
        self.create_from(&all);
        self.write_metrics();
        info!(
            found = self.records.len(),
            rendered = self.icons.len(),
            grid_full = self.grid.is_full(),
            "icons created"
        );
        self.icons.len()
    }

    /// Grid records with an explicit cell go first so the free-scan of the
    /// others cannot take their cells.
    fn create_from(&mut self, indices: &[usize]) {
        let (hinted, rest): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|i| self.records[*i].has_explicit_hint());

        for index in hinted.into_iter().chain(rest) {
            let record = &self.records[index];
            match IconEntity::create(&mut self.host, &mut self.grid, record) {
                Ok(mut entity) => {
                    entity.draw(&mut self.host, IconLook::Normal);
                    self.icons.insert(entity.window(), entity);
                }
                Err(IconError::Grid(_)) => {
                    warn!(name = record.name(), "icon grid is full, icon skipped");
                }
                Err(err) => warn!("{err}"),
            }
        }
    }

    /// Re-read the records and only touch the icons that changed.
    pub fn reload_icons(&mut self) {
        let previous = self.state;
        self.state = SessionState::Reloading;

        self.store.reset_icon_records();
        let records = match self.store.load_icon_records() {
            Ok(records) => records,
            Err(err) => {
                warn!("icon reload skipped, records unreadable: {err:#}");
                self.state = previous;
                return;
            }
        };

        let vanished: Vec<WindowId> = self
            .icons
            .iter()
            .filter(|(_, e)| !records.iter().any(|r| r.filename == e.record().filename))
            .map(|(w, _)| *w)
            .collect();
        for window in &vanished {
            if let Some(entity) = self.icons.remove(window) {
                entity.destroy(&mut self.host, &mut self.grid);
            }
        }

        let mut updated = 0;
        for entity in self.icons.values_mut() {
            let Some(record) = records.iter().find(|r| r.filename == entity.record().filename) else {
                continue;
            };
            if entity.rebind(record) {
                entity.redraw(&mut self.host);
                updated += 1;
            }
        }

        let added: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !self.icons.values().any(|e| e.record().filename == r.filename))
            .map(|(i, _)| i)
            .collect();

        self.records = records;
        self.create_from(&added);
        self.write_metrics();

        info!(
            removed = vanished.len(),
            added = added.len(),
            updated,
            live = self.icons.len(),
            "icons reloaded"
        );
        self.state = previous;
    }

    /// First half of a full reload: adopt re-read settings only if the icon
    /// records load under them. On error the old settings stay and nothing
    /// on screen has been touched.
    pub fn stage_reload(&mut self, settings: Settings) -> Result<()> {
        let previous = self.store.settings().clone();
        self.store.replace_settings(settings);
        self.store.reset_icon_records();
        if let Err(err) = self.store.load_icon_records() {
            self.store.replace_settings(previous);
            return Err(err);
        }
        debug!("reload staged");
        Ok(())
    }

    pub fn destroy_icons(&mut self) {
        for (_, entity) in self.icons.drain() {
            entity.destroy(&mut self.host, &mut self.grid);
        }
        debug!("all icons destroyed");
    }

    /// Final teardown, including the control window.
    pub fn finish(&mut self) {
        self.destroy_icons();
        if let Some(window) = self.control.take() {
            self.host.destroy_window(window);
        }
        self.state = SessionState::Finished;
    }

    fn write_metrics(&self) {
        let Some(path) = &self.metrics_path else {
            return;
        };
        if let Err(err) = metrics::write(path, &self.metrics()) {
            warn!("cannot write metrics: {err:#}");
        }
    }

    // ── Event loop ────────────────────────────────────────────────────────────

    /// Block on host events until a reload or finish is requested.
    pub fn run(&mut self) -> Result<Flow> {
        self.state = SessionState::Running;
        loop {
            let event = self.host.next_event()?;
            match self.dispatch(event) {
                Flow::Continue => {}
                Flow::Reload => {
                    self.state = SessionState::Reloading;
                    return Ok(Flow::Reload);
                }
                Flow::Finish => {
                    self.state = SessionState::Finished;
                    return Ok(Flow::Finish);
                }
            }
        }
    }

    pub fn dispatch(&mut self, event: DesktopEvent) -> Flow {
        match event {
            DesktopEvent::Signal { window, signal } if Some(window) == self.control => {
                return self.handle_signal(signal);
            }
            DesktopEvent::Signal { window, .. } => {
                debug!(window, "signal for a foreign window dropped");
            }
            DesktopEvent::AppWindowMapped | DesktopEvent::StartupTimeout => {
                if self.startup_pending {
                    debug!("startup notification finished");
                    self.startup_pending = false;
                    self.host.startup_end();
                }
            }
            DesktopEvent::ButtonPress { window, time } => {
                if self.icons.contains_key(&window) {
                    self.handle_press(window, time);
                }
            }
            DesktopEvent::ButtonRelease { window, time } => {
                if self.icons.contains_key(&window) {
                    self.arbiter.on_release(time);
                }
            }
            DesktopEvent::Enter { window } => self.redraw(window, Some(IconLook::Hover)),
            DesktopEvent::Leave { window } => self.redraw(window, Some(IconLook::Normal)),
            DesktopEvent::Expose { window } => self.redraw(window, None),
            DesktopEvent::Motion { .. } | DesktopEvent::Other => {}
        }
        Flow::Continue
    }

    fn redraw(&mut self, window: WindowId, look: Option<IconLook>) {
        let Some(entity) = self.icons.get_mut(&window) else {
            return;
        };
        match look {
            Some(look) => entity.draw(&mut self.host, look),
            None => entity.redraw(&mut self.host),
        }
    }

    fn handle_signal(&mut self, signal: Signal) -> Flow {
        info!(signal = signal.atom_name(), "control signal received");
        match signal {
            Signal::Finish => Flow::Finish,
            Signal::Reload => Flow::Reload,
            Signal::ReloadIcons => {
                self.reload_icons();
                Flow::Continue
            }
            Signal::IconAlert(name) => {
                self.icon_alert(&name);
                Flow::Continue
            }
            Signal::Blur => {
                match self.host.toggle_overlay() {
                    Ok(shown) => debug!(shown, "blur overlay toggled"),
                    Err(err) => warn!("blur overlay toggle failed: {err:#}"),
                }
                Flow::Continue
            }
        }
    }

    fn handle_press(&mut self, window: WindowId, time: u32) {
        match self.arbiter.on_press(time) {
            ClickDecision::Ignore => {}
            ClickDecision::Throttled => self.host.play_sound(SoundCue::DisabledIcon),
            ClickDecision::Launch => {
                let Some(entity) = self.icons.get(&window) else {
                    return;
                };
                if let Some(existing) = entity.running_instance(&mut self.host) {
                    if self.config.maximize_singleton {
                        if let Err(err) = self.host.maximize_window(existing) {
                            warn!(name = entity.name(), "cannot raise running app: {err:#}");
                        }
                    } else {
                        self.host.play_sound(SoundCue::DisabledIcon);
                    }
                    return;
                }

                self.host.play_sound(SoundCue::LaunchApp);
                self.host.startup_begin(entity.name());
                let started = entity.launch(&mut self.host);
                self.arbiter.launch_started(started);
                if started {
                    self.startup_pending = true;
                } else {
                    self.host.startup_end();
                }
            }
        }
    }

    fn icon_alert(&mut self, name: &IconName) {
        let Some(window) = self.find_icon_name(name.as_str()) else {
            warn!(name = %name, "icon alert for unknown icon");
            return;
        };
        let Some(hook) = self.config.icon_hook.clone() else {
            debug!(name = %name, "icon alert without IconHook, nothing to do");
            return;
        };

        let output = match self.host.run_capture(&hook_command(&hook, name.as_str())) {
            Ok(output) => output,
            Err(err) => {
                warn!(name = %name, "icon hook failed: {err:#}");
                return;
            }
        };

        let update = HookUpdate::parse(&output);
        if update.is_empty() {
            debug!(name = %name, "icon hook returned no changes");
            return;
        }
        if let Some(entity) = self.icons.get_mut(&window) {
            update.apply(entity);
            entity.redraw(&mut self.host);
        }
    }
}
