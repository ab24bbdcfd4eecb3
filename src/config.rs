use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::grid::GridCell;

// ── Paths ─────────────────────────────────────────────────────────────────────

pub const SYSTEM_CONFIG_FILE: &str = "/usr/share/kano-desktop/kdesk/.kdeskrc";
pub const SYSTEM_ICON_DIR: &str = "/usr/share/kano-desktop/kdesk/kdesktop";
pub const USER_CONFIG_NAME: &str = ".kdeskrc";
pub const USER_ICON_DIR_NAME: &str = ".kdesktop";

pub const ICON_DIR_ENV: &str = "KDESK_ICON_DIR";
pub const USER_ICON_DIR_ENV: &str = "KDESK_USER_ICON_DIR";

pub const MAX_ICONS: usize = 64;
pub const LNK_EXTENSION: &str = "lnk";

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub fn user_config_file() -> PathBuf {
    home_dir().join(USER_CONFIG_NAME)
}

pub fn system_icon_dir() -> PathBuf {
    std::env::var_os(ICON_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(SYSTEM_ICON_DIR))
}

pub fn user_icon_dir() -> PathBuf {
    std::env::var_os(USER_ICON_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(USER_ICON_DIR_NAME))
}

/// Rasterised SVG icons live here.
pub fn icon_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| home_dir().join(".cache"))
        .join("kdesk")
        .join("icons")
}

// ── JSON helpers ──────────────────────────────────────────────────────────────

pub fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

// ── Settings ──────────────────────────────────────────────────────────────────

const KNOWN_KEYS: &[&str] = &[
    "fontname",
    "fontcolor",
    "fontsize",
    "subtitlefontsize",
    "bold",
    "shadow",
    "shadowcolor",
    "shadowx",
    "shadowy",
    "background.file-4-3",
    "background.file-16-9",
    "background.file-medium",
    "background.delay",
    "screenmedreswidth",
    "clickdelay",
    "defaultdesktopicon",
    "iconstartdelay",
    "icontitlegap",
    "icongaphorz",
    "icongapvert",
    "transparency",
    "enablesound",
    "soundwelcome",
    "soundlaunchapp",
    "sounddisabledicon",
    "screensavertimeout",
    "screensaverprogram",
    "oneclick",
    "mousehovericon",
    "iconhook",
    "gridwidth",
    "gridheight",
    "maximizesingleton",
    "lastgridicon",
];

/// C `atoi`: optional sign plus leading digits, anything else is 0.
pub fn atoi(value: &str) -> i64 {
    let s = value.trim_start();
    let (sign, digits) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end]
        .parse::<i64>()
        .map(|n| sign * n)
        .unwrap_or(0)
}

/// Flat, case-insensitive `Key: value` store read from `.kdeskrc` files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                continue;
            }
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!(%key, "unknown configuration key");
            }
            values.insert(key, value.trim().to_string());
        }
        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Keys from `other` win.
    pub fn merge(&mut self, other: Settings) {
        self.values.extend(other.values);
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn get_string(&self, key: &str) -> &str {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn get_int(&self, key: &str) -> i64 {
        atoi(self.get_string(key))
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get_string(key).eq_ignore_ascii_case("true")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Base file (system or `-c`) plus the user's `~/.kdeskrc` on top.
pub fn load_settings(custom: Option<&Path>) -> Result<Settings> {
    let base_path = custom
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_FILE));
    let user_path = user_config_file();

    let base = Settings::load(&base_path);
    let user = Settings::load(&user_path);

    let mut settings = match (base, user) {
        (Err(base_err), Err(_)) => {
            return Err(base_err).context("no readable kdesk configuration");
        }
        (Ok(base), user) => {
            info!(path = %base_path.display(), keys = base.len(), "configuration loaded");
            let mut merged = base;
            if let Ok(user) = user {
                info!(path = %user_path.display(), keys = user.len(), "user configuration merged");
                merged.merge(user);
            }
            merged
        }
        (Err(err), Ok(user)) => {
            warn!(path = %base_path.display(), "base configuration unreadable: {err:#}");
            user
        }
    };

    if settings.get_string("clickdelay").is_empty() {
        settings.set("clickdelay", "500");
    }
    Ok(settings)
}

// ── Icon records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    Grid,
    #[default]
    TopLeft,
    TopRight,
    TopCentre,
    BottomCentre,
}

impl Placement {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "grid" => Some(Self::Grid),
            "" | "top-left" => Some(Self::TopLeft),
            "top-right" => Some(Self::TopRight),
            "top-centre" | "top-center" => Some(Self::TopCentre),
            "bottom-centre" | "bottom-center" => Some(Self::BottomCentre),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    #[default]
    Left,
    Right,
}

/// One parsed `.lnk` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IconRecord {
    pub filename: String,
    pub command: String,
    pub icon: PathBuf,
    pub icon_hover: Option<PathBuf>,
    pub icon_stamp: Option<PathBuf>,
    pub icon_status: Option<PathBuf>,
    pub caption: String,
    pub message: String,
    pub placement: Placement,
    /// Grid placement only; `None` means "auto".
    pub grid_hint: Option<GridCell>,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub singleton: bool,
    pub app_id: Option<String>,
    pub halign: HAlign,
    pub hover_transparent: u8,
    pub hover_x_offset: i32,
    pub hover_y_offset: i32,
    pub transparency: i32,
    pub user_icon: bool,
}

impl IconRecord {
    /// File stem; what `-a <name>` and `-j <name>` refer to.
    pub fn name(&self) -> &str {
        self.filename
            .strip_suffix(".lnk")
            .unwrap_or(&self.filename)
    }

    pub fn is_grid(&self) -> bool {
        self.placement == Placement::Grid
    }

    pub fn has_explicit_hint(&self) -> bool {
        self.is_grid() && self.grid_hint.is_some()
    }

    /// First line and optional second line, split on `|`.
    pub fn message_lines(&self) -> (&str, Option<&str>) {
        split_message(&self.message)
    }
}

pub fn split_message(message: &str) -> (&str, Option<&str>) {
    match message.split_once('|') {
        Some((first, second)) => (first, Some(second)),
        None => (message, None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing required key {0}")]
    MissingKey(&'static str),
    #[error("{key} is not a number: {value:?}")]
    BadNumber { key: &'static str, value: String },
}

fn expand_caption(value: &str) -> String {
    match value.strip_prefix('$') {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => value.to_string(),
    }
}

fn parse_coordinate(key: &'static str, raw: Option<&str>) -> Result<i32, RecordError> {
    let value = raw.unwrap_or("").trim();
    value.parse::<i32>().map_err(|_| RecordError::BadNumber {
        key,
        value: value.to_string(),
    })
}

/// Parse `.lnk` text. Image paths are kept as written; see [`ConfigStore`]
/// for SVG conversion and the default-icon fallback.
pub fn parse_icon_record(filename: &str, text: &str) -> Result<IconRecord, RecordError> {
    let mut keys: BTreeMap<String, String> = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            keys.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let get = |k: &str| keys.get(k).map(String::as_str).filter(|v| !v.is_empty());
    let path = |k: &str| get(k).map(PathBuf::from);

    let command = get("command").ok_or(RecordError::MissingKey("Command"))?;
    let icon = get("icon").ok_or(RecordError::MissingKey("Icon"))?;

    let placement = match get("relative-to") {
        None => Placement::TopLeft,
        Some(v) => Placement::parse(v).unwrap_or_else(|| {
            debug!(filename, value = v, "unknown Relative-To, using top-left");
            Placement::TopLeft
        }),
    };

    let (mut x, mut y, mut width, mut height) = (0, 0, 0, 0);
    let mut grid_hint = None;
    if placement == Placement::Grid {
        let col = get("x").unwrap_or("auto");
        let row = get("y").unwrap_or("auto");
        if !col.eq_ignore_ascii_case("auto") && !row.eq_ignore_ascii_case("auto") {
            match (col.parse::<i32>(), row.parse::<i32>()) {
                (Ok(c), Ok(r)) => grid_hint = Some(GridCell::new(c, r)),
                _ => debug!(filename, col, row, "grid hint not numeric, using auto"),
            }
        }
    } else {
        x = parse_coordinate("X", get("x"))?;
        y = parse_coordinate("Y", get("y"))?;
        width = parse_coordinate("Width", get("width"))?;
        height = parse_coordinate("Height", get("height"))?;
    }

    let halign = match get("halign") {
        Some(v) if v.eq_ignore_ascii_case("right") => HAlign::Right,
        _ => HAlign::Left,
    };

    Ok(IconRecord {
        filename: filename.to_string(),
        command: command.to_string(),
        icon: PathBuf::from(icon),
        icon_hover: path("iconhover"),
        icon_stamp: path("iconstamp"),
        icon_status: path("iconstatus"),
        caption: get("caption").map(expand_caption).unwrap_or_default(),
        message: get("message").unwrap_or("").to_string(),
        placement,
        grid_hint,
        x,
        y,
        width,
        height,
        singleton: get("singleton").is_some_and(|v| v.eq_ignore_ascii_case("true")),
        app_id: get("appid").map(str::to_string),
        halign,
        hover_transparent: atoi(get("hovertransparent").unwrap_or("0")).clamp(0, 255) as u8,
        hover_x_offset: atoi(get("hoverxoffset").unwrap_or("0")) as i32,
        hover_y_offset: atoi(get("hoveryoffset").unwrap_or("0")) as i32,
        transparency: atoi(get("transparency").unwrap_or("0")) as i32,
        user_icon: false,
    })
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Where the desktop session gets its configuration and icon records from.
pub trait IconStore {
    fn settings(&self) -> &Settings;
    fn replace_settings(&mut self, settings: Settings);
    fn load_icon_records(&mut self) -> Result<Vec<IconRecord>>;
    fn reset_icon_records(&mut self);
}

/// Filesystem-backed store: `.kdeskrc` settings plus `.lnk` directories.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    settings: Settings,
    system_icons: PathBuf,
    user_icons: PathBuf,
    cache_dir: PathBuf,
    records: Vec<IconRecord>,
}

impl ConfigStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            system_icons: system_icon_dir(),
            user_icons: user_icon_dir(),
            cache_dir: icon_cache_dir(),
            records: Vec::new(),
        }
    }

    pub fn with_directories(mut self, system: PathBuf, user: PathBuf, cache: PathBuf) -> Self {
        self.system_icons = system;
        self.user_icons = user;
        self.cache_dir = cache;
        self
    }

    pub fn load(custom: Option<&Path>) -> Result<Self> {
        Ok(Self::new(load_settings(custom)?))
    }

    pub fn records(&self) -> &[IconRecord] {
        &self.records
    }

    /// A missing directory holds no icons; one that exists but cannot be
    /// listed is an error, so a reload never mistakes it for an empty one.
    fn read_directory(
        &self,
        dir: &Path,
        user_icon: bool,
        last: &mut Option<(PathBuf, bool)>,
    ) -> Result<Vec<IconRecord>> {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no icon directory");
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry
                .with_context(|| format!("listing {}", dir.display()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) == Some(LNK_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();

        let last_name = self.settings.get_string("lastgridicon");
        let mut records = Vec::new();
        for file in files {
            let Some(filename) = file.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            if !last_name.is_empty() && filename == last_name {
                *last = Some((file.clone(), user_icon));
                continue;
            }
            if let Some(record) = self.read_record(&file, user_icon) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn read_record(&self, file: &Path, user_icon: bool) -> Option<IconRecord> {
        let filename = file.file_name()?.to_str()?;
        let text = match std::fs::read_to_string(file) {
            Ok(t) => t,
            Err(err) => {
                warn!(file = %file.display(), "could not open icon file: {err}");
                return None;
            }
        };
        match parse_icon_record(filename, &text) {
            Ok(mut record) => {
                record.user_icon = user_icon;
                self.resolve_images(&mut record);
                debug!(filename, placement = ?record.placement, "icon record parsed");
                Some(record)
            }
            Err(err) => {
                warn!(file = %file.display(), "skipping icon record: {err}");
                None
            }
        }
    }

    fn resolve_images(&self, record: &mut IconRecord) {
        let default_icon = self.settings.get_string("defaultdesktopicon");
        record.icon = resolve_image(&record.icon, &self.cache_dir, default_icon);
        for slot in [
            &mut record.icon_hover,
            &mut record.icon_stamp,
            &mut record.icon_status,
        ] {
            if let Some(p) = slot.take() {
                *slot = Some(resolve_image(&p, &self.cache_dir, default_icon));
            }
        }
    }
}

impl IconStore for ConfigStore {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn replace_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    fn load_icon_records(&mut self) -> Result<Vec<IconRecord>> {
        if !self.system_icons.is_dir() && !self.user_icons.is_dir() {
            bail!(
                "no icon directories: {} / {}",
                self.system_icons.display(),
                self.user_icons.display()
            );
        }
        if let Err(err) = std::fs::create_dir_all(&self.cache_dir) {
            debug!(dir = %self.cache_dir.display(), "cannot create icon cache: {err}");
        }

        let mut last = None;
        let mut records = self.read_directory(&self.system_icons, false, &mut last)?;
        records.extend(self.read_directory(&self.user_icons, true, &mut last)?);
        if let Some((file, user_icon)) = last {
            if let Some(record) = self.read_record(&file, user_icon) {
                records.push(record);
            }
        }
        if records.len() > MAX_ICONS {
            warn!(found = records.len(), max = MAX_ICONS, "too many icons, extra ones ignored");
            records.truncate(MAX_ICONS);
        }

        info!(count = records.len(), "icon records loaded");
        self.records = records.clone();
        Ok(records)
    }

    fn reset_icon_records(&mut self) {
        self.records.clear();
    }
}

// ── Image resolution ──────────────────────────────────────────────────────────

fn is_usable_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn newer_than(source: &Path, cached: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(source), modified(cached)) {
        (Some(s), Some(c)) => s > c,
        _ => false,
    }
}

/// SVGs become cached PNGs; missing rasters become the default icon.
pub fn resolve_image(path: &Path, cache_dir: &Path, default_icon: &str) -> PathBuf {
    let is_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));

    if !is_svg {
        if is_usable_file(path) || default_icon.is_empty() {
            return path.to_path_buf();
        }
        debug!(icon = %path.display(), default_icon, "icon not found, using default");
        return PathBuf::from(default_icon);
    }

    let Some(stem) = path.file_stem() else {
        return PathBuf::from(default_icon);
    };
    let cached = cache_dir.join(stem).with_extension("png");
    if is_usable_file(&cached) && !newer_than(path, &cached) {
        return cached;
    }
    match rasterize_svg(path, &cached) {
        Ok(()) => {
            debug!(svg = %path.display(), png = %cached.display(), "svg icon cached");
            cached
        }
        Err(err) => {
            warn!(svg = %path.display(), "svg conversion failed, using default icon: {err:#}");
            PathBuf::from(default_icon)
        }
    }
}

pub fn rasterize_svg(source: &Path, dest: &Path) -> Result<()> {
    let data = std::fs::read(source).with_context(|| format!("reading {}", source.display()))?;
    let tree = usvg::Tree::from_data(&data, &usvg::Options::default())
        .with_context(|| format!("parsing {}", source.display()))?;
    let size = tree.size().to_int_size();
    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
        .context("svg has an empty canvas")?;
    resvg::render(&tree, resvg::tiny_skia::Transform::default(), &mut pixmap.as_mut());
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    pixmap
        .save_png(dest)
        .with_context(|| format!("writing {}", dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_dir(tag: &str) -> PathBuf {
        let unique = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("kdesk_cfg_{tag}_{unique}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn atoi_matches_c_semantics() {
        assert_eq!(atoi("500"), 500);
        assert_eq!(atoi("  42px"), 42);
        assert_eq!(atoi("-7"), -7);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atoi(""), 0);
    }

    #[test]
    fn settings_keys_are_case_insensitive_and_values_keep_spaces() {
        let s = Settings::parse(
            "# comment\nFontName: Bariol\nBackground.File-16-9: /usr/share/my wallpaper.png  \n\nOneClick: TRUE\n",
        );
        assert_eq!(s.get_string("fontname"), "Bariol");
        assert_eq!(s.get_string("FONTNAME"), "Bariol");
        assert_eq!(
            s.get_string("background.file-16-9"),
            "/usr/share/my wallpaper.png"
        );
        assert!(s.get_bool("oneclick"));
        assert_eq!(s.get_string("missing"), "");
        assert_eq!(s.get_int("missing"), 0);
    }

    #[test]
    fn merge_prefers_later_values() {
        let mut base = Settings::parse("ClickDelay: 500\nFontSize: 14\n");
        base.merge(Settings::parse("ClickDelay: 300\n"));
        assert_eq!(base.get_int("clickdelay"), 300);
        assert_eq!(base.get_int("fontsize"), 14);
    }

    #[test]
    fn grid_record_with_auto_has_no_hint() {
        let r = parse_icon_record(
            "chromium.lnk",
            "Command: chromium\nIcon: /x/chromium.png\nRelative-To: grid\nX: auto\nY: 0\n",
        )
        .unwrap();
        assert_eq!(r.placement, Placement::Grid);
        assert_eq!(r.grid_hint, None);
        assert_eq!(r.name(), "chromium");
    }

    #[test]
    fn grid_record_with_numbers_has_hint() {
        let r = parse_icon_record(
            "make-art.lnk",
            "Command: make-art\nIcon: /x/a.png\nRelative-To: grid\nX: 2\nY: 1\n",
        )
        .unwrap();
        assert_eq!(r.grid_hint, Some(GridCell::new(2, 1)));
        assert!(r.has_explicit_hint());
    }

    #[test]
    fn fixed_record_requires_numeric_geometry() {
        let err = parse_icon_record(
            "profile.lnk",
            "Command: profile\nIcon: /x/p.png\nRelative-To: top-right\nX: 10\nY: 5\nWidth: wide\nHeight: 40\n",
        )
        .unwrap_err();
        assert_eq!(
            err,
            RecordError::BadNumber {
                key: "Width",
                value: "wide".into()
            }
        );
    }

    #[test]
    fn record_without_command_is_rejected() {
        let err = parse_icon_record("x.lnk", "Icon: /x/p.png\n").unwrap_err();
        assert_eq!(err, RecordError::MissingKey("Command"));
    }

    #[test]
    fn record_fields_are_parsed() {
        let r = parse_icon_record(
            "apps.lnk",
            "AppID: kano-apps\nCommand: kano-apps launch\nIcon: /i/apps.png\nIconHover: /i/apps-hover.png\n\
             HoverTransparent: 300\nCaption: Apps\nMessage: Hello|world\nHAlign: right\n\
             Singleton: true\nRelative-To: bottom-centre\nX: -100\nY: -80\nWidth: 64\nHeight: 64\n",
        )
        .unwrap();
        assert_eq!(r.command, "kano-apps launch");
        assert_eq!(r.app_id.as_deref(), Some("kano-apps"));
        assert_eq!(r.icon_hover, Some(PathBuf::from("/i/apps-hover.png")));
        assert_eq!(r.hover_transparent, 255);
        assert_eq!(r.halign, HAlign::Right);
        assert!(r.singleton);
        assert_eq!(r.placement, Placement::BottomCentre);
        assert_eq!((r.x, r.y, r.width, r.height), (-100, -80, 64, 64));
        assert_eq!(r.message_lines(), ("Hello", Some("world")));
    }

    #[test]
    fn caption_expands_environment_variable() {
        std::env::set_var("KDESK_TEST_CAPTION_USER", "marcus");
        let r = parse_icon_record(
            "me.lnk",
            "Command: true\nIcon: /i/me.png\nCaption: $KDESK_TEST_CAPTION_USER\nX: 0\nY: 0\nWidth: 1\nHeight: 1\n",
        )
        .unwrap();
        assert_eq!(r.caption, "marcus");
    }

    #[test]
    fn missing_raster_falls_back_to_default_icon() {
        let dir = temp_dir("fallback");
        let got = resolve_image(Path::new("/nonexistent/icon.png"), &dir, "/usr/default.png");
        assert_eq!(got, PathBuf::from("/usr/default.png"));

        let real = dir.join("real.png");
        std::fs::write(&real, b"not empty").unwrap();
        assert_eq!(resolve_image(&real, &dir, "/usr/default.png"), real);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn store_reads_lnk_files_sorted_and_places_last_grid_icon_last() {
        let system = temp_dir("system");
        let user = temp_dir("user");
        let cache = temp_dir("cache");
        let lnk = |name: &str| format!("Command: {name}\nIcon: /i/{name}.png\nRelative-To: grid\n");
        std::fs::write(system.join("b.lnk"), lnk("b")).unwrap();
        std::fs::write(system.join("a.lnk"), lnk("a")).unwrap();
        std::fs::write(system.join("plus.lnk"), lnk("plus")).unwrap();
        std::fs::write(system.join("notes.txt"), "ignored").unwrap();
        std::fs::write(user.join("mine.lnk"), lnk("mine")).unwrap();
        std::fs::write(user.join("broken.lnk"), "Icon: /i/x.png\n").unwrap();

        let settings = Settings::parse("LastGridIcon: plus.lnk\n");
        let mut store = ConfigStore::new(settings).with_directories(system.clone(), user.clone(), cache.clone());
        let records = store.load_icon_records().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["a", "b", "mine", "plus"]);
        assert!(records[2].user_icon);
        assert!(!records[0].user_icon);
        assert_eq!(store.records().len(), 4);

        store.reset_icon_records();
        assert!(store.records().is_empty());

        for d in [system, user, cache] {
            let _ = std::fs::remove_dir_all(d);
        }
    }

    #[test]
    fn store_without_directories_fails() {
        let mut store = ConfigStore::new(Settings::default()).with_directories(
            PathBuf::from("/nonexistent/kdesk/a"),
            PathBuf::from("/nonexistent/kdesk/b"),
            std::env::temp_dir(),
        );
        assert!(store.load_icon_records().is_err());
    }

    #[test]
    fn missing_user_directory_is_not_an_error() {
        let system = temp_dir("sysonly");
        std::fs::write(system.join("a.lnk"), "Command: a\nIcon: /i/a.png\nRelative-To: grid\n").unwrap();
        let mut store = ConfigStore::new(Settings::default()).with_directories(
            system.clone(),
            PathBuf::from("/nonexistent/kdesk/user"),
            std::env::temp_dir(),
        );
        assert_eq!(store.load_icon_records().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(system);
    }

    #[test]
    fn unreadable_icon_directory_fails_the_whole_load() {
        use std::os::unix::fs::PermissionsExt;

        // Permission bits do not stop root from listing a directory.
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        let system = temp_dir("locked");
        let user = temp_dir("open");
        std::fs::write(system.join("a.lnk"), "Command: a\nIcon: /i/a.png\nRelative-To: grid\n").unwrap();
        std::fs::write(user.join("b.lnk"), "Command: b\nIcon: /i/b.png\nRelative-To: grid\n").unwrap();
        std::fs::set_permissions(&system, std::fs::Permissions::from_mode(0o000)).unwrap();

        let mut store = ConfigStore::new(Settings::default()).with_directories(
            system.clone(),
            user.clone(),
            std::env::temp_dir(),
        );
        let result = store.load_icon_records();

        std::fs::set_permissions(&system, std::fs::Permissions::from_mode(0o755)).unwrap();
        for d in [system, user] {
            let _ = std::fs::remove_dir_all(d);
        }
        assert!(result.is_err());
    }
}
