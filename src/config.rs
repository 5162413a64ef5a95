use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{CompositorError, auth::ExtensionPreferences, render::Colour};

pub const DEFAULT_WALLPAPER_TOP: &str = "0x7f7f7f";
pub const DEFAULT_WALLPAPER_BOTTOM: &str = "0x1f1f1f";
pub const DEFAULT_DIAGNOSTIC_BACKGROUND: &str = "0x380c24";
pub const DEFAULT_DIAGNOSTIC_TEXT: &str = "0xffffff";
pub const DEFAULT_DISPLAY_LAYOUT: &str = "default";

const UBUNTU_FONT: &str = "/usr/share/fonts/truetype/ubuntu/Ubuntu-R.ttf";
const FALLBACK_FONTS: &[&str] = &["dejavu/DejaVuSans.ttf", "freefont/FreeSans.ttf"];
const FONT_DIRS: &[&str] = &[
    "/usr/share/fonts/truetype",
    "/usr/share/fonts/TTF",
    "/usr/share/fonts",
];

/// Options that take no value on the command line.
const FLAGS: &[&str] = &["help", "authorise-without-apparmor"];

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub wallpaper_top: Colour,
    pub wallpaper_bottom: Colour,
    pub diagnostic_background: Colour,
    pub diagnostic_text: Colour,
    pub diagnostic_path: Option<PathBuf>,
    pub diagnostic_delay: Duration,
    pub font_path: Option<PathBuf>,
    pub display_config: PathBuf,
    pub display_layout: String,
    /// Extra outputs mapped beside the host window at startup.
    pub virtual_outputs: u32,
    pub authorise_without_apparmor: bool,
    pub extensions: ExtensionPreferences,
    pub help: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wallpaper_top: [0x7f, 0x7f, 0x7f, 255],
            wallpaper_bottom: [0x1f, 0x1f, 0x1f, 255],
            diagnostic_background: [0x24, 0x0c, 0x38, 255],
            diagnostic_text: [255, 255, 255, 255],
            diagnostic_path: None,
            diagnostic_delay: Duration::ZERO,
            font_path: default_font_path(),
            display_config: default_display_config_path(),
            display_layout: DEFAULT_DISPLAY_LAYOUT.to_owned(),
            virtual_outputs: 0,
            authorise_without_apparmor: false,
            extensions: ExtensionPreferences::default(),
            help: false,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, then the options file, then `args` (without the program
    /// name).
    pub fn load(args: &[String]) -> Result<Self, CompositorError> {
        let mut values = HashMap::new();

        if let Some(path) = options_file_path()
            && path.exists()
        {
            let content = fs::read_to_string(&path).map_err(|err| {
                CompositorError::Config(format!(
                    "failed to read options file {}: {err}",
                    path.display()
                ))
            })?;
            values.extend(parse_options_file(&content)?);
            tracing::info!(path = %path.display(), "loaded options file");
        }

        values.extend(parse_command_line(args)?);
        Self::from_values(&values)
    }

    pub fn from_values(values: &HashMap<String, String>) -> Result<Self, CompositorError> {
        let mut config = Self::default();

        if let Some(raw) = values.get("wallpaper-top") {
            config.wallpaper_top = parse_colour(raw)?;
        }
        if let Some(raw) = values.get("wallpaper-bottom") {
            config.wallpaper_bottom = parse_colour(raw)?;
        }
        if let Some(raw) = values.get("diagnostic-background") {
            config.diagnostic_background = parse_colour(raw)?;
        }
        if let Some(raw) = values.get("diagnostic-text") {
            config.diagnostic_text = parse_colour(raw)?;
        }
        if let Some(raw) = values.get("diagnostic-path") {
            config.diagnostic_path = validate_diagnostic_path(raw)?;
        }
        config.diagnostic_delay = parse_delay(values, "diagnostic-delay", config.diagnostic_delay)?;
        if let Some(raw) = values.get("font-path") {
            config.font_path = Some(parse_existing_file(raw, "font-path")?);
        }
        if let Some(raw) = values.get("display-config")
            && !raw.is_empty()
        {
            config.display_config = PathBuf::from(raw);
        }
        if let Some(raw) = values.get("display-layout")
            && !raw.is_empty()
        {
            config.display_layout.clone_from(raw);
        }
        if let Some(raw) = values.get("virtual-outputs") {
            config.virtual_outputs = raw.trim().parse().map_err(|err| {
                CompositorError::Config(format!("invalid value for virtual-outputs: {raw} ({err})"))
            })?;
        }
        config.authorise_without_apparmor = parse_bool_flexible(
            values,
            "authorise-without-apparmor",
            config.authorise_without_apparmor,
        )?;
        config.extensions = ExtensionPreferences::from_lists(
            values
                .get("add-wayland-extensions")
                .map_or("", String::as_str),
            values
                .get("drop-wayland-extensions")
                .map_or("", String::as_str),
        );
        config.help = parse_bool_flexible(values, "help", false)?;

        for key in values.keys() {
            if !is_known_option(key) {
                return Err(CompositorError::Config(format!("unknown option: --{key}")));
            }
        }

        Ok(config)
    }
}

/// Hex RGB (`0x` or `#` prefix optional) as bytes of a little-endian
/// ARGB8888 pixel.
pub fn parse_colour(option: &str) -> Result<Colour, CompositorError> {
    let digits = option.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .or_else(|| digits.strip_prefix('#'))
        .unwrap_or(digits);

    let value = u32::from_str_radix(digits, 16).map_err(|_| {
        CompositorError::Config(format!(
            "Invalid colour ({option}) given in program argument"
        ))
    })?;

    Ok([
        (value & 0xff) as u8,
        ((value >> 8) & 0xff) as u8,
        ((value >> 16) & 0xff) as u8,
        255,
    ])
}

/// `None` disables diagnostics.
pub fn validate_diagnostic_path(option: &str) -> Result<Option<PathBuf>, CompositorError> {
    if option.is_empty() {
        tracing::info!("no diagnostic file given; crash reporting is disabled");
        return Ok(None);
    }

    let path = std::path::absolute(option).map_err(|err| {
        CompositorError::Config(format!("failed to resolve diagnostic path {option}: {err}"))
    })?;

    let mut details = format!("\n Inputted path: {option}");
    if path.as_os_str() != option {
        details.push_str(&format!("\n Resolved path: {}", path.display()));
    }

    if path.is_dir() {
        return Err(CompositorError::Config(format!(
            "Target of diagnostic path is a directory when it should be a file.{details}"
        )));
    }
    if path.parent().is_some_and(Path::is_file) {
        return Err(CompositorError::Config(format!(
            "Parent of diagnostic path is not a directory.{details}"
        )));
    }

    Ok(Some(path))
}

pub fn default_font_path() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(snap) = std::env::var_os("SNAP")
        && !snap.is_empty()
    {
        candidates.push(PathBuf::from(snap).join(UBUNTU_FONT.trim_start_matches('/')));
    }
    candidates.push(PathBuf::from(UBUNTU_FONT));
    for dir in FONT_DIRS {
        for font in FALLBACK_FONTS {
            candidates.push(Path::new(dir).join(font));
        }
    }

    candidates.into_iter().find(|path| path.is_file())
}

pub fn options_file_path() -> Option<PathBuf> {
    config_home().map(|dir| dir.join("frame").join("frame.config"))
}

pub fn default_display_config_path() -> PathBuf {
    config_home()
        .unwrap_or_else(std::env::temp_dir)
        .join("frame.display")
}

fn config_home() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Some(PathBuf::from(xdg));
    }

    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".config"))
}

pub fn usage() -> &'static str {
    concat!(
        "Usage: frame [options]\n",
        "  --wallpaper-top=<rgb>              top colour of the wallpaper gradient (0x7f7f7f)\n",
        "  --wallpaper-bottom=<rgb>           bottom colour of the wallpaper gradient (0x1f1f1f)\n",
        "  --diagnostic-background=<rgb>      background of the diagnostic screen (0x380c24)\n",
        "  --diagnostic-text=<rgb>            text colour of the diagnostic screen (0xffffff)\n",
        "  --diagnostic-path=<file>           file shown when no application is running\n",
        "  --diagnostic-delay=<seconds>       delay before the diagnostic screen may show (0)\n",
        "  --font-path=<file>                 font used for diagnostic text\n",
        "  --display-config=<file>            display configuration (YAML)\n",
        "  --display-layout=<name>            layout selected from the display configuration\n",
        "  --virtual-outputs=<count>          extra outputs beside the host window (0)\n",
        "  --authorise-without-apparmor       trust SNAP_NAME when AppArmor is unavailable\n",
        "  --add-wayland-extensions=<a:b>     extensions to enable for every client\n",
        "  --drop-wayland-extensions=<a:b>    extensions to disable for every client\n",
        "  --help                             show this message\n",
    )
}

fn is_known_option(key: &str) -> bool {
    matches!(
        key,
        "wallpaper-top"
            | "wallpaper-bottom"
            | "diagnostic-background"
            | "diagnostic-text"
            | "diagnostic-path"
            | "diagnostic-delay"
            | "font-path"
            | "display-config"
            | "display-layout"
            | "virtual-outputs"
            | "authorise-without-apparmor"
            | "add-wayland-extensions"
            | "drop-wayland-extensions"
            | "help"
    )
}

/// `key=value` lines; `#` starts a comment line.
fn parse_options_file(content: &str) -> Result<HashMap<String, String>, CompositorError> {
    let mut values = HashMap::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(CompositorError::Config(format!(
                "invalid options file line {}: {line}",
                index + 1
            )));
        };
        values.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    Ok(values)
}

fn parse_command_line(args: &[String]) -> Result<HashMap<String, String>, CompositorError> {
    let mut values = HashMap::new();
    let mut args = args.iter();

    while let Some(arg) = args.next() {
        let Some(option) = arg.strip_prefix("--") else {
            return Err(CompositorError::Config(format!(
                "unexpected argument: {arg}"
            )));
        };

        if let Some((key, value)) = option.split_once('=') {
            values.insert(key.to_owned(), value.to_owned());
        } else if FLAGS.contains(&option) {
            values.insert(option.to_owned(), "true".to_owned());
        } else {
            let value = args.next().ok_or_else(|| {
                CompositorError::Config(format!("missing value for --{option}"))
            })?;
            values.insert(option.to_owned(), value.clone());
        }
    }

    Ok(values)
}

fn parse_delay(
    values: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, CompositorError> {
    let Some(raw) = values.get(key) else {
        return Ok(default);
    };

    let seconds = raw.trim().parse::<i64>().map_err(|err| {
        CompositorError::Config(format!("invalid value for {key}: {raw} ({err})"))
    })?;
    let seconds = u64::try_from(seconds).map_err(|_| {
        CompositorError::Config(format!(
            "Diagnostic delay time ({seconds}) must not be negative"
        ))
    })?;
    Ok(Duration::from_secs(seconds))
}

fn parse_existing_file(raw: &str, key: &str) -> Result<PathBuf, CompositorError> {
    let path = PathBuf::from(raw);
    if !path.is_file() {
        return Err(CompositorError::Config(format!(
            "invalid value for {key}: {raw} is not a file"
        )));
    }
    Ok(path)
}

fn parse_bool_flexible(
    values: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, CompositorError> {
    let Some(raw) = values.get(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CompositorError::Config(format!(
            "invalid value for {key}: {raw} (expected bool or 0/1)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn colours_are_stored_in_pixel_byte_order() {
        assert_eq!(parse_colour("0x380c24").unwrap(), [0x24, 0x0c, 0x38, 255]);
        assert_eq!(parse_colour("#7f7f7f").unwrap(), [0x7f, 0x7f, 0x7f, 255]);
        assert_eq!(parse_colour("ff0000").unwrap(), [0, 0, 0xff, 255]);
    }

    #[test]
    fn invalid_colours_name_the_option() {
        let err = parse_colour("blue").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid colour (blue) given in program argument"
        );
        assert!(parse_colour("").is_err());
    }

    #[test]
    fn defaults_match_the_documented_colours() {
        let config = RuntimeConfig::default();
        assert_eq!(
            config.wallpaper_top,
            parse_colour(DEFAULT_WALLPAPER_TOP).unwrap()
        );
        assert_eq!(
            config.wallpaper_bottom,
            parse_colour(DEFAULT_WALLPAPER_BOTTOM).unwrap()
        );
        assert_eq!(
            config.diagnostic_background,
            parse_colour(DEFAULT_DIAGNOSTIC_BACKGROUND).unwrap()
        );
        assert_eq!(
            config.diagnostic_text,
            parse_colour(DEFAULT_DIAGNOSTIC_TEXT).unwrap()
        );
        assert_eq!(config.display_layout, DEFAULT_DISPLAY_LAYOUT);
    }

    #[test]
    fn command_line_forms() {
        let parsed = parse_command_line(&args(&[
            "--wallpaper-top=0x000000",
            "--display-layout",
            "side-by-side",
            "--authorise-without-apparmor",
        ]))
        .unwrap();

        assert_eq!(parsed["wallpaper-top"], "0x000000");
        assert_eq!(parsed["display-layout"], "side-by-side");
        assert_eq!(parsed["authorise-without-apparmor"], "true");

        assert!(parse_command_line(&args(&["stray"])).is_err());
        assert!(parse_command_line(&args(&["--font-path"])).is_err());
    }

    #[test]
    fn options_file_skips_comments() {
        let parsed =
            parse_options_file("# kiosk\n\nwallpaper-top = 0x101010\ndiagnostic-delay=5\n")
                .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["wallpaper-top"], "0x101010");
        assert!(parse_options_file("no separator").is_err());
    }

    #[test]
    fn negative_delay_is_rejected() {
        let err = RuntimeConfig::from_values(&values(&[("diagnostic-delay", "-1")])).unwrap_err();
        assert!(err.to_string().contains("must not be negative"));

        let config = RuntimeConfig::from_values(&values(&[("diagnostic-delay", "3")])).unwrap();
        assert_eq!(config.diagnostic_delay, Duration::from_secs(3));
    }

    #[test]
    fn virtual_output_count() {
        let config = RuntimeConfig::from_values(&values(&[("virtual-outputs", "2")])).unwrap();
        assert_eq!(config.virtual_outputs, 2);
        assert!(RuntimeConfig::from_values(&values(&[("virtual-outputs", "-1")])).is_err());
    }

    #[test]
    fn unknown_options_are_rejected() {
        assert!(RuntimeConfig::from_values(&values(&[("wallpaper", "0x0")])).is_err());
    }

    #[test]
    fn extension_lists_are_parsed() {
        let config = RuntimeConfig::from_values(&values(&[
            ("add-wayland-extensions", "zwlr_layer_shell_v1"),
            ("drop-wayland-extensions", "zwlr_screencopy_manager_v1"),
        ]))
        .unwrap();
        assert_eq!(
            config.extensions.preference("zwlr_layer_shell_v1"),
            Some(true)
        );
        assert_eq!(
            config.extensions.preference("zwlr_screencopy_manager_v1"),
            Some(false)
        );
    }

    #[test]
    fn diagnostic_path_validation() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(validate_diagnostic_path("").unwrap(), None);

        let file = dir.path().join("crash.log");
        assert_eq!(validate_diagnostic_path(file.to_str().unwrap()).unwrap(), Some(file.clone()));

        let err = validate_diagnostic_path(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("Target of diagnostic path is a directory"));

        fs::write(&file, "not a directory").unwrap();
        let nested = file.join("log");
        let err = validate_diagnostic_path(nested.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("Parent of diagnostic path is not a directory"));
    }

    #[test]
    fn relative_diagnostic_paths_are_made_absolute() {
        let path = validate_diagnostic_path("frame-test-diagnostic.log")
            .unwrap()
            .unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("frame-test-diagnostic.log"));
    }

    #[test]
    fn font_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ttf");
        assert!(
            RuntimeConfig::from_values(&values(&[("font-path", missing.to_str().unwrap())]))
                .is_err()
        );
    }
}
