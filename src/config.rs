use crate::error::{EResult, Error};
use crate::io::modbus::{CoilAddress, Span, DEFAULT_PORT, DEFAULT_UNIT};
use crate::io::{self, Input};
use indexmap::IndexMap;
use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL: Duration = Duration::from_millis(100);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound for any blocking call inside the poll loop
pub const MAX_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_OVERLAP: Duration = Duration::from_millis(100);
pub const DEFAULT_PLAYER: &str = "cvlc";
pub const DEFAULT_QUIT_KEY: char = 'q';

fn default_poll() -> Duration {
    DEFAULT_POLL
}

fn default_cooldown() -> Duration {
    DEFAULT_COOLDOWN
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_overlap() -> Duration {
    DEFAULT_OVERLAP
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_unit() -> u8 {
    DEFAULT_UNIT
}

fn default_quit_key() -> char {
    DEFAULT_QUIT_KEY
}

fn default_true() -> bool {
    true
}

fn default_player_command() -> String {
    DEFAULT_PLAYER.to_owned()
}

fn default_player_args() -> Vec<String> {
    [
        "--fullscreen",
        "--no-video-title-show",
        "--play-and-exit",
        "--no-audio",
        "--quiet",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    version: u16,
    pub source: SourceConfig,
    #[serde(
        default = "default_poll",
        deserialize_with = "crate::interval::deserialize_interval"
    )]
    pub poll: Duration,
    #[serde(
        default = "default_cooldown",
        deserialize_with = "crate::interval::deserialize_interval"
    )]
    pub cooldown: Duration,
    #[serde(default)]
    pub videos: IndexMap<String, PathBuf>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub startup: Option<String>,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Modbus(ModbusConfig),
    Gpio(GpioConfig),
    Keyboard(KeyboardConfig),
}

impl SourceConfig {
    pub fn kind(&self) -> io::Kind {
        match self {
            SourceConfig::Modbus(_) => io::Kind::Modbus,
            SourceConfig::Gpio(_) => io::Kind::Gpio,
            SourceConfig::Keyboard(_) => io::Kind::Keyboard,
        }
    }
    /// Configured inputs, ascending by address
    pub fn inputs(&self) -> EResult<Vec<Input>> {
        match self {
            SourceConfig::Modbus(c) => c.inputs(),
            SourceConfig::Gpio(c) => c.inputs(),
            SourceConfig::Keyboard(c) => c.inputs(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ModbusConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit")]
    pub unit: u8,
    #[serde(
        default = "default_timeout",
        deserialize_with = "crate::interval::deserialize_interval"
    )]
    pub timeout: Duration,
    pub coils: IndexMap<String, CoilAddress>,
}

impl ModbusConfig {
    pub fn inputs(&self) -> EResult<Vec<Input>> {
        let mut entries = Vec::with_capacity(self.coils.len());
        for (name, addr) in &self.coils {
            entries.push((name, addr.address()?));
        }
        io::sorted_inputs(entries)
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct GpioConfig {
    pub pins: IndexMap<String, u8>,
    #[serde(default = "default_true")]
    pub pull_up: bool,
}

impl GpioConfig {
    pub fn inputs(&self) -> EResult<Vec<Input>> {
        io::sorted_inputs(self.pins.iter().map(|(name, pin)| (name, u16::from(*pin))))
    }
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct KeyboardConfig {
    pub keys: IndexMap<String, char>,
    /// Stops the loop, Esc does too
    #[serde(default = "default_quit_key")]
    pub quit: char,
}

impl KeyboardConfig {
    /// Key slots are numbered in configuration order
    pub fn inputs(&self) -> EResult<Vec<Input>> {
        let mut entries = Vec::with_capacity(self.keys.len());
        for (i, name) in self.keys.keys().enumerate() {
            let slot = u16::try_from(i)
                .map_err(|_| Error::configuration("too many keys configured"))?;
            entries.push((name, slot));
        }
        io::sorted_inputs(entries)
    }
}

#[derive(Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerKind {
    #[default]
    Command,
    Log,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    #[serde(default)]
    pub kind: PlayerKind,
    #[serde(default = "default_player_command")]
    pub command: String,
    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
    #[serde(
        default = "default_overlap",
        deserialize_with = "crate::interval::deserialize_interval"
    )]
    pub overlap: Duration,
    #[serde(default)]
    pub video_dir: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            kind: PlayerKind::default(),
            command: default_player_command(),
            args: default_player_args(),
            overlap: default_overlap(),
            video_dir: None,
        }
    }
}

/// What an input does when it triggers
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Action {
    Play(PathBuf),
    Stop,
}

impl Config {
    /// Loads the configuration file, rendering it as a template first
    ///
    /// The process environment is available to the template as `env`.
    pub fn load<P: AsRef<Path>>(path: P) -> EResult<Self> {
        let path = path.as_ref();
        let config_tpl = fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("unable to read {}: {}", path.display(), e))
        })?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::parse(&config_tpl, &base_dir)
    }
    pub fn parse(config_tpl: &str, base_dir: &Path) -> EResult<Self> {
        let mut context = tera::Context::new();
        let env: BTreeMap<String, String> = std::env::vars().collect();
        context.insert("env", &env);
        let rendered = tera::Tera::default().render_str(config_tpl, &context)?;
        let mut config: Config = serde_yaml::from_str(&rendered)?;
        if config.version != 1 {
            return Err(Error::configuration(format!(
                "config version {} is not supported",
                config.version
            )));
        }
        config.base_dir = base_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }
    fn validate(&self) -> EResult<()> {
        let inputs = self.source.inputs()?;
        let known = |name: &str| inputs.iter().any(|i| i.name == name);
        if self.poll.is_zero() {
            return Err(Error::configuration("poll interval must be positive"));
        }
        if let SourceConfig::Modbus(ref c) = self.source {
            if c.timeout.is_zero() || c.timeout > MAX_TIMEOUT {
                return Err(Error::configuration(format!(
                    "modbus timeout must be within (0, {:?}], got {:?}",
                    MAX_TIMEOUT, c.timeout
                )));
            }
            let addresses: Vec<u16> = inputs.iter().map(|i| i.address).collect();
            Span::covering(&addresses)?;
        }
        if self.player.overlap > MAX_TIMEOUT {
            return Err(Error::configuration(format!(
                "player overlap must not exceed {:?}",
                MAX_TIMEOUT
            )));
        }
        for name in self.videos.keys() {
            if !known(name) {
                return Err(Error::configuration(format!(
                    "video mapped to unknown input {name}"
                )));
            }
        }
        for name in &self.stop {
            if !known(name) {
                return Err(Error::configuration(format!(
                    "stop action for unknown input {name}"
                )));
            }
            if self.videos.contains_key(name) {
                return Err(Error::configuration(format!(
                    "input {name} has both a video and the stop action"
                )));
            }
        }
        if let Some(ref name) = self.startup {
            if !self.videos.contains_key(name) {
                return Err(Error::configuration(format!(
                    "startup input {name} has no video"
                )));
            }
        }
        if self.videos.is_empty() {
            return Err(Error::configuration("no videos configured"));
        }
        Ok(())
    }
    #[inline]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
    /// Inputs which neither play a video nor stop playback
    pub fn unmapped_inputs(&self) -> EResult<Vec<Input>> {
        Ok(self
            .source
            .inputs()?
            .into_iter()
            .filter(|i| !self.videos.contains_key(&i.name) && !self.stop.contains(&i.name))
            .collect())
    }
    /// Input name to action table, video paths resolved
    pub fn actions(&self) -> BTreeMap<String, Action> {
        let mut actions = BTreeMap::new();
        for (name, path) in &self.videos {
            actions.insert(name.clone(), Action::Play(self.resolve_video(path)));
        }
        for name in &self.stop {
            actions.insert(name.clone(), Action::Stop);
        }
        actions
    }
    /// Absolute paths are taken as-is, relative ones are looked up in
    /// `video_dir` and then next to the configuration file
    pub fn resolve_video(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let mut candidates = Vec::with_capacity(2);
        if let Some(ref dir) = self.player.video_dir {
            candidates.push(self.base_dir.join(dir).join(path));
        }
        candidates.push(self.base_dir.join(path));
        candidates
            .iter()
            .find(|p| p.exists())
            .unwrap_or(&candidates[0])
            .clone()
    }
    pub fn warn_unmapped(&self) -> EResult<()> {
        for input in self.unmapped_inputs()? {
            warn!(
                "input {} ({}) has no video mapping, its triggers will be dropped",
                input.name, input.address
            );
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
version: 1
source:
  kind: modbus
  host: 192.168.1.100
  coils:
    Process_step_1: 0
    Guide_steps: c1
    Warning: 2
    Process_step_2: 3
    Process_step_3: 4
cooldown: 5s
videos:
  Process_step_1: Process_step_1.mp4
  Guide_steps: Guide_steps.mp4
  Warning: Warning.mp4
  Process_step_2: Process_step_2.mp4
  Process_step_3: Process_step_3.mp4
startup: Guide_steps
"#;

    fn parse(s: &str) -> EResult<Config> {
        Config::parse(s, Path::new("/srv/video"))
    }

    #[test]
    fn test_sample() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.poll, DEFAULT_POLL);
        assert_eq!(config.cooldown, Duration::from_secs(5));
        let SourceConfig::Modbus(ref m) = config.source else {
            panic!("modbus source expected");
        };
        assert_eq!(m.port, 502);
        assert_eq!(m.unit, 1);
        assert_eq!(m.timeout, Duration::from_secs(1));
        let inputs = config.source.inputs().unwrap();
        assert_eq!(inputs.len(), 5);
        assert_eq!(inputs[1], Input::new("Guide_steps", 1));
        assert_eq!(config.player.kind, PlayerKind::Command);
        assert_eq!(config.player.command, "cvlc");
        let actions = config.actions();
        assert_eq!(
            actions.get("Warning"),
            Some(&Action::Play(PathBuf::from("/srv/video/Warning.mp4")))
        );
        assert!(config.unmapped_inputs().unwrap().is_empty());
    }

    #[test]
    fn test_template() {
        std::env::set_var("VIDPLC_TEST_HOST", "10.0.0.7");
        let config = parse(&SAMPLE.replace(
            "host: 192.168.1.100",
            "host: \"{{ env.VIDPLC_TEST_HOST }}\"",
        ))
        .unwrap();
        let SourceConfig::Modbus(ref m) = config.source else {
            panic!("modbus source expected");
        };
        assert_eq!(m.host, "10.0.0.7");
    }

    #[test]
    fn test_invalid() {
        let cases = [
            ("version: 1", "version: 2"),
            ("host: 192.168.1.100", "host: 192.168.1.100\n  timeout: 3s"),
            ("Warning: 2", "Warning: 1"),
            ("Warning: 2", "Warning: h2"),
            ("Process_step_3: 4", "Process_step_3: c65535"),
            ("startup: Guide_steps", "startup: Missing"),
            ("startup: Guide_steps", "stop: [Warning]"),
            ("cooldown: 5s", "cooldown: 5s\nvideos_dir: /tmp"),
            ("Warning: Warning.mp4", "Unknown: Warning.mp4"),
        ];
        for (from, to) in cases {
            let err = parse(&SAMPLE.replace(from, to)).unwrap_err();
            assert!(!err.is_recoverable(), "{to}: {err}");
        }
    }

    #[test]
    fn test_stop_and_unmapped() {
        let err = parse(&(SAMPLE.replace("  Warning: Warning.mp4\n", "") + "stop: [Process_step_3]\n"))
            .unwrap_err();
        // Process_step_3 has a video already
        assert!(err.to_string().contains("both a video"));
        let config = parse(
            &(SAMPLE
                .replace("  Warning: Warning.mp4\n", "")
                .replace("  Process_step_3: Process_step_3.mp4\n", "")
                + "stop: [Process_step_3]\n"),
        )
        .unwrap();
        assert_eq!(config.actions().get("Process_step_3"), Some(&Action::Stop));
        let unmapped = config.unmapped_inputs().unwrap();
        assert_eq!(unmapped, vec![Input::new("Warning", 2)]);
    }

    #[test]
    fn test_gpio_and_keyboard() {
        let config = parse(
            r#"
version: 1
source:
  kind: gpio
  pins:
    Process_step_2: 17
    Guide_steps: 27
    Stop: 4
poll: 50ms
videos:
  Process_step_2: /home/pi/Videos/Process.mp4
  Guide_steps: /home/pi/Videos/Place.mp4
stop: [Stop]
player:
  kind: log
"#,
        )
        .unwrap();
        let inputs = config.source.inputs().unwrap();
        let pins: Vec<u16> = inputs.iter().map(|i| i.address).collect();
        assert_eq!(pins, vec![4, 17, 27]);
        assert_eq!(config.poll, Duration::from_millis(50));
        assert_eq!(config.player.kind, PlayerKind::Log);
        assert_eq!(
            config.actions().get("Guide_steps"),
            Some(&Action::Play(PathBuf::from("/home/pi/Videos/Place.mp4")))
        );
        let config = parse(
            r#"
version: 1
source:
  kind: keyboard
  keys: { Process_step_1: a, Guide_steps: c }
videos:
  Process_step_1: a.mp4
"#,
        )
        .unwrap();
        assert_eq!(config.source.kind(), io::Kind::Keyboard);
        assert_eq!(config.source.inputs().unwrap()[1], Input::new("Guide_steps", 1));
        let SourceConfig::Keyboard(ref k) = config.source else {
            panic!("keyboard source expected");
        };
        assert_eq!(k.quit, 'q');
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidplc.yml");
        std::fs::write(&path, SAMPLE).unwrap();
        std::fs::write(dir.path().join("Warning.mp4"), b"").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.base_dir(), dir.path());
        assert_eq!(
            config.actions().get("Warning"),
            Some(&Action::Play(dir.path().join("Warning.mp4")))
        );
        assert!(Config::load(dir.path().join("missing.yml")).is_err());
    }
}
