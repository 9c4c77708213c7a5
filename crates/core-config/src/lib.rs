//! Configuration loading and parsing.
//!
//! Parses `fujinami.toml` into a frozen [`KeyboardConfig`]. The file names
//! layouts and, per layout, flow assignments, mappings (keys with roles plus
//! the command to emit) and transitions. Keys are raw platform key codes;
//! entries with key 0 are dropped, matching the capture hook's rule for
//! unknown keys. Unknown top-level fields are tolerated so the format can
//! grow without breaking older files.
//!
//! Loading is all-or-nothing: the first invalid key, role, modifier, flow or
//! duplicate mapping aborts the load, and the host stays in passthrough.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use core_keys::{KEY_COUNT, Key, Modifiers, to_key};
use core_layout::{
    Action, Command, FlowType, KeyAction, KeyRole, KeyboardConfig, KeyboardConfigBuilder,
    LayoutError,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    #[error("invalid key code {code} (valid codes are 1..{KEY_COUNT})")]
    InvalidKey { code: u16 },
    #[error("unknown modifier name `{0}`")]
    InvalidModifier(String),
    #[error("duplicate mapping in layout `{layout}`")]
    DuplicateMapping { layout: String },
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("config does not name a default_layout")]
    MissingDefaultLayout,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    timeout_milliseconds: Option<u64>,
    default_layout: Option<String>,
    default_im_layout: Option<String>,
    #[serde(default)]
    auto_layout: bool,
    #[serde(default)]
    layouts: Vec<LayoutSpec>,
}

#[derive(Debug, Deserialize)]
struct LayoutSpec {
    name: String,
    #[serde(default)]
    flows: Vec<FlowSpec>,
    #[serde(default)]
    mappings: Vec<MappingSpec>,
    #[serde(default)]
    transitions: Vec<TransitionSpec>,
}

#[derive(Debug, Deserialize)]
struct FlowSpec {
    key: u16,
    flow: FlowKind,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FlowKind {
    Immediate,
    Deferred,
    Simul,
    Dual,
}

impl From<FlowKind> for FlowType {
    fn from(kind: FlowKind) -> Self {
        match kind {
            FlowKind::Immediate => FlowType::Immediate,
            FlowKind::Deferred => FlowType::Deferred,
            FlowKind::Simul => FlowType::Simul,
            FlowKind::Dual => FlowType::Dual,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MappingSpec {
    keys: Vec<MappingKeySpec>,
    #[serde(default)]
    command: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
struct MappingKeySpec {
    key: u16,
    #[serde(default)]
    role: RoleKind,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RoleKind {
    #[default]
    None,
    Trigger,
    Modifier,
}

impl From<RoleKind> for KeyRole {
    fn from(kind: RoleKind) -> Self {
        match kind {
            RoleKind::None => KeyRole::None,
            RoleKind::Trigger => KeyRole::Trigger,
            RoleKind::Modifier => KeyRole::Modifier,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ActionSpec {
    Key {
        key: u16,
        #[serde(default)]
        mods: Vec<String>,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Deserialize)]
struct TransitionSpec {
    keys: Vec<u16>,
    target: String,
}

/// Load a configuration file from disk.
pub fn load(path: &Path) -> Result<Arc<KeyboardConfig>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = from_str(&text)?;
    info!(
        target: "config",
        path = %path.display(),
        layouts = config.layout_count(),
        "config loaded"
    );
    Ok(config)
}

/// Parse configuration text into a frozen config.
pub fn from_str(text: &str) -> Result<Arc<KeyboardConfig>, ConfigError> {
    let file: ConfigFile = toml::from_str(text)?;
    lower(file)
}

fn lower(file: ConfigFile) -> Result<Arc<KeyboardConfig>, ConfigError> {
    let mut builder = KeyboardConfigBuilder::new();

    if let Some(ms) = file.timeout_milliseconds {
        builder.set_timeout_dur(Duration::from_millis(ms));
    }
    builder.set_auto_layout(file.auto_layout);
    match file.default_layout.as_deref() {
        Some(name) => {
            builder.set_default_layout(name);
        }
        None => return Err(ConfigError::MissingDefaultLayout),
    }
    if let Some(name) = file.default_im_layout.as_deref() {
        builder.set_default_im_layout(name);
    }

    for spec in &file.layouts {
        lower_layout(&mut builder, spec)?;
    }

    Ok(builder.build())
}

fn lower_layout(
    builder: &mut KeyboardConfigBuilder,
    spec: &LayoutSpec,
) -> Result<(), ConfigError> {
    debug!(target: "config", layout = %spec.name, "lowering layout");

    for flow in &spec.flows {
        let Some(key) = parse_key(flow.key)? else {
            continue;
        };
        builder.layout(&spec.name).create_flow(key, flow.flow.into());
    }

    for mapping in &spec.mappings {
        let mut keys: Vec<(Key, KeyRole)> = Vec::with_capacity(mapping.keys.len());
        for entry in &mapping.keys {
            if let Some(key) = parse_key(entry.key)? {
                keys.push((key, entry.role.into()));
            }
        }
        let command = parse_command(&mapping.command)?;
        if keys.is_empty() || command.is_empty() {
            warn!(target: "config", layout = %spec.name, "skipping empty mapping");
            continue;
        }
        let created = builder.layout(&spec.name).create_mapping(&keys, command)?;
        if !created {
            return Err(ConfigError::DuplicateMapping {
                layout: spec.name.clone(),
            });
        }
    }

    for transition in &spec.transitions {
        let mut keys = Vec::with_capacity(transition.keys.len());
        for &code in &transition.keys {
            if let Some(key) = parse_key(code)? {
                keys.push(key);
            }
        }
        if keys.is_empty() || transition.target.is_empty() {
            continue;
        }
        builder.transition(&spec.name, &keys, &transition.target);
    }

    Ok(())
}

fn parse_command(specs: &[ActionSpec]) -> Result<Command, ConfigError> {
    let mut command = Command::new();
    for spec in specs {
        match spec {
            ActionSpec::Key { key, mods } => {
                let Some(key) = parse_key(*key)? else {
                    continue;
                };
                command.push(Action::Key(KeyAction::new(key, parse_modifiers(mods)?)));
            }
            ActionSpec::Text { text } => {
                for ch in text.chars() {
                    command.push(Action::Char(ch));
                }
            }
        }
    }
    Ok(command)
}

/// Key 0 is dropped silently (the capture hook's unknown key); anything out
/// of table range is a configuration error.
fn parse_key(code: u16) -> Result<Option<Key>, ConfigError> {
    if code == 0 {
        return Ok(None);
    }
    let key = to_key(code);
    if key.is_unknown() {
        return Err(ConfigError::InvalidKey { code });
    }
    Ok(Some(key))
}

fn parse_modifiers(names: &[String]) -> Result<Modifiers, ConfigError> {
    let mut mods = Modifiers::empty();
    for name in names {
        mods |= match name.as_str() {
            "shift" | "shift_left" => Modifiers::SHIFT_LEFT,
            "shift_right" => Modifiers::SHIFT_RIGHT,
            "control" | "control_left" => Modifiers::CONTROL_LEFT,
            "control_right" => Modifiers::CONTROL_RIGHT,
            "alt" | "alt_left" => Modifiers::ALT_LEFT,
            "alt_right" => Modifiers::ALT_RIGHT,
            "os" | "os_left" => Modifiers::OS_LEFT,
            "os_right" => Modifiers::OS_RIGHT,
            other => return Err(ConfigError::InvalidModifier(other.to_string())),
        };
    }
    Ok(mods)
}
