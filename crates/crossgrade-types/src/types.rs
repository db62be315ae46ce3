use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A block position in the world (x, y, z integers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Encode as a 64-bit long (protocol format, 1.14+).
    /// x: 26 bits, z: 26 bits, y: 12 bits
    pub fn encode(&self) -> u64 {
        ((self.x as u64 & 0x3FFFFFF) << 38)
            | ((self.z as u64 & 0x3FFFFFF) << 12)
            | (self.y as u64 & 0xFFF)
    }

    pub fn decode(val: u64) -> Self {
        let mut x = (val >> 38) as i32;
        let mut z = ((val >> 12) & 0x3FFFFFF) as i32;
        let mut y = (val & 0xFFF) as i32;
        if x >= 1 << 25 {
            x -= 1 << 26;
        }
        if z >= 1 << 25 {
            z -= 1 << 26;
        }
        if y >= 1 << 11 {
            y -= 1 << 12;
        }
        Self { x, y, z }
    }
}

/// A 3D position with double precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A Minecraft resource identifier (e.g., "minecraft:stone").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub namespace: String,
    pub path: String,
}

impl Identifier {
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    pub fn minecraft(path: impl Into<String>) -> Self {
        Self::new("minecraft", path)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl std::str::FromStr for Identifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((ns, path)) = s.split_once(':') {
            Ok(Self::new(ns, path))
        } else {
            Ok(Self::minecraft(s))
        }
    }
}

/// A network protocol version. Identity and ordering are by numeric id only;
/// the name is for display.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolVersion {
    id: i32,
    name: &'static str,
}

impl ProtocolVersion {
    pub const fn new(id: i32, name: &'static str) -> Self {
        Self { id, name }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Versions from 1.20.2 on have a configuration phase between login and play.
    pub fn has_configuration_state(&self) -> bool {
        self.id >= V1_20_2.id
    }

    /// Look up a known version, or wrap an unknown id.
    pub fn from_id(id: i32) -> Self {
        KNOWN_VERSIONS
            .iter()
            .copied()
            .find(|v| v.id == id)
            .unwrap_or(Self { id, name: "unknown" })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        KNOWN_VERSIONS.iter().copied().find(|v| v.name == name)
    }

    pub fn is_known(&self) -> bool {
        KNOWN_VERSIONS.iter().any(|v| v.id == self.id)
    }
}

impl PartialEq for ProtocolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProtocolVersion {}

impl Hash for ProtocolVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

pub const V1_13: ProtocolVersion = ProtocolVersion::new(393, "1.13");
pub const V1_13_1: ProtocolVersion = ProtocolVersion::new(401, "1.13.1");
pub const V1_13_2: ProtocolVersion = ProtocolVersion::new(404, "1.13.2");
pub const V1_14: ProtocolVersion = ProtocolVersion::new(477, "1.14");
pub const V1_14_4: ProtocolVersion = ProtocolVersion::new(498, "1.14.4");
pub const V1_15: ProtocolVersion = ProtocolVersion::new(573, "1.15");
pub const V1_20_2: ProtocolVersion = ProtocolVersion::new(764, "1.20.2");
pub const V1_20_3: ProtocolVersion = ProtocolVersion::new(765, "1.20.3");
pub const V1_20_5: ProtocolVersion = ProtocolVersion::new(766, "1.20.5");
pub const V1_21: ProtocolVersion = ProtocolVersion::new(767, "1.21");

/// Every version the bundled protocols know about, oldest first.
pub const KNOWN_VERSIONS: &[ProtocolVersion] = &[
    V1_13, V1_13_1, V1_13_2, V1_14, V1_14_4, V1_15, V1_20_2, V1_20_3, V1_20_5, V1_21,
];

/// The kind of world a player is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
    Normal,
    Nether,
    End,
    Custom,
}

impl Environment {
    /// Legacy numeric dimension id. Unknown ids fall back to the nether,
    /// matching how old clients treat them.
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => Environment::Normal,
            1 => Environment::End,
            _ => Environment::Nether,
        }
    }

    pub fn from_key(key: &str) -> Self {
        match key {
            "minecraft:overworld" => Environment::Normal,
            "minecraft:the_nether" => Environment::Nether,
            "minecraft:the_end" => Environment::End,
            _ => Environment::Custom,
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Environment::Normal => 0,
            Environment::Nether => -1,
            Environment::End => 1,
            Environment::Custom => i32::MAX,
        }
    }
}

/// Text component for chat messages (simplified JSON text).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextComponent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlined: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfuscated: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub extra: Vec<TextComponent>,
}

impl TextComponent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"text":""}"#.to_string())
    }
}
