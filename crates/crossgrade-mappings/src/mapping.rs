use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("conflicting {category} mapping: {old} -> {new} clashes with {existing_old} -> {existing_new}")]
    Conflict {
        category: &'static str,
        old: i32,
        new: i32,
        existing_old: i32,
        existing_new: i32,
    },
    #[error("invalid mapping JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The identifier registries a version pair can remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingCategory {
    Blocks,
    BlockStates,
    Items,
    Entities,
    Sounds,
    Menus,
    Attributes,
    Particles,
    DataComponents,
}

impl MappingCategory {
    pub const ALL: [MappingCategory; 9] = [
        MappingCategory::Blocks,
        MappingCategory::BlockStates,
        MappingCategory::Items,
        MappingCategory::Entities,
        MappingCategory::Sounds,
        MappingCategory::Menus,
        MappingCategory::Attributes,
        MappingCategory::Particles,
        MappingCategory::DataComponents,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MappingCategory::Blocks => "blocks",
            MappingCategory::BlockStates => "block_states",
            MappingCategory::Items => "items",
            MappingCategory::Entities => "entities",
            MappingCategory::Sounds => "sounds",
            MappingCategory::Menus => "menus",
            MappingCategory::Attributes => "attributes",
            MappingCategory::Particles => "particles",
            MappingCategory::DataComponents => "data_components",
        }
    }
}

impl std::fmt::Display for MappingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A bidirectional old <-> new id table for one category.
///
/// Built from `(old, new)` pairs; a pair that would make either direction
/// ambiguous is rejected, so `old_id(new_id(x)) == x` for every mapped `x`.
/// Lookups that miss return the placeholder and log once per distinct id.
#[derive(Debug)]
pub struct IdMapping {
    label: &'static str,
    forward: HashMap<i32, i32>,
    inverse: HashMap<i32, i32>,
    placeholder: i32,
    warn_on_miss: bool,
    missed: Mutex<HashSet<(bool, i32)>>,
}

impl IdMapping {
    pub fn from_pairs(
        label: &'static str,
        pairs: impl IntoIterator<Item = (i32, i32)>,
    ) -> Result<Self, MappingError> {
        let mut forward = HashMap::new();
        let mut inverse = HashMap::new();
        for (old, new) in pairs {
            if let Some(&existing_new) = forward.get(&old) {
                if existing_new != new {
                    return Err(MappingError::Conflict {
                        category: label,
                        old,
                        new,
                        existing_old: old,
                        existing_new,
                    });
                }
                continue;
            }
            if let Some(&existing_old) = inverse.get(&new) {
                return Err(MappingError::Conflict {
                    category: label,
                    old,
                    new,
                    existing_old,
                    existing_new: new,
                });
            }
            forward.insert(old, new);
            inverse.insert(new, old);
        }
        Ok(Self {
            label,
            forward,
            inverse,
            placeholder: 0,
            warn_on_miss: true,
            missed: Mutex::new(HashSet::new()),
        })
    }

    /// Id returned for lookups that miss.
    pub fn with_placeholder(mut self, placeholder: i32) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn suppress_warnings(&mut self) {
        self.warn_on_miss = false;
    }

    pub fn try_new_id(&self, old: i32) -> Option<i32> {
        self.forward.get(&old).copied()
    }

    pub fn try_old_id(&self, new: i32) -> Option<i32> {
        self.inverse.get(&new).copied()
    }

    pub fn new_id(&self, old: i32) -> i32 {
        match self.try_new_id(old) {
            Some(id) => id,
            None => self.miss(true, old),
        }
    }

    pub fn old_id(&self, new: i32) -> i32 {
        match self.try_old_id(new) {
            Some(id) => id,
            None => self.miss(false, new),
        }
    }

    fn miss(&self, forward: bool, id: i32) -> i32 {
        if self.warn_on_miss {
            let first = self
                .missed
                .lock()
                .map(|mut missed| missed.insert((forward, id)))
                .unwrap_or(false);
            if first {
                let direction = if forward { "new" } else { "old" };
                warn!(
                    "No {} {} id for {}, using {}",
                    direction, self.label, id, self.placeholder
                );
            }
        }
        self.placeholder
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Mapping tables as stored on disk: one optional pair list per category.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MappingFile {
    pub blocks: Option<Vec<(i32, i32)>>,
    pub block_states: Option<Vec<(i32, i32)>>,
    pub items: Option<Vec<(i32, i32)>>,
    pub entities: Option<Vec<(i32, i32)>>,
    pub sounds: Option<Vec<(i32, i32)>>,
    pub menus: Option<Vec<(i32, i32)>>,
    pub attributes: Option<Vec<(i32, i32)>>,
    pub particles: Option<Vec<(i32, i32)>>,
    pub data_components: Option<Vec<(i32, i32)>>,
}

impl MappingFile {
    fn take(&mut self, category: MappingCategory) -> Option<Vec<(i32, i32)>> {
        match category {
            MappingCategory::Blocks => self.blocks.take(),
            MappingCategory::BlockStates => self.block_states.take(),
            MappingCategory::Items => self.items.take(),
            MappingCategory::Entities => self.entities.take(),
            MappingCategory::Sounds => self.sounds.take(),
            MappingCategory::Menus => self.menus.take(),
            MappingCategory::Attributes => self.attributes.take(),
            MappingCategory::Particles => self.particles.take(),
            MappingCategory::DataComponents => self.data_components.take(),
        }
    }
}

/// Every id table of one version pair. Categories without a table are identity.
#[derive(Debug, Default)]
pub struct MappingData {
    tables: HashMap<MappingCategory, IdMapping>,
}

impl MappingData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(mut file: MappingFile) -> Result<Self, MappingError> {
        let mut data = Self::new();
        for category in MappingCategory::ALL {
            if let Some(pairs) = file.take(category) {
                data.insert(category, IdMapping::from_pairs(category.name(), pairs)?);
            }
        }
        Ok(data)
    }

    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        Self::from_file(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Builder-style table insertion.
    pub fn with(mut self, category: MappingCategory, mapping: IdMapping) -> Self {
        self.insert(category, mapping);
        self
    }

    pub fn insert(&mut self, category: MappingCategory, mapping: IdMapping) {
        self.tables.insert(category, mapping);
    }

    pub fn get(&self, category: MappingCategory) -> Option<&IdMapping> {
        self.tables.get(&category)
    }

    pub fn has(&self, category: MappingCategory) -> bool {
        self.tables.contains_key(&category)
    }

    /// Forward lookup; identity when the category has no table.
    pub fn new_id(&self, category: MappingCategory, old: i32) -> i32 {
        self.get(category).map_or(old, |table| table.new_id(old))
    }

    /// Inverse lookup; identity when the category has no table.
    pub fn old_id(&self, category: MappingCategory, new: i32) -> i32 {
        self.get(category).map_or(new, |table| table.old_id(new))
    }

    pub fn suppress_warnings(&mut self) {
        for table in self.tables.values_mut() {
            table.suppress_warnings();
        }
    }

    /// Change the miss placeholder of one table, if present.
    pub fn set_placeholder(&mut self, category: MappingCategory, placeholder: i32) {
        if let Some(table) = self.tables.get_mut(&category) {
            table.placeholder = placeholder;
        }
    }

    /// Take every table of `other`, replacing ours for the same category.
    pub fn merge(&mut self, other: MappingData) {
        self.tables.extend(other.tables);
    }

    pub fn categories(&self) -> impl Iterator<Item = MappingCategory> + '_ {
        self.tables.keys().copied()
    }
}
