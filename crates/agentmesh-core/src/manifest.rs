//! Agent manifest — the card an agent advertises at /.well-known/agent-card.json
//!
//! Cards arrive in two dialects: ours lists `capabilities`, the A2A SDK lists
//! `skills` (whose entries may carry an `id` instead of a `name`). Both are
//! kept as received; [`AgentManifest::normalize`] fills `capabilities` from
//! `skills` when only the latter is present.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

fn unknown_name() -> String {
    "unknown".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// One advertised capability (or A2A skill)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl CapabilityDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// `name`, falling back to `id` for SDK-style skills
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.id.as_deref())
    }
}

/// Cards in the wild list capabilities either as objects or as bare strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorEntry {
    Bare(String),
    Full(CapabilityDescriptor),
}

fn lenient_descriptors<'de, D>(deserializer: D) -> Result<Option<Vec<CapabilityDescriptor>>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Option<Vec<DescriptorEntry>> = Option::deserialize(deserializer)?;
    Ok(entries.map(|entries| {
        entries
            .into_iter()
            .map(|entry| match entry {
                DescriptorEntry::Bare(name) => CapabilityDescriptor::named(name),
                DescriptorEntry::Full(desc) => desc,
            })
            .collect()
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<String>,
}

/// Machine-readable description of an agent. Replaced wholesale on
/// re-discovery, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentManifest {
    #[serde(default = "unknown_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(
        default,
        deserialize_with = "lenient_descriptors",
        skip_serializing_if = "Option::is_none"
    )]
    pub capabilities: Option<Vec<CapabilityDescriptor>>,
    #[serde(
        default,
        deserialize_with = "lenient_descriptors",
        skip_serializing_if = "Option::is_none"
    )]
    pub skills: Option<Vec<CapabilityDescriptor>>,
    /// Base URL this card was fetched from; local bookkeeping only
    #[serde(skip)]
    pub discovered_at: Option<String>,
    /// Fields we don't model, kept so the card re-serves losslessly
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inputs for synthesizing a card when none is on disk
#[derive(Debug, Clone)]
pub struct ManifestDefaults {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub host: String,
    pub port: u16,
}

impl AgentManifest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: default_version(),
            url: None,
            endpoints: Endpoints::default(),
            capabilities: Some(Vec::new()),
            skills: None,
            discovered_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_capability(mut self, capability: CapabilityDescriptor) -> Self {
        self.capabilities.get_or_insert_with(Vec::new).push(capability);
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Parse a card from raw JSON and normalize it in one step.
    pub fn from_json(value: Value, discovered_at: Option<&str>) -> Result<Self> {
        let manifest: Self =
            serde_json::from_value(value).context("Agent card is not a JSON object")?;
        Ok(manifest.normalize(discovered_at))
    }

    /// Treat `skills` as `capabilities` when the card only has the former,
    /// and tag the card with the URL it came from.
    pub fn normalize(mut self, discovered_at: Option<&str>) -> Self {
        if self.capabilities.is_none() {
            if let Some(skills) = &self.skills {
                self.capabilities = Some(skills.clone());
            }
        }
        if let Some(url) = discovered_at {
            self.discovered_at = Some(url.to_string());
        }
        self
    }

    /// Normalized capability list (empty when the card declares none)
    pub fn capabilities(&self) -> &[CapabilityDescriptor] {
        self.capabilities.as_deref().unwrap_or_default()
    }

    pub fn skills(&self) -> &[CapabilityDescriptor] {
        self.skills.as_deref().unwrap_or_default()
    }

    /// Names from the `capabilities` array, in card order
    pub fn capability_names(&self) -> Vec<String> {
        self.capabilities()
            .iter()
            .filter_map(|c| c.display_name().map(str::to_string))
            .collect()
    }

    /// Skills first, then capabilities not already listed. Stable, no duplicates.
    pub fn advertised_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for desc in self.skills().iter().chain(self.capabilities()) {
            if let Some(name) = desc.display_name() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Match against either the normalized capabilities or the raw skills
    pub fn has_capability(&self, name: &str) -> bool {
        self.skills()
            .iter()
            .chain(self.capabilities())
            .any(|c| c.display_name() == Some(name))
    }

    /// Build the card an agent serves when no card file exists.
    pub fn default_card(defaults: &ManifestDefaults) -> Self {
        let mut card = Self::new(defaults.name.clone(), defaults.description.clone());
        card.capabilities = Some(defaults.capabilities.clone());
        card.endpoints = Endpoints {
            http: Some(format!("http://{}:{}/", defaults.host, defaults.port)),
            websocket: Some(format!("ws://{}:{}/ws", defaults.host, defaults.port)),
        };
        card.extra.insert(
            "supported_protocols".to_string(),
            Value::Array(vec![Value::String("a2a/1.0".to_string())]),
        );
        card
    }

    /// Load a card from disk, falling back to [`AgentManifest::default_card`]
    /// when the file is missing or unreadable.
    pub fn load_or_default(path: &Path, defaults: &ManifestDefaults) -> Self {
        if !path.exists() {
            warn!("Agent card not found at {}", path.display());
            return Self::default_card(defaults);
        }

        match Self::load(path) {
            Ok(card) => {
                debug!("Loaded agent card '{}' from {}", card.name, path.display());
                card
            }
            Err(e) => {
                warn!("Error loading agent card: {:#}", e);
                Self::default_card(defaults)
            }
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Self::from_json(value, None)
    }
}
