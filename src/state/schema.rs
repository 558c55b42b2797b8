//! `local.json` schema (spec §6): connections, nodes, aliases, combos,
//! pricing, settings. `#[serde(default)]` everywhere per the teacher's
//! `config/schema.rs` convention, so a hand-edited file missing a section
//! still loads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credentials::Connection;
use crate::formats::WireFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub base_url: String,
    pub api_type: String,
    pub preferred_format: WireFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cached: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<f64>,
    #[serde(default)]
    pub cache_creation: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalState {
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    /// Flat, case-sensitive alias → `provider/model` map.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Combo name → ordered list of model strings (each an alias or
    /// `provider/model`).
    #[serde(default)]
    pub combos: HashMap<String, Vec<String>>,
    /// `"provider/model"` → pricing entry.
    #[serde(default)]
    pub pricing: HashMap<String, PricingEntry>,
    /// `"provider/model"` → target wire format, overriding the provider's
    /// default target (spec §4.7: "the per-model override table ... wins
    /// over the provider default target").
    #[serde(default)]
    pub format_overrides: HashMap<String, WireFormat>,
    #[serde(default)]
    pub settings: Settings,
}
