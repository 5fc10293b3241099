use carta_common::{Position, Size};
use serde::{Deserialize, Serialize};

/// Origin tag attached to every transaction unless the handle overrides it
pub const DEFAULT_ORIGIN: &str = "carta-engine";

/// Engine tunables. Every field has a default so partial JSON config works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Transaction origin tag (`"agent:<name>"` for automated editors)
    pub origin: String,

    /// Size used for constructs that carry no explicit width/height
    pub construct_size: Size,

    /// Size given to organizers created without explicit dimensions
    pub organizer_size: Size,

    pub grid: GridConfig,
    pub layout: LayoutDefaults,
}

/// Auto-placement grid for bulk creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridConfig {
    pub columns_per_row: usize,
    pub spacing_x: f64,
    pub spacing_y: f64,
    /// Where the grid starts on an empty page
    pub origin: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutDefaults {
    /// Clear space between consecutive flow layers
    pub layer_gap: f64,
    /// Clear space between siblings in a layer, and between nudged units
    pub node_gap: f64,
    pub organizer_padding: f64,
    /// Default gap for pin constraints without one
    pub pin_gap: f64,
    pub force_iterations: usize,
    pub max_nudge_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            construct_size: Size::new(200.0, 100.0),
            organizer_size: Size::new(400.0, 300.0),
            grid: GridConfig::default(),
            layout: LayoutDefaults::default(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns_per_row: 4,
            spacing_x: 250.0,
            spacing_y: 150.0,
            origin: Position::new(100.0, 100.0),
        }
    }
}

impl Default for LayoutDefaults {
    fn default() -> Self {
        Self {
            layer_gap: 250.0,
            node_gap: 150.0,
            organizer_padding: 20.0,
            pin_gap: 40.0,
            force_iterations: 50,
            max_nudge_attempts: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{
            "origin": "agent:planner",
            "grid": { "columnsPerRow": 6 }
        }"#;

        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.origin, "agent:planner");
        assert_eq!(config.grid.columns_per_row, 6);
        assert_eq!(config.grid.spacing_x, 250.0);
        assert_eq!(config.layout.max_nudge_attempts, 100);
        assert_eq!(config.construct_size, Size::new(200.0, 100.0));
    }
}
