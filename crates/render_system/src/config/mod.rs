//! Configuration system

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is out of its valid range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Largest accepted growth factor for either arena
pub const MAX_GROWTH_FACTOR: f32 = 16.0;

/// Descriptor arena sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Entries available in the first frame
    pub initial_capacity: usize,
    /// Multiplier applied to the observed demand when the pool ran out
    pub growth_factor: f32,
    /// Upper bound for automatic growth
    pub max_capacity: usize,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            growth_factor: 1.5,
            max_capacity: 1 << 20,
        }
    }
}

/// Constant-buffer arena sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantBufferConfig {
    /// Bytes available in the first frame
    pub capacity_bytes: usize,
    /// Offset alignment of every allocation, a power of two
    pub alignment: usize,
    /// Multiplier applied to the observed demand when the arena ran out
    pub growth_factor: f32,
    /// Upper bound in bytes for automatic growth
    pub max_capacity_bytes: usize,
}

impl Default for ConstantBufferConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1024,
            alignment: 256,
            growth_factor: 1.5,
            max_capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Render system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSystemConfig {
    /// Descriptor arena
    pub descriptor_pool: DescriptorPoolConfig,
    /// Constant-buffer arena
    pub constant_buffer: ConstantBufferConfig,
    /// Effect permutation slots a feature may register
    pub max_effect_permutation_slots: usize,
    /// Grow an exhausted arena before the next frame
    pub auto_grow_pools: bool,
}

impl Default for RenderSystemConfig {
    fn default() -> Self {
        Self {
            descriptor_pool: DescriptorPoolConfig::default(),
            constant_buffer: ConstantBufferConfig::default(),
            max_effect_permutation_slots: 32,
            auto_grow_pools: true,
        }
    }
}

impl Config for RenderSystemConfig {}

impl RenderSystemConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_growth_factor("descriptor_pool.growth_factor", self.descriptor_pool.growth_factor)?;
        validate_growth_factor("constant_buffer.growth_factor", self.constant_buffer.growth_factor)?;
        if self.descriptor_pool.max_capacity < self.descriptor_pool.initial_capacity {
            return Err(ConfigError::Invalid {
                field: "descriptor_pool.max_capacity",
                reason: format!(
                    "{} is below the initial capacity {}",
                    self.descriptor_pool.max_capacity, self.descriptor_pool.initial_capacity
                ),
            });
        }
        if self.constant_buffer.max_capacity_bytes < self.constant_buffer.capacity_bytes {
            return Err(ConfigError::Invalid {
                field: "constant_buffer.max_capacity_bytes",
                reason: format!(
                    "{} is below the initial capacity {}",
                    self.constant_buffer.max_capacity_bytes, self.constant_buffer.capacity_bytes
                ),
            });
        }
        if !self.constant_buffer.alignment.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "constant_buffer.alignment",
                reason: format!("{} is not a power of two", self.constant_buffer.alignment),
            });
        }
        if self.max_effect_permutation_slots == 0 {
            return Err(ConfigError::Invalid {
                field: "max_effect_permutation_slots",
                reason: "at least one slot is required".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_growth_factor(field: &'static str, growth_factor: f32) -> Result<(), ConfigError> {
    if !growth_factor.is_finite() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{growth_factor} is not a finite number"),
        });
    }
    if !(1.0..=MAX_GROWTH_FACTOR).contains(&growth_factor) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{growth_factor} is outside 1.0..={MAX_GROWTH_FACTOR}"),
        });
    }
    Ok(())
}
