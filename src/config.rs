use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Limits and tuning constants of a [`crate::Geocoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub max_num_countries: usize,
    pub max_num_states: usize,
    pub max_num_cities: usize,
    pub max_num_villages: usize,
    /// Localities read from the world shard before typing them.
    pub max_num_localities: usize,
    pub pivot_rects_cache_size: usize,
    pub locality_rects_cache_size: usize,
    /// Longest token run tried as a postcode.
    pub max_postcode_tokens: usize,
    pub max_suburbs_per_prediction: usize,
    /// Meters subtracted from a shard's distance to the pivot per unit of
    /// rect similarity.
    pub similarity_bonus_m: f64,
    /// Paths kept per path finder level.
    pub max_paths: usize,
    /// Map scale used for geometric retrieval.
    pub scale: u8,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            max_num_countries: 5,
            max_num_states: 5,
            max_num_cities: 5,
            max_num_villages: 5,
            max_num_localities: crate::locality_scorer::DEFAULT_READ_LIMIT,
            pivot_rects_cache_size: 10,
            locality_rects_cache_size: 10,
            max_postcode_tokens: 3,
            max_suburbs_per_prediction: 5,
            similarity_bonus_m: 10_000.0,
            max_paths: 1_000,
            scale: 17,
        }
    }
}

impl GeocoderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigFile(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Resolve the configuration from, in order of priority:
    /// 1. An explicit config file
    /// 2. The file named by the GEOCODER_CONFIG environment variable
    /// 3. The built-in defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            Self::from_path(path)
        } else if let Ok(val) = std::env::var("GEOCODER_CONFIG") {
            Self::from_path(&PathBuf::from(val))
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("max_num_countries", self.max_num_countries),
            ("max_num_states", self.max_num_states),
            ("max_num_cities", self.max_num_cities),
            ("max_num_villages", self.max_num_villages),
            ("max_num_localities", self.max_num_localities),
            ("pivot_rects_cache_size", self.pivot_rects_cache_size),
            ("locality_rects_cache_size", self.locality_rects_cache_size),
            ("max_postcode_tokens", self.max_postcode_tokens),
            ("max_suburbs_per_prediction", self.max_suburbs_per_prediction),
            ("max_paths", self.max_paths),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{name} must be positive")));
        }
        if !self.similarity_bonus_m.is_finite() || self.similarity_bonus_m < 0.0
        {
            return Err(Error::Config(
                "similarity_bonus_m must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn pivot_cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.pivot_rects_cache_size)
            .unwrap_or(NonZeroUsize::MIN)
    }

    pub(crate) fn locality_cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.locality_rects_cache_size)
            .unwrap_or(NonZeroUsize::MIN)
    }
}
