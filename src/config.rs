//! Runtime configuration for a library instance.
//!
//! Configuration is plain JSON so the FFI caller can hand it over as a string.
//! Every field is optional; missing fields fall back to [`LibraryConfig::default`].
//!
//! ```json
//! {
//!   "maxHolds": 3,
//!   "reservationDays": 7,
//!   "mapSize": 67108864,
//!   "sweepIntervalSecs": 3600,
//!   "objectStoreDir": "kolibri_assets",
//!   "publicUrlBase": "https://cdn.example.com/kolibri"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use log::info;
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;

/// Upper bound for `reservationDays`, ten years.
pub const MAX_RESERVATION_DAYS: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryConfig {
    /// Combined reservations and rentals a single user may hold.
    pub max_holds: u32,
    /// Days an active reservation stays valid.
    pub reservation_days: u32,
    /// LMDB map size in bytes.
    pub map_size: usize,
    /// Interval of the background expiry sweep.
    pub sweep_interval_secs: u64,
    /// Directory for uploaded covers and profile pictures. Defaults to
    /// `<db name>.assets` next to the database.
    pub object_store_dir: Option<PathBuf>,
    /// Prefix for public object URLs. Defaults to a `file://` URL.
    pub public_url_base: Option<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            max_holds: 3,
            reservation_days: 7,
            map_size: 64 * 1024 * 1024,
            sweep_interval_secs: 60 * 60,
            object_store_dir: None,
            public_url_base: None,
        }
    }
}

impl LibraryConfig {
    pub fn from_json(json: &str) -> Result<Self, AppResponse> {
        let config: LibraryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppResponse> {
        info!("Loading library configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), AppResponse> {
        if self.max_holds == 0 {
            return Err(AppResponse::ValidationError(
                "maxHolds must be at least 1".to_string(),
            ));
        }
        if self.reservation_days == 0 || self.reservation_days > MAX_RESERVATION_DAYS {
            return Err(AppResponse::ValidationError(format!(
                "reservationDays must be between 1 and {MAX_RESERVATION_DAYS}"
            )));
        }
        // LMDB wants a multiple of the OS page size; 4 KiB is the common floor.
        if self.map_size < 1024 * 1024 || self.map_size % 4096 != 0 {
            return Err(AppResponse::ValidationError(
                "mapSize must be at least 1 MiB and a multiple of 4096".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(AppResponse::ValidationError(
                "sweepIntervalSecs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reservation_period(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.reservation_days))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
