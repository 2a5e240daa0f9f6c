//! Device configuration documents and runtime settings
//!
//! The device is brought up from two JSON documents produced by the cloud
//! developer workspace: the device identity (`device_info.json`) and the
//! onboarding parameters (`onboarding_config.json`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stdevice_shared::limits;
use thiserror::Error;

pub const DEFAULT_DEVICE_INFO_PATH: &str = "./device_info.json";
pub const DEFAULT_ONBOARDING_CONFIG_PATH: &str = "./onboarding_config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    /// Attach the document path to a parse failure
    fn at(self, path: &Path) -> Self {
        match self {
            ConfigError::Json(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        }
    }
}

/// Contents of `device_info.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(rename = "deviceInfo")]
    pub device_info: DeviceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub firmware_version: String,
    pub private_key: String,
    pub public_key: String,
    pub serial_number: String,
}

/// Contents of `onboarding_config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingConfig {
    #[serde(rename = "onboardingConfig")]
    pub onboarding: Onboarding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Onboarding {
    pub device_onboarding_id: String,
    pub mn_id: String,
    pub setup_id: String,
    pub vid: String,
    pub device_type_id: String,
    #[serde(default)]
    pub ownership_validation_types: Vec<String>,
    #[serde(default)]
    pub identity_type: Option<String>,
}

impl DeviceIdentity {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let identity: Self = serde_json::from_str(text)?;
        identity.validate()?;
        Ok(identity)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json(&read_document(path)?).map_err(|e| e.at(path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let info = &self.device_info;
        require("deviceInfo.firmwareVersion", &info.firmware_version)?;
        require("deviceInfo.privateKey", &info.private_key)?;
        require("deviceInfo.publicKey", &info.public_key)?;
        require("deviceInfo.serialNumber", &info.serial_number)?;
        Ok(())
    }
}

impl OnboardingConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json(&read_document(path)?).map_err(|e| e.at(path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let onb = &self.onboarding;
        require("onboardingConfig.deviceOnboardingId", &onb.device_onboarding_id)?;
        require("onboardingConfig.mnId", &onb.mn_id)?;
        require("onboardingConfig.vid", &onb.vid)?;
        require("onboardingConfig.deviceTypeId", &onb.device_type_id)?;
        require("onboardingConfig.setupId", &onb.setup_id)?;

        if onb.setup_id.len() != 3 || !onb.setup_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidField {
                field: "onboardingConfig.setupId",
                reason: format!("expected 3 digits, got {:?}", onb.setup_id),
            });
        }
        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Settings for the runtime shell
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Time given to the engine to accept the session
    pub start_timeout: Duration,
    /// Capacity of the engine -> runtime event queue
    pub event_capacity: usize,
    /// Upper bound on how long the loop takes to notice cancellation
    pub poll_interval: Duration,
    /// How long shutdown waits for dispatched handlers to finish
    pub shutdown_grace: Duration,
    /// Longest string attribute accepted by the codec
    pub max_string_len: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(limits::DEFAULT_START_TIMEOUT_SECS),
            event_capacity: 100,
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            max_string_len: limits::MAX_STRING_LEN,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const DEVICE_INFO: &str = r#"{
        "deviceInfo": {
            "firmwareVersion": "0.1.0",
            "privateKey": "dGVzdC1wcml2YXRlLWtleQ==",
            "publicKey": "dGVzdC1wdWJsaWMta2V5",
            "serialNumber": "STDKtest0001"
        }
    }"#;

    pub const ONBOARDING_CONFIG: &str = r#"{
        "onboardingConfig": {
            "deviceOnboardingId": "RPiSwitch",
            "mnId": "fTst",
            "setupId": "001",
            "vid": "RPi-Switch",
            "deviceTypeId": "Switch",
            "ownershipValidationTypes": ["JUSTWORKS"],
            "identityType": "ED25519"
        }
    }"#;

    pub fn identity() -> DeviceIdentity {
        DeviceIdentity::from_json(DEVICE_INFO).expect("valid device info")
    }

    pub fn onboarding() -> OnboardingConfig {
        OnboardingConfig::from_json(ONBOARDING_CONFIG).expect("valid onboarding config")
    }
}
