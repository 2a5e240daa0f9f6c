//! Provisioning data reader
//!
//! The connectivity engine leaves one small file per provisioning item in its
//! working directory. This module reads them back for display; it never writes.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File names written by the engine
pub mod files {
    pub const WIFI_PROV_STATUS: &str = "WifiProvStatus";
    pub const AP_SSID: &str = "IotAPSSID";
    pub const AP_AUTH_TYPE: &str = "IotAPAuthType";
    pub const AP_PASSWORD: &str = "IotAPPASS";
    pub const AP_BSSID: &str = "IotAPBSSID";
    pub const CLOUD_PROV_STATUS: &str = "CloudProvStatus";
    pub const SERVER_URL: &str = "ServerURL";
    pub const SERVER_PORT: &str = "ServerPort";
    pub const DEVICE_ID: &str = "DeviceID";
    pub const LABEL: &str = "Label";
}

/// Status value meaning "not provisioned yet"
pub const STATUS_NONE: &str = "NONE";

#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("{file} does not exist in {}", .dir.display())]
    Missing {
        file: &'static str,
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is empty")]
    Empty(&'static str),

    #[error("{file} holds an invalid value: {value:?}")]
    InvalidValue { file: &'static str, value: String },

    #[error("IotAPBSSID is {0} bytes, expected 6")]
    ShortBssid(usize),
}

/// Wi-Fi authentication modes as numbered by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiAuth {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    Max,
}

impl TryFrom<i32> for WifiAuth {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(WifiAuth::Open),
            1 => Ok(WifiAuth::Wep),
            2 => Ok(WifiAuth::WpaPsk),
            3 => Ok(WifiAuth::Wpa2Psk),
            4 => Ok(WifiAuth::WpaWpa2Psk),
            5 => Ok(WifiAuth::Wpa2Enterprise),
            6 => Ok(WifiAuth::Max),
            other => Err(other),
        }
    }
}

impl fmt::Display for WifiAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WifiAuth::Open => "OPEN",
            WifiAuth::Wep => "WEP",
            WifiAuth::WpaPsk => "WPA",
            WifiAuth::Wpa2Psk => "WPA2",
            WifiAuth::WpaWpa2Psk => "WPA/WPA2",
            WifiAuth::Wpa2Enterprise => "WPA2 Enterprise",
            WifiAuth::Max => "MAX",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

/// Everything the engine recorded during provisioning
///
/// Fields are filled in file order; a field is `None` when reading stopped
/// before it, or when the section it belongs to reported `NONE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningData {
    pub wifi_status: Option<String>,
    pub ssid: Option<String>,
    /// `None` as well when the engine wrote a code this reader does not know
    pub auth: Option<WifiAuth>,
    pub password: Option<String>,
    pub bssid: Option<MacAddress>,
    pub cloud_status: Option<String>,
    pub server_url: Option<String>,
    pub server_port: Option<String>,
    pub device_id: Option<String>,
    pub label: Option<String>,
}

/// What could be read, and why reading stopped early if it did
#[derive(Debug)]
pub struct ProvisioningReport {
    pub data: ProvisioningData,
    pub error: Option<ProvisioningError>,
}

impl ProvisioningData {
    /// Read the provisioning files from `dir`
    ///
    /// Reading stops early when a section reports `NONE`, the same way the
    /// engine stops writing files at that point. It also stops at the first
    /// missing or unreadable file; everything read before it is kept.
    pub fn read(dir: &Path) -> ProvisioningReport {
        let mut data = ProvisioningData::default();
        let error = data.fill(dir).err();
        ProvisioningReport { data, error }
    }

    fn fill(&mut self, dir: &Path) -> Result<(), ProvisioningError> {
        let status = self.wifi_status.insert(first_token(dir, files::WIFI_PROV_STATUS)?);
        if status.as_str() == STATUS_NONE {
            return Ok(());
        }

        self.ssid = Some(first_token(dir, files::AP_SSID)?);
        self.auth = read_auth(dir)?;
        self.password = Some(first_token(dir, files::AP_PASSWORD)?);
        self.bssid = Some(read_bssid(dir)?);

        let status = self.cloud_status.insert(first_token(dir, files::CLOUD_PROV_STATUS)?);
        if status.as_str() == STATUS_NONE {
            return Ok(());
        }

        self.server_url = Some(first_token(dir, files::SERVER_URL)?);
        self.server_port = Some(first_token(dir, files::SERVER_PORT)?);
        self.device_id = Some(first_token(dir, files::DEVICE_ID)?);
        self.label = Some(
            read_text(dir, files::LABEL)?
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
        );
        Ok(())
    }
}

fn read_auth(dir: &Path) -> Result<Option<WifiAuth>, ProvisioningError> {
    let raw = first_token(dir, files::AP_AUTH_TYPE)?;
    let code = raw.parse::<i32>().map_err(|_| ProvisioningError::InvalidValue {
        file: files::AP_AUTH_TYPE,
        value: raw.clone(),
    })?;
    Ok(WifiAuth::try_from(code).ok())
}

fn read_text(dir: &Path, file: &'static str) -> Result<String, ProvisioningError> {
    fs::read_to_string(dir.join(file)).map_err(|source| ProvisioningError::Missing {
        file,
        dir: dir.to_path_buf(),
        source,
    })
}

fn first_token(dir: &Path, file: &'static str) -> Result<String, ProvisioningError> {
    read_text(dir, file)?
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(ProvisioningError::Empty(file))
}

fn read_bssid(dir: &Path) -> Result<MacAddress, ProvisioningError> {
    let raw = fs::read(dir.join(files::AP_BSSID)).map_err(|source| ProvisioningError::Missing {
        file: files::AP_BSSID,
        dir: dir.to_path_buf(),
        source,
    })?;

    let bytes: [u8; 6] = raw
        .get(..6)
        .and_then(|head| head.try_into().ok())
        .ok_or(ProvisioningError::ShortBssid(raw.len()))?;

    Ok(MacAddress(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, contents: &[u8]) {
        fs::write(dir.path().join(file), contents).unwrap();
    }

    fn provisioned_wifi(dir: &TempDir) {
        write(dir, files::WIFI_PROV_STATUS, b"DONE\n");
        write(dir, files::AP_SSID, b"home-net\n");
        write(dir, files::AP_AUTH_TYPE, b"3\n");
        write(dir, files::AP_PASSWORD, b"hunter2\n");
        write(dir, files::AP_BSSID, &[0xb8, 0x27, 0xeb, 0x01, 0x0a, 0xff]);
    }

    #[test]
    fn test_wifi_not_provisioned() {
        let dir = TempDir::new().unwrap();
        write(&dir, files::WIFI_PROV_STATUS, b"NONE");

        let report = ProvisioningData::read(dir.path());
        assert!(report.error.is_none());
        assert_eq!(report.data.wifi_status.as_deref(), Some("NONE"));
        assert!(report.data.ssid.is_none());
        assert!(report.data.cloud_status.is_none());
    }

    #[test]
    fn test_full_provisioning() {
        let dir = TempDir::new().unwrap();
        provisioned_wifi(&dir);
        write(&dir, files::CLOUD_PROV_STATUS, b"DONE");
        write(&dir, files::SERVER_URL, b"mqtt-regional.example.com");
        write(&dir, files::SERVER_PORT, b"8883");
        write(&dir, files::DEVICE_ID, b"0b1c2d3e");
        write(&dir, files::LABEL, b"Living room\n  lamp\n");

        let report = ProvisioningData::read(dir.path());
        assert!(report.error.is_none());
        let data = report.data;
        assert_eq!(data.ssid.as_deref(), Some("home-net"));
        assert_eq!(data.auth, Some(WifiAuth::Wpa2Psk));
        assert_eq!(WifiAuth::Wpa2Psk.to_string(), "WPA2");
        assert_eq!(data.bssid.unwrap().to_string(), "b8:27:eb:01:0a:ff");
        assert_eq!(data.server_port.as_deref(), Some("8883"));
        assert_eq!(data.label.as_deref(), Some("Living room lamp"));
    }

    #[test]
    fn test_cloud_not_provisioned() {
        let dir = TempDir::new().unwrap();
        provisioned_wifi(&dir);
        write(&dir, files::CLOUD_PROV_STATUS, b"NONE");

        let report = ProvisioningData::read(dir.path());
        assert!(report.error.is_none());
        assert!(report.data.bssid.is_some());
        assert_eq!(report.data.cloud_status.as_deref(), Some("NONE"));
        assert!(report.data.server_url.is_none());
    }

    #[test]
    fn test_missing_status_file() {
        let dir = TempDir::new().unwrap();
        let report = ProvisioningData::read(dir.path());

        assert!(matches!(
            report.error,
            Some(ProvisioningError::Missing {
                file: files::WIFI_PROV_STATUS,
                ..
            })
        ));
        assert_eq!(report.data, ProvisioningData::default());
    }

    #[test]
    fn test_missing_file_keeps_earlier_fields() {
        let dir = TempDir::new().unwrap();
        provisioned_wifi(&dir);
        write(&dir, files::CLOUD_PROV_STATUS, b"DONE");
        write(&dir, files::SERVER_URL, b"mqtt-regional.example.com");

        let report = ProvisioningData::read(dir.path());
        assert!(matches!(
            report.error,
            Some(ProvisioningError::Missing {
                file: files::SERVER_PORT,
                ..
            })
        ));
        assert_eq!(report.data.ssid.as_deref(), Some("home-net"));
        assert_eq!(report.data.cloud_status.as_deref(), Some("DONE"));
        assert_eq!(
            report.data.server_url.as_deref(),
            Some("mqtt-regional.example.com")
        );
        assert!(report.data.server_port.is_none());
        assert!(report.data.device_id.is_none());
    }

    #[test]
    fn test_short_bssid() {
        let dir = TempDir::new().unwrap();
        provisioned_wifi(&dir);
        write(&dir, files::AP_BSSID, &[1, 2, 3]);

        let report = ProvisioningData::read(dir.path());
        assert!(matches!(report.error, Some(ProvisioningError::ShortBssid(3))));
        assert_eq!(report.data.password.as_deref(), Some("hunter2"));
        assert!(report.data.bssid.is_none());
    }

    #[test]
    fn test_unknown_auth_type_is_skipped() {
        let dir = TempDir::new().unwrap();
        provisioned_wifi(&dir);
        write(&dir, files::AP_AUTH_TYPE, b"9");
        write(&dir, files::CLOUD_PROV_STATUS, b"NONE");

        let report = ProvisioningData::read(dir.path());
        assert!(report.error.is_none());
        assert!(report.data.auth.is_none());
        assert_eq!(report.data.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_unreadable_auth_type() {
        let dir = TempDir::new().unwrap();
        provisioned_wifi(&dir);
        write(&dir, files::AP_AUTH_TYPE, b"wpa2");

        let report = ProvisioningData::read(dir.path());
        assert!(matches!(
            report.error,
            Some(ProvisioningError::InvalidValue {
                file: files::AP_AUTH_TYPE,
                ..
            })
        ));
        assert_eq!(report.data.ssid.as_deref(), Some("home-net"));
    }
}
