//! Backup export and import
//!
//! A backup is `{ "data": ShopConfig, "auth": AuthState }`. Older backups were
//! the bare ShopConfig object; those still import, leaving the password alone.
//! Either shape may carry the flat early-closing and schedule fields
//! (`earlyClosingTime`, `dailyOpenTime`, ...), which fold into the nested ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::AuthState;
use crate::model::{AutoSchedule, EarlyClosing, ShopConfig, DEFAULT_CLOSE_TIME, DEFAULT_OPEN_TIME};
use crate::store::StoreRecord;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to parse backup file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid backup file format")]
    InvalidFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub data: ShopConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthState>,
}

impl Backup {
    pub fn from_record(record: &StoreRecord) -> Self {
        Self {
            data: record.data.clone(),
            auth: Some(record.auth.clone()),
        }
    }
}

/// A ShopConfig as older exports wrote it, with the schedule and early closing as flat fields
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyShopData {
    #[serde(flatten)]
    config: ShopConfig,
    early_closing_time: Option<String>,
    early_closing_reason: Option<String>,
    enable_auto_schedule: Option<bool>,
    daily_open_time: Option<String>,
    daily_close_time: Option<String>,
}

impl From<LegacyShopData> for ShopConfig {
    fn from(legacy: LegacyShopData) -> Self {
        let mut config = legacy.config;

        if config.early_closing.is_none()
            && (legacy.early_closing_time.is_some() || legacy.early_closing_reason.is_some())
        {
            config.early_closing = Some(EarlyClosing {
                time: legacy.early_closing_time.unwrap_or_default(),
                reason: legacy.early_closing_reason.unwrap_or_default(),
            });
        }

        if config.auto_schedule.is_none()
            && (legacy.enable_auto_schedule.is_some()
                || legacy.daily_open_time.is_some()
                || legacy.daily_close_time.is_some())
        {
            config.auto_schedule = Some(AutoSchedule {
                enabled: legacy.enable_auto_schedule.unwrap_or(false),
                open_time: legacy
                    .daily_open_time
                    .unwrap_or_else(|| DEFAULT_OPEN_TIME.to_string()),
                close_time: legacy
                    .daily_close_time
                    .unwrap_or_else(|| DEFAULT_CLOSE_TIME.to_string()),
            });
        }

        config
    }
}

#[derive(Debug, Deserialize)]
struct ImportedBackup {
    data: LegacyShopData,
    #[serde(default)]
    auth: Option<AuthState>,
}

/// Pretty JSON of the full backup
pub fn export(record: &StoreRecord) -> Result<String, BackupError> {
    Ok(serde_json::to_string_pretty(&Backup::from_record(record))?)
}

/// Parse either backup shape. Auth is only present for the full format, and only when it carries a hash.
pub fn parse_import(text: &str) -> Result<Backup, BackupError> {
    let value: Value = serde_json::from_str(text)?;

    let backup = if value.get("data").is_some() {
        let imported: ImportedBackup = serde_json::from_value(value)?;
        Backup {
            data: imported.data.into(),
            auth: imported.auth.filter(|a| !a.password_hash.trim().is_empty()),
        }
    } else if ["shopName", "status", "products"]
        .iter()
        .all(|key| value.get(key).is_some())
    {
        let legacy: LegacyShopData = serde_json::from_value(value)?;
        Backup {
            data: legacy.into(),
            auth: None,
        }
    } else {
        return Err(BackupError::InvalidFormat);
    };

    if backup.data.shop_name.trim().is_empty() {
        return Err(BackupError::InvalidFormat);
    }
    Ok(backup)
}
