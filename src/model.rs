//! Shop data as stored and served
//!
//! JSON field names are camelCase to match what the admin client sends.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time_window::is_blank;

pub const DEFAULT_SHOP_NAME: &str = "Tea Cafe";
pub const DEFAULT_CLOSE_MESSAGE: &str = "Sorry, we're closed at the moment. We'll be back soon!";
pub const DEFAULT_OPEN_TIME: &str = "09:00 AM";
pub const DEFAULT_CLOSE_TIME: &str = "10:00 PM";

/// Open/closed flag, used both for the operator's manual toggle and the effective status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShopStatus {
    Open,
    Closed,
}

impl ShopStatus {
    pub fn is_open(self) -> bool {
        self == ShopStatus::Open
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShopStatus::Open => "open",
            ShopStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ShopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-day closing time, with the reason shown to customers beforehand
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EarlyClosing {
    pub time: String,
    pub reason: String,
}

impl EarlyClosing {
    pub fn has_time(&self) -> bool {
        !is_blank(&self.time)
    }

    pub fn has_reason(&self) -> bool {
        !self.reason.trim().is_empty()
    }
}

/// Recurring daily opening hours
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoSchedule {
    pub enabled: bool,
    pub open_time: String,
    pub close_time: String,
}

impl Default for AutoSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            open_time: DEFAULT_OPEN_TIME.to_string(),
            close_time: DEFAULT_CLOSE_TIME.to_string(),
        }
    }
}

impl AutoSchedule {
    /// Enabled with both bounds filled in
    pub fn is_active(&self) -> bool {
        self.enabled && !is_blank(&self.open_time) && !is_blank(&self.close_time)
    }
}

/// A time-boxed promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: u32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
}

/// A menu item. Price is display text ("10", "20 / cup").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub available: bool,
}

/// The whole editable state of the shop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopConfig {
    #[serde(default)]
    pub shop_name: String,
    /// Operator's manual toggle
    #[serde(rename = "status")]
    pub manual_status: ShopStatus,
    #[serde(default)]
    pub close_message: String,
    #[serde(rename = "isEarlyClosing", default)]
    pub early_closing_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_closing: Option<EarlyClosing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_schedule: Option<AutoSchedule>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(default)]
    pub products: Vec<Product>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self::with_name(DEFAULT_SHOP_NAME)
    }
}

impl ShopConfig {
    /// First-run data for a shop with the given name
    pub fn with_name(shop_name: &str) -> Self {
        Self {
            shop_name: shop_name.to_string(),
            manual_status: ShopStatus::Open,
            close_message: DEFAULT_CLOSE_MESSAGE.to_string(),
            early_closing_enabled: false,
            early_closing: None,
            auto_schedule: Some(AutoSchedule::default()),
            offers: Vec::new(),
            products: vec![
                Product::new(1, "Tea", "Regular chai", "10"),
                Product::new(2, "Special Tea", "Special chai", "20"),
                Product::new(3, "Coffee", "Fresh coffee", "20"),
            ],
        }
    }

    /// The early closing override, but only when it is switched on and has a time
    pub fn active_early_closing(&self) -> Option<&EarlyClosing> {
        if !self.early_closing_enabled {
            return None;
        }
        self.early_closing.as_ref().filter(|ec| ec.has_time())
    }

    /// The daily schedule, but only when it is switched on with both bounds
    pub fn active_schedule(&self) -> Option<&AutoSchedule> {
        self.auto_schedule.as_ref().filter(|s| s.is_active())
    }
}

impl Product {
    pub fn new(id: u32, name: &str, desc: &str, price: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            desc: desc.to_string(),
            price: price.to_string(),
            available: true,
        }
    }
}

/// Partial replacement of a ShopConfig. Absent fields are left untouched.
///
/// `earlyClosing` and `autoSchedule` use a nested Option: absent leaves the
/// current value, `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShopPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop_name: Option<String>,
    #[serde(rename = "status", skip_serializing_if = "Option::is_none")]
    pub manual_status: Option<ShopStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_message: Option<String>,
    #[serde(rename = "isEarlyClosing", skip_serializing_if = "Option::is_none")]
    pub early_closing_enabled: Option<bool>,
    #[serde(
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub early_closing: Option<Option<EarlyClosing>>,
    #[serde(
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_schedule: Option<Option<AutoSchedule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offers: Option<Vec<Offer>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<Product>>,
}

/// Present-but-null becomes Some(None); a missing field stays None via `default`
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ShopPatch {
    /// Apply onto `config`, replacing only the fields this patch carries
    pub fn apply_to(self, config: &mut ShopConfig) {
        if let Some(shop_name) = self.shop_name {
            config.shop_name = shop_name;
        }
        if let Some(status) = self.manual_status {
            config.manual_status = status;
        }
        if let Some(message) = self.close_message {
            config.close_message = message;
        }
        if let Some(enabled) = self.early_closing_enabled {
            config.early_closing_enabled = enabled;
        }
        if let Some(early_closing) = self.early_closing {
            config.early_closing = early_closing;
        }
        if let Some(schedule) = self.auto_schedule {
            config.auto_schedule = schedule;
        }
        if let Some(offers) = self.offers {
            config.offers = offers;
        }
        if let Some(products) = self.products {
            config.products = products;
        }
    }
}

impl From<ShopConfig> for ShopPatch {
    /// A patch that replaces every field
    fn from(config: ShopConfig) -> Self {
        Self {
            shop_name: Some(config.shop_name),
            manual_status: Some(config.manual_status),
            close_message: Some(config.close_message),
            early_closing_enabled: Some(config.early_closing_enabled),
            early_closing: Some(config.early_closing),
            auto_schedule: Some(config.auto_schedule),
            offers: Some(config.offers),
            products: Some(config.products),
        }
    }
}
