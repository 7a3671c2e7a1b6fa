//! Offer and product management
//!
//! Ids are assigned as max existing id + 1 (1 for an empty list). Uniqueness
//! follows from that rule; callers must not hand in their own duplicate ids.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Offer, Product, ShopConfig, DEFAULT_CLOSE_TIME, DEFAULT_OPEN_TIME};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("offer {0} not found")]
    OfferNotFound(u32),

    #[error("product {0} not found")]
    ProductNotFound(u32),

    #[error("{0} is required")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Anything listed by numeric id
pub trait Identified {
    fn id(&self) -> u32;
}

impl Identified for Offer {
    fn id(&self) -> u32 {
        self.id
    }
}

impl Identified for Product {
    fn id(&self) -> u32 {
        self.id
    }
}

/// Next free id: one past the largest, or 1 when empty
pub fn next_id<T: Identified>(items: &[T]) -> u32 {
    items.iter().map(Identified::id).max().unwrap_or(0) + 1
}

fn require(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        Err(CatalogError::MissingField(field))
    } else {
        Ok(())
    }
}

/// Fields for a new offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferDraft {
    pub enabled: bool,
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
}

impl Default for OfferDraft {
    fn default() -> Self {
        Self {
            enabled: true,
            title: String::new(),
            description: String::new(),
            start_time: DEFAULT_OPEN_TIME.to_string(),
            end_time: DEFAULT_CLOSE_TIME.to_string(),
        }
    }
}

/// Fields to change on an existing offer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferPatch {
    pub enabled: Option<bool>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Append a new offer with the next id; title and description must be filled in
pub fn add_offer(config: &mut ShopConfig, draft: OfferDraft) -> Result<&Offer> {
    require(&draft.title, "title")?;
    require(&draft.description, "description")?;

    let offer = Offer {
        id: next_id(&config.offers),
        enabled: draft.enabled,
        title: draft.title,
        description: draft.description,
        start_time: draft.start_time,
        end_time: draft.end_time,
    };
    config.offers.push(offer);
    Ok(&config.offers[config.offers.len() - 1])
}

pub fn update_offer(config: &mut ShopConfig, id: u32, patch: OfferPatch) -> Result<&Offer> {
    let offer = config
        .offers
        .iter_mut()
        .find(|o| o.id == id)
        .ok_or(CatalogError::OfferNotFound(id))?;

    if let Some(enabled) = patch.enabled {
        offer.enabled = enabled;
    }
    if let Some(title) = patch.title {
        offer.title = title;
    }
    if let Some(description) = patch.description {
        offer.description = description;
    }
    if let Some(start_time) = patch.start_time {
        offer.start_time = start_time;
    }
    if let Some(end_time) = patch.end_time {
        offer.end_time = end_time;
    }
    Ok(offer)
}

pub fn remove_offer(config: &mut ShopConfig, id: u32) -> Result<Offer> {
    let index = config
        .offers
        .iter()
        .position(|o| o.id == id)
        .ok_or(CatalogError::OfferNotFound(id))?;
    Ok(config.offers.remove(index))
}

/// Fields for a new product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductDraft {
    pub name: String,
    pub desc: String,
    pub price: String,
    pub available: bool,
}

impl Default for ProductDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            desc: String::new(),
            price: String::new(),
            available: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub price: Option<String>,
    pub available: Option<bool>,
}

/// Append a new product with the next id; name and price must be filled in
pub fn add_product(config: &mut ShopConfig, draft: ProductDraft) -> Result<&Product> {
    require(&draft.name, "name")?;
    require(&draft.price, "price")?;

    let product = Product {
        id: next_id(&config.products),
        name: draft.name,
        desc: draft.desc,
        price: draft.price,
        available: draft.available,
    };
    config.products.push(product);
    Ok(&config.products[config.products.len() - 1])
}

pub fn update_product(config: &mut ShopConfig, id: u32, patch: ProductPatch) -> Result<&Product> {
    let product = find_product(config, id)?;

    if let Some(name) = patch.name {
        product.name = name;
    }
    if let Some(desc) = patch.desc {
        product.desc = desc;
    }
    if let Some(price) = patch.price {
        product.price = price;
    }
    if let Some(available) = patch.available {
        product.available = available;
    }
    Ok(product)
}

pub fn remove_product(config: &mut ShopConfig, id: u32) -> Result<Product> {
    let index = config
        .products
        .iter()
        .position(|p| p.id == id)
        .ok_or(CatalogError::ProductNotFound(id))?;
    Ok(config.products.remove(index))
}

/// Flip a product between available and sold out
pub fn toggle_product(config: &mut ShopConfig, id: u32) -> Result<&Product> {
    let product = find_product(config, id)?;
    product.available = !product.available;
    Ok(product)
}

fn find_product(config: &mut ShopConfig, id: u32) -> Result<&mut Product> {
    config
        .products
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or(CatalogError::ProductNotFound(id))
}

/// Products currently on sale, in menu order
pub fn available_products(config: &ShopConfig) -> Vec<&Product> {
    config.products.iter().filter(|p| p.available).collect()
}
