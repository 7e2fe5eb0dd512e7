use crate::domain::errors::DomainError;
use crate::domain::value_objects::{Money, Quantity, Unit};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

text_enum! {
    /// Negotiation progress shown on a listing.
    pub enum DealStatus as "deal status" {
        Available => "available",
        PartiallySold => "partially_sold",
        SellerConfirmed => "seller_confirmed",
        DealConfirmed => "deal_confirmed",
        OutOfStock => "out_of_stock",
        Sold => "sold",
    }
}

text_enum! {
    pub enum ProductStatus as "product status" {
        Available => "available",
        SoldPendingConfirmation => "sold_pending_confirmation",
        Sold => "sold",
        OutOfStock => "out_of_stock",
    }
}

text_enum! {
    /// How a stock update treats the submitted quantity.
    pub enum StockMode as "stock update mode" {
        Add => "add",
        Replace => "replace",
    }
}

impl StockMode {
    /// Accepts `set` as a legacy alias of `replace`.
    pub fn parse_lenient(raw: Option<&str>) -> Result<StockMode, DomainError> {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("add") => Ok(StockMode::Add),
            Some("replace") | Some("set") => Ok(StockMode::Replace),
            Some(_) => Err(DomainError::invalid("Invalid stock update mode.")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: i64,
    pub seller_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub amount: Money,
    pub amount_unit: Unit,
    pub original_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub quantity_unit: Unit,
    pub loading_from: NaiveDate,
    pub loading_to: NaiveDate,
    pub loading_location: String,
    pub remark: Option<String>,
    pub is_active: bool,
    pub deal_status: DealStatus,
    pub status: ProductStatus,
    #[serde(skip)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Deal status implied by stock levels alone.
    pub fn stock_deal_status(&self) -> DealStatus {
        if self.remaining_quantity.is_zero() {
            DealStatus::OutOfStock
        } else if self.remaining_quantity == self.original_quantity {
            DealStatus::Available
        } else {
            DealStatus::PartiallySold
        }
    }

    /// Mirror the most advanced open interest onto the listing.
    pub fn sync_deal_status(&mut self, has_seller_confirmed: bool) {
        self.deal_status = if has_seller_confirmed && !self.remaining_quantity.is_zero() {
            DealStatus::SellerConfirmed
        } else {
            self.stock_deal_status()
        };
    }

    /// Deduct a confirmed deal's quantity from stock.
    ///
    /// Selling the last unit takes the listing out of stock and hides it.
    pub fn apply_sale(&mut self, sold: &Quantity) {
        self.remaining_quantity = self.remaining_quantity.saturating_sub(sold);
        if self.remaining_quantity.is_zero() {
            self.mark_out_of_stock();
        } else {
            self.deal_status = DealStatus::PartiallySold;
            self.status = ProductStatus::Available;
        }
    }

    /// Increase remaining and original quantity together.
    pub fn add_stock(&mut self, added: &Quantity) -> Result<(), DomainError> {
        if !added.is_positive() {
            return Err(DomainError::invalid(
                "Quantity to add must be greater than 0.",
            ));
        }
        self.remaining_quantity = self.remaining_quantity.add(added);
        self.original_quantity = self.original_quantity.add(added);
        self.restock();
        Ok(())
    }

    /// Overwrite remaining quantity. Original quantity only ever grows.
    pub fn replace_stock(&mut self, quantity: Quantity) {
        if quantity > self.original_quantity {
            self.original_quantity = quantity.clone();
        }
        self.remaining_quantity = quantity;
        if self.remaining_quantity.is_zero() {
            self.mark_out_of_stock();
        } else {
            self.restock();
        }
    }

    pub fn apply_stock_update(
        &mut self,
        mode: StockMode,
        quantity: Quantity,
    ) -> Result<(), DomainError> {
        match mode {
            StockMode::Add => self.add_stock(&quantity),
            StockMode::Replace => {
                self.replace_stock(quantity);
                Ok(())
            }
        }
    }

    fn restock(&mut self) {
        self.deal_status = self.stock_deal_status();
        self.status = ProductStatus::Available;
        self.is_active = true;
    }

    fn mark_out_of_stock(&mut self) {
        self.remaining_quantity = Quantity::zero();
        self.deal_status = DealStatus::OutOfStock;
        self.status = ProductStatus::OutOfStock;
        self.is_active = false;
    }

    pub fn available_for_interest(&self) -> bool {
        self.ensure_open_for_interest().is_ok()
    }

    /// Whether a buyer may currently place an offer on this listing.
    pub fn ensure_open_for_interest(&self) -> Result<(), DomainError> {
        if !self.is_active || self.status != ProductStatus::Available {
            return Err(DomainError::invalid("This product is no longer available."));
        }
        if self.remaining_quantity.is_zero() {
            return Err(DomainError::invalid("Product is out of stock."));
        }
        Ok(())
    }

    pub fn ensure_quantity_available(&self, requested: &Quantity) -> Result<(), DomainError> {
        if requested > &self.remaining_quantity {
            return Err(DomainError::InsufficientStock {
                available: self.remaining_quantity.to_string(),
                unit: self.quantity_unit.to_string(),
            });
        }
        Ok(())
    }

    /// Apply an owner edit. Stock is changed through stock updates only.
    pub fn apply_changes(&mut self, changes: ProductChanges) -> Result<(), DomainError> {
        if let Some(title) = changes.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(DomainError::invalid("Product title is required."));
            }
            self.title = title.to_string();
        }
        if let Some(description) = changes.description {
            self.description = blank_to_none(description);
        }
        if let Some(category) = changes.category {
            let category = category.trim();
            if category.is_empty() {
                return Err(DomainError::invalid("Category is required."));
            }
            self.category = category.to_string();
        }
        if let Some(amount) = changes.amount {
            if !amount.is_positive() {
                return Err(DomainError::invalid("Amount must be greater than 0."));
            }
            self.amount = amount;
        }
        if let Some(unit) = changes.amount_unit {
            self.amount_unit = unit;
        }
        if let Some(unit) = changes.quantity_unit {
            self.quantity_unit = unit;
        }
        let dates_changed = changes.loading_from.is_some() || changes.loading_to.is_some();
        let loading_from = changes.loading_from.unwrap_or(self.loading_from);
        let loading_to = changes.loading_to.unwrap_or(self.loading_to);
        validate_loading_window(loading_from, loading_to)?;
        self.loading_from = loading_from;
        self.loading_to = loading_to;
        match changes.loading_location.and_then(blank_to_none) {
            Some(location) => self.loading_location = location,
            None if dates_changed => {
                self.loading_location = default_loading_location(loading_from, loading_to)
            }
            None => {}
        }
        if let Some(remark) = changes.remark {
            self.remark = blank_to_none(remark);
        }
        Ok(())
    }
}

/// Validated input for a new listing.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub seller_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub amount: Money,
    pub amount_unit: Unit,
    pub quantity: Quantity,
    pub quantity_unit: Unit,
    pub loading_from: NaiveDate,
    pub loading_to: NaiveDate,
    pub loading_location: Option<String>,
    pub remark: Option<String>,
    pub is_active: bool,
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::invalid("Product title is required."));
        }
        if self.category.trim().is_empty() {
            return Err(DomainError::invalid("Category is required."));
        }
        if !self.amount.is_positive() {
            return Err(DomainError::invalid("Amount must be greater than 0."));
        }
        if !self.quantity.is_positive() {
            return Err(DomainError::invalid("Quantity must be greater than 0."));
        }
        validate_loading_window(self.loading_from, self.loading_to)
    }

    /// Free-text location, or the loading window when none was given.
    pub fn resolved_loading_location(&self) -> String {
        self.loading_location
            .clone()
            .and_then(blank_to_none)
            .unwrap_or_else(|| default_loading_location(self.loading_from, self.loading_to))
    }
}

/// Partial update of a listing's descriptive fields and price.
#[derive(Debug, Clone, Default)]
pub struct ProductChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub amount: Option<Money>,
    pub amount_unit: Option<Unit>,
    pub quantity_unit: Option<Unit>,
    pub loading_from: Option<NaiveDate>,
    pub loading_to: Option<NaiveDate>,
    pub loading_location: Option<String>,
    pub remark: Option<String>,
}

pub fn default_loading_location(from: NaiveDate, to: NaiveDate) -> String {
    format!("{} -> {}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"))
}

fn validate_loading_window(from: NaiveDate, to: NaiveDate) -> Result<(), DomainError> {
    if to < from {
        return Err(DomainError::invalid(
            "Loading to date cannot be before loading from date.",
        ));
    }
    Ok(())
}

fn blank_to_none(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn product(id: i64, seller_id: i64, quantity: &str) -> Product {
        let now = Utc::now();
        let qty = Quantity::parse(quantity).unwrap();
        let from = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        Product {
            id,
            seller_id,
            title: "Toor Dal".to_string(),
            description: None,
            category: "Pulses".to_string(),
            amount: Money::parse("100").unwrap(),
            amount_unit: Unit::Kg,
            original_quantity: qty.clone(),
            remaining_quantity: qty,
            quantity_unit: Unit::Kg,
            loading_from: from,
            loading_to: to,
            loading_location: default_loading_location(from, to),
            remark: None,
            is_active: true,
            deal_status: DealStatus::Available,
            status: ProductStatus::Available,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
