use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A shoe in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price: Decimal,
    pub stock: i32,
    /// Comma-delimited color options, e.g. `"Black,White"`.
    pub colors: String,
    /// Comma-delimited size options, e.g. `"40,41,42"`.
    pub sizes: String,
    pub image: String,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

fn split_options(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|option| !option.is_empty())
        .collect()
}

impl Model {
    pub fn color_options(&self) -> Vec<&str> {
        split_options(&self.colors)
    }

    pub fn size_options(&self) -> Vec<&str> {
        split_options(&self.sizes)
    }

    /// True when the product is on sale and can cover `quantity` units.
    pub fn can_supply(&self, quantity: i32) -> bool {
        self.available && quantity <= self.stock
    }
}
