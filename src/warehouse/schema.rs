//! Fixed warehouse schemas for the two datasets, plus the local record check
//! run before any upload.

use crate::extract::DatasetKind;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Float,
    String,
}

impl FieldType {
    pub fn bigquery_name(self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT64",
            FieldType::String => "STRING",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::Integer => match value {
                Value::Number(number) => number.is_i64() || number.is_u64(),
                Value::String(text) => text.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            FieldType::Float => match value {
                Value::Number(_) => true,
                Value::String(text) => text.trim().parse::<f64>().is_ok(),
                _ => false,
            },
            FieldType::String => value.is_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Required,
    Nullable,
}

impl FieldMode {
    pub fn bigquery_name(self) -> &'static str {
        match self {
            FieldMode::Required => "REQUIRED",
            FieldMode::Nullable => "NULLABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaField {
    pub name: &'static str,
    pub field_type: FieldType,
    pub mode: FieldMode,
    pub description: &'static str,
}

const fn required(name: &'static str, field_type: FieldType, description: &'static str) -> SchemaField {
    SchemaField {
        name,
        field_type,
        mode: FieldMode::Required,
        description,
    }
}

const fn nullable(name: &'static str, field_type: FieldType, description: &'static str) -> SchemaField {
    SchemaField {
        name,
        field_type,
        mode: FieldMode::Nullable,
        description,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct DatasetSchema {
    pub kind: DatasetKind,
    pub fields: &'static [SchemaField],
}

/// A record that the warehouse would reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub field: String,
    pub reason: String,
}

impl DatasetSchema {
    /// Schema in the shape of a BigQuery `TableSchema` resource.
    pub fn to_bigquery(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|field| {
                json!({
                    "name": field.name,
                    "type": field.field_type.bigquery_name(),
                    "mode": field.mode.bigquery_name(),
                    "description": field.description,
                })
            })
            .collect();
        json!({ "fields": fields })
    }

    /// Checks that required fields are present and typed scalars match.
    /// Unknown fields are left for the warehouse to judge.
    pub fn validate_record(&self, record: &Value) -> Result<(), SchemaViolation> {
        let Some(object) = record.as_object() else {
            return Err(SchemaViolation {
                field: "<record>".to_owned(),
                reason: "record is not a JSON object".to_owned(),
            });
        };

        for field in self.fields {
            self.validate_field(field, object)?;
        }
        Ok(())
    }

    fn validate_field(
        &self,
        field: &SchemaField,
        object: &Map<String, Value>,
    ) -> Result<(), SchemaViolation> {
        match (object.get(field.name), field.mode) {
            (None | Some(Value::Null), FieldMode::Nullable) => Ok(()),
            (None | Some(Value::Null), FieldMode::Required) => Err(SchemaViolation {
                field: field.name.to_owned(),
                reason: "required field is missing".to_owned(),
            }),
            (Some(value), _) if field.field_type.accepts(value) => Ok(()),
            (Some(value), _) => Err(SchemaViolation {
                field: field.name.to_owned(),
                reason: format!(
                    "expected {}, got {value}",
                    field.field_type.bigquery_name()
                ),
            }),
        }
    }
}

pub static LISTINGS_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Listings,
    fields: &[
        required("block_number", FieldType::Integer, "Ethereum block number"),
        required("log_index", FieldType::Integer, "Ethereum log index"),
        required("listing_id", FieldType::String, "Marketplace listing_id"),
        required("ipfs_hash", FieldType::String, "IPFS hash of the listing data"),
        nullable("listing_type", FieldType::String, "Unit, fractional, etc..."),
        nullable("category", FieldType::String, "Category"),
        nullable("subcategory", FieldType::String, "Sub-category"),
        nullable("language", FieldType::String, "Language"),
        nullable("title", FieldType::String, "Title"),
        nullable("description", FieldType::String, "Description"),
        nullable("price", FieldType::Float, "Price"),
        nullable("currency", FieldType::String, "Price currency"),
    ],
};

pub static PRODUCTS_SCHEMA: DatasetSchema = DatasetSchema {
    kind: DatasetKind::Products,
    fields: &[
        required("block_number", FieldType::Integer, "Ethereum block number"),
        required("log_index", FieldType::Integer, "Ethereum log index"),
        required("listing_id", FieldType::String, "Marketplace listing_id"),
        required("product_id", FieldType::String, "Unique product id"),
        required("ipfs_path", FieldType::String, "Location of the product data on IPFS"),
        nullable("external_id", FieldType::String, "External product id"),
        nullable("parent_external_id", FieldType::String, "External id for the parent product"),
        required("title", FieldType::String, "Product title"),
        required("description", FieldType::String, "Product description"),
        required("price", FieldType::Integer, "Product price"),
        required("currency", FieldType::String, "Product price currency"),
        nullable("option1", FieldType::String, "Variant option 1"),
        nullable("option2", FieldType::String, "Variant option 2"),
        nullable("option3", FieldType::String, "Variant option 3"),
        nullable("image", FieldType::String, "Product image"),
    ],
};
