use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading the item catalog
///
/// Every variant is fatal: the catalog is loaded once at startup and the
/// process refuses to serve with an inconsistent feature matrix.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Item at position {position} has an empty name")]
    EmptyItemName { position: usize },

    #[error("Duplicate item name '{0}'")]
    DuplicateItem(String),

    #[error("Item '{item}' is missing feature '{feature}'")]
    MissingFeature { item: String, feature: String },

    #[error("Item '{item}' has unexpected feature '{feature}'")]
    UnexpectedFeature { item: String, feature: String },

    #[error("Item '{item}' has a non-numeric value for feature '{feature}'")]
    NonNumeric { item: String, feature: String },

    #[error("Item '{item}' has value {value} in indicator column '{feature}'")]
    NonBinary {
        item: String,
        feature: String,
        value: f64,
    },

    #[error("Continuous column '{0}' is not a catalog feature")]
    UnknownColumn(String),

    #[error("Item '{item}' has {found} values, schema has {expected} columns")]
    RowLength {
        item: String,
        expected: usize,
        found: usize,
    },
}

/// Catalog entry as it appears in the load file
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    pub name: String,
    pub features: BTreeMap<String, Value>,
}

/// A single canonical feature column
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    /// Continuous columns were min-max normalized at load; the rest are 0/1 indicators
    pub continuous: bool,
}

impl FeatureColumn {
    pub fn indicator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            continuous: false,
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            continuous: true,
        }
    }
}

/// Ordered list of canonical feature names
#[derive(Debug, Clone, Default)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
    index: HashMap<String, usize>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<FeatureColumn>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self { columns, index }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column index of a canonical feature name (exact match)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }
}

/// A catalog item with its normalized feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: String,
    pub values: Vec<f64>,
}

impl Item {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Value in a feature column, zero when the column does not exist
    pub fn value(&self, column: usize) -> f64 {
        self.values.get(column).copied().unwrap_or(0.0)
    }
}

/// Immutable item-by-feature matrix shared by every session
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    schema: FeatureSchema,
    items: Vec<Item>,
}

impl Catalog {
    /// Loads and normalizes the catalog file at `path`
    ///
    /// `continuous` names the columns to min-max normalize. When `None`,
    /// every column holding a value outside {0, 1} is treated as continuous.
    pub fn load(path: impl AsRef<Path>, continuous: Option<&[String]>) -> Result<Self, SchemaError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&contents, continuous)?;

        tracing::info!(
            path = %path.as_ref().display(),
            items = catalog.len(),
            features = catalog.schema.len(),
            "Loaded item catalog"
        );

        Ok(catalog)
    }

    pub fn from_json(json: &str, continuous: Option<&[String]>) -> Result<Self, SchemaError> {
        let raw: Vec<RawItem> = serde_json::from_str(json)?;
        Self::from_raw(raw, continuous)
    }

    /// Validates raw items against a shared key set and normalizes continuous columns
    pub fn from_raw(raw_items: Vec<RawItem>, continuous: Option<&[String]>) -> Result<Self, SchemaError> {
        let Some(first) = raw_items.first() else {
            if let Some(column) = continuous.and_then(|c| c.first()) {
                return Err(SchemaError::UnknownColumn(column.clone()));
            }
            return Ok(Self::default());
        };

        // BTreeMap keys are sorted, which fixes the column order
        let names: Vec<String> = first.features.keys().cloned().collect();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut seen_names = HashSet::new();
        let mut items = Vec::with_capacity(raw_items.len());

        for (position, raw) in raw_items.iter().enumerate() {
            let item_name = raw.name.trim();
            if item_name.is_empty() {
                return Err(SchemaError::EmptyItemName { position });
            }
            if !seen_names.insert(item_name.to_string()) {
                return Err(SchemaError::DuplicateItem(item_name.to_string()));
            }

            if let Some(extra) = raw.features.keys().find(|k| !index.contains_key(k.as_str())) {
                return Err(SchemaError::UnexpectedFeature {
                    item: item_name.to_string(),
                    feature: extra.clone(),
                });
            }

            let mut values = Vec::with_capacity(names.len());
            for feature in &names {
                let value = raw
                    .features
                    .get(feature)
                    .ok_or_else(|| SchemaError::MissingFeature {
                        item: item_name.to_string(),
                        feature: feature.clone(),
                    })?;
                let number = value
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| SchemaError::NonNumeric {
                        item: item_name.to_string(),
                        feature: feature.clone(),
                    })?;
                values.push(number);
            }

            items.push(Item::new(item_name, values));
        }

        let flags = continuous_flags(&names, &index, &items, continuous)?;
        normalize_columns(&mut items, &flags);

        let columns = names
            .into_iter()
            .zip(flags)
            .map(|(name, continuous)| FeatureColumn { name, continuous })
            .collect();

        Ok(Self {
            schema: FeatureSchema::new(columns),
            items,
        })
    }

    /// Builds a catalog from an already-normalized matrix
    pub fn from_rows(columns: Vec<FeatureColumn>, items: Vec<Item>) -> Result<Self, SchemaError> {
        let mut seen_names = HashSet::new();
        for item in &items {
            if item.values.len() != columns.len() {
                return Err(SchemaError::RowLength {
                    item: item.name.clone(),
                    expected: columns.len(),
                    found: item.values.len(),
                });
            }
            if !seen_names.insert(item.name.as_str()) {
                return Err(SchemaError::DuplicateItem(item.name.clone()));
            }
        }

        Ok(Self {
            schema: FeatureSchema::new(columns),
            items,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn is_indicator(value: f64) -> bool {
    value == 0.0 || value == 1.0
}

/// Decides which columns get normalized
fn continuous_flags(
    names: &[String],
    index: &HashMap<&str, usize>,
    items: &[Item],
    continuous: Option<&[String]>,
) -> Result<Vec<bool>, SchemaError> {
    match continuous {
        Some(columns) => {
            let mut flags = vec![false; names.len()];
            for column in columns {
                let i = index
                    .get(column.as_str())
                    .ok_or_else(|| SchemaError::UnknownColumn(column.clone()))?;
                flags[*i] = true;
            }

            for item in items {
                for (i, value) in item.values.iter().enumerate() {
                    if !flags[i] && !is_indicator(*value) {
                        return Err(SchemaError::NonBinary {
                            item: item.name.clone(),
                            feature: names[i].clone(),
                            value: *value,
                        });
                    }
                }
            }

            Ok(flags)
        }
        None => Ok((0..names.len())
            .map(|i| items.iter().any(|item| !is_indicator(item.values[i])))
            .collect()),
    }
}

/// Min-max scales each continuous column into [0, 1]
///
/// A column whose values are all equal maps to zeros.
fn normalize_columns(items: &mut [Item], flags: &[bool]) {
    for (column, _) in flags.iter().enumerate().filter(|(_, c)| **c) {
        let (min, max) = items.iter().fold((f64::MAX, f64::MIN), |(lo, hi), item| {
            let v = item.values[column];
            (lo.min(v), hi.max(v))
        });
        let range = max - min;

        for item in items.iter_mut() {
            let v = &mut item.values[column];
            *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_json() -> String {
        json!([
            {"name": "Bulgogi", "features": {"has_beef": 1, "calories": 600, "is_spicy": 0}},
            {"name": "Bibimbap", "features": {"has_beef": 0, "calories": 400, "is_spicy": 1}},
            {"name": "Galbi", "features": {"has_beef": 1, "calories": 800, "is_spicy": 0}}
        ])
        .to_string()
    }

    #[test]
    fn test_columns_are_sorted_by_name() {
        let catalog = Catalog::from_json(&sample_json(), None).unwrap();
        assert_eq!(catalog.schema().names(), vec!["calories", "has_beef", "is_spicy"]);
        assert_eq!(catalog.schema().index_of("has_beef"), Some(1));
        assert_eq!(catalog.schema().index_of("has_pork"), None);
    }

    #[test]
    fn test_auto_detects_and_normalizes_continuous_columns() {
        let catalog = Catalog::from_json(&sample_json(), None).unwrap();
        let columns = catalog.schema().columns();
        assert!(columns[0].continuous);
        assert!(!columns[1].continuous);
        assert!(!columns[2].continuous);

        let calories: Vec<f64> = catalog.items().iter().map(|i| i.value(0)).collect();
        assert_eq!(calories, vec![0.5, 0.0, 1.0]);

        // Indicator columns pass through untouched
        let beef: Vec<f64> = catalog.items().iter().map(|i| i.value(1)).collect();
        assert_eq!(beef, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_explicit_continuous_columns() {
        let json = json!([
            {"name": "A", "features": {"spice_level": 0, "price": 1}},
            {"name": "B", "features": {"spice_level": 1, "price": 0}}
        ])
        .to_string();

        let columns = vec!["spice_level".to_string()];
        let catalog = Catalog::from_json(&json, Some(&columns)).unwrap();
        assert!(catalog.schema().columns()[1].continuous);
        assert!(!catalog.schema().columns()[0].continuous);
    }

    #[test]
    fn test_explicit_columns_reject_non_binary_indicator() {
        let json = json!([
            {"name": "A", "features": {"has_beef": 2, "price": 10}},
            {"name": "B", "features": {"has_beef": 0, "price": 20}}
        ])
        .to_string();

        let columns = vec!["price".to_string()];
        let err = Catalog::from_json(&json, Some(&columns)).unwrap_err();
        assert!(matches!(err, SchemaError::NonBinary { ref feature, .. } if feature == "has_beef"));
    }

    #[test]
    fn test_unknown_continuous_column() {
        let columns = vec!["sodium".to_string()];
        let err = Catalog::from_json(&sample_json(), Some(&columns)).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownColumn(ref c) if c == "sodium"));
    }

    #[test]
    fn test_constant_continuous_column_maps_to_zero() {
        let json = json!([
            {"name": "A", "features": {"calories": 500}},
            {"name": "B", "features": {"calories": 500}}
        ])
        .to_string();

        let columns = vec!["calories".to_string()];
        let catalog = Catalog::from_json(&json, Some(&columns)).unwrap();
        assert!(catalog.items().iter().all(|i| i.value(0) == 0.0));
    }

    #[test]
    fn test_missing_feature_is_fatal() {
        let json = json!([
            {"name": "A", "features": {"has_beef": 1, "has_pork": 0}},
            {"name": "B", "features": {"has_beef": 1}}
        ])
        .to_string();

        let err = Catalog::from_json(&json, None).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::MissingFeature { ref item, ref feature } if item == "B" && feature == "has_pork"
        ));
    }

    #[test]
    fn test_unexpected_feature_is_fatal() {
        let json = json!([
            {"name": "A", "features": {"has_beef": 1}},
            {"name": "B", "features": {"has_beef": 1, "has_pork": 0}}
        ])
        .to_string();

        let err = Catalog::from_json(&json, None).unwrap_err();
        assert!(matches!(err, SchemaError::UnexpectedFeature { .. }));
    }

    #[test]
    fn test_non_numeric_value_is_fatal() {
        let json = json!([
            {"name": "A", "features": {"has_beef": "yes"}}
        ])
        .to_string();

        let err = Catalog::from_json(&json, None).unwrap_err();
        assert!(matches!(err, SchemaError::NonNumeric { .. }));
    }

    #[test]
    fn test_duplicate_item_name() {
        let json = json!([
            {"name": "A", "features": {"has_beef": 1}},
            {"name": "A", "features": {"has_beef": 0}}
        ])
        .to_string();

        let err = Catalog::from_json(&json, None).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateItem(_)));
    }

    #[test]
    fn test_empty_catalog_loads() {
        let catalog = Catalog::from_json("[]", None).unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.schema().is_empty());
    }

    #[test]
    fn test_from_rows_checks_row_length() {
        let err = Catalog::from_rows(
            vec![FeatureColumn::indicator("has_beef")],
            vec![Item::new("A", vec![1.0, 0.2])],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::RowLength { expected: 1, found: 2, .. }));
    }
}
