//! Entity metadata consumed by the compiler.
//!
//! Metadata is owned by the registration subsystem and handed to the engine
//! per call. The engine never mutates it; all lookups are case-sensitive.

use serde::{Deserialize, Serialize};

use crate::edm::EdmType;

/// Declared multiplicity of a navigation property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Multiplicity {
    /// At most one related entity.
    One,
    /// A collection of related entities.
    Many,
}

/// How a navigation property joins to its target entity.
///
/// The relation is `target.target_column = source.source_column`. For a
/// one-to-many relation the source column is usually the source key and the
/// target column the foreign key; for a to-one relation it is the reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDescriptor {
    /// Name of the target entity in the schema.
    pub target: String,
    /// Whether the navigation yields one entity or a collection.
    pub multiplicity: Multiplicity,
    /// Column on the source entity's table.
    pub source_column: String,
    /// Column on the target entity's table.
    pub target_column: String,
}

/// One named member of an enum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    /// Member name as written in queries.
    pub name: String,
    /// Underlying integer value.
    pub value: i64,
}

/// Metadata for a single structural or navigation property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct PropertyMetadata {
    /// Property name as it appears in queries.
    pub name: String,
    /// Explicit column override; defaults to the snake_case of `name`.
    #[serde(default)]
    pub column_name: Option<String>,
    /// Declared primitive type (enum properties use their underlying type).
    #[serde(rename = "type", default = "default_declared_type")]
    pub declared_type: EdmType,
    /// Part of the entity key.
    #[serde(default)]
    pub is_key: bool,
    /// Not nullable.
    #[serde(default)]
    pub is_required: bool,
    /// Backed by an enum type.
    #[serde(default)]
    pub is_enum: bool,
    /// The enum type allows OR-combined flag values.
    #[serde(default)]
    pub enum_flags: bool,
    /// Named enum members, used to resolve `'Member'` and `Ns.Type'Member'` literals.
    #[serde(default)]
    pub enum_members: Vec<EnumMember>,
    /// Present for navigation properties.
    #[serde(default)]
    pub navigation: Option<NavigationDescriptor>,
}

fn default_declared_type() -> EdmType {
    EdmType::String
}

impl PropertyMetadata {
    /// Create a structural property.
    #[must_use]
    pub fn new(name: impl Into<String>, declared_type: EdmType) -> Self {
        Self {
            name: name.into(),
            column_name: None,
            declared_type,
            is_key: false,
            is_required: false,
            is_enum: false,
            enum_flags: false,
            enum_members: Vec::new(),
            navigation: None,
        }
    }

    /// Create a navigation property.
    #[must_use]
    pub fn navigation(name: impl Into<String>, descriptor: NavigationDescriptor) -> Self {
        let mut prop = Self::new(name, EdmType::Int64);
        prop.navigation = Some(descriptor);
        prop
    }

    /// Mark as key (keys are implicitly required).
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.is_required = true;
        self
    }

    /// Mark as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    /// Override the backing column name.
    #[must_use]
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column_name = Some(column.into());
        self
    }

    /// Mark as an enum property with the given members.
    #[must_use]
    pub fn with_enum(mut self, flags: bool, members: &[(&str, i64)]) -> Self {
        self.is_enum = true;
        self.enum_flags = flags;
        self.enum_members = members
            .iter()
            .map(|(name, value)| EnumMember {
                name: (*name).to_owned(),
                value: *value,
            })
            .collect();
        self
    }

    /// The backing column name.
    #[must_use]
    pub fn column(&self) -> String {
        self.column_name
            .clone()
            .unwrap_or_else(|| snake_case(&self.name))
    }

    /// Returns `true` for navigation properties.
    #[must_use]
    pub fn is_navigation(&self) -> bool {
        self.navigation.is_some()
    }

    /// Look up an enum member value by name (case-sensitive).
    #[must_use]
    pub fn enum_value(&self, member: &str) -> Option<i64> {
        self.enum_members
            .iter()
            .find(|m| m.name == member)
            .map(|m| m.value)
    }
}

/// Metadata for one entity type / entity set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    /// Entity (set) name.
    pub name: String,
    /// Explicit table override; defaults to the snake_case of `name`.
    #[serde(default)]
    pub table: Option<String>,
    /// Properties in declaration order.
    pub properties: Vec<PropertyMetadata>,
}

impl EntityMetadata {
    /// Create an entity with the given properties.
    #[must_use]
    pub fn new(name: impl Into<String>, properties: Vec<PropertyMetadata>) -> Self {
        Self {
            name: name.into(),
            table: None,
            properties,
        }
    }

    /// Override the backing table name.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// The backing table name.
    #[must_use]
    pub fn table_name(&self) -> String {
        self.table.clone().unwrap_or_else(|| snake_case(&self.name))
    }

    /// Look up a property by exact name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Structural (non-navigation) properties in declaration order.
    pub fn structural(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.properties.iter().filter(|p| !p.is_navigation())
    }

    /// Key properties in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.properties.iter().filter(|p| p.is_key)
    }
}

/// The set of entities a query may reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// All registered entities.
    pub entities: Vec<EntityMetadata>,
}

impl Schema {
    /// Build a schema from a list of entities.
    #[must_use]
    pub fn new(entities: Vec<EntityMetadata>) -> Self {
        Self { entities }
    }

    /// Look up an entity by exact name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityMetadata> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// Convert a PascalCase or camelCase identifier to snake_case.
///
/// Runs of capitals are kept together, so `OrderID` becomes `order_id` and
/// `HTTPStatus` becomes `http_status`.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).and_then(|j| chars.get(j));
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_snake_case_identifiers() {
        assert_eq!(snake_case("ProductName"), "product_name");
        assert_eq!(snake_case("OrderID"), "order_id");
        assert_eq!(snake_case("HTTPStatus"), "http_status");
        assert_eq!(snake_case("ID"), "id");
        assert_eq!(snake_case("unitPrice"), "unit_price");
        assert_eq!(snake_case("Line2Total"), "line2_total");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_should_prefer_explicit_column_override() {
        let prop = PropertyMetadata::new("Name", EdmType::String).with_column("PRODUCT_NAME");
        assert_eq!(prop.column(), "PRODUCT_NAME");
        let prop = PropertyMetadata::new("UnitPrice", EdmType::Decimal);
        assert_eq!(prop.column(), "unit_price");
    }

    #[test]
    fn test_should_look_up_properties_case_sensitively() {
        let entity = EntityMetadata::new(
            "Products",
            vec![PropertyMetadata::new("Name", EdmType::String)],
        );
        assert!(entity.property("Name").is_some());
        assert!(entity.property("name").is_none());
        assert_eq!(entity.table_name(), "products");
    }

    #[test]
    fn test_should_deserialize_metadata_json() {
        let json = r#"{
            "entities": [{
                "name": "Customers",
                "properties": [
                    {"name": "ID", "type": "Edm.Int32", "isKey": true},
                    {"name": "Status", "type": "Edm.Int32", "isEnum": true, "enumFlags": true,
                     "enumMembers": [{"name": "Active", "value": 1}]},
                    {"name": "Orders", "navigation": {
                        "target": "Orders", "multiplicity": "many",
                        "sourceColumn": "id", "targetColumn": "customer_id"}}
                ]
            }]
        }"#;
        let schema: Schema = serde_json::from_str(json).unwrap();
        let customers = schema.entity("Customers").unwrap();
        assert!(customers.property("ID").unwrap().is_key);
        assert_eq!(
            customers.property("Status").unwrap().enum_value("Active"),
            Some(1)
        );
        let orders = customers.property("Orders").unwrap();
        assert_eq!(
            orders.navigation.as_ref().unwrap().multiplicity,
            Multiplicity::Many
        );
        assert_eq!(customers.keys().count(), 1);
        assert_eq!(customers.structural().count(), 2);
    }
}
