//! Resource-kind descriptors
//!
//! One generic planner serves every resource kind. What differs between
//! kinds lives behind the `ResourceKind` trait: the identity fields, the
//! alias table, per-field comparison kinds, and how to build and parse each
//! controller request.
//!
//! `TableKind` is the data-driven implementation: path templates plus tables,
//! built in code or from a `[[kinds]]` configuration entry.

use crate::config::KindConfig;
use crate::planner::normalize::FieldKind;
use sdk::{Fields, OperationRequest, ReconcileError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Current resources on the controller, by resource name
pub type Inventory = BTreeMap<String, Fields>;

/// Field names that identify a resource and travel with every submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFields {
    pub name: String,
    pub resource_type: String,
    pub deploy: String,
}

impl IdentityFields {
    pub fn new(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        deploy: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            deploy: deploy.into(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        field == self.name || field == self.resource_type || field == self.deploy
    }
}

/// Translation from caller field names to controller field names
///
/// Names that are neither renamed nor client-only translate to themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    renames: BTreeMap<String, String>,
    client_only: BTreeSet<String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a caller name onto a differently named (or misspelled) controller field
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Mark a field that only the caller understands; it is never compared
    pub fn client_only(mut self, field: impl Into<String>) -> Self {
        self.client_only.insert(field.into());
        self
    }

    /// Controller name for a caller field, `None` for client-only fields
    pub fn translate<'a>(&'a self, field: &'a str) -> Option<&'a str> {
        if self.client_only.contains(field) {
            return None;
        }
        Some(self.renames.get(field).map_or(field, String::as_str))
    }
}

/// Capabilities the planner and reconciler need from one resource kind
pub trait ResourceKind: Send + Sync {
    /// Kind name, used in action labels (e.g., "fabric")
    fn name(&self) -> &str;

    fn identity(&self) -> &IdentityFields;

    fn aliases(&self) -> &AliasTable;

    /// Explicit comparison kind for a controller field, if any
    fn field_kind(&self, field: &str) -> Option<FieldKind>;

    /// Request that reads every current resource of this kind
    fn inventory_request(&self) -> OperationRequest;

    fn parse_inventory(&self, data: &Value) -> Result<Inventory, ReconcileError>;

    /// Request that reads template defaults for a resource type
    fn template_request(&self, resource_type: &str) -> Option<OperationRequest>;

    fn parse_template(&self, data: &Value) -> Result<Fields, ReconcileError>;

    fn update_request(&self, name: &str, resource_type: &str, payload: Fields)
        -> OperationRequest;

    fn delete_request(&self, name: &str) -> Option<OperationRequest>;

    fn save_request(&self, name: &str) -> Option<OperationRequest>;

    fn deploy_request(&self, name: &str) -> Option<OperationRequest>;
}

/// Endpoint path templates. `{name}` and `{type}` are substituted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindPaths {
    pub inventory: String,
    pub update: String,
    pub template: Option<String>,
    pub delete: Option<String>,
    pub save: Option<String>,
    pub deploy: Option<String>,
}

/// Table-driven `ResourceKind`
#[derive(Debug, Clone)]
pub struct TableKind {
    name: String,
    identity: IdentityFields,
    aliases: AliasTable,
    field_kinds: BTreeMap<String, FieldKind>,
    fields_key: Option<String>,
    paths: KindPaths,
}

impl TableKind {
    pub fn new(name: impl Into<String>, identity: IdentityFields, paths: KindPaths) -> Self {
        Self {
            name: name.into(),
            identity,
            aliases: AliasTable::new(),
            field_kinds: BTreeMap::new(),
            fields_key: None,
            paths,
        }
    }

    pub fn with_aliases(mut self, aliases: AliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_field_kind(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.field_kinds.insert(field.into(), kind);
        self
    }

    /// Key under which the controller nests a resource's fields (e.g., "nvPairs")
    pub fn with_fields_key(mut self, key: impl Into<String>) -> Self {
        self.fields_key = Some(key.into());
        self
    }

    /// Build a kind from a `[[kinds]]` configuration entry
    pub fn from_config(config: &KindConfig) -> Self {
        let identity = IdentityFields::new(
            &config.name_field,
            &config.type_field,
            &config.deploy_field,
        );

        let mut aliases = config
            .client_only
            .iter()
            .fold(AliasTable::new(), |table, field| table.client_only(field));
        for (from, to) in &config.aliases {
            aliases = aliases.rename(from, to);
        }

        let paths = KindPaths {
            inventory: config.paths.inventory.clone(),
            update: config.paths.update.clone(),
            template: config.paths.template.clone(),
            delete: config.paths.delete.clone(),
            save: config.paths.save.clone(),
            deploy: config.paths.deploy.clone(),
        };

        let mut kind = Self::new(&config.name, identity, paths).with_aliases(aliases);
        kind.field_kinds = config.field_kinds.clone();
        kind.fields_key = config.fields_key.clone();
        kind
    }

    fn unnest<'a>(&self, item: &'a Value) -> Option<&'a Fields> {
        match &self.fields_key {
            Some(key) => item
                .get(key)
                .and_then(Value::as_object)
                .or_else(|| item.as_object()),
            None => item.as_object(),
        }
    }
}

fn render(template: &str, name: &str, resource_type: &str) -> String {
    template
        .replace("{name}", name)
        .replace("{type}", resource_type)
}

impl ResourceKind for TableKind {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &IdentityFields {
        &self.identity
    }

    fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.field_kinds.get(field).copied()
    }

    fn inventory_request(&self) -> OperationRequest {
        OperationRequest::get(&self.paths.inventory)
    }

    /// Accepts a list of resources, a single resource object, or nothing
    fn parse_inventory(&self, data: &Value) -> Result<Inventory, ReconcileError> {
        let items: Vec<&Value> = match data {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) if map.is_empty() => Vec::new(),
            Value::Object(_) => vec![data],
            Value::Null => Vec::new(),
            other => {
                return Err(ReconcileError::Parse(format!(
                    "{} inventory is neither a list nor an object: {}",
                    self.name, other
                )))
            }
        };

        let mut inventory = Inventory::new();
        for item in items {
            let fields = self.unnest(item).ok_or_else(|| {
                ReconcileError::Parse(format!("{} entry is not an object: {}", self.name, item))
            })?;
            let name = fields
                .get(&self.identity.name)
                .or_else(|| item.get(&self.identity.name))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ReconcileError::Parse(format!(
                        "{} entry has no {} field",
                        self.name, self.identity.name
                    ))
                })?;
            inventory.insert(name.to_string(), fields.clone());
        }
        Ok(inventory)
    }

    fn template_request(&self, resource_type: &str) -> Option<OperationRequest> {
        self.paths
            .template
            .as_ref()
            .map(|path| OperationRequest::get(render(path, "", resource_type)))
    }

    fn parse_template(&self, data: &Value) -> Result<Fields, ReconcileError> {
        self.unnest(data).cloned().ok_or_else(|| {
            ReconcileError::Parse(format!(
                "{} template defaults are not an object: {}",
                self.name, data
            ))
        })
    }

    fn update_request(
        &self,
        name: &str,
        resource_type: &str,
        payload: Fields,
    ) -> OperationRequest {
        OperationRequest::put(render(&self.paths.update, name, resource_type))
            .with_payload(Value::Object(payload))
    }

    fn delete_request(&self, name: &str) -> Option<OperationRequest> {
        self.paths
            .delete
            .as_ref()
            .map(|path| OperationRequest::delete(render(path, name, "")))
    }

    fn save_request(&self, name: &str) -> Option<OperationRequest> {
        self.paths
            .save
            .as_ref()
            .map(|path| OperationRequest::post(render(path, name, "")))
    }

    fn deploy_request(&self, name: &str) -> Option<OperationRequest> {
        self.paths
            .deploy
            .as_ref()
            .map(|path| OperationRequest::post(render(path, name, "")))
    }
}
