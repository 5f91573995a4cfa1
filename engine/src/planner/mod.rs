//! Reconciliation Planner
//!
//! Compares desired resources with the controller's current ones and decides
//! which fields must be sent.
//!
//! # Policies
//!
//! - **Merge**: only desired fields that differ from current are sent. Fields
//!   desired does not mention are left alone.
//! - **Replace**: template defaults are overlaid with desired, and the result
//!   is compared with current. Fields desired does not mention revert to the
//!   template default, not to whatever is configured now.
//!
//! Identity fields (name, type, deploy flag) are never compared. They are
//! re-injected into every non-empty change set, because the controller wants
//! a minimally complete payload rather than a sparse patch.
//!
//! # Batch states
//!
//! | Controller has it | Differs | Outcome                  |
//! |-------------------|---------|--------------------------|
//! | no                | -       | `NotOnController`, skip  |
//! | yes               | no      | `NoDiff`, skip           |
//! | yes               | yes     | `Diff`, submit           |

use sdk::{Fields, ReconcileError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub mod kind;
pub mod normalize;

pub use kind::{AliasTable, IdentityFields, Inventory, KindPaths, ResourceKind, TableKind};
pub use normalize::FieldKind;

/// Reconciliation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Merge,
    Replace,
}

/// Planned change for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub resource: String,
    pub resource_type: Option<String>,

    /// Controller fields whose normalized value differs, with the desired value
    pub fields: Fields,

    /// What to submit: `fields` plus identity, or the untouched desired
    /// resource when nothing differs
    pub payload: Fields,

    pub update_required: bool,
}

/// Where one desired resource ended up in the batch
#[derive(Debug, Clone, PartialEq)]
pub enum PlanState {
    NotOnController,
    NoDiff,
    Diff(ChangeSet),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePlan {
    pub name: String,
    pub state: PlanState,
}

/// Outcome of planning every desired resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    pub resources: Vec<ResourcePlan>,
}

impl BatchPlan {
    /// Change sets that must be submitted, in desired order
    pub fn commits(&self) -> impl Iterator<Item = &ChangeSet> {
        self.resources.iter().filter_map(|plan| match &plan.state {
            PlanState::Diff(change_set) => Some(change_set),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.commits().next().is_none()
    }
}

/// Generic planner over one resource kind
pub struct Planner<'a> {
    kind: &'a dyn ResourceKind,
}

impl<'a> Planner<'a> {
    pub fn new(kind: &'a dyn ResourceKind) -> Self {
        Self { kind }
    }

    /// Name of a desired resource
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the name field is missing or not a string.
    pub fn resource_name(&self, desired: &Fields) -> Result<String, ReconcileError> {
        let field = &self.kind.identity().name;
        desired
            .get(field)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                ReconcileError::Validation(format!(
                    "{} resource is missing its {} field",
                    self.kind.name(),
                    field
                ))
            })
    }

    /// Resource type from desired, falling back to current
    pub fn resource_type(&self, desired: &Fields, current: Option<&Fields>) -> Option<String> {
        let field = &self.kind.identity().resource_type;
        desired
            .get(field)
            .or_else(|| current.and_then(|c| c.get(field)))
            .and_then(Value::as_str)
            .map(String::from)
    }

    /// Plan one resource under the merge policy
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if a desired field has no counterpart on the
    /// current resource, or `InvalidValue` if a typed field fails to parse.
    pub fn plan_merge(&self, desired: &Fields, current: &Fields) -> Result<ChangeSet, ReconcileError> {
        let resource = self.resource_name(desired)?;
        let identity = self.kind.identity();
        let mut fields = Fields::new();

        for (field, value) in desired {
            if identity.contains(field) {
                continue;
            }
            let Some(target) = self.kind.aliases().translate(field) else {
                continue;
            };
            let present = current.get(target).ok_or_else(|| ReconcileError::UnknownField {
                resource: resource.clone(),
                field: field.clone(),
            })?;
            if normalize::differs(target, self.kind.field_kind(target), value, present)? {
                fields.insert(target.to_string(), value.clone());
            }
        }

        Ok(self.finish(resource, desired, current, fields))
    }

    /// Plan one resource under the replace policy
    ///
    /// Template fields the controller does not report are skipped; desired
    /// fields it does not report are an `UnknownField` error.
    pub fn plan_replace(
        &self,
        template_defaults: &Fields,
        desired: &Fields,
        current: &Fields,
    ) -> Result<ChangeSet, ReconcileError> {
        let resource = self.resource_name(desired)?;
        let identity = self.kind.identity();

        let mut merged = template_defaults.clone();
        let mut from_desired = BTreeSet::new();
        for (field, value) in desired {
            if identity.contains(field) {
                continue;
            }
            let Some(target) = self.kind.aliases().translate(field) else {
                continue;
            };
            merged.insert(target.to_string(), value.clone());
            from_desired.insert(target.to_string());
        }

        let mut fields = Fields::new();
        for (field, value) in &merged {
            if identity.contains(field) {
                continue;
            }
            let Some(present) = current.get(field) else {
                if from_desired.contains(field) {
                    return Err(ReconcileError::UnknownField {
                        resource,
                        field: field.clone(),
                    });
                }
                debug!("{}: template field {} not reported by controller", resource, field);
                continue;
            };
            if normalize::differs(field, self.kind.field_kind(field), value, present)? {
                fields.insert(field.clone(), value.clone());
            }
        }

        Ok(self.finish(resource, desired, current, fields))
    }

    fn finish(&self, resource: String, desired: &Fields, current: &Fields, fields: Fields) -> ChangeSet {
        let resource_type = self.resource_type(desired, Some(current));

        if fields.is_empty() {
            return ChangeSet {
                resource,
                resource_type,
                fields,
                payload: desired.clone(),
                update_required: false,
            };
        }

        let identity = self.kind.identity();
        let mut payload = fields.clone();
        for field in [&identity.name, &identity.resource_type] {
            if let Some(value) = desired.get(field).or_else(|| current.get(field)) {
                payload.insert(field.clone(), value.clone());
            }
        }
        // Only the caller requests a deploy
        if let Some(value) = desired.get(&identity.deploy) {
            payload.insert(identity.deploy.clone(), value.clone());
        }
        payload.insert(identity.name.clone(), Value::from(resource.as_str()));

        ChangeSet {
            resource,
            resource_type,
            fields,
            payload,
            update_required: true,
        }
    }

    /// Plan every desired resource against the current inventory
    ///
    /// `templates` holds template defaults by resource type and is only
    /// consulted under the replace policy.
    ///
    /// # Errors
    ///
    /// Any validation error aborts the whole batch, so nothing is submitted
    /// from a partially valid desired state.
    pub fn plan_batch(
        &self,
        policy: Policy,
        desired: &[Fields],
        inventory: &Inventory,
        templates: &BTreeMap<String, Fields>,
    ) -> Result<BatchPlan, ReconcileError> {
        let mut seen = BTreeSet::new();
        let mut plan = BatchPlan::default();

        for resource in desired {
            let name = self.resource_name(resource)?;
            if !seen.insert(name.clone()) {
                return Err(ReconcileError::Validation(format!(
                    "{} {} appears more than once in desired state",
                    self.kind.name(),
                    name
                )));
            }

            let Some(current) = inventory.get(&name) else {
                debug!("{} {} is not on the controller", self.kind.name(), name);
                plan.resources.push(ResourcePlan {
                    name,
                    state: PlanState::NotOnController,
                });
                continue;
            };

            let change_set = match policy {
                Policy::Merge => self.plan_merge(resource, current)?,
                Policy::Replace => {
                    let resource_type = self.resource_type(resource, Some(current)).ok_or_else(|| {
                        ReconcileError::Validation(format!(
                            "{} {} has no {} to select template defaults",
                            self.kind.name(),
                            name,
                            self.kind.identity().resource_type
                        ))
                    })?;
                    let defaults = templates.get(&resource_type).ok_or_else(|| {
                        ReconcileError::Validation(format!(
                            "no template defaults for {} type {}",
                            self.kind.name(),
                            resource_type
                        ))
                    })?;
                    self.plan_replace(defaults, resource, current)?
                }
            };

            let state = if change_set.update_required {
                debug!(
                    "{} {}: {} field(s) differ",
                    self.kind.name(),
                    name,
                    change_set.fields.len()
                );
                PlanState::Diff(change_set)
            } else {
                PlanState::NoDiff
            };
            plan.resources.push(ResourcePlan { name, state });
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn kind() -> TableKind {
        TableKind::new(
            "fabric",
            IdentityFields::new("NAME", "TYPE", "DEPLOY"),
            KindPaths {
                inventory: "/fabrics".to_string(),
                update: "/fabrics/{name}".to_string(),
                ..Default::default()
            },
        )
        .with_aliases(
            AliasTable::new()
                .rename("QUEUING_POLICY", "QUEUING_POLICY_CLOUDSCALE")
                .client_only("DEPLOY"),
        )
        .with_field_kind("GW_MAC", FieldKind::Mac)
    }

    #[test]
    fn test_merge_no_diff_uses_desired_payload() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = fields(json!({"NAME": "F1", "X": 5, "DEPLOY": true}));
        let current = fields(json!({"X": "5", "Y": "unrelated"}));

        let change_set = planner.plan_merge(&desired, &current).unwrap();

        assert!(!change_set.update_required);
        assert!(change_set.fields.is_empty());
        assert_eq!(change_set.payload, desired);
    }

    #[test]
    fn test_merge_diff_reinjects_identity() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = fields(json!({"NAME": "F1", "TYPE": "VXLAN", "DEPLOY": false, "X": 7}));
        let current = fields(json!({"X": 5, "Y": 1}));

        let change_set = planner.plan_merge(&desired, &current).unwrap();

        assert!(change_set.update_required);
        assert_eq!(change_set.fields, fields(json!({"X": 7})));
        assert_eq!(
            change_set.payload,
            fields(json!({"X": 7, "NAME": "F1", "TYPE": "VXLAN", "DEPLOY": false}))
        );
        assert_eq!(change_set.resource_type.as_deref(), Some("VXLAN"));
    }

    #[test]
    fn test_merge_never_takes_deploy_flag_from_current() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = fields(json!({"NAME": "F1", "X": 7}));
        let current = fields(json!({"TYPE": "VXLAN", "DEPLOY": "true", "X": 5}));

        let change_set = planner.plan_merge(&desired, &current).unwrap();

        assert!(change_set.update_required);
        assert_eq!(
            change_set.payload,
            fields(json!({"X": 7, "NAME": "F1", "TYPE": "VXLAN"}))
        );
    }

    #[test]
    fn test_merge_leaves_unmentioned_fields_alone() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = fields(json!({"NAME": "F1", "X": 7}));
        let current = fields(json!({"X": 5, "Y": 1, "Z": "keep"}));

        let change_set = planner.plan_merge(&desired, &current).unwrap();
        assert!(!change_set.payload.contains_key("Y"));
        assert!(!change_set.payload.contains_key("Z"));
    }

    #[test]
    fn test_merge_translates_aliases() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = fields(json!({"NAME": "F1", "QUEUING_POLICY": true}));
        let current = fields(json!({"QUEUING_POLICY_CLOUDSCALE": "false"}));

        let change_set = planner.plan_merge(&desired, &current).unwrap();
        assert_eq!(
            change_set.fields,
            fields(json!({"QUEUING_POLICY_CLOUDSCALE": true}))
        );
    }

    #[test]
    fn test_merge_unknown_field_is_validation_error() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = fields(json!({"NAME": "F1", "NOPE": 1}));
        let current = fields(json!({"X": 5}));

        let err = planner.plan_merge(&desired, &current).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::UnknownField { ref resource, ref field } if resource == "F1" && field == "NOPE"
        ));
    }

    #[test]
    fn test_merge_normalizes_mac() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = fields(json!({"NAME": "F1", "GW_MAC": "20:20:00:00:00:AA"}));
        let current = fields(json!({"GW_MAC": "2020.0000.00aa"}));

        let change_set = planner.plan_merge(&desired, &current).unwrap();
        assert!(!change_set.update_required);
    }

    #[test]
    fn test_replace_reverts_to_template_default() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let template = fields(json!({"A": 0, "B": 2}));
        let desired = fields(json!({"NAME": "F1", "A": 1}));

        let current = fields(json!({"A": 1, "B": 2}));
        let change_set = planner.plan_replace(&template, &desired, &current).unwrap();
        assert!(!change_set.update_required);
        assert!(change_set.fields.is_empty());

        let current = fields(json!({"A": 1, "B": 9}));
        let change_set = planner.plan_replace(&template, &desired, &current).unwrap();
        assert_eq!(change_set.fields, fields(json!({"B": 2})));
    }

    #[test]
    fn test_replace_desired_wins_over_template() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let template = fields(json!({"A": 0}));
        let desired = fields(json!({"NAME": "F1", "A": 3}));
        let current = fields(json!({"A": 0}));

        let change_set = planner.plan_replace(&template, &desired, &current).unwrap();
        assert_eq!(change_set.fields, fields(json!({"A": 3})));
    }

    #[test]
    fn test_replace_skips_unreported_template_fields() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let template = fields(json!({"A": 0, "INTERNAL": "x", "NAME": "template"}));
        let desired = fields(json!({"NAME": "F1"}));
        let current = fields(json!({"A": 0}));

        let change_set = planner.plan_replace(&template, &desired, &current).unwrap();
        assert!(!change_set.update_required);
    }

    #[test]
    fn test_batch_states() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = vec![
            fields(json!({"NAME": "F1", "X": 5})),
            fields(json!({"NAME": "F2", "X": 10})),
            fields(json!({"NAME": "F3", "X": 1})),
        ];
        let mut inventory = Inventory::new();
        inventory.insert("F1".into(), fields(json!({"X": 5})));
        inventory.insert("F3".into(), fields(json!({"X": 2})));

        let plan = planner
            .plan_batch(Policy::Merge, &desired, &inventory, &BTreeMap::new())
            .unwrap();

        assert_eq!(plan.resources[0].state, PlanState::NoDiff);
        assert_eq!(plan.resources[1].state, PlanState::NotOnController);
        assert!(matches!(plan.resources[2].state, PlanState::Diff(_)));
        let commits: Vec<_> = plan.commits().collect();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].resource, "F3");
    }

    #[test]
    fn test_batch_rejects_duplicates() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = vec![
            fields(json!({"NAME": "F1"})),
            fields(json!({"NAME": "F1"})),
        ];
        let err = planner
            .plan_batch(Policy::Merge, &desired, &Inventory::new(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }

    #[test]
    fn test_batch_replace_needs_template() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let desired = vec![fields(json!({"NAME": "F1", "TYPE": "VXLAN", "A": 1}))];
        let mut inventory = Inventory::new();
        inventory.insert("F1".into(), fields(json!({"A": 1})));

        let err = planner
            .plan_batch(Policy::Replace, &desired, &inventory, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(ref m) if m.contains("VXLAN")));

        let mut templates = BTreeMap::new();
        templates.insert("VXLAN".to_string(), fields(json!({"A": 0})));
        let plan = planner
            .plan_batch(Policy::Replace, &desired, &inventory, &templates)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_missing_name_is_validation_error() {
        let kind = kind();
        let planner = Planner::new(&kind);
        let err = planner.resource_name(&fields(json!({"X": 1}))).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
    }
}
