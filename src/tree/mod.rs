//! In-memory configuration tree of one repository.
//!
//! The tree is an arena of [`Element`]s keyed by id. Every mutation goes
//! through [`Tree::apply`]; failures are sent on the error channel and every
//! observable change on the action channel, in order.

mod action;
mod catalog;
mod check;
mod element;
mod operation;
mod property;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub use action::{Action, ActionKind, ActionPayload, ObjectSnapshot};
pub use catalog::{CapabilityEntry, TreeCatalog};
pub use check::{
    CheckConfig, CheckInstance, CheckSpec, Constraint, DEFINED, InstanceKey, Predicate, Threshold,
    configuration_hash,
};
pub use element::{ATTACH_RULES, Element, ElementDetail, ObjectState, ObjectType};
pub use operation::{NodeSpec, TreeError, TreeOperation};
pub use property::{
    ANY_VIEW, Property, PropertyKey, PropertySpec, PropertyType, PropertyValue, ServiceAttribute,
    TAG_PROPERTY, inherited_instance_id, view_matches,
};

use check::ConstraintContext;

use crate::types::{Cardinality, RepositoryRecord};

type TreeResult<T> = std::result::Result<T, TreeError>;

/// Nested read-only view of a subtree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeView {
    pub id: Uuid,
    pub name: String,
    pub object_type: ObjectType,
    pub state: ObjectState,
    pub detail: ElementDetail,
    pub properties: Vec<Property>,
    pub checks: Vec<CheckConfig>,
    pub children: Vec<TreeView>,
}

#[derive(Debug, Clone)]
pub struct Tree {
    repository_id: Uuid,
    repository_name: String,
    elements: HashMap<Uuid, Element>,
    instances: BTreeMap<InstanceKey, CheckInstance>,
    catalog: Arc<TreeCatalog>,
    actions: UnboundedSender<Action>,
    errors: UnboundedSender<TreeError>,
    replaying: bool,
}

impl Tree {
    pub fn new(
        repository: &RepositoryRecord,
        catalog: Arc<TreeCatalog>,
        actions: UnboundedSender<Action>,
        errors: UnboundedSender<TreeError>,
    ) -> Self {
        let mut root = Element::new(
            repository.id,
            repository.name.clone(),
            repository.team_id,
            ElementDetail::Repository {
                is_active: repository.is_active,
                rollback_level: repository.rollback_level.clone(),
            },
        );
        root.state = ObjectState::Standalone;

        let mut elements = HashMap::new();
        elements.insert(repository.id, root);

        Self {
            repository_id: repository.id,
            repository_name: repository.name.clone(),
            elements,
            instances: BTreeMap::new(),
            catalog,
            actions,
            errors,
            replaying: false,
        }
    }

    #[must_use]
    pub fn repository_id(&self) -> Uuid {
        self.repository_id
    }

    #[must_use]
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn set_catalog(&mut self, catalog: Arc<TreeCatalog>) {
        self.catalog = catalog;
    }

    /// Suspends instance computation while persisted state is replayed.
    pub fn begin_replay(&mut self) {
        self.replaying = true;
    }

    /// Ends a replay. `persisted` is the instance set the store knows; the
    /// following computation only emits differences against it.
    pub fn finish_replay(&mut self, persisted: Vec<CheckInstance>) {
        self.replaying = false;
        self.instances = persisted.into_iter().map(|i| (i.key(), i)).collect();
        self.recompute_instances();
        self.verify_integrity();
    }

    /// Applies one mutation. Returns false if it failed; the failure is on
    /// the error channel and the tree is unchanged.
    pub fn apply(&mut self, op: TreeOperation) -> bool {
        let name = op.name();
        let result = match op {
            TreeOperation::CreateBucket {
                id,
                name,
                environment,
                team_id,
            } => self.create_bucket(id, name, environment, team_id),
            TreeOperation::DestroyBucket { id } => self.destroy(id, ObjectType::Bucket),
            TreeOperation::CreateGroup {
                id,
                bucket_id,
                name,
                team_id,
            } => self.create_container(id, bucket_id, name, team_id, ElementDetail::Group),
            TreeOperation::DestroyGroup { id } => self.destroy(id, ObjectType::Group),
            TreeOperation::CreateCluster {
                id,
                bucket_id,
                name,
                team_id,
            } => self.create_container(id, bucket_id, name, team_id, ElementDetail::Cluster),
            TreeOperation::DestroyCluster { id } => self.destroy(id, ObjectType::Cluster),
            TreeOperation::AssignNode { bucket_id, node } => self.assign_node(bucket_id, node),
            TreeOperation::UnassignNode { id } => self.destroy(id, ObjectType::Node),
            TreeOperation::AddMember { parent, child } => self.add_member(parent, child),
            TreeOperation::AddProperty { object, spec } => self.add_property(object, spec),
            TreeOperation::UpdateProperty {
                object,
                source_instance_id,
                spec,
            } => self.update_property(object, source_instance_id, spec),
            TreeOperation::DeleteProperty {
                object,
                source_instance_id,
            } => self.delete_property(object, source_instance_id),
            TreeOperation::AddCheck { object, spec } => self.add_check(object, spec),
            TreeOperation::UpdateCheck { config_id, spec } => self.update_check(config_id, spec),
            TreeOperation::DeleteCheck { config_id } => self.delete_check(config_id),
        };

        match result {
            Ok(()) => {
                if !self.replaying {
                    self.recompute_instances();
                }
                self.verify_integrity();
                true
            }
            Err(err) => {
                debug!(repository = %self.repository_id, op = name, error = %err, "tree operation rejected");
                if self.errors.send(err).is_err() {
                    warn!(repository = %self.repository_id, "tree error channel closed");
                }
                false
            }
        }
    }

    #[must_use]
    pub fn find(&self, id: Uuid) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn instances(&self) -> impl Iterator<Item = &CheckInstance> {
        self.instances.values()
    }

    /// Source check configuration by id.
    #[must_use]
    pub fn check(&self, config_id: Uuid) -> Option<&CheckConfig> {
        self.elements
            .values()
            .flat_map(|e| e.checks.iter())
            .find(|c| c.id == config_id && !c.inherited)
    }

    /// Ids of all source check configurations.
    pub fn check_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.elements
            .values()
            .flat_map(|e| e.checks.iter())
            .filter(|c| !c.inherited)
            .map(|c| c.id)
    }

    /// Errors of the fault object, if an integrity check attached one.
    #[must_use]
    pub fn fault(&self) -> Option<&[String]> {
        self.elements.values().find_map(|e| match &e.detail {
            ElementDetail::Fault { errors } => Some(errors.as_slice()),
            _ => None,
        })
    }

    /// Bucket an object lives in; a bucket is its own bucket.
    #[must_use]
    pub fn bucket_of(&self, id: Uuid) -> Option<Uuid> {
        let mut current = self.elements.get(&id)?;
        let mut steps = 0;
        loop {
            if current.object_type() == ObjectType::Bucket {
                return Some(current.id);
            }
            steps += 1;
            if steps > self.elements.len() {
                return None;
            }
            current = self.elements.get(&current.parent?)?;
        }
    }

    fn environment_of(&self, id: Uuid) -> Option<&str> {
        let bucket = self.elements.get(&self.bucket_of(id)?)?;
        match &bucket.detail {
            ElementDetail::Bucket { environment } => Some(environment.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn snapshot(&self, id: Uuid) -> Option<TreeView> {
        let element = self.elements.get(&id)?;
        Some(TreeView {
            id,
            name: element.name.clone(),
            object_type: element.object_type(),
            state: element.state,
            detail: element.detail.clone(),
            properties: element.properties.clone(),
            checks: element.checks.clone(),
            children: element
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        })
    }

    /// Ids of `id` and everything below it, depth first.
    fn subtree(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(element) = self.elements.get(&current) {
                out.push(current);
                stack.extend(element.children.iter().rev());
            }
        }
        out
    }

    fn is_ancestor(&self, ancestor: Uuid, of: Uuid) -> bool {
        let mut current = self.elements.get(&of).and_then(|e| e.parent);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.elements.len() {
                return false;
            }
            current = self.elements.get(&id).and_then(|e| e.parent);
        }
        false
    }

    fn get(&self, id: Uuid) -> TreeResult<&Element> {
        self.elements
            .get(&id)
            .ok_or_else(|| TreeError::NotFound(format!("object {id}")))
    }

    fn get_mut(&mut self, id: Uuid) -> TreeResult<&mut Element> {
        self.elements
            .get_mut(&id)
            .ok_or_else(|| TreeError::NotFound(format!("object {id}")))
    }

    fn children_of(&self, id: Uuid) -> Vec<Uuid> {
        self.elements
            .get(&id)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    fn emit(
        &self,
        kind: ActionKind,
        object_type: ObjectType,
        object_id: Uuid,
        inherited: bool,
        payload: ActionPayload,
    ) {
        let action = Action {
            kind,
            repository_id: self.repository_id,
            object_type,
            object_id,
            inherited,
            payload,
        };
        if self.actions.send(action).is_err() {
            warn!(repository = %self.repository_id, "tree action channel closed");
        }
    }

    fn emit_object(&self, kind: ActionKind, element: &Element) {
        let bucket_id = match element.object_type() {
            ObjectType::Bucket => Some(element.id),
            _ => element.parent.and_then(|p| self.bucket_of(p)),
        };
        self.emit(
            kind,
            element.object_type(),
            element.id,
            false,
            ActionPayload::Object(ObjectSnapshot::new(element, bucket_id)),
        );
    }

    fn emit_property(&self, kind: ActionKind, property: &Property) {
        self.emit(
            kind,
            property.object_type,
            property.object_id,
            property.inherited,
            ActionPayload::Property(property.clone()),
        );
    }

    fn emit_check(&self, kind: ActionKind, check: &CheckConfig) {
        self.emit(
            kind,
            check.object_type,
            check.object_id,
            check.inherited,
            ActionPayload::Check(check.clone()),
        );
    }

    fn emit_instance(&self, kind: ActionKind, instance: &CheckInstance) {
        self.emit(
            kind,
            instance.object_type,
            instance.object_id,
            false,
            ActionPayload::Instance(instance.clone()),
        );
    }

    // --- objects ---

    fn create_bucket(
        &mut self,
        id: Uuid,
        name: String,
        environment: String,
        team_id: Uuid,
    ) -> TreeResult<()> {
        if !name.starts_with(&self.repository_name) {
            return Err(TreeError::Invalid(format!(
                "repository name must be a prefix of bucket name {name}"
            )));
        }
        if environment.is_empty() {
            return Err(TreeError::Invalid("bucket environment is required".into()));
        }
        self.ensure_unique(id, ObjectType::Bucket, &name, None)?;

        let element = Element::new(id, name, team_id, ElementDetail::Bucket { environment });
        self.attach(self.repository_id, element)
    }

    fn create_container(
        &mut self,
        id: Uuid,
        bucket_id: Uuid,
        name: String,
        team_id: Uuid,
        detail: ElementDetail,
    ) -> TreeResult<()> {
        if self.get(bucket_id)?.object_type() != ObjectType::Bucket {
            return Err(TreeError::InvalidAttachment(format!(
                "{bucket_id} is not a bucket"
            )));
        }
        self.ensure_unique(id, detail.object_type(), &name, Some(bucket_id))?;

        let element = Element::new(id, name, team_id, detail);
        self.attach(bucket_id, element)
    }

    fn assign_node(&mut self, bucket_id: Uuid, node: NodeSpec) -> TreeResult<()> {
        if self.elements.contains_key(&node.id) {
            return Err(TreeError::Duplicate(format!("node {} is already assigned", node.id)));
        }
        if self.get(bucket_id)?.object_type() != ObjectType::Bucket {
            return Err(TreeError::InvalidAttachment(format!(
                "{bucket_id} is not a bucket"
            )));
        }

        let element = Element::new(
            node.id,
            node.name,
            node.team_id,
            ElementDetail::Node {
                asset_id: node.asset_id,
                server_id: node.server_id,
                is_online: node.is_online,
            },
        );
        self.attach(bucket_id, element)
    }

    /// Names are unique per type inside one bucket, and bucket names inside
    /// the repository.
    fn ensure_unique(
        &self,
        id: Uuid,
        object_type: ObjectType,
        name: &str,
        bucket: Option<Uuid>,
    ) -> TreeResult<()> {
        if self.elements.contains_key(&id) {
            return Err(TreeError::Duplicate(format!("object id {id}")));
        }
        let clash = self.elements.values().any(|e| {
            e.object_type() == object_type
                && e.name == name
                && (bucket.is_none() || self.bucket_of(e.id) == bucket)
        });
        if clash {
            return Err(TreeError::Duplicate(format!("{object_type} name {name}")));
        }
        Ok(())
    }

    fn attach(&mut self, parent_id: Uuid, mut element: Element) -> TreeResult<()> {
        let parent_type = self.get(parent_id)?.object_type();
        let child_type = element.object_type();
        let state = parent_type.receive_state(child_type).ok_or_else(|| {
            TreeError::InvalidAttachment(format!("{parent_type} cannot receive {child_type}"))
        })?;

        element.state = state;
        element.parent = Some(parent_id);
        let id = element.id;
        self.emit_object(ActionKind::ObjectCreated, &element);
        self.elements.insert(id, element);
        self.get_mut(parent_id)?.children.push(id);

        self.inherit_into(id, parent_id);
        Ok(())
    }

    fn destroy(&mut self, id: Uuid, expected: ObjectType) -> TreeResult<()> {
        let element = self.get(id)?;
        if element.object_type() != expected {
            return Err(TreeError::Invalid(format!("{id} is not a {expected}")));
        }
        if !element.children.is_empty() {
            return Err(TreeError::NotEmpty(format!("{expected} {}", element.name)));
        }

        let property_sources: Vec<Uuid> = element
            .properties
            .iter()
            .filter(|p| !p.inherited)
            .map(|p| p.source_instance_id)
            .collect();
        let check_sources: Vec<Uuid> = element
            .checks
            .iter()
            .filter(|c| !c.inherited)
            .map(|c| c.id)
            .collect();
        for source in property_sources {
            self.remove_property_copies(id, source);
        }
        for config in check_sources {
            self.remove_check_copies(id, config);
        }

        let Some(element) = self.elements.remove(&id) else {
            return Err(TreeError::NotFound(format!("object {id}")));
        };
        for property in &element.properties {
            self.emit_property(ActionKind::PropertyDelete, property);
        }
        for check in &element.checks {
            self.emit_check(ActionKind::CheckDelete, check);
        }
        if let Some(parent) = element.parent.and_then(|p| self.elements.get_mut(&p)) {
            parent.children.retain(|child| *child != id);
        }
        self.emit_object(ActionKind::ObjectDeleted, &element);
        Ok(())
    }

    fn add_member(&mut self, parent: Uuid, child: Uuid) -> TreeResult<()> {
        let parent_type = self.get(parent)?.object_type();
        let child_element = self.get(child)?;
        let child_type = child_element.object_type();

        if !matches!(
            child_type,
            ObjectType::Group | ObjectType::Cluster | ObjectType::Node
        ) || !parent_type.can_receive(child_type)
        {
            return Err(TreeError::InvalidAttachment(format!(
                "{parent_type} cannot receive {child_type}"
            )));
        }
        if child_element.parent == Some(parent) {
            return Ok(());
        }
        if parent == child || self.is_ancestor(child, parent) {
            return Err(TreeError::InvalidAttachment(
                "membership would create a cycle".into(),
            ));
        }
        if self.bucket_of(parent) != self.bucket_of(child) {
            return Err(TreeError::InvalidAttachment(
                "members must belong to the same bucket".into(),
            ));
        }

        // Withdraw everything the subtree inherited through its old parent.
        let subtree = self.subtree(child);
        let inside: HashSet<Uuid> = subtree.iter().copied().collect();
        let mut foreign_properties = Vec::new();
        let mut foreign_checks = Vec::new();
        for id in &subtree {
            if let Some(element) = self.elements.get(id) {
                for p in element.properties.iter().filter(|p| p.inherited) {
                    if !inside.contains(&p.source_object_id)
                        && !foreign_properties.contains(&p.source_instance_id)
                    {
                        foreign_properties.push(p.source_instance_id);
                    }
                }
                for c in element.checks.iter().filter(|c| c.inherited) {
                    if !inside.contains(&c.source_object_id) && !foreign_checks.contains(&c.id) {
                        foreign_checks.push(c.id);
                    }
                }
            }
        }
        for source in foreign_properties {
            self.remove_property_copies(child, source);
        }
        for config in foreign_checks {
            self.remove_check_copies(child, config);
        }

        let old_parent = self.get(child)?.parent;
        if let Some(old) = old_parent.and_then(|p| self.elements.get_mut(&p)) {
            old.children.retain(|c| *c != child);
        }
        self.get_mut(parent)?.children.push(child);

        let element = self.get_mut(child)?;
        element.parent = Some(parent);
        if let Some(state) = parent_type.receive_state(child_type) {
            element.state = state;
        }
        let snapshot = element.clone();
        self.emit_object(ActionKind::ObjectUpdated, &snapshot);

        self.inherit_into(child, parent);
        Ok(())
    }

    /// Pushes everything `parent` passes down into the subtree at `child`.
    fn inherit_into(&mut self, child: Uuid, parent: Uuid) {
        for template in self.inheritable_properties(parent, None) {
            self.push_property(child, &template);
        }
        for template in self.inheritable_checks(parent, None) {
            self.push_check(child, &template);
        }
    }

    // --- properties ---

    fn validate_property(&self, element: &Element, spec: &PropertySpec) -> TreeResult<()> {
        let object_type = element.object_type();
        if object_type == ObjectType::Fault {
            return Err(TreeError::InvalidAttachment(
                "fault objects carry no properties".into(),
            ));
        }
        if spec.view.is_empty() {
            return Err(TreeError::Invalid("property view is required".into()));
        }
        if spec.value.name().is_empty() {
            return Err(TreeError::Invalid("property name is required".into()));
        }
        if !self.catalog.valid_direct(&spec.value, object_type) {
            return Err(TreeError::Invalid(format!(
                "system property {} cannot be set on a {object_type}",
                spec.value.name()
            )));
        }

        if let PropertyValue::Service { attributes, .. } = &spec.value {
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for attribute in attributes {
                let count = seen.entry(attribute.name.as_str()).or_default();
                *count += 1;
                match self.catalog.cardinality(&attribute.name) {
                    None => {
                        return Err(TreeError::Invalid(format!(
                            "unknown service attribute {}",
                            attribute.name
                        )));
                    }
                    Some(Cardinality::Once) if *count > 1 => {
                        return Err(TreeError::AttributeCardinality(format!(
                            "attribute {} may appear only once",
                            attribute.name
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn add_property(&mut self, object: Uuid, spec: PropertySpec) -> TreeResult<()> {
        let element = self.get(object)?;
        self.validate_property(element, &spec)?;

        let identity = spec.identity();
        let mask = spec.mask_key();
        if element
            .properties
            .iter()
            .any(|p| !p.inherited && p.identity() == identity)
        {
            return Err(TreeError::Duplicate(format!(
                "property {identity} on {}",
                element.name
            )));
        }

        // The new source masks whatever this object inherited for the key.
        let masked: Vec<Uuid> = element
            .properties
            .iter()
            .filter(|p| p.inherited && p.mask_key() == mask)
            .map(|p| p.source_instance_id)
            .collect();
        let object_type = element.object_type();
        for source in masked {
            self.remove_property_copies(object, source);
        }

        let instance_id = spec.instance_id.unwrap_or_else(Uuid::new_v4);
        let property = Property {
            instance_id,
            source_instance_id: instance_id,
            object_id: object,
            object_type,
            source_object_id: object,
            source_type: object_type,
            view: spec.view,
            inherited: false,
            inheritance: spec.inheritance,
            children_only: spec.children_only,
            value: spec.value,
        };
        self.get_mut(object)?.properties.push(property.clone());
        self.emit_property(ActionKind::PropertyNew, &property);

        if property.inheritance {
            let template = property.inherited_template();
            for child in self.children_of(object) {
                self.push_property(child, &template);
            }
        }
        Ok(())
    }

    fn push_property(&mut self, object: Uuid, template: &Property) {
        let mask = template.mask_key();
        let Some(element) = self.elements.get_mut(&object) else {
            return;
        };
        let object_type = element.object_type();
        if object_type == ObjectType::Fault {
            return;
        }
        if element
            .properties
            .iter()
            .any(|p| !p.inherited && p.mask_key() == mask)
        {
            return;
        }

        let (replaced, kept): (Vec<Property>, Vec<Property>) =
            std::mem::take(&mut element.properties)
                .into_iter()
                .partition(|p| {
                    p.inherited
                        && p.mask_key() == mask
                        && p.source_object_id != template.source_object_id
                });
        element.properties = kept;
        let holds_copy = element
            .properties
            .iter()
            .any(|p| p.source_instance_id == template.source_instance_id);
        let children = element.children.clone();

        for old in &replaced {
            self.emit_property(ActionKind::PropertyDelete, old);
        }

        if !holds_copy && self.catalog.valid_inherited(&template.value, object_type) {
            let copy = Property {
                instance_id: inherited_instance_id(template.source_instance_id, object),
                object_id: object,
                object_type,
                ..template.clone()
            };
            self.emit_property(ActionKind::PropertyNew, &copy);
            if let Some(element) = self.elements.get_mut(&object) {
                element.properties.push(copy);
            }
        }

        for child in children {
            self.push_property(child, template);
        }
    }

    /// Removes a source and every copy of it from the subtree at `object`.
    fn remove_property_copies(&mut self, object: Uuid, source: Uuid) {
        let Some(element) = self.elements.get_mut(&object) else {
            return;
        };
        let (removed, kept): (Vec<Property>, Vec<Property>) =
            std::mem::take(&mut element.properties)
                .into_iter()
                .partition(|p| p.source_instance_id == source);
        element.properties = kept;
        let children = element.children.clone();

        for property in &removed {
            self.emit_property(ActionKind::PropertyDelete, property);
        }
        for child in children {
            self.remove_property_copies(child, source);
        }
    }

    /// What `from` passes to its children: for each mask key, the inheritable
    /// entries of the closest ancestor (or `from` itself) holding the key.
    fn inheritable_properties(&self, from: Uuid, only: Option<&PropertyKey>) -> Vec<Property> {
        let mut seen: HashSet<PropertyKey> = HashSet::new();
        let mut out = Vec::new();
        let mut current = self.elements.get(&from);
        let mut steps = 0;

        while let Some(element) = current {
            let mut found_here: HashSet<PropertyKey> = HashSet::new();
            for property in &element.properties {
                let mask = property.mask_key();
                if only.is_some_and(|k| *k != mask) || seen.contains(&mask) {
                    continue;
                }
                found_here.insert(mask);
                if property.inheritance {
                    out.push(property.inherited_template());
                }
            }
            seen.extend(found_here);

            steps += 1;
            if steps > self.elements.len() {
                break;
            }
            current = element.parent.and_then(|p| self.elements.get(&p));
        }
        out
    }

    fn update_property(
        &mut self,
        object: Uuid,
        source_instance_id: Uuid,
        spec: PropertySpec,
    ) -> TreeResult<()> {
        let element = self.get(object)?;
        let property = element
            .properties
            .iter()
            .find(|p| p.instance_id == source_instance_id && !p.inherited)
            .ok_or_else(|| TreeError::NotFound(format!("property {source_instance_id}")))?;

        if spec.identity() != property.identity()
            || spec.inheritance != property.inheritance
            || spec.children_only != property.children_only
        {
            return Err(TreeError::Invalid(
                "property key and inheritance flags cannot change on update".into(),
            ));
        }
        self.validate_property(element, &spec)?;
        if spec.value == property.value {
            return Ok(());
        }

        self.update_property_copies(object, source_instance_id, &spec.value);
        Ok(())
    }

    fn update_property_copies(&mut self, object: Uuid, source: Uuid, value: &PropertyValue) {
        let Some(element) = self.elements.get_mut(&object) else {
            return;
        };
        let mut updated = Vec::new();
        for property in element
            .properties
            .iter_mut()
            .filter(|p| p.source_instance_id == source)
        {
            property.value = value.clone();
            updated.push(property.clone());
        }
        let children = element.children.clone();

        for property in &updated {
            self.emit_property(ActionKind::PropertyUpdate, property);
        }
        for child in children {
            self.update_property_copies(child, source, value);
        }
    }

    fn delete_property(&mut self, object: Uuid, source_instance_id: Uuid) -> TreeResult<()> {
        let element = self.get(object)?;
        let property = element
            .properties
            .iter()
            .find(|p| p.source_instance_id == source_instance_id)
            .ok_or_else(|| TreeError::NotFound(format!("property {source_instance_id}")))?;
        if property.inherited {
            return Err(TreeError::Invalid(format!(
                "inherited property {source_instance_id} can only be removed at its source"
            )));
        }
        let mask = property.mask_key();
        let parent = element.parent;

        self.remove_property_copies(object, source_instance_id);

        let still_masked = self
            .get(object)?
            .properties
            .iter()
            .any(|p| !p.inherited && p.mask_key() == mask);
        if let (false, Some(parent)) = (still_masked, parent) {
            for template in self.inheritable_properties(parent, Some(&mask)) {
                self.push_property(object, &template);
            }
        }
        Ok(())
    }

    // --- checks ---

    fn validate_check(&self, spec: &CheckSpec, exclude: Option<Uuid>) -> TreeResult<()> {
        let entry = self
            .catalog
            .capability(spec.capability_id)
            .ok_or(TreeError::MissingCapability(spec.capability_id))?;

        if spec.name.trim().is_empty() {
            return Err(TreeError::Invalid("check name is required".into()));
        }
        if spec.interval == 0 {
            return Err(TreeError::Invalid("check interval must be positive".into()));
        }
        if spec.thresholds.is_empty() {
            return Err(TreeError::Invalid("check needs at least one threshold".into()));
        }
        if spec.thresholds.len() > entry.capability.thresholds as usize {
            return Err(TreeError::Invalid(format!(
                "capability {} supports at most {} thresholds",
                entry.canonical_name(),
                entry.capability.thresholds
            )));
        }
        let mut levels = HashSet::new();
        for threshold in &spec.thresholds {
            if !self.catalog.knows_level(&threshold.level) {
                return Err(TreeError::Invalid(format!(
                    "unknown notification level {}",
                    threshold.level
                )));
            }
            if !levels.insert(threshold.level.as_str()) {
                return Err(TreeError::Invalid(format!(
                    "level {} used by more than one threshold",
                    threshold.level
                )));
            }
        }
        for constraint in &spec.constraints {
            if let Constraint::Attribute { name, .. } = constraint {
                if self.catalog.cardinality(name).is_none() {
                    return Err(TreeError::Invalid(format!("unknown service attribute {name}")));
                }
            }
        }

        let clash = self
            .elements
            .values()
            .flat_map(|e| e.checks.iter())
            .any(|c| !c.inherited && c.name == spec.name && Some(c.id) != exclude);
        if clash {
            return Err(TreeError::Duplicate(format!("check name {}", spec.name)));
        }
        Ok(())
    }

    fn add_check(&mut self, object: Uuid, spec: CheckSpec) -> TreeResult<()> {
        let element = self.get(object)?;
        let object_type = element.object_type();
        if object_type == ObjectType::Fault {
            return Err(TreeError::InvalidAttachment(
                "fault objects carry no checks".into(),
            ));
        }
        self.validate_check(&spec, None)?;

        if let Some(existing) = element
            .checks
            .iter()
            .find(|c| c.capability_id == spec.capability_id)
        {
            if !existing.inherited {
                return Err(TreeError::Duplicate(format!(
                    "check for capability {} on {}",
                    spec.capability_id, element.name
                )));
            }
            let masked = existing.id;
            self.remove_check_copies(object, masked);
        }

        let check = CheckConfig {
            id: spec.id.unwrap_or_else(Uuid::new_v4),
            name: spec.name,
            repository_id: self.repository_id,
            object_id: object,
            object_type,
            source_object_id: object,
            source_type: object_type,
            capability_id: spec.capability_id,
            interval: spec.interval,
            constraints: spec.constraints,
            thresholds: spec.thresholds,
            inheritance: spec.inheritance,
            children_only: spec.children_only,
            external_id: spec.external_id,
            inherited: false,
        };
        self.get_mut(object)?.checks.push(check.clone());
        self.emit_check(ActionKind::CheckNew, &check);

        if check.inheritance {
            let template = check.inherited_template();
            for child in self.children_of(object) {
                self.push_check(child, &template);
            }
        }
        Ok(())
    }

    fn push_check(&mut self, object: Uuid, template: &CheckConfig) {
        let Some(element) = self.elements.get_mut(&object) else {
            return;
        };
        let object_type = element.object_type();
        if object_type == ObjectType::Fault {
            return;
        }

        let mut replaced = None;
        if let Some(position) = element
            .checks
            .iter()
            .position(|c| c.capability_id == template.capability_id)
        {
            let existing = &element.checks[position];
            if !existing.inherited || existing.id == template.id {
                return;
            }
            replaced = Some(element.checks.remove(position));
        }

        let copy = CheckConfig {
            object_id: object,
            object_type,
            ..template.clone()
        };
        element.checks.push(copy.clone());
        let children = element.children.clone();

        if let Some(old) = &replaced {
            self.emit_check(ActionKind::CheckDelete, old);
        }
        self.emit_check(ActionKind::CheckNew, &copy);
        for child in children {
            self.push_check(child, template);
        }
    }

    fn remove_check_copies(&mut self, object: Uuid, config_id: Uuid) {
        let Some(element) = self.elements.get_mut(&object) else {
            return;
        };
        let (removed, kept): (Vec<CheckConfig>, Vec<CheckConfig>) =
            std::mem::take(&mut element.checks)
                .into_iter()
                .partition(|c| c.id == config_id);
        element.checks = kept;
        let children = element.children.clone();

        for check in &removed {
            self.emit_check(ActionKind::CheckDelete, check);
        }
        for child in children {
            self.remove_check_copies(child, config_id);
        }
    }

    fn inheritable_checks(&self, from: Uuid, only: Option<Uuid>) -> Vec<CheckConfig> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut out = Vec::new();
        let mut current = self.elements.get(&from);
        let mut steps = 0;

        while let Some(element) = current {
            for check in &element.checks {
                if only.is_some_and(|c| c != check.capability_id)
                    || !seen.insert(check.capability_id)
                {
                    continue;
                }
                if check.inheritance {
                    out.push(check.inherited_template());
                }
            }

            steps += 1;
            if steps > self.elements.len() {
                break;
            }
            current = element.parent.and_then(|p| self.elements.get(&p));
        }
        out
    }

    fn source_holder(&self, config_id: Uuid) -> TreeResult<Uuid> {
        self.check(config_id)
            .map(|c| c.object_id)
            .ok_or_else(|| TreeError::NotFound(format!("check configuration {config_id}")))
    }

    fn update_check(&mut self, config_id: Uuid, spec: CheckSpec) -> TreeResult<()> {
        let holder = self.source_holder(config_id)?;
        let Some(current) = self.check(config_id).cloned() else {
            return Err(TreeError::NotFound(format!(
                "check configuration {config_id}"
            )));
        };
        if spec.capability_id != current.capability_id
            || spec.inheritance != current.inheritance
            || spec.children_only != current.children_only
        {
            return Err(TreeError::Invalid(
                "check capability and inheritance flags cannot change on update".into(),
            ));
        }
        self.validate_check(&spec, Some(config_id))?;

        let updated = CheckConfig {
            name: spec.name,
            interval: spec.interval,
            constraints: spec.constraints,
            thresholds: spec.thresholds,
            external_id: spec.external_id,
            ..current.clone()
        };
        if updated == current {
            return Ok(());
        }
        self.update_check_copies(holder, &updated);
        Ok(())
    }

    fn update_check_copies(&mut self, object: Uuid, source: &CheckConfig) {
        let Some(element) = self.elements.get_mut(&object) else {
            return;
        };
        let mut updated = Vec::new();
        for check in element.checks.iter_mut().filter(|c| c.id == source.id) {
            check.name = source.name.clone();
            check.interval = source.interval;
            check.constraints = source.constraints.clone();
            check.thresholds = source.thresholds.clone();
            check.external_id = source.external_id.clone();
            updated.push(check.clone());
        }
        let children = element.children.clone();

        for check in &updated {
            self.emit_check(ActionKind::CheckUpdate, check);
        }
        for child in children {
            self.update_check_copies(child, source);
        }
    }

    fn delete_check(&mut self, config_id: Uuid) -> TreeResult<()> {
        let holder = self.source_holder(config_id)?;
        let element = self.get(holder)?;
        let parent = element.parent;
        let capability = element
            .checks
            .iter()
            .find(|c| c.id == config_id)
            .map(|c| c.capability_id);

        self.remove_check_copies(holder, config_id);

        if let (Some(parent), Some(capability)) = (parent, capability) {
            for template in self.inheritable_checks(parent, Some(capability)) {
                self.push_check(holder, &template);
            }
        }
        Ok(())
    }

    // --- instances ---

    fn compute_instances(&self) -> BTreeMap<InstanceKey, CheckInstance> {
        let mut out = BTreeMap::new();

        for id in self.subtree(self.repository_id) {
            let Some(element) = self.elements.get(&id) else {
                continue;
            };
            let object_type = element.object_type();
            if !matches!(
                object_type,
                ObjectType::Group | ObjectType::Cluster | ObjectType::Node
            ) {
                continue;
            }
            let environment = self.environment_of(id);

            for config in element.effective_checks() {
                let Some(entry) = self.catalog.capability(config.capability_id) else {
                    warn!(
                        repository = %self.repository_id,
                        check = %config.id,
                        "capability vanished from catalogue, skipping check"
                    );
                    continue;
                };
                let view = entry.capability.view.as_str();
                let context = ConstraintContext {
                    object_type,
                    state: element.state,
                    environment,
                    view,
                    properties: element.effective_properties().collect(),
                };
                let Some(services) = context.evaluate(&config.constraints) else {
                    continue;
                };

                for service in services {
                    let key = InstanceKey {
                        config_id: config.id,
                        object_id: id,
                        view: view.to_string(),
                        service_source_id: service.map(|s| s.source_instance_id),
                    };
                    let hash = configuration_hash(&key, config);
                    let deployment =
                        deployment_details(element, config, entry, &context, service);
                    out.insert(
                        key.clone(),
                        CheckInstance {
                            id: key.instance_id(),
                            instance_config_id: Uuid::nil(),
                            config_id: config.id,
                            repository_id: self.repository_id,
                            object_id: id,
                            object_type,
                            capability_id: config.capability_id,
                            view: key.view.clone(),
                            service_source_id: key.service_source_id,
                            service_name: service.map(|s| s.value.name().to_string()),
                            hash,
                            version: 0,
                            deployment,
                        },
                    );
                }
            }
        }
        out
    }

    /// Re-evaluates every check and emits the difference against the
    /// current instance set.
    fn recompute_instances(&mut self) {
        let fresh = self.compute_instances();
        let mut previous = std::mem::take(&mut self.instances);
        let mut next = BTreeMap::new();

        for (key, mut instance) in fresh {
            match previous.remove(&key) {
                Some(old) if old.hash == instance.hash => {
                    next.insert(key, old);
                }
                Some(old) => {
                    instance.version = old.version + 1;
                    instance.instance_config_id = Uuid::new_v4();
                    self.emit_instance(ActionKind::CheckInstanceUpdate, &instance);
                    next.insert(key, instance);
                }
                None => {
                    instance.instance_config_id = Uuid::new_v4();
                    self.emit_instance(ActionKind::CheckInstanceNew, &instance);
                    next.insert(key, instance);
                }
            }
        }
        for old in previous.into_values() {
            self.emit_instance(ActionKind::CheckInstanceDelete, &old);
        }
        self.instances = next;
    }

    // --- integrity ---

    /// Structural invariant violations, sorted.
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();

        for (id, element) in &self.elements {
            let object_type = element.object_type();
            if object_type == ObjectType::Fault {
                continue;
            }
            if *id == self.repository_id {
                if element.parent.is_some() {
                    out.push(format!("repository {id} has a parent"));
                }
            } else {
                match element.parent.and_then(|p| self.elements.get(&p)) {
                    None => out.push(format!("{object_type} {id} has no parent")),
                    Some(parent) => {
                        if !parent.children.contains(id) {
                            out.push(format!("{object_type} {id} missing from its parent"));
                        }
                        if !parent.object_type().can_receive(object_type) {
                            out.push(format!(
                                "{} {} cannot hold {object_type} {id}",
                                parent.object_type(),
                                parent.id
                            ));
                        }
                    }
                }
                if !self.is_ancestor(self.repository_id, *id) {
                    out.push(format!("{object_type} {id} is not reachable from the root"));
                }
            }

            for child in &element.children {
                if self.elements.get(child).and_then(|c| c.parent) != Some(*id) {
                    out.push(format!("child {child} of {id} points elsewhere"));
                }
            }

            if object_type == ObjectType::Bucket && !element.name.starts_with(&self.repository_name)
            {
                out.push(format!("bucket {} lacks the repository prefix", element.name));
            }

            let mut identities = HashSet::new();
            let mut held = HashSet::new();
            let mut inherited_from: HashMap<PropertyKey, Uuid> = HashMap::new();
            let sources: HashSet<PropertyKey> = element
                .properties
                .iter()
                .filter(|p| !p.inherited)
                .map(Property::mask_key)
                .collect();
            for property in &element.properties {
                if !held.insert(property.source_instance_id) {
                    out.push(format!("{id} holds property {} twice", property.source_instance_id));
                }
                if !property.inherited && !identities.insert(property.identity()) {
                    out.push(format!("{id} has two sources for {}", property.identity()));
                }
                if property.inherited {
                    let mask = property.mask_key();
                    if sources.contains(&mask) {
                        out.push(format!("{id} inherits masked property {mask}"));
                    }
                    let origin = *inherited_from
                        .entry(mask.clone())
                        .or_insert(property.source_object_id);
                    if origin != property.source_object_id {
                        out.push(format!("{id} inherits {mask} from two sources"));
                    }
                }
            }

            let mut capabilities = HashSet::new();
            for check in &element.checks {
                if !capabilities.insert(check.capability_id) {
                    out.push(format!("{id} holds capability {} twice", check.capability_id));
                }
            }
        }

        out.sort();
        out
    }

    /// Attaches a fault object below the root when invariants are broken.
    fn verify_integrity(&mut self) {
        if self.fault().is_some() {
            return;
        }
        let violations = self.violations();
        if violations.is_empty() {
            return;
        }

        error!(
            repository = %self.repository_id,
            count = violations.len(),
            "tree integrity violated"
        );
        let team_id = self
            .elements
            .get(&self.repository_id)
            .map(|r| r.team_id)
            .unwrap_or_default();
        let mut fault = Element::new(
            Uuid::new_v4(),
            "fault",
            team_id,
            ElementDetail::Fault { errors: violations },
        );
        fault.state = ObjectState::Standalone;
        fault.parent = Some(self.repository_id);
        let fault_id = fault.id;
        self.elements.insert(fault_id, fault);
        if let Some(root) = self.elements.get_mut(&self.repository_id) {
            root.children.push(fault_id);
        }
    }
}

fn deployment_details(
    element: &Element,
    config: &CheckConfig,
    entry: &CapabilityEntry,
    context: &ConstraintContext<'_>,
    service: Option<&Property>,
) -> serde_json::Value {
    let properties: Vec<&PropertyValue> = context
        .properties
        .iter()
        .filter(|p| view_matches(&p.view, context.view))
        .filter(|p| p.value.property_type() != PropertyType::Service)
        .map(|p| &p.value)
        .collect();

    json!({
        "check_config_id": config.id,
        "check_name": config.name,
        "external_id": config.external_id,
        "interval": config.interval,
        "thresholds": config.thresholds,
        "capability": {
            "id": entry.capability.id,
            "name": entry.canonical_name(),
            "monitoring_id": entry.capability.monitoring_id,
            "monitoring": entry.monitoring,
            "metric": entry.capability.metric,
            "view": entry.capability.view,
        },
        "object": {
            "id": element.id,
            "name": element.name,
            "type": element.object_type(),
            "state": element.state,
            "environment": context.environment,
        },
        "properties": properties,
        "service": service.map(|s| &s.value),
    })
}
