//! Custom-entity recipes (spec §4.7 step 4, §9 "Custom entity recipes").
//!
//! Represented as data, as the design notes require: a `model -> recipes`
//! table plus a single factory function over it, resisting a polymorphic
//! class hierarchy per device model. The actual per-model tables are data
//! owned by the host (spec §1: "the catalog of device-family recipes ...
//! is data" and out of scope for the core); what's specified here is the
//! mechanism that consumes such a table.

use std::collections::HashMap;

use crate::address::{channel_address, Address};
use crate::model::device::Device;
use crate::model::entity::{CustomEntity, Entity};
use crate::model::parameter::ParamsetKey;

/// One logical field of a composite entity: which channel (relative to the
/// recipe's primary channel) and which parameter backs it.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub channel_offset: u32,
    pub parameter: String,
    pub paramset_key: ParamsetKey,
}

/// A recipe for one device model: a primary channel, a set of secondary
/// channels, a field map, and a flat list of additional (channel, parameter)
/// pairs to promote to visible regardless of the default visibility policy
/// (spec §4.7 step 5).
#[derive(Clone, Debug)]
pub struct Recipe {
    pub name: String,
    pub device_type_prefixes: Vec<String>,
    pub primary_channel: u32,
    pub secondary_channels: Vec<u32>,
    pub fields: HashMap<String, FieldSpec>,
    pub additional: Vec<(u32, String)>,
}

impl Recipe {
    /// `true` if `model` matches one of this recipe's device-type prefixes.
    pub fn matches(&self, model: &str) -> bool {
        self.device_type_prefixes.iter().any(|prefix| model.starts_with(prefix.as_str()))
    }
}

/// The recipe table: an ordered list so that, if several recipes could
/// match a model, the first is used deterministically.
#[derive(Clone, Debug, Default)]
pub struct RecipeTable(pub Vec<Recipe>);

impl RecipeTable {
    pub fn recipe_for(&self, model: &str) -> Option<&Recipe> {
        self.0.iter().find(|recipe| recipe.matches(model))
    }
}

/// Builds a `CustomEntity` for `device` from `recipe`, wiring its fields to
/// already-built `GenericEntity`s.
///
/// Per spec §4.7 step 4: "Missing backing entities cause the CustomEntity
/// to be rejected (not partially built)" — this returns `None` rather than
/// a partially-wired entity when any field's backing generic entity is
/// absent from `device.entities`.
pub fn build_custom_entity(
    central_name: &str,
    device: &Device,
    recipe: &Recipe,
) -> Option<CustomEntity> {
    let mut fields = HashMap::with_capacity(recipe.fields.len());

    for (logical_name, field) in &recipe.fields {
        let channel_no = recipe.primary_channel + field.channel_offset;
        let channel = channel_address(device.address.as_str(), channel_no);
        let key = (channel.clone(), field.paramset_key, field.parameter.clone());

        if !device.entities.contains_key(&key) {
            return None;
        }

        fields.insert(logical_name.clone(), key);
    }

    let unique_identifier = crate::model::entity::unique_identifier(
        central_name,
        device.address.as_str(),
        &recipe.name,
    );

    Some(CustomEntity {
        device_address: device.address.clone(),
        model: device.model.clone(),
        recipe_name: recipe.name.clone(),
        fields,
        unique_identifier,
    })
}

/// Resolves the (channel_no, parameter) pairs a recipe's `additional` list
/// names, for the "promoted to visible" step.
pub fn additional_fields(device_address: &Address, recipe: &Recipe) -> Vec<(Address, String)> {
    recipe
        .additional
        .iter()
        .map(|(channel_no, parameter)| {
            (channel_address(device_address.as_str(), *channel_no), parameter.clone())
        })
        .collect()
}

/// Builds every matching custom entity for `device`, skipping models with
/// no matching recipe and recipes that fail to find all backing entities.
pub fn build_custom_entities(
    central_name: &str,
    device: &Device,
    table: &RecipeTable,
) -> Vec<Entity> {
    table
        .recipe_for(&device.model)
        .and_then(|recipe| build_custom_entity(central_name, device, recipe))
        .map(|custom| vec![Entity::Custom(custom)])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::DeviceDescription;
    use crate::model::entity::GenericEntity;
    use crate::model::parameter::{ParameterData, ParameterFlags, ParameterOperations};
    use crate::value::ParameterType;

    fn switch_recipe() -> Recipe {
        let mut fields = HashMap::new();
        fields.insert(
            "state".to_owned(),
            FieldSpec { channel_offset: 0, parameter: "STATE".into(), paramset_key: ParamsetKey::Values },
        );
        fields.insert(
            "on_time".to_owned(),
            FieldSpec { channel_offset: 0, parameter: "ON_TIME".into(), paramset_key: ParamsetKey::Values },
        );
        Recipe {
            name: "switch".into(),
            device_type_prefixes: vec!["HmIP-BSM".into()],
            primary_channel: 4,
            secondary_channels: vec![],
            fields,
            additional: vec![],
        }
    }

    fn device_with_channel_4_entities() -> Device {
        let desc = DeviceDescription {
            address: Address::new("VCU2128127"),
            device_type: "HmIP-BSM".into(),
            parent: String::new(),
            children: vec![Address::new("VCU2128127:4")],
            paramsets: vec![],
            firmware: None,
            available_firmware: None,
            updatable: None,
            version: None,
            rx_mode: None,
            roaming: None,
            interface: None,
        };
        let mut device = Device::new("hmip", &desc);
        let pd = ParameterData {
            parameter_type: ParameterType::Bool,
            operations: ParameterOperations::READ | ParameterOperations::WRITE,
            flags: ParameterFlags::VISIBLE,
            min: None,
            max: None,
            default: None,
            unit: None,
            value_list: None,
            special: None,
        };
        let channel = Address::new("VCU2128127:4");
        device.insert_entity(
            channel.clone(),
            ParamsetKey::Values,
            "STATE".into(),
            Entity::Generic(GenericEntity::new(
                "ccu",
                channel.clone(),
                ParamsetKey::Values,
                "STATE".into(),
                pd.clone(),
                true,
            )),
        );
        device.insert_entity(
            channel.clone(),
            ParamsetKey::Values,
            "ON_TIME".into(),
            Entity::Generic(GenericEntity::new(
                "ccu",
                channel.clone(),
                ParamsetKey::Values,
                "ON_TIME".into(),
                pd,
                true,
            )),
        );
        device
    }

    #[test]
    fn builds_custom_entity_when_all_fields_present() {
        let device = device_with_channel_4_entities();
        let recipe = switch_recipe();
        let custom = build_custom_entity("ccu", &device, &recipe).unwrap();
        assert_eq!(custom.fields.len(), 2);
        assert!(custom.fields.contains_key("state"));
    }

    #[test]
    fn rejects_when_a_field_is_missing() {
        let desc = DeviceDescription {
            address: Address::new("VCU2128127"),
            device_type: "HmIP-BSM".into(),
            parent: String::new(),
            children: vec![],
            paramsets: vec![],
            firmware: None,
            available_firmware: None,
            updatable: None,
            version: None,
            rx_mode: None,
            roaming: None,
            interface: None,
        };
        let device = Device::new("hmip", &desc);
        let recipe = switch_recipe();
        assert!(build_custom_entity("ccu", &device, &recipe).is_none());
    }

    #[test]
    fn recipe_table_matches_by_prefix() {
        let table = RecipeTable(vec![switch_recipe()]);
        assert!(table.recipe_for("HmIP-BSM").is_some());
        assert!(table.recipe_for("HmIP-eTRV").is_none());
    }
}
