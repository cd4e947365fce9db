//! Anonymized device-definition export, and a startup self-check over the
//! bundled visibility/recipe tables (spec §4.9), grounded on
//! `original_source/hahomematic/support.py`'s `DeviceExporter` and
//! `save_device_definition`.

use std::collections::HashMap;
use std::path::Path;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::address::Address;
use crate::caches::visibility::ParameterVisibilityCache;
use crate::central::Central;
use crate::error::{Error, Result};
use crate::model::custom::RecipeTable;
use crate::model::parameter::ParamsetKey;

const DEVICE_DESCRIPTIONS_DIR: &str = "export_device_descriptions";
const PARAMSET_DESCRIPTIONS_DIR: &str = "export_paramset_descriptions";

/// Maps real device addresses to a synthetic `VCU<7-digit>` stand-in, one
/// per process, so exporting the same device twice reuses the same
/// anonymized address (spec §4.9).
#[derive(Default)]
pub struct AddressAnonymizer {
    synthetic: Mutex<HashMap<String, String>>,
}

impl AddressAnonymizer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn synthetic_device_address(&self, device_address: &str) -> String {
        let mut synthetic = self.synthetic.lock().await;
        synthetic
            .entry(device_address.to_owned())
            .or_insert_with(|| format!("VCU{}", rand::thread_rng().gen_range(1_000_000..10_000_000)))
            .clone()
    }

    async fn anonymize(&self, address: &Address) -> Address {
        let synthetic_device = self.synthetic_device_address(address.device_address().as_str()).await;
        match address.channel_no() {
            Some(channel_no) => crate::address::channel_address(&synthetic_device, channel_no),
            None => Address::new(synthetic_device),
        }
    }
}

async fn write_export_file(
    storage_folder: &Path,
    sub_dir: &str,
    filename: &str,
    data: &impl serde::Serialize,
) -> Result<()> {
    let dir = storage_folder.join(sub_dir);
    tokio::fs::create_dir_all(&dir).await?;
    let bytes = serde_json::to_vec_pretty(data)?;
    let tmp_path = dir.join(format!("{filename}.tmp"));
    let final_path = dir.join(filename);
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}

/// Writes `<storage>/export_device_descriptions/<model>.json` and
/// `<storage>/export_paramset_descriptions/<model>.json` for `device_address`,
/// with every address in both files replaced by its synthetic stand-in
/// (spec §4.9).
#[instrument(skip(central, anonymizer))]
pub async fn export_devices(
    central: &Central,
    anonymizer: &AddressAnonymizer,
    interface_id: &str,
    device_address: &Address,
) -> Result<()> {
    let descriptions = central.device_descriptions.get_device_with_channels(interface_id, device_address).await;
    let device_desc = descriptions
        .get(device_address)
        .ok_or_else(|| Error::ConfigError(format!("'{device_address}' is not a known device address")))?;
    let device_type = device_desc.device_type.clone();

    let mut anonymized_descriptions = Vec::with_capacity(descriptions.len());
    let mut anonymized_paramsets: HashMap<String, HashMap<String, HashMap<String, crate::model::parameter::ParameterData>>> =
        HashMap::new();

    for (address, description) in &descriptions {
        let mut anonymized = description.clone();
        anonymized.address = anonymizer.anonymize(address).await;
        if anonymized.is_channel() {
            anonymized.parent = anonymized.address.device_address().as_str().to_owned();
        } else if !anonymized.children.is_empty() {
            let mut children = Vec::with_capacity(anonymized.children.len());
            for child in &anonymized.children {
                children.push(anonymizer.anonymize(child).await);
            }
            anonymized.children = children;
        }
        anonymized_descriptions.push(anonymized);

        let mut paramsets = HashMap::new();
        for paramset_key in [ParamsetKey::Values, ParamsetKey::Master, ParamsetKey::Link] {
            let parameters = central
                .paramset_descriptions
                .get_channel_paramset_descriptions(interface_id, address, paramset_key)
                .await;
            if !parameters.is_empty() {
                paramsets.insert(paramset_key.as_str().to_owned(), parameters);
            }
        }
        if !paramsets.is_empty() {
            let anonymized_address = anonymizer.anonymize(address).await;
            anonymized_paramsets.insert(anonymized_address.as_str().to_owned(), paramsets);
        }
    }

    let filename = format!("{device_type}.json");
    write_export_file(&central.config.storage_folder, DEVICE_DESCRIPTIONS_DIR, &filename, &anonymized_descriptions)
        .await?;
    write_export_file(&central.config.storage_folder, PARAMSET_DESCRIPTIONS_DIR, &filename, &anonymized_paramsets)
        .await?;
    info!(device_type, "exported anonymized device definition");
    Ok(())
}

/// Startup self-check over the bundled visibility/recipe tables (spec
/// §4.9): walks the data `Central::new` was handed and fails fast with
/// [`Error::ConfigError`] on structural problems, rather than letting a bad
/// table silently drop entities at construction time. Not host-callable;
/// invoked once from `Central::start`.
pub fn validate_tables(visibility: &ParameterVisibilityCache, recipes: &RecipeTable) -> Result<()> {
    validate_recipes(recipes)?;
    validate_visibility(visibility)?;
    Ok(())
}

fn validate_recipes(recipes: &RecipeTable) -> Result<()> {
    let mut seen_names = std::collections::HashSet::new();
    for recipe in &recipes.0 {
        if recipe.name.is_empty() {
            return Err(Error::ConfigError("a recipe has an empty name".into()));
        }
        if !seen_names.insert(recipe.name.clone()) {
            return Err(Error::ConfigError(format!("recipe name '{}' is used more than once", recipe.name)));
        }
        if recipe.device_type_prefixes.is_empty() {
            return Err(Error::ConfigError(format!("recipe '{}' has no device_type_prefixes", recipe.name)));
        }

        let known_offsets: std::collections::HashSet<u32> =
            std::iter::once(0).chain(recipe.secondary_channels.iter().copied()).collect();

        for (field_name, field) in &recipe.fields {
            if !known_offsets.contains(&field.channel_offset) {
                return Err(Error::ConfigError(format!(
                    "recipe '{}' field '{}' references channel offset {} which is neither the \
                     primary channel (0) nor one of its secondary_channels",
                    recipe.name, field_name, field.channel_offset
                )));
            }
        }

        for (channel_no, parameter) in &recipe.additional {
            let offset = channel_no.checked_sub(recipe.primary_channel);
            if !offset.is_some_and(|offset| known_offsets.contains(&offset)) {
                return Err(Error::ConfigError(format!(
                    "recipe '{}' additional entry '{}' names channel {channel_no}, which is not \
                     reachable from primary channel {}",
                    recipe.name, parameter, recipe.primary_channel
                )));
            }
        }
    }
    Ok(())
}

fn validate_visibility(visibility: &ParameterVisibilityCache) -> Result<()> {
    for (device_type_lower, channels) in visibility.extra_relevant_master_channels_for_validation() {
        if device_type_lower.is_empty() {
            return Err(Error::ConfigError(
                "un-ignore file contains a device-scoped MASTER entry with an empty device type".into(),
            ));
        }
        if channels.is_empty() {
            return Err(Error::ConfigError(format!(
                "un-ignore file contributed no relevant MASTER channels for device type '{device_type_lower}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::custom::{FieldSpec, Recipe};

    fn recipe_with_offset(offset: u32) -> Recipe {
        let mut fields = HashMap::new();
        fields.insert("state".to_owned(), FieldSpec { channel_offset: offset, parameter: "STATE".into(), paramset_key: ParamsetKey::Values });
        Recipe {
            name: "switch".into(),
            device_type_prefixes: vec!["HmIP-BSM".into()],
            primary_channel: 4,
            secondary_channels: vec![1],
            fields,
            additional: vec![],
        }
    }

    #[test]
    fn accepts_a_well_formed_recipe_table() {
        let table = RecipeTable(vec![recipe_with_offset(0)]);
        assert!(validate_recipes(&table).is_ok());
    }

    #[test]
    fn rejects_a_field_referencing_an_unknown_channel_offset() {
        let table = RecipeTable(vec![recipe_with_offset(9)]);
        assert!(validate_recipes(&table).is_err());
    }

    #[test]
    fn rejects_duplicate_recipe_names() {
        let table = RecipeTable(vec![recipe_with_offset(0), recipe_with_offset(1)]);
        assert!(validate_recipes(&table).is_err());
    }

    #[test]
    fn validates_visibility_tables_with_no_un_ignore_file_loaded() {
        let visibility = ParameterVisibilityCache::new();
        assert!(validate_visibility(&visibility).is_ok());
    }

    #[tokio::test]
    async fn anonymizer_reuses_the_same_synthetic_address_for_a_device() {
        let anonymizer = AddressAnonymizer::new();
        let a = anonymizer.anonymize(&Address::new("VCU2128127")).await;
        let b = anonymizer.anonymize(&Address::parse_channel("VCU2128127:4").unwrap()).await;
        assert_eq!(a.as_str(), b.device_address().as_str());
    }
}
