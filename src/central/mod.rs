//! `Central`, the per-backend orchestrator (spec §4.6), grounded on
//! `original_source/hahomematic/central_unit.py::CentralUnit`.
//!
//! Central owns every map a `Device`/`Entity` only holds keys into (spec
//! §9 "Model as arena+indices"): `devices`, the [`dispatch::SubscriptionMap`],
//! the persistent/dynamic/visibility caches, and the [`hub::Hub`]. Nothing
//! below this module holds an owning pointer back up to it.

pub mod checker;
pub mod client;
pub mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::address::Address;
use crate::caches::{
    CentralDataCache, DeviceDescriptionCache, DeviceDetailsCache, ParameterVisibilityCache,
    ParamsetDescriptionCache,
};
use crate::config::{CentralConfig, InterfaceConfig};
use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventPayload, HomematicEvent, InterfaceEventType};
use crate::export::{self, AddressAnonymizer};
use crate::hub::Hub;
use crate::looper::Looper;
use crate::model::custom::RecipeTable;
use crate::model::device::{Device, DeviceDescription};
use crate::model::entity::{classify_event_parameter, Entity, EventEntity, EventKind, GenericEntity};
use crate::model::parameter::ParamsetKey;
use crate::transport::callback_server::{decode_pong, CallbackSink, DeviceEvent};
use crate::transport::{JsonRpcClient, XmlRpcProxy, XmlRpcProxyConfig};
use crate::value::convert_value;

use client::Client;
use dispatch::SubscriptionMap;

/// `CREATED → STARTING → STARTED ⇆ RECONNECTING → STOPPING → STOPPED`
/// (spec §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    Created,
    Starting,
    Started,
    Reconnecting,
    Stopping,
    Stopped,
}

/// The per-backend orchestrator (spec §2 "Central").
pub struct Central {
    pub config: CentralConfig,
    state: RwLock<LifecycleState>,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    pub devices: RwLock<HashMap<Address, Device>>,
    pub subscriptions: SubscriptionMap,
    pub hub: RwLock<Hub>,
    pub device_descriptions: DeviceDescriptionCache,
    pub paramset_descriptions: ParamsetDescriptionCache,
    pub device_details: DeviceDetailsCache,
    pub central_data: CentralDataCache,
    pub visibility: ParameterVisibilityCache,
    pub recipes: RecipeTable,
    /// KEYPRESS/IMPULSE/DEVICE_ERROR/INTERFACE records forwarded to the
    /// host (spec §6), separate from the per-parameter dispatch above.
    pub events: EventBus,
    anonymizer: AddressAnonymizer,
    looper: Looper,
    checker_active: Arc<AtomicBool>,
}

impl Central {
    pub fn new(config: CentralConfig, visibility: ParameterVisibilityCache, recipes: RecipeTable) -> Result<Self> {
        let device_descriptions = DeviceDescriptionCache::new(&config.storage_folder, &config.name);
        let paramset_descriptions = ParamsetDescriptionCache::new(&config.storage_folder, &config.name);
        Ok(Self {
            config,
            state: RwLock::new(LifecycleState::Created),
            clients: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            subscriptions: SubscriptionMap::new(),
            hub: RwLock::new(Hub::new()),
            device_descriptions,
            paramset_descriptions,
            device_details: DeviceDetailsCache::new(),
            central_data: CentralDataCache::new(),
            visibility,
            recipes,
            events: EventBus::new(),
            anonymizer: AddressAnonymizer::new(),
            looper: Looper::current(),
            checker_active: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn lifecycle_state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// `central.available` (spec §3 invariant): every client available,
    /// connected, and callback-alive.
    pub async fn available(&self) -> bool {
        let clients = self.clients.read().await;
        !clients.is_empty()
            && clients.values().all(|c| c.available() && c.is_connected() && c.is_callback_alive())
    }

    fn callback_url(&self, config: &InterfaceConfig) -> String {
        let host = self
            .config
            .callback_host
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_owned());
        let port = self.config.callback_port.unwrap_or(self.config.default_callback_port);
        let _ = config;
        format!("http://{host}:{port}")
    }

    /// The start sequence (spec §4.6 steps 1-7). Step 1 (resolving the
    /// callback IP via UDP connect-to-host probing) and step 2 (binding the
    /// callback server) are the host's responsibility — they own the
    /// listener's lifetime since it may be shared across several
    /// `Central`s (spec §4.3) — so `start` here begins at step 3.
    #[instrument(skip(self), fields(central = %self.config.name))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        export::validate_tables(&self.visibility, &self.recipes)?;

        *self.state.write().await = LifecycleState::Starting;

        // Step 3: load persistent caches; a parse failure clears them
        // rather than failing startup (spec §4.6).
        if self.device_descriptions.load().await.is_err() {
            warn!("device description cache failed to load, starting empty");
        }
        if self.paramset_descriptions.load().await.is_err() {
            warn!("paramset description cache failed to load, starting empty");
        }

        // Steps 4-5: construct and init a Client per configured interface.
        for interface_config in self.config.interface_configs.clone() {
            if let Err(err) = self.start_interface(&interface_config).await {
                warn!(interface = %interface_config.interface, error = %err, "interface unavailable at startup");
            }
        }

        // Step 6: materialise any device addresses already on disk, and
        // any described-but-not-yet-materialised ones.
        self.rebuild_device_graph_from_cache().await;

        // Step 7: start the connection checker.
        self.checker_active.store(true, Ordering::SeqCst);
        let host: Arc<dyn checker::CheckerHost> = self.clone();
        self.looper
            .spawn("connection-checker", async move {
                checker::run(host).await;
            })
            .await;

        *self.state.write().await = LifecycleState::Started;
        info!("central started");
        Ok(())
    }

    async fn start_interface(&self, interface_config: &InterfaceConfig) -> Result<()> {
        let proxy_config = XmlRpcProxyConfig {
            host: self.config.host.clone(),
            port: interface_config.port,
            remote_path: interface_config.remote_path.clone(),
            tls: self.config.tls,
            verify_tls: self.config.verify_tls,
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            max_workers: self.config.max_read_workers,
            request_timeout: std::time::Duration::from_secs(10),
        };
        let proxy = XmlRpcProxy::new(proxy_config)?;
        proxy.refresh_supported_methods(&interface_config.interface).await?;

        let json_rpc = Arc::new(JsonRpcClient::new(
            format!("http://{}:{}", self.config.host, self.config.json_port),
            self.config.username.clone(),
            self.config.password.clone(),
            self.config.verify_tls,
            std::time::Duration::from_secs(30),
        )?);
        let connection_state = Arc::new(ConnectionState::new());

        let client = Arc::new(Client::new(
            interface_config.interface.clone(),
            proxy,
            json_rpc,
            connection_state,
        ));

        let callback_url = self.callback_url(interface_config);
        client.init(&callback_url).await?;

        self.clients.write().await.insert(interface_config.interface.clone(), client);
        Ok(())
    }

    /// Rebuilds every `Device`/`Entity` from whatever is currently in the
    /// persistent caches (cold start, spec §8 "Cold start": entities are
    /// fully navigable with `available=false` until the first reconnect).
    ///
    /// Walks every *configured* interface, not just the ones that managed
    /// to connect during this `start()` — the caches are populated from
    /// whatever was last seen on disk regardless of whether the interface
    /// is reachable right now, which is the whole point of the cold-start
    /// guarantee.
    async fn rebuild_device_graph_from_cache(&self) {
        let interface_ids: Vec<String> =
            self.config.interface_configs.iter().map(|ic| ic.interface.clone()).collect();
        for interface_id in interface_ids {
            let addresses = self.device_descriptions.get_addresses(&interface_id).await;
            for device_address in addresses {
                if let Some(description) =
                    self.device_descriptions.get_device_description(&interface_id, &device_address).await
                {
                    if !description.is_channel() {
                        self.materialize_device(&interface_id, &description).await;
                    }
                }
            }
        }
        for (_, device) in self.devices.write().await.iter_mut() {
            device.set_un_reach(true);
        }
    }

    /// Device/Entity construction pipeline (spec §4.7 steps 1-5).
    async fn materialize_device(&self, interface_id: &str, channel0: &DeviceDescription) {
        let mut device = Device::new(interface_id, channel0);

        let channel_addresses: Vec<Address> = device.channel_addresses.iter().cloned().collect();
        for channel_address in &channel_addresses {
            let paramset_keys =
                self.paramset_descriptions.get_paramset_keys(interface_id, channel_address).await;
            for paramset_key in paramset_keys {
                if !self.visibility.is_relevant_paramset(&device.model, paramset_key, channel_address.channel_no().unwrap_or(0)) {
                    continue;
                }
                self.materialize_channel_paramset(
                    &mut device,
                    interface_id,
                    channel_address,
                    paramset_key,
                )
                .await;
            }
        }

        for entity in crate::model::custom::build_custom_entities(&self.config.name, &device, &self.recipes) {
            if let Entity::Custom(custom) = &entity {
                let key = (custom.device_address.clone(), ParamsetKey::Values, custom.recipe_name.clone());
                device.entities.insert(key, entity);
            }
        }

        self.devices.write().await.insert(device.address.clone(), device);
    }

    async fn materialize_channel_paramset(
        &self,
        device: &mut Device,
        interface_id: &str,
        channel_address: &Address,
        paramset_key: ParamsetKey,
    ) {
        let channel_no = channel_address.channel_no().unwrap_or(0);
        let parameters = self
            .paramset_descriptions
            .get_channel_paramset_descriptions(interface_id, channel_address, paramset_key)
            .await;

        for (parameter, parameter_data) in parameters {
            if self.visibility.ignore_parameter(&device.model, channel_no, paramset_key, &parameter) {
                continue;
            }
            if let Some(event_kind) = classify_event_parameter(&parameter) {
                let entity = EventEntity::new(
                    &self.config.name,
                    channel_address.clone(),
                    parameter.clone(),
                    event_kind,
                    parameter_data,
                );
                device.insert_entity(channel_address.clone(), paramset_key, parameter, Entity::Event(entity));
                continue;
            }

            let default_visible =
                !self.visibility.parameter_is_hidden(&device.model, channel_no, paramset_key, &parameter);
            let entity = GenericEntity::new(
                &self.config.name,
                channel_address.clone(),
                paramset_key,
                parameter.clone(),
                parameter_data,
                default_visible,
            );
            device.insert_entity(channel_address.clone(), paramset_key, parameter, Entity::Generic(entity));
        }
    }

    /// Applies an incoming backend event to the matching entity and fans it
    /// out to subscribers (spec §4.6 "Event dispatch fan-out").
    #[instrument(skip(self, value))]
    pub async fn handle_event(&self, interface_id: &str, channel_address: Address, parameter: String, value: serde_json::Value) {
        if let Some(client) = self.clients.read().await.get(interface_id) {
            client.note_event_received();
        }

        let device_address = channel_address.device_address();
        let mut devices = self.devices.write().await;
        let Some(device) = devices.get_mut(&device_address) else {
            debug!(%device_address, "event for unknown device dropped");
            return;
        };

        if parameter == "UN_REACH" {
            device.set_un_reach(value.as_bool().unwrap_or(false));
        }

        let key = (channel_address.clone(), ParamsetKey::Values, parameter.clone());
        match device.entities.get_mut(&key) {
            Some(Entity::Generic(entity)) => {
                if let Ok(converted) = convert_value(
                    &value,
                    entity.parameter_data.parameter_type,
                    entity.parameter_data.value_list.as_deref(),
                ) {
                    entity.apply_event(converted.clone());
                    drop(devices);
                    self.subscriptions.dispatch(&channel_address, &parameter, converted).await;
                }
            }
            Some(Entity::Event(entity)) => {
                let kind = entity.kind;
                let device_type = device.model.clone();
                entity.fire();
                let converted = convert_value(
                    &value,
                    entity.parameter_data.parameter_type,
                    entity.parameter_data.value_list.as_deref(),
                )
                .ok();
                drop(devices);

                let payload = EventPayload {
                    address: channel_address.clone(),
                    channel_no: channel_address.channel_no().unwrap_or(0),
                    device_type,
                    interface_id: interface_id.to_owned(),
                    parameter,
                    value: converted,
                };
                let event = match kind {
                    EventKind::Click => HomematicEvent::Keypress(payload),
                    EventKind::Impulse => HomematicEvent::Impulse(payload),
                    EventKind::DeviceError => HomematicEvent::DeviceError(payload),
                };
                self.events.emit(event).await;
            }
            _ => {}
        }
    }

    /// Fetches and diffs system variables against the current hub state
    /// (spec §4.8).
    pub async fn fetch_sysvar_data(&self, fetched: Vec<crate::hub::SystemVariableData>) -> crate::hub::HubRefresh {
        self.hub.write().await.update_sysvars(&self.config.name, fetched)
    }

    /// Fetches and diffs programs against the current hub state (spec
    /// §4.8).
    pub async fn fetch_program_data(&self, fetched: Vec<crate::hub::ProgramData>) -> crate::hub::HubRefresh {
        self.hub.write().await.update_programs(&self.config.name, fetched)
    }

    /// Fire-and-forget `Program.execute` (spec §4.8).
    pub async fn execute_program(&self, json_rpc: &JsonRpcClient, pid: &str) -> Result<()> {
        json_rpc.post("Program.execute", serde_json::json!({"id": pid})).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(central = %self.config.name))]
    pub async fn stop(&self) -> Result<()> {
        *self.state.write().await = LifecycleState::Stopping;
        self.checker_active.store(false, Ordering::SeqCst);

        let clients = self.clients.read().await;
        for client in clients.values() {
            let callback_url = format!(
                "http://{}:{}",
                self.config.callback_host.clone().unwrap_or_else(|| "127.0.0.1".into()),
                self.config.callback_port.unwrap_or(self.config.default_callback_port)
            );
            if let Err(err) = client.de_init(&callback_url).await {
                warn!(interface_id = %client.interface_id, error = %err, "de-init failed during stop");
            }
        }
        drop(clients);

        self.device_descriptions.save().await.ok();
        self.paramset_descriptions.save().await.ok();

        self.looper.block_till_done(std::time::Duration::from_secs(10)).await;
        *self.state.write().await = LifecycleState::Stopped;
        Ok(())
    }

    pub async fn restart_clients(&self) {
        let configs = self.config.interface_configs.clone();
        for interface_config in configs {
            if !self.clients.read().await.contains_key(&interface_config.interface) {
                if let Err(err) = self.start_interface(&interface_config).await {
                    warn!(interface = %interface_config.interface, error = %err, "restart_clients failed");
                }
            }
        }
    }

    /// Writes an anonymized device definition for `device_address` to the
    /// export directories under `config.storage_folder` (spec §4.9).
    pub async fn export_device(&self, interface_id: &str, device_address: &Address) -> Result<()> {
        export::export_devices(self, &self.anonymizer, interface_id, device_address).await
    }
}

#[async_trait::async_trait]
impl checker::CheckerHost for Central {
    fn clients(&self) -> Vec<Arc<Client>> {
        self.clients.try_read().map(|g| g.values().cloned().collect()).unwrap_or_default()
    }

    async fn restart_clients(&self) {
        Central::restart_clients(self).await
    }

    fn callback_url(&self, _interface_id: &str) -> String {
        format!(
            "http://{}:{}",
            self.config.callback_host.clone().unwrap_or_else(|| "127.0.0.1".into()),
            self.config.callback_port.unwrap_or(self.config.default_callback_port)
        )
    }

    async fn refresh_entity_data(&self) {
        self.central_data.clear().await;
    }

    fn is_active(&self) -> bool {
        self.checker_active.load(Ordering::SeqCst)
    }

    /// Marks every device on `interface_id` force-unavailable after three
    /// consecutive reconnect failures, clearing it again once a reconnect
    /// succeeds (spec §4.6, §4.7).
    async fn set_interface_force_unavailable(&self, interface_id: &str, force_unavailable: bool) {
        let mut devices = self.devices.write().await;
        for device in devices.values_mut().filter(|d| d.interface_id == interface_id) {
            device.set_force_unavailable(force_unavailable);
        }
        drop(devices);
        self.events
            .emit(HomematicEvent::Interface {
                interface_id: interface_id.to_owned(),
                interface_event_type: InterfaceEventType::Proxy,
                data: serde_json::json!({"available": !force_unavailable}),
            })
            .await;
    }

    async fn on_callback_alive_transition(&self, interface_id: &str, alive: bool) {
        self.events
            .emit(HomematicEvent::Interface {
                interface_id: interface_id.to_owned(),
                interface_event_type: InterfaceEventType::Callback,
                data: serde_json::json!({"alive": alive}),
            })
            .await;
    }

    async fn on_pingpong_mismatch(
        &self,
        interface_id: &str,
        pending_pong_events: u64,
        unknown_pong_events: u64,
        mismatch_count: u64,
    ) {
        self.events
            .emit(HomematicEvent::Interface {
                interface_id: interface_id.to_owned(),
                interface_event_type: InterfaceEventType::Pingpong,
                data: serde_json::json!({
                    "pending_pong_events": pending_pong_events,
                    "unknown_pong_events": unknown_pong_events,
                    "mismatch_count": mismatch_count,
                }),
            })
            .await;
    }
}

/// Adapts `Central` to [`CallbackSink`] so the embedded callback server can
/// route directly into it (spec §4.3).
#[async_trait::async_trait]
impl CallbackSink for Central {
    async fn on_event(&self, event: DeviceEvent) {
        self.handle_event(&event.interface_id, event.channel_address, event.parameter, event.value).await;
    }

    async fn on_new_devices(&self, interface_id: &str, descriptions: Vec<serde_json::Value>) {
        let _guard = self.subscriptions.new_devices_lock().await;
        for raw in descriptions {
            let Ok(description) = serde_json::from_value::<DeviceDescription>(raw) else { continue };
            self.device_descriptions.add(interface_id, description.clone()).await;
            if !description.is_channel() {
                self.materialize_device(interface_id, &description).await;
            }
        }
    }

    async fn on_delete_devices(&self, interface_id: &str, addresses: Vec<Address>) {
        self.device_descriptions.remove(interface_id, &addresses).await;
        let mut devices = self.devices.write().await;
        for address in &addresses {
            devices.remove(address);
        }
    }

    async fn on_list_devices(&self, interface_id: &str) -> Vec<serde_json::Value> {
        let addresses = self.device_descriptions.get_addresses(interface_id).await;
        let mut out = Vec::with_capacity(addresses.len());
        for address in addresses {
            if let Some(desc) = self.device_descriptions.get_device_description(interface_id, &address).await {
                if let Ok(value) = serde_json::to_value(&desc) {
                    out.push(value);
                }
            }
        }
        out
    }

    async fn on_topology_hint(&self, interface_id: &str, method: &str) {
        debug!(interface_id, method, "topology hint received");
    }

    async fn on_error(&self, interface_id: &str, code: i32, message: &str) {
        warn!(interface_id, code, message, "backend reported an error");
    }

    /// Routes a `PONG` event into the owning client's ping-pong cache,
    /// discarding it if the embedded interface-id doesn't match the
    /// caller's (spec §6).
    async fn on_pong(&self, interface_id: &str, value: &str) {
        let Some(client) = self.clients.read().await.get(interface_id).cloned() else {
            return;
        };
        client.note_event_received();

        let Some((echoed_interface_id, ts)) = decode_pong(value) else {
            return;
        };
        if echoed_interface_id != interface_id {
            return;
        }
        client.handle_received_pong(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CentralConfigBuilder;

    fn test_config() -> CentralConfig {
        CentralConfigBuilder::new()
            .name("ccu-test")
            .host("127.0.0.1")
            .credentials("admin", "secret")
            .storage_folder(std::env::temp_dir().join(format!("hmcore-central-test-{}", std::process::id())))
            .add_interface(InterfaceConfig { interface: "HmIP-RF".into(), port: 2010, remote_path: "/".into() })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn new_central_starts_in_created_state() {
        let central = Central::new(test_config(), ParameterVisibilityCache::new(), RecipeTable::default()).unwrap();
        assert_eq!(central.lifecycle_state().await, LifecycleState::Created);
    }

    #[tokio::test]
    async fn central_is_unavailable_with_no_clients() {
        let central = Central::new(test_config(), ParameterVisibilityCache::new(), RecipeTable::default()).unwrap();
        assert!(!central.available().await);
    }
}
