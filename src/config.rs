//! `CentralConfig` / `InterfaceConfig` and a fluent, validating builder
//! (spec §6), in the shape of `ruma_client::ClientBuilder`.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// One configured XML-RPC interface (BidCos-RF, HmIP-RF, ...).
#[derive(Clone, Debug)]
pub struct InterfaceConfig {
    /// The interface name, e.g. `"HmIP-RF"`.
    pub interface: String,
    pub port: u16,
    pub remote_path: String,
}

/// Host-supplied configuration for a [`crate::central::Central`].
#[derive(Clone, Debug)]
pub struct CentralConfig {
    pub name: String,
    pub host: String,
    pub username: String,
    pub password: String,
    pub storage_folder: PathBuf,
    pub interface_configs: Vec<InterfaceConfig>,
    pub default_callback_port: u16,
    pub tls: bool,
    pub verify_tls: bool,
    pub callback_host: Option<String>,
    pub callback_port: Option<u16>,
    pub json_port: u16,
    pub listen_ip_addr: Option<String>,
    pub listen_port: u16,
    pub max_read_workers: usize,
    pub un_ignore_list: Vec<String>,
    pub program_scan_enabled: bool,
    pub include_internal_programs: bool,
    pub sysvar_scan_enabled: bool,
    pub include_internal_sysvars: bool,
    pub start_direct: bool,
}

/// Builds a [`CentralConfig`], validating the interface set and addresses
/// before handing back a config `Central::new` can trust.
pub struct CentralConfigBuilder {
    name: Option<String>,
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    storage_folder: Option<PathBuf>,
    interface_configs: Vec<InterfaceConfig>,
    default_callback_port: u16,
    tls: bool,
    verify_tls: bool,
    callback_host: Option<String>,
    callback_port: Option<u16>,
    json_port: u16,
    listen_ip_addr: Option<String>,
    listen_port: u16,
    max_read_workers: usize,
    un_ignore_list: Vec<String>,
    program_scan_enabled: bool,
    include_internal_programs: bool,
    sysvar_scan_enabled: bool,
    include_internal_sysvars: bool,
    start_direct: bool,
}

impl Default for CentralConfigBuilder {
    fn default() -> Self {
        Self {
            name: None,
            host: None,
            username: None,
            password: None,
            storage_folder: None,
            interface_configs: Vec::new(),
            default_callback_port: 9126,
            tls: false,
            verify_tls: true,
            callback_host: None,
            callback_port: None,
            json_port: 80,
            listen_ip_addr: None,
            listen_port: 9126,
            max_read_workers: 5,
            un_ignore_list: Vec::new(),
            program_scan_enabled: true,
            include_internal_programs: false,
            sysvar_scan_enabled: true,
            include_internal_sysvars: false,
            start_direct: false,
        }
    }
}

impl CentralConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn storage_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_folder = Some(path.into());
        self
    }

    pub fn add_interface(mut self, interface: InterfaceConfig) -> Self {
        self.interface_configs.push(interface);
        self
    }

    pub fn tls(mut self, tls: bool, verify_tls: bool) -> Self {
        self.tls = tls;
        self.verify_tls = verify_tls;
        self
    }

    pub fn callback(mut self, host: Option<String>, port: Option<u16>) -> Self {
        self.callback_host = host;
        self.callback_port = port;
        self
    }

    pub fn json_port(mut self, port: u16) -> Self {
        self.json_port = port;
        self
    }

    pub fn listen(mut self, ip_addr: Option<String>, port: u16) -> Self {
        self.listen_ip_addr = ip_addr;
        self.listen_port = port;
        self
    }

    pub fn max_read_workers(mut self, n: usize) -> Self {
        self.max_read_workers = n;
        self
    }

    pub fn un_ignore_list(mut self, lines: Vec<String>) -> Self {
        self.un_ignore_list = lines;
        self
    }

    pub fn hub_scan(
        mut self,
        program_scan_enabled: bool,
        include_internal_programs: bool,
        sysvar_scan_enabled: bool,
        include_internal_sysvars: bool,
    ) -> Self {
        self.program_scan_enabled = program_scan_enabled;
        self.include_internal_programs = include_internal_programs;
        self.sysvar_scan_enabled = sysvar_scan_enabled;
        self.include_internal_sysvars = include_internal_sysvars;
        self
    }

    pub fn start_direct(mut self, start_direct: bool) -> Self {
        self.start_direct = start_direct;
        self
    }

    /// Finishes building, validating required fields and the interface
    /// set. Mirrors `ruma_client::ClientBuilder::build`'s "required field
    /// missing" panic, but since this is library-level configuration
    /// supplied by the host (not a one-off script), we return
    /// [`Error::ConfigError`] rather than panicking.
    pub fn build(self) -> Result<CentralConfig> {
        let name = self.name.ok_or_else(|| Error::ConfigError("name is required".into()))?;
        let host = self.host.ok_or_else(|| Error::ConfigError("host is required".into()))?;
        let username =
            self.username.ok_or_else(|| Error::ConfigError("username is required".into()))?;
        let password =
            self.password.ok_or_else(|| Error::ConfigError("password is required".into()))?;

        if self.interface_configs.is_empty() {
            return Err(Error::ConfigError("at least one interface must be configured".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for ic in &self.interface_configs {
            if !seen.insert(ic.interface.clone()) {
                return Err(Error::ConfigError(format!(
                    "interface '{}' configured more than once",
                    ic.interface
                )));
            }
        }

        let storage_folder = self.storage_folder.unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("homematic-core")
        });

        Ok(CentralConfig {
            name,
            host,
            username,
            password,
            storage_folder,
            interface_configs: self.interface_configs,
            default_callback_port: self.default_callback_port,
            tls: self.tls,
            verify_tls: self.verify_tls,
            callback_host: self.callback_host,
            callback_port: self.callback_port,
            json_port: self.json_port,
            listen_ip_addr: self.listen_ip_addr,
            listen_port: self.listen_port,
            max_read_workers: self.max_read_workers,
            un_ignore_list: self.un_ignore_list,
            program_scan_enabled: self.program_scan_enabled,
            include_internal_programs: self.include_internal_programs,
            sysvar_scan_enabled: self.sysvar_scan_enabled,
            include_internal_sysvars: self.include_internal_sysvars,
            start_direct: self.start_direct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str) -> InterfaceConfig {
        InterfaceConfig { interface: name.to_owned(), port: 2010, remote_path: String::new() }
    }

    #[test]
    fn rejects_duplicate_interfaces() {
        let result = CentralConfigBuilder::new()
            .name("ccu")
            .host("ccu.local")
            .credentials("admin", "secret")
            .add_interface(iface("HmIP-RF"))
            .add_interface(iface("HmIP-RF"))
            .build();
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn rejects_no_interfaces() {
        let result = CentralConfigBuilder::new()
            .name("ccu")
            .host("ccu.local")
            .credentials("admin", "secret")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builds_with_minimal_fields() {
        let cfg = CentralConfigBuilder::new()
            .name("ccu")
            .host("ccu.local")
            .credentials("admin", "secret")
            .add_interface(iface("HmIP-RF"))
            .build()
            .unwrap();
        assert_eq!(cfg.name, "ccu");
        assert_eq!(cfg.interface_configs.len(), 1);
    }
}
