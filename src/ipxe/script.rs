//! Boot script composer.
//!
//! Renders the iPXE script that loads the in-memory installer environment,
//! honoring per-record overrides.

use macaddr::MacAddr6;
use minijinja::{context, Environment};
use url::Url;

use crate::domain::BootRecord;
use crate::error::ScriptError;
use crate::urls::format_mac;

const TEMPLATE_NAME: &str = "auto.ipxe";
const TEMPLATE: &str = include_str!("auto.ipxe.j2");

/// iPXE expands this to the booting NIC's address at runtime.
const RUNTIME_MAC: &str = "${net0/mac}";

const DEFAULT_KERNEL: &str = "vmlinuz-${arch}";
const DEFAULT_INITRD: &str = "initramfs-${arch}";
const DEFAULT_FACILITY: &str = "onprem";

/// Console arguments when the record does not set one.
pub fn default_console(arm64: bool) -> &'static str {
    if arm64 {
        "console=ttyAMA0"
    } else {
        "console=tty0 console=ttyS0,115200"
    }
}

/// Server-wide script settings.
#[derive(Debug, Clone, Default)]
pub struct ScriptSettings {
    /// Installer environment base URL.
    pub osie_url: Option<String>,
    /// Control-plane address (`host:port`).
    pub tink_server: Option<String>,
    pub tls: bool,
    pub insecure_tls: bool,
    pub extra_kernel_args: Vec<String>,
    pub syslog_host: String,
    pub retries: u32,
    pub retry_delay: u32,
    /// Render scripts that read the hardware address from iPXE itself.
    pub static_mode: bool,
    /// Pass the record's addressing to the installer as `ipam=`.
    pub static_ipam: bool,
}

/// Values the template is rendered with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptContext {
    pub hw_addr: String,
    pub osie_url: Option<String>,
    pub kernel: String,
    pub initrd: String,
    pub extra_kernel_args: Vec<String>,
    pub tink_server: Option<String>,
    pub tls: bool,
    pub insecure_tls: bool,
    pub retries: u32,
    pub retry_delay: u32,
    pub syslog_host: String,
    pub vlan_id: Option<String>,
    pub ipam: Option<String>,
    pub arch: Option<String>,
    pub console: String,
    pub facility: String,
}

#[derive(Debug)]
pub struct ScriptComposer {
    settings: ScriptSettings,
    env: Environment<'static>,
}

impl ScriptComposer {
    pub fn new(settings: ScriptSettings) -> Result<Self, ScriptError> {
        let mut env = Environment::new();
        env.add_template(TEMPLATE_NAME, TEMPLATE)?;
        Ok(Self { settings, env })
    }

    pub fn is_static(&self) -> bool {
        self.settings.static_mode
    }

    /// Build the render context for a client. In static mode the hardware
    /// address comes from iPXE at boot time.
    pub fn context(&self, mac: Option<&MacAddr6>, record: Option<&BootRecord>) -> ScriptContext {
        let s = &self.settings;
        let hw_addr = match (s.static_mode, mac) {
            (false, Some(mac)) => format_mac(mac),
            _ => RUNTIME_MAC.to_string(),
        };

        let mut ctx = ScriptContext {
            hw_addr,
            osie_url: s.osie_url.clone(),
            kernel: DEFAULT_KERNEL.to_string(),
            initrd: DEFAULT_INITRD.to_string(),
            extra_kernel_args: s.extra_kernel_args.clone(),
            tink_server: s.tink_server.clone(),
            tls: s.tls,
            insecure_tls: s.insecure_tls,
            retries: s.retries,
            retry_delay: s.retry_delay,
            syslog_host: s.syslog_host.clone(),
            console: default_console(false).to_string(),
            facility: DEFAULT_FACILITY.to_string(),
            ..Default::default()
        };

        let Some(record) = record else {
            return ctx;
        };

        let netboot = &record.netboot;
        if let Some(base) = netboot.osie.base_url.as_ref().filter(|u| !u.is_empty()) {
            ctx.osie_url = Some(base.clone());
        }
        if let Some(kernel) = netboot.osie.kernel.as_ref().filter(|k| !k.is_empty()) {
            ctx.kernel = kernel.clone();
        }
        if let Some(initrd) = netboot.osie.initrd.as_ref().filter(|i| !i.is_empty()) {
            ctx.initrd = initrd.clone();
        }
        ctx.extra_kernel_args.extend(netboot.extra_kernel_args.iter().cloned());
        if let Some(facility) = netboot.facility.as_ref().filter(|f| !f.is_empty()) {
            ctx.facility = facility.clone();
        }
        ctx.console = match netboot.console.as_deref().filter(|c| !c.is_empty()) {
            Some(console) => format!("console={console}"),
            None => default_console(record.is_arm64()).to_string(),
        };
        ctx.vlan_id = record.dhcp.vlan_id.clone().filter(|v| !v.is_empty());
        ctx.arch = record.dhcp.arch.clone().filter(|a| !a.is_empty());
        if let (true, Some(mac)) = (s.static_ipam, mac) {
            ctx.ipam = Some(record.ipam_param(mac));
        }
        ctx
    }

    /// Render the script body.
    pub fn render(&self, ctx: &ScriptContext) -> Result<String, ScriptError> {
        let osie_url = ctx
            .osie_url
            .as_deref()
            .ok_or_else(|| ScriptError::Config("installer environment URL is not set".into()))?;
        let base = Url::parse(osie_url).map_err(|e| {
            ScriptError::Config(format!("invalid installer environment URL '{osie_url}': {e}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ScriptError::Config(format!(
                "installer environment URL must be http or https: '{osie_url}'"
            )));
        }
        let tink_server = ctx
            .tink_server
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ScriptError::Config("control-plane address is not set".into()))?;

        let tmpl = self.env.get_template(TEMPLATE_NAME)?;
        let script = tmpl.render(context! {
            arch => ctx.arch,
            base_url => osie_url.trim_end_matches('/'),
            retries => ctx.retries,
            retry_delay => ctx.retry_delay,
            worker_id => ctx.hw_addr,
            hw_addr => ctx.hw_addr,
            grpc_authority => tink_server,
            syslog_host => ctx.syslog_host,
            // Jinja would print booleans as `True`/`False`.
            tls => ctx.tls.to_string(),
            insecure_tls => ctx.insecure_tls.to_string(),
            kernel => ctx.kernel,
            initrd => ctx.initrd,
            vlan_id => ctx.vlan_id,
            extra_kernel_args => ctx.extra_kernel_args,
            facility => ctx.facility,
            ipam => ctx.ipam,
            console => ctx.console,
        })?;

        Ok(script)
    }

    /// Script for a client, applying record overrides: an inline script is
    /// returned as is, a script URL becomes a chain script.
    pub fn compose(
        &self,
        mac: Option<&MacAddr6>,
        record: Option<&BootRecord>,
    ) -> Result<String, ScriptError> {
        if let Some(record) = record {
            if let Some(script) = record.netboot.ipxe_script.as_ref().filter(|s| !s.is_empty()) {
                return Ok(script.clone());
            }
            if let Some(url) = record.netboot.ipxe_script_url.as_ref().filter(|u| !u.is_empty()) {
                return Ok(chain_script(url));
            }
        }
        self.render(&self.context(mac, record))
    }
}

pub fn chain_script(url: &str) -> String {
    format!("#!ipxe\n\nchain --autofree {url}\n")
}
