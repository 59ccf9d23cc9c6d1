//! Kernel command line written into the installer image.

use macaddr::MacAddr6;

use crate::domain::BootRecord;
use crate::ipxe::script::default_console;
use crate::urls::format_mac;

/// Settings shared by every patched image response.
#[derive(Debug, Clone, Default)]
pub struct PayloadSettings {
    pub extra_kernel_args: Vec<String>,
    pub syslog_host: String,
    pub tink_server: String,
    pub tls: bool,
    pub insecure_tls: bool,
    pub static_ipam: bool,
}

impl PayloadSettings {
    /// Space separated kernel arguments for one client.
    pub fn build(&self, mac: &MacAddr6, record: &BootRecord) -> String {
        let hw_addr = format_mac(mac);
        let mut args: Vec<String> = self.extra_kernel_args.clone();
        args.extend(record.netboot.extra_kernel_args.iter().cloned());

        match record.netboot.console.as_deref().filter(|c| !c.is_empty()) {
            Some(console) => args.push(format!("console={console}")),
            None => args.push(default_console(record.is_arm64()).to_string()),
        }
        if let Some(vlan) = record.dhcp.vlan_id.as_deref().filter(|v| !v.is_empty()) {
            args.push(format!("vlan_id={vlan}"));
        }
        args.push(format!("hw_addr={hw_addr}"));
        args.push(format!("syslog_host={}", self.syslog_host));
        args.push(format!("grpc_authority={}", self.tink_server));
        args.push(format!("tinkerbell_tls={}", self.tls));
        args.push(format!("tinkerbell_insecure_tls={}", self.insecure_tls));
        args.push(format!("worker_id={hw_addr}"));
        if self.static_ipam {
            args.push(format!("ipam={}", record.ipam_param(mac)));
        }

        args.join(" ")
    }
}
