//! Per-client boot records as resolved from a record store.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;
use serde::Deserialize;

/// Default lease handed out in reservation mode when the record sets none.
pub const DEFAULT_LEASE_TIME: u32 = 86_400;

/// Everything a store knows about one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootRecord {
    #[serde(flatten)]
    pub dhcp: DhcpRecord,
    #[serde(default)]
    pub netboot: NetbootRecord,
}

/// Lease related fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DhcpRecord {
    pub ip_address: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub default_gateway: Option<Ipv4Addr>,
    pub name_servers: Vec<Ipv4Addr>,
    pub hostname: Option<String>,
    pub domain_name: Option<String>,
    pub broadcast_address: Option<Ipv4Addr>,
    pub ntp_servers: Vec<Ipv4Addr>,
    pub lease_time: Option<u32>,
    pub domain_search: Vec<String>,
    pub vlan_id: Option<String>,
    /// Architecture hint such as `x86_64` or `aarch64`.
    pub arch: Option<String>,
}

/// Netboot related fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetbootRecord {
    #[serde(alias = "allowPxe")]
    pub allow_netboot: bool,
    pub ipxe_script_url: Option<String>,
    pub ipxe_script: Option<String>,
    pub osie: OsieRecord,
    pub extra_kernel_args: Vec<String>,
    pub console: Option<String>,
    pub facility: Option<String>,
}

/// Installer environment location overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OsieRecord {
    pub base_url: Option<String>,
    pub kernel: Option<String>,
    pub initrd: Option<String>,
}

impl BootRecord {
    /// The record the no-op store hands out: boot-enabled and otherwise empty.
    pub fn netboot_only() -> Self {
        Self {
            netboot: NetbootRecord {
                allow_netboot: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn allows_netboot(&self) -> bool {
        self.netboot.allow_netboot
    }

    pub fn is_arm64(&self) -> bool {
        matches!(self.dhcp.arch.as_deref(), Some("aarch64" | "arm64"))
    }

    pub fn lease_time(&self) -> u32 {
        self.dhcp.lease_time.unwrap_or(DEFAULT_LEASE_TIME)
    }

    /// Static addressing for the installer environment, as the `ipam=` kernel
    /// argument value:
    /// `mac:vlan:ip:netmask:gateway:hostname:dns,..:search,..:ntp,..`
    /// with the hardware address dash separated.
    pub fn ipam_param(&self, mac: &MacAddr6) -> String {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(T::to_string).unwrap_or_default()
        }
        fn join<T: ToString>(values: &[T]) -> String {
            values.iter().map(T::to_string).collect::<Vec<_>>().join(",")
        }

        let d = &self.dhcp;
        [
            crate::urls::format_mac(mac).replace(':', "-"),
            opt(&d.vlan_id),
            opt(&d.ip_address),
            opt(&d.subnet_mask),
            opt(&d.default_gateway),
            opt(&d.hostname),
            join(&d.name_servers),
            join(&d.domain_search),
            join(&d.ntp_servers),
        ]
        .join(":")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_record() {
        let yaml = r#"
ipAddress: 192.168.2.150
subnetMask: 255.255.255.0
defaultGateway: 192.168.2.1
nameServers: [1.1.1.1, 8.8.8.8]
hostname: node-1
domainName: example.internal
broadcastAddress: 192.168.2.255
ntpServers: [132.163.96.2]
leaseTime: 3600
domainSearch: [example.internal]
vlanId: "10"
arch: aarch64
netboot:
  allowPxe: true
  ipxeScriptUrl: http://boot.example/custom.ipxe
  osie:
    baseUrl: http://osie.example/hook
  extraKernelArgs: [quiet]
  console: ttyS1
"#;
        let record: BootRecord = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(record.dhcp.ip_address, Some(Ipv4Addr::new(192, 168, 2, 150)));
        assert_eq!(record.dhcp.name_servers.len(), 2);
        assert_eq!(record.dhcp.vlan_id.as_deref(), Some("10"));
        assert_eq!(record.lease_time(), 3600);
        assert!(record.allows_netboot());
        assert!(record.is_arm64());
        assert_eq!(
            record.netboot.osie.base_url.as_deref(),
            Some("http://osie.example/hook")
        );
        assert_eq!(record.netboot.extra_kernel_args, vec!["quiet"]);
    }

    #[test]
    fn test_deserialize_sparse_record_uses_defaults() {
        let record: BootRecord = serde_yaml::from_str("ipAddress: 10.0.0.2\n").unwrap();
        assert!(!record.allows_netboot());
        assert_eq!(record.lease_time(), DEFAULT_LEASE_TIME);
        assert!(record.dhcp.domain_search.is_empty());
        assert!(!record.is_arm64());
    }

    #[test]
    fn test_ipam_param() {
        let record = BootRecord {
            dhcp: DhcpRecord {
                ip_address: Some(Ipv4Addr::new(10, 0, 0, 5)),
                subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
                default_gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
                hostname: Some("n1".to_string()),
                name_servers: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)],
                vlan_id: Some("7".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mac = MacAddr6::new(0xde, 0xad, 0xbe, 0xef, 0x00, 0x01);
        assert_eq!(
            record.ipam_param(&mac),
            "de-ad-be-ef-00-01:7:10.0.0.5:255.255.255.0:10.0.0.1:n1:1.1.1.1,8.8.8.8::"
        );
    }

    #[test]
    fn test_netboot_only() {
        let record = BootRecord::netboot_only();
        assert!(record.allows_netboot());
        assert_eq!(record.dhcp, DhcpRecord::default());
    }
}
