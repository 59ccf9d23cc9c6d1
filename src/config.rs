//! Command line and environment configuration.
//!
//! Every flag can also be set through a `NETBOOTD_*` environment variable.
//! [`Config::from_args`] validates the raw flags into the settings each
//! listener is built from; all errors surface here, before anything binds.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use ipnetwork::IpNetwork;
use url::Url;

use crate::dhcp::NetbootConfig;
use crate::domain::DEFAULT_CUSTOM_USER_CLASS;
use crate::error::ConfigError;
use crate::ipxe::{BinaryPatch, ScriptSettings, EMBEDDED_SCRIPT_MARKER};
use crate::iso::{Marker, PayloadSettings, DEFAULT_MARKER};
use crate::net::detect_local_ipv4;
use crate::tftp::TftpSettings;
use crate::urls::{build_url, ScriptUrl};

/// How DHCP requests are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperatingMode {
    /// Full DHCP: hand out the address stored in the client's record.
    Reservation,
    /// ProxyDHCP: boot options only, for clients with a record.
    Proxy,
    /// ProxyDHCP for every netboot client, without consulting a store.
    AutoProxy,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatingMode::Reservation => "reservation",
            OperatingMode::Proxy => "proxy",
            OperatingMode::AutoProxy => "auto-proxy",
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "netbootd")]
#[command(version, about = "Network boot control plane: DHCP, TFTP, iPXE scripts and installer images")]
pub struct Args {
    /// DHCP operating mode
    #[arg(long, env = "NETBOOTD_DHCP_MODE", value_enum, default_value_t = OperatingMode::Reservation)]
    pub dhcp_mode: OperatingMode,

    #[arg(long, env = "NETBOOTD_DHCP_ENABLED", default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub dhcp_enabled: bool,

    /// DHCP listen address
    #[arg(long, env = "NETBOOTD_DHCP_ADDR", default_value = "0.0.0.0:67")]
    pub dhcp_addr: SocketAddrV4,

    /// Interface the UDP listeners (DHCP, TFTP, syslog) are bound to
    #[arg(long, env = "NETBOOTD_DHCP_IFACE")]
    pub dhcp_iface: Option<String>,

    /// Server address written into DHCP replies (option 54); detected when unset
    #[arg(long, env = "NETBOOTD_DHCP_IP_FOR_PACKET")]
    pub dhcp_ip_for_packet: Option<Ipv4Addr>,

    /// Syslog server handed to clients (option 7); defaults to this host
    #[arg(long, env = "NETBOOTD_DHCP_SYSLOG_IP")]
    pub dhcp_syslog_ip: Option<Ipv4Addr>,

    /// TFTP server handed to clients; defaults to this host
    #[arg(long, env = "NETBOOTD_DHCP_TFTP_IP")]
    pub dhcp_tftp_ip: Option<Ipv4Addr>,

    #[arg(long, env = "NETBOOTD_DHCP_TFTP_PORT", default_value_t = 69)]
    pub dhcp_tftp_port: u16,

    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_BINARY_SCHEME", default_value = "http")]
    pub dhcp_http_ipxe_binary_scheme: String,

    /// Host of the iPXE binary URL; defaults to this host
    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_BINARY_HOST")]
    pub dhcp_http_ipxe_binary_host: Option<String>,

    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_BINARY_PORT", default_value_t = 7171)]
    pub dhcp_http_ipxe_binary_port: u16,

    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_BINARY_PATH", default_value = "/ipxe/")]
    pub dhcp_http_ipxe_binary_path: String,

    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_SCRIPT_SCHEME", default_value = "http")]
    pub dhcp_http_ipxe_script_scheme: String,

    /// Host of the boot script URL; defaults to this host
    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_SCRIPT_HOST")]
    pub dhcp_http_ipxe_script_host: Option<String>,

    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_SCRIPT_PORT", default_value_t = 7171)]
    pub dhcp_http_ipxe_script_port: u16,

    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_SCRIPT_PATH", default_value = "/auto.ipxe")]
    pub dhcp_http_ipxe_script_path: String,

    /// Full boot script URL; overrides the scheme, host, port and path flags
    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_SCRIPT_URL")]
    pub dhcp_http_ipxe_script_url: Option<String>,

    /// Insert the client's hardware address into the boot script URL
    #[arg(long, env = "NETBOOTD_DHCP_HTTP_IPXE_SCRIPT_PREPEND_MAC", default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub dhcp_http_ipxe_script_prepend_mac: bool,

    /// User class sent by iPXE builds that should be handed the script URL
    #[arg(long, env = "NETBOOTD_DHCP_CUSTOM_USER_CLASS", default_value = DEFAULT_CUSTOM_USER_CLASS)]
    pub dhcp_custom_user_class: String,

    #[arg(long, env = "NETBOOTD_TFTP_ENABLED", default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub tftp_enabled: bool,

    #[arg(long, env = "NETBOOTD_TFTP_ADDR", default_value = "0.0.0.0")]
    pub tftp_addr: Ipv4Addr,

    #[arg(long, env = "NETBOOTD_TFTP_PORT", default_value_t = 69)]
    pub tftp_port: u16,

    /// TFTP retransmission timeout in seconds
    #[arg(long, env = "NETBOOTD_TFTP_TIMEOUT", default_value_t = 5)]
    pub tftp_timeout: u64,

    /// Largest TFTP block size granted to clients
    #[arg(long, env = "NETBOOTD_TFTP_BLOCK_SIZE", default_value_t = 512)]
    pub tftp_block_size: usize,

    /// Directory the iPXE binaries are served from
    #[arg(long, env = "NETBOOTD_IPXE_BINARY_DIR", default_value = "/var/lib/netbootd/ipxe")]
    pub ipxe_binary_dir: PathBuf,

    /// Script written over the embedded-script placeholder of served binaries
    #[arg(long, env = "NETBOOTD_IPXE_SCRIPT_PATCH")]
    pub ipxe_script_patch: Option<String>,

    #[arg(long, env = "NETBOOTD_HTTP_IPXE_BINARY_ENABLED", default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub http_ipxe_binary_enabled: bool,

    #[arg(long, env = "NETBOOTD_HTTP_IPXE_SCRIPT_ENABLED", default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub http_ipxe_script_enabled: bool,

    #[arg(long, env = "NETBOOTD_HTTP_ADDR", default_value = "0.0.0.0")]
    pub http_addr: IpAddr,

    #[arg(long, env = "NETBOOTD_HTTP_PORT", default_value_t = 7171)]
    pub http_port: u16,

    /// Base URL of the in-memory installer environment
    #[arg(long, env = "NETBOOTD_OSIE_URL")]
    pub osie_url: Option<String>,

    /// Control-plane server address (host:port)
    #[arg(long, env = "NETBOOTD_TINK_SERVER")]
    pub tink_server: Option<String>,

    #[arg(long, env = "NETBOOTD_TINK_SERVER_TLS", default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub tink_server_tls: bool,

    #[arg(long, env = "NETBOOTD_TINK_SERVER_INSECURE_TLS", default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub tink_server_insecure_tls: bool,

    /// Space separated kernel arguments added for every client
    #[arg(long, env = "NETBOOTD_EXTRA_KERNEL_ARGS", default_value = "")]
    pub extra_kernel_args: String,

    #[arg(long, env = "NETBOOTD_IPXE_SCRIPT_RETRIES", default_value_t = 10)]
    pub ipxe_script_retries: u32,

    /// Seconds between script download attempts
    #[arg(long, env = "NETBOOTD_IPXE_SCRIPT_RETRY_DELAY", default_value_t = 2)]
    pub ipxe_script_retry_delay: u32,

    /// Comma separated addresses or CIDRs allowed to set X-Forwarded-For
    #[arg(long, env = "NETBOOTD_TRUSTED_PROXIES", default_value = "")]
    pub trusted_proxies: String,

    #[arg(long, env = "NETBOOTD_SYSLOG_ENABLED", default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub syslog_enabled: bool,

    #[arg(long, env = "NETBOOTD_SYSLOG_ADDR", default_value = "0.0.0.0")]
    pub syslog_addr: Ipv4Addr,

    #[arg(long, env = "NETBOOTD_SYSLOG_PORT", default_value_t = 514)]
    pub syslog_port: u16,

    #[arg(long, env = "NETBOOTD_BACKEND_FILE_ENABLED", default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub backend_file_enabled: bool,

    /// YAML file of boot records
    #[arg(long, env = "NETBOOTD_BACKEND_FILE_PATH")]
    pub backend_file_path: Option<PathBuf>,

    #[arg(long, env = "NETBOOTD_BACKEND_NOOP_ENABLED", default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub backend_noop_enabled: bool,

    /// Record lookup timeout in seconds
    #[arg(long, env = "NETBOOTD_BACKEND_TIMEOUT", default_value_t = 5)]
    pub backend_timeout: u64,

    #[arg(long, env = "NETBOOTD_ISO_ENABLED", default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub iso_enabled: bool,

    /// Source installer image: a local path, file:// or http(s):// URL
    #[arg(long, env = "NETBOOTD_ISO_URL")]
    pub iso_url: Option<String>,

    /// Placeholder in the image replaced with the kernel command line
    #[arg(long, env = "NETBOOTD_ISO_MAGIC_STRING")]
    pub iso_magic_string: Option<String>,

    /// Pass the record's static addressing to the installer (ipam=)
    #[arg(long, env = "NETBOOTD_ISO_STATIC_IPAM_ENABLED", default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub iso_static_ipam_enabled: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "NETBOOTD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// The record store to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    File(PathBuf),
    Noop,
}

#[derive(Debug, Clone)]
pub struct DhcpSettings {
    pub addr: SocketAddrV4,
    pub interface: Option<String>,
    pub server_ip: Ipv4Addr,
    pub syslog_ip: Option<Ipv4Addr>,
    pub netboot: NetbootConfig,
}

#[derive(Debug, Clone)]
pub struct IsoSettings {
    pub location: String,
    pub marker: Marker,
    pub payload: PayloadSettings,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub addr: SocketAddr,
    pub binaries: bool,
    pub script: Option<ScriptSettings>,
    pub iso: Option<IsoSettings>,
    pub trusted_proxies: Vec<IpNetwork>,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: OperatingMode,
    pub backend: BackendKind,
    pub lookup_timeout: Duration,
    pub dhcp: Option<DhcpSettings>,
    pub tftp: Option<TftpSettings>,
    pub syslog: Option<SocketAddr>,
    pub http: HttpSettings,
    pub binary_dir: PathBuf,
    pub binary_patch: Option<BinaryPatch>,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        Self::resolve(args, detect_local_ipv4())
    }

    /// Validate `args`, filling unset advertised addresses from `local_ip`.
    pub fn resolve(args: &Args, local_ip: Option<Ipv4Addr>) -> Result<Self, ConfigError> {
        let backend = select_backend(args)?;
        let trusted_proxies = parse_trusted_proxies(&args.trusted_proxies)?;
        let local = |field: &'static str| local_ip.ok_or(ConfigError::NoLocalAddress(field));

        let syslog_ip = match args.dhcp_syslog_ip {
            Some(ip) => Some(ip),
            None if args.syslog_enabled => Some(local("--dhcp-syslog-ip")?),
            None => None,
        };
        let syslog_host = syslog_ip.map(|ip| ip.to_string()).unwrap_or_default();
        let extra_kernel_args: Vec<String> = args
            .extra_kernel_args
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let tink_server = args.tink_server.clone().filter(|s| !s.is_empty());

        let dhcp = if args.dhcp_enabled {
            Some(DhcpSettings {
                addr: args.dhcp_addr,
                interface: args.dhcp_iface.clone(),
                server_ip: match args.dhcp_ip_for_packet {
                    Some(ip) => ip,
                    None => local("--dhcp-ip-for-packet")?,
                },
                syslog_ip,
                netboot: netboot_config(args, &local)?,
            })
        } else {
            None
        };

        let tftp = args.tftp_enabled.then(|| TftpSettings {
            addr: SocketAddr::V4(SocketAddrV4::new(args.tftp_addr, args.tftp_port)),
            interface: args.dhcp_iface.clone(),
            timeout: Duration::from_secs(args.tftp_timeout.max(1)),
            max_block_size: args.tftp_block_size,
        });

        let syslog = args
            .syslog_enabled
            .then(|| SocketAddr::V4(SocketAddrV4::new(args.syslog_addr, args.syslog_port)));

        let script = args.http_ipxe_script_enabled.then(|| ScriptSettings {
            osie_url: args.osie_url.clone().filter(|s| !s.is_empty()),
            tink_server: tink_server.clone(),
            tls: args.tink_server_tls,
            insecure_tls: args.tink_server_insecure_tls,
            extra_kernel_args: extra_kernel_args.clone(),
            syslog_host: syslog_host.clone(),
            retries: args.ipxe_script_retries,
            retry_delay: args.ipxe_script_retry_delay,
            static_mode: args.dhcp_mode == OperatingMode::AutoProxy,
            static_ipam: args.iso_static_ipam_enabled,
        });

        let iso = if args.iso_enabled {
            let location = args
                .iso_url
                .clone()
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("--iso-url"))?;
            let marker = match args.iso_magic_string.as_deref().filter(|s| !s.is_empty()) {
                Some(magic) => Marker::new(magic)?,
                None => Marker::new(DEFAULT_MARKER)?,
            };
            Some(IsoSettings {
                location,
                marker,
                payload: PayloadSettings {
                    extra_kernel_args,
                    syslog_host,
                    tink_server: tink_server.unwrap_or_default(),
                    tls: args.tink_server_tls,
                    insecure_tls: args.tink_server_insecure_tls,
                    static_ipam: args.iso_static_ipam_enabled,
                },
            })
        } else {
            None
        };

        Ok(Config {
            mode: args.dhcp_mode,
            backend,
            lookup_timeout: Duration::from_secs(args.backend_timeout.max(1)),
            dhcp,
            tftp,
            syslog,
            http: HttpSettings {
                addr: SocketAddr::new(args.http_addr, args.http_port),
                binaries: args.http_ipxe_binary_enabled,
                script,
                iso,
                trusted_proxies,
            },
            binary_dir: args.ipxe_binary_dir.clone(),
            binary_patch: binary_patch(args.ipxe_script_patch.as_deref())?,
        })
    }
}

/// Exactly one store must be enabled, and the no-op store only makes sense
/// when DHCP never looks records up.
fn select_backend(args: &Args) -> Result<BackendKind, ConfigError> {
    match (args.backend_file_enabled, args.backend_noop_enabled) {
        (true, true) => Err(ConfigError::MultipleBackends),
        (false, false) => Err(ConfigError::NoBackend),
        (true, false) => args
            .backend_file_path
            .clone()
            .map(BackendKind::File)
            .ok_or(ConfigError::Missing("--backend-file-path")),
        (false, true) if args.dhcp_mode != OperatingMode::AutoProxy => {
            Err(ConfigError::NoopRequiresAutoProxy)
        }
        (false, true) => Ok(BackendKind::Noop),
    }
}

fn netboot_config(
    args: &Args,
    local: &dyn Fn(&'static str) -> Result<Ipv4Addr, ConfigError>,
) -> Result<NetbootConfig, ConfigError> {
    let tftp_ip = match args.dhcp_tftp_ip {
        Some(ip) => ip,
        None => local("--dhcp-tftp-ip")?,
    };

    let binary_host = match &args.dhcp_http_ipxe_binary_host {
        Some(host) => host.clone(),
        None => local("--dhcp-http-ipxe-binary-host")?.to_string(),
    };
    let http_binary_url = build_url(
        &args.dhcp_http_ipxe_binary_scheme,
        &binary_host,
        args.dhcp_http_ipxe_binary_port,
        &args.dhcp_http_ipxe_binary_path,
    )
    .map_err(|source| ConfigError::InvalidUrl {
        field: "ipxe binary",
        value: format!("{}://{binary_host}", args.dhcp_http_ipxe_binary_scheme),
        source,
    })?;

    let script_base = match args.dhcp_http_ipxe_script_url.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            field: "ipxe script",
            value: raw.to_string(),
            source,
        })?,
        None => {
            let host = match &args.dhcp_http_ipxe_script_host {
                Some(host) => host.clone(),
                None => local("--dhcp-http-ipxe-script-host")?.to_string(),
            };
            build_url(
                &args.dhcp_http_ipxe_script_scheme,
                &host,
                args.dhcp_http_ipxe_script_port,
                &args.dhcp_http_ipxe_script_path,
            )
            .map_err(|source| ConfigError::InvalidUrl {
                field: "ipxe script",
                value: format!("{}://{host}", args.dhcp_http_ipxe_script_scheme),
                source,
            })?
        }
    };

    Ok(NetbootConfig {
        tftp_addr: SocketAddrV4::new(tftp_ip, args.dhcp_tftp_port),
        http_binary_url,
        script_url: ScriptUrl::new(script_base, args.dhcp_http_ipxe_script_prepend_mac),
        custom_user_class: args.dhcp_custom_user_class.clone(),
    })
}

fn binary_patch(script: Option<&str>) -> Result<Option<BinaryPatch>, ConfigError> {
    let Some(script) = script.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let marker = Marker::new(EMBEDDED_SCRIPT_MARKER)?;
    if script.len() > marker.len() {
        return Err(ConfigError::InvalidMarker(format!(
            "script patch is {} bytes, the binary placeholder holds {}",
            script.len(),
            marker.len()
        )));
    }
    Ok(Some(BinaryPatch {
        marker,
        script: script.as_bytes().to_vec(),
    }))
}

/// Parse a comma separated list of addresses and CIDRs. Bare addresses
/// become single-host networks.
pub fn parse_trusted_proxies(raw: &str) -> Result<Vec<IpNetwork>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let network = if entry.contains('/') {
                entry.parse::<IpNetwork>().ok()
            } else {
                entry.parse::<IpAddr>().ok().map(IpNetwork::from)
            };
            network.ok_or_else(|| ConfigError::InvalidTrustedProxy(entry.to_string()))
        })
        .collect()
}
