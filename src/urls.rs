//! URL building for boot filenames and per-client script locations.

use macaddr::MacAddr6;
use url::Url;

/// Lower-case, colon separated rendering (`aa:bb:cc:dd:ee:ff`).
///
/// `MacAddr6`'s `Display` is upper-case, which iPXE and the stores do not use.
pub fn format_mac(mac: &MacAddr6) -> String {
    let b = mac.as_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    )
}

/// Default port for a URL scheme, if it has a well-known one.
fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "tftp" => Some(69),
        _ => None,
    }
}

/// Render `host[:port]`, leaving the port off when it is the scheme default.
pub fn authority(scheme: &str, host: &str, port: u16) -> String {
    if default_port(scheme) == Some(port) {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Assemble a URL from parts. The path is normalized to start with `/`.
pub fn build_url(scheme: &str, host: &str, port: u16, path: &str) -> Result<Url, url::ParseError> {
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{scheme}://{}/{path}", authority(scheme, host, port)))
}

/// Insert the client's hardware address as the path segment just before the
/// final one. Idempotent: a URL that already carries the address there is
/// returned unchanged.
pub fn inject_mac(url: &Url, mac: &MacAddr6) -> Url {
    let mac = format_mac(mac);
    let mut segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();

    let file = segments.pop();
    if segments.last() == Some(&mac.as_str()) {
        return url.clone();
    }

    let mut path = String::new();
    for segment in &segments {
        path.push('/');
        path.push_str(segment);
    }
    path.push('/');
    path.push_str(&mac);
    if let Some(file) = file {
        path.push('/');
        path.push_str(file);
    }

    let mut injected = url.clone();
    injected.set_path(&path);
    injected
}

/// The boot script location handed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUrl {
    base: Url,
    inject_mac: bool,
}

impl ScriptUrl {
    pub fn new(base: Url, inject_mac: bool) -> Self {
        Self { base, inject_mac }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn for_client(&self, mac: &MacAddr6) -> Url {
        if self.inject_mac {
            inject_mac(&self.base, mac)
        } else {
            self.base.clone()
        }
    }
}
