//! WireGuard configuration file format: rendering of `[Interface]` and
//! `[Peer]` stanzas, and a line-oriented parser that tolerates and
//! preserves unknown keys so files can be rewritten losslessly.

use std::fmt::Write as _;

use crate::keys;

/// Settings rendered into the server's `[Interface]` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub private_key: String,
    pub public_key: String,
    /// Server address with prefix, e.g. `10.0.0.1/24`.
    pub address: String,
    pub listen_port: u16,
    pub dns: Vec<String>,
    pub post_up: Vec<String>,
    pub post_down: Vec<String>,
    pub interface: String,
}

impl ServerConfig {
    /// Render the `[Interface]` stanza. Peer stanzas are appended
    /// separately so the file can grow without re-rendering.
    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "[Interface]").unwrap();
        writeln!(out, "PrivateKey = {}", self.private_key).unwrap();
        writeln!(out, "Address = {}", self.address).unwrap();
        writeln!(out, "ListenPort = {}", self.listen_port).unwrap();
        for cmd in &self.post_up {
            writeln!(out, "PostUp = {cmd}").unwrap();
        }
        for cmd in &self.post_down {
            writeln!(out, "PostDown = {cmd}").unwrap();
        }
        out
    }

    /// Rebuild a `ServerConfig` from a parsed file. The public key is
    /// derived from the private key; it is not stored in the file.
    pub fn from_config_file(file: &ConfigFile, interface: &str) -> Self {
        let section = &file.interface;
        let private_key = section.get("PrivateKey").unwrap_or_default().to_string();
        let public_key = keys::public_key_from_private(&private_key).unwrap_or_default();

        Self {
            private_key,
            public_key,
            address: section.get("Address").unwrap_or_default().to_string(),
            listen_port: section
                .get("ListenPort")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            dns: section.get("DNS").map(split_list).unwrap_or_default(),
            post_up: section.get_all("PostUp"),
            post_down: section.get_all("PostDown"),
            interface: interface.to_string(),
        }
    }
}

/// Settings rendered into a client's config file.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub private_key: String,
    /// Client address, always a /32.
    pub address: String,
    pub dns: Vec<String>,
    pub server_public_key: String,
    /// `host:port` of the server's public endpoint.
    pub server_endpoint: String,
    pub allowed_ips: Vec<String>,
}

impl ClientConfig {
    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "[Interface]").unwrap();
        writeln!(out, "PrivateKey = {}", self.private_key).unwrap();
        writeln!(out, "Address = {}", self.address).unwrap();
        if !self.dns.is_empty() {
            writeln!(out, "DNS = {}", self.dns.join(", ")).unwrap();
        }
        writeln!(out).unwrap();
        writeln!(out, "[Peer]").unwrap();
        writeln!(out, "PublicKey = {}", self.server_public_key).unwrap();
        writeln!(out, "Endpoint = {}", self.server_endpoint).unwrap();
        writeln!(out, "AllowedIPs = {}", self.allowed_ips.join(", ")).unwrap();
        writeln!(out, "PersistentKeepalive = 25").unwrap();
        out
    }
}

/// One `[Peer]` stanza of the server config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStanza {
    pub public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: Option<String>,
    pub persistent_keepalive: Option<u16>,
}

impl PeerStanza {
    /// A standard server-side stanza routing a single client address.
    pub fn for_client(public_key: &str, address: &str) -> Self {
        Self {
            public_key: public_key.to_string(),
            allowed_ips: vec![format!("{address}/32")],
            endpoint: None,
            persistent_keepalive: None,
        }
    }

    fn to_section(&self) -> Section {
        let mut section = Section::default();
        section.push("PublicKey", &self.public_key);
        section.push("AllowedIPs", &self.allowed_ips.join(", "));
        if let Some(ref endpoint) = self.endpoint {
            section.push("Endpoint", endpoint);
        }
        if let Some(ka) = self.persistent_keepalive {
            section.push("PersistentKeepalive", &ka.to_string());
        }
        section
    }

    fn from_section(section: &Section) -> Option<Self> {
        let public_key = section.get("PublicKey")?.to_string();
        Some(Self {
            public_key,
            allowed_ips: section
                .get("AllowedIPs")
                .map(split_list)
                .unwrap_or_default(),
            endpoint: section.get("Endpoint").map(str::to_string),
            persistent_keepalive: section
                .get("PersistentKeepalive")
                .and_then(|v| v.parse().ok()),
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// An ordered key/value section. Unknown keys are kept verbatim so a
/// parse-and-rewrite cycle does not lose operator additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn push(&mut self, key: &str, value: &str) {
        self.entries.push((key.to_string(), value.to_string()));
    }

    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in file order (PostUp/PostDown repeat).
    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn render_into(&self, out: &mut String) {
        for (key, value) in &self.entries {
            writeln!(out, "{key} = {value}").unwrap();
        }
    }
}

/// A parsed WireGuard config file: one `[Interface]` section and the
/// `[Peer]` sections in file order.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub interface: Section,
    pub peers: Vec<Section>,
}

impl ConfigFile {
    /// Parse a config file. Comments and blank lines are dropped; section
    /// headers are case-sensitive; whitespace around `=` is permitted;
    /// unknown keys are carried through untouched.
    pub fn parse(text: &str) -> Self {
        enum Target {
            None,
            Interface,
            Peer,
        }

        let mut file = ConfigFile::default();
        let mut target = Target::None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                target = match line {
                    "[Interface]" => Target::Interface,
                    "[Peer]" => {
                        file.peers.push(Section::default());
                        Target::Peer
                    }
                    _ => Target::None,
                };
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match target {
                Target::Interface => file.interface.push(key, value),
                Target::Peer => {
                    if let Some(section) = file.peers.last_mut() {
                        section.push(key, value);
                    }
                }
                Target::None => {}
            }
        }

        file
    }

    /// Render back to the on-disk format, ` = ` separated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "[Interface]").unwrap();
        self.interface.render_into(&mut out);
        for peer in &self.peers {
            writeln!(out).unwrap();
            writeln!(out, "[Peer]").unwrap();
            peer.render_into(&mut out);
        }
        out
    }

    pub fn push_peer(&mut self, peer: &PeerStanza) {
        self.peers.push(peer.to_section());
    }

    /// Remove the peer whose `PublicKey` matches exactly. Returns whether
    /// anything was removed.
    pub fn remove_peer(&mut self, public_key: &str) -> bool {
        let before = self.peers.len();
        self.peers
            .retain(|section| section.get("PublicKey") != Some(public_key));
        self.peers.len() != before
    }

    /// Peer stanzas in file order; sections without a `PublicKey` are
    /// skipped.
    pub fn peer_stanzas(&self) -> Vec<PeerStanza> {
        self.peers
            .iter()
            .filter_map(PeerStanza::from_section)
            .collect()
    }
}
