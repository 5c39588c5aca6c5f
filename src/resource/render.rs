//! Resource Config Renderer
//!
//! Renders the engine resource file for a replica and compares existing
//! files against a desired configuration by their semantic content.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::replica::{ReplicaDescriptor, VolumeConfig};

const HEADER: &str = "# Managed by replicad, manual changes are overwritten.";
const VOLUME_KEY: &str = "volume";
const CAPACITY_KEY: &str = "capacity";
const INDENT: &str = "    ";

/// Node-level inputs to rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    /// First replication port (port = base + resource id)
    pub port_base: u16,
    /// First device minor (minor = base + resource id)
    pub minor_base: u32,
    /// Root under which pool volume groups are exposed
    pub device_root: PathBuf,
    /// Replication IP of this node, used when the topology omits it
    pub local_address: String,
}

/// Semantic content of a resource config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub name: String,
    pub volume_name: String,
    pub capacity_bytes: u64,
    pub minor: u32,
    /// Hosts ordered by node id
    pub hosts: Vec<HostSpec>,
}

/// One `on <host>` section
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostSpec {
    pub node_id: u32,
    pub hostname: String,
    pub address: String,
    pub disk: String,
}

/// Malformed resource config text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed resource config: {0}")]
pub struct ParseError(String);

/// Renders resource configs for this node
#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    settings: RenderSettings,
}

impl ConfigRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Build the desired resource model for a replica
    pub fn desired(
        &self,
        replica: &ReplicaDescriptor,
        config: &VolumeConfig,
    ) -> Result<ResourceSpec> {
        config.validate_for(replica)?;

        let port = u32::from(self.settings.port_base) + config.resource_id;
        let port = u16::try_from(port).map_err(|_| Error::InvalidVolumeConfig {
            resource: replica.name.clone(),
            reason: format!("resource id {} is out of the port range", config.resource_id),
        })?;
        let minor = self
            .settings
            .minor_base
            .checked_add(config.resource_id)
            .ok_or_else(|| Error::InvalidVolumeConfig {
                resource: replica.name.clone(),
                reason: format!("resource id {} is out of the minor range", config.resource_id),
            })?;

        let disk = self
            .settings
            .device_root
            .join(&replica.storage_pool_name)
            .join(&replica.volume_name)
            .display()
            .to_string();

        let mut hosts: Vec<HostSpec> = config
            .replicas
            .iter()
            .map(|peer| HostSpec {
                node_id: peer.id,
                hostname: peer.hostname.clone(),
                address: format_address(&peer.ip, port),
                disk: disk.clone(),
            })
            .collect();

        if config.peer(&replica.node_name).is_none() {
            if hosts.iter().any(|h| h.node_id == 0) {
                return Err(Error::InvalidVolumeConfig {
                    resource: replica.name.clone(),
                    reason: format!(
                        "node {} is missing from the volume topology",
                        replica.node_name
                    ),
                });
            }
            hosts.push(HostSpec {
                node_id: 0,
                hostname: replica.node_name.clone(),
                address: format_address(&self.settings.local_address, port),
                disk,
            });
        }
        hosts.sort();

        Ok(ResourceSpec {
            name: replica.name.clone(),
            volume_name: config.volume_name.clone(),
            capacity_bytes: config.required_capacity_bytes,
            minor,
            hosts,
        })
    }

    /// Render the resource config text for a replica
    pub fn render(&self, replica: &ReplicaDescriptor, config: &VolumeConfig) -> Result<String> {
        Ok(render_spec(&self.desired(replica, config)?))
    }

    /// Check whether existing config text already reflects the desired state
    ///
    /// Malformed text never matches.
    pub fn matches_rendered(
        &self,
        existing: &str,
        replica: &ReplicaDescriptor,
        config: &VolumeConfig,
    ) -> Result<bool> {
        let desired = self.desired(replica, config)?;
        match parse_rendered(existing) {
            Ok(current) => Ok(current == desired),
            Err(e) => {
                tracing::warn!("Config for {} needs repair: {}", replica.name, e);
                Ok(false)
            }
        }
    }
}

fn format_address(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("ipv6 [{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

/// Render a resource model as engine config text
pub fn render_spec(spec: &ResourceSpec) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(&format!("# {}: {}\n", VOLUME_KEY, spec.volume_name));
    out.push_str(&format!("# {}: {}\n", CAPACITY_KEY, spec.capacity_bytes));
    out.push_str(&format!("resource {} {{\n", spec.name));
    out.push_str(&format!("{INDENT}net {{\n{INDENT}{INDENT}protocol C;\n{INDENT}}}\n"));
    out.push_str(&format!("{INDENT}options {{\n{INDENT}{INDENT}auto-promote no;\n{INDENT}}}\n"));
    out.push_str(&format!("{INDENT}device minor {};\n", spec.minor));
    out.push_str(&format!("{INDENT}meta-disk internal;\n"));

    for host in &spec.hosts {
        out.push('\n');
        out.push_str(&format!("{INDENT}on {} {{\n", host.hostname));
        out.push_str(&format!("{INDENT}{INDENT}node-id {};\n", host.node_id));
        out.push_str(&format!("{INDENT}{INDENT}address {};\n", host.address));
        out.push_str(&format!("{INDENT}{INDENT}disk {};\n", host.disk));
        out.push_str(&format!("{INDENT}}}\n"));
    }

    if spec.hosts.len() > 1 {
        let names: Vec<&str> = spec.hosts.iter().map(|h| h.hostname.as_str()).collect();
        out.push('\n');
        out.push_str(&format!("{INDENT}connection-mesh {{\n"));
        out.push_str(&format!("{INDENT}{INDENT}hosts {};\n", names.join(" ")));
        out.push_str(&format!("{INDENT}}}\n"));
    }

    out.push_str("}\n");
    out
}

/// Parse config text produced by [`render_spec`] back into its model
///
/// Layout, indentation and unknown statements are ignored.
pub fn parse_rendered(text: &str) -> std::result::Result<ResourceSpec, ParseError> {
    let mut volume_name = None;
    let mut capacity_bytes = None;
    for line in text.lines() {
        let Some(comment) = line.trim_start().strip_prefix('#') else {
            continue;
        };
        if let Some((key, value)) = comment.split_once(':') {
            match key.trim() {
                VOLUME_KEY => volume_name = Some(value.trim().to_string()),
                CAPACITY_KEY => {
                    let value = value.trim();
                    capacity_bytes = Some(value.parse::<u64>().map_err(|_| {
                        ParseError(format!("invalid capacity {:?}", value))
                    })?);
                }
                _ => {}
            }
        }
    }

    let volume_name = volume_name.ok_or_else(|| ParseError("missing volume header".into()))?;
    let capacity_bytes =
        capacity_bytes.ok_or_else(|| ParseError("missing capacity header".into()))?;

    let mut tokens = tokenize(text).into_iter();
    let nodes = parse_block(&mut tokens, false)?;

    let mut resources = nodes.into_iter().filter_map(|node| match node {
        Node::Section { words, body } if words.first().map(String::as_str) == Some("resource") => {
            Some((words, body))
        }
        _ => None,
    });
    let (words, body) = resources
        .next()
        .ok_or_else(|| ParseError("no resource section".into()))?;
    if resources.next().is_some() {
        return Err(ParseError("more than one resource section".into()));
    }
    let name = match words.as_slice() {
        [_, name] => name.clone(),
        _ => return Err(ParseError("resource section must be named".into())),
    };

    let mut minor = None;
    let mut hosts = Vec::new();
    for node in body {
        match node {
            Node::Statement(words)
                if words.len() == 3 && words[0] == "device" && words[1] == "minor" =>
            {
                minor = Some(parse_number(&words[2], "device minor")?);
            }
            Node::Section { words, body } if words.first().map(String::as_str) == Some("on") => {
                let hostname = match words.as_slice() {
                    [_, host] => host.clone(),
                    _ => return Err(ParseError("on section must name one host".into())),
                };
                hosts.push(parse_host(hostname, body)?);
            }
            _ => {}
        }
    }

    let minor = minor.ok_or_else(|| ParseError("missing device minor".into()))?;
    hosts.sort();

    Ok(ResourceSpec {
        name,
        volume_name,
        capacity_bytes,
        minor,
        hosts,
    })
}

fn parse_host(hostname: String, body: Vec<Node>) -> std::result::Result<HostSpec, ParseError> {
    let mut node_id = None;
    let mut address = None;
    let mut disk = None;
    for node in body {
        if let Node::Statement(words) = node {
            match words.first().map(String::as_str) {
                Some("node-id") if words.len() == 2 => {
                    node_id = Some(parse_number(&words[1], "node-id")?);
                }
                Some("address") if words.len() > 1 => address = Some(words[1..].join(" ")),
                Some("disk") if words.len() == 2 => disk = Some(words[1].clone()),
                _ => {}
            }
        }
    }

    let missing = |what: &str| ParseError(format!("host {} has no {}", hostname, what));
    Ok(HostSpec {
        node_id: node_id.ok_or_else(|| missing("node-id"))?,
        address: address.ok_or_else(|| missing("address"))?,
        disk: disk.ok_or_else(|| missing("disk"))?,
        hostname,
    })
}

fn parse_number(word: &str, what: &str) -> std::result::Result<u32, ParseError> {
    word.parse()
        .map_err(|_| ParseError(format!("invalid {} {:?}", what, word)))
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Open,
    Close,
    End,
}

#[derive(Debug)]
enum Node {
    Statement(Vec<String>),
    Section { words: Vec<String>, body: Vec<Node> },
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for line in text.lines() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let mut word = String::new();
        for c in line.chars() {
            let token = match c {
                '{' => Some(Token::Open),
                '}' => Some(Token::Close),
                ';' => Some(Token::End),
                c if c.is_whitespace() => None,
                c => {
                    word.push(c);
                    continue;
                }
            };
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
            if let Some(token) = token {
                tokens.push(token);
            }
        }
        if !word.is_empty() {
            tokens.push(Token::Word(word));
        }
    }
    tokens
}

fn parse_block(
    tokens: &mut impl Iterator<Item = Token>,
    nested: bool,
) -> std::result::Result<Vec<Node>, ParseError> {
    let mut nodes = Vec::new();
    let mut words = Vec::new();
    loop {
        match tokens.next() {
            Some(Token::Word(word)) => words.push(word),
            Some(Token::End) => {
                if !words.is_empty() {
                    nodes.push(Node::Statement(std::mem::take(&mut words)));
                }
            }
            Some(Token::Open) => {
                let body = parse_block(tokens, true)?;
                nodes.push(Node::Section {
                    words: std::mem::take(&mut words),
                    body,
                });
            }
            Some(Token::Close) => {
                if !nested {
                    return Err(ParseError("unbalanced closing brace".into()));
                }
                if !words.is_empty() {
                    return Err(ParseError(format!("unterminated statement {:?}", words)));
                }
                return Ok(nodes);
            }
            None => {
                if nested {
                    return Err(ParseError("unterminated section".into()));
                }
                if !words.is_empty() {
                    return Err(ParseError(format!("unterminated statement {:?}", words)));
                }
                return Ok(nodes);
            }
        }
    }
}
