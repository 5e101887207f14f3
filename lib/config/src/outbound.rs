use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const TYPE_DIRECT: &str = "direct";
pub const TYPE_SHADOWSOCKS: &str = "shadowsocks";
pub const TYPE_TROJAN: &str = "trojan";
pub const TYPE_VMESS: &str = "vmess";
pub const TYPE_HTTP: &str = "http";
pub const TYPE_SELECTOR: &str = "selector";
pub const TYPE_URLTEST: &str = "url-test";

/// A single outbound endpoint or group, as it appears in the node
/// configuration and in subscription payloads.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct OutboundOptions {
    #[serde(default)]
    pub tag: String,
    #[serde(flatten)]
    pub kind: OutboundKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundKind {
    Direct(DirectOutboundOptions),
    Shadowsocks(ShadowsocksOutboundOptions),
    Trojan(TrojanOutboundOptions),
    Vmess(VmessOutboundOptions),
    Http(HttpOutboundOptions),
    Selector(SelectorOutboundOptions),
    UrlTest(UrlTestOutboundOptions),
}

impl OutboundOptions {
    pub fn outbound_type(&self) -> &'static str {
        match self.kind {
            OutboundKind::Direct(_) => TYPE_DIRECT,
            OutboundKind::Shadowsocks(_) => TYPE_SHADOWSOCKS,
            OutboundKind::Trojan(_) => TYPE_TROJAN,
            OutboundKind::Vmess(_) => TYPE_VMESS,
            OutboundKind::Http(_) => TYPE_HTTP,
            OutboundKind::Selector(_) => TYPE_SELECTOR,
            OutboundKind::UrlTest(_) => TYPE_URLTEST,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct DirectOutboundOptions {}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ServerOptions {
    pub server: String,
    pub server_port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ShadowsocksOutboundOptions {
    #[serde(flatten)]
    pub server: ServerOptions,
    pub method: String,
    pub password: String,
    /// Restricts the enabled networks ("tcp" or "udp"); both when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default)]
    pub tcp_fast_open: bool,
    /// Dials through another outbound instead of the system interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct TrojanOutboundOptions {
    #[serde(flatten)]
    pub server: ServerOptions,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct VmessOutboundOptions {
    #[serde(flatten)]
    pub server: ServerOptions,
    pub uuid: String,
    #[serde(default = "default_vmess_security")]
    pub security: String,
    #[serde(default)]
    pub alter_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
}

fn default_vmess_security() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct HttpOutboundOptions {
    #[serde(flatten)]
    pub server: ServerOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
}

/// A user-driven group: serves one member until told to serve another.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SelectorOutboundOptions {
    #[serde(default)]
    pub outbounds: Vec<String>,
    /// Member served initially; the first member when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub interrupt_exist_connections: bool,
    /// Pulls additional members from outbound providers, optionally filtered
    /// by matcher rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<GroupProviderOptions>,
}

/// A latency-driven group: serves the member with the best probe result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct UrlTestOutboundOptions {
    #[serde(default)]
    pub outbounds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(
        default,
        deserialize_with = "humantime_serde::deserialize",
        serialize_with = "humantime_serde::serialize"
    )]
    #[schemars(with = "Option<String>")]
    pub interval: Option<Duration>,
    /// Delay headroom (milliseconds) the current member keeps before the
    /// group switches to a faster one.
    #[serde(default)]
    pub tolerance: u16,
    #[serde(default)]
    pub interrupt_exist_connections: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<GroupProviderOptions>,
}

/// Reference from a group to an outbound provider. Empty `rules` takes every
/// outbound the provider produced; otherwise the rules form a matcher group
/// with the given logical mode, and `invert` flips the verdict.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct GroupProviderOptions {
    pub tag: String,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub logical: String,
    #[serde(default)]
    pub invert: bool,
}
