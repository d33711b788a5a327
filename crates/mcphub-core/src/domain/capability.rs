//! Capability lists discovered from a connected server.
//!
//! The records themselves are opaque to the hub (they are forwarded to
//! clients verbatim); the hub only cares about the identifying field of each
//! kind: `name` for tools and prompts, `uri` for resources, `uriTemplate`
//! for resource templates.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four capability kinds a server advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityKind {
    Tools,
    Resources,
    ResourceTemplates,
    Prompts,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::Tools,
        CapabilityKind::Resources,
        CapabilityKind::ResourceTemplates,
        CapabilityKind::Prompts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::ResourceTemplates => "resourceTemplates",
            Self::Prompts => "prompts",
        }
    }
}

/// Everything a server currently advertises, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: Vec<Value>,
    pub resources: Vec<Value>,
    #[serde(rename = "resourceTemplates")]
    pub resource_templates: Vec<Value>,
    pub prompts: Vec<Value>,
}

fn field_values<'a>(records: &'a [Value], field: &'a str) -> impl Iterator<Item = &'a str> {
    records.iter().filter_map(move |r| r.get(field)?.as_str())
}

impl ServerCapabilities {
    pub fn total_count(&self) -> usize {
        self.tools.len() + self.resources.len() + self.resource_templates.len() + self.prompts.len()
    }

    pub fn tool_names(&self) -> Vec<String> {
        field_values(&self.tools, "name").map(String::from).collect()
    }

    pub fn prompt_names(&self) -> Vec<String> {
        field_values(&self.prompts, "name").map(String::from).collect()
    }

    pub fn resource_uris(&self) -> Vec<String> {
        field_values(&self.resources, "uri").map(String::from).collect()
    }

    pub fn template_uris(&self) -> Vec<String> {
        field_values(&self.resource_templates, "uriTemplate")
            .map(String::from)
            .collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        field_values(&self.tools, "name").any(|n| n == name)
    }

    pub fn has_prompt(&self, name: &str) -> bool {
        field_values(&self.prompts, "name").any(|n| n == name)
    }

    /// True when `uri` names a concrete resource or matches a template.
    pub fn matches_resource(&self, uri: &str) -> bool {
        if field_values(&self.resources, "uri").any(|u| u == uri) {
            return true;
        }
        field_values(&self.resource_templates, "uriTemplate")
            .any(|template| template_matches(template, uri))
    }

    /// Replace one kind's list, leaving the others untouched.
    pub fn set_kind(&mut self, kind: CapabilityKind, records: Vec<Value>) {
        match kind {
            CapabilityKind::Tools => self.tools = records,
            CapabilityKind::Resources => self.resources = records,
            CapabilityKind::ResourceTemplates => self.resource_templates = records,
            CapabilityKind::Prompts => self.prompts = records,
        }
    }
}

static TEMPLATE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\\{[A-Za-z_][A-Za-z0-9_]*\\\}").expect("static pattern"));

/// Match a URI against an RFC 6570-style template where each `{name}`
/// placeholder matches exactly one path segment.
///
/// `tpl://{a}/{b}` matches `tpl://x/y` but not `tpl://x/y/z` or `tpl://x`.
pub fn template_matches(template: &str, uri: &str) -> bool {
    let escaped = regex::escape(template);
    let pattern = TEMPLATE_SEGMENT.replace_all(&escaped, "[^/]+");
    match Regex::new(&format!("^{pattern}$")) {
        Ok(re) => re.is_match(uri),
        Err(_) => false,
    }
}
