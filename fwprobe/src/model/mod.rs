//! TOML model files.
//!
//! A model describes one equipment: its interfaces, static routes and either
//! an access-list ruleset or a pf ruleset. Values inside the file use the
//! same small syntaxes the rule types parse (`10.0.0.0/24`, `eq 80`,
//! `!<badhosts>`, `S/SA`); references to object groups use the
//! `object-group NAME` form.
//!
//! Loading validates everything the evaluators rely on and returns the
//! built [`Equipment`] together with load-time usage counters and notes
//! about suspicious but valid configuration.

mod acl;
mod pf;

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;
use match_core::{Link, Route, StaticRoutes, ValueError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::acl::GroupKind;
use crate::equipment::{Equipment, FirewallKind, Interface};
use crate::error::ConfigError;
use crate::usage::UsageCounters;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelFile {
    pub equipment: EquipmentSection,
    #[serde(default)]
    pub interfaces: Vec<InterfaceSection>,
    #[serde(default)]
    pub routes: Vec<RouteSection>,
    #[serde(default)]
    pub object_groups: Vec<ObjectGroupSection>,
    #[serde(default)]
    pub access_lists: Vec<AccessListSection>,
    #[serde(default)]
    pub access_groups: Vec<AccessGroupSection>,
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableSection>,
    #[serde(default)]
    pub rules: Vec<RuleSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EquipmentSection {
    pub name: String,
    pub kind: FirewallKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceSection {
    pub name: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSection {
    pub prefix: String,
    pub iface: String,
    pub next_hop: Option<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectGroupSection {
    pub name: String,
    pub kind: GroupKind,
    /// `tcp`, `udp` or `tcp-udp` for service groups.
    pub protocol: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub items: Vec<GroupItemSection>,
}

/// One `*-object` line, or a `group-object` reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupItemSection {
    Net(String),
    Group(String),
    Port(String),
    Protocol(String),
    Icmp(String),
    Service {
        protocol: String,
        port: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessListSection {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<EntrySection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntrySection {
    pub action: Option<String>,
    pub remark: Option<String>,
    pub protocol: Option<String>,
    pub source: Option<String>,
    pub source_port: Option<String>,
    pub destination: Option<String>,
    pub destination_port: Option<String>,
    pub icmp: Option<String>,
    /// Enhanced service group name.
    pub service: Option<String>,
    pub inactive: bool,
    /// Overrides the rendered entry text.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessGroupSection {
    pub list: String,
    pub iface: String,
    pub direction: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSection {
    /// Owning anchor path; the main ruleset when absent.
    pub scope: Option<String>,
    pub name: String,
    #[serde(default)]
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleSection {
    pub scope: Option<String>,
    /// `pass`, `block`, `match` or `anchor`.
    pub action: String,
    pub quick: bool,
    pub direction: Option<String>,
    pub on: Vec<String>,
    pub af: Option<String>,
    pub proto: Vec<String>,
    pub all: bool,
    pub from: Vec<String>,
    pub from_port: Vec<String>,
    pub to: Vec<String>,
    pub to_port: Vec<String>,
    pub icmp: Vec<String>,
    pub icmp_af: Option<String>,
    pub flags: Option<String>,
    pub tag: Option<String>,
    pub tagged: Option<String>,
    pub route_to: Option<RouteToSection>,
    pub keep_state: bool,
    /// Anchor rules: path of the referenced anchor.
    pub target: Option<String>,
    /// Anchor rules: the target is created as a child of the rule's scope
    /// and its rules are the ones whose `scope` names it.
    pub inline: bool,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteToSection {
    pub iface: String,
    pub next_hop: Option<IpAddr>,
}

/// Errors returned when loading model files.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse model file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid model {path}: {source}")]
    Config { path: String, source: ConfigError },
}

/// Suspicious but valid configuration found while loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadNote {
    pub code: &'static str,
    pub message: String,
}

impl LoadNote {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(code, "{message}");
        Self { code, message }
    }
}

#[derive(Debug)]
pub struct LoadedModel {
    pub equipment: Equipment,
    pub usage: UsageCounters,
    pub notes: Vec<LoadNote>,
}

/// Load and validate a model from a TOML file.
pub fn load_model(path: &Path) -> Result<LoadedModel, ModelLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_model(&raw, path.display().to_string())
}

pub fn parse_model(raw: &str, path: String) -> Result<LoadedModel, ModelLoadError> {
    let file: ModelFile = toml::from_str(raw).map_err(|source| ModelLoadError::Parse {
        path: path.clone(),
        source,
    })?;
    build_model(&file).map_err(|source| ModelLoadError::Config { path, source })
}

/// Builds the equipment described by an already deserialized model.
pub fn build_model(file: &ModelFile) -> Result<LoadedModel, ConfigError> {
    let mut notes = Vec::new();
    let interfaces = build_interfaces(&file.interfaces)?;
    let known = InterfaceNames::new(&interfaces);

    let mut routes = StaticRoutes::default();
    for route in &file.routes {
        let prefix: IpNet = route.prefix.trim().parse().map_err(|err: ipnet::AddrParseError| {
            ConfigError::value(
                format!("route via {}", route.iface),
                ValueError::new("route prefix", &route.prefix, err.to_string()),
            )
        })?;
        known.check(&route.iface, format!("route {prefix}"), &mut notes);
        routes.push(Route {
            prefix,
            link: Link::new(route.iface.clone()),
            next_hop: route.next_hop,
        });
    }

    let (firewall, usage) = match file.equipment.kind {
        FirewallKind::AccessList => {
            reject_foreign(file.equipment.kind, "skip", !file.skip.is_empty())?;
            reject_foreign(file.equipment.kind, "tables", !file.tables.is_empty())?;
            reject_foreign(file.equipment.kind, "rules", !file.rules.is_empty())?;
            acl::build(file, &known, &mut notes)?
        }
        FirewallKind::PacketFilter => {
            reject_foreign(file.equipment.kind, "object_groups", !file.object_groups.is_empty())?;
            reject_foreign(file.equipment.kind, "access_lists", !file.access_lists.is_empty())?;
            reject_foreign(file.equipment.kind, "access_groups", !file.access_groups.is_empty())?;
            pf::build(file, &known, &mut notes)?
        }
    };

    Ok(LoadedModel {
        equipment: Equipment {
            name: file.equipment.name.clone(),
            interfaces,
            routes,
            firewall,
        },
        usage,
        notes,
    })
}

fn build_interfaces(sections: &[InterfaceSection]) -> Result<Vec<Interface>, ConfigError> {
    let mut interfaces: Vec<Interface> = Vec::with_capacity(sections.len());
    for section in sections {
        if interfaces.iter().any(|iface| iface.name == section.name) {
            return Err(ConfigError::Duplicate {
                kind: "interface",
                name: section.name.clone(),
            });
        }
        interfaces.push(Interface {
            name: section.name.clone(),
            comment: section.comment.clone(),
        });
    }
    Ok(interfaces)
}

fn reject_foreign(kind: FirewallKind, section: &str, present: bool) -> Result<(), ConfigError> {
    if present {
        let kind = match kind {
            FirewallKind::AccessList => "access-list",
            FirewallKind::PacketFilter => "packet-filter",
        };
        return Err(ConfigError::conflict(
            format!("{kind} equipment"),
            format!("section '{section}' belongs to the other firewall kind"),
        ));
    }
    Ok(())
}

/// Declared interface names. An empty declaration list disables the check.
pub(crate) struct InterfaceNames<'a> {
    names: Vec<&'a str>,
}

impl<'a> InterfaceNames<'a> {
    fn new(interfaces: &'a [Interface]) -> Self {
        Self {
            names: interfaces.iter().map(|iface| iface.name.as_str()).collect(),
        }
    }

    pub(crate) fn check(&self, iface: &str, used_by: impl Into<String>, notes: &mut Vec<LoadNote>) {
        if !self.names.is_empty() && !self.names.contains(&iface) {
            notes.push(LoadNote::new(
                "unknown_interface",
                format!("{} uses undeclared interface '{iface}'", used_by.into()),
            ));
        }
    }
}

/// Maps a value parse failure to a configuration error with context.
pub(crate) fn parse_value<T>(context: impl Fn() -> String, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = ValueError>,
{
    raw.parse().map_err(|err| ConfigError::value(context(), err))
}
