use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use match_core::probe::DEFAULT_TTL;

#[derive(Parser, Debug)]
#[command(name = "fwprobe")]
#[command(about = "Offline reachability analysis for access-list firewalls and pf rulesets")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). FWPROBE_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Send a probe through a modeled equipment and show the verdict.
    Probe(ProbeArgs),
    /// Load and validate a model; report errors and unused objects.
    Check(CheckArgs),
    /// Print object groups with their expanded members.
    Groups(GroupsArgs),
}

#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Model file describing the equipment.
    pub model: PathBuf,
    /// Interface the probe enters on.
    #[arg(long = "in", value_name = "IFACE")]
    pub ingress: String,
    /// Force the egress interface instead of consulting the routes.
    #[arg(long = "out", value_name = "IFACE")]
    pub egress: Option<String>,
    /// Source address, network or range.
    #[arg(long)]
    pub src: String,
    /// Destination address, network or range.
    #[arg(long)]
    pub dst: String,
    /// Protocol name or number; repeat for a probe carrying several.
    #[arg(long = "proto", value_name = "PROTO")]
    pub protocols: Vec<String>,
    /// Source port expression, e.g. `eq 80` or `range 1024 65535`.
    #[arg(long)]
    pub sport: Option<String>,
    /// Destination port expression.
    #[arg(long)]
    pub dport: Option<String>,
    #[arg(long)]
    pub icmp_type: Option<String>,
    #[arg(long)]
    pub icmp_code: Option<u8>,
    /// TCP flags the probe may carry, e.g. `S`; repeat for alternatives.
    #[arg(long = "flags", value_name = "FLAGS")]
    pub flags: Vec<String>,
    /// The probe belongs to an established connection.
    #[arg(long)]
    pub state: bool,
    /// Evaluate without tag or route-to side effects.
    #[arg(long)]
    pub match_only: bool,
    #[arg(long, default_value_t = DEFAULT_TTL)]
    pub ttl: u8,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    pub model: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Fail on warnings too.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Debug)]
pub struct GroupsArgs {
    pub model: PathBuf,
    /// Only show this group.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
