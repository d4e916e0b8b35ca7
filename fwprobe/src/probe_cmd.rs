use anyhow::{bail, Context, Result};
use fwprobe::model::load_model;
use fwprobe::report::{build_probe_report, render_probe_text};
use match_core::icmp::parse_icmp_type;
use match_core::proto::parse_protocol;
use match_core::{
    AddrRange, Link, PortSpec, Probe, ProbeOptions, ProbeRequest, ProtocolSet, TcpFlags,
};

use crate::cli::{OutputFormat, ProbeArgs};

pub fn run_probe(args: ProbeArgs) -> Result<()> {
    let model = load_model(&args.model)
        .with_context(|| format!("failed to load {}", args.model.display()))?;
    let equipment = &model.equipment;

    for iface in std::iter::once(&args.ingress).chain(args.egress.as_ref()) {
        if !equipment.interfaces.is_empty() && !equipment.has_interface(iface) {
            bail!("unknown interface '{iface}' on {}", equipment.name);
        }
    }

    let source: AddrRange = args
        .src
        .parse()
        .with_context(|| format!("invalid --src {}", args.src))?;
    let destination: AddrRange = args
        .dst
        .parse()
        .with_context(|| format!("invalid --dst {}", args.dst))?;

    let protocols = if args.protocols.is_empty() {
        None
    } else {
        let numbers = args
            .protocols
            .iter()
            .map(|raw| parse_protocol(raw))
            .collect::<Result<Vec<u8>, _>>()
            .context("invalid --proto")?;
        Some(ProtocolSet::new(numbers))
    };
    let source_port = args
        .sport
        .as_deref()
        .map(str::parse::<PortSpec>)
        .transpose()
        .context("invalid --sport")?;
    let destination_port = args
        .dport
        .as_deref()
        .map(str::parse::<PortSpec>)
        .transpose()
        .context("invalid --dport")?;
    let icmp_type = args
        .icmp_type
        .as_deref()
        .map(parse_icmp_type)
        .transpose()
        .context("invalid --icmp-type")?;
    let tcp_flags = args
        .flags
        .iter()
        .map(|raw| raw.parse::<TcpFlags>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid --flags")?;

    let request = ProbeRequest {
        protocols,
        source_port,
        destination_port,
        icmp_type,
        icmp_code: args.icmp_code,
        tcp_flags,
        options: ProbeOptions {
            state: args.state,
            match_only: args.match_only,
        },
    };
    let probe = Probe::new(source, destination, request)
        .context("source and destination must share an address family")?
        .with_ttl(args.ttl);

    let ingress = Link::new(args.ingress.clone());
    let egress = args.egress.clone().map(Link::new);
    let probes = equipment
        .traverse(probe, &ingress, egress.as_ref())
        .with_context(|| format!("evaluation failed on {}", equipment.name))?;

    let report = build_probe_report(&equipment.name, &probes);
    match args.format {
        OutputFormat::Text => println!("{}", render_probe_text(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
