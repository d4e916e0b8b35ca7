use anyhow::{bail, Context, Result};
use fwprobe::equipment::Firewall;
use fwprobe::model::load_model;
use fwprobe::report::render_groups;

use crate::cli::GroupsArgs;

pub fn run_groups(args: GroupsArgs) -> Result<()> {
    let model = load_model(&args.model)
        .with_context(|| format!("failed to load {}", args.model.display()))?;
    let Firewall::AccessList(firewall) = &model.equipment.firewall else {
        bail!("{} is a packet-filter model; it has no object groups", model.equipment.name);
    };
    if let Some(name) = &args.name {
        if firewall.groups().id(name).is_none() {
            bail!("unknown object-group '{name}'");
        }
    }

    let text = render_groups(firewall.groups(), args.name.as_deref())?;
    if text.is_empty() {
        println!("no object groups");
    } else {
        println!("{text}");
    }
    Ok(())
}
