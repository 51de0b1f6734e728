use crate::cmd::{block_on, open_store};
use crate::output::{or_dash, print_json, print_table};
use crate::root::Paths;
use anyhow::Context;
use clap::Subcommand;
use shutter_core::condition::{find_condition, REACHABLE};
use shutter_core::driver::SHELLY25_ROLLER;
use shutter_core::meta::ObjectKey;
use shutter_core::types::DeviceRecord;

#[derive(Subcommand)]
pub enum DeviceSubcommand {
    /// Register a roller shutter
    Add {
        /// Device key: <namespace>/<name> or <name>
        key: ObjectKey,
        /// Base URL of the device's HTTP API
        #[arg(long)]
        url: String,
        /// Device class
        #[arg(long = "type", value_name = "TYPE", default_value = SHELLY25_ROLLER)]
        device_type: String,
        /// Desired position (0-100), used in direct mode
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        position: Option<u8>,
    },

    /// Set the desired position used in direct mode (omit to clear it)
    SetPosition {
        key: ObjectKey,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        position: Option<u8>,
    },

    /// List roller shutters
    List {
        #[arg(long)]
        namespace: Option<String>,
    },
}

pub fn run(paths: &Paths, subcmd: DeviceSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        DeviceSubcommand::Add {
            key,
            url,
            device_type,
            position,
        } => add(paths, &key, url, device_type, position, json),
        DeviceSubcommand::SetPosition { key, position } => set_position(paths, &key, position),
        DeviceSubcommand::List { namespace } => list(paths, namespace.as_deref(), json),
    }
}

fn add(
    paths: &Paths,
    key: &ObjectKey,
    url: String,
    device_type: String,
    position: Option<u8>,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    let mut record = DeviceRecord::new(key, device_type, url);
    record.spec.position = position;

    let created = block_on(store.create_device(record))?
        .with_context(|| format!("failed to create RollerShutter {key}"))?;

    if json {
        print_json(&created)
    } else {
        println!("Created RollerShutter {key}");
        Ok(())
    }
}

fn set_position(paths: &Paths, key: &ObjectKey, position: Option<u8>) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    block_on(async {
        let mut device = store
            .get_device(key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("RollerShutter {key} not found"))?;
        device.spec.position = position;
        store.update_device(&device).await?;
        Ok::<_, anyhow::Error>(())
    })?
    .with_context(|| format!("failed to update RollerShutter {key}"))?;

    match position {
        Some(p) => println!("RollerShutter {key} target set to {p}"),
        None => println!("RollerShutter {key} target cleared"),
    }
    Ok(())
}

fn list(paths: &Paths, namespace: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    let mut devices = block_on(store.list_devices(namespace))?
        .context("failed to list RollerShutters")?;
    devices.sort_by_key(DeviceRecord::key);

    if json {
        return print_json(&devices);
    }
    if devices.is_empty() {
        println!("No roller shutters.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = devices
        .iter()
        .map(|d| {
            vec![
                d.metadata.namespace.clone(),
                d.metadata.name.clone(),
                d.spec.device_type.clone(),
                or_dash(d.status.phase),
                d.status.position.to_string(),
                or_dash(d.spec.position),
                or_dash(
                    find_condition(&d.status.conditions, REACHABLE).map(|c| c.status.as_str()),
                ),
            ]
        })
        .collect();
    print_table(
        &["NAMESPACE", "NAME", "TYPE", "PHASE", "POSITION", "TARGET", "REACHABLE"],
        &rows,
    );
    Ok(())
}
