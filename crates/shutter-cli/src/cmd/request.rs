use crate::cmd::{block_on, open_store};
use crate::output::{print_json, print_table};
use crate::root::Paths;
use anyhow::Context;
use clap::Subcommand;
use shutter_core::condition::{find_condition, COMPLETED};
use shutter_core::meta::ObjectKey;
use shutter_core::types::MoveRequest;

#[derive(Subcommand)]
pub enum RequestSubcommand {
    /// Queue a move of a roller shutter to a position
    Create {
        /// Request key: <namespace>/<name> or <name>
        key: ObjectKey,
        /// Name of the target RollerShutter, in the request's namespace
        #[arg(long)]
        device: String,
        /// Target position (0 = closed, 100 = open)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        position: u8,
    },

    /// List requests, oldest first
    List {
        #[arg(long)]
        namespace: Option<String>,
        /// Only requests targeting this RollerShutter name
        #[arg(long)]
        device: Option<String>,
    },
}

pub fn run(paths: &Paths, subcmd: RequestSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RequestSubcommand::Create {
            key,
            device,
            position,
        } => create(paths, &key, device, position, json),
        RequestSubcommand::List { namespace, device } => {
            list(paths, namespace.as_deref(), device.as_deref(), json)
        }
    }
}

fn create(
    paths: &Paths,
    key: &ObjectKey,
    device: String,
    position: u8,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    let request = MoveRequest::new(key, device, position);
    let device_key = request.device_key();

    let (created, device_exists) = block_on(async {
        let created = store.create_request(request).await?;
        let exists = store.get_device(&device_key).await?.is_some();
        Ok::<_, shutter_core::ShutterError>((created, exists))
    })?
    .with_context(|| format!("failed to create RollerShutterRequest {key}"))?;

    if !device_exists {
        eprintln!("warning: RollerShutter {device_key} does not exist (yet)");
    }
    if json {
        print_json(&created)
    } else {
        println!("Created RollerShutterRequest {key} -> {device_key} at {position}");
        Ok(())
    }
}

fn list(
    paths: &Paths,
    namespace: Option<&str>,
    device: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(paths)?;
    let mut requests = block_on(store.list_requests(namespace))?
        .context("failed to list RollerShutterRequests")?;
    if let Some(device) = device {
        requests.retain(|r| r.spec.roller_shutter.name == device);
    }
    requests.sort_by(|a, b| {
        (&a.metadata.namespace, a.metadata.creation_timestamp, &a.metadata.name).cmp(&(
            &b.metadata.namespace,
            b.metadata.creation_timestamp,
            &b.metadata.name,
        ))
    });

    if json {
        return print_json(&requests);
    }
    if requests.is_empty() {
        println!("No requests.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = requests
        .iter()
        .map(|r| {
            let completed = find_condition(&r.status.conditions, COMPLETED);
            vec![
                r.metadata.namespace.clone(),
                r.metadata.name.clone(),
                r.spec.roller_shutter.name.clone(),
                r.spec.position.to_string(),
                r.status.phase.to_string(),
                completed.map_or_else(|| "-".to_string(), |c| c.reason.clone()),
                r.metadata.creation_timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            ]
        })
        .collect();
    print_table(
        &["NAMESPACE", "NAME", "DEVICE", "TARGET", "PHASE", "REASON", "CREATED"],
        &rows,
    );
    Ok(())
}
