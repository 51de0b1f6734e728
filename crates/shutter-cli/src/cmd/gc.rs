use crate::cmd::{block_on, load_config, open_store};
use crate::output::print_json;
use crate::root::Paths;
use anyhow::Context;
use shutter_core::selector::Collector;

pub fn run(paths: &Paths, namespace: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    let store = open_store(paths)?;
    let collector = Collector::new(store, config.request_history_limit, config.call_timeout());

    let deleted = block_on(collector.collect(namespace))?.context("garbage collection failed")?;

    if json {
        let keys: Vec<String> = deleted.iter().map(ToString::to_string).collect();
        return print_json(&serde_json::json!({ "deleted": keys }));
    }
    if deleted.is_empty() {
        println!("Nothing to collect.");
    }
    for key in &deleted {
        println!("deleted RollerShutterRequest {key}");
    }
    Ok(())
}
