//! End-to-end walkthrough: admit a manifest, watch it run, drain.
//!
//! ```sh
//! cargo run --example load_and_list
//! ```

use std::time::Duration;

use jobvisor::{Domain, Manager, UnloadTarget};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("jobvisor=debug")
        .init();

    let root = std::env::temp_dir().join(format!("jobvisor-demo-{}", std::process::id()));
    let jobs_dir = root.join("jobs.d");
    std::fs::create_dir_all(&jobs_dir)?;
    std::fs::create_dir_all(root.join("state"))?;
    std::fs::write(
        jobs_dir.join("ticker.json"),
        serde_json::json!({
            "Label": "demo.ticker",
            "ProgramArguments": ["sleep", "30"],
        })
        .to_string(),
    )?;

    let domain = Domain::new("demo", root.join("state"), vec![jobs_dir]);
    let mut manager = Manager::new(domain)?;

    // Startup admits everything on the load paths and bootstraps it.
    manager.start_running()?;
    for row in manager.list() {
        println!("loaded: {} pid={}", row.label, row.pid);
    }

    // A few ticks of steady state.
    for _ in 0..3 {
        manager.run_once(Some(Duration::from_millis(200))).await?;
    }

    // Ask the job to leave, then drain to completion.
    manager.unload(UnloadTarget::Label("demo.ticker"), false, false)?;
    manager.stop_running()?;
    while manager.handle_event(Some(Duration::from_millis(200))).await? {}

    println!("manager finished, {} jobs remain", manager.list().len());
    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}
