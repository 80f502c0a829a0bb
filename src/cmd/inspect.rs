//! Read-only views of persisted state (`buildbay projects|status|logs`).

use anyhow::{Context, Result, bail};

use buildbay::config::OrchestratorConfig;
use buildbay::orchestrator::Orchestrator;

pub fn cmd_projects(config: OrchestratorConfig) -> Result<()> {
    let orchestrator = Orchestrator::new(config);
    let projects = orchestrator.list_buildable_projects();
    if projects.is_empty() {
        println!(
            "No buildable projects in {}",
            orchestrator.config().paths.projects_dir.display()
        );
        return Ok(());
    }
    for name in projects {
        println!("{}", name);
    }
    Ok(())
}

pub fn cmd_status(config: OrchestratorConfig, project: &str) -> Result<()> {
    let orchestrator = Orchestrator::new(config);
    let record = orchestrator.get_status(project)?;
    let json = serde_json::to_string_pretty(&record).context("Failed to render status")?;
    println!("{}", json);
    Ok(())
}

pub fn cmd_logs(config: OrchestratorConfig, project: &str) -> Result<()> {
    let orchestrator = Orchestrator::new(config);
    match orchestrator.get_log(project)? {
        Some(log) => {
            println!("{}", log);
            Ok(())
        }
        None => bail!("No logs available for {}", project),
    }
}
