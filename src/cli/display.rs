//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::{ExampleFiles, ToolCheck, ValidationResult};
use crate::config::{Environment, ExecutionMode, InitReport};
use crate::orchestrator::{AccessInfo, DownSummary, EnvironmentStatus};
use crate::tools::{ClusterInfo, ClusterState, ReleaseState};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No services found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Up / down
// ============================================================================

/// Summary printed after `plat up`
pub fn format_access_info(info: &AccessInfo) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "✓ Environment '{}' is ready ({} mode)\n\n",
        info.environment, info.mode
    ));
    output.push_str(&format!("  Cluster:   {}\n", info.cluster));
    output.push_str(&format!("  Namespace: {}\n", info.namespace));

    if !info.endpoints.is_empty() {
        output.push_str("\nAccess URLs:\n");
        let width = info
            .endpoints
            .iter()
            .map(|e| e.service.len())
            .max()
            .unwrap_or(0);
        for endpoint in &info.endpoints {
            output.push_str(&format!(
                "  {:width$}  {}\n",
                endpoint.service,
                endpoint.url,
                width = width
            ));
        }
    }

    if info.mode == ExecutionMode::Local && !info.local_sources.is_empty() {
        output.push_str("\nLocal sources:\n");
        for (service, path) in &info.local_sources {
            output.push_str(&format!("  {}: {}\n", service, path.display()));
        }
    }

    output.push_str("\nManage the environment:\n");
    output.push_str("  plat status          Show service status\n");
    output.push_str("  plat logs <service>  Stream service logs\n");
    output.push_str("  plat down            Remove all services\n");

    output
}

pub fn format_down_summary(summary: &DownSummary) -> String {
    let mut output = String::new();

    if let Some(error) = &summary.undeploy_error {
        output.push_str(&format!("⚠ Service removal incomplete: {}\n", error));
    } else {
        output.push_str(&format!(
            "✓ Removed {} service(s)\n",
            summary.undeploy.removed.len()
        ));
        if !summary.undeploy.skipped.is_empty() {
            output.push_str(&format!(
                "  Not deployed: {}\n",
                summary.undeploy.skipped.join(", ")
            ));
        }
        for failure in &summary.undeploy.failed {
            output.push_str(&format!("  ✗ {}\n", failure));
        }
    }

    if summary.cluster_deleted {
        output.push_str("✓ Cluster deleted\n");
    }

    output
}

// ============================================================================
// Status display
// ============================================================================

fn release_state_label(state: &ReleaseState) -> String {
    match state {
        ReleaseState::Deployed => "deployed".to_string(),
        ReleaseState::NotDeployed => "not deployed".to_string(),
        other => other.to_string(),
    }
}

/// Format environment status for display. `detailed` adds chart, update
/// time and query errors.
pub fn format_status(status: &EnvironmentStatus, detailed: bool) -> String {
    let mut output = String::new();

    output.push_str(&format!("Environment: {} ({} mode)\n", status.name, status.mode));

    let cluster = &status.cluster;
    match cluster.state {
        ClusterState::Running => output.push_str(&format!(
            "Cluster:     {} running ({} server(s), {} agent(s))\n",
            cluster.name, cluster.servers, cluster.agents
        )),
        ref state => {
            output.push_str(&format!("Cluster:     {} {}\n", cluster.name, state));
            if let Some(error) = &cluster.error {
                output.push_str(&format!("             {}\n", error));
            }
        }
    }
    output.push_str(&format!(
        "Services:    {}/{} deployed\n\n",
        status.deployed_count(),
        status.services.len()
    ));

    let mut headers = vec!["SERVICE", "STATUS", "VERSION", "SOURCE", "PORTS"];
    if detailed {
        headers.extend(["CHART", "UPDATED"]);
    }

    let rows: Vec<Vec<String>> = status
        .services
        .values()
        .map(|s| {
            let source = match (&s.local_path, s.is_local) {
                (Some(path), true) => path.display().to_string(),
                (None, true) => "local".to_string(),
                _ => "registry".to_string(),
            };
            let ports = s
                .ports
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");

            let mut row = vec![
                s.name.clone(),
                release_state_label(&s.state),
                s.version.clone(),
                source,
                ports,
            ];
            if detailed {
                row.push(s.chart.clone());
                row.push(s.updated.clone());
            }
            row
        })
        .collect();

    output.push_str(&format_table(&headers, rows));

    if detailed {
        for service in status.services.values() {
            if let Some(error) = &service.error {
                output.push_str(&format!("\n{}: {}", service.name, error));
            }
        }
    }

    output
}

// ============================================================================
// Doctor display
// ============================================================================

pub fn format_doctor(checks: &[ToolCheck]) -> String {
    let mut output = String::new();

    for check in checks {
        match (&check.version, &check.error) {
            (Some(version), _) => {
                output.push_str(&format!("✓ {:8} {}\n", check.name, version));
            }
            (None, error) => {
                let marker = if check.required { "✗" } else { "-" };
                output.push_str(&format!(
                    "{} {:8} {}\n",
                    marker,
                    check.name,
                    error.as_deref().unwrap_or("not available")
                ));
            }
        }
    }

    let missing: Vec<&ToolCheck> = checks.iter().filter(|c| !c.ok()).collect();
    if !missing.is_empty() {
        output.push_str("\nInstall:\n");
        for check in missing {
            output.push_str(&format!("  {}: {}\n", check.name, check.install_hint));
        }
    }

    output
}

/// Clusters created by plat, as listed by `plat doctor`
pub fn format_cluster_list(clusters: &[ClusterInfo]) -> String {
    if clusters.is_empty() {
        return "No plat clusters found.\n".to_string();
    }
    let rows = clusters
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                c.state.to_string(),
                c.servers.to_string(),
                c.agents.to_string(),
            ]
        })
        .collect();
    format_table(&["CLUSTER", "STATE", "SERVERS", "AGENTS"], rows)
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, path: &str) -> String {
    let mut output = String::new();

    if result.valid {
        output.push_str(&format!("✓ {} is valid\n\n", path));
    } else {
        output.push_str(&format!("✗ {} is invalid\n\n", path));
    }

    if let Some(ref error) = result.error {
        output.push_str(&format!("  Error: {}\n", error));
        return output;
    }

    if let Some(ref name) = result.environment {
        output.push_str(&format!("  Environment: {}\n", name));
    }
    output.push_str(&format!("  Services:    {}\n", result.services));
    for (i, level) in result.levels.iter().enumerate() {
        output.push_str(&format!("  Level {}:     {}\n", i, level.join(", ")));
    }

    if !result.warnings.is_empty() {
        output.push_str("\nWarnings:\n");
        for (service, warnings) in &result.warnings {
            for warning in warnings {
                output.push_str(&format!("  {}: {}\n", service, warning));
            }
        }
    }

    output
}

// ============================================================================
// Init / config
// ============================================================================

pub fn format_init_report(report: &InitReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "✓ Environment '{}' initialized ({} template)\n\n",
        report.project, report.template
    ));
    output.push_str(&format!("  Configuration: {}\n", report.config_path.display()));
    output.push_str(&format!("  Local sources: {}\n", report.local_path.display()));
    if !report.local_sources.is_empty() {
        output.push_str(&format!(
            "  Found {} local checkout(s): {}\n",
            report.local_sources.len(),
            report.local_sources.join(", ")
        ));
    }
    if report.gitignore_updated {
        output.push_str("  Added local.yml to .gitignore\n");
    }

    output.push_str("\nNext steps:\n");
    output.push_str("  1. Review and customize the configuration\n");
    output.push_str("  2. Declare local sources in local.yml\n");
    output.push_str("  3. Run 'plat up' to start the environment\n");
    output.push_str("  4. Run 'plat status' to check service health\n");

    output
}

/// Resolved configuration, as shown by `plat config show`
pub fn format_environment(env: &Environment) -> String {
    let mut output = String::new();

    output.push_str(&format!("Environment: {}\n", env.name));
    output.push_str(&format!("  Mode:      {}\n", env.mode));
    output.push_str(&format!("  Registry:  {}\n", env.defaults.registry));
    output.push_str(&format!("  Domain:    {}\n", env.defaults.domain));
    output.push_str(&format!("  Namespace: {}\n", env.defaults.namespace));
    output.push_str(&format!("  Services:  {}\n", env.services.len()));

    for service in env.services.values() {
        output.push_str(&format!("\n{}:\n", service.name));
        match service.local_source.as_ref().filter(|_| service.is_local) {
            Some(source) => {
                output.push_str(&format!("  Source:       local ({})\n", source.path.display()));
                output.push_str(&format!("  Build:        {}\n", source.dockerfile));
            }
            None => {
                output.push_str("  Source:       registry\n");
                output.push_str(&format!("  Version:      {}\n", service.version));
            }
        }

        output.push_str(&format!("  Chart:        {}", service.chart.name));
        if let Some(repository) = &service.chart.repository {
            output.push_str(&format!(" ({})", repository));
        }
        output.push('\n');

        if !service.ports.is_empty() {
            let ports: Vec<String> = service.ports.iter().map(u32::to_string).collect();
            output.push_str(&format!("  Ports:        {}\n", ports.join(", ")));
        }
        if !service.environment.is_empty() {
            output.push_str(&format!(
                "  Environment:  {} variable(s)\n",
                service.environment.len()
            ));
        }
        if !service.dependencies.is_empty() {
            output.push_str(&format!(
                "  Dependencies: {}\n",
                service.dependencies.join(", ")
            ));
        }
    }

    output
}

pub fn format_example(files: &ExampleFiles) -> String {
    format!(
        "# Example plat configuration\n# Save as .plat/config.yml\n\n{}\n\n# Example local sources\n# Save as .plat/local.yml (gitignored)\n\n{}",
        files.config, files.local
    )
}
