use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use firewatch_cli::{
    artifact_store::GitHubArtifactStore,
    config::{ConfigError, RuntimeConfig},
    github_api::GitHubClient,
    issue_source::GitHubIssueSource,
    run::{self, NotificationOutcome, RunError, RunOptions, RunReport},
    slack::SlackNotifier,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Alert when reactions on a repository's open issues spike between runs"
)]
struct Cli {
    /// Snapshot data file written for the next run (overrides FIREWATCH_DATA_FILE).
    #[arg(long, value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// Format alerts and log them instead of posting to Slack.
    #[arg(long)]
    dry_run: bool,
    /// Print the run summary as a v1 service envelope JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    User,
    Runtime,
}

#[derive(Debug, PartialEq, Eq)]
struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    fn user(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::User,
            message: message.into(),
        }
    }

    fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            message: message.into(),
        }
    }

    fn from_config(error: ConfigError) -> Self {
        AppError::user(error.to_string())
    }

    fn from_run(error: RunError) -> Self {
        AppError::runtime(run::error_chain(&error))
    }

    fn from_setup(error: &dyn std::error::Error) -> Self {
        AppError::runtime(run::error_chain(error))
    }

    fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::User => 2,
            ErrorKind::Runtime => 1,
        }
    }

    fn code(&self) -> &'static str {
        match self.kind {
            ErrorKind::User => "firewatch.user",
            ErrorKind::Runtime => "firewatch.runtime",
        }
    }
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).and_then(|report| render_report(&report, json)) {
        Ok(output) => {
            println!("{output}");
        }
        Err(error) => {
            error!(code = error.code(), "{}", error.message);
            if json {
                println!("{}", serialize_service_error(&error));
            }
            std::process::exit(error.exit_code());
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<RunReport, AppError> {
    run_with(cli, RuntimeConfig::from_env, |config, options| {
        let github = GitHubClient::new(config).map_err(|error| AppError::from_setup(&error))?;
        let source = GitHubIssueSource::new(github.clone(), config);
        let store = GitHubArtifactStore::new(github, config);
        let notifier = config
            .slack
            .as_ref()
            .map(SlackNotifier::new)
            .transpose()
            .map_err(|error| AppError::from_setup(&error))?;

        run::run_once(
            config,
            &source,
            &store,
            notifier.as_ref(),
            options,
            Utc::now(),
        )
        .map_err(AppError::from_run)
    })
}

fn run_with<LoadConfig, Execute>(
    cli: Cli,
    load_config: LoadConfig,
    execute: Execute,
) -> Result<RunReport, AppError>
where
    LoadConfig: Fn() -> Result<RuntimeConfig, ConfigError>,
    Execute: Fn(&RuntimeConfig, RunOptions) -> Result<RunReport, AppError>,
{
    let mut config = load_config().map_err(AppError::from_config)?;
    if let Some(data_file) = cli.data_file {
        config.data_file = data_file;
    }

    info!(
        repository = %config.repository(),
        threshold = config.alert_threshold,
        issue_age_months = config.issue_age_months,
        slack = config.slack.is_some(),
        dry_run = cli.dry_run,
        "firewatch run starting"
    );

    execute(
        &config,
        RunOptions {
            dry_run: cli.dry_run,
        },
    )
}

#[derive(Debug, Serialize)]
struct ServiceErrorEnvelope {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ServiceEnvelope {
    schema_version: &'static str,
    command: &'static str,
    ok: bool,
    result: Option<Value>,
    error: Option<ServiceErrorEnvelope>,
}

fn render_report(report: &RunReport, json: bool) -> Result<String, AppError> {
    if !json {
        return Ok(render_text(report));
    }

    let result = serde_json::to_value(report)
        .map_err(|error| AppError::runtime(format!("failed to serialize run report: {error}")))?;
    serde_json::to_string(&ServiceEnvelope {
        schema_version: "v1",
        command: "run",
        ok: true,
        result: Some(result),
        error: None,
    })
    .map_err(|error| AppError::runtime(format!("failed to serialize service envelope: {error}")))
}

fn render_text(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "{}: {} alert(s) above {} reactions for issues created since {}",
        report.repository,
        report.alerts.len(),
        report.threshold,
        report.cutoff
    )];

    for alert in &report.alerts {
        let change = match alert.previous_reaction_count {
            Some(previous) => format!("was {previous}"),
            None => "new".to_string(),
        };
        lines.push(format!(
            "  #{} {} - {} reactions ({change})",
            alert.id, alert.title, alert.reaction_count
        ));
    }

    let notification = match &report.notification {
        NotificationOutcome::NoAlerts => "none".to_string(),
        NotificationOutcome::Disabled => "disabled".to_string(),
        NotificationOutcome::DryRun => "dry-run".to_string(),
        NotificationOutcome::Sent => "sent".to_string(),
        NotificationOutcome::Failed(error) => format!("failed ({error})"),
    };
    let published = match &report.publish_error {
        None => "yes".to_string(),
        Some(error) => format!("no ({error})"),
    };
    lines.push(format!(
        "baseline: {} ({} entries), current: {} entries, published: {published}, notification: {notification}",
        report.baseline, report.previous_entries, report.current_entries
    ));

    lines.join("\n")
}

fn serialize_service_error(error: &AppError) -> String {
    let envelope = ServiceEnvelope {
        schema_version: "v1",
        command: "run",
        ok: false,
        result: None,
        error: Some(ServiceErrorEnvelope {
            code: error.code(),
            message: error.message.clone(),
            details: None,
        }),
    };

    serde_json::to_string(&envelope).unwrap_or_else(|serialize_error| {
        serde_json::json!({
            "schema_version": "v1",
            "command": "run",
            "ok": false,
            "result": Value::Null,
            "error": {
                "code": "internal.serialize",
                "message": format!("failed to serialize service error envelope: {serialize_error}"),
                "details": Value::Null,
            }
        })
        .to_string()
    })
}
