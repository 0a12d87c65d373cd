use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use firewatch_core::{AlertRecord, Baseline, CodecError, build_snapshot, decode, diff, encode};

use crate::artifact_store::SnapshotStore;
use crate::config::RuntimeConfig;
use crate::issue_source::{IssueSource, SourceError, cutoff_date};
use crate::slack::{Notifier, format_alerts};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Format the notification but never deliver it.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "kebab-case")]
pub enum NotificationOutcome {
    /// No alert qualified, so nothing was formatted.
    NoAlerts,
    /// Slack credentials are not configured.
    Disabled,
    DryRun,
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub repository: String,
    pub cutoff: String,
    pub threshold: u64,
    pub baseline: &'static str,
    pub baseline_warning: Option<String>,
    pub previous_entries: usize,
    pub current_entries: usize,
    pub alerts: Vec<AlertRecord>,
    pub published: bool,
    pub publish_error: Option<String>,
    pub notification: NotificationOutcome,
}

/// One pass: load baseline, search, build, diff, publish, notify.
///
/// Only a failed search or an unencodable snapshot aborts the run. A missing
/// or unusable baseline, a failed publish, and a failed notification are
/// logged and recorded in the report.
pub fn run_once<Source, Store, Notify>(
    config: &RuntimeConfig,
    source: &Source,
    store: &Store,
    notifier: Option<&Notify>,
    options: RunOptions,
    now: DateTime<Utc>,
) -> Result<RunReport, RunError>
where
    Source: IssueSource + ?Sized,
    Store: SnapshotStore + ?Sized,
    Notify: Notifier + ?Sized,
{
    let (baseline, baseline_warning) = load_baseline(store);
    info!(
        baseline = baseline.status(),
        entries = baseline.entry_count(),
        "previous snapshot resolved"
    );

    let cutoff = cutoff_date(now, config.issue_age_months);
    let records = source.search(cutoff).map_err(RunError::Source)?;
    let current = build_snapshot(&records);
    info!(
        records = records.len(),
        entries = current.len(),
        %cutoff,
        "current snapshot built"
    );

    let alerts = diff(&baseline, &current, config.alert_threshold);
    info!(alerts = alerts.len(), threshold = config.alert_threshold, "alerts computed");

    let encoded = encode(&current).map_err(RunError::Encode)?;
    let publish_error = match store.publish(&encoded) {
        Ok(()) => None,
        Err(error) => {
            warn!(
                error = %error_chain(&error),
                "failed to publish snapshot; next run will compare against an older baseline"
            );
            Some(error_chain(&error))
        }
    };

    let notification = notify(config, notifier, &alerts, options);

    Ok(RunReport {
        repository: config.repository(),
        cutoff: cutoff.format("%Y-%m-%d").to_string(),
        threshold: config.alert_threshold,
        baseline: baseline.status(),
        baseline_warning,
        previous_entries: baseline.entry_count(),
        current_entries: current.len(),
        alerts,
        published: publish_error.is_none(),
        publish_error,
        notification,
    })
}

fn load_baseline<Store>(store: &Store) -> (Baseline, Option<String>)
where
    Store: SnapshotStore + ?Sized,
{
    match store.fetch_latest() {
        Ok(Some(bytes)) => {
            let baseline = decode(&bytes);
            let warning = match &baseline {
                Baseline::Loaded(_) | Baseline::Empty => None,
                Baseline::VersionMismatch { found } => Some(format!(
                    "previous snapshot has format version {}; starting from an empty baseline",
                    found.as_deref().unwrap_or("<none>")
                )),
                Baseline::Unreadable { reason } => Some(format!(
                    "previous snapshot is unreadable ({reason}); starting from an empty baseline"
                )),
            };
            if let Some(message) = &warning {
                warn!("{message}");
            }
            (baseline, warning)
        }
        Ok(None) => {
            info!("no previous snapshot found");
            (Baseline::Empty, None)
        }
        Err(error) => {
            let message = format!(
                "unable to download previous snapshot ({}); starting from an empty baseline",
                error_chain(&error)
            );
            warn!("{message}");
            (Baseline::Empty, Some(message))
        }
    }
}

fn notify<Notify>(
    config: &RuntimeConfig,
    notifier: Option<&Notify>,
    alerts: &[AlertRecord],
    options: RunOptions,
) -> NotificationOutcome
where
    Notify: Notifier + ?Sized,
{
    if alerts.is_empty() {
        return NotificationOutcome::NoAlerts;
    }

    let channel = config.slack.as_ref().map(|slack| slack.channel.as_str());
    let message = format_alerts(alerts, config, channel);
    let rendered = render_payload(&message);

    if options.dry_run {
        info!(payload = %rendered, "dry run: notification not sent");
        return NotificationOutcome::DryRun;
    }

    let Some(notifier) = notifier else {
        info!(payload = %rendered, "slack is not configured: notification not sent");
        return NotificationOutcome::Disabled;
    };

    match notifier.send(&message) {
        Ok(()) => {
            info!(alerts = alerts.len(), "notification sent");
            NotificationOutcome::Sent
        }
        Err(error) => {
            let message = error_chain(&error);
            warn!(error = %message, "failed to send notification");
            NotificationOutcome::Failed(message)
        }
    }
}

fn render_payload<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        warn!(error = %error, "failed to render notification payload");
        format!("<unrenderable payload: {error}>")
    })
}

/// Renders an error with its `source()` chain, outermost first.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("issue search failed")]
    Source(#[source] SourceError),
    #[error("failed to encode current snapshot")]
    Encode(#[source] CodecError),
}
