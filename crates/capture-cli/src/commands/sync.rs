use capture_core::sync::{HttpRemoteAuthority, SyncReport, SyncScheduler};
use capture_core::MutationContext;
use tokio::sync::watch;

use crate::commands::common::{short_id, GlobalArgs};
use crate::error::CliError;

pub async fn run_sync(watch: bool, as_json: bool, global: &GlobalArgs) -> Result<(), CliError> {
    let settings = global.settings()?;
    let Some(remote_url) = settings.sync.remote_url.clone() else {
        return Err(CliError::SyncNotConfigured);
    };
    let remote = HttpRemoteAuthority::new(remote_url, settings.access_token.clone())?;
    let ctx = MutationContext::new(settings.actor.clone())?;
    let engine = global.open_engine().await?;

    if !watch {
        let report = engine
            .sync_once(&ctx, remote, &settings.sync.tables)
            .await?;
        print_report(&report, as_json)?;
        return Ok(());
    }

    tracing::info!(
        profile = %settings.profile,
        interval_secs = settings.sync.interval_secs,
        "Watching for changes; press Ctrl+C to stop"
    );
    let scheduler = SyncScheduler::new(engine.reconciler(remote), ctx, settings.sync);

    let run = scheduler.run();
    tokio::pin!(run);
    let printer = print_reports(scheduler.reports(), as_json);
    tokio::pin!(printer);

    tokio::select! {
        result = &mut run => return Ok(result?),
        () = &mut printer => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Received Ctrl+C, stopping sync...");
            scheduler.shutdown();
        }
    }

    run.await?;
    Ok(())
}

async fn print_reports(mut reports: watch::Receiver<Option<SyncReport>>, as_json: bool) {
    while reports.changed().await.is_ok() {
        let report = reports.borrow_and_update().clone();
        if let Some(report) = report {
            if let Err(error) = print_report(&report, as_json) {
                tracing::warn!(%error, "Failed to print sync report");
            }
        }
    }
}

pub fn print_report(report: &SyncReport, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for line in format_report_lines(report) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync completed: pulled {}, pushed {}, push conflicts {}, deferred {}, rejected {}",
        report.pulled, report.pushed, report.push_conflicts, report.deferred, report.rejected
    )];
    for conflicted in &report.conflicted {
        lines.push(format!(
            "  conflict  {}/{}  winner={}  losing={}",
            conflicted.table,
            short_id(&conflicted.record_id),
            conflicted.winner,
            conflicted
                .conflicts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        ));
    }
    for gap in &report.gaps {
        lines.push(format!(
            "  gap       {}/{}  missing={}",
            gap.table,
            short_id(&gap.record_id),
            gap.missing
        ));
    }
    lines
}
