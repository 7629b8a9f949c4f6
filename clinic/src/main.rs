//! Clinic demo
//!
//! Drives the booking core end to end against in-memory storage: a
//! department, a doctor and a morning schedule, more patients racing for the
//! schedule than it has units, a cancellation that frees a unit for the
//! patient who missed out, and the resulting projections.
//!
//! ```bash
//! LOG_FILTER=clinic=debug cargo run -p clinic
//! ```

use anyhow::Context;
use chrono::{Days, NaiveTime};
use clinic::{ClinicApp, Config, NewDoctor, NewPatient};
use clinic_core::environment::{Clock, SystemClock};
use clinic_core::{ClinicError, ScheduleRequest, SlotCategory};
use clinic_runtime::{MetricsRecorder, RetryPolicy, retry_with_predicate};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const CAPACITY: u32 = 10;
const PATIENTS: usize = 12;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("invalid configuration")?;
    let metrics = if config.observability.metrics_enabled {
        Some(MetricsRecorder::install()?)
    } else {
        None
    };

    let clock = Arc::new(SystemClock);
    let app = ClinicApp::builder()
        .with_config(config)
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .build()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = app.spawn_reconciler(shutdown_rx.clone());
    let observer = spawn_event_log(&app, shutdown_rx);

    // Directory
    let department = app.directory().create_department("Cardiology").await?;
    let doctor = app
        .directory()
        .register_doctor(NewDoctor {
            name: "Dr. Zhang Wei".to_string(),
            department: Some(department.name.clone()),
            specialty: Some("Arrhythmia".to_string()),
        })
        .await?;

    let mut patients = Vec::with_capacity(PATIENTS);
    for n in 0..PATIENTS {
        patients.push(
            app.directory()
                .register_patient(NewPatient {
                    name: format!("Patient {n}"),
                    identity_id: "110101199003071234".to_string(),
                    phone: format!("1380000{n:04}"),
                })
                .await?,
        );
    }

    // Tomorrow morning
    let date = clock
        .today()
        .checked_add_days(Days::new(1))
        .context("date out of range")?;
    let schedule = app
        .coordinator()
        .publish_schedule(
            ScheduleRequest::new(
                doctor.id.clone(),
                date,
                NaiveTime::from_hms_opt(9, 0, 0).context("invalid time")?,
                NaiveTime::from_hms_opt(12, 0, 0).context("invalid time")?,
                SlotCategory::Morning,
            )
            .with_capacity(CAPACITY),
        )
        .await?;

    // Everyone races for the same schedule; Busy is retried with backoff
    let schedule_id = schedule.id;
    let attempts = patients.iter().map(|patient| {
        let coordinator = app.coordinator().clone();
        let patient_id = patient.id.clone();
        async move {
            retry_with_predicate(
                RetryPolicy::default(),
                || coordinator.book(patient_id.clone(), schedule_id),
                ClinicError::is_retryable,
            )
            .await
        }
    });
    let results = join_all(attempts).await;

    let mut booked = Vec::new();
    let mut turned_away = Vec::new();
    for (patient, result) in patients.iter().zip(results) {
        match result {
            Ok(reservation) => booked.push(reservation),
            Err(ClinicError::ScheduleFull { .. }) => turned_away.push(patient.id.clone()),
            Err(err) => return Err(err.into()),
        }
    }
    tracing::info!(
        booked = booked.len(),
        turned_away = turned_away.len(),
        "Booking race finished"
    );

    // One cancellation frees a unit for the first patient turned away
    if let (Some(first), Some(waiting)) = (booked.first(), turned_away.first()) {
        app.coordinator().cancel(first.id.clone()).await?;
        let rebooked = app.coordinator().book(waiting.clone(), schedule.id).await?;
        tracing::info!(reservation_id = %rebooked.id, "Waiting patient booked");
    }
    if let Some(last) = booked.last() {
        app.coordinator().complete(last.id.clone()).await?;
    }

    // Projections
    let summary = app.queries().schedule_summary(&schedule.id).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let free = app
        .queries()
        .department_free_slots(&department.name, date, date)
        .await?;
    println!("free schedules in {}: {}", department.name, free.len());

    let agenda = app.queries().doctor_agenda(&doctor.id, date).await?;
    println!("{} has {} booked visits on {date}", doctor.name, agenda.len());

    let audit = app.coordinator().audit(schedule.id).await?;
    println!("{}", serde_json::to_string(&audit)?);

    // Shutdown
    shutdown_tx.send(true).ok();
    reconciler.await?;
    observer.await?;

    if let Some(rendered) = metrics.as_ref().and_then(MetricsRecorder::render) {
        println!("{rendered}");
    }
    Ok(())
}

/// Logs every committed event as JSON until shutdown
fn spawn_event_log(app: &ClinicApp, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    let mut events = app.coordinator().subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => tracing::debug!(event = %json, "Clinic event"),
                        Err(err) => tracing::warn!(error = %err, "Unserializable event"),
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event log lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
