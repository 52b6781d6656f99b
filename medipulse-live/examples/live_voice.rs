//! MediBot Live Voice Demo
//!
//! Talk to the MediPulse assistant through your microphone and speakers.
//! Tool calls are printed instead of touching real app data.
//!
//! # Usage
//!
//! ```bash
//! export GEMINI_API_KEY="your-api-key"
//! cargo run --example live_voice --features full
//! cargo run --example live_voice --features full -- --admin
//! ```
//!
//! Press Ctrl+C to hang up.

use medipulse_live::device::{CpalInput, CpalOutput};
use medipulse_live::gemini::{GeminiBackend, GeminiLiveConnector};
use medipulse_live::telemetry::init_tracing;
use medipulse_live::{
    Appointment, AppointmentRemoval, AppointmentStatus, AppointmentUpdate, AudioDevices, Booking, ContextSnapshot,
    FnToolHandler, HealthMetric, LiveAssistant, LiveConfig, Modality, NewSpecialist, ProfileUpdate, SessionObserver,
    SessionStatus, Specialist, ToolHandlers,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_status(&self, status: SessionStatus) {
        info!(%status, "Status");
    }

    fn on_volume(&self, level: f32) {
        let bars = (level * 40.0).round() as usize;
        tracing::trace!(level, "{}", "#".repeat(bars));
    }
}

fn demo_snapshot(admin: bool) -> ContextSnapshot {
    let snapshot = ContextSnapshot::new("Amina")
        .with_metrics(vec![
            HealthMetric::new("Heart Rate", 72.0, "bpm"),
            HealthMetric::new("Blood Pressure", "118/76", "mmHg"),
        ])
        .with_appointments(vec![Appointment {
            id: "apt-1001".into(),
            patient_name: Some("Amina".into()),
            doctor_name: "Kwame Osei".into(),
            specialty: "Cardiology".into(),
            date: "2026-11-02".into(),
            time: "10:30".into(),
            status: AppointmentStatus::Upcoming,
            modality: Some(Modality::Video),
        }])
        .with_specialists(vec![
            Specialist::new("Kwame Osei", "Cardiology"),
            Specialist::new("Lina Haddad", "Dermatology"),
        ]);
    if admin { snapshot.admin() } else { snapshot }
}

fn demo_handlers() -> ToolHandlers {
    ToolHandlers::new(
        FnToolHandler::new(|update: ProfileUpdate| {
            info!(?update, "updateProfile");
            Ok(())
        }),
        FnToolHandler::new(|booking: Booking| {
            info!(?booking, "bookAppointment");
            Ok(())
        }),
    )
    .with_add_specialist(FnToolHandler::new(|doctor: NewSpecialist| {
        info!(?doctor, "addDoctor");
        Ok(())
    }))
    .with_update_appointment(FnToolHandler::new(|change: AppointmentUpdate| {
        info!(?change, "updateAppointment");
        Ok(())
    }))
    .with_delete_appointment(FnToolHandler::new(|removal: AppointmentRemoval| {
        info!(?removal, "deleteAppointment");
        Ok(())
    }))
}

async fn run(admin: bool) -> anyhow::Result<()> {
    let backend = GeminiBackend::from_env()?;
    let connector = GeminiLiveConnector::with_default_model(backend);
    info!(model_id = %medipulse_live::LiveConnector::model_id(&connector), "Model configured");

    let devices = AudioDevices::new(CpalInput::new(), CpalOutput::new());
    let mut assistant = LiveAssistant::new(Arc::new(connector), devices, LiveConfig::default());

    assistant.connect(&demo_snapshot(admin), demo_handlers(), Arc::new(ConsoleObserver)).await?;
    info!("Speak now. Ctrl+C to hang up.");

    let Some(session) = assistant.session_mut() else {
        anyhow::bail!("session was not started");
    };
    tokio::select! {
        ended = session.closed() => info!(status = %ended, "Session ended"),
        _ = tokio::signal::ctrl_c() => info!("Hanging up"),
    }

    assistant.disconnect().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing("medibot-live-voice");

    let admin = std::env::args().any(|arg| arg == "--admin");
    match run(admin).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Demo failed");
            ExitCode::FAILURE
        }
    }
}
