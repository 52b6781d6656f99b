//! The caller snapshot rendered into a session's opening instruction.

use crate::tools::Privilege;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consultation format of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    /// Remote video consultation.
    Video,
    /// In-person visit.
    InPerson,
}

impl Modality {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::InPerson => "in-person",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Upcoming,
    Cancelled,
    Completed,
    Pending,
}

impl AppointmentStatus {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric value as logged by the host, numeric or free text (e.g. `120/80`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One recent health reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetric {
    pub label: String,
    pub value: MetricValue,
    pub unit: String,
}

impl HealthMetric {
    pub fn new(label: impl Into<String>, value: impl Into<MetricValue>, unit: impl Into<String>) -> Self {
        Self { label: label.into(), value: value.into(), unit: unit.into() }
    }
}

/// A booked consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    pub doctor_name: String,
    pub specialty: String,
    pub date: String,
    pub time: String,
    pub status: AppointmentStatus,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
}

/// A bookable doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialist {
    pub name: String,
    pub specialty: String,
}

impl Specialist {
    pub fn new(name: impl Into<String>, specialty: impl Into<String>) -> Self {
        Self { name: name.into(), specialty: specialty.into() }
    }
}

/// Read-only description of the caller, fixed for the life of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub user_name: String,
    #[serde(default)]
    pub metrics: Vec<HealthMetric>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    #[serde(default)]
    pub specialists: Vec<Specialist>,
    #[serde(default)]
    pub is_admin: bool,
}

impl ContextSnapshot {
    /// Snapshot for an ordinary caller with no data yet.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self { user_name: user_name.into(), ..Default::default() }
    }

    pub fn with_metrics(mut self, metrics: Vec<HealthMetric>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_appointments(mut self, appointments: Vec<Appointment>) -> Self {
        self.appointments = appointments;
        self
    }

    pub fn with_specialists(mut self, specialists: Vec<Specialist>) -> Self {
        self.specialists = specialists;
        self
    }

    /// Mark the caller as an administrator.
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// Privilege granted to a session opened with this snapshot.
    pub fn privilege(&self) -> Privilege {
        if self.is_admin { Privilege::Admin } else { Privilege::Ordinary }
    }

    /// Metrics as `label: value unit`, comma separated.
    pub fn render_metrics(&self) -> String {
        if self.metrics.is_empty() {
            return "No vitals logged yet".to_string();
        }
        self.metrics
            .iter()
            .map(|m| format!("{}: {} {}", m.label, m.value, m.unit))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Appointments one per line, each tagged with its id.
    pub fn render_appointments(&self) -> String {
        if self.appointments.is_empty() {
            return "No upcoming appointments".to_string();
        }
        self.appointments
            .iter()
            .map(|a| {
                format!(
                    "[ID: {}] Patient: {} | Dr. {} ({}) | Date: {} | Time: {} | Status: {}",
                    a.id,
                    a.patient_name.as_deref().unwrap_or("Guest"),
                    a.doctor_name,
                    a.specialty,
                    a.date,
                    a.time,
                    a.status
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Specialist directory as `name (specialty)`, comma separated.
    pub fn render_specialists(&self) -> String {
        self.specialists
            .iter()
            .map(|s| format!("{} ({})", s.name, s.specialty))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build the session's system instruction.
    pub fn render_instruction(&self) -> String {
        let mut lines = vec![
            "You are MediBot, the voice assistant of the MediPulse health app.".to_string(),
            "Caller context:".to_string(),
            format!("- User name: {}", self.user_name),
            format!("- Current health vitals: {}", self.render_metrics()),
            format!("- Appointments:\n{}", self.render_appointments()),
            format!("- Available doctors: {}", self.render_specialists()),
        ];
        if self.is_admin {
            lines.push("Admin mode: the caller is an administrator.".to_string());
            lines.push(
                "Use the appointment IDs above with updateAppointment and deleteAppointment; use addDoctor to add doctors."
                    .to_string(),
            );
        }
        lines.push("You can update profile details and book appointments with the available tools.".to_string());
        lines.push("Reply in the caller's language and keep answers short. Do not diagnose.".to_string());
        lines.join("\n")
    }
}
