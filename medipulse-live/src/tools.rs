//! Tool dispatch: the side effects the remote model may ask the host to run.
//!
//! Each supported tool has a fixed name, a declared argument schema and a
//! minimum [`Privilege`]. A [`DispatchTable`] is built once per session from
//! the caller's privilege and the host's [`ToolHandlers`]. Incoming
//! [`ToolCall`]s are validated into typed [`ToolArgs`] before any handler
//! runs, and every call yields exactly one [`ToolResponse`] echoing its id
//! and name.

use crate::config::ToolDefinition;
use crate::context::{AppointmentStatus, Modality};
use crate::error::LiveError;
use crate::events::{ToolCall, ToolResponse, ToolResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Capability level of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Ordinary,
    Admin,
}

/// Failure reported by a host tool handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The host refused or failed to carry out the action.
    #[error("{0}")]
    Rejected(String),

    /// The host did not supply this capability.
    #[error("capability not available")]
    Unavailable,

    /// The arguments did not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl From<ToolError> for LiveError {
    fn from(err: ToolError) -> Self {
        LiveError::ToolExecutionError(err.to_string())
    }
}

impl ToolError {
    /// Create a rejection with a reason the model can relay to the user.
    pub fn rejected<S: Into<String>>(reason: S) -> Self {
        ToolError::Rejected(reason.into())
    }
}

/// The supported tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    UpdateProfile,
    BookAppointment,
    AddSpecialist,
    UpdateAppointment,
    DeleteAppointment,
}

impl ToolKind {
    /// Every tool, ordinary ones first.
    pub const ALL: [ToolKind; 5] = [
        ToolKind::UpdateProfile,
        ToolKind::BookAppointment,
        ToolKind::AddSpecialist,
        ToolKind::UpdateAppointment,
        ToolKind::DeleteAppointment,
    ];

    /// Name declared to the model.
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::UpdateProfile => "updateProfile",
            ToolKind::BookAppointment => "bookAppointment",
            ToolKind::AddSpecialist => "addDoctor",
            ToolKind::UpdateAppointment => "updateAppointment",
            ToolKind::DeleteAppointment => "deleteAppointment",
        }
    }

    /// Look up a tool by its declared name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Minimum privilege needed to call this tool.
    pub fn privilege(&self) -> Privilege {
        match self {
            ToolKind::UpdateProfile | ToolKind::BookAppointment => Privilege::Ordinary,
            _ => Privilege::Admin,
        }
    }

    /// Text returned to the model on success.
    fn success_detail(&self) -> &'static str {
        match self {
            ToolKind::UpdateProfile => "profile updated",
            ToolKind::BookAppointment => "appointment booked",
            ToolKind::AddSpecialist => "doctor added",
            ToolKind::UpdateAppointment => "appointment updated",
            ToolKind::DeleteAppointment => "appointment deleted",
        }
    }

    /// Declared schema.
    pub fn spec(&self) -> ToolSpec {
        const STR: ParamType = ParamType::String;
        const NUM: ParamType = ParamType::Number;
        match self {
            ToolKind::UpdateProfile => ToolSpec::new(
                *self,
                "Updates the user's profile details including name, email, or mobile number.",
                vec![
                    ParamSpec::optional("name", STR, "The user's full name"),
                    ParamSpec::optional("email", STR, "The user's email address"),
                    ParamSpec::optional("mobile", STR, "The user's mobile number (10 digits)"),
                ],
            ),
            ToolKind::BookAppointment => ToolSpec::new(
                *self,
                "Books a new medical appointment with a specific doctor.",
                vec![
                    ParamSpec::required("doctorName", STR, "The name of the doctor"),
                    ParamSpec::required("specialty", STR, "The doctor's specialty (e.g., Cardiologist)"),
                    ParamSpec::required("date", STR, "Date of appointment (e.g., 'Tomorrow', 'Oct 28')"),
                    ParamSpec::required("time", STR, "Time of appointment (e.g., '10:00', '14:30')"),
                    ParamSpec::required("type", STR, "Type of appointment")
                        .with_enum(&["video", "in-person"]),
                ],
            ),
            ToolKind::AddSpecialist => ToolSpec::new(
                *self,
                "ADMIN ONLY: Adds a new doctor to the available specialists list.",
                vec![
                    ParamSpec::required("name", STR, "Doctor's full name (e.g., Dr. Jane Doe)"),
                    ParamSpec::required("specialty", STR, "Medical specialty (e.g., Neurologist)"),
                    ParamSpec::optional("price", NUM, "Consultation price in dollars"),
                    ParamSpec::optional("rating", NUM, "Initial rating (0-5)"),
                ],
            ),
            ToolKind::UpdateAppointment => ToolSpec::new(
                *self,
                "ADMIN ONLY: Updates an existing appointment's date, time or status by its ID.",
                vec![
                    ParamSpec::required("appointmentId", STR, "The ID of the appointment to update"),
                    ParamSpec::optional("date", STR, "New date"),
                    ParamSpec::optional("time", STR, "New time"),
                    ParamSpec::optional("status", STR, "New status")
                        .with_enum(&["upcoming", "cancelled", "completed", "pending"]),
                ],
            ),
            ToolKind::DeleteAppointment => ToolSpec::new(
                *self,
                "ADMIN ONLY: Permanently deletes or cancels an appointment record using its ID.",
                vec![ParamSpec::required(
                    "appointmentId",
                    STR,
                    "The ID of the appointment to delete",
                )],
            ),
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Schema type of a tool parameter, using the remote API's type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
}

impl ParamType {
    fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "STRING",
            ParamType::Number => "NUMBER",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub description: &'static str,
    pub required: bool,
    pub allowed: &'static [&'static str],
}

impl ParamSpec {
    fn required(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self { name, ty, description, required: true, allowed: &[] }
    }

    fn optional(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self { required: false, ..Self::required(name, ty, description) }
    }

    fn with_enum(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }
}

/// A tool's declaration: name, description and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    fn new(kind: ToolKind, description: &'static str, params: Vec<ParamSpec>) -> Self {
        Self { kind, description, params }
    }

    /// Render as a provider-neutral declaration with an `OBJECT` schema.
    pub fn definition(&self) -> ToolDefinition {
        let mut properties = Map::new();
        for param in &self.params {
            let mut prop = json!({ "type": param.ty.as_str(), "description": param.description });
            if !param.allowed.is_empty() {
                prop["enum"] = json!(param.allowed);
            }
            properties.insert(param.name.to_string(), prop);
        }
        let required: Vec<&str> = self.params.iter().filter(|p| p.required).map(|p| p.name).collect();

        ToolDefinition::new(self.kind.name())
            .with_description(self.description)
            .with_parameters(json!({
                "type": "OBJECT",
                "properties": properties,
                "required": required,
            }))
    }
}

/// Arguments of `updateProfile`. At least one field must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

/// Arguments of `bookAppointment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub doctor_name: String,
    pub specialty: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub modality: Modality,
}

/// Arguments of `addDoctor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSpecialist {
    pub name: String,
    pub specialty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

/// Arguments of `updateAppointment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentUpdate {
    pub appointment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
}

/// Arguments of `deleteAppointment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRemoval {
    pub appointment_id: String,
}

/// Validated arguments, one variant per tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    UpdateProfile(ProfileUpdate),
    BookAppointment(Booking),
    AddSpecialist(NewSpecialist),
    UpdateAppointment(AppointmentUpdate),
    DeleteAppointment(AppointmentRemoval),
}

impl ToolArgs {
    /// Validate raw arguments against `kind`'s schema.
    ///
    /// Missing arguments are treated as an empty object.
    pub fn parse(kind: ToolKind, args: &Value) -> Result<Self, ToolError> {
        let args = match args {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        match kind {
            ToolKind::UpdateProfile => {
                let update: ProfileUpdate = from_args(args)?;
                if update.name.is_none() && update.email.is_none() && update.mobile.is_none() {
                    return Err(ToolError::InvalidArguments("no profile field given".into()));
                }
                Ok(ToolArgs::UpdateProfile(update))
            }
            ToolKind::BookAppointment => Ok(ToolArgs::BookAppointment(from_args(args)?)),
            ToolKind::AddSpecialist => {
                let doctor: NewSpecialist = from_args(args)?;
                if let Some(rating) = doctor.rating {
                    if !(0.0..=5.0).contains(&rating) {
                        return Err(ToolError::InvalidArguments(format!("rating {rating} outside 0-5")));
                    }
                }
                if let Some(price) = doctor.price {
                    if price.is_nan() || price < 0.0 {
                        return Err(ToolError::InvalidArguments(format!("price {price} is negative")));
                    }
                }
                Ok(ToolArgs::AddSpecialist(doctor))
            }
            ToolKind::UpdateAppointment => Ok(ToolArgs::UpdateAppointment(from_args(args)?)),
            ToolKind::DeleteAppointment => Ok(ToolArgs::DeleteAppointment(from_args(args)?)),
        }
    }
}

fn from_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// A host-side handler for one tool category.
#[async_trait]
pub trait ToolHandler<A: Send + 'static>: Send + Sync {
    /// Carry out the action.
    async fn call(&self, args: A) -> Result<(), ToolError>;
}

/// A simple function-based tool handler.
pub struct FnToolHandler<F> {
    handler: F,
}

impl<F> FnToolHandler<F> {
    /// Create a new function-based tool handler.
    pub fn new<A>(handler: F) -> Self
    where
        F: Fn(A) -> Result<(), ToolError> + Send + Sync,
    {
        Self { handler }
    }
}

#[async_trait]
impl<A, F> ToolHandler<A> for FnToolHandler<F>
where
    A: Send + 'static,
    F: Fn(A) -> Result<(), ToolError> + Send + Sync,
{
    async fn call(&self, args: A) -> Result<(), ToolError> {
        (self.handler)(args)
    }
}

/// Async function-based tool handler.
pub struct AsyncFnToolHandler<F> {
    handler: F,
}

impl<F> AsyncFnToolHandler<F> {
    /// Create a new async tool handler.
    pub fn new<A, Fut>(handler: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), ToolError>> + Send,
    {
        Self { handler }
    }
}

#[async_trait]
impl<A, F, Fut> ToolHandler<A> for AsyncFnToolHandler<F>
where
    A: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ToolError>> + Send,
{
    async fn call(&self, args: A) -> Result<(), ToolError> {
        (self.handler)(args).await
    }
}

/// The host's handler slots. Admin slots are optional.
#[derive(Clone)]
pub struct ToolHandlers {
    update_profile: Arc<dyn ToolHandler<ProfileUpdate>>,
    book_appointment: Arc<dyn ToolHandler<Booking>>,
    add_specialist: Option<Arc<dyn ToolHandler<NewSpecialist>>>,
    update_appointment: Option<Arc<dyn ToolHandler<AppointmentUpdate>>>,
    delete_appointment: Option<Arc<dyn ToolHandler<AppointmentRemoval>>>,
}

impl ToolHandlers {
    /// Handlers for the two ordinary tools.
    pub fn new(
        update_profile: impl ToolHandler<ProfileUpdate> + 'static,
        book_appointment: impl ToolHandler<Booking> + 'static,
    ) -> Self {
        Self {
            update_profile: Arc::new(update_profile),
            book_appointment: Arc::new(book_appointment),
            add_specialist: None,
            update_appointment: None,
            delete_appointment: None,
        }
    }

    pub fn with_add_specialist(mut self, handler: impl ToolHandler<NewSpecialist> + 'static) -> Self {
        self.add_specialist = Some(Arc::new(handler));
        self
    }

    pub fn with_update_appointment(mut self, handler: impl ToolHandler<AppointmentUpdate> + 'static) -> Self {
        self.update_appointment = Some(Arc::new(handler));
        self
    }

    pub fn with_delete_appointment(mut self, handler: impl ToolHandler<AppointmentRemoval> + 'static) -> Self {
        self.delete_appointment = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for ToolHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandlers")
            .field("add_specialist", &self.add_specialist.is_some())
            .field("update_appointment", &self.update_appointment.is_some())
            .field("delete_appointment", &self.delete_appointment.is_some())
            .finish_non_exhaustive()
    }
}

/// Routes tool calls to host handlers for one session.
///
/// The privilege is fixed at construction and never recomputed.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    privilege: Privilege,
    handlers: ToolHandlers,
}

impl DispatchTable {
    pub fn new(privilege: Privilege, handlers: ToolHandlers) -> Self {
        Self { privilege, handlers }
    }

    /// Privilege granted to this session.
    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    /// Tools this session exposes.
    pub fn tools(&self) -> Vec<ToolKind> {
        ToolKind::ALL.into_iter().filter(|kind| kind.privilege() <= self.privilege).collect()
    }

    /// Declarations sent to the remote session at open.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools().iter().map(|kind| kind.spec().definition()).collect()
    }

    /// Run one tool call and produce its correlated response.
    ///
    /// Never fails: every problem becomes an error result for the model.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResponse {
        let result = self.run(call).await;
        match &result {
            ToolResult::Ok { .. } => {
                tracing::info!(tool = %call.name, call_id = %call.id, "Tool call succeeded");
            }
            ToolResult::Error { reason } => {
                tracing::info!(tool = %call.name, call_id = %call.id, reason = %reason, "Tool call failed");
            }
        }
        ToolResponse::for_call(call, result)
    }

    async fn run(&self, call: &ToolCall) -> ToolResult {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            tracing::warn!(tool = %call.name, call_id = %call.id, "Unknown tool requested");
            return ToolResult::error(format!("unknown tool: {}", call.name));
        };

        if kind.privilege() > self.privilege {
            tracing::warn!(
                tool = %kind,
                call_id = %call.id,
                required = ?kind.privilege(),
                granted = ?self.privilege,
                "Rejected tool call above session privilege"
            );
            return ToolResult::error(format!("{kind} requires admin privilege"));
        }

        let args = match ToolArgs::parse(kind, &call.args) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let h = &self.handlers;
        let outcome = match args {
            ToolArgs::UpdateProfile(a) => invoke(Some(&h.update_profile), a).await,
            ToolArgs::BookAppointment(a) => invoke(Some(&h.book_appointment), a).await,
            ToolArgs::AddSpecialist(a) => invoke(h.add_specialist.as_ref(), a).await,
            ToolArgs::UpdateAppointment(a) => invoke(h.update_appointment.as_ref(), a).await,
            ToolArgs::DeleteAppointment(a) => invoke(h.delete_appointment.as_ref(), a).await,
        };

        match outcome {
            Ok(()) => ToolResult::ok(kind.success_detail()),
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(tool = %kind, call_id = %call.id, error = %LiveError::from(e), "Tool handler failed");
                ToolResult::error(reason)
            }
        }
    }
}

async fn invoke<A: Send + 'static>(
    handler: Option<&Arc<dyn ToolHandler<A>>>,
    args: A,
) -> Result<(), ToolError> {
    let handler = handler.ok_or(ToolError::Unavailable)?;
    match AssertUnwindSafe(handler.call(args)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!("Tool handler panicked");
            Err(ToolError::rejected("error executing action"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_handler_failure_maps_to_tool_execution_error() {
        let err = LiveError::from(ToolError::rejected("slot already taken"));
        assert!(matches!(err, LiveError::ToolExecutionError(ref reason) if reason == "slot already taken"));
        assert_eq!(
            LiveError::from(ToolError::Unavailable).to_string(),
            "Tool execution error: capability not available"
        );
    }

    fn recording_handlers(log: Arc<Mutex<Vec<String>>>) -> ToolHandlers {
        let (a, b) = (log.clone(), log.clone());
        ToolHandlers::new(
            FnToolHandler::new(move |u: ProfileUpdate| {
                a.lock().push(format!("profile:{:?}", u.name));
                Ok(())
            }),
            FnToolHandler::new(move |booking: Booking| {
                b.lock().push(format!("book:{}", booking.doctor_name));
                Ok(())
            }),
        )
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("launchRocket"), None);
    }

    #[test]
    fn test_definitions_follow_privilege() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ordinary = DispatchTable::new(Privilege::Ordinary, recording_handlers(log.clone()));
        let names: Vec<_> = ordinary.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["updateProfile", "bookAppointment"]);

        let admin = DispatchTable::new(Privilege::Admin, recording_handlers(log));
        assert_eq!(admin.definitions().len(), 5);
    }

    #[test]
    fn test_booking_schema() {
        let def = ToolKind::BookAppointment.spec().definition();
        let params = def.parameters.unwrap();
        assert_eq!(params["type"], "OBJECT");
        assert_eq!(params["required"], json!(["doctorName", "specialty", "date", "time", "type"]));
        assert_eq!(params["properties"]["type"]["enum"], json!(["video", "in-person"]));

        let doctor = ToolKind::AddSpecialist.spec().definition().parameters.unwrap();
        assert_eq!(doctor["properties"]["rating"]["type"], "NUMBER");
        assert_eq!(doctor["required"], json!(["name", "specialty"]));
    }

    #[test]
    fn test_parse_validates() {
        assert!(matches!(
            ToolArgs::parse(ToolKind::UpdateProfile, &Value::Null),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(ToolArgs::parse(ToolKind::UpdateProfile, &json!({"email": "a@b.c"})).is_ok());
        assert!(ToolArgs::parse(ToolKind::BookAppointment, &json!({"doctorName": "X"})).is_err());
        assert!(
            ToolArgs::parse(ToolKind::AddSpecialist, &json!({"name": "X", "specialty": "Y", "rating": 6}))
                .is_err()
        );
        assert!(
            ToolArgs::parse(ToolKind::AddSpecialist, &json!({"name": "X", "specialty": "Y", "price": -1}))
                .is_err()
        );
        let update = ToolArgs::parse(
            ToolKind::UpdateAppointment,
            &json!({"appointmentId": "4", "status": "cancelled"}),
        )
        .unwrap();
        assert!(matches!(
            update,
            ToolArgs::UpdateAppointment(AppointmentUpdate { status: Some(AppointmentStatus::Cancelled), .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = DispatchTable::new(Privilege::Admin, recording_handlers(log.clone()));
        let response = table.dispatch(&ToolCall::new("x", "launchRocket", json!({}))).await;
        assert_eq!(response.id, "x");
        assert!(!response.result.is_ok());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_invalid_args_skips_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = DispatchTable::new(Privilege::Ordinary, recording_handlers(log.clone()));
        let response = table.dispatch(&ToolCall::new("c1", "bookAppointment", json!({"date": "Tomorrow"}))).await;
        match response.result {
            ToolResult::Error { reason } => assert!(reason.starts_with("invalid arguments")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_admin_slot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let table = DispatchTable::new(Privilege::Admin, recording_handlers(log));
        let response = table.dispatch(&ToolCall::new("d", "deleteAppointment", json!({"appointmentId": "1"}))).await;
        assert_eq!(response.result, ToolResult::error("capability not available"));
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_become_errors() {
        let handlers = ToolHandlers::new(
            FnToolHandler::new(|_: ProfileUpdate| -> Result<(), ToolError> {
                Err(ToolError::rejected("email already in use"))
            }),
            AsyncFnToolHandler::new(|booking: Booking| async move {
                if booking.time == "09:00" {
                    panic!("host bug");
                }
                Ok::<(), ToolError>(())
            }),
        );
        let table = DispatchTable::new(Privilege::Ordinary, handlers);

        let profile = table.dispatch(&ToolCall::new("p", "updateProfile", json!({"email": "x@y.z"}))).await;
        assert_eq!(profile.result, ToolResult::error("email already in use"));

        let booking = table
            .dispatch(&ToolCall::new(
                "b",
                "bookAppointment",
                json!({"doctorName": "Lee", "specialty": "Cardiology", "date": "Today", "time": "09:00", "type": "video"}),
            ))
            .await;
        assert_eq!(booking.result, ToolResult::error("error executing action"));
    }

    #[tokio::test]
    async fn test_admin_tool_runs_for_admin() {
        let added = Arc::new(Mutex::new(None));
        let sink = added.clone();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handlers = recording_handlers(log).with_add_specialist(FnToolHandler::new(move |d: NewSpecialist| {
            *sink.lock() = Some(d);
            Ok(())
        }));
        let table = DispatchTable::new(Privilege::Admin, handlers);
        let response = table
            .dispatch(&ToolCall::new("n", "addDoctor", json!({"name": "Dr. Jane Doe", "specialty": "Neurology", "price": 80})))
            .await;
        assert_eq!(response.result, ToolResult::ok("doctor added"));
        assert_eq!(added.lock().as_ref().map(|d| d.price), Some(Some(80.0)));
    }
}
