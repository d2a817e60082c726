//! D-Bus surface for kiosks and the operator CLI.
//!
//! Bus name: org.presenz.Attendance1
//! Object path: /org/presenz/Attendance1

use crate::engine::{EngineError, EngineHandle};
use crate::gate::IdentityGate;
use chrono::Duration;
use presenz_core::resolver::{self, Resolution};
use presenz_core::types::RecognitionParams;
use presenz_core::EncodeError;
use presenz_store::{IdentitySummary, NewIdentity, Store, StoreError};
use serde::Serialize;
use thiserror::Error;
use zbus::interface;

const MAX_ENROLL_IMAGES: usize = 5;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("recognize timed out")]
    Timeout,
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("enrollment sample {index}: {source}")]
    EnrollSample { index: usize, source: EngineError },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    BadRequest(String),
    #[error("reply serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Identity attributes echoed back to the kiosk.
#[derive(Debug, Serialize)]
pub struct IdentityInfo {
    pub id: String,
    pub employee_code: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<String>,
}

impl From<IdentitySummary> for IdentityInfo {
    fn from(summary: IdentitySummary) -> Self {
        Self {
            id: summary.id,
            employee_code: summary.employee_code,
            display_name: summary.display_name,
            org_unit: summary.org_unit,
        }
    }
}

/// Caller-facing outcome of one recognize call, serialized as JSON.
#[derive(Debug, Serialize)]
pub struct RecognizeReply {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_location: Option<String>,
    pub message: String,
}

impl RecognizeReply {
    fn unmatched(message: &str) -> Self {
        Self {
            matched: false,
            identity: None,
            confidence: None,
            event_kind: None,
            total_hours: None,
            rejected_reason: None,
            wait_secs: None,
            open_location: None,
            message: message.to_string(),
        }
    }

    fn rejected(reason: &'static str, message: String) -> Self {
        Self {
            rejected_reason: Some(reason),
            ..Self::unmatched(&message)
        }
    }

    fn event(
        identity: Option<IdentityInfo>,
        confidence: f32,
        kind: &'static str,
        total_hours: Option<f64>,
        message: String,
    ) -> Self {
        Self {
            matched: true,
            identity,
            confidence: Some(confidence),
            event_kind: Some(kind),
            total_hours,
            rejected_reason: None,
            wait_secs: None,
            open_location: None,
            message,
        }
    }

    fn debounced(identity: Option<IdentityInfo>, confidence: f32, wait_secs: i64) -> Self {
        Self {
            matched: true,
            identity,
            confidence: Some(confidence),
            event_kind: None,
            total_hours: None,
            rejected_reason: Some("too_soon"),
            wait_secs: Some(wait_secs),
            open_location: None,
            message: format!("please wait {wait_secs}s between events"),
        }
    }

    fn conflict(identity: Option<IdentityInfo>, confidence: f32, open_location: String) -> Self {
        Self {
            matched: true,
            identity,
            confidence: Some(confidence),
            event_kind: None,
            total_hours: None,
            rejected_reason: Some("location_conflict"),
            wait_secs: None,
            message: format!("still checked in at {open_location}; contact an operator"),
            open_location: Some(open_location),
        }
    }
}

/// Reason tag for captures rejected before matching.
fn rejection_reason(error: &EncodeError) -> &'static str {
    match error {
        EncodeError::InvalidImage(_) => "invalid_image",
        EncodeError::Quality(_) => "poor_image_quality",
        EncodeError::NoFaceDetected => "no_face_detected",
        EncodeError::MultipleFacesDetected { .. } => "multiple_faces_detected",
        EncodeError::NotLive { .. } => "liveness_check_failed",
        EncodeError::Detector(_) | EncodeError::Embedder(_) => "encoding_failed",
    }
}

pub struct AttendanceService {
    engine: EngineHandle,
    store: Store,
    gate: IdentityGate,
    params: RecognitionParams,
    min_gap: Duration,
    recognize_timeout: std::time::Duration,
}

impl AttendanceService {
    pub fn new(
        engine: EngineHandle,
        store: Store,
        params: RecognitionParams,
        min_gap: Duration,
        recognize_timeout: std::time::Duration,
    ) -> Self {
        Self {
            engine,
            store,
            gate: IdentityGate::new(),
            params,
            min_gap,
            recognize_timeout,
        }
    }

    async fn run_recognize(
        &self,
        image: Vec<u8>,
        location: &str,
    ) -> Result<RecognizeReply, ServiceError> {
        let gallery = self.store.list_active().await?;
        let gallery_empty = gallery.is_empty();

        let probe = tokio::time::timeout(
            self.recognize_timeout,
            self.engine.probe(image, gallery, self.params),
        )
        .await;

        let result = match probe {
            Err(_) => return Err(ServiceError::Timeout),
            Ok(Err(EngineError::Encode(e))) => {
                return match e {
                    // Inference failures are system errors, not capture
                    // problems — never downgraded to a kiosk-facing reply.
                    EncodeError::Detector(_) | EncodeError::Embedder(_) => {
                        Err(ServiceError::Engine(EngineError::Encode(e)))
                    }
                    other => {
                        tracing::info!(reason = %other, "capture rejected before matching");
                        Ok(RecognizeReply::rejected(
                            rejection_reason(&other),
                            other.to_string(),
                        ))
                    }
                };
            }
            Ok(Err(e)) => return Err(ServiceError::Engine(e)),
            Ok(Ok(result)) => result,
        };

        if !result.matched {
            let message = if gallery_empty {
                "no identities enrolled"
            } else {
                "face not recognized"
            };
            return Ok(RecognizeReply::unmatched(message));
        }
        let Some(identity_id) = result.identity_id.clone() else {
            return Err(ServiceError::BadRequest(
                "matcher accepted but returned no identity".into(),
            ));
        };
        let confidence = result.confidence;
        let info = self.store.get_summary(&identity_id).await?.map(IdentityInfo::from);
        let display_name = info
            .as_ref()
            .map(|i| i.display_name.clone())
            .unwrap_or_else(|| identity_id.clone());

        // Hold the identity's gate across read, resolve, and write so two
        // near-simultaneous captures cannot both open a session.
        let lock = self.gate.lock_for(&identity_id);
        let _guard = lock.lock().await;

        let now = chrono::Local::now().naive_local();
        let sessions = self.store.today_sessions(&identity_id, now.date()).await?;

        match resolver::resolve(&sessions, now, location, self.min_gap) {
            Resolution::CheckIn => {
                let session = self
                    .store
                    .open_check_in(&identity_id, now, location, confidence)
                    .await?;
                tracing::info!(identity = %identity_id, session = %session, location, "check-in recorded");
                Ok(RecognizeReply::event(
                    info,
                    confidence,
                    "check_in",
                    None,
                    format!("Welcome, {display_name}!"),
                ))
            }
            Resolution::CheckOut { session_id, hours } => {
                self.store
                    .close_session(&session_id, now, hours, confidence)
                    .await?;
                tracing::info!(identity = %identity_id, session = %session_id, hours, "check-out recorded");
                Ok(RecognizeReply::event(
                    info,
                    confidence,
                    "check_out",
                    Some(hours),
                    format!("Goodbye, {display_name}."),
                ))
            }
            Resolution::DebounceRejected { wait_secs } => {
                tracing::info!(identity = %identity_id, wait_secs, "arrival inside minimum gap");
                Ok(RecognizeReply::debounced(info, confidence, wait_secs))
            }
            Resolution::LocationConflict { open_location } => {
                tracing::warn!(
                    identity = %identity_id,
                    open_location = %open_location,
                    location,
                    "open session at another location"
                );
                Ok(RecognizeReply::conflict(info, confidence, open_location))
            }
        }
    }

    async fn run_enroll(
        &self,
        employee_code: String,
        display_name: String,
        org_unit: String,
        images: Vec<Vec<u8>>,
    ) -> Result<String, ServiceError> {
        if employee_code.trim().is_empty() || display_name.trim().is_empty() {
            return Err(ServiceError::BadRequest(
                "employee_code and display_name are required".into(),
            ));
        }
        if images.is_empty() || images.len() > MAX_ENROLL_IMAGES {
            return Err(ServiceError::BadRequest(format!(
                "enrollment takes 1 to {MAX_ENROLL_IMAGES} images, got {}",
                images.len()
            )));
        }

        let mut encodings = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            let encoding = self
                .engine
                .enroll_sample(image)
                .await
                .map_err(|source| ServiceError::EnrollSample { index, source })?;
            encodings.push(encoding);
        }

        let org_unit = if org_unit.trim().is_empty() {
            None
        } else {
            Some(org_unit)
        };
        let id = self
            .store
            .insert_identity(
                NewIdentity {
                    employee_code,
                    display_name,
                    org_unit,
                },
                encodings,
            )
            .await?;
        Ok(id)
    }
}

fn internal(error: ServiceError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(error.to_string())
}

#[interface(name = "org.presenz.Attendance1")]
impl AttendanceService {
    /// Recognize a kiosk capture and record the resulting attendance event.
    /// Returns a JSON outcome document.
    async fn recognize(&self, image: Vec<u8>, location: String) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), location = %location, "recognize requested");
        let reply = self.run_recognize(image, &location).await.map_err(internal)?;
        serde_json::to_string(&reply).map_err(|e| internal(ServiceError::Serialize(e)))
    }

    /// Enroll an identity from 1–5 face images. Returns the identity id.
    async fn enroll(
        &self,
        employee_code: String,
        display_name: String,
        org_unit: String,
        images: Vec<Vec<u8>>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(employee_code = %employee_code, images = images.len(), "enroll requested");
        self.run_enroll(employee_code, display_name, org_unit, images)
            .await
            .map_err(internal)
    }

    /// List enrolled identities (active and inactive) as JSON.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let summaries = self
            .store
            .list_summaries()
            .await
            .map_err(|e| internal(e.into()))?;
        serde_json::to_string(&summaries).map_err(|e| internal(ServiceError::Serialize(e)))
    }

    /// Deactivate an identity. Returns false if the id is unknown.
    async fn deactivate(&self, identity_id: String) -> zbus::fdo::Result<bool> {
        tracing::info!(identity = %identity_id, "deactivate requested");
        self.store
            .deactivate(&identity_id)
            .await
            .map_err(|e| internal(e.into()))
    }

    /// Daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let counts = self
            .store
            .counts(chrono::Local::now().date_naive())
            .await
            .map_err(|e| internal(e.into()))?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "active_identities": counts.active_identities,
            "sessions_today": counts.sessions_today,
            "tolerance": self.params.tolerance,
            "min_gap_secs": self.min_gap.num_seconds(),
        })
        .to_string())
    }
}
