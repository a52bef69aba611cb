//! Diagnostic session state machine.
//!
//! `PatientSession` is a plain value: `apply` consumes it together with one
//! `SessionAction` and returns the next session plus at most one effect for
//! the caller to run. Only the move into `Submitting` asks for network work
//! (`SessionEffect::Analyze`); every other transition is local.
//!
//! ```text
//!   Idle ──pick──▶ ImageSelected ──submit──▶ Submitting ──ok──▶ Completed
//!                     ▲    │ ▲                   │                 │
//!                     │    └─┘ re-pick            └──err──▶ ImageSelected
//!                     └──────────────── re-pick ───────────────────┤
//!   Idle ◀───────────────────────── clear ─────────────────────────┘
//! ```

use std::sync::Arc;

use crate::client::AnalysisService;
use crate::errors::{Notice, TransportError, ValidationError};
use crate::models::{AnalysisResult, ImageRef};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    ImageSelected,
    Submitting,
    Completed,
}

/// Lifecycle stage with the data that stage owns. A result only exists in
/// `Completed`, and an image exists in every stage except `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Idle,
    ImageSelected { image: ImageRef },
    Submitting { image: ImageRef },
    Completed { image: ImageRef, result: AnalysisResult },
}

impl Stage {
    fn status(&self) -> SessionStatus {
        match self {
            Stage::Idle => SessionStatus::Idle,
            Stage::ImageSelected { .. } => SessionStatus::ImageSelected,
            Stage::Submitting { .. } => SessionStatus::Submitting,
            Stage::Completed { .. } => SessionStatus::Completed,
        }
    }
}

/// What the image picker produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    /// Raw reference from the picker; an empty one counts as nothing picked.
    Picked(String),
    Cancelled,
    PermissionDenied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    SetPatientName(String),
    ImagePicked(PickOutcome),
    Submit,
    AnalysisSucceeded(AnalysisResult),
    AnalysisFailed(Notice),
    Clear,
}

/// Payload for the one network call a session can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub patient_name: String,
    pub image: ImageRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Run the analysis, then feed back `AnalysisSucceeded`/`AnalysisFailed`.
    Analyze(AnalysisRequest),
    Rejected(ValidationError),
    Notify(Notice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub session: PatientSession,
    pub effect: Option<SessionEffect>,
}

/// Borrowed view of a session that has a result. The only way to build a
/// report from a live session.
#[derive(Debug, Clone, Copy)]
pub struct CompletedSession<'a> {
    pub patient_name: &'a str,
    pub result: &'a AnalysisResult,
}

// ═══════════════════════════════════════════════════════════
// PatientSession
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientSession {
    patient_name: String,
    stage: Stage,
}

impl Default for PatientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PatientSession {
    pub fn new() -> Self {
        Self {
            patient_name: String::new(),
            stage: Stage::Idle,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.stage.status()
    }

    pub fn patient_name(&self) -> &str {
        &self.patient_name
    }

    pub fn image(&self) -> Option<&ImageRef> {
        match &self.stage {
            Stage::Idle => None,
            Stage::ImageSelected { image }
            | Stage::Submitting { image }
            | Stage::Completed { image, .. } => Some(image),
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match &self.stage {
            Stage::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn as_completed(&self) -> Option<CompletedSession<'_>> {
        match &self.stage {
            Stage::Completed { result, .. } => Some(CompletedSession {
                patient_name: &self.patient_name,
                result,
            }),
            _ => None,
        }
    }

    /// Whether a submit would currently be accepted.
    pub fn can_submit(&self) -> bool {
        self.check_submit().is_ok() && self.status() == SessionStatus::ImageSelected
    }

    fn check_submit(&self) -> Result<(), ValidationError> {
        if matches!(self.stage, Stage::Completed { .. }) {
            return Err(ValidationError::AlreadyCompleted);
        }
        if self.patient_name.trim().is_empty() {
            return Err(ValidationError::MissingPatientName);
        }
        if self.image().is_none() {
            return Err(ValidationError::MissingImage);
        }
        Ok(())
    }

    /// Pure transition function.
    pub fn apply(self, action: SessionAction) -> Transition {
        match action {
            SessionAction::SetPatientName(name) => self.set_patient_name(name),
            SessionAction::ImagePicked(outcome) => self.pick_image(outcome),
            SessionAction::Submit => self.submit(),
            SessionAction::AnalysisSucceeded(result) => self.complete(result),
            SessionAction::AnalysisFailed(notice) => self.fail(notice),
            SessionAction::Clear => self.clear(),
        }
    }

    fn set_patient_name(mut self, name: String) -> Transition {
        // The name travels with the in-flight request and belongs to the result.
        match self.stage {
            Stage::Idle | Stage::ImageSelected { .. } => {
                self.patient_name = name;
                self.unchanged()
            }
            Stage::Submitting { .. } | Stage::Completed { .. } => self.unchanged(),
        }
    }

    fn pick_image(mut self, outcome: PickOutcome) -> Transition {
        let image = match outcome {
            PickOutcome::Picked(raw) => match ImageRef::new(raw) {
                Some(image) => image,
                None => return self.unchanged(),
            },
            PickOutcome::Cancelled => return self.unchanged(),
            PickOutcome::PermissionDenied => {
                return self.with_effect(SessionEffect::Notify(Notice::permission_denied()))
            }
        };

        match self.stage {
            Stage::Submitting { .. } => self.unchanged(),
            // Replaces the image and drops any stale result.
            Stage::Idle | Stage::ImageSelected { .. } | Stage::Completed { .. } => {
                self.stage = Stage::ImageSelected { image };
                self.unchanged()
            }
        }
    }

    fn submit(mut self) -> Transition {
        if matches!(self.stage, Stage::Submitting { .. }) {
            return self.unchanged();
        }
        if let Err(e) = self.check_submit() {
            return self.with_effect(SessionEffect::Rejected(e));
        }

        let image = match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::ImageSelected { image } => image,
            other => {
                self.stage = other;
                return self.unchanged();
            }
        };
        let request = AnalysisRequest {
            patient_name: self.patient_name.trim().to_string(),
            image: image.clone(),
        };
        self.stage = Stage::Submitting { image };
        self.with_effect(SessionEffect::Analyze(request))
    }

    fn complete(mut self, result: AnalysisResult) -> Transition {
        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Submitting { image } => {
                self.stage = Stage::Completed { image, result };
                self.unchanged()
            }
            other => {
                tracing::warn!(status = ?other.status(), "Ignoring analysis result outside submission");
                self.stage = other;
                self.unchanged()
            }
        }
    }

    fn fail(mut self, notice: Notice) -> Transition {
        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Submitting { image } => {
                self.stage = Stage::ImageSelected { image };
                self.with_effect(SessionEffect::Notify(notice))
            }
            other => {
                self.stage = other;
                self.with_effect(SessionEffect::Notify(notice))
            }
        }
    }

    fn clear(self) -> Transition {
        match self.stage {
            Stage::Submitting { .. } => self.unchanged(),
            _ => PatientSession::new().unchanged(),
        }
    }

    fn unchanged(self) -> Transition {
        Transition {
            session: self,
            effect: None,
        }
    }

    fn with_effect(self, effect: SessionEffect) -> Transition {
        Transition {
            session: self,
            effect: Some(effect),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// SessionController — owns the session, runs effects
// ═══════════════════════════════════════════════════════════

/// Owning store for one screen's session. The UI dispatches actions and reads
/// `session()`; notices queue up until the UI takes them.
pub struct SessionController {
    session: PatientSession,
    service: Arc<dyn AnalysisService>,
    notices: Vec<Notice>,
}

impl SessionController {
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self {
            session: PatientSession::new(),
            service,
            notices: Vec::new(),
        }
    }

    pub fn session(&self) -> &PatientSession {
        &self.session
    }

    /// Drain pending notices for display.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Apply one action. A submit that passes validation awaits the service
    /// and applies the outcome before returning.
    pub async fn dispatch(&mut self, action: SessionAction) -> SessionStatus {
        let effect = self.step(action);
        if let Some(request) = effect {
            let outcome = self.run_analysis(&request).await;
            let follow_up = match outcome {
                Ok(result) => SessionAction::AnalysisSucceeded(result),
                Err(e) => SessionAction::AnalysisFailed(Notice::from(&e)),
            };
            self.step(follow_up);
        }
        self.session.status()
    }

    fn step(&mut self, action: SessionAction) -> Option<AnalysisRequest> {
        let session = std::mem::take(&mut self.session);
        let Transition { session, effect } = session.apply(action);
        self.session = session;

        match effect? {
            SessionEffect::Analyze(request) => Some(request),
            SessionEffect::Rejected(e) => {
                tracing::info!(reason = %e, "Submit rejected");
                self.notices.push(Notice::from(&e));
                None
            }
            SessionEffect::Notify(notice) => {
                self.notices.push(notice);
                None
            }
        }
    }

    async fn run_analysis(&self, request: &AnalysisRequest) -> Result<AnalysisResult, TransportError> {
        tracing::info!("Submitting scan for analysis");
        let outcome = self
            .service
            .submit(&request.patient_name, &request.image)
            .await;
        if let Err(e) = &outcome {
            tracing::error!("Analysis failed: {e}");
        }
        outcome
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAnalysisService;
    use crate::errors::NoticeKind;

    fn glioma() -> AnalysisResult {
        AnalysisResult {
            prediction: "glioma".into(),
            confidence: "92%".into(),
            heatmap_url: "/static/h1.png".into(),
        }
    }

    fn run(session: PatientSession, actions: Vec<SessionAction>) -> PatientSession {
        actions
            .into_iter()
            .fold(session, |s, action| s.apply(action).session)
    }

    fn ready(name: &str) -> PatientSession {
        run(
            PatientSession::new(),
            vec![
                SessionAction::SetPatientName(name.into()),
                SessionAction::ImagePicked(PickOutcome::Picked("/scans/a.jpg".into())),
            ],
        )
    }

    fn completed() -> PatientSession {
        let t = ready("Jane Doe").apply(SessionAction::Submit);
        t.session.apply(SessionAction::AnalysisSucceeded(glioma())).session
    }

    #[test]
    fn starts_idle_and_empty() {
        let s = PatientSession::new();
        assert_eq!(s.status(), SessionStatus::Idle);
        assert_eq!(s.patient_name(), "");
        assert!(s.image().is_none());
        assert!(s.result().is_none());
        assert!(s.as_completed().is_none());
    }

    #[test]
    fn picking_image_moves_to_image_selected() {
        let t = PatientSession::new()
            .apply(SessionAction::ImagePicked(PickOutcome::Picked("/scans/a.jpg".into())));
        assert_eq!(t.session.status(), SessionStatus::ImageSelected);
        assert!(t.effect.is_none());
    }

    #[test]
    fn empty_pick_and_cancel_leave_state_unchanged() {
        let idle = PatientSession::new();
        let t = idle.clone().apply(SessionAction::ImagePicked(PickOutcome::Picked(String::new())));
        assert_eq!(t.session, idle);
        let t = idle.clone().apply(SessionAction::ImagePicked(PickOutcome::Cancelled));
        assert_eq!(t.session, idle);
        assert!(t.effect.is_none());
    }

    #[test]
    fn permission_denied_notifies_without_changing_state() {
        let idle = PatientSession::new();
        let t = idle.clone().apply(SessionAction::ImagePicked(PickOutcome::PermissionDenied));
        assert_eq!(t.session, idle);
        match t.effect {
            Some(SessionEffect::Notify(n)) => assert_eq!(n.kind, NoticeKind::Permission),
            other => panic!("expected permission notice, got {other:?}"),
        }
    }

    #[test]
    fn reselecting_replaces_image() {
        let s = ready("Jane").apply(SessionAction::ImagePicked(PickOutcome::Picked(
            "/scans/b.jpg".into(),
        )));
        assert_eq!(s.session.status(), SessionStatus::ImageSelected);
        assert_eq!(
            s.session.image().unwrap().path(),
            std::path::Path::new("/scans/b.jpg")
        );
    }

    #[test]
    fn reselecting_after_completion_clears_stale_result() {
        let t = completed().apply(SessionAction::ImagePicked(PickOutcome::Picked(
            "/scans/c.jpg".into(),
        )));
        assert_eq!(t.session.status(), SessionStatus::ImageSelected);
        assert!(t.session.result().is_none());
        assert_eq!(t.session.patient_name(), "Jane Doe");
    }

    #[test]
    fn submit_requests_analysis() {
        let t = ready("  Jane Doe ").apply(SessionAction::Submit);
        assert_eq!(t.session.status(), SessionStatus::Submitting);
        match t.effect {
            Some(SessionEffect::Analyze(req)) => {
                assert_eq!(req.patient_name, "Jane Doe");
                assert_eq!(req.image.path(), std::path::Path::new("/scans/a.jpg"));
            }
            other => panic!("expected Analyze, got {other:?}"),
        }
    }

    #[test]
    fn submit_without_name_is_rejected() {
        let t = ready("   ").apply(SessionAction::Submit);
        assert_eq!(t.session.status(), SessionStatus::ImageSelected);
        assert_eq!(
            t.effect,
            Some(SessionEffect::Rejected(ValidationError::MissingPatientName))
        );
    }

    #[test]
    fn submit_without_image_is_rejected() {
        let t = PatientSession::new()
            .apply(SessionAction::SetPatientName("Jane".into()))
            .session
            .apply(SessionAction::Submit);
        assert_eq!(t.session.status(), SessionStatus::Idle);
        assert_eq!(
            t.effect,
            Some(SessionEffect::Rejected(ValidationError::MissingImage))
        );
    }

    #[test]
    fn submit_after_completion_is_rejected() {
        let t = completed().apply(SessionAction::Submit);
        assert_eq!(t.session.status(), SessionStatus::Completed);
        assert_eq!(
            t.effect,
            Some(SessionEffect::Rejected(ValidationError::AlreadyCompleted))
        );
    }

    #[test]
    fn second_submit_while_in_flight_is_noop() {
        let submitting = ready("Jane").apply(SessionAction::Submit).session;
        let t = submitting.clone().apply(SessionAction::Submit);
        assert_eq!(t.session, submitting);
        assert!(t.effect.is_none());
    }

    #[test]
    fn success_stores_result() {
        let s = completed();
        assert_eq!(s.status(), SessionStatus::Completed);
        assert_eq!(s.result(), Some(&glioma()));
        let view = s.as_completed().unwrap();
        assert_eq!(view.patient_name, "Jane Doe");
    }

    #[test]
    fn failure_rolls_back_to_image_selected() {
        let submitting = ready("Jane").apply(SessionAction::Submit).session;
        let notice = Notice::from(&TransportError::Timeout);
        let t = submitting.apply(SessionAction::AnalysisFailed(notice.clone()));
        assert_eq!(t.session.status(), SessionStatus::ImageSelected);
        assert!(t.session.result().is_none());
        assert!(t.session.image().is_some());
        assert_eq!(t.effect, Some(SessionEffect::Notify(notice)));
    }

    #[test]
    fn late_result_outside_submission_is_ignored() {
        let s = ready("Jane");
        let t = s.clone().apply(SessionAction::AnalysisSucceeded(glioma()));
        assert_eq!(t.session, s);
    }

    #[test]
    fn name_is_frozen_while_submitting_and_completed() {
        let submitting = ready("Jane").apply(SessionAction::Submit).session;
        let t = submitting.apply(SessionAction::SetPatientName("Other".into()));
        assert_eq!(t.session.patient_name(), "Jane");

        let t = completed().apply(SessionAction::SetPatientName("Other".into()));
        assert_eq!(t.session.patient_name(), "Jane Doe");
    }

    #[test]
    fn clear_after_completion_resets_everything() {
        let t = completed().apply(SessionAction::Clear);
        assert_eq!(t.session, PatientSession::new());
        assert_eq!(t.session.status(), SessionStatus::Idle);
        assert_eq!(t.session.patient_name(), "");
        assert!(t.session.image().is_none());
        assert!(t.session.result().is_none());
    }

    #[test]
    fn clear_is_ignored_while_submitting() {
        let submitting = ready("Jane").apply(SessionAction::Submit).session;
        let t = submitting.clone().apply(SessionAction::Clear);
        assert_eq!(t.session, submitting);
    }

    #[test]
    fn can_submit_reflects_guards() {
        assert!(!PatientSession::new().can_submit());
        assert!(ready("Jane").can_submit());
        assert!(!ready("").can_submit());
        assert!(!completed().can_submit());
    }

    // ── Controller ───────────────────────────────────────

    #[tokio::test]
    async fn controller_end_to_end_success() {
        let mock = Arc::new(MockAnalysisService::new().with_prediction(glioma()));
        let mut controller = SessionController::new(mock.clone());

        controller
            .dispatch(SessionAction::SetPatientName("Jane Doe".into()))
            .await;
        controller
            .dispatch(SessionAction::ImagePicked(PickOutcome::Picked("/scans/a.jpg".into())))
            .await;
        let status = controller.dispatch(SessionAction::Submit).await;

        assert_eq!(status, SessionStatus::Completed);
        assert_eq!(controller.session().result(), Some(&glioma()));
        assert_eq!(mock.submit_calls(), 1);
        assert!(controller.take_notices().is_empty());
    }

    #[tokio::test]
    async fn controller_validation_failure_makes_no_call() {
        let mock = Arc::new(MockAnalysisService::new().with_prediction(glioma()));
        let mut controller = SessionController::new(mock.clone());

        controller
            .dispatch(SessionAction::ImagePicked(PickOutcome::Picked("/scans/a.jpg".into())))
            .await;
        let status = controller.dispatch(SessionAction::Submit).await;

        assert_eq!(status, SessionStatus::ImageSelected);
        assert_eq!(mock.submit_calls(), 0);
        let notices = controller.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Validation);
    }

    #[tokio::test]
    async fn controller_transport_failure_rolls_back_and_notifies() {
        let mock = Arc::new(MockAnalysisService::new());
        let mut controller = SessionController::new(mock.clone());

        controller
            .dispatch(SessionAction::SetPatientName("Jane".into()))
            .await;
        controller
            .dispatch(SessionAction::ImagePicked(PickOutcome::Picked("/scans/a.jpg".into())))
            .await;
        let status = controller.dispatch(SessionAction::Submit).await;

        assert_eq!(status, SessionStatus::ImageSelected);
        assert!(controller.session().result().is_none());
        assert_eq!(mock.submit_calls(), 1);
        let notices = controller.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Transport);

        // Manual retry once the service recovers.
        mock.set_prediction(Some(glioma()));
        let status = controller.dispatch(SessionAction::Submit).await;
        assert_eq!(status, SessionStatus::Completed);
        assert_eq!(mock.submit_calls(), 2);
    }
}
