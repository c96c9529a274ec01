//! Manual intervention: hands a stuck application to a human and waits.
//!
//! The engine sends a [`Ticket`] over a channel and blocks on its reply.
//! Whoever holds the receiving end (the console, a UI, a queue consumer)
//! answers with a [`Disposition`]. There is no timeout; the wait ends only
//! when a disposition arrives or the responder goes away.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::models::JobStatus;

pub mod console;

pub use console::ConsoleResponder;

#[derive(Debug, Error)]
pub enum InterventionError {
    #[error("no human responder is listening")]
    ResponderGone,

    #[error("responder dropped the request without a disposition")]
    NoDisposition,

    #[error("console I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the human reports after taking over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The human finished and submitted the form.
    Submitted,
    /// The human abandoned the application.
    Closed,
    /// Neither automation nor the human could complete it.
    Failed,
}

impl Disposition {
    pub const ALL: [Disposition; 3] = [Disposition::Submitted, Disposition::Closed, Disposition::Failed];

    /// Terminal status for this disposition. Total: never `error_unknown`.
    pub fn to_status(self) -> JobStatus {
        match self {
            Disposition::Submitted => JobStatus::ManualInterventionSubmitted,
            Disposition::Closed => JobStatus::ManualInterventionClosedByUser,
            Disposition::Failed => JobStatus::ApplicationFailedAts,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Submitted => "submitted",
            Disposition::Closed => "closed",
            Disposition::Failed => "failed",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "submitted" => Ok(Disposition::Submitted),
            "c" | "closed" => Ok(Disposition::Closed),
            "f" | "failed" => Ok(Disposition::Failed),
            other => Err(format!("'{other}' is not one of submitted, closed, failed")),
        }
    }
}

/// Job context shown to the human.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InterventionRequest {
    pub job_id: String,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub application_url: String,
    /// Page the browser is on right now, if it could be read.
    pub current_url: Option<String>,
    /// One line per strategy attempted, in order.
    pub progress: Vec<String>,
    pub last_error: Option<String>,
}

/// A pending request. Dropping it without resolving counts as no disposition.
#[derive(Debug)]
pub struct Ticket {
    pub request: InterventionRequest,
    reply: oneshot::Sender<Disposition>,
}

impl Ticket {
    pub fn resolve(self, disposition: Disposition) {
        if self.reply.send(disposition).is_err() {
            warn!("[{}] Disposition arrived after the engine stopped waiting", self.request.job_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterventionState {
    Automating,
    AwaitingHuman,
    Resolved(Disposition),
}

/// Routes escalations to a responder. Shared by every worker in a run, so
/// state is tracked per job.
pub struct InterventionController {
    tickets: mpsc::Sender<Ticket>,
    states: watch::Sender<HashMap<String, InterventionState>>,
}

impl InterventionController {
    /// A controller and the receiving end a responder should serve.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Ticket>) {
        let (tickets, rx) = mpsc::channel(capacity.max(1));
        let (states, _) = watch::channel(HashMap::new());
        (Self { tickets, states }, rx)
    }

    pub fn state(&self, job_id: &str) -> InterventionState {
        self.states
            .borrow()
            .get(job_id)
            .cloned()
            .unwrap_or(InterventionState::Automating)
    }

    /// Jobs blocked on a human right now, sorted.
    pub fn awaiting(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self
            .states
            .borrow()
            .iter()
            .filter(|(_, state)| **state == InterventionState::AwaitingHuman)
            .map(|(job_id, _)| job_id.clone())
            .collect();
        jobs.sort();
        jobs
    }

    fn set_state(&self, job_id: &str, state: Option<InterventionState>) {
        self.states.send_modify(|states| match state {
            Some(state) => {
                states.insert(job_id.to_string(), state);
            }
            None => {
                states.remove(job_id);
            }
        });
    }

    /// Blocks until a human supplies a disposition.
    pub async fn escalate(&self, request: InterventionRequest) -> Result<Disposition, InterventionError> {
        let job_id = request.job_id.clone();
        let (reply, response) = oneshot::channel();

        if let InterventionState::Resolved(previous) = self.state(&job_id) {
            debug!("[{job_id}] Escalating again; last disposition was {previous}");
        }
        self.set_state(&job_id, Some(InterventionState::AwaitingHuman));
        info!("[{job_id}] Awaiting human disposition");

        let outcome = match self.tickets.send(Ticket { request, reply }).await {
            Ok(()) => response.await.map_err(|_| InterventionError::NoDisposition),
            Err(_) => Err(InterventionError::ResponderGone),
        };

        match &outcome {
            Ok(disposition) => {
                info!("[{job_id}] Human disposition: {disposition}");
                self.set_state(&job_id, Some(InterventionState::Resolved(*disposition)));
            }
            Err(e) => {
                warn!("[{job_id}] Intervention ended without a disposition: {e}");
                self.set_state(&job_id, None);
            }
        }
        outcome
    }
}
