//! Pending challenges, shared between monitors and solution callbacks.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub session_id: String,
    pub challenge_url: String,
    pub solved: bool,
    pub solution: Option<String>,
}

impl CaptchaChallenge {
    pub fn new(session_id: impl Into<String>, challenge_url: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            challenge_url: challenge_url.into(),
            solved: false,
            solution: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Registered,
    Solving,
    Solved,
    Cancelled,
}

/// How a challenge was settled by a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Solved(String),
    Cancelled,
}

struct Pending {
    challenge: CaptchaChallenge,
    state: ChallengeState,
    notify: Option<oneshot::Sender<Resolution>>,
}

#[derive(Default)]
pub struct ChallengeBoard {
    pending: Mutex<HashMap<String, Pending>>,
}

impl ChallengeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a challenge and returns the receiver its resolution arrives on.
    /// A challenge already pending for the same session is superseded.
    pub fn register(&self, challenge: CaptchaChallenge) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        let id = challenge.session_id.clone();
        let previous = self.pending.lock().insert(
            id.clone(),
            Pending {
                challenge,
                state: ChallengeState::Registered,
                notify: Some(tx),
            },
        );
        if previous.is_some() {
            log::warn!("Challenge for session {} superseded", id);
        }
        rx
    }

    pub fn mark_solving(&self, session_id: &str) {
        if let Some(pending) = self.pending.lock().get_mut(session_id) {
            pending.state = ChallengeState::Solving;
        }
    }

    /// Stores a solution and wakes the waiting monitor. Returns false when no
    /// challenge is pending for `session_id`.
    pub fn submit_solution(&self, session_id: &str, solution: &str) -> bool {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(session_id) else {
            return false;
        };
        entry.challenge.solved = true;
        entry.challenge.solution = Some(solution.to_string());
        entry.state = ChallengeState::Solved;
        if let Some(tx) = entry.notify.take() {
            let _ = tx.send(Resolution::Solved(solution.to_string()));
        }
        true
    }

    /// Vetoes a pending challenge; the waiting monitor unblocks unsolved.
    pub fn cancel(&self, session_id: &str) -> bool {
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(session_id) else {
            return false;
        };
        entry.state = ChallengeState::Cancelled;
        if let Some(tx) = entry.notify.take() {
            let _ = tx.send(Resolution::Cancelled);
        }
        true
    }

    /// Removes the record. After this the session has no pending challenge.
    pub fn consume(&self, session_id: &str) -> Option<CaptchaChallenge> {
        self.pending
            .lock()
            .remove(session_id)
            .map(|pending| pending.challenge)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.pending.lock().contains_key(session_id)
    }

    pub fn state(&self, session_id: &str) -> Option<ChallengeState> {
        self.pending.lock().get(session_id).map(|p| p.state)
    }

    pub fn get(&self, session_id: &str) -> Option<CaptchaChallenge> {
        self.pending.lock().get(session_id).map(|p| p.challenge.clone())
    }

    /// Every pending challenge, ordered by session id.
    pub fn snapshot(&self) -> Vec<CaptchaChallenge> {
        let mut challenges: Vec<CaptchaChallenge> = self
            .pending
            .lock()
            .values()
            .map(|p| p.challenge.clone())
            .collect();
        challenges.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        challenges
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
