//! Challenge-response handling: register, solve, hand back, forget.
//!
//! A challenge moves `Detected -> Registered -> Solving -> Solved | Cancelled
//! -> Consumed`. The record lives on the shared [`ChallengeBoard`] only
//! between registration and consumption; consumption happens on every exit
//! path, including timeouts and a dropped monitor future.

pub mod board;
pub mod solver;

pub use board::{CaptchaChallenge, ChallengeBoard, ChallengeState, Resolution};
pub use solver::{CaptchaSolver, HttpSolver, SolveOutcome};

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Removes the board entry when the solve attempt ends, however it ends.
struct Registration<'a> {
    board: &'a ChallengeBoard,
    session_id: &'a str,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.board.consume(self.session_id);
    }
}

pub struct CaptchaWorkflow {
    board: Arc<ChallengeBoard>,
    solver: Option<Arc<dyn CaptchaSolver>>,
    endpoint: Option<String>,
    timeout: Duration,
}

impl CaptchaWorkflow {
    pub fn new(
        board: Arc<ChallengeBoard>,
        solver: Option<Arc<dyn CaptchaSolver>>,
        endpoint: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            board,
            solver,
            endpoint,
            timeout,
        }
    }

    pub fn board(&self) -> &Arc<ChallengeBoard> {
        &self.board
    }

    /// Waits for a solution to the challenge shown in `session_id`.
    ///
    /// Races the external solver (when one is configured) against solutions
    /// submitted out of band through the board, bounded by the timeout.
    pub async fn resolve(&self, session_id: &str, challenge_url: &str) -> Result<String> {
        if challenge_url.trim().is_empty() {
            return Err(Error::MissingChallengeUrl);
        }

        let rx = self
            .board
            .register(CaptchaChallenge::new(session_id, challenge_url));
        let _registration = Registration {
            board: &self.board,
            session_id,
        };
        self.board.mark_solving(session_id);

        match tokio::time::timeout(self.timeout, self.race(challenge_url, rx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::SolverTimeout(self.timeout)),
        }
    }

    async fn race(&self, challenge_url: &str, rx: oneshot::Receiver<Resolution>) -> Result<String> {
        let external = async {
            match (&self.solver, &self.endpoint) {
                (Some(solver), Some(endpoint)) => solver.solve(challenge_url, endpoint).await,
                _ => futures::future::pending().await,
            }
        };

        tokio::select! {
            outcome = external => match outcome? {
                SolveOutcome::Solved(token) => Ok(token),
                SolveOutcome::Cancelled => Err(Error::SolveCancelled),
            },
            resolution = rx => match resolution {
                Ok(Resolution::Solved(token)) => Ok(token),
                Ok(Resolution::Cancelled) | Err(_) => Err(Error::SolveCancelled),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedSolver(Result<SolveOutcome>);

    #[async_trait]
    impl CaptchaSolver for FixedSolver {
        async fn solve(&self, _url: &str, _endpoint: &str) -> Result<SolveOutcome> {
            match &self.0 {
                Ok(outcome) => Ok(outcome.clone()),
                Err(e) => Err(Error::Solver(e.to_string())),
            }
        }
    }

    struct StuckSolver;

    #[async_trait]
    impl CaptchaSolver for StuckSolver {
        async fn solve(&self, _url: &str, _endpoint: &str) -> Result<SolveOutcome> {
            futures::future::pending().await
        }
    }

    fn workflow(solver: Option<Arc<dyn CaptchaSolver>>) -> CaptchaWorkflow {
        CaptchaWorkflow::new(
            Arc::new(ChallengeBoard::new()),
            solver,
            Some("http://solver.local/solve".into()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn empty_url_never_registers() {
        let wf = workflow(None);
        assert!(matches!(
            wf.resolve("s1", "  ").await,
            Err(Error::MissingChallengeUrl)
        ));
        assert!(wf.board().is_empty());
    }

    #[tokio::test]
    async fn external_solution_is_returned_and_record_consumed() {
        let wf = workflow(Some(Arc::new(FixedSolver(Ok(SolveOutcome::Solved("XKCD".into()))))));
        assert_eq!(wf.resolve("s1", "https://img/c.jpg").await.unwrap(), "XKCD");
        assert!(!wf.board().contains("s1"));
    }

    #[tokio::test]
    async fn external_cancellation_is_not_solved() {
        let wf = workflow(Some(Arc::new(FixedSolver(Ok(SolveOutcome::Cancelled)))));
        assert!(matches!(
            wf.resolve("s1", "https://img/c.jpg").await,
            Err(Error::SolveCancelled)
        ));
        assert!(wf.board().is_empty());
    }

    #[tokio::test]
    async fn solver_error_surfaces() {
        let wf = workflow(Some(Arc::new(FixedSolver(Err(Error::Solver("down".into()))))));
        assert!(matches!(
            wf.resolve("s1", "https://img/c.jpg").await,
            Err(Error::Solver(_))
        ));
        assert!(wf.board().is_empty());
    }

    #[tokio::test]
    async fn out_of_band_solution_wins_over_stuck_solver() {
        let wf = Arc::new(workflow(Some(Arc::new(StuckSolver))));
        let waiter = {
            let wf = wf.clone();
            tokio::spawn(async move { wf.resolve("s1", "https://img/c.jpg").await })
        };

        while !wf.board().contains("s1") {
            tokio::task::yield_now().await;
        }
        assert_eq!(wf.board().state("s1"), Some(ChallengeState::Solving));
        assert!(wf.board().submit_solution("s1", "HUMAN"));

        assert_eq!(waiter.await.unwrap().unwrap(), "HUMAN");
        assert!(!wf.board().contains("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_timeout() {
        let wf = workflow(Some(Arc::new(StuckSolver)));
        assert!(matches!(
            wf.resolve("s1", "https://img/c.jpg").await,
            Err(Error::SolverTimeout(_))
        ));
        assert!(wf.board().is_empty());
    }
}
