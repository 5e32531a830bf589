use crate::error::DrawRejected;
use crate::rng::RandomSource;
use crate::types::{CommitStatus, DrawPhase, DrawView};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawSession {
    pub id: u64,
    pub phase: DrawPhase,
    pub candidate_id: Option<String>,
    pub winner_id: Option<String>,
    pub commit: Option<CommitStatus>,
    roster: Vec<String>,
    spins: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpinStep {
    Rolling { candidate_id: String },
    Revealed { session_id: u64, winner_id: String },
}

/// Winner draw state machine: idle -> spinning -> revealed -> idle.
///
/// Timing lives outside; the owner calls [`DrawEngine::spin`] once per spin
/// interval. The roster is frozen when the draw starts.
#[derive(Clone, Debug)]
pub struct DrawEngine {
    spin_cycles: u32,
    session: Option<DrawSession>,
    next_session_id: u64,
}

impl DrawEngine {
    pub fn new(spin_cycles: u32) -> Self {
        Self {
            spin_cycles,
            session: None,
            next_session_id: 1,
        }
    }

    pub fn phase(&self) -> DrawPhase {
        self.session
            .as_ref()
            .map(|session| session.phase)
            .unwrap_or(DrawPhase::Idle)
    }

    pub fn session(&self) -> Option<&DrawSession> {
        self.session.as_ref()
    }

    pub fn is_spinning(&self) -> bool {
        self.phase() == DrawPhase::Spinning
    }

    /// Number of `spin` calls a draw takes, reveal included.
    pub fn ticks_per_draw(&self) -> u32 {
        self.spin_cycles + 1
    }

    pub fn start(&mut self, roster: Vec<String>) -> Result<u64, DrawRejected> {
        if self.is_spinning() {
            return Err(DrawRejected::AlreadySpinning);
        }
        if roster.is_empty() {
            return Err(DrawRejected::EmptyRoster);
        }
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.session = Some(DrawSession {
            id,
            phase: DrawPhase::Spinning,
            candidate_id: None,
            winner_id: None,
            commit: None,
            roster,
            spins: 0,
        });
        Ok(id)
    }

    /// Advances the rolling highlight. Returns `None` when no draw is spinning.
    pub fn spin<R: RandomSource>(&mut self, rng: &mut R) -> Option<SpinStep> {
        let spin_cycles = self.spin_cycles;
        let session = self
            .session
            .as_mut()
            .filter(|session| session.phase == DrawPhase::Spinning)?;

        if session.spins < spin_cycles {
            session.spins += 1;
            let candidate_id = session.roster[rng.pick_index(session.roster.len())].clone();
            session.candidate_id = Some(candidate_id.clone());
            return Some(SpinStep::Rolling { candidate_id });
        }

        // Independent of the last highlight.
        let winner_id = session.roster[rng.pick_index(session.roster.len())].clone();
        session.phase = DrawPhase::Revealed;
        session.candidate_id = Some(winner_id.clone());
        session.winner_id = Some(winner_id.clone());
        session.commit = Some(CommitStatus::Pending);
        Some(SpinStep::Revealed {
            session_id: session.id,
            winner_id,
        })
    }

    /// Records the remote commit result. Ignored if the session is gone.
    pub fn record_commit(&mut self, session_id: u64, status: CommitStatus) {
        if let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.id == session_id)
        {
            session.commit = Some(status);
        }
    }

    pub fn dismiss(&mut self) -> bool {
        if self.phase() != DrawPhase::Revealed {
            return false;
        }
        self.session = None;
        true
    }

    pub fn can_reset_winners(&self) -> bool {
        !self.is_spinning()
    }

    pub fn view(&self) -> DrawView {
        match &self.session {
            Some(session) => DrawView {
                phase: session.phase,
                candidate_id: session.candidate_id.clone(),
                winner_id: session.winner_id.clone(),
                commit: session.commit.clone(),
            },
            None => DrawView {
                phase: DrawPhase::Idle,
                candidate_id: None,
                winner_id: None,
                commit: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::rng::{Rng, ScriptedRng};

    fn roster(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn run_to_reveal<R: RandomSource>(engine: &mut DrawEngine, rng: &mut R) -> (u32, String) {
        let mut rolls = 0;
        loop {
            match engine.spin(rng).expect("draw is spinning") {
                SpinStep::Rolling { .. } => rolls += 1,
                SpinStep::Revealed { winner_id, .. } => return (rolls, winner_id),
            }
        }
    }

    #[test]
    fn empty_roster_is_rejected() {
        let mut engine = DrawEngine::new(20);
        assert_eq!(engine.start(Vec::new()), Err(DrawRejected::EmptyRoster));
        assert_eq!(engine.phase(), DrawPhase::Idle);
    }

    #[test]
    fn second_start_while_spinning_is_a_no_op() {
        let mut engine = DrawEngine::new(3);
        let first = engine.start(roster(&["a", "b"])).expect("first start");
        assert_eq!(
            engine.start(roster(&["c"])),
            Err(DrawRejected::AlreadySpinning)
        );
        assert_eq!(engine.session().map(|s| s.id), Some(first));

        let (_, winner) = run_to_reveal(&mut engine, &mut Rng::new(1));
        assert!(winner == "a" || winner == "b");
    }

    #[test]
    fn rolls_fixed_cycles_then_reveals_once() {
        let mut engine = DrawEngine::new(20);
        engine.start(roster(&["a", "b", "c"])).expect("start");
        let mut rng = Rng::new(2);
        let (rolls, winner) = run_to_reveal(&mut engine, &mut rng);
        assert_eq!(rolls, 20);
        assert_eq!(engine.phase(), DrawPhase::Revealed);
        assert_eq!(engine.view().winner_id.as_deref(), Some(winner.as_str()));
        assert_eq!(engine.view().commit, Some(CommitStatus::Pending));
        assert_eq!(engine.spin(&mut rng), None);
    }

    #[test]
    fn winner_is_independent_of_last_candidate() {
        let mut engine = DrawEngine::new(1);
        engine.start(roster(&["a", "b"])).expect("start");
        let mut rng = ScriptedRng::new(vec![0.0, 0.9]);
        assert_eq!(
            engine.spin(&mut rng),
            Some(SpinStep::Rolling {
                candidate_id: "a".to_string()
            })
        );
        assert!(matches!(
            engine.spin(&mut rng),
            Some(SpinStep::Revealed { winner_id, .. }) if winner_id == "b"
        ));
    }

    #[test]
    fn dismiss_only_from_revealed() {
        let mut engine = DrawEngine::new(2);
        assert!(!engine.dismiss());
        engine.start(roster(&["a"])).expect("start");
        assert!(!engine.dismiss());
        assert!(!engine.can_reset_winners());
        run_to_reveal(&mut engine, &mut Rng::new(3));
        assert!(engine.can_reset_winners());
        assert!(engine.dismiss());
        assert_eq!(engine.phase(), DrawPhase::Idle);
        assert!(engine.view().winner_id.is_none());
    }

    #[test]
    fn new_draw_may_start_from_revealed() {
        let mut engine = DrawEngine::new(1);
        let first = engine.start(roster(&["a"])).expect("start");
        run_to_reveal(&mut engine, &mut Rng::new(4));
        let second = engine.start(roster(&["b"])).expect("restart replaces session");
        assert_ne!(first, second);
        assert_eq!(engine.phase(), DrawPhase::Spinning);
        assert!(engine.view().winner_id.is_none());
    }

    #[test]
    fn commit_status_only_applies_to_its_session() {
        let mut engine = DrawEngine::new(1);
        let first = engine.start(roster(&["a"])).expect("start");
        run_to_reveal(&mut engine, &mut Rng::new(5));
        engine.record_commit(first + 100, CommitStatus::Committed);
        assert_eq!(engine.view().commit, Some(CommitStatus::Pending));
        engine.record_commit(first, CommitStatus::Failed("offline".to_string()));
        assert_eq!(
            engine.view().commit,
            Some(CommitStatus::Failed("offline".to_string()))
        );
        assert_eq!(engine.phase(), DrawPhase::Revealed);
    }

    #[test]
    fn winners_are_uniform_over_roster() {
        let ids = roster(&["a", "b", "c", "d", "e"]);
        let mut engine = DrawEngine::new(0);
        let mut rng = Rng::new(2024);
        let mut counts: HashMap<String, u32> = HashMap::new();
        let draws = 10_000;
        for _ in 0..draws {
            engine.start(ids.clone()).expect("start");
            let (_, winner) = run_to_reveal(&mut engine, &mut rng);
            *counts.entry(winner).or_insert(0) += 1;
            assert!(engine.dismiss());
        }
        assert_eq!(counts.len(), 5);
        for (id, count) in counts {
            let share = count as f64 / draws as f64;
            assert!((share - 0.2).abs() < 0.025, "{id} won {share:.3} of draws");
        }
    }
}
