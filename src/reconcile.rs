//! Lifetime of the pending overlay across one rebuild.
//!
//! ```text
//! Idle --submit--> Armed --suppression window--> Draining --last confirm / grace--> Idle
//! ```
//!
//! Each submission starts a new generation. Once the rebuild response names
//! the new index, status read from any other index belongs to an older
//! generation and never confirms anything. Both the suppression window and the
//! grace period run from the submission.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::model::{IndexStatus, MergedNode};
use crate::overlay::PendingOverlay;
use crate::path_set::PathSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Raw status is ignored entirely.
    Armed,
    /// Confirmed files are released from the overlay.
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

#[derive(Debug)]
pub struct Reconciler {
    overlay: PendingOverlay,
    /// Paths of the latest submission. Outlives the overlay until the grace
    /// period ends so setup errors under them still read as pending.
    submitted: PathSet,
    generation: u64,
    armed_at: Option<Instant>,
    bound_at: Option<Instant>,
    /// End of the grace period of the latest submission.
    active_until: Option<Instant>,
    target_index: Option<String>,
    suppression_window: Duration,
    grace_period: Duration,
}

impl Reconciler {
    pub fn new(suppression_window: Duration, grace_period: Duration) -> Self {
        Self {
            overlay: PendingOverlay::new(),
            submitted: PathSet::new(),
            generation: 0,
            armed_at: None,
            bound_at: None,
            active_until: None,
            target_index: None,
            suppression_window,
            grace_period: grace_period.max(suppression_window),
        }
    }

    pub fn overlay(&self) -> &PendingOverlay {
        &self.overlay
    }

    pub fn generation(&self) -> Generation {
        Generation(self.generation)
    }

    /// `true` between `arm` and `bind_index`/`abort`, unless the grace period
    /// ran out first.
    pub fn is_submitting(&self) -> bool {
        self.armed_at.is_some() && self.bound_at.is_none()
    }

    pub fn phase(&self, now: Instant) -> Phase {
        if !self.overlay.is_active() {
            return Phase::Idle;
        }
        match self.armed_at {
            Some(armed) if now >= armed + self.grace_period => Phase::Idle,
            Some(armed) if self.bound_at.is_none() || now < armed + self.suppression_window => {
                Phase::Armed
            }
            Some(_) => Phase::Draining,
            None => Phase::Idle,
        }
    }

    /// The latest submission is inside its grace period, whether or not its
    /// overlay has drained yet.
    pub fn is_rebuilding(&self, now: Instant) -> bool {
        self.active_until.is_some_and(|until| now < until)
    }

    /// Show `paths` as pending from now on. Must run before the rebuild request.
    pub fn arm<I, S>(&mut self, paths: I, now: Instant) -> Generation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generation += 1;
        self.overlay.arm(paths);
        self.submitted = self.overlay.pending().clone();
        self.armed_at = Some(now);
        self.bound_at = None;
        self.active_until = Some(now + self.grace_period);
        self.target_index = None;
        info!(
            "armed pending overlay (generation {}, {} paths)",
            self.generation,
            self.overlay.pending().len()
        );
        Generation(self.generation)
    }

    /// Record the index created by the rebuild of `generation`.
    pub fn bind_index(&mut self, generation: Generation, index_id: &str, now: Instant) -> bool {
        if generation.0 != self.generation {
            debug!("ignoring index {} from superseded generation {}", index_id, generation.0);
            return false;
        }
        self.target_index = Some(index_id.to_string());
        self.bound_at = Some(now);
        true
    }

    /// The rebuild of `generation` failed: nothing is pending any more.
    pub fn abort(&mut self, generation: Generation) -> bool {
        if generation.0 != self.generation {
            return false;
        }
        let dropped = self.overlay.clear();
        self.submitted.clear();
        self.active_until = None;
        self.reset();
        info!(
            "rebuild generation {} failed, cleared {} pending paths",
            generation.0, dropped
        );
        true
    }

    /// Force-clear the overlay once the grace period has elapsed, answered
    /// or not.
    pub fn tick(&mut self, now: Instant) -> Phase {
        if let Some(armed) = self.armed_at {
            if now >= armed + self.grace_period {
                let dropped = self.overlay.clear();
                if self.bound_at.is_none() {
                    info!(
                        "rebuild generation {} unanswered after {:?}",
                        self.generation, self.grace_period
                    );
                }
                self.reset();
                if dropped > 0 {
                    info!(
                        "grace period elapsed, cleared {} unconfirmed pending paths",
                        dropped
                    );
                }
            } else if self.bound_at.is_some() && !self.overlay.is_active() {
                self.reset();
            }
        }
        if !self.is_rebuilding(now) {
            self.submitted.clear();
        }
        self.phase(now)
    }

    fn reset(&mut self) {
        self.armed_at = None;
        self.bound_at = None;
    }

    /// Feed freshly merged nodes read from `index_id`. Returns the overlay
    /// members released by this pass.
    pub fn observe(&mut self, index_id: &str, nodes: &[MergedNode], now: Instant) -> Vec<String> {
        if self.tick(now) != Phase::Draining {
            return Vec::new();
        }
        if self.target_index.as_deref() != Some(index_id) {
            return Vec::new();
        }

        let mut released = Vec::new();
        for node in nodes.iter().filter(|n| !n.is_dir() && n.status.confirms_rebuild()) {
            if let Some(member) = self.overlay.release(node.path()) {
                debug!("{} confirmed as {}, released {}", node.path(), node.status, member);
                released.push(member);
            }
        }
        if !released.is_empty() && !self.overlay.is_active() {
            info!("all pending paths confirmed (generation {})", self.generation);
            self.reset();
        }
        released
    }

    /// Status to display for `path` read from `index_id`. A setup `Error`
    /// under a submitted path keeps reading as `Pending` for the rest of the
    /// grace period, after the overlay has released it.
    pub fn effective_status(
        &self,
        index_id: &str,
        path: &str,
        raw: IndexStatus,
        now: Instant,
    ) -> IndexStatus {
        if self.overlay.is_active() {
            return self.overlay.effective_status(path, raw);
        }
        if raw == IndexStatus::Error
            && self.is_rebuilding(now)
            && self.target_index.as_deref() == Some(index_id)
            && self.submitted.covers(path)
        {
            return IndexStatus::Pending;
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceNode;

    const SUPPRESS: Duration = Duration::from_secs(3);
    const GRACE: Duration = Duration::from_secs(30);

    fn file(path: &str, status: IndexStatus) -> MergedNode {
        MergedNode {
            node: ResourceNode::file(format!("id:{path}"), path),
            status,
        }
    }

    fn armed(paths: &[&str]) -> (Reconciler, Generation, Instant) {
        let mut r = Reconciler::new(SUPPRESS, GRACE);
        let t0 = Instant::now();
        let generation = r.arm(paths.iter().copied(), t0);
        (r, generation, t0)
    }

    #[test]
    fn arming_is_immediate() {
        let (r, _, t0) = armed(&["/x"]);
        assert_eq!(r.phase(t0), Phase::Armed);
        assert!(r.overlay().pending().contains("/x"));
        assert_eq!(
            r.effective_status("kb-1", "/x/f1.txt", IndexStatus::NotIndexed, t0),
            IndexStatus::Pending
        );
        assert_eq!(
            r.effective_status("kb-1", "/old/kept.txt", IndexStatus::Indexed, t0),
            IndexStatus::NotIndexed
        );
    }

    #[test]
    fn confirmation_inside_suppression_window_is_ignored() {
        let (mut r, generation, t0) = armed(&["/x"]);
        r.bind_index(generation, "kb-2", t0);
        let released = r.observe(
            "kb-2",
            &[file("/x/f1.txt", IndexStatus::Indexed)],
            t0 + Duration::from_secs(1),
        );
        assert!(released.is_empty());
        assert!(r.overlay().is_active());
    }

    #[test]
    fn indexed_file_releases_covering_folder() {
        let (mut r, generation, t0) = armed(&["/x"]);
        r.bind_index(generation, "kb-2", t0);
        let later = t0 + SUPPRESS + Duration::from_millis(1);
        let released = r.observe("kb-2", &[file("/x/f1.txt", IndexStatus::Indexed)], later);
        assert_eq!(released, vec!["/x".to_string()]);
        assert_eq!(r.phase(later), Phase::Idle);
        assert_eq!(
            r.effective_status("kb-2", "/x/f1.txt", IndexStatus::Indexed, later),
            IndexStatus::Indexed
        );
    }

    #[test]
    fn setup_errors_and_absent_files_do_not_confirm() {
        let (mut r, generation, t0) = armed(&["/x/a.txt", "/x/b.txt"]);
        r.bind_index(generation, "kb-2", t0);
        let later = t0 + SUPPRESS * 2;
        let released = r.observe(
            "kb-2",
            &[
                file("/x/a.txt", IndexStatus::Error),
                file("/x/b.txt", IndexStatus::NotIndexed),
            ],
            later,
        );
        assert!(released.is_empty());

        let released = r.observe(
            "kb-2",
            &[
                file("/x/a.txt", IndexStatus::Pending),
                file("/x/b.txt", IndexStatus::Error),
            ],
            later,
        );
        assert_eq!(released, vec!["/x/a.txt".to_string()]);
        assert_eq!(r.phase(later), Phase::Draining);
    }

    #[test]
    fn status_from_previous_index_never_confirms() {
        let (mut r, generation, t0) = armed(&["/x"]);
        let later = t0 + SUPPRESS * 2;
        // Response not in yet: no target index.
        assert!(r
            .observe("kb-1", &[file("/x/f.txt", IndexStatus::Indexed)], later)
            .is_empty());

        r.bind_index(generation, "kb-2", t0);
        assert!(r
            .observe("kb-1", &[file("/x/f.txt", IndexStatus::Indexed)], later)
            .is_empty());
        assert!(r.overlay().is_active());
    }

    #[test]
    fn grace_period_clears_unconfirmed_paths() {
        let (mut r, generation, t0) = armed(&["/never"]);
        r.bind_index(generation, "kb-2", t0);
        assert_eq!(r.tick(t0 + GRACE - Duration::from_millis(1)), Phase::Draining);
        assert_eq!(r.tick(t0 + GRACE), Phase::Idle);
        assert!(!r.overlay().is_active());
    }

    #[test]
    fn unanswered_submission_is_cleared_after_grace() {
        let (mut r, _, t0) = armed(&["/x"]);
        assert_eq!(r.tick(t0 + Duration::from_secs(1)), Phase::Armed);
        assert!(r.is_submitting());

        let deadline = t0 + GRACE;
        assert_eq!(r.tick(deadline), Phase::Idle);
        assert!(!r.overlay().is_active());
        assert!(!r.is_submitting());
        assert!(!r.is_rebuilding(deadline));
    }

    #[test]
    fn sibling_in_setup_keeps_rebuild_active_after_overlay_drains() {
        let (mut r, generation, t0) = armed(&["/x"]);
        r.bind_index(generation, "kb-2", t0);
        let later = t0 + SUPPRESS + Duration::from_millis(1);
        let released = r.observe(
            "kb-2",
            &[
                file("/x/a.txt", IndexStatus::Pending),
                file("/x/b.txt", IndexStatus::Error),
            ],
            later,
        );
        assert_eq!(released, vec!["/x".to_string()]);
        assert!(!r.overlay().is_active());
        assert!(r.is_rebuilding(later));
        assert_eq!(
            r.effective_status("kb-2", "/x/b.txt", IndexStatus::Error, later),
            IndexStatus::Pending
        );
        assert_eq!(
            r.effective_status("kb-1", "/x/b.txt", IndexStatus::Error, later),
            IndexStatus::Error
        );
        assert_eq!(
            r.effective_status("kb-2", "/y/c.txt", IndexStatus::Error, later),
            IndexStatus::Error
        );

        let expired = t0 + GRACE;
        r.tick(expired);
        assert!(!r.is_rebuilding(expired));
        assert_eq!(
            r.effective_status("kb-2", "/x/b.txt", IndexStatus::Error, expired),
            IndexStatus::Error
        );
    }

    #[test]
    fn abort_only_affects_current_generation() {
        let (mut r, first, t0) = armed(&["/a"]);
        let second = r.arm(["/b"], t0);
        assert!(!r.abort(first));
        assert!(r.overlay().covers("/b/x"));
        assert!(!r.bind_index(first, "kb-old", t0));

        assert!(r.abort(second));
        assert!(!r.overlay().is_active());
        assert!(!r.is_rebuilding(t0));
    }

    #[test]
    fn dirs_never_confirm() {
        let (mut r, generation, t0) = armed(&["/x"]);
        r.bind_index(generation, "kb-2", t0);
        let dir = MergedNode {
            node: ResourceNode::dir("d", "/x/sub"),
            status: IndexStatus::Indexed,
        };
        assert!(r.observe("kb-2", &[dir], t0 + SUPPRESS * 2).is_empty());
    }
}
