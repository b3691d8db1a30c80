//! Per-connection move batching.
//!
//! A session owns one worker task per (connection, point). Move commands
//! queue up between batch ticks; each tick applies them in submission
//! order, saves the point, and emits the new position if it changed. A
//! slower save tick rewrites the point even when nothing moved.
//!
//! Both queues are bounded and never block the producer. A full command
//! queue or a full position queue drops the item being offered.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use pointcast_core::{MoveCommand, PointId, PointRepository, Position};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::metrics::{
    SESSION_BATCHES_TOTAL, SESSION_COMMANDS_DROPPED_TOTAL, SESSION_REPOSITORY_ERRORS_TOTAL, SESSIONS_ACTIVE,
};

const MIN_TICK: Duration = Duration::from_millis(1);

/// Producer side of a session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    point_id: PointId,
    commands: mpsc::Sender<MoveCommand>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl SessionHandle {
    /// Queue a move without waiting.
    ///
    /// Returns `false` if the command was a no-op, the queue was full, or
    /// the session has ended.
    pub fn push(&self, command: MoveCommand) -> bool {
        if command.is_noop() {
            return false;
        }
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(SESSION_COMMANDS_DROPPED_TOTAL).increment(1);
                debug!(point_id = %self.point_id, "command queue full, dropping move");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Point this session drives.
    pub fn point_id(&self) -> PointId {
        self.point_id
    }

    /// Commands dropped on a full queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the worker has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Stop the worker.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether two handles feed the same worker.
    pub fn same_session(&self, other: &Self) -> bool {
        self.commands.same_channel(&other.commands)
    }
}

/// Start a session worker for `point_id`.
///
/// Returns the command handle, the position stream and the worker task.
/// The worker stops when `cancel` fires or every handle is dropped; the
/// position stream ends with it.
pub fn spawn_session(
    repo: Arc<dyn PointRepository>,
    point_id: PointId,
    config: SessionConfig,
    cancel: CancellationToken,
) -> (SessionHandle, mpsc::Receiver<Position>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
    let (position_tx, position_rx) = mpsc::channel(config.position_buffer.max(1));

    let handle = SessionHandle {
        point_id,
        commands: command_tx,
        cancel: cancel.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    let worker = Worker {
        repo,
        point_id,
        config,
        cancel,
        commands: command_rx,
        positions: position_tx,
        pending: Vec::new(),
        last_sent: None,
    };
    gauge!(SESSIONS_ACTIVE).increment(1.0);
    let task = tokio::spawn(worker.run());
    (handle, position_rx, task)
}

struct Worker {
    repo: Arc<dyn PointRepository>,
    point_id: PointId,
    config: SessionConfig,
    cancel: CancellationToken,
    commands: mpsc::Receiver<MoveCommand>,
    positions: mpsc::Sender<Position>,
    pending: Vec<MoveCommand>,
    last_sent: Option<Position>,
}

impl Worker {
    async fn run(mut self) {
        // A zero period would panic inside `interval`.
        let mut batch = tokio::time::interval(self.config.batch_interval.max(MIN_TICK));
        batch.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let save_every = self.config.save_interval.max(MIN_TICK);
        let mut save = tokio::time::interval_at(Instant::now() + save_every, save_every);
        save.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(point_id = %self.point_id, "session started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = batch.tick() => self.apply_batch().await,
                _ = save.tick() => self.persist().await,
                command = self.commands.recv() => match command {
                    Some(command) => self.pending.push(command),
                    None => break,
                },
            }
        }

        self.commands.close();
        gauge!(SESSIONS_ACTIVE).decrement(1.0);
        debug!(point_id = %self.point_id, discarded = self.pending.len(), "session stopped");
    }

    async fn apply_batch(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.pending.push(command);
        }
        if self.pending.is_empty() {
            return;
        }
        let commands = std::mem::take(&mut self.pending);

        let mut point = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            got = self.repo.get(self.point_id) => match got {
                Ok(point) => point,
                Err(error) => {
                    counter!(SESSION_REPOSITORY_ERRORS_TOTAL, "op" => "get").increment(1);
                    warn!(point_id = %self.point_id, error = %error, discarded = commands.len(), "batch read failed");
                    return;
                }
            },
        };
        for command in &commands {
            point.move_by(command.dx, command.dy);
        }

        let saved = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            saved = self.repo.save(self.point_id, &point) => saved,
        };
        if let Err(error) = saved {
            counter!(SESSION_REPOSITORY_ERRORS_TOTAL, "op" => "save").increment(1);
            warn!(point_id = %self.point_id, error = %error, discarded = commands.len(), "batch save failed");
            return;
        }
        counter!(SESSION_BATCHES_TOTAL).increment(1);

        let position = point.position();
        if self.last_sent == Some(position) {
            return;
        }
        match self.positions.try_send(position) {
            Ok(()) => self.last_sent = Some(position),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(point_id = %self.point_id, "position queue full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn persist(&self) {
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            result = async {
                let point = self.repo.get(self.point_id).await?;
                self.repo.save(self.point_id, &point).await
            } => result,
        };
        if let Err(error) = result {
            counter!(SESSION_REPOSITORY_ERRORS_TOTAL, "op" => "persist").increment(1);
            warn!(point_id = %self.point_id, error = %error, "periodic save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use async_trait::async_trait;
    use pointcast_core::{Bounds, InMemoryPointRepository, Point, RepositoryError};

    fn point_one() -> PointId {
        PointId::new(1).unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn mv(dx: i32, dy: i32) -> MoveCommand {
        MoveCommand { dx, dy }
    }

    /// In-memory store that counts calls and can fail on demand.
    #[derive(Default)]
    struct Flaky {
        inner: InMemoryPointRepository,
        fail_gets: AtomicUsize,
        gets: AtomicUsize,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl PointRepository for Flaky {
        async fn get(&self, id: PointId) -> Result<Point, RepositoryError> {
            let _ = self.gets.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_gets
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RepositoryError::Unavailable("disk on fire".into()));
            }
            self.inner.get(id).await
        }

        async fn save(&self, id: PointId, point: &Point) -> Result<(), RepositoryError> {
            let _ = self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(id, point).await
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Position>) -> Option<Position> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn clamps_each_move_in_order() {
        let repo = Arc::new(InMemoryPointRepository::default());
        let (handle, mut rx, _task) = spawn_session(repo.clone(), point_one(), config(), CancellationToken::new());

        assert!(handle.push(mv(500, 0)));
        assert!(handle.push(mv(50, 0)));

        assert_eq!(next(&mut rx).await, Some(Position { x: 799, y: 300 }));
        let stored = repo.get(point_one()).await.unwrap();
        assert_eq!(stored.position(), Position { x: 799, y: 300 });
    }

    #[tokio::test(start_paused = true)]
    async fn order_matters_at_the_boundary() {
        let bounds = Bounds::default();
        let repo = Arc::new(InMemoryPointRepository::new(bounds));
        repo.save(point_one(), &Point::at(Position { x: 790, y: 0 }, bounds))
            .await
            .unwrap();
        let (handle, mut rx, _task) = spawn_session(repo.clone(), point_one(), config(), CancellationToken::new());

        assert!(handle.push(mv(20, 0)));
        assert!(handle.push(mv(-20, 0)));
        // 790 -> 799 (clamped) -> 779; the reverse order would end at 790.
        assert_eq!(next(&mut rx).await, Some(Position { x: 779, y: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_position_is_not_emitted() {
        let repo = Arc::new(InMemoryPointRepository::default());
        let (handle, mut rx, _task) = spawn_session(repo, point_one(), config(), CancellationToken::new());

        assert!(handle.push(mv(1000, 0)));
        assert_eq!(next(&mut rx).await, Some(Position { x: 799, y: 300 }));

        assert!(handle.push(mv(5, 0)));
        assert_eq!(next(&mut rx).await, None);

        assert!(handle.push(mv(-1, 0)));
        assert_eq!(next(&mut rx).await, Some(Position { x: 798, y: 300 }));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_intervals_still_tick() {
        let repo = Arc::new(InMemoryPointRepository::default());
        let cfg = SessionConfig {
            batch_interval: Duration::ZERO,
            save_interval: Duration::ZERO,
            ..config()
        };
        let (handle, mut rx, task) = spawn_session(repo, point_one(), cfg, CancellationToken::new());

        assert!(handle.push(mv(3, 4)));
        assert_eq!(next(&mut rx).await, Some(Position { x: 403, y: 304 }));
        assert!(!task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn one_update_per_batch() {
        let repo = Arc::new(InMemoryPointRepository::default());
        let (handle, mut rx, _task) = spawn_session(repo, point_one(), config(), CancellationToken::new());

        for _ in 0..10 {
            assert!(handle.push(mv(1, 1)));
        }
        assert_eq!(next(&mut rx).await, Some(Position { x: 410, y: 310 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn noop_moves_are_not_queued() {
        let repo = Arc::new(Flaky::default());
        let (handle, mut rx, _task) = spawn_session(repo.clone(), point_one(), config(), CancellationToken::new());

        assert!(!handle.push(mv(0, 0)));
        assert_eq!(handle.dropped(), 0);
        assert_eq!(next(&mut rx).await, None);
        assert_eq!(repo.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drops_newest_without_blocking() {
        let repo = Arc::new(InMemoryPointRepository::default());
        let cfg = SessionConfig {
            command_buffer: 2,
            ..config()
        };
        let (handle, mut rx, _task) = spawn_session(repo, point_one(), cfg, CancellationToken::new());

        // The worker has not run yet, so only two commands fit.
        let accepted: Vec<bool> = (1..=5).map(|dx| handle.push(mv(dx, 0))).collect();
        assert_eq!(accepted, vec![true, true, false, false, false]);
        assert_eq!(handle.dropped(), 3);

        assert_eq!(next(&mut rx).await, Some(Position { x: 403, y: 300 }));
        assert!(!handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn repository_failure_discards_batch_and_continues() {
        let repo = Arc::new(Flaky::default());
        repo.fail_gets.store(1, Ordering::SeqCst);
        let (handle, mut rx, _task) = spawn_session(repo.clone(), point_one(), config(), CancellationToken::new());

        assert!(handle.push(mv(10, 0)));
        assert_eq!(next(&mut rx).await, None);
        assert_eq!(repo.saves.load(Ordering::SeqCst), 0);

        assert!(handle.push(mv(5, 0)));
        assert_eq!(next(&mut rx).await, Some(Position { x: 405, y: 300 }));
    }

    #[tokio::test(start_paused = true)]
    async fn save_tick_persists_without_traffic() {
        let repo = Arc::new(Flaky::default());
        let (_handle, _rx, _task) = spawn_session(repo.clone(), point_one(), config(), CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(repo.saves.load(Ordering::SeqCst), 2);
        assert_eq!(repo.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_session() {
        let repo = Arc::new(InMemoryPointRepository::default());
        let cancel = CancellationToken::new();
        let (handle, mut rx, task) = spawn_session(repo, point_one(), config(), cancel.clone());

        cancel.cancel();
        task.await.unwrap();
        assert!(handle.is_closed());
        assert!(!handle.push(mv(1, 0)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_ends_the_session() {
        let repo = Arc::new(InMemoryPointRepository::default());
        let (handle, mut rx, task) = spawn_session(repo, point_one(), config(), CancellationToken::new());
        drop(handle);
        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn handles_compare_by_channel() {
        let repo: Arc<dyn PointRepository> = Arc::new(InMemoryPointRepository::default());
        let (a, _rx_a, _ta) = spawn_session(Arc::clone(&repo), point_one(), config(), CancellationToken::new());
        let (b, _rx_b, _tb) = spawn_session(repo, point_one(), config(), CancellationToken::new());
        assert!(a.same_session(&a.clone()));
        assert!(!a.same_session(&b));
        assert_eq!(a.point_id(), point_one());
    }
}
