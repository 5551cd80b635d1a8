use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use qi_core::{CheckpointSink, OptimizationState, OptimizerConfig, ParameterSet, SinkError, StopReason};

use crate::error::{Result, StoreError};
use crate::params_doc::{params_to_toml, parse_params, save_params};
use crate::schema;

pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: Uuid,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub case_source: String,
    pub case_count: usize,
    pub initial_score: Option<f64>,
    pub best_score: Option<f64>,
    pub iterations: usize,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub iteration: usize,
    pub score: f64,
    pub params: ParameterSet,
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::InvalidData(format!("bad run id {s:?}: {e}")))
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let result = stmt.query_row([key], |row| row.get(0)).optional()?;
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Runs ---

    pub fn begin_run(
        &self,
        case_source: &str,
        case_count: usize,
        config: &OptimizerConfig,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let config_json = serde_json::to_string(config)
            .map_err(|e| StoreError::InvalidData(format!("config encode failed: {e}")))?;
        self.conn.execute(
            "INSERT INTO runs (id, case_source, case_count, config_json) VALUES (?1, ?2, ?3, ?4)",
            params![id.to_string(), case_source, case_count as i64, config_json],
        )?;
        tracing::info!(run = %id, case_source, case_count, "run started");
        Ok(id)
    }

    /// Record a new best. The checkpoint row and the run's best score are
    /// written in one transaction.
    pub fn record_checkpoint(&self, run_id: Uuid, state: &OptimizationState) -> Result<()> {
        let doc = params_to_toml(&state.best)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO checkpoints (run_id, iteration, score, params_toml) VALUES (?1, ?2, ?3, ?4)",
            params![run_id.to_string(), state.iteration as i64, state.best_score, doc],
        )?;
        tx.execute(
            "UPDATE runs SET best_score = ?2, iterations = ?3,
                 initial_score = COALESCE(initial_score, ?2)
             WHERE id = ?1",
            params![run_id.to_string(), state.best_score, state.iteration as i64],
        )?;
        tx.commit()?;
        tracing::debug!(run = %run_id, iteration = state.iteration, score = state.best_score, "checkpoint written");
        Ok(())
    }

    pub fn finish_run(&self, run_id: Uuid, iterations: usize, status: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE runs SET finished_at = datetime('now'), iterations = ?2, status = ?3 WHERE id = ?1",
            params![run_id.to_string(), iterations as i64, status],
        )?;
        if updated == 0 {
            return Err(StoreError::InvalidData(format!("no run {run_id}")));
        }
        Ok(())
    }

    /// Close a run that ended with an error. Its iteration count stays at
    /// the last checkpoint's.
    pub fn mark_failed(&self, run_id: Uuid) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE runs SET finished_at = datetime('now'), status = 'failed' WHERE id = ?1",
            [run_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::InvalidData(format!("no run {run_id}")));
        }
        Ok(())
    }

    /// Runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, case_source, case_count,
                    initial_score, best_score, iterations, status
             FROM runs ORDER BY started_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, started_at, finished_at, case_source, count, initial, best, iterations, status)| {
                    Ok(RunSummary {
                        id: parse_uuid(&id)?,
                        started_at,
                        finished_at,
                        case_source,
                        case_count: count as usize,
                        initial_score: initial,
                        best_score: best,
                        iterations: iterations as usize,
                        status,
                    })
                },
            )
            .collect()
    }

    pub fn checkpoints(&self, run_id: Uuid) -> Result<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT iteration, score, params_toml FROM checkpoints WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([run_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(iteration, score, doc)| {
                Ok(Checkpoint {
                    iteration: iteration as usize,
                    score,
                    params: parse_params(&doc)?.params,
                })
            })
            .collect()
    }

    /// Best checkpoint of a run, or of all runs when `run_id` is `None`.
    pub fn best_checkpoint(&self, run_id: Option<Uuid>) -> Result<Option<Checkpoint>> {
        let row = match run_id {
            Some(id) => self
                .conn
                .query_row(
                    "SELECT iteration, score, params_toml FROM checkpoints
                     WHERE run_id = ?1 ORDER BY score DESC, id DESC LIMIT 1",
                    [id.to_string()],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?, row.get::<_, String>(2)?)),
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    "SELECT iteration, score, params_toml FROM checkpoints
                     ORDER BY score DESC, id DESC LIMIT 1",
                    [],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?, row.get::<_, String>(2)?)),
                )
                .optional()?,
        };
        row.map(|(iteration, score, doc)| {
            Ok(Checkpoint {
                iteration: iteration as usize,
                score,
                params: parse_params(&doc)?.params,
            })
        })
        .transpose()
    }
}

/// Checkpoint sink backed by a [`Store`]: every new best becomes a
/// checkpoint row, and optionally a TOML document on disk.
pub struct RunSink<'s> {
    store: &'s Store,
    run_id: Uuid,
    params_path: Option<PathBuf>,
}

impl<'s> RunSink<'s> {
    pub fn new(store: &'s Store, run_id: Uuid) -> Self {
        Self {
            store,
            run_id,
            params_path: None,
        }
    }

    pub fn with_params_path(mut self, path: PathBuf) -> Self {
        self.params_path = Some(path);
        self
    }
}

impl CheckpointSink for RunSink<'_> {
    fn checkpoint(&mut self, state: &OptimizationState) -> std::result::Result<(), SinkError> {
        self.store.record_checkpoint(self.run_id, state)?;
        if let Some(path) = &self.params_path {
            save_params(path, &state.best)?;
        }
        Ok(())
    }

    fn finish(
        &mut self,
        state: &OptimizationState,
        reason: StopReason,
    ) -> std::result::Result<(), SinkError> {
        self.store
            .finish_run(self.run_id, state.iteration, reason.as_str())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qi_core::{CalibrationError, NullSink, optimize};
    use std::sync::atomic::AtomicBool;

    fn state(score: f64, iteration: usize) -> OptimizationState {
        let mut params = ParameterSet::default();
        params.flow.damping = score.clamp(0.0, 1.0);
        let mut s = OptimizationState::new(params, score, 0.1, 8);
        s.iteration = iteration;
        s
    }

    #[test]
    fn test_metadata() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_metadata("missing").unwrap(), None);
        store.set_metadata("k", "v").unwrap();
        assert_eq!(store.get_metadata("k").unwrap().as_deref(), Some("v"));
        store.set_metadata("k", "w").unwrap();
        assert_eq!(store.get_metadata("k").unwrap().as_deref(), Some("w"));
    }

    #[test]
    fn test_run_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let id = store.begin_run("cases.json", 3, &OptimizerConfig::default()).unwrap();
        store.record_checkpoint(id, &state(0.25, 0)).unwrap();
        store.record_checkpoint(id, &state(0.75, 12)).unwrap();
        store.finish_run(id, 40, "iteration_cap").unwrap();

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.id, id);
        assert_eq!(run.case_count, 3);
        assert_eq!(run.initial_score, Some(0.25));
        assert_eq!(run.best_score, Some(0.75));
        assert_eq!(run.iterations, 40);
        assert_eq!(run.status, "iteration_cap");
        assert!(run.finished_at.is_some());

        let checkpoints = store.checkpoints(id).unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[1].iteration, 12);

        let best = store.best_checkpoint(Some(id)).unwrap().unwrap();
        assert_eq!(best.score, 0.75);
        assert_eq!(best.params.flow.damping, 0.75);
        assert_eq!(store.best_checkpoint(None).unwrap().unwrap().score, 0.75);
    }

    #[test]
    fn test_best_checkpoint_empty() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.best_checkpoint(None).unwrap().is_none());
        assert!(store.list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_finish_unknown_run() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.finish_run(Uuid::new_v4(), 0, "cancelled").is_err());
        assert!(store.mark_failed(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_failed_run_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("qi.db")).unwrap();
        let config = OptimizerConfig {
            seed: Some(3),
            ..OptimizerConfig::default()
        };
        let id = store.begin_run("inline", 0, &config).unwrap();
        // A plain file where the params directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut sink = RunSink::new(&store, id).with_params_path(blocker.join("best.toml"));
        let err = optimize(
            ParameterSet::default(),
            &|_: &ParameterSet| 0.0,
            &config,
            &mut sink,
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::Persist(_)));
        assert_eq!(store.list_runs().unwrap()[0].status, "running");

        store.mark_failed(id).unwrap();
        let run = &store.list_runs().unwrap()[0];
        assert_eq!(run.status, "failed");
        assert!(run.finished_at.is_some());
        assert_eq!(run.iterations, 0);
        // The database row was written before the file failed
        assert_eq!(store.checkpoints(id).unwrap().len(), 1);
    }

    #[test]
    fn test_checkpoint_unknown_run_fails() {
        let store = Store::open_in_memory().unwrap();
        // Foreign key: checkpoints must belong to a run
        assert!(store.record_checkpoint(Uuid::new_v4(), &state(0.5, 1)).is_err());
    }

    #[test]
    fn test_sink_persists_every_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("qi.db")).unwrap();
        let config = OptimizerConfig {
            seed: Some(42),
            max_iterations: 60,
            target_score: 2.0,
            ..OptimizerConfig::default()
        };
        let id = store.begin_run("inline", 0, &config).unwrap();
        let best_path = dir.path().join("best.toml");
        let mut sink = RunSink::new(&store, id).with_params_path(best_path.clone());
        let objective = |p: &ParameterSet| -(p.flow.damping - 0.9).abs();
        let outcome = optimize(
            ParameterSet::default(),
            &objective,
            &config,
            &mut sink,
            &AtomicBool::new(false),
        )
        .unwrap();

        let checkpoints = store.checkpoints(id).unwrap();
        assert!(!checkpoints.is_empty());
        assert!(checkpoints.windows(2).all(|w| w[1].score > w[0].score));
        assert_eq!(checkpoints.last().unwrap().score, outcome.state.best_score);

        let on_disk = crate::params_doc::load_params(&best_path).unwrap();
        assert_eq!(on_disk.params, outcome.state.best);

        let run = &store.list_runs().unwrap()[0];
        assert_eq!(run.status, "iteration_cap");
        assert_eq!(run.best_score, Some(outcome.state.best_score));
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("qi.db")).unwrap();
        // Unknown run id: the first checkpoint violates the foreign key
        let mut sink = RunSink::new(&store, Uuid::new_v4());
        let err = optimize(
            ParameterSet::default(),
            &|_: &ParameterSet| 0.0,
            &OptimizerConfig::default(),
            &mut sink,
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::Persist(_)));

        // The null sink never fails
        let ok = optimize(
            ParameterSet::default(),
            &|_: &ParameterSet| 0.0,
            &OptimizerConfig {
                max_iterations: 1,
                ..OptimizerConfig::default()
            },
            &mut NullSink,
            &AtomicBool::new(false),
        );
        assert!(ok.is_ok());
    }
}
