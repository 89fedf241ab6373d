//! プール全体の実行状態（一時停止・停止フラグと稼働ワーカー数）
//!
//! コントローラが書き、各ワーカーがアカウントの合間のチェックポイントで読む。
//! 抽出中のセッションを中断することはない。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopping,
}

/// チェックポイントでの判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Stop,
}

#[derive(Debug)]
pub struct RunControl {
    state: watch::Sender<RunState>,
    active: AtomicUsize,
}

impl Default for RunControl {
    fn default() -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            state,
            active: AtomicUsize::new(0),
        }
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == RunState::Stopping
    }

    pub(crate) fn begin_run(&self) {
        self.state.send_replace(RunState::Running);
    }

    /// ワーカー枠を1つ確保する。返り値が drop されると枠が解放される
    pub(crate) fn enter_worker(self: &Arc<Self>) -> WorkerSlot {
        self.active.fetch_add(1, Ordering::SeqCst);
        WorkerSlot {
            control: Arc::clone(self),
        }
    }

    fn worker_exited(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.settle_idle();
    }

    /// 稼働ワーカーが0なら Idle に戻す
    ///
    /// 判定と書き込みを watch の書き込みロック内で行うので、その間に
    /// 枠を確保した次の実行を Idle で上書きすることはない。
    fn settle_idle(&self) {
        let went_idle = self.state.send_if_modified(|s| {
            if *s != RunState::Idle && self.active.load(Ordering::SeqCst) == 0 {
                *s = RunState::Idle;
                true
            } else {
                false
            }
        });
        if went_idle {
            info!("All workers finished, run is idle");
        }
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        let mut result = Ok(());
        self.state.send_if_modified(|s| match *s {
            RunState::Running => {
                *s = RunState::Paused;
                true
            }
            RunState::Paused => false,
            RunState::Idle | RunState::Stopping => {
                result = Err(EngineError::NotRunning);
                false
            }
        });
        result
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        let mut result = Ok(());
        self.state.send_if_modified(|s| match *s {
            RunState::Paused => {
                *s = RunState::Running;
                true
            }
            _ => {
                result = Err(EngineError::NotPaused);
                false
            }
        });
        result
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        let mut result = Ok(());
        self.state.send_if_modified(|s| match *s {
            RunState::Running | RunState::Paused => {
                *s = RunState::Stopping;
                true
            }
            RunState::Stopping => false,
            RunState::Idle => {
                result = Err(EngineError::NotRunning);
                false
            }
        });
        result
    }

    /// 一時停止中は解除か停止まで待つ
    pub async fn checkpoint(&self) -> Checkpoint {
        let mut rx = self.state.subscribe();
        let mut announced = false;
        loop {
            let current = *rx.borrow_and_update();
            match current {
                RunState::Stopping => return Checkpoint::Stop,
                RunState::Paused => {
                    if !announced {
                        info!("Paused, waiting for resume");
                        announced = true;
                    }
                }
                RunState::Running | RunState::Idle => {
                    if announced {
                        info!("Resumed");
                    }
                    return Checkpoint::Continue;
                }
            }
            if rx.changed().await.is_err() {
                return Checkpoint::Stop;
            }
        }
    }

    /// `duration` だけ待つ。途中で停止要求が来たら false
    pub async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopping(),
            _ = rx.wait_for(|s| *s == RunState::Stopping) => false,
        }
    }
}

/// 稼働ワーカー数の枠。panic 時も含め drop で解放される
pub struct WorkerSlot {
    control: Arc<RunControl>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.control.worker_exited();
    }
}
