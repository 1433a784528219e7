//! Update orchestration state machine
//!
//! ```text
//! Idle --(tick)--> Checking
//! Checking --(query failed | up to date | rolled back before | awaiting confirmation)--> Idle
//! Checking --(newer version)--> Downloading
//! Downloading --(failed, attempts < max)--> Downloading
//! Downloading --(failed, attempts == max)--> Idle
//! Downloading --(downloaded)--> Verifying
//! Verifying --(failed)--> Idle
//! Verifying --(verified)--> Flashing
//! Flashing --(failed)--> Idle
//! Flashing --(flashed)--> PendingReboot
//! ```
//!
//! [`next_state`] is the transition table. The scheduler runs one step per
//! state, feeds the resulting [`TransitionReason`] through the table and
//! publishes every transition.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::boot::{BootManager, RebootReason, SystemControl};
use crate::config::OtaConfig;
use crate::download::{AssetFetcher, ImageBuffer};
use crate::error::ConfigError;
use crate::flash::{FlashDevice, FlashWriter, SharedFlash};
use crate::partition::PartitionSlot;
use crate::record::PersistentUpdateRecord;
use crate::release::{ReleaseMetadata, ReleaseSource};
use crate::timer::UpdateTimer;
use crate::verify::{ImageVerifier, Sha256Digest, VerifiedImage};
use crate::version::{FirmwareVersion, is_newer};

const HISTORY_LIMIT: usize = 64;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UpdateState {
    /// Waiting for the next tick
    #[default]
    Idle,
    /// Querying the release source
    Checking,
    /// Fetching the firmware asset
    Downloading,
    /// Checking the downloaded image
    Verifying,
    /// Writing the inactive slot and switching
    Flashing,
    /// Switch committed; waiting for the device to restart
    PendingReboot,
}

impl UpdateState {
    /// Whether a cycle is running
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, UpdateState::Idle | UpdateState::PendingReboot)
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpdateState::Idle => "Idle",
            UpdateState::Checking => "Checking",
            UpdateState::Downloading => "Downloading",
            UpdateState::Verifying => "Verifying",
            UpdateState::Flashing => "Flashing",
            UpdateState::PendingReboot => "PendingReboot",
        };
        f.write_str(name)
    }
}

/// Event that drives a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    /// Periodic timer fired
    TimerTick,
    /// Release query failed
    ReleaseQueryFailed {
        /// Error description
        error: String,
    },
    /// Remote release is not newer
    UpToDate {
        /// Running version
        current: FirmwareVersion,
        /// Published version
        available: FirmwareVersion,
    },
    /// Published version was rolled back on this device before
    PreviouslyRolledBack {
        /// Published version
        available: FirmwareVersion,
        /// Newest rolled back version
        rejected: FirmwareVersion,
    },
    /// A newer release exists but the running image is not confirmed yet
    AwaitingConfirmation {
        /// Published version
        available: FirmwareVersion,
    },
    /// A newer release exists
    NewerVersion {
        /// Running version
        current: FirmwareVersion,
        /// Published version
        available: FirmwareVersion,
    },
    /// One download attempt failed
    DownloadFailed {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Error description
        error: String,
    },
    /// Image received
    Downloaded {
        /// Bytes received
        bytes: u64,
    },
    /// Image rejected and discarded
    VerificationFailed {
        /// Error description
        error: String,
    },
    /// Image accepted
    Verified {
        /// Digest of the accepted image
        digest: Sha256Digest,
    },
    /// Slot write or switch failed
    FlashFailed {
        /// Error description
        error: String,
    },
    /// Image written and switch committed
    Flashed {
        /// Newly active slot
        slot: PartitionSlot,
        /// Newly active version
        version: FirmwareVersion,
    },
    /// Cycle abandoned
    CycleAborted {
        /// Why the cycle stopped
        error: String,
    },
}

impl TransitionReason {
    /// Whether this event ends a cycle because something went wrong
    ///
    /// A single failed download attempt counts; the table decides whether it
    /// is retried.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TransitionReason::ReleaseQueryFailed { .. }
                | TransitionReason::DownloadFailed { .. }
                | TransitionReason::VerificationFailed { .. }
                | TransitionReason::FlashFailed { .. }
                | TransitionReason::CycleAborted { .. }
        )
    }
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionReason::TimerTick => write!(f, "timer tick"),
            TransitionReason::ReleaseQueryFailed { error } => {
                write!(f, "release query failed: {}", error)
            }
            TransitionReason::UpToDate { current, available } => {
                write!(f, "up to date ({} >= {})", current, available)
            }
            TransitionReason::PreviouslyRolledBack {
                available,
                rejected,
            } => {
                write!(f, "{} not installed, {} was rolled back", available, rejected)
            }
            TransitionReason::AwaitingConfirmation { available } => {
                write!(f, "{} available, running image not yet confirmed", available)
            }
            TransitionReason::NewerVersion { current, available } => {
                write!(f, "newer version {} (running {})", available, current)
            }
            TransitionReason::DownloadFailed { attempt, error } => {
                write!(f, "download attempt {} failed: {}", attempt, error)
            }
            TransitionReason::Downloaded { bytes } => write!(f, "downloaded {} bytes", bytes),
            TransitionReason::VerificationFailed { error } => {
                write!(f, "verification failed: {}", error)
            }
            TransitionReason::Verified { digest } => write!(f, "verified {}", digest),
            TransitionReason::FlashFailed { error } => write!(f, "flash failed: {}", error),
            TransitionReason::Flashed { slot, version } => {
                write!(f, "{} written to slot {}", version, slot)
            }
            TransitionReason::CycleAborted { error } => write!(f, "cycle aborted: {}", error),
        }
    }
}

/// Published state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State left
    pub from: UpdateState,
    /// State entered
    pub to: UpdateState,
    /// Triggering event
    pub reason: TransitionReason,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Per-cycle context
///
/// Lives for one cycle only. The attempt counter is what bounds download
/// retries.
#[derive(Debug)]
pub struct CycleContext {
    /// Download attempts made so far
    pub attempts: u32,
    /// Download attempts allowed
    pub max_attempts: u32,
    release: Option<ReleaseMetadata>,
    image: Option<Vec<u8>>,
    verified: Option<VerifiedImage>,
    switched: Option<PersistentUpdateRecord>,
}

impl CycleContext {
    /// Context for a fresh cycle
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            release: None,
            image: None,
            verified: None,
            switched: None,
        }
    }
}

/// Transition table
///
/// Returns `None` for an event that is not valid in `from`.
pub fn next_state(
    from: UpdateState,
    reason: &TransitionReason,
    context: &CycleContext,
) -> Option<UpdateState> {
    use TransitionReason as R;
    use UpdateState as S;

    let to = match (from, reason) {
        (S::Idle, R::TimerTick) => S::Checking,
        (
            S::Checking,
            R::ReleaseQueryFailed { .. }
            | R::UpToDate { .. }
            | R::PreviouslyRolledBack { .. }
            | R::AwaitingConfirmation { .. },
        ) => S::Idle,
        (S::Checking, R::NewerVersion { .. }) => S::Downloading,
        (S::Downloading, R::DownloadFailed { .. }) if context.attempts < context.max_attempts => {
            S::Downloading
        }
        (S::Downloading, R::DownloadFailed { .. }) => S::Idle,
        (S::Downloading, R::Downloaded { .. }) => S::Verifying,
        (S::Verifying, R::VerificationFailed { .. }) => S::Idle,
        (S::Verifying, R::Verified { .. }) => S::Flashing,
        (S::Flashing, R::FlashFailed { .. }) => S::Idle,
        (S::Flashing, R::Flashed { .. }) => S::PendingReboot,
        (state, R::CycleAborted { .. }) if state.is_in_progress() => S::Idle,
        _ => return None,
    };
    Some(to)
}

/// Why a tick did not start a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Automatic updates are disabled
    AutoUpdateDisabled,
    /// A switch is committed and the device has not restarted yet
    PendingReboot,
    /// Another cycle is running
    CycleInProgress,
}

/// Result of handling one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    /// No cycle was started
    Skipped(SkipReason),
    /// A cycle ran to completion in this state
    Finished(UpdateState),
}

/// Why [`UpdateScheduler::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Timer was cancelled
    Cancelled,
    /// An update is installed and waiting for the restart
    PendingReboot,
}

/// Re-entrancy guard: at most one cycle at a time
#[derive(Debug, Default)]
pub struct CycleGuard {
    running: AtomicBool,
}

impl CycleGuard {
    /// Create an unlocked guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard; `None` if a cycle already holds it
    pub fn try_acquire(&self) -> Option<CyclePermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit { guard: self })
    }

    /// Whether a cycle holds the guard
    pub fn is_held(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`CycleGuard`]; releases it on drop
#[derive(Debug)]
pub struct CyclePermit<'a> {
    guard: &'a CycleGuard,
}

impl Drop for CyclePermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Top-level update state machine
pub struct UpdateScheduler<D> {
    config: OtaConfig,
    release: Arc<dyn ReleaseSource>,
    fetcher: Arc<dyn AssetFetcher>,
    system: Arc<dyn SystemControl>,
    verifier: ImageVerifier,
    writer: FlashWriter<D>,
    boot: BootManager<D>,
    state: Mutex<UpdateState>,
    guard: CycleGuard,
    confirmed: AtomicBool,
    events: broadcast::Sender<StateTransition>,
    history: Mutex<VecDeque<StateTransition>>,
}

impl<D> std::fmt::Debug for UpdateScheduler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("state", &*self.state.lock())
            .field("cycle_running", &self.guard.is_held())
            .finish_non_exhaustive()
    }
}

impl<D: FlashDevice> UpdateScheduler<D> {
    /// Create a scheduler in the Idle state
    pub fn new(
        config: &OtaConfig,
        flash: SharedFlash<D>,
        release: Arc<dyn ReleaseSource>,
        fetcher: Arc<dyn AssetFetcher>,
        system: Arc<dyn SystemControl>,
    ) -> Result<Self, ConfigError> {
        let (events, _) = broadcast::channel(HISTORY_LIMIT);
        Ok(Self {
            verifier: ImageVerifier::from_config(config)?,
            writer: FlashWriter::new(flash.clone(), config),
            boot: BootManager::new(flash, config),
            config: config.clone(),
            release,
            fetcher,
            system,
            state: Mutex::new(UpdateState::Idle),
            guard: CycleGuard::new(),
            confirmed: AtomicBool::new(false),
            events,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        })
    }

    /// Current state
    pub fn state(&self) -> UpdateState {
        *self.state.lock()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.events.subscribe()
    }

    /// Most recent transitions, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.history.lock().iter().cloned().collect()
    }

    /// Boot manager sharing this scheduler's flash
    pub fn boot_manager(&self) -> &BootManager<D> {
        &self.boot
    }

    /// Handle one timer tick
    ///
    /// With automatic updates disabled the tick still confirms the running
    /// image, so a healthy image is not rolled back.
    pub async fn on_tick(&self) -> CycleOutcome {
        if !self.config.auto_update {
            debug!("Automatic updates disabled, ignoring tick");
            self.confirm_running_image();
            return CycleOutcome::Skipped(SkipReason::AutoUpdateDisabled);
        }
        let Some(_permit) = self.guard.try_acquire() else {
            debug!("Update cycle already running, ignoring tick");
            return CycleOutcome::Skipped(SkipReason::CycleInProgress);
        };

        match self.state() {
            UpdateState::PendingReboot => {
                debug!("Update installed, waiting for reboot");
                return CycleOutcome::Skipped(SkipReason::PendingReboot);
            }
            UpdateState::Idle => {}
            _ => self.abandon(),
        }

        CycleOutcome::Finished(self.run_cycle().await)
    }

    /// Return to Idle if a cycle was interrupted
    pub fn abandon(&self) {
        let from = self.state();
        if from.is_in_progress() {
            self.transition(
                from,
                UpdateState::Idle,
                TransitionReason::CycleAborted {
                    error: "cycle abandoned".to_string(),
                },
            );
        }
    }

    /// Drive cycles from `timer` until it is cancelled or an update is installed
    ///
    /// Cancellation abandons a running cycle at its next await point. The
    /// flash step has none, so a started switch always completes.
    pub async fn run(&self, mut timer: UpdateTimer) -> RunExit {
        info!(period = ?timer.period(), "Update scheduler started");

        while let Some(tick) = timer.tick().await {
            debug!(tick = tick.sequence, "Update timer fired");
            let outcome = tokio::select! {
                outcome = self.on_tick() => outcome,
                _ = timer.cancelled() => {
                    self.abandon();
                    break;
                }
            };

            if matches!(
                outcome,
                CycleOutcome::Finished(UpdateState::PendingReboot)
                    | CycleOutcome::Skipped(SkipReason::PendingReboot)
            ) {
                return RunExit::PendingReboot;
            }
        }

        info!("Update scheduler stopped");
        RunExit::Cancelled
    }

    async fn run_cycle(&self) -> UpdateState {
        let mut context = CycleContext::new(self.config.max_download_retries);
        let mut state = self.apply(UpdateState::Idle, TransitionReason::TimerTick, &context);

        while state.is_in_progress() {
            let reason = match state {
                UpdateState::Checking => self.check(&mut context).await,
                UpdateState::Downloading => self.download(&mut context).await,
                UpdateState::Verifying => self.verify(&mut context),
                UpdateState::Flashing => self.flash(&mut context),
                UpdateState::Idle | UpdateState::PendingReboot => break,
            };
            state = self.apply(state, reason, &context);
        }

        if let (UpdateState::PendingReboot, Some(record)) = (state, context.switched.take()) {
            self.after_switch(&record);
        }
        state
    }

    async fn check(&self, context: &mut CycleContext) -> TransitionReason {
        let release = match self.release.fetch_latest_release().await {
            Ok(release) => release,
            Err(e) => {
                warn!(error = %e, "Release query failed");
                return TransitionReason::ReleaseQueryFailed {
                    error: e.to_string(),
                };
            }
        };

        self.confirm_running_image();

        let record = match self.boot.record() {
            Ok(record) => record,
            Err(e) => {
                return TransitionReason::CycleAborted {
                    error: e.to_string(),
                };
            }
        };

        let current = record.active_version;
        let available = release.version;
        if !is_newer(&available, &current) {
            return TransitionReason::UpToDate { current, available };
        }
        if let Some(rejected) = record.rejected_version.filter(|_| record.is_rejected(&available)) {
            warn!(%available, %rejected, "Release was rolled back before, not installing");
            return TransitionReason::PreviouslyRolledBack {
                available,
                rejected,
            };
        }
        if record.is_pending() {
            return TransitionReason::AwaitingConfirmation { available };
        }

        self.status(format_args!(
            "New firmware {} available (running {})",
            available, current
        ));
        context.release = Some(release);
        TransitionReason::NewerVersion { current, available }
    }

    async fn download(&self, context: &mut CycleContext) -> TransitionReason {
        let Some(release) = context.release.as_ref() else {
            return TransitionReason::CycleAborted {
                error: "no release selected".to_string(),
            };
        };

        if context.attempts > 0 {
            let backoff = self.config.backoff_for(context.attempts);
            debug!(attempt = context.attempts, ?backoff, "Backing off before retry");
            tokio::time::sleep(backoff).await;
        }
        context.attempts = context.attempts.saturating_add(1);

        let mut buffer = ImageBuffer::with_limit(self.config.flash.slot_size);
        match self
            .fetcher
            .fetch_asset(&release.asset_location, release.asset_size, &mut buffer)
            .await
        {
            Ok(bytes) => {
                context.image = Some(buffer.into_inner());
                TransitionReason::Downloaded { bytes }
            }
            Err(e) => {
                warn!(
                    attempt = context.attempts,
                    max = context.max_attempts,
                    error = %e,
                    "Download attempt failed"
                );
                TransitionReason::DownloadFailed {
                    attempt: context.attempts,
                    error: e.to_string(),
                }
            }
        }
    }

    fn verify(&self, context: &mut CycleContext) -> TransitionReason {
        let (Some(release), Some(image)) = (context.release.as_ref(), context.image.take()) else {
            return TransitionReason::CycleAborted {
                error: "no image to verify".to_string(),
            };
        };

        match self.verifier.verify(image, &release.expected_image()) {
            Ok(verified) => {
                let digest = verified.digest();
                context.verified = Some(verified);
                TransitionReason::Verified { digest }
            }
            Err(e) => {
                error!(version = %release.version, error = %e, "Image rejected");
                TransitionReason::VerificationFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    fn flash(&self, context: &mut CycleContext) -> TransitionReason {
        let Some(image) = context.verified.take() else {
            return TransitionReason::CycleAborted {
                error: "no verified image".to_string(),
            };
        };

        let result = self
            .writer
            .write_to_inactive_slot(&image)
            .and_then(|slot| self.writer.commit_switch(slot, image.version()));

        match result {
            Ok(record) => {
                context.switched = Some(record);
                TransitionReason::Flashed {
                    slot: record.active_slot,
                    version: record.active_version,
                }
            }
            Err(e) => {
                error!(error = %e, "Flashing failed, active slot untouched");
                TransitionReason::FlashFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    fn confirm_running_image(&self) {
        if !self.config.confirm_on_first_check || self.confirmed.load(Ordering::Acquire) {
            return;
        }
        match self.boot.confirm_boot_success() {
            Ok(_) => self.confirmed.store(true, Ordering::Release),
            Err(e) => warn!(error = %e, "Could not confirm boot"),
        }
    }

    fn after_switch(&self, record: &PersistentUpdateRecord) {
        self.status(format_args!(
            "Firmware {} installed in slot {}",
            record.active_version, record.active_slot
        ));
        if self.config.reboot_after_flash {
            self.system.request_reboot(RebootReason::UpdateInstalled {
                slot: record.active_slot,
                version: record.active_version,
            });
        }
    }

    fn apply(
        &self,
        from: UpdateState,
        reason: TransitionReason,
        context: &CycleContext,
    ) -> UpdateState {
        match next_state(from, &reason, context) {
            Some(to) => {
                self.transition(from, to, reason);
                to
            }
            None => {
                error!(state = %from, reason = %reason, "Invalid transition, aborting cycle");
                self.transition(
                    from,
                    UpdateState::Idle,
                    TransitionReason::CycleAborted {
                        error: format!("unexpected '{}' in {}", reason, from),
                    },
                );
                UpdateState::Idle
            }
        }
    }

    fn transition(&self, from: UpdateState, to: UpdateState, reason: TransitionReason) {
        *self.state.lock() = to;
        self.status(format_args!("{} -> {}: {}", from, to, reason));

        let event = StateTransition {
            from,
            to,
            reason,
            at: Utc::now(),
        };
        {
            let mut history = self.history.lock();
            if history.len() >= HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let _ = self.events.send(event);
    }

    fn status(&self, line: std::fmt::Arguments<'_>) {
        if self.config.status_logging {
            info!("{}", line);
        } else {
            debug!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(attempts: u32, max_attempts: u32) -> CycleContext {
        let mut context = CycleContext::new(max_attempts);
        context.attempts = attempts;
        context
    }

    fn failed(attempt: u32) -> TransitionReason {
        TransitionReason::DownloadFailed {
            attempt,
            error: "timeout".to_string(),
        }
    }

    #[test]
    fn test_table_happy_path() {
        let ctx = context(1, 3);
        let v = FirmwareVersion::new(1, 1, 0);
        let steps = [
            (UpdateState::Idle, TransitionReason::TimerTick, UpdateState::Checking),
            (
                UpdateState::Checking,
                TransitionReason::NewerVersion {
                    current: FirmwareVersion::new(1, 0, 0),
                    available: v,
                },
                UpdateState::Downloading,
            ),
            (
                UpdateState::Downloading,
                TransitionReason::Downloaded { bytes: 10 },
                UpdateState::Verifying,
            ),
            (
                UpdateState::Verifying,
                TransitionReason::Verified {
                    digest: Sha256Digest::compute(b"x"),
                },
                UpdateState::Flashing,
            ),
            (
                UpdateState::Flashing,
                TransitionReason::Flashed {
                    slot: PartitionSlot::B,
                    version: v,
                },
                UpdateState::PendingReboot,
            ),
        ];
        for (from, reason, to) in steps {
            assert_eq!(next_state(from, &reason, &ctx), Some(to), "{} on {}", from, reason);
        }
    }

    #[test]
    fn test_table_retry_is_bounded() {
        assert_eq!(
            next_state(UpdateState::Downloading, &failed(1), &context(1, 3)),
            Some(UpdateState::Downloading)
        );
        assert_eq!(
            next_state(UpdateState::Downloading, &failed(2), &context(2, 3)),
            Some(UpdateState::Downloading)
        );
        assert_eq!(
            next_state(UpdateState::Downloading, &failed(3), &context(3, 3)),
            Some(UpdateState::Idle)
        );
    }

    #[test]
    fn test_table_failures_return_to_idle() {
        let ctx = context(0, 3);
        let error = "boom".to_string();
        assert_eq!(
            next_state(
                UpdateState::Verifying,
                &TransitionReason::VerificationFailed { error: error.clone() },
                &ctx
            ),
            Some(UpdateState::Idle)
        );
        assert_eq!(
            next_state(
                UpdateState::Flashing,
                &TransitionReason::FlashFailed { error: error.clone() },
                &ctx
            ),
            Some(UpdateState::Idle)
        );
        assert_eq!(
            next_state(
                UpdateState::Downloading,
                &TransitionReason::CycleAborted { error },
                &ctx
            ),
            Some(UpdateState::Idle)
        );
    }

    #[test]
    fn test_table_rolled_back_release_returns_to_idle() {
        let reason = TransitionReason::PreviouslyRolledBack {
            available: FirmwareVersion::new(1, 1, 0),
            rejected: FirmwareVersion::new(1, 1, 0),
        };
        assert_eq!(
            next_state(UpdateState::Checking, &reason, &context(0, 3)),
            Some(UpdateState::Idle)
        );
    }

    #[test]
    fn test_table_rejects_invalid_events() {
        let ctx = context(0, 3);
        assert_eq!(
            next_state(UpdateState::Idle, &TransitionReason::Downloaded { bytes: 1 }, &ctx),
            None
        );
        assert_eq!(
            next_state(
                UpdateState::Verifying,
                &TransitionReason::Flashed {
                    slot: PartitionSlot::A,
                    version: FirmwareVersion::new(1, 0, 0)
                },
                &ctx
            ),
            None
        );
        assert_eq!(
            next_state(
                UpdateState::PendingReboot,
                &TransitionReason::TimerTick,
                &ctx
            ),
            None
        );
    }

    #[test]
    fn test_failure_reasons() {
        assert!(failed(1).is_failure());
        assert!(
            TransitionReason::ReleaseQueryFailed {
                error: "503".to_string()
            }
            .is_failure()
        );
        assert!(!TransitionReason::TimerTick.is_failure());
        assert!(
            !TransitionReason::UpToDate {
                current: FirmwareVersion::new(1, 0, 0),
                available: FirmwareVersion::new(1, 0, 0),
            }
            .is_failure()
        );
        assert!(
            !TransitionReason::PreviouslyRolledBack {
                available: FirmwareVersion::new(1, 1, 0),
                rejected: FirmwareVersion::new(1, 1, 0),
            }
            .is_failure()
        );
    }

    #[test]
    fn test_cycle_guard_is_exclusive() {
        let guard = CycleGuard::new();
        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_held());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_held());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_state_progress_flags() {
        assert!(!UpdateState::Idle.is_in_progress());
        assert!(!UpdateState::PendingReboot.is_in_progress());
        assert!(UpdateState::Checking.is_in_progress());
        assert!(UpdateState::Flashing.is_in_progress());
    }
}
