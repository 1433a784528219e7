//! Agent command implementations

use anyhow::Result;
use otaguard_update::prelude::*;
use otaguard_update::{RunExit, StateTransition, TransitionReason};
use serde_json::json;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::host::HostDevice;
use crate::output::{print_json, print_line};

/// Boot, then drive the update scheduler until Ctrl-C
///
/// An installed update restarts the simulated device: the boot sequence runs
/// again and the scheduler resumes on the new image.
pub async fn run(device: &HostDevice) -> Result<()> {
    loop {
        let report = device.boot_until_stable()?;
        info!(
            slot = %report.record.active_slot,
            version = %report.record.active_version,
            "Device up"
        );

        let scheduler = device.scheduler()?;
        let (timer, handle) = UpdateTimer::new(device.config.check_interval);
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping");
                handle.cancel();
            }
        });

        let exit = scheduler.run(timer).await;
        interrupt.abort();

        match exit {
            RunExit::Cancelled => return Ok(()),
            RunExit::PendingReboot => match device.system.take_reboot() {
                Some(reason) => info!(%reason, "Simulating restart"),
                None => {
                    warn!("Update installed; restart the device to boot it");
                    return Ok(());
                }
            },
        }
    }
}

/// Failure that ended the cycle recorded in `history`, if any
fn cycle_failure(history: &[StateTransition]) -> Option<TransitionReason> {
    history
        .last()
        .filter(|transition| transition.reason.is_failure())
        .map(|transition| transition.reason.clone())
}

/// Run one update cycle now
///
/// Fails when the cycle ended on an error, so the exit status reflects it.
pub async fn check(device: &HostDevice, json_output: bool) -> Result<()> {
    device.record()?;
    let scheduler = device.scheduler()?;
    let outcome = scheduler.on_tick().await;
    let history = scheduler.history();
    let reboot = device.system.take_reboot();

    if let Some(reason) = cycle_failure(&history) {
        if !json_output {
            for transition in &history {
                println!("{} -> {}: {}", transition.from, transition.to, transition.reason);
            }
        }
        return Err(AgentError::CycleFailed(reason).into());
    }

    if json_output {
        print_json(&json!({
            "success": true,
            "outcome": outcome,
            "transitions": history,
            "reboot_requested": reboot,
        }))?;
    } else {
        for transition in &history {
            println!("{} -> {}: {}", transition.from, transition.to, transition.reason);
        }
        match outcome {
            CycleOutcome::Finished(state) => print_line("Final state", state),
            CycleOutcome::Skipped(reason) => print_line("Skipped", format!("{:?}", reason)),
        }
        if let Some(reason) = reboot {
            print_line("Reboot", reason);
        }
    }
    Ok(())
}

/// Mark the running image as good
pub fn confirm(device: &HostDevice, json_output: bool) -> Result<()> {
    device.record()?;
    let record = device.boot_manager().confirm_boot_success()?;
    if json_output {
        print_json(&json!({ "success": true, "record": record }))?;
    } else {
        print_line("Confirmed", format!("{} in slot {}", record.active_version, record.active_slot));
    }
    Ok(())
}

/// Print the persistent record
pub fn status(device: &HostDevice, json_output: bool) -> Result<()> {
    let record = device.record()?;
    if json_output {
        print_json(&json!({
            "success": true,
            "record": record,
            "slots": record.slots(),
        }))?;
        return Ok(());
    }

    print_line("Active slot", record.active_slot);
    print_line("Active version", record.active_version);
    print_line("Last known-good", record.last_known_good);
    print_line("Confirmed", record.confirmed);
    print_line(
        "Boot attempts",
        format!("{}/{}", record.boot_attempt_count, record.max_boot_attempts),
    );
    for slot in record.slots() {
        let version = slot
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        print_line(
            &format!("Slot {}", slot.slot),
            format!(
                "{}{}",
                version,
                if slot.active { " (active)" } else { "" }
            ),
        );
    }
    Ok(())
}

/// Run the boot sequence once
pub fn boot(device: &HostDevice, json_output: bool) -> Result<()> {
    let report = device.boot()?;
    let reboot = device.system.take_reboot();

    if json_output {
        print_json(&json!({
            "success": true,
            "report": report,
            "reboot_requested": reboot,
        }))?;
        return Ok(());
    }

    print_line("Active slot", report.record.active_slot);
    print_line("Boot attempt", report.record.boot_attempt_count);
    match &report.decision {
        BootDecision::Continue => print_line("Decision", "continue"),
        BootDecision::RolledBack { failed, restored } => {
            print_line("Decision", format!("rolled back ({})", failed));
            print_line("Restored", restored.active_version);
        }
        BootDecision::FailureIgnored(failure) => {
            print_line("Decision", format!("failure ignored ({})", failure));
        }
    }
    Ok(())
}
