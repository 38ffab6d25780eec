//! `circle-commit simulate`: run one flow against a scripted ledger.

use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::{ColoredString, Colorize};
use commit_core::{ErrorRecord, OperationId, Outcome, Phase};
use events::EventBus;
use ledger::{InclusionNotice, SimulatedLedger, SubmissionError, SubmissionScript};
use orchestrator::{
    CommitFlow, FlowHandle, FlowObserver, GuaranteeDepositFlow, PaymentFlow,
    TwoPhaseCommitController,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CommitConfig;

const FIRST_ID: &str = "0xf1r57";
const SECOND_ID: &str = "0x5ec0nd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FlowKind {
    Payment,
    Guarantee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Both operations confirm
    Happy,
    /// The allowance grant is included but reverts
    FirstReverts,
    /// The signer declines the first prompt
    Declined,
    /// The action is rejected for lack of allowance
    MissingAllowance,
    /// No push notices; the timeout poll picks up the result
    Silent,
    /// The allowance grant never resolves
    Stuck,
    /// Stale and foreign notices arrive while the action is pending
    CrossTalk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ManualAction {
    Confirm,
    Abandon,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[arg(long, value_enum, default_value_t = FlowKind::Payment)]
    pub flow: FlowKind,

    #[arg(long, value_enum, default_value_t = Scenario::Happy)]
    pub scenario: Scenario,

    #[arg(long, default_value = "usdc")]
    pub asset: String,

    #[arg(long, default_value = "0xc1rc1e")]
    pub circle: String,

    #[arg(long, default_value_t = 100)]
    pub amount: u128,

    /// Round being paid (payment flow only)
    #[arg(long, default_value_t = 1)]
    pub round: u32,

    /// Override `[controller] guard_timeout_secs`
    #[arg(long)]
    pub guard_timeout_secs: Option<u64>,

    /// What to do when the manual check is offered
    #[arg(long, value_enum, default_value_t = ManualAction::Abandon)]
    pub on_manual_check: ManualAction,

    /// Print every flow event as a JSON line
    #[arg(long)]
    pub events: bool,
}

impl SimulateArgs {
    fn commit_flow(&self) -> Box<dyn CommitFlow> {
        match self.flow {
            FlowKind::Payment => Box::new(PaymentFlow::new(
                &self.asset,
                &self.circle,
                self.amount,
                self.round,
            )),
            FlowKind::Guarantee => {
                Box::new(GuaranteeDepositFlow::new(&self.asset, &self.circle, self.amount))
            }
        }
    }
}

/// Ledger behaviour for each scenario, in submission order.
fn scripts(scenario: Scenario, latency: Duration) -> Vec<SubmissionScript> {
    let confirms = || SubmissionScript::confirms_after(latency).with_push();

    match scenario {
        Scenario::Happy => vec![confirms(), confirms()],
        Scenario::FirstReverts => vec![SubmissionScript::reverts_after(latency).with_push()],
        Scenario::Declined => vec![SubmissionScript::rejected(SubmissionError::Other(
            "MetaMask Tx Signature: User denied transaction signature.".to_string(),
        ))],
        Scenario::MissingAllowance => vec![
            confirms(),
            SubmissionScript::rejected(SubmissionError::Other(
                "execution reverted: ERC20: insufficient allowance".to_string(),
            )),
        ],
        Scenario::Silent => vec![
            SubmissionScript::confirms_after(latency),
            SubmissionScript::confirms_after(latency),
        ],
        Scenario::Stuck => vec![SubmissionScript::never_resolves(), confirms()],
        Scenario::CrossTalk => vec![
            confirms().with_id(FIRST_ID),
            SubmissionScript::confirms_after(latency * 2)
                .with_push()
                .with_id(SECOND_ID),
        ],
    }
}

struct ConsoleObserver;

impl FlowObserver for ConsoleObserver {
    fn on_phase_change(&self, phase: Phase) {
        println!("  {} {}", "→".dimmed(), paint(phase));
    }

    fn on_error(&self, error: &ErrorRecord) {
        println!(
            "  {} {} ({})",
            "✗".red(),
            error.kind.default_message(),
            error.display_message()
        );
    }

    fn on_manual_check(&self, available: bool) {
        if available {
            println!("  {} no confirmation yet, manual check offered", "!".yellow());
        }
    }
}

fn paint(phase: Phase) -> ColoredString {
    match phase {
        Phase::Succeeded => phase.as_str().green(),
        Phase::Failed => phase.as_str().red(),
        p if p.is_awaiting() => p.as_str().yellow(),
        p => p.as_str().cyan(),
    }
}

pub async fn simulate(args: SimulateArgs, config: &CommitConfig) -> Result<()> {
    let flow = args.commit_flow();
    let (first, second) = flow.descriptors()?;

    let mut controller_config = config.controller_config();
    if let Some(secs) = args.guard_timeout_secs {
        controller_config = controller_config.with_guard_timeout(Duration::from_secs(secs));
    }

    let ledger = Arc::new(SimulatedLedger::with_scripts(scripts(
        args.scenario,
        config.latency(),
    )));
    let bus = EventBus::new();
    let mut controller = TwoPhaseCommitController::new(ledger.clone(), controller_config)
        .with_event_bus(bus.clone());
    if config.simulation.push {
        controller = controller.with_push_subscription(ledger.clone());
    }

    let (control, commands) = controller.control();
    if args.events {
        let mut subscription = bus.subscribe_flow(control.flow_id());
        tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                match serde_json::to_string(&envelope) {
                    Ok(line) => println!("{}", line.dimmed()),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                }
            }
            if subscription.missed() > 0 {
                tracing::warn!(missed = subscription.missed(), "Event printer fell behind");
            }
        });
    }

    println!();
    println!(
        "{} flow, scenario {:?}, guard {}s",
        flow.name().bold(),
        args.scenario,
        controller.config().guard_timeout.as_secs()
    );
    println!("════════════════════════════════════════");

    let handle = controller.start_with(first, second, ConsoleObserver, control, commands);

    if args.scenario == Scenario::CrossTalk {
        spawn_cross_talk(&handle, Arc::clone(&ledger));
    }

    answer_manual_checks(&handle, args.on_manual_check).await;
    let report = handle.wait().await?;

    println!();
    println!("  Outcome:     {}", report.outcome());
    if let Some(ref first) = report.first {
        println!("  Allowance:   {}", first.id);
    }
    if let Some(ref second) = report.second {
        println!("  Action:      {}", second.id);
    }
    println!("  Submissions: {}", ledger.submission_count());
    println!("  Polls:       {}", ledger.poll_count());
    println!();

    Ok(())
}

/// Respond to every manual-check offer until the flow finishes.
async fn answer_manual_checks(handle: &FlowHandle, action: ManualAction) {
    let mut phase = handle.phase_receiver();
    let mut manual = handle.manual_check_receiver();

    loop {
        let offered = tokio::select! {
            result = manual.wait_for(|available| *available) => result.is_ok(),
            _ = phase.wait_for(|phase| phase.is_terminal()) => false,
        };
        if !offered {
            return;
        }

        let sent = match action {
            ManualAction::Confirm => {
                println!("  {} marking as done", "?".yellow());
                handle.confirm_manually().await
            }
            ManualAction::Abandon => {
                println!("  {} giving up", "?".yellow());
                handle.abandon().await
            }
        };
        if let Err(e) = sent {
            tracing::debug!(error = %e, "Flow finished before the manual answer arrived");
            return;
        }

        let _ = manual.wait_for(|available| !*available).await;
    }
}

/// Once the action is pending, replay the allowance notice and announce a
/// foreign operation. Neither may complete the flow.
fn spawn_cross_talk(handle: &FlowHandle, ledger: Arc<SimulatedLedger>) {
    let mut phase = handle.phase_receiver();
    tokio::spawn(async move {
        let reached = phase
            .wait_for(|phase| *phase == Phase::AwaitingSecond)
            .await
            .is_ok();
        if !reached {
            return;
        }
        ledger.announce(InclusionNotice::new(FIRST_ID, Outcome::confirmed()));
        ledger.announce(InclusionNotice::new(
            OperationId::new("0xf0re16n"),
            Outcome::reverted(),
        ));
    });
}
