use crate::infra::{parse_date, sample_owner, seed_samples};
use bhxh_declarations::config::WorkflowConfig;
use bhxh_declarations::error::AppError;
use bhxh_declarations::workflows::declarations::{
    DeclarationId, DeclarationStore, DeclarationWorkflowError, GroupOutcome,
    InMemoryDeclarationStore, InMemoryEventBus, ParticipantId, SubmissionReport,
    UnprocessedRecordsService,
};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

type DemoService = UnprocessedRecordsService<InMemoryDeclarationStore, InMemoryEventBus>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Creation date of the newest sample declaration (YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    /// Print the scenario results as JSON instead of text.
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScenarioResult {
    pub(crate) title: &'static str,
    pub(crate) outcome: String,
    pub(crate) details: Vec<String>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let anchor = args
        .as_of
        .and_then(|date| date.and_hms_opt(8, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now);

    let results = run_scenarios(anchor)?;

    if args.json {
        match serde_json::to_string_pretty(&results) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("failed to render demo results: {err}"),
        }
        return Ok(());
    }

    println!("Declaration workflow demo");
    for (index, result) in results.iter().enumerate() {
        println!("\n{}. {}", index + 1, result.title);
        println!("   => {}", result.outcome);
        for detail in &result.details {
            println!("   - {detail}");
        }
    }
    Ok(())
}

pub(crate) fn run_scenarios(anchor: DateTime<Utc>) -> Result<Vec<ScenarioResult>, AppError> {
    let (billed_service, billed_store) = fresh(anchor)?;
    let full = whole_declaration(&billed_service, &billed_store)?;
    let reconcile = reconcile_twice(&billed_service, &billed_store)?;

    let (service, store) = fresh(anchor)?;
    let split = subset_split(&service, &store)?;

    let (service, store) = fresh(anchor)?;
    let mixed = mixed_selection(&service, &store)?;

    let (service, store) = fresh(anchor)?;
    let zero = zero_amount(&service, &store)?;

    Ok(vec![full, split, mixed, reconcile, zero])
}

fn fresh(anchor: DateTime<Utc>) -> Result<(DemoService, Arc<InMemoryDeclarationStore>), AppError> {
    let store = Arc::new(InMemoryDeclarationStore::new());
    seed_samples(&store, &sample_owner(), anchor)?;
    let service = UnprocessedRecordsService::new(
        store.clone(),
        Arc::new(InMemoryEventBus::new()),
        WorkflowConfig::default(),
    );
    Ok((service, store))
}

fn selection(ids: &[&str]) -> BTreeSet<ParticipantId> {
    ids.iter().map(|id| ParticipantId((*id).to_string())).collect()
}

fn declaration_line(
    store: &InMemoryDeclarationStore,
    id: &DeclarationId,
) -> Result<String, AppError> {
    let Some(declaration) = store.fetch_declaration(id)? else {
        return Ok(format!("{id}: missing"));
    };
    let members = store.participants_of(id)?;
    let statuses: Vec<String> = members
        .iter()
        .map(|participant| {
            format!(
                "{}={}/{}",
                participant.id,
                participant.status.label(),
                participant
                    .payment_status
                    .map(|status| status.label())
                    .unwrap_or("unpaid")
            )
        })
        .collect();
    Ok(format!(
        "{} [{}]: {}",
        declaration.code,
        declaration.status.label(),
        statuses.join(", ")
    ))
}

fn billed_lines(
    store: &InMemoryDeclarationStore,
    report: &SubmissionReport,
) -> Result<Vec<String>, AppError> {
    let mut lines = Vec::new();
    for group in &report.groups {
        match &group.outcome {
            GroupOutcome::Billed {
                declaration_id,
                receipt,
                ..
            } => {
                lines.push(format!(
                    "payment {} for {} ({} {})",
                    receipt.payment.id,
                    receipt.payment.amount,
                    receipt.payment.method,
                    receipt.payment.status.label()
                ));
                lines.push(declaration_line(store, declaration_id)?);
            }
            GroupOutcome::Failed { error, .. } => {
                lines.push(format!("{} not billed: {error}", group.source_declaration_id));
            }
        }
    }
    lines.extend(report.warnings.iter().map(|warning| format!("warning: {warning}")));
    Ok(lines)
}

fn whole_declaration(
    service: &DemoService,
    store: &InMemoryDeclarationStore,
) -> Result<ScenarioResult, AppError> {
    let report = service.submit_selection(
        &selection(&["p-kk001-1", "p-kk001-2", "p-kk001-3"]),
        &sample_owner(),
    )?;
    let amount: i64 = report.billed().map(|receipt| receipt.payment.amount).sum();
    Ok(ScenarioResult {
        title: "Submit every participant of KK001",
        outcome: format!("billed directly, amount {amount}"),
        details: billed_lines(store, &report)?,
    })
}

fn subset_split(
    service: &DemoService,
    store: &InMemoryDeclarationStore,
) -> Result<ScenarioResult, AppError> {
    let report =
        service.submit_selection(&selection(&["p-kk001-1", "p-kk001-2"]), &sample_owner())?;
    let mut details = billed_lines(store, &report)?;
    details.push(declaration_line(store, &DeclarationId("d-kk001".to_string()))?);
    let amount: i64 = report.billed().map(|receipt| receipt.payment.amount).sum();
    Ok(ScenarioResult {
        title: "Submit two of the three KK001 participants",
        outcome: format!("split into a new declaration, amount {amount}"),
        details,
    })
}

fn mixed_selection(
    service: &DemoService,
    store: &InMemoryDeclarationStore,
) -> Result<ScenarioResult, AppError> {
    let outcome = rejection(
        service.submit_selection(&selection(&["p-kk001-1", "p-kk002-1"]), &sample_owner()),
    )?;
    Ok(ScenarioResult {
        title: "Submit a draft and a submitted participant together",
        outcome,
        details: vec![
            format!("payments stored: {}", store.payments()?.len()),
            declaration_line(store, &DeclarationId("d-kk001".to_string()))?,
            declaration_line(store, &DeclarationId("d-kk002".to_string()))?,
        ],
    })
}

fn reconcile_twice(
    service: &DemoService,
    store: &InMemoryDeclarationStore,
) -> Result<ScenarioResult, AppError> {
    let declaration_id = DeclarationId("d-kk001".to_string());
    let payment = service.view_payment(&declaration_id)?;

    let first = service.confirm_payment(&payment.id, None, &sample_owner())?;
    let after_first = declaration_line(store, &declaration_id)?;
    let second = service.confirm_payment(&payment.id, None, &sample_owner())?;
    let after_second = declaration_line(store, &declaration_id)?;

    let mut details = vec![
        format!("first: {after_first}"),
        format!("second: {after_second}"),
    ];
    details.extend(
        first
            .warnings
            .iter()
            .chain(&second.warnings)
            .map(|warning| format!("warning: {warning}")),
    );
    let outcome = if after_first == after_second && second.already_settled {
        format!("payment {} completed; repeat run changed nothing", payment.id)
    } else {
        format!("payment {} completed; repeat run diverged", payment.id)
    };
    Ok(ScenarioResult {
        title: "Confirm the KK001 payment twice",
        outcome,
        details,
    })
}

fn zero_amount(
    service: &DemoService,
    store: &InMemoryDeclarationStore,
) -> Result<ScenarioResult, AppError> {
    let outcome = rejection(
        service.submit_selection(&selection(&["p-kk005-1", "p-kk005-2"]), &sample_owner()),
    )?;
    Ok(ScenarioResult {
        title: "Submit KK005 whose contributions are empty",
        outcome,
        details: vec![
            format!("payments stored: {}", store.payments()?.len()),
            declaration_line(store, &DeclarationId("d-kk005".to_string()))?,
        ],
    })
}

/// Validation failures are the expected result; anything else aborts the demo.
fn rejection(result: Result<SubmissionReport, DeclarationWorkflowError>) -> Result<String, AppError> {
    match result {
        Ok(report) => Ok(format!(
            "unexpectedly accepted ({} groups)",
            report.groups.len()
        )),
        Err(DeclarationWorkflowError::Validation(err)) => Ok(format!("rejected: {err}")),
        Err(err) => Err(err.into()),
    }
}
