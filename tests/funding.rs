mod common;

use common::{context, delivered, of_kind, record_all, ScriptedPool};
use jobmesh::backend::FixedMarketOracle;
use jobmesh::config::DispatchConfig;
use jobmesh::{ComputeContext, EventKind, InMemoryAccount, Job, StaticIdentity, WorkDescriptor};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

/// Offer 5 on two slices with a balance of 4: NOFUNDS once, nothing dispatched
/// until the balance covers both slices.
#[tokio::test]
async fn insufficient_funds_pause_dispatch_until_deposit() {
    let (pool, mut dispatched) = ScriptedPool::new(2);
    let account = InMemoryAccount::new("acct-42", dec!(4));
    let ctx = context(pool, account.clone(), DispatchConfig::default());
    let mut job = Job::compute_for(ctx, vec![json!(1), json!(2)], WorkDescriptor::new("f"), vec![])
        .unwrap();
    job.public.name = "Template job".into();
    let events = record_all(&mut job);
    let handle = job.exec(Some(dec!(5))).unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.funding_paused);
    assert_eq!(snapshot.ever_dispatched(), 0);
    assert!(dispatched.try_recv().is_err());

    // A refresh that does not change the balance must not re-fire NOFUNDS
    handle.refresh_funding().await;
    handle.snapshot().await.unwrap();

    delivered(&events, EventKind::NoFunds, 1).await;
    let nofunds = of_kind(&events, EventKind::NoFunds);
    assert_eq!(nofunds.len(), 1);
    let payload = nofunds[0].to_json();
    assert_eq!(payload["remainingSlices"], json!(2));
    assert_eq!(payload["fundsRequired"], json!("10"));
    assert_eq!(payload["slicePaymentAmount"], json!("5"));
    assert_eq!(payload["bankAccount"], json!("acct-42"));
    assert_eq!(payload["name"], json!("Template job"));

    account.deposit(dec!(6)).await;
    handle.refresh_funding().await;

    let a = dispatched.recv().await.unwrap();
    let b = dispatched.recv().await.unwrap();
    a.finish(json!("a")).await;
    b.finish(json!("b")).await;

    assert_eq!(handle.results().await.unwrap().len(), 2);
    assert_eq!(of_kind(&events, EventKind::NoFunds).len(), 1);
    assert_eq!(
        jobmesh::PaymentAccount::balance(&account).await.unwrap(),
        dec!(0)
    );
}

/// A zero offer never triggers funding checks.
#[tokio::test]
async fn zero_offer_skips_funding() {
    let (pool, mut dispatched) = ScriptedPool::new(1);
    let ctx = context(pool, InMemoryAccount::new("empty", dec!(0)), DispatchConfig::default());
    let mut job = Job::compute_for(ctx, vec![json!(1)], WorkDescriptor::new("f"), vec![]).unwrap();
    let events = record_all(&mut job);
    let handle = job.exec(Some(dec!(0))).unwrap();

    dispatched.recv().await.unwrap().finish(json!(true)).await;
    assert_eq!(handle.results().await.unwrap(), vec![json!(true)]);
    assert!(of_kind(&events, EventKind::NoFunds).is_empty());
}

/// Without an explicit offer the job pays the market price quoted at submission.
#[tokio::test]
async fn market_offer_is_quoted_at_submission() {
    let (pool, mut dispatched) = ScriptedPool::new(1);
    let ctx = ComputeContext::builder()
        .identity(Arc::new(StaticIdentity("market-user".into())))
        .payment(Arc::new(InMemoryAccount::new("bank", dec!(10))))
        .oracle(Arc::new(FixedMarketOracle(dec!(0.25))))
        .executors(pool)
        .build()
        .unwrap();
    assert_eq!(ctx.market_value().await.unwrap(), dec!(0.25));

    let job = Job::compute_for(ctx, vec![json!(1)], WorkDescriptor::new("f"), vec![]).unwrap();
    let handle = job.exec(None).unwrap();
    let slice = dispatched.recv().await.unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.pricing.offer, dec!(0.25));
    assert_eq!(snapshot.pricing.market_reference, Some(dec!(0.25)));

    slice.finish(json!(1)).await;
    handle.results().await.unwrap();
}

/// A job that never got funded can still be cancelled.
#[tokio::test]
async fn unfunded_job_can_be_cancelled() {
    let (pool, mut dispatched) = ScriptedPool::new(1);
    let ctx = context(pool, InMemoryAccount::new("bank", dec!(1)), DispatchConfig::default());
    let mut job = Job::compute_for(ctx, vec![json!(1), json!(2)], WorkDescriptor::new("f"), vec![])
        .unwrap();
    let events = record_all(&mut job);
    let handle = job.exec(Some(dec!(1))).unwrap();

    handle.cancel().await;
    let err = handle.wait(None).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.unresolved_slices(), Some(&[0usize, 1][..]));
    assert_eq!(common::states(&events), vec!["accepted", "cancelled"]);
    assert_eq!(of_kind(&events, EventKind::NoFunds).len(), 1);
    assert!(dispatched.try_recv().is_err());
}

/// An offer whose total cost cannot be represented pauses dispatch; the job stays responsive.
#[tokio::test]
async fn overflowing_offer_pauses_instead_of_crashing() {
    let (pool, mut dispatched) = ScriptedPool::new(1);
    let ctx = context(pool, InMemoryAccount::new("bank", dec!(10)), DispatchConfig::default());
    let mut job = Job::compute_for(ctx, vec![json!(1), json!(2)], WorkDescriptor::new("f"), vec![])
        .unwrap();
    let events = record_all(&mut job);
    let handle = job.exec(Some(rust_decimal::Decimal::MAX)).unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert!(snapshot.funding_paused);
    assert_eq!(snapshot.ever_dispatched(), 0);

    delivered(&events, EventKind::NoFunds, 1).await;
    let payload = of_kind(&events, EventKind::NoFunds)[0].to_json();
    assert_eq!(payload["remainingSlices"], json!(2));

    handle.cancel().await;
    let err = handle.wait(None).await.unwrap_err();
    assert!(err.is_cancelled(), "got {err:?}");
    assert!(dispatched.try_recv().is_err());
}
