//! End-to-end tests: plan text in, recorded results out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use dagrun::test_support::ScriptedCapability;
use dagrun::{CapabilityRegistry, PlanParser, Scheduler, SchedulerConfig, Session};

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        max_workers: 8,
        poll_interval_ms: 10,
        wait_timeout_secs: 1,
    }
}

#[test]
fn streamed_plan_executes_with_references_resolved() {
    let lookup = Arc::new(
        ScriptedCapability::new("lookup")
            .with_param("code")
            .with_field("returns", json!([1, 2, 3])),
    );
    let average = Arc::new(
        ScriptedCapability::new("average")
            .with_param("values")
            .returning(json!(2.0)),
    );
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::clone(&lookup));
    registry.register(Arc::clone(&average));

    // Fragments deliberately split mid-token and mid-reference.
    let mut parser = PlanParser::new(registry);
    let mut steps = Vec::new();
    for fragment in [
        "Thought: fetch, then aggregate\n1. look",
        "up(code=\"AAPL\")\n2. average(values=$",
        "{1}.returns)\n3. join()",
    ] {
        steps.extend(parser.ingest(fragment));
    }
    steps.extend(parser.finish());
    assert_eq!(steps.len(), 3);

    let session = Arc::new(Session::new());
    let round = Scheduler::new(Arc::clone(&session), fast_config()).execute_round(steps);

    assert!(round.abandoned.is_empty());
    let names: Vec<&str> = round.completions.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["lookup", "average"]);

    // The reference crossed the worker boundary with its concrete value.
    let (args, ctx) = average.invocations().remove(0);
    assert_eq!(args["values"], json!([1, 2, 3]));
    let dep = ctx.resolved.get("values").expect("dependency recorded");
    assert_eq!(dep.producer, 1);
    assert_eq!(dep.field, "returns");

    // Session keeps everything, join included.
    assert!(session.has_result(3));
    assert_eq!(session.result_indices().len(), 3);
}

#[test]
fn independent_steps_overlap_instead_of_serializing() {
    let slow = Arc::new(
        ScriptedCapability::new("slow")
            .with_param("tag")
            .with_delay(Duration::from_millis(80))
            .echoing(),
    );
    let session = Arc::new(Session::new());
    let scheduler = Scheduler::new(Arc::clone(&session), fast_config());

    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::clone(&slow));
    let plan: String = (1..=6)
        .map(|n| format!("{n}. slow(tag=\"t{n}\")\n"))
        .collect();
    let steps = PlanParser::new(registry).parse_complete(&plan);
    assert_eq!(steps.len(), 6);

    let start = Instant::now();
    let round = scheduler.execute_round(steps);
    let elapsed = start.elapsed();

    assert_eq!(round.completions.len(), 6);
    assert_eq!(slow.invocation_count(), 6);
    // Six 80ms sleeps on 8 workers: far below the 480ms serial floor.
    assert!(elapsed < Duration::from_millis(400));
}

#[test]
fn follow_up_round_consumes_prior_round_results() {
    let lookup = Arc::new(
        ScriptedCapability::new("lookup")
            .with_param("code")
            .with_field("price", json!(187.2)),
    );
    let report = Arc::new(ScriptedCapability::new("report").with_param("price").echoing());
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::clone(&lookup));
    registry.register(Arc::clone(&report));

    let session = Arc::new(Session::new());
    let scheduler = Scheduler::new(Arc::clone(&session), fast_config());

    let first = PlanParser::new(registry.clone())
        .parse_complete("1. lookup(code=\"AAPL\")\n2. join()\n");
    scheduler.execute_round(first);

    // The second round continues the global numbering and may reference
    // results from the first.
    let offset = session.highest_index();
    let second = PlanParser::with_offset(registry, offset)
        .parse_complete("1. report(price=${1}.price)\n2. join()\n");
    assert_eq!(second[0].index, 3);

    let round = scheduler.execute_round(second);
    assert_eq!(round.completions.len(), 1);
    let (args, _) = report.invocations().remove(0);
    assert_eq!(args["price"], json!(187.2));
}

#[test]
fn failure_feeds_back_as_text_while_round_completes() {
    let flaky = Arc::new(
        ScriptedCapability::new("flaky")
            .with_param("code")
            .failing("upstream returned 500"),
    );
    let steady = Arc::new(
        ScriptedCapability::new("steady")
            .with_param("code")
            .returning(json!("ok")),
    );
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::clone(&flaky));
    registry.register(Arc::clone(&steady));

    let session = Arc::new(Session::new());
    let plan = "1. flaky(code=\"AAPL\")\n2. steady(code=\"MSFT\")\n3. join()\n";
    let steps = PlanParser::new(registry).parse_complete(plan);
    let round = Scheduler::new(session, fast_config()).execute_round(steps);

    assert_eq!(round.completions.len(), 2);
    assert!(round.abandoned.is_empty());
    let transcript = round.transcript();
    assert!(transcript.contains("ERROR(Failed to call flaky with args code=\"AAPL\"."));
    assert!(transcript.contains("Error: upstream returned 500"));
    assert!(transcript.contains("ok"));
}

#[test]
fn composite_reference_interpolates_both_results() {
    let quote = Arc::new(
        ScriptedCapability::new("quote")
            .with_param("code")
            .returning(json!("10")),
    );
    let narrate = Arc::new(ScriptedCapability::new("narrate").with_param("text").echoing());
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::clone(&quote));
    registry.register(Arc::clone(&narrate));

    let plan = "1. quote(code=\"A\")\n\
                2. quote(code=\"B\")\n\
                3. narrate(text=avg of $1 and $2)\n\
                4. join()\n";
    let steps = PlanParser::new(registry).parse_complete(plan);
    let session = Arc::new(Session::new());
    let round = Scheduler::new(session, fast_config()).execute_round(steps);

    // Both quote calls share one announcement-distinct entry each.
    assert_eq!(round.completions.len(), 3);
    let (args, _) = narrate.invocations().remove(0);
    assert_eq!(args["text"], json!("avg of 10 and 10"));
}

#[test]
fn abandoned_step_leaves_no_result_behind() {
    let consumer = Arc::new(ScriptedCapability::new("consume").with_param("v").echoing());
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::clone(&consumer));

    // `$7` names a step that will never run.
    let steps = PlanParser::new(registry).parse_complete("8. consume(v=$7)\n");
    let session = Arc::new(Session::new());
    let round = Scheduler::new(Arc::clone(&session), fast_config()).execute_round(steps);

    assert_eq!(round.abandoned, [8]);
    assert!(round.completions.is_empty());
    assert!(!session.has_result(8));
    assert_eq!(consumer.invocation_count(), 0);
}
