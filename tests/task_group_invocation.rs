// tests/task_group_invocation.rs

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use taskgraph::engine::InvocationContext;
use taskgraph::errors::{GraphError, GroupError};
use taskgraph::group::{EntryRole, FunctionalTaskItem, TaskGroup};
use taskgraph::TaskOutput;
use taskgraph_test_utils::builders::{reference_task_groups, REFERENCE_GRAPH};
use taskgraph_test_utils::{init_tracing, with_timeout, InvocationLog, RecordingTaskItem};

fn position(keys: &[&str], key: &str) -> usize {
    keys.iter()
        .position(|k| *k == key)
        .unwrap_or_else(|| panic!("{key} missing from {keys:?}"))
}

#[tokio::test]
async fn test_reference_graph_runs_in_dependency_order() {
    init_tracing();
    let log = InvocationLog::new();
    let groups = reference_task_groups(|key| RecordingTaskItem::new(key, &log));

    let summary = with_timeout(groups["F"].invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success(), "unexpected error: {:?}", summary.error);
    let keys = summary.keys();
    assert_eq!(keys.len(), REFERENCE_GRAPH.len());
    for (key, deps) in REFERENCE_GRAPH.iter() {
        assert_eq!(log.count(key), 1, "{key} should run exactly once");
        assert_eq!(summary.value_of(key).map(String::as_str), Some(*key));
        for dep in deps.iter() {
            assert!(position(&keys, dep) < position(&keys, key));
        }
    }
    assert_eq!(keys.last(), Some(&"F"));
}

#[tokio::test]
async fn test_independent_branches_run_concurrently() {
    let log = InvocationLog::new();
    let slow_a = RecordingTaskItem::new("slow_a", &log).with_delay(200).into_group();
    let slow_b = RecordingTaskItem::new("slow_b", &log).with_delay(200).into_group();
    let root = RecordingTaskItem::new("root", &log).into_group();
    root.add_dependency_task_group(&slow_a).unwrap();
    root.add_dependency_task_group(&slow_b).unwrap();

    let started = std::time::Instant::now();
    let summary = with_timeout(root.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success());
    assert!(started.elapsed() < std::time::Duration::from_millis(390));
}

#[tokio::test]
async fn test_shared_dependency_runs_once() {
    let log = InvocationLog::new();
    let shared = RecordingTaskItem::new("S", &log).into_group();
    let x = RecordingTaskItem::new("X", &log).into_group();
    let y = RecordingTaskItem::new("Y", &log).into_group();
    let top = RecordingTaskItem::new("Z", &log).into_group();

    x.add_dependency_task_group(&shared).unwrap();
    y.add_dependency_task_group(&shared).unwrap();
    top.add_dependency_task_group(&x).unwrap();
    top.add_dependency_task_group(&y).unwrap();

    let summary = with_timeout(top.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success());
    assert_eq!(log.count("S"), 1);
    assert_eq!(summary.keys().len(), 4);
    assert_eq!(log.position("S"), Some(0));
    assert_eq!(log.invoked().last().map(String::as_str), Some("Z"));
}

#[tokio::test]
async fn test_add_dependent_task_group() {
    let log = InvocationLog::new();
    let base = RecordingTaskItem::new("base", &log).into_group();
    let dependent = RecordingTaskItem::new("dependent", &log).into_group();

    assert_eq!(base.add_dependent_task_group(&dependent).unwrap(), "dependent");

    let summary = with_timeout(dependent.invoke_to_end(InvocationContext::new())).await;
    assert_eq!(summary.keys(), vec!["base", "dependent"]);

    // The dependency's own graph is unchanged.
    assert_eq!(base.entry_keys(), vec!["base"]);
}

#[tokio::test]
async fn test_post_run_dependent_runs_after_group() {
    init_tracing();
    let log = InvocationLog::new();
    let groups = reference_task_groups(|key| RecordingTaskItem::new(key, &log));
    let group1 = &groups["F"];
    let group2 = RecordingTaskItem::new("K", &log).into_group();

    group1.add_post_run_dependent_task_group(&group2).unwrap();

    let proxy = group1.proxy().expect("post-run dependent activates the proxy");
    assert_eq!(proxy.key(), "proxy-F");
    assert!(group1.is_proxy_active());
    assert_eq!(
        group1.root_entry().data().proxy_key().as_deref(),
        Some("proxy-F")
    );
    assert!(proxy.root_entry().data().is_proxy());
    assert!(matches!(
        proxy.root_entry().data().role(),
        EntryRole::Proxy { actual } if actual.key() == "F"
    ));

    let summary = with_timeout(group1.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success(), "unexpected error: {:?}", summary.error);
    let keys = summary.keys();
    assert_eq!(keys.len(), REFERENCE_GRAPH.len() + 2);
    assert!(position(&keys, "F") < position(&keys, "K"));
    assert_eq!(keys.last(), Some(&"proxy-F"));
    assert_eq!(log.count("F"), 1);
    assert_eq!(log.count("K"), 1);

    // The proxy is a pass-through for the group it stands in for.
    assert_eq!(summary.value_of("proxy-F").map(String::as_str), Some("F"));
    assert_eq!(log.hooks(), vec![("F".to_string(), false)]);
}

#[tokio::test]
async fn test_dependent_waits_for_post_run_work() {
    let log = InvocationLog::new();
    let host = RecordingTaskItem::new("F", &log).into_group();
    let post = RecordingTaskItem::new("K", &log).with_delay(50).into_group();
    host.add_post_run_dependent_task_group(&post).unwrap();

    // Added after the proxy exists: goes through the proxy.
    let late = RecordingTaskItem::new("late", &log).into_group();
    late.add_dependency_task_group(&host).unwrap();
    assert_eq!(late.dag().dependencies_of("late"), vec!["proxy-F"]);

    let summary = with_timeout(late.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success());
    assert_eq!(summary.keys(), vec!["F", "K", "proxy-F", "late"]);
}

#[tokio::test]
async fn test_existing_dependents_are_rewired_onto_proxy() {
    let log = InvocationLog::new();
    let host = RecordingTaskItem::new("F", &log).into_group();
    let early = RecordingTaskItem::new("early", &log).into_group();
    early.add_dependency_task_group(&host).unwrap();
    assert_eq!(early.dag().dependencies_of("early"), vec!["F"]);

    let post = RecordingTaskItem::new("K", &log).into_group();
    host.add_post_run_dependent_task_group(&post).unwrap();

    assert_eq!(early.dag().dependencies_of("early"), vec!["proxy-F"]);
    assert!(early.dag().contains("K"));

    let summary = with_timeout(early.invoke_to_end(InvocationContext::new())).await;
    assert_eq!(summary.keys(), vec!["F", "K", "proxy-F", "early"]);
}

#[tokio::test]
async fn test_post_run_dependent_with_its_own_post_run() {
    let log = InvocationLog::new();
    let a = RecordingTaskItem::new("A", &log).into_group();
    let b = RecordingTaskItem::new("B", &log).into_group();
    let c = RecordingTaskItem::new("C", &log).into_group();

    b.add_post_run_dependent_task_group(&c).unwrap();
    a.add_post_run_dependent_task_group(&b).unwrap();

    let summary = with_timeout(a.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success());
    let keys = summary.keys();
    assert!(position(&keys, "A") < position(&keys, "B"));
    assert!(position(&keys, "B") < position(&keys, "C"));
    assert!(position(&keys, "C") < position(&keys, "proxy-B"));
    assert_eq!(keys.last(), Some(&"proxy-A"));
}

#[tokio::test]
async fn test_cached_results_are_not_reinvoked() {
    let log = InvocationLog::new();
    let groups = reference_task_groups(|key| RecordingTaskItem::new(key, &log));
    let root = &groups["F"];

    let first = with_timeout(root.invoke_to_end(InvocationContext::new())).await;
    assert!(first.is_success());

    let second = with_timeout(root.invoke_to_end(InvocationContext::new())).await;
    assert!(second.is_success());
    assert_eq!(second.keys().len(), REFERENCE_GRAPH.len());

    // Only the invoked root runs again.
    assert_eq!(log.count("F"), 2);
    assert_eq!(log.count("A"), 1);
    assert_eq!(second.value_of("A").map(String::as_str), Some("A"));
    assert_eq!(root.task_result("E").as_deref(), Some("E"));
    assert_eq!(root.task_result("missing"), None);
}

#[tokio::test]
async fn test_actual_root_reinvoked_through_its_proxy() {
    let log = InvocationLog::new();
    let host = RecordingTaskItem::new("F", &log).into_group();
    host.add_post_run_dependent("K", RecordingTaskItem::new("K", &log))
        .unwrap();

    with_timeout(host.invoke_to_end(InvocationContext::new())).await;
    let second = with_timeout(host.invoke_to_end(InvocationContext::new())).await;

    assert!(second.is_success());
    assert_eq!(log.count("F"), 2);
    assert_eq!(log.count("K"), 1);
    assert_eq!(log.hooks().len(), 2);
}

#[tokio::test]
async fn test_hot_item_is_not_invoked() {
    let log = InvocationLog::new();
    let warm = RecordingTaskItem::new("warm", &log).hot("already-running").into_group();
    let root = RecordingTaskItem::new("root", &log).into_group();
    root.add_dependency_task_group(&warm).unwrap();

    let summary = with_timeout(root.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success());
    assert_eq!(log.count("warm"), 0);
    assert_eq!(
        summary.value_of("warm").map(String::as_str),
        Some("already-running")
    );
    assert_eq!(log.invoked(), vec!["root"]);
}

#[tokio::test]
async fn test_delayed_dependency_attached_in_prepare() {
    let log = InvocationLog::new();
    let hook_log = log.clone();
    let item = RecordingTaskItem::new("root", &log).on_prepare(move |ctx| {
        let owner = ctx.owner().expect("root group is alive");
        owner
            .add_dependency("late", RecordingTaskItem::new("late", &hook_log))
            .unwrap();
    });
    let prepared = item.prepare_counter();
    let root = item.into_group();

    assert_eq!(root.entry_keys(), vec!["root"]);

    let summary = with_timeout(root.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success());
    assert_eq!(summary.keys(), vec!["late", "root"]);
    assert_eq!(prepared.load(Ordering::SeqCst), 1);

    // Already prepared: the hook does not run again.
    with_timeout(root.invoke_to_end(InvocationContext::new())).await;
    assert_eq!(prepared.load(Ordering::SeqCst), 1);
    assert_eq!(root.entry_keys(), vec!["root", "late"]);
}

#[tokio::test]
async fn test_post_run_dependent_attached_in_prepare() {
    let log = InvocationLog::new();
    let hook_log = log.clone();
    let root = RecordingTaskItem::new("root", &log)
        .on_prepare(move |ctx| {
            ctx.owner()
                .expect("root group is alive")
                .add_post_run_dependent("cleanup", RecordingTaskItem::new("cleanup", &hook_log))
                .unwrap();
        })
        .into_group();

    let summary = with_timeout(root.invoke_to_end(InvocationContext::new())).await;

    assert!(summary.is_success(), "unexpected error: {:?}", summary.error);
    assert_eq!(summary.keys(), vec!["root", "cleanup", "proxy-root"]);
}

#[tokio::test]
async fn test_every_entry_prepared_once() {
    let log = InvocationLog::new();
    let mut counters = Vec::new();
    let groups = reference_task_groups(|key| {
        let item = RecordingTaskItem::new(key, &log);
        counters.push(item.prepare_counter());
        item
    });

    let prepared = groups["F"].prepare_entries();
    assert_eq!(prepared, REFERENCE_GRAPH.len());
    assert_eq!(groups["F"].prepare_entries(), 0);

    with_timeout(groups["F"].invoke_to_end(InvocationContext::new())).await;
    for counter in counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_concurrent_prepare_runs_hook_once() {
    let log = InvocationLog::new();
    let item = RecordingTaskItem::new("X", &log)
        .on_prepare(|_ctx| std::thread::sleep(Duration::from_millis(50)));
    let counter = item.prepare_counter();
    let group = item.into_group();
    let root = group.root_entry();

    let ran: Vec<bool> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| root.data().try_prepare(root.key())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(ran.iter().filter(|ran| **ran).count(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(root.data().is_prepared());
    assert_eq!(group.prepare_entries(), 0);
}

#[test]
#[should_panic(expected = "prepare called twice for task 'X'")]
fn test_preparing_entry_twice_panics() {
    let log = InvocationLog::new();
    let group = RecordingTaskItem::new("X", &log).into_group();
    let root = group.root_entry();
    root.data().prepare(root.key());
    root.data().prepare(root.key());
}

#[tokio::test]
async fn test_functional_item_reads_context() {
    let log = InvocationLog::new();
    let root = RecordingTaskItem::new("root", &log).into_group();
    root.add_dependency(
        "greeter",
        FunctionalTaskItem::new(|ctx: InvocationContext| async move {
            match ctx.get::<String>("name") {
                Some(name) => Ok(format!("hello {name}")),
                None => Err(anyhow::anyhow!("no name in context")),
            }
        }),
    )
    .unwrap();

    let ctx = InvocationContext::new();
    ctx.put("name", "graph".to_string());
    assert!(ctx.has_key("name"));
    assert_eq!(ctx.get::<u32>("name"), None);

    let summary = with_timeout(root.invoke_to_end(ctx)).await;
    assert_eq!(
        summary.value_of("greeter").map(String::as_str),
        Some("hello graph")
    );
}

#[tokio::test]
async fn test_stream_yields_results_as_they_complete() {
    let log = InvocationLog::new();
    let root = RecordingTaskItem::new("root", &log).into_group();
    root.add_dependency("fast", RecordingTaskItem::new("fast", &log))
        .unwrap();
    root.add_dependency("slow", RecordingTaskItem::new("slow", &log).with_delay(100))
        .unwrap();

    let items: Vec<_> = with_timeout(root.invoke(InvocationContext::new()).collect()).await;
    let keys: Vec<String> = items
        .into_iter()
        .map(|item| item.map(|TaskOutput { key, .. }| key).unwrap())
        .collect();

    assert_eq!(keys, vec!["fast", "slow", "root"]);
}

#[tokio::test]
async fn test_group_cycle_is_rejected() {
    let log = InvocationLog::new();
    let a = RecordingTaskItem::new("A", &log).into_group();
    let b = RecordingTaskItem::new("B", &log).into_group();
    a.add_dependency_task_group(&b).unwrap();

    assert!(matches!(
        b.add_dependency_task_group(&a),
        Err(GraphError::CircularDependency(_))
    ));
    assert!(matches!(
        a.add_post_run_dependent_task_group(&a),
        Err(GraphError::CircularDependency(_))
    ));
    assert!(!a.is_proxy_active());

    // B is already a dependency of A, so it cannot also run after A.
    assert!(matches!(
        a.add_post_run_dependent_task_group(&b),
        Err(GraphError::CircularDependency(_))
    ));
    assert!(!a.is_proxy_active());
    assert_eq!(a.dag().dependencies_of("A"), vec!["B"]);
    assert_eq!(b.dag().dependencies_of("B"), Vec::<String>::new());
}

#[tokio::test]
async fn test_rejected_post_run_attach_leaves_groups_untouched() {
    let log = InvocationLog::new();
    let a = RecordingTaskItem::new("A", &log).into_group();
    let k = RecordingTaskItem::new("K", &log).into_group();
    k.add_dependency_task_group(&a).unwrap();

    // K already runs after A; moving it behind A's proxy would make the
    // proxy wait on itself.
    assert!(matches!(
        a.add_post_run_dependent_task_group(&k),
        Err(GraphError::CircularDependency(_))
    ));

    assert!(!a.is_proxy_active());
    assert_eq!(a.root_entry().data().proxy_key(), None);
    assert_eq!(k.dag().dependencies_of("K"), vec!["A"]);
    assert!(!k.dag().contains("proxy-A"));

    let summary = with_timeout(k.invoke_to_end(InvocationContext::new())).await;
    assert!(summary.is_success(), "unexpected error: {:?}", summary.error);
    assert_eq!(summary.keys(), vec!["A", "K"]);

    let summary = with_timeout(a.invoke_to_end(InvocationContext::new())).await;
    assert_eq!(summary.keys(), vec!["A"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_invocations_of_one_group() {
    let log = InvocationLog::new();
    let root = RecordingTaskItem::new("root", &log).into_group();
    root.add_dependency("slow", RecordingTaskItem::new("slow", &log).with_delay(100))
        .unwrap();

    let first = tokio::spawn({
        let root = root.clone();
        async move { root.invoke_to_end(InvocationContext::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = tokio::spawn({
        let root = root.clone();
        async move { root.invoke_to_end(InvocationContext::new()).await }
    });

    let (first, second) = with_timeout(async { (first.await, second.await) }).await;

    for summary in [first.unwrap(), second.unwrap()] {
        let outputs = summary.into_result().unwrap();
        let keys: Vec<&str> = outputs.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["slow", "root"]);
    }
    // The second run started before the first cached a result for "slow".
    assert_eq!(log.count("slow"), 2);
    assert_eq!(log.count("root"), 2);
}

#[tokio::test]
async fn test_callback_invocation_is_unsupported() {
    let log = InvocationLog::new();
    let group: TaskGroup<String> = RecordingTaskItem::new("root", &log).into_group();

    let result = group.invoke_with_callback(InvocationContext::new(), |_output| {});

    assert!(matches!(result, Err(GroupError::Unsupported(_))));
    assert!(log.invoked().is_empty());
}
