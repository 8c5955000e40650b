//! End-to-end send/poll/ack/fail/replay scenarios

use agent_file_bus_core::bus::MessageBus;
use agent_file_bus_core::config::{ConfigOverrides, resolve_config};
use agent_file_bus_core::schema::{CompletionStatus, Message, TaskStatus};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn setup() -> (TempDir, MessageBus) {
    agent_file_bus_core::logging::init();
    let temp_dir = TempDir::new().unwrap();
    let bus = MessageBus::new(temp_dir.path().join("messages"));
    (temp_dir, bus)
}

fn dlq_files(root: &Path) -> (Vec<String>, Vec<String>) {
    let mut json = Vec::new();
    let mut reasons = Vec::new();
    for entry in fs::read_dir(root.join("dlq")).unwrap() {
        let name = entry.unwrap().file_name().into_string().unwrap();
        if name.ends_with(".reason.txt") {
            reasons.push(name);
        } else if name.ends_with(".json") {
            json.push(name);
        }
    }
    (json, reasons)
}

#[test]
fn test_scenario_a_send_poll_ack() {
    let (_guard, bus) = setup();
    let msg = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a");

    bus.send_to_inbox("agent-a", &msg).unwrap();

    let polled = bus.poll("agent-a", 10).unwrap();
    assert_eq!(polled.len(), 1);
    assert_eq!(polled[0].task_id(), "t-1");

    bus.ack("agent-a", &polled[0]).unwrap();
    assert!(bus.poll("agent-a", 10).unwrap().is_empty());
}

#[test]
fn test_scenario_b_malformed_json_quarantined() {
    let (_guard, bus) = setup();
    let inbox = bus.layout().inbox_dir("agent-a");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(inbox.join("broken.json"), b"{not-json").unwrap();

    let polled = bus.poll("agent-a", 10).unwrap();
    assert!(polled.is_empty());

    let (json, reasons) = dlq_files(bus.root());
    assert_eq!(json.len(), 1, "exactly one DLQ message file");
    assert_eq!(reasons.len(), 1, "exactly one reason sidecar");
    assert_eq!(
        json[0].trim_end_matches(".json"),
        reasons[0].trim_end_matches(".reason.txt")
    );
    let raw = fs::read(bus.root().join("dlq").join(&json[0])).unwrap();
    assert_eq!(raw, b"{not-json");
}

#[test]
fn test_scenario_c_reused_message_id_suppressed() {
    let (_guard, bus) = setup();
    let first = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a")
        .with_message_id("fixed-id");
    bus.send_to_inbox("agent-a", &first).unwrap();
    let polled = bus.poll("agent-a", 10).unwrap();
    assert_eq!(polled.len(), 1);
    bus.ack("agent-a", &polled[0]).unwrap();

    let second = Message::task_assignment("wf-1", "t-2", "orchestrator", "agent-a")
        .with_message_id("fixed-id");
    bus.send_to_inbox("agent-a", &second).unwrap();

    assert!(bus.poll("agent-a", 10).unwrap().is_empty());
}

#[test]
fn test_idempotence_survives_restart() {
    let (guard, bus) = setup();
    let msg = Message::status_update("wf-1", "t-1", "agent-a", TaskStatus::Completed, 100);
    bus.send_to_inbox("orchestrator", &msg).unwrap();
    let polled = bus.poll("orchestrator", 10).unwrap();
    bus.ack("orchestrator", &polled[0]).unwrap();
    drop(bus);

    let restarted = MessageBus::new(guard.path().join("messages"));
    restarted.send_to_inbox("orchestrator", &msg).unwrap();
    assert!(restarted.poll("orchestrator", 10).unwrap().is_empty());
}

#[test]
fn test_padded_message_id_not_redelivered_after_restart() {
    let (guard, bus) = setup();
    let msg = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a")
        .with_message_id("fixed-id ");
    bus.send_to_inbox("agent-a", &msg).unwrap();
    let polled = bus.poll("agent-a", 10).unwrap();
    bus.ack("agent-a", &polled[0]).unwrap();
    drop(bus);

    let restarted = MessageBus::new(guard.path().join("messages"));
    restarted.send_to_inbox("agent-a", &msg).unwrap();
    assert!(restarted.poll("agent-a", 10).unwrap().is_empty());
    assert!(restarted.is_processed("agent-a", "fixed-id ").unwrap());
}

#[test]
fn test_schema_failure_reason_mentions_validation() {
    let (_guard, bus) = setup();
    let mut value = serde_json::to_value(Message::task_assignment(
        "wf-1",
        "t-1",
        "orchestrator",
        "agent-a",
    ))
    .unwrap();
    value.as_object_mut().unwrap().remove("workflow_id");
    let inbox = bus.layout().inbox_dir("agent-a");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(
        inbox.join("no-workflow.json"),
        serde_json::to_vec(&value).unwrap(),
    )
    .unwrap();

    assert!(bus.poll("agent-a", 10).unwrap().is_empty());

    let dlq = bus.list_dlq().unwrap();
    assert_eq!(dlq.len(), 1);
    assert!(dlq[0].reason.as_deref().unwrap().contains("validation failed"));
}

#[test]
fn test_extra_field_quarantined() {
    let (_guard, bus) = setup();
    let mut value = serde_json::to_value(Message::task_complete(
        "wf-1",
        "t-1",
        "agent-a",
        CompletionStatus::Completed,
    ))
    .unwrap();
    value["verdict"] = serde_json::json!("lgtm");
    let inbox = bus.layout().inbox_dir("orchestrator");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(inbox.join("extra.json"), serde_json::to_vec(&value).unwrap()).unwrap();

    assert!(bus.poll("orchestrator", 10).unwrap().is_empty());
    let summary = bus.list_dlq().unwrap()[0].summary().unwrap().to_string();
    assert!(summary.contains("verdict"), "{summary}");
}

#[test]
fn test_replay_one_into_agent_inbox() {
    let (_guard, bus) = setup();
    let msg = Message::task_assignment("wf-1", "t-9", "orchestrator", "agent-a");
    bus.send_to_inbox("agent-a", &msg).unwrap();
    let polled = bus.poll("agent-a", 10).unwrap();
    bus.fail("agent-a", &polled[0], "reviewer unavailable").unwrap();
    assert!(bus.poll("agent-a", 10).unwrap().is_empty());

    assert_eq!(bus.replay(Some("agent-a"), 1).unwrap(), 1);

    let replayed = bus.poll("agent-a", 10).unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].message_id(), msg.message_id());
    assert!(bus.list_dlq().unwrap().is_empty());
}

#[test]
fn test_replay_without_agent_leaves_dlq() {
    let (_guard, bus) = setup();
    let msg = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a");
    bus.fail("agent-a", &msg, "orphaned").unwrap();

    assert_eq!(bus.replay(None, 10).unwrap(), 0);
    assert_eq!(bus.list_dlq().unwrap().len(), 1);
}

#[test]
fn test_crashed_consumer_claim_stays_until_requeue() {
    let (guard, bus) = setup();
    let msg = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a");
    bus.send_to_inbox("agent-a", &msg).unwrap();
    assert_eq!(bus.poll("agent-a", 10).unwrap().len(), 1);
    // Consumer "crashes": the handle goes away without ack or fail.
    drop(bus);

    let restarted = MessageBus::new(guard.path().join("messages"));
    assert!(restarted.poll("agent-a", 10).unwrap().is_empty());
    assert_eq!(restarted.list_claimed("agent-a").unwrap().len(), 1);

    assert_eq!(restarted.requeue_claimed("agent-a").unwrap(), 1);
    let recovered = restarted.poll("agent-a", 10).unwrap();
    assert_eq!(recovered, vec![msg]);
}

#[test]
fn test_bus_from_resolved_config() {
    let temp_dir = TempDir::new().unwrap();
    let repo = temp_dir.path().join("repo");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::write(repo.join(".afb.toml"), "[bus]\nroot = \"state/bus\"\n").unwrap();

    let overrides = ConfigOverrides {
        config_path: Some(repo.join(".afb.toml")),
        ..ConfigOverrides::default()
    };
    let config = resolve_config(&overrides, &repo, temp_dir.path()).unwrap();
    let bus = MessageBus::from_config(&config.bus);

    let msg = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a");
    let path = bus.send_to_inbox("agent-a", &msg).unwrap();
    assert!(path.starts_with(repo.join("state/bus/inbox/agent-a")));
}
