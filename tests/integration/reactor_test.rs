//! Reactor running real commands through the full pipeline.

use std::path::Path;

use reactobus::Context;

use crate::common::{envelope, eventually, start};

fn config(dir: &Path) -> String {
    let jobs = dir.join("jobs.log");
    let bob = dir.join("bob.log");
    let never = dir.join("never.log");
    format!(
        r#"
inputs:
  - {{ class: Pull, name: producers, options: {{ url: inproc://producers }} }}
reactor:
  workers: 2
  rules:
    - name: jobs
      match: {{ field: topic, patterns: ['^org\.reactobus\.job'] }}
      exec:
        path: /bin/sh
        timeout: 5
        args: ["-c", 'echo "$0 $(cat)" >> {jobs}', "$username", "stdin:$data"]
    - name: bob
      match: {{ field: username, pattern: '^bob$' }}
      exec:
        path: /bin/sh
        timeout: 5
        args: ["-c", 'echo "$0" >> {bob}', "$topic"]
    - name: missing
      match: {{ field: topic, patterns: ['^org\.reactobus\.job'] }}
      exec:
        path: /bin/sh
        timeout: 5
        args: ["-c", 'echo "$0" >> {never}', "$data.missing"]
"#,
        jobs = jobs.display(),
        bob = bob.display(),
        never = never.display(),
    )
}

fn sorted_lines(path: &Path) -> Vec<String> {
    let mut lines: Vec<String> = std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

#[tokio::test]
async fn test_reactor_runs_matching_rules() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::new();
    let running = start(&config(dir.path()), &ctx).await;

    let producer = ctx.connect_push("inproc://producers").await.unwrap();
    producer
        .send(envelope("org.reactobus.job.1", "alice", r#"{"id": 1}"#))
        .await
        .unwrap();
    producer
        .send(envelope("org.reactobus.job.2", "bob", r#"{"id": 2}"#))
        .await
        .unwrap();
    producer
        .send(envelope("org.reactobus.other", "bob", r#"{"id": 3}"#))
        .await
        .unwrap();
    // Invalid JSON never reaches a rule.
    producer
        .send(envelope("org.reactobus.job.4", "bob", "{"))
        .await
        .unwrap();

    let jobs = dir.path().join("jobs.log");
    let bob = dir.path().join("bob.log");
    eventually(|| {
        let done = sorted_lines(&jobs).len() == 2 && sorted_lines(&bob).len() == 2;
        async move { done }
    })
    .await;

    running.stop().await;

    assert_eq!(
        sorted_lines(&jobs),
        vec![r#"alice {"id": 1}"#, r#"bob {"id": 2}"#]
    );
    assert_eq!(
        sorted_lines(&bob),
        vec!["org.reactobus.job.2", "org.reactobus.other"]
    );
    assert!(!dir.path().join("never.log").exists());
}
