use crate::common::{quiet_config, Harness, TIMEOUT};
use script_runner::{ControlRequest, RunEvent, RunOutcome, ScriptState};
use serde_json::json;

/// Wait for a prompt other than `seen` and return its id.
fn next_prompt(h: &Harness, seen: Option<&str>) -> String {
    let found = h.sink.wait_for(TIMEOUT, |event| {
        matches!(event, RunEvent::Script { prompt_id, .. } if Some(prompt_id.as_str()) != seen)
    });
    assert!(found, "no prompt published");
    h.sink
        .events()
        .into_iter()
        .rev()
        .find_map(|event| match event {
            RunEvent::Script { prompt_id, .. } if Some(prompt_id.as_str()) != seen => {
                Some(prompt_id)
            }
            _ => None,
        })
        .unwrap()
}

#[test]
fn test_ask_answer_is_numeric() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "let value = ask(\"How many?\");\nprint(value + 1);\n");

    let id = next_prompt(&h, None);
    assert_eq!(run.prompt_id().as_deref(), Some(id.as_str()));
    run.answer(&id, json!("41"));

    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": 42"));
    let messages = h.engine_messages();
    assert!(messages.iter().any(|line| line.ends_with("ask(How many?)")));
    assert!(messages.iter().any(|line| line.ends_with("User input: 41")));
    assert!(h
        .sink
        .events()
        .contains(&RunEvent::PromptComplete { prompt_id: id }));
}

#[test]
fn test_cancel_pauses_and_asks_again() {
    let h = Harness::new(quiet_config());
    let run = h.start(
        "main.rhai",
        "let name = ask_string(\"Name?\");\nprint(\"hello \" + name);\n",
    );

    let first = next_prompt(&h, None);
    run.answer(&first, json!("Cancel"));
    assert!(h.wait_for_state(ScriptState::Paused));
    run.go();

    let second = next_prompt(&h, Some(&first));
    assert_ne!(first, second);
    run.answer(&second, json!("Ada"));

    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": hello Ada"));
}

#[test]
fn test_stale_answers_are_ignored() {
    let h = Harness::new(quiet_config());
    let run = h.start("main.rhai", "let ok = prompt(\"Proceed?\");\nprint(ok);\n");

    let id = next_prompt(&h, None);
    run.answer("not-the-prompt", json!("true"));
    assert!(h.engine_messages().iter().any(|line| line
        .ends_with(&format!("INFO: Received answer for prompt not-the-prompt when looking for {}.", id))));
    assert!(run.is_running());

    h.runner
        .dispatch(
            &run,
            ControlRequest::Answer {
                prompt_id: id,
                answer: json!("true"),
            },
        )
        .unwrap();
    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": true"));
}

#[test]
fn test_answer_without_prompt_is_reported() {
    let h = Harness::new(quiet_config());
    let run = h.runner.open_text(script_runner::RunSpec::new("main.rhai"), "1").unwrap();
    run.answer("p-1", json!("x"));
    assert!(h
        .engine_messages()
        .iter()
        .any(|line| line.ends_with("INFO: Unexpectedly received answer for unknown prompt p-1.")));
}

#[test]
fn test_trailing_map_is_sent_as_keyword_arguments() {
    let h = Harness::new(quiet_config());
    let run = h.start(
        "main.rhai",
        "let pick = combo_box(\"Pick one\", \"a\", #{ informative: \"details\" });\nprint(pick);\n",
    );

    let id = next_prompt(&h, None);
    let event = h
        .sink
        .events()
        .into_iter()
        .find(|event| matches!(event, RunEvent::Script { .. }))
        .unwrap();
    match event {
        RunEvent::Script {
            method,
            args,
            kwargs,
            ..
        } => {
            assert_eq!(method, "combo_box");
            assert_eq!(args, vec![json!("Pick one"), json!("a")]);
            assert_eq!(kwargs.get("informative"), Some(&json!("details")));
        }
        _ => unreachable!(),
    }

    run.answer(&id, json!("a"));
    assert_eq!(run.join(), RunOutcome::Completed);
    assert!(h.script_output()[0].ends_with(": a"));
}
