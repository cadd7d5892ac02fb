//! End-to-end session tests driven by scripted model replies.
//!
//! Every test builds an [`Rlm`] over a [`ScriptedModel`], so the full loop
//! (prompting, parsing, execution, delegation) runs without a model service.

use std::rc::Rc;

use rlm::Rlm;
use rlm::core::types::{DEPTH_EXHAUSTED, ITERATIONS_EXHAUSTED, Role, SessionOutcome};
use rlm::io::config::SessionConfig;
use rlm::test_support::ScriptedModel;

fn config(max_depth: u32, max_iterations: u32) -> SessionConfig {
    SessionConfig {
        root_model: "root-model".to_string(),
        sub_model: "sub-model".to_string(),
        max_depth,
        max_iterations,
        ..SessionConfig::default()
    }
}

fn snippet(body: &str) -> String {
    format!("Let me look.\n```repl\n{body}\n```\n")
}

#[test]
fn capital_question_is_answered_from_context() {
    let model = Rc::new(ScriptedModel::new([
        snippet("print(grep(context, \"capital\")[0]);"),
        "The context says Paris.\nFINAL(Paris)".to_string(),
    ]));
    let rlm = Rlm::new(model.clone(), config(1, 10));
    let record = rlm
        .completion(
            "What is the capital of France?",
            "The capital of France is Paris.",
        )
        .expect("completion");

    assert!(record.outcome.text().to_lowercase().contains("paris"));
    assert!(record.model_calls <= 2);
    assert_eq!(
        record.history[3].content,
        "REPL executed. Output:\n1:The capital of France is Paris.\n"
    );
}

#[test]
fn slice_binding_is_available_next_turn() {
    let context: String = "0123456789".repeat(30);
    let model = Rc::new(ScriptedModel::new([
        snippet("let chunk = slice(context, 0, 100);\nprint(chunk);"),
        "FINAL_VAR(chunk)".to_string(),
    ]));
    let rlm = Rlm::new(model.clone(), config(1, 10));
    let record = rlm.completion("First 100 chars?", &context).expect("completion");

    assert_eq!(record.outcome, SessionOutcome::answered(&context[..100]));
    let second = &model.requests()[1];
    assert_eq!(second.messages.len(), 4);
    assert_eq!(
        second.messages[3].content,
        format!("REPL executed. Output:\n{}\n", &context[..100])
    );
}

#[test]
fn marker_is_found_in_large_context() {
    let marker = "SECRET_MARKER_7F3A";
    let mut context: String = "lorem ipsum dolor sit amet "
        .chars()
        .cycle()
        .take(300_000)
        .collect();
    context.insert_str(80_000, marker);

    let model = Rc::new(ScriptedModel::new([
        snippet("let hits = find_all(context, \"SECRET_[A-Z0-9_]+\");\nlet answer = hits[0];\nprint(answer);"),
        "FINAL_VAR(answer)".to_string(),
    ]));
    let rlm = Rlm::new(model.clone(), config(1, 10));
    let record = rlm.completion("Find the marker", &context).expect("completion");

    assert!(record.outcome.text().contains(marker));
    assert!(record.model_calls <= 10);
    for request in model.requests() {
        let prompt_bytes: usize = request.messages.iter().map(|turn| turn.content.len()).sum();
        assert!(prompt_bytes < 20_000, "context leaked into prompt");
    }
    assert!(record.history[1].content.contains("300018 characters"));
}

#[test]
fn missing_variable_is_an_answer_not_a_failure() {
    let model = Rc::new(ScriptedModel::new(["FINAL_VAR(answer)"]));
    let rlm = Rlm::new(model, config(1, 10));
    let record = rlm.completion("q", "ctx").expect("completion");
    assert_eq!(record.outcome, SessionOutcome::answered("No variable found"));
}

#[test]
fn snippet_runs_before_final_answer_in_same_reply() {
    let model = Rc::new(ScriptedModel::new([format!(
        "{}FINAL_VAR(answer)",
        snippet("let answer = 6 * 7;")
    )]));
    let rlm = Rlm::new(model.clone(), config(1, 10));
    let record = rlm.completion("q", "ctx").expect("completion");

    assert_eq!(record.outcome, SessionOutcome::answered("42"));
    assert_eq!(model.calls(), 1);
    assert_eq!(record.history.len(), 4);
}

#[test]
fn snippet_failure_is_fed_back() {
    let model = Rc::new(ScriptedModel::new([
        snippet("print(\"partial\");\nlet x = nope + 1;"),
        "FINAL(recovered)".to_string(),
    ]));
    let rlm = Rlm::new(model.clone(), config(1, 10));
    let record = rlm.completion("q", "ctx").expect("completion");

    assert_eq!(record.outcome, SessionOutcome::answered("recovered"));
    let feedback = &record.history[3];
    assert_eq!(feedback.role, Role::User);
    assert!(
        feedback
            .content
            .starts_with("REPL executed. Output:\nREPL Error: ")
    );
    assert!(!feedback.content.contains("partial"));
}

#[test]
fn iteration_cap_bounds_model_calls() {
    let model = Rc::new(ScriptedModel::new([
        "thinking",
        "still thinking",
        "almost there",
        "FINAL(too late)",
    ]));
    let rlm = Rlm::new(model.clone(), config(1, 3));
    let record = rlm.completion("q", "ctx").expect("completion");

    assert_eq!(record.outcome, SessionOutcome::IterationsExhausted);
    assert_eq!(record.outcome.text(), ITERATIONS_EXHAUSTED);
    assert_eq!(model.calls(), 3);
    assert_eq!(model.remaining(), 1);
}

#[test]
fn delegation_uses_sub_model_and_records_child() {
    let model = Rc::new(ScriptedModel::new([
        snippet("let sub = llm_query(\"what is here?\", slice(context, 0, 5));\nprint(sub);"),
        "FINAL(child says hi)".to_string(),
        "FINAL_VAR(sub)".to_string(),
    ]));
    let rlm = Rlm::new(model.clone(), config(1, 10));
    let record = rlm.completion("q", "abcdefghij").expect("completion");

    assert_eq!(record.outcome, SessionOutcome::answered("child says hi"));
    let models: Vec<String> = model.requests().into_iter().map(|r| r.model).collect();
    assert_eq!(models, vec!["root-model", "sub-model", "root-model"]);

    assert_eq!(record.children.len(), 1);
    let child = &record.children[0];
    assert_eq!(child.depth, 1);
    assert_eq!(child.model, "sub-model");
    assert_eq!(child.query, "what is here?");
    assert_eq!(child.context_chars, 5);
    assert_eq!(record.total_model_calls(), 3);
    assert_eq!(record.max_depth_reached(), 1);
}

#[test]
fn child_without_context_sees_parent_context() {
    let model = Rc::new(ScriptedModel::new([
        snippet("let sub = llm_query(\"echo\");"),
        "FINAL_VAR(context)".to_string(),
        "FINAL_VAR(sub)".to_string(),
    ]));
    let rlm = Rlm::new(model, config(1, 10));
    let record = rlm.completion("q", "parent text").expect("completion");
    assert_eq!(record.outcome, SessionOutcome::answered("parent text"));
}

#[test]
fn child_does_not_see_parent_bindings() {
    let model = Rc::new(ScriptedModel::new([
        snippet("let secret = \"root only\";\nlet sub = llm_query(\"peek\");"),
        "FINAL_VAR(secret)".to_string(),
        "FINAL_VAR(sub)".to_string(),
    ]));
    let rlm = Rlm::new(model, config(1, 10));
    let record = rlm.completion("q", "ctx").expect("completion");
    assert_eq!(record.outcome, SessionOutcome::answered("No variable found"));
}

#[test]
fn delegation_past_depth_cap_returns_sentinel_without_model_call() {
    let model = Rc::new(ScriptedModel::new([
        snippet("let sub = llm_query(\"deeper\");\nprint(sub);"),
        "FINAL_VAR(sub)".to_string(),
    ]));
    let rlm = Rlm::new(model.clone(), config(0, 10));
    let record = rlm.completion("q", "ctx").expect("completion");

    assert_eq!(record.outcome, SessionOutcome::answered(DEPTH_EXHAUSTED));
    assert_eq!(model.calls(), 2);
    let child = &record.children[0];
    assert_eq!(child.outcome, SessionOutcome::DepthExhausted);
    assert_eq!(child.model_calls, 0);
}

#[test]
fn session_entered_past_depth_cap_makes_no_calls() {
    let model = Rc::new(ScriptedModel::new(["FINAL(unused)"]));
    let rlm = Rlm::new(model.clone(), config(2, 10));
    let record = rlm.completion_at("q", "ctx", 3).expect("completion");

    assert_eq!(record.outcome.text(), DEPTH_EXHAUSTED);
    assert_eq!(model.calls(), 0);
}

#[test]
fn child_transport_failure_fails_the_whole_tree() {
    let model = Rc::new(ScriptedModel::new([snippet(
        "let r = \"\";\ntry { r = llm_query(\"q\"); } catch (e) { r = \"caught\"; }\nprint(r);",
    )]));
    let rlm = Rlm::new(model.clone(), config(1, 10));
    let err = rlm.completion("q", "ctx").unwrap_err();

    assert!(format!("{err:#}").contains("scripted model has no reply left"));
    assert_eq!(model.calls(), 2);
}
