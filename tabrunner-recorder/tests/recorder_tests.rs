use tabrunner::{Action, Command, Document, ElementHandle, Locator, SelectorEngine};
use tabrunner_recorder::{
    InteractionEvent, MacroRecorder, RecorderConfig, RecorderError, TimedEvent, SUBMIT_DESCRIPTION,
};

const PAGE: &str = r#"<html><body>
<form id="search">
  <input name="q">
  <button type="button">Reset</button>
  <button type="submit" id="go">Search</button>
</form>
<form id="newsletter"><input name="email"></form>
<button id="menu">Menu</button>
<p>Footer</p>
</body></html>"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn by_css(doc: &Document, css: &str) -> ElementHandle {
    SelectorEngine::default()
        .resolve(doc, &Locator::css(css))
        .unwrap()
        .unwrap()
}

fn click(at_ms: u64, target: ElementHandle) -> TimedEvent {
    TimedEvent::new(at_ms, InteractionEvent::Click { target })
}

fn actions(commands: &[Command]) -> Vec<Action> {
    commands.iter().map(|c| c.action.clone()).collect()
}

fn recording() -> MacroRecorder {
    init_tracing();
    let mut recorder = MacroRecorder::default();
    recorder.start();
    recorder
}

#[test]
fn clicks_apart_in_time_get_a_wait_between_them() {
    let doc = Document::parse(PAGE);
    let menu = by_css(&doc, "#menu");
    let mut recorder = recording();

    recorder.record_event(&doc, &click(1_000, menu)).unwrap();
    assert_eq!(recorder.record_event(&doc, &click(1_250, menu)).unwrap(), 2);

    let commands = recorder.stop();
    assert_eq!(
        actions(&commands),
        vec![Action::Click, Action::Wait, Action::Click]
    );
    assert_eq!(commands[1].params.duration, Some(250));
    assert_eq!(commands[0].locator(), Some(Locator::css("#menu")));
}

#[test]
fn first_action_of_a_session_has_no_leading_wait() {
    let doc = Document::parse(PAGE);
    let menu = by_css(&doc, "#menu");
    let mut recorder = recording();

    assert_eq!(recorder.record_event(&doc, &click(60_000, menu)).unwrap(), 1);
    assert_eq!(actions(&recorder.stop()), vec![Action::Click]);

    recorder.start();
    recorder.record_event(&doc, &click(90_000, menu)).unwrap();
    assert_eq!(actions(&recorder.stop()), vec![Action::Click]);
}

#[test]
fn quick_successive_actions_get_no_wait() {
    let doc = Document::parse(PAGE);
    let menu = by_css(&doc, "#menu");
    let mut recorder = recording();

    recorder.record_event(&doc, &click(0, menu)).unwrap();
    recorder.record_event(&doc, &click(80, menu)).unwrap();
    assert_eq!(
        actions(&recorder.stop()),
        vec![Action::Click, Action::Click]
    );
}

#[test]
fn wait_threshold_is_configurable() {
    let doc = Document::parse(PAGE);
    let menu = by_css(&doc, "#menu");
    let mut recorder = MacroRecorder::new(RecorderConfig {
        wait_threshold_ms: 1000,
        ..Default::default()
    });
    recorder.start();

    recorder.record_event(&doc, &click(0, menu)).unwrap();
    recorder.record_event(&doc, &click(900, menu)).unwrap();
    recorder.record_event(&doc, &click(2_500, menu)).unwrap();
    assert_eq!(
        actions(&recorder.stop()),
        vec![Action::Click, Action::Click, Action::Wait, Action::Click]
    );
}

#[test]
fn changes_become_type_commands_with_the_committed_value() {
    let doc = Document::parse(PAGE);
    let q = by_css(&doc, "input[name=q]");
    let mut recorder = recording();

    recorder
        .record_event(
            &doc,
            &TimedEvent::new(
                0,
                InteractionEvent::Change {
                    target: q,
                    value: "rust async".into(),
                },
            ),
        )
        .unwrap();

    let typed = &recorder.commands()[0];
    assert_eq!(typed.action, Action::Type);
    assert_eq!(typed.params.text.as_deref(), Some("rust async"));
    assert_eq!(typed.locator(), Some(Locator::css("input[name=\"q\"]")));
}

#[test]
fn scrolls_are_debounced_to_the_final_position() {
    let doc = Document::parse(PAGE);
    let mut recorder = recording();

    for (at, y) in [(0, 100.0), (100, 300.0), (200, 650.0)] {
        let scroll = TimedEvent::new(at, InteractionEvent::Scroll { x: 0.0, y });
        assert_eq!(recorder.record_event(&doc, &scroll).unwrap(), 0);
    }
    assert_eq!(recorder.scroll_deadline(), Some(700));
    assert!(!recorder.poll(600));
    assert!(recorder.commands().is_empty());

    assert!(recorder.poll(700));
    let commands = recorder.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].action, Action::Scroll);
    assert_eq!(commands[0].params.y, Some(650.0));
    assert_eq!(recorder.scroll_deadline(), None);
}

#[test]
fn stop_flushes_a_pending_scroll() {
    let doc = Document::parse(PAGE);
    let mut recorder = recording();
    recorder
        .record_event(
            &doc,
            &TimedEvent::new(10, InteractionEvent::Scroll { x: 0.0, y: 420.0 }),
        )
        .unwrap();

    let commands = recorder.stop();
    assert_eq!(actions(&commands), vec![Action::Scroll]);
    assert_eq!(commands[0].params.y, Some(420.0));
}

#[test]
fn pending_scroll_is_recorded_before_the_next_action() {
    let doc = Document::parse(PAGE);
    let menu = by_css(&doc, "#menu");
    let mut recorder = recording();

    recorder
        .record_event(
            &doc,
            &TimedEvent::new(0, InteractionEvent::Scroll { x: 0.0, y: 900.0 }),
        )
        .unwrap();
    recorder.record_event(&doc, &click(50, menu)).unwrap();
    assert_eq!(
        actions(recorder.commands()),
        vec![Action::Scroll, Action::Click]
    );
}

#[test]
fn enter_in_a_form_clicks_its_submit_control() {
    let doc = Document::parse(PAGE);
    let q = by_css(&doc, "input[name=q]");
    let mut recorder = recording();

    recorder
        .record_event(
            &doc,
            &TimedEvent::new(
                0,
                InteractionEvent::KeyPress {
                    target: q,
                    key: "Enter".into(),
                },
            ),
        )
        .unwrap();

    let submit = &recorder.commands()[0];
    assert_eq!(submit.action, Action::Click);
    assert_eq!(submit.locator(), Some(Locator::css("#go")));
    assert_eq!(submit.description.as_deref(), Some(SUBMIT_DESCRIPTION));
}

#[test]
fn enter_without_submit_control_presses_the_key() {
    let doc = Document::parse(PAGE);
    let email = by_css(&doc, "input[name=email]");
    let mut recorder = recording();

    let enter = |at_ms| {
        TimedEvent::new(
            at_ms,
            InteractionEvent::KeyPress {
                target: email,
                key: "Enter".into(),
            },
        )
    };
    recorder.record_event(&doc, &enter(0)).unwrap();
    let other_key = TimedEvent::new(
        10,
        InteractionEvent::KeyPress {
            target: email,
            key: "a".into(),
        },
    );
    assert_eq!(recorder.record_event(&doc, &other_key).unwrap(), 0);

    let commands = recorder.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].action, Action::PressKey);
    assert_eq!(commands[0].params.key.as_deref(), Some("Enter"));
    assert_eq!(
        commands[0].locator(),
        Some(Locator::css("input[name=\"email\"]"))
    );
}

#[test]
fn events_outside_a_session_are_rejected() {
    let doc = Document::parse(PAGE);
    let menu = by_css(&doc, "#menu");
    let mut recorder = MacroRecorder::default();

    assert_eq!(
        recorder.record_event(&doc, &click(0, menu)),
        Err(RecorderError::NotRecording)
    );

    recorder.start();
    recorder.record_event(&doc, &click(0, menu)).unwrap();
    recorder.stop();
    assert_eq!(
        recorder.record_command(Command::new(Action::Click), 10),
        Err(RecorderError::NotRecording)
    );
    assert_eq!(recorder.commands().len(), 1);

    recorder.start();
    assert!(recorder.commands().is_empty());
}

#[test]
fn stale_handles_surface_as_errors() {
    let doc = Document::parse(PAGE);
    let mut recorder = recording();
    let err = recorder
        .record_event(&doc, &click(0, ElementHandle(10_000)))
        .unwrap_err();
    assert_eq!(err.code(), "ELEMENT_NOT_FOUND");
    assert!(recorder.commands().is_empty());
}
