//! Action executor tests against the in-memory page

mod common;

use std::time::Duration;

use serde_json::json;

use common::{Call, MockDriver};
use sightline::browser::{
    ElementOp, KeyboardOp, LoadStateStabilizer, MouseButton, PointerOp, Stabilizer,
};
use sightline::core::{BoundingBox, Point};
use sightline::som::command::PercentPoint;
use sightline::som::{
    ActionExecutor, CommandStatus, ElementDescriptor, ExecutorConfig, MarkerMap, ParentSummary,
    SomAction, SomCommand,
};
use sightline::SightlineError;

fn add_to_cart(parent_classes: &[&str]) -> ElementDescriptor {
    ElementDescriptor {
        som_id: "3".into(),
        tag: "button".into(),
        text: "Add".into(),
        class_tokens: vec!["btn".into()],
        bbox: BoundingBox::new(100.0, 200.0, 80.0, 30.0),
        parent: Some(ParentSummary {
            tag: "div".into(),
            classes: parent_classes.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn executor(page: &MockDriver) -> ActionExecutor<'_> {
    ActionExecutor::new(page, ExecutorConfig::default())
}

#[tokio::test]
async fn test_strict_violation_without_fallbacks_fails_once() {
    let page = MockDriver::new(vec![]);
    let markers = MarkerMap::new(vec![ElementDescriptor {
        som_id: "5".into(),
        tag: "div".into(),
        parent: Some(ParentSummary {
            tag: "section".into(),
            ..Default::default()
        }),
        ..Default::default()
    }]);
    page.set_resolve("5", json!([{ "tag": "div", "classes": [], "text": "" }]));
    page.fail(
        "page.locator('[data-som-id=\"5\"]')",
        "Error: strict mode violation: locator resolved to 2 elements",
    );

    let result = executor(&page)
        .execute(&SomCommand::on_marker(SomAction::Click, "5"), &markers)
        .await
        .unwrap();

    assert_eq!(result.status, CommandStatus::Failure);
    assert_eq!(result.attempts.len(), 1);
    assert!(result.error.unwrap().contains("strict mode violation"));
    assert!(page.calls().iter().all(|c| !matches!(c, Call::Pointer(_))));
}

#[tokio::test]
async fn test_strict_violation_retries_scoped_to_parent() {
    let page = MockDriver::new(vec![]);
    let markers = MarkerMap::new(vec![add_to_cart(&["css-1x2y3z", "product-card"])]);
    page.fail(
        "page.locator('[data-som-id=\"3\"]')",
        "strict mode violation: locator('[data-som-id=\"3\"]') resolved to 2 elements",
    );

    let result = executor(&page)
        .execute(&SomCommand::on_marker(SomAction::Click, "3"), &markers)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.attempts.len(), 2);
    assert!(!result.attempts[0].succeeded());
    assert_eq!(
        result.attempts[1].selector,
        "page.locator('.product-card').locator('[data-som-id=\"3\"]')"
    );
}

#[tokio::test]
async fn test_timeout_scrolls_into_view_and_retries() {
    let page = MockDriver::new(vec![]);
    let markers = MarkerMap::new(vec![add_to_cart(&[])]);
    let raw = "page.locator('[data-som-id=\"3\"]')";
    page.fail(raw, "Timeout 4000ms exceeded");

    let result = executor(&page)
        .execute(&SomCommand::on_marker(SomAction::Click, "3"), &markers)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(
        result.winning().unwrap().selector,
        format!("{} (after scroll-into-view)", raw)
    );
    assert!(page.calls().contains(&Call::Perform {
        selector: raw.to_string(),
        op: ElementOp::ScrollIntoView,
        force: false,
    }));
}

#[tokio::test]
async fn test_duplicate_marker_targets_best_candidate() {
    let page = MockDriver::new(vec![]);
    page.set_resolve(
        "3",
        json!([
            { "tag": "div", "classes": ["toast"], "text": "Saved", "bbox": { "x": 0, "y": 0, "width": 300, "height": 60 } },
            { "tag": "button", "classes": ["btn"], "text": "Add", "bbox": { "x": 100, "y": 200, "width": 80, "height": 30 } }
        ]),
    );
    let markers = MarkerMap::new(vec![add_to_cart(&[])]);

    let result = executor(&page)
        .execute(&SomCommand::on_marker(SomAction::Click, "3"), &markers)
        .await
        .unwrap();

    assert_eq!(
        result.winning().unwrap().selector,
        "page.locator('[data-som-id=\"3\"]').nth(1)"
    );
}

#[tokio::test]
async fn test_marker_on_another_element_uses_synthesized_selectors() {
    let page = MockDriver::new(vec![]);
    page.set_resolve("3", json!([{ "tag": "a", "classes": ["nav-link"], "text": "Orders" }]));
    let markers = MarkerMap::new(vec![add_to_cart(&[])]);

    let result = executor(&page)
        .execute(&SomCommand::on_marker(SomAction::Click, "3"), &markers)
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(!result.winning().unwrap().selector.contains("data-som-id"));
    assert!(page
        .performed_selectors()
        .iter()
        .all(|s| !s.contains("data-som-id")));
}

#[tokio::test]
async fn test_pseudo_rendered_click_is_forced() {
    let page = MockDriver::new(vec![]);
    let mut checkbox = add_to_cart(&[]);
    checkbox.tag = "input".into();
    checkbox.input_type = Some("checkbox".into());
    checkbox.pseudo_rendered = true;
    let markers = MarkerMap::new(vec![checkbox]);
    page.set_resolve("3", json!([{ "tag": "input", "classes": [], "text": "" }]));

    executor(&page)
        .execute(&SomCommand::on_marker(SomAction::Click, "3"), &markers)
        .await
        .unwrap();

    let forced: Vec<bool> = page
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Perform { force, .. } => Some(force),
            _ => None,
        })
        .collect();
    assert_eq!(forced, vec![true]);
}

#[tokio::test]
async fn test_hover_reports_mutations_unless_noisy() {
    let page = MockDriver::new(vec![]);
    let markers = MarkerMap::new(vec![add_to_cart(&[])]);
    let hover = SomCommand::on_marker(SomAction::Hover, "3");

    page.set_mutations(json!([
        { "kind": "added", "target": "div.tooltip", "text": "Adds one item" },
        { "kind": "attributes", "target": "button.btn", "detail": "aria-expanded" }
    ]));
    let result = executor(&page).execute(&hover, &markers).await.unwrap();
    let mutations = result.mutations.unwrap();
    assert_eq!(mutations.len(), 2);
    assert_eq!(mutations[0].text.as_deref(), Some("Adds one item"));
    assert!(page.calls().contains(&Call::Evaluate("observe")));

    let noise: Vec<_> = (0..11)
        .map(|i| json!({ "kind": "added", "target": format!("li.row-{}", i) }))
        .collect();
    page.set_mutations(json!(noise));
    let result = executor(&page).execute(&hover, &markers).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.mutations, None);
}

#[tokio::test]
async fn test_click_mutations_are_not_collected() {
    let page = MockDriver::new(vec![]);
    let markers = MarkerMap::new(vec![add_to_cart(&[])]);
    let result = executor(&page)
        .execute(&SomCommand::on_marker(SomAction::Click, "3"), &markers)
        .await
        .unwrap();
    assert_eq!(result.mutations, None);
    assert!(!page.calls().contains(&Call::Evaluate("collect")));
}

#[tokio::test]
async fn test_navigate_records_goto() {
    let page = MockDriver::new(vec![]);
    let command = SomCommand::new(SomAction::Navigate).with_value("https://shop.example/cart");

    let result = executor(&page)
        .execute(&command, &MarkerMap::default())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(
        result.attempts[0].selector,
        "page.goto('https://shop.example/cart')"
    );
    assert_eq!(
        page.dom_actions(),
        vec![Call::Navigate("page.goto('https://shop.example/cart')".into())]
    );
}

#[tokio::test]
async fn test_coordinates_are_percentages_of_the_viewport() {
    let page = MockDriver::new(vec![]);
    let mut command = SomCommand::new(SomAction::Click);
    command.coordinates = Some(PercentPoint { x: 50.0, y: 25.0 });

    let result = executor(&page)
        .execute(&command, &MarkerMap::default())
        .await
        .unwrap();

    assert_eq!(result.attempts[0].selector, "coordinates(640, 180)");
    assert_eq!(
        page.dom_actions(),
        vec![Call::Pointer(PointerOp::Click {
            at: Point::new(640.0, 180.0),
            button: MouseButton::Left,
            click_count: 1,
        })]
    );
}

#[tokio::test]
async fn test_untargeted_press_goes_to_keyboard() {
    let page = MockDriver::new(vec![]);
    let command = SomCommand::new(SomAction::Press).with_value("Enter");

    let result = executor(&page)
        .execute(&command, &MarkerMap::default())
        .await
        .unwrap();

    assert_eq!(result.attempts[0].selector, "page.keyboard.press('Enter')");
    assert_eq!(
        page.dom_actions(),
        vec![Call::Keyboard(KeyboardOp::Press("Enter".into()))]
    );
}

#[tokio::test]
async fn test_unknown_marker_is_stale() {
    let page = MockDriver::new(vec![]);
    let err = executor(&page)
        .execute(
            &SomCommand::on_marker(SomAction::Click, "42"),
            &MarkerMap::new(vec![add_to_cart(&[])]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SightlineError::StaleTarget { .. }));
    assert!(page.dom_actions().is_empty());
}

#[tokio::test]
async fn test_navigation_during_action_propagates() {
    let page = MockDriver::new(vec![]);
    page.fail(
        "page.locator('[data-som-id=\"3\"]')",
        "Execution context was destroyed, most likely because of a navigation",
    );
    let err = executor(&page)
        .execute(
            &SomCommand::on_marker(SomAction::Click, "3"),
            &MarkerMap::new(vec![add_to_cart(&[])]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SightlineError::NavigationInterrupted(_)));
    assert!(err.is_round_recoverable());
}

#[test]
fn test_load_state_stabilizer_waits_for_load() {
    let page = MockDriver::new(vec![]);
    let stabilizer = LoadStateStabilizer {
        load_timeout: Duration::from_secs(1),
        settle: Duration::ZERO,
    };
    tokio_test::block_on(stabilizer.wait_until_stable(&page));
    assert_eq!(page.calls(), vec![Call::WaitForLoad]);
}

#[tokio::test]
async fn test_navigation_during_pause_propagates() {
    let page = MockDriver::new(vec![]);
    let mut pause = SomCommand::new(SomAction::WaitFor);
    pause.duration = Some(250);

    let result = executor(&page)
        .execute(&pause, &MarkerMap::default())
        .await
        .unwrap();
    assert_eq!(result.attempts[0].selector, "page.waitForTimeout(250)");

    page.fail_load("Execution context was destroyed, most likely because of a navigation");
    let err = executor(&page)
        .execute(&pause, &MarkerMap::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SightlineError::NavigationInterrupted(_)));
}
