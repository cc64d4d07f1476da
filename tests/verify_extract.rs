//! verify(), extract() and element checks

mod common;

use std::time::Duration;

use serde_json::json;

use common::{agent, test_config, Call, MockDriver, ScriptedProvider};
use sightline::agent::{
    ExtractOptions, Extracted, RecordingHost, ReturnType, TestContext, VerifyOptions,
};
use sightline::browser::StateQuery;
use sightline::som::{MarkerMap, VerificationExecutor, VerificationRequest, VerificationType};
use sightline::SightlineError;

#[tokio::test]
async fn test_low_confidence_fails_both_assertions() {
    let page = MockDriver::with_buttons(&["Checkout"]);
    let host = RecordingHost::new();
    let oracle = ScriptedProvider::new(vec![json!({
        "verificationSuccess": false,
        "confidence": 40,
        "reason": "cart badge shows 1"
    })]);
    let agent = agent(oracle, test_config());

    let result = agent
        .verify(
            "cart shows 2 items",
            &TestContext::new(&page, &host),
            VerifyOptions::default(),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.confidence, 40);
    let failures = host.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].message.contains("40"));
    assert!(failures[0].message.contains("70"));
    assert!(failures[1].message.contains("cart shows 2 items"));
    assert!(failures[1].message.ends_with(": cart badge shows 1"));
    assert!(page.calls().contains(&Call::Screenshot { full_page: true }));
}

#[tokio::test]
async fn test_confident_pass_records_passing_assertions() {
    let page = MockDriver::with_buttons(&["Checkout"]);
    let host = RecordingHost::new();
    let oracle = ScriptedProvider::new(vec![json!({
        "verificationSuccess": true,
        "confidence": 92
    })]);
    let agent = agent(oracle, test_config());

    let result = agent
        .verify(
            "checkout button is shown",
            &TestContext::new(&page, &host),
            VerifyOptions::default(),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(host.assertions().len(), 2);
    assert!(host.failures().is_empty());
}

#[tokio::test]
async fn test_threshold_override() {
    let page = MockDriver::with_buttons(&["Checkout"]);
    let host = RecordingHost::new();
    let oracle = ScriptedProvider::new(vec![json!({
        "verificationSuccess": true,
        "confidence": 75
    })]);
    let agent = agent(oracle, test_config());

    let result = agent
        .verify(
            "checkout button is shown",
            &TestContext::new(&page, &host),
            VerifyOptions {
                threshold: Some(90),
            },
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(host.failures().len(), 1);
    assert!(host.failures()[0].message.contains("below threshold 90"));
}

#[tokio::test]
async fn test_verify_needs_a_host() {
    let page = MockDriver::with_buttons(&["Checkout"]);
    let oracle = ScriptedProvider::new(vec![]);
    let agent = agent(oracle.clone(), test_config());

    let err = agent
        .verify(
            "anything",
            &TestContext::page_only(&page),
            VerifyOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SightlineError::MissingContext(_)));
    assert!(oracle.prompts().is_empty());
}

#[tokio::test]
async fn test_extract_int_array() {
    let page = MockDriver::with_buttons(&["Checkout"]);
    let host = RecordingHost::new();
    let oracle = ScriptedProvider::new(vec![json!({ "extractedContentList": ["12", "7"] })]);
    let agent = agent(oracle, test_config());

    let extracted = agent
        .extract(
            "quantities in the cart",
            &TestContext::new(&page, &host),
            ExtractOptions {
                return_type: ReturnType::IntArray,
            },
        )
        .await
        .unwrap();

    assert_eq!(extracted, Extracted::IntList(vec![12, 7]));
}

#[tokio::test]
async fn test_extract_rejects_non_numeric_entries() {
    let page = MockDriver::with_buttons(&["Checkout"]);
    let host = RecordingHost::new();
    let oracle = ScriptedProvider::new(vec![json!({ "extractedContentList": ["12", "abc"] })]);
    let agent = agent(oracle, test_config());

    let err = agent
        .extract(
            "quantities in the cart",
            &TestContext::new(&page, &host),
            ExtractOptions {
                return_type: ReturnType::IntArray,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SightlineError::Coercion(ref m) if m.contains("abc")));
}

#[tokio::test]
async fn test_extract_single_string() {
    let page = MockDriver::with_buttons(&["Checkout"]);
    let oracle = ScriptedProvider::new(vec![json!({ "extractedContent": "Order #1042" })]);
    let agent = agent(oracle.clone(), test_config());

    let extracted = agent
        .extract(
            "the order number",
            &TestContext::page_only(&page),
            ExtractOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(extracted, Extracted::Text("Order #1042".into()));
    assert!(oracle.prompts()[0].contains("the order number"));
}

#[tokio::test]
async fn test_check_element_reports_to_host() {
    let page = MockDriver::with_buttons(&["Saved"]);
    page.set_state(
        "page.locator('[data-som-id=\"1\"]').nth(0)",
        &StateQuery::Text,
        json!("  Changes   Saved "),
    );
    let host = RecordingHost::new();
    let agent = agent(ScriptedProvider::new(vec![]), test_config());
    let request =
        VerificationRequest::on_marker(VerificationType::TextContains, "1").expecting("Saved");

    let outcome = agent
        .check_element(&request, &TestContext::new(&page, &host))
        .await
        .unwrap();

    assert!(outcome.passed);
    assert_eq!(outcome.actual.as_deref(), Some("Changes Saved"));
    assert_eq!(
        outcome.expression,
        "await expect(page.locator('[data-som-id=\"1\"]').nth(0)).toContainText('Saved')"
    );
    let assertions = host.assertions();
    assert_eq!(assertions.len(), 1);
    assert!(assertions[0].passed);
}

#[tokio::test]
async fn test_failed_check_reports_what_it_saw() {
    let page = MockDriver::new(vec![]);
    page.set_count("page.locator('li.cart-row')", 1);
    let request = VerificationRequest {
        kind: VerificationType::CountEquals,
        element_ref: None,
        selector: Some("li.cart-row".into()),
        expected: Some("2".into()),
        attribute: None,
    };

    let outcome = VerificationExecutor::new(&page)
        .with_timeout(Duration::from_millis(250))
        .verify(&request, &MarkerMap::default())
        .await
        .unwrap();

    assert!(!outcome.passed);
    assert_eq!(outcome.actual.as_deref(), Some("1"));
    assert!(outcome.message.unwrap().contains("observed '1'"));
    assert_eq!(
        outcome.expression,
        "await expect(page.locator('li.cart-row')).toHaveCount(2)"
    );
}
