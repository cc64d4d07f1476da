//! Element verification
//!
//! Checks a single element property (text, value, visibility, state, count,
//! class or attribute) through the first selector that is attached to the
//! page, polling until the check passes or a short timeout runs out. The
//! outcome always carries the equivalent assertion expression so a generated
//! script can replay it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::browser::{DriverResult, PageDriver, StateQuery};
use crate::core::{Result, SightlineError};
use crate::som::descriptor::MarkerMap;
use crate::som::selector::{escape_quoted, synthesize, TypedSelector};

pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationType {
    TextContains,
    TextEquals,
    ValueEquals,
    ValueEmpty,
    Visible,
    Hidden,
    Enabled,
    Disabled,
    Checked,
    Unchecked,
    CountEquals,
    CountGreaterThan,
    CountLessThan,
    HasClass,
    HasAttribute,
}

impl VerificationType {
    /// Count checks look at every match; everything else at the first
    pub fn is_count(&self) -> bool {
        matches!(
            self,
            Self::CountEquals | Self::CountGreaterThan | Self::CountLessThan
        )
    }

    fn needs_expected(&self) -> bool {
        matches!(
            self,
            Self::TextContains | Self::TextEquals | Self::ValueEquals | Self::HasClass
        ) || self.is_count()
    }
}

/// What to check and on which element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    #[serde(rename = "type")]
    pub kind: VerificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_ref: Option<String>,
    /// Plain CSS, for checks on elements that carry no marker (counts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Attribute name for `hasAttribute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl VerificationRequest {
    pub fn on_marker(kind: VerificationType, som_id: impl Into<String>) -> Self {
        Self {
            kind,
            element_ref: Some(som_id.into()),
            selector: None,
            expected: None,
            attribute: None,
        }
    }

    pub fn expecting(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.element_ref.is_none() && self.selector.is_none() {
            return Err(SightlineError::protocol(
                "verification needs a marker or a selector",
            ));
        }
        if self.kind.needs_expected() && self.expected.is_none() {
            return Err(SightlineError::protocol(format!(
                "{:?} verification needs an expected value",
                self.kind
            )));
        }
        if self.kind == VerificationType::HasAttribute && self.attribute.is_none() {
            return Err(SightlineError::protocol(
                "hasAttribute verification needs an attribute name",
            ));
        }
        if self.kind.is_count() {
            self.expected_count()?;
        }
        Ok(())
    }

    fn expected_count(&self) -> Result<usize> {
        let raw = self.expected.as_deref().unwrap_or_default().trim();
        raw.parse().map_err(|_| {
            SightlineError::protocol(format!("expected count '{}' is not a number", raw))
        })
    }
}

/// Result of one verification, passing or not
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    /// Assertion expression equivalent to the check
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Assertion expression for a check on `locator`
pub fn assertion_expression(request: &VerificationRequest, locator: &TypedSelector) -> String {
    let expected = escape_quoted(request.expected.as_deref().unwrap_or_default());
    if request.kind.is_count() {
        return match request.kind {
            VerificationType::CountEquals => {
                format!("await expect({}).toHaveCount({})", locator, expected)
            }
            VerificationType::CountGreaterThan => {
                format!("expect(await {}.count()).toBeGreaterThan({})", locator, expected)
            }
            _ => format!("expect(await {}.count()).toBeLessThan({})", locator, expected),
        };
    }

    let first = locator.first();
    let matcher = match request.kind {
        VerificationType::TextContains => format!("toContainText('{}')", expected),
        VerificationType::TextEquals => format!("toHaveText('{}')", expected),
        VerificationType::ValueEquals => format!("toHaveValue('{}')", expected),
        VerificationType::ValueEmpty => "toHaveValue('')".to_string(),
        VerificationType::Visible => "toBeVisible()".to_string(),
        VerificationType::Hidden => "toBeHidden()".to_string(),
        VerificationType::Enabled => "toBeEnabled()".to_string(),
        VerificationType::Disabled => "toBeDisabled()".to_string(),
        VerificationType::Checked => "toBeChecked()".to_string(),
        VerificationType::Unchecked => "not.toBeChecked()".to_string(),
        VerificationType::HasClass => format!("toHaveClass(/(^|\\s){}(\\s|$)/)", expected),
        VerificationType::HasAttribute => {
            let name = escape_quoted(request.attribute.as_deref().unwrap_or_default());
            match request.expected.as_deref() {
                Some(_) => format!("toHaveAttribute('{}', '{}')", name, expected),
                None => format!("toHaveAttribute('{}')", name),
            }
        }
        _ => unreachable!("count checks handled above"),
    };
    format!("await expect({}).{}", first, matcher)
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Runs verification requests against one page
pub struct VerificationExecutor<'a> {
    driver: &'a dyn PageDriver,
    timeout: Duration,
}

impl<'a> VerificationExecutor<'a> {
    pub fn new(driver: &'a dyn PageDriver) -> Self {
        Self {
            driver,
            timeout: VERIFICATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn candidates(&self, request: &VerificationRequest, markers: &MarkerMap) -> Result<Vec<TypedSelector>> {
        if let Some(css) = request.selector.as_deref() {
            return Ok(vec![TypedSelector::css(css)]);
        }
        let som_id = request.element_ref.as_deref().unwrap_or_default().trim();
        let descriptor = markers.get(som_id).ok_or_else(|| SightlineError::StaleTarget {
            marker: som_id.to_string(),
            duplicates: 0,
        })?;
        let mut candidates = vec![TypedSelector::marker(som_id)];
        candidates.extend(synthesize(descriptor));
        Ok(candidates)
    }

    /// First candidate attached to the page, or the first candidate when none is
    async fn probe(&self, candidates: Vec<TypedSelector>) -> Result<TypedSelector> {
        let mut fallback = None;
        for candidate in candidates {
            match self.driver.count(&candidate).await {
                Ok(n) if n > 0 => return Ok(candidate),
                Ok(_) => {}
                Err(e) if e.is_navigation() => return Err(e.into()),
                Err(e) => debug!(selector = %candidate, error = %e, "probe failed"),
            }
            fallback.get_or_insert(candidate);
        }
        fallback.ok_or_else(|| SightlineError::protocol("no selector available for verification"))
    }

    /// One sample of the check: whether it passed and what was observed
    async fn sample(
        &self,
        request: &VerificationRequest,
        locator: &TypedSelector,
    ) -> DriverResult<(bool, String)> {
        let expected = request.expected.as_deref().unwrap_or_default();
        if request.kind.is_count() {
            let n = self.driver.count(locator).await?;
            let want = expected.trim().parse::<usize>().unwrap_or_default();
            let passed = match request.kind {
                VerificationType::CountEquals => n == want,
                VerificationType::CountGreaterThan => n > want,
                _ => n < want,
            };
            return Ok((passed, n.to_string()));
        }

        let first = locator.first();
        let attached = self.driver.count(locator).await? > 0;
        if !attached {
            let passed = request.kind == VerificationType::Hidden;
            return Ok((passed, "not attached".to_string()));
        }

        let sample = match request.kind {
            VerificationType::TextContains | VerificationType::TextEquals => {
                let text = normalize(&as_text(&self.driver.query(&first, &StateQuery::Text).await?));
                let want = normalize(expected);
                let passed = if request.kind == VerificationType::TextContains {
                    text.contains(&want)
                } else {
                    text == want
                };
                (passed, text)
            }
            VerificationType::ValueEquals | VerificationType::ValueEmpty => {
                let value = as_text(&self.driver.query(&first, &StateQuery::Value).await?);
                let want = if request.kind == VerificationType::ValueEmpty {
                    ""
                } else {
                    expected
                };
                (value == want, value)
            }
            VerificationType::Visible | VerificationType::Hidden => {
                let visible = self.driver.query(&first, &StateQuery::Visible).await?;
                let visible = visible.as_bool().unwrap_or(false);
                let passed = visible == (request.kind == VerificationType::Visible);
                (passed, visible.to_string())
            }
            VerificationType::Enabled | VerificationType::Disabled => {
                let enabled = self.driver.query(&first, &StateQuery::Enabled).await?;
                let enabled = enabled.as_bool().unwrap_or(false);
                let passed = enabled == (request.kind == VerificationType::Enabled);
                (passed, enabled.to_string())
            }
            VerificationType::Checked | VerificationType::Unchecked => {
                let checked = self.driver.query(&first, &StateQuery::Checked).await?;
                let checked = checked.as_bool().unwrap_or(false);
                let passed = checked == (request.kind == VerificationType::Checked);
                (passed, checked.to_string())
            }
            VerificationType::HasClass => {
                let classes = self.driver.query(&first, &StateQuery::ClassList).await?;
                let classes: Vec<String> = match classes {
                    Value::Array(items) => items.iter().map(as_text).collect(),
                    other => as_text(&other)
                        .split_whitespace()
                        .map(str::to_string)
                        .collect(),
                };
                let passed = classes.iter().any(|c| c == expected.trim());
                (passed, classes.join(" "))
            }
            VerificationType::HasAttribute => {
                let name = request.attribute.clone().unwrap_or_default();
                let value = self
                    .driver
                    .query(&first, &StateQuery::Attribute(name))
                    .await?;
                match value {
                    Value::Null => (false, "absent".to_string()),
                    value => {
                        let value = as_text(&value);
                        let passed = request.expected.as_deref().map_or(true, |e| e == value);
                        (passed, value)
                    }
                }
            }
            _ => unreachable!("count checks handled above"),
        };
        Ok(sample)
    }

    /// Run a verification. A failing check is an `Ok` outcome with
    /// `passed == false`; `Err` means the request itself was unusable or the
    /// page navigated away.
    pub async fn verify(
        &self,
        request: &VerificationRequest,
        markers: &MarkerMap,
    ) -> Result<VerificationOutcome> {
        request.validate()?;
        let locator = self.probe(self.candidates(request, markers)?).await?;
        let expression = assertion_expression(request, &locator);
        debug!(expression = %expression, "verifying");

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut last_actual = None;
        let mut last_error = None;
        loop {
            match self.sample(request, &locator).await {
                Ok((true, actual)) => {
                    return Ok(VerificationOutcome {
                        passed: true,
                        expression,
                        actual: Some(actual),
                        message: None,
                    })
                }
                Ok((false, actual)) => last_actual = Some(actual),
                Err(e) if e.is_navigation() => return Err(e.into()),
                Err(e) => last_error = Some(e.message),
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let message = match (&last_actual, last_error) {
            (Some(actual), _) => format!(
                "{:?} check failed after {}ms, observed '{}'",
                request.kind,
                self.timeout.as_millis(),
                actual
            ),
            (None, Some(error)) => error,
            (None, None) => format!("{:?} check failed", request.kind),
        };
        Ok(VerificationOutcome {
            passed: false,
            expression,
            actual: last_actual,
            message: Some(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expressions() {
        let locator = TypedSelector::marker("4");
        let text = VerificationRequest::on_marker(VerificationType::TextContains, "4").expecting("Saved");
        assert_eq!(
            assertion_expression(&text, &locator),
            "await expect(page.locator('[data-som-id=\"4\"]').nth(0)).toContainText('Saved')"
        );

        let count = VerificationRequest::on_marker(VerificationType::CountEquals, "4").expecting("3");
        assert_eq!(
            assertion_expression(&count, &locator),
            "await expect(page.locator('[data-som-id=\"4\"]')).toHaveCount(3)"
        );

        let unchecked = VerificationRequest::on_marker(VerificationType::Unchecked, "4");
        assert!(assertion_expression(&unchecked, &locator).ends_with(".not.toBeChecked()"));
    }

    #[test]
    fn test_request_validation() {
        let missing = VerificationRequest::on_marker(VerificationType::TextEquals, "1");
        assert!(missing.validate().is_err());

        let bad_count = VerificationRequest::on_marker(VerificationType::CountLessThan, "1").expecting("many");
        assert!(bad_count.validate().is_err());

        let parsed: VerificationRequest = serde_json::from_value(serde_json::json!({
            "type": "hasAttribute", "elementRef": "2", "attribute": "aria-expanded", "expected": "true"
        }))
        .unwrap();
        assert_eq!(parsed.kind, VerificationType::HasAttribute);
        assert!(parsed.validate().is_ok());
    }
}
