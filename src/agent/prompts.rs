//! Oracle prompts for act, verify and extract

use crate::agent::loop_state::ActLoopState;
use crate::som::MarkerMap;

pub const ACT_SYSTEM_PROMPT: &str = r#"You are a browser test automation agent. You receive a screenshot of the current page where every interactive element carries a numbered, coloured marker, plus a list describing each marker. Decide what to do next to complete the user's objective.

Reply with ONE JSON object and nothing else. Fields:
- "commandsToRun": array of commands to perform now, in order.
- "preCommands": array of commands that prepare the page (close a popup, open a menu) before the main commands.
- "needsRetryAfterPreActions": true when you must see the page again after the pre-commands before choosing main commands.
- "shouldWait": true when the page is still loading or animating; add "waitReason".
- "requestSomRefresh": true when the markers look outdated; add "refreshReason".
- "stepCompleted": true when the objective is already satisfied on the current page.

A command looks like {"action": "click", "elementRef": "3"}. Actions: click, doubleClick, rightClick, hover, mouseDown, mouseUp, drag, fill, type, clear, press, pressSequentially, select, check, uncheck, focus, blur, scroll, scrollIntoView, waitFor, navigate, goBack, goForward, reload.
- Target elements with "elementRef" (the marker number). Only when no marker fits, use "coordinates": {"x": <0-100>, "y": <0-100>} as a percentage of the viewport. Never send both.
- "value" carries text for fill/type/pressSequentially, a key for press, an option for select and the URL for navigate.
- drag needs "targetElementRef" or "targetCoordinates". scroll accepts "scrollDirection" (up/down/left/right) and "scrollAmount" in pixels. waitFor accepts "duration" in milliseconds.
Set exactly one of the flags, or send commands. Never invent markers that are not in the list."#;

pub const VERIFY_SYSTEM_PROMPT: &str = r#"You are a browser test verification agent. You receive a full-page screenshot and a requirement. Decide whether the page satisfies the requirement.

Reply with ONE JSON object and nothing else:
{"verificationSuccess": true|false, "confidence": <0-100>, "reason": "<short explanation>"}
Use "requestSomRefresh": true only if the screenshot is clearly mid-transition and should be taken again."#;

pub const EXTRACT_SYSTEM_PROMPT: &str = r#"You are a browser data extraction agent. You receive a full-page screenshot and a description of the data to extract.

Reply with ONE JSON object and nothing else:
- {"extractedContent": "<value>", "confidence": <0-100>} for a single value, or
- {"extractedContentList": ["<value>", ...], "confidence": <0-100>} for several values.
Copy text exactly as displayed. For numbers, return only the digits."#;

/// User prompt for one act round
pub fn act_user_prompt(objective: &str, markers: &MarkerMap, state: &ActLoopState) -> String {
    let mut prompt = format!(
        "Objective: {}\n\nMarked elements ({}):\n{}\n",
        objective,
        markers.len(),
        markers.format_for_prompt()
    );
    if state.wait.count > 0 || state.pre_action.count > 0 {
        prompt.push_str(&format!(
            "\nWaits so far: {}/{}. Pre-action retries so far: {}/{}. Only wait again if the page is truly not ready.\n",
            state.wait.count, state.wait.limit, state.pre_action.count, state.pre_action.limit
        ));
    }
    prompt
}

pub fn verify_user_prompt(requirement: &str) -> String {
    format!(
        "Requirement to verify: {}\n\nLook at the screenshot and judge whether the requirement holds.",
        requirement
    )
}

pub fn extract_user_prompt(requirement: &str, list: bool) -> String {
    let shape = if list {
        "Return every matching value in extractedContentList."
    } else {
        "Return a single value in extractedContent."
    };
    format!("Data to extract: {}\n\n{}", requirement, shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::som::ElementDescriptor;

    #[test]
    fn test_act_prompt_mentions_counters_only_after_retries() {
        let markers = MarkerMap::new(vec![ElementDescriptor {
            som_id: "1".into(),
            tag: "button".into(),
            text: "Sign in".into(),
            ..Default::default()
        }]);
        let mut state = ActLoopState::new(5);
        let prompt = act_user_prompt("log in", &markers, &state);
        assert!(prompt.contains("Objective: log in"));
        assert!(prompt.contains("Sign in"));
        assert!(!prompt.contains("Waits so far"));

        state.bump_wait("log in", "loading").unwrap();
        let prompt = act_user_prompt("log in", &markers, &state);
        assert!(prompt.contains("Waits so far: 1/5"));
    }
}
