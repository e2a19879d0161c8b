use crate::types::ProposedAction;

const EXPLORE_TEMPLATE: &str = r#"You are an agent that is trained to complete certain tasks on a smartphone. You will be given a screenshot of a smartphone app. The interactive UI elements on the screenshot are labeled with numeric tags starting from 1.

You can interact with the labeled elements using these actions:
- tap: tap the element labeled `area`.
- long_press: long press the element labeled `area`.
- swipe: swipe the element labeled `area` (usually a scroll view or a slide bar). `direction` is one of up, down, left, right. `distance` is one of short, medium, long.
- text: type `text` into the focused input field. Only use it when a keyboard is showing in the lower half of the screen.
- finish: the task is completed or there is nothing left to do.

The task you need to complete is to {task}. Your past actions to proceed with this task are summarized as follows: {last_act}

Given the labeled screenshot, decide the single next action. Reply with ONE JSON object and nothing else:
{"observation": "<what you observe in the image>",
 "thought": "<what the next step should be to complete the task>",
 "action": {"name": "tap" | "long_press" | "swipe" | "text" | "finish", "area": <int>, "direction": "<dir>", "distance": "<dist>", "text": "<input>"},
 "summary": "<your past actions plus the latest one in one or two sentences, without numeric tags>"}
Only include the action fields the chosen action needs."#;

const REFLECT_TEMPLATE: &str = r#"I will give you screenshots of a mobile app before and after {action} the UI element labeled with the number {area} on the first screenshot. The numeric tag of each element is located at the center of the element. The action of {action} this UI element was described as follows:
{last_act}
The action was also an attempt to proceed with a larger task, which is to {task}. Carefully analyze the difference between the two screenshots to determine if the action is in accord with the description above and at the same time effectively moved the task forward. Choose one decision:
- BACK: the action navigated to a page where the task cannot proceed, so we should go back to the previous interface.
- INEFFECTIVE: the action changed nothing on the screen (if the cursor moved, the screenshots are not identical).
- CONTINUE: the action changed something but does not reflect the description and did not move the task forward.
- SUCCESS: the action moved the task forward, even if the task is not finished.
For BACK, CONTINUE and SUCCESS also describe the general function of the UI element in one or two sentences. Never include its numeric tag; refer to it as "the UI element".
Reply with ONE JSON object and nothing else:
{"decision": "BACK" | "INEFFECTIVE" | "CONTINUE" | "SUCCESS", "thought": "<why>", "documentation": "<function of the UI element, omitted for INEFFECTIVE>"}"#;

const LAUNCH_TEMPLATE: &str = r#"The task you need to complete is to {task}.

Below is a list of applications already installed on the device:
{apps}

Recommend the one application that best fulfills the user's intent.
1. Only select an app if it directly matches the task description.
2. If none of the apps can fulfill the task, answer "No application opened".
3. Base the decision solely on the application names; never make up a name.
Reply with ONE JSON object and nothing else:
{"app": "<application name from the list or \"No application opened\">", "reason": "<why this app was selected or why none could be>"}"#;

/// Appended as a system message after the transcript.
pub const COMPLETION_PROMPT: &str = r#"You are an agent responsible for determining whether a given task on a smartphone has been completed.

Carefully review the operation history and determine whether the task described above has been successfully completed.

Your output must be one of the following:
- FINISHED (if the task was completed)
- CONTINUE (if the task is still in progress or incomplete)

Do not output any additional explanation, reasoning, or text. Only return either "FINISHED" or "CONTINUE"."#;

pub fn explore(task: &str, last_summary: &str) -> String {
    fill(EXPLORE_TEMPLATE, &[("task", task), ("last_act", last_summary)])
}

pub fn reflect(action: &ProposedAction, task: &str, last_summary: &str) -> String {
    let verb = match action {
        ProposedAction::Tap { .. } => "tapping",
        ProposedAction::LongPress { .. } => "long pressing",
        ProposedAction::Swipe { .. } => "swiping",
        ProposedAction::Text { .. } => "typing into",
        ProposedAction::Finish | ProposedAction::Error { .. } => "acting on",
    };
    let area = action
        .area()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "?".to_string());
    fill(
        REFLECT_TEMPLATE,
        &[
            ("action", verb),
            ("area", &area),
            ("task", task),
            ("last_act", last_summary),
        ],
    )
}

pub fn launch(task: &str, apps: &[String]) -> String {
    fill(LAUNCH_TEMPLATE, &[("task", task), ("apps", &apps.join(", "))])
}

/// Substitute `{key}` placeholders in one left-to-right pass. Inserted values
/// are never rescanned, and braces that name no key are copied through.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let hit = values
            .iter()
            .find(|(key, _)| tail.starts_with(key) && tail[key.len()..].starts_with('}'));
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Distance};

    #[test]
    fn fills_placeholders() {
        let p = explore("take two photos", "Opened the camera.");
        assert!(p.contains("to take two photos."));
        assert!(p.contains("Opened the camera."));
        assert!(!p.contains("{task}"));

        let swipe = ProposedAction::Swipe {
            area: 7,
            direction: Direction::Down,
            distance: Distance::Medium,
        };
        let r = reflect(&swipe, "scroll", "Scrolled the feed.");
        assert!(r.contains("after swiping the UI element labeled with the number 7"));
        assert!(!r.contains("{area}"));
    }

    #[test]
    fn placeholder_text_in_values_is_kept_verbatim() {
        let p = explore("rename the file to {last_act}", "Opened {task} settings.");
        assert!(p.contains("to rename the file to {last_act}."));
        assert!(p.contains("summarized as follows: Opened {task} settings."));
        assert_eq!(p.matches("Opened {task} settings.").count(), 1);
        assert!(p.contains(r#"{"observation": "#));
    }
}
