use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::AutomationError;
use crate::locator::{Locator, LocatorType};

/// Every action a command can request. Unrecognized wire names are kept as
/// [`Action::Unknown`] so the executor can report them instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Click,
    Type,
    GetText,
    GetAttribute,
    Evaluate,
    Scroll,
    RandomScroll,
    Wait,
    Focus,
    Hover,
    GetElements,
    Loop,
    Navigate,
    Screenshot,
    PressKey,
    Inspect,
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Click => "click",
            Action::Type => "type",
            Action::GetText => "getText",
            Action::GetAttribute => "getAttribute",
            Action::Evaluate => "evaluate",
            Action::Scroll => "scroll",
            Action::RandomScroll => "random_scroll",
            Action::Wait => "wait",
            Action::Focus => "focus",
            Action::Hover => "hover",
            Action::GetElements => "getElements",
            Action::Loop => "loop",
            Action::Navigate => "navigate",
            Action::Screenshot => "screenshot",
            Action::PressKey => "press_key",
            Action::Inspect => "inspect",
            Action::Unknown(name) => name,
        }
    }

    /// Whether a command with this action must carry a locator.
    pub fn requires_locator(&self) -> bool {
        !matches!(
            self,
            Action::Navigate
                | Action::Screenshot
                | Action::Wait
                | Action::RandomScroll
                | Action::Scroll
                | Action::Evaluate
                | Action::PressKey
                | Action::Unknown(_)
        )
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "click" => Action::Click,
            "type" => Action::Type,
            "getText" => Action::GetText,
            "getAttribute" => Action::GetAttribute,
            "evaluate" => Action::Evaluate,
            "scroll" => Action::Scroll,
            "random_scroll" => Action::RandomScroll,
            "wait" => Action::Wait,
            "focus" => Action::Focus,
            "hover" => Action::Hover,
            "getElements" => Action::GetElements,
            "loop" => Action::Loop,
            "navigate" => Action::Navigate,
            "screenshot" => Action::Screenshot,
            "press_key" => Action::PressKey,
            "inspect" => Action::Inspect,
            _ => Action::Unknown(s),
        }
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Action::from(s.to_string())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific parameters. Absent fields fall back to executor defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(
        default,
        deserialize_with = "loose_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub x: Option<f64>,
    #[serde(
        default,
        deserialize_with = "loose_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Element wait timeout, in milliseconds
    #[serde(
        default,
        deserialize_with = "loose_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<u64>,
    /// Duration wait, in milliseconds
    #[serde(
        default,
        deserialize_with = "loose_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<Command>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(
        default,
        deserialize_with = "loose_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_scrolls: Option<u32>,
    #[serde(
        default,
        deserialize_with = "loose_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_scrolls: Option<u32>,
    #[serde(
        default,
        deserialize_with = "loose_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_distance: Option<f64>,
    #[serde(
        default,
        deserialize_with = "loose_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_distance: Option<f64>,
    #[serde(
        default,
        deserialize_with = "loose_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_delay: Option<u64>,
    #[serde(
        default,
        deserialize_with = "loose_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay: Option<u64>,
    /// Destination hint for screenshots; when present the payload also
    /// carries the raw base64 data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_to: Option<String>,
}

impl CommandParams {
    pub fn is_empty(&self) -> bool {
        *self == CommandParams::default()
    }
}

/// One unit of work, as delivered by the command source or synthesized by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub action: Action,
    #[serde(default, alias = "locatorType")]
    pub selector_type: LocatorType,
    #[serde(default, alias = "locator", skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "CommandParams::is_empty")]
    pub params: CommandParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Numbers arrive as `250`, `250.0` or `"250"`; a blank string counts as absent.
fn number_value<E: serde::de::Error>(value: Option<Value>) -> Result<Option<f64>, E> {
    let n = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(other) => return Err(E::custom(format!("expected a number, found {other}"))),
    };
    match n {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(E::custom("expected a finite number")),
    }
}

fn loose_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    number_value(Option::<Value>::deserialize(deserializer)?)
}

fn loose_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match number_value::<D::Error>(Option::<Value>::deserialize(deserializer)?)? {
        None => Ok(None),
        Some(n) if (0.0..=u64::MAX as f64).contains(&n) => Ok(Some(n.round() as u64)),
        Some(n) => Err(D::Error::custom(format!("expected a non-negative number, found {n}"))),
    }
}

fn loose_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match loose_u64(deserializer)? {
        None => Ok(None),
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("{n} is out of range"))),
    }
}

impl Command {
    pub fn new(action: impl Into<Action>) -> Self {
        Self {
            id: None,
            action: action.into(),
            selector_type: LocatorType::Css,
            selector: None,
            params: CommandParams::default(),
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.selector_type = locator.kind;
        self.selector = Some(locator.value);
        self
    }

    pub fn with_params(mut self, params: CommandParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The locator carried by this command, if any.
    pub fn locator(&self) -> Option<Locator> {
        match (&self.selector, self.selector_type) {
            (_, LocatorType::None) => None,
            (Some(value), kind) if !value.is_empty() => Some(Locator::new(kind, value.clone())),
            _ => None,
        }
    }

    /// Whether executing this command reads or mutates page content. Such
    /// commands are refused in restricted contexts; navigation and plain
    /// duration waits are not.
    pub fn touches_page(&self) -> bool {
        match self.action {
            Action::Navigate | Action::Unknown(_) => false,
            Action::Wait => self.locator().is_some(),
            _ => true,
        }
    }

    /// The locator, or `InvalidArgument` when the action needs one and none was given.
    pub fn required_locator(&self) -> Result<Locator, AutomationError> {
        self.locator().ok_or_else(|| {
            AutomationError::InvalidArgument(format!("'{}' requires a selector", self.action))
        })
    }

    /// Rejects commands missing a locator their action requires.
    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.action.requires_locator() {
            self.required_locator()?;
        }
        Ok(())
    }

    /// Human label used in history and logs.
    pub fn label(&self) -> String {
        match (&self.description, self.locator()) {
            (Some(d), _) => d.clone(),
            (None, Some(locator)) => format!("{} {}", self.action, locator.value),
            (None, None) => self.action.to_string(),
        }
    }
}

/// Structured result of one command. Failures never escape the executor as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine code of the error, see [`AutomationError::code`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl CommandOutcome {
    pub fn ok(result: impl Into<Value>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            error: None,
            code: None,
            count: None,
        }
    }

    pub fn ok_with_count(result: impl Into<Value>, count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::ok(result)
        }
    }

    pub fn failed(error: &AutomationError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
            code: Some(error.code().to_string()),
            count: None,
        }
    }

    /// Rebuilds the typed error from `code` and `error`.
    pub fn as_error(&self) -> Option<AutomationError> {
        if self.success {
            return None;
        }
        Some(AutomationError::from_code(
            self.code.as_deref().unwrap_or_default(),
            self.error.clone().unwrap_or_default(),
        ))
    }

    pub fn is_aborted(&self) -> bool {
        self.code.as_deref() == Some("ABORTED")
    }
}

impl From<Result<CommandOutcome, AutomationError>> for CommandOutcome {
    fn from(result: Result<CommandOutcome, AutomationError>) -> Self {
        result.unwrap_or_else(|e| CommandOutcome::failed(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_from_server_json() {
        let cmd: Command = serde_json::from_value(json!({
            "id": 17,
            "action": "getAttribute",
            "selectorType": "match",
            "selector": "<a href",
            "params": { "attribute": "href" }
        }))
        .unwrap();
        assert_eq!(cmd.id.as_deref(), Some("17"));
        assert_eq!(cmd.action, Action::GetAttribute);
        assert_eq!(cmd.locator(), Some(Locator::textmatch("<a href")));
        assert_eq!(cmd.params.attribute.as_deref(), Some("href"));
    }

    #[test]
    fn test_numeric_params_accept_floats_and_strings() {
        let cmd: Command = serde_json::from_value(json!({
            "action": "random_scroll",
            "params": {
                "minDelay": 100.4,
                "maxDelay": " 900 ",
                "minScrolls": "2",
                "maxScrolls": 4.0,
                "minDistance": "120.5",
                "timeout": ""
            }
        }))
        .unwrap();
        assert_eq!(cmd.params.min_delay, Some(100));
        assert_eq!(cmd.params.max_delay, Some(900));
        assert_eq!(cmd.params.min_scrolls, Some(2));
        assert_eq!(cmd.params.max_scrolls, Some(4));
        assert_eq!(cmd.params.min_distance, Some(120.5));
        assert_eq!(cmd.params.timeout, None);

        for bad in [json!("soon"), json!(-5), json!([1]), json!("NaN")] {
            let parsed = serde_json::from_value::<Command>(json!({
                "action": "wait",
                "params": { "duration": bad }
            }));
            assert!(parsed.is_err(), "{bad} should not parse as a duration");
        }
    }

    #[test]
    fn test_unknown_action_is_preserved() {
        let cmd: Command = serde_json::from_value(json!({"action": "teleport"})).unwrap();
        assert_eq!(cmd.action, Action::Unknown("teleport".into()));
        assert_eq!(serde_json::to_value(&cmd).unwrap()["action"], "teleport");
    }

    #[test]
    fn test_locator_requirements() {
        assert!(Command::new("navigate").validate().is_ok());
        assert!(Command::new("wait").validate().is_ok());
        assert!(matches!(
            Command::new("click").validate(),
            Err(AutomationError::InvalidArgument(_))
        ));
        let locator_type_none = Command {
            selector_type: LocatorType::None,
            selector: Some("#x".into()),
            ..Command::new("click")
        };
        assert!(locator_type_none.validate().is_err());
    }

    #[test]
    fn test_recorded_command_serializes_compactly() {
        let cmd = Command::new(Action::Click).with_locator(Locator::css("#go"));
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"action": "click", "selectorType": "css", "selector": "#go"})
        );
    }

    #[test]
    fn test_outcome_round_trips_error_code() {
        let outcome = CommandOutcome::failed(&AutomationError::Timeout("x".into()));
        assert_eq!(outcome.code.as_deref(), Some("TIMEOUT"));
        assert_eq!(
            outcome.as_error(),
            Some(AutomationError::Timeout("Operation timed out: x".into()))
        );
    }
}
