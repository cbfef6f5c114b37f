//! Name-based dispatch for remote callers
//!
//! Parameters arrive as a JSON object. Values may be JSON strings or the
//! matching JSON scalar, so `{"id": 10}` and `{"id": "10"}` are equivalent.

use serde_json::{json, Map, Value};

use super::{ManagementApi, RuleTarget};
use crate::error::ApiError;

/// Names accepted by [`ManagementApi::handle_action`]
pub const ACTIONS: &[&str] = &[
    "setEnabled",
    "setThreshold",
    "setMaxAlertsPerRule",
    "enableAllRules",
    "disableAllRules",
    "enableRules",
    "disableRules",
    "enableAllTags",
    "disableAllTags",
    "clearQueue",
    "setScanningEnabled",
    "setScanOnlyInScope",
];

/// Names accepted by [`ManagementApi::handle_view`]
pub const VIEWS: &[&str] = &[
    "listRules",
    "queueDepth",
    "currentTasks",
    "currentRule",
    "maxAlertsPerRule",
    "scanOnlyInScope",
    "scanningEnabled",
    "ruleStats",
    "messageStats",
];

impl ManagementApi {
    /// Run a mutating operation by name
    pub fn handle_action(&self, name: &str, params: &Value) -> Result<Value, ApiError> {
        let params = Params::new(params)?;
        match name {
            "setEnabled" => {
                let target = RuleTarget::parse(&params.string("id")?)?;
                self.set_enabled(target, params.bool("enabled")?)?;
            }
            "setThreshold" => {
                self.set_threshold(&params.string("id")?, &params.string("alertThreshold")?)?;
            }
            "setMaxAlertsPerRule" => {
                self.set_max_alerts_per_rule(params.number("maxAlerts")?)?;
            }
            "enableAllRules" => self.enable_all_rules()?,
            "disableAllRules" => self.disable_all_rules()?,
            "enableRules" => self.enable_rules(&params.string("ids")?)?,
            "disableRules" => self.disable_rules(&params.string("ids")?)?,
            "enableAllTags" => self.enable_all_tags()?,
            "disableAllTags" => self.disable_all_tags()?,
            "clearQueue" => {
                let cleared = self.clear_queue();
                return Ok(json!({ "Result": "OK", "cleared": cleared }));
            }
            "setScanningEnabled" => self.set_scanning_enabled(params.bool("enabled")?)?,
            "setScanOnlyInScope" => self.set_scan_only_in_scope(params.bool("onlyInScope")?)?,
            other => return Err(ApiError::BadAction(other.to_string())),
        }
        Ok(json!({ "Result": "OK" }))
    }

    /// Read engine state by name
    pub fn handle_view(&self, name: &str, _params: &Value) -> Result<Value, ApiError> {
        let value = match name {
            "listRules" => to_value(&self.list_rules())?,
            "queueDepth" => json!(self.queue_depth()),
            "currentTasks" => to_value(&self.current_tasks())?,
            "currentRule" => to_value(&self.current_rule())?,
            "maxAlertsPerRule" => json!(self.max_alerts_per_rule()),
            "scanOnlyInScope" => json!(self.scan_only_in_scope()),
            "scanningEnabled" => json!(self.scanning_enabled()),
            "ruleStats" => to_value(&self.rule_stats())?,
            "messageStats" => to_value(&self.message_stats())?,
            other => return Err(ApiError::BadView(other.to_string())),
        };
        let mut wrapped = Map::new();
        wrapped.insert(name.to_string(), value);
        Ok(Value::Object(wrapped))
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

/// Typed access to request parameters
struct Params<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Params<'a> {
    fn new(params: &'a Value) -> Result<Self, ApiError> {
        match params {
            Value::Null => Ok(Self { map: None }),
            Value::Object(map) => Ok(Self { map: Some(map) }),
            _ => Err(ApiError::IllegalParameter("params".into())),
        }
    }

    fn get(&self, key: &str) -> Result<&'a Value, ApiError> {
        self.map
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_null())
            .ok_or_else(|| ApiError::MissingParameter(key.to_string()))
    }

    fn string(&self, key: &str) -> Result<String, ApiError> {
        match self.get(key)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(ApiError::IllegalParameter(key.to_string())),
        }
    }

    fn bool(&self, key: &str) -> Result<bool, ApiError> {
        match self.get(key)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(ApiError::IllegalParameter(key.to_string())),
        }
    }

    fn number(&self, key: &str) -> Result<usize, ApiError> {
        let parsed = match self.get(key)? {
            Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| ApiError::IllegalParameter(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scanner::testing::StaticRule;
    use crate::scanner::{CollectingSink, PassiveScanEngine};
    use crate::traffic::{HttpExchange, HttpRequest, HttpResponse, MessageHistory};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn api() -> ManagementApi {
        let engine = PassiveScanEngine::builder(
            Arc::new(MessageHistory::new(10)),
            Arc::new(CollectingSink::new()),
        )
        .build();
        engine.add_rule(Arc::new(StaticRule::silent(10, "XSS")));
        engine.add_rule(Arc::new(StaticRule::silent(20, "SQLi")));
        ManagementApi::new(Arc::new(engine), Config::default())
    }

    #[test]
    fn test_unknown_names() {
        let api = api();
        assert_eq!(
            api.handle_action("reboot", &Value::Null).unwrap_err(),
            ApiError::BadAction("reboot".into())
        );
        assert_eq!(
            api.handle_view("secrets", &Value::Null).unwrap_err(),
            ApiError::BadView("secrets".into())
        );
    }

    #[test]
    fn test_missing_and_illegal_params() {
        let api = api();
        assert_eq!(
            api.handle_action("setEnabled", &json!({ "id": 10 })).unwrap_err(),
            ApiError::MissingParameter("enabled".into())
        );
        assert_eq!(
            api.handle_action("setEnabled", &json!({ "id": 10, "enabled": "maybe" })).unwrap_err(),
            ApiError::IllegalParameter("enabled".into())
        );
        assert_eq!(
            api.handle_action("setMaxAlertsPerRule", &json!({ "maxAlerts": -1 })).unwrap_err(),
            ApiError::IllegalParameter("maxAlerts".into())
        );
        assert_eq!(
            api.handle_action("enableAllRules", &json!([1, 2])).unwrap_err(),
            ApiError::IllegalParameter("params".into())
        );
    }

    #[test]
    fn test_actions_and_views() {
        let api = api();
        api.handle_action("setEnabled", &json!({ "id": "ALL", "enabled": true }))
            .unwrap();
        api.handle_action("setThreshold", &json!({ "id": 10, "alertThreshold": "OFF" }))
            .unwrap();
        api.handle_action("setMaxAlertsPerRule", &json!({ "maxAlerts": "3" }))
            .unwrap();

        let rules = api.handle_view("listRules", &Value::Null).unwrap();
        assert_eq!(rules["listRules"][0]["enabled"], json!(false));
        assert_eq!(rules["listRules"][0]["threshold"], json!("OFF"));
        assert_eq!(rules["listRules"][1]["enabled"], json!(true));

        let max = api.handle_view("maxAlertsPerRule", &Value::Null).unwrap();
        assert_eq!(max, json!({ "maxAlertsPerRule": 3 }));

        let cleared = api.handle_action("clearQueue", &Value::Null).unwrap();
        assert_eq!(cleared["cleared"], json!(0));
    }

    #[test]
    fn test_tag_actions() {
        let api = api();
        api.engine()
            .add_rule(Arc::new(StaticRule::tagging(50001, "Form Tag", "Form", "<form")));

        assert_eq!(
            api.handle_action("enableAllTags", &Value::Null).unwrap(),
            json!({ "Result": "OK" })
        );
        let rules = api.handle_view("listRules", &Value::Null).unwrap();
        assert_eq!(rules["listRules"][2]["enabled"], json!(true));
        assert_eq!(rules["listRules"][0]["enabled"], json!(false));

        api.handle_action("disableAllTags", &Value::Null).unwrap();
        let rules = api.handle_view("listRules", &Value::Null).unwrap();
        assert_eq!(rules["listRules"][2]["enabled"], json!(false));
    }

    #[test]
    fn test_every_listed_view_resolves() {
        let api = api();
        for view in VIEWS {
            assert!(api.handle_view(view, &Value::Null).is_ok(), "{}", view);
        }
    }

    fn keys(value: &Value) -> Vec<String> {
        let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_in_flight_views_use_camel_case_keys() {
        let history = Arc::new(MessageHistory::new(10));
        let engine = PassiveScanEngine::builder(history.clone(), Arc::new(CollectingSink::new())).build();
        engine.add_rule(Arc::new(StaticRule::sleeping(1, "Slow", Duration::from_millis(300))));
        engine.registry().set_all_enabled(true);
        engine.start().unwrap();
        let api = ManagementApi::new(Arc::new(engine), Config::default());

        let exchange = HttpExchange::new(
            HttpRequest::new("GET", "https://a.test/"),
            Some(HttpResponse::new(200)),
        );
        assert!(api.engine().on_message(history.record_http(1, exchange)));

        let deadline = Instant::now() + Duration::from_secs(10);
        while api.current_tasks().is_empty() {
            assert!(Instant::now() < deadline, "scan never started");
            std::thread::sleep(Duration::from_millis(1));
        }

        let tasks = api.handle_view("currentTasks", &Value::Null).unwrap();
        let task = &tasks["currentTasks"][0];
        assert_eq!(keys(task), vec!["elapsedMs", "ruleName", "startTimestamp", "target"]);
        assert_eq!(task["ruleName"], json!("Slow"));

        let current = api.handle_view("currentRule", &Value::Null).unwrap();
        assert_eq!(keys(&current["currentRule"]), vec!["elapsedMs", "name", "target"]);
        assert_eq!(current["currentRule"]["name"], json!("Slow"));

        api.engine().shutdown();
    }
}
