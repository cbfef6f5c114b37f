//! Built-in passive rules

mod cookies;
mod headers;
mod server_banner;
mod tags;
mod websocket;

use std::sync::Arc;

use super::rule::PassiveRule;

pub use cookies::CookieSecurityRule;
pub use headers::SecurityHeadersRule;
pub use server_banner::ServerBannerRule;
pub use tags::{default_tag_rules, TagRule, TagSource};
pub use websocket::WebSocketDisclosureRule;

/// Rules registered by default, in registration order; tag rules last
pub fn default_rules() -> Vec<Arc<dyn PassiveRule>> {
    let mut rules: Vec<Arc<dyn PassiveRule>> = vec![
        Arc::new(CookieSecurityRule::new()),
        Arc::new(SecurityHeadersRule::new()),
        Arc::new(ServerBannerRule::new()),
        Arc::new(WebSocketDisclosureRule::new()),
    ];
    rules.extend(
        default_tag_rules()
            .into_iter()
            .map(|rule| Arc::new(rule) as Arc<dyn PassiveRule>),
    );
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_rules_are_unique() {
        let rules = default_rules();
        let ids: HashSet<u32> = rules.iter().map(|r| r.id()).collect();
        let names: HashSet<&str> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(ids.len(), rules.len());
        assert_eq!(names.len(), rules.len());
    }
}
