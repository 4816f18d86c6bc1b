use entry_preview::policy::{
    Policy, RequestDetails, ResourceType, RuleAction, ALLOW_RULE_ID_BASE, BLOCK_RULE_ID_BASE,
    FRAME_CSP_RULE_ID,
};
use entry_preview::{DomainPolicy, PolicyConfig, PreviewError};
use serde_json::Value;

const CONFIG_JSON: &str = r#"{
    "domains": [
        { "domain": "playentry.org", "policy": "blockAll" },
        { "domain": "example.com", "policy": "allowScripts" },
        { "domain": "playentry.org", "policy": { "blockPath": "signout" } }
    ]
}"#;

#[test]
fn test_policy_loaded_from_json() {
    let config = PolicyConfig::from_json(CONFIG_JSON).unwrap();
    let rule_set = config.compile().unwrap();
    assert_eq!(
        rule_set.rule_ids(),
        vec![FRAME_CSP_RULE_ID, ALLOW_RULE_ID_BASE, BLOCK_RULE_ID_BASE]
    );

    let frame = RequestDetails::new("https://example.com/widget", ResourceType::SubFrame)
        .initiated_by("https://playentry.org/community");
    assert_eq!(rule_set.evaluate(&frame).map(|r| r.id), Some(ALLOW_RULE_ID_BASE));

    let other = RequestDetails::new("https://untrusted.io/", ResourceType::SubFrame)
        .initiated_by("https://playentry.org/community");
    assert_eq!(rule_set.evaluate(&other).map(|r| r.id), Some(FRAME_CSP_RULE_ID));

    let sign_out = RequestDetails::new("https://playentry.org/SignOut?next=/", ResourceType::Xmlhttprequest);
    let winner = rule_set.evaluate(&sign_out).unwrap();
    assert_eq!(winner.id, BLOCK_RULE_ID_BASE);
    assert_eq!(winner.action, RuleAction::Block);
}

#[test]
fn test_rules_serialize_in_platform_format() {
    let rule_set = PolicyConfig::from_json(CONFIG_JSON).unwrap().compile().unwrap();
    let rules: Value = serde_json::from_str(&rule_set.to_json().unwrap()).unwrap();

    assert_eq!(rules[0]["action"]["type"], "modifyHeaders");
    assert_eq!(
        rules[0]["action"]["responseHeaders"][0]["header"],
        "Content-Security-Policy"
    );
    assert_eq!(rules[0]["condition"]["resourceTypes"][0], "sub_frame");
    assert_eq!(rules[0]["condition"]["initiatorDomains"][0], "playentry.org");
    assert_eq!(rules[1]["action"]["responseHeaders"][0]["operation"], "remove");
    assert_eq!(rules[2]["action"]["type"], "block");
    assert!(rules[2]["condition"].get("initiatorDomains").is_none());

    let update = serde_json::to_value(rule_set.to_update(&[1, 100, 101, 1000, 1001])).unwrap();
    assert_eq!(update["removeRuleIds"], serde_json::json!([1, 100, 101, 1000, 1001]));
    assert_eq!(update["addRules"].as_array().map(Vec::len), Some(3));
}

#[test]
fn test_invalid_domains_are_rejected() {
    let config = PolicyConfig::default().with_domain(DomainPolicy::new(
        "https://evil.example/",
        Policy::AllowScripts,
    ));
    assert!(matches!(config.compile(), Err(PreviewError::PolicyError(_))));

    assert!(matches!(
        PolicyConfig::from_json("{ not json"),
        Err(PreviewError::SerializationError(_))
    ));
}
