// Tests for the source-keyed rule matcher
// Uses the actual RuleMatcher implementation from src/rule_matcher.rs

use log_classifier::log_record::LogRecord;
use log_classifier::rule_matcher::{RuleError, RuleMatcher, RuleSpec};
use std::io::Write;

#[test]
fn test_auth_rule() {
    let mut matcher = RuleMatcher::new();
    matcher.add_rule("auth", "login failed", "AUTH_FAIL").unwrap();

    let result = matcher.match_record("auth", "login failed");
    assert_eq!(result.map(|m| m.label), Some("AUTH_FAIL".to_string()));
    assert_eq!(matcher.match_record("db", "conn refused"), None);
}

#[test]
fn test_deterministic() {
    let matcher = RuleMatcher::with_default_rules();

    let cases = vec![
        ("ModernHR", "User User77 logged out."),
        ("ModernHR", "nothing to see here"),
        ("AnalyticsEngine", "File report.pdf uploaded successfully by user User5."),
    ];

    for (source, message) in cases {
        let first = matcher.match_record(source, message);
        for _ in 0..10 {
            assert_eq!(matcher.match_record(source, message), first, "{}: {}", source, message);
        }
    }
}

#[test]
fn test_batch_matching() {
    let mut matcher = RuleMatcher::new();
    matcher.add_rule("auth", "login failed", "AUTH_FAIL").unwrap();
    matcher.add_rule("db", r"conn(ection)? refused", "DB_DOWN").unwrap();

    let records = vec![
        LogRecord::new("auth", "login failed"),
        LogRecord::new("db", "connection refused by peer"),
        LogRecord::new("db", "slow query"),
        LogRecord::new("cache", "login failed"),
    ];

    let results: Vec<Option<String>> = matcher
        .match_batch(&records)
        .into_iter()
        .map(|m| m.map(|m| m.label))
        .collect();

    assert_eq!(
        results,
        vec![
            Some("AUTH_FAIL".to_string()),
            Some("DB_DOWN".to_string()),
            None,
            None
        ]
    );
}

#[test]
fn test_load_rule_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[
            {{"source": "auth", "pattern": "login failed", "label": "AUTH_FAIL"}},
            {{"source": "auth", "pattern": "login", "label": "AUTH_OTHER"}},
            {{"source": "db", "pattern": "(?i)refused", "label": "DB_DOWN"}}
        ]"#
    )
    .unwrap();

    let matcher = RuleMatcher::from_json_file(file.path()).unwrap();
    assert_eq!(matcher.rule_count(), 3);
    assert_eq!(matcher.sources(), vec!["auth", "db"]);
    assert_eq!(
        matcher.match_record("auth", "login failed").unwrap().label,
        "AUTH_FAIL"
    );
    assert_eq!(
        matcher.match_record("auth", "login ok").unwrap().label,
        "AUTH_OTHER"
    );
    assert_eq!(
        matcher.match_record("db", "Conn REFUSED").unwrap().label,
        "DB_DOWN"
    );
}

#[test]
fn test_rule_file_with_lookaround_rejected() {
    let specs = vec![
        RuleSpec::new("auth", "login failed", "AUTH_FAIL"),
        RuleSpec::new("auth", "(?=login)", "LOOKAHEAD"),
    ];

    match RuleMatcher::from_specs(specs) {
        Err(RuleError::InvalidPattern { source_name, pattern, .. }) => {
            assert_eq!(source_name, "auth");
            assert_eq!(pattern, "(?=login)");
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("look-around must be rejected"),
    }
}

#[test]
fn test_missing_rule_file() {
    let err = RuleMatcher::from_json_file("/definitely/not/here.json")
        .err()
        .expect("missing file must fail");
    assert!(matches!(err, RuleError::Io { .. }));
}
