use regolith::harness::{Expected, TestCase, run_all};
use serde_json::json;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let cases = vec![
        TestCase::new("sum of inputs", Expected::from(json!(22))).rule("t = x { x := input.a + input.b }"),
        TestCase::new("missing rule", Expected::Undefined).target("nothing_here"),
        TestCase::new("default applies", Expected::from(json!(8)))
            .target("b")
            .rules(["t = 10 { true }", "default b = 8"]),
        TestCase::new("network is off", Expected::Error("network access is disabled".into()))
            .rule(r#"t { http.send({"method": "GET", "url": "https://example.com"}) }"#),
        TestCase::new("deliberately wrong", Expected::from(json!("10"))).rule("t = 10"),
    ];

    let input = json!({"a": 10, "b": 12});
    let failures = run_all(&cases, Some(&input), None);

    println!("{} of {} cases passed", cases.len() - failures.len(), cases.len());
    for failure in &failures {
        println!("FAIL {failure}");
    }
}
