use regolith::codec::{self, Profile};
use regolith::{CompiledSet, Value, compile, parse_bytes, query_rule};
use serde_json::json;

const POLICY: &str = r#"package payments

default approve = false

approve {
    input.amount <= limit
    not flagged
}

limit = 500 { input.customer.verified }
limit = 50 { not input.customer.verified }

flagged { input.country == data.sanctioned[_] }
"#;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let module = parse_bytes("payments.rego", POLICY.as_bytes()).expect("failed to parse policy");
    println!("{module}");

    for profile in [Profile::Portable, Profile::FullFidelity] {
        let bytes = match codec::encode(&module, profile) {
            Ok(bytes) => bytes,
            Err(err) => {
                println!("{profile}: {err}");
                continue;
            }
        };
        let decoded = codec::decode(&bytes, profile).expect("failed to decode module");
        let compiled: CompiledSet = compile([("payments.rego".to_owned(), decoded)].into_iter().collect())
            .expect("decoded module failed to compile");

        let store = regolith::Store::from(json!({"sanctioned": ["XX"]}));
        let input = Value::from(json!({
            "amount": 120,
            "country": "NL",
            "customer": {"verified": true},
        }));
        let approve = query_rule(&compiled, "payments", "approve", Some(&input), Some(&store))
            .expect("query failed");
        println!("{profile}: {} bytes, approve = {}", bytes.len(), approve.value);
    }
}
