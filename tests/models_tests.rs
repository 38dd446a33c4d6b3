// Model arithmetic and serialization tests (JSON camelCase)

use traffic_reporter::models::*;

#[test]
fn test_usage_accumulates_saturating() {
    let mut u = Usage::new(10, 20);
    u += Usage::new(5, 5);
    assert_eq!(u, Usage::new(15, 25));
    assert_eq!(u.total(), 40);

    let mut big = Usage::new(u64::MAX - 1, 0);
    big += Usage::new(10, 0);
    assert_eq!(big.upload, u64::MAX);
    assert_eq!(Usage::new(u64::MAX, 1).total(), u64::MAX);
}

#[test]
fn test_usage_is_zero() {
    assert!(Usage::default().is_zero());
    assert!(!Usage::new(0, 1).is_zero());
}

#[test]
fn test_node_totals_serialization_flattens_usage() {
    let totals = NodeTotals {
        node: Node::new("uuid-1", "hk-01"),
        usage: Usage::new(1, 2),
    };
    let json: serde_json::Value = serde_json::to_value(&totals).unwrap();
    assert_eq!(json["node"]["id"], "uuid-1");
    assert_eq!(json["node"]["name"], "hk-01");
    assert_eq!(json["upload"], 1);
    assert_eq!(json["download"], 2);
    let back: NodeTotals = serde_json::from_value(json).unwrap();
    assert_eq!(back, totals);
}
