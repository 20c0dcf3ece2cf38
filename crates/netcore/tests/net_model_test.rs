// crates/netcore/tests/net_model_test.rs

use netcore::{Gate, InstanceCreation, MultiInstance, NetElement, NetModel, Task};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn claim_net() -> NetModel {
    let mut net = NetModel::new("claims", "start", "end").with_name("Claims");
    net.add_task(Task::new("register").with_split(Gate::Xor));
    net.add_task(Task::new("assess"));
    net.add_task(Task::new("reject").automatic());
    net.add_task(Task::new("pay").cancels("assess"));
    net.connect("start", "register");
    let assess = net.connect_tasks("register", "assess");
    let reject = net.connect_tasks("register", "reject");
    net.connect("assess", "end");
    net.connect("pay", "end");
    net.connect("reject", "end");
    for flow in net.flows.iter_mut().filter(|f| f.source == "register") {
        if flow.target == assess {
            flow.predicate = Some("amount > 0".to_string());
        } else if flow.target == reject {
            flow.default = true;
        }
    }
    net
}

#[test]
fn test_connect_tasks_inserts_implicit_condition() {
    init_tracing();
    let net = claim_net();
    let implicit: Vec<_> = net.conditions().filter(|c| c.implicit).collect();
    assert_eq!(implicit.len(), 2);
    assert!(net.is_condition("register__assess"));
    assert_eq!(net.postset("register"), vec!["register__assess", "register__reject"]);
    assert_eq!(net.preset("assess"), vec!["register__assess"]);
    assert!(!net.conditions().any(|c| c.id == "start" && c.implicit));
}

#[test]
fn test_json_uses_kind_tags_and_round_trips() {
    let net = claim_net();
    let raw = serde_json::to_value(&net).unwrap();
    assert_eq!(raw["elements"]["register"]["kind"], json!("task"));
    assert_eq!(raw["elements"]["register"]["split"], json!("xor"));
    assert_eq!(raw["elements"]["start"]["kind"], json!("condition"));
    assert_eq!(raw["elements"]["register__assess"]["implicit"], json!(true));

    let back: NetModel = serde_json::from_value(raw).unwrap();
    assert_eq!(back, net);
}

#[test]
fn test_minimal_json_gets_defaults() {
    let raw = json!({
        "id": "tiny",
        "version": "1",
        "name": null,
        "input_condition": "i",
        "output_condition": "o",
        "elements": {
            "i": {"kind": "condition", "id": "i", "name": null},
            "o": {"kind": "condition", "id": "o", "name": null},
            "t": {"kind": "task", "id": "t", "name": null, "join": "and", "split": "or",
                  "multi_instance": {"min": 1, "max": 2, "threshold": 2}}
        },
        "flows": [
            {"source": "i", "target": "t"},
            {"source": "t", "target": "o"}
        ]
    });
    let net: NetModel = serde_json::from_value(raw).unwrap();

    let task = net.task("t").unwrap();
    assert_eq!(task.join, Gate::And);
    assert!(task.cancellation_set.is_empty());
    assert!(!task.automatic);
    let attributes = task.multi_instance.as_ref().unwrap();
    assert_eq!(attributes.creation, InstanceCreation::Static);
    assert_eq!(attributes, &MultiInstance::new(1, 2, 2));

    assert!(net.flows.iter().all(|f| f.predicate.is_none() && !f.default));
    assert!(matches!(net.element("i"), Some(NetElement::Condition(c)) if !c.implicit));
    assert_eq!(net.outgoing("i").count(), 1);
    assert_eq!(net.incoming("o").count(), 1);
}
