//! Round-trip and canonical-form properties of the CDML codec.

use std::collections::BTreeMap;

use cdml_core::{
    decode, encode, ComponentModel, Constraints, Content, Dependency, Facet, Fqn, Implementation,
    Interface, PortMapping, Service,
};
use proptest::collection::{btree_map, vec};
use proptest::option;
use proptest::prelude::*;
use quick_xml::escape::{escape, partial_escape};
use serde_json::{json, Value};

fn full_model() -> ComponentModel {
    let mut resources = BTreeMap::new();
    resources.insert("memory.limit".to_string(), "512Mi".to_string());
    resources.insert("memory.request".to_string(), "256Mi".to_string());
    resources.insert("cpu.cores".to_string(), "2".to_string());

    let mut attributes = BTreeMap::new();
    attributes.insert("image".to_string(), "redis:7".to_string());
    attributes.insert("restart".to_string(), "always".to_string());

    let mut config = BTreeMap::new();
    config.insert("timeout".to_string(), Content::from("30s"));
    config.insert("pool".to_string(), Content::Structured(json!({"min": 1, "max": 8})));

    ComponentModel {
        fqn: Fqn::new("platform:svc:cache"),
        name: "cache & co".into(),
        file: String::new(),
        interface: Some(Interface {
            implements: Some("kv-store".into()),
            extends: None,
            facets: vec![
                Facet::new("api", "GET /x\nPUT /x"),
                Facet::new("schema", json!({"ttl": 30, "keys": ["a", "<b>"]})),
                Facet::new("notes", "a < b && \"quoted\""),
                Facet::new("api", "DELETE /x"),
            ],
        }),
        constraints: Some(Constraints {
            os: Some("linux".into()),
            distro: None,
            arch: Some("arm64".into()),
            resources: Some(resources),
            ports: Some(vec![
                PortMapping { external: "80".into(), internal: "8080".into() },
                PortMapping { external: "443".into(), internal: "8443".into() },
            ]),
            services: Some(vec![Service { name: "redis".into(), attributes }]),
        }),
        requires: Some(vec![
            Dependency {
                fqn: Fqn::new("platform:svc:db"),
                facets: Some(vec!["api".into(), "events".into()]),
                usage: Some("reads & writes".into()),
                config: Some(config),
            },
            Dependency::new("platform:svc:auth"),
        ]),
        implementation: Some(Implementation {
            target: Some("rust".into()),
            framework: Some("tokio".into()),
            content: Some(Content::from("fn main() {\n    serve();\n}")),
        }),
    }
}

#[test]
fn test_full_model_round_trips() {
    let model = full_model();
    let decoded = decode(&encode(&model)).unwrap();
    assert_eq!(decoded, model);
}

#[test]
fn test_encode_is_idempotent() {
    let first = encode(&full_model());
    let second = encode(&decode(&first).unwrap());
    assert_eq!(first, second);
}

#[test]
fn test_facet_and_dependency_order_preserved() {
    let decoded = decode(&encode(&full_model())).unwrap();
    let kinds: Vec<&str> = decoded
        .interface
        .as_ref()
        .unwrap()
        .facets
        .iter()
        .map(|f| f.kind.as_str())
        .collect();
    assert_eq!(kinds, ["api", "schema", "notes", "api"]);

    let deps: Vec<&str> = decoded
        .requires
        .as_ref()
        .unwrap()
        .iter()
        .map(|d| d.fqn.raw())
        .collect();
    assert_eq!(deps, ["platform:svc:db", "platform:svc:auth"]);
}

#[test]
fn test_absence_round_trips_as_absence() {
    let bare = ComponentModel {
        fqn: Fqn::new("bare"),
        name: "bare".into(),
        file: String::new(),
        interface: None,
        constraints: None,
        requires: None,
        implementation: None,
    };
    assert_eq!(decode(&encode(&bare)).unwrap(), bare);

    let mut declared = ComponentModel::blank("declared", "");
    declared.implementation = Some(Implementation::default());
    assert_eq!(decode(&encode(&declared)).unwrap(), declared);
}

#[test]
fn test_cache_scenario() {
    let model = ComponentModel {
        fqn: Fqn::new("svc:cache"),
        name: "cache".into(),
        file: String::new(),
        interface: Some(Interface {
            facets: vec![Facet::new("api", "GET /x")],
            ..Interface::default()
        }),
        constraints: None,
        requires: None,
        implementation: None,
    };
    let text = encode(&model);
    assert!(text.contains("<interface>"));
    assert_eq!(text.matches("<facet ").count(), 1);
    assert!(text.contains("<facet type=\"api\">GET /x</facet>"));
    assert_eq!(decode(&text).unwrap(), model);
}

#[test]
fn test_wire_json_round_trip() {
    let model = full_model();
    let json = serde_json::to_string(&model).unwrap();
    let back: ComponentModel = serde_json::from_str(&json).unwrap();
    assert_eq!(back, model);
}

fn text() -> impl Strategy<Value = String> {
    prop_oneof![
        r"[ -~\t\n]{0,24}",
        r"[ \t\n]*[\[{][ -~]{0,12}",
        Just("{\"ttl\": 30}".to_string()),
    ]
}

fn ident() -> impl Strategy<Value = String> {
    r"[a-z][a-z0-9-]{0,6}"
}

fn json_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        text().prop_map(Value::from),
        vec(text(), 0..3).prop_map(Value::from),
        btree_map(ident(), any::<i32>(), 0..3).prop_map(|map| json!(map)),
    ]
}

fn content() -> impl Strategy<Value = Content> {
    prop_oneof![
        text().prop_map(Content::Text),
        json_value().prop_map(Content::Structured),
    ]
}

fn interface() -> impl Strategy<Value = Interface> {
    let facet = (text(), content()).prop_map(|(kind, content)| Facet { kind, content });
    (option::of(text()), option::of(text()), vec(facet, 0..4)).prop_map(
        |(implements, extends, facets)| Interface {
            implements,
            extends,
            facets,
        },
    )
}

fn constraints() -> impl Strategy<Value = Constraints> {
    let resource_key = (ident(), ident()).prop_map(|(tag, attr)| format!("{tag}.{attr}"));
    let port = (text(), text()).prop_map(|(external, internal)| PortMapping { external, internal });
    let service = (ident(), btree_map(ident(), text(), 0..3))
        .prop_map(|(name, attributes)| Service { name, attributes });
    (
        option::of(text()),
        option::of(text()),
        option::of(text()),
        option::of(btree_map(resource_key, text(), 0..4)),
        option::of(vec(port, 0..3)),
        option::of(vec(service, 0..3)),
    )
        .prop_map(|(os, distro, arch, resources, ports, services)| Constraints {
            os,
            distro,
            arch,
            resources,
            ports,
            services,
        })
}

fn dependency() -> impl Strategy<Value = Dependency> {
    (
        text(),
        option::of(vec(text(), 0..3)),
        option::of(text()),
        option::of(btree_map(ident(), content(), 0..3)),
    )
        .prop_map(|(fqn, facets, usage, config)| Dependency {
            fqn: Fqn::new(fqn),
            facets,
            usage,
            config,
        })
}

fn implementation() -> impl Strategy<Value = Implementation> {
    (option::of(text()), option::of(text()), option::of(content())).prop_map(
        |(target, framework, content)| Implementation {
            target,
            framework,
            content,
        },
    )
}

fn component() -> impl Strategy<Value = ComponentModel> {
    (
        r"[ -~]{1,12}",
        text(),
        option::of(interface()),
        option::of(constraints()),
        option::of(vec(dependency(), 0..3)),
        option::of(implementation()),
    )
        .prop_map(
            |(name, fqn, interface, constraints, requires, implementation)| ComponentModel {
                fqn: Fqn::new(fqn),
                name,
                file: String::new(),
                interface,
                constraints,
                requires,
                implementation,
            },
        )
}

proptest! {
    #[test]
    fn prop_parsed_models_round_trip(model in component()) {
        // Anything the decoder returns is a model a document can hold.
        let parsed = decode(&encode(&model)).unwrap();
        let text = encode(&parsed);
        let reparsed = decode(&text).unwrap();
        prop_assert_eq!(&reparsed, &parsed);
        prop_assert_eq!(encode(&reparsed), text);
    }

    #[test]
    fn prop_raw_values_survive_decode(value in text()) {
        let document = format!(
            "<component name=\"x\">\n  <interface>\n    <facet type=\"t\">{}</facet>\n  </interface>\n  \
             <requires>\n    <dependency fqn=\"d\" k=\"{}\" />\n  </requires>\n</component>\n",
            partial_escape(&value),
            escape(&value),
        );
        let model = decode(&document).unwrap();

        let facets = &model.interface.as_ref().unwrap().facets;
        prop_assert_eq!(&facets[0].content, &Content::interpret(value.trim().to_string()));
        let config = model.requires.as_ref().unwrap()[0].config.as_ref().unwrap();
        prop_assert_eq!(&config["k"], &Content::interpret(value.clone()));

        prop_assert_eq!(decode(&encode(&model)).unwrap(), model);
    }
}
