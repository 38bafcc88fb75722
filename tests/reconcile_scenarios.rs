//! End-to-end reconcile scenarios against the in-memory Data Plane

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{StaticJobChecks, default_harness, event, harness, instance, wait_for};
use haproxy_nomad_bridge::dispatch::EventReport;
use haproxy_nomad_bridge::haproxy::{Backend, Balance, Server};
use haproxy_nomad_bridge::nomad::{JobCheck, event_types};
use haproxy_nomad_bridge::reconcile::{DeregistrationMethod, Outcome, naming};
use haproxy_nomad_bridge::sync;

#[tokio::test]
async fn fresh_dynamic_registration_with_http_check_tag() {
    let h = default_harness();

    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance(
                "test-api",
                "192.168.1.100",
                8080,
                "",
                &[
                    "haproxy.enable=true",
                    "haproxy.backend=dynamic",
                    "haproxy.check.path=/health",
                ],
            ),
        ))
        .await
        .unwrap();

    let EventReport::Registered(report) = report else {
        panic!("expected registration, got {report:?}");
    };
    assert_eq!(report.backend, "test_api");
    assert_eq!(report.backend_outcome, Outcome::Created);
    assert_eq!(report.server_outcome, Outcome::Created);
    assert_eq!(report.rule_outcome, None);

    let backend = h.api.get_backend("test_api").unwrap();
    assert_eq!(backend.algorithm(), "roundrobin");
    assert_eq!(backend.adv_check, "httpchk");
    let params = backend.http_check_params.unwrap();
    assert_eq!(params.uri, "/health");
    assert_eq!(params.method, "GET");
    assert_eq!(
        backend.default_server.unwrap().check.as_deref(),
        Some("enabled")
    );

    let servers = h.api.get_servers("test_api");
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name, "test_api_192_168_1_100_8080");
    assert_eq!(servers[0].address, "192.168.1.100");
    assert_eq!(servers[0].port, Some(8080));
    assert_eq!(servers[0].check.as_deref(), Some("enabled"));

    // No domain tag, no frontend rule
    assert!(h.api.get_acls().is_empty());
    assert!(h.api.get_rules().is_empty());
}

#[tokio::test]
async fn domain_tag_creates_frontend_rule() {
    let h = default_harness();

    h.dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance(
                "crm-prod",
                "10.1.2.3",
                9000,
                "",
                &["haproxy.enable=true", "haproxy.domain=crm.example.net"],
            ),
        ))
        .await
        .unwrap();

    // Domain fallback check: HTTP probe of / with the domain as Host header
    let backend = h.api.get_backend("crm_prod").unwrap();
    assert_eq!(backend.adv_check, "httpchk");
    let params = backend.http_check_params.unwrap();
    assert_eq!(params.uri, "/");
    assert_eq!(params.host.as_deref(), Some("crm.example.net"));

    let acls = h.api.get_acls();
    assert_eq!(acls.len(), 1);
    let expected_name = naming::acl_name("crm_prod", "crm.example.net");
    assert!(expected_name.starts_with("is_crm_prod_"));
    assert_eq!(acls[0].acl_name, expected_name);
    assert_eq!(acls[0].criterion, "hdr(host)");
    assert_eq!(acls[0].value, "crm.example.net");

    let rules = h.api.get_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].cond, "if");
    assert_eq!(rules[0].cond_test, expected_name);
    assert_eq!(rules[0].name, "crm_prod");
}

#[tokio::test]
async fn misconfigured_preexisting_backend_is_repaired() {
    let h = default_harness();

    // Roundrobin backend left behind with no check configuration
    h.api.seed_backend(Backend {
        name: "svc".to_string(),
        balance: Some(Balance::round_robin()),
        ..Backend::default()
    });

    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance(
                "svc",
                "10.0.0.1",
                80,
                "",
                &["haproxy.enable=true", "haproxy.check.path=/healthcheck"],
            ),
        ))
        .await
        .unwrap();

    let EventReport::Registered(report) = report else {
        panic!("expected registration, got {report:?}");
    };
    assert_eq!(report.backend_outcome, Outcome::Updated);

    // Repaired in place: no second backend
    assert_eq!(h.api.backend_names(), vec!["svc".to_string()]);
    let backend = h.api.get_backend("svc").unwrap();
    assert_eq!(backend.adv_check, "httpchk");
    assert_eq!(backend.http_check_params.unwrap().uri, "/healthcheck");
    assert_eq!(
        backend.default_server.unwrap().check.as_deref(),
        Some("enabled")
    );
}

#[tokio::test]
async fn check_priority_ladder_end_to_end() {
    let jobs = Arc::new(StaticJobChecks::new().with(
        "web-job",
        "web",
        JobCheck {
            check_type: "http".to_string(),
            path: "/jobhealth".to_string(),
            method: String::new(),
        },
    ));

    // Explicit tag wins over the job check and the domain fallback
    let h = harness(Duration::from_millis(50), jobs.clone());
    h.dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance(
                "web",
                "10.0.0.1",
                80,
                "web-job",
                &[
                    "haproxy.enable=true",
                    "haproxy.domain=x.example",
                    "haproxy.check.path=/api/health",
                ],
            ),
        ))
        .await
        .unwrap();
    assert_eq!(
        h.api
            .get_backend("web")
            .unwrap()
            .http_check_params
            .unwrap()
            .uri,
        "/api/health"
    );

    // Without the explicit tag the job check wins
    let h = harness(Duration::from_millis(50), jobs);
    h.dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance(
                "web",
                "10.0.0.1",
                80,
                "web-job",
                &["haproxy.enable=true", "haproxy.domain=x.example"],
            ),
        ))
        .await
        .unwrap();
    assert_eq!(
        h.api
            .get_backend("web")
            .unwrap()
            .http_check_params
            .unwrap()
            .uri,
        "/jobhealth"
    );

    // Without the job check the domain fallback probes /
    let h = default_harness();
    h.dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance(
                "web",
                "10.0.0.1",
                80,
                "web-job",
                &["haproxy.enable=true", "haproxy.domain=x.example"],
            ),
        ))
        .await
        .unwrap();
    let params = h
        .api
        .get_backend("web")
        .unwrap()
        .http_check_params
        .unwrap();
    assert_eq!(params.uri, "/");
    assert_eq!(params.host.as_deref(), Some("x.example"));
}

#[tokio::test]
async fn canary_deregistration_preserves_rule() {
    let h = default_harness();
    let tags = ["haproxy.enable=true", "haproxy.domain=svc.example"];

    for address in ["10.0.0.1", "10.0.0.2"] {
        h.dispatcher
            .process(&event(
                event_types::SERVICE_REGISTRATION,
                instance("svc", address, 80, "", &tags),
            ))
            .await
            .unwrap();
    }
    assert_eq!(h.api.get_servers("svc").len(), 2);
    assert_eq!(h.api.get_rules().len(), 1);

    // Deregister one of the two instances
    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_DEREGISTRATION,
            instance("svc", "10.0.0.1", 80, "", &tags),
        ))
        .await
        .unwrap();

    let EventReport::Deregistered(report) = report else {
        panic!("expected deregistration, got {report:?}");
    };
    assert_eq!(report.outcome, Outcome::Draining);
    assert_eq!(report.method, DeregistrationMethod::GracefulDrain);
    assert_eq!(
        h.api.admin_state("svc", "svc_10_0_0_1_80").as_deref(),
        Some("drain")
    );

    // After the drain timeout the server is gone, its peer remains
    let api = h.api.clone();
    wait_for("drained server deletion", move || {
        api.get_servers("svc").len() == 1
    })
    .await;

    let servers = h.api.get_servers("svc");
    assert_eq!(servers[0].name, "svc_10_0_0_2_80");
    // The canary invariant: one live server left, the rule stays
    assert_eq!(h.api.get_rules().len(), 1);
    assert_eq!(h.api.get_rules()[0].name, "svc");
}

#[tokio::test]
async fn last_server_deregistration_removes_rule() {
    let h = default_harness();
    let tags = ["haproxy.enable=true", "haproxy.domain=solo.example"];

    h.dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance("solo", "10.0.0.1", 80, "", &tags),
        ))
        .await
        .unwrap();
    assert_eq!(h.api.get_rules().len(), 1);

    h.dispatcher
        .process(&event(
            event_types::SERVICE_DEREGISTRATION,
            instance("solo", "10.0.0.1", 80, "", &tags),
        ))
        .await
        .unwrap();

    let api = h.api.clone();
    wait_for("server and rule removal", move || {
        api.get_servers("solo").is_empty() && api.get_rules().is_empty()
    })
    .await;
    assert!(h.api.get_acls().is_empty());
}

#[tokio::test]
async fn sweeper_removes_orphans_but_not_unknown_backends() {
    let h = default_harness();

    // Proxy state: one backend with a live and a stale server, plus an
    // operator-managed backend the orchestrator knows nothing about
    h.api.seed_backend(Backend {
        name: "svc".to_string(),
        balance: Some(Balance::round_robin()),
        ..Backend::default()
    });
    h.api.seed_server(
        "svc",
        Server {
            name: "svc_10_0_0_1_80".to_string(),
            address: "10.0.0.1".to_string(),
            port: Some(80),
            check: Some("enabled".to_string()),
        },
    );
    h.api.seed_server(
        "svc",
        Server {
            name: "svc_10_0_0_2_80".to_string(),
            address: "10.0.0.2".to_string(),
            port: Some(80),
            check: Some("enabled".to_string()),
        },
    );
    h.api.seed_backend(Backend {
        name: "static_backend".to_string(),
        balance: Some(Balance {
            algorithm: "leastconn".to_string(),
        }),
        ..Backend::default()
    });
    h.api.seed_server(
        "static_backend",
        Server {
            name: "legacy_1".to_string(),
            address: "192.168.0.9".to_string(),
            port: Some(8080),
            check: None,
        },
    );

    let report = sync::run(
        &h.dispatcher,
        vec![instance("svc", "10.0.0.1", 80, "", &["haproxy.enable=true"])],
    )
    .await;

    assert_eq!(report.replayed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.swept, vec!["svc/svc_10_0_0_2_80".to_string()]);

    let names: Vec<String> = h
        .api
        .get_servers("svc")
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["svc_10_0_0_1_80".to_string()]);

    // Operator-managed backend untouched
    assert_eq!(h.api.get_servers("static_backend").len(), 1);
}

#[tokio::test]
async fn custom_backend_skips_pool_but_keeps_server_and_rule() {
    let h = default_harness();

    // Operator-managed pool with its own balancing policy
    h.api.seed_backend(Backend {
        name: "legacy_pool".to_string(),
        balance: Some(Balance {
            algorithm: "leastconn".to_string(),
        }),
        ..Backend::default()
    });

    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance(
                "legacy-pool",
                "10.9.9.9",
                7000,
                "",
                &[
                    "haproxy.enable=true",
                    "haproxy.backend=custom",
                    "haproxy.domain=legacy.example",
                ],
            ),
        ))
        .await
        .unwrap();

    let EventReport::Registered(report) = report else {
        panic!("expected registration, got {report:?}");
    };
    assert!(matches!(report.backend_outcome, Outcome::Skipped { .. }));
    assert_eq!(report.server_outcome, Outcome::Created);
    assert_eq!(report.rule_outcome, Some(Outcome::Created));

    // The pool's own configuration is untouched
    let backend = h.api.get_backend("legacy_pool").unwrap();
    assert_eq!(backend.algorithm(), "leastconn");
    assert_eq!(backend.adv_check, "");

    assert_eq!(h.api.get_servers("legacy_pool").len(), 1);
    assert_eq!(h.api.get_rules()[0].name, "legacy_pool");
}

#[tokio::test]
async fn incompatible_backend_fails_event_but_not_dispatcher() {
    let h = default_harness();

    h.api.seed_backend(Backend {
        name: "svc".to_string(),
        balance: Some(Balance {
            algorithm: "leastconn".to_string(),
        }),
        ..Backend::default()
    });

    let result = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance("svc", "10.0.0.1", 80, "", &["haproxy.enable=true"]),
        ))
        .await;
    assert!(result.is_err());
    assert_eq!(h.metrics.snapshot().errors, 1);

    // The next event proceeds normally
    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance("other", "10.0.0.2", 80, "", &["haproxy.enable=true"]),
        ))
        .await
        .unwrap();
    assert!(matches!(report, EventReport::Registered(_)));
    assert_eq!(h.metrics.snapshot().processed_events, 2);
}

#[tokio::test]
async fn events_without_service_payload_are_skipped() {
    let h = default_harness();

    let mut node_event = event(
        event_types::NODE_EVENT,
        instance("x", "10.0.0.1", 80, "", &[]),
    );
    node_event.payload = None;

    let report = h.dispatcher.process(&node_event).await.unwrap();
    assert!(matches!(report, EventReport::Skipped { .. }));

    let mut off_topic = event(
        event_types::SERVICE_REGISTRATION,
        instance("x", "10.0.0.1", 80, "", &["haproxy.enable=true"]),
    );
    off_topic.topic = "Node".to_string();
    let report = h.dispatcher.process(&off_topic).await.unwrap();
    assert!(matches!(report, EventReport::Skipped { .. }));

    let unknown = event(
        "PlanResult",
        instance("x", "10.0.0.1", 80, "", &["haproxy.enable=true"]),
    );
    let report = h.dispatcher.process(&unknown).await.unwrap();
    assert_eq!(
        report,
        EventReport::Skipped {
            reason: "unknown event type".to_string()
        }
    );

    // Nothing was written
    assert!(h.api.backend_names().is_empty());
}

#[tokio::test]
async fn untagged_service_is_ignored() {
    let h = default_harness();

    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance("plain", "10.0.0.1", 80, "", &["some=tag"]),
        ))
        .await
        .unwrap();

    assert!(matches!(report, EventReport::Ignored { .. }));
    assert!(h.api.backend_names().is_empty());
}

#[tokio::test]
async fn drain_failure_downgrades_to_immediate_deletion() {
    let h = default_harness();
    let tags = ["haproxy.enable=true", "haproxy.domain=svc.example"];

    h.dispatcher
        .process(&event(
            event_types::SERVICE_REGISTRATION,
            instance("svc", "10.0.0.1", 80, "", &tags),
        ))
        .await
        .unwrap();

    h.api.fail_drain(true);
    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_DEREGISTRATION,
            instance("svc", "10.0.0.1", 80, "", &tags),
        ))
        .await
        .unwrap();

    let EventReport::Deregistered(report) = report else {
        panic!("expected deregistration, got {report:?}");
    };
    assert_eq!(report.outcome, Outcome::Deleted);
    assert_eq!(report.method, DeregistrationMethod::ImmediateDeletion);

    // No drain window: server and rule are gone synchronously
    assert!(h.api.get_servers("svc").is_empty());
    assert!(h.api.get_rules().is_empty());
}

#[tokio::test]
async fn deregistration_for_unknown_service_is_harmless() {
    let h = default_harness();

    let report = h
        .dispatcher
        .process(&event(
            event_types::SERVICE_DEREGISTRATION,
            instance("ghost", "10.0.0.1", 80, "", &[]),
        ))
        .await
        .unwrap();

    // Runtime drain fails (no such server), the immediate delete finds
    // nothing, and the event completes without error
    let EventReport::Deregistered(report) = report else {
        panic!("expected deregistration, got {report:?}");
    };
    assert_eq!(report.method, DeregistrationMethod::ImmediateDeletion);
    assert!(matches!(report.outcome, Outcome::Skipped { .. }));
}
