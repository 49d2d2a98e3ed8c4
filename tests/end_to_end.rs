mod common;

use common::{spawn_server, Event, Recorder};
use relaylink_core::{
    cli::BuiltinProcessor, config::ClientSettings, proto::linkage_client::LinkageClient,
    BusinessMessage, ErrorType, GrpcRpcClient, Link, Message, ServiceEndpoint, ServiceInfo,
    StaticLocator, StepPattern,
};
use std::sync::Arc;

/// Starts a link that forwards `abc@1.0.0` to `downstream` and registers with
/// `sidecar`.
async fn spawn_link(
    processor: BuiltinProcessor,
    downstream: &ServiceEndpoint,
    sidecar: &ServiceEndpoint,
) -> ServiceEndpoint {
    let link = Link::builder("enricher", "1.0.0", "test link", processor)
        .with_client(Arc::new(GrpcRpcClient::new(ClientSettings::default())))
        .with_locator(Arc::new(
            StaticLocator::new()
                .with_route("abc", "1.0.0", downstream.clone())
                .with_fallback(sidecar.clone()),
        ))
        .with_advertised_endpoint(ServiceEndpoint::new("127.0.0.1", 7000))
        .build()
        .unwrap();
    spawn_server(Arc::new(link).relay_server()).await
}

fn envelope() -> Message {
    Message {
        id: "a".to_string(),
        parent_id: "origin".to_string(),
        pattern: Some(StepPattern::new("abc", "1.0.0")),
        business_message: Some(BusinessMessage::from_body("test")),
        consumption_id: "100".to_string(),
        ..Default::default()
    }
}

async fn relay_one(link: &ServiceEndpoint, message: Message) {
    let mut client = LinkageClient::connect(link.uri()).await.unwrap();
    let mut receipts = client
        .relay(tokio_stream::iter(vec![message]))
        .await
        .unwrap()
        .into_inner();
    while let Some(receipt) = receipts.message().await.unwrap() {
        assert!(receipt.is_ok);
    }
}

#[tokio::test]
async fn test_passthrough_hop() {
    let downstream = Recorder::default();
    let downstream_endpoint = spawn_server(downstream.server("abc")).await;
    let sidecar = Recorder::default();
    let sidecar_endpoint = spawn_server(sidecar.server("sidecar")).await;
    let link = spawn_link(BuiltinProcessor::Passthrough, &downstream_endpoint, &sidecar_endpoint).await;

    relay_one(&link, envelope()).await;

    let events = downstream.wait_for(1).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Complete(msg) => {
            assert_ne!(msg.id, "a");
            assert_eq!(msg.parent_id, "a");
            assert_eq!(msg.consumption_id, "100");
            assert_eq!(msg.pattern, Some(StepPattern::new("abc", "1.0.0")));
            assert_eq!(msg.business_message.as_ref().unwrap().body(), b"test");
            assert_eq!(msg.error_type(), ErrorType::None);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(sidecar.events().is_empty());
}

#[tokio::test]
async fn test_failing_hop_forwards_flagged_source() {
    let downstream = Recorder::default();
    let downstream_endpoint = spawn_server(downstream.server("abc")).await;
    let sidecar = Recorder::default();
    let sidecar_endpoint = spawn_server(sidecar.server("sidecar")).await;
    let link = spawn_link(BuiltinProcessor::Fail, &downstream_endpoint, &sidecar_endpoint).await;

    relay_one(&link, envelope()).await;

    let events = downstream.wait_for(1).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Complete(msg) => {
            assert_eq!(msg.id, "a");
            assert_eq!(msg.parent_id, "origin");
            assert_eq!(msg.consumption_id, "100");
            assert_eq!(msg.error_type(), ErrorType::Processing);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_registration_is_forwarded_to_sidecar() {
    let downstream = Recorder::default();
    let downstream_endpoint = spawn_server(downstream.server("abc")).await;
    let sidecar = Recorder::default();
    let sidecar_endpoint = spawn_server(sidecar.server("sidecar")).await;
    let link = spawn_link(BuiltinProcessor::Passthrough, &downstream_endpoint, &sidecar_endpoint).await;

    let mut client = LinkageClient::connect(link.uri()).await.unwrap();
    let receipt = client
        .registration(ServiceInfo::new("sidecar", "1.0.0"))
        .await
        .unwrap()
        .into_inner();
    assert!(receipt.is_ok, "registration failed: {}", receipt.error);

    match sidecar.wait_for(1).await.as_slice() {
        [Event::Registration(info)] => {
            assert_eq!(info.service_name, "enricher");
            assert_eq!(info.service_version, "1.0.0");
            assert_eq!(info.service_description, "test link");
            assert_eq!(info.service_port, 7000);
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[tokio::test]
async fn test_registration_with_unreachable_sidecar_is_rejected() {
    let downstream = Recorder::default();
    let downstream_endpoint = spawn_server(downstream.server("abc")).await;
    // nothing listens on port 1
    let sidecar_endpoint = ServiceEndpoint::new("127.0.0.1", 1);
    let link = spawn_link(BuiltinProcessor::Passthrough, &downstream_endpoint, &sidecar_endpoint).await;

    let mut client = LinkageClient::connect(link.uri()).await.unwrap();
    let receipt = client
        .registration(ServiceInfo::new("sidecar", "1.0.0"))
        .await
        .unwrap()
        .into_inner();

    assert!(!receipt.is_ok);
    assert!(!receipt.error.is_empty());
}
