//! End-to-end processor tests
//!
//! Drive full LNS envelopes through the processor with a fixture decoder and
//! check the flat outputs and the write payload the historian would receive.

mod test_helpers;

use lora_bridge::decoder::{Decoder, DecoderError, FixtureDecoder};
use lora_bridge::error::BridgeError;
use lora_bridge::processing::{PathResolver, Processor, PropertyMapping};
use lora_bridge::protocol::messages::FlatOutput;
use lora_bridge::testing::mocks::RecordingDecoder;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use test_helpers::{decoded_valve, uplink, valve_config};

fn by_sensor(outputs: &[FlatOutput]) -> HashMap<String, FlatOutput> {
    outputs
        .iter()
        .map(|o| (o.sensor.clone(), o.clone()))
        .collect()
}

fn valve_processor(decoder: Arc<dyn Decoder>) -> Processor {
    let config = valve_config();
    let mut tags = HashMap::new();
    tags.insert("valve-7-OPEN".to_string(), "TAG-OPEN".to_string());
    tags.insert("valve-7-CLOSED".to_string(), "TAG-CLOSED".to_string());

    Processor::new(decoder, PropertyMapping::from_config(&config))
        .with_resolver(PathResolver::with_aliases(&config.field_aliases))
        .with_write_tags(tags)
}

#[tokio::test]
async fn test_valve_uplink_produces_flat_outputs() {
    // Arrange
    let processor = valve_processor(Arc::new(FixtureDecoder::new(decoded_valve())));

    // Act
    let result = processor
        .handle_message(&uplink("valve-7", "70B3D5", "AQI="))
        .await
        .unwrap();

    // Assert
    assert_eq!(result.base_name, "valve-7");
    assert_eq!(result.dev_eui, "70B3D5");
    assert_eq!(result.outputs.len(), 3, "MISSING path must be skipped");

    let outputs = by_sensor(&result.outputs);
    let open = &outputs["valve-7-OPEN"];
    assert_eq!(open.value, json!(true));
    assert!(open.status);
    assert_eq!(open.start_time, "05-Jan-2024 13:45:02 GMT");

    let closed = &outputs["valve-7-CLOSED"];
    assert_eq!(closed.value, json!(false));
    assert!(!closed.status, "literal status override wins");

    let battery = &outputs["valve-7-BATTERY"];
    assert_eq!(battery.value, json!(87.5));
    assert!(!battery.status, "status path resolving to 0 is false");
    assert_eq!(battery.start_time, "05-Jan-2024 12:00:00 GMT");
}

#[tokio::test]
async fn test_write_payload_skips_false_status_and_untagged_outputs() {
    let processor = valve_processor(Arc::new(FixtureDecoder::new(decoded_valve())));

    let result = processor
        .handle_message(&uplink("valve-7", "70B3D5", "AQI="))
        .await
        .unwrap();

    let write = result.write_payload.expect("OPEN qualifies");
    assert_eq!(write.status, "W");
    assert_eq!(write.tags.len(), 1);
    assert_eq!(write.tags[0].tag_id, "TAG-OPEN");
    assert_eq!(write.tags[0].sensor_id, "valve-7-OPEN");
    assert_eq!(write.tags[0].historian_id, "70B3D5");
    assert_eq!(write.tags[0].value, json!(true));
}

#[tokio::test]
async fn test_flat_output_wire_shape() {
    let processor = valve_processor(Arc::new(FixtureDecoder::new(decoded_valve())));
    let result = processor
        .handle_message(&uplink("valve-7", "70B3D5", "AQI="))
        .await
        .unwrap();
    let open = by_sensor(&result.outputs)["valve-7-OPEN"].clone();

    let wire = serde_json::to_value(&open).unwrap();

    assert_eq!(
        wire,
        json!({
            "value": true,
            "status": true,
            "sensor": "valve-7-OPEN",
            "starttime": "05-Jan-2024 13:45:02 GMT"
        })
    );
}

#[tokio::test]
async fn test_decoder_receives_device_name_and_hex() {
    let decoder = Arc::new(RecordingDecoder::returning(decoded_valve()));
    let processor = valve_processor(decoder.clone());

    processor
        .handle_message(&uplink("valve-7", "70B3D5", "3q2+7w=="))
        .await
        .unwrap();

    assert_eq!(
        decoder.calls().await,
        vec![("valve-7".to_string(), "deadbeef".to_string())]
    );
}

#[tokio::test]
async fn test_malformed_envelope_is_decode_error() {
    let decoder = Arc::new(RecordingDecoder::returning(decoded_valve()));
    let processor = valve_processor(decoder.clone());

    let result = processor.handle_message(b"{not json").await;

    assert!(matches!(result, Err(BridgeError::Decode(_))));
    assert!(decoder.calls().await.is_empty());
}

#[tokio::test]
async fn test_missing_identity_is_validation_error() {
    let decoder = Arc::new(RecordingDecoder::returning(decoded_valve()));
    let processor = valve_processor(decoder.clone());

    for raw in [
        uplink("", "70B3D5", "AQI="),
        uplink("valve-7", "", "AQI="),
        uplink("valve-7", "70B3D5", ""),
    ] {
        let result = processor.handle_message(&raw).await;
        assert!(
            matches!(result, Err(BridgeError::Validation { .. })),
            "expected validation error, got {result:?}"
        );
    }
    assert!(decoder.calls().await.is_empty());
}

#[tokio::test]
async fn test_decoder_failure_propagates_as_api_error() {
    let processor = valve_processor(Arc::new(RecordingDecoder::failing(DecoderError::Http {
        status: 502,
        body: "bad gateway".to_string(),
    })));

    let result = processor
        .handle_message(&uplink("valve-7", "70B3D5", "AQI="))
        .await;

    assert!(matches!(
        result,
        Err(BridgeError::Api(DecoderError::Http { status: 502, .. }))
    ));
}

#[tokio::test]
async fn test_no_resolvable_paths_yields_empty_outputs() {
    let processor = valve_processor(Arc::new(FixtureDecoder::new(json!({"unrelated": 1}))));

    let result = processor
        .handle_message(&uplink("valve-7", "70B3D5", "AQI="))
        .await
        .unwrap();

    assert!(result.outputs.is_empty());
    assert!(result.write_payload.is_none());
}

#[tokio::test]
async fn test_concurrent_messages_are_independent() {
    let processor = Arc::new(valve_processor(Arc::new(FixtureDecoder::new(
        decoded_valve(),
    ))));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                processor
                    .handle_message(&uplink(&format!("valve-{i}"), "70B3D5", "AQI="))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.base_name, format!("valve-{i}"));
        assert!(result
            .outputs
            .iter()
            .all(|o| o.sensor.starts_with(&format!("valve-{i}-"))));
    }
}
