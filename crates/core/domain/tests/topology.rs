use domain::{
    ProtocolTag, RoomDescriptor, SemanticType, SensorDescriptor, Topology, TopologyError,
};
use std::time::Duration;

fn modbus_sensor(id: &str, register: u32, poll_interval_ms: u64) -> SensorDescriptor {
    SensorDescriptor {
        id: id.to_string(),
        semantic_type: SemanticType::Temperature,
        protocol: ProtocolTag::Modbus,
        address: "sim:5020".to_string(),
        object_id: None,
        register: Some(register),
        unit: "C".to_string(),
        poll_interval_ms,
    }
}

fn bacnet_sensor(id: &str, object_id: Option<u32>) -> SensorDescriptor {
    SensorDescriptor {
        id: id.to_string(),
        semantic_type: SemanticType::Humidity,
        protocol: ProtocolTag::Bacnet,
        address: "10.0.0.5".to_string(),
        object_id,
        register: None,
        unit: "%".to_string(),
        poll_interval_ms: 1000,
    }
}

fn room(id: &str, sensors: &[&str]) -> RoomDescriptor {
    RoomDescriptor {
        id: id.to_string(),
        name: format!("room {}", id),
        floor: 1,
        zone: "north".to_string(),
        sensors: sensors.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn topology_builds_reverse_index() {
    let topology = Topology::new(
        vec![room("01", &["temp-01", "hum-01"]), room("02", &["temp-02"])],
        vec![
            modbus_sensor("temp-01", 500, 500),
            bacnet_sensor("hum-01", Some(3)),
            modbus_sensor("temp-02", 501, 2000),
        ],
    )
    .expect("topology");

    assert_eq!(topology.room_of("temp-01"), Some("01"));
    assert_eq!(topology.room_of("hum-01"), Some("01"));
    assert_eq!(topology.room_of("temp-02"), Some("02"));
    assert_eq!(topology.room_of("missing"), None);
    assert_eq!(topology.sensors().len(), 3);
    assert_eq!(topology.sensor("hum-01").map(|s| s.object_id), Some(Some(3)));
}

#[test]
fn topology_rejects_sensor_in_two_rooms() {
    let err = Topology::new(
        vec![room("01", &["temp-01"]), room("02", &["temp-01"])],
        vec![modbus_sensor("temp-01", 500, 500)],
    )
    .expect_err("shared sensor");
    assert_eq!(
        err,
        TopologyError::SensorInTwoRooms {
            sensor: "temp-01".to_string(),
            first: "01".to_string(),
            second: "02".to_string(),
        }
    );
}

#[test]
fn topology_rejects_unassigned_and_unknown_sensors() {
    let err = Topology::new(vec![room("01", &[])], vec![modbus_sensor("temp-01", 500, 500)])
        .expect_err("orphan");
    assert_eq!(err, TopologyError::UnassignedSensor("temp-01".to_string()));

    let err = Topology::new(vec![room("01", &["ghost"])], Vec::new()).expect_err("unknown");
    assert!(matches!(err, TopologyError::UnknownSensor { .. }));
}

#[test]
fn topology_rejects_bad_protocol_parameters() {
    let err = Topology::new(vec![room("01", &["hum-01"])], vec![bacnet_sensor("hum-01", None)])
        .expect_err("object id");
    assert_eq!(err, TopologyError::MissingObjectId("hum-01".to_string()));

    let err = Topology::new(
        vec![room("01", &["temp-01"])],
        vec![modbus_sensor("temp-01", 70_000, 500)],
    )
    .expect_err("register range");
    assert!(matches!(err, TopologyError::RegisterOutOfRange { .. }));

    let mut zigbee = modbus_sensor("temp-01", 1, 500);
    zigbee.protocol = ProtocolTag::from("zigbee".to_string());
    let err = Topology::new(vec![room("01", &["temp-01"])], vec![zigbee]).expect_err("protocol");
    assert!(matches!(err, TopologyError::UnknownProtocol { .. }));
}

#[test]
fn telemetry_interval_uses_fastest_declared_sensor() {
    let topology = Topology::new(
        vec![room("01", &["temp-01", "temp-02", "temp-03"])],
        vec![
            modbus_sensor("temp-01", 1, 2000),
            modbus_sensor("temp-02", 2, 500),
            modbus_sensor("temp-03", 3, 0),
        ],
    )
    .expect("topology");
    assert_eq!(
        topology.telemetry_interval(Duration::from_secs(1)),
        Duration::from_millis(500)
    );

    let undeclared = Topology::new(
        vec![room("01", &["temp-03"])],
        vec![modbus_sensor("temp-03", 3, 0)],
    )
    .expect("topology");
    assert_eq!(
        undeclared.telemetry_interval(Duration::from_secs(1)),
        Duration::from_secs(1)
    );
    assert_eq!(
        undeclared.sensors()[0].poll_interval(),
        domain::DEFAULT_POLL_INTERVAL
    );
}

#[test]
fn sensor_descriptor_deserializes_protocol_tags() {
    let json = r#"{"id":"co2-01","type":"co2","protocol":"BACnet","address":"10.0.0.9","object_id":7,"unit":"ppm","poll_interval_ms":1500}"#;
    let sensor: SensorDescriptor = serde_json::from_str(json).expect("sensor");
    assert_eq!(sensor.protocol, ProtocolTag::Bacnet);
    assert_eq!(sensor.semantic_type, SemanticType::Co2);
    assert_eq!(sensor.poll_interval(), Duration::from_millis(1500));
}
