mod common;

use battery_controller::{DeviceReader, ReadError, DEFAULT_READ_MODELS};
use common::FakeModels;
use sunspec_client::SunSpecError;
use types::SnapshotValue;

#[tokio::test]
async fn refreshes_allow_listed_models_and_drops_null_points() {
    let mut models = FakeModels::default()
        .with_device_model("inList", &[("A", Some(SnapshotValue::Integer(1)))])
        .with_cached_model("notInList", &[("B", None)]);
    let reader = DeviceReader::new(vec!["inList".to_string()]);

    let snapshot = reader.read_snapshot(&mut models).await.expect("snapshot");

    assert_eq!(models.refreshed, vec!["inList"]);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot["inList"]["A"], SnapshotValue::Integer(1));
    assert_eq!(
        serde_json::to_string(&snapshot).expect("json"),
        r#"{"inList":{"A":1}}"#
    );
}

#[tokio::test]
async fn cached_points_of_other_models_are_reported() {
    let mut models = FakeModels::default()
        .with_device_model("storage", &[("ChaState", Some(SnapshotValue::Float(85.3)))])
        .with_cached_model("mppt", &[("DCW", Some(SnapshotValue::Integer(1_250))), ("Evt", None)]);
    let reader = DeviceReader::default();

    let snapshot = reader.read_snapshot(&mut models).await.expect("snapshot");

    assert_eq!(models.refreshed, vec!["storage"]);
    assert_eq!(snapshot["storage"]["ChaState"], SnapshotValue::Float(85.3));
    assert_eq!(snapshot["mppt"].len(), 1);
    assert_eq!(reader.read_models().len(), DEFAULT_READ_MODELS.len());
}

#[tokio::test]
async fn refresh_failure_is_propagated() {
    let mut models = FakeModels::default()
        .with_device_model("common", &[("Mn", Some(SnapshotValue::from("SMA")))])
        .failing_on("common");

    let result = DeviceReader::default().read_snapshot(&mut models).await;

    match result {
        Err(ReadError::Refresh { model, source }) => {
            assert_eq!(model, "common");
            assert!(matches!(source, SunSpecError::Transport(_)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
