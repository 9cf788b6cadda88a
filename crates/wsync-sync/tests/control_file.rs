use std::path::PathBuf;

use wsync_adapters::{lister_for_config, UnitSourceConfig};
use wsync_sql::dialect::Postgres;
use wsync_sync::{plan_pipeline, ControlStore, YamlControlStore};

fn control_file() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/pipelines.yaml")
}

#[test]
fn shipped_control_file_is_valid() {
    let store = YamlControlStore::load(control_file()).expect("control file");
    assert_eq!(store.pipelines().len(), 2);
    for pipeline in store.pipelines() {
        pipeline.validate().expect("valid pipeline");
        assert!(!plan_pipeline(pipeline, &Postgres).expect("plan").is_empty());
    }

    let players = store
        .lookup("tennis-warehouse.tennisabstract.players")
        .expect("players pipeline");
    assert_eq!(players.temp.dataset, "scratch");
    assert_eq!(players.temp.project.as_deref(), Some("tennis-warehouse"));
    assert_eq!(players.batch_size, Some(250));

    let tournaments = store.lookup("tennisabstract.tournaments").expect("tournaments");
    assert_eq!(tournaments.retries, 5);
    assert_eq!(players.retries, 3);
}

#[tokio::test]
async fn shipped_unit_file_lists_player_urls() {
    let store = YamlControlStore::load(control_file()).expect("control file");
    let players = store
        .lookup("tennisabstract.players")
        .expect("players pipeline");
    assert!(matches!(players.units, UnitSourceConfig::NdjsonFile { .. }));

    let units = lister_for_config(&players.units).list_units().await.expect("units");
    assert_eq!(units.len(), 3);
    assert!(units.iter().all(|u| u.handle.starts_with("https://")));
    assert!(units[0].metadata.contains_key("player_name"));
}
