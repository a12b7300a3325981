//! Tests for instance record persistence.

use super::*;
use crate::instance::{AccessType, facts};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct StoreFixture {
    _tmp: TempDir,
    path: Utf8PathBuf,
    store: InstanceStore,
}

#[fixture]
fn store_fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("nested").join("instances.toml"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let store = InstanceStore::new(path.clone());
    StoreFixture {
        _tmp: tmp,
        path,
        store,
    }
}

fn ssh_instance() -> Instance {
    let mut instance = Instance::new("shop", AccessType::Ssh);
    instance.host = Some(String::from("web1.example.com"));
    instance.user = Some(String::from("deploy"));
    instance.port = Some(2222);
    instance.set_fact(facts::PHP, "/usr/bin/php8.1");
    instance
}

#[rstest]
fn missing_file_lists_nothing(store_fixture: StoreFixture) {
    let instances = store_fixture
        .store
        .list()
        .unwrap_or_else(|err| panic!("list: {err}"));

    assert!(instances.is_empty());
}

#[rstest]
fn save_then_get_returns_the_record(store_fixture: StoreFixture) {
    let instance = ssh_instance();

    store_fixture
        .store
        .save(&instance)
        .unwrap_or_else(|err| panic!("save: {err}"));
    let loaded = store_fixture
        .store
        .get("shop")
        .unwrap_or_else(|err| panic!("get: {err}"));

    assert_eq!(loaded, instance);
}

#[rstest]
fn records_are_written_as_named_tables(store_fixture: StoreFixture) {
    store_fixture
        .store
        .save(&ssh_instance())
        .unwrap_or_else(|err| panic!("save: {err}"));

    let contents = std::fs::read_to_string(&store_fixture.path)
        .unwrap_or_else(|err| panic!("read: {err}"));

    assert!(contents.contains("[instances.shop]"), "unexpected file: {contents}");
    assert!(contents.contains("access_type = \"ssh\""), "unexpected file: {contents}");
    assert!(!contents.contains("name = "), "name should be the table key: {contents}");
}

#[rstest]
fn downgrade_is_persisted_without_touching_other_records(store_fixture: StoreFixture) {
    let mut shop = ssh_instance();
    let blog = Instance::new("blog", AccessType::Local);
    store_fixture
        .store
        .save(&shop)
        .unwrap_or_else(|err| panic!("save shop: {err}"));
    store_fixture
        .store
        .save(&blog)
        .unwrap_or_else(|err| panic!("save blog: {err}"));

    shop.access_type = AccessType::SshNoKey;
    store_fixture
        .store
        .save(&shop)
        .unwrap_or_else(|err| panic!("resave shop: {err}"));

    let names: Vec<(String, AccessType)> = store_fixture
        .store
        .list()
        .unwrap_or_else(|err| panic!("list: {err}"))
        .into_iter()
        .map(|instance| (instance.name, instance.access_type))
        .collect();
    assert_eq!(
        names,
        vec![
            (String::from("blog"), AccessType::Local),
            (String::from("shop"), AccessType::SshNoKey),
        ]
    );
}

#[rstest]
fn remove_reports_whether_a_record_existed(store_fixture: StoreFixture) {
    store_fixture
        .store
        .save(&ssh_instance())
        .unwrap_or_else(|err| panic!("save: {err}"));

    assert_eq!(store_fixture.store.remove("shop"), Ok(true));
    assert_eq!(store_fixture.store.remove("shop"), Ok(false));
    assert!(matches!(
        store_fixture.store.get("shop"),
        Err(StoreError::NotFound { .. })
    ));
}

#[rstest]
fn malformed_section_is_reported(store_fixture: StoreFixture) {
    std::fs::create_dir_all(store_fixture.path.parent().unwrap_or_else(|| Utf8Path::new(".")))
        .unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(&store_fixture.path, "instances = 3\n")
        .unwrap_or_else(|err| panic!("write: {err}"));

    let Err(err) = store_fixture.store.list() else {
        panic!("a non-table section should fail");
    };

    assert!(
        matches!(err, StoreError::InvalidStructure { .. }),
        "unexpected error: {err}"
    );
}
