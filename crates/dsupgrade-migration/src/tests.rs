use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use dsupgrade_core::{
    parse_change_records, BuildIdentifier, ChangeRecord, ConfirmOption, ConfirmPrompt, ErrorKind,
    UpgradeError, UserInteraction,
};
use dsupgrade_installer::{BackupSet, InstallationLayout};

use super::*;

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

const CURRENT: &str = "20230101000000";

const SHIPPED_CONFIG: &str = "dn: cn=config\n\
objectClass: top\n\
objectClass: ds-cfg-root-config\n\
cn: config\n\
\n\
dn: cn=Backends,cn=config\n\
objectClass: top\n\
cn: Backends\n";

const SHIPPED_SCHEMA: &str = "dn: cn=schema\n\
objectClass: top\n\
objectClass: ldapSubentry\n\
objectClass: subschema\n\
attributeTypes: ( 1.1 NAME 'core' )\n";

fn test_root(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "dsupgrade-migration-tests-{label}-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

fn current() -> BuildIdentifier {
    BuildIdentifier::parse(CURRENT).expect("stamp parses")
}

/// Installation with shipped baselines and the given live config.
fn installation(root: &Path, live_config: &str) -> (InstallationLayout, MigrationManager) {
    let layout = InstallationLayout::combined(root);
    write(&layout.config_baseline_path(current().stamp()), SHIPPED_CONFIG);
    write(&layout.schema_baseline_path(current().stamp()), SHIPPED_SCHEMA);
    write(&layout.config_ldif_path(), live_config);
    write(&layout.schema_dir().join("00-core.ldif"), SHIPPED_SCHEMA);
    let backup = BackupSet::create(&layout, "1").expect("must create backup");
    let manager = MigrationManager::new(layout.clone(), backup);
    (layout, manager)
}

struct ScriptedInteraction {
    answers: Mutex<VecDeque<ConfirmOption>>,
    prompts: Mutex<Vec<ConfirmPrompt>>,
}

impl ScriptedInteraction {
    fn new(answers: &[ConfirmOption]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }
}

impl UserInteraction for ScriptedInteraction {
    fn confirm(&self, prompt: &ConfirmPrompt) -> ConfirmOption {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.clone());
        let answer = self.answers.lock().expect("answers lock").pop_front();
        prompt.resolve(answer)
    }
}

struct FlakyStore {
    failures_left: usize,
    applied: Vec<String>,
}

impl ConfigStore for FlakyStore {
    fn apply(&mut self, record: &ChangeRecord) -> anyhow::Result<()> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(anyhow!("server busy"));
        }
        self.applied.push(record.target.clone());
        Ok(())
    }
}

fn customized_config() -> String {
    format!(
        "{SHIPPED_CONFIG}ds-cfg-custom-x: 1\n\
\n\
dn: cn=Custom Backend,cn=Backends,cn=config\n\
objectClass: top\n\
cn: Custom Backend\n"
    )
}

#[test]
fn uncustomized_instance_writes_no_diff() {
    let root = test_root("pristine");
    let (_, mut manager) = installation(&root, SHIPPED_CONFIG);

    manager
        .detect_customizations(&current())
        .expect("check succeeds");
    assert!(!manager.schema_customized());
    assert!(!manager.config_customized());
    assert!(!manager
        .calculate_config_customizations(&current(), &LdifDiffTool)
        .expect("calculation succeeds"));
    assert!(!manager
        .calculate_schema_customizations(&current(), &LdifDiffTool)
        .expect("calculation succeeds"));
    assert!(!manager.has_config_diff());
    assert!(!manager.has_schema_diff());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn missing_baseline_is_calculation_error() {
    let root = test_root("no-baseline");
    let (layout, mut manager) = installation(&root, SHIPPED_CONFIG);
    fs::remove_file(layout.config_baseline_path(current().stamp())).expect("remove baseline");

    let err = manager
        .detect_customizations(&current())
        .expect_err("baseline is required");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::MigrationCalculation);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn config_customizations_replay_onto_upgraded_config_once() {
    let root = test_root("config-round-trip");
    let (layout, mut manager) = installation(&root, &customized_config());

    manager
        .detect_customizations(&current())
        .expect("check succeeds");
    assert!(manager.config_customized());
    assert!(manager
        .calculate_config_customizations(&current(), &LdifDiffTool)
        .expect("calculation succeeds"));

    let diff = fs::read_to_string(manager.config_diff_path()).expect("diff exists");
    let records = parse_change_records(&diff).expect("diff parses");
    assert_eq!(records.len(), 2);

    // The upgrade replaces the live config with the new build's default.
    write(&layout.config_ldif_path(), SHIPPED_CONFIG);
    let mut store = LdifFileStore::open(&layout.config_ldif_path()).expect("store opens");
    let report = manager
        .migrate_configuration(&mut store, None)
        .expect("migration succeeds");
    assert_eq!(report.applied, 2);
    assert!(report.skipped.is_empty());

    let reopened = LdifFileStore::open(&layout.config_ldif_path()).expect("store opens");
    let backends = reopened.entry("cn=Backends,cn=config").expect("backends entry");
    assert!(backends.has_value("ds-cfg-custom-x", "1"));
    assert!(reopened
        .entry("cn=custom backend, cn=backends, cn=config")
        .is_some());
    assert!(applied_marker_path(&manager.config_diff_path()).is_file());

    let again = manager
        .migrate_configuration(&mut store, None)
        .expect("second run is a no-op");
    assert!(again.already_applied);
    assert_eq!(again.applied, 0);

    fs::remove_file(applied_marker_path(&manager.config_diff_path())).expect("remove marker");
    let err = manager
        .migrate_configuration(&mut store, None)
        .expect_err("replaying without the marker is rejected");
    assert!(format!("{err:#}").contains("already present"));
    let values = LdifFileStore::open(&layout.config_ldif_path())
        .expect("store opens")
        .entry("cn=Backends,cn=config")
        .expect("backends entry")
        .values("ds-cfg-custom-x")
        .len();
    assert_eq!(values, 1);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn continue_skips_failing_record_and_applies_the_rest() {
    let root = test_root("continue");
    let (layout, manager) = installation(&root, SHIPPED_CONFIG);
    write(
        &manager.config_diff_path(),
        "dn: cn=Gone,cn=config\n\
changetype: modify\n\
add: description\n\
description: lost\n\
-\n\
\n\
dn: cn=config\n\
changetype: modify\n\
add: description\n\
description: kept\n\
-\n",
    );
    let interaction = ScriptedInteraction::new(&[ConfirmOption::Continue]);
    let mut store = LdifFileStore::open(&layout.config_ldif_path()).expect("store opens");

    let report = manager
        .migrate_configuration(&mut store, Some(&interaction))
        .expect("migration finishes");
    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].target, "cn=Gone,cn=config");
    assert!(report.warnings()[0].contains("does not exist"));
    assert_eq!(interaction.prompt_count(), 1);
    assert!(store
        .entry("cn=config")
        .expect("root entry")
        .has_value("description", "kept"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn cancel_stops_migration() {
    let root = test_root("cancel");
    let (layout, manager) = installation(&root, SHIPPED_CONFIG);
    write(
        &manager.config_diff_path(),
        "dn: cn=Gone,cn=config\nchangetype: delete\n",
    );
    let interaction = ScriptedInteraction::new(&[ConfirmOption::Cancel]);
    let mut store = LdifFileStore::open(&layout.config_ldif_path()).expect("store opens");

    let err = manager
        .migrate_configuration(&mut store, Some(&interaction))
        .expect_err("cancel aborts");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::MigrationCanceled);
    assert!(UpgradeError::is_cancellation(&err));
    assert!(!applied_marker_path(&manager.config_diff_path()).exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failure_without_interaction_propagates() {
    let root = test_root("noninteractive");
    let (_, manager) = installation(&root, SHIPPED_CONFIG);
    write(
        &manager.config_diff_path(),
        "dn: cn=x,cn=config\nchangetype: delete\n",
    );
    let mut store = FlakyStore {
        failures_left: 1,
        applied: Vec::new(),
    };

    let err = manager
        .migrate_configuration(&mut store, None)
        .expect_err("failure propagates");
    assert!(format!("{err:#}").contains("server busy"));
    assert!(store.applied.is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn retry_reapplies_the_same_record() {
    let root = test_root("retry");
    let (_, manager) = installation(&root, SHIPPED_CONFIG);
    write(
        &manager.config_diff_path(),
        "dn: cn=first,cn=config\nchangetype: delete\n\ndn: cn=second,cn=config\nchangetype: delete\n",
    );
    let interaction = ScriptedInteraction::new(&[ConfirmOption::Retry, ConfirmOption::Retry]);
    let mut store = FlakyStore {
        failures_left: 2,
        applied: Vec::new(),
    };

    let report = manager
        .migrate_configuration(&mut store, Some(&interaction))
        .expect("retries succeed");
    assert_eq!(report.applied, 2);
    assert_eq!(store.applied, vec!["cn=first,cn=config", "cn=second,cn=config"]);
    assert_eq!(interaction.prompt_count(), 2);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn schema_additions_move_into_user_schema_file() {
    let root = test_root("schema");
    let (layout, mut manager) = installation(&root, SHIPPED_CONFIG);
    write(
        &layout.user_schema_path(),
        "dn: cn=schema\nobjectClass: top\nattributeTypes: ( 1.9 NAME 'custom' )\n",
    );

    manager
        .detect_customizations(&current())
        .expect("check succeeds");
    assert!(manager.schema_customized());
    assert!(manager
        .calculate_schema_customizations(&current(), &LdifDiffTool)
        .expect("calculation succeeds"));
    assert!(!root.join("history/1/schema.current.ldif").exists());

    // New build: different core schema, no user file.
    fs::remove_file(layout.user_schema_path()).expect("remove user schema");
    write(
        &layout.schema_dir().join("00-core.ldif"),
        "dn: cn=schema\nobjectClass: top\nattributeTypes: ( 1.1 NAME 'core' )\nattributeTypes: ( 1.2 NAME 'newcore' )\n",
    );
    let mut store = SchemaStore::new(&layout.schema_dir(), &layout.user_schema_path());
    let report = manager
        .migrate_schema(&mut store, None)
        .expect("schema migration succeeds");
    assert_eq!(report.applied, 1);

    let merged = store.merged_entry().expect("schema merges");
    assert!(merged.has_value("attributeTypes", "( 1.9 NAME 'custom' )"));
    assert!(merged.has_value("attributeTypes", "( 1.2 NAME 'newcore' )"));
    let user = fs::read_to_string(layout.user_schema_path()).expect("user schema written");
    assert!(user.contains("1.9 NAME 'custom'"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn schema_store_rejects_duplicate_definitions() {
    let root = test_root("schema-dup");
    let (layout, _) = installation(&root, SHIPPED_CONFIG);
    let mut store = SchemaStore::new(&layout.schema_dir(), &layout.user_schema_path());
    let records = parse_change_records(
        "dn: cn=schema\nchangetype: modify\nadd: attributeTypes\nattributeTypes: ( 1.1 NAME 'core' )\n-\n",
    )
    .expect("record parses");

    assert!(store.apply(&records[0]).is_err());
    assert!(!layout.user_schema_path().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn ads_migration_only_adds_new_registration_entries() {
    let root = test_root("ads");
    let (layout, manager) = installation(&root, SHIPPED_CONFIG);
    write(
        &layout.admin_backend_path(),
        "dn: cn=admin data\nobjectClass: top\ncn: admin data\n\ndn: cn=Servers,cn=admin data\nobjectClass: top\ncn: Servers\ndescription: local\n",
    );
    let staged = root.join("stage/config/admin-backend.ldif");
    write(
        &staged,
        "dn: cn=admin data\nobjectClass: top\ncn: admin data\n\ndn: cn=Servers,cn=admin data\nobjectClass: top\ncn: Servers\n\ndn: cn=Server Groups,cn=admin data\nobjectClass: top\ncn: Server Groups\n",
    );

    let report = manager.migrate_ads(&staged, None).expect("ads migrates");
    assert_eq!(report.applied, 1);
    let store = LdifFileStore::open(&layout.admin_backend_path()).expect("store opens");
    assert!(store.entry("cn=Server Groups,cn=admin data").is_some());
    assert!(store
        .entry("cn=Servers,cn=admin data")
        .expect("servers entry")
        .has_value("description", "local"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn tool_properties_gain_only_missing_keys() {
    let root = test_root("tools");
    let (layout, manager) = installation(&root, SHIPPED_CONFIG);
    write(
        &layout.tools_properties_path(),
        "# local defaults\nhostname=ldap.example.com\nport=1389",
    );
    let staged = root.join("stage/config/tools.properties");
    write(&staged, "hostname=localhost\nport=389\nuseSSL=false\n");

    let added = manager
        .migrate_tool_properties(&staged)
        .expect("tools migrate");
    assert_eq!(added, 1);
    assert_eq!(
        fs::read_to_string(layout.tools_properties_path()).expect("tools file"),
        "# local defaults\nhostname=ldap.example.com\nport=1389\nuseSSL=false\n"
    );
    assert_eq!(manager.migrate_tool_properties(&staged).expect("rerun"), 0);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn property_parsing_skips_comments() {
    assert_eq!(
        property_keys("# c\n! c\n\na=1\nb : 2\n"),
        vec!["a".to_string(), "b".to_string()]
    );
    assert_eq!(missing_properties("a=1", "a=2\nc=3"), vec!["c=3".to_string()]);
}
