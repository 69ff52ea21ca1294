use anyhow::anyhow;

use super::*;

fn entry(dn: &str, pairs: &[(&str, &str)]) -> Entry {
    let mut entry = Entry::new(dn);
    for (name, value) in pairs {
        entry.add_value(name, value);
    }
    entry
}

#[test]
fn build_identifier_requires_fourteen_digits() {
    assert!(BuildIdentifier::parse("20240101120000").is_ok());
    assert!(BuildIdentifier::parse("2024010112000").is_err());
    assert!(BuildIdentifier::parse("2024010112000a").is_err());
    assert!(BuildIdentifier::parse("").is_err());
}

#[test]
fn build_identifier_orders_by_stamp_only() {
    let older = BuildIdentifier::new(20230101000000, "zzz");
    let newer = BuildIdentifier::new(20240101000000, "aaa");
    assert!(older < newer);
    assert_eq!(
        BuildIdentifier::new(20240101000000, "one"),
        BuildIdentifier::new(20240101000000, "two")
    );
}

#[test]
fn parse_buildinfo_and_derive_identifier() {
    let info = BuildInfo::from_toml_str(
        r#"
name = "OpenDS"
version = "2.2.0"
build = "20240101120000"
"#,
    )
    .expect("buildinfo should parse");

    let id = info.identifier().expect("identifier should derive");
    assert_eq!(id.stamp(), 20240101120000);
    assert_eq!(id.to_string(), "OpenDS 2.2.0 (build 20240101120000)");
}

#[test]
fn buildinfo_rejects_bad_stamp_and_empty_name() {
    let bad_stamp = BuildInfo::from_toml_str(
        "name = \"OpenDS\"\nversion = \"2.2.0\"\nbuild = \"yesterday\"\n",
    );
    assert!(bad_stamp.is_err());

    let empty_name =
        BuildInfo::from_toml_str("name = \" \"\nversion = \"2.2.0\"\nbuild = \"20240101120000\"\n");
    assert!(empty_name.is_err());
}

#[test]
fn buildinfo_round_trips_through_toml() {
    let info = BuildInfo {
        name: "OpenDS".to_string(),
        version: semver::Version::new(2, 3, 1),
        build: "20250505101010".to_string(),
    };
    let raw = info.to_toml_string().expect("must serialize");
    assert_eq!(BuildInfo::from_toml_str(&raw).expect("must parse"), info);
}

#[test]
fn classified_error_survives_context_layers() {
    let err = anyhow::Error::new(UpgradeError::InvalidPackage("missing bin".to_string()))
        .context("failed validating stage");
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::InvalidPackage);
    assert!(!UpgradeError::is_cancellation(&err));
}

#[test]
fn untagged_error_is_application_error() {
    let err = anyhow!("something broke");
    assert!(UpgradeError::find_in(&err).is_none());
    assert_eq!(UpgradeError::kind_of(&err), ErrorKind::Application);
}

#[test]
fn migration_cancel_counts_as_cancellation() {
    let err = anyhow::Error::new(UpgradeError::MigrationCanceled("schema".to_string()));
    assert!(UpgradeError::is_cancellation(&err));
    let err = anyhow::Error::new(UpgradeError::Canceled);
    assert!(UpgradeError::is_cancellation(&err));
}

#[test]
fn package_format_inference_ignores_query_and_fragment() {
    assert_eq!(
        PackageFormat::infer_from_name("https://example.test/OpenDS-2.2.zip?sig=1#x"),
        Some(PackageFormat::Zip)
    );
    assert_eq!(
        PackageFormat::infer_from_name("OpenDS-2.2.TGZ"),
        Some(PackageFormat::TarGz)
    );
    assert_eq!(PackageFormat::infer_from_name("OpenDS-2.2.rar"), None);
    assert_eq!(PackageFormat::parse("tar.gz"), Some(PackageFormat::TarGz));
}

#[test]
fn confirm_prompt_falls_back_to_default_for_unoffered_answers() {
    let prompt = ConfirmPrompt {
        title: "Warning".to_string(),
        summary: "summary".to_string(),
        details: String::new(),
        severity: PromptSeverity::Warning,
        options: vec![ConfirmOption::Continue, ConfirmOption::Cancel],
        default: ConfirmOption::Cancel,
    };
    assert_eq!(prompt.resolve(Some(ConfirmOption::Continue)), ConfirmOption::Continue);
    assert_eq!(prompt.resolve(Some(ConfirmOption::Retry)), ConfirmOption::Cancel);
    assert_eq!(prompt.resolve(None), ConfirmOption::Cancel);
    assert_eq!(ConfirmOption::parse(" R "), Some(ConfirmOption::Retry));
}

#[test]
fn parse_entries_handles_version_comments_and_folding() {
    let input = "version: 1\n\
# leading comment\n\
#  folded comment continuation\n\
dn: dc=example,dc=com\n\
objectClass: top\n\
objectClass: domain\n\
description: a long\n  value\n\
\n\
\n\
dn: ou=People, dc=example,dc=com\n\
ou: People\n";

    let entries = parse_entries(input).expect("entries should parse");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].values("objectclass"), ["top", "domain"]);
    assert_eq!(entries[0].values("description"), ["a long value"]);
    assert_eq!(entries[1].normalized_dn(), "ou=people,dc=example,dc=com");
}

#[test]
fn parse_entries_rejects_base64_values() {
    let err = parse_entries("dn: cn=x\ncn:: eA==\n").expect_err("base64 must be rejected");
    assert!(format!("{err:#}").contains("base64"));
}

#[test]
fn parse_entries_rejects_change_records() {
    assert!(parse_entries("dn: cn=x\nchangetype: delete\n").is_err());
}

#[test]
fn read_change_records_of_each_operation() {
    let input = "dn: cn=one,dc=example\n\
cn: one\n\
\n\
dn: cn=two,dc=example\n\
changetype: modify\n\
replace: description\n\
description: first\n\
description: second\n\
-\n\
add: seeAlso\n\
seeAlso: cn=one,dc=example\n\
-\n\
\n\
dn: cn=three,dc=example\n\
changetype: delete\n";

    let records = parse_change_records(input).expect("records should parse");
    assert_eq!(records.len(), 3);

    assert_eq!(records[0].operation, ChangeOperation::Add);
    let added = records[0].entry().expect("add record yields entry");
    assert_eq!(added.values("cn"), ["one"]);

    assert_eq!(records[1].operation, ChangeOperation::Modify);
    let modifications = records[1].modifications().expect("modifications parse");
    assert_eq!(modifications.len(), 2);
    assert_eq!(modifications[0].kind, ModificationKind::Replace);
    assert_eq!(modifications[0].values, ["first", "second"]);
    assert_eq!(modifications[1].attribute, "seeAlso");

    assert_eq!(records[2].operation, ChangeOperation::Delete);
    assert!(records[2].payload.is_empty());
}

#[test]
fn change_record_text_reads_back_identically() {
    let record = ChangeRecord::modify(
        "cn=config",
        &[Modification {
            kind: ModificationKind::Add,
            attribute: "ds-cfg-enabled".to_string(),
            values: vec!["true".to_string()],
        }],
    );
    let parsed = parse_change_records(&record.to_ldif()).expect("must parse");
    assert_eq!(parsed, vec![record]);
}

#[test]
fn malformed_modify_record_is_rejected() {
    let input = "dn: cn=x\nchangetype: modify\nfrobnicate: cn\ncn: y\n-\n";
    assert!(parse_change_records(input).is_err());

    let mismatched = "dn: cn=x\nchangetype: modify\nadd: cn\nsn: y\n-\n";
    assert!(parse_change_records(mismatched).is_err());
}

#[test]
fn diff_orders_adds_modifies_then_reverse_deletes() {
    let base = vec![
        entry("dc=example", &[("objectClass", "domain")]),
        entry(
            "ou=people,dc=example",
            &[("ou", "people"), ("description", "old")],
        ),
        entry("ou=gone,dc=example", &[("ou", "gone")]),
        entry("cn=child,ou=gone,dc=example", &[("cn", "child")]),
    ];
    let current = vec![
        entry("dc=example", &[("objectClass", "domain")]),
        entry(
            "ou=people,dc=example",
            &[("ou", "people"), ("description", "new"), ("seeAlso", "x")],
        ),
        entry("ou=fresh,dc=example", &[("ou", "fresh")]),
    ];

    let records = diff_entries(&base, &current);
    let summary: Vec<(ChangeOperation, &str)> = records
        .iter()
        .map(|record| (record.operation, record.target.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ChangeOperation::Modify, "ou=people,dc=example"),
            (ChangeOperation::Add, "ou=fresh,dc=example"),
            (ChangeOperation::Delete, "cn=child,ou=gone,dc=example"),
            (ChangeOperation::Delete, "ou=gone,dc=example"),
        ]
    );
    assert_eq!(
        records[0].payload,
        vec![
            "delete: description",
            "description: old",
            "-",
            "add: description",
            "description: new",
            "-",
            "add: seeAlso",
            "seeAlso: x",
            "-",
        ]
    );
}

#[test]
fn equivalence_ignores_dn_spacing_and_case() {
    let left = vec![entry("OU=People, DC=Example", &[("ou", "People")])];
    let right = vec![entry("ou=people,dc=example", &[("ou", "People")])];
    assert!(entries_equivalent(&left, &right));
    assert!(same_dn("CN=A , dc=b", "cn=a,dc=b"));
    assert_eq!(parent_dn("cn=a,dc=b"), Some("dc=b"));
}

#[test]
fn merge_collapses_repeated_values() {
    let first = entry(
        "cn=schema",
        &[("objectClass", "top"), ("attributeTypes", "( 1.1 NAME 'a' )")],
    );
    let second = entry(
        "cn=schema",
        &[("objectClass", "top"), ("attributeTypes", "( 1.2 NAME 'b' )")],
    );
    let merged = merge_entries("cn=schema", [&first, &second]);
    assert_eq!(merged.values("objectclass"), ["top"]);
    assert_eq!(merged.values("attributetypes").len(), 2);
}

#[test]
fn entry_value_mutations_report_changes() {
    let mut target = entry("cn=x", &[("cn", "x")]);
    assert!(!target.add_value("CN", "x"));
    assert!(target.add_value("sn", "y"));
    assert!(target.remove_value("sn", "y"));
    assert!(target.attribute("sn").is_none());
    assert!(!target.remove_value("sn", "y"));
    target.replace_attribute("description", &["d".to_string()]);
    assert!(target.has_value("description", "d"));
}
