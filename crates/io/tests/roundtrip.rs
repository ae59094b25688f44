use std::fs;
use std::path::Path;

use deltagrid_io::csv::read_file_as_utf8;
use deltagrid_io::{
    change_table, cluster_table, read_records, read_table, write_csv, write_xlsx, ColumnOrder, NameTableBuilder,
    ReadOptions,
};
use deltagrid_recon::{cluster, diff, DiffOptions, FieldKind, FieldMatches, FuzzyOptions, KeySpec, Value};
use tempfile::tempdir;

const OLD: &str = "\
RegistrationContactID,RegistrationID,LastName,BusinessZip,ContactDescription,LastModified
1,100,Smith,10001,Condo,2024-01-01
2,100,Jones,10002,condo,2024-01-01
3,200,Brown,10003,Rental,2024-01-01
4,300,Green,10004,CO-OP,2024-01-01
4,300,Green,10004,CO-OP,2024-01-01
";

const NEW: &str = "\
RegistrationContactID,RegistrationID,LastName,BusinessZip,ContactDescription,LastModified
1,100,SMITH,10009,Condo,2024-06-01
2,100,Jones,10002,condo,2024-06-01
5,400,White,10005,condo,2024-06-01
";

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn options() -> ReadOptions {
    ReadOptions::default()
        .kind("RegistrationContactID", FieldKind::Integer)
        .kind("RegistrationID", FieldKind::Integer)
        .lowercase(true)
}

#[test]
fn contacts_diff_to_csv_and_xlsx() {
    let dir = tempdir().unwrap();
    let old_path = write(dir.path(), "old.csv", OLD);
    let new_path = write(dir.path(), "new.csv", NEW);
    let key = KeySpec::Field("RegistrationContactID".into());

    let old = read_records(&old_path, &options(), key.clone(), true).unwrap();
    let new = read_records(&new_path, &options(), key, true).unwrap();
    assert_eq!(old.len(), 4, "exact duplicate row folded");

    let opts = DiffOptions::default().ignore(["LastModified"]).show(["RegistrationID"]);
    let rule = FieldMatches::new("ContactDescription", ["condo", "co-op"]);
    let changes = diff(&old, &new, &opts, Some(&rule)).unwrap();

    // Lower-casing hides the SMITH/Smith difference; only the zip moved.
    assert_eq!(changes.summary.changed, 1);
    assert_eq!(changes.summary.unchanged, 1);
    assert_eq!(changes.summary.added, 1);
    assert_eq!(changes.summary.removed, 1, "the rental row is filtered out");
    assert_eq!(changes.summary.removed_filtered_out, 1);

    let table = change_table(&changes, &ColumnOrder { first: vec!["BusinessZip".into()], last: vec![] });
    let csv_path = dir.path().join("changes.csv");
    write_csv(&table, &csv_path).unwrap();

    let text = read_file_as_utf8(&csv_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "ChangeType,RegistrationContactID,BusinessZip (old),BusinessZip (new),\
RegistrationID (old),RegistrationID (new),LastName,ContactDescription,LastModified"
    );
    assert_eq!(lines[1], "changed,1,10001,10009,100,100,,,");
    assert!(lines[2].starts_with("added,5,,10005,,400,white,condo,"));
    assert!(lines[3].starts_with("removed,4,10004,,300,,green,co-op,"));
    assert_eq!(lines.len(), 4);

    let xlsx_path = dir.path().join("changes.xlsx");
    write_xlsx(&table, &xlsx_path, "contacts").unwrap();
    let bytes = fs::read(&xlsx_path).unwrap();
    assert_eq!(&bytes[..2], b"PK");
}

#[test]
fn corporation_counts_to_clustered_csv() {
    let dir = tempdir().unwrap();
    let contacts = write(
        dir.path(),
        "contacts.csv",
        "RegistrationID,CorporationName,ContactDescription\n\
         1,Acme Corp,condo\n\
         2,Acme Corp,condo\n\
         3,ACME CORPORATION,co-op\n\
         4,Ajax LLC,condo\n\
         5,Holdings Trust,condo\n",
    );
    let buildings = write(dir.path(), "buildings.csv", "RegistrationID,Units\n1,10\n2,20\n3,5\n4,1\n");

    let contacts = read_table(&contacts, &ReadOptions::default()).unwrap();
    let buildings = read_table(&buildings, &ReadOptions::default()).unwrap();
    let names = NameTableBuilder::new("CorporationName")
        .distinct_by("RegistrationID")
        .exclude(["trust"])
        .extras(deltagrid_io::ExtraSource::Joined {
            table: &buildings,
            link: "RegistrationID".into(),
            fields: vec!["Units".into()],
        })
        .build(&contacts)
        .unwrap();
    assert_eq!(names.len(), 3);

    let clustering = cluster(&names.entries, &FuzzyOptions::new(70.0)).unwrap();
    let table = cluster_table(&clustering, &names);
    assert_eq!(table.rows.len(), 3);
    assert_eq!(table.rows[0][1], Value::Float(3.0));
    assert_eq!(table.rows[0][2], Value::Float(35.0));

    let out = dir.path().join("fuzzy.csv");
    write_csv(&table, &out).unwrap();
    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "FuzzyCorporationName,FuzzyCount,FuzzyUnits,CorporationName,Count,Units,Similarity"
    );
    assert_eq!(lines[1], "Acme Corp,3,35,Acme Corp,2,30,100");
    assert!(lines[2].starts_with(",,,ACME CORPORATION,1,5,72"));
    assert_eq!(lines[3], "Ajax LLC,1,1,Ajax LLC,1,1,100");
}
