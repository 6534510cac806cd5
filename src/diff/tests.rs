use super::*;

const BASE: &str = "server {\n    listen 80;\n    server_name example.com;\n\n    location / {\n        proxy_pass http://127.0.0.1:8069;\n        proxy_set_header Host $host;\n    }\n}\n";

#[test]
fn test_first_version_has_no_diff() {
    assert!(diff_configs(None, BASE).is_none());
}

#[test]
fn test_identical_content_is_empty_diff() {
    let diff = diff_configs(Some(BASE), BASE).unwrap();
    assert!(diff.is_empty());
    assert!(diff.diff_lines.is_empty());
    assert_eq!(apply_diff(BASE, &diff).unwrap(), BASE);
}

#[test]
fn test_single_line_change_counts() {
    let updated = BASE.replace("listen 80;", "listen 443 ssl;");
    let diff = diff_configs(Some(BASE), &updated).unwrap();

    assert_eq!(diff.added_lines, 1);
    assert_eq!(diff.removed_lines, 1);
    assert_eq!(diff.summary(), "+1/-1");
    assert_eq!(diff.diff_lines[0], "--- previous\n");
    assert_eq!(diff.diff_lines[1], "+++ current\n");
    assert!(diff.diff_lines[2].starts_with("@@ -1,5 +1,5 @@"));
    assert!(diff.diff_lines.contains(&"-    listen 80;\n".to_string()));
    assert!(diff.diff_lines.contains(&"+    listen 443 ssl;\n".to_string()));
}

#[test]
fn test_round_trip_reconstructs_new_body() {
    let cases = [
        ("", "server {}\n"),
        ("a\nb\nc\n", ""),
        ("a\nb\nc\n", "a\nc\n"),
        ("a\nb\nc", "a\nb\nc\n"),
        ("one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nten\n",
         "zero\none\ntwo\nthree\nfour\nFIVE\nsix\nseven\neight\nnine\nten\neleven\n"),
        (BASE, "# managed\n"),
        ("x\n", "x\nx\nx\n"),
        ("ünïcödé\n{\n}\n", "ünïcödé\n{\n  ß;\n}\n"),
    ];

    for (old, new) in cases {
        let diff = diff_configs(Some(old), new).unwrap();
        assert_eq!(apply_diff(old, &diff).unwrap(), new, "round trip {:?} -> {:?}", old, new);
    }
}

#[test]
fn test_distant_changes_produce_separate_hunks() {
    let old: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
    let new = old.replace("line 2\n", "line two\n").replace("line 28\n", "line twenty-eight\n");

    let diff = diff_configs(Some(&old), &new).unwrap();
    let hunks = diff.diff_lines.iter().filter(|l| l.starts_with("@@ ")).count();
    assert_eq!(hunks, 2);
    assert_eq!(apply_diff(&old, &diff).unwrap(), new);
}

#[test]
fn test_apply_rejects_wrong_base() {
    let updated = BASE.replace("example.com", "example.org");
    let diff = diff_configs(Some(BASE), &updated).unwrap();

    let other_base = BASE.replace("listen 80;", "listen 8080;");
    assert!(matches!(
        apply_diff(&other_base, &diff),
        Err(DiffError::ContextMismatch(_))
    ));
}

#[test]
fn test_apply_rejects_malformed_diff() {
    let diff = ConfigDiff {
        diff_lines: vec!["garbage\n".to_string()],
        added_lines: 1,
        removed_lines: 0,
    };
    assert!(matches!(apply_diff(BASE, &diff), Err(DiffError::Malformed(_))));

    let diff = ConfigDiff {
        diff_lines: vec![
            "--- previous\n".to_string(),
            "+++ current\n".to_string(),
            "@@ nonsense @@\n".to_string(),
        ],
        added_lines: 0,
        removed_lines: 0,
    };
    assert!(matches!(apply_diff(BASE, &diff), Err(DiffError::Malformed(_))));
}
