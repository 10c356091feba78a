use std::fs;
use std::path::{Path, PathBuf};

use liftcmp::{
    compare_files, shared_basenames, write_storage, Comparison, NormalizeOptions, Settings, Table,
};
use tempfile::TempDir;

fn write_force_file(dir: &Path, rows: usize) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join("force.sto");
    let time: Vec<f64> = (0..rows).map(|i| i as f64 / 100.0).collect();
    let force: Vec<f64> = time.iter().map(|t| 500.0 + 100.0 * t).collect();
    let table = Table::from_columns(vec![("time", time), ("force_x", force)]).unwrap();
    write_storage(&table, "force", fs::File::create(&path).unwrap()).unwrap();
    path
}

#[test]
fn test_two_of_three_trials_compare() {
    let dir = TempDir::new().unwrap();
    let a = write_force_file(&dir.path().join("A"), 200);
    let b = write_force_file(&dir.path().join("B"), 150);
    let c = dir.path().join("C").join("force.sto");

    let result = compare_files(
        &[a, b, c],
        "force.sto",
        &Settings::default(),
        &NormalizeOptions::default(),
    )
    .unwrap();
    let figure = match result {
        Comparison::Figure(figure) => figure,
        other => panic!("expected a figure, got {:?}", other),
    };

    assert_eq!(figure.file_name("png"), "force_comparison.png");
    assert_eq!(figure.subplots.len(), 1);
    let subplot = &figure.subplots[0];
    assert_eq!(subplot.column, "force_x");
    assert_eq!(subplot.lines.len(), 2);
    for line in &subplot.lines {
        assert_eq!(line.x.len(), 101);
        assert_eq!(line.y.len(), 101);
        assert!(line.x[0].abs() < 1e-12);
        assert!((line.x[100] - 100.0).abs() < 1e-9);
        assert!((line.y[0] - 500.0).abs() < 1e-6);
    }
    let legend: Vec<&str> = figure.legend.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(legend, vec!["A", "B"]);
    assert_eq!(figure.unavailable.len(), 1);
    assert!(figure.unavailable[0].contains("C"));
    assert!(figure.unavailable[0].contains("force.sto"));
}

#[test]
fn test_missing_file_keeps_remaining_columns() {
    let dir = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for (name, extra) in [("t1", "knee"), ("t2", "hip"), ("t3", "ankle")] {
        let folder = dir.path().join(name);
        fs::create_dir_all(&folder).unwrap();
        let path = folder.join("ID.sto");
        let n = 80;
        let table = Table::from_columns(vec![
            ("time", (0..n).map(|i| i as f64 / 50.0).collect::<Vec<_>>()),
            ("pelvis_tx", (0..n).map(|i| i as f64).collect()),
            (extra, vec![1.0; n]),
        ])
        .unwrap();
        write_storage(&table, "ID", fs::File::create(&path).unwrap()).unwrap();
        paths.push(path);
    }
    paths.insert(1, dir.path().join("t4").join("ID.sto"));

    let result = compare_files(&paths, "ID.sto", &Settings::default(), &NormalizeOptions::default())
        .unwrap();
    let figure = result.figure().unwrap();
    let columns: Vec<&str> = figure.subplots.iter().map(|s| s.column.as_str()).collect();
    assert_eq!(columns, vec!["pelvis_tx"]);
    assert_eq!(figure.subplots[0].lines.len(), 3);
    assert_eq!(figure.legend.len(), 3);
}

#[test]
fn test_shared_basenames_across_folders() {
    let dir = TempDir::new().unwrap();
    let folders: Vec<PathBuf> = ["sq_70", "sq_75", "sq_80"]
        .iter()
        .map(|name| dir.path().join(name))
        .collect();
    for folder in &folders {
        fs::create_dir_all(folder).unwrap();
        fs::write(folder.join("IK.mot"), "endheader\ntime\tq\n0\t1\n").unwrap();
    }
    fs::write(folders[0].join("SO_force.sto"), "").unwrap();
    fs::write(folders[2].join("SO_force.sto"), "").unwrap();
    fs::write(folders[1].join("only_here.sto"), "").unwrap();
    fs::write(folders[0].join("notes.txt"), "").unwrap();
    fs::write(folders[1].join("notes.txt"), "").unwrap();

    let mut with_missing = folders.clone();
    with_missing.push(dir.path().join("does_not_exist"));
    let names = shared_basenames(&with_missing, &Settings::default());
    assert_eq!(names, vec!["IK.mot", "SO_force.sto"]);
}
