// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

#[test]
fn empty_directory_has_no_generations() {
    let dir = tempdir().unwrap();
    let c = Checkpoints::new(dir.path().join("checkpoints"), 3);
    assert!(c.generations().unwrap().is_empty());
    assert!(c.recovery_candidates().unwrap().is_empty());
}

#[test]
fn write_next_numbers_monotonically() {
    let dir = tempdir().unwrap();
    let c = Checkpoints::new(dir.path().join("checkpoints"), 3);
    assert_eq!(c.write_next(b"one").unwrap(), 1);
    assert_eq!(c.write_next(b"two").unwrap(), 2);
    assert_eq!(c.write_next(b"three").unwrap(), 3);
    assert_eq!(c.generations().unwrap(), vec![1, 2, 3]);
}

#[test]
fn prunes_oldest_beyond_keep() {
    let dir = tempdir().unwrap();
    let c = Checkpoints::new(dir.path().join("checkpoints"), 2);
    for data in [b"a".as_slice(), b"b", b"c", b"d"] {
        c.write_next(data).unwrap();
    }
    assert_eq!(c.generations().unwrap(), vec![3, 4]);
    assert_eq!(std::fs::read(c.path_for(4)).unwrap(), b"d");
}

#[test]
fn recovery_candidates_are_newest_first() {
    let dir = tempdir().unwrap();
    let c = Checkpoints::new(dir.path().join("checkpoints"), 3);
    for data in [b"a".as_slice(), b"b", b"c"] {
        c.write_next(data).unwrap();
    }
    let candidates = c.recovery_candidates().unwrap();
    assert_eq!(candidates[0], c.path_for(3));
    assert_eq!(candidates[2], c.path_for(1));
}

#[test]
fn foreign_files_are_ignored() {
    let dir = tempdir().unwrap();
    let cp_dir = dir.path().join("checkpoints");
    std::fs::create_dir_all(&cp_dir).unwrap();
    std::fs::write(cp_dir.join("notes.txt"), b"x").unwrap();
    std::fs::write(cp_dir.join("12345.json"), b"x").unwrap(); // five digits

    let c = Checkpoints::new(&cp_dir, 3);
    assert!(c.generations().unwrap().is_empty());
    assert_eq!(c.write_next(b"a").unwrap(), 1);
}
