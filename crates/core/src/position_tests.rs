// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Utc;

#[test]
fn serde_round_trip() {
    let pos = Position::new("/var/log/syslog", SourceType::File, 4096, Utc::now())
        .with_identity(FileIdentity {
            device: 2049,
            inode: 131072,
            size_at_discovery: 8192,
        });

    let json = serde_json::to_string(&pos).unwrap();
    let back: Position = serde_json::from_str(&json).unwrap();
    assert_eq!(back, pos);
}

#[test]
fn same_file_ignores_size() {
    let a = FileIdentity {
        device: 1,
        inode: 42,
        size_at_discovery: 100,
    };
    let b = FileIdentity {
        device: 1,
        inode: 42,
        size_at_discovery: 9000,
    };
    let c = FileIdentity {
        device: 1,
        inode: 43,
        size_at_discovery: 100,
    };
    assert!(a.same_file(&b));
    assert!(!a.same_file(&c));
}

#[cfg(unix)]
#[test]
fn identity_of_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.log");
    std::fs::write(&path, b"hello").unwrap();
    let meta = std::fs::metadata(&path).unwrap();
    let id = FileIdentity::of(&meta);
    assert_eq!(id.size_at_discovery, 5);

    // Rename keeps the identity; rewrite under the old path does not
    let moved = dir.path().join("f.log.1");
    std::fs::rename(&path, &moved).unwrap();
    let same = FileIdentity::of(&std::fs::metadata(&moved).unwrap());
    assert!(id.same_file(&same));

    std::fs::write(&path, b"new file").unwrap();
    let fresh = FileIdentity::of(&std::fs::metadata(&path).unwrap());
    assert!(!id.same_file(&fresh));
}
