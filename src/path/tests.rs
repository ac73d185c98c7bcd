#![allow(clippy::unwrap_used)]

use super::*;

#[test]
fn slash_paths_collapse_duplicate_separators() {
    let path = Path::new("//Device///Network/");

    assert_eq!(path.segments(), ["Device", "Network"]);
    assert_eq!(path.to_string(), "/Device/Network");
    assert_eq!(path, Path::new("Device/Network"));
}

#[test]
fn root_renders_per_encoding() {
    assert_eq!(Path::new("/").to_string(), "/");
    assert_eq!(Path::new("").to_string(), "/");
    assert!(Path::new("///").is_root());
    assert_eq!(Path::root(PathEncoding::Dot).to_string(), "");
}

#[test]
fn dotted_paths_reject_doubled_separators() {
    assert!(Path::parse_dotted("com.example..State").is_err());
    assert!(Path::parse_dotted("com.example.").is_err());
    assert!(matches!(
        Path::parse_dotted("a..b"),
        Err(PathError::EmptySegment { index: 1, .. })
    ));
}

#[test]
fn dotted_paths_strip_one_leading_separator() {
    let path = Path::parse_dotted("/com.example.State").unwrap();
    assert_eq!(path.segments(), ["com", "example", "State"]);
    assert_eq!(path.to_string(), "com.example.State");

    let dotted = Path::parse_dotted(".com.example").unwrap();
    assert_eq!(dotted.segments(), ["com", "example"]);
}

#[test]
fn includes_is_ancestor_or_equal() {
    let device = Path::new("/Device");
    let state = Path::new("/Device/State");

    assert!(device.includes(&state));
    assert!(device.includes(&device));
    assert!(!state.includes(&device));
    assert!(Path::new("/").includes(&state));
    assert!(!Path::new("/Dev").includes(&state));
}

#[test]
fn includes_requires_equal_encoding() {
    let slash = Path::new("/com/example");
    let dot = Path::parse_dotted("com.example.State").unwrap();

    assert!(!slash.includes(&dot));
    assert!(slash.with_encoding(PathEncoding::Dot).unwrap().includes(&dot));
}

#[test]
fn strip_prefix_then_join_reconstructs_path() {
    let pairs = [
        ("/", "/Device/State"),
        ("/Device", "/Device/State"),
        ("/Device/State", "/Device/State"),
        ("/a/b", "/a/b/c/d/e"),
    ];

    for (a, b) in pairs {
        let a = Path::new(a);
        let b = Path::new(b);
        let relative = b.strip_prefix(&a).unwrap();
        assert_eq!(&a + &relative, b);
    }
}

#[test]
fn strip_prefix_of_unrelated_path_is_none() {
    assert_eq!(Path::new("/a/b").strip_prefix(&Path::new("/c")), None);
    assert_eq!(Path::new("/a").strip_prefix(&Path::new("/a/b")), None);
}

#[test]
fn child_and_parent() {
    let device = Path::new("/Device");
    let state = &device + "State";

    assert_eq!(state, Path::new("/Device/State"));
    assert_eq!(state.parent(), device);
    assert_eq!(state.last(), Some("State"));
    assert_eq!(Path::new("/").parent(), Path::new("/"));
    assert_eq!(device.child("Network/eth0"), Path::new("/Device/Network/eth0"));
}

#[test]
fn re_encoding_rejects_foreign_separators() {
    let path = Path::new("/com.example/State");
    assert!(matches!(
        path.with_encoding(PathEncoding::Dot),
        Err(PathError::InvalidSegment { .. })
    ));
}

#[test]
fn overlaps_is_symmetric() {
    let a = Path::new("/a");
    let b = Path::new("/a/b");
    let c = Path::new("/c");

    assert!(a.overlaps(&b));
    assert!(b.overlaps(&a));
    assert!(!a.overlaps(&c));
}
