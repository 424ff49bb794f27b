//! Packing a bundle directory and restoring it elsewhere

use std::fs;
use std::path::Path;

use pkd_bundle::{pack_to_file, unpack_file};

fn populate(root: &Path) {
    fs::create_dir_all(root.join("kib/artifacts/images")).unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    fs::write(root.join("cluster.yaml"), "metadata:\n  name: demo\n").unwrap();
    fs::write(root.join("kib/artifacts/images/kubernetes-images.tar"), vec![7u8; 4096]).unwrap();
    fs::write(root.join("dkp"), "#!/bin/sh\necho dkp\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(root.join("dkp"), fs::Permissions::from_mode(0o755)).unwrap();
    }
}

#[test]
fn bundle_survives_a_roundtrip() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("AirGapBundle");
    populate(&source);

    let archive = work.path().join("AirGapBundle-dkp-v2.6.0.tar.gz");
    pack_to_file(&source, &archive).unwrap();

    let restore = tempfile::tempdir().unwrap();
    let files = unpack_file(&archive, restore.path()).unwrap();
    assert_eq!(files, 3);

    let restored = restore.path().join("AirGapBundle");
    assert_eq!(
        fs::read_to_string(restored.join("cluster.yaml")).unwrap(),
        "metadata:\n  name: demo\n"
    );
    assert_eq!(
        fs::read(restored.join("kib/artifacts/images/kubernetes-images.tar")).unwrap(),
        vec![7u8; 4096]
    );
    assert!(restored.join("empty").is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(restored.join("dkp")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}

#[test]
fn unpacking_twice_is_safe() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("bundle");
    populate(&source);
    let archive = work.path().join("bundle.tgz");
    pack_to_file(&source, &archive).unwrap();

    let restore = tempfile::tempdir().unwrap();
    unpack_file(&archive, restore.path()).unwrap();
    fs::write(restore.path().join("bundle/cluster.yaml"), "edited").unwrap();
    unpack_file(&archive, restore.path()).unwrap();

    assert_eq!(
        fs::read_to_string(restore.path().join("bundle/cluster.yaml")).unwrap(),
        "metadata:\n  name: demo\n"
    );
}

#[cfg(unix)]
#[test]
fn read_only_files_are_replaced_on_a_second_unpack() {
    use std::os::unix::fs::PermissionsExt;

    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("bundle");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("ro"), "pinned").unwrap();
    fs::set_permissions(source.join("ro"), fs::Permissions::from_mode(0o444)).unwrap();
    let archive = work.path().join("bundle.tar.gz");
    pack_to_file(&source, &archive).unwrap();

    let restore = tempfile::tempdir().unwrap();
    assert_eq!(unpack_file(&archive, restore.path()).unwrap(), 1);
    assert_eq!(unpack_file(&archive, restore.path()).unwrap(), 1);

    let restored = restore.path().join("bundle/ro");
    assert_eq!(fs::read_to_string(&restored).unwrap(), "pinned");
    let mode = fs::metadata(&restored).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o444);
}
