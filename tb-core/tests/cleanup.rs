// Keg and cache cleanup rules.
mod common;

use std::fs;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use common::TestEnvironment;
use tb_common::error::TbError;
use tb_common::keg::InstalledKeg;
use tb_common::model::{Options, SpecKind};
use tb_common::receipt::{InstallReceipt, ReceiptSource, RuntimeDependency};
use tb_core::cleanup::{Cleanup, CleanupOptions, Prune};
use tb_core::link::{opt_link, LinkOptions, Linker};
use tb_core::lock::FormulaLock;
use tb_core::pin::pin;

fn activate(env: &TestEnvironment, keg: &InstalledKeg) {
    opt_link(&env.config, keg).unwrap();
    Linker::new(&env.registry)
        .link(keg, LinkOptions::default())
        .unwrap();
}

fn write_receipt(keg: &InstalledKeg, deps: &[&InstalledKeg], hashed: bool) {
    let receipt = InstallReceipt {
        name: keg.name.clone(),
        version: keg.version.clone(),
        used_options: Options::new(),
        unused_options: Options::new(),
        poured_from_bottle: false,
        installed_as_dependency: false,
        installed_on_request: true,
        time: Utc::now(),
        source: ReceiptSource {
            tap: None,
            spec: SpecKind::Stable,
            formula_hash: hashed.then(|| "ab".repeat(32)),
        },
        runtime_dependencies: deps
            .iter()
            .map(|d| RuntimeDependency {
                name: d.name.clone(),
                version: d.version.clone(),
            })
            .collect(),
    };
    tb_io::write_json(&InstallReceipt::path_in(&keg.path), &receipt).unwrap();
}

fn versions(kegs: &[InstalledKeg]) -> Vec<String> {
    kegs.iter().map(InstalledKeg::version_str).collect()
}

fn cleanup(env: &TestEnvironment, options: CleanupOptions) -> tb_core::CleanupReport {
    Cleanup::new(&env.registry, &env.formulary).run(&options).unwrap()
}

#[test]
fn dry_run_reports_without_removing() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    env.make_keg("foo", "1.0");
    let current = env.make_keg("foo", "2.0");
    activate(&env, &current);

    let report = cleanup(
        &env,
        CleanupOptions {
            dry_run: true,
            ..CleanupOptions::default()
        },
    );
    assert!(report.dry_run);
    assert_eq!(versions(&report.kegs), ["1.0"]);
    assert!(report.freed_bytes > 0);
    assert_eq!(env.registry.kegs_for("foo").unwrap().len(), 2);
}

#[test]
fn removed_kegs_leave_no_symlinks_behind() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    let old = env.make_keg("foo", "1.0");
    fs::create_dir_all(old.path.join("share")).unwrap();
    fs::write(old.path.join("share/legacy"), "1.0").unwrap();
    fs::create_dir_all(env.prefix_path("share")).unwrap();
    std::os::unix::fs::symlink(old.path.join("share/legacy"), env.prefix_path("share/legacy"))
        .unwrap();
    let current = env.make_keg("foo", "2.0");
    activate(&env, &current);

    let report = cleanup(&env, CleanupOptions::default());
    assert_eq!(versions(&report.kegs), ["1.0"]);
    assert!(!tb_io::check_symlink_exists(&env.prefix_path("share/legacy")));
    assert_eq!(
        fs::read_link(env.prefix_path("bin/foo")).unwrap(),
        current.path.join("bin/foo")
    );
}

#[test]
fn held_lock_keeps_the_rack_untouched() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    env.make_keg("foo", "1.0");
    let current = env.make_keg("foo", "2.0");
    activate(&env, &current);
    let mut held = FormulaLock::acquire(&env.config.locks_dir(), "foo", "installing foo").unwrap();

    let err = Cleanup::new(&env.registry, &env.formulary)
        .run(&CleanupOptions::default())
        .unwrap_err();
    assert!(matches!(err, TbError::OperationInProgress { ref name, .. } if name == "foo"));
    assert_eq!(env.registry.kegs_for("foo").unwrap().len(), 2);

    held.release();
    assert_eq!(versions(&cleanup(&env, CleanupOptions::default()).kegs), ["1.0"]);
}

#[test]
fn pinned_racks_are_skipped() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    env.make_keg("foo", "1.0");
    let current = env.make_keg("foo", "2.0");
    activate(&env, &current);
    pin(&env.registry, "foo").unwrap();

    let report = cleanup(&env, CleanupOptions::default());
    assert!(report.kegs.is_empty());
    assert_eq!(report.skipped_pinned, ["foo"]);
    assert_eq!(env.registry.kegs_for("foo").unwrap().len(), 2);
}

#[test]
fn exact_runtime_dependency_versions_survive() {
    let env = TestEnvironment::new(&[
        r#"{"name":"foo","version":"3.0"}"#,
        r#"{"name":"bar","version":"1.0","dependencies":[{"name":"foo"}]}"#,
    ]);
    env.make_keg("foo", "1.0");
    let pinned_dep = env.make_keg("foo", "2.0");
    let current = env.make_keg("foo", "3.0");
    activate(&env, &current);
    let bar = env.make_keg("bar", "1.0");
    write_receipt(&bar, &[&pinned_dep], true);

    let report = cleanup(&env, CleanupOptions::default());
    assert_eq!(versions(&report.kegs), ["1.0"]);
    assert_eq!(
        versions(&env.registry.kegs_for("foo").unwrap()),
        ["2.0", "3.0"]
    );
}

#[test]
fn keg_only_needs_hashed_receipts_of_dependents() {
    let defs = [
        r#"{"name":"openssl","version":"1.1","keg_only":"shadows the system library"}"#,
        r#"{"name":"curl","version":"7.0","dependencies":[{"name":"openssl"}]}"#,
    ];
    let env = TestEnvironment::new(&defs);
    env.make_keg("openssl", "1.0");
    let current = env.make_keg("openssl", "1.1");
    opt_link(&env.config, &current).unwrap();
    let curl = env.make_keg("curl", "7.0");
    write_receipt(&curl, &[&current], false);

    let options = CleanupOptions {
        names: vec!["openssl".into()],
        ..CleanupOptions::default()
    };
    assert!(cleanup(&env, options.clone()).kegs.is_empty());

    write_receipt(&curl, &[&current], true);
    assert_eq!(versions(&cleanup(&env, options).kegs), ["1.0"]);
}

#[test]
fn keg_only_without_opt_link_is_kept_unless_forced() {
    let env = TestEnvironment::new(&[r#"{"name":"openssl","version":"1.1","keg_only":"system"}"#]);
    env.make_keg("openssl", "1.0");
    let current = env.make_keg("openssl", "1.1");
    Linker::new(&env.registry)
        .link_formula(
            &env.formulary.load_formula("openssl").unwrap(),
            &current,
            LinkOptions {
                force: true,
                ..LinkOptions::default()
            },
        )
        .unwrap();

    assert!(cleanup(&env, CleanupOptions::default()).kegs.is_empty());
    let forced = cleanup(
        &env,
        CleanupOptions {
            force: true,
            ..CleanupOptions::default()
        },
    );
    assert_eq!(versions(&forced.kegs), ["1.0"]);
}

#[test]
fn outdated_and_orphaned_downloads_are_removed() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    let downloads = env.config.cache_dir().join("downloads");
    fs::create_dir_all(&downloads).unwrap();
    for file in ["foo--1.0.tar.gz", "foo--2.0.tar.gz", "gone--0.1.tar.bz2", "notes.txt"] {
        fs::write(downloads.join(file), file).unwrap();
    }

    let report = cleanup(&env, CleanupOptions::default());
    let mut removed: Vec<String> = report
        .cache_files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    removed.sort();
    assert_eq!(removed, ["foo--1.0.tar.gz", "gone--0.1.tar.bz2"]);
    assert!(downloads.join("foo--2.0.tar.gz").exists());
    assert!(downloads.join("notes.txt").exists());

    let report = cleanup(
        &env,
        CleanupOptions {
            prune: Some(Prune::All),
            ..CleanupOptions::default()
        },
    );
    assert_eq!(report.cache_files, [downloads.join("foo--2.0.tar.gz")]);
}

#[test]
fn prune_days_removes_only_old_downloads() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    let downloads = env.config.cache_dir().join("downloads");
    fs::create_dir_all(&downloads).unwrap();
    fs::write(downloads.join("foo--2.0.tar.gz"), "src").unwrap();
    let options = CleanupOptions {
        prune: Some(Prune::Days(30)),
        ..CleanupOptions::default()
    };

    let report = Cleanup::new(&env.registry, &env.formulary).run(&options).unwrap();
    assert!(report.cache_files.is_empty());

    let later = SystemTime::now() + Duration::from_secs(31 * 24 * 60 * 60);
    let report = Cleanup::new(&env.registry, &env.formulary)
        .at(later)
        .run(&options)
        .unwrap();
    assert_eq!(report.cache_files, [downloads.join("foo--2.0.tar.gz")]);
}

#[test]
fn full_cleanup_sweeps_marker_files() {
    let env = TestEnvironment::new(&[]);
    let share = env.prefix_path("share/doc");
    fs::create_dir_all(&share).unwrap();
    fs::write(share.join(".DS_Store"), "").unwrap();

    let report = cleanup(&env, CleanupOptions::default());
    assert_eq!(report.markers, [share.join(".DS_Store")]);
    assert!(!share.join(".DS_Store").exists());

    fs::write(share.join(".DS_Store"), "").unwrap();
    let scoped = cleanup(
        &env,
        CleanupOptions {
            names: vec!["foo".into()],
            ..CleanupOptions::default()
        },
    );
    assert!(scoped.markers.is_empty());
}
