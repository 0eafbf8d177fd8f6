// Behavioural guarantees of the installer, linker, lock manager and switch.
mod common;

use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{FakeProbe, TestEnvironment};
use tb_common::error::TbError;
use tb_core::install::{InstallOptions, InstallOutcome, InstallSession, InterruptSource};
use tb_core::link::{opt_link, switch, LinkOptions, Linker};
use tb_core::lock::FormulaLock;

fn position(names: &[&str], name: &str) -> usize {
    names.iter().position(|n| *n == name).unwrap()
}

#[test]
fn linking_an_installed_keg_again_changes_nothing() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"1.0"}"#]);
    env.builder.add_file("foo", "share/man/man1/foo.1");
    env.install("foo").unwrap();
    let keg = env.registry.resolve_keg("foo").unwrap();
    let before = env.snapshot();

    let report = Linker::new(&env.registry)
        .link(&keg, LinkOptions::default())
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(report.unchanged, 2);
    assert_eq!(env.snapshot(), before);
}

#[test]
fn expansion_orders_a_diamond_dependencies_first_without_duplicates() {
    let env = TestEnvironment::new(&[
        r#"{"name":"a","version":"1.0","dependencies":[{"name":"b"},{"name":"c"}]}"#,
        r#"{"name":"b","version":"1.0","dependencies":[{"name":"d"}]}"#,
        r#"{"name":"c","version":"1.0","dependencies":[{"name":"d"}]}"#,
        r#"{"name":"d","version":"1.0"}"#,
    ]);
    let root = env.formulary.load_formula("a").unwrap();
    let expansion = env
        .installer()
        .expand(&root, &InstallOptions::default())
        .unwrap();
    let names = expansion.names();
    assert_eq!(names.iter().filter(|n| **n == "d").count(), 1);
    assert!(position(&names, "d") < position(&names, "b"));
    assert!(position(&names, "d") < position(&names, "c"));

    env.install("a").unwrap();
    let built = env.builder.built();
    assert_eq!(built.iter().filter(|n| *n == "d").count(), 1);
    assert_eq!(built.last().map(String::as_str), Some("a"));
}

#[test]
fn optional_dependency_is_installed_only_on_request() {
    let defs = [
        r#"{"name":"a","version":"1.0","dependencies":[{"name":"b","tags":"OPTIONAL"}]}"#,
        r#"{"name":"b","version":"1.0"}"#,
    ];
    let env = TestEnvironment::new(&defs);
    env.install("a").unwrap();
    assert_eq!(env.builder.built(), ["a"]);

    let env = TestEnvironment::new(&defs);
    let options = InstallOptions {
        options: ["with-b"].into_iter().collect(),
        ..InstallOptions::default()
    };
    env.install_with("a", &options).unwrap();
    assert_eq!(env.builder.built(), ["b", "a"]);
    let receipt = env.registry.resolve_keg("a").unwrap().receipt().unwrap().unwrap();
    assert!(receipt.used_options.contains("with-b"));

    // Already present: requested but not reinstalled.
    let root = env.formulary.load_formula("a").unwrap();
    let expansion = env.installer().expand(&root, &options).unwrap();
    assert_eq!(expansion.names(), ["b"]);
    assert_eq!(expansion.to_install().count(), 0);
}

#[test]
fn held_lock_fails_the_install_without_side_effects() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"1.0"}"#]);
    let mut held = FormulaLock::acquire(&env.config.locks_dir(), "foo", "another tb").unwrap();

    let err = env.install("foo").unwrap_err();
    assert!(matches!(err, TbError::OperationInProgress { ref name, .. } if name == "foo"));
    assert!(env.registry.kegs_for("foo").unwrap().is_empty());

    held.release();
    env.install("foo").unwrap();
    assert_eq!(env.installed_names(), ["foo"]);
}

#[test]
fn link_conflict_names_both_kegs_and_overwrite_repoints() {
    let env = TestEnvironment::new(&[
        r#"{"name":"gawk","version":"5.1"}"#,
        r#"{"name":"mawk","version":"1.3"}"#,
    ]);
    env.builder.add_file("gawk", "bin/awk");
    env.builder.add_file("mawk", "bin/awk");
    env.install("gawk").unwrap();

    // The second install succeeds; its link failure is only a warning.
    match env.install("mawk").unwrap() {
        InstallOutcome::Installed { link, .. } => assert!(link.is_none()),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!tb_io::check_symlink_exists(&env.prefix_path("bin/mawk")));

    let gawk = env.registry.resolve_keg("gawk").unwrap();
    let mawk = env.registry.resolve_keg("mawk").unwrap();
    let linker = Linker::new(&env.registry);
    match linker.link(&mawk, LinkOptions::default()).unwrap_err() {
        TbError::LinkConflict {
            path,
            keg,
            owner,
            owner_keg,
        } => {
            assert_eq!(path, env.prefix_path("bin/awk"));
            assert_eq!(keg, mawk.path);
            assert_eq!(owner, "gawk 5.1");
            assert_eq!(owner_keg, gawk.path);
        }
        other => panic!("expected LinkConflict, got {other:?}"),
    }

    let report = linker
        .link(
            &mawk,
            LinkOptions {
                overwrite: true,
                ..LinkOptions::default()
            },
        )
        .unwrap();
    assert_eq!(report.repointed, [env.prefix_path("bin/awk")]);
    assert_eq!(
        fs::read_link(env.prefix_path("bin/awk")).unwrap(),
        mawk.path.join("bin/awk")
    );
}

#[test]
fn switch_leaves_exactly_the_requested_version_active() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"3.0"}"#]);
    for v in ["1.0", "2.0"] {
        env.make_keg("foo", v);
    }
    let newest = env.make_keg("foo", "3.0");
    opt_link(&env.config, &newest).unwrap();
    Linker::new(&env.registry)
        .link(&newest, LinkOptions::default())
        .unwrap();

    let report = switch(&env.registry, &env.formulary, "foo", "2.0").unwrap();
    assert_eq!(report.unlinked.len(), 1);
    assert_eq!(env.registry.linked_keg("foo").unwrap().version_str(), "2.0");
    assert_eq!(env.registry.opt_keg("foo").unwrap().version_str(), "2.0");
    assert_eq!(
        fs::read_link(env.prefix_path("bin/foo")).unwrap(),
        env.config.formula_keg_path("foo", "2.0").join("bin/foo")
    );
}

#[test]
fn linking_a_newer_version_leaves_no_links_into_the_older_one() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    let old = env.make_keg("foo", "1.0");
    fs::create_dir_all(old.path.join("share")).unwrap();
    fs::write(old.path.join("share/old-only"), "1.0").unwrap();
    let new = env.make_keg("foo", "2.0");
    let linker = Linker::new(&env.registry);
    linker.link(&old, LinkOptions::default()).unwrap();

    let report = linker.link(&new, LinkOptions::default()).unwrap();
    assert_eq!(report.displaced.len(), 2);
    assert!(!tb_io::check_symlink_exists(&env.prefix_path("share/old-only")));
    assert_eq!(env.registry.linked_keg("foo").unwrap().version_str(), "2.0");
    assert_eq!(
        fs::read_link(env.prefix_path("bin/foo")).unwrap(),
        new.path.join("bin/foo")
    );
}

#[test]
fn switch_into_a_conflict_keeps_the_previous_version_active() {
    let env = TestEnvironment::new(&[
        r#"{"name":"foo","version":"2.0"}"#,
        r#"{"name":"bar","version":"1.0"}"#,
    ]);
    let old = env.make_keg("foo", "1.0");
    opt_link(&env.config, &old).unwrap();
    let linker = Linker::new(&env.registry);
    linker.link(&old, LinkOptions::default()).unwrap();

    let new = env.make_keg("foo", "2.0");
    fs::write(new.path.join("bin/bar"), "2.0").unwrap();
    let bar = env.make_keg("bar", "1.0");
    linker.link(&bar, LinkOptions::default()).unwrap();
    let before = env.snapshot();

    let err = switch(&env.registry, &env.formulary, "foo", "2.0").unwrap_err();
    assert!(matches!(err, TbError::LinkConflict { ref owner, .. } if owner == "bar 1.0"));
    assert_eq!(env.registry.linked_keg("foo").unwrap().version_str(), "1.0");
    assert_eq!(env.registry.opt_keg("foo").unwrap().version_str(), "1.0");
    assert_eq!(
        fs::read_link(env.prefix_path("bin/foo")).unwrap(),
        old.path.join("bin/foo")
    );
    assert_eq!(env.snapshot(), before);
}

#[test]
fn already_installed_version_is_a_soft_outcome() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"1.0"}"#]);
    env.install("foo").unwrap();
    assert!(matches!(
        env.install("foo").unwrap(),
        InstallOutcome::AlreadyInstalled(ref keg) if keg.version_str() == "1.0"
    ));
    assert_eq!(env.builder.built(), ["foo"]);
}

#[test]
fn different_linked_version_must_be_unlinked_first() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"2.0"}"#]);
    let old = env.make_keg("foo", "1.0");
    Linker::new(&env.registry)
        .link(&old, LinkOptions::default())
        .unwrap();

    let err = env.install("foo").unwrap_err();
    assert!(matches!(
        err,
        TbError::AlreadyInstalled { ref installed, ref requested, .. }
            if installed == "1.0" && requested == "2.0"
    ));
}

#[test]
fn same_session_does_not_install_twice() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"1.0"}"#]);
    let installer = env.installer();
    let mut session = InstallSession::new();
    installer
        .install_name(&mut session, "foo", &InstallOptions::default())
        .unwrap();
    assert_eq!(
        installer
            .install_name(&mut session, "foo", &InstallOptions::default())
            .unwrap(),
        InstallOutcome::AlreadyAttempted("foo".into())
    );
}

#[test]
fn unsatisfied_fatal_requirement_aborts_before_any_work() {
    let env = TestEnvironment::new(&[
        r#"{"name":"wine","version":"1.8","requirements":[{"name":"x11","type":"executable","command":"xterm"}]}"#,
    ]);
    let before = env.snapshot();
    let err = env.install("wine").unwrap_err();
    assert!(matches!(err, TbError::UnsatisfiedRequirements(_)));
    assert_eq!(env.snapshot(), before);
}

#[test]
fn requirement_with_default_formula_becomes_a_dependency() {
    let env = TestEnvironment::new(&[
        r#"{"name":"wine","version":"1.8","requirements":[{"name":"x11","type":"executable","command":"xterm","default_formula":"xquartz"}]}"#,
        r#"{"name":"xquartz","version":"2.7"}"#,
    ]);
    env.install("wine").unwrap();
    assert_eq!(env.builder.built(), ["xquartz", "wine"]);
}

#[test]
fn missing_toolchain_is_reported_before_building() {
    let env = TestEnvironment::with_probe(
        &[r#"{"name":"foo","version":"1.0"}"#],
        FakeProbe {
            build_tools: false,
            ..FakeProbe::default()
        },
    );
    let err = env.install("foo").unwrap_err();
    assert!(matches!(err, TbError::BuildTools(ref names) if names == &["foo".to_string()]));
    assert!(env.builder.built().is_empty());
}

#[test]
fn bottles_are_poured_when_available() {
    let env = TestEnvironment::with_probe(
        &[r#"{"name":"foo","version":"1.0","bottle":{"cellar":"any"}}"#],
        FakeProbe {
            build_tools: false,
            ..FakeProbe::default()
        },
    );
    env.bottles.offer("foo");
    match env.install("foo").unwrap() {
        InstallOutcome::Installed {
            poured_from_bottle, ..
        } => assert!(poured_from_bottle),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(env.builder.built().is_empty());
    let receipt = env.registry.resolve_keg("foo").unwrap().receipt().unwrap().unwrap();
    assert!(receipt.poured_from_bottle);
}

#[test]
fn broken_bottle_falls_back_to_source() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"1.0","bottle":{"cellar":"any"}}"#]);
    env.bottles.offer("foo");
    env.bottles.break_bottle("foo");
    match env.install("foo").unwrap() {
        InstallOutcome::Installed {
            poured_from_bottle, ..
        } => assert!(!poured_from_bottle),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(env.builder.built(), ["foo"]);
}

#[test]
fn build_from_source_skips_available_bottles() {
    let env = TestEnvironment::new(&[r#"{"name":"foo","version":"1.0","bottle":{"cellar":"any"}}"#]);
    env.bottles.offer("foo");
    let options = InstallOptions {
        build_from_source: true,
        ..InstallOptions::default()
    };
    env.install_with("foo", &options).unwrap();
    assert_eq!(env.builder.built(), ["foo"]);
    assert!(env.bottles.poured.lock().unwrap().is_empty());
}

#[test]
fn keg_only_formula_is_opt_linked_but_not_linked() {
    let env = TestEnvironment::new(&[r#"{"name":"openssl","version":"1.0.2","keg_only":"provided by the system"}"#]);
    match env.install("openssl").unwrap() {
        InstallOutcome::Installed { link, .. } => assert!(link.is_none()),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(env.registry.opt_keg("openssl").is_some());
    assert!(env.registry.linked_keg("openssl").is_none());
    assert!(!tb_io::check_symlink_exists(&env.prefix_path("bin/openssl")));
}

#[test]
fn interrupt_after_a_build_rolls_it_back() {
    let env = TestEnvironment::new(&[
        r#"{"name":"x","version":"1.0","dependencies":[{"name":"y"}]}"#,
        r#"{"name":"y","version":"1.0"}"#,
    ]);
    let flag = Arc::new(AtomicBool::new(false));
    *env.builder.interrupt_after.lock().unwrap() = Some(("y".into(), Arc::clone(&flag)));
    let mut session = InstallSession::with_interrupt(InterruptSource::Flag(flag));

    let err = env
        .installer()
        .install_name(&mut session, "x", &InstallOptions::default())
        .unwrap_err();
    assert!(matches!(err, TbError::Interrupted(ref name) if name == "y"));
    assert!(env.registry.kegs_for("y").unwrap().is_empty());
    assert!(env.registry.kegs_for("x").unwrap().is_empty());
    assert!(!session.holds_locks());
}

#[test]
fn only_dependencies_leaves_the_root_out() {
    let env = TestEnvironment::new(&[
        r#"{"name":"x","version":"1.0","dependencies":[{"name":"y"}]}"#,
        r#"{"name":"y","version":"1.0"}"#,
    ]);
    let options = InstallOptions {
        only_dependencies: true,
        ..InstallOptions::default()
    };
    assert_eq!(
        env.install_with("x", &options).unwrap(),
        InstallOutcome::DependenciesOnly("x".into())
    );
    assert_eq!(env.installed_names(), ["y"]);
}
